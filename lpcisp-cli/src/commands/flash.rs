//! Program, erase, verify, read and start command implementations.

use anyhow::{Context, Result, bail};
use console::style;
use lpcisp::{Image, MismatchPolicy};
use std::fs;
use std::path::Path;

use crate::config::Config;
use crate::{Cli, CliError, connect, progress_bar};

/// Switches of the `program` command.
#[derive(Debug, Clone, Copy, Default)]
#[allow(clippy::struct_excessive_bools)]
pub(crate) struct ProgramOptions {
    pub erase_all: bool,
    pub verify: bool,
    pub readback: bool,
    pub start: bool,
}

fn load_image(cli: &Cli, file: &Path, address: u32) -> Result<Image> {
    let image = Image::from_file(file, address)
        .with_context(|| format!("Failed to load image {}", file.display()))?;
    if !cli.quiet {
        eprintln!(
            "{} Loaded {} ({} bytes) for 0x{address:08X}",
            style("📦").cyan(),
            file.display(),
            image.len()
        );
    }
    Ok(image)
}

fn done(cli: &Cli, message: &str) {
    if !cli.quiet {
        eprintln!("{} {message}", style("✓").green().bold());
    }
}

/// Program command implementation.
pub(crate) fn cmd_program(
    cli: &Cli,
    config: &Config,
    file: &Path,
    address: u32,
    options: ProgramOptions,
) -> Result<()> {
    let mut image = load_image(cli, file, address)?;
    let mut flasher = connect(cli, config)?;

    let pb = progress_bar(cli, "Programming");
    let programmed = flasher.program_image(
        &mut image,
        options.erase_all,
        options.verify,
        MismatchPolicy::Log,
        |current, total| {
            pb.set_length(total as u64);
            pb.set_position(current as u64);
        },
    );
    pb.finish_and_clear();
    if !programmed? {
        bail!("Flash differs from RAM after programming");
    }
    done(cli, "Programming complete");

    if options.readback {
        if !flasher.verify_image(address, image.data(), MismatchPolicy::Log)? {
            bail!("Read-back verification failed");
        }
        done(cli, "Read-back verification passed");
    }

    if options.start {
        flasher.start(address)?;
        done(cli, &format!("Started at 0x{address:08X}"));
    }

    Ok(())
}

/// Erase command implementation. `range` is an inclusive address range,
/// `None` erases every sector.
pub(crate) fn cmd_erase(
    cli: &Cli,
    config: &Config,
    range: Option<(u32, u32)>,
    blank_check: bool,
) -> Result<()> {
    if let Some((start, end)) = range {
        if start > end {
            return Err(CliError::Usage(format!(
                "Start address 0x{start:08X} is above end address 0x{end:08X}"
            ))
            .into());
        }
    }

    let mut flasher = connect(cli, config)?;
    if !cli.quiet {
        eprintln!("{} Erasing...", style("🗑").red());
    }
    let blank = match range {
        None => flasher.erase_all(blank_check)?,
        Some((start, end)) => flasher.erase_range(start, end, blank_check)?,
    };
    if !blank {
        bail!("Flash is not blank after erase");
    }

    done(cli, "Erase complete");
    Ok(())
}

/// Blank check command implementation.
pub(crate) fn cmd_blank_check(cli: &Cli, config: &Config) -> Result<()> {
    let mut flasher = connect(cli, config)?;
    if !flasher.blank_check_all(MismatchPolicy::Log)? {
        bail!("Flash is not blank");
    }
    done(cli, "Flash is blank");
    Ok(())
}

/// Verify command implementation.
pub(crate) fn cmd_verify(cli: &Cli, config: &Config, file: &Path, address: u32) -> Result<()> {
    let mut image = load_image(cli, file, address)?;
    let mut flasher = connect(cli, config)?;

    // Flash holds the patched vector table, compare against the same bytes.
    let chip = *flasher.chip();
    if chip.is_boot_address(address) {
        image.patch_boot_checksum(chip.checksum_vector())?;
    }

    if !flasher.verify_image(address, image.data(), MismatchPolicy::Log)? {
        bail!("Flash content differs from {}", file.display());
    }
    done(cli, "Verification passed");
    Ok(())
}

/// Read command implementation.
pub(crate) fn cmd_read(
    cli: &Cli,
    config: &Config,
    output: &Path,
    address: u32,
    length: u32,
) -> Result<()> {
    if address % 4 != 0 || length % 4 != 0 || length == 0 {
        return Err(CliError::Usage(
            "Address and length must be non-zero multiples of 4".into(),
        )
        .into());
    }

    let mut flasher = connect(cli, config)?;
    let data = flasher.read_block(address, length)?;
    fs::write(output, &data)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    done(
        cli,
        &format!(
            "Read {} bytes from 0x{address:08X} into {}",
            data.len(),
            output.display()
        ),
    );
    Ok(())
}

/// Start command implementation.
pub(crate) fn cmd_start(cli: &Cli, config: &Config, address: u32) -> Result<()> {
    let mut flasher = connect(cli, config)?;
    flasher.start(address)?;
    done(cli, &format!("Started at 0x{address:08X}"));
    Ok(())
}
