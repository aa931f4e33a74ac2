//! lpcisp CLI - Command-line tool for programming NXP LPC microcontrollers.
//!
//! ## Features
//!
//! - Program raw binary images with boot checksum patching
//! - Erase, blank check, verify and read back flash
//! - Chip autodetection through the bootloader part ID
//! - Interactive serial port selection
//! - Shell completion generation
//! - Environment variable and config file support

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser, Subcommand};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use indicatif::{ProgressBar, ProgressStyle};
use log::debug;
use lpcisp::{
    AUTODETECT, CpuSelection, IspSession, LpcFlasher, NativePort, SerialConfig, SerialTransport,
    SessionConfig, Transport,
};
use std::path::PathBuf;
use std::process::ExitCode;

mod commands;
mod config;
mod serial;

use config::Config;

/// Default baud rate.
const DEFAULT_BAUD: u32 = 115_200;

/// Flasher over a native serial port.
pub(crate) type SerialFlasher = LpcFlasher<SerialTransport<NativePort>>;

/// Errors classified by exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Bad arguments or setup; exit code 2.
    #[error("{0}")]
    Usage(String),
    /// The user aborted a prompt; exit code 130.
    #[error("{0}")]
    Cancelled(String),
}

/// lpcisp - In-system programming of NXP LPC microcontrollers.
///
/// Environment variables:
///   LPCISP_PORT       - Default serial port
///   LPCISP_BAUD       - Default baud rate (default: 115200)
///   LPCISP_CPU        - Chip name or "autodetect"
///   LPCISP_OSC_FREQ   - Crystal frequency in kHz (default: 12000)
#[derive(Parser)]
#[command(name = "lpcisp")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[allow(clippy::struct_excessive_bools)]
pub(crate) struct Cli {
    /// Serial port to use (auto-detected if not specified).
    #[arg(short, long, global = true, env = "LPCISP_PORT")]
    pub port: Option<String>,

    /// Baud rate [default: 115200].
    #[arg(short, long, global = true, env = "LPCISP_BAUD")]
    pub baud: Option<u32>,

    /// Chip name, or "autodetect" to identify it through the part ID.
    #[arg(short, long, global = true, env = "LPCISP_CPU")]
    pub cpu: Option<String>,

    /// Crystal frequency in kHz [default: 12000].
    #[arg(long, global = true, env = "LPCISP_OSC_FREQ")]
    pub osc_freq: Option<u32>,

    /// Drive DTR (reset) and RTS (boot select) to enter the bootloader.
    #[arg(long, global = true, env = "LPCISP_CONTROL")]
    pub control: bool,

    /// Enable XON/XOFF flow control.
    #[arg(long, global = true, env = "LPCISP_XONXOFF")]
    pub xonxoff: bool,

    /// Fail when the bootloader echo does not match the command sent.
    #[arg(long, global = true)]
    pub verify_echo: bool,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    pub config_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Program a raw binary image into flash.
    Program {
        /// Binary image file.
        file: PathBuf,

        /// Flash address of the first image byte.
        #[arg(short, long, default_value = "0", value_parser = parse_u32)]
        address: u32,

        /// Erase the whole device instead of the sectors the image covers.
        #[arg(long)]
        erase_all: bool,

        /// Compare each chunk with its RAM copy after programming.
        #[arg(long)]
        verify: bool,

        /// Read the flash back and compare it with the image.
        #[arg(long)]
        readback: bool,

        /// Start the program at the image address when done.
        #[arg(long)]
        start: bool,
    },

    /// Erase flash sectors.
    #[command(group(ArgGroup::new("range").required(true).args(["all", "start"])))]
    Erase {
        /// Erase every sector.
        #[arg(long)]
        all: bool,

        /// First address of the range.
        #[arg(value_parser = parse_u32, requires = "end")]
        start: Option<u32>,

        /// Last address of the range (inclusive).
        #[arg(value_parser = parse_u32)]
        end: Option<u32>,

        /// Blank check the erased sectors.
        #[arg(long)]
        blank_check: bool,
    },

    /// Check that every flash sector is erased.
    BlankCheck,

    /// Compare flash content with an image.
    Verify {
        /// Binary image file.
        file: PathBuf,

        /// Flash address of the first image byte.
        #[arg(short, long, default_value = "0", value_parser = parse_u32)]
        address: u32,
    },

    /// Read memory into a file.
    Read {
        /// Output file.
        output: PathBuf,

        /// Start address (word aligned).
        #[arg(short, long, value_parser = parse_u32)]
        address: u32,

        /// Number of bytes (multiple of 4).
        #[arg(short, long, value_parser = parse_u32)]
        length: u32,
    },

    /// Show the connected chip, part ID and serial number.
    Info {
        /// Output information as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Start code execution.
    Start {
        /// Entry address.
        #[arg(short, long, default_value = "0", value_parser = parse_u32)]
        address: u32,
    },

    /// List supported chips.
    Chips {
        /// Output the chip table as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type (detected from $SHELL if not specified).
        #[arg(value_enum)]
        shell: Option<Shell>,
    },
}

/// Parse a number in decimal or `0x` hexadecimal, with `_` separators.
pub(crate) fn parse_u32(s: &str) -> Result<u32, String> {
    let s: String = s.trim().chars().filter(|c| *c != '_').collect();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("Invalid number '{s}': {e}"))
}

/// Check if styled output and progress bars should be used.
pub(crate) fn use_fancy_output() -> bool {
    console::Term::stderr().is_term() && console::colors_enabled_stderr()
}

/// Connection settings after merging flags, environment and config files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Settings {
    pub port: Option<String>,
    pub baud: u32,
    pub cpu: CpuSelection,
    pub osc_freq: u32,
    pub control: bool,
    pub xonxoff: bool,
    pub verify_echo: bool,
}

impl Settings {
    pub fn resolve(cli: &Cli, config: &Config) -> Result<Self> {
        let cpu_name = cli
            .cpu
            .as_deref()
            .or(config.target.cpu.as_deref())
            .unwrap_or(AUTODETECT);
        let cpu = CpuSelection::from_name(cpu_name)
            .map_err(|e| CliError::Usage(format!("{e} (see `lpcisp chips`)")))?;

        Ok(Self {
            port: cli.port.clone().or_else(|| config.connection.port.clone()),
            baud: cli.baud.or(config.connection.baud).unwrap_or(DEFAULT_BAUD),
            cpu,
            osc_freq: cli
                .osc_freq
                .or(config.target.osc_freq)
                .unwrap_or(lpcisp::target::lpc::session::DEFAULT_OSC_FREQ_KHZ),
            control: cli.control || config.connection.control.unwrap_or(false),
            xonxoff: cli.xonxoff || config.connection.xonxoff.unwrap_or(false),
            verify_echo: cli.verify_echo,
        })
    }
}

/// Open the port, run the bootloader handshake and wrap the session.
pub(crate) fn connect(cli: &Cli, config: &Config) -> Result<SerialFlasher> {
    let settings = Settings::resolve(cli, config)?;
    let port = serial::select_serial_port(settings.port.as_deref())?;

    if !cli.quiet {
        eprintln!(
            "{} Using port {} at {} baud",
            style("🔌").cyan(),
            style(&port).green(),
            settings.baud
        );
    }

    let serial_config = SerialConfig::new(&port, settings.baud).with_xonxoff(settings.xonxoff);
    let mut transport = SerialTransport::open(&serial_config)
        .with_context(|| format!("Failed to open {port}"))?
        .with_control(settings.control);
    transport.enter_isp_mode()?;

    if !cli.quiet {
        eprintln!("{} Synchronizing with the bootloader...", style("⏳").yellow());
    }
    let session_config = SessionConfig::new()
        .with_osc_freq(settings.osc_freq)
        .with_verify_echo(settings.verify_echo);
    let session = IspSession::connect(transport, settings.cpu, session_config)
        .context("Bootloader handshake failed")?;
    let flasher = LpcFlasher::new(session)?;

    if !cli.quiet {
        eprintln!(
            "{} Connected to {}",
            style("✓").green(),
            style(flasher.chip()).cyan().bold()
        );
    }
    Ok(flasher)
}

/// Byte progress bar on stderr, hidden in quiet or non-terminal mode.
pub(crate) fn progress_bar(cli: &Cli, message: &'static str) -> ProgressBar {
    if cli.quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} {msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    pb.set_message(message);
    pb
}

fn init_logging(cli: &Cli) {
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();
}

fn run(cli: &Cli) -> Result<()> {
    let config = match &cli.config_path {
        Some(path) => Config::load_from_path(path).map_err(|e| CliError::Usage(format!("{e:#}")))?,
        None => Config::load(),
    };

    match &cli.command {
        Commands::Program {
            file,
            address,
            erase_all,
            verify,
            readback,
            start,
        } => commands::flash::cmd_program(
            cli,
            &config,
            file,
            *address,
            commands::flash::ProgramOptions {
                erase_all: *erase_all,
                verify: *verify,
                readback: *readback,
                start: *start,
            },
        ),
        Commands::Erase {
            all,
            start,
            end,
            blank_check,
        } => {
            let range = match (all, start, end) {
                (true, _, _) => None,
                (false, Some(start), Some(end)) => Some((*start, *end)),
                _ => {
                    return Err(
                        CliError::Usage("Specify --all or a start and end address".into()).into(),
                    );
                },
            };
            commands::flash::cmd_erase(cli, &config, range, *blank_check)
        },
        Commands::BlankCheck => commands::flash::cmd_blank_check(cli, &config),
        Commands::Verify { file, address } => {
            commands::flash::cmd_verify(cli, &config, file, *address)
        },
        Commands::Read {
            output,
            address,
            length,
        } => commands::flash::cmd_read(cli, &config, output, *address, *length),
        Commands::Info { json } => commands::info::cmd_info(cli, &config, *json),
        Commands::Start { address } => commands::flash::cmd_start(cli, &config, *address),
        Commands::Chips { json } => {
            commands::info::cmd_chips(*json);
            Ok(())
        },
        Commands::ListPorts { json } => commands::info::cmd_list_ports(*json),
        Commands::Completions { shell } => commands::completions::cmd_completions(*shell),
    }
}

fn main() -> ExitCode {
    if std::env::var_os("NO_COLOR").is_some() || !console::Term::stderr().is_term() {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();
    init_logging(&cli);
    debug!(
        "lpcisp v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", style("Error:").red().bold());
            match err.downcast_ref::<CliError>() {
                Some(CliError::Usage(_)) => ExitCode::from(2),
                Some(CliError::Cancelled(_)) => ExitCode::from(130),
                None => ExitCode::FAILURE,
            }
        },
    }
}
