//! Info, chips and list-ports command implementations.

use anyhow::Result;
use console::style;
use lpcisp::{
    BridgeKind, CHIPS, ChipProfile, DeviceIdPattern, NativePortEnumerator, PartId,
    PortEnumerator, describe_port, preferred_port,
};

use crate::config::Config;
use crate::{Cli, connect};

fn part_id_json(id: PartId) -> serde_json::Value {
    match id {
        PartId::Single(id) => serde_json::json!([id]),
        PartId::Dual(w0, w1) => serde_json::json!([w0, w1]),
    }
}

fn device_id_str(pattern: Option<DeviceIdPattern>) -> String {
    match pattern {
        None => "-".to_string(),
        Some(DeviceIdPattern::Single(id)) => format!("0x{id:08X}"),
        Some(DeviceIdPattern::Dual {
            word0,
            word1,
            word1_mask,
        }) => match word1_mask {
            Some(mask) => format!("0x{word0:08X} 0x{word1:08X}/0x{mask:08X}"),
            None => format!("0x{word0:08X} 0x{word1:08X}"),
        },
    }
}

fn chip_json(chip: &ChipProfile) -> serde_json::Value {
    serde_json::json!({
        "name": chip.name,
        "flash_size": chip.flash_size(),
        "sector_count": chip.sector_count(),
        "device_id": chip.device_id,
        "banks": chip.banks,
        "ram_buffer_base": chip.ram_buffer_base(),
        "ram_buffer_size": chip.ram_buffer_size(),
        "checksum_vector": chip.checksum_vector(),
        "cpu_mode": chip.cpu_mode(),
    })
}

/// Info command implementation.
pub(crate) fn cmd_info(cli: &Cli, config: &Config, json: bool) -> Result<()> {
    let mut flasher = connect(cli, config)?;

    let part_id = match flasher.session().part_id() {
        Some(id) => id,
        None => flasher.read_part_id()?,
    };
    let serial_number = flasher.read_serial_number()?;
    let chip = *flasher.chip();

    if json {
        let info = serde_json::json!({
            "chip": chip_json(&chip),
            "part_id": part_id_json(part_id),
            "serial_number": serial_number,
        });
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    let serial: Vec<String> = serial_number
        .iter()
        .map(|word| format!("{word:08X}"))
        .collect();

    eprintln!("\n{}", style("Target").bold().underlined());
    eprintln!("  Chip:          {}", style(chip).cyan().bold());
    eprintln!("  Part ID:       {part_id}");
    eprintln!("  Serial number: {}", serial.join(" "));
    eprintln!(
        "  Flash:         {} KiB in {} sectors",
        chip.flash_size() / 1024,
        chip.sector_count()
    );
    eprintln!(
        "  RAM buffer:    {} bytes at 0x{:08X}",
        chip.ram_buffer_size(),
        chip.ram_buffer_base()
    );
    eprintln!("  CPU mode:      {}", chip.cpu_mode());
    Ok(())
}

/// Chips command implementation.
pub(crate) fn cmd_chips(json: bool) {
    if json {
        let chips: Vec<serde_json::Value> = CHIPS.iter().map(chip_json).collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&chips).unwrap_or_default()
        );
        return;
    }

    println!(
        "{:<10} {:>9} {:>8}  {:<6} {}",
        "NAME", "FLASH", "SECTORS", "MODE", "DEVICE ID"
    );
    for chip in CHIPS {
        println!(
            "{:<10} {:>5} KiB {:>8}  {:<6} {}",
            chip.name,
            chip.flash_size() / 1024,
            chip.sector_count(),
            chip.cpu_mode(),
            device_id_str(chip.device_id)
        );
    }
}

/// List ports command implementation.
pub(crate) fn cmd_list_ports(json: bool) -> Result<()> {
    let ports = NativePortEnumerator::list_ports()?;

    if json {
        let ports: Vec<serde_json::Value> = ports
            .iter()
            .map(|p| {
                let bridge = BridgeKind::of(p);
                serde_json::json!({
                    "name": p.name,
                    "bridge": bridge.name(),
                    "known": bridge.is_known(),
                    "vid": p.vid,
                    "pid": p.pid,
                    "manufacturer": p.manufacturer,
                    "product": p.product,
                    "serial": p.serial_number,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&ports)?);
        return Ok(());
    }

    eprintln!("{}", style("Available serial ports").bold().underlined());
    if ports.is_empty() {
        eprintln!("  {}", style("No serial ports found").dim());
        return Ok(());
    }

    for port in &ports {
        eprintln!("  {} {}", style("•").green(), describe_port(port));
    }
    if let Some(best) = preferred_port(&ports) {
        eprintln!(
            "\n{} Default choice: {}",
            style("→").green().bold(),
            style(&best.name).cyan().bold()
        );
    }
    Ok(())
}
