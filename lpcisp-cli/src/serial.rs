//! Serial port selection.
//!
//! An explicit `--port` (or config/env value) always wins. Otherwise the
//! enumerated ports are ranked by bridge kind: a single candidate or a
//! recognized NXP Link probe is used directly, several candidates prompt
//! through dialoguer when a terminal is attached.

use {
    crate::CliError,
    anyhow::Result,
    console::style,
    dialoguer::{Error as DialoguerError, Select, theme::ColorfulTheme},
    lpcisp::{BridgeKind, NativePortEnumerator, PortEnumerator, PortInfo, describe_port},
    log::{debug, info},
    std::io::IsTerminal,
};

/// How a port was chosen among the enumerated ones.
#[derive(Debug, PartialEq, Eq)]
enum Choice {
    /// Use this port without asking.
    Auto(usize),
    /// Several plausible ports, ask the user.
    Ask,
}

/// Decide between automatic selection and prompting.
fn choose(ports: &[PortInfo]) -> Option<Choice> {
    match ports {
        [] => None,
        [_] => Some(Choice::Auto(0)),
        _ => {
            let probes: Vec<usize> = ports
                .iter()
                .enumerate()
                .filter(|(_, p)| BridgeKind::of(p) == BridgeKind::NxpLink)
                .map(|(i, _)| i)
                .collect();
            match probes.as_slice() {
                [only] => Some(Choice::Auto(*only)),
                _ => Some(Choice::Ask),
            }
        },
    }
}

/// Resolve the serial port to open.
pub fn select_serial_port(explicit: Option<&str>) -> Result<String> {
    if let Some(name) = explicit {
        debug!("Using port {name}");
        return Ok(name.to_string());
    }

    let ports = NativePortEnumerator::list_ports()?;
    match choose(&ports) {
        None => Err(CliError::Usage("No serial ports found; use --port".into()).into()),
        Some(Choice::Auto(index)) => {
            let port = &ports[index];
            info!("Auto-selected port: {}", describe_port(port));
            Ok(port.name.clone())
        },
        Some(Choice::Ask) => {
            if !(std::io::stdin().is_terminal() && std::io::stderr().is_terminal()) {
                return Err(CliError::Usage(
                    "Multiple serial ports found; use --port to pick one".into(),
                )
                .into());
            }
            select_port_interactive(ports)
        },
    }
}

fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) if io_err.kind() == std::io::ErrorKind::Interrupted => {
            CliError::Cancelled("Port selection cancelled".into()).into()
        },
        DialoguerError::IO(io_err) => {
            CliError::Usage(format!("Port selection prompt failed: {io_err}")).into()
        },
    }
}

fn select_port_interactive(mut ports: Vec<PortInfo>) -> Result<String> {
    eprintln!(
        "{} {} serial ports found",
        style("ℹ").blue(),
        ports.len()
    );

    if let Some(best) = lpcisp::preferred_port(&ports) {
        let best = best.name.clone();
        ports.sort_by_key(|p| p.name != best);
    }

    let term_width = console::Term::stderr().size().1 as usize;
    let labels: Vec<String> = ports
        .iter()
        .map(|p| {
            console::truncate_str(&describe_port(p), term_width.saturating_sub(4), "\u{2026}")
                .into_owned()
        })
        .collect();

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select the serial port of the target")
        .items(&labels)
        .default(0)
        .interact_opt()
        .map_err(map_prompt_error)?;

    match selection {
        Some(index) => ports
            .into_iter()
            .nth(index)
            .map(|p| p.name)
            .ok_or_else(|| anyhow::anyhow!("Invalid port index: {index}")),
        None => Err(CliError::Cancelled("Port selection cancelled".into()).into()),
    }
}
