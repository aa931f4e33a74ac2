//! USB-UART bridge classification.
//!
//! LPC boards reach the host either through an on-board debug probe with a
//! virtual COM port or through a plain USB-UART cable. Knowing which one a
//! port belongs to lets front ends list ports helpfully and pick a default
//! when several are present.

use crate::port::PortInfo;

/// Known USB bridge kinds found on LPC boards and cables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum BridgeKind {
    /// NXP LPC-Link / MCU-Link virtual COM port.
    NxpLink,
    /// FTDI FT232/FT2232/FT4232.
    Ftdi,
    /// Silicon Labs CP210x.
    Cp210x,
    /// WCH CH340/CH341.
    Ch340,
    /// Prolific PL2303.
    Prolific,
    /// Anything else, including non-USB ports.
    Unknown,
}

/// Known USB VID/PID pairs. An empty PID list matches any product.
const KNOWN_BRIDGES: &[(u16, &[u16], BridgeKind)] = &[
    (0x1FC9, &[], BridgeKind::NxpLink),
    (
        0x0403,
        &[0x6001, 0x6010, 0x6011, 0x6014, 0x6015],
        BridgeKind::Ftdi,
    ),
    (0x10C4, &[0xEA60, 0xEA70, 0xEA71], BridgeKind::Cp210x),
    (0x1A86, &[0x7523, 0x7522, 0x5523], BridgeKind::Ch340),
    (0x067B, &[0x2303, 0x23A3], BridgeKind::Prolific),
];

impl BridgeKind {
    /// Classify a USB VID/PID pair.
    pub fn from_vid_pid(vid: u16, pid: u16) -> Self {
        KNOWN_BRIDGES
            .iter()
            .find(|(known_vid, pids, _)| vid == *known_vid && (pids.is_empty() || pids.contains(&pid)))
            .map_or(Self::Unknown, |&(_, _, kind)| kind)
    }

    /// Classify an enumerated port.
    pub fn of(port: &PortInfo) -> Self {
        match (port.vid, port.pid) {
            (Some(vid), Some(pid)) => Self::from_vid_pid(vid, pid),
            _ => Self::Unknown,
        }
    }

    /// Human-readable name.
    pub fn name(self) -> &'static str {
        match self {
            Self::NxpLink => "NXP Link",
            Self::Ftdi => "FTDI",
            Self::Cp210x => "CP210x",
            Self::Ch340 => "CH340/CH341",
            Self::Prolific => "PL2303",
            Self::Unknown => "Unknown",
        }
    }

    /// Whether the bridge is recognized.
    pub fn is_known(self) -> bool {
        self != Self::Unknown
    }

    fn priority(self) -> u8 {
        match self {
            Self::NxpLink => 0,
            Self::Ftdi | Self::Cp210x | Self::Ch340 | Self::Prolific => 1,
            Self::Unknown => 2,
        }
    }
}

/// Pick the most likely port for an LPC target.
///
/// Debug probes win over plain bridges, and known bridges over anything
/// else. Ties keep enumeration order.
pub fn preferred_port(ports: &[PortInfo]) -> Option<&PortInfo> {
    ports
        .iter()
        .min_by_key(|port| BridgeKind::of(port).priority())
}

/// One-line description of a port for listings and prompts.
pub fn describe_port(port: &PortInfo) -> String {
    let kind = BridgeKind::of(port);
    let bridge = if kind.is_known() {
        format!(" [{}]", kind.name())
    } else if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
        format!(" [VID:{vid:04X} PID:{pid:04X}]")
    } else {
        String::new()
    };

    let product = port
        .product
        .as_ref()
        .map(|p| format!(" - {p}"))
        .unwrap_or_default();

    format!("{}{bridge}{product}", port.name)
}
