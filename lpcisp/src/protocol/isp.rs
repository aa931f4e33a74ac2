//! LPC ISP command vocabulary.
//!
//! The bootloader speaks an ASCII, line-oriented protocol. Commands are a
//! verb followed by decimal fields and CR LF:
//!
//! ```text
//! +------+-----+---------+-----+---------+------+
//! | Verb | ' ' | Field 0 | ' ' | Field 1 | \r\n |
//! +------+-----+---------+-----+---------+------+
//! ```
//!
//! Every command is answered by a decimal return code line (0 = success).
//! Handshake lines use the literals `Synchronized`, `OK` and `RESEND`.

use std::fmt;

/// Sync probe, written without line terminator.
pub const SYNC_PROBE: &[u8] = b"?";

/// Synchronization string sent by the bootloader and echoed back by the host.
pub const SYNC_STRING: &str = "Synchronized";

/// Positive acknowledgement literal.
pub const OK: &str = "OK";

/// Retransmission request after a RAM block checksum mismatch.
pub const RESEND: &str = "RESEND";

/// Magic code unlocking flash write/erase/go commands.
pub const UNLOCK_CODE: u32 = 23130;

/// Line terminator for command lines.
pub const LINE_END: &[u8] = b"\r\n";

/// Bootloader return codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ReturnCode {
    /// Command is executed successfully.
    CmdSuccess = 0,
    /// Invalid command.
    InvalidCommand = 1,
    /// Source address is not on word boundary.
    SrcAddrError = 2,
    /// Destination address is not on a correct boundary.
    DstAddrError = 3,
    /// Source address is not mapped in the memory map.
    SrcAddrNotMapped = 4,
    /// Destination address is not mapped in the memory map.
    DstAddrNotMapped = 5,
    /// Byte count is not a permitted value.
    CountError = 6,
    /// Sector number is invalid.
    InvalidSector = 7,
    /// Sector is not blank.
    SectorNotBlank = 8,
    /// Sector was not prepared for write.
    SectorNotPreparedForWriteOperation = 9,
    /// Source and destination data not equal.
    CompareError = 10,
    /// Flash programming interface is busy.
    Busy = 11,
    /// Insufficient or invalid parameters.
    ParamError = 12,
    /// Address not on word boundary.
    AddrError = 13,
    /// Address is not mapped in the memory map.
    AddrNotMapped = 14,
    /// Command is locked.
    CmdLocked = 15,
    /// Unlock code is invalid.
    InvalidCode = 16,
    /// Invalid baud rate setting.
    InvalidBaudRate = 17,
    /// Invalid stop bit setting.
    InvalidStopBit = 18,
    /// Code read protection enabled.
    CodeReadProtectionEnabled = 19,
}

/// Descriptions indexed by return code.
const DESCRIPTIONS: [&str; 20] = [
    "CMD_SUCCESS: Command is executed successfully",
    "INVALID_COMMAND: Invalid command",
    "SRC_ADDR_ERROR: Source address is not on word boundary",
    "DST_ADDR_ERROR: Destination address is not on word or 256 byte boundary",
    "SRC_ADDR_NOT_MAPPED: Source address is not mapped in the memory map",
    "DST_ADDR_NOT_MAPPED: Destination address is not mapped in the memory map",
    "COUNT_ERROR: Byte count is not multiple of 4 or is not a permitted value",
    "INVALID_SECTOR: Sector number is invalid or end sector number is greater than start sector number",
    "SECTOR_NOT_BLANK: Sector is not blank",
    "SECTOR_NOT_PREPARED_FOR_WRITE_OPERATION: Command to prepare sector for write operation was not executed",
    "COMPARE_ERROR: Source and destination data not equal",
    "BUSY: Flash programming hardware interface is busy",
    "PARAM_ERROR: Insufficient number of parameters or invalid parameter",
    "ADDR_ERROR: Address not on word boundary",
    "ADDR_NOT_MAPPED: Address is not mapped in the memory map",
    "CMD_LOCKED: Command is locked",
    "INVALID_CODE: Unlock code is invalid",
    "INVALID_BAUD_RATE: Invalid baud rate setting",
    "INVALID_STOP_BIT: Invalid stop bit setting",
    "CODE_READ_PROTECTION_ENABLED: Code read protection enabled",
];

impl ReturnCode {
    const ALL: [Self; 20] = [
        Self::CmdSuccess,
        Self::InvalidCommand,
        Self::SrcAddrError,
        Self::DstAddrError,
        Self::SrcAddrNotMapped,
        Self::DstAddrNotMapped,
        Self::CountError,
        Self::InvalidSector,
        Self::SectorNotBlank,
        Self::SectorNotPreparedForWriteOperation,
        Self::CompareError,
        Self::Busy,
        Self::ParamError,
        Self::AddrError,
        Self::AddrNotMapped,
        Self::CmdLocked,
        Self::InvalidCode,
        Self::InvalidBaudRate,
        Self::InvalidStopBit,
        Self::CodeReadProtectionEnabled,
    ];

    /// Look up a numeric code in the catalog.
    pub fn from_code(code: u32) -> Option<Self> {
        usize::try_from(code)
            .ok()
            .and_then(|i| Self::ALL.get(i).copied())
    }

    /// Numeric value as sent on the wire.
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Human-readable description.
    pub fn description(self) -> &'static str {
        DESCRIPTIONS[self as usize]
    }

    /// Check if this is the success code.
    pub fn is_success(self) -> bool {
        self == Self::CmdSuccess
    }
}

/// Description for any numeric code; empty outside the catalog.
pub fn describe(code: u32) -> &'static str {
    ReturnCode::from_code(code).map_or("", ReturnCode::description)
}

/// Execution mode passed to the `G` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum CpuMode {
    /// ARM instruction set.
    #[default]
    Arm,
    /// Thumb instruction set (Cortex-M parts).
    Thumb,
}

impl CpuMode {
    /// Mode letter used by the `G` command.
    pub fn letter(self) -> char {
        match self {
            Self::Arm => 'A',
            Self::Thumb => 'T',
        }
    }
}

impl fmt::Display for CpuMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Arm => write!(f, "arm"),
            Self::Thumb => write!(f, "thumb"),
        }
    }
}

/// ISP command line builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Oscillator frequency in kHz (handshake only).
    Oscillator(u32),
    /// `A 0` / `A 1`: echo control.
    Echo(bool),
    /// `U code`: unlock flash commands.
    Unlock(u32),
    /// `J`: read part identification.
    ReadPartId,
    /// `N`: read device serial number.
    ReadSerialNumber,
    /// `P start end [bank]`: prepare sectors for write.
    Prepare {
        /// First sector.
        start: u32,
        /// Last sector (inclusive).
        end: u32,
        /// Bank index, for parts with flash banks.
        bank: Option<u32>,
    },
    /// `E start end [bank]`: erase sectors.
    Erase {
        /// First sector.
        start: u32,
        /// Last sector (inclusive).
        end: u32,
        /// Bank index, for parts with flash banks.
        bank: Option<u32>,
    },
    /// `I start end [bank]`: blank check sectors.
    BlankCheck {
        /// First sector.
        start: u32,
        /// Last sector (inclusive).
        end: u32,
        /// Bank index, for parts with flash banks.
        bank: Option<u32>,
    },
    /// `W addr len`: write to RAM.
    WriteRam {
        /// RAM address.
        address: u32,
        /// Byte count.
        len: u32,
    },
    /// `R addr len`: read memory.
    ReadMemory {
        /// Start address.
        address: u32,
        /// Byte count.
        len: u32,
    },
    /// `C flash ram len`: copy RAM to flash.
    Copy {
        /// Flash destination address.
        flash: u32,
        /// RAM source address.
        ram: u32,
        /// Byte count.
        len: u32,
    },
    /// `M flash ram len`: compare memory.
    Compare {
        /// Flash address.
        flash: u32,
        /// RAM address.
        ram: u32,
        /// Byte count.
        len: u32,
    },
    /// `S bank`: select the active flash bank.
    SelectBank(u32),
    /// `G addr mode`: start execution.
    Go {
        /// Entry address.
        address: u32,
        /// Instruction set.
        mode: CpuMode,
    },
}

fn with_bank(verb: char, start: u32, end: u32, bank: Option<u32>) -> String {
    match bank {
        Some(bank) => format!("{verb} {start} {end} {bank}"),
        None => format!("{verb} {start} {end}"),
    }
}

impl Command {
    /// Build the command line (without terminator).
    pub fn line(&self) -> String {
        match *self {
            Self::Oscillator(khz) => khz.to_string(),
            Self::Echo(on) => format!("A {}", u8::from(on)),
            Self::Unlock(code) => format!("U {code}"),
            Self::ReadPartId => "J".to_string(),
            Self::ReadSerialNumber => "N".to_string(),
            Self::Prepare { start, end, bank } => with_bank('P', start, end, bank),
            Self::Erase { start, end, bank } => with_bank('E', start, end, bank),
            Self::BlankCheck { start, end, bank } => with_bank('I', start, end, bank),
            Self::WriteRam { address, len } => format!("W {address} {len}"),
            Self::ReadMemory { address, len } => format!("R {address} {len}"),
            Self::Copy { flash, ram, len } => format!("C {flash} {ram} {len}"),
            Self::Compare { flash, ram, len } => format!("M {flash} {ram} {len}"),
            Self::SelectBank(bank) => format!("S {bank}"),
            Self::Go { address, mode } => format!("G {address} {}", mode.letter()),
        }
    }

    /// Build the wire bytes including CR LF.
    pub fn build(&self) -> Vec<u8> {
        let mut buf = self.line().into_bytes();
        buf.extend_from_slice(LINE_END);
        buf
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.line())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_lines() {
        assert_eq!(Command::Oscillator(12000).line(), "12000");
        assert_eq!(Command::Echo(false).line(), "A 0");
        assert_eq!(Command::Unlock(UNLOCK_CODE).line(), "U 23130");
        assert_eq!(
            Command::Prepare {
                start: 0,
                end: 3,
                bank: None
            }
            .line(),
            "P 0 3"
        );
        assert_eq!(
            Command::Erase {
                start: 2,
                end: 5,
                bank: Some(0)
            }
            .line(),
            "E 2 5 0"
        );
        assert_eq!(
            Command::Copy {
                flash: 4096,
                ram: 0x4000_1000,
                len: 4096
            }
            .line(),
            "C 4096 1073745920 4096"
        );
        assert_eq!(
            Command::Go {
                address: 0,
                mode: CpuMode::Thumb
            }
            .line(),
            "G 0 T"
        );
    }

    #[test]
    fn test_build_appends_crlf() {
        assert_eq!(Command::ReadPartId.build(), b"J\r\n");
    }

    #[test]
    fn test_return_code_catalog() {
        assert_eq!(ReturnCode::from_code(0), Some(ReturnCode::CmdSuccess));
        assert_eq!(
            ReturnCode::from_code(19),
            Some(ReturnCode::CodeReadProtectionEnabled)
        );
        assert_eq!(ReturnCode::from_code(20), None);
        assert_eq!(ReturnCode::SectorNotBlank.code(), 8);
        assert!(describe(10).starts_with("COMPARE_ERROR"));
        assert!(describe(19).contains("Code read protection"));
        assert_eq!(describe(42), "");

        for (i, code) in ReturnCode::ALL.iter().enumerate() {
            assert_eq!(code.code() as usize, i);
        }
    }
}
