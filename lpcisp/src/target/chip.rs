//! CPU parameter table for the supported LPC parts.
//!
//! Each [`ChipProfile`] describes one microcontroller variant: its flash
//! sector geometry, the identification words returned by the `J` command,
//! optional flash banks and the RAM buffer used as staging area while
//! programming.

use crate::error::{Error, Result};
use crate::protocol::isp::CpuMode;
use std::fmt;

/// RAM staging buffer base used when a profile does not declare one.
pub const DEFAULT_RAM_BUFFER_BASE: u32 = 0x4000_1000;

/// RAM staging buffer size used when a profile does not declare one.
pub const DEFAULT_RAM_BUFFER_SIZE: u32 = 4096;

/// Vector table slot holding the boot checksum on ARM7 parts.
pub const DEFAULT_CHECKSUM_VECTOR: usize = 5;

/// Chip name selecting identification through the `J` command.
pub const AUTODETECT: &str = "autodetect";

/// Identification words returned by the `J` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartId {
    /// Single 32-bit identifier.
    Single(u32),
    /// Two identification words (LPC18xx/43xx style).
    Dual(u32, u32),
}

impl fmt::Display for PartId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(id) => write!(f, "{id} (0x{id:08x})"),
            Self::Dual(w0, w1) => write!(f, "0x{w0:08x} 0x{w1:08x}"),
        }
    }
}

/// Expected identification of a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum DeviceIdPattern {
    /// Exact single-word identifier.
    Single(u32),
    /// Two-word identifier, the second word optionally masked.
    Dual {
        /// First word, compared exactly.
        word0: u32,
        /// Second word.
        word1: u32,
        /// Bits of the second word that take part in the comparison.
        word1_mask: Option<u32>,
    },
}

impl DeviceIdPattern {
    /// Check whether an identification read from the device matches.
    pub fn matches(&self, id: PartId) -> bool {
        match (*self, id) {
            (Self::Single(expected), PartId::Single(actual)) => expected == actual,
            (
                Self::Dual {
                    word0,
                    word1,
                    word1_mask,
                },
                PartId::Dual(w0, w1),
            ) => {
                let mask = word1_mask.unwrap_or(u32::MAX);
                word0 == w0 && (word1 & mask) == (w1 & mask)
            },
            _ => false,
        }
    }
}

/// One flash sector, derived from the profile geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashSector {
    /// Sector number as used by the `P`/`E`/`I` commands.
    pub index: u32,
    /// Absolute start address.
    pub start: u32,
    /// Size in bytes.
    pub size: u32,
}

impl FlashSector {
    /// Address one past the last byte of the sector, saturating at the top
    /// of the address space.
    pub fn end(&self) -> u32 {
        self.start.saturating_add(self.size)
    }

    /// Check if `address` lies within the sector.
    pub fn contains(&self, address: u32) -> bool {
        address >= self.start && address - self.start < self.size
    }
}

/// Parameters of one LPC variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ChipProfile {
    /// Symbolic name (lower case, e.g. "lpc1768").
    pub name: &'static str,
    /// Sector sizes in KiB, in address order.
    pub sectors: &'static [u32],
    /// Number of sectors actually present, when smaller than the table.
    pub sector_count: Option<u32>,
    /// Identification used for autodetection.
    pub device_id: Option<DeviceIdPattern>,
    /// Flash bank base addresses (empty for single-array parts at 0).
    pub banks: &'static [u32],
    /// RAM staging buffer base.
    pub ram_buffer_base: Option<u32>,
    /// RAM staging buffer size.
    pub ram_buffer_size: Option<u32>,
    /// Interrupt vector slot holding the boot checksum.
    pub checksum_vector: Option<usize>,
    /// Instruction set used when starting code.
    pub cpu_mode: Option<CpuMode>,
}

impl ChipProfile {
    /// Create a profile with the given geometry and every optional
    /// parameter unset.
    pub const fn new(name: &'static str, sectors: &'static [u32]) -> Self {
        Self {
            name,
            sectors,
            sector_count: None,
            device_id: None,
            banks: &[],
            ram_buffer_base: None,
            ram_buffer_size: None,
            checksum_vector: None,
            cpu_mode: None,
        }
    }

    /// Limit the number of sectors taken from the geometry table.
    #[must_use]
    pub const fn with_sector_count(mut self, count: u32) -> Self {
        self.sector_count = Some(count);
        self
    }

    /// Set a single-word device ID.
    #[must_use]
    pub const fn with_device_id(mut self, id: u32) -> Self {
        self.device_id = Some(DeviceIdPattern::Single(id));
        self
    }

    /// Set a two-word device ID.
    #[must_use]
    pub const fn with_dual_device_id(mut self, word0: u32, word1: u32, mask: Option<u32>) -> Self {
        self.device_id = Some(DeviceIdPattern::Dual {
            word0,
            word1,
            word1_mask: mask,
        });
        self
    }

    /// Set flash bank base addresses.
    #[must_use]
    pub const fn with_banks(mut self, banks: &'static [u32]) -> Self {
        self.banks = banks;
        self
    }

    /// Set the RAM staging buffer base.
    #[must_use]
    pub const fn with_ram_buffer_base(mut self, base: u32) -> Self {
        self.ram_buffer_base = Some(base);
        self
    }

    /// Set the RAM staging buffer size.
    #[must_use]
    pub const fn with_ram_buffer_size(mut self, size: u32) -> Self {
        self.ram_buffer_size = Some(size);
        self
    }

    /// Set the checksum vector slot.
    #[must_use]
    pub const fn with_checksum_vector(mut self, index: usize) -> Self {
        self.checksum_vector = Some(index);
        self
    }

    /// Set the CPU execution mode.
    #[must_use]
    pub const fn with_cpu_mode(mut self, mode: CpuMode) -> Self {
        self.cpu_mode = Some(mode);
        self
    }

    /// Cortex-M profile: checksum vector 7 and Thumb execution.
    #[must_use]
    pub const fn cortex(self) -> Self {
        self.with_checksum_vector(7)
            .with_cpu_mode(CpuMode::Thumb)
    }

    /// Look up a profile by name (case-insensitive).
    pub fn from_name(name: &str) -> Option<&'static Self> {
        CHIPS
            .iter()
            .find(|chip| chip.name.eq_ignore_ascii_case(name))
    }

    /// Find the first profile, in name order, whose device ID matches.
    pub fn detect(id: PartId) -> Option<&'static Self> {
        CHIPS.iter().find(|chip| {
            chip.device_id
                .is_some_and(|pattern| pattern.matches(id))
        })
    }

    /// Number of sectors present.
    pub fn sector_count(&self) -> u32 {
        #[allow(clippy::cast_possible_truncation)] // tables hold < 64 sectors
        let table = self.sectors.len() as u32;
        self.sector_count.map_or(table, |count| count.min(table))
    }

    /// Whether sector commands carry a bank field.
    pub fn has_banks(&self) -> bool {
        !self.banks.is_empty()
    }

    /// Base address of a bank, 0 for bankless parts.
    pub fn bank_base(&self, bank: usize) -> u32 {
        self.banks.get(bank).copied().unwrap_or(0)
    }

    /// Effective RAM staging buffer base.
    pub fn ram_buffer_base(&self) -> u32 {
        self.ram_buffer_base
            .unwrap_or(DEFAULT_RAM_BUFFER_BASE)
    }

    /// Effective RAM staging buffer size.
    pub fn ram_buffer_size(&self) -> u32 {
        self.ram_buffer_size
            .unwrap_or(DEFAULT_RAM_BUFFER_SIZE)
    }

    /// Effective checksum vector slot.
    pub fn checksum_vector(&self) -> usize {
        self.checksum_vector
            .unwrap_or(DEFAULT_CHECKSUM_VECTOR)
    }

    /// Effective CPU execution mode.
    pub fn cpu_mode(&self) -> CpuMode {
        self.cpu_mode.unwrap_or_default()
    }

    /// Iterate over the sectors of a bank.
    pub fn flash_sectors(&self, bank: usize) -> impl Iterator<Item = FlashSector> + '_ {
        let mut start = self.bank_base(bank);
        self.sectors
            .iter()
            .take(self.sector_count() as usize)
            .zip(0u32..)
            .map(move |(&kib, index)| {
                let sector = FlashSector {
                    index,
                    start,
                    size: kib * 1024,
                };
                start = start.wrapping_add(sector.size);
                sector
            })
    }

    /// Sector by index.
    pub fn flash_sector(&self, index: u32, bank: usize) -> Option<FlashSector> {
        self.flash_sectors(bank)
            .nth(index as usize)
    }

    /// Index of the sector containing `address`, `None` if the address is
    /// outside the flash of the bank.
    pub fn locate_sector(&self, address: u32, bank: usize) -> Option<u32> {
        self.flash_sectors(bank)
            .find(|sector| sector.contains(address))
            .map(|sector| sector.index)
    }

    /// Total flash size in bytes.
    pub fn flash_size(&self) -> u32 {
        self.flash_sectors(0)
            .map(|sector| sector.size)
            .sum()
    }

    /// Whether an image placed at `address` is meant to boot directly and
    /// therefore needs a valid vector table checksum.
    pub fn is_boot_address(&self, address: u32) -> bool {
        if self.has_banks() {
            self.banks.contains(&address)
        } else {
            address == 0
        }
    }
}

impl fmt::Display for ChipProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name.to_uppercase())
    }
}

/// Chip requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuSelection {
    /// Identify the part through the `J` command.
    Autodetect,
    /// Use the given profile.
    Profile(ChipProfile),
}

impl CpuSelection {
    /// Resolve a chip name, accepting [`AUTODETECT`].
    pub fn from_name(name: &str) -> Result<Self> {
        if name.eq_ignore_ascii_case(AUTODETECT) {
            return Ok(Self::Autodetect);
        }
        ChipProfile::from_name(name)
            .map(|chip| Self::Profile(*chip))
            .ok_or_else(|| Error::Config(format!("No parameters defined for cpu {name}")))
    }
}

impl From<ChipProfile> for CpuSelection {
    fn from(chip: ChipProfile) -> Self {
        Self::Profile(chip)
    }
}

/// Sector layout of LPC23xx/LPC24xx/LPC214x parts.
pub const SECTORS_LPC23XX: &[u32] = &[
    4, 4, 4, 4, 4, 4, 4, 4, //
    32, 32, 32, 32, 32, 32, 32, //
    32, 32, 32, 32, 32, 32, 32, //
    4, 4, 4, 4, 4, 4,
];

/// Sector layout of 64 KiB LPC21xx parts (without boot sector).
pub const SECTORS_LPC21XX_64: &[u32] = &[8, 8, 8, 8, 8, 8, 8, 8];

/// Sector layout of 128 KiB LPC21xx parts (without boot sector).
pub const SECTORS_LPC21XX_128: &[u32] = &[8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8];

/// Sector layout of 256 KiB LPC21xx parts (without boot sector).
pub const SECTORS_LPC21XX_256: &[u32] = &[
    8, 8, 8, 8, 8, 8, 8, 8, //
    64, 64, //
    8, 8, 8, 8, 8, 8, 8,
];

/// Sector layout of LPC17xx parts.
pub const SECTORS_LPC17XX: &[u32] = &[
    4, 4, 4, 4, 4, 4, 4, 4, //
    4, 4, 4, 4, 4, 4, 4, 4, //
    32, 32, 32, 32, 32, 32, 32, //
    32, 32, 32, 32, 32, 32, 32,
];

/// Sector layout of LPC11xx parts.
pub const SECTORS_LPC11XX: &[u32] = &[4, 4, 4, 4, 4, 4, 4, 4];

/// Sector layout of one LPC18xx flash bank.
pub const SECTORS_LPC18XX: &[u32] = &[8, 8, 8, 8, 8, 8, 8, 8, 64, 64, 64, 64, 64, 64, 64];

const LPC17XX_RAM: u32 = 0x1000_1000;
const LPC18XX_RAM: u32 = 0x1008_1000;
const LPC18XX_BANKS: &[u32] = &[0x1A00_0000, 0x1B00_0000];

const fn lpc17xx(name: &'static str, id: u32) -> ChipProfile {
    ChipProfile::new(name, SECTORS_LPC17XX)
        .with_device_id(id)
        .with_ram_buffer_base(LPC17XX_RAM)
        .cortex()
}

const fn lpc18xx(name: &'static str) -> ChipProfile {
    ChipProfile::new(name, SECTORS_LPC18XX)
        .with_banks(LPC18XX_BANKS)
        .with_ram_buffer_base(LPC18XX_RAM)
        .cortex()
}

/// All known parts, sorted by name.
///
/// Autodetection walks this table in order and stops at the first match.
pub static CHIPS: &[ChipProfile] = &[
    ChipProfile::new("lpc1114", SECTORS_LPC11XX)
        .with_device_id(0x0444_102B)
        .with_ram_buffer_base(0x1000_0400)
        .with_ram_buffer_size(1024),
    lpc17xx("lpc1751", 0x2500_1110),
    lpc17xx("lpc1752", 0x2500_1121),
    lpc17xx("lpc1754", 0x2501_1722),
    lpc17xx("lpc1756", 0x2501_1723),
    lpc17xx("lpc1758", 0x2501_3F37),
    lpc17xx("lpc1759", 0x2511_3737),
    lpc17xx("lpc1763", 0x2601_2033),
    lpc17xx("lpc1764", 0x2601_1922),
    lpc17xx("lpc1765", 0x2601_3733),
    lpc17xx("lpc1766", 0x2601_3F33),
    lpc17xx("lpc1767", 0x2601_2837),
    lpc17xx("lpc1768", 0x2601_3F37),
    lpc17xx("lpc1769", 0x2611_3F37).with_ram_buffer_base(0x1000_0200),
    lpc18xx("lpc1817").with_dual_device_id(0xF001_DB3F, 0, Some(0xFF)),
    lpc18xx("lpc1832").with_banks(&[0x1A00_0000]),
    lpc18xx("lpc1833")
        .with_sector_count(11)
        .with_dual_device_id(0xF001_DA30, 0x44, None),
    lpc18xx("lpc1837").with_dual_device_id(0xF001_DA30, 0, None),
    lpc18xx("lpc1853")
        .with_sector_count(11)
        .with_dual_device_id(0xF001_D830, 0, None),
    lpc18xx("lpc1857").with_dual_device_id(0xF001_D830, 0x44, None),
    ChipProfile::new("lpc2109", SECTORS_LPC21XX_64).with_device_id(33_685_249),
    ChipProfile::new("lpc2114", SECTORS_LPC21XX_128).with_device_id(16_908_050),
    ChipProfile::new("lpc2119", SECTORS_LPC21XX_128).with_device_id(33_685_266),
    ChipProfile::new("lpc2124", SECTORS_LPC21XX_256).with_device_id(16_908_051),
    ChipProfile::new("lpc2129", SECTORS_LPC21XX_256).with_device_id(33_685_267),
    ChipProfile::new("lpc2141", SECTORS_LPC23XX)
        .with_sector_count(8)
        .with_device_id(196_353),
    ChipProfile::new("lpc2142", SECTORS_LPC23XX)
        .with_sector_count(9)
        .with_device_id(196_369),
    ChipProfile::new("lpc2144", SECTORS_LPC23XX)
        .with_sector_count(11)
        .with_device_id(196_370),
    ChipProfile::new("lpc2146", SECTORS_LPC23XX)
        .with_sector_count(15)
        .with_device_id(196_387),
    ChipProfile::new("lpc2148", SECTORS_LPC23XX)
        .with_sector_count(27)
        .with_device_id(196_389),
    ChipProfile::new("lpc2194", SECTORS_LPC21XX_256).with_device_id(50_462_483),
    ChipProfile::new("lpc2212", SECTORS_LPC21XX_128),
    ChipProfile::new("lpc2214", SECTORS_LPC21XX_256),
    ChipProfile::new("lpc2292", SECTORS_LPC21XX_256).with_device_id(67_239_699),
    ChipProfile::new("lpc2294", SECTORS_LPC21XX_256).with_device_id(84_016_915),
    ChipProfile::new("lpc2364", SECTORS_LPC23XX)
        .with_sector_count(11)
        .with_device_id(369_162_498),
    ChipProfile::new("lpc2365", SECTORS_LPC23XX)
        .with_sector_count(15)
        .with_device_id(369_158_179),
    ChipProfile::new("lpc2366", SECTORS_LPC23XX)
        .with_sector_count(15)
        .with_device_id(369_162_531),
    ChipProfile::new("lpc2367", SECTORS_LPC23XX).with_device_id(369_158_181),
    ChipProfile::new("lpc2368", SECTORS_LPC23XX).with_device_id(369_162_533),
    ChipProfile::new("lpc2377", SECTORS_LPC23XX).with_device_id(385_935_397),
    ChipProfile::new("lpc2378", SECTORS_LPC23XX).with_device_id(385_940_773),
    ChipProfile::new("lpc2387", SECTORS_LPC23XX).with_device_id(402_716_981),
    ChipProfile::new("lpc2388", SECTORS_LPC23XX).with_device_id(402_718_517),
    ChipProfile::new("lpc2458", SECTORS_LPC23XX).with_device_id(352_386_869),
    ChipProfile::new("lpc2468", SECTORS_LPC23XX).with_device_id(369_164_085),
    ChipProfile::new("lpc2478", SECTORS_LPC23XX).with_device_id(386_006_837),
];
