//! Target chip support.
//!
//! `chip` holds the parameter table of the supported parts, `lpc` the
//! bootloader session and flash operations built on it.

pub mod chip;
pub mod lpc;

pub use chip::{
    AUTODETECT, CHIPS, ChipProfile, CpuSelection, DeviceIdPattern, FlashSector, PartId,
};
