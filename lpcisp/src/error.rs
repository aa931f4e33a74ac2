//! Error types for lpcisp.

use std::io;
use thiserror::Error;

/// Result type for lpcisp operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for lpcisp operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// No response within the allotted time.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Malformed response: bad sync string, bad echo, malformed UU line,
    /// read checksum mismatch or an unexpected status literal.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The bootloader answered with a non-zero return code.
    #[error("{context}: {code} - {description}")]
    Device {
        /// Command (or step) that failed.
        context: String,
        /// Numeric return code.
        code: u32,
        /// Catalog description, empty for codes outside the catalog.
        description: &'static str,
    },

    /// Flash content differs from the expected data.
    #[error("Verify mismatch at 0x{address:08X}")]
    VerifyMismatch {
        /// First diverging address (or the start of the compared range when
        /// the bootloader does not report an offset).
        address: u32,
    },

    /// Missing CPU parameter or unknown chip.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Address is not covered by the flash geometry of the active bank.
    #[error("Address 0x{0:08X} is outside the flash")]
    AddressOutOfRange(u32),

    /// The bootloader kept asking for the same RAM block.
    #[error("Write error: block at 0x{address:08X} rejected after {attempts} attempts")]
    ResendExhausted {
        /// RAM address of the block.
        address: u32,
        /// Number of transmissions made.
        attempts: usize,
    },

    /// A session step was called out of order.
    #[error("Invalid session state: expected {expected}, found {actual}")]
    InvalidState {
        /// State required by the step.
        expected: &'static str,
        /// State the session was in.
        actual: &'static str,
    },

    /// Image cannot be programmed as given.
    #[error("Invalid image: {0}")]
    InvalidImage(String),
}
