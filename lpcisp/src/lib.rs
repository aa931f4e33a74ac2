//! # lpcisp
//!
//! A library for programming NXP LPC microcontrollers through their serial
//! ISP bootloader.
//!
//! This crate provides the core functionality for talking to the bootloader
//! over a serial line, including:
//!
//! - The UU line codec and block checksum used for data transfers
//! - The ISP session state machine (sync, echo, oscillator, unlock)
//! - Flash operations: erase, blank check, program, verify and read back
//! - A parameter table of the supported parts with autodetection
//!
//! ## Supported Chips
//!
//! - LPC21xx/LPC22xx, LPC23xx/LPC24xx (ARM7)
//! - LPC17xx, LPC111x, LPC18xx (Cortex-M)
//!
//! ## Features
//!
//! - `native` (default): Native serial port support via the `serialport` crate
//! - `serde`: Serialization support for data types
//!
//! ## Example
//!
//! ```rust,no_run
//! use lpcisp::{
//!     CpuSelection, Image, IspSession, LpcFlasher, MismatchPolicy, SerialConfig,
//!     SerialTransport, SessionConfig, Transport,
//! };
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut image = Image::from_file("firmware.bin", 0)?;
//!
//!     let mut transport = SerialTransport::open(&SerialConfig::new("/dev/ttyUSB0", 115_200))?
//!         .with_control(true);
//!     transport.enter_isp_mode()?;
//!
//!     let session = IspSession::connect(transport, CpuSelection::Autodetect, SessionConfig::new())?;
//!     let mut flasher = LpcFlasher::new(session)?;
//!
//!     flasher.program_image(&mut image, false, true, MismatchPolicy::Fail, |done, total| {
//!         println!("{done}/{total}");
//!     })?;
//!     flasher.start(0)?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod device;
pub mod error;
pub mod image;
pub mod port;
pub mod protocol;
pub mod target;
pub mod transport;

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::{NativePort, NativePortEnumerator};
pub use {
    device::{BridgeKind, describe_port, preferred_port},
    error::{Error, Result},
    image::Image,
    port::{FlowControl, Port, PortEnumerator, PortInfo, SerialConfig},
    protocol::isp::{Command, CpuMode, ReturnCode},
    target::{
        AUTODETECT, CHIPS, ChipProfile, CpuSelection, DeviceIdPattern, FlashSector, PartId,
        lpc::{IspSession, LpcFlasher, MismatchPolicy, SessionConfig, SessionState},
    },
    transport::{ResetLine, SerialTransport, Transport},
};
