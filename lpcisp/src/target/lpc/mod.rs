//! NXP LPC ISP bootloader support.

pub mod flasher;
pub mod session;

#[cfg(test)]
pub(crate) mod sim;

pub use flasher::{LpcFlasher, MAX_BLOCK_RETRIES, MismatchPolicy};
pub use session::{IspSession, MAX_COMMAND_RETRIES, SessionConfig, SessionState};
