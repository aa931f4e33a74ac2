//! Protocol implementations.

pub mod isp;
pub mod uu;

// Re-export common types
pub use isp::{Command, CpuMode, ReturnCode};
pub use uu::{checksum, decode_line, decode_lines, encode_lines};
