//! Flash operations on top of a ready [`IspSession`].
//!
//! Programming stages the image through a RAM buffer on the target:
//!
//! ```text
//!  host                         target
//!  ----                         ------
//!  W ram len, UU lines, sum -->  RAM buffer
//!  P s e                    -->  unlock sectors
//!  C flash ram len          -->  RAM buffer -> flash
//!  M flash ram len          -->  compare (optional)
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use lpcisp::{CpuSelection, Image, IspSession, LpcFlasher, MismatchPolicy, SerialConfig,
//!     SerialTransport, SessionConfig};
//!
//! fn main() -> lpcisp::Result<()> {
//!     let transport = SerialTransport::open(&SerialConfig::new("/dev/ttyUSB0", 115_200))?;
//!     let session = IspSession::connect(transport, CpuSelection::Autodetect, SessionConfig::new())?;
//!     let mut flasher = LpcFlasher::new(session)?;
//!
//!     let mut image = Image::from_file("firmware.bin", 0)?;
//!     let ok = flasher.program_image(&mut image, false, true, MismatchPolicy::Log, |done, total| {
//!         println!("{done}/{total}");
//!     })?;
//!     println!("verified: {ok}");
//!     Ok(())
//! }
//! ```

use crate::error::{Error, Result};
use crate::image::Image;
use crate::protocol::isp::{Command, OK, RESEND, ReturnCode};
use crate::protocol::uu::{self, BLOCK_SIZE, LINE_SIZE, LINES_PER_BLOCK};
use crate::target::chip::ChipProfile;
use crate::target::lpc::session::{IspSession, MAX_COMMAND_RETRIES, check_status};
use crate::transport::Transport;
use log::{debug, info, warn};

/// Transmissions of one RAM block before giving up on `RESEND`.
pub const MAX_BLOCK_RETRIES: usize = 3;

/// What to do when a blank check, compare or verify finds a difference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MismatchPolicy {
    /// Raise an error.
    #[default]
    Fail,
    /// Log a warning and report `false`.
    Log,
}

/// Bootloader answer to a RAM block checksum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockStatus {
    Accepted,
    Resend,
}

fn to_u32(value: usize, what: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::InvalidImage(format!("{what} {value} exceeds 32 bits")))
}

/// LPC flash programmer.
///
/// Owns a session that completed the handshake. Any failing operation
/// faults the session; later calls then fail with
/// [`Error::InvalidState`].
pub struct LpcFlasher<T: Transport> {
    session: IspSession<T>,
    chip: ChipProfile,
    bank: u32,
}

impl<T: Transport> LpcFlasher<T> {
    /// Wrap a ready session.
    pub fn new(session: IspSession<T>) -> Result<Self> {
        session.require_ready()?;
        let chip = *session.chip()?;
        Ok(Self {
            session,
            chip,
            bank: 0,
        })
    }

    /// Chip profile in use.
    pub fn chip(&self) -> &ChipProfile {
        &self.chip
    }

    /// Bank used for sector lookup and sector commands.
    pub fn active_bank(&self) -> u32 {
        self.bank
    }

    /// Get a reference to the session.
    pub fn session(&self) -> &IspSession<T> {
        &self.session
    }

    /// Get a mutable reference to the session.
    pub fn session_mut(&mut self) -> &mut IspSession<T> {
        &mut self.session
    }

    /// Consume the flasher and return the session.
    pub fn into_session(self) -> IspSession<T> {
        self.session
    }

    fn run<R>(&mut self, op: impl FnOnce(&mut Self) -> Result<R>) -> Result<R> {
        self.session.require_ready()?;
        let result = op(self);
        if result.is_err() {
            self.session.fault();
        }
        result
    }

    fn bank_field(&self) -> Option<u32> {
        self.chip.has_banks().then_some(self.bank)
    }

    /// Index of the sector holding `address` in the active bank.
    pub fn locate_sector(&self, address: u32) -> Option<u32> {
        self.chip
            .locate_sector(address, self.bank as usize)
    }

    fn require_sector(&self, address: u32) -> Result<u32> {
        self.locate_sector(address)
            .ok_or(Error::AddressOutOfRange(address))
    }

    fn last_sector(&self) -> Result<u32> {
        self.chip
            .sector_count()
            .checked_sub(1)
            .ok_or_else(|| Error::Config(format!("{} has no flash sectors", self.chip)))
    }

    /// Prepare sectors `start..=end` for a write or erase.
    pub fn prepare_sectors(&mut self, start: u32, end: u32) -> Result<()> {
        let bank = self.bank_field();
        self.run(|f| {
            f.session
                .isp_command(&Command::Prepare { start, end, bank })
        })
    }

    /// Erase sectors `start..=end`.
    ///
    /// With `verify` the sectors are blank checked afterwards. Non-blank
    /// sectors are logged and reported as `false`, not raised.
    pub fn erase_sectors(&mut self, start: u32, end: u32, verify: bool) -> Result<bool> {
        self.run(|f| {
            f.prepare_sectors(start, end)?;

            info!("Erasing flash sectors {start}-{end}");
            let bank = f.bank_field();
            f.session
                .isp_command(&Command::Erase { start, end, bank })?;

            if !verify {
                return Ok(true);
            }
            info!("Blank checking sectors {start}-{end}");
            f.blank_check_sectors(start, end, MismatchPolicy::Log)
        })
    }

    /// Erase the sectors covering `start_addr..=end_addr`.
    pub fn erase_range(&mut self, start_addr: u32, end_addr: u32, verify: bool) -> Result<bool> {
        self.run(|f| {
            let start = f.require_sector(start_addr)?;
            let end = f.require_sector(end_addr)?;
            f.erase_sectors(start, end, verify)
        })
    }

    /// Erase every sector of the part.
    pub fn erase_all(&mut self, verify: bool) -> Result<bool> {
        self.run(|f| {
            let end = f.last_sector()?;
            f.erase_sectors(0, end, verify)
        })
    }

    /// Blank check sectors `start..=end`, one `I` command per sector.
    ///
    /// Returns `true` when every sector is blank.
    pub fn blank_check_sectors(
        &mut self,
        start: u32,
        end: u32,
        policy: MismatchPolicy,
    ) -> Result<bool> {
        self.run(|f| {
            let bank = f.bank_field();
            let mut blank = true;

            for sector in start..=end {
                let command = Command::BlankCheck {
                    start: sector,
                    end: sector,
                    bank,
                };
                let code = f.session.send_command(&command)?;
                let Err(err) = check_status(&command, code) else {
                    continue;
                };

                if code == ReturnCode::SectorNotBlank.code() {
                    let offset = f.session.readline()?;
                    let content = f.session.readline()?;
                    debug!("Sector {sector}: offset {offset}, content {content}");
                }

                if policy == MismatchPolicy::Fail {
                    return Err(err);
                }
                warn!("Blank check of sector {sector} failed: {err}");
                blank = false;
            }

            Ok(blank)
        })
    }

    /// Blank check every sector of the part.
    pub fn blank_check_all(&mut self, policy: MismatchPolicy) -> Result<bool> {
        self.run(|f| {
            let end = f.last_sector()?;
            f.blank_check_sectors(0, end, policy)
        })
    }

    /// Stream one block of UU lines and its checksum.
    fn send_block(&mut self, data: &[u8]) -> Result<BlockStatus> {
        let transport = self.session.transport_mut();
        for line in uu::encode_lines(data) {
            let mut wire = line.into_bytes();
            wire.push(b'\n');
            transport.write(&wire)?;
        }

        let sum = uu::checksum(data).to_string();
        let mut status = String::new();
        for _ in 0..MAX_COMMAND_RETRIES {
            self.session.writeln(&sum)?;
            status = self.session.readline()?;
            if !status.is_empty() {
                break;
            }
        }

        match status.as_str() {
            OK => Ok(BlockStatus::Accepted),
            RESEND => Ok(BlockStatus::Resend),
            "" => Err(Error::Timeout("Write error: timeout".into())),
            other => Err(Error::Protocol(format!(
                "Write error: unexpected status {other:?}"
            ))),
        }
    }

    /// Write `data` to target RAM at `address`.
    ///
    /// The payload goes out in blocks of at most 20 UU lines, each announced
    /// by its own `W` command and closed by a checksum. A block answered
    /// with `RESEND` is sent again, at most [`MAX_BLOCK_RETRIES`] times in
    /// total.
    pub fn write_ram(&mut self, address: u32, data: &[u8]) -> Result<()> {
        self.run(|f| {
            let mut address = address;
            for block in data.chunks(BLOCK_SIZE) {
                let len = to_u32(block.len(), "block length")?;
                f.session
                    .isp_command(&Command::WriteRam { address, len })?;

                let mut accepted = false;
                for attempt in 1..=MAX_BLOCK_RETRIES {
                    match f.send_block(block)? {
                        BlockStatus::Accepted => {
                            accepted = true;
                            break;
                        },
                        BlockStatus::Resend => {
                            warn!(
                                "Resending block at 0x{address:08X} ({attempt}/{MAX_BLOCK_RETRIES})"
                            );
                        },
                    }
                }
                if !accepted {
                    return Err(Error::ResendExhausted {
                        address,
                        attempts: MAX_BLOCK_RETRIES,
                    });
                }

                address = address.wrapping_add(len);
            }
            Ok(())
        })
    }

    /// Write `data` to RAM in chunks no larger than the RAM buffer,
    /// advancing the address after each chunk.
    pub fn write_image_to_ram(&mut self, base: u32, data: &[u8]) -> Result<()> {
        let chunk_size = self.chip.ram_buffer_size() as usize;
        self.run(|f| {
            let mut address = base;
            for chunk in data.chunks(chunk_size) {
                f.write_ram(address, chunk)?;
                address = address.wrapping_add(to_u32(chunk.len(), "chunk length")?);
            }
            Ok(())
        })
    }

    /// Read `len` bytes starting at `address` with `R`.
    ///
    /// Every group of up to 20 lines is followed by a checksum that must
    /// match the decoded bytes; the host acknowledges it with `OK`.
    pub fn read_block(&mut self, address: u32, len: u32) -> Result<Vec<u8>> {
        self.run(|f| {
            f.session
                .isp_command(&Command::ReadMemory { address, len })?;

            let expected_lines = (len as usize).div_ceil(LINE_SIZE);
            let mut data = Vec::with_capacity(len as usize);

            for group_start in (0..expected_lines).step_by(LINES_PER_BLOCK) {
                let lines = (expected_lines - group_start).min(LINES_PER_BLOCK);
                let mut group = Vec::with_capacity(lines * LINE_SIZE);

                for _ in 0..lines {
                    let line = f.session.readline()?;
                    if line.is_empty() {
                        return Err(Error::Timeout(format!("reading 0x{address:08X}")));
                    }
                    group.extend(uu::decode_line(&line)?);
                }

                let sum_line = f.session.readline()?;
                let expected: u32 = sum_line.trim().parse().map_err(|_| {
                    Error::Protocol(format!("bad read checksum line {sum_line:?}"))
                })?;
                let actual = uu::checksum(&group);
                if expected != actual {
                    return Err(Error::Protocol(format!(
                        "Checksum mismatch on read got 0x{expected:x} expected 0x{actual:x}"
                    )));
                }
                f.session.writeln(OK)?;

                data.extend(group);
            }

            if data.len() != len as usize {
                return Err(Error::Protocol(format!(
                    "read returned {} bytes, expected {len}",
                    data.len()
                )));
            }
            Ok(data)
        })
    }

    /// Program an image.
    ///
    /// Boot images get their vector checksum patched, then the image is
    /// padded to the RAM buffer size, the covered sectors (or the whole
    /// part) are erased and every buffer-sized chunk is staged in RAM and
    /// copied to flash. With `verify` each chunk is compared after the copy;
    /// differences follow `policy`.
    ///
    /// `progress` receives `(bytes_done, bytes_total)` after every chunk.
    /// Returns `false` when a logged comparison failed.
    pub fn program_image<F>(
        &mut self,
        image: &mut Image,
        erase_all: bool,
        verify: bool,
        policy: MismatchPolicy,
        mut progress: F,
    ) -> Result<bool>
    where
        F: FnMut(usize, usize),
    {
        self.run(|f| {
            if image.is_empty() {
                return Err(Error::InvalidImage("image is empty".into()));
            }

            let base = image.base_address();
            let ram_addr = f.chip.ram_buffer_base();
            let ram_block = f.chip.ram_buffer_size() as usize;

            if f.chip.is_boot_address(base) {
                let vector = f.chip.checksum_vector();
                let csum = image.patch_boot_checksum(vector)?;
                info!("Inserting intvec checksum 0x{csum:08x} in image at offset {vector}");
            }

            let pad = image.pad_to(ram_block);
            info!("Padding with {pad} bytes");

            let last = image
                .last_address()
                .ok_or_else(|| Error::InvalidImage("image exceeds the address space".into()))?;
            if erase_all {
                f.erase_all(verify)?;
            } else {
                f.erase_range(base, last, verify)?;
            }

            let total = image.len();
            let mut success = true;
            progress(0, total);

            for (index, chunk) in image.data().chunks(ram_block).enumerate() {
                let offset = to_u32(index * ram_block, "image offset")?;
                let len = to_u32(chunk.len(), "chunk length")?;
                let flash_start = base.wrapping_add(offset);
                let flash_end = flash_start.wrapping_add(len - 1);

                info!("Writing {len} bytes to 0x{flash_start:x}");
                f.write_ram(ram_addr, chunk)?;

                let start_sector = f.require_sector(flash_start)?;
                let end_sector = f.require_sector(flash_end)?;
                f.prepare_sectors(start_sector, end_sector)?;

                f.session.isp_command(&Command::Copy {
                    flash: flash_start,
                    ram: ram_addr,
                    len,
                })?;

                if verify && !f.compare(flash_start, ram_addr, len, policy)? {
                    success = false;
                }

                progress(index * ram_block + chunk.len(), total);
            }

            Ok(success)
        })
    }

    /// Compare `len` bytes of flash and RAM with `M`.
    fn compare(&mut self, flash: u32, ram: u32, len: u32, policy: MismatchPolicy) -> Result<bool> {
        let command = Command::Compare { flash, ram, len };
        let code = self.session.send_command(&command)?;
        if code == ReturnCode::CmdSuccess.code() {
            return Ok(true);
        }
        if code != ReturnCode::CompareError.code() {
            check_status(&command, code)?;
        }

        let offset_line = self.session.readline()?;
        let address = offset_line
            .trim()
            .parse::<u32>()
            .map_or(flash, |offset| flash.wrapping_add(offset));
        match policy {
            MismatchPolicy::Fail => Err(Error::VerifyMismatch { address }),
            MismatchPolicy::Log => {
                warn!("Compare failed at 0x{address:08X}");
                Ok(false)
            },
        }
    }

    /// Read back the flash under `data` (starting at `base`) and compare.
    ///
    /// Each overlapping sector is read separately, rounded up to whole
    /// words. The first difference in a sector is handled per `policy`.
    pub fn verify_image(&mut self, base: u32, data: &[u8], policy: MismatchPolicy) -> Result<bool> {
        self.run(|f| {
            if data.is_empty() {
                return Ok(true);
            }

            let len = to_u32(data.len(), "image length")?;
            let end_addr = base
                .checked_add(len)
                .ok_or_else(|| Error::InvalidImage("image exceeds the address space".into()))?;
            let start_sector = f.require_sector(base)?;
            let end_sector = f.require_sector(end_addr - 1)?;

            let mut success = true;
            for index in start_sector..=end_sector {
                let sector = f
                    .chip
                    .flash_sector(index, f.bank as usize)
                    .ok_or(Error::AddressOutOfRange(base))?;

                let start = sector.start.max(base);
                let end = sector.end().min(end_addr);
                let span = end - start;
                let read_len = span.next_multiple_of(4);

                info!("Verify sector {index}: Reading {read_len} bytes from 0x{start:x}");
                let flash = f.read_block(start, read_len)?;

                let expected = &data[(start - base) as usize..(end - base) as usize];
                let diverge = flash
                    .iter()
                    .zip(expected)
                    .position(|(a, b)| a != b);

                if let Some(pos) = diverge {
                    let address = start + to_u32(pos, "offset")?;
                    match policy {
                        MismatchPolicy::Fail => return Err(Error::VerifyMismatch { address }),
                        MismatchPolicy::Log => {
                            warn!("Verify failed! content differ at location 0x{address:x}");
                            success = false;
                        },
                    }
                }
            }

            Ok(success)
        })
    }

    /// Start execution at `address` using the profile's CPU mode.
    pub fn start(&mut self, address: u32) -> Result<()> {
        let mode = self.chip.cpu_mode();
        info!("Starting code at 0x{address:08X} ({mode})");
        self.run(|f| {
            f.session
                .isp_command(&Command::Go { address, mode })
        })
    }

    /// Make `bank` the active flash bank.
    pub fn select_bank(&mut self, bank: u32) -> Result<()> {
        if bank as usize >= self.chip.banks.len() {
            return Err(Error::Config(format!(
                "{} has no flash bank {bank}",
                self.chip
            )));
        }
        self.run(|f| {
            f.session
                .isp_command(&Command::SelectBank(bank))?;
            f.bank = bank;
            debug!("Active bank {bank}");
            Ok(())
        })
    }

    /// Read the identification words with `J`.
    pub fn read_part_id(&mut self) -> Result<crate::target::chip::PartId> {
        self.run(|f| f.session.read_part_id())
    }

    /// Read the device serial number with `N`.
    pub fn read_serial_number(&mut self) -> Result<Vec<u32>> {
        self.run(|f| f.session.read_serial_number())
    }
}
