//! In-memory LPC bootloader used by the tests.
//!
//! Interprets the wire protocol against a flash array and a sparse RAM
//! map, so whole program/verify cycles run without hardware.

use crate::error::Result;
use crate::protocol::isp::{OK, RESEND, SYNC_STRING};
use crate::protocol::uu;
use crate::target::chip::{ChipProfile, DeviceIdPattern};
use crate::transport::Transport;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Unsynced,
    AwaitSyncEcho,
    AwaitOsc,
    Command,
}

#[derive(Debug)]
enum Mode {
    Command,
    WriteData {
        address: u32,
        len: usize,
        data: Vec<u8>,
    },
}

pub(crate) struct FakeBootloader {
    chip: ChipProfile,
    flash_base: u32,
    flash: Vec<u8>,
    ram: HashMap<u32, u8>,
    inbox: Vec<u8>,
    outbox: VecDeque<String>,
    stage: Stage,
    mode: Mode,
    echo: bool,
    prepared: bool,
    /// Command lines received after the handshake, in order.
    pub commands: Vec<String>,
    /// Number of RAM block checksums answered with `RESEND`.
    pub resend_budget: usize,
    /// Answer every `M` with a compare error at offset 4.
    pub force_compare_error: bool,
    /// Send wrong checksums after `R` data lines.
    pub corrupt_read_checksum: bool,
}

impl FakeBootloader {
    pub fn new(chip: ChipProfile) -> Self {
        Self {
            chip,
            flash_base: chip.bank_base(0),
            flash: vec![0xFF; chip.flash_size() as usize],
            ram: HashMap::new(),
            inbox: Vec::new(),
            outbox: VecDeque::new(),
            stage: Stage::Unsynced,
            mode: Mode::Command,
            echo: true,
            prepared: false,
            commands: Vec::new(),
            resend_budget: 0,
            force_compare_error: false,
            corrupt_read_checksum: false,
        }
    }

    /// Number of received commands with the given verb.
    pub fn count(&self, verb: &str) -> usize {
        self.commands
            .iter()
            .filter(|c| c.split_whitespace().next() == Some(verb))
            .count()
    }

    /// Flash content at `address`.
    pub fn flash(&self, address: u32, len: usize) -> Vec<u8> {
        let start = (address - self.flash_base) as usize;
        self.flash[start..start + len].to_vec()
    }

    /// RAM content at `address`, unwritten bytes read as zero.
    pub fn ram(&self, address: u32, len: usize) -> Vec<u8> {
        (0..len as u32)
            .map(|i| {
                self.ram
                    .get(&(address + i))
                    .copied()
                    .unwrap_or(0)
            })
            .collect()
    }

    fn reply(&mut self, line: impl Into<String>) {
        self.outbox.push_back(line.into());
    }

    fn flash_index(&self, address: u32) -> Option<usize> {
        let offset = address.checked_sub(self.flash_base)? as usize;
        (offset < self.flash.len()).then_some(offset)
    }

    fn sector_range(&self, start: u32, end: u32) -> Option<std::ops::Range<usize>> {
        let first = self.chip.flash_sector(start, 0)?;
        let last = self.chip.flash_sector(end, 0)?;
        Some(self.flash_index(first.start)?..self.flash_index(last.end() - 1)? + 1)
    }

    fn receive(&mut self, line: &str) {
        match self.stage {
            Stage::Unsynced => {},
            Stage::AwaitSyncEcho => {
                if self.echo {
                    self.reply(line);
                }
                if line == SYNC_STRING {
                    self.reply(OK);
                    self.stage = Stage::AwaitOsc;
                }
            },
            Stage::AwaitOsc => {
                if self.echo {
                    self.reply(line);
                }
                self.reply(OK);
                self.stage = Stage::Command;
            },
            Stage::Command => match std::mem::replace(&mut self.mode, Mode::Command) {
                Mode::WriteData { address, len, data } => self.receive_data(address, len, data, line),
                Mode::Command => {
                    // Acknowledgement of an `R` checksum
                    if line == OK {
                        return;
                    }
                    self.commands.push(line.to_string());
                    if self.echo {
                        self.reply(line);
                    }
                    self.execute(line);
                },
            },
        }
    }

    fn receive_data(&mut self, address: u32, len: usize, mut data: Vec<u8>, line: &str) {
        if data.len() < len {
            data.extend(uu::decode_line(line).unwrap_or_default());
            self.mode = Mode::WriteData { address, len, data };
            return;
        }

        let sum: u32 = line.parse().unwrap_or(u32::MAX);
        if self.resend_budget > 0 || sum != uu::checksum(&data) {
            self.resend_budget = self.resend_budget.saturating_sub(1);
            data.clear();
            self.mode = Mode::WriteData { address, len, data };
            self.reply(RESEND);
            return;
        }

        for (i, byte) in (0u32..).zip(data) {
            self.ram.insert(address + i, byte);
        }
        self.reply(OK);
    }

    fn execute(&mut self, line: &str) {
        let mut tokens = line.split_whitespace();
        let verb = tokens.next().unwrap_or_default();
        let args: Vec<u32> = tokens
            .filter_map(|t| t.parse().ok())
            .collect();
        let arg = |i: usize| args.get(i).copied().unwrap_or(0);

        match verb {
            "A" => {
                self.echo = arg(0) != 0;
                self.reply("0");
            },
            "U" | "G" | "S" => self.reply("0"),
            "J" => {
                self.reply("0");
                match self.chip.device_id {
                    Some(DeviceIdPattern::Single(id)) => self.reply(id.to_string()),
                    Some(DeviceIdPattern::Dual { word0, word1, .. }) => {
                        self.reply(word0.to_string());
                        self.reply(word1.to_string());
                    },
                    None => self.reply("0"),
                }
            },
            "N" => {
                for line in ["0", "1", "2", "3", "4"] {
                    self.reply(line);
                }
            },
            "P" => {
                self.prepared = true;
                self.reply("0");
            },
            "E" => {
                if !self.prepared {
                    return self.reply("9");
                }
                match self.sector_range(arg(0), arg(1)) {
                    Some(range) => {
                        self.flash[range].fill(0xFF);
                        self.prepared = false;
                        self.reply("0");
                    },
                    None => self.reply("7"),
                }
            },
            "I" => {
                let Some(range) = self.sector_range(arg(0), arg(1)) else {
                    return self.reply("7");
                };
                let start = range.start;
                match self.flash[range]
                    .iter()
                    .position(|&b| b != 0xFF)
                {
                    None => self.reply("0"),
                    Some(pos) => {
                        let word = (start + pos) & !3;
                        let content = u32::from_le_bytes([
                            self.flash[word],
                            self.flash[word + 1],
                            self.flash[word + 2],
                            self.flash[word + 3],
                        ]);
                        self.reply("8");
                        self.reply(word.to_string());
                        self.reply(content.to_string());
                    },
                }
            },
            "W" => {
                self.mode = Mode::WriteData {
                    address: arg(0),
                    len: arg(1) as usize,
                    data: Vec::new(),
                };
                self.reply("0");
            },
            "C" => {
                if !self.prepared {
                    return self.reply("9");
                }
                let (dst, src, len) = (arg(0), arg(1), arg(2));
                let Some(start) = self.flash_index(dst) else {
                    return self.reply("5");
                };
                let data = self.ram(src, len as usize);
                for (cell, byte) in self.flash[start..start + len as usize]
                    .iter_mut()
                    .zip(data)
                {
                    // Programming can only clear bits
                    *cell &= byte;
                }
                self.prepared = false;
                self.reply("0");
            },
            "M" => {
                let (dst, src, len) = (arg(0), arg(1), arg(2));
                let flash = self.flash(dst, len as usize);
                let ram = self.ram(src, len as usize);
                let diverge = flash
                    .iter()
                    .zip(&ram)
                    .position(|(a, b)| a != b);
                match (self.force_compare_error, diverge) {
                    (true, _) => {
                        self.reply("10");
                        self.reply("4");
                    },
                    (false, Some(pos)) => {
                        self.reply("10");
                        self.reply(pos.to_string());
                    },
                    (false, None) => self.reply("0"),
                }
            },
            "R" => {
                let data = self.flash(arg(0), arg(1) as usize);
                self.reply("0");
                for (lines, bytes) in uu::encode_lines(&data)
                    .chunks(uu::LINES_PER_BLOCK)
                    .zip(data.chunks(uu::BLOCK_SIZE))
                {
                    for line in lines {
                        self.reply(line.clone());
                    }
                    let sum = uu::checksum(bytes).wrapping_add(u32::from(self.corrupt_read_checksum));
                    self.reply(sum.to_string());
                }
            },
            _ => self.reply("1"),
        }
    }
}

impl Transport for FakeBootloader {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        if self.stage == Stage::Unsynced {
            if data == b"?" {
                self.reply(SYNC_STRING);
                self.stage = Stage::AwaitSyncEcho;
            }
            return Ok(());
        }

        self.inbox.extend_from_slice(data);
        while let Some(pos) = self.inbox.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.inbox.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            self.receive(line.trim_end_matches(['\r', '\n']));
        }
        Ok(())
    }

    fn readline(&mut self, _timeout: Option<Duration>) -> Result<String> {
        Ok(self.outbox.pop_front().unwrap_or_default())
    }

    fn enter_isp_mode(&mut self) -> Result<()> {
        Ok(())
    }
}
