//! ISP session: handshake, unlock and the command/response cycle.
//!
//! The handshake is an explicit state machine. Each step is a method that
//! checks the state it starts from, so steps can be driven one at a time:
//!
//! ```text
//! Unsynced --sync--> Syncing --detect_echo--> EchoDetect --set_oscillator-->
//! OscSet --disable_echo--> EchoDisabled --identify_and_unlock--> Unlocked
//! --finish--> Ready
//! ```
//!
//! Any error moves the session to `Faulted`, which no step accepts.
//!
//! ## Example
//!
//! ```rust,no_run
//! use lpcisp::{CpuSelection, IspSession, SessionConfig, SerialConfig, SerialTransport};
//!
//! fn main() -> lpcisp::Result<()> {
//!     let transport = SerialTransport::open(&SerialConfig::new("/dev/ttyUSB0", 115_200))?;
//!     let config = SessionConfig::new().with_osc_freq(12_000);
//!     let session = IspSession::connect(transport, CpuSelection::Autodetect, config)?;
//!     println!("Connected to {}", session.chip()?);
//!     Ok(())
//! }
//! ```

use crate::error::{Error, Result};
use crate::protocol::isp::{
    self, Command, LINE_END, OK, SYNC_PROBE, SYNC_STRING, ReturnCode, UNLOCK_CODE,
};
use crate::target::chip::{ChipProfile, CpuSelection, PartId};
use crate::transport::Transport;
use log::{debug, info};
use std::fmt;
use std::time::Duration;

/// Attempts per command while no status line arrives.
pub const MAX_COMMAND_RETRIES: usize = 3;

/// Default crystal frequency in kHz.
pub const DEFAULT_OSC_FREQ_KHZ: u32 = 12_000;

/// Timeout for the optional trailing words of `J` and `N`.
pub const DEFAULT_ID_PROBE_TIMEOUT: Duration = Duration::from_millis(200);

/// Handshake progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Nothing exchanged yet.
    Unsynced,
    /// Bootloader answered the sync probe.
    Syncing,
    /// Echo mode is known.
    EchoDetect,
    /// Oscillator frequency accepted.
    OscSet,
    /// Echo disable command answered.
    EchoDisabled,
    /// Part identified and flash commands unlocked.
    Unlocked,
    /// Flash commands may be issued.
    Ready,
    /// A step failed; the session is unusable.
    Faulted,
}

impl SessionState {
    /// State name for diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            Self::Unsynced => "Unsynced",
            Self::Syncing => "Syncing",
            Self::EchoDetect => "EchoDetect",
            Self::OscSet => "OscSet",
            Self::EchoDisabled => "EchoDisabled",
            Self::Unlocked => "Unlocked",
            Self::Ready => "Ready",
            Self::Faulted => "Faulted",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Session options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Crystal frequency in kHz, sent during the handshake.
    pub osc_freq_khz: u32,
    /// Fail when an echoed command differs from what was sent.
    pub verify_echo: bool,
    /// Timeout for the optional trailing identification words.
    pub id_probe_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            osc_freq_khz: DEFAULT_OSC_FREQ_KHZ,
            verify_echo: false,
            id_probe_timeout: DEFAULT_ID_PROBE_TIMEOUT,
        }
    }
}

impl SessionConfig {
    /// Default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the crystal frequency in kHz.
    #[must_use]
    pub fn with_osc_freq(mut self, khz: u32) -> Self {
        self.osc_freq_khz = khz;
        self
    }

    /// Enable echo verification.
    #[must_use]
    pub fn with_verify_echo(mut self, verify: bool) -> Self {
        self.verify_echo = verify;
        self
    }

    /// Set the identification probe timeout.
    #[must_use]
    pub fn with_id_probe_timeout(mut self, timeout: Duration) -> Self {
        self.id_probe_timeout = timeout;
        self
    }
}

/// Connection to an LPC bootloader.
///
/// Generic over the [`Transport`] so tests can drive it with scripted or
/// simulated bootloaders.
pub struct IspSession<T: Transport> {
    transport: T,
    cpu: CpuSelection,
    part_id: Option<PartId>,
    config: SessionConfig,
    state: SessionState,
    echo: bool,
}

impl<T: Transport> IspSession<T> {
    /// Create an unsynchronized session. No bytes are exchanged.
    pub fn new(transport: T, cpu: CpuSelection, config: SessionConfig) -> Self {
        Self {
            transport,
            cpu,
            part_id: None,
            config,
            state: SessionState::Unsynced,
            echo: true,
        }
    }

    /// Create a session and run the complete handshake.
    pub fn connect(transport: T, cpu: CpuSelection, config: SessionConfig) -> Result<Self> {
        let mut session = Self::new(transport, cpu, config);
        session.handshake()?;
        Ok(session)
    }

    /// Run every remaining handshake step up to [`SessionState::Ready`].
    pub fn handshake(&mut self) -> Result<()> {
        self.sync()?;
        self.detect_echo()?;
        self.set_oscillator()?;
        self.disable_echo()?;
        self.identify_and_unlock()?;
        self.finish()
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether the bootloader still echoes commands.
    pub fn echo(&self) -> bool {
        self.echo
    }

    /// Session options.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Identification words read during autodetection.
    pub fn part_id(&self) -> Option<PartId> {
        self.part_id
    }

    /// Resolved chip profile.
    pub fn chip(&self) -> Result<&ChipProfile> {
        match &self.cpu {
            CpuSelection::Profile(chip) => Ok(chip),
            CpuSelection::Autodetect => Err(Error::Config(
                "cpu is not resolved yet, run the handshake first".into(),
            )),
        }
    }

    /// Get a reference to the transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Get a mutable reference to the transport.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Consume the session and return the transport.
    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Fail unless the handshake completed.
    pub fn require_ready(&self) -> Result<()> {
        self.require(SessionState::Ready)
    }

    /// Mark the session unusable after a failed operation.
    pub fn fault(&mut self) {
        if self.state != SessionState::Faulted {
            debug!("Session {} -> {}", self.state, SessionState::Faulted);
        }
        self.state = SessionState::Faulted;
    }

    fn require(&self, expected: SessionState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(Error::InvalidState {
                expected: expected.name(),
                actual: self.state.name(),
            })
        }
    }

    fn advance<R>(
        &mut self,
        from: SessionState,
        to: SessionState,
        step: impl FnOnce(&mut Self) -> Result<R>,
    ) -> Result<R> {
        self.require(from)?;
        match step(self) {
            Ok(value) => {
                debug!("Session {from} -> {to}");
                self.state = to;
                Ok(value)
            },
            Err(e) => {
                self.fault();
                Err(e)
            },
        }
    }

    /// Write a line terminated by CR LF.
    pub fn writeln(&mut self, line: &str) -> Result<()> {
        let mut wire = Vec::with_capacity(line.len() + LINE_END.len());
        wire.extend_from_slice(line.as_bytes());
        wire.extend_from_slice(LINE_END);
        self.transport.write(&wire)
    }

    /// Read one line with the default timeout.
    pub fn readline(&mut self) -> Result<String> {
        self.transport.readline(None)
    }

    /// Read one line with the identification probe timeout.
    fn probe_line(&mut self) -> Result<String> {
        let timeout = self.config.id_probe_timeout;
        self.transport.readline(Some(timeout))
    }

    /// Read the echoed copy of `sent`, failing on mismatch.
    fn expect_echo(&mut self, sent: &str) -> Result<()> {
        let echoed = self.readline()?;
        if echoed == sent {
            Ok(())
        } else {
            Err(Error::Protocol(format!(
                "Invalid echo: sent {sent:?}, got {echoed:?}"
            )))
        }
    }

    /// Send `?` and wait for the synchronization string.
    pub fn sync(&mut self) -> Result<()> {
        self.advance(SessionState::Unsynced, SessionState::Syncing, |s| {
            s.transport.write(SYNC_PROBE)?;
            let reply = s.readline()?;
            if reply.is_empty() {
                return Err(Error::Timeout("Sync timeout".into()));
            }
            if reply != SYNC_STRING {
                return Err(Error::Protocol(format!("No sync string, got {reply:?}")));
            }
            Ok(())
        })
    }

    /// Echo the synchronization string back and find out whether the
    /// bootloader echoes commands.
    pub fn detect_echo(&mut self) -> Result<()> {
        self.advance(SessionState::Syncing, SessionState::EchoDetect, |s| {
            s.writeln(SYNC_STRING)?;
            let mut reply = s.readline()?;
            if reply == SYNC_STRING {
                s.echo = true;
                reply = s.readline()?;
            } else if reply == OK {
                s.echo = false;
            } else {
                return Err(Error::Protocol(format!("No sync string, got {reply:?}")));
            }

            if reply != OK {
                return Err(Error::Protocol(format!("Not ok, got {reply:?}")));
            }
            debug!("Bootloader echo {}", if s.echo { "on" } else { "off" });
            Ok(())
        })
    }

    /// Send the crystal frequency.
    pub fn set_oscillator(&mut self) -> Result<()> {
        self.advance(SessionState::EchoDetect, SessionState::OscSet, |s| {
            let line = Command::Oscillator(s.config.osc_freq_khz).line();
            s.writeln(&line)?;
            if s.echo {
                s.expect_echo(&line)?;
            }

            let status = s.readline()?;
            if status == OK || is_invalid_command(&status) {
                return Ok(());
            }
            Err(status_error(&format!("'{line}' osc not ok"), &status))
        })
    }

    /// Send `A 0`. The echo flag clears only on an explicit success code.
    pub fn disable_echo(&mut self) -> Result<()> {
        self.advance(SessionState::OscSet, SessionState::EchoDisabled, |s| {
            let line = Command::Echo(false).line();
            s.writeln(&line)?;
            if s.echo {
                s.expect_echo(&line)?;
            }

            let status = s.readline()?;
            if parse_status(&status) == Some(ReturnCode::CmdSuccess.code()) {
                s.echo = false;
                return Ok(());
            }
            if is_invalid_command(&status) {
                debug!("Echo control not supported, echo stays on");
                return Ok(());
            }
            Err(status_error(&format!("'{line}' echo disable failed"), &status))
        })
    }

    /// Resolve an autodetect selection through `J`, then unlock flash
    /// commands.
    pub fn identify_and_unlock(&mut self) -> Result<()> {
        self.advance(SessionState::EchoDisabled, SessionState::Unlocked, |s| {
            if s.cpu == CpuSelection::Autodetect {
                let id = s.read_part_id()?;
                let chip = ChipProfile::detect(id).ok_or_else(|| {
                    Error::Config(format!(
                        "Cannot autodetect from device id {id}, set cpu name manually"
                    ))
                })?;
                info!("Detected {chip}");
                s.cpu = CpuSelection::Profile(*chip);
            }
            s.isp_command(&Command::Unlock(UNLOCK_CODE))
        })
    }

    /// Enter the ready state.
    pub fn finish(&mut self) -> Result<()> {
        self.advance(SessionState::Unlocked, SessionState::Ready, |_| Ok(()))
    }

    /// Send a command and return its raw status line.
    ///
    /// The write and read cycle is retried while no status arrives, at most
    /// [`MAX_COMMAND_RETRIES`] times. An empty string means every attempt
    /// timed out.
    pub fn exchange(&mut self, command: &Command) -> Result<String> {
        let line = command.line();
        debug!("Command: {line}");

        for attempt in 1..=MAX_COMMAND_RETRIES {
            self.writeln(&line)?;

            if self.echo {
                let echoed = self.readline()?;
                if self.config.verify_echo && echoed != line {
                    return Err(Error::Protocol(format!(
                        "Invalid echo: sent {line:?}, got {echoed:?}"
                    )));
                }
            }

            let status = self.readline()?;
            if !status.is_empty() {
                return Ok(status);
            }
            debug!("No status for '{line}' (attempt {attempt}/{MAX_COMMAND_RETRIES})");
        }

        Ok(String::new())
    }

    /// Send a command and return its numeric status.
    ///
    /// A missing status is a timeout and a non-numeric one a protocol
    /// error. Non-zero codes are returned, not raised.
    pub fn send_command(&mut self, command: &Command) -> Result<u32> {
        let status = self.exchange(command)?;
        let context = format!("'{command}' error");
        if status.is_empty() {
            return Err(Error::Timeout(context));
        }
        parse_status(&status)
            .ok_or_else(|| Error::Protocol(format!("{context}: unexpected status {status:?}")))
    }

    /// Send a command and require the success code.
    pub fn isp_command(&mut self, command: &Command) -> Result<()> {
        let code = self.send_command(command)?;
        check_status(command, code)
    }

    /// Read the identification words with `J`.
    ///
    /// A second word arriving within the probe timeout marks a dual-word
    /// part.
    pub fn read_part_id(&mut self) -> Result<PartId> {
        self.isp_command(&Command::ReadPartId)?;
        let word0 = parse_word(&self.readline()?, "part id")?;
        let second = self.probe_line()?;

        let id = if second.is_empty() {
            PartId::Single(word0)
        } else {
            PartId::Dual(word0, parse_word(&second, "part id")?)
        };
        debug!("Part id: {id}");
        self.part_id = Some(id);
        Ok(id)
    }

    /// Read the device serial number words with `N`.
    pub fn read_serial_number(&mut self) -> Result<Vec<u32>> {
        self.isp_command(&Command::ReadSerialNumber)?;

        let mut words = vec![parse_word(&self.readline()?, "serial number")?];
        for _ in 1..4 {
            let line = self.probe_line()?;
            if line.is_empty() {
                break;
            }
            words.push(parse_word(&line, "serial number")?);
        }
        Ok(words)
    }
}

fn parse_status(status: &str) -> Option<u32> {
    status.trim().parse().ok()
}

fn is_invalid_command(status: &str) -> bool {
    parse_status(status) == Some(ReturnCode::InvalidCommand.code())
}

fn parse_word(line: &str, what: &str) -> Result<u32> {
    if line.is_empty() {
        return Err(Error::Timeout(format!("reading {what}")));
    }
    line.trim()
        .parse()
        .map_err(|_| Error::Protocol(format!("bad {what} word {line:?}")))
}

/// Map a handshake status line to an error.
fn status_error(context: &str, status: &str) -> Error {
    if status.is_empty() {
        return Error::Timeout(context.to_string());
    }
    match parse_status(status) {
        Some(code) => Error::Device {
            context: context.to_string(),
            code,
            description: isp::describe(code),
        },
        None => Error::Protocol(format!("{context}: unexpected status {status:?}")),
    }
}

/// Map a non-zero return code of `command` to an error.
pub(crate) fn check_status(command: &Command, code: u32) -> Result<()> {
    if ReturnCode::from_code(code).is_some_and(ReturnCode::is_success) {
        return Ok(());
    }
    Err(Error::Device {
        context: format!("'{command}' error"),
        code,
        description: isp::describe(code),
    })
}
