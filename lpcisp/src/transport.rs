//! Line transport between the host and the bootloader.
//!
//! [`Transport`] is the capability the ISP session consumes: write raw
//! bytes, read one line, and put the target into ISP mode. The serial
//! implementation frames lines over any [`Port`] and optionally drives the
//! reset and boot-select pins through DTR/RTS:
//!
//! ```text
//!            enter_isp_mode()
//! RESET  ‾‾‾|___|‾‾‾‾‾‾‾‾|___________
//! BOOT   ________|‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾|___
//!           100ms   100ms    100ms
//! ```

use crate::error::Result;
use crate::port::Port;
use log::{debug, trace};
use std::io::ErrorKind;
use std::thread;
use std::time::Duration;

/// Delay between two control line transitions.
pub const SETTLE_DELAY: Duration = Duration::from_millis(100);

/// Line-oriented link to the bootloader.
pub trait Transport {
    /// Write raw bytes, blocking until they are sent.
    fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Read one line without its terminator.
    ///
    /// Returns an empty string when nothing arrived before the timeout.
    /// `timeout` overrides the default read timeout for this call only.
    fn readline(&mut self, timeout: Option<Duration>) -> Result<String>;

    /// Reset the target into its ISP bootloader.
    fn enter_isp_mode(&mut self) -> Result<()>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        (**self).write(data)
    }

    fn readline(&mut self, timeout: Option<Duration>) -> Result<String> {
        (**self).readline(timeout)
    }

    fn enter_isp_mode(&mut self) -> Result<()> {
        (**self).enter_isp_mode()
    }
}

/// Control line wired to the target's RESET pin. The other line drives
/// the boot-select pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResetLine {
    /// DTR drives RESET, RTS drives the boot-select pin.
    #[default]
    Dtr,
    /// RTS drives RESET, DTR drives the boot-select pin.
    Rts,
}

/// [`Transport`] over a serial [`Port`].
pub struct SerialTransport<P: Port> {
    port: P,
    control: bool,
    reset_line: ResetLine,
    settle: Duration,
}

impl<P: Port> SerialTransport<P> {
    /// Wrap an opened port. ISP control lines are disabled.
    pub fn new(port: P) -> Self {
        Self {
            port,
            control: false,
            reset_line: ResetLine::default(),
            settle: SETTLE_DELAY,
        }
    }

    /// Drive RESET and boot-select through the modem control lines when
    /// entering ISP mode.
    #[must_use]
    pub fn with_control(mut self, control: bool) -> Self {
        self.control = control;
        self
    }

    /// Select which control line drives RESET.
    #[must_use]
    pub fn with_reset_line(mut self, line: ResetLine) -> Self {
        self.reset_line = line;
        self
    }

    /// Override the delay between control line transitions.
    #[must_use]
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle = delay;
        self
    }

    /// Get a reference to the underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Get a mutable reference to the underlying port.
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Consume the transport and return the underlying port.
    pub fn into_port(self) -> P {
        self.port
    }

    fn set_reset(&mut self, level: bool) -> Result<()> {
        match self.reset_line {
            ResetLine::Dtr => self.port.set_dtr(level),
            ResetLine::Rts => self.port.set_rts(level),
        }
    }

    fn set_boot(&mut self, level: bool) -> Result<()> {
        match self.reset_line {
            ResetLine::Dtr => self.port.set_rts(level),
            ResetLine::Rts => self.port.set_dtr(level),
        }
    }

    fn read_line_bytes(&mut self) -> Result<Vec<u8>> {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];

        loop {
            match self.port.read(&mut byte) {
                Ok(0) => break,
                Ok(_) => match byte[0] {
                    b'\r' | b'\n' if line.is_empty() => {},
                    b'\r' | b'\n' => break,
                    b => line.push(b),
                },
                Err(e) if e.kind() == ErrorKind::TimedOut => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => {},
                Err(e) => return Err(e.into()),
            }
        }

        Ok(line)
    }
}

impl<P: Port> Transport for SerialTransport<P> {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        trace!("> {:?}", String::from_utf8_lossy(data));
        self.port.write_all_bytes(data)
    }

    fn readline(&mut self, timeout: Option<Duration>) -> Result<String> {
        let saved = self.port.timeout();
        if let Some(timeout) = timeout {
            self.port.set_timeout(timeout)?;
        }

        let result = self.read_line_bytes();

        if timeout.is_some() {
            self.port.set_timeout(saved)?;
        }

        let line = String::from_utf8_lossy(&result?).into_owned();
        trace!("< {line:?}");
        Ok(line)
    }

    fn enter_isp_mode(&mut self) -> Result<()> {
        if !self.control {
            debug!("ISP control lines disabled, assuming target is in ISP mode");
            return Ok(());
        }

        debug!("Entering ISP mode on {}", self.port.name());
        self.set_reset(false)?;
        thread::sleep(self.settle);
        self.set_reset(true)?;
        self.set_boot(true)?;
        thread::sleep(self.settle);
        self.set_reset(false)?;
        thread::sleep(self.settle);
        self.set_boot(false)?;
        self.port.clear_buffers()
    }
}

#[cfg(feature = "native")]
mod native_impl {
    use super::SerialTransport;
    use crate::error::Result;
    use crate::port::{NativePort, SerialConfig};

    impl SerialTransport<NativePort> {
        /// Open a serial port and wrap it.
        pub fn open(config: &SerialConfig) -> Result<Self> {
            NativePort::open(config).map(Self::new)
        }
    }
}

/// Replays canned response lines and records everything written.
#[cfg(test)]
pub(crate) struct ScriptedTransport {
    responses: std::collections::VecDeque<String>,
    /// Written chunks, one entry per `write` call.
    pub written: Vec<String>,
    /// Per-call timeout overrides seen by `readline`.
    pub timeouts: Vec<Option<Duration>>,
}

#[cfg(test)]
impl ScriptedTransport {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: responses.into_iter().map(Into::into).collect(),
            written: Vec::new(),
            timeouts: Vec::new(),
        }
    }

    /// Written chunks with line terminators removed.
    pub fn written_lines(&self) -> Vec<&str> {
        self.written
            .iter()
            .map(|w| w.trim_end_matches(['\r', '\n']))
            .collect()
    }

    pub fn remaining(&self) -> usize {
        self.responses.len()
    }
}

#[cfg(test)]
impl Transport for ScriptedTransport {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.written
            .push(String::from_utf8_lossy(data).into_owned());
        Ok(())
    }

    fn readline(&mut self, timeout: Option<Duration>) -> Result<String> {
        self.timeouts.push(timeout);
        Ok(self.responses.pop_front().unwrap_or_default())
    }

    fn enter_isp_mode(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io::{Read, Write};

    #[derive(Default)]
    struct MockPort {
        input: VecDeque<u8>,
        output: Vec<u8>,
        timeout: Duration,
        lines: Vec<(&'static str, bool)>,
    }

    impl MockPort {
        fn with_input(data: &[u8]) -> Self {
            Self {
                input: data.iter().copied().collect(),
                timeout: Duration::from_secs(5),
                ..Default::default()
            }
        }
    }

    impl Read for MockPort {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            match self.input.pop_front() {
                Some(b) => {
                    buf[0] = b;
                    Ok(1)
                },
                None => Err(std::io::Error::new(ErrorKind::TimedOut, "timed out")),
            }
        }
    }

    impl Write for MockPort {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.output.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Port for MockPort {
        fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
            self.timeout = timeout;
            Ok(())
        }

        fn timeout(&self) -> Duration {
            self.timeout
        }

        fn clear_buffers(&mut self) -> Result<()> {
            self.input.clear();
            Ok(())
        }

        fn name(&self) -> &str {
            "mock"
        }

        fn set_dtr(&mut self, level: bool) -> Result<()> {
            self.lines.push(("dtr", level));
            Ok(())
        }

        fn set_rts(&mut self, level: bool) -> Result<()> {
            self.lines.push(("rts", level));
            Ok(())
        }

        fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_readline_strips_terminators() {
        let mut t = SerialTransport::new(MockPort::with_input(b"\r\nSynchronized\r\nOK\r\n"));
        assert_eq!(t.readline(None).unwrap(), "Synchronized");
        assert_eq!(t.readline(None).unwrap(), "OK");
        assert_eq!(t.readline(None).unwrap(), "");
    }

    #[test]
    fn test_readline_returns_partial_line_on_timeout() {
        let mut t = SerialTransport::new(MockPort::with_input(b"123"));
        assert_eq!(t.readline(None).unwrap(), "123");
    }

    #[test]
    fn test_readline_lossy_utf8() {
        let mut t = SerialTransport::new(MockPort::with_input(b"a\xffb\n"));
        assert_eq!(t.readline(None).unwrap(), "a\u{fffd}b");
    }

    #[test]
    fn test_readline_restores_timeout() {
        let mut t = SerialTransport::new(MockPort::with_input(b"0\r\n"));
        t.readline(Some(Duration::from_millis(200)))
            .unwrap();
        assert_eq!(t.port().timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_write_passes_bytes_through() {
        let mut t = SerialTransport::new(MockPort::default());
        t.write(b"J\r\n").unwrap();
        assert_eq!(t.into_port().output, b"J\r\n");
    }

    #[test]
    fn test_isp_mode_without_control_is_noop() {
        let mut t = SerialTransport::new(MockPort::default());
        t.enter_isp_mode().unwrap();
        assert!(t.port().lines.is_empty());
    }

    #[test]
    fn test_isp_mode_sequence() {
        let mut t = SerialTransport::new(MockPort::with_input(b"junk"))
            .with_control(true)
            .with_settle_delay(Duration::ZERO);
        t.enter_isp_mode().unwrap();

        let port = t.into_port();
        assert_eq!(
            port.lines,
            vec![
                ("dtr", false),
                ("dtr", true),
                ("rts", true),
                ("dtr", false),
                ("rts", false),
            ]
        );
        assert!(port.input.is_empty());
    }

    #[test]
    fn test_isp_mode_reset_on_rts() {
        let mut t = SerialTransport::new(MockPort::default())
            .with_control(true)
            .with_reset_line(ResetLine::Rts)
            .with_settle_delay(Duration::ZERO);
        t.enter_isp_mode().unwrap();
        assert_eq!(t.port().lines[0], ("rts", false));
        assert_eq!(t.port().lines[2], ("dtr", true));
    }

    #[test]
    fn test_scripted_transport_runs_dry() {
        let mut t = ScriptedTransport::new(["OK"]);
        assert_eq!(t.readline(None).unwrap(), "OK");
        assert_eq!(t.readline(None).unwrap(), "");
        assert_eq!(t.remaining(), 0);
    }
}
