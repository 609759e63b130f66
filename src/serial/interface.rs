use std::thread;
use std::time::{Duration, Instant};

use serialport::{DataBits, Parity, StopBits};

use super::framing::{contains_terminator, LineAccumulator};
use super::{Result, SerialError, SerialPortIO};

pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(10);
const READ_CHUNK: usize = 1024;

/// Owned serial channel. The port closes when the interface is dropped.
pub struct SerialInterface {
    port: Option<Box<dyn SerialPortIO>>,
    port_name: Option<String>,
    read_timeout: Duration,
}

impl SerialInterface {
    pub fn new() -> Self {
        Self {
            port: None,
            port_name: None,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    /// Open `port_name` at `baud_rate` (8N1) and return the connected interface.
    pub fn open(port_name: &str, baud_rate: u32, read_timeout: Duration) -> Result<Self> {
        let mut interface = Self::new();
        interface.read_timeout = read_timeout;
        interface.connect(port_name, baud_rate)?;
        Ok(interface)
    }

    /// Wrap an already open channel, e.g. a [`super::ScriptedPort`].
    pub fn from_io(io: Box<dyn SerialPortIO>) -> Self {
        Self {
            port: Some(io),
            port_name: Some("<in-memory>".to_string()),
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    /// Connect to a port, closing any previous one first
    pub fn connect(&mut self, port_name: &str, baud_rate: u32) -> Result<()> {
        self.disconnect();

        let port = serialport::new(port_name, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .timeout(self.read_timeout)
            .open()
            .map_err(|e| SerialError::ConnectionFailed(format!("{}: {}", port_name, e)))?;

        self.port = Some(Box::new(port));
        self.port_name = Some(port_name.to_string());

        log::info!("Connected to {} at {} baud", port_name, baud_rate);
        Ok(())
    }

    /// Close the current port
    pub fn disconnect(&mut self) {
        if self.port.take().is_some() {
            if let Some(name) = &self.port_name {
                log::info!("Closed serial port {}", name);
            }
        }
        self.port_name = None;
    }

    pub fn port_name(&self) -> Option<&str> {
        self.port_name.as_deref()
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    pub fn set_read_timeout(&mut self, timeout: Duration) {
        self.read_timeout = timeout;
    }

    fn port_mut(&mut self) -> Result<&mut Box<dyn SerialPortIO>> {
        self.port.as_mut().ok_or(SerialError::NotConnected)
    }

    /// Drop unread input, e.g. a late reply to an earlier request
    pub fn clear_input(&mut self) -> Result<()> {
        self.port_mut()?.clear_input()
    }

    /// Send raw bytes to the device
    pub fn send_data(&mut self, data: &[u8]) -> Result<usize> {
        let port = self.port_mut()?;
        port.write_bytes(data)?;
        port.flush_output()?;
        Ok(data.len())
    }

    /// Read whatever arrives first within `timeout`
    pub fn read_data(&mut self, buffer: &mut [u8], timeout: Duration) -> Result<usize> {
        let port = self.port_mut()?;
        let deadline = Instant::now() + timeout;

        loop {
            if port.bytes_available()? > 0 {
                let n = port.read_available(buffer)?;
                if n > 0 {
                    return Ok(n);
                }
            }
            if Instant::now() >= deadline {
                return Err(SerialError::Timeout);
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Write `command` and collect the reply as one frame.
    ///
    /// The frame starts with the first byte received (waiting up to the read
    /// timeout) and ends once nothing has arrived for `idle_timeout`, or once a
    /// complete line containing `terminator` has been read and the bytes that
    /// were waiting alongside it are drained.
    pub fn send_and_collect(
        &mut self,
        command: &str,
        idle_timeout: Duration,
        terminator: Option<&str>,
    ) -> Result<Vec<u8>> {
        let read_timeout = self.read_timeout;
        let port = self.port_mut()?;

        port.clear_input()?;
        port.write_bytes(command.as_bytes())?;
        port.flush_output()?;
        log::debug!("-> {}", command.trim_end());

        let mut raw = Vec::new();
        let mut lines = LineAccumulator::new();
        let mut chunk = [0u8; READ_CHUNK];

        // First byte
        let started = Instant::now();
        while port.bytes_available()? == 0 {
            if started.elapsed() >= read_timeout {
                log::warn!("No response to '{}'", command.trim_end());
                return Err(SerialError::NoResponse);
            }
            thread::sleep(POLL_INTERVAL);
        }

        let mut stop = false;
        let mut last_byte = Instant::now();
        loop {
            // Bytes already waiting belong to this frame even when the
            // terminator shows up part way through them.
            let mut received = false;
            let mut pending = port.bytes_available()?;
            while pending > 0 {
                let want = pending.min(READ_CHUNK);
                let n = port.read_available(&mut chunk[..want])?;
                if n == 0 {
                    break;
                }
                received = true;
                raw.extend_from_slice(&chunk[..n]);
                stop |= log_lines(&lines.push(&chunk[..n]), terminator);
                pending -= n.min(pending);
                if pending == 0 && !stop {
                    pending = port.bytes_available()?;
                }
            }

            if stop {
                break;
            }
            if received {
                last_byte = Instant::now();
            } else if last_byte.elapsed() > idle_timeout {
                break;
            }
            thread::sleep(POLL_INTERVAL);
        }

        if !lines.partial().is_empty() {
            log::debug!("<- {}", lines.partial());
        }
        if raw.is_empty() {
            return Err(SerialError::NoResponse);
        }
        Ok(raw)
    }
}

fn log_lines(lines: &[String], terminator: Option<&str>) -> bool {
    for line in lines {
        log::debug!("<- {}", line);
    }
    let hit = contains_terminator(lines, terminator);
    if hit {
        log::debug!("Terminator received, closing frame");
    }
    hit
}

impl Default for SerialInterface {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SerialInterface {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::ScriptedPort;

    #[test]
    fn test_closed_interface_rejects_commands() {
        let mut interface = SerialInterface::new();
        let err = interface
            .send_and_collect("op ipx 0 list_uids\n", Duration::from_millis(10), None)
            .unwrap_err();
        assert!(matches!(err, SerialError::NotConnected));
    }

    #[test]
    fn test_silence_is_no_response() {
        let port = ScriptedPort::new();
        let mut interface = SerialInterface::from_io(Box::new(port));
        interface.set_read_timeout(Duration::from_millis(30));
        let err = interface
            .send_and_collect("op ipx 5 get_status\n", Duration::from_millis(10), None)
            .unwrap_err();
        assert!(matches!(err, SerialError::NoResponse));
    }

    #[test]
    fn test_collects_until_idle() {
        let port = ScriptedPort::new();
        port.reply_next(&["Status\n", "Gain: 3\n", "Axis: 1\n"]);
        let mut interface = SerialInterface::from_io(Box::new(port.clone()));
        let raw = interface
            .send_and_collect("op ipx 5 get_status\n", Duration::from_millis(40), None)
            .unwrap();
        assert_eq!(raw, b"Status\nGain: 3\nAxis: 1\n");
        assert_eq!(port.written(), vec!["op ipx 5 get_status\n".to_string()]);
    }

    #[test]
    fn test_stale_input_is_discarded() {
        let port = ScriptedPort::new();
        port.inject_stale(b"leftover from last command\n");
        port.reply_next(&["fresh\n"]);
        let mut interface = SerialInterface::from_io(Box::new(port));
        let raw = interface
            .send_and_collect("op ipx 0 list_uids\n", Duration::from_millis(20), None)
            .unwrap();
        assert_eq!(raw, b"fresh\n");
    }

    #[test]
    fn test_drop_closes_port() {
        let port = ScriptedPort::new();
        {
            let _interface = SerialInterface::from_io(Box::new(port.clone()));
            assert!(!port.is_closed());
        }
        assert!(port.is_closed());
    }
}
