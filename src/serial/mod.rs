pub mod commands;
pub mod framing;
pub mod interface;
pub mod parser;
pub mod protocol;
pub mod scripted;

pub use commands::{CommandTemplate, ListenClass, TemplateError};
pub use framing::LineAccumulator;
pub use interface::SerialInterface;
pub use protocol::{IpxProtocol, ProtocolError};
pub use scripted::ScriptedPort;

use serialport::{ClearBuffer, SerialPort};

/// Sensor identifier as printed by the firmware. `0` addresses every sensor on the bus.
pub type Uid = u64;

/// Broadcast address, only valid for `list_uids`.
pub const BROADCAST_UID: Uid = 0;

#[derive(Debug, thiserror::Error)]
pub enum SerialError {
    #[error("Serial port is not open")]
    NotConnected,

    #[error("No response from device")]
    NoResponse,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Communication timeout")]
    Timeout,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialport error: {0}")]
    SerialportError(#[from] serialport::Error),
}

pub type Result<T> = std::result::Result<T, SerialError>;

/// Minimal byte-level access to a serial channel.
///
/// Implemented for real ports and for [`ScriptedPort`], which lets the whole
/// protocol stack run without hardware.
pub trait SerialPortIO: Send {
    fn write_bytes(&mut self, data: &[u8]) -> Result<()>;
    fn flush_output(&mut self) -> Result<()>;
    /// Number of bytes that can be read without blocking.
    fn bytes_available(&mut self) -> Result<usize>;
    /// Read whatever is available into `buf`, returning the count (0 when nothing arrived).
    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize>;
    /// Discard anything sitting in the input buffer.
    fn clear_input(&mut self) -> Result<()>;
}

impl SerialPortIO for Box<dyn SerialPort> {
    fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        std::io::Write::write_all(self.as_mut(), data)?;
        Ok(())
    }

    fn flush_output(&mut self) -> Result<()> {
        std::io::Write::flush(self.as_mut())?;
        Ok(())
    }

    fn bytes_available(&mut self) -> Result<usize> {
        Ok(self.bytes_to_read()? as usize)
    }

    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize> {
        match std::io::Read::read(self.as_mut(), buf) {
            Ok(n) => Ok(n),
            Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(SerialError::IoError(e)),
        }
    }

    fn clear_input(&mut self) -> Result<()> {
        self.clear(ClearBuffer::Input)?;
        Ok(())
    }
}
