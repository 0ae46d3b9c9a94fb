//! Blocking serial transport under absolute deadlines.

use std::io::{Read, Write};
use std::time::Instant;

use cartlink_core::deadline::remaining;
use cartlink_core::DeviceError;
use serialport::SerialPort;

/// One byte-stream endpoint. The trait is the seam between the protocol
/// engine and the serial port so tests can script exchanges in memory.
pub trait Wire: Send {
    fn write_all(&mut self, buf: &[u8], deadline: Instant) -> Result<(), DeviceError>;
    fn read_exact(&mut self, buf: &mut [u8], deadline: Instant) -> Result<(), DeviceError>;
}

/// A serial port as a [`Wire`]. The port carries a single timeout shared
/// by reads and writes, so each call re-arms it with the time remaining
/// until the absolute deadline.
pub struct SerialWire {
    port: Box<dyn SerialPort>,
}

impl SerialWire {
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self { port }
    }

    fn arm(&mut self, deadline: Instant) -> Result<(), DeviceError> {
        let left = remaining(deadline).ok_or(DeviceError::Timeout)?;
        self.port.set_timeout(left)?;
        Ok(())
    }
}

impl Wire for SerialWire {
    fn write_all(&mut self, buf: &[u8], deadline: Instant) -> Result<(), DeviceError> {
        let mut written = 0;
        while written < buf.len() {
            self.arm(deadline)?;
            match self.port.write(&buf[written..]) {
                Ok(0) => return Err(DeviceError::lost("serial port wrote zero bytes")),
                Ok(n) => written += n,
                Err(err) => return Err(DeviceError::from_io(err)),
            }
        }
        Ok(())
    }

    fn read_exact(&mut self, buf: &mut [u8], deadline: Instant) -> Result<(), DeviceError> {
        let mut filled = 0;
        while filled < buf.len() {
            self.arm(deadline)?;
            match self.port.read(&mut buf[filled..]) {
                Ok(0) => return Err(DeviceError::lost("serial port closed")),
                Ok(n) => filled += n,
                Err(err) => return Err(DeviceError::from_io(err)),
            }
        }
        Ok(())
    }
}
