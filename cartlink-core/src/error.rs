use std::io;

use thiserror::Error;

/// Errors surfaced by device drivers and sessions.
///
/// The taxonomy distinguishes errors that must close the session
/// (transport loss, framing/correlation violations) from those that must
/// not (deadline expiry, untranslatable addresses, capacity limits). See
/// [`DeviceError::is_close_worthy`].
#[derive(Debug, Error)]
pub enum DeviceError {
    /// Transport-level failure: dial, read, write, or unexpected EOF.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// The session was already closed when the operation observed it.
    #[error("connection closed")]
    ConnectionClosed,

    /// A deadline expired before the exchange completed.
    #[error("operation timed out")]
    Timeout,

    /// Framing or correlation violation on the wire.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The address has no image in the requested target space.
    #[error("address ${address:06x} cannot be mapped to {space} space")]
    UnsupportedAddress { address: u32, space: &'static str },

    /// The memory mapping is unknown or does not cover the region.
    #[error("unsupported memory mapping {mapping} for ${address:06x}")]
    UnsupportedMapping { mapping: &'static str, address: u32 },

    /// A generated payload exceeded a hard transport capacity.
    #[error("capacity exceeded: {0}")]
    Overflow(String),

    /// The NMI-EXE slot did not become free within its deadline.
    #[error("NMI EXE slot unavailable {0}")]
    NmiExeUnavailable(&'static str),

    /// The back-end does not support the requested operation.
    #[error("operation not supported by this device: {0}")]
    Unsupported(&'static str),
}

impl DeviceError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn lost(msg: impl Into<String>) -> Self {
        Self::ConnectionLost(msg.into())
    }

    /// Whether this error must transition the session to Closed and
    /// unregister it before the triggering operation returns.
    pub fn is_close_worthy(&self) -> bool {
        matches!(self, Self::ConnectionLost(_) | Self::Protocol(_))
    }

    /// Classify an I/O error: timeout kinds become [`DeviceError::Timeout`]
    /// (not close-worthy), everything else is a lost connection.
    pub fn from_io(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Self::Timeout,
            _ => Self::ConnectionLost(err.to_string()),
        }
    }
}

impl From<io::Error> for DeviceError {
    fn from(err: io::Error) -> Self {
        Self::from_io(err)
    }
}

impl From<serde_json::Error> for DeviceError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(err.to_string())
    }
}

impl From<serialport::Error> for DeviceError {
    fn from(err: serialport::Error) -> Self {
        Self::ConnectionLost(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_worthiness_table() {
        assert!(DeviceError::lost("reset by peer").is_close_worthy());
        assert!(DeviceError::protocol("bad frame").is_close_worthy());

        assert!(!DeviceError::Timeout.is_close_worthy());
        assert!(!DeviceError::ConnectionClosed.is_close_worthy());
        assert!(!DeviceError::Overflow("x".into()).is_close_worthy());
        assert!(!DeviceError::NmiExeUnavailable("pre-write").is_close_worthy());
        assert!(!DeviceError::Unsupported("pause").is_close_worthy());
        assert!(!DeviceError::UnsupportedAddress {
            address: 0x2000,
            space: "fxpakpro",
        }
        .is_close_worthy());
    }

    #[test]
    fn io_timeouts_map_to_timeout() {
        let e = DeviceError::from_io(io::Error::new(io::ErrorKind::TimedOut, "t"));
        assert!(matches!(e, DeviceError::Timeout));
        let e = DeviceError::from_io(io::Error::new(io::ErrorKind::WouldBlock, "w"));
        assert!(matches!(e, DeviceError::Timeout));
        let e = DeviceError::from_io(io::Error::new(io::ErrorKind::BrokenPipe, "p"));
        assert!(matches!(e, DeviceError::ConnectionLost(_)));
    }
}
