//! NWA line-protocol client: command writer and reply codec.
//!
//! Requests are ASCII lines. A reply is classified by its first byte: a
//! `\n` opens an ASCII block of `key:value` lines terminated by a blank
//! line, a `\0` opens a binary block prefixed with a big-endian u32
//! length. The codec never consumes past the active reply's terminator.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Instant;

use cartlink_core::deadline::remaining;
use cartlink_core::DeviceError;

/// Upper bound on a binary reply; anything larger is a framing error.
const MAX_BINARY_REPLY: usize = 1 << 24;

/// A parsed NWA reply: ASCII records, or a binary payload, or (for an
/// empty success reply) neither.
#[derive(Debug, Default)]
pub struct Reply {
    pub records: Vec<HashMap<String, String>>,
    pub binary: Vec<u8>,
}

impl Reply {
    /// The device-reported error, if the reply is an error record.
    pub fn error(&self) -> Option<&str> {
        self.records.first()?.get("error").map(String::as_str)
    }

    /// First record's value for `key`.
    pub fn first(&self, key: &str) -> Option<&str> {
        self.records.first()?.get(key).map(String::as_str)
    }
}

/// One NWA TCP connection with explicit connect/close state.
pub struct NwaClient {
    addr: SocketAddr,
    name: String,
    stream: Option<TcpStream>,
    reader: Option<BufReader<TcpStream>>,
    is_connected: bool,
    is_closed: bool,
}

impl NwaClient {
    pub fn new(addr: SocketAddr, name: String) -> Self {
        Self {
            addr,
            name,
            stream: None,
            reader: None,
            is_connected: false,
            is_closed: false,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_connected(&self) -> bool {
        self.is_connected
    }

    pub fn is_closed(&self) -> bool {
        self.is_closed
    }

    pub fn connect(&mut self, deadline: Instant) -> Result<(), DeviceError> {
        self.is_closed = false;
        let timeout = remaining(deadline).ok_or(DeviceError::Timeout)?;
        let stream = TcpStream::connect_timeout(&self.addr, timeout)
            .map_err(|err| DeviceError::lost(format!("dial {}: {err}", self.addr)))?;
        let _ = stream.set_nodelay(true);
        self.reader = Some(BufReader::new(stream.try_clone()?));
        self.stream = Some(stream);
        self.is_connected = true;
        Ok(())
    }

    pub fn close(&mut self) -> Result<(), DeviceError> {
        self.is_closed = true;
        self.is_connected = false;
        self.reader = None;
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        Ok(())
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.stream.as_ref()?.local_addr().ok()
    }

    /// A second handle on the socket, for shutdown from another thread.
    pub fn try_clone_stream(&self) -> Result<TcpStream, DeviceError> {
        let stream = self
            .stream
            .as_ref()
            .ok_or(DeviceError::ConnectionClosed)?;
        Ok(stream.try_clone()?)
    }

    fn stream(&mut self) -> Result<&mut TcpStream, DeviceError> {
        self.stream.as_mut().ok_or(DeviceError::ConnectionClosed)
    }

    fn arm(&mut self, deadline: Instant) -> Result<(), DeviceError> {
        let left = remaining(deadline).ok_or(DeviceError::Timeout)?;
        let stream = self.stream()?;
        stream.set_read_timeout(Some(left))?;
        stream.set_write_timeout(Some(left))?;
        Ok(())
    }

    /// Send `COMMAND [ARG...]\n`.
    pub fn send_command(&mut self, command: &str, deadline: Instant) -> Result<(), DeviceError> {
        self.arm(deadline)?;
        let line = format!("{command}\n");
        self.stream()?
            .write_all(line.as_bytes())
            .map_err(DeviceError::from_io)
    }

    /// Send the binary block that follows a `b`-prefixed command:
    /// `\0`, u32 BE length, payload.
    pub fn send_binary(&mut self, payload: &[u8], deadline: Instant) -> Result<(), DeviceError> {
        self.arm(deadline)?;
        let mut block = Vec::with_capacity(5 + payload.len());
        block.push(0);
        block.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        block.extend_from_slice(payload);
        self.stream()?
            .write_all(&block)
            .map_err(DeviceError::from_io)
    }

    /// Read and classify one reply.
    pub fn read_reply(&mut self, deadline: Instant) -> Result<Reply, DeviceError> {
        self.arm(deadline)?;
        let reader = self.reader.as_mut().ok_or(DeviceError::ConnectionClosed)?;
        read_reply_from(reader)
    }

    pub fn send_command_wait_reply(
        &mut self,
        command: &str,
        deadline: Instant,
    ) -> Result<Reply, DeviceError> {
        self.send_command(command, deadline)?;
        self.read_reply(deadline)
    }
}

/// Decode one reply from a buffered stream.
pub fn read_reply_from<R: BufRead>(reader: &mut R) -> Result<Reply, DeviceError> {
    let mut first = [0u8; 1];
    reader.read_exact(&mut first).map_err(DeviceError::from_io)?;

    match first[0] {
        0 => {
            let mut len = [0u8; 4];
            reader.read_exact(&mut len).map_err(DeviceError::from_io)?;
            let len = u32::from_be_bytes(len) as usize;
            if len > MAX_BINARY_REPLY {
                return Err(DeviceError::protocol(format!(
                    "oversized binary reply: {len} bytes"
                )));
            }
            let mut binary = vec![0u8; len];
            reader
                .read_exact(&mut binary)
                .map_err(DeviceError::from_io)?;
            Ok(Reply {
                records: Vec::new(),
                binary,
            })
        }
        b'\n' => {
            let mut records: Vec<HashMap<String, String>> = Vec::new();
            loop {
                let mut line = String::new();
                let n = reader.read_line(&mut line).map_err(DeviceError::from_io)?;
                if n == 0 {
                    return Err(DeviceError::lost("EOF inside ASCII reply"));
                }
                let line = line.trim_end_matches(['\n', '\r']);
                if line.is_empty() {
                    break;
                }
                let (key, value) = line.split_once(':').ok_or_else(|| {
                    DeviceError::protocol(format!("malformed reply line: '{line}'"))
                })?;
                push_kv(&mut records, key, value);
            }
            Ok(Reply {
                records,
                binary: Vec::new(),
            })
        }
        other => Err(DeviceError::protocol(format!(
            "reply is neither ASCII nor binary (first byte ${other:02x})"
        ))),
    }
}

/// A repeated key opens a new record; that is how NWA expresses lists.
fn push_kv(records: &mut Vec<HashMap<String, String>>, key: &str, value: &str) {
    match records.last_mut() {
        Some(record) if !record.contains_key(key) => {
            record.insert(key.to_string(), value.to_string());
        }
        _ => {
            let mut record = HashMap::new();
            record.insert(key.to_string(), value.to_string());
            records.push(record);
        }
    }
}

/// A probe whose own local endpoint equals one of the sweep targets has
/// connected back into this process; tear it down.
pub fn detect_loopback(local: SocketAddr, targets: &[SocketAddr]) -> bool {
    targets
        .iter()
        .any(|t| t.port() == local.port() && t.ip() == local.ip())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn ascii_reply_parses_key_values() {
        let mut cursor = Cursor::new(b"\nname:snes9x\nversion:1.62\n\n".to_vec());
        let reply = read_reply_from(&mut cursor).unwrap();
        assert_eq!(reply.records.len(), 1);
        assert_eq!(reply.first("name"), Some("snes9x"));
        assert_eq!(reply.first("version"), Some("1.62"));
        assert!(reply.binary.is_empty());
        // Nothing past the terminator was consumed.
        assert_eq!(cursor.position() as usize, cursor.get_ref().len());
    }

    #[test]
    fn repeated_keys_open_new_records() {
        let data = b"\nname:WRAM\naccess:rw\nname:SRAM\naccess:rw\n\n".to_vec();
        let reply = read_reply_from(&mut Cursor::new(data)).unwrap();
        assert_eq!(reply.records.len(), 2);
        assert_eq!(reply.records[0]["name"], "WRAM");
        assert_eq!(reply.records[1]["name"], "SRAM");
    }

    #[test]
    fn empty_ascii_reply_is_success() {
        let reply = read_reply_from(&mut Cursor::new(b"\n\n".to_vec())).unwrap();
        assert!(reply.records.is_empty());
        assert!(reply.error().is_none());
    }

    #[test]
    fn binary_reply_reads_exact_length() {
        let mut data = vec![0u8, 0, 0, 0, 5];
        data.extend_from_slice(&[1, 2, 3, 4, 5]);
        data.extend_from_slice(b"\nname:next\n\n"); // the next reply
        let mut cursor = Cursor::new(data);
        let reply = read_reply_from(&mut cursor).unwrap();
        assert_eq!(reply.binary, vec![1, 2, 3, 4, 5]);
        assert_eq!(cursor.position(), 10);
    }

    #[test]
    fn garbage_classification_byte_is_a_protocol_error() {
        let err = read_reply_from(&mut Cursor::new(b"xnope\n".to_vec())).unwrap_err();
        assert!(matches!(err, DeviceError::Protocol(_)));
    }

    #[test]
    fn truncated_binary_reply_is_connection_loss() {
        let data = vec![0u8, 0, 0, 0, 10, 1, 2];
        let err = read_reply_from(&mut Cursor::new(data)).unwrap_err();
        assert!(matches!(err, DeviceError::ConnectionLost(_)));
    }

    #[test]
    fn error_record_is_surfaced() {
        let data = b"\nerror:invalid command\n\n".to_vec();
        let reply = read_reply_from(&mut Cursor::new(data)).unwrap();
        assert_eq!(reply.error(), Some("invalid command"));
    }

    #[test]
    fn loopback_matches_any_target() {
        let targets: Vec<SocketAddr> = vec![
            "127.0.0.1:65400".parse().unwrap(),
            "127.0.0.1:65401".parse().unwrap(),
        ];
        assert!(detect_loopback("127.0.0.1:65401".parse().unwrap(), &targets));
        assert!(!detect_loopback("127.0.0.1:50000".parse().unwrap(), &targets));
        assert!(!detect_loopback("10.1.2.3:65400".parse().unwrap(), &targets));
    }
}
