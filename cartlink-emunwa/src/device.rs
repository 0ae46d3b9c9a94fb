//! NWA device session: memory and control operations over one client.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, Weak};
use std::time::{Duration, Instant};

use cartlink_core::timing::{BULK_TIMEOUT, CONTROL_TIMEOUT};
use cartlink_core::{
    AddressSpace, AddressTuple, Deadline, Device, DeviceContainer, DeviceError, Field,
    MemoryReadRequest, MemoryReadResponse, MemoryWriteRequest, MemoryWriteResponse,
};
use cartlink_mapping::translate;

use crate::client::{NwaClient, Reply};

/// Dial and exchange budget for opened (non-probe) sessions.
const DEVICE_TIMEOUT: Duration = Duration::from_secs(5);

/// The NWA core memory the driver addresses; offsets are CPU-bus
/// addresses.
const MEMORY_NAME: &str = "SNES";

pub struct NwaDevice {
    client: Mutex<NwaClient>,
    /// Second socket handle so `close` can interrupt an in-flight
    /// exchange without waiting on the client mutex.
    shutdown: TcpStream,
    closed: AtomicBool,
    key: String,
    container: Weak<DeviceContainer>,
}

impl NwaDevice {
    pub(crate) fn open(
        addr: SocketAddr,
        key: &str,
        container: Weak<DeviceContainer>,
    ) -> Result<Self, DeviceError> {
        let mut client = NwaClient::new(addr, addr.to_string());
        client.connect(Instant::now() + DEVICE_TIMEOUT)?;
        let shutdown = client.try_clone_stream()?;
        Ok(Self {
            client: Mutex::new(client),
            shutdown,
            closed: AtomicBool::new(false),
            key: key.to_string(),
            container,
        })
    }

    fn with_client<T>(
        &self,
        op: impl FnOnce(&mut NwaClient) -> Result<T, DeviceError>,
    ) -> Result<T, DeviceError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DeviceError::ConnectionClosed);
        }
        let mut client = self.client.lock().unwrap();
        match op(&mut client) {
            Err(err) => {
                // A concurrent close() makes the endpoint fail under us;
                // report that as the closed session it is.
                if self.closed.load(Ordering::SeqCst) {
                    return Err(DeviceError::ConnectionClosed);
                }
                if err.is_close_worthy() {
                    let _ = client.close();
                    drop(client);
                    self.unregister();
                }
                Err(err)
            }
            ok => ok,
        }
    }

    fn unregister(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            if let Some(container) = self.container.upgrade() {
                container.remove(&self.key);
            }
        }
    }

    /// Exchange a command expecting an ASCII (possibly empty) reply.
    fn command_checked(
        client: &mut NwaClient,
        command: &str,
        deadline: Instant,
    ) -> Result<Reply, DeviceError> {
        let reply = client.send_command_wait_reply(command, deadline)?;
        if let Some(message) = reply.error() {
            return Err(DeviceError::protocol(format!(
                "{}: {message}",
                command.split_whitespace().next().unwrap_or(command)
            )));
        }
        Ok(reply)
    }
}

impl Device for NwaDevice {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn close(&self) -> Result<(), DeviceError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let result = self.shutdown.shutdown(Shutdown::Both);
        if let Some(container) = self.container.upgrade() {
            container.remove(&self.key);
        }
        match result {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotConnected => Ok(()),
            Err(err) => Err(DeviceError::from_io(err)),
        }
    }

    fn multi_read(
        &self,
        deadline: Deadline,
        reads: &[MemoryReadRequest],
    ) -> Result<Vec<MemoryReadResponse>, DeviceError> {
        let deadline = deadline.or_default(BULK_TIMEOUT);

        let mut command = format!("CORE_READ {MEMORY_NAME}");
        let mut rsp = Vec::with_capacity(reads.len());
        let mut total = 0usize;
        for read in reads {
            let address = translate(read.address, AddressSpace::SnesABus)?;
            let _ = write!(command, ";${address:x};${:x}", read.size);
            total += read.size;
            rsp.push(MemoryReadResponse {
                request_address: read.address,
                device_address: AddressTuple::new(
                    address,
                    AddressSpace::SnesABus,
                    read.address.mapping,
                ),
                data: Vec::new(),
            });
        }

        let reply = self.with_client(|client| {
            let reply = Self::command_checked(client, &command, deadline)?;
            if reply.binary.len() != total {
                return Err(DeviceError::protocol(format!(
                    "CORE_READ returned ${:x} bytes, expected ${total:x}",
                    reply.binary.len()
                )));
            }
            Ok(reply)
        })?;

        // One binary block covers the whole batch, in request order.
        let mut at = 0usize;
        for (response, read) in rsp.iter_mut().zip(reads) {
            response.data = reply.binary[at..at + read.size].to_vec();
            at += read.size;
        }
        Ok(rsp)
    }

    fn multi_write(
        &self,
        deadline: Deadline,
        writes: &[MemoryWriteRequest],
    ) -> Result<Vec<MemoryWriteResponse>, DeviceError> {
        let deadline = deadline.or_default(BULK_TIMEOUT);

        let mut command = format!("bCORE_WRITE {MEMORY_NAME}");
        let mut payload = Vec::new();
        let mut rsp = Vec::with_capacity(writes.len());
        for write in writes {
            let address = translate(write.address, AddressSpace::SnesABus)?;
            let _ = write!(command, ";${address:x};${:x}", write.data.len());
            payload.extend_from_slice(&write.data);
            rsp.push(MemoryWriteResponse {
                request_address: write.address,
                device_address: AddressTuple::new(
                    address,
                    AddressSpace::SnesABus,
                    write.address.mapping,
                ),
                size: write.data.len(),
            });
        }

        self.with_client(|client| {
            client.send_command(&command, deadline)?;
            client.send_binary(&payload, deadline)?;
            let reply = client.read_reply(deadline)?;
            if let Some(message) = reply.error() {
                return Err(DeviceError::protocol(format!("bCORE_WRITE: {message}")));
            }
            Ok(())
        })?;
        Ok(rsp)
    }

    fn reset_system(&self, deadline: Deadline) -> Result<(), DeviceError> {
        let deadline = deadline.or_default(CONTROL_TIMEOUT);
        self.with_client(|client| {
            Self::command_checked(client, "EMULATION_RESET", deadline).map(|_| ())
        })
    }

    fn pause_unpause(&self, deadline: Deadline, paused: bool) -> Result<bool, DeviceError> {
        let deadline = deadline.or_default(CONTROL_TIMEOUT);
        let command = if paused {
            "EMULATION_PAUSE"
        } else {
            "EMULATION_RESUME"
        };
        self.with_client(|client| Self::command_checked(client, command, deadline).map(|_| ()))?;
        Ok(paused)
    }

    fn fetch_fields(
        &self,
        deadline: Deadline,
        fields: &[Field],
    ) -> Result<Vec<String>, DeviceError> {
        let deadline = deadline.or_default(CONTROL_TIMEOUT);

        let wants_emulator = fields
            .iter()
            .any(|f| matches!(f, Field::DeviceName | Field::DeviceVersion));
        let wants_game = fields.iter().any(|f| matches!(f, Field::RomFileName));

        let (emulator, game) = self.with_client(|client| {
            let emulator = if wants_emulator {
                Some(Self::command_checked(client, "EMULATOR_INFO", deadline)?)
            } else {
                None
            };
            let game = if wants_game {
                Some(Self::command_checked(client, "GAME_INFO", deadline)?)
            } else {
                None
            };
            Ok((emulator, game))
        })?;

        let lookup = |reply: &Option<Reply>, key: &str| -> String {
            reply
                .as_ref()
                .and_then(|r| r.first(key))
                .unwrap_or_default()
                .to_string()
        };
        Ok(fields
            .iter()
            .map(|field| match field {
                Field::DeviceName => lookup(&emulator, "name"),
                Field::DeviceVersion => lookup(&emulator, "version"),
                Field::RomFileName => lookup(&game, "file"),
            })
            .collect())
    }

    fn nwa_command(
        &self,
        deadline: Deadline,
        command: &str,
        args: &str,
    ) -> Result<(Vec<HashMap<String, String>>, Vec<u8>), DeviceError> {
        let deadline = deadline.or_default(CONTROL_TIMEOUT);
        let line = if args.is_empty() {
            command.to_string()
        } else {
            format!("{command} {args}")
        };
        // Raw passthrough: error records travel back to the caller as-is.
        let reply = self.with_client(|client| client.send_command_wait_reply(&line, deadline))?;
        Ok((reply.records, reply.binary))
    }
}
