//! Lua-bridge session over one accepted TCP connection.

use std::io::{BufRead, BufReader, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread;
use std::time::{Duration, Instant};

use cartlink_core::deadline::remaining;
use cartlink_core::timing::{BULK_TIMEOUT, CONTROL_TIMEOUT};
use cartlink_core::{
    AddressSpace, AddressTuple, Deadline, Device, DeviceContainer, DeviceError,
    MemoryReadRequest, MemoryReadResponse, MemoryWriteRequest, MemoryWriteResponse,
};
use cartlink_mapping::translate;

use crate::message::{self, LuaBlock, DOMAIN_SYSTEM_BUS, TYPE_PING, TYPE_READ_BLOCK, TYPE_WRITE_BLOCK};

/// Cadence of the background health ping.
const HEALTH_PING_INTERVAL: Duration = Duration::from_secs(2);

struct Transport {
    stream: TcpStream,
    reader: BufReader<TcpStream>,
}

impl Transport {
    fn arm(&mut self, deadline: Instant) -> Result<(), DeviceError> {
        let left = remaining(deadline).ok_or(DeviceError::Timeout)?;
        self.stream.set_read_timeout(Some(left))?;
        self.stream.set_write_timeout(Some(left))?;
        Ok(())
    }

    /// Write one message and read the correlated reply, all under the
    /// caller's lock.
    fn exchange(&mut self, request: &LuaBlock, deadline: Instant) -> Result<LuaBlock, DeviceError> {
        self.arm(deadline)?;
        let bytes = message::encode(request)?;
        self.stream.write_all(&bytes).map_err(DeviceError::from_io)?;

        let mut buf = Vec::new();
        let n = self
            .reader
            .read_until(0, &mut buf)
            .map_err(DeviceError::from_io)?;
        if n == 0 {
            return Err(DeviceError::lost("connection closed by peer"));
        }
        if buf.last() != Some(&0) {
            return Err(DeviceError::lost("EOF before message terminator"));
        }
        buf.pop();

        let response = message::decode(&buf)?;
        if response.id != request.id {
            return Err(DeviceError::protocol(format!(
                "response ID {} != request ID {}",
                response.id, request.id
            )));
        }
        Ok(response)
    }
}

pub struct LuaBridgeDevice {
    transport: Mutex<Transport>,
    /// Second socket handle so `close` can interrupt an in-flight
    /// exchange without waiting on the transport mutex.
    shutdown: TcpStream,
    next_id: AtomicU32,
    closed: AtomicBool,
    key: String,
    container: Weak<DeviceContainer>,
}

impl LuaBridgeDevice {
    pub(crate) fn from_stream(
        stream: TcpStream,
        key: String,
        container: Weak<DeviceContainer>,
    ) -> Result<Self, DeviceError> {
        let _ = stream.set_nodelay(true);
        let shutdown = stream.try_clone()?;
        let reader = BufReader::new(stream.try_clone()?);
        Ok(Self {
            transport: Mutex::new(Transport { stream, reader }),
            shutdown,
            next_id: AtomicU32::new(0),
            closed: AtomicBool::new(false),
            key,
            container,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    fn next_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn with_transport<T>(
        &self,
        op: impl FnOnce(&mut Transport, &dyn Fn() -> u32) -> Result<T, DeviceError>,
    ) -> Result<T, DeviceError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DeviceError::ConnectionClosed);
        }
        let mut transport = self.transport.lock().unwrap();
        let fresh_id = || self.next_id();
        match op(&mut transport, &fresh_id) {
            Err(err) => {
                if self.closed.load(Ordering::SeqCst) {
                    return Err(DeviceError::ConnectionClosed);
                }
                if err.is_close_worthy() {
                    drop(transport);
                    let _ = self.close();
                }
                Err(err)
            }
            ok => ok,
        }
    }

    /// One ping/pong with ID correlation.
    pub fn ping(&self, deadline: Deadline) -> Result<(), DeviceError> {
        let deadline = deadline.or_default(CONTROL_TIMEOUT);
        self.with_transport(|transport, fresh_id| {
            let request = LuaBlock {
                id: fresh_id(),
                kind: TYPE_PING,
                ..Default::default()
            };
            transport.exchange(&request, deadline).map(|_| ())
        })
    }
}

impl Device for LuaBridgeDevice {
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

        let mut rsp = Vec::with_capacity(reads.len());
        for read in reads {
            let address = translate(read.address, AddressSpace::SnesABus)?;
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

        self.with_transport(|transport, fresh_id| {
            for (response, read) in rsp.iter_mut().zip(reads) {
                let request = LuaBlock {
                    id: fresh_id(),
                    kind: TYPE_READ_BLOCK,
                    address: response.device_address.address,
                    domain: DOMAIN_SYSTEM_BUS.to_string(),
                    value: read.size as u32,
                    ..Default::default()
                };
                let reply = transport.exchange(&request, deadline)?;
                if reply.block.len() != read.size {
                    return Err(DeviceError::protocol(format!(
                        "read reply carried ${:x} bytes, expected ${:x}",
                        reply.block.len(),
                        read.size
                    )));
                }
                response.data = reply.block;
            }
            Ok(())
        })?;
        Ok(rsp)
    }

    fn multi_write(
        &self,
        deadline: Deadline,
        writes: &[MemoryWriteRequest],
    ) -> Result<Vec<MemoryWriteResponse>, DeviceError> {
        let deadline = deadline.or_default(BULK_TIMEOUT);

        let mut rsp = Vec::with_capacity(writes.len());
        for write in writes {
            let address = translate(write.address, AddressSpace::SnesABus)?;
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

        self.with_transport(|transport, fresh_id| {
            for (response, write) in rsp.iter().zip(writes) {
                let request = LuaBlock {
                    id: fresh_id(),
                    kind: TYPE_WRITE_BLOCK,
                    address: response.device_address.address,
                    domain: DOMAIN_SYSTEM_BUS.to_string(),
                    value: write.data.len() as u32,
                    block: write.data.clone(),
                    ..Default::default()
                };
                transport.exchange(&request, deadline)?;
            }
            Ok(())
        })?;
        Ok(rsp)
    }
}

/// Ping the session every two seconds; reading is the only reliable way
/// to notice a dropped emulator. Any failure closes the session and ends
/// the loop.
pub(crate) fn spawn_health_loop(device: &Arc<LuaBridgeDevice>) {
    let weak = Arc::downgrade(device);
    let key = device.key.clone();
    let spawned = thread::Builder::new()
        .name(format!("luabridge-ping-{key}"))
        .spawn(move || loop {
            thread::sleep(HEALTH_PING_INTERVAL);
            let Some(device) = weak.upgrade() else {
                return;
            };
            if device.is_closed() {
                return;
            }
            if let Err(err) = device.ping(Deadline::none()) {
                log::debug!("luabridge: health ping for '{key}': {err}");
                let _ = device.close();
                return;
            }
        });
    if let Err(err) = spawned {
        log::warn!("luabridge: could not spawn health loop: {err}");
    }
}
