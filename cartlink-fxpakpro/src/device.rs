//! FX Pak Pro session: the VGET/VPUT memory engine over one serial port.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, Weak};
use std::time::Instant;

use cartlink_core::timing::{BULK_TIMEOUT, CONTROL_TIMEOUT};
use cartlink_core::{
    AddressSpace, AddressTuple, Deadline, Device, DeviceContainer, DeviceError, DirEntry, Field,
    MemoryReadRequest, MemoryReadResponse, MemoryWriteRequest, MemoryWriteResponse,
};
use cartlink_mapping::translate;

use crate::fs;
use crate::protocol::{self, flags, Opcode, Space};
use crate::wire::Wire;
use crate::wram;

/// Issue one VGET for up to eight `(addr, size)` chunks and return the
/// concatenated chunk data.
pub(crate) fn vget(
    wire: &mut dyn Wire,
    space: Space,
    chunks: &[(u32, u8)],
    deadline: Instant,
) -> Result<Vec<u8>, DeviceError> {
    debug_assert!(!chunks.is_empty() && chunks.len() <= protocol::MAX_CHUNKS);

    let mut frame = protocol::command_frame(Opcode::Vget, space, flags::DATA64B | flags::NORESP);
    let mut total = 0usize;
    for (i, &(addr, size)) in chunks.iter().enumerate() {
        protocol::put_chunk_entry(&mut frame, i, size, addr);
        total += size as usize;
    }

    wire.write_all(&frame, deadline)?;

    // The reply is raw chunk data padded out to whole 64-byte packets.
    let mut data = vec![0u8; protocol::aligned64(total)];
    wire.read_exact(&mut data, deadline)?;
    data.truncate(total);
    Ok(data)
}

/// Issue one VPUT for up to eight `(addr, payload)` chunks.
pub(crate) fn vput(
    wire: &mut dyn Wire,
    space: Space,
    chunks: &[(u32, &[u8])],
    deadline: Instant,
) -> Result<(), DeviceError> {
    debug_assert!(!chunks.is_empty() && chunks.len() <= protocol::MAX_CHUNKS);

    let mut frame = protocol::command_frame(Opcode::Vput, space, flags::DATA64B | flags::NORESP);
    let mut total = 0usize;
    for (i, &(addr, data)) in chunks.iter().enumerate() {
        debug_assert!(data.len() <= protocol::MAX_CHUNK_SIZE);
        protocol::put_chunk_entry(&mut frame, i, data.len() as u8, addr);
        total += data.len();
    }

    wire.write_all(&frame, deadline)?;

    let mut payload = vec![0u8; protocol::aligned64(total)];
    let mut at = 0;
    for &(_, data) in chunks {
        payload[at..at + data.len()].copy_from_slice(data);
        at += data.len();
    }
    wire.write_all(&payload, deadline)?;
    Ok(())
}

/// Split a device address into its subspace bucket: addresses with high
/// byte `$01` target CMD space after masking to 24 bits.
fn classify(addr: u32) -> (usize, u32) {
    if addr >> 24 == 0x01 {
        (1, addr & 0x00FF_FFFF)
    } else {
        (0, addr)
    }
}

const BUCKET_SPACES: [Space; 2] = [Space::Snes, Space::Cmd];

struct ReadChunk {
    req: usize,
    offset: usize,
    addr: u32,
    size: u8,
}

struct WriteChunk {
    req: usize,
    offset: usize,
    len: usize,
    addr: u32,
}

/// One open FX Pak Pro session.
///
/// All wire access serializes through the transport mutex; a full
/// `multi_read`/`multi_write` sequence (including the NMI-EXE polls of a
/// WRAM write) runs under a single acquisition.
pub struct FxPakDevice {
    wire: Mutex<Option<Box<dyn Wire>>>,
    closed: AtomicBool,
    key: String,
    container: Weak<DeviceContainer>,
}

impl FxPakDevice {
    pub(crate) fn new(
        wire: Box<dyn Wire>,
        key: String,
        container: Weak<DeviceContainer>,
    ) -> Self {
        Self {
            wire: Mutex::new(Some(wire)),
            closed: AtomicBool::new(false),
            key,
            container,
        }
    }

    /// Run `op` holding the transport lock. A close-worthy failure drops
    /// the port and unregisters the session before the error returns.
    fn with_wire<T>(
        &self,
        op: impl FnOnce(&mut dyn Wire) -> Result<T, DeviceError>,
    ) -> Result<T, DeviceError> {
        let mut guard = self.wire.lock().unwrap();
        let wire = guard.as_mut().ok_or(DeviceError::ConnectionClosed)?;
        match op(wire.as_mut()) {
            Err(err) if err.is_close_worthy() => {
                guard.take();
                drop(guard);
                self.mark_closed();
                Err(err)
            }
            result => result,
        }
    }

    fn mark_closed(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            if let Some(container) = self.container.upgrade() {
                container.remove(&self.key);
            }
        }
    }

    /// Translate every request address up front and build the response
    /// records carrying the device addresses.
    fn translate_reads(
        &self,
        reads: &[MemoryReadRequest],
    ) -> Result<Vec<MemoryReadResponse>, DeviceError> {
        reads
            .iter()
            .map(|read| {
                let address = translate(read.address, AddressSpace::FxPakPro)?;
                Ok(MemoryReadResponse {
                    request_address: read.address,
                    device_address: AddressTuple::new(
                        address,
                        AddressSpace::FxPakPro,
                        read.address.mapping,
                    ),
                    data: vec![0u8; read.size],
                })
            })
            .collect()
    }
}

fn multi_read_locked(
    wire: &mut dyn Wire,
    deadline: Instant,
    reads: &[MemoryReadRequest],
    rsp: &mut [MemoryReadResponse],
) -> Result<(), DeviceError> {
    let mut pending: [Vec<ReadChunk>; 2] = [Vec::with_capacity(8), Vec::with_capacity(8)];

    fn flush(
        wire: &mut dyn Wire,
        space: Space,
        chunks: &mut Vec<ReadChunk>,
        rsp: &mut [MemoryReadResponse],
        deadline: Instant,
    ) -> Result<(), DeviceError> {
        let table: Vec<(u32, u8)> = chunks.iter().map(|c| (c.addr, c.size)).collect();
        let data = vget(wire, space, &table, deadline)?;
        let mut at = 0;
        for chunk in chunks.drain(..) {
            let size = chunk.size as usize;
            rsp[chunk.req].data[chunk.offset..chunk.offset + size]
                .copy_from_slice(&data[at..at + size]);
            at += size;
        }
        Ok(())
    }

    for (j, read) in reads.iter().enumerate() {
        let (bucket, start) = classify(rsp[j].device_address.address);

        let mut addr = start;
        let mut offset = 0usize;
        let mut left = read.size;
        while left > 0 {
            let size = left.min(protocol::MAX_CHUNK_SIZE);
            pending[bucket].push(ReadChunk {
                req: j,
                offset,
                addr,
                size: size as u8,
            });
            if pending[bucket].len() == protocol::MAX_CHUNKS {
                flush(wire, BUCKET_SPACES[bucket], &mut pending[bucket], rsp, deadline)?;
            }
            addr += size as u32;
            offset += size;
            left -= size;
        }
    }

    for bucket in 0..2 {
        if !pending[bucket].is_empty() {
            flush(wire, BUCKET_SPACES[bucket], &mut pending[bucket], rsp, deadline)?;
        }
    }
    Ok(())
}

fn multi_write_locked(
    wire: &mut dyn Wire,
    deadline: Instant,
    writes: &[MemoryWriteRequest],
    rsp: &[MemoryWriteResponse],
) -> Result<(), DeviceError> {
    let mut pending: [Vec<WriteChunk>; 2] = [Vec::with_capacity(8), Vec::with_capacity(8)];
    // WRAM is unreachable from the cartridge bus; those writes detour
    // through the NMI-EXE trampoline after the normal chunk pipeline.
    let mut wram_writes: Vec<(u32, &[u8])> = Vec::new();

    fn flush(
        wire: &mut dyn Wire,
        space: Space,
        chunks: &mut Vec<WriteChunk>,
        writes: &[MemoryWriteRequest],
        deadline: Instant,
    ) -> Result<(), DeviceError> {
        let table: Vec<(u32, &[u8])> = chunks
            .iter()
            .map(|c| {
                (
                    c.addr,
                    &writes[c.req].data[c.offset..c.offset + c.len],
                )
            })
            .collect();
        vput(wire, space, &table, deadline)?;
        chunks.clear();
        Ok(())
    }

    for (j, write) in writes.iter().enumerate() {
        let start = rsp[j].device_address.address;

        if (wram::WRAM_BASE..wram::WRAM_END).contains(&start) {
            if !write.data.is_empty() {
                wram_writes.push((start, write.data.as_slice()));
            }
            continue;
        }

        let (bucket, start) = classify(start);
        let mut addr = start;
        let mut offset = 0usize;
        let mut left = write.data.len();
        while left > 0 {
            let len = left.min(protocol::MAX_CHUNK_SIZE);
            pending[bucket].push(WriteChunk {
                req: j,
                offset,
                len,
                addr,
            });
            if pending[bucket].len() == protocol::MAX_CHUNKS {
                flush(wire, BUCKET_SPACES[bucket], &mut pending[bucket], writes, deadline)?;
            }
            addr += len as u32;
            offset += len;
            left -= len;
        }
    }

    for bucket in 0..2 {
        if !pending[bucket].is_empty() {
            flush(wire, BUCKET_SPACES[bucket], &mut pending[bucket], writes, deadline)?;
        }
    }

    if !wram_writes.is_empty() {
        wram::execute(wire, deadline, &wram_writes)?;
    }
    Ok(())
}

impl Device for FxPakDevice {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn close(&self) -> Result<(), DeviceError> {
        // Dropping the port handle releases it for the next open.
        self.wire.lock().unwrap().take();
        self.mark_closed();
        Ok(())
    }

    fn multi_read(
        &self,
        deadline: Deadline,
        reads: &[MemoryReadRequest],
    ) -> Result<Vec<MemoryReadResponse>, DeviceError> {
        let deadline = deadline.or_default(BULK_TIMEOUT);
        let mut rsp = self.translate_reads(reads)?;
        self.with_wire(|wire| multi_read_locked(wire, deadline, reads, &mut rsp))?;
        Ok(rsp)
    }

    fn multi_write(
        &self,
        deadline: Deadline,
        writes: &[MemoryWriteRequest],
    ) -> Result<Vec<MemoryWriteResponse>, DeviceError> {
        let deadline = deadline.or_default(BULK_TIMEOUT);
        let rsp: Vec<MemoryWriteResponse> = writes
            .iter()
            .map(|write| {
                let address = translate(write.address, AddressSpace::FxPakPro)?;
                Ok(MemoryWriteResponse {
                    request_address: write.address,
                    device_address: AddressTuple::new(
                        address,
                        AddressSpace::FxPakPro,
                        write.address.mapping,
                    ),
                    size: write.data.len(),
                })
            })
            .collect::<Result<_, DeviceError>>()?;
        self.with_wire(|wire| multi_write_locked(wire, deadline, writes, &rsp))?;
        Ok(rsp)
    }

    fn reset_system(&self, deadline: Deadline) -> Result<(), DeviceError> {
        let deadline = deadline.or_default(CONTROL_TIMEOUT);
        self.with_wire(|wire| {
            let frame = protocol::command_frame(Opcode::Reset, Space::Snes, flags::NORESP);
            wire.write_all(&frame, deadline)
        })
    }

    fn reset_to_menu(&self, deadline: Deadline) -> Result<(), DeviceError> {
        let deadline = deadline.or_default(CONTROL_TIMEOUT);
        self.with_wire(|wire| {
            let frame = protocol::command_frame(Opcode::MenuReset, Space::Snes, flags::NORESP);
            wire.write_all(&frame, deadline)
        })
    }

    fn fetch_fields(
        &self,
        deadline: Deadline,
        fields: &[Field],
    ) -> Result<Vec<String>, DeviceError> {
        let deadline = deadline.or_default(CONTROL_TIMEOUT);
        let info = self.with_wire(|wire| fs::info(wire, deadline))?;
        Ok(fields
            .iter()
            .map(|field| match field {
                Field::DeviceName => info.device_name.clone(),
                Field::DeviceVersion => info.version.clone(),
                Field::RomFileName => info.rom_file_name.clone(),
            })
            .collect())
    }

    fn read_directory(
        &self,
        deadline: Deadline,
        path: &str,
    ) -> Result<Vec<DirEntry>, DeviceError> {
        let deadline = deadline.or_default(CONTROL_TIMEOUT);
        self.with_wire(|wire| fs::list_directory(wire, path, deadline))
    }

    fn make_directory(&self, deadline: Deadline, path: &str) -> Result<(), DeviceError> {
        let deadline = deadline.or_default(CONTROL_TIMEOUT);
        self.with_wire(|wire| fs::make_directory(wire, path, deadline))
    }

    fn remove_file(&self, deadline: Deadline, path: &str) -> Result<(), DeviceError> {
        let deadline = deadline.or_default(CONTROL_TIMEOUT);
        self.with_wire(|wire| fs::remove(wire, path, deadline))
    }

    fn rename_file(
        &self,
        deadline: Deadline,
        path: &str,
        new_filename: &str,
    ) -> Result<(), DeviceError> {
        let deadline = deadline.or_default(CONTROL_TIMEOUT);
        self.with_wire(|wire| fs::rename(wire, path, new_filename, deadline))
    }

    fn put_file(&self, deadline: Deadline, path: &str, data: &[u8]) -> Result<(), DeviceError> {
        let deadline = deadline.or_default(BULK_TIMEOUT);
        self.with_wire(|wire| fs::put_file(wire, path, data, deadline))
    }

    fn get_file(&self, deadline: Deadline, path: &str) -> Result<Vec<u8>, DeviceError> {
        let deadline = deadline.or_default(BULK_TIMEOUT);
        self.with_wire(|wire| fs::get_file(wire, path, deadline))
    }

    fn boot_file(&self, deadline: Deadline, path: &str) -> Result<(), DeviceError> {
        let deadline = deadline.or_default(CONTROL_TIMEOUT);
        self.with_wire(|wire| fs::boot_file(wire, path, deadline))
    }
}
