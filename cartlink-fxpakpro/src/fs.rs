//! Cartridge filesystem and INFO operations.

use std::time::Instant;

use cartlink_core::{DeviceError, DirEntry, DirEntryKind};

use crate::protocol::{self, flags, Opcode, Space, FRAME_SIZE};
use crate::wire::Wire;

/// Directory-entry stream markers in LS reply frames.
const ENTRY_CONTINUE: u8 = 0x02;
const ENTRY_END: u8 = 0xFF;

/// Device properties reported by INFO.
#[derive(Debug, Clone)]
pub(crate) struct DeviceInfo {
    pub version: String,
    pub device_name: String,
    pub rom_file_name: String,
}

fn exchange(
    wire: &mut dyn Wire,
    frame: &[u8; FRAME_SIZE],
    deadline: Instant,
) -> Result<[u8; FRAME_SIZE], DeviceError> {
    wire.write_all(frame, deadline)?;
    let mut rsp = [0u8; FRAME_SIZE];
    wire.read_exact(&mut rsp, deadline)?;
    protocol::check_response(&rsp)?;
    Ok(rsp)
}

fn path_command(opcode: Opcode, path: &str) -> Result<[u8; FRAME_SIZE], DeviceError> {
    let mut frame = protocol::command_frame(opcode, Space::File, flags::NONE);
    protocol::put_string(&mut frame, protocol::PATH_OFFSET, path)?;
    Ok(frame)
}

pub(crate) fn list_directory(
    wire: &mut dyn Wire,
    path: &str,
    deadline: Instant,
) -> Result<Vec<DirEntry>, DeviceError> {
    let frame = path_command(Opcode::Ls, path)?;
    exchange(wire, &frame, deadline)?;

    let mut entries = Vec::new();
    'frames: loop {
        let mut data = [0u8; FRAME_SIZE];
        wire.read_exact(&mut data, deadline)?;

        let mut at = 0usize;
        while at < FRAME_SIZE {
            match data[at] {
                ENTRY_END => break 'frames,
                ENTRY_CONTINUE => continue 'frames,
                kind @ (0x00 | 0x01) => {
                    at += 1;
                    let name = read_cstring(&data, &mut at)?;
                    entries.push(DirEntry {
                        name,
                        kind: if kind == 0 {
                            DirEntryKind::Directory
                        } else {
                            DirEntryKind::File
                        },
                    });
                }
                other => {
                    return Err(DeviceError::protocol(format!(
                        "unexpected directory entry type ${other:02x}"
                    )))
                }
            }
        }
    }
    Ok(entries)
}

pub(crate) fn make_directory(
    wire: &mut dyn Wire,
    path: &str,
    deadline: Instant,
) -> Result<(), DeviceError> {
    let frame = path_command(Opcode::Mkdir, path)?;
    exchange(wire, &frame, deadline).map(|_| ())
}

pub(crate) fn remove(wire: &mut dyn Wire, path: &str, deadline: Instant) -> Result<(), DeviceError> {
    let frame = path_command(Opcode::Rm, path)?;
    exchange(wire, &frame, deadline).map(|_| ())
}

pub(crate) fn rename(
    wire: &mut dyn Wire,
    path: &str,
    new_filename: &str,
    deadline: Instant,
) -> Result<(), DeviceError> {
    let mut frame = path_command(Opcode::Mv, path)?;
    protocol::put_string(&mut frame, protocol::MV_DEST_OFFSET, new_filename)?;
    exchange(wire, &frame, deadline).map(|_| ())
}

pub(crate) fn put_file(
    wire: &mut dyn Wire,
    path: &str,
    data: &[u8],
    deadline: Instant,
) -> Result<(), DeviceError> {
    let mut frame = path_command(Opcode::Put, path)?;
    protocol::put_size_be(&mut frame, data.len() as u32);
    wire.write_all(&frame, deadline)?;

    // File data travels in whole 512-byte blocks.
    let mut padded = vec![0u8; protocol::aligned512(data.len())];
    padded[..data.len()].copy_from_slice(data);
    wire.write_all(&padded, deadline)?;

    let mut rsp = [0u8; FRAME_SIZE];
    wire.read_exact(&mut rsp, deadline)?;
    protocol::check_response(&rsp)
}

pub(crate) fn get_file(
    wire: &mut dyn Wire,
    path: &str,
    deadline: Instant,
) -> Result<Vec<u8>, DeviceError> {
    let frame = path_command(Opcode::Get, path)?;
    let rsp = exchange(wire, &frame, deadline)?;

    let size = protocol::get_size_be(&rsp) as usize;
    let mut data = vec![0u8; protocol::aligned512(size)];
    wire.read_exact(&mut data, deadline)?;
    data.truncate(size);
    Ok(data)
}

pub(crate) fn boot_file(
    wire: &mut dyn Wire,
    path: &str,
    deadline: Instant,
) -> Result<(), DeviceError> {
    let frame = path_command(Opcode::Boot, path)?;
    exchange(wire, &frame, deadline).map(|_| ())
}

pub(crate) fn info(wire: &mut dyn Wire, deadline: Instant) -> Result<DeviceInfo, DeviceError> {
    let frame = protocol::command_frame(Opcode::Info, Space::Snes, flags::NONE);
    let rsp = exchange(wire, &frame, deadline)?;
    Ok(DeviceInfo {
        version: protocol::get_string(&rsp, 260),
        device_name: protocol::get_string(&rsp, 284),
        rom_file_name: protocol::get_string(&rsp, 16),
    })
}

fn read_cstring(data: &[u8], at: &mut usize) -> Result<String, DeviceError> {
    let tail = &data[*at..];
    let end = tail
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| DeviceError::protocol("unterminated name in directory listing"))?;
    *at += end + 1;
    Ok(String::from_utf8_lossy(&tail[..end]).into_owned())
}
