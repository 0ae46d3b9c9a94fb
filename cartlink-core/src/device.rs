use std::collections::HashMap;

use crate::deadline::Deadline;
use crate::error::DeviceError;
use crate::{MemoryReadRequest, MemoryReadResponse, MemoryWriteRequest, MemoryWriteResponse};

/// Named device properties retrievable via `fetch_fields`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    DeviceName,
    DeviceVersion,
    RomFileName,
}

impl Field {
    pub fn name(&self) -> &'static str {
        match self {
            Self::DeviceName => "DeviceName",
            Self::DeviceVersion => "DeviceVersion",
            Self::RomFileName => "RomFileName",
        }
    }
}

/// Entry kind in a cartridge directory listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirEntryKind {
    Directory,
    File,
}

/// One entry from `read_directory`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: DirEntryKind,
}

/// A live session with one back-end endpoint.
///
/// Implementations own the transport and serialize all wire access through
/// an internal mutex: no two wire exchanges on the same session ever
/// overlap. Every operation samples its [`Deadline`] once at entry.
///
/// Operations a back-end does not declare default to
/// `DeviceError::Unsupported`, mirroring the per-driver capability sets.
pub trait Device: Send + Sync {
    /// Whether the session has transitioned to Closed.
    fn is_closed(&self) -> bool;

    /// Whether the session still holds a live endpoint. Sessions open
    /// connected, so this is the complement of [`Device::is_closed`]
    /// unless an implementation tracks a separate connecting state.
    fn is_connected(&self) -> bool {
        !self.is_closed()
    }

    /// Close the session and unregister it from its container.
    ///
    /// Idempotent: only the first call reports the endpoint's close
    /// result; later calls return `Ok(())`. Safe to call from within a
    /// failing operation.
    fn close(&self) -> Result<(), DeviceError>;

    /// Batched memory read. Responses correspond index-wise to requests
    /// and every response carries exactly the requested number of bytes.
    fn multi_read(
        &self,
        deadline: Deadline,
        reads: &[MemoryReadRequest],
    ) -> Result<Vec<MemoryReadResponse>, DeviceError>;

    /// Batched memory write; responses carry the written sizes.
    fn multi_write(
        &self,
        deadline: Deadline,
        writes: &[MemoryWriteRequest],
    ) -> Result<Vec<MemoryWriteResponse>, DeviceError>;

    fn reset_system(&self, _deadline: Deadline) -> Result<(), DeviceError> {
        Err(DeviceError::Unsupported("reset_system"))
    }

    fn reset_to_menu(&self, _deadline: Deadline) -> Result<(), DeviceError> {
        Err(DeviceError::Unsupported("reset_to_menu"))
    }

    /// Drive emulation to `paused` and return the resulting state.
    fn pause_unpause(&self, _deadline: Deadline, _paused: bool) -> Result<bool, DeviceError> {
        Err(DeviceError::Unsupported("pause_unpause"))
    }

    fn pause_toggle(&self, _deadline: Deadline) -> Result<(), DeviceError> {
        Err(DeviceError::Unsupported("pause_toggle"))
    }

    /// Fetch named device properties; results correspond index-wise to
    /// `fields`, with an empty string for properties the device omits.
    fn fetch_fields(
        &self,
        _deadline: Deadline,
        _fields: &[Field],
    ) -> Result<Vec<String>, DeviceError> {
        Err(DeviceError::Unsupported("fetch_fields"))
    }

    // -- cartridge filesystem operations --

    fn read_directory(
        &self,
        _deadline: Deadline,
        _path: &str,
    ) -> Result<Vec<DirEntry>, DeviceError> {
        Err(DeviceError::Unsupported("read_directory"))
    }

    fn make_directory(&self, _deadline: Deadline, _path: &str) -> Result<(), DeviceError> {
        Err(DeviceError::Unsupported("make_directory"))
    }

    fn remove_file(&self, _deadline: Deadline, _path: &str) -> Result<(), DeviceError> {
        Err(DeviceError::Unsupported("remove_file"))
    }

    fn rename_file(
        &self,
        _deadline: Deadline,
        _path: &str,
        _new_filename: &str,
    ) -> Result<(), DeviceError> {
        Err(DeviceError::Unsupported("rename_file"))
    }

    fn put_file(&self, _deadline: Deadline, _path: &str, _data: &[u8]) -> Result<(), DeviceError> {
        Err(DeviceError::Unsupported("put_file"))
    }

    fn get_file(&self, _deadline: Deadline, _path: &str) -> Result<Vec<u8>, DeviceError> {
        Err(DeviceError::Unsupported("get_file"))
    }

    fn boot_file(&self, _deadline: Deadline, _path: &str) -> Result<(), DeviceError> {
        Err(DeviceError::Unsupported("boot_file"))
    }

    // -- raw protocol passthrough --

    /// Issue a raw NWA command and return its parsed ASCII records and any
    /// binary payload.
    fn nwa_command(
        &self,
        _deadline: Deadline,
        _command: &str,
        _args: &str,
    ) -> Result<(Vec<HashMap<String, String>>, Vec<u8>), DeviceError> {
        Err(DeviceError::Unsupported("nwa_command"))
    }
}

impl std::fmt::Debug for dyn Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("dyn Device")
            .field("is_closed", &self.is_closed())
            .finish()
    }
}
