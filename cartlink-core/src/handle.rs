use std::collections::HashMap;
use std::sync::Arc;

use url::Url;

use crate::container::DeviceContainer;
use crate::deadline::Deadline;
use crate::device::{Device, DirEntry, Field};
use crate::error::DeviceError;
use crate::{MemoryReadRequest, MemoryReadResponse, MemoryWriteRequest, MemoryWriteResponse};

/// Auto-closing routing handle for one device URI.
///
/// The handle opens the session lazily through the driver's container on
/// first use and routes every operation to it. When an operation fails
/// with a close-worthy error the session is closed and unregistered so
/// the next call dials a fresh one. Dropping the handle releases its
/// container reference; the underlying session stays registered for other
/// handles on the same key.
pub struct DeviceHandle {
    container: Arc<DeviceContainer>,
    uri: Url,
    key: String,
}

impl DeviceHandle {
    pub fn new(container: Arc<DeviceContainer>, uri: Url, key: String) -> Self {
        Self {
            container,
            uri,
            key,
        }
    }

    pub fn uri(&self) -> &Url {
        &self.uri
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Open (or reuse) the session, run `op` against it, and enforce the
    /// close-on-error policy for close-worthy failures.
    fn run<T>(
        &self,
        op: impl FnOnce(&Arc<dyn Device>) -> Result<T, DeviceError>,
    ) -> Result<T, DeviceError> {
        let device = self.container.get_or_open(&self.uri, &self.key)?;
        match op(&device) {
            Ok(value) => Ok(value),
            Err(err) => {
                if err.is_close_worthy() {
                    log::debug!(
                        "device '{}': closing after error: {}",
                        self.key,
                        err
                    );
                    if let Err(close_err) = device.close() {
                        log::warn!("device '{}': close failed: {}", self.key, close_err);
                    }
                    self.container.remove(&self.key);
                }
                Err(err)
            }
        }
    }

    pub fn multi_read(
        &self,
        deadline: Deadline,
        reads: &[MemoryReadRequest],
    ) -> Result<Vec<MemoryReadResponse>, DeviceError> {
        self.run(|d| d.multi_read(deadline, reads))
    }

    pub fn multi_write(
        &self,
        deadline: Deadline,
        writes: &[MemoryWriteRequest],
    ) -> Result<Vec<MemoryWriteResponse>, DeviceError> {
        self.run(|d| d.multi_write(deadline, writes))
    }

    pub fn reset_system(&self, deadline: Deadline) -> Result<(), DeviceError> {
        self.run(|d| d.reset_system(deadline))
    }

    pub fn reset_to_menu(&self, deadline: Deadline) -> Result<(), DeviceError> {
        self.run(|d| d.reset_to_menu(deadline))
    }

    pub fn pause_unpause(&self, deadline: Deadline, paused: bool) -> Result<bool, DeviceError> {
        self.run(|d| d.pause_unpause(deadline, paused))
    }

    pub fn pause_toggle(&self, deadline: Deadline) -> Result<(), DeviceError> {
        self.run(|d| d.pause_toggle(deadline))
    }

    pub fn fetch_fields(
        &self,
        deadline: Deadline,
        fields: &[Field],
    ) -> Result<Vec<String>, DeviceError> {
        self.run(|d| d.fetch_fields(deadline, fields))
    }

    pub fn read_directory(
        &self,
        deadline: Deadline,
        path: &str,
    ) -> Result<Vec<DirEntry>, DeviceError> {
        self.run(|d| d.read_directory(deadline, path))
    }

    pub fn make_directory(&self, deadline: Deadline, path: &str) -> Result<(), DeviceError> {
        self.run(|d| d.make_directory(deadline, path))
    }

    pub fn remove_file(&self, deadline: Deadline, path: &str) -> Result<(), DeviceError> {
        self.run(|d| d.remove_file(deadline, path))
    }

    pub fn rename_file(
        &self,
        deadline: Deadline,
        path: &str,
        new_filename: &str,
    ) -> Result<(), DeviceError> {
        self.run(|d| d.rename_file(deadline, path, new_filename))
    }

    pub fn put_file(&self, deadline: Deadline, path: &str, data: &[u8]) -> Result<(), DeviceError> {
        self.run(|d| d.put_file(deadline, path, data))
    }

    pub fn get_file(&self, deadline: Deadline, path: &str) -> Result<Vec<u8>, DeviceError> {
        self.run(|d| d.get_file(deadline, path))
    }

    pub fn boot_file(&self, deadline: Deadline, path: &str) -> Result<(), DeviceError> {
        self.run(|d| d.boot_file(deadline, path))
    }

    pub fn nwa_command(
        &self,
        deadline: Deadline,
        command: &str,
        args: &str,
    ) -> Result<(Vec<HashMap<String, String>>, Vec<u8>), DeviceError> {
        self.run(|d| d.nwa_command(deadline, command, args))
    }

    /// Close the underlying session if one is currently registered.
    pub fn close(&self) -> Result<(), DeviceError> {
        match self.container.get(&self.key) {
            Some(device) => {
                let result = device.close();
                self.container.remove(&self.key);
                result
            }
            None => Ok(()),
        }
    }
}
