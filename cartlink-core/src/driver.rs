use std::sync::{Arc, Weak};

use url::Url;

use crate::capability::{check_capabilities, Capability};
use crate::container::DeviceContainer;
use crate::descriptor::DeviceDescriptor;
use crate::device::Device;
use crate::error::DeviceError;
use crate::handle::DeviceHandle;

/// One back-end kind: identity, capability declaration, detection, and a
/// session factory behind a device container.
pub trait Driver: Send + Sync {
    /// URI scheme and registry key for this back-end.
    fn kind(&self) -> &'static str;

    fn display_name(&self) -> &'static str;

    fn display_description(&self) -> &'static str;

    /// Sort key for device pickers; lower sorts first.
    fn display_order(&self) -> i32;

    /// The fixed capability subset this back-end declares.
    fn capabilities(&self) -> &'static [Capability];

    /// Probe candidate endpoints and describe the devices found. Always
    /// returns the successful subset; per-probe failures are logged and
    /// swallowed.
    fn detect(&self) -> Result<Vec<DeviceDescriptor>, DeviceError>;

    /// Canonical container key for a device URI (e.g. the serial port
    /// path stripped of OS prefixes, or `host:port` for network drivers).
    fn device_key(&self, uri: &Url) -> String;

    /// Dial the endpoint and return a connected session. Used by the
    /// container; callers go through [`Driver::device`].
    fn open_device(
        &self,
        uri: &Url,
        key: &str,
        container: Weak<DeviceContainer>,
    ) -> Result<Arc<dyn Device>, DeviceError>;

    /// The driver's device container.
    fn container(&self) -> &Arc<DeviceContainer>;

    /// Subset test against the declared capability set.
    fn has_capabilities(&self, requested: &[Capability]) -> bool {
        check_capabilities(requested, self.capabilities())
    }

    /// Auto-closing handle for the device at `uri`; the session opens
    /// lazily on first use.
    fn device(&self, uri: &Url) -> DeviceHandle {
        DeviceHandle::new(self.container().clone(), uri.clone(), self.device_key(uri))
    }

    /// Close every session in the container and empty it. Close errors
    /// are logged and ignored.
    fn disconnect_all(&self) {
        let container = self.container();
        for key in container.all_keys() {
            if let Some(device) = container.get(&key) {
                log::info!("{}: disconnecting device '{}'", self.kind(), key);
                if let Err(err) = device.close() {
                    log::warn!("{}: close '{}': {}", self.kind(), key, err);
                }
            }
            container.remove(&key);
        }
    }
}
