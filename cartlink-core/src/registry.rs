use std::sync::Arc;

use url::Url;

use crate::driver::Driver;
use crate::error::DeviceError;
use crate::handle::DeviceHandle;

/// Process-wide table of registered drivers, keyed by kind.
///
/// Populated once at startup by each driver's gated init and read-only
/// afterwards. The registry is an explicit value threaded through
/// construction rather than an ambient singleton.
#[derive(Default)]
pub struct Registry {
    drivers: Vec<Arc<dyn Driver>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a driver under its kind. Kinds are unique; registering a
    /// duplicate kind replaces the earlier driver.
    pub fn register(&mut self, driver: Arc<dyn Driver>) {
        self.drivers.retain(|d| d.kind() != driver.kind());
        log::info!("registered driver '{}'", driver.kind());
        self.drivers.push(driver);
        self.drivers.sort_by_key(|d| d.display_order());
    }

    pub fn by_kind(&self, kind: &str) -> Option<&Arc<dyn Driver>> {
        self.drivers.iter().find(|d| d.kind() == kind)
    }

    /// All drivers in display order.
    pub fn all(&self) -> &[Arc<dyn Driver>] {
        &self.drivers
    }

    /// Resolve the driver named by a device URI's scheme.
    pub fn driver_for_uri(&self, uri: &Url) -> Result<&Arc<dyn Driver>, DeviceError> {
        self.by_kind(uri.scheme()).ok_or_else(|| {
            DeviceError::protocol(format!("no driver registered for scheme '{}'", uri.scheme()))
        })
    }

    /// Auto-closing handle for the device at `uri`.
    pub fn device(&self, uri: &Url) -> Result<DeviceHandle, DeviceError> {
        Ok(self.driver_for_uri(uri)?.device(uri))
    }

    /// Shutdown path: force-close every session of every driver.
    pub fn disconnect_all(&self) {
        for driver in &self.drivers {
            driver.disconnect_all();
        }
    }
}
