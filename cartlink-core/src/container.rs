use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use url::Url;

use crate::device::Device;
use crate::error::DeviceError;

/// Opener callback a driver supplies to its container: dials the endpoint
/// named by the URI and returns a connected session. The `Weak` back
/// reference lets the session unregister itself on close without owning
/// the container.
pub type Opener = dyn Fn(&Url, &str, Weak<DeviceContainer>) -> Result<Arc<dyn Device>, DeviceError>
    + Send
    + Sync;

/// Per-driver mapping from device key to live session.
///
/// Keys are stable across reconnects; a closed session found under a key
/// is replaced by a freshly opened one. At most one live session exists
/// per key, and the entry is removed when the session closes.
pub struct DeviceContainer {
    devices: Mutex<HashMap<String, Arc<dyn Device>>>,
    opener: Box<Opener>,
}

impl DeviceContainer {
    pub fn new(opener: Box<Opener>) -> Arc<Self> {
        Arc::new(Self {
            devices: Mutex::new(HashMap::new()),
            opener,
        })
    }

    /// Return the live session under `key`, opening one via the driver's
    /// opener if none exists or the existing one has closed.
    pub fn get_or_open(
        self: &Arc<Self>,
        uri: &Url,
        key: &str,
    ) -> Result<Arc<dyn Device>, DeviceError> {
        let mut devices = self.devices.lock().unwrap();
        if let Some(device) = devices.get(key) {
            if !device.is_closed() {
                return Ok(device.clone());
            }
            devices.remove(key);
        }

        let device = (self.opener)(uri, key, Arc::downgrade(self))?;
        devices.insert(key.to_string(), device.clone());
        Ok(device)
    }

    pub fn get(&self, key: &str) -> Option<Arc<dyn Device>> {
        self.devices.lock().unwrap().get(key).cloned()
    }

    /// Register an externally-created session (accept-based drivers).
    /// Any session previously under the key is returned for disposal.
    pub fn insert(&self, key: &str, device: Arc<dyn Device>) -> Option<Arc<dyn Device>> {
        self.devices
            .lock()
            .unwrap()
            .insert(key.to_string(), device)
    }

    /// Remove the entry under `key` without closing it. Sessions call this
    /// from `close()` through their back reference.
    pub fn remove(&self, key: &str) {
        self.devices.lock().unwrap().remove(key);
    }

    pub fn all_keys(&self) -> Vec<String> {
        self.devices.lock().unwrap().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.devices.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.lock().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deadline::Deadline;
    use crate::{MemoryReadRequest, MemoryReadResponse, MemoryWriteRequest, MemoryWriteResponse};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct FakeDevice {
        closed: AtomicBool,
        key: String,
        container: Weak<DeviceContainer>,
    }

    impl Device for FakeDevice {
        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }

        fn close(&self) -> Result<(), DeviceError> {
            if self.closed.swap(true, Ordering::SeqCst) {
                return Ok(());
            }
            if let Some(container) = self.container.upgrade() {
                container.remove(&self.key);
            }
            Ok(())
        }

        fn multi_read(
            &self,
            _deadline: Deadline,
            _reads: &[MemoryReadRequest],
        ) -> Result<Vec<MemoryReadResponse>, DeviceError> {
            Ok(Vec::new())
        }

        fn multi_write(
            &self,
            _deadline: Deadline,
            _writes: &[MemoryWriteRequest],
        ) -> Result<Vec<MemoryWriteResponse>, DeviceError> {
            Ok(Vec::new())
        }
    }

    fn fake_container(opens: Arc<AtomicUsize>) -> Arc<DeviceContainer> {
        DeviceContainer::new(Box::new(move |_uri, key, weak| {
            opens.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(FakeDevice {
                closed: AtomicBool::new(false),
                key: key.to_string(),
                container: weak,
            }) as Arc<dyn Device>)
        }))
    }

    fn uri() -> Url {
        Url::parse("emunwa://localhost:48879").unwrap()
    }

    #[test]
    fn get_or_open_reuses_live_session() {
        let opens = Arc::new(AtomicUsize::new(0));
        let container = fake_container(opens.clone());

        let a = container.get_or_open(&uri(), "localhost:48879").unwrap();
        let b = container.get_or_open(&uri(), "localhost:48879").unwrap();
        assert_eq!(opens.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn closed_session_is_replaced_and_unregistered() {
        let opens = Arc::new(AtomicUsize::new(0));
        let container = fake_container(opens.clone());

        let a = container.get_or_open(&uri(), "k").unwrap();
        a.close().unwrap();
        assert!(container.get("k").is_none(), "close must remove the entry");

        let b = container.get_or_open(&uri(), "k").unwrap();
        assert_eq!(opens.load(Ordering::SeqCst), 2);
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn close_is_idempotent() {
        let container = fake_container(Arc::new(AtomicUsize::new(0)));
        let a = container.get_or_open(&uri(), "k").unwrap();
        a.close().unwrap();
        a.close().unwrap();
        a.close().unwrap();
        assert!(a.is_closed());
    }
}
