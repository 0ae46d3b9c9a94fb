//! Lua-bridge driver: emulator-side Lua scripts that dial in over TCP
//! and speak 0x00-terminated JSON messages.
//!
//! Unlike the outbound drivers, sessions here are accept-based: the
//! driver listens on a local port and registers one session per inbound
//! connection, keyed by the peer address. `detect()` lists whatever is
//! currently connected.

use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Weak};
use std::thread;

use cartlink_core::{
    AddressSpace, Capability, Device, DeviceContainer, DeviceDescriptor, DeviceError, Driver,
    Registry, Settings, SYSTEM_SNES,
};
use url::Url;

pub mod device;
pub mod message;

pub use device::LuaBridgeDevice;
pub use message::LuaBlock;

pub const KIND: &str = "luabridge";

pub static CAPABILITIES: &[Capability] = &[Capability::ReadMemory, Capability::WriteMemory];

pub struct LuaBridgeDriver {
    container: Arc<DeviceContainer>,
    listen_addr: String,
}

impl LuaBridgeDriver {
    pub fn new(listen_addr: String) -> Arc<Self> {
        Arc::new(Self {
            container: DeviceContainer::new(Box::new(no_outbound_open)),
            listen_addr,
        })
    }

    /// Bind the listener and start the accept loop in a background
    /// thread. Returns the bound address (useful when the configured
    /// port is 0).
    pub fn start_listener(self: &Arc<Self>) -> Result<std::net::SocketAddr, DeviceError> {
        let listener = TcpListener::bind(&self.listen_addr)
            .map_err(|err| DeviceError::lost(format!("bind {}: {err}", self.listen_addr)))?;
        let local = listener.local_addr()?;
        log::info!("{KIND}: listening on {local}");

        let driver = self.clone();
        thread::Builder::new()
            .name("luabridge-accept".to_string())
            .spawn(move || driver.accept_loop(listener))
            .map_err(|err| DeviceError::lost(format!("spawn accept loop: {err}")))?;
        Ok(local)
    }

    fn accept_loop(&self, listener: TcpListener) {
        for conn in listener.incoming() {
            match conn {
                Ok(stream) => {
                    if let Err(err) = self.register(stream) {
                        log::warn!("{KIND}: rejecting connection: {err}");
                    }
                }
                Err(err) => {
                    log::warn!("{KIND}: accept: {err}");
                }
            }
        }
    }

    /// One session per inbound emulator connection; a reconnect under
    /// the same peer address replaces the stale session.
    fn register(&self, stream: TcpStream) -> Result<(), DeviceError> {
        let peer = stream.peer_addr()?;
        let key = peer.to_string();
        log::info!("{KIND}: client '{key}'");

        if let Some(stale) = self.container.get(&key) {
            let _ = stale.close();
        }

        let device = Arc::new(LuaBridgeDevice::from_stream(
            stream,
            key.clone(),
            Arc::downgrade(&self.container),
        )?);
        device::spawn_health_loop(&device);
        self.container.insert(&key, device);
        Ok(())
    }
}

impl Driver for LuaBridgeDriver {
    fn kind(&self) -> &'static str {
        KIND
    }

    fn display_name(&self) -> &'static str {
        "Lua Bridge"
    }

    fn display_description(&self) -> &'static str {
        "Connect to an emulator running a Lua bridge script"
    }

    fn display_order(&self) -> i32 {
        2
    }

    fn capabilities(&self) -> &'static [Capability] {
        CAPABILITIES
    }

    fn detect(&self) -> Result<Vec<DeviceDescriptor>, DeviceError> {
        let mut devs = Vec::new();
        for key in self.container.all_keys() {
            let Ok(uri) = Url::parse(&format!("{KIND}://{key}")) else {
                continue;
            };
            devs.push(DeviceDescriptor {
                uri,
                display_name: format!("{key} ({KIND})"),
                kind: KIND,
                capabilities: CAPABILITIES,
                default_address_space: AddressSpace::SnesABus,
                system: SYSTEM_SNES,
            });
        }
        Ok(devs)
    }

    fn device_key(&self, uri: &Url) -> String {
        match (uri.host_str(), uri.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            _ => uri.as_str().to_string(),
        }
    }

    fn open_device(
        &self,
        uri: &Url,
        key: &str,
        container: Weak<DeviceContainer>,
    ) -> Result<Arc<dyn Device>, DeviceError> {
        no_outbound_open(uri, key, container)
    }

    fn container(&self) -> &Arc<DeviceContainer> {
        &self.container
    }
}

/// Sessions register on accept; there is no outbound dial.
fn no_outbound_open(
    _uri: &Url,
    _key: &str,
    _container: Weak<DeviceContainer>,
) -> Result<Arc<dyn Device>, DeviceError> {
    Err(DeviceError::Unsupported(
        "luabridge devices connect inbound; no session is registered for this URI",
    ))
}

/// Register the driver and start its listener, unless gated off.
pub fn driver_init(registry: &mut Registry, settings: &Settings) {
    if settings.luabridge_disable {
        log::info!("{KIND}: driver disabled");
        return;
    }

    let driver = LuaBridgeDriver::new(settings.luabridge_listen.clone());
    if let Err(err) = driver.start_listener() {
        log::error!("{KIND}: {err}; driver not registered");
        return;
    }
    registry.register(driver);
}

#[cfg(test)]
mod driver_tests {
    use super::*;

    #[test]
    fn detect_lists_registered_sessions_only() {
        let driver = LuaBridgeDriver::new("127.0.0.1:0".to_string());
        assert!(driver.detect().unwrap().is_empty());
    }

    #[test]
    fn outbound_open_is_unsupported() {
        let driver = LuaBridgeDriver::new("127.0.0.1:0".to_string());
        let uri = Url::parse("luabridge://127.0.0.1:50000").unwrap();
        let err = driver
            .container()
            .get_or_open(&uri, &driver.device_key(&uri))
            .unwrap_err();
        assert!(matches!(err, DeviceError::Unsupported(_)));
    }

    #[test]
    fn gated_init_does_not_register() {
        let mut registry = Registry::new();
        let settings = Settings {
            luabridge_disable: true,
            ..Settings::default()
        };
        driver_init(&mut registry, &settings);
        assert!(registry.by_kind(KIND).is_none());
    }
}
