//! EmuNWA driver: NWA-speaking emulators over TCP.
//!
//! The driver keeps one probe client per configured address and fans
//! detection out across them, one thread per probe, each under a
//! four-frame budget. Probe failures are silent (logged only); a panic
//! in one probe never takes down the pass.

use std::net::{SocketAddr, ToSocketAddrs};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, Weak};
use std::thread;
use std::time::Instant;

use cartlink_core::timing::{DETECT_TIMEOUT, FRAME};
use cartlink_core::{
    AddressSpace, Capability, Device, DeviceContainer, DeviceDescriptor, DeviceError, Driver,
    Registry, Settings, SYSTEM_SNES,
};
use url::Url;

pub mod client;
pub mod device;

pub use client::{NwaClient, Reply};
pub use device::NwaDevice;

use client::detect_loopback;

pub const KIND: &str = "emunwa";

pub static CAPABILITIES: &[Capability] = &[
    Capability::ReadMemory,
    Capability::WriteMemory,
    Capability::ResetSystem,
    Capability::PauseUnpauseEmulation,
    Capability::FetchFields,
    Capability::NwaCommand,
];

pub struct EmuNwaDriver {
    container: Arc<DeviceContainer>,
    probes: Vec<Mutex<NwaClient>>,
    targets: Vec<SocketAddr>,
    log_detector: bool,
}

impl EmuNwaDriver {
    pub fn new(addresses: Vec<SocketAddr>, log_detector: bool) -> Arc<Self> {
        let probes = addresses
            .iter()
            .enumerate()
            .map(|(i, &addr)| Mutex::new(NwaClient::new(addr, format!("emunwa[{i}]"))))
            .collect();
        Arc::new(Self {
            container: DeviceContainer::new(Box::new(open_device)),
            probes,
            targets: addresses,
            log_detector,
        })
    }

    /// Run one probe to completion: reconnect if needed, guard against
    /// loopback, query identity, build the descriptor.
    fn probe_one(&self, index: usize) -> Option<DeviceDescriptor> {
        let mut probe = self.probes[index].lock().unwrap();
        let deadline = Instant::now() + DETECT_TIMEOUT;

        if probe.is_closed() {
            // Replace a used-up probe in place at the same index.
            let addr = probe.addr();
            *probe = NwaClient::new(addr, format!("emunwa[{index}]"));
        }

        if !probe.is_connected() {
            if let Err(err) = probe.connect(deadline) {
                if self.log_detector {
                    log::debug!("{KIND}: detect: probe[{index}]: connect: {err}");
                }
                return None;
            }

            if let Some(local) = probe.local_addr() {
                if detect_loopback(local, &self.targets) {
                    if self.log_detector {
                        log::debug!(
                            "{KIND}: detect: probe[{index}]: loopback connection detected"
                        );
                    }
                    let _ = probe.close();
                    return None;
                }
            }
        }

        let reply = match probe.send_command_wait_reply("EMULATOR_INFO", Instant::now() + FRAME * 2)
        {
            Ok(reply) => reply,
            Err(err) => {
                log::debug!(
                    "{KIND}: detect: probe[{index}]: EMULATOR_INFO error: {err}; closing connection"
                );
                let _ = probe.close();
                return None;
            }
        };

        if reply.error().is_some() || reply.records.is_empty() {
            if self.log_detector {
                log::debug!(
                    "{KIND}: detect: probe[{index}]: EMULATOR_INFO did not reply with an ASCII record"
                );
            }
            let _ = probe.close();
            return None;
        }

        let name = reply.first("name").unwrap_or_default();
        let version = reply.first("version").unwrap_or_default();

        let uri = Url::parse(&format!("{KIND}://{}", probe.addr())).ok()?;
        Some(DeviceDescriptor {
            uri,
            display_name: format!("{name} {version} ({KIND})"),
            kind: KIND,
            capabilities: CAPABILITIES,
            default_address_space: AddressSpace::SnesABus,
            system: SYSTEM_SNES,
        })
    }
}

impl Driver for EmuNwaDriver {
    fn kind(&self) -> &'static str {
        KIND
    }

    fn display_name(&self) -> &'static str {
        "EmuNWA"
    }

    fn display_description(&self) -> &'static str {
        "Connect to an EmuNWA emulator"
    }

    fn display_order(&self) -> i32 {
        1
    }

    fn capabilities(&self) -> &'static [Capability] {
        CAPABILITIES
    }

    fn detect(&self) -> Result<Vec<DeviceDescriptor>, DeviceError> {
        let found: Mutex<Vec<DeviceDescriptor>> = Mutex::new(Vec::new());

        thread::scope(|scope| {
            for index in 0..self.probes.len() {
                let found = &found;
                scope.spawn(move || {
                    match catch_unwind(AssertUnwindSafe(|| self.probe_one(index))) {
                        Ok(Some(descriptor)) => found.lock().unwrap().push(descriptor),
                        Ok(None) => {}
                        Err(_) => {
                            log::error!("{KIND}: detect: probe[{index}] panicked");
                        }
                    }
                });
            }
        });

        Ok(found.into_inner().unwrap())
    }

    fn device_key(&self, uri: &Url) -> String {
        device_key(uri)
    }

    fn open_device(
        &self,
        uri: &Url,
        key: &str,
        container: Weak<DeviceContainer>,
    ) -> Result<Arc<dyn Device>, DeviceError> {
        open_device(uri, key, container)
    }

    fn container(&self) -> &Arc<DeviceContainer> {
        &self.container
    }
}

fn device_key(uri: &Url) -> String {
    match (uri.host_str(), uri.port()) {
        (Some(host), Some(port)) => format!("{host}:{port}"),
        (Some(host), None) => host.to_string(),
        _ => uri.as_str().to_string(),
    }
}

fn open_device(
    uri: &Url,
    key: &str,
    container: Weak<DeviceContainer>,
) -> Result<Arc<dyn Device>, DeviceError> {
    let addr = resolve(&device_key(uri))?;
    Ok(Arc::new(NwaDevice::open(addr, key, container)?))
}

fn resolve(host: &str) -> Result<SocketAddr, DeviceError> {
    host.to_socket_addrs()
        .map_err(|err| DeviceError::lost(format!("resolve('{host}'): {err}")))?
        .next()
        .ok_or_else(|| DeviceError::lost(format!("resolve('{host}'): no addresses")))
}

/// Register the driver with the env-configured host sweep, unless gated
/// off.
pub fn driver_init(registry: &mut Registry, settings: &Settings) {
    if settings.emunw_disable {
        log::info!("{KIND}: disabling emunwa snes driver");
        return;
    }

    log::info!("{KIND}: port range set to 0x{:x}", settings.nwa_port_range);
    if settings.nwa_disable_old_range {
        log::info!("{KIND}: disabling old port range 65400..65409");
    }

    let mut addresses = Vec::new();
    for host in settings.nwa_hosts() {
        match resolve(&host) {
            Ok(addr) => addresses.push(addr),
            // Drop addresses that do not resolve.
            Err(err) => log::warn!("{KIND}: {err}"),
        }
    }

    if settings.emunw_detect_log {
        log::info!("{KIND}: enabling detector logging");
    }

    registry.register(EmuNwaDriver::new(addresses, settings.emunw_detect_log));
}

#[cfg(test)]
mod driver_tests {
    use super::*;

    #[test]
    fn device_key_is_host_port() {
        let uri = Url::parse("emunwa://localhost:48879").unwrap();
        assert_eq!(device_key(&uri), "localhost:48879");
    }

    #[test]
    fn gated_init_does_not_register() {
        let mut registry = Registry::new();
        let settings = Settings {
            emunw_disable: true,
            ..Settings::default()
        };
        driver_init(&mut registry, &settings);
        assert!(registry.by_kind(KIND).is_none());
    }

    #[test]
    fn init_registers_with_default_sweep() {
        let mut registry = Registry::new();
        driver_init(&mut registry, &Settings::default());
        let driver = registry.by_kind(KIND).unwrap();
        assert!(driver.has_capabilities(&[Capability::ReadMemory, Capability::NwaCommand]));
        assert!(!driver.has_capabilities(&[Capability::BootFile]));
    }
}
