//! FX Pak Pro / SD2SNES USB-serial driver.
//!
//! Detects the adapter by USB identity, negotiates a baud rate down a
//! fixed preference list, and speaks the 512-byte-frame command protocol
//! over the resulting port.

use std::sync::{Arc, Mutex, Weak};

use cartlink_core::timing::CONTROL_TIMEOUT;
use cartlink_core::{
    AddressSpace, Capability, Device, DeviceContainer, DeviceDescriptor, DeviceError, Driver,
    Registry, Settings, SYSTEM_SNES,
};
use serialport::{DataBits, Parity, SerialPort, SerialPortType, StopBits};
use url::Url;

pub mod asm;
pub mod device;
pub mod protocol;
pub mod wire;

mod fs;
mod wram;

#[cfg(test)]
mod tests;

pub use device::FxPakDevice;

use wire::SerialWire;

pub const KIND: &str = "fxpakpro";

/// USB identity of the FX Pak Pro.
const USB_VID: u16 = 0x1209;
const USB_PID: u16 = 0x5A22;

/// Baud rates in descending preference order. Windows talks at the top
/// rate; the Darwin family historically needs to start at 230400.
const BAUD_RATES: &[u32] = &[
    921600, 460800, 256000, 230400, 153600, 128000, 115200, 76800, 57600, 38400, 28800, 19200,
    14400, 9600,
];

pub static CAPABILITIES: &[Capability] = &[
    Capability::ReadMemory,
    Capability::WriteMemory,
    Capability::ResetSystem,
    Capability::ResetToMenu,
    Capability::ExecuteAsm,
    Capability::FetchFields,
    // filesystem:
    Capability::ReadDirectory,
    Capability::MakeDirectory,
    Capability::RemoveFile,
    Capability::RenameFile,
    Capability::PutFile,
    Capability::GetFile,
    Capability::BootFile,
];

pub struct FxPakProDriver {
    container: Arc<DeviceContainer>,
    enum_lock: Mutex<()>,
}

impl FxPakProDriver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            container: DeviceContainer::new(Box::new(open_device)),
            enum_lock: Mutex::new(()),
        })
    }
}

impl Driver for FxPakProDriver {
    fn kind(&self) -> &'static str {
        KIND
    }

    fn display_name(&self) -> &'static str {
        "FX Pak Pro"
    }

    fn display_description(&self) -> &'static str {
        "Connect to an FX Pak Pro or SD2SNES via USB"
    }

    fn display_order(&self) -> i32 {
        0
    }

    fn capabilities(&self) -> &'static [Capability] {
        CAPABILITIES
    }

    fn detect(&self) -> Result<Vec<DeviceDescriptor>, DeviceError> {
        let _guard = self.enum_lock.lock().unwrap();

        let mut devs = Vec::with_capacity(2);
        for port in serialport::available_ports()? {
            let SerialPortType::UsbPort(usb) = &port.port_type else {
                continue;
            };
            // With more than one pak connected, only one of them reports
            // SerialNumber "DEMO00000000"; match the VID:PID as well.
            let demo = usb.serial_number.as_deref() == Some("DEMO00000000");
            if !demo && !(usb.vid == USB_VID && usb.pid == USB_PID) {
                continue;
            }

            devs.push(DeviceDescriptor {
                uri: device_uri(&port.port_name)?,
                display_name: format!("{} ({:04x}:{:04x})", port.port_name, usb.vid, usb.pid),
                kind: KIND,
                capabilities: CAPABILITIES,
                default_address_space: AddressSpace::FxPakPro,
                system: SYSTEM_SNES,
            });
        }
        Ok(devs)
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

/// `fxpakpro://./<port-path>` for an enumerated port name.
fn device_uri(port_name: &str) -> Result<Url, DeviceError> {
    let sep = if port_name.starts_with('/') { "" } else { "/" };
    Url::parse(&format!("{KIND}://.{sep}{port_name}"))
        .map_err(|err| DeviceError::protocol(format!("bad port name '{port_name}': {err}")))
}

/// Container key: the port path stripped of OS-specific prefixes, so
/// `/dev/cu.usbmodemDEMO000000001` and `COM4` both yield short stable
/// keys.
fn device_key(uri: &Url) -> String {
    let mut key = uri.path();
    key = key.strip_prefix("/dev/").unwrap_or(key);
    key = key.trim_start_matches('/');
    key = key.strip_prefix("cu.usbmodem").unwrap_or(key);
    key.to_string()
}

/// OS path of the port named by a device URI.
fn port_name(uri: &Url) -> String {
    if cfg!(windows) {
        uri.path().trim_start_matches('/').to_string()
    } else {
        uri.path().to_string()
    }
}

fn open_device(
    uri: &Url,
    key: &str,
    container: Weak<DeviceContainer>,
) -> Result<Arc<dyn Device>, DeviceError> {
    let name = port_name(uri);

    let mut baud_request = if cfg!(target_os = "macos") {
        BAUD_RATES[3]
    } else {
        BAUD_RATES[0]
    };
    if let Some((_, value)) = uri.query_pairs().find(|(k, _)| k == "baud") {
        if let Ok(baud) = value.parse() {
            baud_request = baud;
        }
    }

    let port = open_port(&name, baud_request)?;
    Ok(Arc::new(FxPakDevice::new(
        Box::new(SerialWire::new(port)),
        key.to_string(),
        container,
    )))
}

/// Try the preference list from `baud_request` down, stopping at the
/// first rate that opens. DTR must assert on the opened port or the whole
/// open fails.
fn open_port(name: &str, baud_request: u32) -> Result<Box<dyn SerialPort>, DeviceError> {
    let mut last_err: Option<serialport::Error> = None;

    for &baud in BAUD_RATES.iter().filter(|&&b| b <= baud_request) {
        log::debug!("{KIND}: open(name=\"{name}\", baud={baud})");
        match serialport::new(name, baud)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .timeout(CONTROL_TIMEOUT)
            .open()
        {
            Ok(mut port) => {
                if let Err(err) = port.write_data_terminal_ready(true) {
                    return Err(DeviceError::lost(format!("failed to set DTR: {err}")));
                }
                return Ok(port);
            }
            Err(err) => {
                log::debug!("{KIND}: open(name=\"{name}\"): {err}");
                last_err = Some(err);
            }
        }
    }

    Err(DeviceError::lost(format!(
        "failed to open serial port at any baud rate: {}",
        last_err
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no baud rate at or below the requested rate".to_string())
    )))
}

/// Register the driver unless gated off by configuration.
pub fn driver_init(registry: &mut Registry, settings: &Settings) {
    if settings.fxpakpro_disable {
        log::info!("{KIND}: driver disabled");
        return;
    }
    if settings.debug {
        log::info!("{KIND}: debug mode active");
    }
    log::info!("{KIND}: enabling driver");
    registry.register(FxPakProDriver::new());
}

#[cfg(test)]
mod driver_tests {
    use super::*;

    #[test]
    fn device_key_strips_os_prefixes() {
        let uri = Url::parse("fxpakpro://./dev/ttyACM0").unwrap();
        assert_eq!(device_key(&uri), "ttyACM0");

        let uri = Url::parse("fxpakpro://./dev/cu.usbmodemDEMO000000001").unwrap();
        assert_eq!(device_key(&uri), "DEMO000000001");

        let uri = Url::parse("fxpakpro://./COM4").unwrap();
        assert_eq!(device_key(&uri), "COM4");
    }

    #[test]
    fn device_uri_round_trips_port_names() {
        let uri = device_uri("/dev/ttyACM0").unwrap();
        assert_eq!(uri.scheme(), "fxpakpro");
        assert_eq!(uri.host_str(), Some("."));
        assert_eq!(uri.path(), "/dev/ttyACM0");

        let uri = device_uri("COM7").unwrap();
        assert_eq!(uri.path(), "/COM7");
    }

    #[test]
    fn baud_query_caps_the_scan() {
        let uri = Url::parse("fxpakpro://./dev/ttyACM0?baud=57600").unwrap();
        let (_, value) = uri.query_pairs().find(|(k, _)| k == "baud").unwrap();
        assert_eq!(value.parse::<u32>().unwrap(), 57600);
    }

    #[test]
    fn gated_init_does_not_register() {
        let mut registry = Registry::new();
        let settings = Settings {
            fxpakpro_disable: true,
            ..Settings::default()
        };
        driver_init(&mut registry, &settings);
        assert!(registry.by_kind(KIND).is_none());

        let settings = Settings::default();
        driver_init(&mut registry, &settings);
        assert!(registry.by_kind(KIND).is_some());
    }
}
