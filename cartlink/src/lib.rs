//! cartlink: a device-access multiplexer for SNES hardware and emulators.
//!
//! Exposes a uniform memory/control abstraction over heterogeneous
//! back-ends (the FX Pak Pro USB cartridge adapter, NWA-speaking
//! emulators, and Lua-bridge emulator scripts) so higher-level services
//! can read and write SNES memory, reset or pause execution, and manage
//! cartridge files without knowing which transport is in use.
//!
//! ```no_run
//! use cartlink::{init_registry, Deadline, MemoryReadRequest};
//! use cartlink::{AddressSpace, AddressTuple, MemoryMapping, Settings};
//!
//! let registry = init_registry(&Settings::from_env());
//! for driver in registry.all() {
//!     for descriptor in driver.detect().unwrap_or_default() {
//!         let device = driver.device(&descriptor.uri);
//!         let reads = [MemoryReadRequest {
//!             address: AddressTuple::new(
//!                 0x7E_0000,
//!                 AddressSpace::SnesABus,
//!                 MemoryMapping::LoRom,
//!             ),
//!             size: 16,
//!         }];
//!         if let Ok(rsp) = device.multi_read(Deadline::none(), &reads) {
//!             println!("{}: {:02x?}", descriptor.display_name, rsp[0].data);
//!         }
//!     }
//! }
//! ```

pub use cartlink_core::*;

pub use cartlink_mapping as mapping;

pub use cartlink_emunwa as emunwa;
pub use cartlink_fxpakpro as fxpakpro;
pub use cartlink_luabridge as luabridge;

/// Build the process-wide driver registry: each back-end registers
/// itself unless its gate flag is set. Call once at startup and thread
/// the returned value through construction.
pub fn init_registry(settings: &Settings) -> Registry {
    let mut registry = Registry::new();
    fxpakpro::driver_init(&mut registry, settings);
    emunwa::driver_init(&mut registry, settings);
    luabridge::driver_init(&mut registry, settings);
    registry
}
