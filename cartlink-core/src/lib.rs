//! Core device abstraction for cartlink.
//!
//! Everything a back-end driver needs to plug into the multiplexer lives
//! here: the address model, the capability and error taxonomies, the
//! `Device`/`Driver` traits, the per-driver device container, and the
//! process-wide driver registry.

use std::fmt;

pub mod capability;
pub mod container;
pub mod deadline;
pub mod descriptor;
pub mod device;
pub mod driver;
pub mod error;
pub mod handle;
pub mod registry;
pub mod settings;
pub mod timing;

pub use capability::Capability;
pub use container::DeviceContainer;
pub use deadline::Deadline;
pub use descriptor::DeviceDescriptor;
pub use device::{Device, DirEntry, DirEntryKind, Field};
pub use driver::Driver;
pub use error::DeviceError;
pub use handle::DeviceHandle;
pub use registry::Registry;
pub use settings::Settings;

/// The system tag carried by every descriptor this multiplexer produces.
pub const SYSTEM_SNES: &str = "snes";

/// Address spaces a memory request can be expressed in.
///
/// `FxPakPro` is the linearized 24-bit space exposed by the USB cartridge
/// adapter (ROM at the bottom, SRAM at `$E0:0000`, WRAM at `$F5:0000`).
/// `SnesABus` is the console CPU's 24-bit bus. `Raw` is passed through to
/// the back-end untranslated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressSpace {
    FxPakPro,
    SnesABus,
    Raw,
}

impl AddressSpace {
    pub fn name(&self) -> &'static str {
        match self {
            Self::FxPakPro => "fxpakpro",
            Self::SnesABus => "snesabus",
            Self::Raw => "raw",
        }
    }
}

impl fmt::Display for AddressSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Cartridge memory mapping modes the address translator understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MemoryMapping {
    #[default]
    Unknown,
    LoRom,
    HiRom,
    ExHiRom,
    Sa1,
}

impl MemoryMapping {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::LoRom => "lorom",
            Self::HiRom => "hirom",
            Self::ExHiRom => "exhirom",
            Self::Sa1 => "sa1",
        }
    }
}

impl fmt::Display for MemoryMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The universal currency of memory requests: a 24-bit address qualified
/// by the space it is expressed in and the cartridge mapping in effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressTuple {
    pub address: u32,
    pub space: AddressSpace,
    pub mapping: MemoryMapping,
}

impl AddressTuple {
    pub fn new(address: u32, space: AddressSpace, mapping: MemoryMapping) -> Self {
        Self {
            address,
            space,
            mapping,
        }
    }
}

impl fmt::Display for AddressTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:${:06x} ({})", self.space, self.address, self.mapping)
    }
}

/// A single read in a `multi_read` batch.
#[derive(Debug, Clone)]
pub struct MemoryReadRequest {
    pub address: AddressTuple,
    pub size: usize,
}

/// Response to one read request. `data.len()` always equals the request
/// size; a short or long reply is a protocol error in the driver.
#[derive(Debug, Clone)]
pub struct MemoryReadResponse {
    pub request_address: AddressTuple,
    /// The request address translated into the back-end's canonical space.
    pub device_address: AddressTuple,
    pub data: Vec<u8>,
}

/// A single write in a `multi_write` batch.
#[derive(Debug, Clone)]
pub struct MemoryWriteRequest {
    pub address: AddressTuple,
    pub data: Vec<u8>,
}

/// Response to one write request; carries only the written size.
#[derive(Debug, Clone)]
pub struct MemoryWriteResponse {
    pub request_address: AddressTuple,
    pub device_address: AddressTuple,
    pub size: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_tuple_display() {
        let t = AddressTuple::new(0x7E0010, AddressSpace::SnesABus, MemoryMapping::LoRom);
        assert_eq!(t.to_string(), "snesabus:$7e0010 (lorom)");
    }

    #[test]
    fn default_mapping_is_unknown() {
        assert_eq!(MemoryMapping::default(), MemoryMapping::Unknown);
    }
}
