//! Address-space translation between the SNES CPU bus and the linear
//! FxPak Pro cartridge space.
//!
//! Translation is a pure function of the address tuple and the target
//! space. WRAM is mapping-independent (`$7E:0000-$7F:FFFF` on the bus,
//! `$F5:0000-$F6:FFFF` in pak space); ROM and SRAM regions go through the
//! cartridge mapping in effect. Mirror addresses normalize to the
//! canonical bank range on the return trip, so round-trips are the
//! identity for canonical addresses only.

use cartlink_core::{AddressSpace, AddressTuple, DeviceError, MemoryMapping};

pub mod exhirom;
pub mod hirom;
pub mod lorom;
pub mod sa1;

/// Pak-space base of cartridge SRAM.
pub const PAK_SRAM_BASE: u32 = 0xE0_0000;
/// Pak-space window holding console WRAM.
pub const PAK_WRAM_BASE: u32 = 0xF5_0000;
pub const PAK_WRAM_END: u32 = 0xF7_0000;
/// Bus-space base of console WRAM (bank `$7E`).
pub const BUS_WRAM_BASE: u32 = 0x7E_0000;

/// Translate `tuple` into `target` space.
///
/// `Raw` passes through unchanged in both directions, as does a
/// same-space translation (preserving the CMD flag bit the USB back-end
/// carries above the 24-bit address).
pub fn translate(tuple: AddressTuple, target: AddressSpace) -> Result<u32, DeviceError> {
    if tuple.space == target
        || tuple.space == AddressSpace::Raw
        || target == AddressSpace::Raw
    {
        return Ok(tuple.address);
    }

    match (tuple.space, target) {
        (AddressSpace::SnesABus, AddressSpace::FxPakPro) => bus_to_pak(tuple),
        (AddressSpace::FxPakPro, AddressSpace::SnesABus) => pak_to_bus(tuple),
        // Raw and same-space pairs are handled above.
        _ => Err(DeviceError::UnsupportedAddress {
            address: tuple.address,
            space: target.name(),
        }),
    }
}

fn bus_to_pak(tuple: AddressTuple) -> Result<u32, DeviceError> {
    let addr = tuple.address & 0xFF_FFFF;

    // WRAM is reachable regardless of cartridge mapping.
    if (BUS_WRAM_BASE..0x80_0000).contains(&addr) {
        return Ok(PAK_WRAM_BASE + (addr - BUS_WRAM_BASE));
    }

    match tuple.mapping {
        MemoryMapping::LoRom => lorom::bus_to_pak(addr),
        MemoryMapping::HiRom => hirom::bus_to_pak(addr),
        MemoryMapping::ExHiRom => exhirom::bus_to_pak(addr),
        MemoryMapping::Sa1 => sa1::bus_to_pak(addr),
        MemoryMapping::Unknown => Err(DeviceError::UnsupportedMapping {
            mapping: tuple.mapping.name(),
            address: addr,
        }),
    }
}

fn pak_to_bus(tuple: AddressTuple) -> Result<u32, DeviceError> {
    let addr = tuple.address & 0xFF_FFFF;

    if (PAK_WRAM_BASE..PAK_WRAM_END).contains(&addr) {
        return Ok(BUS_WRAM_BASE + (addr - PAK_WRAM_BASE));
    }

    match tuple.mapping {
        MemoryMapping::LoRom => lorom::pak_to_bus(addr),
        MemoryMapping::HiRom => hirom::pak_to_bus(addr),
        MemoryMapping::ExHiRom => exhirom::pak_to_bus(addr),
        MemoryMapping::Sa1 => sa1::pak_to_bus(addr),
        MemoryMapping::Unknown => Err(DeviceError::UnsupportedMapping {
            mapping: tuple.mapping.name(),
            address: addr,
        }),
    }
}

pub(crate) fn unsupported(address: u32, space: AddressSpace) -> DeviceError {
    DeviceError::UnsupportedAddress {
        address,
        space: space.name(),
    }
}
