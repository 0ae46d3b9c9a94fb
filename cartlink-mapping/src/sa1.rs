//! SA-1 (Super MMC) translation, at its power-on default bank settings.
//!
//! ROM reads LoROM-style through the upper halves of the system banks
//! and HiROM-style through `$C0-$FF` (the canonical form). BW-RAM sits
//! in banks `$40-$4F` with its first 8 KiB paged through `$6000-$7FFF`
//! of the system banks. Runtime remapping via the Super MMC registers is
//! not modeled.

use cartlink_core::{AddressSpace, DeviceError};

use crate::{unsupported, PAK_SRAM_BASE};

const ROM_LIMIT: u32 = 0x40_0000;
/// BW-RAM: banks $40-$4F, 64 KiB each.
const BWRAM_LIMIT: u32 = 0x10_0000;

pub fn bus_to_pak(addr: u32) -> Result<u32, DeviceError> {
    let bank = addr >> 16;
    let offs = addr & 0xFFFF;

    if bank >= 0xC0 {
        return Ok(((bank - 0xC0) << 16) | offs);
    }
    if (0x40..0x50).contains(&bank) {
        return Ok(PAK_SRAM_BASE + ((bank - 0x40) << 16) + offs);
    }

    let sys = bank & 0x7F;
    if sys < 0x40 {
        if (0x6000..0x8000).contains(&offs) {
            // Default BW-RAM window: block 0.
            return Ok(PAK_SRAM_BASE + (offs - 0x6000));
        }
        if offs >= 0x8000 {
            return Ok((sys << 15) | (offs - 0x8000));
        }
    }

    Err(unsupported(addr, AddressSpace::FxPakPro))
}

pub fn pak_to_bus(addr: u32) -> Result<u32, DeviceError> {
    if addr < ROM_LIMIT {
        return Ok(((0xC0 + (addr >> 16)) << 16) | (addr & 0xFFFF));
    }
    if addr < PAK_SRAM_BASE {
        return Err(unsupported(addr, AddressSpace::SnesABus));
    }

    let bwram = addr - PAK_SRAM_BASE;
    if bwram < BWRAM_LIMIT {
        return Ok(((0x40 + (bwram >> 16)) << 16) | (bwram & 0xFFFF));
    }

    Err(unsupported(addr, AddressSpace::SnesABus))
}
