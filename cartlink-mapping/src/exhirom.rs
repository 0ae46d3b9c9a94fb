//! ExHiROM (mode 25) translation.
//!
//! Two 4 MiB halves: banks `$C0-$FF` map the first half, banks `$40-$7D`
//! the second. The upper halves of the system banks mirror the matching
//! half (`$80-$BF` → first, `$00-$3F` → second). SRAM pages as in HiROM.

use cartlink_core::{AddressSpace, DeviceError};

use crate::{unsupported, PAK_SRAM_BASE};

const HALF: u32 = 0x40_0000;
const SRAM_LIMIT: u32 = 0x2_0000;

pub fn bus_to_pak(addr: u32) -> Result<u32, DeviceError> {
    let bank = addr >> 16;
    let offs = addr & 0xFFFF;

    if bank >= 0xC0 {
        return Ok(((bank - 0xC0) << 16) | offs);
    }
    if (0x40..0x7E).contains(&bank) {
        return Ok(HALF + (((bank - 0x40) << 16) | offs));
    }

    let sys = bank & 0x7F;
    if (0x20..0x40).contains(&sys) && (0x6000..0x8000).contains(&offs) {
        return Ok(PAK_SRAM_BASE + ((sys & 0xF) << 13) + (offs - 0x6000));
    }
    if offs >= 0x8000 {
        let local = ((bank & 0x3F) << 16) | offs;
        return Ok(if bank >= 0x80 { local } else { HALF + local });
    }

    Err(unsupported(addr, AddressSpace::FxPakPro))
}

pub fn pak_to_bus(addr: u32) -> Result<u32, DeviceError> {
    if addr < HALF {
        return Ok(((0xC0 + (addr >> 16)) << 16) | (addr & 0xFFFF));
    }
    if addr < 2 * HALF {
        let rom = addr - HALF;
        let bank = 0x40 + (rom >> 16);
        // Banks $7E/$7F are shadowed by WRAM; the last 128 KiB of the
        // second half has no bus image.
        if bank >= 0x7E {
            return Err(unsupported(addr, AddressSpace::SnesABus));
        }
        return Ok((bank << 16) | (rom & 0xFFFF));
    }
    if addr < PAK_SRAM_BASE {
        return Err(unsupported(addr, AddressSpace::SnesABus));
    }

    let sram = addr - PAK_SRAM_BASE;
    if sram < SRAM_LIMIT {
        let bank = 0x30 + (sram >> 13);
        return Ok((bank << 16) | (0x6000 + (sram & 0x1FFF)));
    }

    Err(unsupported(addr, AddressSpace::SnesABus))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn halves_split_at_4mib() {
        assert_eq!(bus_to_pak(0xC0_0000).unwrap(), 0x00_0000);
        assert_eq!(bus_to_pak(0xFF_FFFF).unwrap(), 0x3F_FFFF);
        assert_eq!(bus_to_pak(0x40_0000).unwrap(), HALF);
        assert_eq!(bus_to_pak(0x7D_FFFF).unwrap(), HALF + 0x3D_FFFF);
    }

    #[test]
    fn system_bank_mirrors_pick_their_half() {
        assert_eq!(bus_to_pak(0x80_8000).unwrap(), 0x00_8000);
        assert_eq!(bus_to_pak(0x00_8000).unwrap(), HALF + 0x00_8000);
    }

    #[test]
    fn shadowed_tail_has_no_bus_image() {
        assert!(pak_to_bus(HALF + 0x3E_0000).is_err());
        assert_eq!(pak_to_bus(HALF + 0x3D_FFFF).unwrap(), 0x7D_FFFF);
    }

    #[test]
    fn pak_to_bus_normalizes() {
        assert_eq!(pak_to_bus(0x01_2345).unwrap(), 0xC1_2345);
        assert_eq!(pak_to_bus(HALF).unwrap(), 0x40_0000);
        assert_eq!(pak_to_bus(PAK_SRAM_BASE).unwrap(), 0x30_6000);
    }
}
