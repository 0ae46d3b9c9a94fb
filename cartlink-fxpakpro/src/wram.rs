//! WRAM writes via the NMI-EXE trampoline.
//!
//! Console work RAM is unreachable from the cartridge bus, so writes into
//! the pak-space WRAM window are compiled into a short 65C816 routine at
//! `$00:2C00` that the firmware executes on the next NMI. The routine
//! block-moves inline data (appended after the code) into WRAM, disarms
//! the NMI hook by clearing `$2C00`, and chains to the original NMI
//! vector at `$FFEA`.

use std::time::{Duration, Instant};

use cartlink_core::DeviceError;

use crate::asm::Emitter;
use crate::device::{vget, vput};
use crate::protocol::{Space, MAX_CHUNKS, MAX_CHUNK_SIZE};
use crate::wire::Wire;

/// Pak-space window that maps console WRAM.
pub const WRAM_BASE: u32 = 0xF5_0000;
pub const WRAM_END: u32 = 0xF7_0000;

/// CMD-space address of the NMI-EXE slot.
const NMI_EXE_ADDR: u32 = 0x2C00;

/// Routine size without the per-write MVN records.
const ROUTINE_BODY: usize = 0x1B;
/// LDA/LDX/LDY/MVN per buffered write.
const MVN_RECORD: usize = 12;

/// Capacity of the snescmd buffer the routine lands in.
const SNESCMD_LIMIT: usize = 1024;

/// 10 frames at 17 ms (rounded up from 16.6 ms).
const NMI_EXE_POLL: Duration = Duration::from_millis(17 * 10);

/// Perform the buffered WRAM writes through one trampoline round-trip.
pub(crate) fn execute(
    wire: &mut dyn Wire,
    deadline: Instant,
    writes: &[(u32, &[u8])],
) -> Result<(), DeviceError> {
    let blob = copy_routine(writes);
    if blob.len() > SNESCMD_LIMIT {
        return Err(DeviceError::Overflow(format!(
            "too much WRAM data for the snescmd buffer; {} > {}",
            blob.len(),
            SNESCMD_LIMIT
        )));
    }

    let mut chunks: Vec<(u32, &[u8])> = Vec::with_capacity(MAX_CHUNKS);
    let mut at = 0usize;
    while at < blob.len() {
        let len = (blob.len() - at).min(MAX_CHUNK_SIZE);
        chunks.push((NMI_EXE_ADDR + at as u32, &blob[at..at + len]));
        at += len;
    }
    if chunks.len() > MAX_CHUNKS {
        return Err(DeviceError::Overflow(format!(
            "too many VPUT chunks to write WRAM data with; {} > {}",
            chunks.len(),
            MAX_CHUNKS
        )));
    }

    // The slot must read zero before we overwrite it, and again after,
    // to confirm the console consumed the routine.
    await_nmi_exe(wire, deadline, "pre-write")?;
    vput(wire, Space::Cmd, &chunks, deadline)?;
    await_nmi_exe(wire, deadline, "post-write")?;
    Ok(())
}

/// Poll `CMD:$2C00` until it reads zero or the 10-frame budget elapses.
fn await_nmi_exe(
    wire: &mut dyn Wire,
    deadline: Instant,
    phase: &'static str,
) -> Result<(), DeviceError> {
    let poll_deadline = Instant::now() + NMI_EXE_POLL;
    while Instant::now() < poll_deadline {
        let check = vget(wire, Space::Cmd, &[(NMI_EXE_ADDR, 1)], deadline)?;
        if check[0] == 0 {
            return Ok(());
        }
    }
    Err(DeviceError::NmiExeUnavailable(phase))
}

/// Emit the copy routine followed by the inline write data.
pub(crate) fn copy_routine(writes: &[(u32, &[u8])]) -> Vec<u8> {
    let mut a = Emitter::new();

    // Keep execution clear of $2C00 itself; the disarm store lands there.
    a.nop();
    a.nop();

    a.rep(0x30);
    a.pha();
    a.phx();
    a.phy();
    a.phd();
    // MVN changes the data bank register.
    a.phb();

    let body = ROUTINE_BODY + MVN_RECORD * writes.len();
    let mut src = (NMI_EXE_ADDR as usize + body) as u16;
    for &(addr, data) in writes {
        let size = data.len() as u16;
        let dest_bank = (0x7E + ((addr - WRAM_BASE) >> 16)) as u8;
        let dest_offs = (addr & 0xFFFF) as u16;

        // A = byte count - 1, X = source, Y = destination for MVN.
        a.lda_imm16(size - 1);
        a.ldx_imm16(src);
        a.ldy_imm16(dest_offs);
        a.mvn(dest_bank, 0x00);

        src = src.wrapping_add(size);
    }
    a.plb();

    // Disarm the NMI vector override.
    a.sep(0x30);
    a.lda_imm8(0x00);
    a.sta_long(0x00_2C00);

    a.rep(0x30);
    a.pld();
    a.ply();
    a.plx();
    a.pla();

    // Chain to the original NMI handler.
    a.jmp_indirect(0xFFEA);

    debug_assert_eq!(a.len(), body, "copy routine body size drifted");

    for &(_, data) in writes {
        a.emit_bytes(data);
    }
    a.into_code()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_routine_body_is_0x1b() {
        let blob = copy_routine(&[]);
        assert_eq!(blob.len(), ROUTINE_BODY);
        assert_eq!(&blob[..2], &[0xEA, 0xEA]);
        // Ends with JMP ($FFEA).
        assert_eq!(&blob[blob.len() - 3..], &[0x6C, 0xEA, 0xFF]);
    }

    #[test]
    fn two_writes_emit_0x33_code_bytes_plus_data() {
        let w1 = vec![0xAA; 10];
        let w2 = vec![0xBB; 20];
        let writes: Vec<(u32, &[u8])> = vec![(0xF5_0010, &w1), (0xF5_0100, &w2)];
        let blob = copy_routine(&writes);

        let code_len = ROUTINE_BODY + 2 * MVN_RECORD;
        assert_eq!(code_len, 0x33);
        assert_eq!(blob.len(), code_len + 30);
        assert_eq!(&blob[code_len..code_len + 10], &w1[..]);
        assert_eq!(&blob[code_len + 10..], &w2[..]);
    }

    #[test]
    fn mvn_records_carry_bank_and_offsets() {
        let data = vec![0x11; 4];
        let writes: Vec<(u32, &[u8])> = vec![(0xF6_1234, &data)];
        let blob = copy_routine(&writes);

        let body = ROUTINE_BODY + MVN_RECORD;
        // Records start after the 9-byte prologue.
        let rec = &blob[9..9 + MVN_RECORD];
        assert_eq!(rec[0], 0xA9); // LDA #size-1
        assert_eq!(u16::from_le_bytes([rec[1], rec[2]]), 3);
        assert_eq!(rec[3], 0xA2); // LDX #source (inline data follows the body)
        assert_eq!(u16::from_le_bytes([rec[4], rec[5]]), 0x2C00 + body as u16);
        assert_eq!(rec[6], 0xA0); // LDY #dest offset
        assert_eq!(u16::from_le_bytes([rec[7], rec[8]]), 0x1234);
        // Second WRAM bank selects MVN dest bank $7F.
        assert_eq!(&rec[9..12], &[0x54, 0x7F, 0x00]);
    }
}
