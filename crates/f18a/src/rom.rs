//! Async-boot ROM firmware for node 708.
//!
//! Real F18A code, assembled word by word, that receives the serial
//! boot stream on pin17 (read through bit 17 of the I/O register),
//! reconstructs 18-bit words, and interprets one boot frame:
//! `[completion] [addr] [count] [count words]`, stored ascending from
//! `addr`, then a jump to `completion` — the builder-generated RAM
//! loader that pumps the rest of the stream into the mesh.
//!
//! ## Auto-baud
//!
//! Every word's first wire byte opens with a double-wide HIGH pulse
//! (start bit plus data bit 0), so the receiver re-measures the bit
//! period at each word. The measuring loop and the delay loop execute
//! identical opcode mixes (one I/O fetch, one conditional, one drop,
//! one literal add, one zero test, one jump per iteration), so thermal
//! slowdown scales both equally and cancels out of the ratio.
//!
//! ## Polarity
//!
//! The wire inverts data bits (RS232 through the level shifter) and
//! the byte encoding XORs each byte with 0xFF; the two inversions
//! cancel, so a HIGH sample is directly a set word bit. Bits arrive
//! low-to-high and are merged at bit 17 of a right-shifting
//! accumulator; the five fixed calibration bits of each first byte
//! simply fall off the bottom after 23 merges, leaving the 18-bit
//! word.
//!
//! ## Register budget
//!
//! B stays at the I/O register (its reset value). A carries the
//! measured half-bit delay count inside a word receive; `rx18` saves
//! and restores the caller's A so the loader can keep its store
//! pointer there across calls.

use crate::opcode::{Op, encode, encode_branch, encode_ending};

/// First ROM address.
pub const ROM_BASE: u16 = 0x80;

/// `delay` ( k -- ) : burn k calibrated loop units.
pub const DELAY: u16 = ROM_BASE;
/// `edge` ( -- ) : wait for LOW, then return at the next rising edge.
pub const EDGE: u16 = ROM_BASE + 0x06;
/// `measure` ( acc -- acc c ) : count loop units while the line is HIGH.
pub const MEASURE: u16 = ROM_BASE + 0x0C;
/// `bitin` ( acc -- acc' ) : delay one bit, sample, shift-merge.
pub const BITIN: u16 = ROM_BASE + 0x14;
/// `bits` ( acc n -- acc' ) : n+1 bit samples at bit-period cadence.
pub const BITS: u16 = ROM_BASE + 0x1C;
/// `rx-cal` ( acc -- acc' ) : calibrate on a first byte, merge 7 bits.
pub const RX_CAL: u16 = ROM_BASE + 0x20;
/// `rx-byte` ( acc -- acc' ) : receive one plain byte, merge 8 bits.
pub const RX_BYTE: u16 = ROM_BASE + 0x28;
/// `rx18` ( -- w ) : receive one 18-bit word; preserves A.
pub const RX18: u16 = ROM_BASE + 0x2E;
/// Cold entry: calibrate on the 0xAE magic, then run the boot frame.
pub const COLD: u16 = ROM_BASE + 0x35;

/// Delay-count trim: the fixed per-bit overhead outside the delay
/// loop, in loop units (one unit is 30 ns of base time).
const OVERHEAD_UNITS: u32 = 2;

/// 18-bit two's-complement of a small positive count.
const fn neg18(n: u32) -> u32 {
    n.wrapping_neg() & 0x3FFFF
}

/// Assemble the 64-word boot ROM image.
#[must_use]
pub fn build() -> [u32; 64] {
    let mut rom = [0u32; 64];
    let mut at = |addr: u16, word: Result<u32, String>| {
        rom[(addr - ROM_BASE) as usize] = word.expect("rom word encodes");
    };

    // -- delay ( k -- ) -------------------------------------------------
    // Each iteration reads the I/O register purely for timing parity
    // with `measure`; the -if target is the fall-through word either
    // way, so the pin level cannot affect control flow.
    at(DELAY, encode_branch(&[Op::FetchB], Op::MinusIf, (DELAY + 1) & 0xFF));
    at(DELAY + 1, encode(&[Op::Drop, Op::FetchP, Op::Plus, Op::Nop]));
    at(DELAY + 2, Ok(neg18(1)));
    at(DELAY + 3, encode_branch(&[], Op::If, DELAY + 5));
    at(DELAY + 4, encode_branch(&[], Op::Jump, DELAY));
    at(DELAY + 5, encode_ending(&[Op::Drop], Op::Ret));

    // -- edge ( -- ) ----------------------------------------------------
    // Wait out any HIGH tail, then return the moment the line rises.
    at(EDGE, encode_branch(&[Op::FetchB], Op::MinusIf, (EDGE + 2) & 0xFF));
    at(EDGE + 1, encode_branch(&[Op::Drop], Op::Jump, EDGE & 0xFF));
    at(EDGE + 2, encode(&[Op::Drop, Op::Nop, Op::Nop, Op::Nop]));
    at(EDGE + 3, encode_branch(&[Op::FetchB], Op::MinusIf, (EDGE + 5) & 0xFF));
    at(EDGE + 4, encode_ending(&[Op::Drop], Op::Ret));
    at(EDGE + 5, encode_branch(&[Op::Drop], Op::Jump, (EDGE + 3) & 0xFF));

    // -- measure ( acc -- acc c ) --------------------------------------
    // Counts loop units while the line holds HIGH; on the first byte of
    // a word that span is the start bit plus data bit 0, two bit
    // periods. The `if` filler never fires (the counter is nonzero) but
    // keeps the opcode mix identical to `delay`.
    at(MEASURE, encode_branch(&[], Op::Call, EDGE));
    at(MEASURE + 1, encode(&[Op::Dup, Op::Dup, Op::Or, Op::Nop]));
    at(MEASURE + 2, encode_branch(&[Op::FetchB], Op::MinusIf, (MEASURE + 7) & 0xFF));
    at(MEASURE + 3, encode(&[Op::Drop, Op::FetchP, Op::Plus, Op::Nop]));
    at(MEASURE + 4, Ok(1));
    at(MEASURE + 5, encode_branch(&[], Op::If, MEASURE + 2));
    at(MEASURE + 6, encode_branch(&[], Op::Jump, MEASURE + 2));
    at(MEASURE + 7, encode_ending(&[Op::Drop], Op::Ret));

    // -- bitin ( acc -- acc' ) -----------------------------------------
    // Logical right shift (2/ then mask), sample, merge at bit 17,
    // then one bit period of delay from A.
    at(BITIN, encode(&[Op::TwoSlash, Op::FetchP, Op::And, Op::Nop]));
    at(BITIN + 1, Ok(0x1FFFF));
    at(BITIN + 2, encode_branch(&[Op::FetchB], Op::MinusIf, (BITIN + 7) & 0xFF));
    at(BITIN + 3, encode(&[Op::Drop, Op::FetchP, Op::Plus, Op::Nop]));
    at(BITIN + 4, Ok(0x20000));
    at(BITIN + 5, encode_branch(&[Op::PushA], Op::Call, DELAY & 0xFF));
    at(BITIN + 6, encode_ending(&[], Op::Ret));
    at(BITIN + 7, encode_branch(&[Op::Drop], Op::Jump, (BITIN + 5) & 0xFF));

    // -- bits ( acc n -- acc' ) ----------------------------------------
    at(BITS, encode(&[Op::Push, Op::Nop, Op::Nop, Op::Nop]));
    at(BITS + 1, encode_branch(&[], Op::Call, BITIN));
    at(BITS + 2, encode_branch(&[], Op::Next, BITS + 1));
    at(BITS + 3, encode_ending(&[], Op::Ret));

    // -- rx-cal ( acc -- acc' ) ----------------------------------------
    // Measure the double-wide opening pulse, keep the half-bit count in
    // A, wait a quarter period to the middle of bit 1, then take the
    // seven remaining samples of the byte.
    at(RX_CAL, encode_branch(&[], Op::Call, MEASURE));
    at(RX_CAL + 1, encode(&[Op::TwoSlash, Op::FetchP, Op::Plus, Op::Nop]));
    at(RX_CAL + 2, Ok(neg18(OVERHEAD_UNITS)));
    at(RX_CAL + 3, encode(&[Op::Dup, Op::AStore, Op::TwoSlash, Op::Nop]));
    at(RX_CAL + 4, encode_branch(&[], Op::Call, DELAY));
    at(RX_CAL + 5, encode_branch(&[Op::FetchP], Op::Call, BITS & 0xFF));
    at(RX_CAL + 6, Ok(6));
    at(RX_CAL + 7, encode_ending(&[], Op::Ret));

    // -- rx-byte ( acc -- acc' ) ---------------------------------------
    // Wait for the start edge, delay one and a half bits into the
    // middle of bit 0, then take all eight samples.
    at(RX_BYTE, encode_branch(&[], Op::Call, EDGE));
    at(RX_BYTE + 1, encode(&[Op::PushA, Op::Dup, Op::TwoSlash, Op::Plus]));
    at(RX_BYTE + 2, encode_branch(&[], Op::Call, DELAY));
    at(RX_BYTE + 3, encode_branch(&[Op::FetchP], Op::Call, BITS & 0xFF));
    at(RX_BYTE + 4, Ok(7));
    at(RX_BYTE + 5, encode_ending(&[], Op::Ret));

    // -- rx18 ( -- w ) --------------------------------------------------
    at(RX18, encode(&[Op::PushA, Op::Push, Op::Nop, Op::Nop]));
    at(RX18 + 1, encode(&[Op::Dup, Op::Dup, Op::Or, Op::Nop]));
    at(RX18 + 2, encode_branch(&[], Op::Call, RX_CAL));
    at(RX18 + 3, encode_branch(&[], Op::Call, RX_BYTE));
    at(RX18 + 4, encode_branch(&[], Op::Call, RX_BYTE));
    at(RX18 + 5, encode(&[Op::Pop, Op::AStore, Op::Nop, Op::Nop]));
    at(RX18 + 6, encode_ending(&[], Op::Ret));

    // -- cold ------------------------------------------------------------
    // Calibrate and discard the 0xAE magic byte, then interpret one
    // boot frame. The completion address rides the return stack under
    // the store count, so the final `;` jumps straight into the
    // freshly stored loader.
    at(COLD, encode_branch(&[Op::FetchP], Op::Call, RX_CAL & 0xFF));
    at(COLD + 1, Ok(0));
    at(COLD + 2, encode_branch(&[Op::Drop], Op::Call, RX18 & 0xFF));
    at(COLD + 3, encode_branch(&[Op::Push], Op::Call, RX18 & 0xFF));
    at(COLD + 4, encode_branch(&[Op::AStore], Op::Call, RX18 & 0xFF));
    at(COLD + 5, encode(&[Op::Push, Op::Nop, Op::Nop, Op::Nop]));
    at(COLD + 6, encode_branch(&[], Op::Call, RX18));
    at(COLD + 7, encode_branch(&[Op::StorePlus], Op::Next, (COLD + 6) & 0xFF));
    at(COLD + 8, encode_ending(&[], Op::Ret));

    rom
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disasm::disassemble;

    #[test]
    fn layout_fits_and_does_not_overlap() {
        let regions = [
            (DELAY, 6),
            (EDGE, 6),
            (MEASURE, 8),
            (BITIN, 8),
            (BITS, 4),
            (RX_CAL, 8),
            (RX_BYTE, 6),
            (RX18, 7),
            (COLD, 9),
        ];
        let mut used = [false; 64];
        for (base, len) in regions {
            for off in 0..len {
                let idx = (base + off - ROM_BASE) as usize;
                assert!(idx < 64, "routine at {base:#X} overflows ROM");
                assert!(!used[idx], "overlap at {:#X}", base + off);
                used[idx] = true;
            }
        }
    }

    #[test]
    fn builds_without_panicking() {
        let rom = build();
        assert_eq!(rom.len(), 64);
    }

    #[test]
    fn key_words_disassemble_as_designed() {
        let rom = build();
        let word = |addr: u16| rom[(addr - ROM_BASE) as usize];
        assert_eq!(disassemble(word(RX18)), "a push . .");
        assert_eq!(disassemble(word(RX18 + 5)), "pop a! . .");
        assert_eq!(disassemble(word(MEASURE + 1)), "dup dup or .");
        assert_eq!(disassemble(word(COLD + 7)), format!("!+ next {:X}", COLD + 6));
        assert_eq!(disassemble(word(DELAY + 5)), "drop ;");
    }

    #[test]
    fn slot1_call_targets_fit_eight_bits() {
        // Every callee referenced from a slot-1 call must live below
        // 0x100; the whole ROM does.
        for addr in [DELAY, EDGE, MEASURE, BITIN, BITS, RX_CAL, RX_BYTE, RX18, COLD] {
            assert!(addr < 0x100);
        }
    }
}
