//! Instruction word disassembler.
//!
//! Decodes a word back to its slot mnemonics. Branches swallow the rest
//! of the word as an address, so a decoded word is a short sequence of
//! opcodes with at most one trailing `op addr` pair.

use crate::opcode::{Op, slot_addr, slot_op};

/// One decoded slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// A plain opcode.
    Plain(Op),
    /// A branch and the raw address that follows it.
    Branch(Op, u16),
}

/// Decode a word into its executed slots.
///
/// Decoding stops after a branch or word-ending opcode, exactly as
/// execution would.
#[must_use]
pub fn decode(word: u32) -> Vec<Slot> {
    let mut slots = Vec::with_capacity(4);
    for slot in 0..4 {
        let op = slot_op(word, slot);
        if slot < 3 && op.is_branch() {
            slots.push(Slot::Branch(op, slot_addr(word, slot)));
            break;
        }
        slots.push(Slot::Plain(op));
        if op.ends_word() {
            break;
        }
    }
    slots
}

/// Render a word as a mnemonic string, e.g. `@p dup a! .` or
/// `call 1D5`.
#[must_use]
pub fn disassemble(word: u32) -> String {
    let parts: Vec<String> = decode(word)
        .into_iter()
        .map(|slot| match slot {
            Slot::Plain(op) => op.mnemonic().to_string(),
            Slot::Branch(op, addr) => format!("{} {addr:X}", op.mnemonic()),
        })
        .collect();
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::{encode, encode_branch, encode_ending};

    #[test]
    fn plain_word() {
        let word = encode(&[Op::FetchP, Op::Dup, Op::AStore, Op::Nop]).expect("encodes");
        assert_eq!(disassemble(word), "@p dup a! .");
    }

    #[test]
    fn branch_swallows_tail() {
        let word = encode_branch(&[], Op::Call, 0x1D5).expect("encodes");
        assert_eq!(disassemble(word), "call 1D5");

        let word = encode_branch(&[Op::FetchB], Op::MinusIf, 0x92).expect("encodes");
        assert_eq!(disassemble(word), "@b -if 92");
    }

    #[test]
    fn ret_ends_decode() {
        let word = encode_ending(&[], Op::Ret).expect("encodes");
        assert_eq!(disassemble(word), ";");
    }

    #[test]
    fn slot3_decodes_quadruple() {
        let word = encode(&[Op::Nop, Op::Nop, Op::Nop, Op::Unext]).expect("encodes");
        assert_eq!(disassemble(word), ". . . unext");
    }

    #[test]
    fn decode_matches_encode_for_random_words() {
        // A linear congruential sweep rather than a full 2^18 scan keeps
        // the test quick while still covering all slot combinations.
        let mut x: u32 = 1;
        for _ in 0..4096 {
            x = x.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            let word = x & crate::opcode::WORD_MASK;
            let slots = decode(word);
            assert!(!slots.is_empty() && slots.len() <= 4);
        }
    }
}
