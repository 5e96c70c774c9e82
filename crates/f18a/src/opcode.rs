//! 18-bit instruction word codec.
//!
//! A word packs four opcode slots of 5/5/5/3 bits at offsets 13/8/3/0.
//! Each slot is XORed with its own mask on the wire; branch addresses
//! and `@p` literals are raw. Slot 3 stores only the high three bits of
//! an opcode, so it can encode just the opcodes divisible by four.

/// 18-bit word mask.
pub const WORD_MASK: u32 = 0x3FFFF;

/// Per-slot XOR masks applied to the opcode bits.
pub const SLOT_MASKS: [u32; 4] = [0b01010, 0b10101, 0b01010, 0b101];

/// Bit offset of each slot within the word.
pub const SLOT_SHIFTS: [u32; 4] = [13, 8, 3, 0];

/// Branch-address field width per slot: 13 bits from slot 0, 8 from
/// slot 1, 3 from slot 2. Slot 3 cannot hold a branch.
pub const ADDR_MASKS: [u32; 3] = [0x1FFF, 0xFF, 0x7];

/// The F18A opcode set, in hardware numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Op {
    /// `;` - return: pop R into P, end the word.
    Ret = 0,
    /// `ex` - exchange P and R.
    Ex = 1,
    /// `jump` - unconditional branch.
    Jump = 2,
    /// `call` - branch pushing the old P onto the return stack.
    Call = 3,
    /// `unext` - loop back to slot 0 of the current word while R ≠ 0.
    Unext = 4,
    /// `next` - decrement-and-branch loop on R.
    Next = 5,
    /// `if` - branch when T is zero.
    If = 6,
    /// `-if` - branch when T's sign bit is clear.
    MinusIf = 7,
    /// `@p` - fetch literal via P (autoincrement).
    FetchP = 8,
    /// `@+` - fetch via A, increment A.
    FetchPlus = 9,
    /// `@b` - fetch via B.
    FetchB = 10,
    /// `@` - fetch via A.
    Fetch = 11,
    /// `!p` - store via P (autoincrement).
    StoreP = 12,
    /// `!+` - store via A, increment A.
    StorePlus = 13,
    /// `!b` - store via B.
    StoreB = 14,
    /// `!` - store via A.
    Store = 15,
    /// `+*` - multiply step over the 36-bit T:A pair.
    MultStep = 16,
    /// `2*` - left shift.
    TwoStar = 17,
    /// `2/` - arithmetic right shift.
    TwoSlash = 18,
    /// `-` - bitwise NOT.
    Not = 19,
    /// `+` - add S into T.
    Plus = 20,
    /// `and`.
    And = 21,
    /// `or` - exclusive or, per F18A convention.
    Or = 22,
    /// `drop`.
    Drop = 23,
    /// `dup`.
    Dup = 24,
    /// `pop` - move R to T.
    Pop = 25,
    /// `over`.
    Over = 26,
    /// `a` - push A onto the data stack.
    PushA = 27,
    /// `.` - nop.
    Nop = 28,
    /// `push` - move T to R.
    Push = 29,
    /// `b!` - store T into B.
    BStore = 30,
    /// `a!` - store T into A.
    AStore = 31,
}

impl Op {
    /// All 32 opcodes in hardware order.
    pub const ALL: [Op; 32] = [
        Op::Ret,
        Op::Ex,
        Op::Jump,
        Op::Call,
        Op::Unext,
        Op::Next,
        Op::If,
        Op::MinusIf,
        Op::FetchP,
        Op::FetchPlus,
        Op::FetchB,
        Op::Fetch,
        Op::StoreP,
        Op::StorePlus,
        Op::StoreB,
        Op::Store,
        Op::MultStep,
        Op::TwoStar,
        Op::TwoSlash,
        Op::Not,
        Op::Plus,
        Op::And,
        Op::Or,
        Op::Drop,
        Op::Dup,
        Op::Pop,
        Op::Over,
        Op::PushA,
        Op::Nop,
        Op::Push,
        Op::BStore,
        Op::AStore,
    ];

    #[must_use]
    pub const fn from_bits(bits: u32) -> Op {
        Op::ALL[(bits & 0x1F) as usize]
    }

    #[must_use]
    pub const fn bits(self) -> u32 {
        self as u32
    }

    /// Branch opcodes consume the rest of the word as an address.
    #[must_use]
    pub const fn is_branch(self) -> bool {
        matches!(self, Op::Jump | Op::Call | Op::Next | Op::If | Op::MinusIf)
    }

    /// `;` and `ex` consume the rest of the word without an address.
    #[must_use]
    pub const fn ends_word(self) -> bool {
        matches!(self, Op::Ret | Op::Ex)
    }

    /// Assembler mnemonic.
    #[must_use]
    pub const fn mnemonic(self) -> &'static str {
        match self {
            Op::Ret => ";",
            Op::Ex => "ex",
            Op::Jump => "jump",
            Op::Call => "call",
            Op::Unext => "unext",
            Op::Next => "next",
            Op::If => "if",
            Op::MinusIf => "-if",
            Op::FetchP => "@p",
            Op::FetchPlus => "@+",
            Op::FetchB => "@b",
            Op::Fetch => "@",
            Op::StoreP => "!p",
            Op::StorePlus => "!+",
            Op::StoreB => "!b",
            Op::Store => "!",
            Op::MultStep => "+*",
            Op::TwoStar => "2*",
            Op::TwoSlash => "2/",
            Op::Not => "-",
            Op::Plus => "+",
            Op::And => "and",
            Op::Or => "or",
            Op::Drop => "drop",
            Op::Dup => "dup",
            Op::Pop => "pop",
            Op::Over => "over",
            Op::PushA => "a",
            Op::Nop => ".",
            Op::Push => "push",
            Op::BStore => "b!",
            Op::AStore => "a!",
        }
    }
}

/// Extract the opcode in the given slot, undoing the XOR mask.
///
/// Slot 3 yields the stored three bits times four.
#[must_use]
pub const fn slot_op(word: u32, slot: usize) -> Op {
    let bits = if slot == 3 {
        ((word & 0x7) ^ SLOT_MASKS[3]) << 2
    } else {
        ((word >> SLOT_SHIFTS[slot]) & 0x1F) ^ SLOT_MASKS[slot]
    };
    Op::from_bits(bits)
}

/// Extract the raw branch address field following the given slot.
#[must_use]
pub const fn slot_addr(word: u32, slot: usize) -> u16 {
    (word & ADDR_MASKS[slot]) as u16
}

/// Encode up to four opcodes into a word, masking each slot.
///
/// Returns an error for a slot-3 opcode that is not divisible by four,
/// or a branch/word-ending opcode anywhere but the final used slot
/// (its tail would be overwritten).
pub fn encode(ops: &[Op]) -> Result<u32, String> {
    let mut word: u32 = 0;
    for (slot, &op) in ops.iter().enumerate() {
        if slot >= 4 {
            return Err(format!("too many slots: {}", ops.len()));
        }
        if slot == 3 {
            if op.bits() % 4 != 0 {
                return Err(format!("opcode {} invalid in slot 3", op.mnemonic()));
            }
            word |= (op.bits() >> 2) ^ SLOT_MASKS[3];
        } else {
            if (op.is_branch() || op.ends_word()) && slot + 1 != ops.len() {
                return Err(format!("{} must end the word", op.mnemonic()));
            }
            if op.is_branch() {
                return Err(format!("{} needs an address; use encode_branch", op.mnemonic()));
            }
            word |= (op.bits() ^ SLOT_MASKS[slot]) << SLOT_SHIFTS[slot];
        }
    }
    // Unused tail slots read back as nops.
    for slot in ops.len()..4 {
        if slot == 3 {
            word |= (Op::Nop.bits() >> 2) ^ SLOT_MASKS[3];
        } else {
            word |= (Op::Nop.bits() ^ SLOT_MASKS[slot]) << SLOT_SHIFTS[slot];
        }
    }
    Ok(word & WORD_MASK)
}

/// Encode leading opcodes followed by a branch with its address.
///
/// The branch sits in slot `ops.len()` and the address occupies the
/// rest of the word, raw. Slot 2 addresses are limited to three bits.
pub fn encode_branch(ops: &[Op], branch: Op, addr: u16) -> Result<u32, String> {
    let slot = ops.len();
    if slot > 2 {
        return Err("branches cannot sit in slot 3".to_string());
    }
    if !branch.is_branch() {
        return Err(format!("{} is not a branch", branch.mnemonic()));
    }
    if u32::from(addr) > ADDR_MASKS[slot] {
        return Err(format!(
            "address {addr:#X} overflows the {}-bit slot-{slot} field",
            match slot {
                0 => 13,
                1 => 8,
                _ => 3,
            }
        ));
    }
    let mut word: u32 = 0;
    for (s, &op) in ops.iter().enumerate() {
        if op.is_branch() || op.ends_word() {
            return Err(format!("{} must end the word", op.mnemonic()));
        }
        word |= (op.bits() ^ SLOT_MASKS[s]) << SLOT_SHIFTS[s];
    }
    word |= (branch.bits() ^ SLOT_MASKS[slot]) << SLOT_SHIFTS[slot];
    word |= u32::from(addr);
    Ok(word & WORD_MASK)
}

/// Encode a word that ends with `;` or `ex` after the given opcodes.
pub fn encode_ending(ops: &[Op], end: Op) -> Result<u32, String> {
    let slot = ops.len();
    if !end.ends_word() {
        return Err(format!("{} does not end a word", end.mnemonic()));
    }
    if slot > 3 || (slot == 3 && end.bits() % 4 != 0) {
        return Err(format!("{} does not fit slot {slot}", end.mnemonic()));
    }
    let mut word: u32 = 0;
    for (s, &op) in ops.iter().enumerate() {
        if op.is_branch() || op.ends_word() {
            return Err(format!("{} must end the word", op.mnemonic()));
        }
        word |= (op.bits() ^ SLOT_MASKS[s]) << SLOT_SHIFTS[s];
    }
    if slot == 3 {
        word |= (end.bits() >> 2) ^ SLOT_MASKS[3];
    } else {
        word |= (end.bits() ^ SLOT_MASKS[slot]) << SLOT_SHIFTS[slot];
        // Remaining slots decode as nops for the disassembler's benefit;
        // the hardware never executes past a word-ending opcode.
        for s in slot + 1..4 {
            if s == 3 {
                word |= (Op::Nop.bits() >> 2) ^ SLOT_MASKS[3];
            } else {
                word |= (Op::Nop.bits() ^ SLOT_MASKS[s]) << SLOT_SHIFTS[s];
            }
        }
    }
    Ok(word & WORD_MASK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_extraction_reverses_encode() {
        let word = encode(&[Op::FetchP, Op::Dup, Op::AStore, Op::Nop]).expect("encodes");
        assert_eq!(slot_op(word, 0), Op::FetchP);
        assert_eq!(slot_op(word, 1), Op::Dup);
        assert_eq!(slot_op(word, 2), Op::AStore);
        assert_eq!(slot_op(word, 3), Op::Nop);
    }

    #[test]
    fn slot3_accepts_only_multiples_of_four() {
        assert!(encode(&[Op::Nop, Op::Nop, Op::Nop, Op::Unext]).is_ok());
        assert!(encode(&[Op::Nop, Op::Nop, Op::Nop, Op::Dup]).is_ok());
        assert!(encode(&[Op::Nop, Op::Nop, Op::Nop, Op::Drop]).is_err());
        assert!(encode(&[Op::Nop, Op::Nop, Op::Nop, Op::AStore]).is_err());
    }

    #[test]
    fn branch_addresses_are_raw() {
        let word = encode_branch(&[], Op::Call, 0x1D5).expect("encodes");
        assert_eq!(slot_op(word, 0), Op::Call);
        assert_eq!(slot_addr(word, 0), 0x1D5);
        // The address bits must not be disturbed by any mask.
        assert_eq!(word & 0x1FFF, 0x1D5);
    }

    #[test]
    fn slot1_branch_takes_eight_bits() {
        let word = encode_branch(&[Op::FetchB], Op::MinusIf, 0xAB).expect("encodes");
        assert_eq!(slot_op(word, 0), Op::FetchB);
        assert_eq!(slot_op(word, 1), Op::MinusIf);
        assert_eq!(slot_addr(word, 1), 0xAB);
        assert!(encode_branch(&[Op::FetchB], Op::Jump, 0x100).is_err());
    }

    #[test]
    fn slot2_branch_overflow_rejected() {
        assert!(encode_branch(&[Op::Nop, Op::Nop], Op::If, 0x7).is_ok());
        assert!(encode_branch(&[Op::Nop, Op::Nop], Op::If, 0x8).is_err());
    }

    #[test]
    fn ret_word_decodes() {
        let word = encode_ending(&[], Op::Ret).expect("encodes");
        assert_eq!(slot_op(word, 0), Op::Ret);
    }

    #[test]
    fn random_op_tuples_round_trip() {
        use rand::{Rng, SeedableRng};

        // Plain opcodes legal anywhere (no branches, no word enders).
        let plain: Vec<Op> =
            Op::ALL.into_iter().filter(|op| !op.is_branch() && !op.ends_word()).collect();
        let slot3: Vec<Op> =
            plain.iter().copied().filter(|op| op.bits() % 4 == 0).collect();

        let mut rng = rand::rngs::StdRng::seed_from_u64(0x708);
        for _ in 0..2000 {
            let ops = [
                plain[rng.random_range(0..plain.len())],
                plain[rng.random_range(0..plain.len())],
                plain[rng.random_range(0..plain.len())],
                slot3[rng.random_range(0..slot3.len())],
            ];
            let word = encode(&ops).expect("encodes");
            for (slot, &op) in ops.iter().enumerate() {
                assert_eq!(slot_op(word, slot), op);
            }
        }
    }

    #[test]
    fn every_op_round_trips_in_every_legal_slot() {
        for op in Op::ALL {
            for slot in 0..4 {
                if op.is_branch() || op.ends_word() {
                    continue;
                }
                if slot == 3 && op.bits() % 4 != 0 {
                    continue;
                }
                let mut ops = vec![Op::Nop; slot];
                ops.push(op);
                let word = encode(&ops).expect("encodes");
                assert_eq!(slot_op(word, slot), op, "op {} slot {slot}", op.mnemonic());
            }
        }
    }
}
