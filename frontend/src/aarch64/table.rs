//! A64 opcode table.
//!
//! The patterns live in `decode/a64.decode`; `build.rs` turns them into
//! the matcher in [`super::insn_decode`]. The first pattern whose
//! `insn & mask == bits` wins, so feature-gated carve-outs (CFINV
//! inside the PSTATE-immediate space) precede the pattern they carve
//! out of. A word that matches no pattern is unallocated.

pub use super::insn_decode::{PatternInfo, PATTERNS};

/// Bumped whenever a pattern is added or an existing pattern changes
/// which words it claims.
pub const TABLE_VERSION: u16 = 4;

/// Instruction class of a feature-gated pattern.
///
/// The discriminant is stable and is reported in the syndrome of a
/// feature trap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum InsnClass {
    Cfinv = 8,
    Setf = 36,
    Crc32 = 41,
    Cas = 49,
    Ldapr = 52,
    AtomicMemOp = 53,
}

impl InsnClass {
    pub const fn id(self) -> u16 {
        self as u16
    }
}

/// First pattern claiming `insn`.
pub fn lookup(insn: u32) -> Option<&'static PatternInfo> {
    PATTERNS.iter().find(|p| insn & p.mask == p.bits)
}

/// Every pattern, in match order.
pub fn all_entries() -> impl Iterator<Item = &'static PatternInfo> {
    PATTERNS.iter()
}
