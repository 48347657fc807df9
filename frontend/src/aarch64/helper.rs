//! Runtime helpers reached through the IR `call` op.
//!
//! Generated code names a helper by its stable [`HelperId`]; the
//! executor resolves the id and calls [`dispatch`] with the CPU state
//! and up to six argument values.

use super::cpu::{flag_state_from_raw, A64Cpu};
use crate::cc::CondCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum HelperId {
    /// `(cc_op, dst, src, src2) -> NZCV` in bits 31:28.
    NzcvAll = 1,
    /// `(cond, cc_op, dst, src, src2) -> 0 | 1`.
    CondHolds = 2,
    /// `(acc, value, bytes) -> crc`, IEEE polynomial.
    Crc32 = 3,
    /// `(acc, value, bytes) -> crc`, Castagnoli polynomial.
    Crc32c = 4,
    /// `(value, bits) -> value` with the low `bits` reversed.
    Rbit = 5,
    /// `() -> 0`; performs ERET on the CPU.
    Eret = 6,
}

impl HelperId {
    pub const fn from_u32(v: u32) -> Option<HelperId> {
        Some(match v {
            1 => HelperId::NzcvAll,
            2 => HelperId::CondHolds,
            3 => HelperId::Crc32,
            4 => HelperId::Crc32c,
            5 => HelperId::Rbit,
            6 => HelperId::Eret,
            _ => return None,
        })
    }

    pub const fn name(self) -> &'static str {
        match self {
            HelperId::NzcvAll => "nzcv_all",
            HelperId::CondHolds => "cond_holds",
            HelperId::Crc32 => "crc32",
            HelperId::Crc32c => "crc32c",
            HelperId::Rbit => "rbit",
            HelperId::Eret => "eret",
        }
    }
}

/// Reflected CRC-32 polynomials.
pub const CRC32_POLY: u32 = 0xedb8_8320;
pub const CRC32C_POLY: u32 = 0x82f6_3b78;

/// Fold the low `bytes` bytes of `value` into `acc`, least
/// significant byte first. No pre- or post-inversion, matching the
/// CRC32 instructions.
pub fn crc32_update(poly: u32, mut acc: u32, value: u64, bytes: u32) -> u32 {
    for i in 0..bytes.min(8) {
        acc ^= (value >> (i * 8)) as u8 as u32;
        for _ in 0..8 {
            let mask = (acc & 1).wrapping_neg();
            acc = (acc >> 1) ^ (poly & mask);
        }
    }
    acc
}

pub fn dispatch(id: HelperId, cpu: &mut A64Cpu, args: [u64; 6]) -> u64 {
    match id {
        HelperId::NzcvAll => {
            let [op, dst, src, src2, ..] = args;
            let state = flag_state_from_raw(op, dst, src, src2);
            state.materialize_all().to_nzcv() as u64
        }
        HelperId::CondHolds => {
            let [cond, op, dst, src, src2, _] = args;
            let state = flag_state_from_raw(op, dst, src, src2);
            state.test(CondCode::from_bits(cond as u32)) as u64
        }
        HelperId::Crc32 | HelperId::Crc32c => {
            let poly = if id == HelperId::Crc32 {
                CRC32_POLY
            } else {
                CRC32C_POLY
            };
            crc32_update(poly, args[0] as u32, args[1], args[2] as u32) as u64
        }
        HelperId::Rbit => {
            if args[1] == 32 {
                (args[0] as u32).reverse_bits() as u64
            } else {
                args[0].reverse_bits()
            }
        }
        HelperId::Eret => {
            cpu.exception_return();
            0
        }
    }
}
