//! A64 CPU state (EL0/EL1, no FP/SIMD unit).

use std::mem::offset_of;

use super::features::A64Cfg;
use super::{A64DisasContext, A64Translator};
use crate::cc::{CcOp, CcSnapshot, EagerFlags, FlagState};
use crate::{
    translator_loop, AccessIntent, AccessKind, GuestCpu, GuestMemory,
    TbLimits, TbOutput, TranslateError,
};
use dbt_core::{Context, ExceptionKind, TbKey};

/// Number of general-purpose registers (X0-X30). Encoding 31 is
/// XZR or SP depending on the instruction.
pub const NUM_XREGS: usize = 31;

/// SCTLR_EL1.A: alignment checking of data accesses.
pub const SCTLR_A: u64 = 1 << 1;

/// PSTATE.{D,A,I,F} as held in `daif` (bits 9:6).
pub const DAIF_MASK: u64 = 0x3c0;

/// A64 CPU architectural state.
///
/// Layout is `#[repr(C)]` so IR globals can bind to fields at fixed
/// offsets from the env pointer.
#[repr(C)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct A64Cpu {
    pub xregs: [u64; NUM_XREGS],
    pub sp_el0: u64,
    pub sp_el1: u64,
    pub pc: u64,
    /// Lazy flags: raw [`CcOp`] plus its recorded operands.
    pub cc_op: u64,
    pub cc_dst: u64,
    pub cc_src: u64,
    pub cc_src2: u64,
    /// Exclusive monitor address; `u64::MAX` when open.
    pub exclusive_addr: u64,
    pub exclusive_val: u64,
    /// Upper doubleword of a 64-bit exclusive pair.
    pub exclusive_high: u64,
    /// Current exception level (0 or 1).
    pub el: u64,
    /// PSTATE.SP: at EL1, 1 selects SP_EL1.
    pub spsel: u64,
    pub daif: u64,
    pub fpcr: u64,
    pub fpsr: u64,
    pub tpidr_el0: u64,
    pub tpidrro_el0: u64,
    pub tpidr_el1: u64,
    pub sctlr_el1: u64,
    pub vbar_el1: u64,
    pub elr_el1: u64,
    pub spsr_el1: u64,
    pub esr_el1: u64,
    pub far_el1: u64,
    /// MIDR_EL1, copied from `cfg` at reset.
    pub midr: u64,
    pub cfg: A64Cfg,
}

// Field offsets (bytes) from the start of A64Cpu, used by
// `Context::new_global()` and by `gen_ld`/`gen_st` on env.

/// Byte offset of `xregs[0]`.
pub const XREGS_OFFSET: i64 = offset_of!(A64Cpu, xregs) as i64;

/// Byte offset of `xregs[i]`.
pub const fn xreg_offset(i: usize) -> i64 {
    XREGS_OFFSET + (i * 8) as i64
}

macro_rules! cpu_fields {
    ($($field:ident => $offset:ident),* $(,)?) => {
        $(pub const $offset: i64 = offset_of!(A64Cpu, $field) as i64;)*

        impl A64Cpu {
            /// Read the 64-bit field at `offset`, as generated code
            /// does through a global or `ld`.
            pub fn read_field(&self, offset: i64) -> Option<u64> {
                match offset {
                    $($offset => Some(self.$field),)*
                    o => self.xreg_slot(o).map(|i| self.xregs[i]),
                }
            }

            /// Write the 64-bit field at `offset`. Returns `false`
            /// if no field lives there.
            pub fn write_field(&mut self, offset: i64, val: u64) -> bool {
                match offset {
                    $($offset => self.$field = val,)*
                    o => match self.xreg_slot(o) {
                        Some(i) => self.xregs[i] = val,
                        None => return false,
                    },
                }
                true
            }
        }
    };
}

cpu_fields! {
    sp_el0 => SP_EL0_OFFSET,
    sp_el1 => SP_EL1_OFFSET,
    pc => PC_OFFSET,
    cc_op => CC_OP_OFFSET,
    cc_dst => CC_DST_OFFSET,
    cc_src => CC_SRC_OFFSET,
    cc_src2 => CC_SRC2_OFFSET,
    exclusive_addr => EXCLUSIVE_ADDR_OFFSET,
    exclusive_val => EXCLUSIVE_VAL_OFFSET,
    exclusive_high => EXCLUSIVE_HIGH_OFFSET,
    el => EL_OFFSET,
    spsel => SPSEL_OFFSET,
    daif => DAIF_OFFSET,
    fpcr => FPCR_OFFSET,
    fpsr => FPSR_OFFSET,
    tpidr_el0 => TPIDR_EL0_OFFSET,
    tpidrro_el0 => TPIDRRO_EL0_OFFSET,
    tpidr_el1 => TPIDR_EL1_OFFSET,
    sctlr_el1 => SCTLR_EL1_OFFSET,
    vbar_el1 => VBAR_EL1_OFFSET,
    elr_el1 => ELR_EL1_OFFSET,
    spsr_el1 => SPSR_EL1_OFFSET,
    esr_el1 => ESR_EL1_OFFSET,
    far_el1 => FAR_EL1_OFFSET,
    midr => MIDR_OFFSET,
}

// ── Block context fingerprint ────────────────────────────────────

/// Decode-time state folded into the block key.
///
/// Bits 1:0 hold the EL, bit 2 SPSel, bit 3 SCTLR_EL1.A.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TbFlags(u32);

impl TbFlags {
    const EL_MASK: u32 = 0b11;
    const SPSEL: u32 = 1 << 2;
    const ALIGN: u32 = 1 << 3;

    pub const fn new(el: u8, spsel: bool, align_check: bool) -> Self {
        Self(
            (el as u32 & Self::EL_MASK)
                | if spsel { Self::SPSEL } else { 0 }
                | if align_check { Self::ALIGN } else { 0 },
        )
    }

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits & (Self::EL_MASK | Self::SPSEL | Self::ALIGN))
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn el(self) -> u8 {
        (self.0 & Self::EL_MASK) as u8
    }

    pub const fn spsel(self) -> bool {
        self.0 & Self::SPSEL != 0
    }

    /// Every data access must be naturally aligned.
    pub const fn align_check(self) -> bool {
        self.0 & Self::ALIGN != 0
    }

    /// Whether SP means SP_EL1 rather than SP_EL0.
    pub const fn uses_sp_el1(self) -> bool {
        self.el() != 0 && self.spsel()
    }
}

// ── State access ─────────────────────────────────────────────────

/// Flag state described by raw `cc_*` field values.
pub fn flag_state_from_raw(
    cc_op: u64,
    dst: u64,
    src: u64,
    src2: u64,
) -> FlagState {
    match CcOp::from_raw(cc_op as u32) {
        Some(CcOp::Eager) => {
            FlagState::Eager(EagerFlags::from_nzcv(dst as u32))
        }
        Some(op) => FlagState::Deferred {
            op,
            snapshot: CcSnapshot::new(dst, src, src2),
        },
        None => unreachable!("corrupt cc_op {cc_op:#x}"),
    }
}

impl A64Cpu {
    /// Reset state: EL1 on SP_EL1 with all interrupts masked.
    pub fn new(cfg: A64Cfg) -> Self {
        Self {
            xregs: [0; NUM_XREGS],
            sp_el0: 0,
            sp_el1: 0,
            pc: 0,
            cc_op: CcOp::Eager.to_raw() as u64,
            cc_dst: 0,
            cc_src: 0,
            cc_src2: 0,
            exclusive_addr: u64::MAX,
            exclusive_val: 0,
            exclusive_high: 0,
            el: 1,
            spsel: 1,
            daif: DAIF_MASK,
            fpcr: 0,
            fpsr: 0,
            tpidr_el0: 0,
            tpidrro_el0: 0,
            tpidr_el1: 0,
            sctlr_el1: 0,
            vbar_el1: 0,
            elr_el1: 0,
            spsr_el1: 0,
            esr_el1: 0,
            far_el1: 0,
            midr: cfg.midr,
            cfg,
        }
    }

    fn xreg_slot(&self, offset: i64) -> Option<usize> {
        let rel = offset - XREGS_OFFSET;
        if rel < 0 || rel % 8 != 0 {
            return None;
        }
        let i = (rel / 8) as usize;
        (i < NUM_XREGS).then_some(i)
    }

    pub fn flag_state(&self) -> FlagState {
        flag_state_from_raw(self.cc_op, self.cc_dst, self.cc_src, self.cc_src2)
    }

    /// PSTATE.NZCV in bits 31:28, materialized from the lazy fields.
    pub fn nzcv(&self) -> u32 {
        self.flag_state().materialize_all().to_nzcv()
    }

    /// Overwrite NZCV; leaves the flags in eager form.
    pub fn set_nzcv(&mut self, nzcv: u32) {
        self.cc_op = CcOp::Eager.to_raw() as u64;
        self.cc_dst = (nzcv & 0xf000_0000) as u64;
        self.cc_src = 0;
        self.cc_src2 = 0;
    }

    pub fn tb_flags(&self) -> TbFlags {
        TbFlags::new(
            self.el as u8,
            self.spsel != 0,
            self.sctlr_el1 & SCTLR_A != 0,
        )
    }

    /// Current stack pointer.
    pub fn sp(&self) -> u64 {
        if self.tb_flags().uses_sp_el1() {
            self.sp_el1
        } else {
            self.sp_el0
        }
    }

    pub fn set_sp(&mut self, val: u64) {
        if self.tb_flags().uses_sp_el1() {
            self.sp_el1 = val;
        } else {
            self.sp_el0 = val;
        }
    }

    /// Saved program status for exception entry: NZCV, DAIF and
    /// M[3:0] = EL:SPSel.
    fn pstate(&self) -> u64 {
        self.nzcv() as u64
            | (self.daif & DAIF_MASK)
            | (self.el & 3) << 2
            | (self.spsel & 1)
    }

    /// Take a synchronous exception to EL1.
    ///
    /// `pc` is the address of the raising instruction; the preferred
    /// return address is the next one for calls.
    pub fn take_exception(
        &mut self,
        kind: ExceptionKind,
        syndrome: u32,
        pc: u64,
    ) {
        self.spsr_el1 = self.pstate();
        self.elr_el1 = if kind.returns_to_next() {
            pc.wrapping_add(4)
        } else {
            pc
        };
        self.esr_el1 = syndrome as u64;
        if kind == ExceptionKind::PcAlignment {
            self.far_el1 = pc;
        }
        self.exclusive_addr = u64::MAX;

        let vector = match (self.el, self.spsel) {
            (0, _) => 0x400,
            (_, 0) => 0x000,
            _ => 0x200,
        };
        self.set_nzcv(self.nzcv());
        self.el = 1;
        self.spsel = 1;
        self.daif = DAIF_MASK;
        self.pc = self.vbar_el1.wrapping_add(vector);
    }

    /// ERET from EL1: restore PSTATE from SPSR_EL1 and resume at
    /// ELR_EL1. A saved EL above 1 returns to EL1.
    pub fn exception_return(&mut self) {
        let spsr = self.spsr_el1;
        self.set_nzcv(spsr as u32);
        self.daif = spsr & DAIF_MASK;
        self.el = ((spsr >> 2) & 3).min(1);
        self.spsel = spsr & 1;
        self.pc = self.elr_el1;
        self.exclusive_addr = u64::MAX;
    }
}

impl Default for A64Cpu {
    fn default() -> Self {
        Self::new(A64Cfg::default())
    }
}

// ── Translation entry ────────────────────────────────────────────

impl GuestCpu for A64Cpu {
    fn tb_key(&self) -> TbKey {
        TbKey::new(self.pc, self.tb_flags().bits(), self.cfg.features.bits())
    }

    fn gen_code(
        &self,
        ir: &mut Context,
        key: TbKey,
        limits: TbLimits,
        mem: &dyn GuestMemory,
    ) -> Result<TbOutput, TranslateError> {
        // A misaligned pc raises before any fetch.
        let phys_pc = if key.pc & 3 != 0 {
            key.pc
        } else {
            mem.translate_for_access(
                key.pc,
                4,
                AccessIntent::new(AccessKind::Fetch, 4),
            )
            .map_err(|fault| TranslateError::FetchFault {
                addr: key.pc,
                fault,
            })?
        };

        let mut ctx = A64DisasContext::new(key, limits);
        translator_loop::<A64Translator>(&mut ctx, ir, mem)?;

        let base = ctx.base;
        Ok(TbOutput {
            size: base.size(),
            icount: u16::try_from(base.num_insns).unwrap_or(u16::MAX),
            exits: base.exits,
            phys_pc,
            data: base.data,
        })
    }
}
