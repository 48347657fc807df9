//! A64 instruction translation: IR generation per decoded shape.
//!
//! Guest registers live in 64-bit globals. A 32-bit (`sf == false`)
//! operation reads zero-extended operands and truncates its result on
//! write-back. Flag-setting operations record a lazy tag in the
//! `cc_*` globals (see [`crate::cc`]); a reader whose tag is known at
//! translation time tests its condition straight from the recorded
//! operands, anything else goes through the `CondHolds` helper.

use super::cpu::{DAIF_MASK, DAIF_OFFSET, SPSEL_OFFSET};
use super::decode::{
    AddrMode, BarrierKind, BitfieldOp, BranchRegOp, CselOp, Dp1Op, Dp2Op,
    Dp3Op, Extend, Insn, LdStOp, LiteralKind, LogicOp, MovWideOp,
    PstateField, ShiftType,
};
use super::helper::HelperId;
use super::sysreg::{
    self, Storage, SysOp, SysReg, SysRegDesc, SysRegEnc, ZVA_BLOCK,
};
use super::A64DisasContext;
use crate::cc::{CcOp, CondCode, Flag, Width};
use crate::{
    AccessIntent, AccessKind, DisasJumpType, GuestMemory, TranslateError,
    GUEST_PAGE_SIZE,
};
use dbt_core::{
    mb, Cond, Context, ExceptionKind, ExitEdge, MemOp, Opcode, RmwOp, TempIdx,
    Type, TB_EXIT_NOCHAIN,
};

/// Binary IR operation: `fn(ir, ty, dst, lhs, rhs) -> dst`.
type BinOp = fn(&mut Context, Type, TempIdx, TempIdx, TempIdx) -> TempIdx;

/// A condition lowered to a single IR comparison `a cond b`.
#[derive(Debug, Clone, Copy)]
struct CmpCc {
    cond: Cond,
    ty: Type,
    a: TempIdx,
    b: TempIdx,
}

impl CmpCc {
    fn fixed(ir: &mut Context, cond: Cond) -> Self {
        let z = ir.new_const(Type::I64, 0);
        Self {
            cond,
            ty: Type::I64,
            a: z,
            b: z,
        }
    }

    /// Sign test of `v`: negative when `neg`, else non-negative.
    fn sign(ir: &mut Context, ty: Type, v: TempIdx, neg: bool) -> Self {
        let z = ir.new_const(ty, 0);
        Self {
            cond: if neg { Cond::Lt } else { Cond::Ge },
            ty,
            a: v,
            b: z,
        }
    }
}

const fn width(sf: bool) -> Width {
    if sf {
        Width::W64
    } else {
        Width::W32
    }
}

// ── Helpers ────────────────────────────────────────────────────

/// `v` zero-extended from 32 bits unless `sf`.
fn trunc(ir: &mut Context, v: TempIdx, sf: bool) -> TempIdx {
    if sf {
        return v;
    }
    let t = ir.new_temp(Type::I64);
    ir.gen_extract(Type::I64, t, v, 0, 32)
}

fn narrow(ir: &mut Context, v: TempIdx) -> TempIdx {
    let t = ir.new_temp(Type::I32);
    ir.gen_ext(Opcode::ExtrlI64I32, t, v)
}

fn widen(ir: &mut Context, v: TempIdx) -> TempIdx {
    let t = ir.new_temp(Type::I64);
    ir.gen_ext(Opcode::ExtUI32I64, t, v)
}

/// View of a recorded flag operand at the tag's width.
fn cc_view(ir: &mut Context, v: TempIdx, w: Width) -> (Type, TempIdx) {
    match w {
        Width::W64 => (Type::I64, v),
        _ => (Type::I32, narrow(ir, v)),
    }
}

/// Shift `src` by `count` (an I64 already below the width).
fn gen_shift(
    ir: &mut Context,
    src: TempIdx,
    count: TempIdx,
    sf: bool,
    shift: ShiftType,
) -> TempIdx {
    let res = ir.new_temp(Type::I64);
    match (shift, sf) {
        (ShiftType::Lsl, _) => {
            ir.gen_shl(Type::I64, res, src, count);
        }
        (ShiftType::Lsr, _) => {
            ir.gen_shr(Type::I64, res, src, count);
        }
        (ShiftType::Asr, true) => {
            ir.gen_sar(Type::I64, res, src, count);
        }
        (ShiftType::Asr, false) => {
            let t = ir.new_temp(Type::I64);
            ir.gen_sextract(Type::I64, t, src, 0, 32);
            ir.gen_sar(Type::I64, res, t, count);
        }
        (ShiftType::Ror, true) => {
            ir.gen_rotr(Type::I64, res, src, count);
        }
        (ShiftType::Ror, false) => {
            let s32 = narrow(ir, src);
            let c32 = narrow(ir, count);
            let r32 = ir.new_temp(Type::I32);
            ir.gen_rotr(Type::I32, r32, s32, c32);
            return widen(ir, r32);
        }
    }
    trunc(ir, res, sf)
}

/// Shifted-register operand with a constant amount.
fn gen_shift_imm(
    ir: &mut Context,
    src: TempIdx,
    sf: bool,
    shift: ShiftType,
    amount: u8,
) -> TempIdx {
    if amount == 0 {
        return src;
    }
    let count = ir.new_const(Type::I64, amount as u64);
    gen_shift(ir, src, count, sf, shift)
}

/// Extended-register operand: extend the low bytes, then shift left.
fn gen_extend(
    ir: &mut Context,
    src: TempIdx,
    ext: Extend,
    shift: u8,
) -> TempIdx {
    let t = ir.new_temp(Type::I64);
    let bits = 8u32 << ext.size;
    if bits == 64 {
        ir.gen_mov(Type::I64, t, src);
    } else if ext.signed {
        ir.gen_sextract(Type::I64, t, src, 0, bits);
    } else {
        ir.gen_extract(Type::I64, t, src, 0, bits);
    }
    if shift != 0 {
        let s = ir.new_const(Type::I64, shift as u64);
        ir.gen_shl(Type::I64, t, t, s);
    }
    t
}

const fn ordering(acquire: bool, release: bool) -> u32 {
    match (acquire, release) {
        (false, false) => MemOp::ORD_PLAIN,
        (true, false) => MemOp::ORD_ACQUIRE,
        (false, true) => MemOp::ORD_RELEASE,
        (true, true) => MemOp::ORD_ACQ_REL,
    }
}

impl A64DisasContext {
    // -- Register access -----------------------------------

    /// Global of the current stack pointer.
    fn sp(&self) -> TempIdx {
        if self.flags.uses_sp_el1() {
            self.sp_el1
        } else {
            self.sp_el0
        }
    }

    /// Xr (or Wr zero-extended); 31 reads as zero.
    fn reg(&self, ir: &mut Context, r: u8, sf: bool) -> TempIdx {
        if r == 31 {
            return ir.new_const(Type::I64, 0);
        }
        trunc(ir, self.xregs[r as usize], sf)
    }

    /// As [`reg`](Self::reg), with 31 naming the stack pointer.
    fn reg_sp(&self, ir: &mut Context, r: u8, sf: bool) -> TempIdx {
        let g = if r == 31 { self.sp() } else { self.xregs[r as usize] };
        trunc(ir, g, sf)
    }

    fn write_to(ir: &mut Context, g: TempIdx, val: TempIdx, sf: bool) {
        if sf {
            ir.gen_mov(Type::I64, g, val);
        } else {
            ir.gen_extract(Type::I64, g, val, 0, 32);
        }
    }

    /// Write Xd (or Wd, clearing the upper half); writes to 31 are
    /// discarded.
    fn write_reg(&self, ir: &mut Context, rd: u8, val: TempIdx, sf: bool) {
        if rd != 31 {
            Self::write_to(ir, self.xregs[rd as usize], val, sf);
        }
    }

    /// As [`write_reg`](Self::write_reg), with 31 naming SP.
    fn write_reg_sp(&self, ir: &mut Context, rd: u8, val: TempIdx, sf: bool) {
        let g = if rd == 31 {
            self.sp()
        } else {
            self.xregs[rd as usize]
        };
        Self::write_to(ir, g, val, sf);
    }

    // -- Lazy flags ----------------------------------------

    fn set_cc_op(&mut self, ir: &mut Context, op: CcOp) {
        if self.cc_op_static != Some(op) {
            let c = ir.new_const(Type::I64, op.to_raw() as u64);
            ir.gen_mov(Type::I64, self.cc_op, c);
            self.cc_op_static = Some(op);
        }
    }

    /// Record a deferred flag computation. `src`/`src2` are already
    /// at the operation width; `dst` is truncated here.
    fn gen_record_cc(
        &mut self,
        ir: &mut Context,
        op: CcOp,
        dst: TempIdx,
        src: TempIdx,
        src2: TempIdx,
    ) {
        let sf = op.width() == Width::W64;
        Self::write_to(ir, self.cc_dst, dst, sf);
        ir.gen_mov(Type::I64, self.cc_src, src);
        ir.gen_mov(Type::I64, self.cc_src2, src2);
        self.set_cc_op(ir, op);
    }

    /// Set NZCV from bits 31:28 of `val`.
    fn gen_set_nzcv(&mut self, ir: &mut Context, val: TempIdx) {
        let mask = ir.new_const(Type::I64, 0xf000_0000);
        ir.gen_and(Type::I64, self.cc_dst, val, mask);
        self.set_cc_op(ir, CcOp::Eager);
    }

    /// NZCV in bits 31:28 of a new temp.
    fn gen_materialize_nzcv(&self, ir: &mut Context) -> TempIdx {
        let t = ir.new_temp(Type::I64);
        if self.cc_op_static == Some(CcOp::Eager) {
            return ir.gen_mov(Type::I64, t, self.cc_dst);
        }
        ir.gen_call(
            t,
            HelperId::NzcvAll as u32,
            &[self.cc_op, self.cc_dst, self.cc_src, self.cc_src2],
        )
    }

    /// Lower `cc` to one comparison without materializing NZCV.
    fn gen_test_cc(&self, ir: &mut Context, cc: CondCode) -> CmpCc {
        if cc.is_always() {
            return CmpCc::fixed(ir, Cond::Always);
        }
        let fast = match self.cc_op_static {
            Some(CcOp::Eager) => self.test_eager(ir, cc),
            Some(CcOp::Add(w)) => self.test_add(ir, cc, w),
            Some(CcOp::Sub(w)) => self.test_sub(ir, cc, w),
            Some(CcOp::Logic(w)) => self.test_logic(ir, cc, w),
            _ => None,
        };
        match fast {
            Some(cmp) => cmp,
            None => self.test_helper(ir, cc),
        }
    }

    fn test_eager(&self, ir: &mut Context, cc: CondCode) -> Option<CmpCc> {
        let (flag, set) = cc.single_flag()?;
        let bit = match flag {
            Flag::N => 31,
            Flag::Z => 30,
            Flag::C => 29,
            Flag::V => 28,
        };
        let mask = ir.new_const(Type::I64, 1 << bit);
        Some(CmpCc {
            cond: if set { Cond::TstNe } else { Cond::TstEq },
            ty: Type::I64,
            a: self.cc_dst,
            b: mask,
        })
    }

    fn test_add(
        &self,
        ir: &mut Context,
        cc: CondCode,
        w: Width,
    ) -> Option<CmpCc> {
        let (ty, d) = cc_view(ir, self.cc_dst, w);
        let (_, a) = cc_view(ir, self.cc_src, w);
        let (_, b) = cc_view(ir, self.cc_src2, w);
        let zero = ir.new_const(ty, 0);
        let cmp = |cond, a, b| CmpCc { cond, ty, a, b };
        Some(match cc {
            CondCode::Eq => cmp(Cond::Eq, d, zero),
            CondCode::Ne => cmp(Cond::Ne, d, zero),
            CondCode::Mi | CondCode::Pl => {
                CmpCc::sign(ir, ty, d, cc == CondCode::Mi)
            }
            // Carry out iff the result wrapped below the first operand.
            CondCode::Hs => cmp(Cond::Ltu, d, a),
            CondCode::Lo => cmp(Cond::Geu, d, a),
            CondCode::Vs | CondCode::Vc | CondCode::Lt | CondCode::Ge => {
                // V = (d ^ a) & ~(a ^ b), taken at the sign bit.
                let x = ir.new_temp(ty);
                ir.gen_xor(ty, x, d, a);
                let y = ir.new_temp(ty);
                ir.gen_eqv(ty, y, a, b);
                let v = ir.new_temp(ty);
                ir.gen_and(ty, v, x, y);
                match cc {
                    CondCode::Vs | CondCode::Vc => {
                        CmpCc::sign(ir, ty, v, cc == CondCode::Vs)
                    }
                    _ => {
                        let nv = ir.new_temp(ty);
                        ir.gen_xor(ty, nv, d, v);
                        CmpCc::sign(ir, ty, nv, cc == CondCode::Lt)
                    }
                }
            }
            _ => return None,
        })
    }

    fn test_sub(
        &self,
        ir: &mut Context,
        cc: CondCode,
        w: Width,
    ) -> Option<CmpCc> {
        let (ty, a) = cc_view(ir, self.cc_src, w);
        let (_, b) = cc_view(ir, self.cc_src2, w);
        let cond = match cc {
            CondCode::Eq => Cond::Eq,
            CondCode::Ne => Cond::Ne,
            CondCode::Hs => Cond::Geu,
            CondCode::Lo => Cond::Ltu,
            CondCode::Hi => Cond::Gtu,
            CondCode::Ls => Cond::Leu,
            CondCode::Ge => Cond::Ge,
            CondCode::Lt => Cond::Lt,
            CondCode::Gt => Cond::Gt,
            CondCode::Le => Cond::Le,
            CondCode::Mi | CondCode::Pl => {
                let (_, d) = cc_view(ir, self.cc_dst, w);
                return Some(CmpCc::sign(ir, ty, d, cc == CondCode::Mi));
            }
            CondCode::Vs | CondCode::Vc => {
                // V = (a ^ b) & (a ^ d), taken at the sign bit.
                let (_, d) = cc_view(ir, self.cc_dst, w);
                let x = ir.new_temp(ty);
                ir.gen_xor(ty, x, a, b);
                let y = ir.new_temp(ty);
                ir.gen_xor(ty, y, a, d);
                let v = ir.new_temp(ty);
                ir.gen_and(ty, v, x, y);
                return Some(CmpCc::sign(ir, ty, v, cc == CondCode::Vs));
            }
            CondCode::Al | CondCode::Nv => return None,
        };
        Some(CmpCc { cond, ty, a, b })
    }

    fn test_logic(
        &self,
        ir: &mut Context,
        cc: CondCode,
        w: Width,
    ) -> Option<CmpCc> {
        // C = V = 0.
        let cond = match cc {
            CondCode::Hs | CondCode::Hi | CondCode::Vs => {
                return Some(CmpCc::fixed(ir, Cond::Never));
            }
            CondCode::Lo | CondCode::Ls | CondCode::Vc => {
                return Some(CmpCc::fixed(ir, Cond::Always));
            }
            CondCode::Eq => Cond::Eq,
            CondCode::Ne => Cond::Ne,
            CondCode::Mi | CondCode::Lt => Cond::Lt,
            CondCode::Pl | CondCode::Ge => Cond::Ge,
            CondCode::Gt => Cond::Gt,
            CondCode::Le => Cond::Le,
            CondCode::Al | CondCode::Nv => return None,
        };
        let (ty, d) = cc_view(ir, self.cc_dst, w);
        let zero = ir.new_const(ty, 0);
        Some(CmpCc {
            cond,
            ty,
            a: d,
            b: zero,
        })
    }

    fn test_helper(&self, ir: &mut Context, cc: CondCode) -> CmpCc {
        let t = ir.new_temp(Type::I64);
        let c = ir.new_const(Type::I64, cc as u64);
        ir.gen_call(
            t,
            HelperId::CondHolds as u32,
            &[c, self.cc_op, self.cc_dst, self.cc_src, self.cc_src2],
        );
        let zero = ir.new_const(Type::I64, 0);
        CmpCc {
            cond: Cond::Ne,
            ty: Type::I64,
            a: t,
            b: zero,
        }
    }

    /// `cc` as 0/1 in an I64 temp.
    fn gen_cc_flag(&self, ir: &mut Context, cc: CondCode) -> TempIdx {
        let cmp = self.gen_test_cc(ir, cc);
        let t = ir.new_temp(cmp.ty);
        ir.gen_setcond(cmp.ty, t, cmp.a, cmp.b, cmp.cond);
        match cmp.ty {
            Type::I64 => t,
            Type::I32 => widen(ir, t),
        }
    }

    /// `cc ? v1 : v2`.
    fn gen_select(
        &self,
        ir: &mut Context,
        cc: CondCode,
        v1: TempIdx,
        v2: TempIdx,
    ) -> TempIdx {
        let mut cmp = self.gen_test_cc(ir, cc);
        if cmp.ty == Type::I32 {
            let flag = ir.new_temp(Type::I32);
            ir.gen_setcond(Type::I32, flag, cmp.a, cmp.b, cmp.cond);
            let zero = ir.new_const(Type::I64, 0);
            cmp = CmpCc {
                cond: Cond::Ne,
                ty: Type::I64,
                a: widen(ir, flag),
                b: zero,
            };
        }
        let d = ir.new_temp(Type::I64);
        ir.gen_movcond(Type::I64, d, cmp.a, cmp.b, v1, v2, cmp.cond)
    }

    // -- Block exits ---------------------------------------

    /// Direct chaining stays within the pages this block covers.
    fn use_goto_tb(&self, dest: u64) -> bool {
        let page = !(GUEST_PAGE_SIZE - 1);
        dest & page == self.base.pc_first & page
            || dest & page == self.pc_curr & page
    }

    pub(super) fn gen_goto_tb(
        &mut self,
        ir: &mut Context,
        slot: u32,
        dest: u64,
    ) {
        let d = ir.new_const(Type::I64, dest);
        if self.use_goto_tb(dest) {
            ir.gen_goto_tb(slot);
            ir.gen_mov(Type::I64, self.pc, d);
            ir.gen_exit_tb(slot);
            self.base.exits.push(ExitEdge::Direct {
                slot: slot as u8,
                target: self.key.with_pc(dest),
            });
        } else {
            ir.gen_mov(Type::I64, self.pc, d);
            ir.gen_exit_tb(TB_EXIT_NOCHAIN);
            self.base.exits.push(ExitEdge::Indirect);
        }
    }

    fn gen_exit_indirect(&mut self, ir: &mut Context, target: TempIdx) {
        ir.gen_mov(Type::I64, self.pc, target);
        ir.gen_exit_tb(TB_EXIT_NOCHAIN);
        self.base.exits.push(ExitEdge::Indirect);
        self.base.is_jmp = DisasJumpType::NoReturn;
    }

    /// Two-way branch: slot 0 falls through, slot 1 is taken.
    fn gen_cond_branch(&mut self, ir: &mut Context, cmp: CmpCc, dest: u64) {
        match cmp.cond {
            Cond::Always => self.gen_goto_tb(ir, 0, dest),
            Cond::Never => self.gen_goto_tb(ir, 0, self.base.pc_next),
            _ => {
                let taken = ir.new_label();
                ir.gen_brcond(cmp.ty, cmp.a, cmp.b, cmp.cond, taken);
                self.gen_goto_tb(ir, 0, self.base.pc_next);
                ir.gen_set_label(taken);
                self.gen_goto_tb(ir, 1, dest);
            }
        }
        self.base.is_jmp = DisasJumpType::NoReturn;
    }

    // -- Memory --------------------------------------------

    fn memop(&self, size: u8) -> MemOp {
        let m = MemOp::sized(size as u32);
        if self.flags.align_check() {
            m.aligned()
        } else {
            m
        }
    }

    /// Effective address, plus the new base for writeback forms.
    /// Both are computed before any access or register write.
    fn gen_addr(
        &self,
        ir: &mut Context,
        rn: u8,
        mode: AddrMode,
    ) -> (TempIdx, Option<TempIdx>) {
        let base = self.reg_sp(ir, rn, true);
        let addr = ir.new_temp(Type::I64);
        match mode {
            AddrMode::Offset(imm) | AddrMode::PreIndex(imm) => {
                let c = ir.new_const(Type::I64, imm as u64);
                ir.gen_add(Type::I64, addr, base, c);
            }
            AddrMode::PostIndex(_) => {
                ir.gen_mov(Type::I64, addr, base);
            }
            AddrMode::Reg { rm, ext, shift } => {
                let m = self.reg(ir, rm, true);
                let off = gen_extend(ir, m, ext, shift);
                ir.gen_add(Type::I64, addr, base, off);
            }
        }
        let wb = match mode {
            AddrMode::PreIndex(_) => Some(addr),
            AddrMode::PostIndex(imm) => {
                let c = ir.new_const(Type::I64, imm as u64);
                let t = ir.new_temp(Type::I64);
                Some(ir.gen_add(Type::I64, t, base, c))
            }
            _ => None,
        };
        (addr, wb)
    }

    /// Base register copied for an exclusive or atomic access.
    fn gen_base(&self, ir: &mut Context, rn: u8) -> TempIdx {
        let base = self.reg_sp(ir, rn, true);
        let addr = ir.new_temp(Type::I64);
        ir.gen_mov(Type::I64, addr, base)
    }

    /// Any non-exclusive access ends the exclusive sequence in
    /// progress, whatever its address.
    fn gen_close_monitor(&mut self, ir: &mut Context) {
        if self.excl_maybe_armed {
            let open = ir.new_const(Type::I64, u64::MAX);
            ir.gen_mov(Type::I64, self.excl_addr, open);
            self.excl_maybe_armed = false;
        }
    }

    // -- System registers ----------------------------------

    /// Privilege checks for MRS/MSR. Queues the exception and returns
    /// `false` when the access may not proceed.
    fn check_sysreg_access(
        &mut self,
        d: &SysRegDesc,
        rt: u8,
        read: bool,
    ) -> bool {
        if self.flags.el() == 0 && !d.el0_allows(read) {
            let syn = sysreg::syn_aa64_sysregtrap(d.enc, rt, read);
            self.queue_exception(ExceptionKind::SysRegTrap, syn);
            return false;
        }
        // SP_EL0 is not accessible while it is the current SP.
        let sp_el0_live = d.reg == SysReg::SpEl0 && !self.flags.uses_sp_el1();
        if (!read && d.read_only) || sp_el0_live {
            self.queue_exception(
                ExceptionKind::Undefined,
                sysreg::syn_uncategorized(),
            );
            return false;
        }
        true
    }
}

// ── Instruction dispatch ───────────────────────────────────────

impl A64DisasContext {
    /// Emit IR for one decoded instruction. Only a literal load can
    /// fail.
    pub(super) fn translate(
        &mut self,
        ir: &mut Context,
        mem: &dyn GuestMemory,
        insn: Insn,
    ) -> Result<(), TranslateError> {
        match insn {
            // Branches, exceptions, system
            Insn::B { link, offset } => self.trans_b(ir, link, offset),
            Insn::BCond { cond, offset } => {
                let cmp = self.gen_test_cc(ir, cond);
                let dest = self.pc_curr.wrapping_add(offset as u64);
                self.gen_cond_branch(ir, cmp, dest);
            }
            Insn::Cbz { sf, nz, rt, offset } => {
                let v = self.reg(ir, rt, sf);
                let zero = ir.new_const(Type::I64, 0);
                let cmp = CmpCc {
                    cond: if nz { Cond::Ne } else { Cond::Eq },
                    ty: Type::I64,
                    a: v,
                    b: zero,
                };
                let dest = self.pc_curr.wrapping_add(offset as u64);
                self.gen_cond_branch(ir, cmp, dest);
            }
            Insn::Tbz { nz, rt, bit, offset } => {
                let v = self.reg(ir, rt, true);
                let mask = ir.new_const(Type::I64, 1 << bit);
                let cmp = CmpCc {
                    cond: if nz { Cond::TstNe } else { Cond::TstEq },
                    ty: Type::I64,
                    a: v,
                    b: mask,
                };
                let dest = self.pc_curr.wrapping_add(offset as u64);
                self.gen_cond_branch(ir, cmp, dest);
            }
            Insn::BranchReg { op, rn } => self.trans_branch_reg(ir, op, rn),
            Insn::Eret => self.trans_eret(ir),
            Insn::Svc { imm } => self.queue_exception(
                ExceptionKind::Svc,
                sysreg::syn_aa64_svc(imm),
            ),
            Insn::Brk { imm } => self.queue_exception(
                ExceptionKind::Brk,
                sysreg::syn_aa64_bkpt(imm),
            ),
            // No EL2, no EL3, no halting debug.
            Insn::Hvc { .. } | Insn::Smc { .. } | Insn::Hlt { .. } => self
                .queue_exception(
                    ExceptionKind::Undefined,
                    sysreg::syn_uncategorized(),
                ),
            Insn::Hint { .. } => {}
            Insn::Clrex => {
                let open = ir.new_const(Type::I64, u64::MAX);
                ir.gen_mov(Type::I64, self.excl_addr, open);
                self.excl_maybe_armed = false;
            }
            Insn::Barrier { kind, .. } => match kind {
                BarrierKind::Dsb | BarrierKind::Dmb => {
                    ir.gen_mb(mb::ALL | mb::BAR_SC);
                }
                // Context synchronization: refetch from the next insn.
                BarrierKind::Isb => {
                    self.base.is_jmp = DisasJumpType::TooMany;
                }
            },
            Insn::MsrImm { field, imm, enc } => {
                self.trans_msr_imm(ir, field, imm, enc)
            }
            Insn::Cfinv => {
                let nzcv = self.gen_materialize_nzcv(ir);
                let c = ir.new_const(Type::I64, 1 << 29);
                ir.gen_xor(Type::I64, nzcv, nzcv, c);
                self.gen_set_nzcv(ir, nzcv);
            }
            Insn::Mrs { reg, rt } => self.trans_mrs(ir, reg, rt),
            Insn::Msr { reg, rt } => self.trans_msr(ir, reg, rt),
            Insn::Sys { op, enc, rt } => self.trans_sys(ir, op, enc, rt),

            // Data processing, immediate
            Insn::Adr { page, rd, imm } => {
                let v = if page {
                    (self.pc_curr & !0xfff).wrapping_add((imm << 12) as u64)
                } else {
                    self.pc_curr.wrapping_add(imm as u64)
                };
                let c = ir.new_const(Type::I64, v);
                self.write_reg(ir, rd, c, true);
            }
            Insn::AddSubImm {
                sf,
                sub,
                set_flags,
                rd,
                rn,
                imm,
            } => {
                let n = self.reg_sp(ir, rn, sf);
                let m = ir.new_const(Type::I64, imm);
                let res = self.gen_add_sub(ir, sf, sub, set_flags, n, m);
                if set_flags {
                    self.write_reg(ir, rd, res, sf);
                } else {
                    self.write_reg_sp(ir, rd, res, sf);
                }
            }
            Insn::LogicImm { sf, op, rd, rn, imm } => {
                let n = self.reg(ir, rn, sf);
                let m = ir.new_const(Type::I64, imm);
                let res = self.gen_logic(ir, sf, op, false, n, m);
                if op == LogicOp::Ands {
                    self.write_reg(ir, rd, res, sf);
                } else {
                    self.write_reg_sp(ir, rd, res, sf);
                }
            }
            Insn::MovWide {
                sf,
                op,
                rd,
                imm,
                shift,
            } => self.trans_movw(ir, sf, op, rd, imm, shift),
            Insn::Bitfield {
                sf,
                op,
                rd,
                rn,
                immr,
                imms,
            } => self.trans_bitfield(ir, sf, op, rd, rn, immr, imms),
            Insn::Extr {
                sf,
                rd,
                rn,
                rm,
                lsb,
            } => self.trans_extr(ir, sf, rd, rn, rm, lsb),

            // Data processing, register
            Insn::LogicReg {
                sf,
                op,
                invert,
                shift,
                amount,
                rd,
                rn,
                rm,
            } => {
                let n = self.reg(ir, rn, sf);
                let m = self.reg(ir, rm, sf);
                let m = gen_shift_imm(ir, m, sf, shift, amount);
                let res = self.gen_logic(ir, sf, op, invert, n, m);
                self.write_reg(ir, rd, res, sf);
            }
            Insn::AddSubReg {
                sf,
                sub,
                set_flags,
                shift,
                amount,
                rd,
                rn,
                rm,
            } => {
                let n = self.reg(ir, rn, sf);
                let m = self.reg(ir, rm, sf);
                let m = gen_shift_imm(ir, m, sf, shift, amount);
                let res = self.gen_add_sub(ir, sf, sub, set_flags, n, m);
                self.write_reg(ir, rd, res, sf);
            }
            Insn::AddSubExt {
                sf,
                sub,
                set_flags,
                ext,
                amount,
                rd,
                rn,
                rm,
            } => {
                let n = self.reg_sp(ir, rn, sf);
                let m = self.reg(ir, rm, true);
                let m = gen_extend(ir, m, ext, amount);
                let m = trunc(ir, m, sf);
                let res = self.gen_add_sub(ir, sf, sub, set_flags, n, m);
                if set_flags {
                    self.write_reg(ir, rd, res, sf);
                } else {
                    self.write_reg_sp(ir, rd, res, sf);
                }
            }
            Insn::AdcSbc {
                sf,
                sub,
                set_flags,
                rd,
                rn,
                rm,
            } => self.trans_adc_sbc(ir, sf, sub, set_flags, rd, rn, rm),
            Insn::Setf { sixteen, rn } => self.trans_setf(ir, sixteen, rn),
            Insn::CondCompare {
                sf,
                sub,
                cond,
                rn,
                rm,
                imm,
                nzcv,
            } => self.trans_ccmp(ir, sf, sub, cond, rn, rm, imm, nzcv),
            Insn::CondSelect {
                sf,
                op,
                cond,
                rd,
                rn,
                rm,
            } => {
                let n = self.reg(ir, rn, sf);
                let m = self.reg(ir, rm, sf);
                let alt = match op {
                    CselOp::Csel => m,
                    CselOp::Csinc => {
                        let one = ir.new_const(Type::I64, 1);
                        let t = ir.new_temp(Type::I64);
                        ir.gen_add(Type::I64, t, m, one)
                    }
                    CselOp::Csinv => {
                        let t = ir.new_temp(Type::I64);
                        ir.gen_not(Type::I64, t, m)
                    }
                    CselOp::Csneg => {
                        let t = ir.new_temp(Type::I64);
                        ir.gen_neg(Type::I64, t, m)
                    }
                };
                let res = self.gen_select(ir, cond, n, alt);
                self.write_reg(ir, rd, res, sf);
            }
            Insn::DataProc1 { sf, op, rd, rn } => {
                self.trans_dp1(ir, sf, op, rd, rn)
            }
            Insn::DataProc2 { sf, op, rd, rn, rm } => {
                self.trans_dp2(ir, sf, op, rd, rn, rm)
            }
            Insn::Crc32 {
                castagnoli,
                size,
                rd,
                rn,
                rm,
            } => {
                let acc = self.reg(ir, rn, false);
                let v = self.reg(ir, rm, size == 3);
                let v = if size < 3 {
                    let t = ir.new_temp(Type::I64);
                    ir.gen_extract(Type::I64, t, v, 0, 8 << size)
                } else {
                    v
                };
                let bytes = ir.new_const(Type::I64, 1 << size);
                let id = if castagnoli {
                    HelperId::Crc32c
                } else {
                    HelperId::Crc32
                };
                let res = ir.new_temp(Type::I64);
                ir.gen_call(res, id as u32, &[acc, v, bytes]);
                self.write_reg(ir, rd, res, false);
            }
            Insn::DataProc3 {
                op,
                sf,
                rd,
                rn,
                rm,
                ra,
            } => self.trans_dp3(ir, op, sf, rd, rn, rm, ra),

            // Loads and stores
            Insn::LoadLiteral { kind, rt, offset } => {
                return self.trans_load_literal(ir, mem, kind, rt, offset);
            }
            Insn::LoadExcl {
                size,
                pair,
                acquire,
                rt,
                rt2,
                rn,
            } => self.trans_load_excl(ir, size, pair, acquire, rt, rt2, rn),
            Insn::StoreExcl {
                size,
                pair,
                release,
                rs,
                rt,
                rt2,
                rn,
            } => self
                .trans_store_excl(ir, size, pair, release, rs, rt, rt2, rn),
            // RCpc only relaxes ordering against earlier store-releases;
            // the acquire lowering covers both.
            Insn::LoadAcquire { size, rt, rn, .. } => {
                let addr = self.gen_base(ir, rn);
                let mop = MemOp::sized(size as u32)
                    .aligned()
                    .with(MemOp::ATOM_SINGLE | MemOp::ORD_ACQUIRE);
                let t = ir.new_temp(Type::I64);
                ir.gen_qemu_ld(Type::I64, t, addr, mop);
                ir.gen_mb(mb::LD_LD | mb::LD_ST | mb::BAR_LDAQ);
                self.write_reg(ir, rt, t, true);
                self.gen_close_monitor(ir);
            }
            Insn::StoreRelease { size, rt, rn } => {
                let addr = self.gen_base(ir, rn);
                let v = self.reg(ir, rt, true);
                let mop = MemOp::sized(size as u32)
                    .aligned()
                    .with(MemOp::ATOM_SINGLE | MemOp::ORD_RELEASE);
                ir.gen_mb(mb::ALL | mb::BAR_STRL);
                ir.gen_qemu_st(Type::I64, v, addr, mop);
                self.gen_close_monitor(ir);
            }
            Insn::LoadStorePair {
                load,
                signed,
                size,
                mode,
                rt,
                rt2,
                rn,
            } => self
                .trans_ldst_pair(ir, load, signed, size, mode, rt, rt2, rn),
            Insn::LoadStore {
                op,
                size,
                mode,
                unpriv,
                rt,
                rn,
            } => self.trans_ldst(ir, op, size, mode, unpriv, rt, rn),
            Insn::Cas {
                size,
                acquire,
                release,
                rs,
                rt,
                rn,
            } => {
                let addr = self.gen_base(ir, rn);
                let mop = MemOp::sized(size as u32)
                    .aligned()
                    .with(MemOp::ATOM_SINGLE | ordering(acquire, release));
                let cmp = self.reg(ir, rs, true);
                let cmp = if size < 3 {
                    let t = ir.new_temp(Type::I64);
                    ir.gen_extract(Type::I64, t, cmp, 0, 8 << size)
                } else {
                    cmp
                };
                let new = self.reg(ir, rt, true);
                let old = ir.new_temp(Type::I64);
                ir.gen_atomic_cmpxchg(Type::I64, old, addr, cmp, new, mop);
                self.write_reg(ir, rs, old, size == 3);
                self.gen_close_monitor(ir);
            }
            Insn::AtomicOp {
                size,
                op,
                acquire,
                release,
                rs,
                rt,
                rn,
            } => self
                .trans_atomic_op(ir, size, op, acquire, release, rs, rt, rn),
        }
        Ok(())
    }
}

// ── Branches and system ────────────────────────────────────────

impl A64DisasContext {
    fn trans_b(&mut self, ir: &mut Context, link: bool, offset: i64) {
        if link {
            let ret = ir.new_const(Type::I64, self.base.pc_next);
            ir.gen_mov(Type::I64, self.xregs[30], ret);
        }
        let dest = self.pc_curr.wrapping_add(offset as u64);
        self.gen_goto_tb(ir, 0, dest);
        self.base.is_jmp = DisasJumpType::NoReturn;
    }

    fn trans_branch_reg(&mut self, ir: &mut Context, op: BranchRegOp, rn: u8) {
        // Read the target before BLR X30 overwrites it.
        let src = self.reg(ir, rn, true);
        let target = ir.new_temp(Type::I64);
        ir.gen_mov(Type::I64, target, src);
        if op == BranchRegOp::Blr {
            let ret = ir.new_const(Type::I64, self.base.pc_next);
            ir.gen_mov(Type::I64, self.xregs[30], ret);
        }
        self.gen_exit_indirect(ir, target);
    }

    fn trans_eret(&mut self, ir: &mut Context) {
        if self.flags.el() == 0 {
            self.queue_exception(
                ExceptionKind::Undefined,
                sysreg::syn_uncategorized(),
            );
            return;
        }
        // The helper restores PSTATE and pc; the new EL and SPSel
        // need a fresh lookup.
        let t = ir.new_temp(Type::I64);
        ir.gen_call(t, HelperId::Eret as u32, &[]);
        ir.gen_exit_tb(TB_EXIT_NOCHAIN);
        self.base.exits.push(ExitEdge::Indirect);
        self.base.is_jmp = DisasJumpType::NoReturn;
    }

    fn trans_msr_imm(
        &mut self,
        ir: &mut Context,
        field: PstateField,
        imm: u8,
        enc: SysRegEnc,
    ) {
        if self.flags.el() == 0 {
            let syn = sysreg::syn_aa64_sysregtrap(enc, 31, false);
            self.queue_exception(ExceptionKind::SysRegTrap, syn);
            return;
        }
        match field {
            PstateField::SpSel => {
                let v = ir.new_const(Type::I64, (imm & 1) as u64);
                ir.gen_st(Type::I64, v, self.env, SPSEL_OFFSET);
            }
            PstateField::DaifSet | PstateField::DaifClr => {
                let cur = ir.new_temp(Type::I64);
                ir.gen_ld(Type::I64, cur, self.env, DAIF_OFFSET);
                let bits = ir.new_const(Type::I64, ((imm & 0xf) as u64) << 6);
                if field == PstateField::DaifSet {
                    ir.gen_or(Type::I64, cur, cur, bits);
                } else {
                    ir.gen_andc(Type::I64, cur, cur, bits);
                }
                ir.gen_st(Type::I64, cur, self.env, DAIF_OFFSET);
            }
        }
        self.base.is_jmp = DisasJumpType::UpdateExit;
    }

    fn trans_mrs(&mut self, ir: &mut Context, reg: SysReg, rt: u8) {
        let d = reg.desc();
        if !self.check_sysreg_access(d, rt, true) {
            return;
        }
        let val = match d.storage {
            _ if reg == SysReg::SpEl0 => {
                let t = ir.new_temp(Type::I64);
                ir.gen_mov(Type::I64, t, self.sp_el0)
            }
            Storage::Field(offset) => {
                let t = ir.new_temp(Type::I64);
                ir.gen_ld(Type::I64, t, self.env, offset)
            }
            Storage::Nzcv => self.gen_materialize_nzcv(ir),
            Storage::CurrentEl => {
                ir.new_const(Type::I64, (self.flags.el() as u64) << 2)
            }
            Storage::Const(v) => ir.new_const(Type::I64, v),
        };
        self.write_reg(ir, rt, val, true);
    }

    fn trans_msr(&mut self, ir: &mut Context, reg: SysReg, rt: u8) {
        let d = reg.desc();
        if !self.check_sysreg_access(d, rt, false) {
            return;
        }
        let val = self.reg(ir, rt, true);
        match d.storage {
            _ if reg == SysReg::SpEl0 => {
                ir.gen_mov(Type::I64, self.sp_el0, val);
            }
            Storage::Field(offset) if reg == SysReg::Daif => {
                let mask = ir.new_const(Type::I64, DAIF_MASK);
                let t = ir.new_temp(Type::I64);
                ir.gen_and(Type::I64, t, val, mask);
                ir.gen_st(Type::I64, t, self.env, offset);
            }
            Storage::Field(offset) => {
                ir.gen_st(Type::I64, val, self.env, offset);
            }
            Storage::Nzcv => self.gen_set_nzcv(ir, val),
            Storage::CurrentEl | Storage::Const(_) => {
                unreachable!("{} is read-only", d.name)
            }
        }
        if d.ends_tb {
            self.base.is_jmp = DisasJumpType::UpdateExit;
        }
    }

    /// Caches and TLBs are not modelled, so maintenance is a no-op
    /// apart from DC ZVA. IC and TLBI still end the block.
    fn trans_sys(
        &mut self,
        ir: &mut Context,
        op: SysOp,
        enc: SysRegEnc,
        rt: u8,
    ) {
        if self.flags.el() == 0 && !op.el0_allowed() {
            let syn = sysreg::syn_aa64_sysregtrap(enc, rt, false);
            self.queue_exception(ExceptionKind::SysRegTrap, syn);
            return;
        }
        if op == SysOp::DcZva {
            self.gen_dc_zva(ir, rt);
        }
        if op.ends_tb() {
            self.base.is_jmp = DisasJumpType::UpdateExit;
        }
    }

    /// Zero the `ZVA_BLOCK`-aligned block holding `Xt`.
    fn gen_dc_zva(&mut self, ir: &mut Context, rt: u8) {
        let va = self.reg(ir, rt, true);
        let mask = ir.new_const(Type::I64, !(ZVA_BLOCK - 1));
        let base = ir.new_temp(Type::I64);
        ir.gen_and(Type::I64, base, va, mask);
        let zero = ir.new_const(Type::I64, 0);
        let mop = MemOp::sized(3);
        for off in (0..ZVA_BLOCK).step_by(8) {
            let c = ir.new_const(Type::I64, off);
            let addr = ir.new_temp(Type::I64);
            ir.gen_add(Type::I64, addr, base, c);
            ir.gen_qemu_st(Type::I64, zero, addr, mop);
        }
        self.gen_close_monitor(ir);
    }
}

// ── Data processing ────────────────────────────────────────────

impl A64DisasContext {
    /// `n +/- m`, recording Add/Sub flags when `set_flags`.
    fn gen_add_sub(
        &mut self,
        ir: &mut Context,
        sf: bool,
        sub: bool,
        set_flags: bool,
        n: TempIdx,
        m: TempIdx,
    ) -> TempIdx {
        let res = ir.new_temp(Type::I64);
        if sub {
            ir.gen_sub(Type::I64, res, n, m);
        } else {
            ir.gen_add(Type::I64, res, n, m);
        }
        if set_flags {
            let w = width(sf);
            let op = if sub { CcOp::Sub(w) } else { CcOp::Add(w) };
            self.gen_record_cc(ir, op, res, n, m);
        }
        res
    }

    fn gen_logic(
        &mut self,
        ir: &mut Context,
        sf: bool,
        op: LogicOp,
        invert: bool,
        n: TempIdx,
        m: TempIdx,
    ) -> TempIdx {
        let f: BinOp = match (op, invert) {
            (LogicOp::And | LogicOp::Ands, false) => Context::gen_and,
            (LogicOp::And | LogicOp::Ands, true) => Context::gen_andc,
            (LogicOp::Orr, false) => Context::gen_or,
            (LogicOp::Orr, true) => Context::gen_orc,
            (LogicOp::Eor, false) => Context::gen_xor,
            (LogicOp::Eor, true) => Context::gen_eqv,
        };
        let res = ir.new_temp(Type::I64);
        f(ir, Type::I64, res, n, m);
        if op == LogicOp::Ands {
            let zero = ir.new_const(Type::I64, 0);
            self.gen_record_cc(ir, CcOp::Logic(width(sf)), res, zero, zero);
        }
        res
    }

    fn trans_movw(
        &mut self,
        ir: &mut Context,
        sf: bool,
        op: MovWideOp,
        rd: u8,
        imm: u16,
        shift: u8,
    ) {
        let v = (imm as u64) << shift;
        let res = match op {
            MovWideOp::Movz => ir.new_const(Type::I64, v),
            MovWideOp::Movn => {
                ir.new_const(Type::I64, !v & width(sf).mask())
            }
            MovWideOp::Movk => {
                let old = self.reg(ir, rd, sf);
                let c = ir.new_const(Type::I64, imm as u64);
                let t = ir.new_temp(Type::I64);
                ir.gen_deposit(Type::I64, t, old, c, shift as u32, 16)
            }
        };
        self.write_reg(ir, rd, res, sf);
    }

    #[allow(clippy::too_many_arguments)]
    fn trans_bitfield(
        &mut self,
        ir: &mut Context,
        sf: bool,
        op: BitfieldOp,
        rd: u8,
        rn: u8,
        immr: u8,
        imms: u8,
    ) {
        let bits = if sf { 64 } else { 32 };
        let (r, s) = (immr as u32, imms as u32);
        let src = self.reg(ir, rn, sf);
        let res = ir.new_temp(Type::I64);
        match op {
            // Field src<s:r> to the bottom.
            BitfieldOp::Sbfm | BitfieldOp::Ubfm if s >= r => {
                if op == BitfieldOp::Sbfm {
                    ir.gen_sextract(Type::I64, res, src, r, s - r + 1);
                } else {
                    ir.gen_extract(Type::I64, res, src, r, s - r + 1);
                }
            }
            // Field src<s:0> to bit (bits - r).
            BitfieldOp::Sbfm | BitfieldOp::Ubfm => {
                let t = ir.new_temp(Type::I64);
                if op == BitfieldOp::Sbfm {
                    ir.gen_sextract(Type::I64, t, src, 0, s + 1);
                } else {
                    ir.gen_extract(Type::I64, t, src, 0, s + 1);
                }
                let sh = ir.new_const(Type::I64, (bits - r) as u64);
                ir.gen_shl(Type::I64, res, t, sh);
            }
            BitfieldOp::Bfm => {
                let dst = self.reg(ir, rd, sf);
                if s >= r {
                    let len = s - r + 1;
                    let t = ir.new_temp(Type::I64);
                    ir.gen_extract(Type::I64, t, src, r, len);
                    ir.gen_deposit(Type::I64, res, dst, t, 0, len);
                } else {
                    ir.gen_deposit(Type::I64, res, dst, src, bits - r, s + 1);
                }
            }
        }
        self.write_reg(ir, rd, res, sf);
    }

    fn trans_extr(
        &mut self,
        ir: &mut Context,
        sf: bool,
        rd: u8,
        rn: u8,
        rm: u8,
        lsb: u8,
    ) {
        let n = self.reg(ir, rn, sf);
        let m = self.reg(ir, rm, sf);
        let res = if sf {
            let t = ir.new_temp(Type::I64);
            ir.gen_extract2(Type::I64, t, m, n, lsb as u32)
        } else {
            let n32 = narrow(ir, n);
            let m32 = narrow(ir, m);
            let r32 = ir.new_temp(Type::I32);
            ir.gen_extract2(Type::I32, r32, m32, n32, lsb as u32);
            widen(ir, r32)
        };
        self.write_reg(ir, rd, res, sf);
    }

    #[allow(clippy::too_many_arguments)]
    fn trans_adc_sbc(
        &mut self,
        ir: &mut Context,
        sf: bool,
        sub: bool,
        set_flags: bool,
        rd: u8,
        rn: u8,
        rm: u8,
    ) {
        let n = self.reg(ir, rn, sf);
        let m = self.reg(ir, rm, sf);
        let carry = self.gen_cc_flag(ir, CondCode::Hs);
        // SBC is n + NOT(m) + C.
        let rhs = if sub {
            let t = ir.new_temp(Type::I64);
            ir.gen_not(Type::I64, t, m)
        } else {
            m
        };
        let res = ir.new_temp(Type::I64);
        ir.gen_add(Type::I64, res, n, rhs);
        ir.gen_add(Type::I64, res, res, carry);
        if set_flags {
            let w = width(sf);
            let op = if sub { CcOp::Sbc(w) } else { CcOp::Adc(w) };
            self.gen_record_cc(ir, op, res, n, m);
        }
        self.write_reg(ir, rd, res, sf);
    }

    /// SETF8/SETF16: N, Z and V from the low byte/halfword of Wn; C is
    /// kept.
    fn trans_setf(&mut self, ir: &mut Context, sixteen: bool, rn: u8) {
        let s: u32 = if sixteen { 16 } else { 8 };
        let v = self.reg(ir, rn, false);
        let old = self.gen_materialize_nzcv(ir);
        let c_mask = ir.new_const(Type::I64, 1 << 29);
        let nzcv = ir.new_temp(Type::I64);
        ir.gen_and(Type::I64, nzcv, old, c_mask);

        let sign = ir.new_temp(Type::I64);
        ir.gen_extract(Type::I64, sign, v, s - 1, 1);
        let n = ir.new_temp(Type::I64);
        let c31 = ir.new_const(Type::I64, 31);
        ir.gen_shl(Type::I64, n, sign, c31);
        ir.gen_or(Type::I64, nzcv, nzcv, n);

        let low = ir.new_temp(Type::I64);
        ir.gen_extract(Type::I64, low, v, 0, s);
        let zero = ir.new_const(Type::I64, 0);
        let z = ir.new_temp(Type::I64);
        ir.gen_setcond(Type::I64, z, low, zero, Cond::Eq);
        let c30 = ir.new_const(Type::I64, 30);
        ir.gen_shl(Type::I64, z, z, c30);
        ir.gen_or(Type::I64, nzcv, nzcv, z);

        let above = ir.new_temp(Type::I64);
        ir.gen_extract(Type::I64, above, v, s, 1);
        ir.gen_xor(Type::I64, above, above, sign);
        let c28 = ir.new_const(Type::I64, 28);
        ir.gen_shl(Type::I64, above, above, c28);
        ir.gen_or(Type::I64, nzcv, nzcv, above);

        self.gen_set_nzcv(ir, nzcv);
    }

    #[allow(clippy::too_many_arguments)]
    fn trans_ccmp(
        &mut self,
        ir: &mut Context,
        sf: bool,
        sub: bool,
        cond: CondCode,
        rn: u8,
        rm: u8,
        imm: bool,
        nzcv: u8,
    ) {
        let n = self.reg(ir, rn, sf);
        let m = if imm {
            ir.new_const(Type::I64, rm as u64)
        } else {
            self.reg(ir, rm, sf)
        };
        let w = width(sf);
        let op = if sub { CcOp::Sub(w) } else { CcOp::Add(w) };
        let res = ir.new_temp(Type::I64);
        if sub {
            ir.gen_sub(Type::I64, res, n, m);
        } else {
            ir.gen_add(Type::I64, res, n, m);
        }
        let res = trunc(ir, res, sf);
        let tag = ir.new_const(Type::I64, op.to_raw() as u64);
        let flags = ir.new_temp(Type::I64);
        ir.gen_call(flags, HelperId::NzcvAll as u32, &[tag, res, n, m]);
        let alt = ir.new_const(Type::I64, (nzcv as u64) << 28);
        let sel = self.gen_select(ir, cond, flags, alt);
        self.gen_set_nzcv(ir, sel);
    }

    fn trans_dp1(
        &mut self,
        ir: &mut Context,
        sf: bool,
        op: Dp1Op,
        rd: u8,
        rn: u8,
    ) {
        let src = self.reg(ir, rn, sf);
        let res = match op {
            Dp1Op::Rbit => {
                let bits = ir.new_const(Type::I64, if sf { 64 } else { 32 });
                let t = ir.new_temp(Type::I64);
                ir.gen_call(t, HelperId::Rbit as u32, &[src, bits])
            }
            Dp1Op::Rev16 => {
                let mask = if sf {
                    0x00ff_00ff_00ff_00ff
                } else {
                    0x00ff_00ff
                };
                let mask = ir.new_const(Type::I64, mask);
                let eight = ir.new_const(Type::I64, 8);
                let hi = ir.new_temp(Type::I64);
                ir.gen_shr(Type::I64, hi, src, eight);
                ir.gen_and(Type::I64, hi, hi, mask);
                let lo = ir.new_temp(Type::I64);
                ir.gen_and(Type::I64, lo, src, mask);
                ir.gen_shl(Type::I64, lo, lo, eight);
                let t = ir.new_temp(Type::I64);
                ir.gen_or(Type::I64, t, hi, lo)
            }
            // Byte-reverse each word: swap all, then swap the words.
            Dp1Op::Rev32 if sf => {
                let t = ir.new_temp(Type::I64);
                ir.gen_bswap(Opcode::Bswap64, Type::I64, t, src, 0);
                let c32 = ir.new_const(Type::I64, 32);
                ir.gen_rotr(Type::I64, t, t, c32)
            }
            Dp1Op::Rev32 => {
                let s32 = narrow(ir, src);
                let r32 = ir.new_temp(Type::I32);
                ir.gen_bswap(Opcode::Bswap32, Type::I32, r32, s32, 0);
                widen(ir, r32)
            }
            Dp1Op::Rev64 => {
                let t = ir.new_temp(Type::I64);
                ir.gen_bswap(Opcode::Bswap64, Type::I64, t, src, 0)
            }
            Dp1Op::Clz | Dp1Op::Cls => {
                let (ty, v) = if sf {
                    (Type::I64, src)
                } else {
                    (Type::I32, narrow(ir, src))
                };
                let bits = ty.size_bits() as u64;
                let t = ir.new_temp(ty);
                let full = ir.new_const(ty, bits);
                if op == Dp1Op::Cls {
                    // clz(x ^ (x >> (bits - 1))) - 1
                    let top = ir.new_const(ty, bits - 1);
                    let x = ir.new_temp(ty);
                    ir.gen_sar(ty, x, v, top);
                    ir.gen_xor(ty, x, x, v);
                    ir.gen_clz(ty, t, x, full);
                    let one = ir.new_const(ty, 1);
                    ir.gen_sub(ty, t, t, one);
                } else {
                    ir.gen_clz(ty, t, v, full);
                }
                if sf {
                    t
                } else {
                    widen(ir, t)
                }
            }
        };
        self.write_reg(ir, rd, res, sf);
    }

    /// Division where a zero divisor yields zero.
    fn gen_div(
        ir: &mut Context,
        sf: bool,
        signed: bool,
        n: TempIdx,
        m: TempIdx,
    ) -> TempIdx {
        let zero = ir.new_const(Type::I64, 0);
        let one = ir.new_const(Type::I64, 1);
        let divisor = ir.new_temp(Type::I64);
        ir.gen_movcond(Type::I64, divisor, m, zero, one, m, Cond::Eq);
        let q = match (signed, sf) {
            (false, _) => {
                let t = ir.new_temp(Type::I64);
                ir.gen_divu(Type::I64, t, n, divisor)
            }
            (true, true) => {
                let t = ir.new_temp(Type::I64);
                ir.gen_divs(Type::I64, t, n, divisor)
            }
            (true, false) => {
                let n32 = narrow(ir, n);
                let d32 = narrow(ir, divisor);
                let q32 = ir.new_temp(Type::I32);
                ir.gen_divs(Type::I32, q32, n32, d32);
                widen(ir, q32)
            }
        };
        let res = ir.new_temp(Type::I64);
        ir.gen_movcond(Type::I64, res, m, zero, zero, q, Cond::Eq)
    }

    fn trans_dp2(
        &mut self,
        ir: &mut Context,
        sf: bool,
        op: Dp2Op,
        rd: u8,
        rn: u8,
        rm: u8,
    ) {
        let n = self.reg(ir, rn, sf);
        let m = self.reg(ir, rm, sf);
        let shift = match op {
            Dp2Op::Udiv | Dp2Op::Sdiv => {
                let res = Self::gen_div(ir, sf, op == Dp2Op::Sdiv, n, m);
                self.write_reg(ir, rd, res, sf);
                return;
            }
            Dp2Op::Lslv => ShiftType::Lsl,
            Dp2Op::Lsrv => ShiftType::Lsr,
            Dp2Op::Asrv => ShiftType::Asr,
            Dp2Op::Rorv => ShiftType::Ror,
        };
        // The count is taken modulo the register width.
        let mask = ir.new_const(Type::I64, if sf { 63 } else { 31 });
        let count = ir.new_temp(Type::I64);
        ir.gen_and(Type::I64, count, m, mask);
        let res = gen_shift(ir, n, count, sf, shift);
        self.write_reg(ir, rd, res, sf);
    }

    #[allow(clippy::too_many_arguments)]
    fn trans_dp3(
        &mut self,
        ir: &mut Context,
        op: Dp3Op,
        sf: bool,
        rd: u8,
        rn: u8,
        rm: u8,
        ra: u8,
    ) {
        let res = ir.new_temp(Type::I64);
        match op {
            Dp3Op::Madd | Dp3Op::Msub => {
                let n = self.reg(ir, rn, sf);
                let m = self.reg(ir, rm, sf);
                let a = self.reg(ir, ra, sf);
                let p = ir.new_temp(Type::I64);
                ir.gen_mul(Type::I64, p, n, m);
                if op == Dp3Op::Madd {
                    ir.gen_add(Type::I64, res, a, p);
                } else {
                    ir.gen_sub(Type::I64, res, a, p);
                }
                self.write_reg(ir, rd, res, sf);
            }
            Dp3Op::Smaddl | Dp3Op::Smsubl | Dp3Op::Umaddl | Dp3Op::Umsubl => {
                let signed = matches!(op, Dp3Op::Smaddl | Dp3Op::Smsubl);
                let mut ops = [TempIdx(0); 2];
                for (slot, r) in ops.iter_mut().zip([rn, rm]) {
                    let x = self.reg(ir, r, true);
                    let t = ir.new_temp(Type::I64);
                    *slot = if signed {
                        ir.gen_sextract(Type::I64, t, x, 0, 32)
                    } else {
                        ir.gen_extract(Type::I64, t, x, 0, 32)
                    };
                }
                let p = ir.new_temp(Type::I64);
                ir.gen_mul(Type::I64, p, ops[0], ops[1]);
                let a = self.reg(ir, ra, true);
                if matches!(op, Dp3Op::Smaddl | Dp3Op::Umaddl) {
                    ir.gen_add(Type::I64, res, a, p);
                } else {
                    ir.gen_sub(Type::I64, res, a, p);
                }
                self.write_reg(ir, rd, res, true);
            }
            Dp3Op::Smulh | Dp3Op::Umulh => {
                let n = self.reg(ir, rn, true);
                let m = self.reg(ir, rm, true);
                if op == Dp3Op::Smulh {
                    ir.gen_mulsh(Type::I64, res, n, m);
                } else {
                    ir.gen_muluh(Type::I64, res, n, m);
                }
                self.write_reg(ir, rd, res, true);
            }
        }
    }
}

// ── Loads and stores ───────────────────────────────────────────

impl A64DisasContext {
    /// The literal is read now and its physical range recorded, so
    /// invalidating its page drops the block. A fault aborts the
    /// whole block.
    fn trans_load_literal(
        &mut self,
        ir: &mut Context,
        mem: &dyn GuestMemory,
        kind: LiteralKind,
        rt: u8,
        offset: i64,
    ) -> Result<(), TranslateError> {
        let addr = self.pc_curr.wrapping_add(offset as u64);
        let (size, signed) = match kind {
            LiteralKind::W => (4, false),
            LiteralKind::X => (8, false),
            LiteralKind::Sw => (4, true),
            LiteralKind::Prefetch => return Ok(()),
        };
        let align = if self.flags.align_check() { size } else { 1 };
        let fetch_fault = |fault| TranslateError::FetchFault { addr, fault };
        let intent = AccessIntent::new(AccessKind::Load, align);
        let phys = mem
            .translate_for_access(addr, size, intent)
            .map_err(fetch_fault)?;
        let page_mask = !(GUEST_PAGE_SIZE - 1);
        let last = addr.wrapping_add(size as u64 - 1);
        if (addr ^ last) & page_mask != 0 {
            // Straddles two pages that need not be contiguous.
            let head = (GUEST_PAGE_SIZE - (addr & !page_mask)) as u32;
            self.base.note_data(phys, head);
            let next = last & page_mask;
            let phys_next = mem
                .translate_for_access(next, size - head, intent)
                .map_err(fetch_fault)?;
            self.base.note_data(phys_next, size - head);
        } else {
            self.base.note_data(phys, size);
        }
        let raw = mem.read_literal(addr, size).map_err(fetch_fault)?;
        let val = if signed {
            raw as u32 as i32 as i64 as u64
        } else {
            raw
        };
        let c = ir.new_const(Type::I64, val);
        self.write_reg(ir, rt, c, true);
        self.gen_close_monitor(ir);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn trans_ldst(
        &mut self,
        ir: &mut Context,
        op: LdStOp,
        size: u8,
        mode: AddrMode,
        unpriv: bool,
        rt: u8,
        rn: u8,
    ) {
        if op == LdStOp::Prefetch {
            return;
        }
        let (addr, wb) = self.gen_addr(ir, rn, mode);
        let mut mop = self.memop(size);
        // LDTR/STTR at EL0 are ordinary accesses.
        if unpriv && self.flags.el() == 1 {
            mop = mop.with(MemOp::UNPRIV);
        }
        match op {
            LdStOp::Store => {
                let v = self.reg(ir, rt, true);
                ir.gen_qemu_st(Type::I64, v, addr, mop);
            }
            LdStOp::Load => {
                let t = ir.new_temp(Type::I64);
                ir.gen_qemu_ld(Type::I64, t, addr, mop);
                self.write_reg(ir, rt, t, true);
            }
            LdStOp::LoadSigned { to64 } => {
                let t = ir.new_temp(Type::I64);
                ir.gen_qemu_ld(Type::I64, t, addr, mop.with_sign(true));
                self.write_reg(ir, rt, t, to64);
            }
            LdStOp::Prefetch => {}
        }
        self.gen_close_monitor(ir);
        if let Some(wb) = wb {
            self.write_reg_sp(ir, rn, wb, true);
        }
    }

    /// Both accesses happen before any register write. A destination
    /// that is also the base is written last; writeback comes after.
    #[allow(clippy::too_many_arguments)]
    fn trans_ldst_pair(
        &mut self,
        ir: &mut Context,
        load: bool,
        signed: bool,
        size: u8,
        mode: AddrMode,
        rt: u8,
        rt2: u8,
        rn: u8,
    ) {
        let (addr, wb) = self.gen_addr(ir, rn, mode);
        let mop = self.memop(size).with_sign(signed);
        let step = ir.new_const(Type::I64, 1 << size);
        let addr2 = ir.new_temp(Type::I64);
        ir.gen_add(Type::I64, addr2, addr, step);
        if load {
            let t1 = ir.new_temp(Type::I64);
            ir.gen_qemu_ld(Type::I64, t1, addr, mop);
            let t2 = ir.new_temp(Type::I64);
            ir.gen_qemu_ld(Type::I64, t2, addr2, mop);
            let sf = size == 3 || signed;
            if rt == rn {
                self.write_reg(ir, rt2, t2, sf);
                self.write_reg(ir, rt, t1, sf);
            } else {
                self.write_reg(ir, rt, t1, sf);
                self.write_reg(ir, rt2, t2, sf);
            }
        } else {
            let v1 = self.reg(ir, rt, true);
            let v2 = self.reg(ir, rt2, true);
            ir.gen_qemu_st(Type::I64, v1, addr, mop);
            ir.gen_qemu_st(Type::I64, v2, addr2, mop);
        }
        self.gen_close_monitor(ir);
        if let Some(wb) = wb {
            self.write_reg_sp(ir, rn, wb, true);
        }
    }

    /// LDXR/LDAXR/LDXP/LDAXP: load and arm the monitor.
    #[allow(clippy::too_many_arguments)]
    fn trans_load_excl(
        &mut self,
        ir: &mut Context,
        size: u8,
        pair: bool,
        acquire: bool,
        rt: u8,
        rt2: u8,
        rn: u8,
    ) {
        let addr = self.gen_base(ir, rn);
        let ord = if acquire { MemOp::ORD_ACQUIRE } else { 0 };
        match (pair, size) {
            (false, _) => {
                let mop = MemOp::sized(size as u32)
                    .aligned()
                    .with(MemOp::EXCL | MemOp::ATOM_SINGLE | ord);
                let t = ir.new_temp(Type::I64);
                ir.gen_qemu_ld(Type::I64, t, addr, mop);
                ir.gen_mov(Type::I64, self.excl_val, t);
                self.write_reg(ir, rt, t, true);
            }
            // Two words as one single-copy-atomic doubleword.
            (true, 2) => {
                let mop = MemOp::uq()
                    .aligned()
                    .with(MemOp::EXCL | MemOp::ATOM_SINGLE | ord);
                let t = ir.new_temp(Type::I64);
                ir.gen_qemu_ld(Type::I64, t, addr, mop);
                ir.gen_mov(Type::I64, self.excl_val, t);
                let lo = ir.new_temp(Type::I64);
                ir.gen_extract(Type::I64, lo, t, 0, 32);
                let hi = ir.new_temp(Type::I64);
                ir.gen_extract(Type::I64, hi, t, 32, 32);
                self.write_reg(ir, rt, lo, true);
                self.write_reg(ir, rt2, hi, true);
            }
            (true, _) => {
                let mop = MemOp::uq()
                    .with(MemOp::EXCL | MemOp::ATOM_PAIR | ord);
                let lo = ir.new_temp(Type::I64);
                ir.gen_qemu_ld(Type::I64, lo, addr, mop.align_to(4));
                let eight = ir.new_const(Type::I64, 8);
                let addr_hi = ir.new_temp(Type::I64);
                ir.gen_add(Type::I64, addr_hi, addr, eight);
                let hi = ir.new_temp(Type::I64);
                ir.gen_qemu_ld(Type::I64, hi, addr_hi, mop);
                ir.gen_mov(Type::I64, self.excl_val, lo);
                ir.gen_mov(Type::I64, self.excl_high, hi);
                self.write_reg(ir, rt, lo, true);
                self.write_reg(ir, rt2, hi, true);
            }
        }
        ir.gen_mov(Type::I64, self.excl_addr, addr);
        if acquire {
            ir.gen_mb(mb::LD_LD | mb::LD_ST | mb::BAR_LDAQ);
        }
        self.excl_maybe_armed = true;
    }

    /// STXR/STLXR/STXP/STLXP: one compare-and-swap against the value
    /// the load-exclusive saw. Rs gets 0 on success, 1 on failure, and
    /// the monitor is closed either way.
    #[allow(clippy::too_many_arguments)]
    fn trans_store_excl(
        &mut self,
        ir: &mut Context,
        size: u8,
        pair: bool,
        release: bool,
        rs: u8,
        rt: u8,
        rt2: u8,
        rn: u8,
    ) {
        if release {
            ir.gen_mb(mb::ALL | mb::BAR_STRL);
        }
        let addr = self.gen_base(ir, rn);
        let ord = if release { MemOp::ORD_RELEASE } else { 0 };
        let fail = ir.new_label();
        let done = ir.new_label();
        ir.gen_brcond(Type::I64, addr, self.excl_addr, Cond::Ne, fail);

        let status = ir.new_temp(Type::I64);
        match (pair, size) {
            (true, 3) => {
                let mop = MemOp::uq()
                    .align_to(4)
                    .with(MemOp::EXCL | MemOp::ATOM_PAIR | ord);
                let new_lo = self.reg(ir, rt, true);
                let new_hi = self.reg(ir, rt2, true);
                let old_lo = ir.new_temp(Type::I64);
                let old_hi = ir.new_temp(Type::I64);
                ir.gen_atomic_cmpxchg2(
                    old_lo,
                    old_hi,
                    addr,
                    self.excl_val,
                    self.excl_high,
                    new_lo,
                    new_hi,
                    mop,
                );
                let ne_hi = ir.new_temp(Type::I64);
                let (lo, hi) = (self.excl_val, self.excl_high);
                ir.gen_setcond(Type::I64, status, old_lo, lo, Cond::Ne);
                ir.gen_setcond(Type::I64, ne_hi, old_hi, hi, Cond::Ne);
                ir.gen_or(Type::I64, status, status, ne_hi);
            }
            _ => {
                let (mop, new) = if pair {
                    // Rt in the low word, Rt2 in the high word.
                    let lo = self.reg(ir, rt, true);
                    let hi = self.reg(ir, rt2, true);
                    let t = ir.new_temp(Type::I64);
                    ir.gen_deposit(Type::I64, t, lo, hi, 32, 32);
                    (MemOp::uq(), t)
                } else {
                    (MemOp::sized(size as u32), self.reg(ir, rt, true))
                };
                let mop = mop
                    .aligned()
                    .with(MemOp::EXCL | MemOp::ATOM_SINGLE | ord);
                let old = ir.new_temp(Type::I64);
                ir.gen_atomic_cmpxchg(
                    Type::I64,
                    old,
                    addr,
                    self.excl_val,
                    new,
                    mop,
                );
                ir.gen_setcond(Type::I64, status, old, self.excl_val, Cond::Ne);
            }
        }
        self.write_reg(ir, rs, status, false);
        ir.gen_br(done);

        ir.gen_set_label(fail);
        let one = ir.new_const(Type::I64, 1);
        self.write_reg(ir, rs, one, false);

        ir.gen_set_label(done);
        let open = ir.new_const(Type::I64, u64::MAX);
        ir.gen_mov(Type::I64, self.excl_addr, open);
        self.excl_maybe_armed = false;
    }

    /// LD<op>/SWP: Rt receives the old memory value.
    #[allow(clippy::too_many_arguments)]
    fn trans_atomic_op(
        &mut self,
        ir: &mut Context,
        size: u8,
        op: RmwOp,
        acquire: bool,
        release: bool,
        rs: u8,
        rt: u8,
        rn: u8,
    ) {
        let addr = self.gen_base(ir, rn);
        let mop = MemOp::sized(size as u32)
            .aligned()
            .with(MemOp::ATOM_SINGLE | ordering(acquire, release));
        let val = self.reg(ir, rs, true);
        let old = ir.new_temp(Type::I64);
        ir.gen_atomic_rmw(Type::I64, old, addr, val, mop, op);
        self.write_reg(ir, rt, old, true);
        self.gen_close_monitor(ir);
    }
}
