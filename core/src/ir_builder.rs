use crate::context::Context;
use crate::excp::ExceptionKind;
use crate::op::Op;
use crate::opcode::Opcode;
use crate::temp::TempIdx;
use crate::types::{Cond, MemOp, RmwOp, Type};

// Constant args are encoded as TempIdx(raw_value as u32).
fn carg(val: u32) -> TempIdx {
    TempIdx(val)
}

/// `d = a <op> b` emitters, one per two-input ALU opcode.
macro_rules! binary_ops {
    ($($(#[$doc:meta])* $name:ident => $opc:ident;)*) => {$(
        $(#[$doc])*
        pub fn $name(
            &mut self,
            ty: Type,
            d: TempIdx,
            a: TempIdx,
            b: TempIdx,
        ) -> TempIdx {
            self.emit(Opcode::$opc, ty, &[d, a, b]);
            d
        }
    )*};
}

/// `d = <op> s` emitters.
macro_rules! unary_ops {
    ($($name:ident => $opc:ident;)*) => {$(
        pub fn $name(&mut self, ty: Type, d: TempIdx, s: TempIdx) -> TempIdx {
            self.emit(Opcode::$opc, ty, &[d, s]);
            d
        }
    )*};
}

impl Context {
    fn emit(&mut self, opc: Opcode, ty: Type, args: &[TempIdx]) {
        let idx = self.next_op_idx();
        self.emit_op(Op::with_args(idx, opc, ty, args));
    }

    binary_ops! {
        gen_add => Add;
        gen_sub => Sub;
        gen_mul => Mul;
        gen_and => And;
        gen_or => Or;
        gen_xor => Xor;
        /// Shift counts are taken modulo the type width.
        gen_shl => Shl;
        gen_shr => Shr;
        gen_sar => Sar;
        gen_rotl => RotL;
        gen_rotr => RotR;
        /// `d = a & !b`
        gen_andc => AndC;
        /// `d = a | !b`
        gen_orc => OrC;
        /// `d = !(a ^ b)`
        gen_eqv => Eqv;
        /// Signed division; a zero divisor yields 0 and
        /// `MIN / -1` yields `MIN`.
        gen_divs => DivS;
        gen_divu => DivU;
        /// High half of the signed double-width product.
        gen_mulsh => MulSH;
        gen_muluh => MulUH;
        /// `d = a != 0 ? clz(a) : b`
        gen_clz => Clz;
        /// `d = a != 0 ? ctz(a) : b`
        gen_ctz => Ctz;
    }

    unary_ops! {
        gen_neg => Neg;
        gen_not => Not;
        gen_mov => Mov;
        gen_ctpop => CtPop;
    }

    // -- Bit field --

    pub fn gen_extract(
        &mut self,
        ty: Type,
        d: TempIdx,
        src: TempIdx,
        ofs: u32,
        len: u32,
    ) -> TempIdx {
        self.emit(Opcode::Extract, ty, &[d, src, carg(ofs), carg(len)]);
        d
    }

    pub fn gen_sextract(
        &mut self,
        ty: Type,
        d: TempIdx,
        src: TempIdx,
        ofs: u32,
        len: u32,
    ) -> TempIdx {
        self.emit(Opcode::SExtract, ty, &[d, src, carg(ofs), carg(len)]);
        d
    }

    /// `d = a` with bits `[ofs, ofs+len)` replaced by the low bits
    /// of `b`.
    pub fn gen_deposit(
        &mut self,
        ty: Type,
        d: TempIdx,
        a: TempIdx,
        b: TempIdx,
        ofs: u32,
        len: u32,
    ) -> TempIdx {
        self.emit(Opcode::Deposit, ty, &[d, a, b, carg(ofs), carg(len)]);
        d
    }

    /// `d = (ah:al) >> ofs`, truncated to the type width.
    pub fn gen_extract2(
        &mut self,
        ty: Type,
        d: TempIdx,
        al: TempIdx,
        ah: TempIdx,
        ofs: u32,
    ) -> TempIdx {
        self.emit(Opcode::Extract2, ty, &[d, al, ah, carg(ofs)]);
        d
    }

    /// Byte swap of the low 2, 4 or 8 bytes of `src`. The frontends
    /// pass `flags = 0`; the value is kept in the op for dumps.
    pub fn gen_bswap(
        &mut self,
        opc: Opcode,
        ty: Type,
        d: TempIdx,
        src: TempIdx,
        flags: u32,
    ) -> TempIdx {
        debug_assert!(matches!(
            opc,
            Opcode::Bswap16 | Opcode::Bswap32 | Opcode::Bswap64
        ));
        self.emit(opc, ty, &[d, src, carg(flags)]);
        d
    }

    // -- NegSetCond / MovCond --

    pub fn gen_negsetcond(
        &mut self,
        ty: Type,
        d: TempIdx,
        a: TempIdx,
        b: TempIdx,
        cond: Cond,
    ) -> TempIdx {
        self.emit(Opcode::NegSetCond, ty, &[d, a, b, carg(cond as u32)]);
        d
    }

    /// `d = (c1 cond c2) ? v1 : v2`
    #[allow(clippy::too_many_arguments)]
    pub fn gen_movcond(
        &mut self,
        ty: Type,
        d: TempIdx,
        c1: TempIdx,
        c2: TempIdx,
        v1: TempIdx,
        v2: TempIdx,
        cond: Cond,
    ) -> TempIdx {
        self.emit(
            Opcode::MovCond,
            ty,
            &[d, c1, c2, v1, v2, carg(cond as u32)],
        );
        d
    }

    /// `d = val`
    pub fn gen_movi(&mut self, ty: Type, d: TempIdx, val: u64) -> TempIdx {
        let c = self.new_const(ty, val);
        self.gen_mov(ty, d, c)
    }

    /// Width conversions between i32 and i64: `ExtI32I64` sign-
    /// extends, `ExtUI32I64` zero-extends, `ExtrlI64I32` and
    /// `ExtrhI64I32` take the low and high halves.
    pub fn gen_ext(&mut self, opc: Opcode, d: TempIdx, s: TempIdx) -> TempIdx {
        let ty = match opc {
            Opcode::ExtI32I64 | Opcode::ExtUI32I64 => Type::I64,
            Opcode::ExtrlI64I32 | Opcode::ExtrhI64I32 => Type::I32,
            _ => unreachable!("{opc:?} is not a width conversion"),
        };
        self.emit(opc, ty, &[d, s]);
        d
    }

    // -- SetCond (1 oarg, 2 iargs, 1 carg) --

    pub fn gen_setcond(
        &mut self,
        ty: Type,
        d: TempIdx,
        a: TempIdx,
        b: TempIdx,
        cond: Cond,
    ) -> TempIdx {
        self.emit(Opcode::SetCond, ty, &[d, a, b, carg(cond as u32)]);
        d
    }

    // -- CPU state access --

    /// Load: dst = *(base + offset)
    /// Ld: 1 oarg, 1 iarg, 1 carg (offset)
    pub fn gen_ld(
        &mut self,
        ty: Type,
        dst: TempIdx,
        base: TempIdx,
        offset: i64,
    ) -> TempIdx {
        self.emit(Opcode::Ld, ty, &[dst, base, carg(offset as u32)]);
        dst
    }

    /// Store: *(base + offset) = src
    /// St: 0 oargs, 2 iargs, 1 carg (offset)
    pub fn gen_st(
        &mut self,
        ty: Type,
        src: TempIdx,
        base: TempIdx,
        offset: i64,
    ) {
        self.emit(Opcode::St, ty, &[src, base, carg(offset as u32)]);
    }

    // -- Control flow --

    /// Unconditional branch to label.
    /// Br: 0 oargs, 0 iargs, 1 carg (label_id)
    pub fn gen_br(&mut self, label_id: u32) {
        self.label_mut(label_id).add_ref();
        self.emit(Opcode::Br, Type::I64, &[carg(label_id)]);
    }

    /// Conditional branch.
    /// BrCond: 0 oargs, 2 iargs, 2 cargs (cond, label_id)
    pub fn gen_brcond(
        &mut self,
        ty: Type,
        a: TempIdx,
        b: TempIdx,
        cond: Cond,
        label_id: u32,
    ) {
        self.label_mut(label_id).add_ref();
        self.emit(
            Opcode::BrCond,
            ty,
            &[a, b, carg(cond as u32), carg(label_id)],
        );
    }

    /// Define label position.
    /// SetLabel: 0 oargs, 0 iargs, 1 carg (label_id)
    pub fn gen_set_label(&mut self, label_id: u32) {
        self.label_mut(label_id).present = true;
        self.emit(Opcode::SetLabel, Type::I64, &[carg(label_id)]);
    }

    // -- TB exit --

    /// GotoTb: 0 oargs, 0 iargs, 1 carg (slot)
    pub fn gen_goto_tb(&mut self, slot: u32) {
        self.emit(Opcode::GotoTb, Type::I64, &[carg(slot)]);
    }

    /// ExitTb: 0 oargs, 0 iargs, 1 carg (val)
    pub fn gen_exit_tb(&mut self, val: u32) {
        self.emit(Opcode::ExitTb, Type::I64, &[carg(val)]);
    }

    /// Raise: 0 oargs, 0 iargs, 4 cargs (kind, syndrome, pc_lo, pc_hi)
    ///
    /// Terminal. The executor hands `(kind, syndrome)` to the
    /// exception dispatcher with `pc` as the faulting address.
    pub fn gen_raise(&mut self, kind: ExceptionKind, syndrome: u32, pc: u64) {
        self.emit(
            Opcode::Raise,
            Type::I64,
            &[
                carg(kind as u32),
                carg(syndrome),
                carg(pc as u32),
                carg((pc >> 32) as u32),
            ],
        );
    }

    // -- Boundary --

    /// InsnStart: 0 oargs, 0 iargs, 2 cargs (pc_lo, pc_hi)
    pub fn gen_insn_start(&mut self, pc: u64) {
        self.emit(
            Opcode::InsnStart,
            Type::I64,
            &[carg(pc as u32), carg((pc >> 32) as u32)],
        );
    }

    /// Mb: memory barrier, `bar_type` from `types::mb`.
    pub fn gen_mb(&mut self, bar_type: u32) {
        self.emit(Opcode::Mb, Type::I64, &[carg(bar_type)]);
    }

    pub fn gen_nop(&mut self) {
        self.emit(Opcode::Nop, Type::I64, &[]);
    }

    /// Call helper: dst = helper(args[0..6])
    /// Call: 1 oarg, 6 iargs, 2 cargs (helper id, flags)
    pub fn gen_call(
        &mut self,
        dst: TempIdx,
        helper: u32,
        args: &[TempIdx],
    ) -> TempIdx {
        let mut full_args = Vec::with_capacity(1 + 6 + 2);
        full_args.push(dst);
        let zero = self.new_const(Type::I64, 0);
        for i in 0..6 {
            let arg = args.get(i).copied().unwrap_or(zero);
            full_args.push(arg);
        }
        full_args.push(carg(helper));
        full_args.push(carg(0));
        self.emit(Opcode::Call, Type::I64, &full_args);
        dst
    }

    pub fn gen_discard(&mut self, ty: Type, t: TempIdx) {
        self.emit(Opcode::Discard, ty, &[t]);
    }

    // -- Guest memory access --

    pub fn gen_qemu_ld(
        &mut self,
        ty: Type,
        dst: TempIdx,
        addr: TempIdx,
        memop: MemOp,
    ) -> TempIdx {
        self.emit(Opcode::QemuLd, ty, &[dst, addr, carg(memop.bits())]);
        dst
    }

    pub fn gen_qemu_st(
        &mut self,
        ty: Type,
        val: TempIdx,
        addr: TempIdx,
        memop: MemOp,
    ) {
        self.emit(Opcode::QemuSt, ty, &[val, addr, carg(memop.bits())]);
    }

    /// `old = *addr; if old == cmp { *addr = new }` as one atomic
    /// access. Comparison is on the extended value per `memop`.
    pub fn gen_atomic_cmpxchg(
        &mut self,
        ty: Type,
        old: TempIdx,
        addr: TempIdx,
        cmp: TempIdx,
        new: TempIdx,
        memop: MemOp,
    ) -> TempIdx {
        self.emit(
            Opcode::AtomicCmpxchg,
            ty,
            &[old, addr, cmp, new, carg(memop.bits())],
        );
        old
    }

    /// 16-byte compare-and-swap: both halves must match.
    #[allow(clippy::too_many_arguments)]
    pub fn gen_atomic_cmpxchg2(
        &mut self,
        old_lo: TempIdx,
        old_hi: TempIdx,
        addr: TempIdx,
        cmp_lo: TempIdx,
        cmp_hi: TempIdx,
        new_lo: TempIdx,
        new_hi: TempIdx,
        memop: MemOp,
    ) {
        self.emit(
            Opcode::AtomicCmpxchg2,
            Type::I64,
            &[
                old_lo,
                old_hi,
                addr,
                cmp_lo,
                cmp_hi,
                new_lo,
                new_hi,
                carg(memop.bits()),
            ],
        );
    }

    /// `old = *addr; *addr = op(old, val)` as one atomic access.
    pub fn gen_atomic_rmw(
        &mut self,
        ty: Type,
        old: TempIdx,
        addr: TempIdx,
        val: TempIdx,
        memop: MemOp,
        op: RmwOp,
    ) -> TempIdx {
        self.emit(
            Opcode::AtomicRmw,
            ty,
            &[old, addr, val, carg(memop.bits()), carg(op as u32)],
        );
        old
    }
}
