//! Lazy condition-code model.
//!
//! Flag-setting operations record a tag naming the operation plus the
//! operands needed to rebuild any flag later; flags are only computed
//! when something reads them. The same tag encoding is stored in the
//! guest CPU's `cc_op` field so generated code and helpers agree on
//! it.
//!
//! Carry follows the A64 convention: for subtraction C is NOT borrow.
//!
//! Fixed policy for bits the architectures leave undefined:
//! - multiply: N and Z from the low result, C = V = "product did not
//!   fit in the width";
//! - shifts: C is the last bit shifted out, V = sign(src XOR dst) for
//!   every count; a zero count does not record at all.

/// Operation width the flags are computed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Width {
    W8 = 0,
    W16 = 1,
    W32 = 2,
    W64 = 3,
}

impl Width {
    pub const ALL: [Width; 4] =
        [Width::W8, Width::W16, Width::W32, Width::W64];

    pub const fn bits(self) -> u32 {
        8 << self as u32
    }

    pub const fn mask(self) -> u64 {
        u64::MAX >> (64 - self.bits())
    }

    pub const fn sign_bit(self) -> u64 {
        1 << (self.bits() - 1)
    }

    const fn from_index(i: u32) -> Width {
        match i & 3 {
            0 => Width::W8,
            1 => Width::W16,
            2 => Width::W32,
            _ => Width::W64,
        }
    }

    /// Sign-extend the low `bits()` of `v`.
    fn sext(self, v: u64) -> i128 {
        let shift = 64 - self.bits();
        (((v << shift) as i64) >> shift) as i128
    }

    fn signed_range(self) -> (i128, i128) {
        let max = (self.sign_bit() - 1) as i128;
        (-max - 1, max)
    }
}

/// Which operation last defined the flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CcOp {
    /// `dst` holds NZCV packed in bits 31..28.
    Eager,
    Add(Width),
    Adc(Width),
    Sub(Width),
    Sbc(Width),
    Logic(Width),
    Inc(Width),
    Dec(Width),
    Mul(Width),
    Shl(Width),
    Shr(Width),
}

impl CcOp {
    /// Stable numeric encoding: `family << 2 | width`, `Eager` = 0.
    pub const fn to_raw(self) -> u32 {
        let (family, w) = match self {
            CcOp::Eager => return 0,
            CcOp::Add(w) => (1, w),
            CcOp::Adc(w) => (2, w),
            CcOp::Sub(w) => (3, w),
            CcOp::Sbc(w) => (4, w),
            CcOp::Logic(w) => (5, w),
            CcOp::Inc(w) => (6, w),
            CcOp::Dec(w) => (7, w),
            CcOp::Mul(w) => (8, w),
            CcOp::Shl(w) => (9, w),
            CcOp::Shr(w) => (10, w),
        };
        (family << 2) | w as u32
    }

    pub const fn from_raw(raw: u32) -> Option<CcOp> {
        let w = Width::from_index(raw);
        Some(match raw >> 2 {
            0 if raw == 0 => CcOp::Eager,
            1 => CcOp::Add(w),
            2 => CcOp::Adc(w),
            3 => CcOp::Sub(w),
            4 => CcOp::Sbc(w),
            5 => CcOp::Logic(w),
            6 => CcOp::Inc(w),
            7 => CcOp::Dec(w),
            8 => CcOp::Mul(w),
            9 => CcOp::Shl(w),
            10 => CcOp::Shr(w),
            _ => return None,
        })
    }

    pub const fn width(self) -> Width {
        match self {
            CcOp::Eager => Width::W32,
            CcOp::Add(w)
            | CcOp::Adc(w)
            | CcOp::Sub(w)
            | CcOp::Sbc(w)
            | CcOp::Logic(w)
            | CcOp::Inc(w)
            | CcOp::Dec(w)
            | CcOp::Mul(w)
            | CcOp::Shl(w)
            | CcOp::Shr(w) => w,
        }
    }
}

/// Operands recorded with a [`CcOp`].
///
/// | family   | `dst`        | `src`                    | `src2`  |
/// |----------|--------------|--------------------------|---------|
/// | Add/Sub  | result       | first operand            | second  |
/// | Adc/Sbc  | result       | first operand            | second  |
/// | Logic    | result       | -                        | -       |
/// | Inc/Dec  | result       | carry before the op      | -       |
/// | Mul      | low result   | non-zero iff overflowed  | -       |
/// | Shl/Shr  | result       | operand shifted count-1  | -       |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CcSnapshot {
    pub dst: u64,
    pub src: u64,
    pub src2: u64,
}

impl CcSnapshot {
    pub const fn new(dst: u64, src: u64, src2: u64) -> Self {
        Self { dst, src, src2 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flag {
    N,
    Z,
    C,
    V,
}

impl Flag {
    pub const ALL: [Flag; 4] = [Flag::N, Flag::Z, Flag::C, Flag::V];
}

/// Explicit flag bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EagerFlags {
    pub n: bool,
    pub z: bool,
    pub c: bool,
    pub v: bool,
}

impl EagerFlags {
    /// Pack as PSTATE.NZCV (bits 31..28).
    pub const fn to_nzcv(self) -> u32 {
        ((self.n as u32) << 31)
            | ((self.z as u32) << 30)
            | ((self.c as u32) << 29)
            | ((self.v as u32) << 28)
    }

    pub const fn from_nzcv(nzcv: u32) -> Self {
        Self {
            n: nzcv & (1 << 31) != 0,
            z: nzcv & (1 << 30) != 0,
            c: nzcv & (1 << 29) != 0,
            v: nzcv & (1 << 28) != 0,
        }
    }

    pub const fn get(self, flag: Flag) -> bool {
        match flag {
            Flag::N => self.n,
            Flag::Z => self.z,
            Flag::C => self.c,
            Flag::V => self.v,
        }
    }
}

/// A64 condition codes (encoding of the `cond` field).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CondCode {
    Eq = 0,
    Ne = 1,
    Hs = 2,
    Lo = 3,
    Mi = 4,
    Pl = 5,
    Vs = 6,
    Vc = 7,
    Hi = 8,
    Ls = 9,
    Ge = 10,
    Lt = 11,
    Gt = 12,
    Le = 13,
    Al = 14,
    /// Behaves as `Al` in A64.
    Nv = 15,
}

impl CondCode {
    pub const fn from_bits(v: u32) -> CondCode {
        match v & 0xf {
            0 => CondCode::Eq,
            1 => CondCode::Ne,
            2 => CondCode::Hs,
            3 => CondCode::Lo,
            4 => CondCode::Mi,
            5 => CondCode::Pl,
            6 => CondCode::Vs,
            7 => CondCode::Vc,
            8 => CondCode::Hi,
            9 => CondCode::Ls,
            10 => CondCode::Ge,
            11 => CondCode::Lt,
            12 => CondCode::Gt,
            13 => CondCode::Le,
            14 => CondCode::Al,
            _ => CondCode::Nv,
        }
    }

    /// Logical negation. `Al`/`Nv` have none and are returned as-is.
    pub const fn invert(self) -> CondCode {
        match self {
            CondCode::Al | CondCode::Nv => self,
            _ => CondCode::from_bits(self as u32 ^ 1),
        }
    }

    pub const fn is_always(self) -> bool {
        matches!(self, CondCode::Al | CondCode::Nv)
    }

    /// The single flag this condition reads, if it reads only one.
    pub const fn single_flag(self) -> Option<(Flag, bool)> {
        Some(match self {
            CondCode::Eq => (Flag::Z, true),
            CondCode::Ne => (Flag::Z, false),
            CondCode::Hs => (Flag::C, true),
            CondCode::Lo => (Flag::C, false),
            CondCode::Mi => (Flag::N, true),
            CondCode::Pl => (Flag::N, false),
            CondCode::Vs => (Flag::V, true),
            CondCode::Vc => (Flag::V, false),
            _ => return None,
        })
    }

    /// Evaluate against explicit flags (`ConditionHolds`).
    pub const fn eval(self, f: EagerFlags) -> bool {
        match self {
            CondCode::Eq => f.z,
            CondCode::Ne => !f.z,
            CondCode::Hs => f.c,
            CondCode::Lo => !f.c,
            CondCode::Mi => f.n,
            CondCode::Pl => !f.n,
            CondCode::Vs => f.v,
            CondCode::Vc => !f.v,
            CondCode::Hi => f.c && !f.z,
            CondCode::Ls => !(f.c && !f.z),
            CondCode::Ge => f.n == f.v,
            CondCode::Lt => f.n != f.v,
            CondCode::Gt => !f.z && f.n == f.v,
            CondCode::Le => !(!f.z && f.n == f.v),
            CondCode::Al | CondCode::Nv => true,
        }
    }
}

/// Flag state of a CPU or of a block under construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagState {
    Eager(EagerFlags),
    Deferred { op: CcOp, snapshot: CcSnapshot },
}

impl Default for FlagState {
    fn default() -> Self {
        FlagState::Eager(EagerFlags::default())
    }
}

impl FlagState {
    /// Replace the state with a pending computation. O(1).
    pub fn record(&mut self, op: CcOp, snapshot: CcSnapshot) {
        *self = match op {
            CcOp::Eager => {
                FlagState::Eager(EagerFlags::from_nzcv(snapshot.dst as u32))
            }
            _ => FlagState::Deferred { op, snapshot },
        };
    }

    /// Record the flags of a shift by `count`; a zero count leaves
    /// the state untouched.
    pub fn record_shift(
        &mut self,
        op: CcOp,
        count: u32,
        snapshot: CcSnapshot,
    ) {
        if count != 0 {
            self.record(op, snapshot);
        }
    }

    /// All four flags. Never changes `self`.
    pub fn materialize_all(&self) -> EagerFlags {
        match *self {
            FlagState::Eager(f) => f,
            FlagState::Deferred { op, snapshot } => compute_all(op, snapshot),
        }
    }

    /// One flag, without computing the others. Always agrees with
    /// the same bit of [`materialize_all`](Self::materialize_all).
    pub fn materialize_one(&self, flag: Flag) -> bool {
        match *self {
            FlagState::Eager(f) => f.get(flag),
            FlagState::Deferred { op, snapshot } => {
                compute_one(op, snapshot, flag)
            }
        }
    }

    /// Evaluate a condition, touching only the flags it reads.
    pub fn test(&self, cond: CondCode) -> bool {
        if cond.is_always() {
            return true;
        }
        match cond.single_flag() {
            Some((flag, want)) => self.materialize_one(flag) == want,
            None => cond.eval(self.materialize_all()),
        }
    }

    /// Collapse to `Eager`.
    pub fn settle(&mut self) -> EagerFlags {
        let f = self.materialize_all();
        *self = FlagState::Eager(f);
        f
    }
}

/// Recompute all flags by re-running the operation at twice the
/// width.
pub fn compute_all(op: CcOp, s: CcSnapshot) -> EagerFlags {
    if op == CcOp::Eager {
        return EagerFlags::from_nzcv(s.dst as u32);
    }
    let w = op.width();
    let m = w.mask();
    let (a, b, d) = (s.src & m, s.src2 & m, s.dst & m);
    let n = d & w.sign_bit() != 0;
    let z = d == 0;
    let (lo, hi) = w.signed_range();
    let out_of_range = |r: i128| r < lo || r > hi;

    let (c, v) = match op {
        CcOp::Add(_) | CcOp::Adc(_) => {
            let cin = if matches!(op, CcOp::Adc(_)) {
                d.wrapping_sub(a).wrapping_sub(b) & m & 1
            } else {
                0
            };
            let wide = a as u128 + b as u128 + cin as u128;
            let swide = w.sext(a) + w.sext(b) + cin as i128;
            (wide > m as u128, out_of_range(swide))
        }
        CcOp::Sub(_) | CcOp::Sbc(_) => {
            // a - b - borrow == a + !b + carry
            let cin = if matches!(op, CcOp::Sbc(_)) {
                1 - (a.wrapping_sub(b).wrapping_sub(d) & m & 1)
            } else {
                1
            };
            let wide = a as u128 + (!b & m) as u128 + cin as u128;
            let swide = w.sext(a) - w.sext(b) - (1 - cin) as i128;
            (wide > m as u128, out_of_range(swide))
        }
        CcOp::Logic(_) => (false, false),
        CcOp::Inc(_) => {
            let prev = d.wrapping_sub(1) & m;
            (s.src != 0, out_of_range(w.sext(prev) + 1))
        }
        CcOp::Dec(_) => {
            let prev = d.wrapping_add(1) & m;
            (s.src != 0, out_of_range(w.sext(prev) - 1))
        }
        CcOp::Mul(_) => (s.src != 0, s.src != 0),
        CcOp::Shl(_) | CcOp::Shr(_) => {
            let top = w.bits() - 1;
            let c = if matches!(op, CcOp::Shl(_)) {
                (a >> top) & 1 != 0
            } else {
                a & 1 != 0
            };
            (c, (a ^ d) >> top != 0)
        }
        CcOp::Eager => unreachable!(),
    };
    EagerFlags { n, z, c, v }
}

/// Recompute a single flag with bitwise formulas.
pub fn compute_one(op: CcOp, s: CcSnapshot, flag: Flag) -> bool {
    if op == CcOp::Eager {
        return EagerFlags::from_nzcv(s.dst as u32).get(flag);
    }
    let w = op.width();
    let m = w.mask();
    let sb = w.sign_bit();
    let (a, b, d) = (s.src & m, s.src2 & m, s.dst & m);
    let sign = |x: u64| x & sb != 0;

    match flag {
        Flag::N => sign(d),
        Flag::Z => d == 0,
        Flag::C => match op {
            CcOp::Add(_) => d < a,
            CcOp::Adc(_) => {
                let cin = d.wrapping_sub(a).wrapping_sub(b) & m;
                if cin != 0 {
                    d <= a
                } else {
                    d < a
                }
            }
            CcOp::Sub(_) => a >= b,
            CcOp::Sbc(_) => {
                let borrow = a.wrapping_sub(b).wrapping_sub(d) & m;
                if borrow != 0 {
                    a > b
                } else {
                    a >= b
                }
            }
            CcOp::Logic(_) => false,
            CcOp::Inc(_) | CcOp::Dec(_) | CcOp::Mul(_) => s.src != 0,
            CcOp::Shl(_) => sign(a),
            CcOp::Shr(_) => a & 1 != 0,
            CcOp::Eager => unreachable!(),
        },
        Flag::V => match op {
            // Operands share a sign and the result's sign differs.
            CcOp::Add(_) | CcOp::Adc(_) => {
                sign(a) == sign(b) && sign(d) != sign(a)
            }
            // Operands differ in sign and the result's sign differs
            // from the first operand.
            CcOp::Sub(_) | CcOp::Sbc(_) => {
                sign(a) != sign(b) && sign(d) != sign(a)
            }
            CcOp::Logic(_) => false,
            CcOp::Inc(_) => d == sb,
            CcOp::Dec(_) => d == sb - 1,
            CcOp::Mul(_) => s.src != 0,
            CcOp::Shl(_) | CcOp::Shr(_) => sign(a ^ d),
            CcOp::Eager => unreachable!(),
        },
    }
}
