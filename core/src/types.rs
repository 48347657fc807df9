/// IR value types.
///
/// Represents the width of IR operands. Guest registers are always
/// held in `I64` temps; `I32` is used for narrow intermediate values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Type {
    I32 = 0,
    I64 = 1,
}

pub const TYPE_COUNT: usize = 2;

impl Type {
    pub const fn size_bits(self) -> u32 {
        match self {
            Type::I32 => 32,
            Type::I64 => 64,
        }
    }

    pub const fn size_bytes(self) -> u32 {
        self.size_bits() / 8
    }

    /// All-ones value of this width, zero-extended to 64 bits.
    pub const fn mask(self) -> u64 {
        match self {
            Type::I32 => 0xffff_ffff,
            Type::I64 => u64::MAX,
        }
    }
}

/// Comparison conditions for branch/setcond operations.
///
/// Encoding matches QEMU's `TCGCond` so dumps read the same.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Cond {
    Never = 0,
    Always = 1,
    Eq = 8,
    Ne = 9,
    // Signed
    Lt = 10,
    Ge = 11,
    Le = 12,
    Gt = 13,
    // Unsigned
    Ltu = 14,
    Geu = 15,
    Leu = 16,
    Gtu = 17,
    // Test (AND then compare vs 0)
    TstEq = 18,
    TstNe = 19,
}

impl Cond {
    /// Return the inverted condition.
    pub const fn invert(self) -> Cond {
        match self {
            Cond::Never => Cond::Always,
            Cond::Always => Cond::Never,
            Cond::Eq => Cond::Ne,
            Cond::Ne => Cond::Eq,
            Cond::Lt => Cond::Ge,
            Cond::Ge => Cond::Lt,
            Cond::Le => Cond::Gt,
            Cond::Gt => Cond::Le,
            Cond::Ltu => Cond::Geu,
            Cond::Geu => Cond::Ltu,
            Cond::Leu => Cond::Gtu,
            Cond::Gtu => Cond::Leu,
            Cond::TstEq => Cond::TstNe,
            Cond::TstNe => Cond::TstEq,
        }
    }

    /// Swap operand order (e.g. Lt becomes Gt).
    pub const fn swap(self) -> Cond {
        match self {
            Cond::Eq
            | Cond::Ne
            | Cond::Never
            | Cond::Always
            | Cond::TstEq
            | Cond::TstNe => self,
            Cond::Lt => Cond::Gt,
            Cond::Ge => Cond::Le,
            Cond::Le => Cond::Ge,
            Cond::Gt => Cond::Lt,
            Cond::Ltu => Cond::Gtu,
            Cond::Geu => Cond::Leu,
            Cond::Leu => Cond::Geu,
            Cond::Gtu => Cond::Ltu,
        }
    }

    pub const fn is_signed(self) -> bool {
        matches!(self, Cond::Lt | Cond::Ge | Cond::Le | Cond::Gt)
    }

    pub const fn is_unsigned(self) -> bool {
        matches!(self, Cond::Ltu | Cond::Geu | Cond::Leu | Cond::Gtu)
    }

    pub const fn is_tst(self) -> bool {
        matches!(self, Cond::TstEq | Cond::TstNe)
    }

    pub const fn from_u8(v: u8) -> Option<Cond> {
        Some(match v {
            0 => Cond::Never,
            1 => Cond::Always,
            8 => Cond::Eq,
            9 => Cond::Ne,
            10 => Cond::Lt,
            11 => Cond::Ge,
            12 => Cond::Le,
            13 => Cond::Gt,
            14 => Cond::Ltu,
            15 => Cond::Geu,
            16 => Cond::Leu,
            17 => Cond::Gtu,
            18 => Cond::TstEq,
            19 => Cond::TstNe,
            _ => return None,
        })
    }

    /// Evaluate the condition on two values of width `ty`.
    pub fn eval(self, ty: Type, a: u64, b: u64) -> bool {
        let (a, b) = (a & ty.mask(), b & ty.mask());
        let (sa, sb) = match ty {
            Type::I32 => (a as u32 as i32 as i64, b as u32 as i32 as i64),
            Type::I64 => (a as i64, b as i64),
        };
        match self {
            Cond::Never => false,
            Cond::Always => true,
            Cond::Eq => a == b,
            Cond::Ne => a != b,
            Cond::Lt => sa < sb,
            Cond::Ge => sa >= sb,
            Cond::Le => sa <= sb,
            Cond::Gt => sa > sb,
            Cond::Ltu => a < b,
            Cond::Geu => a >= b,
            Cond::Leu => a <= b,
            Cond::Gtu => a > b,
            Cond::TstEq => a & b == 0,
            Cond::TstNe => a & b != 0,
        }
    }
}

/// Memory operation descriptor: size, signedness, endianness,
/// alignment, atomicity and ordering.
///
/// Bit-packed so it fits in one constant op argument. The atomicity
/// and ordering fields are the contract a code generator must honour
/// when it reorders or splits accesses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemOp(u32);

impl MemOp {
    pub const SIZE_8: u32 = 0;
    pub const SIZE_16: u32 = 1;
    pub const SIZE_32: u32 = 2;
    pub const SIZE_64: u32 = 3;

    pub const SIGN: u32 = 1 << 2;
    pub const BSWAP: u32 = 1 << 3;

    const ALIGN_SHIFT: u32 = 4;
    const ALIGN_MASK: u32 = 7 << Self::ALIGN_SHIFT;
    pub const ALIGN_2: u32 = 1 << 4;
    pub const ALIGN_4: u32 = 2 << 4;
    pub const ALIGN_8: u32 = 3 << 4;
    pub const ALIGN_16: u32 = 4 << 4;

    const ATOM_SHIFT: u32 = 7;
    const ATOM_MASK: u32 = 3 << Self::ATOM_SHIFT;
    /// No single-copy atomicity beyond what the size implies.
    pub const ATOM_NONE: u32 = 0;
    /// The whole access is single-copy atomic.
    pub const ATOM_SINGLE: u32 = 1 << 7;
    /// Each half of a paired access is single-copy atomic.
    pub const ATOM_PAIR: u32 = 2 << 7;

    const ORD_SHIFT: u32 = 9;
    const ORD_MASK: u32 = 3 << Self::ORD_SHIFT;
    pub const ORD_PLAIN: u32 = 0;
    pub const ORD_ACQUIRE: u32 = 1 << 9;
    pub const ORD_RELEASE: u32 = 2 << 9;
    pub const ORD_ACQ_REL: u32 = 3 << 9;

    /// Part of a load-exclusive/store-exclusive sequence.
    pub const EXCL: u32 = 1 << 11;
    /// Checked with EL0 permissions regardless of current EL.
    pub const UNPRIV: u32 = 1 << 12;

    pub const fn new(bits: u32) -> Self {
        Self(bits)
    }

    /// Unsigned access of `1 << size` bytes.
    pub const fn sized(size: u32) -> Self {
        Self(size & 3)
    }

    pub const fn ub() -> Self {
        Self(Self::SIZE_8)
    }
    pub const fn sb() -> Self {
        Self(Self::SIZE_8 | Self::SIGN)
    }
    pub const fn uw() -> Self {
        Self(Self::SIZE_16)
    }
    pub const fn sw() -> Self {
        Self(Self::SIZE_16 | Self::SIGN)
    }
    pub const fn ul() -> Self {
        Self(Self::SIZE_32)
    }
    pub const fn sl() -> Self {
        Self(Self::SIZE_32 | Self::SIGN)
    }
    pub const fn uq() -> Self {
        Self(Self::SIZE_64)
    }

    pub const fn with(self, bits: u32) -> Self {
        Self(self.0 | bits)
    }

    pub const fn with_sign(self, signed: bool) -> Self {
        if signed {
            Self(self.0 | Self::SIGN)
        } else {
            self
        }
    }

    /// Require alignment to the access size.
    pub const fn aligned(self) -> Self {
        Self((self.0 & !Self::ALIGN_MASK) | (self.size() << Self::ALIGN_SHIFT))
    }

    /// Require alignment to `1 << a_bits` bytes.
    pub const fn align_to(self, a_bits: u32) -> Self {
        Self(
            (self.0 & !Self::ALIGN_MASK)
                | ((a_bits & 7) << Self::ALIGN_SHIFT),
        )
    }

    pub const fn bits(self) -> u32 {
        self.0
    }
    pub const fn size(self) -> u32 {
        self.0 & 0x3
    }
    pub const fn is_signed(self) -> bool {
        self.0 & Self::SIGN != 0
    }
    pub const fn is_bswap(self) -> bool {
        self.0 & Self::BSWAP != 0
    }
    pub const fn size_bytes(self) -> u32 {
        1 << self.size()
    }
    /// Required alignment in bytes (1 = unaligned accesses allowed).
    pub const fn align_bytes(self) -> u32 {
        1 << ((self.0 & Self::ALIGN_MASK) >> Self::ALIGN_SHIFT)
    }
    pub const fn atom(self) -> u32 {
        self.0 & Self::ATOM_MASK
    }
    pub const fn ordering(self) -> u32 {
        self.0 & Self::ORD_MASK
    }
    pub const fn is_acquire(self) -> bool {
        self.0 & Self::ORD_ACQUIRE != 0
    }
    pub const fn is_release(self) -> bool {
        self.0 & Self::ORD_RELEASE != 0
    }
    pub const fn is_exclusive(self) -> bool {
        self.0 & Self::EXCL != 0
    }
    pub const fn is_unpriv(self) -> bool {
        self.0 & Self::UNPRIV != 0
    }

    /// Truncate and extend a raw loaded value per size/sign.
    pub const fn extend(self, raw: u64) -> u64 {
        let bits = 8 << self.size();
        if bits == 64 {
            return raw;
        }
        let v = raw & ((1u64 << bits) - 1);
        if self.is_signed() {
            let shift = 64 - bits;
            (((v << shift) as i64) >> shift) as u64
        } else {
            v
        }
    }
}

/// Memory barrier kinds carried by the `mb` op.
///
/// Bits say which earlier/later access pairs must not be reordered
/// across the barrier (QEMU `TCG_MO_*` / `TCG_BAR_*`).
pub mod mb {
    pub const LD_LD: u32 = 0x01;
    pub const ST_LD: u32 = 0x02;
    pub const LD_ST: u32 = 0x04;
    pub const ST_ST: u32 = 0x08;
    pub const ALL: u32 = 0x0f;

    /// Load-acquire style barrier.
    pub const BAR_LDAQ: u32 = 0x10;
    /// Store-release style barrier.
    pub const BAR_STRL: u32 = 0x20;
    /// Sequentially consistent barrier.
    pub const BAR_SC: u32 = 0x30;
}

/// Read-modify-write operation performed by `atomic_rmw`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RmwOp {
    Add = 0,
    /// `old & !val`
    Clr = 1,
    Eor = 2,
    /// `old | val`
    Set = 3,
    Smax = 4,
    Smin = 5,
    Umax = 6,
    Umin = 7,
    Xchg = 8,
}

impl RmwOp {
    pub const fn from_u8(v: u8) -> Option<RmwOp> {
        Some(match v {
            0 => RmwOp::Add,
            1 => RmwOp::Clr,
            2 => RmwOp::Eor,
            3 => RmwOp::Set,
            4 => RmwOp::Smax,
            5 => RmwOp::Smin,
            6 => RmwOp::Umax,
            7 => RmwOp::Umin,
            8 => RmwOp::Xchg,
            _ => return None,
        })
    }

    pub const fn name(self) -> &'static str {
        match self {
            RmwOp::Add => "add",
            RmwOp::Clr => "clr",
            RmwOp::Eor => "eor",
            RmwOp::Set => "set",
            RmwOp::Smax => "smax",
            RmwOp::Smin => "smin",
            RmwOp::Umax => "umax",
            RmwOp::Umin => "umin",
            RmwOp::Xchg => "xchg",
        }
    }

    /// New memory value given the old value and the operand, both
    /// already extended per `memop`.
    pub fn apply(self, memop: MemOp, old: u64, val: u64) -> u64 {
        let sm = MemOp::new(memop.size() | MemOp::SIGN);
        let um = MemOp::sized(memop.size());
        let (so, sv) = (sm.extend(old) as i64, sm.extend(val) as i64);
        let (uo, uv) = (um.extend(old), um.extend(val));
        let r = match self {
            RmwOp::Add => old.wrapping_add(val),
            RmwOp::Clr => old & !val,
            RmwOp::Eor => old ^ val,
            RmwOp::Set => old | val,
            RmwOp::Smax => so.max(sv) as u64,
            RmwOp::Smin => so.min(sv) as u64,
            RmwOp::Umax => uo.max(uv),
            RmwOp::Umin => uo.min(uv),
            RmwOp::Xchg => val,
        };
        um.extend(r)
    }
}
