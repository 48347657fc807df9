use crate::types::Type;

/// Current version of the IR operation set.
///
/// Bumped whenever an opcode is added. Consumers built against an
/// older version check `Opcode::available_in` before accepting a
/// block; the serialized form carries the version in its header.
pub const IR_VERSION: u16 = 2;

/// IR opcodes (type-polymorphic for integer ops).
///
/// Maps to QEMU's `TCGOpcode`. Integer ops (marked with `OpFlags::INT`)
/// work on both I32 and I64; the actual type is carried in
/// `Op::op_type`. New opcodes are only ever appended, so the numeric
/// encoding of existing ones is stable across versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
#[non_exhaustive]
pub enum Opcode {
    // -- Data movement --
    Mov = 0,
    SetCond,
    NegSetCond,
    MovCond,

    // -- Arithmetic --
    Add,
    Sub,
    Mul,
    Neg,
    DivS, // wrapping signed division; divisor must be non-zero
    DivU, // divisor must be non-zero
    MulSH, // signed multiply high
    MulUH, // unsigned multiply high

    // -- Logic --
    And,
    Or,
    Xor,
    Not,
    AndC, // a & ~b
    OrC,  // a | ~b
    Eqv,  // ~(a ^ b)

    // -- Shift/rotate (count taken modulo the width) --
    Shl,
    Shr,
    Sar,
    RotL,
    RotR,

    // -- Bit field --
    Extract,  // unsigned bit-field extract
    SExtract, // signed bit-field extract
    Deposit,  // bit-field deposit
    Extract2, // extract from concatenation of two regs

    // -- Byte swap --
    Bswap16,
    Bswap32,
    Bswap64,

    // -- Bit counting --
    Clz, // count leading zeros, second input when zero
    Ctz,
    CtPop,

    // -- Type conversion --
    ExtI32I64,   // sign-extend i32 -> i64
    ExtUI32I64,  // zero-extend i32 -> i64
    ExtrlI64I32, // truncate i64 -> i32 (low)
    ExtrhI64I32, // extract i64 -> i32 (high)

    // -- CPU state access (env-relative) --
    Ld,
    St,

    // -- Guest memory access --
    QemuLd,
    QemuSt,
    AtomicCmpxchg,  // old = *addr; if old == cmp { *addr = new }
    AtomicCmpxchg2, // 16-byte compare-and-swap on a register pair

    // -- Control flow --
    Br,       // unconditional branch to label
    BrCond,   // conditional branch
    SetLabel, // define label position
    GotoTb,   // direct jump to another TB (linkable)
    ExitTb,   // return from TB to execution loop
    Mb,       // memory barrier

    // -- Call --
    Call,

    // -- Exceptions --
    Raise, // terminal: hand (kind, syndrome, pc) to the dispatcher

    // -- Misc --
    Nop,
    Discard,
    InsnStart, // marks guest instruction boundary

    // -- Version 2 --
    AtomicRmw, // old = *addr; *addr = op(old, val)

    // Sentinel: must be last
    Count,
}

/// Flags describing properties of an opcode.
///
/// Maps to QEMU's `TCG_OPF_*` flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpFlags(u16);

impl OpFlags {
    pub const NONE: OpFlags = OpFlags(0);
    /// Exits the translation block.
    pub const BB_EXIT: OpFlags = OpFlags(0x01);
    /// Ends a basic block (next op starts a new BB).
    pub const BB_END: OpFlags = OpFlags(0x02);
    /// Calls out of generated code (helper or memory subsystem).
    pub const CALL_CLOBBER: OpFlags = OpFlags(0x04);
    /// Has side effects: cannot be eliminated by DCE.
    pub const SIDE_EFFECTS: OpFlags = OpFlags(0x08);
    /// Operands may be I32 or I64 (type-polymorphic).
    pub const INT: OpFlags = OpFlags(0x10);
    /// Not lowered to host code on its own.
    pub const NOT_PRESENT: OpFlags = OpFlags(0x20);
    /// Conditional branch (may or may not be taken).
    pub const COND_BRANCH: OpFlags = OpFlags(0x80);

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub const fn contains(self, other: OpFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: OpFlags) -> Self {
        Self(self.0 | other.0)
    }
}

/// Static definition of an opcode: argument counts, flags and the
/// IR version that introduced it.
///
/// Maps to QEMU's `TCGOpDef`.
#[derive(Debug, Clone, Copy)]
pub struct OpDef {
    pub name: &'static str,
    pub nb_oargs: u8,
    pub nb_iargs: u8,
    pub nb_cargs: u8,
    pub flags: OpFlags,
    pub since: u16,
}

impl OpDef {
    pub const fn nb_args(&self) -> u8 {
        self.nb_oargs + self.nb_iargs + self.nb_cargs
    }
}

// Helper to combine flags in const context.
const fn f(a: OpFlags, b: OpFlags) -> OpFlags {
    OpFlags(a.0 | b.0)
}

const fn def(
    name: &'static str,
    nb_oargs: u8,
    nb_iargs: u8,
    nb_cargs: u8,
    flags: OpFlags,
) -> OpDef {
    OpDef {
        name,
        nb_oargs,
        nb_iargs,
        nb_cargs,
        flags,
        since: 1,
    }
}

const fn def_v(
    name: &'static str,
    nb_oargs: u8,
    nb_iargs: u8,
    nb_cargs: u8,
    flags: OpFlags,
    since: u16,
) -> OpDef {
    OpDef {
        name,
        nb_oargs,
        nb_iargs,
        nb_cargs,
        flags,
        since,
    }
}

const INT: OpFlags = OpFlags::INT;
const NP: OpFlags = OpFlags::NOT_PRESENT;
const SE: OpFlags = OpFlags::SIDE_EFFECTS;
const CC: OpFlags = OpFlags::CALL_CLOBBER;
const BE: OpFlags = OpFlags::BB_END;
const BX: OpFlags = OpFlags::BB_EXIT;
const CB: OpFlags = OpFlags::COND_BRANCH;
const N: OpFlags = OpFlags::NONE;
const MEM: OpFlags = OpFlags(CC.0 | SE.0 | INT.0);

/// Static opcode definition table, indexed by `Opcode as usize`.
pub static OPCODE_DEFS: [OpDef; Opcode::Count as usize] = [
    def("mov", 1, 1, 0, f(INT, NP)),
    def("setcond", 1, 2, 1, INT),
    def("negsetcond", 1, 2, 1, INT),
    def("movcond", 1, 4, 1, INT),
    def("add", 1, 2, 0, INT),
    def("sub", 1, 2, 0, INT),
    def("mul", 1, 2, 0, INT),
    def("neg", 1, 1, 0, INT),
    def("divs", 1, 2, 0, INT),
    def("divu", 1, 2, 0, INT),
    def("mulsh", 1, 2, 0, INT),
    def("muluh", 1, 2, 0, INT),
    def("and", 1, 2, 0, INT),
    def("or", 1, 2, 0, INT),
    def("xor", 1, 2, 0, INT),
    def("not", 1, 1, 0, INT),
    def("andc", 1, 2, 0, INT),
    def("orc", 1, 2, 0, INT),
    def("eqv", 1, 2, 0, INT),
    def("shl", 1, 2, 0, INT),
    def("shr", 1, 2, 0, INT),
    def("sar", 1, 2, 0, INT),
    def("rotl", 1, 2, 0, INT),
    def("rotr", 1, 2, 0, INT),
    def("extract", 1, 1, 2, INT),
    def("sextract", 1, 1, 2, INT),
    def("deposit", 1, 2, 2, INT),
    def("extract2", 1, 2, 1, INT),
    def("bswap16", 1, 1, 1, INT),
    def("bswap32", 1, 1, 1, INT),
    def("bswap64", 1, 1, 1, INT),
    def("clz", 1, 2, 0, INT),
    def("ctz", 1, 2, 0, INT),
    def("ctpop", 1, 1, 0, INT),
    def("ext_i32_i64", 1, 1, 0, N),
    def("extu_i32_i64", 1, 1, 0, N),
    def("extrl_i64_i32", 1, 1, 0, N),
    def("extrh_i64_i32", 1, 1, 0, N),
    def("ld", 1, 1, 1, INT),
    def("st", 0, 2, 1, f(INT, SE)),
    def("qemu_ld", 1, 1, 1, MEM),
    def("qemu_st", 0, 2, 1, MEM),
    def("atomic_cmpxchg", 1, 3, 1, MEM),
    def("atomic_cmpxchg2", 2, 5, 1, MEM),
    def("br", 0, 0, 1, BE),
    def("brcond", 0, 2, 2, f(BE, CB)),
    def("set_label", 0, 0, 1, f(BE, NP)),
    def("goto_tb", 0, 0, 1, OpFlags(BX.0 | BE.0 | NP.0)),
    def("exit_tb", 0, 0, 1, OpFlags(BX.0 | BE.0 | NP.0)),
    def("mb", 0, 0, 1, NP),
    def("call", 1, 6, 2, f(CC, NP)),
    def("raise", 0, 0, 4, OpFlags(BX.0 | BE.0 | SE.0)),
    def("nop", 0, 0, 0, NP),
    def("discard", 0, 1, 0, NP),
    def("insn_start", 0, 0, 2, NP),
    def_v("atomic_rmw", 1, 2, 2, MEM, 2),
];

impl Opcode {
    /// Look up the static definition for this opcode.
    pub fn def(self) -> &'static OpDef {
        &OPCODE_DEFS[self as usize]
    }

    /// Decode a serialized opcode number.
    pub fn from_u8(v: u8) -> Option<Opcode> {
        const ALL: [Opcode; Opcode::Count as usize] = [
            Opcode::Mov,
            Opcode::SetCond,
            Opcode::NegSetCond,
            Opcode::MovCond,
            Opcode::Add,
            Opcode::Sub,
            Opcode::Mul,
            Opcode::Neg,
            Opcode::DivS,
            Opcode::DivU,
            Opcode::MulSH,
            Opcode::MulUH,
            Opcode::And,
            Opcode::Or,
            Opcode::Xor,
            Opcode::Not,
            Opcode::AndC,
            Opcode::OrC,
            Opcode::Eqv,
            Opcode::Shl,
            Opcode::Shr,
            Opcode::Sar,
            Opcode::RotL,
            Opcode::RotR,
            Opcode::Extract,
            Opcode::SExtract,
            Opcode::Deposit,
            Opcode::Extract2,
            Opcode::Bswap16,
            Opcode::Bswap32,
            Opcode::Bswap64,
            Opcode::Clz,
            Opcode::Ctz,
            Opcode::CtPop,
            Opcode::ExtI32I64,
            Opcode::ExtUI32I64,
            Opcode::ExtrlI64I32,
            Opcode::ExtrhI64I32,
            Opcode::Ld,
            Opcode::St,
            Opcode::QemuLd,
            Opcode::QemuSt,
            Opcode::AtomicCmpxchg,
            Opcode::AtomicCmpxchg2,
            Opcode::Br,
            Opcode::BrCond,
            Opcode::SetLabel,
            Opcode::GotoTb,
            Opcode::ExitTb,
            Opcode::Mb,
            Opcode::Call,
            Opcode::Raise,
            Opcode::Nop,
            Opcode::Discard,
            Opcode::InsnStart,
            Opcode::AtomicRmw,
        ];
        ALL.get(v as usize).copied()
    }

    /// Whether a consumer built for IR version `version` knows this op.
    pub fn available_in(self, version: u16) -> bool {
        self.def().since <= version
    }

    /// Return the fixed IR type this opcode operates on, if not
    /// type-polymorphic.
    pub fn fixed_type(self) -> Option<Type> {
        match self {
            Opcode::ExtI32I64 | Opcode::ExtUI32I64 => Some(Type::I64),
            Opcode::ExtrlI64I32 | Opcode::ExtrhI64I32 => Some(Type::I32),
            _ => None,
        }
    }

    /// Whether this opcode is type-polymorphic (works on I32 or I64).
    pub fn is_int_polymorphic(self) -> bool {
        self.def().flags.contains(OpFlags::INT)
    }

    /// Whether this op only annotates the stream (no guest effect).
    pub fn is_marker(self) -> bool {
        matches!(self, Opcode::InsnStart | Opcode::Nop | Opcode::SetLabel)
    }

    /// Whether this op reads or writes guest memory.
    pub fn is_guest_mem(self) -> bool {
        matches!(
            self,
            Opcode::QemuLd
                | Opcode::QemuSt
                | Opcode::AtomicCmpxchg
                | Opcode::AtomicCmpxchg2
                | Opcode::AtomicRmw
        )
    }
}
