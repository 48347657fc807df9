//! System registers reachable through MRS/MSR, the SYS maintenance
//! operations, and ESR syndrome encoding for the exceptions the
//! translator raises.

use super::cpu;

// ── Syndromes ────────────────────────────────────────────────────

pub const EC_UNCATEGORIZED: u32 = 0x00;
pub const EC_AA64_SVC: u32 = 0x15;
pub const EC_AA64_HVC: u32 = 0x16;
pub const EC_SYSTEMREGISTERTRAP: u32 = 0x18;
pub const EC_PCALIGNMENT: u32 = 0x22;
pub const EC_AA64_BKPT: u32 = 0x3c;

/// Exception class field position in ESR_ELx.
pub const EC_SHIFT: u32 = 26;
/// Instruction-length bit: set for 32-bit instructions.
pub const IL: u32 = 1 << 25;

pub const fn syn_uncategorized() -> u32 {
    EC_UNCATEGORIZED << EC_SHIFT | IL
}

/// Feature trap: unknown-reason class, ISS names the decoded class.
pub const fn syn_feature_trap(class_id: u16) -> u32 {
    EC_UNCATEGORIZED << EC_SHIFT | class_id as u32
}

pub const fn syn_aa64_svc(imm16: u16) -> u32 {
    EC_AA64_SVC << EC_SHIFT | IL | imm16 as u32
}

pub const fn syn_aa64_bkpt(imm16: u16) -> u32 {
    EC_AA64_BKPT << EC_SHIFT | IL | imm16 as u32
}

pub const fn syn_pcalignment() -> u32 {
    EC_PCALIGNMENT << EC_SHIFT | IL
}

/// Trapped MSR/MRS/MSR-immediate. `read` is the MRS direction.
pub const fn syn_aa64_sysregtrap(enc: SysRegEnc, rt: u8, read: bool) -> u32 {
    EC_SYSTEMREGISTERTRAP << EC_SHIFT
        | IL
        | (enc.op0 as u32) << 20
        | (enc.op2 as u32) << 17
        | (enc.op1 as u32) << 14
        | (enc.crn as u32) << 10
        | (rt as u32) << 5
        | (enc.crm as u32) << 1
        | read as u32
}

// ── Encodings ────────────────────────────────────────────────────

/// `op0:op1:CRn:CRm:op2` of a system instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SysRegEnc {
    pub op0: u8,
    pub op1: u8,
    pub crn: u8,
    pub crm: u8,
    pub op2: u8,
}

impl SysRegEnc {
    pub const fn new(op0: u8, op1: u8, crn: u8, crm: u8, op2: u8) -> Self {
        Self {
            op0,
            op1,
            crn,
            crm,
            op2,
        }
    }

    /// Fields of an MRS/MSR/MSR-immediate word: op0 = bits 20:19,
    /// op1 = 18:16, CRn = 15:12, CRm = 11:8, op2 = 7:5.
    pub const fn from_insn(insn: u32) -> Self {
        Self {
            op0: ((insn >> 19) & 3) as u8,
            op1: ((insn >> 16) & 7) as u8,
            crn: ((insn >> 12) & 0xf) as u8,
            crm: ((insn >> 8) & 0xf) as u8,
            op2: ((insn >> 5) & 7) as u8,
        }
    }
}

// ── Cache and TLB maintenance ────────────────────────────────────

/// log2 of the DC ZVA block size in words, as reported by DCZID_EL0.
pub const DCZID_BS: u32 = 4;
/// Bytes zeroed by one DC ZVA.
pub const ZVA_BLOCK: u64 = 4 << DCZID_BS;

/// SYS (op0 = 1) operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SysOp {
    IcIalluis,
    IcIallu,
    IcIvau,
    DcIvac,
    DcIsw,
    DcCsw,
    DcCisw,
    DcCvac,
    DcCvau,
    DcCivac,
    DcZva,
    /// One of the EL1 TLBI operations; which one does not matter to a
    /// core without a TLB of its own.
    Tlbi,
}

impl SysOp {
    /// Operations EL0 may issue (SCTLR_EL1.UCI and DZE read as set).
    pub const fn el0_allowed(self) -> bool {
        matches!(
            self,
            SysOp::IcIvau
                | SysOp::DcCvac
                | SysOp::DcCvau
                | SysOp::DcCivac
                | SysOp::DcZva
        )
    }

    /// Instruction cache and TLB maintenance end the block so the
    /// next instruction is looked up afresh.
    pub const fn ends_tb(self) -> bool {
        matches!(
            self,
            SysOp::IcIalluis | SysOp::IcIallu | SysOp::IcIvau | SysOp::Tlbi
        )
    }
}

/// `op1, CRn, CRm, op2` of the named SYS operations.
const SYS_OPS: &[(SysOp, [u8; 4])] = &[
    (SysOp::IcIalluis, [0, 7, 1, 0]),
    (SysOp::IcIallu, [0, 7, 5, 0]),
    (SysOp::IcIvau, [3, 7, 5, 1]),
    (SysOp::DcIvac, [0, 7, 6, 1]),
    (SysOp::DcIsw, [0, 7, 6, 2]),
    (SysOp::DcCsw, [0, 7, 10, 2]),
    (SysOp::DcCisw, [0, 7, 14, 2]),
    (SysOp::DcZva, [3, 7, 4, 1]),
    (SysOp::DcCvac, [3, 7, 10, 1]),
    (SysOp::DcCvau, [3, 7, 11, 1]),
    (SysOp::DcCivac, [3, 7, 14, 1]),
];

/// Decode a SYS encoding. TLBI is CRn = 8 at op1 = 0: VMALLE1, VAE1,
/// ASIDE1, VAAE1, VALE1 and VAALE1, inner-shareable (CRm = 3) or not
/// (CRm = 7).
pub fn lookup_sys_op(enc: SysRegEnc) -> Option<SysOp> {
    if enc.op0 != 1 {
        return None;
    }
    let key = [enc.op1, enc.crn, enc.crm, enc.op2];
    if let Some(&(op, _)) = SYS_OPS.iter().find(|(_, k)| *k == key) {
        return Some(op);
    }
    match key {
        [0, 8, 3 | 7, 0 | 1 | 2 | 3 | 5 | 7] => Some(SysOp::Tlbi),
        _ => None,
    }
}

// ── Register table ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SysReg {
    Nzcv,
    Daif,
    Fpcr,
    Fpsr,
    TpidrEl0,
    TpidrroEl0,
    TpidrEl1,
    SctlrEl1,
    VbarEl1,
    ElrEl1,
    SpsrEl1,
    EsrEl1,
    FarEl1,
    SpEl0,
    CurrentEl,
    MidrEl1,
    DczidEl0,
}

/// What EL0 may do with a register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum El0Access {
    None,
    Read,
    ReadWrite,
}

/// Where the register value lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Storage {
    /// Plain 64-bit field of `A64Cpu` at this offset.
    Field(i64),
    /// PSTATE.NZCV, held in the lazy-flag fields.
    Nzcv,
    /// Derived from the block context.
    CurrentEl,
    /// Fixed by the modelled core.
    Const(u64),
}

#[derive(Debug, Clone, Copy)]
pub struct SysRegDesc {
    pub reg: SysReg,
    pub name: &'static str,
    pub enc: SysRegEnc,
    pub el0: El0Access,
    pub read_only: bool,
    /// A write changes decode-time state; the block must end.
    pub ends_tb: bool,
    pub storage: Storage,
}

const fn desc(
    reg: SysReg,
    name: &'static str,
    enc: SysRegEnc,
    el0: El0Access,
    storage: Storage,
) -> SysRegDesc {
    SysRegDesc {
        reg,
        name,
        enc,
        el0,
        read_only: false,
        ends_tb: false,
        storage,
    }
}

const fn ro(d: SysRegDesc) -> SysRegDesc {
    SysRegDesc {
        read_only: true,
        ..d
    }
}

const fn ends_tb(d: SysRegDesc) -> SysRegDesc {
    SysRegDesc { ends_tb: true, ..d }
}

pub const SYSREGS: &[SysRegDesc] = &[
    desc(
        SysReg::Nzcv,
        "NZCV",
        SysRegEnc::new(3, 3, 4, 2, 0),
        El0Access::ReadWrite,
        Storage::Nzcv,
    ),
    ends_tb(desc(
        SysReg::Daif,
        "DAIF",
        SysRegEnc::new(3, 3, 4, 2, 1),
        El0Access::None,
        Storage::Field(cpu::DAIF_OFFSET),
    )),
    desc(
        SysReg::Fpcr,
        "FPCR",
        SysRegEnc::new(3, 3, 4, 4, 0),
        El0Access::ReadWrite,
        Storage::Field(cpu::FPCR_OFFSET),
    ),
    desc(
        SysReg::Fpsr,
        "FPSR",
        SysRegEnc::new(3, 3, 4, 4, 1),
        El0Access::ReadWrite,
        Storage::Field(cpu::FPSR_OFFSET),
    ),
    desc(
        SysReg::TpidrEl0,
        "TPIDR_EL0",
        SysRegEnc::new(3, 3, 13, 0, 2),
        El0Access::ReadWrite,
        Storage::Field(cpu::TPIDR_EL0_OFFSET),
    ),
    desc(
        SysReg::TpidrroEl0,
        "TPIDRRO_EL0",
        SysRegEnc::new(3, 3, 13, 0, 3),
        El0Access::Read,
        Storage::Field(cpu::TPIDRRO_EL0_OFFSET),
    ),
    desc(
        SysReg::TpidrEl1,
        "TPIDR_EL1",
        SysRegEnc::new(3, 0, 13, 0, 4),
        El0Access::None,
        Storage::Field(cpu::TPIDR_EL1_OFFSET),
    ),
    ends_tb(desc(
        SysReg::SctlrEl1,
        "SCTLR_EL1",
        SysRegEnc::new(3, 0, 1, 0, 0),
        El0Access::None,
        Storage::Field(cpu::SCTLR_EL1_OFFSET),
    )),
    desc(
        SysReg::VbarEl1,
        "VBAR_EL1",
        SysRegEnc::new(3, 0, 12, 0, 0),
        El0Access::None,
        Storage::Field(cpu::VBAR_EL1_OFFSET),
    ),
    desc(
        SysReg::ElrEl1,
        "ELR_EL1",
        SysRegEnc::new(3, 0, 4, 0, 1),
        El0Access::None,
        Storage::Field(cpu::ELR_EL1_OFFSET),
    ),
    desc(
        SysReg::SpsrEl1,
        "SPSR_EL1",
        SysRegEnc::new(3, 0, 4, 0, 0),
        El0Access::None,
        Storage::Field(cpu::SPSR_EL1_OFFSET),
    ),
    desc(
        SysReg::EsrEl1,
        "ESR_EL1",
        SysRegEnc::new(3, 0, 5, 2, 0),
        El0Access::None,
        Storage::Field(cpu::ESR_EL1_OFFSET),
    ),
    desc(
        SysReg::FarEl1,
        "FAR_EL1",
        SysRegEnc::new(3, 0, 6, 0, 0),
        El0Access::None,
        Storage::Field(cpu::FAR_EL1_OFFSET),
    ),
    desc(
        SysReg::SpEl0,
        "SP_EL0",
        SysRegEnc::new(3, 0, 4, 1, 0),
        El0Access::None,
        Storage::Field(cpu::SP_EL0_OFFSET),
    ),
    ro(desc(
        SysReg::CurrentEl,
        "CurrentEL",
        SysRegEnc::new(3, 0, 4, 2, 2),
        El0Access::None,
        Storage::CurrentEl,
    )),
    ro(desc(
        SysReg::MidrEl1,
        "MIDR_EL1",
        SysRegEnc::new(3, 0, 0, 0, 0),
        El0Access::None,
        Storage::Field(cpu::MIDR_OFFSET),
    )),
    ro(desc(
        SysReg::DczidEl0,
        "DCZID_EL0",
        SysRegEnc::new(3, 3, 0, 0, 7),
        El0Access::Read,
        Storage::Const(DCZID_BS as u64),
    )),
];

pub fn lookup(enc: SysRegEnc) -> Option<&'static SysRegDesc> {
    SYSREGS.iter().find(|d| d.enc == enc)
}

impl SysReg {
    pub fn desc(self) -> &'static SysRegDesc {
        match SYSREGS.iter().find(|d| d.reg == self) {
            Some(d) => d,
            None => unreachable!("{self:?} missing from SYSREGS"),
        }
    }
}

impl SysRegDesc {
    /// Whether EL0 may perform this access.
    pub const fn el0_allows(&self, read: bool) -> bool {
        match self.el0 {
            El0Access::None => false,
            El0Access::Read => read,
            El0Access::ReadWrite => true,
        }
    }
}
