//! A64 field extraction.
//!
//! [`decode`] runs the generated matcher (see [`super::table`]); the
//! `trans_*` hook of the matching pattern turns its raw fields into an
//! [`Insn`] and only then checks the feature gate: a word whose fields
//! are reserved is `Unallocated` regardless of the feature set, and a
//! well-formed word of an absent feature is `FeatureAbsent`.
//!
//! Register numbers are raw 5-bit fields; whether 31 means XZR or SP
//! is a property of the shape and is resolved by the translator.

use super::features::A64Features;
use super::insn_decode::{self, *};
use super::sysreg::{self, SysOp, SysReg, SysRegEnc};
use super::table::InsnClass;
use crate::cc::CondCode;
use dbt_core::RmwOp;

/// Expand an `N:immr:imms` bitmask immediate, `None` if reserved.
///
/// Mirrors the architecture's `DecodeBitMasks` for the logical
/// immediates: the element size is the highest set bit of
/// `N:NOT(imms)`, the element is `imms + 1` ones rotated right by
/// `immr`, and it is replicated across 64 bits.
pub fn decode_bit_masks(n: bool, imms: u32, immr: u32) -> Option<u64> {
    let combined = (n as u32) << 6 | (!imms & 0x3f);
    if combined == 0 {
        return None;
    }
    let len = 31 - combined.leading_zeros();
    if len < 1 {
        return None;
    }
    let e = 1u32 << len;
    let levels = e - 1;
    let s = imms & levels;
    let r = immr & levels;
    if s == levels {
        return None;
    }
    let elem_mask = if e == 64 { u64::MAX } else { (1u64 << e) - 1 };
    let ones = (1u64 << (s + 1)) - 1;
    let elem = if r == 0 {
        ones
    } else {
        ((ones >> r) | (ones << (e - r))) & elem_mask
    };
    let mut out = elem;
    let mut width = e;
    while width < 64 {
        out |= out << width;
        width *= 2;
    }
    Some(out)
}

// ── Shapes ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftType {
    Lsl,
    Lsr,
    Asr,
    Ror,
}

impl ShiftType {
    const fn from_bits(v: u32) -> ShiftType {
        match v & 3 {
            0 => ShiftType::Lsl,
            1 => ShiftType::Lsr,
            2 => ShiftType::Asr,
            _ => ShiftType::Ror,
        }
    }
}

/// Register extension of the extended-register and register-offset
/// forms: `option<2>` selects signed, `option<1:0>` the source width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extend {
    pub signed: bool,
    /// log2 of the source width in bytes (0 = byte .. 3 = dword).
    pub size: u8,
}

impl Extend {
    const fn from_option(option: u32) -> Extend {
        Extend {
            signed: option & 4 != 0,
            size: (option & 3) as u8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicOp {
    And,
    Orr,
    Eor,
    /// AND that sets flags.
    Ands,
}

impl LogicOp {
    const fn from_opc(opc: u32) -> LogicOp {
        match opc & 3 {
            0 => LogicOp::And,
            1 => LogicOp::Orr,
            2 => LogicOp::Eor,
            _ => LogicOp::Ands,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MovWideOp {
    Movn,
    Movz,
    Movk,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitfieldOp {
    Sbfm,
    Bfm,
    Ubfm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CselOp {
    Csel,
    Csinc,
    Csinv,
    Csneg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dp1Op {
    Rbit,
    /// Reverse bytes in each halfword.
    Rev16,
    /// Reverse bytes in each word (REV Wd for 32-bit operands).
    Rev32,
    Rev64,
    Clz,
    Cls,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dp2Op {
    Udiv,
    Sdiv,
    Lslv,
    Lsrv,
    Asrv,
    Rorv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dp3Op {
    Madd,
    Msub,
    Smaddl,
    Smsubl,
    Umaddl,
    Umsubl,
    Smulh,
    Umulh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchRegOp {
    Br,
    Blr,
    Ret,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierKind {
    Dsb,
    Dmb,
    Isb,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PstateField {
    SpSel,
    DaifSet,
    DaifClr,
}

/// Addressing of a single-register load or store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrMode {
    /// `[Rn, #imm]`, no writeback.
    Offset(i64),
    /// `[Rn, #imm]!`.
    PreIndex(i64),
    /// `[Rn], #imm`.
    PostIndex(i64),
    /// `[Rn, Rm{, extend {#shift}}]`.
    Reg { rm: u8, ext: Extend, shift: u8 },
}

/// What a single-register load/store does with Rt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LdStOp {
    Store,
    /// Zero-extending load.
    Load,
    /// Sign-extending load into a 64-bit (`to64`) or 32-bit register.
    LoadSigned { to64: bool },
    Prefetch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiteralKind {
    W,
    X,
    Sw,
    Prefetch,
}

/// Decoded instruction shape.
///
/// `size` fields are log2 of the access width in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insn {
    // -- Branches, exceptions, system ----------------------
    B { link: bool, offset: i64 },
    BCond { cond: CondCode, offset: i64 },
    Cbz { sf: bool, nz: bool, rt: u8, offset: i64 },
    Tbz { nz: bool, rt: u8, bit: u8, offset: i64 },
    BranchReg { op: BranchRegOp, rn: u8 },
    Eret,
    Svc { imm: u16 },
    Hvc { imm: u16 },
    Smc { imm: u16 },
    Brk { imm: u16 },
    Hlt { imm: u16 },
    /// `CRm:op2` selector; every value executes as a no-op.
    Hint { op: u8 },
    Clrex,
    Barrier { kind: BarrierKind, crm: u8 },
    MsrImm { field: PstateField, imm: u8, enc: SysRegEnc },
    Cfinv,
    Mrs { reg: SysReg, rt: u8 },
    Msr { reg: SysReg, rt: u8 },
    /// Cache or TLB maintenance; `enc` is kept for the trap syndrome.
    Sys { op: SysOp, enc: SysRegEnc, rt: u8 },

    // -- Data processing, immediate ------------------------
    Adr { page: bool, rd: u8, imm: i64 },
    AddSubImm {
        sf: bool,
        sub: bool,
        set_flags: bool,
        rd: u8,
        rn: u8,
        imm: u64,
    },
    LogicImm { sf: bool, op: LogicOp, rd: u8, rn: u8, imm: u64 },
    MovWide { sf: bool, op: MovWideOp, rd: u8, imm: u16, shift: u8 },
    Bitfield { sf: bool, op: BitfieldOp, rd: u8, rn: u8, immr: u8, imms: u8 },
    Extr { sf: bool, rd: u8, rn: u8, rm: u8, lsb: u8 },

    // -- Data processing, register -------------------------
    LogicReg {
        sf: bool,
        op: LogicOp,
        invert: bool,
        shift: ShiftType,
        amount: u8,
        rd: u8,
        rn: u8,
        rm: u8,
    },
    AddSubReg {
        sf: bool,
        sub: bool,
        set_flags: bool,
        shift: ShiftType,
        amount: u8,
        rd: u8,
        rn: u8,
        rm: u8,
    },
    AddSubExt {
        sf: bool,
        sub: bool,
        set_flags: bool,
        ext: Extend,
        amount: u8,
        rd: u8,
        rn: u8,
        rm: u8,
    },
    AdcSbc { sf: bool, sub: bool, set_flags: bool, rd: u8, rn: u8, rm: u8 },
    Setf { sixteen: bool, rn: u8 },
    CondCompare {
        sf: bool,
        sub: bool,
        cond: CondCode,
        rn: u8,
        /// Register number, or the 5-bit immediate when `imm`.
        rm: u8,
        imm: bool,
        nzcv: u8,
    },
    CondSelect { sf: bool, op: CselOp, cond: CondCode, rd: u8, rn: u8, rm: u8 },
    DataProc1 { sf: bool, op: Dp1Op, rd: u8, rn: u8 },
    DataProc2 { sf: bool, op: Dp2Op, rd: u8, rn: u8, rm: u8 },
    Crc32 { castagnoli: bool, size: u8, rd: u8, rn: u8, rm: u8 },
    DataProc3 { op: Dp3Op, sf: bool, rd: u8, rn: u8, rm: u8, ra: u8 },

    // -- Loads and stores ----------------------------------
    LoadLiteral { kind: LiteralKind, rt: u8, offset: i64 },
    LoadExcl { size: u8, pair: bool, acquire: bool, rt: u8, rt2: u8, rn: u8 },
    StoreExcl {
        size: u8,
        pair: bool,
        release: bool,
        rs: u8,
        rt: u8,
        rt2: u8,
        rn: u8,
    },
    /// LDAR, or LDAPR when `rcpc`.
    LoadAcquire { size: u8, rcpc: bool, rt: u8, rn: u8 },
    StoreRelease { size: u8, rt: u8, rn: u8 },
    LoadStorePair {
        load: bool,
        /// LDPSW.
        signed: bool,
        size: u8,
        mode: AddrMode,
        rt: u8,
        rt2: u8,
        rn: u8,
    },
    LoadStore {
        op: LdStOp,
        size: u8,
        mode: AddrMode,
        /// LDTR/STTR family.
        unpriv: bool,
        rt: u8,
        rn: u8,
    },
    Cas {
        size: u8,
        acquire: bool,
        release: bool,
        rs: u8,
        rt: u8,
        rn: u8,
    },
    AtomicOp {
        size: u8,
        op: RmwOp,
        acquire: bool,
        release: bool,
        rs: u8,
        rt: u8,
        rn: u8,
    },
}

/// Decode outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoded {
    Insn(Insn),
    Unallocated,
    /// Well-formed word of an extension the core lacks.
    FeatureAbsent {
        class: InsnClass,
        feature: A64Features,
    },
}

/// Decode one instruction word under `features`.
///
/// Total and pure: every word maps to exactly one outcome.
pub fn decode(insn: u32, features: A64Features) -> Decoded {
    let mut out = Decoded::Unallocated;
    if insn_decode::decode(&mut Extractor { features }, &mut out, insn) {
        out
    } else {
        Decoded::Unallocated
    }
}

// ── Pattern hooks ────────────────────────────────────────────────
//
// Each hook returns `false` for reserved field values, which leaves
// the word unallocated.

struct Extractor {
    features: A64Features,
}

fn accept(out: &mut Decoded, insn: Insn) -> bool {
    *out = Decoded::Insn(insn);
    true
}

impl Extractor {
    fn gated(
        &self,
        out: &mut Decoded,
        class: InsnClass,
        feature: A64Features,
        insn: Insn,
    ) -> bool {
        *out = if self.features.contains(feature) {
            Decoded::Insn(insn)
        } else {
            Decoded::FeatureAbsent { class, feature }
        };
        true
    }
}

const fn width(sf: bool) -> i64 {
    if sf {
        64
    } else {
        32
    }
}

fn msr_imm(out: &mut Decoded, a: &ArgsMsrImm, field: PstateField) -> bool {
    let (op1, op2) = match field {
        PstateField::SpSel => (0, 5),
        PstateField::DaifSet => (3, 6),
        PstateField::DaifClr => (3, 7),
    };
    let imm = a.imm as u8;
    let enc = SysRegEnc::new(0, op1, 4, imm, op2);
    accept(out, Insn::MsrImm { field, imm, enc })
}

/// MRS/MSR operand: op0 is `2 + o0`.
fn sysreg_operand(a: &ArgsSysreg) -> Option<(SysReg, u8)> {
    let enc = SysRegEnc::new(
        2 + a.o0 as u8,
        a.op1 as u8,
        a.crn as u8,
        a.crm as u8,
        a.op2 as u8,
    );
    Some((sysreg::lookup(enc)?.reg, a.rt as u8))
}

fn movw(out: &mut Decoded, a: &ArgsMovw, op: MovWideOp) -> bool {
    let sf = a.sf != 0;
    if !sf && a.hw >= 2 {
        return false;
    }
    accept(
        out,
        Insn::MovWide {
            sf,
            op,
            rd: a.rd as u8,
            imm: a.imm as u16,
            shift: (a.hw * 16) as u8,
        },
    )
}

/// N must equal sf, immr and imms stay below the register width.
fn bitfield(out: &mut Decoded, a: &ArgsBitfield, op: BitfieldOp) -> bool {
    let sf = a.sf != 0;
    if a.n != a.sf || a.immr >= width(sf) || a.imms >= width(sf) {
        return false;
    }
    accept(
        out,
        Insn::Bitfield {
            sf,
            op,
            rd: a.rd as u8,
            rn: a.rn as u8,
            immr: a.immr as u8,
            imms: a.imms as u8,
        },
    )
}

fn dp1(out: &mut Decoded, a: &ArgsRrSf, op: Dp1Op) -> bool {
    accept(
        out,
        Insn::DataProc1 {
            sf: a.sf != 0,
            op,
            rd: a.rd as u8,
            rn: a.rn as u8,
        },
    )
}

fn dp2(out: &mut Decoded, a: &ArgsRrrSf, op: Dp2Op) -> bool {
    accept(
        out,
        Insn::DataProc2 {
            sf: a.sf != 0,
            op,
            rd: a.rd as u8,
            rn: a.rn as u8,
            rm: a.rm as u8,
        },
    )
}

fn dp3(out: &mut Decoded, a: &ArgsRrrr, op: Dp3Op) -> bool {
    accept(
        out,
        Insn::DataProc3 {
            op,
            sf: a.sf != 0,
            rd: a.rd as u8,
            rn: a.rn as u8,
            rm: a.rm as u8,
            ra: a.ra as u8,
        },
    )
}

fn load_excl(a: &ArgsExcl, pair: bool) -> Insn {
    Insn::LoadExcl {
        size: a.size as u8,
        pair,
        acquire: a.o0 != 0,
        rt: a.rt as u8,
        rt2: a.rt2 as u8,
        rn: a.rn as u8,
    }
}

fn store_excl(a: &ArgsExcl, pair: bool) -> Insn {
    Insn::StoreExcl {
        size: a.size as u8,
        pair,
        release: a.o0 != 0,
        rs: a.rs as u8,
        rt: a.rt as u8,
        rt2: a.rt2 as u8,
        rn: a.rn as u8,
    }
}

impl Extractor {
    fn atomic(&self, out: &mut Decoded, a: &ArgsAtomic, op: RmwOp) -> bool {
        let insn = Insn::AtomicOp {
            size: a.size as u8,
            op,
            acquire: a.acq != 0,
            release: a.rel != 0,
            rs: a.rs as u8,
            rt: a.rt as u8,
            rn: a.rn as u8,
        };
        self.gated(out, InsnClass::AtomicMemOp, A64Features::LSE, insn)
    }
}

/// What opc does at this size; PRFM has no writeback or
/// unprivileged form.
fn ldst_op(opc: i64, size: u8, mode: AddrMode, unpriv: bool) -> Option<LdStOp> {
    Some(match (opc, size) {
        (0, _) => LdStOp::Store,
        (1, _) => LdStOp::Load,
        (2, 3) => {
            let plain =
                matches!(mode, AddrMode::Offset(_) | AddrMode::Reg { .. });
            if unpriv || !plain {
                return None;
            }
            LdStOp::Prefetch
        }
        (2, _) => LdStOp::LoadSigned { to64: true },
        (3, 0 | 1) => LdStOp::LoadSigned { to64: false },
        _ => return None,
    })
}

fn load_store(
    out: &mut Decoded,
    a: &ArgsLdstImm,
    mode: AddrMode,
    unpriv: bool,
) -> bool {
    let size = a.size as u8;
    let Some(op) = ldst_op(a.opc, size, mode, unpriv) else {
        return false;
    };
    accept(
        out,
        Insn::LoadStore {
            op,
            size,
            mode,
            unpriv,
            rt: a.rt as u8,
            rn: a.rn as u8,
        },
    )
}

impl Decode<Decoded> for Extractor {
    // -- Branches, exceptions, system ----------------------

    fn trans_b(&mut self, out: &mut Decoded, a: &ArgsAutoB) -> bool {
        accept(
            out,
            Insn::B {
                link: a.link != 0,
                offset: a.offset,
            },
        )
    }

    fn trans_cbz(&mut self, out: &mut Decoded, a: &ArgsAutoCbz) -> bool {
        accept(
            out,
            Insn::Cbz {
                sf: a.sf != 0,
                nz: a.nz != 0,
                rt: a.rt as u8,
                offset: a.offset,
            },
        )
    }

    fn trans_tbz(&mut self, out: &mut Decoded, a: &ArgsAutoTbz) -> bool {
        accept(
            out,
            Insn::Tbz {
                nz: a.nz != 0,
                rt: a.rt as u8,
                bit: a.bit as u8,
                offset: a.offset,
            },
        )
    }

    fn trans_b_cond(&mut self, out: &mut Decoded, a: &ArgsAutoBCond) -> bool {
        accept(
            out,
            Insn::BCond {
                cond: CondCode::from_bits(a.cond as u32),
                offset: a.offset,
            },
        )
    }

    fn trans_svc(&mut self, out: &mut Decoded, a: &ArgsI) -> bool {
        accept(out, Insn::Svc { imm: a.imm as u16 })
    }

    fn trans_hvc(&mut self, out: &mut Decoded, a: &ArgsI) -> bool {
        accept(out, Insn::Hvc { imm: a.imm as u16 })
    }

    fn trans_smc(&mut self, out: &mut Decoded, a: &ArgsI) -> bool {
        accept(out, Insn::Smc { imm: a.imm as u16 })
    }

    fn trans_brk(&mut self, out: &mut Decoded, a: &ArgsI) -> bool {
        accept(out, Insn::Brk { imm: a.imm as u16 })
    }

    fn trans_hlt(&mut self, out: &mut Decoded, a: &ArgsI) -> bool {
        accept(out, Insn::Hlt { imm: a.imm as u16 })
    }

    fn trans_hint(&mut self, out: &mut Decoded, a: &ArgsAutoHint) -> bool {
        accept(out, Insn::Hint { op: a.op as u8 })
    }

    fn trans_clrex(&mut self, out: &mut Decoded, _a: &ArgsEmpty) -> bool {
        accept(out, Insn::Clrex)
    }

    fn trans_dsb(&mut self, out: &mut Decoded, a: &ArgsBarrier) -> bool {
        let crm = a.crm as u8;
        accept(out, Insn::Barrier { kind: BarrierKind::Dsb, crm })
    }

    fn trans_dmb(&mut self, out: &mut Decoded, a: &ArgsBarrier) -> bool {
        let crm = a.crm as u8;
        accept(out, Insn::Barrier { kind: BarrierKind::Dmb, crm })
    }

    fn trans_isb(&mut self, out: &mut Decoded, a: &ArgsBarrier) -> bool {
        let crm = a.crm as u8;
        accept(out, Insn::Barrier { kind: BarrierKind::Isb, crm })
    }

    fn trans_cfinv(&mut self, out: &mut Decoded, _a: &ArgsEmpty) -> bool {
        self.gated(out, InsnClass::Cfinv, A64Features::FLAGM, Insn::Cfinv)
    }

    fn trans_msr_spsel(&mut self, out: &mut Decoded, a: &ArgsMsrImm) -> bool {
        msr_imm(out, a, PstateField::SpSel)
    }

    fn trans_msr_daifset(
        &mut self,
        out: &mut Decoded,
        a: &ArgsMsrImm,
    ) -> bool {
        msr_imm(out, a, PstateField::DaifSet)
    }

    fn trans_msr_daifclr(
        &mut self,
        out: &mut Decoded,
        a: &ArgsMsrImm,
    ) -> bool {
        msr_imm(out, a, PstateField::DaifClr)
    }

    /// Only the named maintenance operations are allocated; AT and
    /// the rest of the op0 = 1 space stay unallocated.
    fn trans_sys(&mut self, out: &mut Decoded, a: &ArgsAutoSys) -> bool {
        let enc = SysRegEnc::new(
            1,
            a.op1 as u8,
            a.crn as u8,
            a.crm as u8,
            a.op2 as u8,
        );
        let Some(op) = sysreg::lookup_sys_op(enc) else {
            return false;
        };
        accept(out, Insn::Sys { op, enc, rt: a.rt as u8 })
    }

    fn trans_msr_reg(&mut self, out: &mut Decoded, a: &ArgsSysreg) -> bool {
        match sysreg_operand(a) {
            Some((reg, rt)) => accept(out, Insn::Msr { reg, rt }),
            None => false,
        }
    }

    fn trans_mrs(&mut self, out: &mut Decoded, a: &ArgsSysreg) -> bool {
        match sysreg_operand(a) {
            Some((reg, rt)) => accept(out, Insn::Mrs { reg, rt }),
            None => false,
        }
    }

    fn trans_br(&mut self, out: &mut Decoded, a: &ArgsR) -> bool {
        let rn = a.rn as u8;
        accept(out, Insn::BranchReg { op: BranchRegOp::Br, rn })
    }

    fn trans_blr(&mut self, out: &mut Decoded, a: &ArgsR) -> bool {
        let rn = a.rn as u8;
        accept(out, Insn::BranchReg { op: BranchRegOp::Blr, rn })
    }

    fn trans_ret(&mut self, out: &mut Decoded, a: &ArgsR) -> bool {
        let rn = a.rn as u8;
        accept(out, Insn::BranchReg { op: BranchRegOp::Ret, rn })
    }

    fn trans_eret(&mut self, out: &mut Decoded, _a: &ArgsEmpty) -> bool {
        accept(out, Insn::Eret)
    }

    // -- Data processing, immediate ------------------------

    fn trans_adr(&mut self, out: &mut Decoded, a: &ArgsAutoAdr) -> bool {
        accept(
            out,
            Insn::Adr {
                page: a.page != 0,
                rd: a.rd as u8,
                imm: a.imm,
            },
        )
    }

    fn trans_addsub_imm(
        &mut self,
        out: &mut Decoded,
        a: &ArgsAutoAddsubImm,
    ) -> bool {
        accept(
            out,
            Insn::AddSubImm {
                sf: a.sf != 0,
                sub: a.sub != 0,
                set_flags: a.s != 0,
                rd: a.rd as u8,
                rn: a.rn as u8,
                imm: (a.imm as u64) << (12 * a.sh),
            },
        )
    }

    fn trans_logic_imm(
        &mut self,
        out: &mut Decoded,
        a: &ArgsAutoLogicImm,
    ) -> bool {
        let sf = a.sf != 0;
        let n = a.n != 0;
        if !sf && n {
            return false;
        }
        let Some(mut imm) = decode_bit_masks(n, a.imms as u32, a.immr as u32)
        else {
            return false;
        };
        if !sf {
            imm &= 0xffff_ffff;
        }
        accept(
            out,
            Insn::LogicImm {
                sf,
                op: LogicOp::from_opc(a.opc as u32),
                rd: a.rd as u8,
                rn: a.rn as u8,
                imm,
            },
        )
    }

    fn trans_movn(&mut self, out: &mut Decoded, a: &ArgsMovw) -> bool {
        movw(out, a, MovWideOp::Movn)
    }

    fn trans_movz(&mut self, out: &mut Decoded, a: &ArgsMovw) -> bool {
        movw(out, a, MovWideOp::Movz)
    }

    fn trans_movk(&mut self, out: &mut Decoded, a: &ArgsMovw) -> bool {
        movw(out, a, MovWideOp::Movk)
    }

    fn trans_sbfm(&mut self, out: &mut Decoded, a: &ArgsBitfield) -> bool {
        bitfield(out, a, BitfieldOp::Sbfm)
    }

    fn trans_bfm(&mut self, out: &mut Decoded, a: &ArgsBitfield) -> bool {
        bitfield(out, a, BitfieldOp::Bfm)
    }

    fn trans_ubfm(&mut self, out: &mut Decoded, a: &ArgsBitfield) -> bool {
        bitfield(out, a, BitfieldOp::Ubfm)
    }

    fn trans_extr(&mut self, out: &mut Decoded, a: &ArgsAutoExtr) -> bool {
        let sf = a.sf != 0;
        if a.n != a.sf || a.imms >= width(sf) {
            return false;
        }
        accept(
            out,
            Insn::Extr {
                sf,
                rd: a.rd as u8,
                rn: a.rn as u8,
                rm: a.rm as u8,
                lsb: a.imms as u8,
            },
        )
    }

    // -- Data processing, register -------------------------

    fn trans_logic_reg(
        &mut self,
        out: &mut Decoded,
        a: &ArgsAutoLogicReg,
    ) -> bool {
        let sf = a.sf != 0;
        if !sf && a.imm6 >= 32 {
            return false;
        }
        accept(
            out,
            Insn::LogicReg {
                sf,
                op: LogicOp::from_opc(a.opc as u32),
                invert: a.n != 0,
                shift: ShiftType::from_bits(a.shift as u32),
                amount: a.imm6 as u8,
                rd: a.rd as u8,
                rn: a.rn as u8,
                rm: a.rm as u8,
            },
        )
    }

    /// ROR is reserved.
    fn trans_addsub_shift(
        &mut self,
        out: &mut Decoded,
        a: &ArgsAutoAddsubShift,
    ) -> bool {
        let sf = a.sf != 0;
        if a.shift == 3 || (!sf && a.imm6 >= 32) {
            return false;
        }
        accept(
            out,
            Insn::AddSubReg {
                sf,
                sub: a.sub != 0,
                set_flags: a.s != 0,
                shift: ShiftType::from_bits(a.shift as u32),
                amount: a.imm6 as u8,
                rd: a.rd as u8,
                rn: a.rn as u8,
                rm: a.rm as u8,
            },
        )
    }

    fn trans_addsub_ext(
        &mut self,
        out: &mut Decoded,
        a: &ArgsAutoAddsubExt,
    ) -> bool {
        if a.imm3 > 4 {
            return false;
        }
        accept(
            out,
            Insn::AddSubExt {
                sf: a.sf != 0,
                sub: a.sub != 0,
                set_flags: a.s != 0,
                ext: Extend::from_option(a.option as u32),
                amount: a.imm3 as u8,
                rd: a.rd as u8,
                rn: a.rn as u8,
                rm: a.rm as u8,
            },
        )
    }

    fn trans_setf(&mut self, out: &mut Decoded, a: &ArgsAutoSetf) -> bool {
        let insn = Insn::Setf {
            sixteen: a.sixteen != 0,
            rn: a.rn as u8,
        };
        self.gated(out, InsnClass::Setf, A64Features::FLAGM, insn)
    }

    fn trans_adc_sbc(&mut self, out: &mut Decoded, a: &ArgsAutoAdcSbc) -> bool {
        accept(
            out,
            Insn::AdcSbc {
                sf: a.sf != 0,
                sub: a.sub != 0,
                set_flags: a.s != 0,
                rd: a.rd as u8,
                rn: a.rn as u8,
                rm: a.rm as u8,
            },
        )
    }

    fn trans_ccmp(&mut self, out: &mut Decoded, a: &ArgsAutoCcmp) -> bool {
        accept(
            out,
            Insn::CondCompare {
                sf: a.sf != 0,
                sub: a.sub != 0,
                cond: CondCode::from_bits(a.cond as u32),
                rn: a.rn as u8,
                rm: a.rm as u8,
                imm: a.imm != 0,
                nzcv: a.nzcv as u8,
            },
        )
    }

    fn trans_csel(&mut self, out: &mut Decoded, a: &ArgsAutoCsel) -> bool {
        let op = match (a.inv != 0, a.inc != 0) {
            (false, false) => CselOp::Csel,
            (false, true) => CselOp::Csinc,
            (true, false) => CselOp::Csinv,
            (true, true) => CselOp::Csneg,
        };
        accept(
            out,
            Insn::CondSelect {
                sf: a.sf != 0,
                op,
                cond: CondCode::from_bits(a.cond as u32),
                rd: a.rd as u8,
                rn: a.rn as u8,
                rm: a.rm as u8,
            },
        )
    }

    /// CRC32X/CX only with sf, the rest only without.
    fn trans_crc32(&mut self, out: &mut Decoded, a: &ArgsAutoCrc32) -> bool {
        if (a.sf != 0) != (a.sz == 3) {
            return false;
        }
        let insn = Insn::Crc32 {
            castagnoli: a.c != 0,
            size: a.sz as u8,
            rd: a.rd as u8,
            rn: a.rn as u8,
            rm: a.rm as u8,
        };
        self.gated(out, InsnClass::Crc32, A64Features::CRC32, insn)
    }

    fn trans_udiv(&mut self, out: &mut Decoded, a: &ArgsRrrSf) -> bool {
        dp2(out, a, Dp2Op::Udiv)
    }

    fn trans_sdiv(&mut self, out: &mut Decoded, a: &ArgsRrrSf) -> bool {
        dp2(out, a, Dp2Op::Sdiv)
    }

    fn trans_lslv(&mut self, out: &mut Decoded, a: &ArgsRrrSf) -> bool {
        dp2(out, a, Dp2Op::Lslv)
    }

    fn trans_lsrv(&mut self, out: &mut Decoded, a: &ArgsRrrSf) -> bool {
        dp2(out, a, Dp2Op::Lsrv)
    }

    fn trans_asrv(&mut self, out: &mut Decoded, a: &ArgsRrrSf) -> bool {
        dp2(out, a, Dp2Op::Asrv)
    }

    fn trans_rorv(&mut self, out: &mut Decoded, a: &ArgsRrrSf) -> bool {
        dp2(out, a, Dp2Op::Rorv)
    }

    fn trans_rbit(&mut self, out: &mut Decoded, a: &ArgsRrSf) -> bool {
        dp1(out, a, Dp1Op::Rbit)
    }

    fn trans_rev16(&mut self, out: &mut Decoded, a: &ArgsRrSf) -> bool {
        dp1(out, a, Dp1Op::Rev16)
    }

    fn trans_rev32(&mut self, out: &mut Decoded, a: &ArgsRrSf) -> bool {
        dp1(out, a, Dp1Op::Rev32)
    }

    fn trans_rev64(&mut self, out: &mut Decoded, a: &ArgsRrSf) -> bool {
        dp1(out, a, Dp1Op::Rev64)
    }

    fn trans_clz(&mut self, out: &mut Decoded, a: &ArgsRrSf) -> bool {
        dp1(out, a, Dp1Op::Clz)
    }

    fn trans_cls(&mut self, out: &mut Decoded, a: &ArgsRrSf) -> bool {
        dp1(out, a, Dp1Op::Cls)
    }

    fn trans_madd(&mut self, out: &mut Decoded, a: &ArgsRrrr) -> bool {
        dp3(out, a, Dp3Op::Madd)
    }

    fn trans_msub(&mut self, out: &mut Decoded, a: &ArgsRrrr) -> bool {
        dp3(out, a, Dp3Op::Msub)
    }

    fn trans_smaddl(&mut self, out: &mut Decoded, a: &ArgsRrrr) -> bool {
        dp3(out, a, Dp3Op::Smaddl)
    }

    fn trans_smsubl(&mut self, out: &mut Decoded, a: &ArgsRrrr) -> bool {
        dp3(out, a, Dp3Op::Smsubl)
    }

    fn trans_smulh(&mut self, out: &mut Decoded, a: &ArgsRrrr) -> bool {
        dp3(out, a, Dp3Op::Smulh)
    }

    fn trans_umaddl(&mut self, out: &mut Decoded, a: &ArgsRrrr) -> bool {
        dp3(out, a, Dp3Op::Umaddl)
    }

    fn trans_umsubl(&mut self, out: &mut Decoded, a: &ArgsRrrr) -> bool {
        dp3(out, a, Dp3Op::Umsubl)
    }

    fn trans_umulh(&mut self, out: &mut Decoded, a: &ArgsRrrr) -> bool {
        dp3(out, a, Dp3Op::Umulh)
    }

    // -- Loads and stores ----------------------------------

    fn trans_cas(&mut self, out: &mut Decoded, a: &ArgsAutoCas) -> bool {
        let insn = Insn::Cas {
            size: a.size as u8,
            acquire: a.acq != 0,
            release: a.rel != 0,
            rs: a.rs as u8,
            rt: a.rt as u8,
            rn: a.rn as u8,
        };
        self.gated(out, InsnClass::Cas, A64Features::LSE, insn)
    }

    fn trans_stxr(&mut self, out: &mut Decoded, a: &ArgsExcl) -> bool {
        accept(out, store_excl(a, false))
    }

    fn trans_ldxr(&mut self, out: &mut Decoded, a: &ArgsExcl) -> bool {
        accept(out, load_excl(a, false))
    }

    fn trans_stxp(&mut self, out: &mut Decoded, a: &ArgsExcl) -> bool {
        accept(out, store_excl(a, true))
    }

    fn trans_ldxp(&mut self, out: &mut Decoded, a: &ArgsExcl) -> bool {
        accept(out, load_excl(a, true))
    }

    fn trans_stlr(&mut self, out: &mut Decoded, a: &ArgsExcl) -> bool {
        accept(
            out,
            Insn::StoreRelease {
                size: a.size as u8,
                rt: a.rt as u8,
                rn: a.rn as u8,
            },
        )
    }

    fn trans_ldar(&mut self, out: &mut Decoded, a: &ArgsExcl) -> bool {
        accept(
            out,
            Insn::LoadAcquire {
                size: a.size as u8,
                rcpc: false,
                rt: a.rt as u8,
                rn: a.rn as u8,
            },
        )
    }

    fn trans_ldr_lit(&mut self, out: &mut Decoded, a: &ArgsAutoLdrLit) -> bool {
        let kind = match a.opc {
            0 => LiteralKind::W,
            1 => LiteralKind::X,
            2 => LiteralKind::Sw,
            _ => LiteralKind::Prefetch,
        };
        accept(
            out,
            Insn::LoadLiteral {
                kind,
                rt: a.rt as u8,
                offset: a.offset,
            },
        )
    }

    /// imm7 is scaled by the access size. Loads into the same register
    /// twice, or into a writeback base, are constrained unpredictable
    /// and rejected.
    fn trans_ldst_pair(
        &mut self,
        out: &mut Decoded,
        a: &ArgsAutoLdstPair,
    ) -> bool {
        let load = a.load != 0;
        let (size, signed) = match a.opc {
            0 => (2u8, false),
            1 if load => (2, true),
            2 => (3, false),
            _ => return false,
        };
        if signed && a.index == 0 {
            return false;
        }
        let offset = a.imm << size;
        let mode = match a.index {
            0 | 2 => AddrMode::Offset(offset),
            1 => AddrMode::PostIndex(offset),
            _ => AddrMode::PreIndex(offset),
        };
        let (rt, rt2, rn) = (a.rt as u8, a.rt2 as u8, a.rn as u8);
        if load {
            if rt == rt2 {
                return false;
            }
            let writeback = !matches!(mode, AddrMode::Offset(_));
            if writeback && rn != 31 && (rn == rt || rn == rt2) {
                return false;
            }
        }
        accept(
            out,
            Insn::LoadStorePair {
                load,
                signed,
                size,
                mode,
                rt,
                rt2,
                rn,
            },
        )
    }

    fn trans_ldapr(&mut self, out: &mut Decoded, a: &ArgsAutoLdapr) -> bool {
        let insn = Insn::LoadAcquire {
            size: a.size as u8,
            rcpc: true,
            rt: a.rt as u8,
            rn: a.rn as u8,
        };
        self.gated(out, InsnClass::Ldapr, A64Features::RCPC, insn)
    }

    fn trans_ldadd(&mut self, out: &mut Decoded, a: &ArgsAtomic) -> bool {
        self.atomic(out, a, RmwOp::Add)
    }

    fn trans_ldclr(&mut self, out: &mut Decoded, a: &ArgsAtomic) -> bool {
        self.atomic(out, a, RmwOp::Clr)
    }

    fn trans_ldeor(&mut self, out: &mut Decoded, a: &ArgsAtomic) -> bool {
        self.atomic(out, a, RmwOp::Eor)
    }

    fn trans_ldset(&mut self, out: &mut Decoded, a: &ArgsAtomic) -> bool {
        self.atomic(out, a, RmwOp::Set)
    }

    fn trans_ldsmax(&mut self, out: &mut Decoded, a: &ArgsAtomic) -> bool {
        self.atomic(out, a, RmwOp::Smax)
    }

    fn trans_ldsmin(&mut self, out: &mut Decoded, a: &ArgsAtomic) -> bool {
        self.atomic(out, a, RmwOp::Smin)
    }

    fn trans_ldumax(&mut self, out: &mut Decoded, a: &ArgsAtomic) -> bool {
        self.atomic(out, a, RmwOp::Umax)
    }

    fn trans_ldumin(&mut self, out: &mut Decoded, a: &ArgsAtomic) -> bool {
        self.atomic(out, a, RmwOp::Umin)
    }

    fn trans_swp(&mut self, out: &mut Decoded, a: &ArgsAtomic) -> bool {
        self.atomic(out, a, RmwOp::Xchg)
    }

    /// Only UXTW, LSL (UXTX), SXTW and SXTX are allocated.
    fn trans_ldst_regoff(
        &mut self,
        out: &mut Decoded,
        a: &ArgsAutoLdstRegoff,
    ) -> bool {
        if a.option & 2 == 0 {
            return false;
        }
        let size = a.size as u8;
        let mode = AddrMode::Reg {
            rm: a.rm as u8,
            ext: Extend::from_option(a.option as u32),
            shift: if a.s != 0 { size } else { 0 },
        };
        let Some(op) = ldst_op(a.opc, size, mode, false) else {
            return false;
        };
        accept(
            out,
            Insn::LoadStore {
                op,
                size,
                mode,
                unpriv: false,
                rt: a.rt as u8,
                rn: a.rn as u8,
            },
        )
    }

    fn trans_ldst_unscaled(
        &mut self,
        out: &mut Decoded,
        a: &ArgsLdstImm,
    ) -> bool {
        load_store(out, a, AddrMode::Offset(a.imm), false)
    }

    fn trans_ldst_post(&mut self, out: &mut Decoded, a: &ArgsLdstImm) -> bool {
        load_store(out, a, AddrMode::PostIndex(a.imm), false)
    }

    fn trans_ldst_unpriv(
        &mut self,
        out: &mut Decoded,
        a: &ArgsLdstImm,
    ) -> bool {
        load_store(out, a, AddrMode::Offset(a.imm), true)
    }

    fn trans_ldst_pre(&mut self, out: &mut Decoded, a: &ArgsLdstImm) -> bool {
        load_store(out, a, AddrMode::PreIndex(a.imm), false)
    }

    fn trans_ldst_uimm(&mut self, out: &mut Decoded, a: &ArgsLdstImm) -> bool {
        load_store(out, a, AddrMode::Offset(a.imm << a.size), false)
    }
}
