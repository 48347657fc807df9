//! Frontend tests: encode real A64 instructions, translate them and
//! run the IR through the reference interpreter, then check the CPU
//! and memory state.

mod decode;

use std::sync::Arc;

use dbt_core::ExceptionKind;
use dbt_exec::{cpu_exec_loop, ExecEnv, ExitReason, TbStore};
use dbt_frontend::aarch64::cpu::{A64Cpu, SCTLR_A};
use dbt_frontend::aarch64::features::A64Cfg;
use dbt_frontend::aarch64::sysreg;
use dbt_frontend::aarch64::table::InsnClass;
use dbt_frontend::{Fault, TbLimits};
use crate::interp::{FlatMemory, Interp};

// ── Instruction encoders ──────────────────────────────────────

const fn imm19(off: i64) -> u32 {
    ((off >> 2) as u32 & 0x7ffff) << 5
}

fn movz(rd: u32, imm: u32, hw: u32) -> u32 {
    0xd280_0000 | hw << 21 | imm << 5 | rd
}
fn movk(rd: u32, imm: u32, hw: u32) -> u32 {
    0xf280_0000 | hw << 21 | imm << 5 | rd
}
fn movn(rd: u32, imm: u32, hw: u32) -> u32 {
    0x9280_0000 | hw << 21 | imm << 5 | rd
}
fn movz_w(rd: u32, imm: u32) -> u32 {
    0x5280_0000 | imm << 5 | rd
}
fn movn_w(rd: u32, imm: u32) -> u32 {
    0x1280_0000 | imm << 5 | rd
}

fn add_imm(rd: u32, rn: u32, imm: u32) -> u32 {
    0x9100_0000 | imm << 10 | rn << 5 | rd
}
fn add_w_imm(rd: u32, rn: u32, imm: u32) -> u32 {
    0x1100_0000 | imm << 10 | rn << 5 | rd
}
fn sub_imm(rd: u32, rn: u32, imm: u32) -> u32 {
    0xd100_0000 | imm << 10 | rn << 5 | rd
}
fn subs_imm(rd: u32, rn: u32, imm: u32) -> u32 {
    0xf100_0000 | imm << 10 | rn << 5 | rd
}
fn cmp_imm(rn: u32, imm: u32) -> u32 {
    subs_imm(31, rn, imm)
}

fn rrr(base: u32, rd: u32, rn: u32, rm: u32) -> u32 {
    base | rm << 16 | rn << 5 | rd
}
fn add_reg(rd: u32, rn: u32, rm: u32) -> u32 {
    rrr(0x8b00_0000, rd, rn, rm)
}
/// `add xd, xn, xm, <shift> #amount`; shift 0 = LSL, 1 = LSR, 2 = ASR.
fn add_shifted(rd: u32, rn: u32, rm: u32, shift: u32, amount: u32) -> u32 {
    add_reg(rd, rn, rm) | shift << 22 | amount << 10
}
fn adds_reg(rd: u32, rn: u32, rm: u32) -> u32 {
    rrr(0xab00_0000, rd, rn, rm)
}
fn adds_w_reg(rd: u32, rn: u32, rm: u32) -> u32 {
    rrr(0x2b00_0000, rd, rn, rm)
}
fn subs_reg(rd: u32, rn: u32, rm: u32) -> u32 {
    rrr(0xeb00_0000, rd, rn, rm)
}
fn subs_w_reg(rd: u32, rn: u32, rm: u32) -> u32 {
    rrr(0x6b00_0000, rd, rn, rm)
}
fn cmp_reg(rn: u32, rm: u32) -> u32 {
    subs_reg(31, rn, rm)
}
fn adc(rd: u32, rn: u32, rm: u32) -> u32 {
    rrr(0x9a00_0000, rd, rn, rm)
}
fn adcs(rd: u32, rn: u32, rm: u32) -> u32 {
    rrr(0xba00_0000, rd, rn, rm)
}
fn sbc(rd: u32, rn: u32, rm: u32) -> u32 {
    rrr(0xda00_0000, rd, rn, rm)
}
fn and_reg(rd: u32, rn: u32, rm: u32) -> u32 {
    rrr(0x8a00_0000, rd, rn, rm)
}
fn ands_reg(rd: u32, rn: u32, rm: u32) -> u32 {
    rrr(0xea00_0000, rd, rn, rm)
}
fn orr_reg(rd: u32, rn: u32, rm: u32) -> u32 {
    rrr(0xaa00_0000, rd, rn, rm)
}
fn eor_reg(rd: u32, rn: u32, rm: u32) -> u32 {
    rrr(0xca00_0000, rd, rn, rm)
}
fn orn_w(rd: u32, rn: u32, rm: u32) -> u32 {
    rrr(0x2a20_0000, rd, rn, rm)
}
/// `and xd, xn, #0xff`.
fn and_ff(rd: u32, rn: u32) -> u32 {
    0x9240_1c00 | rn << 5 | rd
}

fn ubfm(rd: u32, rn: u32, immr: u32, imms: u32) -> u32 {
    0xd340_0000 | immr << 16 | imms << 10 | rn << 5 | rd
}
fn sbfm(rd: u32, rn: u32, immr: u32, imms: u32) -> u32 {
    0x9340_0000 | immr << 16 | imms << 10 | rn << 5 | rd
}
fn lsl_imm(rd: u32, rn: u32, sh: u32) -> u32 {
    ubfm(rd, rn, (64 - sh) % 64, 63 - sh)
}
fn lsr_imm(rd: u32, rn: u32, sh: u32) -> u32 {
    ubfm(rd, rn, sh, 63)
}
fn asr_imm(rd: u32, rn: u32, sh: u32) -> u32 {
    sbfm(rd, rn, sh, 63)
}
fn ubfx(rd: u32, rn: u32, lsb: u32, width: u32) -> u32 {
    ubfm(rd, rn, lsb, lsb + width - 1)
}
fn extr(rd: u32, rn: u32, rm: u32, lsb: u32) -> u32 {
    rrr(0x93c0_0000, rd, rn, rm) | lsb << 10
}

fn udiv(rd: u32, rn: u32, rm: u32) -> u32 {
    rrr(0x9ac0_0800, rd, rn, rm)
}
fn sdiv(rd: u32, rn: u32, rm: u32) -> u32 {
    rrr(0x9ac0_0c00, rd, rn, rm)
}
fn lslv(rd: u32, rn: u32, rm: u32) -> u32 {
    rrr(0x9ac0_2000, rd, rn, rm)
}
fn rorv(rd: u32, rn: u32, rm: u32) -> u32 {
    rrr(0x9ac0_2c00, rd, rn, rm)
}
fn madd(rd: u32, rn: u32, rm: u32, ra: u32) -> u32 {
    rrr(0x9b00_0000, rd, rn, rm) | ra << 10
}
fn msub(rd: u32, rn: u32, rm: u32, ra: u32) -> u32 {
    rrr(0x9b00_8000, rd, rn, rm) | ra << 10
}
fn mul(rd: u32, rn: u32, rm: u32) -> u32 {
    madd(rd, rn, rm, 31)
}
fn umulh(rd: u32, rn: u32, rm: u32) -> u32 {
    rrr(0x9bc0_7c00, rd, rn, rm)
}
fn smulh(rd: u32, rn: u32, rm: u32) -> u32 {
    rrr(0x9b40_7c00, rd, rn, rm)
}
fn rbit(rd: u32, rn: u32) -> u32 {
    0xdac0_0000 | rn << 5 | rd
}
fn rev(rd: u32, rn: u32) -> u32 {
    0xdac0_0c00 | rn << 5 | rd
}
fn clz(rd: u32, rn: u32) -> u32 {
    0xdac0_1000 | rn << 5 | rd
}

fn csel(rd: u32, rn: u32, rm: u32, cond: u32) -> u32 {
    rrr(0x9a80_0000, rd, rn, rm) | cond << 12
}
fn csinc(rd: u32, rn: u32, rm: u32, cond: u32) -> u32 {
    rrr(0x9a80_0400, rd, rn, rm) | cond << 12
}
fn cset(rd: u32, cond: u32) -> u32 {
    csinc(rd, 31, 31, cond ^ 1)
}
fn ccmp_imm(rn: u32, imm5: u32, nzcv: u32, cond: u32) -> u32 {
    0xfa40_0800 | imm5 << 16 | cond << 12 | rn << 5 | nzcv
}

fn crc32b(rd: u32, rn: u32, rm: u32) -> u32 {
    rrr(0x1ac0_4000, rd, rn, rm)
}
fn crc32x(rd: u32, rn: u32, rm: u32) -> u32 {
    rrr(0x9ac0_4c00, rd, rn, rm)
}
fn crc32cb(rd: u32, rn: u32, rm: u32) -> u32 {
    rrr(0x1ac0_5000, rd, rn, rm)
}
fn crc32cx(rd: u32, rn: u32, rm: u32) -> u32 {
    rrr(0x9ac0_5c00, rd, rn, rm)
}

fn b(off: i64) -> u32 {
    0x1400_0000 | ((off >> 2) as u32 & 0x3ff_ffff)
}
fn bl(off: i64) -> u32 {
    0x9400_0000 | ((off >> 2) as u32 & 0x3ff_ffff)
}
fn b_cond(cond: u32, off: i64) -> u32 {
    0x5400_0000 | imm19(off) | cond
}
fn cbz(rt: u32, off: i64) -> u32 {
    0xb400_0000 | imm19(off) | rt
}
fn cbnz(rt: u32, off: i64) -> u32 {
    0xb500_0000 | imm19(off) | rt
}
fn tbz(rt: u32, bit: u32, off: i64) -> u32 {
    let imm14 = ((off >> 2) as u32 & 0x3fff) << 5;
    0x3600_0000 | (bit >> 5) << 31 | (bit & 31) << 19 | imm14 | rt
}
fn tbnz(rt: u32, bit: u32, off: i64) -> u32 {
    tbz(rt, bit, off) | 1 << 24
}
fn br(rn: u32) -> u32 {
    0xd61f_0000 | rn << 5
}
fn blr(rn: u32) -> u32 {
    0xd63f_0000 | rn << 5
}
fn ret() -> u32 {
    0xd65f_03c0
}

fn svc(imm: u32) -> u32 {
    0xd400_0001 | imm << 5
}
fn hvc(imm: u32) -> u32 {
    0xd400_0002 | imm << 5
}
fn brk(imm: u32) -> u32 {
    0xd420_0000 | imm << 5
}
const ERET: u32 = 0xd69f_03e0;
const NOP: u32 = 0xd503_201f;
const CLREX: u32 = 0xd503_3f5f;
const DMB_ISH: u32 = 0xd503_3bbf;
const ISB: u32 = 0xd503_3fdf;
const CFINV: u32 = 0xd500_401f;

fn setf8(rn: u32) -> u32 {
    0x3a00_080d | rn << 5
}

// MRS/MSR encodings with Rt = 0.
const MRS_NZCV: u32 = 0xd53b_4200;
const MSR_NZCV: u32 = 0xd51b_4200;
const MRS_MIDR: u32 = 0xd538_0000;
const MRS_CURRENTEL: u32 = 0xd538_4240;
const MRS_TPIDR_EL0: u32 = 0xd53b_d040;
const MSR_TPIDR_EL0: u32 = 0xd51b_d040;
const MRS_SCTLR: u32 = 0xd538_1000;
const MSR_SCTLR: u32 = 0xd518_1000;
const MRS_DCZID: u32 = 0xd53b_00e0;

fn sys(op1: u32, crn: u32, crm: u32, op2: u32, rt: u32) -> u32 {
    0xd508_0000 | op1 << 16 | crn << 12 | crm << 8 | op2 << 5 | rt
}
fn dc_zva(rt: u32) -> u32 {
    sys(3, 7, 4, 1, rt)
}
fn dc_civac(rt: u32) -> u32 {
    sys(3, 7, 14, 1, rt)
}
fn ic_ivau(rt: u32) -> u32 {
    sys(3, 7, 5, 1, rt)
}
const IC_IALLU: u32 = 0xd508_751f;
const TLBI_VMALLE1IS: u32 = 0xd508_831f;

fn ldr_lit(rt: u32, off: i64) -> u32 {
    0x5800_0000 | imm19(off) | rt
}
fn ldr_lit_w(rt: u32, off: i64) -> u32 {
    0x1800_0000 | imm19(off) | rt
}
fn ldrsw_lit(rt: u32, off: i64) -> u32 {
    0x9800_0000 | imm19(off) | rt
}

fn ldst(base: u32, rt: u32, rn: u32, imm12: u32) -> u32 {
    base | imm12 << 10 | rn << 5 | rt
}
fn ldr(rt: u32, rn: u32, off: u32) -> u32 {
    ldst(0xf940_0000, rt, rn, off / 8)
}
fn str(rt: u32, rn: u32, off: u32) -> u32 {
    ldst(0xf900_0000, rt, rn, off / 8)
}
fn ldr_w(rt: u32, rn: u32, off: u32) -> u32 {
    ldst(0xb940_0000, rt, rn, off / 4)
}
fn str_w(rt: u32, rn: u32, off: u32) -> u32 {
    ldst(0xb900_0000, rt, rn, off / 4)
}
fn ldrb(rt: u32, rn: u32, off: u32) -> u32 {
    ldst(0x3940_0000, rt, rn, off)
}
fn ldrsb(rt: u32, rn: u32, off: u32) -> u32 {
    ldst(0x3980_0000, rt, rn, off)
}
fn ldrsw_w(rt: u32, rn: u32, off: u32) -> u32 {
    ldst(0xb980_0000, rt, rn, off / 4)
}
fn imm9(base: u32, rt: u32, rn: u32, imm: i32) -> u32 {
    base | (imm as u32 & 0x1ff) << 12 | rn << 5 | rt
}
fn ldr_post(rt: u32, rn: u32, imm: i32) -> u32 {
    imm9(0xf840_0400, rt, rn, imm)
}
fn str_pre(rt: u32, rn: u32, imm: i32) -> u32 {
    imm9(0xf800_0c00, rt, rn, imm)
}
/// `ldr xt, [xn, xm, lsl #3]`.
fn ldr_reg_lsl3(rt: u32, rn: u32, rm: u32) -> u32 {
    0xf860_7800 | rm << 16 | rn << 5 | rt
}
fn pair(base: u32, rt: u32, rt2: u32, rn: u32, off: i32) -> u32 {
    base | ((off / 8) as u32 & 0x7f) << 15 | rt2 << 10 | rn << 5 | rt
}
fn ldp(rt: u32, rt2: u32, rn: u32, off: i32) -> u32 {
    pair(0xa940_0000, rt, rt2, rn, off)
}
fn stp(rt: u32, rt2: u32, rn: u32, off: i32) -> u32 {
    pair(0xa900_0000, rt, rt2, rn, off)
}
fn stp_pre(rt: u32, rt2: u32, rn: u32, off: i32) -> u32 {
    pair(0xa980_0000, rt, rt2, rn, off)
}
fn ldp_post(rt: u32, rt2: u32, rn: u32, off: i32) -> u32 {
    pair(0xa8c0_0000, rt, rt2, rn, off)
}

fn ldxr(rt: u32, rn: u32) -> u32 {
    0xc85f_7c00 | rn << 5 | rt
}
fn ldxr_w(rt: u32, rn: u32) -> u32 {
    0x885f_7c00 | rn << 5 | rt
}
fn ldaxr(rt: u32, rn: u32) -> u32 {
    0xc85f_fc00 | rn << 5 | rt
}
fn stxr(rs: u32, rt: u32, rn: u32) -> u32 {
    0xc800_7c00 | rs << 16 | rn << 5 | rt
}
fn stxr_w(rs: u32, rt: u32, rn: u32) -> u32 {
    0x8800_7c00 | rs << 16 | rn << 5 | rt
}
fn stlxr(rs: u32, rt: u32, rn: u32) -> u32 {
    0xc800_fc00 | rs << 16 | rn << 5 | rt
}
fn ldxp(rt: u32, rt2: u32, rn: u32) -> u32 {
    0xc87f_0000 | rt2 << 10 | rn << 5 | rt
}
fn stxp(rs: u32, rt: u32, rt2: u32, rn: u32) -> u32 {
    0xc820_0000 | rs << 16 | rt2 << 10 | rn << 5 | rt
}
fn ldar(rt: u32, rn: u32) -> u32 {
    0xc8df_fc00 | rn << 5 | rt
}
fn stlr(rt: u32, rn: u32) -> u32 {
    0xc89f_fc00 | rn << 5 | rt
}
fn ldapr(rt: u32, rn: u32) -> u32 {
    0xf8bf_c000 | rn << 5 | rt
}

fn cas(rs: u32, rt: u32, rn: u32) -> u32 {
    0xc8a0_7c00 | rs << 16 | rn << 5 | rt
}
fn casal(rs: u32, rt: u32, rn: u32) -> u32 {
    0xc8e0_fc00 | rs << 16 | rn << 5 | rt
}
fn ldadd(rs: u32, rt: u32, rn: u32) -> u32 {
    0xf820_0000 | rs << 16 | rn << 5 | rt
}
fn ldsmax(rs: u32, rt: u32, rn: u32) -> u32 {
    0xf820_4000 | rs << 16 | rn << 5 | rt
}
fn ldclr(rs: u32, rt: u32, rn: u32) -> u32 {
    0xf820_1000 | rs << 16 | rn << 5 | rt
}
fn swp(rs: u32, rt: u32, rn: u32) -> u32 {
    0xf820_8000 | rs << 16 | rn << 5 | rt
}

// A64 condition field values.
const EQ: u32 = 0;
const NE: u32 = 1;
const HS: u32 = 2;
const LO: u32 = 3;
const HI: u32 = 8;
const GE: u32 = 10;
const LT: u32 = 11;

// ── Test runner ───────────────────────────────────────────────

/// Start of the code region; also the base of guest RAM.
const CODE: u64 = 0x1000;
/// Scratch data region inside guest RAM.
const DATA: u64 = 0x4000;
const RAM_SIZE: usize = 0x8000;

/// One vCPU over flat RAM with its own block store.
struct Machine {
    cpu: A64Cpu,
    mem: FlatMemory,
    env: ExecEnv,
    /// Data fault that stopped the last run.
    fault: Option<Fault>,
}

impl Machine {
    fn new(insns: &[u32]) -> Self {
        Self::with_cfg(A64Cfg::default(), insns)
    }

    fn with_cfg(cfg: A64Cfg, insns: &[u32]) -> Self {
        let mem = FlatMemory::new(CODE, RAM_SIZE);
        mem.write_words(CODE, insns).expect("code fits in RAM");
        let mut cpu = A64Cpu::new(cfg);
        cpu.pc = CODE;
        Self {
            cpu,
            mem,
            env: ExecEnv::new(Arc::new(TbStore::new())),
            fault: None,
        }
    }

    fn single_step(mut self) -> Self {
        self.env.limits = TbLimits::single_step();
        self
    }

    fn x(&self, r: usize) -> u64 {
        self.cpu.xregs[r]
    }

    fn run(&mut self) -> ExitReason {
        let mut exec = Interp::new(&self.mem).with_budget(10_000);
        let exit =
            cpu_exec_loop(&mut self.env, &mut self.cpu, &mut exec, &self.mem);
        self.fault = exec.fault;
        exit
    }

    /// Run up to the closing `brk`, returning its pc.
    fn run_to_brk(&mut self) -> u64 {
        match self.run() {
            ExitReason::Exception {
                kind: ExceptionKind::Brk,
                pc,
                ..
            } => pc,
            other => panic!("expected brk, got {other:?} ({:?})", self.fault),
        }
    }
}

/// Run `insns` followed by `brk #0` on a fresh machine.
fn run_a64(setup: impl FnOnce(&mut Machine), insns: &[u32]) -> Machine {
    let mut code = insns.to_vec();
    code.push(brk(0));
    let mut m = Machine::new(&code);
    setup(&mut m);
    let pc = m.run_to_brk();
    assert_eq!(pc, CODE + 4 * insns.len() as u64, "stopped early");
    m
}

// ── Moves and immediate arithmetic ────────────────────────────

#[test]
fn test_movz_movk() {
    let m = run_a64(
        |_| {},
        &[movz(0, 0xbeef, 0), movk(0, 0xdead, 1), movk(0, 0x1234, 3)],
    );
    assert_eq!(m.x(0), 0x1234_0000_dead_beef);
}

#[test]
fn test_movn_and_w_forms() {
    let m = run_a64(
        |m| m.cpu.xregs[2] = u64::MAX,
        &[movn(1, 0, 0), movz_w(2, 0x1234), movn_w(3, 0)],
    );
    assert_eq!(m.x(1), u64::MAX);
    assert_eq!(m.x(2), 0x1234);
    assert_eq!(m.x(3), 0xffff_ffff);
}

#[test]
fn test_add_sub_imm_widths() {
    let m = run_a64(
        |m| m.cpu.xregs[1] = 0xffff_ffff,
        &[add_w_imm(2, 1, 1), add_imm(3, 1, 1), sub_imm(4, 1, 0x10)],
    );
    assert_eq!(m.x(2), 0);
    assert_eq!(m.x(3), 0x1_0000_0000);
    assert_eq!(m.x(4), 0xffff_ffef);
}

#[test]
fn test_register_31_is_sp_for_add_imm() {
    let m = run_a64(
        |m| m.cpu.sp_el1 = 0x8000,
        &[add_imm(31, 31, 0x10), add_imm(0, 31, 8)],
    );
    assert_eq!(m.cpu.sp_el1, 0x8010);
    assert_eq!(m.x(0), 0x8018);
}

#[test]
fn test_register_31_is_zero_for_add_reg() {
    let m = run_a64(
        |m| {
            m.cpu.sp_el1 = 0x8000;
            m.cpu.xregs[1] = 5;
        },
        &[add_reg(0, 1, 31), add_reg(31, 1, 1)],
    );
    assert_eq!(m.x(0), 5);
    assert_eq!(m.cpu.sp_el1, 0x8000);
}

// ── Register arithmetic and logic ─────────────────────────────

#[test]
fn test_add_shifted_register() {
    let m = run_a64(
        |m| {
            m.cpu.xregs[1] = 1;
            m.cpu.xregs[2] = 3;
            m.cpu.xregs[3] = 0x8000_0000_0000_0000;
        },
        &[add_shifted(0, 1, 2, 0, 4), add_shifted(4, 31, 3, 2, 63)],
    );
    assert_eq!(m.x(0), 49);
    assert_eq!(m.x(4), u64::MAX);
}

#[test]
fn test_logic_register() {
    let m = run_a64(
        |m| {
            m.cpu.xregs[1] = 0xff00_ff00;
            m.cpu.xregs[2] = 0x0ff0_0ff0;
        },
        &[
            and_reg(3, 1, 2),
            orr_reg(4, 1, 2),
            eor_reg(5, 1, 2),
            orr_reg(6, 31, 2),
            and_ff(7, 2),
        ],
    );
    assert_eq!(m.x(3), 0x0f00_0f00);
    assert_eq!(m.x(4), 0xfff0_fff0);
    assert_eq!(m.x(5), 0xf0f0_f0f0);
    assert_eq!(m.x(6), 0x0ff0_0ff0);
    assert_eq!(m.x(7), 0xf0);
}

#[test]
fn test_bitfield_shifts() {
    let m = run_a64(
        |m| m.cpu.xregs[1] = 0xf0f0_0000_0000_0ff0,
        &[
            lsr_imm(2, 1, 4),
            asr_imm(3, 1, 60),
            ubfx(4, 1, 4, 8),
            lsl_imm(5, 1, 8),
            extr(6, 1, 1, 4),
        ],
    );
    assert_eq!(m.x(2), 0x0f0f_0000_0000_00ff);
    assert_eq!(m.x(3), u64::MAX);
    assert_eq!(m.x(4), 0xff);
    assert_eq!(m.x(5), 0xf000_0000_000f_f000);
    assert_eq!(m.x(6), 0x0f0f_0000_0000_00ff);
}

#[test]
fn test_variable_shifts_take_count_modulo_width() {
    let m = run_a64(
        |m| {
            m.cpu.xregs[1] = 1;
            m.cpu.xregs[2] = 65;
            m.cpu.xregs[3] = 0x8000_0000_0000_0001;
        },
        &[lslv(4, 1, 2), rorv(5, 3, 1)],
    );
    assert_eq!(m.x(4), 2);
    assert_eq!(m.x(5), 0xc000_0000_0000_0000);
}

#[test]
fn test_division() {
    let m = run_a64(
        |m| {
            m.cpu.xregs[1] = 100;
            m.cpu.xregs[2] = 7;
            m.cpu.xregs[3] = (-100i64) as u64;
        },
        &[udiv(4, 1, 2), sdiv(5, 3, 2), udiv(6, 1, 31), sdiv(7, 3, 31)],
    );
    assert_eq!(m.x(4), 14);
    assert_eq!(m.x(5), (-14i64) as u64);
    // Division by zero yields zero.
    assert_eq!(m.x(6), 0);
    assert_eq!(m.x(7), 0);
}

#[test]
fn test_sdiv_overflow_wraps() {
    let m = run_a64(
        |m| {
            m.cpu.xregs[1] = i64::MIN as u64;
            m.cpu.xregs[2] = u64::MAX;
        },
        &[sdiv(3, 1, 2)],
    );
    assert_eq!(m.x(3), i64::MIN as u64);
}

#[test]
fn test_multiply() {
    let m = run_a64(
        |m| {
            m.cpu.xregs[1] = 6;
            m.cpu.xregs[2] = 7;
            m.cpu.xregs[3] = 100;
            m.cpu.xregs[4] = u64::MAX;
            m.cpu.xregs[5] = 2;
        },
        &[
            mul(10, 1, 2),
            madd(11, 1, 2, 3),
            msub(12, 1, 2, 3),
            umulh(13, 4, 5),
            smulh(14, 4, 5),
        ],
    );
    assert_eq!(m.x(10), 42);
    assert_eq!(m.x(11), 142);
    assert_eq!(m.x(12), 58);
    assert_eq!(m.x(13), 1);
    assert_eq!(m.x(14), u64::MAX);
}

#[test]
fn test_bit_manipulation() {
    let m = run_a64(
        |m| {
            m.cpu.xregs[1] = 1;
            m.cpu.xregs[2] = 0x0102_0304_0506_0708;
        },
        &[rbit(3, 1), clz(4, 1), rev(5, 2), clz(6, 31)],
    );
    assert_eq!(m.x(3), 1 << 63);
    assert_eq!(m.x(4), 63);
    assert_eq!(m.x(5), 0x0807_0605_0403_0201);
    assert_eq!(m.x(6), 64);
}

// ── Flags and conditional operations ──────────────────────────

#[test]
fn test_subs_flags_visible_through_mrs() {
    let m = run_a64(
        |m| {
            m.cpu.xregs[1] = 3;
            m.cpu.xregs[2] = 5;
        },
        &[subs_reg(3, 1, 2), MRS_NZCV],
    );
    assert_eq!(m.x(3), (-2i64) as u64);
    // N set, C clear (borrow).
    assert_eq!(m.x(0), 0x8000_0000);
    assert_eq!(m.cpu.nzcv(), 0x8000_0000);
}

#[test]
fn test_adds_w_carry() {
    // 5 + (-3) at 32 bits: Z=0 N=0 C=1 V=0.
    let m = run_a64(
        |m| {
            m.cpu.xregs[1] = 5;
            m.cpu.xregs[2] = 0xffff_fffd;
        },
        &[adds_w_reg(0, 1, 2), MRS_NZCV | 3],
    );
    assert_eq!(m.x(0), 2);
    assert_eq!(m.x(3), 0x2000_0000);
}

#[test]
fn test_flags_persist_across_blocks() {
    // The flags are recorded in one block and read in the next.
    let mut m = Machine::new(&[
        cmp_reg(1, 2),
        b(4),
        cset(3, LT),
        cset(4, LO),
        brk(0),
    ]);
    m.cpu.xregs[1] = (-1i64) as u64;
    m.cpu.xregs[2] = 1;
    m.run_to_brk();
    assert_eq!(m.x(3), 1);
    assert_eq!(m.x(4), 0);
}

#[test]
fn test_conditional_select() {
    let m = run_a64(
        |m| {
            m.cpu.xregs[1] = 3;
            m.cpu.xregs[2] = 5;
        },
        &[
            cmp_reg(1, 2),
            csel(3, 1, 2, LT),
            cset(4, HI),
            csinc(5, 1, 2, EQ),
            cset(6, NE),
        ],
    );
    assert_eq!(m.x(3), 3);
    assert_eq!(m.x(4), 0);
    assert_eq!(m.x(5), 6);
    assert_eq!(m.x(6), 1);
}

#[test]
fn test_ccmp() {
    let prog = [cmp_imm(1, 5), ccmp_imm(2, 3, 0b0000, EQ), cset(0, EQ)];
    let taken = run_a64(
        |m| {
            m.cpu.xregs[1] = 5;
            m.cpu.xregs[2] = 3;
        },
        &prog,
    );
    assert_eq!(taken.x(0), 1);
    let skipped = run_a64(
        |m| {
            m.cpu.xregs[1] = 4;
            m.cpu.xregs[2] = 3;
        },
        &prog,
    );
    assert_eq!(skipped.x(0), 0);
}

#[test]
fn test_adc_chain_128bit_add() {
    let m = run_a64(
        |m| {
            m.cpu.xregs[1] = u64::MAX;
            m.cpu.xregs[2] = 1;
            m.cpu.xregs[3] = 7;
            m.cpu.xregs[4] = 8;
        },
        &[adds_reg(5, 1, 2), adc(6, 3, 4)],
    );
    assert_eq!(m.x(5), 0);
    assert_eq!(m.x(6), 16);
}

#[test]
fn test_adcs_then_branch_uses_helper_path() {
    // Flags from ADCS are tested through the generic helper.
    let m = run_a64(
        |m| {
            m.cpu.xregs[1] = u64::MAX;
            m.cpu.xregs[2] = 0;
        },
        &[cmp_reg(1, 1), adcs(3, 1, 2), cset(4, HS), cset(5, EQ)],
    );
    assert_eq!(m.x(3), 0);
    assert_eq!(m.x(4), 1);
    assert_eq!(m.x(5), 1);
}

#[test]
fn test_sbc_borrow() {
    let m = run_a64(
        |m| {
            m.cpu.xregs[1] = 0;
            m.cpu.xregs[2] = 1;
            m.cpu.xregs[3] = 10;
        },
        &[cmp_reg(1, 2), sbc(4, 3, 31)],
    );
    // The compare borrowed, so C = 0 and SBC subtracts one more.
    assert_eq!(m.x(4), 9);
}

#[test]
fn test_ands_sets_n_and_z() {
    let m = run_a64(
        |m| {
            m.cpu.xregs[1] = 0xf0;
            m.cpu.xregs[2] = 0x0f;
        },
        &[ands_reg(3, 1, 2), cset(4, EQ), cset(5, HS)],
    );
    assert_eq!(m.x(4), 1);
    assert_eq!(m.x(5), 0);
}

#[test]
fn test_msr_nzcv_then_condition() {
    let m = run_a64(
        |m| m.cpu.xregs[0] = 0x2000_0000,
        &[MSR_NZCV, cset(1, HS), cset(2, EQ)],
    );
    assert_eq!(m.x(1), 1);
    assert_eq!(m.x(2), 0);
    assert_eq!(m.cpu.nzcv(), 0x2000_0000);
}

#[test]
fn test_cfinv_and_setf8() {
    let m = run_a64(
        |m| m.cpu.xregs[1] = 5,
        &[cmp_reg(1, 1), CFINV, MRS_NZCV],
    );
    assert_eq!(m.x(0), 0x4000_0000);

    let m = run_a64(
        |m| m.cpu.xregs[1] = 0x80,
        &[MSR_NZCV, setf8(1), MRS_NZCV],
    );
    assert_eq!(m.x(0), 0x9000_0000);
}

#[test]
fn test_crc32_check_value() {
    let prog = [
        movn_w(0, 0),
        ldr(2, 1, 0),
        crc32x(0, 0, 2),
        ldrb(3, 1, 8),
        crc32b(0, 0, 3),
        orn_w(0, 31, 0),
    ];
    let setup = |m: &mut Machine| {
        m.cpu.xregs[1] = DATA;
        for (i, &byte) in b"123456789".iter().enumerate() {
            m.mem.store(DATA + i as u64, 1, byte as u64).unwrap();
        }
    };
    let m = run_a64(setup, &prog);
    assert_eq!(m.x(0), 0xcbf4_3926);

    let castagnoli = [
        movn_w(0, 0),
        ldr(2, 1, 0),
        crc32cx(0, 0, 2),
        ldrb(3, 1, 8),
        crc32cb(0, 0, 3),
        orn_w(0, 31, 0),
    ];
    let m = run_a64(setup, &castagnoli);
    assert_eq!(m.x(0), 0xe306_9283);
}

// ── Branches ──────────────────────────────────────────────────

#[test]
fn test_b_skips() {
    let m = run_a64(|_| {}, &[b(8), movz(0, 1, 0), movz(1, 1, 0)]);
    assert_eq!(m.x(0), 0);
    assert_eq!(m.x(1), 1);
}

#[test]
fn test_bl_ret() {
    let mut m = Machine::new(&[bl(8), brk(0), movz(0, 7, 0), ret()]);
    let pc = m.run_to_brk();
    assert_eq!(pc, CODE + 4);
    assert_eq!(m.x(0), 7);
    assert_eq!(m.x(30), CODE + 4);
}

#[test]
fn test_blr_reads_target_before_link() {
    let mut m = Machine::new(&[blr(30), brk(1), brk(0)]);
    m.cpu.xregs[30] = CODE + 8;
    let pc = m.run_to_brk();
    assert_eq!(pc, CODE + 8);
    assert_eq!(m.x(30), CODE + 4);
}

#[test]
fn test_br_register() {
    let mut m = Machine::new(&[br(1), brk(1), movz(0, 9, 0), brk(0)]);
    m.cpu.xregs[1] = CODE + 8;
    m.run_to_brk();
    assert_eq!(m.x(0), 9);
}

#[test]
fn test_cbz_cbnz() {
    let prog = [cbz(1, 8), movz(0, 1, 0), cbnz(1, 8), movz(2, 1, 0)];
    let zero = run_a64(|_| {}, &prog);
    assert_eq!((zero.x(0), zero.x(2)), (0, 1));
    let nonzero = run_a64(|m| m.cpu.xregs[1] = 4, &prog);
    assert_eq!((nonzero.x(0), nonzero.x(2)), (1, 0));
}

#[test]
fn test_tbz_tbnz_high_bit() {
    let prog = [tbnz(1, 40, 8), movz(0, 1, 0), tbz(1, 3, 8), movz(2, 1, 0)];
    let m = run_a64(|m| m.cpu.xregs[1] = 1 << 40, &prog);
    assert_eq!(m.x(0), 0);
    assert_eq!(m.x(2), 0);
}

#[test]
fn test_countdown_loop() {
    let m = run_a64(
        |_| {},
        &[
            movz(0, 5, 0),
            add_imm(1, 1, 3),
            subs_imm(0, 0, 1),
            b_cond(NE, -8),
        ],
    );
    assert_eq!(m.x(0), 0);
    assert_eq!(m.x(1), 15);
}

#[test]
fn test_signed_compare_branch() {
    let prog = [cmp_reg(1, 2), b_cond(GE, 8), movz(0, 1, 0)];
    let lt = run_a64(
        |m| {
            m.cpu.xregs[1] = (-5i64) as u64;
            m.cpu.xregs[2] = 3;
        },
        &prog,
    );
    assert_eq!(lt.x(0), 1);
    let ge = run_a64(
        |m| {
            m.cpu.xregs[1] = 3;
            m.cpu.xregs[2] = (-5i64) as u64;
        },
        &prog,
    );
    assert_eq!(ge.x(0), 0);
}

// ── Loads and stores ──────────────────────────────────────────

#[test]
fn test_load_store_unsigned_offset() {
    let m = run_a64(
        |m| {
            m.cpu.xregs[1] = DATA;
            m.cpu.xregs[2] = 0x1122_3344_5566_8788;
        },
        &[
            str(2, 1, 16),
            ldr(3, 1, 16),
            ldr_w(4, 1, 16),
            ldrb(5, 1, 16),
            ldrsb(6, 1, 16),
            ldrsw_w(7, 1, 16),
            str_w(2, 1, 32),
        ],
    );
    assert_eq!(m.x(3), 0x1122_3344_5566_8788);
    assert_eq!(m.x(4), 0x5566_8788);
    assert_eq!(m.x(5), 0x88);
    assert_eq!(m.x(6), 0xffff_ffff_ffff_ff88);
    assert_eq!(m.x(7), 0x5566_8788);
    assert_eq!(m.mem.load(DATA + 32, 8).unwrap(), 0x5566_8788);
}

#[test]
fn test_load_store_writeback() {
    let m = run_a64(
        |m| {
            m.cpu.xregs[1] = DATA + 0x100;
            m.cpu.xregs[2] = 0xabcd;
            m.mem.store(DATA + 0x200, 8, 77).unwrap();
            m.cpu.xregs[3] = DATA + 0x200;
        },
        &[str_pre(2, 1, -16), ldr_post(4, 3, 8)],
    );
    assert_eq!(m.x(1), DATA + 0xf0);
    assert_eq!(m.mem.load(DATA + 0xf0, 8).unwrap(), 0xabcd);
    assert_eq!(m.x(3), DATA + 0x208);
    assert_eq!(m.x(4), 77);
}

#[test]
fn test_load_register_offset() {
    let m = run_a64(
        |m| {
            m.cpu.xregs[1] = DATA;
            m.cpu.xregs[2] = 3;
            m.mem.store(DATA + 24, 8, 0x55).unwrap();
        },
        &[ldr_reg_lsl3(3, 1, 2)],
    );
    assert_eq!(m.x(3), 0x55);
}

#[test]
fn test_load_store_pair() {
    let m = run_a64(
        |m| {
            m.cpu.sp_el1 = DATA + 0x100;
            m.cpu.xregs[1] = 11;
            m.cpu.xregs[2] = 22;
        },
        &[
            stp_pre(1, 2, 31, -16),
            ldp(3, 4, 31, 0),
            ldp_post(5, 6, 31, 16),
            stp(2, 1, 31, 8),
        ],
    );
    assert_eq!(m.mem.load(DATA + 0x108, 8).unwrap(), 22);
    assert_eq!(m.mem.load(DATA + 0x110, 8).unwrap(), 11);
    assert_eq!(m.cpu.sp_el1, DATA + 0x100);
    assert_eq!(m.mem.load(DATA + 0xf0, 8).unwrap(), 11);
    assert_eq!(m.mem.load(DATA + 0xf8, 8).unwrap(), 22);
    assert_eq!((m.x(3), m.x(4)), (11, 22));
    assert_eq!((m.x(5), m.x(6)), (11, 22));
}

#[test]
fn test_load_pair_into_base_register() {
    let m = run_a64(
        |m| {
            m.cpu.xregs[1] = DATA;
            m.mem.store(DATA, 8, 0x111).unwrap();
            m.mem.store(DATA + 8, 8, 0x222).unwrap();
        },
        &[ldp(1, 2, 1, 0)],
    );
    assert_eq!(m.x(1), 0x111);
    assert_eq!(m.x(2), 0x222);
}

#[test]
fn test_misaligned_data_access() {
    let prog = [ldr(2, 1, 0)];
    let m = run_a64(|m| m.cpu.xregs[1] = DATA + 4, &prog);
    assert_eq!(m.fault, None);

    let mut code = prog.to_vec();
    code.push(brk(0));
    let mut m = Machine::new(&code);
    m.cpu.xregs[1] = DATA + 4;
    m.cpu.sctlr_el1 = SCTLR_A;
    assert_eq!(m.run(), ExitReason::Halt);
    assert_eq!(m.fault, Some(Fault::Misaligned { addr: DATA + 4 }));
}

#[test]
fn test_literal_loads() {
    let mut m = Machine::new(&[
        ldr_lit(1, 16),
        ldr_lit_w(2, 12),
        ldrsw_lit(3, 8),
        brk(0),
        0x8000_0001,
        0x1234_5678,
    ]);
    m.run_to_brk();
    assert_eq!(m.x(1), 0x1234_5678_8000_0001);
    assert_eq!(m.x(2), 0x8000_0001);
    assert_eq!(m.x(3), 0xffff_ffff_8000_0001);
}

// ── Exclusives and atomics ────────────────────────────────────

fn excl_setup(m: &mut Machine) {
    m.cpu.xregs[1] = DATA;
    m.mem.store(DATA, 8, 5).unwrap();
}

#[test]
fn test_exclusive_pair_succeeds() {
    let m = run_a64(
        excl_setup,
        &[ldxr(2, 1), add_imm(2, 2, 1), stxr(3, 2, 1)],
    );
    assert_eq!(m.mem.load(DATA, 8).unwrap(), 6);
    assert_eq!(m.x(3), 0);
    assert_eq!(m.cpu.exclusive_addr, u64::MAX);
}

#[test]
fn test_store_exclusive_without_monitor_fails() {
    let m = run_a64(excl_setup, &[movz(2, 9, 0), stxr(3, 2, 1)]);
    assert_eq!(m.mem.load(DATA, 8).unwrap(), 5);
    assert_eq!(m.x(3), 1);
}

#[test]
fn test_store_exclusive_other_address_fails() {
    let m = run_a64(
        excl_setup,
        &[ldxr(2, 1), add_imm(4, 1, 8), stxr(3, 2, 4)],
    );
    assert_eq!(m.x(3), 1);
    assert_eq!(m.mem.load(DATA + 8, 8).unwrap(), 0);
}

#[test]
fn test_intervening_store_clears_monitor() {
    let m = run_a64(
        excl_setup,
        &[ldxr(2, 1), str(2, 1, 64), stxr(3, 2, 1)],
    );
    assert_eq!(m.x(3), 1);
}

#[test]
fn test_intervening_load_clears_monitor() {
    let m = run_a64(
        excl_setup,
        &[ldxr(2, 1), ldr(4, 1, 0), add_imm(2, 2, 1), stxr(3, 2, 1)],
    );
    assert_eq!(m.x(3), 1);
    assert_eq!(m.x(4), 5);
    assert_eq!(m.mem.load(DATA, 8).unwrap(), 5);
    assert_eq!(m.cpu.exclusive_addr, u64::MAX);
}

#[test]
fn test_load_in_next_block_clears_monitor() {
    let m = run_a64(
        excl_setup,
        &[ldxr(2, 1), b(4), ldar(4, 1), stxr(3, 2, 1)],
    );
    assert_eq!(m.x(3), 1);
    assert_eq!(m.mem.load(DATA, 8).unwrap(), 5);
}

#[test]
fn test_clrex_clears_monitor() {
    let m = run_a64(excl_setup, &[ldxr(2, 1), CLREX, stxr(3, 2, 1)]);
    assert_eq!(m.x(3), 1);
}

#[test]
fn test_monitor_survives_block_boundary() {
    let mut m = Machine::new(&[
        ldaxr(2, 1),
        b(4),
        add_imm(2, 2, 10),
        stlxr(3, 2, 1),
        brk(0),
    ]);
    excl_setup(&mut m);
    m.run_to_brk();
    assert_eq!(m.x(3), 0);
    assert_eq!(m.mem.load(DATA, 8).unwrap(), 15);
}

#[test]
fn test_exclusive_changed_value_fails() {
    // Another agent changed the location between the two halves.
    let mut m = Machine::new(&[ldxr_w(2, 1), brk(1), stxr_w(3, 2, 1), brk(0)]);
    excl_setup(&mut m);
    match m.run() {
        ExitReason::Exception { pc, .. } => assert_eq!(pc, CODE + 4),
        other => panic!("unexpected {other:?}"),
    }
    m.mem.store(DATA, 4, 6).unwrap();
    m.cpu.pc = CODE + 8;
    m.run_to_brk();
    assert_eq!(m.x(3), 1);
    assert_eq!(m.mem.load(DATA, 4).unwrap(), 6);
}

#[test]
fn test_exclusive_pair_64() {
    let m = run_a64(
        |m| {
            m.cpu.xregs[1] = DATA;
            m.mem.store(DATA, 8, 1).unwrap();
            m.mem.store(DATA + 8, 8, 2).unwrap();
        },
        &[ldxp(2, 3, 1), stxp(4, 3, 2, 1)],
    );
    assert_eq!((m.x(2), m.x(3)), (1, 2));
    assert_eq!(m.x(4), 0);
    assert_eq!(m.mem.load(DATA, 8).unwrap(), 2);
    assert_eq!(m.mem.load(DATA + 8, 8).unwrap(), 1);
}

#[test]
fn test_acquire_release() {
    let m = run_a64(
        |m| {
            m.cpu.xregs[1] = DATA;
            m.cpu.xregs[2] = 0x77;
        },
        &[stlr(2, 1), ldar(3, 1), ldapr(4, 1), DMB_ISH],
    );
    assert_eq!(m.x(3), 0x77);
    assert_eq!(m.x(4), 0x77);
}

#[test]
fn test_cas() {
    let ok = run_a64(
        |m| {
            excl_setup(m);
            m.cpu.xregs[2] = 5;
            m.cpu.xregs[3] = 9;
        },
        &[cas(2, 3, 1)],
    );
    assert_eq!(ok.mem.load(DATA, 8).unwrap(), 9);
    assert_eq!(ok.x(2), 5);

    let miss = run_a64(
        |m| {
            excl_setup(m);
            m.cpu.xregs[2] = 4;
            m.cpu.xregs[3] = 9;
        },
        &[casal(2, 3, 1)],
    );
    assert_eq!(miss.mem.load(DATA, 8).unwrap(), 5);
    assert_eq!(miss.x(2), 5);
}

#[test]
fn test_atomic_memory_ops() {
    let m = run_a64(
        |m| {
            excl_setup(m);
            m.cpu.xregs[2] = 10;
        },
        &[ldadd(2, 3, 1), swp(2, 4, 1), ldclr(2, 5, 1)],
    );
    assert_eq!(m.x(3), 5);
    assert_eq!(m.x(4), 15);
    assert_eq!(m.x(5), 10);
    assert_eq!(m.mem.load(DATA, 8).unwrap(), 0);

    let m = run_a64(
        |m| {
            m.cpu.xregs[1] = DATA;
            m.mem.store(DATA, 8, u64::MAX).unwrap();
            m.cpu.xregs[2] = 1;
        },
        &[ldsmax(2, 3, 1)],
    );
    assert_eq!(m.x(3), u64::MAX);
    assert_eq!(m.mem.load(DATA, 8).unwrap(), 1);
}

// ── Exceptions and system registers ───────────────────────────

#[test]
fn test_svc_exit_and_entry() {
    let mut m = Machine::new(&[movz(0, 1, 0), svc(0x42)]);
    m.cpu.vbar_el1 = 0x2000;
    let exit = m.run();
    let syn = sysreg::syn_aa64_svc(0x42);
    assert_eq!(
        exit,
        ExitReason::Exception {
            kind: ExceptionKind::Svc,
            syndrome: syn,
            pc: CODE + 4,
        }
    );
    assert_eq!(m.x(0), 1);

    m.cpu.take_exception(ExceptionKind::Svc, syn, CODE + 4);
    assert_eq!(m.cpu.elr_el1, CODE + 8);
    assert_eq!(m.cpu.esr_el1, syn as u64);
    assert_eq!(m.cpu.pc, 0x2200);
}

#[test]
fn test_hvc_is_undefined() {
    let mut m = Machine::new(&[hvc(0)]);
    assert_eq!(
        m.run(),
        ExitReason::Exception {
            kind: ExceptionKind::Undefined,
            syndrome: sysreg::syn_uncategorized(),
            pc: CODE,
        }
    );
}

#[test]
fn test_misaligned_pc() {
    let mut m = Machine::new(&[NOP]);
    m.cpu.pc = CODE + 2;
    assert_eq!(
        m.run(),
        ExitReason::Exception {
            kind: ExceptionKind::PcAlignment,
            syndrome: sysreg::syn_pcalignment(),
            pc: CODE + 2,
        }
    );
}

#[test]
fn test_read_only_sysregs() {
    let m = run_a64(|_| {}, &[MRS_MIDR, MRS_CURRENTEL | 1]);
    assert_eq!(m.x(0), A64Cfg::default().midr);
    assert_eq!(m.x(1), 1 << 2);
}

#[test]
fn test_tpidr_round_trip() {
    let m = run_a64(
        |m| m.cpu.xregs[0] = 0xdead,
        &[MSR_TPIDR_EL0, MRS_TPIDR_EL0 | 5],
    );
    assert_eq!(m.cpu.tpidr_el0, 0xdead);
    assert_eq!(m.x(5), 0xdead);
}

#[test]
fn test_el0_sysreg_trap() {
    let mut m = Machine::new(&[MRS_SCTLR | 3]);
    m.cpu.el = 0;
    m.cpu.spsel = 0;
    let sctlr = sysreg::SysRegEnc::new(3, 0, 1, 0, 0);
    assert_eq!(
        m.run(),
        ExitReason::Exception {
            kind: ExceptionKind::SysRegTrap,
            syndrome: sysreg::syn_aa64_sysregtrap(sctlr, 3, true),
            pc: CODE,
        }
    );
}

#[test]
fn test_dc_zva_zeroes_one_block() {
    let mut m = Machine::new(&[dc_zva(1), MRS_DCZID | 2, brk(0)]);
    for off in (0..0xc0).step_by(8) {
        m.mem.store(DATA + off, 8, u64::MAX).unwrap();
    }
    m.cpu.xregs[1] = DATA + 0x48;
    m.run_to_brk();
    for off in (0x40..0x80).step_by(8) {
        assert_eq!(m.mem.load(DATA + off, 8).unwrap(), 0, "{off:#x}");
    }
    assert_eq!(m.mem.load(DATA + 0x38, 8).unwrap(), u64::MAX);
    assert_eq!(m.mem.load(DATA + 0x80, 8).unwrap(), u64::MAX);
    // DCZID_EL0.BS: log2 of the block size in words.
    assert_eq!(m.x(2), 4);
}

#[test]
fn test_dc_zva_clears_monitor() {
    let m = run_a64(
        |m| {
            m.cpu.xregs[1] = DATA;
            m.cpu.xregs[3] = DATA + 0x100;
        },
        &[ldxr(2, 1), dc_zva(3), stxr(4, 2, 1)],
    );
    assert_eq!(m.x(4), 1);
}

#[test]
fn test_cache_maintenance_is_a_no_op() {
    let m = run_a64(
        |m| {
            m.cpu.xregs[0] = 7;
            m.cpu.xregs[1] = DATA;
        },
        &[
            dc_civac(1),
            ic_ivau(1),
            IC_IALLU,
            TLBI_VMALLE1IS,
            add_imm(0, 0, 1),
        ],
    );
    assert_eq!(m.x(0), 8);
}

#[test]
fn test_el0_maintenance_permissions() {
    // Data cache clean and zero are open to EL0.
    let mut m = Machine::new(&[dc_civac(1), dc_zva(1), brk(0)]);
    m.cpu.el = 0;
    m.cpu.spsel = 0;
    m.cpu.xregs[1] = DATA;
    m.mem.store(DATA, 8, 0xff).unwrap();
    m.run_to_brk();
    assert_eq!(m.mem.load(DATA, 8).unwrap(), 0);

    // TLB maintenance is not.
    let mut m = Machine::new(&[TLBI_VMALLE1IS]);
    m.cpu.el = 0;
    m.cpu.spsel = 0;
    let tlbi = sysreg::SysRegEnc::new(1, 0, 8, 3, 0);
    assert_eq!(
        m.run(),
        ExitReason::Exception {
            kind: ExceptionKind::SysRegTrap,
            syndrome: sysreg::syn_aa64_sysregtrap(tlbi, 31, false),
            pc: CODE,
        }
    );
}

#[test]
fn test_sctlr_write_enables_alignment_checks() {
    let mut m = Machine::new(&[MSR_SCTLR, ldr(2, 1, 0), brk(0)]);
    m.cpu.xregs[0] = SCTLR_A;
    m.cpu.xregs[1] = DATA + 4;
    assert_eq!(m.run(), ExitReason::Halt);
    assert_eq!(m.cpu.sctlr_el1, SCTLR_A);
    assert_eq!(m.fault, Some(Fault::Misaligned { addr: DATA + 4 }));
}

#[test]
fn test_eret_to_el0() {
    let mut code = vec![ERET];
    code.resize(0x40, NOP);
    code.push(brk(0));
    let mut m = Machine::new(&code);
    m.cpu.elr_el1 = CODE + 0x100;
    m.cpu.spsr_el1 = 0x2000_0000; // EL0t, C set
    assert_eq!(m.run_to_brk(), CODE + 0x100);
    assert_eq!(m.cpu.el, 0);
    assert_eq!(m.cpu.spsel, 0);
    assert_eq!(m.cpu.nzcv(), 0x2000_0000);
}

#[test]
fn test_eret_at_el0_is_undefined() {
    let mut m = Machine::new(&[ERET]);
    m.cpu.el = 0;
    m.cpu.spsel = 0;
    match m.run() {
        ExitReason::Exception { kind, .. } => {
            assert_eq!(kind, ExceptionKind::Undefined);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_feature_absent_traps() {
    let mut m =
        Machine::with_cfg(A64Cfg::ARMV8_0, &[movz(0, 1, 0), ldadd(2, 3, 1)]);
    m.cpu.xregs[1] = DATA;
    assert_eq!(
        m.run(),
        ExitReason::Exception {
            kind: ExceptionKind::FeatureTrap,
            syndrome: sysreg::syn_feature_trap(InsnClass::AtomicMemOp.id()),
            pc: CODE + 4,
        }
    );
    assert_eq!(m.x(0), 1);
    assert_eq!(m.mem.load(DATA, 8).unwrap(), 0);
}

#[test]
fn test_single_step_matches_blocks() {
    let prog = [
        movz(0, 5, 0),
        add_imm(1, 1, 3),
        subs_imm(0, 0, 1),
        b_cond(NE, -8),
        brk(0),
    ];
    let mut blocks = Machine::new(&prog);
    blocks.run_to_brk();
    let mut steps = Machine::new(&prog).single_step();
    steps.run_to_brk();
    assert_eq!(blocks.cpu.xregs, steps.cpu.xregs);
    assert_eq!(blocks.cpu.nzcv(), steps.cpu.nzcv());
}

#[test]
fn test_nop_and_barriers() {
    let m = run_a64(|_| {}, &[NOP, ISB, DMB_ISH, movz(0, 3, 0)]);
    assert_eq!(m.x(0), 3);
}
