use std::io::Write;

use dbt_core::dump::{dump_ops, dump_ops_with};
use dbt_core::{Cond, Context, ExceptionKind, IrBody, MemOp, RmwOp, Type};

fn dump(body: &IrBody) -> String {
    let mut out = Vec::new();
    dump_ops(body, &mut out).expect("dump failed");
    String::from_utf8(out).expect("dump is utf-8")
}

fn lines(body: &IrBody) -> Vec<String> {
    dump(body).lines().map(str::to_owned).collect()
}

fn ctx_with_regs() -> Context {
    let mut ctx = Context::new();
    let env = ctx.new_fixed(Type::I64, "env");
    ctx.new_global(Type::I64, env, 0, "x0");
    ctx.new_global(Type::I64, env, 8, "x1");
    ctx
}

#[test]
fn dump_insn_start_header() {
    let mut ctx = ctx_with_regs();
    ctx.gen_insn_start(0x4000_1000);
    ctx.gen_exit_tb(2);
    assert_eq!(
        lines(&ctx.to_body()),
        [
            " ---- 0x0000000040001000",
            " insn_start $0x40001000",
            " exit_tb $0x2",
        ]
    );
}

#[test]
fn dump_annotation_callback() {
    let mut ctx = ctx_with_regs();
    ctx.gen_insn_start(0x1000);
    let body = ctx.to_body();
    let mut out = Vec::new();
    dump_ops_with(&body, &mut out, |pc, w| write!(w, "  @{pc:x}"))
        .expect("dump failed");
    let text = String::from_utf8(out).expect("dump is utf-8");
    assert!(text.starts_with(" ---- 0x0000000000001000  @1000\n"));
}

#[test]
fn dump_names_globals_consts_and_locals() {
    let mut ctx = ctx_with_regs();
    let x0 = ctx.globals()[1].idx;
    let x1 = ctx.globals()[2].idx;
    let t = ctx.new_temp(Type::I64);
    let five = ctx.new_const(Type::I64, 5);
    ctx.gen_add(Type::I64, t, x1, five);
    ctx.gen_mov(Type::I64, x0, t);
    assert_eq!(
        lines(&ctx.to_body()),
        [" add_i64 tmp0, x1, $0x5", " mov_i64 x0, tmp0"]
    );
}

#[test]
fn dump_control_flow() {
    let mut ctx = ctx_with_regs();
    let x0 = ctx.globals()[1].idx;
    let x1 = ctx.globals()[2].idx;
    let l = ctx.new_label();
    ctx.gen_brcond(Type::I64, x0, x1, Cond::Ltu, l);
    ctx.gen_br(l);
    ctx.gen_set_label(l);
    ctx.gen_goto_tb(0);
    assert_eq!(
        lines(&ctx.to_body()),
        [
            " brcond_i64 x0, x1, ltu, L0",
            " br L0",
            " L0:",
            " goto_tb $0x0",
        ]
    );
}

#[test]
fn dump_raise() {
    let mut ctx = ctx_with_regs();
    ctx.gen_raise(ExceptionKind::Svc, 0x5600_0001, 0x1_0000_2000);
    assert_eq!(
        lines(&ctx.to_body()),
        [" raise svc, $0x56000001, pc=0x100002000"]
    );
}

#[test]
fn dump_memops() {
    let mut ctx = ctx_with_regs();
    let x0 = ctx.globals()[1].idx;
    let x1 = ctx.globals()[2].idx;
    ctx.gen_qemu_ld(Type::I64, x0, x1, MemOp::uq().aligned());
    let excl = MemOp::ul()
        .aligned()
        .with(MemOp::ATOM_SINGLE | MemOp::ORD_ACQUIRE | MemOp::EXCL);
    ctx.gen_qemu_ld(Type::I64, x0, x1, excl);
    ctx.gen_atomic_rmw(Type::I64, x0, x1, x0, MemOp::uq(), RmwOp::Add);
    let text = lines(&ctx.to_body());
    assert_eq!(text[0], " qemu_ld_i64 x0, x1, uq+al8");
    assert_eq!(text[1], " qemu_ld_i64 x0, x1, ul+al4+atom+acq+excl");
    assert!(text[2].starts_with(" atomic_rmw_i64 x0, x1, x0, uq, "));
}
