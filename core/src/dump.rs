//! IR dump: human-readable text listing of IR ops.
//!
//! Mirrors QEMU's `tcg_dump_ops()` in `tcg/tcg.c`.

use std::fmt::Write as FmtWrite;
use std::io::Write;

use crate::context::IrBody;
use crate::excp::ExceptionKind;
use crate::op::Op;
use crate::opcode::Opcode;
use crate::temp::{Temp, TempIdx, TempKind};
use crate::types::{Cond, MemOp, RmwOp, Type};

/// Format a condition code as a short name.
fn cond_name(c: u32) -> &'static str {
    match Cond::from_u8(c as u8) {
        Some(Cond::Never) => "never",
        Some(Cond::Always) => "always",
        Some(Cond::Eq) => "eq",
        Some(Cond::Ne) => "ne",
        Some(Cond::Lt) => "lt",
        Some(Cond::Ge) => "ge",
        Some(Cond::Le) => "le",
        Some(Cond::Gt) => "gt",
        Some(Cond::Ltu) => "ltu",
        Some(Cond::Geu) => "geu",
        Some(Cond::Leu) => "leu",
        Some(Cond::Gtu) => "gtu",
        Some(Cond::TstEq) => "tsteq",
        Some(Cond::TstNe) => "tstne",
        None => "???",
    }
}

fn memop_name(bits: u32) -> String {
    let m = MemOp::new(bits);
    let mut s = String::with_capacity(16);
    s.push(if m.is_signed() { 's' } else { 'u' });
    s.push(match m.size() {
        0 => 'b',
        1 => 'w',
        2 => 'l',
        _ => 'q',
    });
    if m.align_bytes() > 1 {
        let _ = write!(s, "+al{}", m.align_bytes());
    }
    match m.atom() {
        MemOp::ATOM_SINGLE => s.push_str("+atom"),
        MemOp::ATOM_PAIR => s.push_str("+pair"),
        _ => {}
    }
    match m.ordering() {
        MemOp::ORD_ACQUIRE => s.push_str("+acq"),
        MemOp::ORD_RELEASE => s.push_str("+rel"),
        MemOp::ORD_ACQ_REL => s.push_str("+acqrel"),
        _ => {}
    }
    if m.is_exclusive() {
        s.push_str("+excl");
    }
    if m.is_unpriv() {
        s.push_str("+unpriv");
    }
    s
}

/// Format a temp reference for display.
fn fmt_temp(temps: &[Temp], nb_globals: u32, idx: TempIdx, buf: &mut String) {
    let i = idx.0 as usize;
    let Some(t) = temps.get(i) else {
        let v = idx.0;
        let _ = write!(buf, "$0x{v:x}");
        return;
    };
    match t.kind {
        TempKind::Const => {
            let v = t.val;
            let _ = write!(buf, "$0x{v:x}");
        }
        TempKind::Global | TempKind::Fixed => match t.name {
            Some(name) => buf.push_str(name),
            None => {
                let _ = write!(buf, "g{i}");
            }
        },
        TempKind::Ebb | TempKind::Tb => {
            let local = i as u32 - nb_globals;
            let _ = write!(buf, "tmp{local}");
        }
    }
}

/// Build the opcode name with type suffix for polymorphic ops.
fn op_name(op: &Op) -> String {
    let def = op.opc.def();
    if op.opc.is_int_polymorphic() {
        let suffix = match op.op_type {
            Type::I32 => "_i32",
            Type::I64 => "_i64",
        };
        let base = def.name;
        format!("{base}{suffix}")
    } else {
        def.name.to_string()
    }
}

/// Dump all IR ops in `body` to the given writer.
pub fn dump_ops(body: &IrBody, w: &mut impl Write) -> std::io::Result<()> {
    dump_ops_with(body, w, |_, _| Ok(()))
}

/// Dump IR ops with an annotation callback for `InsnStart`.
///
/// `insn_anno` is called at each guest instruction boundary with
/// `(pc, writer)`; use it to print the instruction word or its
/// disassembly on the `---- 0x...` header line.
pub fn dump_ops_with(
    body: &IrBody,
    w: &mut impl Write,
    insn_anno: impl Fn(u64, &mut dyn Write) -> std::io::Result<()>,
) -> std::io::Result<()> {
    let mut buf = String::with_capacity(128);
    let temps = &body.temps;
    let nb_globals = body.nb_globals;

    for op in &body.ops {
        buf.clear();
        match op.opc {
            Opcode::InsnStart => {
                let pc = op.carg64(0);
                write!(w, " ---- 0x{pc:016x}")?;
                insn_anno(pc, w)?;
                writeln!(w)?;
                writeln!(w, " insn_start $0x{pc:x}")?;
                continue;
            }
            Opcode::SetLabel => {
                let label_id = op.carg(0);
                writeln!(w, " L{label_id}:")?;
                continue;
            }
            Opcode::Raise => {
                let kind = ExceptionKind::from_u32(op.carg(0))
                    .map_or("???", ExceptionKind::name);
                let syn = op.carg(1);
                let pc = op.carg64(2);
                writeln!(w, " raise {kind}, $0x{syn:x}, pc=0x{pc:x}")?;
                continue;
            }
            _ => {}
        }

        // Generic op formatting
        let name = op_name(op);
        write!(w, " {name}")?;

        let oargs = op.oargs();
        for (i, &a) in oargs.iter().enumerate() {
            if i > 0 {
                write!(w, ",")?;
            }
            buf.clear();
            fmt_temp(temps, nb_globals, a, &mut buf);
            write!(w, " {buf}")?;
        }

        let iargs = op.iargs();
        let has_oargs = !oargs.is_empty();
        for (i, &a) in iargs.iter().enumerate() {
            if has_oargs || i > 0 {
                write!(w, ",")?;
            }
            buf.clear();
            fmt_temp(temps, nb_globals, a, &mut buf);
            write!(w, " {buf}")?;
        }

        // Constant args: special handling per opcode
        let cargs = op.cargs();
        match op.opc {
            Opcode::BrCond => {
                let cond = cond_name(cargs[0].0);
                let label = cargs[1].0;
                write!(w, ", {cond}, L{label}")?;
            }
            Opcode::SetCond | Opcode::NegSetCond | Opcode::MovCond => {
                let cond = cond_name(cargs[0].0);
                write!(w, ", {cond}")?;
            }
            Opcode::Br => {
                let label = cargs[0].0;
                write!(w, " L{label}")?;
            }
            Opcode::Call => {
                let helper = cargs[0].0;
                write!(w, ", helper#{helper}")?;
            }
            Opcode::QemuLd
            | Opcode::QemuSt
            | Opcode::AtomicCmpxchg
            | Opcode::AtomicCmpxchg2 => {
                write!(w, ", {}", memop_name(cargs[0].0))?;
            }
            Opcode::AtomicRmw => {
                let rmw = RmwOp::from_u8(cargs[1].0 as u8)
                    .map_or("???", RmwOp::name);
                write!(w, ", {}, {rmw}", memop_name(cargs[0].0))?;
            }
            _ => {
                let has_prev = !oargs.is_empty() || !iargs.is_empty();
                for (i, &c) in cargs.iter().enumerate() {
                    if has_prev || i > 0 {
                        write!(w, ",")?;
                    }
                    let v = c.0;
                    write!(w, " $0x{v:x}")?;
                }
            }
        }

        writeln!(w)?;
    }
    Ok(())
}
