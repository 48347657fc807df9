//! AArch64 frontend: A64 instruction translation at EL0/EL1.

pub mod cpu;
pub mod decode;
pub mod features;
pub mod helper;
mod insn_decode;
pub mod sysreg;
pub mod table;
mod trans;

use crate::cc::CcOp;
use crate::{
    DisasContextBase, DisasJumpType, GuestMemory, TbLimits, TranslateError,
    TranslatorOps,
};
use cpu::{
    xreg_offset, TbFlags, CC_DST_OFFSET, CC_OP_OFFSET, CC_SRC2_OFFSET,
    CC_SRC_OFFSET, EXCLUSIVE_ADDR_OFFSET, EXCLUSIVE_HIGH_OFFSET,
    EXCLUSIVE_VAL_OFFSET, NUM_XREGS, PC_OFFSET, SP_EL0_OFFSET,
    SP_EL1_OFFSET,
};
use decode::Decoded;
use features::A64Features;
use tracing::{debug, trace};

use dbt_core::{Context, ExceptionKind, ExitEdge, TbKey, TempIdx, Type};

const XREG_NAMES: [&str; NUM_XREGS] = [
    "x0", "x1", "x2", "x3", "x4", "x5", "x6", "x7", "x8", "x9", "x10",
    "x11", "x12", "x13", "x14", "x15", "x16", "x17", "x18", "x19", "x20",
    "x21", "x22", "x23", "x24", "x25", "x26", "x27", "x28", "x29", "x30",
];

// ---------------------------------------------------------------
// Disassembly context
// ---------------------------------------------------------------

/// Exception found during translation, raised when the block ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingException {
    pub kind: ExceptionKind,
    pub syndrome: u32,
    pub pc: u64,
}

/// A64 disassembly context (extends `DisasContextBase`).
pub struct A64DisasContext {
    pub base: DisasContextBase,
    /// Key of the block being built; exit edges inherit its context.
    pub key: TbKey,
    pub flags: TbFlags,
    pub features: A64Features,

    pub env: TempIdx,
    pub xregs: [TempIdx; NUM_XREGS],
    pub sp_el0: TempIdx,
    pub sp_el1: TempIdx,
    pub pc: TempIdx,
    pub cc_op: TempIdx,
    pub cc_dst: TempIdx,
    pub cc_src: TempIdx,
    pub cc_src2: TempIdx,
    pub excl_addr: TempIdx,
    pub excl_val: TempIdx,
    pub excl_high: TempIdx,

    /// Address of the instruction being translated.
    pub pc_curr: u64,
    /// Raw word of the instruction being translated.
    pub insn: u32,
    /// Flag tag known to be in `cc_op` at this point of the block.
    cc_op_static: Option<CcOp>,
    /// The monitor may be armed, so any plain access must close it.
    excl_maybe_armed: bool,
    /// Exception worklist, flushed by `tb_stop`.
    pending: Vec<PendingException>,
}

impl A64DisasContext {
    pub fn new(key: TbKey, limits: TbLimits) -> Self {
        Self {
            base: DisasContextBase::new(key.pc, limits),
            key,
            flags: TbFlags::from_bits(key.flags),
            features: A64Features::from_bits_truncate(key.features),
            env: TempIdx(0),
            xregs: [TempIdx(0); NUM_XREGS],
            sp_el0: TempIdx(0),
            sp_el1: TempIdx(0),
            pc: TempIdx(0),
            cc_op: TempIdx(0),
            cc_dst: TempIdx(0),
            cc_src: TempIdx(0),
            cc_src2: TempIdx(0),
            excl_addr: TempIdx(0),
            excl_val: TempIdx(0),
            excl_high: TempIdx(0),
            pc_curr: key.pc,
            insn: 0,
            cc_op_static: None,
            excl_maybe_armed: true,
            pending: Vec::new(),
        }
    }

    /// Queue an exception for the current instruction and end the
    /// block.
    fn queue_exception(&mut self, kind: ExceptionKind, syndrome: u32) {
        self.pending.push(PendingException {
            kind,
            syndrome,
            pc: self.pc_curr,
        });
        self.base.is_jmp = DisasJumpType::NoReturn;
    }

    pub fn pending(&self) -> &[PendingException] {
        &self.pending
    }
}

// ---------------------------------------------------------------
// TranslatorOps implementation
// ---------------------------------------------------------------

/// Marker type for the A64 translator.
pub struct A64Translator;

impl TranslatorOps for A64Translator {
    type DisasContext = A64DisasContext;

    const INSN_LEN: u32 = 4;

    fn init_disas_context(ctx: &mut A64DisasContext, ir: &mut Context) {
        ctx.env = ir.new_fixed(Type::I64, "env");
        let env = ctx.env;
        for (i, &name) in XREG_NAMES.iter().enumerate() {
            ctx.xregs[i] =
                ir.new_global(Type::I64, env, xreg_offset(i), name);
        }
        ctx.sp_el0 = ir.new_global(Type::I64, env, SP_EL0_OFFSET, "sp_el0");
        ctx.sp_el1 = ir.new_global(Type::I64, env, SP_EL1_OFFSET, "sp_el1");
        ctx.pc = ir.new_global(Type::I64, env, PC_OFFSET, "pc");

        ctx.cc_op = ir.new_global(Type::I64, env, CC_OP_OFFSET, "cc_op");
        ctx.cc_dst = ir.new_global(Type::I64, env, CC_DST_OFFSET, "cc_dst");
        ctx.cc_src = ir.new_global(Type::I64, env, CC_SRC_OFFSET, "cc_src");
        ctx.cc_src2 =
            ir.new_global(Type::I64, env, CC_SRC2_OFFSET, "cc_src2");

        ctx.excl_addr = ir.new_global(
            Type::I64,
            env,
            EXCLUSIVE_ADDR_OFFSET,
            "exclusive_addr",
        );
        ctx.excl_val = ir.new_global(
            Type::I64,
            env,
            EXCLUSIVE_VAL_OFFSET,
            "exclusive_val",
        );
        ctx.excl_high = ir.new_global(
            Type::I64,
            env,
            EXCLUSIVE_HIGH_OFFSET,
            "exclusive_high",
        );
    }

    fn tb_start(ctx: &mut A64DisasContext, _ir: &mut Context) {
        if ctx.base.pc_first & 3 != 0 {
            ctx.queue_exception(
                ExceptionKind::PcAlignment,
                sysreg::syn_pcalignment(),
            );
        }
    }

    fn insn_start(ctx: &mut A64DisasContext, ir: &mut Context) {
        ir.gen_insn_start(ctx.base.pc_next);
        ctx.base.num_insns += 1;
    }

    fn translate_insn(
        ctx: &mut A64DisasContext,
        ir: &mut Context,
        mem: &dyn GuestMemory,
    ) -> Result<(), TranslateError> {
        let pc = ctx.base.pc_next;
        let word = mem
            .fetch_instruction(pc)
            .map_err(|fault| TranslateError::FetchFault { addr: pc, fault })?;
        ctx.pc_curr = pc;
        ctx.insn = word;
        ctx.base.pc_next = pc.wrapping_add(4);

        let decoded = decode::decode(word, ctx.features);
        trace!(
            pc,
            insn = word,
            pattern = table::lookup(word).map_or("-", |p| p.name),
            ?decoded,
            "a64 decode"
        );
        match decoded {
            Decoded::Insn(insn) => ctx.translate(ir, mem, insn)?,
            Decoded::Unallocated => ctx.queue_exception(
                ExceptionKind::Undefined,
                sysreg::syn_uncategorized(),
            ),
            Decoded::FeatureAbsent { class, .. } => ctx.queue_exception(
                ExceptionKind::FeatureTrap,
                sysreg::syn_feature_trap(class.id()),
            ),
        }
        Ok(())
    }

    fn tb_stop(ctx: &mut A64DisasContext, ir: &mut Context) {
        match ctx.base.is_jmp {
            DisasJumpType::NoReturn => {
                // Only the first queued exception can be taken; the
                // block ended at the instruction that queued it.
                if let Some(&exc) = ctx.pending.first() {
                    ir.gen_raise(exc.kind, exc.syndrome, exc.pc);
                    ctx.base.exits.push(ExitEdge::Exception {
                        kind: exc.kind,
                        syndrome: exc.syndrome,
                    });
                }
            }
            DisasJumpType::Next | DisasJumpType::TooMany => {
                ctx.gen_goto_tb(ir, 0, ctx.base.pc_next);
            }
            DisasJumpType::UpdateExit => {
                let next = ir.new_const(Type::I64, ctx.base.pc_next);
                ir.gen_mov(Type::I64, ctx.pc, next);
                ir.gen_exit_tb(dbt_core::TB_EXIT_NOCHAIN);
                ctx.base.exits.push(ExitEdge::Indirect);
            }
        }
        debug!(
            pc = ctx.base.pc_first,
            size = ctx.base.size(),
            icount = ctx.base.num_insns,
            exits = ctx.base.exits.len(),
            "a64 block translated"
        );
    }

    fn base(ctx: &A64DisasContext) -> &DisasContextBase {
        &ctx.base
    }

    fn base_mut(ctx: &mut A64DisasContext) -> &mut DisasContextBase {
        &mut ctx.base
    }
}
