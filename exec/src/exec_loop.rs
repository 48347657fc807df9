use std::sync::Arc;

use dbt_core::{ExceptionKind, TbId, TranslationBlock};
use dbt_frontend::{Fault, GuestCpu, GuestMemory, TranslateError};
use tracing::debug;

use crate::{ExecEnv, ExecError, Executor, TbBuilder, TbExit};

/// Reason the execution loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// A block raised; pc is the faulting instruction.
    Exception {
        kind: ExceptionKind,
        syndrome: u32,
        pc: u64,
    },
    /// The next block could not be read from guest memory.
    FetchFault { addr: u64, fault: Fault },
    /// The executor asked to stop.
    Halt,
}

/// Main CPU execution loop.
///
/// Repeatedly finds (or translates) the block for the CPU's current
/// key and runs it. A direct exit is linked to its destination once
/// the destination's key matches the exit edge; later runs follow the
/// link without a lookup.
pub fn cpu_exec_loop<C, E>(
    env: &mut ExecEnv,
    cpu: &mut C,
    exec: &mut E,
    mem: &dyn GuestMemory,
) -> ExitReason
where
    C: GuestCpu,
    E: Executor<C>,
{
    let mut next_tb_hint: Option<(TbId, Arc<TranslationBlock>)> = None;

    loop {
        let (id, tb) = match next_tb_hint.take() {
            Some(found) => found,
            None => match tb_find(env, cpu, mem) {
                Ok(found) => found,
                Err(reason) => return reason,
            },
        };

        match exec.exec_tb(cpu, &tb) {
            TbExit::Chain { slot } => {
                // Follow an existing link.
                if let Some(dst) = env.store.linked(id, slot) {
                    if let Some(dst_tb) = env.store.get(dst) {
                        if dst_tb.is_valid() {
                            next_tb_hint = Some((dst, dst_tb));
                            continue;
                        }
                    }
                }
                let (dst, dst_tb) = match tb_find(env, cpu, mem) {
                    Ok(found) => found,
                    Err(reason) => return reason,
                };
                env.store.add_jump(id, slot, dst);
                next_tb_hint = Some((dst, dst_tb));
            }
            TbExit::NoChain => {}
            TbExit::Raise { kind, syndrome, pc } => {
                debug!(pc, kind = kind.name(), syndrome, "tb raise");
                return ExitReason::Exception { kind, syndrome, pc };
            }
            TbExit::Halt => return ExitReason::Halt,
        }
    }
}

/// Find the block for the CPU's current key, translating on a miss.
fn tb_find<C: GuestCpu>(
    env: &mut ExecEnv,
    cpu: &C,
    mem: &dyn GuestMemory,
) -> Result<(TbId, Arc<TranslationBlock>), ExitReason> {
    let key = cpu.tb_key();

    // Fast path: jump cache
    if let Some(id) = env.jump_cache.lookup(key.pc) {
        if let Some(tb) = env.store.get(id) {
            if tb.is_valid() && tb.key == key {
                return Ok((id, tb));
            }
        }
    }

    // Slow path: store, then translate. A concurrent flush can make
    // a fresh id stale, in which case we go round again.
    loop {
        let id = match env.store.lookup(key) {
            Some(id) => id,
            None => tb_gen_code(env, cpu, mem)?,
        };
        if let Some(tb) = env.store.get(id) {
            if tb.is_valid() && tb.key == key {
                env.jump_cache.insert(key.pc, id);
                return Ok((id, tb));
            }
        }
    }
}

/// Translate and publish the block for the CPU's current key.
fn tb_gen_code<C: GuestCpu>(
    env: &ExecEnv,
    cpu: &C,
    mem: &dyn GuestMemory,
) -> Result<TbId, ExitReason> {
    let fault = |e: ExecError| match e {
        ExecError::Translate(TranslateError::FetchFault { addr, fault }) => {
            ExitReason::FetchFault { addr, fault }
        }
        ExecError::State { .. } => unreachable!("{e}"),
    };
    let mut builder = TbBuilder::new(cpu.tb_key(), env.limits);
    builder.build(cpu, mem).map_err(fault)?;
    builder.finalize(&env.store).map_err(fault)
}
