//! Execution engine: translation-unit cache, block builder and the
//! CPU execution loop.
//!
//! Drives the lookup → translate → execute cycle. Finalized blocks
//! live in a shared [`TbStore`]; each vCPU keeps its own jump cache
//! and chains blocks through their direct exits. Running the IR of a
//! block is delegated to an [`Executor`].
//!
//! Reference: `~/qemu/accel/tcg/cpu-exec.c`,
//! `~/qemu/accel/tcg/translate-all.c`.

pub mod builder;
pub mod exec_loop;
pub mod tb_store;

pub use builder::{BuildState, TbBuilder};
pub use exec_loop::{cpu_exec_loop, ExitReason};
pub use tb_store::TbStore;

use std::sync::Arc;

use dbt_core::{ExceptionKind, JumpCache, TranslationBlock};
use dbt_frontend::{TbLimits, TranslateError};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ExecError {
    #[error(transparent)]
    Translate(#[from] TranslateError),
    #[error("block builder is {found:?}, expected {expected:?}")]
    State {
        expected: BuildState,
        found: BuildState,
    },
}

/// How a block handed control back to the execution loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TbExit {
    /// `exit_tb` after `goto_tb slot`: pc holds the direct target.
    Chain { slot: usize },
    /// `exit_tb` without a chainable slot: full lookup needed.
    NoChain,
    /// A `raise` op ended the block.
    Raise {
        kind: ExceptionKind,
        syndrome: u32,
        pc: u64,
    },
    /// The executor wants the loop to stop.
    Halt,
}

/// Runs the IR of one block against guest CPU state.
pub trait Executor<C> {
    fn exec_tb(&mut self, cpu: &mut C, tb: &TranslationBlock) -> TbExit;
}

/// Per-vCPU execution state over a shared block store.
pub struct ExecEnv {
    pub store: Arc<TbStore>,
    pub jump_cache: JumpCache,
    pub limits: TbLimits,
}

impl ExecEnv {
    pub fn new(store: Arc<TbStore>) -> Self {
        Self::with_limits(store, TbLimits::default())
    }

    pub fn with_limits(store: Arc<TbStore>, limits: TbLimits) -> Self {
        Self {
            store,
            jump_cache: JumpCache::new(),
            limits,
        }
    }
}
