//! Block builder: one translation request from key to published
//! block.
//!
//! `Building` runs the frontend into a private IR context,
//! `Terminated` holds a complete block, `Finalized` means it was
//! published. A fetch fault leaves nothing behind: the private
//! context is cleared and the store is never touched.

use dbt_core::{Context, TbId, TbKey, TranslationBlock};
use dbt_frontend::{GuestCpu, GuestMemory, TbLimits, TbOutput};
use tracing::debug;

use crate::{ExecError, TbStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    Building,
    Terminated,
    Finalized,
}

pub struct TbBuilder {
    key: TbKey,
    limits: TbLimits,
    state: BuildState,
    ir: Context,
    out: Option<TbOutput>,
}

impl TbBuilder {
    pub fn new(key: TbKey, limits: TbLimits) -> Self {
        Self {
            key,
            limits,
            state: BuildState::Building,
            ir: Context::new(),
            out: None,
        }
    }

    pub fn key(&self) -> TbKey {
        self.key
    }

    pub fn state(&self) -> BuildState {
        self.state
    }

    /// IR emitted so far.
    pub fn ir(&self) -> &Context {
        &self.ir
    }

    fn expect(&self, expected: BuildState) -> Result<(), ExecError> {
        if self.state != expected {
            return Err(ExecError::State {
                expected,
                found: self.state,
            });
        }
        Ok(())
    }

    /// Translate the block. On success the builder is `Terminated`.
    pub fn build<C: GuestCpu + ?Sized>(
        &mut self,
        cpu: &C,
        mem: &dyn GuestMemory,
    ) -> Result<&TbOutput, ExecError> {
        self.expect(BuildState::Building)?;
        match cpu.gen_code(&mut self.ir, self.key, self.limits, mem) {
            Ok(out) => {
                self.state = BuildState::Terminated;
                Ok(self.out.insert(out))
            }
            Err(e) => {
                self.ir.reset();
                debug!(pc = self.key.pc, error = %e, "tb build aborted");
                Err(e.into())
            }
        }
    }

    /// Snapshot the IR into a block and publish it. Returns the id
    /// the store holds for this key, which is an earlier block's when
    /// another builder won the race.
    pub fn finalize(&mut self, store: &TbStore) -> Result<TbId, ExecError> {
        self.expect(BuildState::Terminated)?;
        let Some(out) = self.out.take() else {
            return Err(ExecError::State {
                expected: BuildState::Terminated,
                found: self.state,
            });
        };
        let tb = TranslationBlock::new(
            self.key,
            out.phys_pc,
            out.size,
            out.icount,
            out.exits,
            self.ir.to_body(),
        )
        .with_data(out.data);
        let id = store.insert(tb);
        self.state = BuildState::Finalized;
        Ok(id)
    }
}
