use std::collections::HashMap;

use crate::label::Label;
use crate::op::{Op, OpIdx};
use crate::temp::{Temp, TempIdx};
use crate::types::{Type, TYPE_COUNT};

/// Maximum number of guest instructions per TB.
pub const MAX_INSNS: usize = 512;

/// Per-translation IR context.
///
/// Maps to QEMU's `TCGContext`. Holds all state needed while
/// translating a single translation block: temporaries, IR ops and
/// labels. One context is owned by one in-progress build and is never
/// shared between threads.
pub struct Context {
    temps: Vec<Temp>,
    ops: Vec<Op>,
    labels: Vec<Label>,

    /// Number of global temps (always at the front of `temps`).
    nb_globals: u32,

    /// Per-type map from constant value to TempIdx, avoiding
    /// duplicate const temps.
    const_table: [HashMap<u64, TempIdx>; TYPE_COUNT],
}

/// Immutable IR of a finalized translation block.
///
/// Self-contained: carries every temp the ops refer to, globals
/// included, so a consumer never needs the building `Context`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IrBody {
    pub temps: Vec<Temp>,
    pub ops: Vec<Op>,
    pub nb_globals: u32,
    pub nb_labels: u32,
}

impl IrBody {
    pub fn temp(&self, idx: TempIdx) -> &Temp {
        &self.temps[idx.0 as usize]
    }
}

impl Context {
    pub fn new() -> Self {
        Self {
            temps: Vec::with_capacity(128),
            ops: Vec::with_capacity(256),
            labels: Vec::with_capacity(16),
            nb_globals: 0,
            const_table: Default::default(),
        }
    }

    /// Reset context for translating a new TB. Preserves globals.
    pub fn reset(&mut self) {
        self.temps.truncate(self.nb_globals as usize);
        self.ops.clear();
        self.labels.clear();
        for table in &mut self.const_table {
            table.clear();
        }
    }

    // -- Temp allocation --

    pub fn nb_globals(&self) -> u32 {
        self.nb_globals
    }

    pub fn nb_temps(&self) -> u32 {
        self.temps.len() as u32
    }

    /// Allocate a new EBB-scoped temporary.
    pub fn new_temp(&mut self, ty: Type) -> TempIdx {
        let idx = TempIdx(self.temps.len() as u32);
        self.temps.push(Temp::new_ebb(idx, ty));
        idx
    }

    /// Allocate a new TB-scoped temporary.
    pub fn new_temp_tb(&mut self, ty: Type) -> TempIdx {
        let idx = TempIdx(self.temps.len() as u32);
        self.temps.push(Temp::new_tb(idx, ty));
        idx
    }

    /// Get or create a constant temp (deduplicated per type).
    pub fn new_const(&mut self, ty: Type, val: u64) -> TempIdx {
        let val = val & ty.mask();
        let type_idx = ty as usize;
        if let Some(&existing) = self.const_table[type_idx].get(&val) {
            return existing;
        }
        let idx = TempIdx(self.temps.len() as u32);
        self.temps.push(Temp::new_const(idx, ty, val));
        self.const_table[type_idx].insert(val, idx);
        idx
    }

    /// Register a global temp (must be called before any
    /// non-global allocation).
    /// The `base` is the TempIdx of the env pointer (a fixed temp).
    pub fn new_global(
        &mut self,
        ty: Type,
        base: TempIdx,
        offset: i64,
        name: &'static str,
    ) -> TempIdx {
        assert_eq!(
            self.temps.len() as u32,
            self.nb_globals,
            "globals must be registered before locals"
        );
        let idx = TempIdx(self.temps.len() as u32);
        self.temps
            .push(Temp::new_global(idx, ty, base, offset, name));
        self.nb_globals += 1;
        idx
    }

    /// Register the env pointer temp (must be called before any
    /// non-global allocation).
    pub fn new_fixed(&mut self, ty: Type, name: &'static str) -> TempIdx {
        assert_eq!(
            self.temps.len() as u32,
            self.nb_globals,
            "fixed temps must be registered before locals"
        );
        let idx = TempIdx(self.temps.len() as u32);
        self.temps.push(Temp::new_fixed(idx, ty, name));
        self.nb_globals += 1;
        idx
    }

    pub fn temp(&self, idx: TempIdx) -> &Temp {
        &self.temps[idx.0 as usize]
    }

    pub fn temp_mut(&mut self, idx: TempIdx) -> &mut Temp {
        &mut self.temps[idx.0 as usize]
    }

    pub fn temps(&self) -> &[Temp] {
        &self.temps
    }

    /// Iterate over global temps only.
    pub fn globals(&self) -> &[Temp] {
        &self.temps[..self.nb_globals as usize]
    }

    // -- Op emission --

    pub fn emit_op(&mut self, op: Op) -> OpIdx {
        let idx = op.idx;
        self.ops.push(op);
        idx
    }

    pub fn next_op_idx(&self) -> OpIdx {
        OpIdx(self.ops.len() as u32)
    }

    pub fn op(&self, idx: OpIdx) -> &Op {
        &self.ops[idx.0 as usize]
    }

    pub fn op_mut(&mut self, idx: OpIdx) -> &mut Op {
        &mut self.ops[idx.0 as usize]
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    pub fn num_ops(&self) -> usize {
        self.ops.len()
    }

    // -- Labels --

    pub fn new_label(&mut self) -> u32 {
        let id = self.labels.len() as u32;
        self.labels.push(Label::new(id));
        id
    }

    pub fn label(&self, id: u32) -> &Label {
        &self.labels[id as usize]
    }

    pub fn label_mut(&mut self, id: u32) -> &mut Label {
        &mut self.labels[id as usize]
    }

    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    /// Snapshot the emitted IR into an owned body.
    ///
    /// Panics if a branch targets a label that was never placed;
    /// the frontend must never produce such a stream.
    pub fn to_body(&self) -> IrBody {
        if let Some(l) = self.labels.iter().find(|l| l.is_dangling()) {
            panic!("branch to unplaced label L{}", l.id);
        }
        IrBody {
            temps: self.temps.clone(),
            ops: self.ops.clone(),
            nb_globals: self.nb_globals,
            nb_labels: self.labels.len() as u32,
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}
