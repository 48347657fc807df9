use crate::types::Type;

/// Lifetime/scope of an IR temporary.
///
/// Maps to QEMU's `TCGTempKind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TempKind {
    /// Live within a single extended basic block.
    Ebb,
    /// Live across the entire translation block.
    Tb,
    /// Global: persists across TBs, backed by a CPU state field.
    Global,
    /// The env pointer every global is addressed from.
    Fixed,
    /// Compile-time constant.
    Const,
}

/// Index into the Context's temp pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TempIdx(pub u32);

/// An IR temporary variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Temp {
    pub idx: TempIdx,
    pub ty: Type,
    pub kind: TempKind,
    /// For `Const` temps, the immediate value.
    pub val: u64,
    /// For `Global` temps, the base temp (env pointer) index.
    pub mem_base: Option<TempIdx>,
    /// For `Global` temps, the byte offset from mem_base into the
    /// CPU state.
    pub mem_offset: i64,
    /// Debug name (e.g. "pc", "x3").
    pub name: Option<&'static str>,
}

impl Temp {
    pub fn new_ebb(idx: TempIdx, ty: Type) -> Self {
        Self {
            idx,
            ty,
            kind: TempKind::Ebb,
            val: 0,
            mem_base: None,
            mem_offset: 0,
            name: None,
        }
    }

    pub fn new_tb(idx: TempIdx, ty: Type) -> Self {
        let mut t = Self::new_ebb(idx, ty);
        t.kind = TempKind::Tb;
        t
    }

    pub fn new_const(idx: TempIdx, ty: Type, val: u64) -> Self {
        let mut t = Self::new_ebb(idx, ty);
        t.kind = TempKind::Const;
        t.val = val;
        t
    }

    pub fn new_global(
        idx: TempIdx,
        ty: Type,
        base: TempIdx,
        offset: i64,
        name: &'static str,
    ) -> Self {
        Self {
            idx,
            ty,
            kind: TempKind::Global,
            val: 0,
            mem_base: Some(base),
            mem_offset: offset,
            name: Some(name),
        }
    }

    pub fn new_fixed(idx: TempIdx, ty: Type, name: &'static str) -> Self {
        let mut t = Self::new_ebb(idx, ty);
        t.kind = TempKind::Fixed;
        t.name = Some(name);
        t
    }

    pub fn is_const(&self) -> bool {
        self.kind == TempKind::Const
    }

    pub fn is_global(&self) -> bool {
        self.kind == TempKind::Global
    }

    pub fn is_fixed(&self) -> bool {
        self.kind == TempKind::Fixed
    }

    pub fn is_global_or_fixed(&self) -> bool {
        matches!(self.kind, TempKind::Global | TempKind::Fixed)
    }
}
