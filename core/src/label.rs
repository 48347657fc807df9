/// A branch target label within a translation block.
///
/// Maps to QEMU's `TCGLabel`. Labels support forward references:
/// branches can reference a label before it is placed with
/// `set_label`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    pub id: u32,
    /// Whether this label has been placed (set_label emitted).
    pub present: bool,
    /// Number of branch ops that target this label.
    pub refs: u32,
}

impl Label {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            present: false,
            refs: 0,
        }
    }

    /// Record a branch to this label.
    pub fn add_ref(&mut self) {
        self.refs += 1;
    }

    /// Whether some branch targets this label but it was never placed.
    pub fn is_dangling(&self) -> bool {
        self.refs > 0 && !self.present
    }
}
