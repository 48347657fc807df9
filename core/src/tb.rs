use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::context::IrBody;
use crate::excp::ExceptionKind;

/// Stable index of a translation block inside its store.
pub type TbId = usize;

/// Cache key of a translation block: start pc plus every decode-time
/// invariant that can make the same bytes translate differently.
///
/// Two blocks with different keys never share a cache slot, and exit
/// edges refer to their targets by key, not by reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TbKey {
    /// Guest virtual pc where the block starts.
    pub pc: u64,
    /// Packed execution-state flags (privilege level, stack
    /// selection, alignment checking).
    pub flags: u32,
    /// Active optional-feature set.
    pub features: u32,
}

impl TbKey {
    pub const fn new(pc: u64, flags: u32, features: u32) -> Self {
        Self {
            pc,
            flags,
            features,
        }
    }

    /// Same context, different start address.
    pub const fn with_pc(self, pc: u64) -> Self {
        Self { pc, ..self }
    }
}

/// One way control can leave a translation block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitEdge {
    /// `goto_tb slot` to a statically known target; linkable.
    Direct { slot: u8, target: TbKey },
    /// Target computed at run time (register branch, context change).
    Indirect,
    /// A `raise` op ends the block.
    Exception { kind: ExceptionKind, syndrome: u32 },
}

/// `exit_tb` values. Slots 0 and 1 follow a `goto_tb` of the same
/// number; `TB_EXIT_NOCHAIN` asks the loop for a full lookup.
pub const TB_EXIT_IDX0: u32 = 0;
pub const TB_EXIT_IDX1: u32 = 1;
pub const TB_EXIT_NOCHAIN: u32 = 2;

/// Link state of a block, guarded by the block's own lock.
#[derive(Debug, Default)]
pub struct TbJmp {
    /// Outgoing links: block each `goto_tb` slot is chained to.
    pub jmp_dest: [Option<TbId>; 2],
    /// Incoming links: `(source block, slot)` pairs chained to us.
    pub jmp_list: Vec<(TbId, usize)>,
}

/// A finalized translation unit.
///
/// Maps to QEMU's `TranslationBlock`, except that the payload is the
/// IR itself rather than host code. Immutable once published apart
/// from `jmp` and `invalid`.
#[derive(Debug)]
pub struct TranslationBlock {
    pub key: TbKey,
    /// Size of guest code covered by this TB, in bytes.
    pub size: u32,
    /// Number of guest instructions in this TB.
    pub icount: u16,
    /// Physical address of the first byte, for invalidation.
    pub phys_pc: u64,
    /// Physical `(addr, len)` ranges whose contents were folded into
    /// the body at translation time (PC-relative literals).
    pub data: Vec<(u64, u32)>,
    /// Exit edges in slot order, then the indirect/exception exit.
    pub exits: Vec<ExitEdge>,
    pub body: IrBody,
    pub jmp: Mutex<TbJmp>,
    pub invalid: AtomicBool,
}

impl TranslationBlock {
    pub fn new(
        key: TbKey,
        phys_pc: u64,
        size: u32,
        icount: u16,
        exits: Vec<ExitEdge>,
        body: IrBody,
    ) -> Self {
        Self {
            key,
            size,
            icount,
            phys_pc,
            data: Vec::new(),
            exits,
            body,
            jmp: Mutex::new(TbJmp::default()),
            invalid: AtomicBool::new(false),
        }
    }

    /// Attach the data ranges read while translating.
    pub fn with_data(mut self, data: Vec<(u64, u32)>) -> Self {
        self.data = data;
        self
    }

    pub fn pc(&self) -> u64 {
        self.key.pc
    }

    pub fn is_valid(&self) -> bool {
        !self.invalid.load(Ordering::Acquire)
    }

    /// Target key of the direct exit in `slot`, if any.
    pub fn direct_target(&self, slot: usize) -> Option<TbKey> {
        self.exits.iter().find_map(|e| match *e {
            ExitEdge::Direct { slot: s, target } if s as usize == slot => {
                Some(target)
            }
            _ => None,
        })
    }

    /// Whether the guest bytes of this block, or any data range it
    /// depends on, overlap the physical page starting at `page` of
    /// `page_size` bytes.
    pub fn overlaps_page(&self, page: u64, page_size: u64) -> bool {
        let hits = |start: u64, len: u64| {
            ranges_overlap(start, len, page, page_size)
        };
        hits(self.phys_pc, self.size as u64)
            || self.data.iter().any(|&(a, len)| hits(a, len as u64))
    }
}

/// Inclusive-end comparison, so ranges touching `u64::MAX` do not
/// wrap. Empty ranges count as one byte.
fn ranges_overlap(a: u64, a_len: u64, b: u64, b_len: u64) -> bool {
    let a_last = a.saturating_add(a_len.max(1) - 1);
    let b_last = b.saturating_add(b_len.max(1) - 1);
    a <= b_last && b <= a_last
}

/// Number of entries in the per-CPU jump cache.
pub const TB_JMP_CACHE_SIZE: usize = 1 << 12; // 4096

/// Per-CPU direct-mapped TB jump cache.
///
/// Indexed by `(pc >> 2) & (TB_JMP_CACHE_SIZE - 1)`. Entries are
/// hints: callers re-check the key and validity of the block.
pub struct JumpCache {
    entries: Box<[Option<TbId>; TB_JMP_CACHE_SIZE]>,
}

impl JumpCache {
    pub fn new() -> Self {
        Self {
            entries: Box::new([None; TB_JMP_CACHE_SIZE]),
        }
    }

    fn index(pc: u64) -> usize {
        (pc as usize >> 2) & (TB_JMP_CACHE_SIZE - 1)
    }

    pub fn lookup(&self, pc: u64) -> Option<TbId> {
        self.entries[Self::index(pc)]
    }

    pub fn insert(&mut self, pc: u64, tb: TbId) {
        self.entries[Self::index(pc)] = Some(tb);
    }

    pub fn remove(&mut self, pc: u64) {
        self.entries[Self::index(pc)] = None;
    }

    pub fn invalidate(&mut self) {
        self.entries.fill(None);
    }
}

impl Default for JumpCache {
    fn default() -> Self {
        Self::new()
    }
}
