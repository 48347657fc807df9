//! Guest frontends: instruction decoding and IR generation.
//!
//! Provides the generic translation framework (`TranslatorOps` trait
//! and `translator_loop`), the memory collaborator interface, the
//! lazy condition-code model, and architecture-specific decoders.

pub mod aarch64;
pub mod cc;

use dbt_core::{Context, ExitEdge, TbKey};
use thiserror::Error;

/// Guest page size assumed for the page-crossing termination rule.
pub const GUEST_PAGE_SIZE: u64 = 4096;

// ---------------------------------------------------------------
// Memory collaborator
// ---------------------------------------------------------------

/// Why the memory collaborator could not satisfy a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Fault {
    #[error("unmapped address {addr:#x}")]
    Unmapped { addr: u64 },
    #[error("permission denied at {addr:#x}")]
    Permission { addr: u64 },
    #[error("misaligned access at {addr:#x}")]
    Misaligned { addr: u64 },
}

impl Fault {
    pub fn addr(&self) -> u64 {
        match *self {
            Fault::Unmapped { addr }
            | Fault::Permission { addr }
            | Fault::Misaligned { addr } => addr,
        }
    }
}

/// What an address translation request is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Fetch,
    Load,
    Store,
    Atomic,
}

/// Access parameters handed to [`GuestMemory::translate_for_access`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessIntent {
    pub kind: AccessKind,
    /// Required alignment in bytes (1 = none).
    pub align: u32,
    /// Whether an allocation-tag check applies.
    pub tag_check: bool,
}

impl AccessIntent {
    pub const fn new(kind: AccessKind, align: u32) -> Self {
        Self {
            kind,
            align,
            tag_check: false,
        }
    }
}

/// Guest memory as seen by the translator.
///
/// Implemented by the soft-MMU of the surrounding emulator; the
/// translator only reads instruction words and literal-pool data,
/// and asks for translations it wants validated up front.
pub trait GuestMemory {
    /// Read the 32-bit instruction word at `addr`.
    fn fetch_instruction(&self, addr: u64) -> Result<u32, Fault>;

    /// Read `size` bytes (1, 2, 4 or 8) of data at `addr`,
    /// zero-extended.
    fn read_literal(&self, addr: u64, size: u32) -> Result<u64, Fault>;

    /// Translate `addr` for an access of `size` bytes and return the
    /// physical address.
    fn translate_for_access(
        &self,
        addr: u64,
        size: u32,
        intent: AccessIntent,
    ) -> Result<u64, Fault>;
}

/// Hard failure of a translation attempt. Nothing built so far may be
/// published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TranslateError {
    #[error("fetch fault at {addr:#x}: {fault}")]
    FetchFault {
        addr: u64,
        #[source]
        fault: Fault,
    },
}

// ---------------------------------------------------------------
// Generic translation framework
// ---------------------------------------------------------------

/// TB termination reason set by `translate_insn`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisasJumpType {
    /// Continue to the next sequential instruction.
    Next,
    /// Reached the instruction, byte or page limit.
    TooMany,
    /// Unconditional branch / exit / raise: no fall-through.
    NoReturn,
    /// The instruction changed decode-time state; continue at the
    /// next pc through a non-chainable exit.
    UpdateExit,
}

/// Per-block limits enforced by `translator_loop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TbLimits {
    pub max_insns: u32,
    pub max_bytes: u32,
}

impl TbLimits {
    /// One instruction per block.
    pub const fn single_step() -> Self {
        Self {
            max_insns: 1,
            max_bytes: 4,
        }
    }
}

impl Default for TbLimits {
    fn default() -> Self {
        Self {
            max_insns: dbt_core::MAX_INSNS as u32,
            max_bytes: GUEST_PAGE_SIZE as u32,
        }
    }
}

/// Base context shared by all guest architectures.
///
/// Mirrors QEMU's `DisasContextBase`.
pub struct DisasContextBase {
    /// PC of the first instruction in this TB.
    pub pc_first: u64,
    /// PC of the *next* instruction to decode.
    pub pc_next: u64,
    /// How the current instruction terminates.
    pub is_jmp: DisasJumpType,
    /// Number of guest instructions translated so far.
    pub num_insns: u32,
    /// Maximum instructions allowed in one TB.
    pub max_insns: u32,
    /// Maximum guest bytes one TB may cover.
    pub max_bytes: u32,
    /// Exit edges requested so far, in emission order.
    pub exits: Vec<ExitEdge>,
    /// Physical data ranges read at translation time.
    pub data: Vec<(u64, u32)>,
}

impl DisasContextBase {
    pub fn new(pc: u64, limits: TbLimits) -> Self {
        Self {
            pc_first: pc,
            pc_next: pc,
            is_jmp: DisasJumpType::Next,
            num_insns: 0,
            max_insns: limits
                .max_insns
                .clamp(1, dbt_core::MAX_INSNS as u32),
            max_bytes: limits.max_bytes.max(4),
            exits: Vec::with_capacity(2),
            data: Vec::new(),
        }
    }

    /// Record a data range whose contents the block depends on.
    pub fn note_data(&mut self, phys: u64, len: u32) {
        if !self.data.contains(&(phys, len)) {
            self.data.push((phys, len));
        }
    }

    /// Bytes of guest code consumed so far.
    pub fn size(&self) -> u32 {
        self.pc_next.wrapping_sub(self.pc_first) as u32
    }

    /// Whether one more `insn_len`-byte instruction would break the
    /// byte limit or leave the page of the first instruction.
    pub fn next_would_overflow(&self, insn_len: u32) -> bool {
        if self.size() + insn_len > self.max_bytes {
            return true;
        }
        let page = self.pc_first & !(GUEST_PAGE_SIZE - 1);
        let end = self.pc_next.wrapping_add(insn_len as u64 - 1);
        end & !(GUEST_PAGE_SIZE - 1) != page
    }
}

/// Per-architecture translation operations.
///
/// Mirrors QEMU's `TranslatorOps` vtable.
pub trait TranslatorOps {
    /// Architecture-specific disassembly context.
    type DisasContext;

    /// Width of one instruction word in bytes.
    const INSN_LEN: u32;

    /// One-time setup before the translation loop.
    fn init_disas_context(ctx: &mut Self::DisasContext, ir: &mut Context);

    /// Called once at the start of the TB (after init). May end the
    /// block before any instruction by setting `is_jmp`.
    fn tb_start(ctx: &mut Self::DisasContext, ir: &mut Context);

    /// Emit `insn_start` marker for the current guest PC.
    fn insn_start(ctx: &mut Self::DisasContext, ir: &mut Context);

    /// Decode and translate one guest instruction.
    ///
    /// Must advance `base().pc_next` and set `base().is_jmp`
    /// when the instruction terminates the TB. Only a memory fault
    /// while reading guest code or literals is an error.
    fn translate_insn(
        ctx: &mut Self::DisasContext,
        ir: &mut Context,
        mem: &dyn GuestMemory,
    ) -> Result<(), TranslateError>;

    /// Emit TB epilogue (exit / goto_tb for fall-through).
    fn tb_stop(ctx: &mut Self::DisasContext, ir: &mut Context);

    /// Access the base context embedded in the arch context.
    fn base(ctx: &Self::DisasContext) -> &DisasContextBase;

    /// Mutable access to the base context.
    fn base_mut(ctx: &mut Self::DisasContext) -> &mut DisasContextBase;
}

/// Generic translation loop: drives the decode → translate cycle.
///
/// Mirrors QEMU's `translator_loop()` in `accel/tcg/translator.c`.
/// Always terminates within `max_insns` instructions and `max_bytes`
/// bytes, and never lets a block span two guest pages.
pub fn translator_loop<T: TranslatorOps>(
    ctx: &mut T::DisasContext,
    ir: &mut Context,
    mem: &dyn GuestMemory,
) -> Result<(), TranslateError> {
    T::init_disas_context(ctx, ir);
    T::tb_start(ctx, ir);

    while T::base(ctx).is_jmp == DisasJumpType::Next {
        T::insn_start(ctx, ir);
        T::translate_insn(ctx, ir, mem)?;

        let base = T::base(ctx);
        if base.is_jmp != DisasJumpType::Next {
            break;
        }
        if base.num_insns >= base.max_insns
            || base.next_would_overflow(T::INSN_LEN)
        {
            T::base_mut(ctx).is_jmp = DisasJumpType::TooMany;
            break;
        }
    }

    T::tb_stop(ctx, ir);
    Ok(())
}

// ---------------------------------------------------------------
// CPU interface used by the execution engine
// ---------------------------------------------------------------

/// Metadata of a freshly translated block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TbOutput {
    /// Guest bytes covered.
    pub size: u32,
    /// Guest instructions translated.
    pub icount: u16,
    /// Exit edges in slot order, then indirect/exception exits.
    pub exits: Vec<ExitEdge>,
    /// Physical address of the first instruction byte.
    pub phys_pc: u64,
    /// Physical data ranges folded into the block, such as literals.
    pub data: Vec<(u64, u32)>,
}

/// Guest CPU state as seen by the execution engine.
///
/// Each guest architecture implements this to expose the lookup key
/// of the next block and to run its frontend on a cache miss.
pub trait GuestCpu {
    /// Start pc plus the context fingerprint of the next block.
    fn tb_key(&self) -> TbKey;

    /// Translate the block described by `key` into `ir`, which must
    /// be a fresh context.
    fn gen_code(
        &self,
        ir: &mut Context,
        key: TbKey,
        limits: TbLimits,
        mem: &dyn GuestMemory,
    ) -> Result<TbOutput, TranslateError>;
}
