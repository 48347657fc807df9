/// Exception classes a `raise` op can hand to the dispatcher.
///
/// The syndrome travelling with each kind is ISA-specific; for A64 it
/// is an ESR-style value (exception class in bits 31..26).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ExceptionKind {
    /// Unallocated encoding or a form this core treats as UNDEFINED.
    Undefined = 1,
    /// Valid encoding whose optional feature is not implemented.
    FeatureTrap = 2,
    /// System register or PSTATE access not permitted at this EL.
    SysRegTrap = 3,
    /// Supervisor call.
    Svc = 4,
    /// Hypervisor call.
    Hvc = 5,
    /// Software breakpoint.
    Brk = 6,
    /// Instruction fetch from a misaligned pc.
    PcAlignment = 7,
}

impl ExceptionKind {
    pub const fn from_u32(v: u32) -> Option<ExceptionKind> {
        Some(match v {
            1 => ExceptionKind::Undefined,
            2 => ExceptionKind::FeatureTrap,
            3 => ExceptionKind::SysRegTrap,
            4 => ExceptionKind::Svc,
            5 => ExceptionKind::Hvc,
            6 => ExceptionKind::Brk,
            7 => ExceptionKind::PcAlignment,
            _ => return None,
        })
    }

    pub const fn name(self) -> &'static str {
        match self {
            ExceptionKind::Undefined => "undefined",
            ExceptionKind::FeatureTrap => "feature_trap",
            ExceptionKind::SysRegTrap => "sysreg_trap",
            ExceptionKind::Svc => "svc",
            ExceptionKind::Hvc => "hvc",
            ExceptionKind::Brk => "brk",
            ExceptionKind::PcAlignment => "pc_alignment",
        }
    }

    /// Whether the preferred return address is the next instruction
    /// rather than the one that raised.
    pub const fn returns_to_next(self) -> bool {
        matches!(self, ExceptionKind::Svc | ExceptionKind::Hvc)
    }
}
