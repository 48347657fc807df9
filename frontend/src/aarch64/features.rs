//! A64 optional-feature configuration.
//!
//! `A64Features` is the set of optional architecture extensions a
//! modelled core implements; `A64Cfg` pairs it with the identification
//! registers, mirroring QEMU's `ARMISARegisters` as far as the
//! translator needs it.

use bitflags::bitflags;

// ── Feature set ──────────────────────────────────────────────────

bitflags! {
    /// Optional A64 extensions that gate instruction classes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct A64Features: u32 {
        /// FEAT_LSE: CAS family and LD<op>/SWP atomics.
        const LSE = 1 << 0;
        /// FEAT_CRC32: CRC32 and CRC32C.
        const CRC32 = 1 << 1;
        /// FEAT_FlagM: CFINV, SETF8, SETF16.
        const FLAGM = 1 << 2;
        /// FEAT_LRCPC: LDAPR family.
        const RCPC = 1 << 3;
    }
}

impl A64Features {
    /// Architecture feature name, for diagnostics.
    pub fn name(self) -> &'static str {
        if self == Self::LSE {
            "FEAT_LSE"
        } else if self == Self::CRC32 {
            "FEAT_CRC32"
        } else if self == Self::FLAGM {
            "FEAT_FlagM"
        } else if self == Self::RCPC {
            "FEAT_LRCPC"
        } else {
            "FEAT_?"
        }
    }
}

// ── Core configuration ───────────────────────────────────────────

/// Per-CPU A64 configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct A64Cfg {
    pub features: A64Features,
    /// Value returned by MRS of MIDR_EL1.
    pub midr: u64,
}

// ── Predefined profiles ──────────────────────────────────────────

impl A64Cfg {
    /// Baseline ARMv8.0-A: no optional extensions.
    pub const ARMV8_0: Self = Self {
        features: A64Features::empty(),
        midr: 0x410f_d034,
    };

    /// ARMv8.1-A: CRC32 and LSE atomics are mandatory.
    pub const ARMV8_1: Self = Self {
        features: A64Features::LSE.union(A64Features::CRC32),
        midr: 0x410f_d0b0,
    };

    /// ARMv8.4-A: adds FlagM and RCpc.
    pub const ARMV8_4: Self = Self {
        features: A64Features::all(),
        midr: 0x410f_d0c0,
    };

    pub const fn has(&self, f: A64Features) -> bool {
        self.features.contains(f)
    }
}

impl Default for A64Cfg {
    fn default() -> Self {
        Self::ARMV8_4
    }
}
