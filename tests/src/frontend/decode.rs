//! Decoder: pattern table consistency, field extraction of known words
//! and feature gating.

use dbt_frontend::aarch64::decode::{
    decode, decode_bit_masks, AddrMode, Decoded, Dp2Op, Insn, LdStOp,
};
use dbt_frontend::aarch64::features::A64Features;
use dbt_frontend::aarch64::sysreg::{SysOp, SysRegEnc};
use dbt_frontend::aarch64::table::{all_entries, lookup, InsnClass};
use dbt_frontend::cc::CondCode;
use proptest::prelude::*;

use super::*;

fn full(insn: u32) -> Decoded {
    decode(insn, A64Features::all())
}

fn shape(insn: u32) -> Insn {
    match full(insn) {
        Decoded::Insn(i) => i,
        other => panic!("{insn:#010x} decoded as {other:?}"),
    }
}

#[test]
fn test_patterns_are_well_formed() {
    let entries: Vec<_> = all_entries().collect();
    for (i, e) in entries.iter().enumerate() {
        assert_eq!(e.bits & !e.mask, 0, "{}", e.name);
        // Every pattern is reachable past the ones before it.
        for earlier in &entries[..i] {
            let covers = earlier.mask & !e.mask == 0
                && e.bits & earlier.mask == earlier.bits;
            assert!(!covers, "{} hides {}", earlier.name, e.name);
        }
        assert!(
            entries[..i].iter().all(|p| p.name != e.name),
            "{} listed twice",
            e.name
        );
    }
}

#[test]
fn test_lookup_names() {
    let name = |insn| lookup(insn).map(|e| e.name);
    assert_eq!(name(add_imm(0, 1, 2)), Some("addsub_imm"));
    assert_eq!(name(crc32x(0, 1, 2)), Some("crc32"));
    assert_eq!(name(udiv(0, 1, 2)), Some("udiv"));
    assert_eq!(name(ldadd(0, 1, 2)), Some("ldadd"));
    assert_eq!(name(CFINV), Some("cfinv"));
    assert_eq!(name(dc_zva(1)), Some("sys"));
    assert_eq!(name(0), None);
}

#[test]
fn test_decode_sys() {
    let cases = [
        (dc_zva(1), SysOp::DcZva, [3, 7, 4, 1], 1),
        (dc_civac(2), SysOp::DcCivac, [3, 7, 14, 1], 2),
        (ic_ivau(0), SysOp::IcIvau, [3, 7, 5, 1], 0),
        (IC_IALLU, SysOp::IcIallu, [0, 7, 5, 0], 31),
        (TLBI_VMALLE1IS, SysOp::Tlbi, [0, 8, 3, 0], 31),
        (sys(0, 8, 7, 1, 4), SysOp::Tlbi, [0, 8, 7, 1], 4),
    ];
    for (insn, op, [op1, crn, crm, op2], rt) in cases {
        assert_eq!(
            shape(insn),
            Insn::Sys {
                op,
                enc: SysRegEnc::new(1, op1, crn, crm, op2),
                rt
            },
            "{insn:#010x}"
        );
    }
    // AT S1E1R, an unnamed DC and a TLBI outside the EL1 set.
    for insn in [sys(0, 7, 8, 0, 0), sys(3, 7, 3, 1, 0), sys(0, 8, 4, 0, 31)] {
        assert_eq!(full(insn), Decoded::Unallocated, "{insn:#010x}");
    }
}

#[test]
fn test_reserved_groups_are_unallocated() {
    // UDF, unallocated, SVE and SIMD/FP groups.
    for insn in [0x0000_0000, 0x0200_0000, 0x0400_0000, 0x1e60_4020] {
        assert_eq!(full(insn), Decoded::Unallocated, "{insn:#010x}");
    }
}

#[test]
fn test_decode_branches() {
    assert_eq!(shape(b(-8)), Insn::B { link: false, offset: -8 });
    assert_eq!(shape(bl(0x40)), Insn::B { link: true, offset: 0x40 });
    assert_eq!(
        shape(b_cond(LT, 12)),
        Insn::BCond {
            cond: CondCode::Lt,
            offset: 12
        }
    );
    assert_eq!(
        shape(tbnz(3, 40, -4)),
        Insn::Tbz {
            nz: true,
            rt: 3,
            bit: 40,
            offset: -4
        }
    );
    // B.cond with o0 set is unallocated.
    assert_eq!(full(b_cond(EQ, 8) | 1 << 4), Decoded::Unallocated);
}

#[test]
fn test_decode_data_processing() {
    assert_eq!(
        shape(subs_imm(31, 2, 5)),
        Insn::AddSubImm {
            sf: true,
            sub: true,
            set_flags: true,
            rd: 31,
            rn: 2,
            imm: 5
        }
    );
    // LSL #12 form.
    assert_eq!(
        shape(add_imm(0, 1, 1) | 1 << 22),
        Insn::AddSubImm {
            sf: true,
            sub: false,
            set_flags: false,
            rd: 0,
            rn: 1,
            imm: 0x1000
        }
    );
    assert_eq!(
        shape(sdiv(4, 5, 6)),
        Insn::DataProc2 {
            sf: true,
            op: Dp2Op::Sdiv,
            rd: 4,
            rn: 5,
            rm: 6
        }
    );
    assert_eq!(
        shape(crc32cx(0, 1, 2)),
        Insn::Crc32 {
            castagnoli: true,
            size: 3,
            rd: 0,
            rn: 1,
            rm: 2
        }
    );
}

#[test]
fn test_decode_loads_and_stores() {
    assert_eq!(
        shape(ldr_post(1, 2, -8)),
        Insn::LoadStore {
            op: LdStOp::Load,
            size: 3,
            mode: AddrMode::PostIndex(-8),
            unpriv: false,
            rt: 1,
            rn: 2
        }
    );
    assert_eq!(
        shape(stp_pre(29, 30, 31, -16)),
        Insn::LoadStorePair {
            load: false,
            signed: false,
            size: 3,
            mode: AddrMode::PreIndex(-16),
            rt: 29,
            rt2: 30,
            rn: 31
        }
    );
}

#[test]
fn test_unpredictable_pairs_are_unallocated() {
    assert_eq!(full(ldp(3, 3, 1, 0)), Decoded::Unallocated);
    assert_eq!(full(ldp_post(1, 2, 1, 16)), Decoded::Unallocated);
    assert_eq!(full(ldp_post(3, 2, 2, 16)), Decoded::Unallocated);
    // Overlap without writeback, or writeback through SP, is fine.
    assert!(matches!(full(ldp(1, 2, 1, 0)), Decoded::Insn(_)));
    assert!(matches!(full(ldp_post(1, 2, 31, 16)), Decoded::Insn(_)));
    // Stores never overlap a destination.
    assert!(matches!(full(stp(3, 3, 1, 0)), Decoded::Insn(_)));
}

#[test]
fn test_feature_gating() {
    let gated = [
        (crc32x(0, 1, 2), InsnClass::Crc32, A64Features::CRC32),
        (ldadd(1, 2, 3), InsnClass::AtomicMemOp, A64Features::LSE),
        (cas(1, 2, 3), InsnClass::Cas, A64Features::LSE),
        (CFINV, InsnClass::Cfinv, A64Features::FLAGM),
        (setf8(1), InsnClass::Setf, A64Features::FLAGM),
        (ldapr(1, 2), InsnClass::Ldapr, A64Features::RCPC),
    ];
    for (insn, class, feature) in gated {
        assert_eq!(
            decode(insn, A64Features::empty()),
            Decoded::FeatureAbsent { class, feature },
            "{insn:#010x}"
        );
        assert!(matches!(decode(insn, feature), Decoded::Insn(_)));
    }
    // Base ISA is never gated.
    assert!(matches!(
        decode(udiv(0, 1, 2), A64Features::empty()),
        Decoded::Insn(_)
    ));
}

#[test]
fn test_decode_bit_masks() {
    assert_eq!(decode_bit_masks(true, 7, 0), Some(0xff));
    assert_eq!(decode_bit_masks(true, 0, 1), Some(1 << 63));
    let alternating = decode_bit_masks(false, 0b111100, 0);
    assert_eq!(alternating, Some(0x5555_5555_5555_5555));
    let rotated = decode_bit_masks(false, 0b000111, 4);
    assert_eq!(rotated, Some(0xf000_000f_f000_000f));
    // All-ones elements are reserved.
    assert_eq!(decode_bit_masks(true, 63, 0), None);
    assert_eq!(decode_bit_masks(false, 0b111111, 0), None);
    assert_eq!(decode_bit_masks(false, 0b011111, 0), None);
}

proptest! {
    #[test]
    fn prop_decode_is_total(insn in any::<u32>()) {
        let _ = decode(insn, A64Features::empty());
        let _ = full(insn);
    }

    #[test]
    fn prop_features_only_add(insn in any::<u32>()) {
        match decode(insn, A64Features::empty()) {
            Decoded::Unallocated => {
                prop_assert_eq!(full(insn), Decoded::Unallocated);
            }
            Decoded::Insn(i) => prop_assert_eq!(full(insn), Decoded::Insn(i)),
            Decoded::FeatureAbsent { feature, .. } => {
                prop_assert!(!feature.is_empty());
                prop_assert!(matches!(full(insn), Decoded::Insn(_)));
            }
        }
    }

    #[test]
    fn prop_matching_entry_decides(insn in any::<u32>()) {
        if lookup(insn).is_none() {
            prop_assert_eq!(full(insn), Decoded::Unallocated);
        }
    }
}
