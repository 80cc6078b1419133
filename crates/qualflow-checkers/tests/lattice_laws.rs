use proptest::prelude::*;
use qualflow_checkers::called_methods::{CalledMethods, CalledMethodsHierarchy};
use qualflow_checkers::regex::{concat, group_count, RegexHierarchy, RegexQual};
use qualflow_checkers::signedness::mask_ignores_msb;
use qualflow_core::hir::BinaryOp;
use qualflow_core::lattice::QualifierHierarchy;
use quickcheck::{quickcheck, TestResult};
use quickcheck_macros::quickcheck as property;

fn methods() -> impl Strategy<Value = CalledMethods> {
    prop::collection::btree_set(prop::sample::select(vec!["open", "read", "write", "close"]), 0..4)
        .prop_map(CalledMethods::of)
}

proptest! {
    #[test]
    fn called_methods_bounds(a in methods(), b in methods()) {
        let h = CalledMethodsHierarchy;
        let lub = h.least_upper_bound(&a, &b);
        prop_assert!(h.is_subtype(&a, &lub));
        prop_assert!(h.is_subtype(&b, &lub));
        let glb = h.greatest_lower_bound(&a, &b).unwrap();
        prop_assert!(h.is_subtype(&glb, &a));
        prop_assert!(h.is_subtype(&glb, &b));
        prop_assert_eq!(lub, h.least_upper_bound(&b, &a));
    }

    #[test]
    fn calling_a_method_refines(a in methods(), m in prop::sample::select(vec!["open", "flush"])) {
        let h = CalledMethodsHierarchy;
        prop_assert!(h.is_subtype(&a.with_call(m), &a));
    }

    #[test]
    fn regex_lub_takes_fewer_groups(a in 0u32..8, b in 0u32..8) {
        let h = RegexHierarchy;
        prop_assert_eq!(h.least_upper_bound(&RegexQual::Regex(a), &RegexQual::Regex(b)), RegexQual::Regex(a.min(b)));
        prop_assert_eq!(
            h.greatest_lower_bound(&RegexQual::Regex(a), &RegexQual::Regex(b)).unwrap(),
            RegexQual::Regex(a.max(b))
        );
    }
}

#[property]
fn concatenation_adds_groups(a: u8, b: u8) -> bool {
    let (a, b) = (u32::from(a % 6), u32::from(b % 6));
    concat(&RegexQual::Regex(a), &RegexQual::Regex(b)) == RegexQual::Regex(a + b)
}

quickcheck! {
    fn literal_groups_match_concatenated_text(a: u8, b: u8) -> bool {
        let (left, right) = ("(x)".repeat(usize::from(a % 5)), "(y)".repeat(usize::from(b % 5)));
        let joined = concat(&RegexQual::of_text(&left), &RegexQual::of_text(&right));
        joined.group_count() == group_count(&format!("{left}{right}"))
    }

    fn low_mask_clears_shifted_bits(shift: u8) -> TestResult {
        let shift = i64::from(shift % 32);
        if shift == 0 {
            return TestResult::discard();
        }
        let mask = (1i64 << (32 - shift)) - 1;
        TestResult::from_bool(
            mask_ignores_msb(BinaryOp::BitAnd, shift, mask, false) && !mask_ignores_msb(BinaryOp::BitAnd, shift, -1, false),
        )
    }
}
