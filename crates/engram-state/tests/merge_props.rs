//! Property tests for the merge lattice.

#![allow(clippy::unwrap_used, missing_docs)]

use engram_state::merge::{
    decay_stage, merge_evidence_pointers, raise_outcome, union_sorted,
};
use engram_state::model::{EvidenceKind, EvidencePointer, PolicyOutcome};
use proptest::prelude::*;
use std::collections::BTreeMap;

fn short_string() -> impl Strategy<Value = String> {
    proptest::string::string_regex("[a-z0-9]{1,8}").unwrap()
}

fn string_lists() -> impl Strategy<Value = Vec<String>> {
    proptest::collection::vec(short_string(), 0..12)
}

fn pointers() -> impl Strategy<Value = Vec<EvidencePointer>> {
    proptest::collection::vec(
        (short_string(), 0u8..5, 0.0f64..=1.0f64).prop_map(|(id, kind, confidence)| {
            let kind = match kind {
                0 => EvidenceKind::Event,
                1 => EvidenceKind::Episode,
                2 => EvidenceKind::Signal,
                3 => EvidenceKind::Artifact,
                _ => EvidenceKind::Policy,
            };
            EvidencePointer {
                pointer_id: id,
                kind,
                source: "unspecified".to_string(),
                confidence,
                observed_at: None,
                metadata: BTreeMap::new(),
            }
        }),
        0..10,
    )
}

proptest! {
    #[test]
    fn union_is_sorted_unique_and_idempotent(a in string_lists(), b in string_lists()) {
        let once = union_sorted(&a, &b);
        let mut sorted = once.clone();
        sorted.sort();
        sorted.dedup();
        prop_assert_eq!(&once, &sorted);
        prop_assert_eq!(union_sorted(&once, &b), once.clone());
        prop_assert_eq!(union_sorted(&a, &b), union_sorted(&b, &a));
    }

    #[test]
    fn evidence_merge_is_idempotent_and_commutative(a in pointers(), b in pointers()) {
        let once = merge_evidence_pointers(&a, &b);
        let twice = merge_evidence_pointers(&once, &b);
        prop_assert_eq!(&once, &twice);
        prop_assert_eq!(
            merge_evidence_pointers(&a, &b),
            merge_evidence_pointers(&b, &a)
        );
    }

    #[test]
    fn merged_evidence_is_sorted_by_key(a in pointers(), b in pointers()) {
        let merged = merge_evidence_pointers(&a, &b);
        let keys: Vec<_> = merged.iter().map(|p| p.merge_key()).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        prop_assert_eq!(keys, sorted);
    }

    #[test]
    fn decay_stage_is_monotonic(a in 0u64..100, b in 0u64..100) {
        if a <= b {
            prop_assert!(decay_stage(a) <= decay_stage(b));
        }
    }

    #[test]
    fn outcome_raise_is_a_join(a in 0u8..3, b in 0u8..3) {
        let decode = |n: u8| match n {
            0 => PolicyOutcome::Allow,
            1 => PolicyOutcome::Review,
            _ => PolicyOutcome::Deny,
        };
        let left = decode(a);
        let right = decode(b);
        let joined = raise_outcome(left, right);
        prop_assert!(joined.severity() >= left.severity());
        prop_assert!(joined.severity() >= right.severity());
        prop_assert_eq!(raise_outcome(left, right), raise_outcome(right, left));
        prop_assert_eq!(raise_outcome(joined, joined), joined);
    }
}
