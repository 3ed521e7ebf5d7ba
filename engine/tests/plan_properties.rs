//! Property tests for reconciliation planning.

use duplex_engine::{EntityRecord, Id, ReconciliationPlan};
use proptest::prelude::*;
use serde_json::json;
use std::collections::BTreeSet;

fn desired_strategy() -> impl Strategy<Value = Vec<Option<Id>>> {
    prop::collection::vec(prop::option::of(0i64..40), 0..30)
}

fn to_records(ids: &[Option<Id>]) -> Vec<EntityRecord> {
    ids.iter()
        .enumerate()
        .map(|(i, id)| match id {
            Some(id) => EntityRecord::from(json!({"id": id, "pos": i})),
            None => EntityRecord::from(json!({"pos": i})),
        })
        .collect()
}

proptest! {
    #[test]
    fn plan_sets_are_disjoint_and_cover_existing(
        existing in prop::collection::btree_set(0i64..40, 0..20),
        desired in desired_strategy(),
    ) {
        let existing: Vec<Id> = existing.into_iter().collect();
        let plan = ReconciliationPlan::build(&existing, to_records(&desired));

        let keep = plan.keep_ids();
        let delete: BTreeSet<Id> = plan.to_delete.iter().copied().collect();
        prop_assert_eq!(delete.len(), plan.to_delete.len());
        prop_assert!(keep.is_disjoint(&delete));
        prop_assert!(plan.to_create.iter().all(|r| r.id.is_none()));

        // Kept and deleted together are exactly the existing ids
        let existing_set: BTreeSet<Id> = existing.iter().copied().collect();
        let covered: BTreeSet<Id> = keep
            .intersection(&existing_set)
            .copied()
            .chain(delete.iter().copied())
            .collect();
        prop_assert_eq!(covered, existing_set);
    }

    #[test]
    fn creates_keep_input_order(desired in desired_strategy()) {
        let plan = ReconciliationPlan::build(&[], to_records(&desired));

        let expected: Vec<usize> = desired
            .iter()
            .enumerate()
            .filter(|(_, id)| id.is_none())
            .map(|(i, _)| i)
            .collect();
        let actual: Vec<usize> = plan
            .to_create
            .iter()
            .filter_map(|r| r.get("pos").and_then(|v| v.as_u64()))
            .map(|p| p as usize)
            .collect();
        prop_assert_eq!(actual, expected);
    }

    #[test]
    fn replanning_own_output_deletes_nothing(
        existing in prop::collection::btree_set(0i64..40, 0..20),
    ) {
        let existing: Vec<Id> = existing.into_iter().collect();
        let desired: Vec<Option<Id>> = existing.iter().map(|id| Some(*id)).collect();
        let plan = ReconciliationPlan::build(&existing, to_records(&desired));

        prop_assert!(plan.to_create.is_empty());
        prop_assert!(plan.to_delete.is_empty());
        prop_assert_eq!(plan.to_update.len(), existing.len());
    }
}
