//! Property tests for the diff engine
//!
//! The central invariant: diffing any view against itself is empty, for
//! arbitrary record populations. Also checks that a diff applied as a
//! set of key operations actually transforms A's key set into B's.

use confsync_core::record::{ConfigRecord, FieldValue, RecordKey};
use confsync_core::traits::SnapshotBackend;
use confsync_core::types::{ControllerId, DomainId, FamilyTag};
use confsync_core::view::{RecordFilter, ViewName};
use confsync_core::{DiffOp, OpFilter};
use confsync_store::{DiffEngine, SnapshotStore};
use proptest::prelude::*;
use std::collections::BTreeSet;

fn record(name: String, port: String, ctrl: u8) -> ConfigRecord {
    ConfigRecord::new(
        RecordKey::from_parts("binding", &[&name]),
        ControllerId::new(format!("ctrl{ctrl}")),
        DomainId::root(),
    )
    .with_field("port", FieldValue::valid(port))
}

fn arb_records() -> impl Strategy<Value = Vec<ConfigRecord>> {
    proptest::collection::vec(
        ("[a-e][0-9]", "eth[0-9]", 1u8..3),
        0..20,
    )
    .prop_map(|specs| {
        specs
            .into_iter()
            .map(|(name, port, ctrl)| record(name, port, ctrl))
            .collect()
    })
}

fn engine() -> DiffEngine {
    let engine = DiffEngine::new();
    engine.register_family(FamilyTag::from("binding"), 10);
    engine
}

proptest! {
    /// compute(A, A) is empty for any population of A.
    #[test]
    fn prop_self_diff_is_empty(records in arb_records()) {
        let store = SnapshotStore::new();
        store.write(&ViewName::Working, records).unwrap();
        let diff = engine()
            .compute(
                &store,
                &ViewName::Working,
                &ViewName::Working,
                &RecordFilter::all(),
                OpFilter::ALL,
            )
            .unwrap();
        prop_assert!(diff.is_empty());
    }

    /// Applying the diff's key operations to A's key set yields B's.
    #[test]
    fn prop_diff_transforms_key_sets(a in arb_records(), b in arb_records()) {
        let store = SnapshotStore::new();
        store.write(&ViewName::Committed, a.clone()).unwrap();
        store.write(&ViewName::Working, b.clone()).unwrap();

        // Duplicate names collapse in the store; read back the actual
        // view contents instead of trusting the generated vectors.
        let keys_a: BTreeSet<RecordKey> = store
            .read(&ViewName::Committed, &RecordFilter::all())
            .unwrap()
            .into_iter()
            .map(|r| r.key)
            .collect();
        let keys_b: BTreeSet<RecordKey> = store
            .read(&ViewName::Working, &RecordFilter::all())
            .unwrap()
            .into_iter()
            .map(|r| r.key)
            .collect();

        let diff = engine()
            .compute(
                &store,
                &ViewName::Committed,
                &ViewName::Working,
                &RecordFilter::all(),
                OpFilter::ALL,
            )
            .unwrap();

        let mut keys = keys_a.clone();
        for entry in diff.entries() {
            match entry.op {
                DiffOp::Create => {
                    prop_assert!(keys.insert(entry.key().clone()));
                }
                DiffOp::Delete => {
                    prop_assert!(keys.remove(entry.key()));
                }
                DiffOp::Update => {
                    prop_assert!(keys.contains(entry.key()));
                }
            }
        }
        prop_assert_eq!(keys, keys_b);
    }
}
