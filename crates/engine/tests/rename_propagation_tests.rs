//! Rename propagation tests
//!
//! Renaming a shared resource rewrites every referencing record and
//! repairs the ledger by recounting from the records themselves. The
//! operation must be idempotent and restartable: a crash after any
//! record leaves a state a re-run heals without double-applying.

mod common;

use common::*;
use confsync_core::error::CoordResult;
use confsync_core::record::{ConfigRecord, RecordFlags};
use confsync_core::types::{Scope, SessionId};
use confsync_core::view::{RecordFilter, ViewName};
use confsync_core::SnapshotBackend;
use confsync_engine::families::{port_binding_family, port_binding_handler};
use confsync_engine::{ConfigServiceHandler, HandlerContext};

fn rename_context(h: &common::Harness) -> HandlerContext {
    HandlerContext {
        backend: h.store.clone(),
        ledger: h.coordinator.ledger().clone(),
        diff: std::sync::Arc::new(confsync_store::DiffEngine::new()),
        session: SessionId::new(),
        scope: Scope::Global,
        refcounting: true,
    }
}

fn committed_bindings(h: &common::Harness) -> Vec<ConfigRecord> {
    h.store
        .read(
            &ViewName::Committed,
            &RecordFilter::family(port_binding_family()),
        )
        .unwrap()
}

fn seed_three_bindings(h: &common::Harness) -> CoordResult<()> {
    commit_records(
        h,
        vec![
            profile_record("profileX", "500", &ctrl1()),
            binding_record("b1", "eth0", Some("profileX"), &ctrl1(), true),
            binding_record("b2", "eth1", Some("profileX"), &ctrl1(), true),
            binding_record("b3", "eth2", Some("profileX"), &ctrl1(), true),
        ],
    )
}

#[test]
fn test_rename_rewrites_all_references_and_counts() {
    let h = harness();
    seed_three_bindings(&h).unwrap();
    assert_eq!(
        h.coordinator
            .ledger()
            .count("profileX", &ctrl1(), &Scope::Global),
        3
    );

    let handler = port_binding_handler();
    let cx = rename_context(&h);
    let report = handler
        .rename_propagate(&cx, "profileX", "profileY")
        .unwrap();
    assert_eq!(report.rewritten, 6); // three records in committed, three in working
    assert_eq!(report.already_current, 0);

    for record in committed_bindings(&h) {
        assert_eq!(record.fields["profile"].value, "profileY");
        assert!(!record.flags.contains(RecordFlags::RENAME_PENDING));
    }
    let ledger = h.coordinator.ledger();
    assert_eq!(ledger.count("profileY", &ctrl1(), &Scope::Global), 3);
    assert_eq!(ledger.count("profileX", &ctrl1(), &Scope::Global), 0);
}

/// Simulate a crash after 1 of 3 committed records was renamed: the
/// re-run completes the remaining 2 without double-applying the first.
#[test]
fn test_rename_restartable_after_partial_run() {
    let h = harness();
    seed_three_bindings(&h).unwrap();
    let handler = port_binding_handler();

    // Crash simulation: b1 already rewritten (pending flag still set,
    // as if the completion pass never ran), counts untouched.
    let mut crashed = binding_record("b1", "eth0", Some("profileY"), &ctrl1(), true);
    crashed.flags = crashed.flags.with(RecordFlags::RENAME_PENDING);
    h.store
        .write(&ViewName::Committed, vec![crashed])
        .unwrap();
    assert_eq!(
        h.coordinator
            .ledger()
            .count("profileX", &ctrl1(), &Scope::Global),
        3
    );

    let cx = rename_context(&h);
    let report = handler
        .rename_propagate(&cx, "profileX", "profileY")
        .unwrap();
    // Two committed records plus three working copies still carried the
    // old name; the crashed one is recognized, not reapplied.
    assert_eq!(report.rewritten, 5);
    assert_eq!(report.already_current, 1);

    for record in committed_bindings(&h) {
        assert_eq!(record.fields["profile"].value, "profileY");
        assert!(!record.flags.contains(RecordFlags::RENAME_PENDING));
    }
    let ledger = h.coordinator.ledger();
    assert_eq!(ledger.count("profileY", &ctrl1(), &Scope::Global), 3);
    assert_eq!(ledger.count("profileX", &ctrl1(), &Scope::Global), 0);
}

/// Running the rename twice is a no-op the second time.
#[test]
fn test_rename_is_idempotent() {
    let h = harness();
    seed_three_bindings(&h).unwrap();
    let handler = port_binding_handler();

    let cx = rename_context(&h);
    handler.rename_propagate(&cx, "profileX", "profileY").unwrap();
    let second = handler
        .rename_propagate(&cx, "profileX", "profileY")
        .unwrap();
    assert_eq!(second.rewritten, 0);
    assert_eq!(second.already_current, 6);
    assert_eq!(
        h.coordinator
            .ledger()
            .count("profileY", &ctrl1(), &Scope::Global),
        3
    );
}

/// A family with no reference field reports an empty pass.
#[test]
fn test_rename_noop_for_provider_family() {
    let h = harness();
    seed_three_bindings(&h).unwrap();
    let handler = confsync_engine::families::profile_handler();
    let cx = rename_context(&h);
    let report = handler
        .rename_propagate(&cx, "profileX", "profileY")
        .unwrap();
    assert_eq!(report, confsync_engine::RenameReport::default());
}
