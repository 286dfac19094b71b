//! In-memory multi-view snapshot store
//!
//! The shipped implementation of the `SnapshotBackend` contract: a map of
//! named views, each an independently locked, key-ordered record table.
//! Views are only ever changed through whole-record writes and explicit
//! promote operations; the coordination layer never edits a committed
//! record in place.
//!
//! Locking: each view has its own RwLock; operations that move records
//! between views (`promote`) serialize on a store-level mutation lock and
//! never hold two view locks at once.

use confsync_core::error::{CoordError, CoordResult};
use confsync_core::record::{ConfigRecord, RecordKey};
use confsync_core::traits::SnapshotBackend;
use confsync_core::view::{RecordFilter, ViewName};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

type ViewTable = Arc<RwLock<BTreeMap<RecordKey, ConfigRecord>>>;

/// Versioned, multi-view storage of configuration records
///
/// Working, committed, per-controller mirror, and observed-state views
/// all live here. The working view is exclusively owned by the session
/// that opened it; committed and mirror views are read-shared and
/// writable only through the owning session's commit step.
pub struct SnapshotStore {
    views: DashMap<ViewName, ViewTable>,
    /// Serializes multi-view operations so promote never deadlocks
    multi: Mutex<()>,
}

impl SnapshotStore {
    /// Create an empty store with no views materialized
    pub fn new() -> Self {
        Self {
            views: DashMap::new(),
            multi: Mutex::new(()),
        }
    }

    fn view(&self, name: &ViewName) -> ViewTable {
        self.views
            .entry(name.clone())
            .or_insert_with(|| Arc::new(RwLock::new(BTreeMap::new())))
            .clone()
    }

    /// Number of records currently in a view
    pub fn len(&self, name: &ViewName) -> usize {
        self.view(name).read().len()
    }

    /// Whether a view holds no records
    pub fn is_empty(&self, name: &ViewName) -> bool {
        self.len(name) == 0
    }

    /// Drop every record in a view
    pub fn clear(&self, name: &ViewName) {
        self.view(name).write().clear();
    }

    /// Replace the subset of `view` matching `filter` with `records`
    ///
    /// Records in the view that match the filter but are absent from
    /// `records` are removed. Used by audit reconciliation to fold a
    /// fetched observed state into a mirror view.
    pub fn replace_matching(
        &self,
        view: &ViewName,
        filter: &RecordFilter,
        records: Vec<ConfigRecord>,
    ) -> CoordResult<()> {
        let _guard = self.multi.lock();
        let table = self.view(view);
        let mut map = table.write();
        map.retain(|_, rec| !filter.matches(rec));
        for rec in records {
            map.insert(rec.key.clone(), rec);
        }
        Ok(())
    }
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotBackend for SnapshotStore {
    fn read(&self, view: &ViewName, filter: &RecordFilter) -> CoordResult<Vec<ConfigRecord>> {
        let table = self.view(view);
        let map = table.read();
        Ok(map
            .values()
            .filter(|rec| filter.matches(rec))
            .cloned()
            .collect())
    }

    fn get(&self, view: &ViewName, key: &RecordKey) -> CoordResult<Option<ConfigRecord>> {
        let table = self.view(view);
        let map = table.read();
        Ok(map.get(key).cloned())
    }

    fn write(&self, view: &ViewName, records: Vec<ConfigRecord>) -> CoordResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        let table = self.view(view);
        let mut map = table.write();
        for rec in records {
            map.insert(rec.key.clone(), rec);
        }
        Ok(())
    }

    fn remove(&self, view: &ViewName, keys: &[RecordKey]) -> CoordResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let table = self.view(view);
        let mut map = table.write();
        for key in keys {
            map.remove(key);
        }
        Ok(())
    }

    fn promote(
        &self,
        from: &ViewName,
        to: &ViewName,
        filter: &RecordFilter,
    ) -> CoordResult<usize> {
        if from == to {
            return Err(CoordError::store(format!(
                "promote from view {} onto itself",
                from
            )));
        }
        let _guard = self.multi.lock();

        // Clone the matching subset under the source read lock, then drop
        // it before touching the target. Never hold two view locks.
        let subset: Vec<ConfigRecord> = {
            let table = self.view(from);
            let map = table.read();
            map.values().filter(|rec| filter.matches(rec)).cloned().collect()
        };
        let count = subset.len();

        let table = self.view(to);
        let mut map = table.write();
        map.retain(|_, rec| !filter.matches(rec));
        for rec in subset {
            map.insert(rec.key.clone(), rec);
        }
        debug!(target: "confsync::store", from = %from, to = %to, count, "View promoted");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use confsync_core::record::FieldValue;
    use confsync_core::types::{ControllerId, DomainId, FamilyTag, Scope};

    fn record(family: &str, path: &[&str], ctrl: &str) -> ConfigRecord {
        ConfigRecord::new(
            RecordKey::from_parts(family, path),
            ControllerId::from(ctrl),
            DomainId::root(),
        )
        .with_field("port", FieldValue::valid(path.last().copied().unwrap_or("p")))
    }

    #[test]
    fn test_write_then_read_sorted() {
        let store = SnapshotStore::new();
        store
            .write(
                &ViewName::Working,
                vec![
                    record("binding", &["t1", "p2"], "c1"),
                    record("binding", &["t1", "p1"], "c1"),
                ],
            )
            .unwrap();
        let records = store.read(&ViewName::Working, &RecordFilter::all()).unwrap();
        assert_eq!(records.len(), 2);
        assert!(records[0].key < records[1].key);
    }

    #[test]
    fn test_views_are_independent() {
        let store = SnapshotStore::new();
        store
            .write(&ViewName::Working, vec![record("binding", &["t1", "p1"], "c1")])
            .unwrap();
        assert!(store.is_empty(&ViewName::Committed));
        assert_eq!(store.len(&ViewName::Working), 1);
    }

    #[test]
    fn test_promote_replaces_matching_subset() {
        let store = SnapshotStore::new();
        // Committed has a record that vanished from working and one
        // outside the promoted scope.
        store
            .write(
                &ViewName::Committed,
                vec![
                    record("binding", &["t1", "stale"], "c1"),
                    record("binding", &["t2", "keep"], "c1"),
                ],
            )
            .unwrap();
        store
            .write(&ViewName::Working, vec![record("binding", &["t1", "p1"], "c1")])
            .unwrap();

        let scope_filter = RecordFilter::all().in_scope(Scope::subtree("t1"));
        let promoted = store
            .promote(&ViewName::Working, &ViewName::Committed, &scope_filter)
            .unwrap();
        assert_eq!(promoted, 1);

        let committed = store.read(&ViewName::Committed, &RecordFilter::all()).unwrap();
        let keys: Vec<String> = committed.iter().map(|r| r.key.to_string()).collect();
        assert_eq!(keys, vec!["binding:t1/p1", "binding:t2/keep"]);
    }

    #[test]
    fn test_promote_onto_self_rejected() {
        let store = SnapshotStore::new();
        let err = store
            .promote(&ViewName::Working, &ViewName::Working, &RecordFilter::all())
            .unwrap_err();
        assert!(matches!(err, CoordError::Store { .. }));
    }

    #[test]
    fn test_replace_matching() {
        let store = SnapshotStore::new();
        let mirror = ViewName::ControllerMirror(ControllerId::from("c1"));
        store
            .write(
                &mirror,
                vec![
                    record("binding", &["t1", "gone"], "c1"),
                    record("profile", &["gold"], "c1"),
                ],
            )
            .unwrap();
        store
            .replace_matching(
                &mirror,
                &RecordFilter::family(FamilyTag::from("binding")),
                vec![record("binding", &["t1", "fresh"], "c1")],
            )
            .unwrap();
        let records = store.read(&mirror, &RecordFilter::all()).unwrap();
        let keys: Vec<String> = records.iter().map(|r| r.key.to_string()).collect();
        assert_eq!(keys, vec!["binding:t1/fresh", "profile:gold"]);
    }

    #[test]
    fn test_remove_ignores_missing() {
        let store = SnapshotStore::new();
        store
            .write(&ViewName::Working, vec![record("binding", &["t1", "p1"], "c1")])
            .unwrap();
        store
            .remove(
                &ViewName::Working,
                &[
                    RecordKey::from_parts("binding", &["t1", "p1"]),
                    RecordKey::from_parts("binding", &["t1", "missing"]),
                ],
            )
            .unwrap();
        assert!(store.is_empty(&ViewName::Working));
    }
}
