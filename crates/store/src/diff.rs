//! Diff engine: minimal ordered change sets between two snapshot views
//!
//! Records are compared by key: present only in the target view is a
//! Create, only in the source view a Delete, present in both with
//! differing configuration (fields or flags, never apply status) an
//! Update. Ties are dropped, so diffing a view against itself is always
//! empty.
//!
//! Ordering is by fixed per-family dependency rank assigned at handler
//! registration, not by dynamic graph analysis: within one controller/
//! domain partition, Creates run in ascending rank (owning profile before
//! binding), then Updates in ascending rank, then Deletes in descending
//! rank (dependents removed before what they depend on). Ties within a
//! rank are key-ordered for reproducibility.

use confsync_core::diff::{DiffEntry, DiffOp, OpFilter};
use confsync_core::error::CoordResult;
use confsync_core::record::ConfigRecord;
use confsync_core::traits::SnapshotBackend;
use confsync_core::types::{ControllerId, DomainId, FamilyTag};
use confsync_core::view::{RecordFilter, ViewName};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use tracing::debug;

/// Rank used for families nobody registered
///
/// Unranked families sort after every registered one, so a missing
/// registration degrades ordering but never drops a change.
const UNRANKED: u16 = u16::MAX;

/// Diff entries partitioned by owning controller and domain
///
/// Entries within each partition are fully ordered and ready for
/// dispatch; partitions themselves carry no mutual ordering and may be
/// dispatched in parallel.
#[derive(Debug, Default)]
pub struct DiffSet {
    partitions: BTreeMap<(ControllerId, DomainId), Vec<DiffEntry>>,
}

impl DiffSet {
    /// Whether the diff contains no entries at all
    pub fn is_empty(&self) -> bool {
        self.partitions.values().all(|v| v.is_empty())
    }

    /// Total entry count across partitions
    pub fn len(&self) -> usize {
        self.partitions.values().map(|v| v.len()).sum()
    }

    /// Controllers touched by this diff
    pub fn controllers(&self) -> Vec<ControllerId> {
        let mut out: Vec<ControllerId> =
            self.partitions.keys().map(|(c, _)| c.clone()).collect();
        out.dedup();
        out
    }

    /// Iterate partitions in controller/domain order
    pub fn partitions(&self) -> impl Iterator<Item = (&(ControllerId, DomainId), &Vec<DiffEntry>)> {
        self.partitions.iter()
    }

    /// Consume into the partition map
    pub fn into_partitions(self) -> BTreeMap<(ControllerId, DomainId), Vec<DiffEntry>> {
        self.partitions
    }

    /// Iterate every entry, partition by partition
    pub fn entries(&self) -> impl Iterator<Item = &DiffEntry> {
        self.partitions.values().flatten()
    }

    /// Keep only entries the predicate admits; empty partitions are
    /// dropped. Ordering within partitions is preserved.
    pub fn retain<F>(&mut self, mut keep: F)
    where
        F: FnMut(&DiffEntry) -> bool,
    {
        for entries in self.partitions.values_mut() {
            entries.retain(|e| keep(e));
        }
        self.partitions.retain(|_, entries| !entries.is_empty());
    }

    fn push(&mut self, entry: DiffEntry) {
        self.partitions
            .entry((entry.controller.clone(), entry.domain.clone()))
            .or_default()
            .push(entry);
    }

    fn sort_partitions(&mut self) {
        for entries in self.partitions.values_mut() {
            entries.sort_by(entry_order);
        }
    }
}

/// Total order of entries within one controller/domain partition
///
/// Creates first in ascending rank, then updates in ascending rank,
/// then deletes in descending rank; ties within a rank are key-ordered.
/// Public so callers merging entries across families can re-establish
/// the same order.
pub fn entry_order(a: &DiffEntry, b: &DiffEntry) -> std::cmp::Ordering {
    op_class(a.op)
        .cmp(&op_class(b.op))
        .then_with(|| match a.op {
            // Deletes unwind in reverse dependency order.
            DiffOp::Delete => b.rank.cmp(&a.rank),
            _ => a.rank.cmp(&b.rank),
        })
        .then_with(|| a.key().cmp(b.key()))
}

fn op_class(op: DiffOp) -> u8 {
    match op {
        DiffOp::Create => 0,
        DiffOp::Update => 1,
        DiffOp::Delete => 2,
    }
}

/// Computes ordered create/update/delete sets between two snapshot views
///
/// Holds the per-family dependency rank table; families are registered
/// once at handler-registration time.
pub struct DiffEngine {
    ranks: RwLock<FxHashMap<FamilyTag, u16>>,
}

impl DiffEngine {
    /// Create an engine with an empty rank table
    pub fn new() -> Self {
        Self {
            ranks: RwLock::new(FxHashMap::default()),
        }
    }

    /// Register a family's dependency rank
    ///
    /// Lower ranks are created first and deleted last. Re-registering a
    /// family overwrites its rank.
    pub fn register_family(&self, family: FamilyTag, rank: u16) {
        self.ranks.write().insert(family, rank);
    }

    /// Rank assigned to a family; unregistered families sort last
    pub fn rank_of(&self, family: &FamilyTag) -> u16 {
        self.ranks.read().get(family).copied().unwrap_or(UNRANKED)
    }

    /// Compute the ordered diff transforming view `a` into view `b`
    ///
    /// `filter` restricts which records participate (family, scope,
    /// controller); `ops` suppresses whole operation kinds. Records whose
    /// configuration is identical in both views are dropped, so
    /// `compute(x, v, v, ..)` is empty for any view v.
    pub fn compute(
        &self,
        backend: &dyn SnapshotBackend,
        a: &ViewName,
        b: &ViewName,
        filter: &RecordFilter,
        ops: OpFilter,
    ) -> CoordResult<DiffSet> {
        let side_a = index_by_key(backend.read(a, filter)?);
        let side_b = index_by_key(backend.read(b, filter)?);

        let mut diff = DiffSet::default();

        for (key, new) in &side_b {
            match side_a.get(key) {
                None => {
                    if ops.admits(DiffOp::Create) {
                        diff.push(self.entry(DiffOp::Create, None, Some(new.clone())));
                    }
                }
                Some(old) => {
                    if !old.same_config(new) && ops.admits(DiffOp::Update) {
                        diff.push(self.entry(DiffOp::Update, Some(old.clone()), Some(new.clone())));
                    }
                }
            }
        }
        for (key, old) in &side_a {
            if !side_b.contains_key(key) && ops.admits(DiffOp::Delete) {
                diff.push(self.entry(DiffOp::Delete, Some(old.clone()), None));
            }
        }

        diff.sort_partitions();
        debug!(
            target: "confsync::diff",
            from = %a,
            to = %b,
            entries = diff.len(),
            "Diff computed"
        );
        Ok(diff)
    }

    fn entry(
        &self,
        op: DiffOp,
        old: Option<ConfigRecord>,
        new: Option<ConfigRecord>,
    ) -> DiffEntry {
        let effective = new.as_ref().or(old.as_ref()).expect("entry without records");
        DiffEntry {
            rank: self.rank_of(&effective.key.family),
            controller: effective.owner_controller.clone(),
            domain: effective.owner_domain.clone(),
            op,
            old,
            new,
        }
    }
}

impl Default for DiffEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn index_by_key(
    records: Vec<ConfigRecord>,
) -> BTreeMap<confsync_core::record::RecordKey, ConfigRecord> {
    records.into_iter().map(|r| (r.key.clone(), r)).collect()
}
