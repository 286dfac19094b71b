//! Reference-count ledger for shared configuration resources
//!
//! Tracks how many actively bound records reference a named shared
//! resource (a profile object), per controller, per scope. Accounting is
//! two-phase: `adjust` accumulates speculative deltas for a session
//! without touching committed counts; `fold` applies them all-or-nothing
//! at session commit; `discard` throws them away at abort.
//!
//! Built on the store crate's scratch-overlay primitive. The catalog of
//! known resources is tracked separately from the counts: a record may
//! only be created referencing a resource that exists (`semantic_check`),
//! regardless of what the counts say.

use confsync_core::error::{CoordError, CoordResult};
use confsync_core::types::{ControllerId, Scope, SessionId};
use confsync_store::overlay::{FoldOp, ScratchOverlay};
use dashmap::DashMap;
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Identity of one reference counter
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RefCountKey {
    /// The shared resource being referenced
    pub resource: String,
    /// Controller the references live on
    pub controller: ControllerId,
    /// Scope the references belong to
    pub scope: Scope,
}

/// Outcome of a semantic existence check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourcePresence {
    /// The resource exists in the profile catalog
    Exists,
    /// No such resource in this scope
    NotFound,
}

/// Signed-delta-over-unsigned-count fold semantics
///
/// Staging rejects any delta that would drive `count + pending` below
/// zero; folding rejects deltas invalidated by a concurrent fold since
/// staging (reported as `Conflict`). A count folded to zero removes its
/// entry.
struct CountFold;

impl FoldOp<RefCountKey, u64, i64> for CountFold {
    fn admit(
        &self,
        key: &RefCountKey,
        base: Option<&u64>,
        staged: Option<&i64>,
        incoming: &i64,
    ) -> CoordResult<i64> {
        let merged = staged.copied().unwrap_or(0) + incoming;
        let committed = base.copied().unwrap_or(0) as i64;
        if committed + merged < 0 {
            return Err(CoordError::WouldGoNegative {
                resource: key.resource.clone(),
                controller: key.controller.clone(),
            });
        }
        Ok(merged)
    }

    fn apply(&self, key: &RefCountKey, base: Option<&u64>, delta: &i64) -> CoordResult<Option<u64>> {
        let next = base.copied().unwrap_or(0) as i64 + delta;
        if next < 0 {
            // The base moved under us since staging.
            return Err(CoordError::Conflict {
                resource: key.resource.clone(),
            });
        }
        if next == 0 {
            return Ok(None);
        }
        Ok(Some(next as u64))
    }
}

/// Atomic, session-scoped accounting of shared-resource references
pub struct RefCountLedger {
    counts: ScratchOverlay<RefCountKey, u64, i64, CountFold>,
    catalog: DashMap<Scope, BTreeSet<String>>,
}

impl RefCountLedger {
    /// Create an empty ledger with an empty catalog
    pub fn new() -> Self {
        Self {
            counts: ScratchOverlay::new(CountFold),
            catalog: DashMap::new(),
        }
    }

    /// Register a shared resource in the catalog; idempotent
    pub fn register_resource(&self, resource: impl Into<String>, scope: Scope) {
        self.catalog.entry(scope).or_default().insert(resource.into());
    }

    /// Remove a resource from the catalog
    ///
    /// # Errors
    /// `Conflict` if any committed count still references the resource.
    pub fn unregister_resource(&self, resource: &str, scope: &Scope) -> CoordResult<()> {
        if self.resource_in_use(resource, scope) {
            return Err(CoordError::Conflict {
                resource: resource.to_string(),
            });
        }
        if let Some(mut set) = self.catalog.get_mut(scope) {
            set.remove(resource);
        }
        Ok(())
    }

    /// Whether a resource exists in the profile catalog
    ///
    /// Independent of reference counts: a record may only be created
    /// referencing a resource that exists.
    pub fn semantic_check(&self, resource: &str, scope: &Scope) -> ResourcePresence {
        let exists = self
            .catalog
            .get(scope)
            .map(|set| set.contains(resource))
            .unwrap_or(false);
        if exists {
            ResourcePresence::Exists
        } else {
            ResourcePresence::NotFound
        }
    }

    /// Whether any controller still holds a committed count for the
    /// resource in this scope
    pub fn resource_in_use(&self, resource: &str, scope: &Scope) -> bool {
        self.counts
            .committed_snapshot()
            .iter()
            .any(|(key, count)| key.resource == resource && &key.scope == scope && *count > 0)
    }

    /// Stage a speculative delta for a session
    ///
    /// Committed counts are untouched until `fold`.
    ///
    /// # Errors
    /// `WouldGoNegative` if the committed count plus the session's
    /// pending delta would drop below zero.
    pub fn adjust(
        &self,
        session: SessionId,
        resource: impl Into<String>,
        controller: &ControllerId,
        scope: &Scope,
        delta: i64,
    ) -> CoordResult<()> {
        let key = RefCountKey {
            resource: resource.into(),
            controller: controller.clone(),
            scope: scope.clone(),
        };
        debug!(
            target: "confsync::ledger",
            resource = %key.resource,
            controller = %key.controller,
            delta,
            "Adjust staged"
        );
        self.counts.stage(session, key, delta)
    }

    /// Fold every pending delta of a session into committed counts
    ///
    /// All-or-nothing across every resource the session touched. On
    /// error nothing has changed and the deltas stay staged; callers
    /// abort the session and `discard`.
    ///
    /// # Errors
    /// `Conflict` when a concurrent fold invalidated a staged delta.
    pub fn fold(&self, session: SessionId) -> CoordResult<usize> {
        let folded = self.counts.fold(session)?;
        debug!(target: "confsync::ledger", session = %session, folded, "Deltas folded");
        Ok(folded)
    }

    /// Drop every pending delta of a session without folding
    pub fn discard(&self, session: SessionId) {
        self.counts.discard(session);
        debug!(target: "confsync::ledger", session = %session, "Deltas discarded");
    }

    /// Committed count for one counter; zero when absent
    pub fn count(&self, resource: &str, controller: &ControllerId, scope: &Scope) -> u64 {
        self.counts
            .committed(&RefCountKey {
                resource: resource.to_string(),
                controller: controller.clone(),
                scope: scope.clone(),
            })
            .unwrap_or(0)
    }

    /// Pending delta a session holds for one counter
    pub fn pending(
        &self,
        session: SessionId,
        resource: &str,
        controller: &ControllerId,
        scope: &Scope,
    ) -> i64 {
        self.counts
            .staged(
                session,
                &RefCountKey {
                    resource: resource.to_string(),
                    controller: controller.clone(),
                    scope: scope.clone(),
                },
            )
            .unwrap_or(0)
    }

    /// Committed count for a resource summed across controllers
    pub fn total_count(&self, resource: &str, scope: &Scope) -> u64 {
        self.counts
            .committed_snapshot()
            .iter()
            .filter(|(key, _)| key.resource == resource && &key.scope == scope)
            .map(|(_, count)| *count)
            .sum()
    }

    /// Controllers holding a committed count for a resource in a scope
    pub fn controllers_with_count(&self, resource: &str, scope: &Scope) -> Vec<ControllerId> {
        self.counts
            .committed_snapshot()
            .keys()
            .filter(|key| key.resource == resource && &key.scope == scope)
            .map(|key| key.controller.clone())
            .collect()
    }

    /// Overwrite a committed count from a recount of actual records
    ///
    /// Rename propagation repairs counts by recounting referencing
    /// records in the store and writing the result here; a crash between
    /// record rewrites is healed by re-running the recount.
    pub fn reconcile_count(
        &self,
        resource: &str,
        controller: &ControllerId,
        scope: &Scope,
        actual: u64,
    ) {
        let key = RefCountKey {
            resource: resource.to_string(),
            controller: controller.clone(),
            scope: scope.clone(),
        };
        if actual == 0 {
            self.counts.set_committed(key, None);
        } else {
            self.counts.set_committed(key, Some(actual));
        }
        warn!(
            target: "confsync::ledger",
            resource,
            controller = %controller,
            actual,
            "Count reconciled from record store"
        );
    }
}

impl Default for RefCountLedger {
    fn default() -> Self {
        Self::new()
    }
}
