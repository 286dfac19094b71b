//! Session-keyed scratch overlay with atomic fold
//!
//! A ScratchOverlay is the store's speculative-write primitive: a
//! committed base table plus, per session, a staged delta map. Deltas
//! accumulate without touching the base; at session end they are either
//! folded into the base all-or-nothing or discarded wholesale.
//!
//! The reference-count ledger is built directly on this primitive; it is
//! kept generic because the admit/apply semantics (what a delta means,
//! when it is rejected, when an entry disappears) belong to the client.

use confsync_core::error::CoordResult;
use confsync_core::types::SessionId;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};

/// Delta semantics for a scratch overlay
///
/// `admit` validates and merges an incoming delta into a session's staged
/// delta for one key, seeing the committed base value. `apply` folds a
/// staged delta into the base at fold time; returning None removes the
/// entry from the base.
pub trait FoldOp<K, V, D>: Send + Sync {
    /// Merge `incoming` into `staged` for a key whose committed value is
    /// `base`, or reject the staging attempt.
    ///
    /// # Errors
    /// Implementations reject deltas that could never fold cleanly
    /// (e.g. a counter going negative).
    fn admit(&self, key: &K, base: Option<&V>, staged: Option<&D>, incoming: &D)
        -> CoordResult<D>;

    /// Fold a staged delta into the committed base value
    ///
    /// Returning `Ok(None)` removes the entry.
    ///
    /// # Errors
    /// Implementations reject folds invalidated by concurrent changes to
    /// the base since the delta was staged.
    fn apply(&self, key: &K, base: Option<&V>, delta: &D) -> CoordResult<Option<V>>;
}

/// Committed base table plus per-session staged deltas
pub struct ScratchOverlay<K, V, D, F> {
    base: RwLock<BTreeMap<K, V>>,
    pending: Mutex<HashMap<SessionId, BTreeMap<K, D>>>,
    fold_op: F,
}

impl<K, V, D, F> ScratchOverlay<K, V, D, F>
where
    K: Ord + Clone,
    V: Clone,
    D: Clone,
    F: FoldOp<K, V, D>,
{
    /// Create an empty overlay with the given delta semantics
    pub fn new(fold_op: F) -> Self {
        Self {
            base: RwLock::new(BTreeMap::new()),
            pending: Mutex::new(HashMap::new()),
            fold_op,
        }
    }

    /// Stage a delta for one key under a session
    ///
    /// The committed base is not touched. The fold op validates the
    /// incoming delta against the base and the session's already-staged
    /// delta for the key.
    ///
    /// # Errors
    /// Whatever the fold op's `admit` rejects.
    pub fn stage(&self, session: SessionId, key: K, delta: D) -> CoordResult<()> {
        let base = self.base.read();
        let mut pending = self.pending.lock();
        let session_map = pending.entry(session).or_default();
        let merged = self
            .fold_op
            .admit(&key, base.get(&key), session_map.get(&key), &delta)?;
        session_map.insert(key, merged);
        Ok(())
    }

    /// Fold every staged delta of a session into the base, atomically
    ///
    /// All-or-nothing: every delta is validated against the current base
    /// before any base entry changes. On error the session's deltas are
    /// left staged so the caller can discard them explicitly.
    ///
    /// Returns the number of folded entries.
    ///
    /// # Errors
    /// Whatever the fold op's `apply` rejects, e.g. a conflict caused by
    /// a concurrent fold since staging.
    pub fn fold(&self, session: SessionId) -> CoordResult<usize> {
        let mut base = self.base.write();
        let mut pending = self.pending.lock();
        let Some(session_map) = pending.get(&session) else {
            return Ok(0);
        };

        // Validation pass: nothing is written until every delta applies.
        let mut folded: Vec<(K, Option<V>)> = Vec::with_capacity(session_map.len());
        for (key, delta) in session_map.iter() {
            let next = self.fold_op.apply(key, base.get(key), delta)?;
            folded.push((key.clone(), next));
        }

        for (key, next) in folded {
            match next {
                Some(value) => {
                    base.insert(key, value);
                }
                None => {
                    base.remove(&key);
                }
            }
        }
        let count = session_map.len();
        pending.remove(&session);
        Ok(count)
    }

    /// Drop every staged delta of a session without touching the base
    pub fn discard(&self, session: SessionId) {
        self.pending.lock().remove(&session);
    }

    /// Committed value for a key
    pub fn committed(&self, key: &K) -> Option<V> {
        self.base.read().get(key).cloned()
    }

    /// Staged delta a session holds for a key
    pub fn staged(&self, session: SessionId, key: &K) -> Option<D> {
        self.pending
            .lock()
            .get(&session)
            .and_then(|m| m.get(key).cloned())
    }

    /// Whether a session has anything staged
    pub fn has_staged(&self, session: SessionId) -> bool {
        self.pending
            .lock()
            .get(&session)
            .map(|m| !m.is_empty())
            .unwrap_or(false)
    }

    /// Snapshot of the committed base, for reconciliation and tests
    pub fn committed_snapshot(&self) -> BTreeMap<K, V> {
        self.base.read().clone()
    }

    /// Overwrite a committed entry directly, bypassing staging
    ///
    /// Reconciliation-only escape hatch: rename propagation recounts
    /// entries from the record store and writes the result here. `None`
    /// removes the entry.
    pub fn set_committed(&self, key: K, value: Option<V>) {
        let mut base = self.base.write();
        match value {
            Some(v) => {
                base.insert(key, v);
            }
            None => {
                base.remove(&key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use confsync_core::error::CoordError;

    /// Additive counter semantics used by the tests: values are u64
    /// counts, deltas are signed, underflow is rejected.
    struct Counting;

    impl FoldOp<&'static str, u64, i64> for Counting {
        fn admit(
            &self,
            _key: &&'static str,
            base: Option<&u64>,
            staged: Option<&i64>,
            incoming: &i64,
        ) -> CoordResult<i64> {
            let merged = staged.copied().unwrap_or(0) + incoming;
            let committed = base.copied().unwrap_or(0) as i64;
            if committed + merged < 0 {
                return Err(CoordError::store("underflow"));
            }
            Ok(merged)
        }

        fn apply(
            &self,
            _key: &&'static str,
            base: Option<&u64>,
            delta: &i64,
        ) -> CoordResult<Option<u64>> {
            let next = base.copied().unwrap_or(0) as i64 + delta;
            if next < 0 {
                return Err(CoordError::store("conflict"));
            }
            if next == 0 {
                return Ok(None);
            }
            Ok(Some(next as u64))
        }
    }

    #[test]
    fn test_stage_does_not_touch_base() {
        let overlay = ScratchOverlay::new(Counting);
        let session = SessionId::new();
        overlay.stage(session, "a", 2).unwrap();
        assert_eq!(overlay.committed(&"a"), None);
        assert_eq!(overlay.staged(session, &"a"), Some(2));
    }

    #[test]
    fn test_fold_applies_and_clears() {
        let overlay = ScratchOverlay::new(Counting);
        let session = SessionId::new();
        overlay.stage(session, "a", 2).unwrap();
        overlay.stage(session, "a", 1).unwrap();
        overlay.stage(session, "b", 1).unwrap();
        assert_eq!(overlay.fold(session).unwrap(), 2);
        assert_eq!(overlay.committed(&"a"), Some(3));
        assert_eq!(overlay.committed(&"b"), Some(1));
        assert!(!overlay.has_staged(session));
    }

    #[test]
    fn test_fold_to_zero_removes_entry() {
        let overlay = ScratchOverlay::new(Counting);
        let s1 = SessionId::new();
        overlay.stage(s1, "a", 1).unwrap();
        overlay.fold(s1).unwrap();

        let s2 = SessionId::new();
        overlay.stage(s2, "a", -1).unwrap();
        overlay.fold(s2).unwrap();
        assert_eq!(overlay.committed(&"a"), None);
        assert!(overlay.committed_snapshot().is_empty());
    }

    #[test]
    fn test_underflow_rejected_at_stage() {
        let overlay = ScratchOverlay::new(Counting);
        let session = SessionId::new();
        assert!(overlay.stage(session, "a", -1).is_err());
        // Balanced staging within the session is fine.
        overlay.stage(session, "a", 2).unwrap();
        overlay.stage(session, "a", -2).unwrap();
    }

    #[test]
    fn test_discard_leaves_base_untouched() {
        let overlay = ScratchOverlay::new(Counting);
        let s1 = SessionId::new();
        overlay.stage(s1, "a", 5).unwrap();
        overlay.fold(s1).unwrap();

        let s2 = SessionId::new();
        overlay.stage(s2, "a", -3).unwrap();
        overlay.discard(s2);
        assert_eq!(overlay.committed(&"a"), Some(5));
    }

    #[test]
    fn test_fold_is_all_or_nothing_on_conflict() {
        let overlay = ScratchOverlay::new(Counting);
        let s1 = SessionId::new();
        overlay.stage(s1, "a", 1).unwrap();
        overlay.stage(s1, "b", 1).unwrap();
        overlay.fold(s1).unwrap();

        // s2 stages a decrement on "a" while it is still positive, plus
        // an increment on "b". A concurrent session then empties "a", so
        // s2's fold must fail without touching "b".
        let s2 = SessionId::new();
        overlay.stage(s2, "a", -1).unwrap();
        overlay.stage(s2, "b", 3).unwrap();

        let s3 = SessionId::new();
        overlay.stage(s3, "a", -1).unwrap();
        overlay.fold(s3).unwrap();
        assert_eq!(overlay.committed(&"a"), None);

        assert!(overlay.fold(s2).is_err());
        assert_eq!(overlay.committed(&"b"), Some(1));
        // Deltas stay staged for an explicit discard.
        assert!(overlay.has_staged(s2));
        overlay.discard(s2);
    }

    #[test]
    fn test_sessions_are_isolated() {
        let overlay = ScratchOverlay::new(Counting);
        let s1 = SessionId::new();
        let s2 = SessionId::new();
        overlay.stage(s1, "a", 1).unwrap();
        overlay.stage(s2, "a", 2).unwrap();
        assert_eq!(overlay.staged(s1, &"a"), Some(1));
        assert_eq!(overlay.staged(s2, &"a"), Some(2));
        overlay.fold(s1).unwrap();
        assert_eq!(overlay.committed(&"a"), Some(1));
        overlay.fold(s2).unwrap();
        assert_eq!(overlay.committed(&"a"), Some(3));
    }
}
