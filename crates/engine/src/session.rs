//! Session bookkeeping for commit and audit runs
//!
//! A TransactionSession tracks one protocol run: its phase, the diffs
//! computed at vote time, the undo log of forward-applied entries (for
//! compensating abort in reverse order), participant outcomes, and the
//! shared resources the session added to the catalog (unwound on abort).
//!
//! Phase transitions for a session are serialized by the mutex the
//! coordinator wraps each session in; the parallel dispatch fan-out
//! inside a phase never touches session state directly.

use chrono::{DateTime, Utc};
use confsync_core::diff::DiffEntry;
use confsync_core::phase::{Phase, SessionKind};
use confsync_core::types::{ControllerId, DomainId, FamilyTag, Scope, SessionId};
use confsync_store::DiffSet;

/// Cheap, copyable reference to a live session
///
/// Handles stay valid until the session reaches a terminal phase; using
/// a stale handle yields `InvalidSession`.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    /// The session this handle names
    pub id: SessionId,
    /// Scope the session owns
    pub scope: Scope,
}

/// One participant outcome folded into the session
#[derive(Debug, Clone)]
pub struct ParticipantResult {
    /// The reporting controller
    pub controller: ControllerId,
    /// Phase the result belongs to
    pub phase: Phase,
    /// Whether the participant succeeded
    pub success: bool,
    /// Participant-provided detail, if any
    pub message: Option<String>,
}

/// Diff computed for one record family at vote time
#[derive(Debug)]
pub struct FamilyDiff {
    /// The family the diff belongs to
    pub family: FamilyTag,
    /// The ordered, partitioned entries
    pub set: DiffSet,
}

/// A forward-applied entry in the undo log
#[derive(Debug, Clone)]
pub struct AppliedEntry {
    /// Handler family that applied the entry
    pub family: FamilyTag,
    /// The entry as applied
    pub entry: DiffEntry,
}

/// Mutable state of one commit or audit run
#[derive(Debug)]
pub struct TransactionSession {
    /// Unique id of this run
    pub id: SessionId,
    /// Caller-supplied configuration identifier
    pub config_id: u64,
    /// Scope the session exclusively owns
    pub scope: Scope,
    /// Commit or audit, with audit parameters
    pub kind: SessionKind,
    /// Current phase
    pub phase: Phase,
    /// Session creation time
    pub started_at: DateTime<Utc>,
    /// Vote-time diffs, one per participating family
    pub diffs: Vec<FamilyDiff>,
    /// Undo log in application order
    pub applied: Vec<AppliedEntry>,
    /// Participant outcomes folded so far
    pub results: Vec<ParticipantResult>,
    /// Shared resources this session registered in the catalog
    pub registered_resources: Vec<String>,
}

impl TransactionSession {
    /// Create a session in the Idle phase
    pub fn new(config_id: u64, scope: Scope, kind: SessionKind) -> Self {
        Self {
            id: SessionId::new(),
            config_id,
            scope,
            kind,
            phase: Phase::Idle,
            started_at: Utc::now(),
            diffs: Vec::new(),
            applied: Vec::new(),
            results: Vec::new(),
            registered_resources: Vec::new(),
        }
    }

    /// Whether the session drives the virtual no-op scope
    pub fn is_virtual(&self) -> bool {
        self.scope.is_virtual()
    }

    /// Controllers touched by the vote-time diffs
    pub fn touched_controllers(&self) -> Vec<(ControllerId, DomainId)> {
        let mut out: Vec<(ControllerId, DomainId)> = Vec::new();
        for diff in &self.diffs {
            for (partition, _) in diff.set.partitions() {
                if !out.contains(partition) {
                    out.push(partition.clone());
                }
            }
        }
        out
    }

    /// First failed participant result, if any
    pub fn first_failure(&self) -> Option<&ParticipantResult> {
        self.results.iter().find(|r| !r.success)
    }

    /// Total number of diff entries across families
    pub fn pending_entries(&self) -> usize {
        self.diffs.iter().map(|d| d.set.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_starts_idle() {
        let session = TransactionSession::new(1, Scope::Global, SessionKind::Commit);
        assert_eq!(session.phase, Phase::Idle);
        assert!(session.diffs.is_empty());
        assert!(session.applied.is_empty());
    }

    #[test]
    fn test_virtual_detection() {
        let session = TransactionSession::new(1, Scope::Virtual, SessionKind::Commit);
        assert!(session.is_virtual());
    }

    #[test]
    fn test_first_failure() {
        let mut session = TransactionSession::new(1, Scope::Global, SessionKind::Commit);
        session.results.push(ParticipantResult {
            controller: ControllerId::from("c1"),
            phase: Phase::GlobalCommit,
            success: true,
            message: None,
        });
        assert!(session.first_failure().is_none());
        session.results.push(ParticipantResult {
            controller: ControllerId::from("c2"),
            phase: Phase::GlobalCommit,
            success: false,
            message: Some("driver rejected".into()),
        });
        assert_eq!(
            session.first_failure().unwrap().controller,
            ControllerId::from("c2")
        );
    }
}
