//! Phase state machine tables for commit and audit sessions
//!
//! Phase transitions are strict FIFO: from any phase exactly one forward
//! successor is legal, and the coordinator rejects everything else with
//! `SequenceViolation`. The two exceptions are `GlobalAbort`, reachable
//! from any non-terminal phase, and `Cancel`, reachable from any
//! non-terminal phase of an audit session only.
//!
//! Commit:  Idle → TransactionStart → VoteRequest → GlobalCommit
//!          → DriverResult → TransactionEnd → Idle
//! Audit:   Idle → AuditStart → TransactionStart → VoteRequest
//!          → GlobalCommit → DriverResult → AuditEnd → Idle

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::ControllerId;

/// One step of the commit or audit state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// No session activity
    Idle,
    /// Audit-only entry phase: fetch the controller's observed state
    AuditStart,
    /// Session bookkeeping established, scope locked
    TransactionStart,
    /// All participants validate; nothing is applied yet
    VoteRequest,
    /// Forward changes are applied and dispatched
    GlobalCommit,
    /// Participant outcomes are folded into the session
    DriverResult,
    /// Terminal phase of a commit session
    TransactionEnd,
    /// Terminal phase of an audit session
    AuditEnd,
    /// Compensating abort, reachable from any non-terminal phase
    GlobalAbort,
    /// Audit-only cancellation, reachable before AuditEnd
    Cancel,
}

impl Phase {
    /// Whether the phase ends the session
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Phase::TransactionEnd | Phase::AuditEnd | Phase::GlobalAbort | Phase::Cancel
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::AuditStart => "audit-start",
            Phase::TransactionStart => "transaction-start",
            Phase::VoteRequest => "vote-request",
            Phase::GlobalCommit => "global-commit",
            Phase::DriverResult => "driver-result",
            Phase::TransactionEnd => "transaction-end",
            Phase::AuditEnd => "audit-end",
            Phase::GlobalAbort => "global-abort",
            Phase::Cancel => "cancel",
        };
        write!(f, "{}", name)
    }
}

/// Record selection for an audit session
///
/// Full audits diff every record owned by the controller; simplified
/// audits restrict to records that are operationally bound. The phase
/// sequence is identical for both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditType {
    /// Diff all records owned by the controller
    Full,
    /// Diff only actively bound records
    Simplified,
}

/// What kind of protocol run a session drives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionKind {
    /// Propagate locally edited configuration to controllers
    Commit,
    /// Reconcile the store against one controller's actual state
    Audit {
        /// The controller being audited
        controller: ControllerId,
        /// Record selection mode
        audit_type: AuditType,
    },
}

impl SessionKind {
    /// Whether this is an audit session
    pub fn is_audit(&self) -> bool {
        matches!(self, SessionKind::Audit { .. })
    }

    /// The legal successor of `current` for this session kind
    ///
    /// Returns None from terminal phases. `GlobalAbort` and `Cancel` are
    /// not successors; they are side exits checked separately.
    pub fn successor(&self, current: Phase) -> Option<Phase> {
        match self {
            SessionKind::Commit => match current {
                Phase::Idle => Some(Phase::TransactionStart),
                Phase::TransactionStart => Some(Phase::VoteRequest),
                Phase::VoteRequest => Some(Phase::GlobalCommit),
                Phase::GlobalCommit => Some(Phase::DriverResult),
                Phase::DriverResult => Some(Phase::TransactionEnd),
                _ => None,
            },
            SessionKind::Audit { .. } => match current {
                Phase::Idle => Some(Phase::AuditStart),
                Phase::AuditStart => Some(Phase::TransactionStart),
                Phase::TransactionStart => Some(Phase::VoteRequest),
                Phase::VoteRequest => Some(Phase::GlobalCommit),
                Phase::GlobalCommit => Some(Phase::DriverResult),
                Phase::DriverResult => Some(Phase::AuditEnd),
                _ => None,
            },
        }
    }
}
