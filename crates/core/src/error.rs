//! Error taxonomy for the coordination layer
//!
//! Every caller-visible outcome is one variant of `CoordError`; there are
//! no sentinel integers and no per-module error types. We use `thiserror`
//! for automatic `Display` and `Error` trait implementations.
//!
//! Propagation policy:
//! - Validation errors (`NotSupportedByController`, `ResourceNotFound`)
//!   are detected before any mutating RPC and abort the session with no
//!   side effects beyond the working view.
//! - RPC errors during the vote phase (`ControllerDisconnected`,
//!   `Timeout`) abort the whole session cleanly.
//! - RPC errors during global-commit surface as `PartialFailure` carrying
//!   the first failing record; the compensating abort is best-effort.

use crate::phase::Phase;
use crate::record::RecordKey;
use crate::types::{ControllerId, FamilyTag, Scope, SessionId};
use thiserror::Error;

/// Result type alias for coordination operations
pub type CoordResult<T> = std::result::Result<T, CoordError>;

/// All caller-visible error outcomes of the coordination layer
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoordError {
    /// An active session already owns the requested scope
    #[error("scope busy: {scope} is owned by session {owner}")]
    ScopeBusy {
        /// The contested scope
        scope: Scope,
        /// The session currently owning it
        owner: SessionId,
    },

    /// A phase was requested out of order
    #[error("sequence violation: {requested} requested while in {current}")]
    SequenceViolation {
        /// The session's current phase
        current: Phase,
        /// The illegally requested phase
        requested: Phase,
    },

    /// A programmable field is not supported by the target controller
    #[error("field {field:?} of family {family} not supported by controller {controller}")]
    NotSupportedByController {
        /// The rejecting controller
        controller: ControllerId,
        /// The record family being validated
        family: FamilyTag,
        /// The unsupported field
        field: String,
    },

    /// A referenced shared resource does not exist in the profile catalog
    #[error("resource {resource:?} not found in scope {scope}")]
    ResourceNotFound {
        /// The missing resource name
        resource: String,
        /// The scope that was searched
        scope: Scope,
    },

    /// A ledger adjustment would drive a committed count below zero
    #[error("refcount underflow for {resource:?} on controller {controller}")]
    WouldGoNegative {
        /// The shared resource
        resource: String,
        /// The controller the count is tracked for
        controller: ControllerId,
    },

    /// The controller's connection gate rejected the operation
    #[error("controller {controller} disconnected")]
    ControllerDisconnected {
        /// The unreachable controller
        controller: ControllerId,
    },

    /// The controller exists but cannot accept a new session
    #[error("controller {controller} unavailable")]
    ControllerUnavailable {
        /// The unavailable controller
        controller: ControllerId,
    },

    /// A dispatched request did not answer within its bounded wait
    #[error("dispatch to controller {controller} timed out")]
    Timeout {
        /// The unresponsive controller
        controller: ControllerId,
    },

    /// Some participants committed while others aborted
    ///
    /// Carries the identity of the first failing record; the coordinator
    /// has already issued best-effort compensating aborts.
    #[error("partial failure at record {key} on controller {controller}")]
    PartialFailure {
        /// The first record whose application failed
        key: RecordKey,
        /// The controller it was dispatched to
        controller: ControllerId,
    },

    /// Concurrent modification detected at ledger fold time
    #[error("refcount conflict for {resource:?} at fold time")]
    Conflict {
        /// The contested resource
        resource: String,
    },

    /// The session handle does not name a live session
    #[error("unknown or finished session {session}")]
    InvalidSession {
        /// The stale session id
        session: SessionId,
    },

    /// Cancellation requested for a session kind or phase that has none
    #[error("cancel not allowed for session {session} in phase {phase}")]
    CancelNotAllowed {
        /// The session that was asked to cancel
        session: SessionId,
        /// Its current phase
        phase: Phase,
    },

    /// Snapshot backend failure
    #[error("store error: {message}")]
    Store {
        /// Backend-provided description
        message: String,
    },
}

impl CoordError {
    /// Shorthand for a backend failure
    pub fn store(message: impl Into<String>) -> Self {
        CoordError::Store {
            message: message.into(),
        }
    }

    /// Whether this error was produced before any mutating RPC
    ///
    /// Validation-stage errors leave no side effects beyond the working
    /// view, so callers may correct and resubmit the same session scope.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            CoordError::NotSupportedByController { .. } | CoordError::ResourceNotFound { .. }
        )
    }
}
