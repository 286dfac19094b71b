//! External-collaborator contracts
//!
//! These traits are the seams between the coordination core and its
//! collaborators: the persistent snapshot backend, the per-controller
//! capability table, the driver RPC transport, and the session
//! notification sink. The core never issues schema-specific queries or
//! touches a wire format itself.

use crate::diff::DiffOp;
use crate::dispatch::{DispatchRequest, DispatchResponse};
use crate::error::CoordResult;
use crate::phase::Phase;
use crate::record::{ConfigRecord, RecordKey};
use crate::types::{ControllerId, FamilyTag, Scope, SessionId};
use crate::view::{RecordFilter, ViewName};
use std::collections::BTreeSet;

/// Persistent snapshot backend contract
///
/// Exposes versioned multi-view record storage through a minimal
/// read/write contract. The shipped in-memory implementation lives in
/// `confsync-store`; a relational backend implements the same trait.
///
/// Thread safety: all methods must be safe to call concurrently
/// (requires Send + Sync).
pub trait SnapshotBackend: Send + Sync {
    /// Read all records in `view` matching `filter`, sorted by key
    ///
    /// # Errors
    /// Returns an error if the backend cannot serve the view.
    fn read(&self, view: &ViewName, filter: &RecordFilter) -> CoordResult<Vec<ConfigRecord>>;

    /// Read one record by key
    ///
    /// # Errors
    /// Returns an error if the backend cannot serve the view.
    fn get(&self, view: &ViewName, key: &RecordKey) -> CoordResult<Option<ConfigRecord>>;

    /// Insert or replace records in `view`
    ///
    /// # Errors
    /// Returns an error if the backend cannot write the view.
    fn write(&self, view: &ViewName, records: Vec<ConfigRecord>) -> CoordResult<()>;

    /// Remove records from `view` by key; missing keys are ignored
    ///
    /// # Errors
    /// Returns an error if the backend cannot write the view.
    fn remove(&self, view: &ViewName, keys: &[RecordKey]) -> CoordResult<()>;

    /// Copy all records matching `filter` from one view into another,
    /// replacing the target's matching subset. Returns the number of
    /// records promoted.
    ///
    /// # Errors
    /// Returns an error if either view cannot be accessed.
    fn promote(
        &self,
        from: &ViewName,
        to: &ViewName,
        filter: &RecordFilter,
    ) -> CoordResult<usize>;
}

/// Per-controller capability table
///
/// Supplies, per (controller, family, operation), the set of fields the
/// controller can program. Capability negotiation content is out of
/// scope; the core only needs this yes/no-per-field gate.
pub trait CapabilityTable: Send + Sync {
    /// Fields the controller supports for this family and operation
    ///
    /// Returns None when the controller does not support the operation
    /// on this family at all.
    fn allowed_fields(
        &self,
        controller: &ControllerId,
        family: &FamilyTag,
        op: DiffOp,
    ) -> Option<BTreeSet<String>>;
}

/// Driver RPC transport
///
/// Sends one request to a controller's driver adapter and waits at most
/// `request.timeout` for the response. The bit-exact wire format is the
/// transport's business.
pub trait DriverTransport: Send + Sync {
    /// Perform one request/response exchange
    ///
    /// # Errors
    /// `Timeout` if the adapter does not answer within the bound,
    /// `ControllerDisconnected` if the transport has no route.
    fn send(&self, request: &DispatchRequest) -> CoordResult<DispatchResponse>;
}

/// Session notification sink
///
/// Receives phase-transition events for external observability. Calls
/// are fire-and-forget and implementations must never block the
/// coordinator.
pub trait SessionEventSink: Send + Sync {
    /// A session moved to a new phase
    fn phase_changed(&self, session: SessionId, scope: &Scope, phase: Phase);
}

/// A sink that drops every event
///
/// Useful as a default and in tests that do not observe transitions.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventSink;

impl SessionEventSink for NullEventSink {
    fn phase_changed(&self, _session: SessionId, _scope: &Scope, _phase: Phase) {}
}
