//! Core types and contracts for the confsync coordination layer
//!
//! This crate defines the foundational data model shared by every other
//! crate in the workspace:
//! - identity types (sessions, controllers, scopes, record families)
//! - the configuration record model with field validity and apply status
//! - snapshot view names and declarative record filters
//! - the commit/audit phase tables
//! - the diff and dispatch data model
//! - the single error taxonomy
//! - the external-collaborator traits (backend, capabilities, transport,
//!   event sink) and the declarative record-schema descriptor
//!
//! It has no internal dependencies; everything else builds on it.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod diff;
pub mod dispatch;
pub mod error;
pub mod phase;
pub mod record;
pub mod schema;
pub mod traits;
pub mod types;
pub mod view;

pub use diff::{DiffEntry, DiffOp, OpFilter};
pub use dispatch::{DispatchOp, DispatchRequest, DispatchResponse, ResultCode};
pub use error::{CoordError, CoordResult};
pub use phase::{AuditType, Phase, SessionKind};
pub use record::{
    ApplyState, ConfigRecord, ConfigStatus, FieldValidity, FieldValue, RecordFlags, RecordKey,
};
pub use schema::{FieldSpec, RecordSchema};
pub use traits::{CapabilityTable, DriverTransport, NullEventSink, SessionEventSink, SnapshotBackend};
pub use types::{ControllerId, DomainId, FamilyTag, Scope, SessionId};
pub use view::{RecordFilter, ViewName};
