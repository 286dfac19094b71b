//! Confsync - control-plane coordination core for networked
//! configuration stores
//!
//! Confsync keeps a logically versioned configuration store (working,
//! committed, per-controller mirror, and observed-state snapshot views)
//! consistent across many independently managed remote device
//! controllers. Two multi-phase protocols drive it: **commit**
//! propagates locally edited configuration out to controllers, and
//! **audit** reconciles the store against what a reconnected controller
//! actually holds.
//!
//! # Quick Start
//!
//! ```ignore
//! use confsync::{
//!     CoordinatorConfig, Scope, TransactionCoordinator, Phase,
//! };
//!
//! let coordinator = TransactionCoordinator::new(backend, caps, sink,
//!     CoordinatorConfig::default())?;
//! coordinator.register_handler(confsync::families::profile_handler());
//! coordinator.register_controller(ctrl_id, domain, transport);
//!
//! let session = coordinator.begin_commit(Scope::subtree("tenantA"), 1)?;
//! coordinator.advance_phase(&session, Phase::VoteRequest)?;
//! coordinator.advance_phase(&session, Phase::GlobalCommit)?;
//! coordinator.advance_phase(&session, Phase::DriverResult)?;
//! coordinator.end_commit(&session)?;
//! ```
//!
//! # Architecture
//!
//! The workspace layers, leaves first: `confsync-core` (types, error
//! taxonomy, collaborator contracts), `confsync-store` (snapshot views,
//! scratch overlay, diff engine), `confsync-concurrency` (controller
//! access gates, reference-count ledger), `confsync-dispatch` (gated
//! driver dispatch with read retries), and `confsync-engine` (handlers,
//! registries, the phase state machine). This facade re-exports the
//! public surface of all five.

pub use confsync_core::{
    ApplyState, AuditType, CapabilityTable, ConfigRecord, ConfigStatus, ControllerId, CoordError,
    CoordResult, DiffEntry, DiffOp, DispatchOp, DispatchRequest, DispatchResponse, DomainId,
    DriverTransport, FamilyTag, FieldSpec, FieldValidity, FieldValue, NullEventSink, OpFilter,
    Phase, RecordFilter, RecordFlags, RecordKey, RecordSchema, ResultCode, Scope, SessionEventSink,
    SessionId, SessionKind, SnapshotBackend, ViewName,
};

pub use confsync_concurrency::{
    AdmitMode, ControllerAccessGate, FairnessPolicy, RefCountLedger, ResourcePresence,
};
pub use confsync_dispatch::{ControllerDispatcher, RetryPolicy};
pub use confsync_store::{DiffEngine, DiffSet, SnapshotStore};

pub use confsync_engine::{
    families, ConfigServiceHandler, ControllerRegistry, CoordinatorConfig, CoordinatorStats,
    DefaultHooks, FamilyHooks, HandlerContext, HandlerRegistry, RenameReport, SchemaHandler,
    SessionHandle, TracingEventSink, TransactionCoordinator,
};
