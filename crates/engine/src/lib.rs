//! Coordination engine for confsync
//!
//! The top of the stack: the ConfigServiceHandler contract with its
//! generic schema-driven implementation, the explicit handler and
//! controller registries, and the TransactionCoordinator driving the
//! commit and audit phase machines over everything below.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod coordinator;
pub mod events;
pub mod families;
pub mod handler;
pub mod registry;
pub mod session;

pub use config::CoordinatorConfig;
pub use coordinator::{CoordinatorStats, TransactionCoordinator};
pub use events::TracingEventSink;
pub use handler::{
    ConfigServiceHandler, DefaultHooks, FamilyHooks, HandlerContext, RenameReport, SchemaHandler,
};
pub use registry::{ControllerEntry, ControllerRegistry, HandlerRegistry};
pub use session::{ParticipantResult, SessionHandle, TransactionSession};
