//! Concurrency layer for confsync
//!
//! This crate implements the two concurrency primitives the coordination
//! protocols lean on:
//! - ControllerAccessGate: per-controller read/write/delete-drain/
//!   update-drain admission with configurable writer fairness
//! - RefCountLedger: two-phase (speculative delta, atomic fold)
//!   accounting of shared-resource references, with the profile catalog
//!   for semantic existence checks

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod gate;
pub mod ledger;

pub use gate::{
    AdmitMode, ControllerAccessGate, DeleteGuard, FairnessPolicy, ReadPermit, UpdateGuard,
    WritePermit,
};
pub use ledger::{RefCountKey, RefCountLedger, ResourcePresence};
