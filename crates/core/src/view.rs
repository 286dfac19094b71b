//! Snapshot view names and record filters
//!
//! A view is a named, internally consistent set of configuration records.
//! Views are never mutated in place by the coordination layer except via
//! explicit copy/promote operations on the backend contract.

use crate::record::{ConfigRecord, RecordKey};
use crate::types::{ControllerId, FamilyTag, Scope};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Names of the snapshot views the coordination layer works with
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ViewName {
    /// Caller-editable working copy
    Working,
    /// Last successful commit
    Committed,
    /// Last known state of a specific controller, used by audit
    ControllerMirror(ControllerId),
    /// Read-only state reported by devices
    ObservedState,
}

impl fmt::Display for ViewName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViewName::Working => write!(f, "working"),
            ViewName::Committed => write!(f, "committed"),
            ViewName::ControllerMirror(id) => write!(f, "mirror:{}", id),
            ViewName::ObservedState => write!(f, "observed"),
        }
    }
}

/// Declarative record selection for backend reads
///
/// Kept declarative (no closures) so a relational backend can translate
/// it into its own query form. All present conditions must match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordFilter {
    /// Restrict to one record family
    pub family: Option<FamilyTag>,
    /// Restrict to records owned by one controller
    pub controller: Option<ControllerId>,
    /// Restrict to records inside one scope
    pub scope: Option<Scope>,
}

impl RecordFilter {
    /// Match every record
    pub fn all() -> Self {
        Self::default()
    }

    /// Match one family
    pub fn family(family: FamilyTag) -> Self {
        Self {
            family: Some(family),
            ..Self::default()
        }
    }

    /// Restrict this filter to one controller
    #[must_use]
    pub fn owned_by(mut self, controller: ControllerId) -> Self {
        self.controller = Some(controller);
        self
    }

    /// Restrict this filter to one scope
    #[must_use]
    pub fn in_scope(mut self, scope: Scope) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Whether a key could match, before looking at the record body
    pub fn matches_key(&self, key: &RecordKey) -> bool {
        if let Some(family) = &self.family {
            if &key.family != family {
                return false;
            }
        }
        if let Some(scope) = &self.scope {
            if !scope.contains(&key.path) {
                return false;
            }
        }
        true
    }

    /// Whether a full record matches
    pub fn matches(&self, record: &ConfigRecord) -> bool {
        if !self.matches_key(&record.key) {
            return false;
        }
        if let Some(controller) = &self.controller {
            if &record.owner_controller != controller {
                return false;
            }
        }
        true
    }
}
