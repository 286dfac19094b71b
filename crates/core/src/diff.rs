//! Diff data model
//!
//! A DiffEntry is one ordered create/update/delete step needed to
//! transform snapshot view A into snapshot view B for a record family.
//! Entries are ephemeral: they exist only for the duration of one phase,
//! flowing from the diff engine to the dispatch layer.

use crate::record::{ConfigRecord, RecordKey};
use crate::types::{ControllerId, DomainId};

/// The kind of change a diff entry describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiffOp {
    /// Record exists only in the target view
    Create,
    /// Record exists in both views with differing configuration
    Update,
    /// Record exists only in the source view
    Delete,
}

impl DiffOp {
    /// Whether applying this entry mutates controller state
    pub fn is_mutating(&self) -> bool {
        // All three are mutations; reads never appear in a diff.
        true
    }
}

/// Selects which operation kinds a diff computation may emit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpFilter {
    /// Emit Create entries
    pub create: bool,
    /// Emit Update entries
    pub update: bool,
    /// Emit Delete entries
    pub delete: bool,
}

impl OpFilter {
    /// Emit every operation kind
    pub const ALL: OpFilter = OpFilter {
        create: true,
        update: true,
        delete: true,
    };

    /// Whether `op` passes this filter
    pub fn admits(&self, op: DiffOp) -> bool {
        match op {
            DiffOp::Create => self.create,
            DiffOp::Update => self.update,
            DiffOp::Delete => self.delete,
        }
    }
}

impl Default for OpFilter {
    fn default() -> Self {
        OpFilter::ALL
    }
}

/// One ordered step transforming view A into view B
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffEntry {
    /// The change kind
    pub op: DiffOp,
    /// Record as it exists in view A (absent for Create)
    pub old: Option<ConfigRecord>,
    /// Record as it should exist in view B (absent for Delete)
    pub new: Option<ConfigRecord>,
    /// Controller owning the record
    pub controller: ControllerId,
    /// Domain within that controller
    pub domain: DomainId,
    /// Dependency rank of the record's family; orders entries within a
    /// controller/domain partition
    pub rank: u16,
}

impl DiffEntry {
    /// The record identity this entry is about
    ///
    /// Create/Update report the new record's key, Delete the old one's.
    pub fn key(&self) -> &RecordKey {
        match (&self.new, &self.old) {
            (Some(rec), _) => &rec.key,
            (None, Some(rec)) => &rec.key,
            // Construction always supplies at least one side.
            (None, None) => unreachable!("diff entry with neither old nor new record"),
        }
    }

    /// The record that carries this entry's configuration intent
    pub fn effective(&self) -> &ConfigRecord {
        match self.op {
            DiffOp::Delete => self.old.as_ref().expect("delete entry without old record"),
            _ => self.new.as_ref().expect("create/update entry without new record"),
        }
    }
}
