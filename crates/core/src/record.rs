//! Configuration record model
//!
//! A ConfigRecord is one configuration object instance: a composite key,
//! a field map with per-field validity tags, ownership information,
//! cross-cutting membership flags, and apply status reported back from
//! the owning controller.
//!
//! Records are created and mutated only inside a session's working view;
//! once committed to a snapshot view they are immutable and replaced,
//! never edited in place.

use crate::types::{ControllerId, DomainId, FamilyTag};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Composite key identifying one configuration record
///
/// Keys order by family tag first, then by hierarchical path. This
/// ordering is what makes per-family scans a contiguous range and keeps
/// diff output reproducible.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    /// The record family this key belongs to
    pub family: FamilyTag,
    /// Hierarchical identity fields, outermost first
    pub path: Vec<String>,
}

impl RecordKey {
    /// Create a key from a family tag and path segments
    pub fn new(family: FamilyTag, path: Vec<String>) -> Self {
        Self { family, path }
    }

    /// Convenience constructor from string slices
    pub fn from_parts(family: &str, path: &[&str]) -> Self {
        Self {
            family: FamilyTag::new(family),
            path: path.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.family, self.path.join("/"))
    }
}

/// Per-field validity tag
///
/// Carried on every field value; capability validation only inspects
/// fields tagged `Valid` or `ValidNoValue` (the ones a controller would
/// actually be asked to program).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldValidity {
    /// Field holds a usable value
    Valid,
    /// Field is semantically present but carries no value
    ValidNoValue,
    /// Field failed validation
    Invalid,
    /// Field is not supported in this deployment
    NotSupported,
}

/// One field of a configuration record: a value plus its validity tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldValue {
    /// The raw field value; empty for ValidNoValue fields
    pub value: String,
    /// Validity of this field
    pub validity: FieldValidity,
}

impl FieldValue {
    /// A valid field carrying a value
    pub fn valid(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            validity: FieldValidity::Valid,
        }
    }

    /// A valid field carrying no value
    pub fn valid_no_value() -> Self {
        Self {
            value: String::new(),
            validity: FieldValidity::ValidNoValue,
        }
    }

    /// Whether this field would be programmed on a controller
    pub fn is_programmable(&self) -> bool {
        matches!(
            self.validity,
            FieldValidity::Valid | FieldValidity::ValidNoValue
        )
    }
}

/// Cross-cutting membership flags on a record
///
/// A record merely *referencing* a shared resource is a placeholder; only
/// records carrying one of the BOUND_* bits participate in reference
/// counting. RENAME_PENDING marks a record mid-way through shared-resource
/// rename propagation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct RecordFlags(u32);

impl RecordFlags {
    /// Record is bound via a link membership
    pub const BOUND_LINK: RecordFlags = RecordFlags(0x0001);
    /// Record is bound via a port mapping
    pub const BOUND_PORT: RecordFlags = RecordFlags(0x0002);
    /// Record is mid-way through a shared-resource rename
    pub const RENAME_PENDING: RecordFlags = RecordFlags(0x0004);

    /// No flags set
    pub fn empty() -> Self {
        RecordFlags(0)
    }

    /// Whether every bit of `other` is set in `self`
    pub fn contains(&self, other: RecordFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Union of two flag sets
    #[must_use]
    pub fn with(self, other: RecordFlags) -> Self {
        RecordFlags(self.0 | other.0)
    }

    /// Difference: `self` with the bits of `other` cleared
    #[must_use]
    pub fn without(self, other: RecordFlags) -> Self {
        RecordFlags(self.0 & !other.0)
    }

    /// Whether the record has an operationally active membership
    ///
    /// This is the conditional-counting predicate: only bound records
    /// change a shared resource's reference count.
    pub fn is_actively_bound(&self) -> bool {
        self.contains(RecordFlags::BOUND_LINK) || self.contains(RecordFlags::BOUND_PORT)
    }

    /// Raw bit value
    pub fn bits(&self) -> u32 {
        self.0
    }
}

/// Row-level or per-field apply state reported from a controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ApplyState {
    /// Configuration has been applied on the device
    Applied,
    /// Configuration has not been applied yet
    NotApplied,
    /// Some fields applied, some did not
    PartiallyApplied,
    /// The controller does not support this configuration
    NotSupported,
}

/// Apply status of a record: row level plus per-field detail
///
/// Status is observational state, not configuration intent: two records
/// differing only in status are the same configuration and must not
/// produce a diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigStatus {
    /// Row-level status
    pub row: ApplyState,
    /// Per-field status where it deviates from the row status
    pub fields: BTreeMap<String, ApplyState>,
}

impl Default for ConfigStatus {
    fn default() -> Self {
        Self {
            row: ApplyState::NotApplied,
            fields: BTreeMap::new(),
        }
    }
}

impl ConfigStatus {
    /// Status for a fully applied record
    pub fn applied() -> Self {
        Self {
            row: ApplyState::Applied,
            fields: BTreeMap::new(),
        }
    }
}

/// One configuration object instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigRecord {
    /// Composite identity of this record
    pub key: RecordKey,
    /// Field map with per-field validity tags
    pub fields: BTreeMap<String, FieldValue>,
    /// Controller that owns this record
    pub owner_controller: ControllerId,
    /// Domain within the owning controller
    pub owner_domain: DomainId,
    /// Cross-cutting membership flags
    pub flags: RecordFlags,
    /// Apply status; excluded from configuration equality
    pub status: ConfigStatus,
}

impl ConfigRecord {
    /// Create a record with empty fields and default status
    pub fn new(key: RecordKey, controller: ControllerId, domain: DomainId) -> Self {
        Self {
            key,
            fields: BTreeMap::new(),
            owner_controller: controller,
            owner_domain: domain,
            flags: RecordFlags::empty(),
            status: ConfigStatus::default(),
        }
    }

    /// Builder-style field insertion
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: FieldValue) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    /// Builder-style flag union
    #[must_use]
    pub fn with_flags(mut self, flags: RecordFlags) -> Self {
        self.flags = self.flags.with(flags);
        self
    }

    /// Configuration equality: fields and flags, ignoring apply status
    ///
    /// This is the comparison the diff layer uses. Two records that differ
    /// only in `status` describe the same configuration.
    pub fn same_config(&self, other: &ConfigRecord) -> bool {
        self.fields == other.fields && self.flags == other.flags
    }

    /// Fields a controller would be asked to program
    pub fn programmable_fields(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.fields.iter().filter(|(_, v)| v.is_programmable())
    }
}
