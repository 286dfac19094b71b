//! Core identifiers for the coordination layer
//!
//! This module defines the foundational identity types:
//! - SessionId: unique identifier for one commit or audit run
//! - ControllerId / DomainId: addressing for remote device controllers
//! - Scope: the configuration subtree a session exclusively owns
//! - FamilyTag: discriminator for configuration record families

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for one transaction or audit session
///
/// A SessionId is a wrapper around a UUID v4. Every commit and audit run
/// gets its own SessionId; ledger deltas and scratch overlays are keyed
/// by it so a session's speculative state can be folded or discarded
/// as a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Create a new random SessionId using UUID v4
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a SessionId from a string representation
    ///
    /// Accepts standard UUID format (with or without hyphens).
    /// Returns None if the string is not a valid UUID.
    pub fn from_string(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }

    /// Get the raw bytes of this SessionId
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier for one remote device controller
///
/// Controllers are independently managed endpoints; each one owns a
/// connection gate and a dispatcher. The id is opaque to the core.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ControllerId(String);

impl ControllerId {
    /// Create a controller id from any string-like value
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ControllerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ControllerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier for a domain within a controller
///
/// Some controllers partition their configuration into domains; dispatch
/// requests carry both the controller and the domain they target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DomainId(String);

impl DomainId {
    /// Create a domain id from any string-like value
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The default domain used by controllers that do not partition
    pub fn root() -> Self {
        Self("default".to_string())
    }
}

impl fmt::Display for DomainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DomainId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// The configuration subtree a session exclusively owns
///
/// At most one active session may own a concrete scope at a time. The
/// virtual scope never conflicts with anything and short-circuits the
/// whole phase sequence as a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Scope {
    /// The entire configuration tree
    Global,
    /// A named subtree, e.g. one tenant
    Subtree(String),
    /// A no-op scope; always accepted, never conflicts
    Virtual,
}

impl Scope {
    /// Create a named-subtree scope
    pub fn subtree(name: impl Into<String>) -> Self {
        Scope::Subtree(name.into())
    }

    /// Whether this scope is the virtual no-op scope
    pub fn is_virtual(&self) -> bool {
        matches!(self, Scope::Virtual)
    }

    /// Whether a record path falls inside this scope
    ///
    /// Global contains everything; a subtree contains paths whose first
    /// segment equals the subtree name; the virtual scope contains nothing.
    pub fn contains(&self, path: &[String]) -> bool {
        match self {
            Scope::Global => true,
            Scope::Subtree(name) => path.first().map(|s| s == name).unwrap_or(false),
            Scope::Virtual => false,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Global => write!(f, "global"),
            Scope::Subtree(name) => write!(f, "subtree:{}", name),
            Scope::Virtual => write!(f, "virtual"),
        }
    }
}

/// Type discriminator for configuration record families
///
/// Every configuration object belongs to exactly one family (its schema,
/// validity rules, and handler are registered per family). The tag is an
/// interned string; ordering is lexicographic for stable iteration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FamilyTag(String);

impl FamilyTag {
    /// Create a family tag from any string-like value
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    /// The tag as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FamilyTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for FamilyTag {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_unique() {
        let a = SessionId::new();
        let b = SessionId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_session_id_roundtrip() {
        let id = SessionId::new();
        let parsed = SessionId::from_string(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_scope_contains() {
        let tenant = Scope::subtree("tenantA");
        assert!(tenant.contains(&["tenantA".into(), "if0".into()]));
        assert!(!tenant.contains(&["tenantB".into()]));
        assert!(!tenant.contains(&[]));

        assert!(Scope::Global.contains(&["anything".into()]));
        assert!(!Scope::Virtual.contains(&["anything".into()]));
    }

    #[test]
    fn test_scope_display() {
        assert_eq!(Scope::Global.to_string(), "global");
        assert_eq!(Scope::subtree("t1").to_string(), "subtree:t1");
        assert_eq!(Scope::Virtual.to_string(), "virtual");
    }
}
