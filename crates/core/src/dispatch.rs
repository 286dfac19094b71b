//! Dispatch request/response model
//!
//! One DispatchRequest is one RPC-style exchange with a remote
//! controller's driver adapter. The wire encoding is out of scope; the
//! transport trait in `traits` carries these values opaquely.

use crate::record::{ConfigRecord, RecordKey};
use crate::types::{ControllerId, DomainId};
use std::time::Duration;

/// The operation a dispatch request asks a controller to perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DispatchOp {
    /// Program a new record
    Create,
    /// Reprogram an existing record
    Update,
    /// Remove a record
    Delete,
    /// Read back records (audit / observed-state fetch)
    Fetch,
    /// Ask the controller to validate a pending change set
    Vote,
    /// Compensating request undoing a previously applied change
    Abort,
}

impl DispatchOp {
    /// Whether the remote side effect mutates controller state
    ///
    /// Mutating operations take the gate in write mode and are never
    /// silently retried; the remote side effect may already have applied
    /// when a timeout is reported.
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            DispatchOp::Create | DispatchOp::Update | DispatchOp::Delete | DispatchOp::Abort
        )
    }
}

/// One request to a controller's driver adapter
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    /// Requested operation
    pub op: DispatchOp,
    /// Record identity the request is about; None for bulk fetches
    pub key: Option<RecordKey>,
    /// Previous record value, where the operation has one
    pub old_value: Option<ConfigRecord>,
    /// New record value, where the operation has one
    pub new_value: Option<ConfigRecord>,
    /// Target controller
    pub target_controller: ControllerId,
    /// Target domain within the controller
    pub target_domain: DomainId,
    /// Bounded wait for the adapter's response
    pub timeout: Duration,
}

impl DispatchRequest {
    /// A bulk fetch of every record the controller holds
    pub fn fetch_all(controller: ControllerId, domain: DomainId, timeout: Duration) -> Self {
        Self {
            op: DispatchOp::Fetch,
            key: None,
            old_value: None,
            new_value: None,
            target_controller: controller,
            target_domain: domain,
            timeout,
        }
    }

    /// A vote request covering the controller's pending change set
    pub fn vote(controller: ControllerId, domain: DomainId, timeout: Duration) -> Self {
        Self {
            op: DispatchOp::Vote,
            key: None,
            old_value: None,
            new_value: None,
            target_controller: controller,
            target_domain: domain,
            timeout,
        }
    }
}

/// Application-level outcome of a dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    /// The controller accepted and performed the operation
    Ok,
    /// The controller refused the operation
    Rejected,
}

/// Response from a controller's driver adapter
#[derive(Debug, Clone)]
pub struct DispatchResponse {
    /// Application-level outcome
    pub code: ResultCode,
    /// Controller-provided detail for rejected operations
    pub message: Option<String>,
    /// Records returned by fetch operations
    pub records: Vec<ConfigRecord>,
}

impl DispatchResponse {
    /// A successful response with no payload
    pub fn ok() -> Self {
        Self {
            code: ResultCode::Ok,
            message: None,
            records: Vec::new(),
        }
    }

    /// A successful response carrying fetched records
    pub fn ok_with(records: Vec<ConfigRecord>) -> Self {
        Self {
            code: ResultCode::Ok,
            message: None,
            records,
        }
    }

    /// A rejection with a controller-provided reason
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            code: ResultCode::Rejected,
            message: Some(message.into()),
            records: Vec::new(),
        }
    }

    /// Whether the controller accepted the operation
    pub fn is_ok(&self) -> bool {
        self.code == ResultCode::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mutating_classification() {
        assert!(DispatchOp::Create.is_mutating());
        assert!(DispatchOp::Abort.is_mutating());
        assert!(!DispatchOp::Fetch.is_mutating());
        assert!(!DispatchOp::Vote.is_mutating());
    }

    #[test]
    fn test_response_constructors() {
        assert!(DispatchResponse::ok().is_ok());
        let rejected = DispatchResponse::rejected("no such port");
        assert!(!rejected.is_ok());
        assert_eq!(rejected.message.as_deref(), Some("no such port"));
    }
}
