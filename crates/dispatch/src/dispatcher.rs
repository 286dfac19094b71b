//! Per-controller dispatch of requests to the driver adapter
//!
//! One ControllerDispatcher serves one controller. Every dispatch
//! acquires the controller's access gate first: write mode for mutating
//! operations, read mode for fetches and votes. A gate that is marked
//! for delete (or whose controller was removed) rejects the dispatch
//! with `ControllerDisconnected` before any RPC is attempted.
//!
//! Timeouts are terminal for mutating operations: the remote side effect
//! may already have applied, so the error propagates to the caller,
//! which aborts the session. Read operations are retried under the
//! bounded policy; those retries are invisible to callers.

use crate::retry::RetryPolicy;
use confsync_concurrency::{AdmitMode, ControllerAccessGate};
use confsync_core::dispatch::{DispatchRequest, DispatchResponse};
use confsync_core::error::{CoordError, CoordResult};
use confsync_core::traits::DriverTransport;
use std::sync::Arc;
use std::thread;
use tracing::{debug, warn};

/// Dispatches requests to one controller's driver adapter through its
/// access gate
pub struct ControllerDispatcher {
    gate: ControllerAccessGate,
    transport: Arc<dyn DriverTransport>,
    retry: RetryPolicy,
}

impl ControllerDispatcher {
    /// Create a dispatcher over a gate and a transport
    pub fn new(
        gate: ControllerAccessGate,
        transport: Arc<dyn DriverTransport>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            gate,
            transport,
            retry,
        }
    }

    /// The gate this dispatcher acquires
    pub fn gate(&self) -> &ControllerAccessGate {
        &self.gate
    }

    /// Perform one request/response exchange
    ///
    /// # Errors
    /// `ControllerDisconnected` when the gate rejects admission,
    /// `Timeout` when the adapter does not answer within the request's
    /// bound (after exhausting the read-only retry budget).
    pub fn dispatch(&self, request: &DispatchRequest) -> CoordResult<DispatchResponse> {
        if request.op.is_mutating() {
            let _permit = self.gate.begin_write(AdmitMode::Fail)?;
            debug!(
                target: "confsync::dispatch",
                controller = %request.target_controller,
                op = ?request.op,
                "Dispatching mutation"
            );
            // Never retried: the remote side effect may have applied.
            self.transport.send(request)
        } else {
            let _permit = self.gate.begin_read(AdmitMode::Fail)?;
            self.dispatch_read(request)
        }
    }

    fn dispatch_read(&self, request: &DispatchRequest) -> CoordResult<DispatchResponse> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.transport.send(request) {
                Ok(response) => return Ok(response),
                Err(CoordError::Timeout { controller }) if attempt < self.retry.attempts() => {
                    warn!(
                        target: "confsync::dispatch",
                        controller = %controller,
                        attempt,
                        "Read dispatch timed out, retrying"
                    );
                    thread::sleep(self.retry.backoff());
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use confsync_concurrency::FairnessPolicy;
    use confsync_core::dispatch::{DispatchOp, DispatchResponse};
    use confsync_core::types::{ControllerId, DomainId};
    use parking_lot::Mutex;
    use std::time::Duration;

    /// Transport scripted with a queue of responses
    struct ScriptedTransport {
        script: Mutex<Vec<CoordResult<DispatchResponse>>>,
        sends: Mutex<u32>,
    }

    impl ScriptedTransport {
        fn new(script: Vec<CoordResult<DispatchResponse>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script),
                sends: Mutex::new(0),
            })
        }

        fn sends(&self) -> u32 {
            *self.sends.lock()
        }
    }

    impl DriverTransport for ScriptedTransport {
        fn send(&self, _request: &DispatchRequest) -> CoordResult<DispatchResponse> {
            *self.sends.lock() += 1;
            let mut script = self.script.lock();
            if script.is_empty() {
                Ok(DispatchResponse::ok())
            } else {
                script.remove(0)
            }
        }
    }

    fn ctrl() -> ControllerId {
        ControllerId::from("ctrl1")
    }

    fn timeout_err() -> CoordError {
        CoordError::Timeout { controller: ctrl() }
    }

    fn fetch() -> DispatchRequest {
        DispatchRequest::fetch_all(ctrl(), DomainId::root(), Duration::from_millis(100))
    }

    fn mutation() -> DispatchRequest {
        DispatchRequest {
            op: DispatchOp::Delete,
            key: None,
            old_value: None,
            new_value: None,
            target_controller: ctrl(),
            target_domain: DomainId::root(),
            timeout: Duration::from_millis(100),
        }
    }

    fn dispatcher(transport: Arc<ScriptedTransport>) -> ControllerDispatcher {
        let gate = ControllerAccessGate::new(ctrl(), FairnessPolicy::FifoWriters);
        ControllerDispatcher::new(
            gate,
            transport,
            RetryPolicy {
                max_retries: 2,
                backoff_ms: 1,
            },
        )
    }

    #[test]
    fn test_read_retried_after_timeout() {
        let transport = ScriptedTransport::new(vec![
            Err(timeout_err()),
            Ok(DispatchResponse::ok()),
        ]);
        let dispatcher = dispatcher(Arc::clone(&transport));
        let response = dispatcher.dispatch(&fetch()).unwrap();
        assert!(response.is_ok());
        assert_eq!(transport.sends(), 2);
    }

    #[test]
    fn test_read_retry_budget_exhausted() {
        let transport = ScriptedTransport::new(vec![
            Err(timeout_err()),
            Err(timeout_err()),
            Err(timeout_err()),
        ]);
        let dispatcher = dispatcher(Arc::clone(&transport));
        let err = dispatcher.dispatch(&fetch()).unwrap_err();
        assert!(matches!(err, CoordError::Timeout { .. }));
        assert_eq!(transport.sends(), 3);
    }

    #[test]
    fn test_mutation_never_retried() {
        let transport = ScriptedTransport::new(vec![Err(timeout_err())]);
        let dispatcher = dispatcher(Arc::clone(&transport));
        let err = dispatcher.dispatch(&mutation()).unwrap_err();
        assert!(matches!(err, CoordError::Timeout { .. }));
        assert_eq!(transport.sends(), 1);
    }

    #[test]
    fn test_gate_rejection_skips_rpc() {
        let transport = ScriptedTransport::new(vec![]);
        let dispatcher = dispatcher(Arc::clone(&transport));
        let _delete = dispatcher.gate().request_delete().unwrap();

        let err = dispatcher.dispatch(&mutation()).unwrap_err();
        assert!(matches!(err, CoordError::ControllerDisconnected { .. }));
        let err = dispatcher.dispatch(&fetch()).unwrap_err();
        assert!(matches!(err, CoordError::ControllerDisconnected { .. }));
        assert_eq!(transport.sends(), 0);
    }
}
