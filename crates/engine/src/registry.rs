//! Explicit handler and controller registries
//!
//! Both registries are constructed at startup and passed by reference
//! through the coordinator; nothing here is process-wide state. The
//! controller registry owns each controller's access gate and
//! dispatcher, and drives the drain-then-remove protocol when a
//! controller entry is deleted.

use confsync_concurrency::{ControllerAccessGate, FairnessPolicy};
use confsync_core::error::{CoordError, CoordResult};
use confsync_core::traits::DriverTransport;
use confsync_core::types::{ControllerId, DomainId, FamilyTag};
use confsync_dispatch::{ControllerDispatcher, RetryPolicy};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

use crate::handler::ConfigServiceHandler;

/// Registry of per-family handlers
pub struct HandlerRegistry {
    handlers: DashMap<FamilyTag, Arc<dyn ConfigServiceHandler>>,
}

impl HandlerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            handlers: DashMap::new(),
        }
    }

    /// Register a handler for its family
    ///
    /// Re-registering a family replaces the previous handler.
    pub fn register(&self, handler: Arc<dyn ConfigServiceHandler>) {
        info!(
            target: "confsync::registry",
            family = %handler.family(),
            rank = handler.rank(),
            "Handler registered"
        );
        self.handlers.insert(handler.family().clone(), handler);
    }

    /// Look up the handler for a family
    pub fn get(&self, family: &FamilyTag) -> Option<Arc<dyn ConfigServiceHandler>> {
        self.handlers.get(family).map(|h| h.clone())
    }

    /// Handlers in dependency-rank order (ties by family tag)
    pub fn ordered(&self) -> Vec<Arc<dyn ConfigServiceHandler>> {
        let mut out: Vec<Arc<dyn ConfigServiceHandler>> =
            self.handlers.iter().map(|h| h.value().clone()).collect();
        out.sort_by(|a, b| {
            a.rank()
                .cmp(&b.rank())
                .then_with(|| a.family().cmp(b.family()))
        });
        out
    }

    /// Number of registered handlers
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handlers are registered
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// One registered controller: identity, dispatcher, connection state
pub struct ControllerEntry {
    /// Controller identity
    pub id: ControllerId,
    /// Domain the controller serves
    pub domain: DomainId,
    /// Dispatcher owning the controller's gate
    pub dispatcher: Arc<ControllerDispatcher>,
    connected: AtomicBool,
}

impl ControllerEntry {
    /// The controller's access gate
    pub fn gate(&self) -> &ControllerAccessGate {
        self.dispatcher.gate()
    }

    /// Whether the controller is currently connected
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}

/// Registry of controllers and their dispatch plumbing
pub struct ControllerRegistry {
    entries: DashMap<ControllerId, Arc<ControllerEntry>>,
}

impl ControllerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Register a controller, constructing its gate and dispatcher
    ///
    /// Newly registered controllers start connected.
    pub fn register(
        &self,
        id: ControllerId,
        domain: DomainId,
        transport: Arc<dyn DriverTransport>,
        fairness: FairnessPolicy,
        retry: RetryPolicy,
    ) -> Arc<ControllerEntry> {
        let gate = ControllerAccessGate::new(id.clone(), fairness);
        let dispatcher = Arc::new(ControllerDispatcher::new(gate, transport, retry));
        let entry = Arc::new(ControllerEntry {
            id: id.clone(),
            domain,
            dispatcher,
            connected: AtomicBool::new(true),
        });
        info!(target: "confsync::registry", controller = %id, "Controller registered");
        self.entries.insert(id, Arc::clone(&entry));
        entry
    }

    /// Look up a controller entry
    pub fn get(&self, id: &ControllerId) -> Option<Arc<ControllerEntry>> {
        self.entries.get(id).map(|e| e.clone())
    }

    /// All registered controllers
    pub fn all(&self) -> Vec<Arc<ControllerEntry>> {
        self.entries.iter().map(|e| e.value().clone()).collect()
    }

    /// Mark a controller's connection state
    pub fn set_connected(&self, id: &ControllerId, connected: bool) -> CoordResult<()> {
        let entry = self.get(id).ok_or_else(|| CoordError::ControllerUnavailable {
            controller: id.clone(),
        })?;
        entry.connected.store(connected, Ordering::Relaxed);
        Ok(())
    }

    /// Remove a controller, draining its gate first
    ///
    /// Sets the delete mark, waits for in-flight dispatches to finish,
    /// closes the gate for good, and drops the entry. Operations issued
    /// while draining are held back or failed per their admit mode.
    ///
    /// # Errors
    /// `ControllerUnavailable` if the controller is unknown or another
    /// delete is already draining.
    pub fn deregister(&self, id: &ControllerId) -> CoordResult<()> {
        let entry = self.get(id).ok_or_else(|| CoordError::ControllerUnavailable {
            controller: id.clone(),
        })?;
        let guard = entry.gate().request_delete()?;
        guard.complete();
        self.entries.remove(id);
        info!(target: "confsync::registry", controller = %id, "Controller deregistered");
        Ok(())
    }
}

impl Default for ControllerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use confsync_core::dispatch::{DispatchRequest, DispatchResponse};
    use confsync_core::error::CoordResult;

    struct OkTransport;

    impl DriverTransport for OkTransport {
        fn send(&self, _request: &DispatchRequest) -> CoordResult<DispatchResponse> {
            Ok(DispatchResponse::ok())
        }
    }

    fn registry_with(id: &str) -> ControllerRegistry {
        let registry = ControllerRegistry::new();
        registry.register(
            ControllerId::from(id),
            DomainId::root(),
            Arc::new(OkTransport),
            FairnessPolicy::FifoWriters,
            RetryPolicy::none(),
        );
        registry
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = registry_with("c1");
        let entry = registry.get(&ControllerId::from("c1")).unwrap();
        assert!(entry.is_connected());
        assert!(registry.get(&ControllerId::from("missing")).is_none());
    }

    #[test]
    fn test_set_connected() {
        let registry = registry_with("c1");
        registry.set_connected(&ControllerId::from("c1"), false).unwrap();
        assert!(!registry.get(&ControllerId::from("c1")).unwrap().is_connected());
        assert!(registry.set_connected(&ControllerId::from("nope"), true).is_err());
    }

    #[test]
    fn test_deregister_closes_gate() {
        let registry = registry_with("c1");
        let entry = registry.get(&ControllerId::from("c1")).unwrap();
        registry.deregister(&ControllerId::from("c1")).unwrap();
        assert!(registry.get(&ControllerId::from("c1")).is_none());
        assert!(entry.gate().is_removed());
    }
}
