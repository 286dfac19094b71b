//! Shared fixtures for engine integration tests
//!
//! Builds a coordinator over the in-memory store with the profile and
//! port-binding families, two controllers backed by scriptable fake
//! transports, and a capability table that allows everything until a
//! test denies something.

// Not every test binary touches every fixture.
#![allow(dead_code)]

use confsync_core::dispatch::{DispatchOp, DispatchRequest, DispatchResponse};
use confsync_core::error::{CoordError, CoordResult};
use confsync_core::record::{ConfigRecord, FieldValue, RecordFlags, RecordKey};
use confsync_core::traits::{CapabilityTable, DriverTransport, NullEventSink, SnapshotBackend};
use confsync_core::types::{ControllerId, DomainId, FamilyTag, Scope};
use confsync_core::DiffOp;
use confsync_dispatch::RetryPolicy;
use confsync_engine::families::{port_binding_handler, profile_handler};
use confsync_engine::{CoordinatorConfig, SessionHandle, TransactionCoordinator};
use confsync_store::SnapshotStore;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Capability table that allows every known field unless a test denies
/// a specific (controller, family, field) or a whole operation.
#[derive(Default)]
pub struct TestCaps {
    denied_fields: Mutex<HashSet<(ControllerId, FamilyTag, String)>>,
    denied_ops: Mutex<HashSet<(ControllerId, FamilyTag)>>,
}

impl TestCaps {
    pub fn deny_field(&self, controller: &str, family: &str, field: &str) {
        self.denied_fields.lock().insert((
            ControllerId::from(controller),
            FamilyTag::from(family),
            field.to_string(),
        ));
    }

    pub fn deny_op(&self, controller: &str, family: &str) {
        self.denied_ops
            .lock()
            .insert((ControllerId::from(controller), FamilyTag::from(family)));
    }
}

impl CapabilityTable for TestCaps {
    fn allowed_fields(
        &self,
        controller: &ControllerId,
        family: &FamilyTag,
        _op: DiffOp,
    ) -> Option<BTreeSet<String>> {
        if self
            .denied_ops
            .lock()
            .contains(&(controller.clone(), family.clone()))
        {
            return None;
        }
        let mut fields: BTreeSet<String> = ["port", "profile", "rate", "burst"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        for (ctrl, fam, field) in self.denied_fields.lock().iter() {
            if ctrl == controller && fam == family {
                fields.remove(field);
            }
        }
        Some(fields)
    }
}

/// Scriptable transport: records every request, optionally times out on
/// votes or rejects a given operation, and answers fetches with a
/// test-provided observed state.
#[derive(Default)]
pub struct FakeTransport {
    pub log: Mutex<Vec<(DispatchOp, Option<RecordKey>)>>,
    fail_votes: AtomicBool,
    reject_op: Mutex<Option<DispatchOp>>,
    observed: Mutex<Vec<ConfigRecord>>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_votes(&self) {
        self.fail_votes.store(true, Ordering::SeqCst);
    }

    pub fn reject(&self, op: DispatchOp) {
        *self.reject_op.lock() = Some(op);
    }

    pub fn set_observed(&self, records: Vec<ConfigRecord>) {
        *self.observed.lock() = records;
    }

    pub fn ops(&self) -> Vec<DispatchOp> {
        self.log.lock().iter().map(|(op, _)| *op).collect()
    }

    pub fn saw(&self, op: DispatchOp) -> bool {
        self.ops().contains(&op)
    }
}

impl DriverTransport for FakeTransport {
    fn send(&self, request: &DispatchRequest) -> CoordResult<DispatchResponse> {
        self.log
            .lock()
            .push((request.op, request.key.clone()));
        match request.op {
            DispatchOp::Vote if self.fail_votes.load(Ordering::SeqCst) => {
                Err(CoordError::Timeout {
                    controller: request.target_controller.clone(),
                })
            }
            DispatchOp::Fetch => Ok(DispatchResponse::ok_with(self.observed.lock().clone())),
            op if *self.reject_op.lock() == Some(op) => {
                Ok(DispatchResponse::rejected("scripted rejection"))
            }
            _ => Ok(DispatchResponse::ok()),
        }
    }
}

pub struct Harness {
    pub coordinator: TransactionCoordinator,
    pub store: Arc<SnapshotStore>,
    pub caps: Arc<TestCaps>,
    pub transport1: Arc<FakeTransport>,
    pub transport2: Arc<FakeTransport>,
}

pub fn ctrl1() -> ControllerId {
    ControllerId::from("ctrl1")
}

pub fn ctrl2() -> ControllerId {
    ControllerId::from("ctrl2")
}

pub fn harness() -> Harness {
    // Capture coordinator logs when a test runs with --nocapture.
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let store = Arc::new(SnapshotStore::new());
    let caps = Arc::new(TestCaps::default());
    let config = CoordinatorConfig {
        dispatch_timeout_ms: 200,
        retry: RetryPolicy::none(),
        pool_size: 2,
        ..CoordinatorConfig::default()
    };
    let coordinator = TransactionCoordinator::new(
        Arc::clone(&store) as Arc<dyn SnapshotBackend>,
        Arc::clone(&caps) as _,
        Arc::new(NullEventSink),
        config,
    )
    .unwrap();
    coordinator.register_handler(profile_handler());
    coordinator.register_handler(port_binding_handler());

    let transport1 = FakeTransport::new();
    let transport2 = FakeTransport::new();
    coordinator.register_controller(ctrl1(), DomainId::root(), Arc::clone(&transport1) as _);
    coordinator.register_controller(ctrl2(), DomainId::root(), Arc::clone(&transport2) as _);

    Harness {
        coordinator,
        store,
        caps,
        transport1,
        transport2,
    }
}

pub fn profile_record(name: &str, rate: &str, ctrl: &ControllerId) -> ConfigRecord {
    ConfigRecord::new(
        RecordKey::from_parts("profile", &[name]),
        ctrl.clone(),
        DomainId::root(),
    )
    .with_field("rate", FieldValue::valid(rate))
}

pub fn binding_record(
    name: &str,
    port: &str,
    profile: Option<&str>,
    ctrl: &ControllerId,
    bound: bool,
) -> ConfigRecord {
    let mut record = ConfigRecord::new(
        RecordKey::from_parts("port-binding", &[name]),
        ctrl.clone(),
        DomainId::root(),
    )
    .with_field("port", FieldValue::valid(port));
    if let Some(profile) = profile {
        record = record.with_field("profile", FieldValue::valid(profile));
    }
    if bound {
        record = record.with_flags(RecordFlags::BOUND_PORT);
    }
    record
}

/// Walk a commit session through its full happy-path phase sequence.
pub fn run_commit(coordinator: &TransactionCoordinator, handle: &SessionHandle) -> CoordResult<()> {
    coordinator.advance_phase(handle, confsync_core::Phase::VoteRequest)?;
    coordinator.advance_phase(handle, confsync_core::Phase::GlobalCommit)?;
    coordinator.advance_phase(handle, confsync_core::Phase::DriverResult)?;
    coordinator.end_commit(handle)
}

/// Seed the working view and commit it under the global scope.
pub fn commit_records(harness: &Harness, records: Vec<ConfigRecord>) -> CoordResult<()> {
    harness.store.write(&confsync_core::ViewName::Working, records)?;
    let handle = harness.coordinator.begin_commit(Scope::Global, 1)?;
    run_commit(&harness.coordinator, &handle)
}
