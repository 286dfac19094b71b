//! Transaction coordinator: the commit and audit phase state machines
//!
//! Drives both protocols to completion or to a clean abort across every
//! registered handler and controller. Phase transitions are strict FIFO
//! per session and serialized by the session's mutex; the dispatch
//! fan-out to the controllers touched within one phase runs in parallel
//! on a bounded worker pool.
//!
//! Failure semantics:
//! - Validation failures at vote time abort the session with no side
//!   effects beyond the working view.
//! - RPC failures at vote time abort before anything is applied; no
//!   participant ever sees a global-commit dispatch.
//! - Failures during global-commit are irreversible for participants
//!   that already applied; the coordinator issues best-effort
//!   compensating aborts in reverse application order and surfaces
//!   `PartialFailure` naming the first failing record.

use crate::config::CoordinatorConfig;
use crate::handler::{ConfigServiceHandler, HandlerContext};
use crate::registry::{ControllerRegistry, HandlerRegistry};
use crate::session::{
    AppliedEntry, FamilyDiff, ParticipantResult, SessionHandle, TransactionSession,
};
use confsync_concurrency::RefCountLedger;
use confsync_core::diff::{DiffEntry, DiffOp, OpFilter};
use confsync_core::dispatch::{DispatchOp, DispatchRequest};
use confsync_core::error::{CoordError, CoordResult};
use confsync_core::phase::{AuditType, Phase, SessionKind};
use confsync_core::traits::{CapabilityTable, DriverTransport, SessionEventSink, SnapshotBackend};
use confsync_core::types::{ControllerId, DomainId, Scope, SessionId};
use confsync_core::view::{RecordFilter, ViewName};
use confsync_store::{entry_order, DiffEngine};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Point-in-time coordinator counters
///
/// The counters use Relaxed ordering: they are observational metrics
/// that synchronize nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorStats {
    /// Sessions currently alive
    pub active: u64,
    /// Sessions ever started
    pub started: u64,
    /// Sessions that ended cleanly (commit or audit)
    pub completed: u64,
    /// Sessions that ended in global abort
    pub aborted: u64,
    /// Audit sessions cancelled mid-flight
    pub cancelled: u64,
}

#[derive(Debug, Default)]
struct Metrics {
    active: AtomicU64,
    started: AtomicU64,
    completed: AtomicU64,
    aborted: AtomicU64,
    cancelled: AtomicU64,
}

impl Metrics {
    fn record_start(&self) {
        self.active.fetch_add(1, Ordering::Relaxed);
        self.started.fetch_add(1, Ordering::Relaxed);
    }

    fn record_end(&self, counter: &AtomicU64) {
        let _ = self
            .active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |x| {
                Some(x.saturating_sub(1))
            });
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Top-level phase state machine for commit and audit protocols
pub struct TransactionCoordinator {
    backend: Arc<dyn SnapshotBackend>,
    ledger: Arc<RefCountLedger>,
    diff: Arc<DiffEngine>,
    handlers: HandlerRegistry,
    controllers: ControllerRegistry,
    caps: Arc<dyn CapabilityTable>,
    sink: Arc<dyn SessionEventSink>,
    config: CoordinatorConfig,
    sessions: DashMap<SessionId, Arc<Mutex<TransactionSession>>>,
    active_scopes: DashMap<Scope, SessionId>,
    pool: rayon::ThreadPool,
    metrics: Metrics,
}

impl TransactionCoordinator {
    /// Create a coordinator over a backend, capability table, and sink
    ///
    /// Handlers and controllers are registered afterwards, before the
    /// first session.
    ///
    /// # Errors
    /// Worker pool construction failures.
    pub fn new(
        backend: Arc<dyn SnapshotBackend>,
        caps: Arc<dyn CapabilityTable>,
        sink: Arc<dyn SessionEventSink>,
        config: CoordinatorConfig,
    ) -> CoordResult<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.pool_size.max(1))
            .thread_name(|i| format!("confsync-dispatch-{i}"))
            .build()
            .map_err(|e| CoordError::store(format!("worker pool: {e}")))?;
        Ok(Self {
            backend,
            ledger: Arc::new(RefCountLedger::new()),
            diff: Arc::new(DiffEngine::new()),
            handlers: HandlerRegistry::new(),
            controllers: ControllerRegistry::new(),
            caps,
            sink,
            config,
            sessions: DashMap::new(),
            active_scopes: DashMap::new(),
            pool,
            metrics: Metrics::default(),
        })
    }

    /// Register a handler and its family's dependency rank
    pub fn register_handler(&self, handler: Arc<dyn ConfigServiceHandler>) {
        self.diff.register_family(handler.family().clone(), handler.rank());
        self.handlers.register(handler);
    }

    /// Register a controller with its driver transport
    pub fn register_controller(
        &self,
        id: ControllerId,
        domain: DomainId,
        transport: Arc<dyn DriverTransport>,
    ) {
        self.controllers.register(
            id,
            domain,
            transport,
            self.config.fairness,
            self.config.retry,
        );
    }

    /// The shared-resource ledger
    pub fn ledger(&self) -> &Arc<RefCountLedger> {
        &self.ledger
    }

    /// The snapshot backend
    pub fn backend(&self) -> &Arc<dyn SnapshotBackend> {
        &self.backend
    }

    /// The controller registry
    pub fn controllers(&self) -> &ControllerRegistry {
        &self.controllers
    }

    /// Current counter values
    pub fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            active: self.metrics.active.load(Ordering::Relaxed),
            started: self.metrics.started.load(Ordering::Relaxed),
            completed: self.metrics.completed.load(Ordering::Relaxed),
            aborted: self.metrics.aborted.load(Ordering::Relaxed),
            cancelled: self.metrics.cancelled.load(Ordering::Relaxed),
        }
    }

    // ------------------------------------------------------------------
    // Session entry points
    // ------------------------------------------------------------------

    /// Open a commit session owning a scope
    ///
    /// The virtual scope is always accepted and short-circuits every
    /// phase as a no-op.
    ///
    /// # Errors
    /// `ScopeBusy` when an active session already owns the scope.
    pub fn begin_commit(&self, scope: Scope, config_id: u64) -> CoordResult<SessionHandle> {
        let mut session = TransactionSession::new(config_id, scope.clone(), SessionKind::Commit);
        self.claim_scope(&session)?;
        session.phase = Phase::TransactionStart;

        let handle = SessionHandle {
            id: session.id,
            scope: scope.clone(),
        };
        self.metrics.record_start();
        self.sink.phase_changed(session.id, &scope, Phase::TransactionStart);
        info!(
            target: "confsync::coordinator",
            session = %session.id,
            scope = %scope,
            config_id,
            "Commit session started"
        );
        self.sessions.insert(session.id, Arc::new(Mutex::new(session)));
        Ok(handle)
    }

    /// Open an audit session for one controller
    ///
    /// `force_reconnect` admits a controller whose registry entry is
    /// marked disconnected (it is reconnecting through this audit); a
    /// delete-marked gate always wins and yields `ControllerUnavailable`.
    ///
    /// # Errors
    /// `ControllerUnavailable`, `ScopeBusy`.
    pub fn begin_audit(
        &self,
        scope: Scope,
        controller: ControllerId,
        audit_type: AuditType,
        force_reconnect: bool,
    ) -> CoordResult<SessionHandle> {
        let entry = self
            .controllers
            .get(&controller)
            .ok_or_else(|| CoordError::ControllerUnavailable {
                controller: controller.clone(),
            })?;
        if entry.gate().is_marked_for_delete() || entry.gate().is_removed() {
            return Err(CoordError::ControllerUnavailable { controller });
        }
        if !entry.is_connected() {
            if !force_reconnect {
                return Err(CoordError::ControllerUnavailable { controller });
            }
            self.controllers.set_connected(&controller, true)?;
        }

        let mut session = TransactionSession::new(
            0,
            scope.clone(),
            SessionKind::Audit {
                controller: controller.clone(),
                audit_type,
            },
        );
        self.claim_scope(&session)?;
        session.phase = Phase::AuditStart;

        if let Err(err) = self.fetch_observed(&session) {
            self.release_scope(&session);
            return Err(err);
        }

        let handle = SessionHandle {
            id: session.id,
            scope: scope.clone(),
        };
        self.metrics.record_start();
        self.sink.phase_changed(session.id, &scope, Phase::AuditStart);
        info!(
            target: "confsync::coordinator",
            session = %session.id,
            controller = %controller,
            audit_type = ?audit_type,
            "Audit session started"
        );
        self.sessions.insert(session.id, Arc::new(Mutex::new(session)));
        Ok(handle)
    }

    /// Advance a session to the next phase
    ///
    /// The requested phase must be the single legal successor of the
    /// session's current phase. Phase work (vote validation, forward
    /// application, result folding) happens inside this call; a failure
    /// triggers the session's global abort and propagates.
    ///
    /// # Errors
    /// `SequenceViolation`, `InvalidSession`, plus anything the phase
    /// work produces.
    pub fn advance_phase(&self, handle: &SessionHandle, phase: Phase) -> CoordResult<()> {
        let session = self.session(handle)?;
        let mut st = session.lock();

        let expected = st.kind.successor(st.phase);
        if expected != Some(phase) {
            return Err(CoordError::SequenceViolation {
                current: st.phase,
                requested: phase,
            });
        }

        if st.is_virtual() {
            st.phase = phase;
            self.sink.phase_changed(st.id, &st.scope, phase);
            if phase.is_terminal() {
                self.finish(&mut st, &self.metrics.completed);
            }
            return Ok(());
        }

        let work = match phase {
            Phase::VoteRequest => self.run_vote(&mut st),
            Phase::GlobalCommit => self.run_global_commit(&mut st),
            Phase::DriverResult => self.run_driver_result(&st),
            Phase::TransactionEnd => return self.end_locked(&mut st, false),
            Phase::AuditEnd => return self.end_locked(&mut st, true),
            _ => Ok(()),
        };
        if let Err(err) = work {
            self.abort_locked(&mut st);
            return Err(err);
        }
        st.phase = phase;
        self.sink.phase_changed(st.id, &st.scope, phase);
        Ok(())
    }

    /// Fold one participant's outcome into a session
    ///
    /// A reported failure during global-commit or driver-result triggers
    /// the automatic compensating abort for every other participant that
    /// already applied forward changes.
    ///
    /// # Errors
    /// `InvalidSession`.
    pub fn report_driver_result(
        &self,
        handle: &SessionHandle,
        controller: ControllerId,
        phase: Phase,
        success: bool,
        message: Option<String>,
    ) -> CoordResult<()> {
        let session = self.session(handle)?;
        let mut st = session.lock();
        st.results.push(ParticipantResult {
            controller: controller.clone(),
            phase,
            success,
            message,
        });
        if !success
            && matches!(st.phase, Phase::GlobalCommit | Phase::DriverResult)
        {
            warn!(
                target: "confsync::coordinator",
                session = %st.id,
                controller = %controller,
                "Participant failure reported, triggering global abort"
            );
            self.abort_locked(&mut st);
        }
        Ok(())
    }

    /// Close a commit session: fold the ledger, promote working to
    /// committed, release the scope
    ///
    /// # Errors
    /// `SequenceViolation` unless the session sits in DriverResult,
    /// `Conflict` when the ledger fold detects concurrent modification,
    /// `PartialFailure` when a participant failure was folded in.
    pub fn end_commit(&self, handle: &SessionHandle) -> CoordResult<()> {
        let session = self.session(handle)?;
        let mut st = session.lock();
        if st.kind.successor(st.phase) != Some(Phase::TransactionEnd) {
            return Err(CoordError::SequenceViolation {
                current: st.phase,
                requested: Phase::TransactionEnd,
            });
        }
        self.end_locked(&mut st, false)
    }

    /// Close an audit session: reconcile the controller mirror with the
    /// observed state and release the scope
    ///
    /// # Errors
    /// `SequenceViolation` unless the session sits in DriverResult.
    pub fn end_audit(&self, handle: &SessionHandle) -> CoordResult<()> {
        let session = self.session(handle)?;
        let mut st = session.lock();
        if st.kind.successor(st.phase) != Some(Phase::AuditEnd) {
            return Err(CoordError::SequenceViolation {
                current: st.phase,
                requested: Phase::AuditEnd,
            });
        }
        self.end_locked(&mut st, true)
    }

    /// Cancel an audit session before AuditEnd
    ///
    /// Releases the scope and discards ledger deltas without issuing
    /// compensating RPCs; audits are read-mostly up to the point this is
    /// legal.
    ///
    /// # Errors
    /// `CancelNotAllowed` for commit sessions or terminal phases.
    pub fn cancel(&self, handle: &SessionHandle) -> CoordResult<()> {
        let session = self.session(handle)?;
        let mut st = session.lock();
        if !st.kind.is_audit() || st.phase.is_terminal() {
            return Err(CoordError::CancelNotAllowed {
                session: st.id,
                phase: st.phase,
            });
        }
        self.ledger.discard(st.id);
        self.unregister_session_resources(&mut st);
        st.phase = Phase::Cancel;
        self.sink.phase_changed(st.id, &st.scope, Phase::Cancel);
        info!(target: "confsync::coordinator", session = %st.id, "Audit cancelled");
        self.finish(&mut st, &self.metrics.cancelled);
        Ok(())
    }

    /// Abort a session explicitly
    ///
    /// Equivalent to the automatic global abort: compensates applied
    /// entries in reverse order, discards ledger deltas, releases the
    /// scope.
    ///
    /// # Errors
    /// `InvalidSession`.
    pub fn abort(&self, handle: &SessionHandle) -> CoordResult<()> {
        let session = self.session(handle)?;
        let mut st = session.lock();
        self.abort_locked(&mut st);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Phase work
    // ------------------------------------------------------------------

    fn run_vote(&self, st: &mut TransactionSession) -> CoordResult<()> {
        let cx = self.context(st);
        let (from, to) = match &st.kind {
            SessionKind::Commit => (ViewName::Committed, ViewName::Working),
            SessionKind::Audit { .. } => (ViewName::ObservedState, ViewName::Committed),
        };
        let audit = match &st.kind {
            SessionKind::Audit {
                controller,
                audit_type,
            } => Some((controller.clone(), *audit_type)),
            SessionKind::Commit => None,
        };

        let mut family_diffs = Vec::new();
        for handler in self.handlers.ordered() {
            let mut set = handler.compute_diff(&cx, &from, &to, OpFilter::ALL)?;
            if let Some((controller, audit_type)) = &audit {
                set.retain(|entry| {
                    entry.controller == *controller
                        && handler.audit_relevant(entry.effective(), *audit_type)
                });
            }
            if set.is_empty() {
                continue;
            }
            // Capability validation first: a rejected field aborts before
            // any catalog or ledger state is touched.
            for entry in set.entries() {
                handler.validate_capability(
                    self.caps.as_ref(),
                    &entry.controller,
                    entry.op,
                    entry.effective(),
                )?;
            }
            let provided = handler.semantic_validate(&cx, &set)?;
            st.registered_resources.extend(provided);
            family_diffs.push(FamilyDiff {
                family: handler.family().clone(),
                set,
            });
        }

        if !st.kind.is_audit() {
            self.check_provider_deletes(st, &family_diffs)?;
        }
        st.diffs = family_diffs;

        // Vote dispatch to every touched controller, in parallel.
        let targets = st.touched_controllers();
        debug!(
            target: "confsync::coordinator",
            session = %st.id,
            entries = st.pending_entries(),
            controllers = targets.len(),
            "Vote phase"
        );
        let timeout = self.config.dispatch_timeout();
        let outcomes: Vec<CoordResult<ControllerId>> = self.pool.install(|| {
            targets
                .par_iter()
                .map(|(controller, domain)| {
                    let entry = self.controllers.get(controller).ok_or_else(|| {
                        CoordError::ControllerDisconnected {
                            controller: controller.clone(),
                        }
                    })?;
                    let request =
                        DispatchRequest::vote(controller.clone(), domain.clone(), timeout);
                    let response = entry.dispatcher.dispatch(&request)?;
                    if response.is_ok() {
                        Ok(controller.clone())
                    } else {
                        Err(CoordError::ControllerUnavailable {
                            controller: controller.clone(),
                        })
                    }
                })
                .collect()
        });
        for outcome in outcomes {
            match outcome {
                Ok(controller) => st.results.push(ParticipantResult {
                    controller,
                    phase: Phase::VoteRequest,
                    success: true,
                    message: None,
                }),
                // All-or-nothing vote: one failure aborts the session
                // before any participant applies anything.
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// A provider record may only be deleted when the committed count
    /// plus this session's net reference change reaches zero.
    fn check_provider_deletes(
        &self,
        st: &TransactionSession,
        diffs: &[FamilyDiff],
    ) -> CoordResult<()> {
        let mut net: BTreeMap<String, i64> = BTreeMap::new();
        for diff in diffs {
            if let Some(handler) = self.handlers.get(&diff.family) {
                for entry in diff.set.entries() {
                    for (resource, delta) in handler.reference_deltas(entry) {
                        *net.entry(resource).or_default() += delta;
                    }
                }
            }
        }
        for diff in diffs {
            let Some(handler) = self.handlers.get(&diff.family) else {
                continue;
            };
            for entry in diff.set.entries() {
                if entry.op != DiffOp::Delete {
                    continue;
                }
                let Some(old) = &entry.old else { continue };
                if let Some(resource) = handler.provided_resource(old) {
                    let committed = self.ledger.total_count(&resource, &st.scope) as i64;
                    let remaining = committed + net.get(&resource).copied().unwrap_or(0);
                    if remaining > 0 {
                        return Err(CoordError::Conflict { resource });
                    }
                }
            }
        }
        Ok(())
    }

    fn run_global_commit(&self, st: &mut TransactionSession) -> CoordResult<()> {
        let cx = self.context(st);
        let timeout = self.config.dispatch_timeout();

        // Merge the per-family diffs into controller/domain partitions,
        // re-sorted so cross-family dependencies (profile before
        // binding) hold within each partition.
        let mut partitions: BTreeMap<(ControllerId, DomainId), Vec<AppliedEntry>> =
            BTreeMap::new();
        for diff in &st.diffs {
            for (partition, entries) in diff.set.partitions() {
                partitions
                    .entry(partition.clone())
                    .or_default()
                    .extend(entries.iter().map(|entry| AppliedEntry {
                        family: diff.family.clone(),
                        entry: entry.clone(),
                    }));
            }
        }
        for entries in partitions.values_mut() {
            entries.sort_by(|a, b| entry_order(&a.entry, &b.entry));
        }

        let abort = AtomicBool::new(false);
        let applied: Mutex<Vec<AppliedEntry>> = Mutex::new(Vec::new());
        let results: Mutex<Vec<ParticipantResult>> = Mutex::new(Vec::new());
        let failure: Mutex<Option<CoordError>> = Mutex::new(None);

        let record_failure = |err: CoordError| {
            let mut slot = failure.lock();
            if slot.is_none() {
                *slot = Some(err);
            }
            abort.store(true, Ordering::SeqCst);
        };

        self.pool.install(|| {
            partitions
                .par_iter()
                .for_each(|((controller, _domain), entries)| {
                    let Some(ctrl) = self.controllers.get(controller) else {
                        record_failure(CoordError::ControllerDisconnected {
                            controller: controller.clone(),
                        });
                        return;
                    };
                    for item in entries {
                        if abort.load(Ordering::SeqCst) {
                            return;
                        }
                        let request = Self::forward_request(&item.entry, timeout);
                        match ctrl.dispatcher.dispatch(&request) {
                            Ok(response) if response.is_ok() => {}
                            Ok(response) => {
                                warn!(
                                    target: "confsync::coordinator",
                                    session = %cx.session,
                                    key = %item.entry.key(),
                                    message = response.message.as_deref().unwrap_or(""),
                                    "Driver rejected entry"
                                );
                                record_failure(CoordError::PartialFailure {
                                    key: item.entry.key().clone(),
                                    controller: controller.clone(),
                                });
                                return;
                            }
                            Err(err) => {
                                warn!(
                                    target: "confsync::coordinator",
                                    session = %cx.session,
                                    key = %item.entry.key(),
                                    error = %err,
                                    "Dispatch failed during global commit"
                                );
                                record_failure(CoordError::PartialFailure {
                                    key: item.entry.key().clone(),
                                    controller: controller.clone(),
                                });
                                return;
                            }
                        }
                        let Some(handler) = self.handlers.get(&item.family) else {
                            record_failure(CoordError::store(format!(
                                "no handler for family {}",
                                item.family
                            )));
                            return;
                        };
                        match handler.apply_forward(&cx, &item.entry) {
                            Ok(()) => applied.lock().push(item.clone()),
                            Err(err) => {
                                warn!(
                                    target: "confsync::coordinator",
                                    session = %cx.session,
                                    key = %item.entry.key(),
                                    error = %err,
                                    "Forward application failed"
                                );
                                record_failure(CoordError::PartialFailure {
                                    key: item.entry.key().clone(),
                                    controller: controller.clone(),
                                });
                                return;
                            }
                        }
                    }
                    results.lock().push(ParticipantResult {
                        controller: controller.clone(),
                        phase: Phase::GlobalCommit,
                        success: true,
                        message: None,
                    });
                });
        });

        st.applied = applied.into_inner();
        st.results.extend(results.into_inner());
        match failure.into_inner() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn run_driver_result(&self, st: &TransactionSession) -> CoordResult<()> {
        if let Some(fail) = st.first_failure() {
            let key = st
                .applied
                .iter()
                .rev()
                .find(|a| a.entry.controller == fail.controller)
                .map(|a| a.entry.key().clone());
            return Err(match key {
                Some(key) => CoordError::PartialFailure {
                    key,
                    controller: fail.controller.clone(),
                },
                None => CoordError::ControllerDisconnected {
                    controller: fail.controller.clone(),
                },
            });
        }
        Ok(())
    }

    fn end_locked(&self, st: &mut TransactionSession, audit: bool) -> CoordResult<()> {
        if st.is_virtual() {
            let phase = if audit { Phase::AuditEnd } else { Phase::TransactionEnd };
            st.phase = phase;
            self.sink.phase_changed(st.id, &st.scope, phase);
            self.finish(&mut *st, &self.metrics.completed);
            return Ok(());
        }
        if let Err(err) = self.run_driver_result(st) {
            self.abort_locked(st);
            return Err(err);
        }

        if audit {
            let SessionKind::Audit { controller, .. } = st.kind.clone() else {
                return Err(CoordError::SequenceViolation {
                    current: st.phase,
                    requested: Phase::AuditEnd,
                });
            };
            // Mirror := observed state, with the corrections applied this
            // session layered back on top.
            let filter = RecordFilter::all()
                .owned_by(controller.clone())
                .in_scope(st.scope.clone());
            let mirror = ViewName::ControllerMirror(controller.clone());
            self.backend
                .promote(&ViewName::ObservedState, &mirror, &filter)?;
            for item in &st.applied {
                match item.entry.op {
                    DiffOp::Delete => {
                        self.backend.remove(&mirror, &[item.entry.key().clone()])?;
                    }
                    _ => {
                        if let Some(new) = &item.entry.new {
                            let mut corrected = new.clone();
                            corrected.status =
                                confsync_core::record::ConfigStatus::applied();
                            self.backend.write(&mirror, vec![corrected])?;
                        }
                    }
                }
            }
            // Audits never count references; drop anything staged.
            self.ledger.discard(st.id);
            st.phase = Phase::AuditEnd;
        } else {
            if let Err(err) = self.ledger.fold(st.id) {
                self.abort_locked(st);
                return Err(err);
            }
            self.retire_deleted_providers(st);
            let filter = RecordFilter::all().in_scope(st.scope.clone());
            self.backend
                .promote(&ViewName::Working, &ViewName::Committed, &filter)?;
            st.phase = Phase::TransactionEnd;
        }

        self.sink.phase_changed(st.id, &st.scope, st.phase);
        info!(
            target: "confsync::coordinator",
            session = %st.id,
            scope = %st.scope,
            audit,
            "Session ended"
        );
        self.finish(&mut *st, &self.metrics.completed);
        Ok(())
    }

    /// Remove catalog entries for provider records this session deleted
    fn retire_deleted_providers(&self, st: &TransactionSession) {
        for item in &st.applied {
            if item.entry.op != DiffOp::Delete {
                continue;
            }
            let Some(handler) = self.handlers.get(&item.family) else {
                continue;
            };
            let Some(old) = &item.entry.old else { continue };
            if let Some(resource) = handler.provided_resource(old) {
                if let Err(err) = self.ledger.unregister_resource(&resource, &st.scope) {
                    // Validated at vote time; a conflict here means a
                    // concurrent session raced us. Logged, not retried.
                    warn!(
                        target: "confsync::coordinator",
                        resource = %resource,
                        error = %err,
                        "Failed to retire deleted provider"
                    );
                }
            }
        }
    }

    fn abort_locked(&self, st: &mut TransactionSession) {
        let cx = self.context(st);
        let timeout = self.config.dispatch_timeout();

        // Compensate applied entries in reverse application order.
        for item in st.applied.iter().rev() {
            if let Some(handler) = self.handlers.get(&item.family) {
                if let Err(err) = handler.apply_reverse(&cx, &item.entry) {
                    warn!(
                        target: "confsync::coordinator",
                        key = %item.entry.key(),
                        error = %err,
                        "Reverse application failed"
                    );
                }
            }
            if let Some(ctrl) = self.controllers.get(&item.entry.controller) {
                let request = Self::abort_request(&item.entry, timeout);
                if let Err(err) = ctrl.dispatcher.dispatch(&request) {
                    // Best-effort: logged, never retried.
                    warn!(
                        target: "confsync::coordinator",
                        key = %item.entry.key(),
                        error = %err,
                        "Compensating dispatch failed"
                    );
                }
            }
        }

        self.ledger.discard(st.id);
        self.unregister_session_resources(st);
        st.phase = Phase::GlobalAbort;
        self.sink.phase_changed(st.id, &st.scope, Phase::GlobalAbort);
        info!(target: "confsync::coordinator", session = %st.id, "Session aborted");
        self.finish(st, &self.metrics.aborted);
    }

    // ------------------------------------------------------------------
    // Plumbing
    // ------------------------------------------------------------------

    fn session(&self, handle: &SessionHandle) -> CoordResult<Arc<Mutex<TransactionSession>>> {
        self.sessions
            .get(&handle.id)
            .map(|s| s.clone())
            .ok_or(CoordError::InvalidSession { session: handle.id })
    }

    fn claim_scope(&self, session: &TransactionSession) -> CoordResult<()> {
        if session.scope.is_virtual() {
            return Ok(());
        }
        match self.active_scopes.entry(session.scope.clone()) {
            Entry::Occupied(entry) => Err(CoordError::ScopeBusy {
                scope: session.scope.clone(),
                owner: *entry.get(),
            }),
            Entry::Vacant(entry) => {
                entry.insert(session.id);
                Ok(())
            }
        }
    }

    fn release_scope(&self, session: &TransactionSession) {
        if !session.scope.is_virtual() {
            self.active_scopes
                .remove_if(&session.scope, |_, owner| *owner == session.id);
        }
    }

    fn finish(&self, st: &mut TransactionSession, counter: &AtomicU64) {
        self.release_scope(st);
        self.sessions.remove(&st.id);
        self.metrics.record_end(counter);
    }

    fn unregister_session_resources(&self, st: &mut TransactionSession) {
        for resource in st.registered_resources.drain(..) {
            if let Err(err) = self.ledger.unregister_resource(&resource, &st.scope) {
                warn!(
                    target: "confsync::coordinator",
                    resource = %resource,
                    error = %err,
                    "Failed to unwind catalog registration"
                );
            }
        }
    }

    fn context(&self, st: &TransactionSession) -> HandlerContext {
        HandlerContext {
            backend: Arc::clone(&self.backend),
            ledger: Arc::clone(&self.ledger),
            diff: Arc::clone(&self.diff),
            session: st.id,
            scope: st.scope.clone(),
            refcounting: !st.kind.is_audit(),
        }
    }

    fn fetch_observed(&self, st: &TransactionSession) -> CoordResult<()> {
        let SessionKind::Audit { controller, .. } = &st.kind else {
            return Ok(());
        };
        let entry = self
            .controllers
            .get(controller)
            .ok_or_else(|| CoordError::ControllerUnavailable {
                controller: controller.clone(),
            })?;
        let request = DispatchRequest::fetch_all(
            controller.clone(),
            entry.domain.clone(),
            self.config.dispatch_timeout(),
        );
        let response = entry.dispatcher.dispatch(&request)?;
        if !response.is_ok() {
            return Err(CoordError::ControllerUnavailable {
                controller: controller.clone(),
            });
        }
        let filter = RecordFilter::all()
            .owned_by(controller.clone())
            .in_scope(st.scope.clone());
        let stale: Vec<_> = self
            .backend
            .read(&ViewName::ObservedState, &filter)?
            .into_iter()
            .map(|r| r.key)
            .collect();
        self.backend.remove(&ViewName::ObservedState, &stale)?;
        let records: Vec<_> = response
            .records
            .into_iter()
            .filter(|r| filter.matches(r))
            .collect();
        debug!(
            target: "confsync::coordinator",
            controller = %controller,
            records = records.len(),
            "Observed state fetched"
        );
        self.backend.write(&ViewName::ObservedState, records)
    }

    fn forward_request(entry: &DiffEntry, timeout: std::time::Duration) -> DispatchRequest {
        let op = match entry.op {
            DiffOp::Create => DispatchOp::Create,
            DiffOp::Update => DispatchOp::Update,
            DiffOp::Delete => DispatchOp::Delete,
        };
        DispatchRequest {
            op,
            key: Some(entry.key().clone()),
            old_value: entry.old.clone(),
            new_value: entry.new.clone(),
            target_controller: entry.controller.clone(),
            target_domain: entry.domain.clone(),
            timeout,
        }
    }

    fn abort_request(entry: &DiffEntry, timeout: std::time::Duration) -> DispatchRequest {
        DispatchRequest {
            op: DispatchOp::Abort,
            key: Some(entry.key().clone()),
            // Old and new travel as applied so the driver can invert.
            old_value: entry.old.clone(),
            new_value: entry.new.clone(),
            target_controller: entry.controller.clone(),
            target_domain: entry.domain.clone(),
            timeout,
        }
    }
}
