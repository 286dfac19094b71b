//! Per-controller connection access gate
//!
//! Serializes conflicting access to one controller's connection: many
//! concurrent readers, exactly one in-flight writer, and a drain-then-
//! block protocol for delete and update of the controller entry itself.
//!
//! This is a fairness-biased reader/writer/deleter lock, not a plain
//! mutex. A delete mark has priority to drain and proceed, but never
//! cancels in-flight operations: reads and writes admitted before the
//! mark run to completion, and everything arriving after the mark either
//! blocks (AdmitMode::Wait) or fails fast (AdmitMode::Fail) until the
//! delete completes or is abandoned.
//!
//! Writer fairness is configurable: FifoWriters admits waiting writers
//! strictly in arrival order; DrainBiased lets any waiting writer race
//! for the slot, which favors throughput after repeated delete marks at
//! the cost of possible writer starvation.

use confsync_core::error::{CoordError, CoordResult};
use confsync_core::types::ControllerId;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, warn};

/// Writer admission order under contention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FairnessPolicy {
    /// Waiting writers are admitted strictly in arrival order
    #[default]
    FifoWriters,
    /// Any waiting writer may take the slot when it frees up
    DrainBiased,
}

/// How an admission request behaves when the gate is marked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmitMode {
    /// Block until the mark is lifted (delete abandoned, update done)
    Wait,
    /// Fail immediately with `ControllerDisconnected`
    Fail,
}

#[derive(Debug, Default)]
struct GateState {
    read_count: u32,
    /// 0 or 1 in practice; kept as a counter for symmetry with reads
    write_count: u32,
    write_in_progress: bool,
    marked_for_delete: bool,
    marked_for_update: bool,
    /// Delete completed; the gate never admits again
    removed: bool,
    /// Arrival-ordered tickets of waiting writers
    writer_queue: VecDeque<u64>,
    next_ticket: u64,
}

impl GateState {
    fn marked(&self) -> bool {
        self.marked_for_delete || self.marked_for_update
    }

    fn drained(&self) -> bool {
        self.read_count == 0 && !self.write_in_progress
    }
}

struct GateInner {
    controller: ControllerId,
    policy: FairnessPolicy,
    state: Mutex<GateState>,
    cond: Condvar,
}

/// Concurrency gate guarding one controller's connection
///
/// Cheaply cloneable; clones share the same admission state, and RAII
/// permits keep it alive for their duration.
#[derive(Clone)]
pub struct ControllerAccessGate {
    inner: Arc<GateInner>,
}

impl ControllerAccessGate {
    /// Create an open gate for a controller
    pub fn new(controller: ControllerId, policy: FairnessPolicy) -> Self {
        Self {
            inner: Arc::new(GateInner {
                controller,
                policy,
                state: Mutex::new(GateState::default()),
                cond: Condvar::new(),
            }),
        }
    }

    /// The controller this gate guards
    pub fn controller(&self) -> &ControllerId {
        &self.inner.controller
    }

    /// Whether a delete mark is currently set
    pub fn is_marked_for_delete(&self) -> bool {
        self.inner.state.lock().marked_for_delete
    }

    /// Whether the controller entry has been deleted
    pub fn is_removed(&self) -> bool {
        self.inner.state.lock().removed
    }

    /// Current (read, write) in-flight counts, for tests and diagnostics
    pub fn in_flight(&self) -> (u32, u32) {
        let state = self.inner.state.lock();
        (state.read_count, state.write_count)
    }

    fn disconnected(&self) -> CoordError {
        CoordError::ControllerDisconnected {
            controller: self.inner.controller.clone(),
        }
    }

    /// Acquire a read permit
    ///
    /// Reads proceed immediately while no delete/update mark is set; any
    /// number may be in flight at once.
    ///
    /// # Errors
    /// `ControllerDisconnected` if the controller entry was deleted, or
    /// immediately in `AdmitMode::Fail` while a mark is set.
    pub fn begin_read(&self, mode: AdmitMode) -> CoordResult<ReadPermit> {
        let mut state = self.inner.state.lock();
        loop {
            if state.removed {
                return Err(self.disconnected());
            }
            if !state.marked() {
                state.read_count += 1;
                return Ok(ReadPermit { gate: self.clone() });
            }
            if mode == AdmitMode::Fail {
                return Err(self.disconnected());
            }
            self.inner.cond.wait(&mut state);
        }
    }

    /// Acquire the write permit
    ///
    /// At most one write is in flight; further writers queue. Under
    /// FifoWriters they are admitted in arrival order.
    ///
    /// # Errors
    /// `ControllerDisconnected` if the controller entry was deleted, or
    /// immediately in `AdmitMode::Fail` while a mark is set.
    pub fn begin_write(&self, mode: AdmitMode) -> CoordResult<WritePermit> {
        let mut state = self.inner.state.lock();
        if state.removed {
            return Err(self.disconnected());
        }
        if mode == AdmitMode::Fail && state.marked() {
            return Err(self.disconnected());
        }

        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.writer_queue.push_back(ticket);

        loop {
            if state.removed {
                state.writer_queue.retain(|t| *t != ticket);
                return Err(self.disconnected());
            }
            if state.marked() && mode == AdmitMode::Fail {
                state.writer_queue.retain(|t| *t != ticket);
                self.inner.cond.notify_all();
                return Err(self.disconnected());
            }
            let my_turn = match self.inner.policy {
                FairnessPolicy::FifoWriters => state.writer_queue.front() == Some(&ticket),
                FairnessPolicy::DrainBiased => true,
            };
            if !state.write_in_progress && !state.marked() && my_turn {
                state.writer_queue.retain(|t| *t != ticket);
                state.write_in_progress = true;
                state.write_count += 1;
                return Ok(WritePermit { gate: self.clone() });
            }
            self.inner.cond.wait(&mut state);
        }
    }

    /// Mark the controller for deletion and drain in-flight operations
    ///
    /// Sets the delete mark, blocks until every in-flight read and write
    /// has completed, then returns a guard. New operations issued after
    /// the mark are held back (or failed, per their admit mode) until the
    /// guard is completed or dropped.
    ///
    /// # Errors
    /// `ControllerDisconnected` if already deleted,
    /// `ControllerUnavailable` if another delete is already draining.
    pub fn request_delete(&self) -> CoordResult<DeleteGuard> {
        let mut state = self.inner.state.lock();
        if state.removed {
            return Err(self.disconnected());
        }
        if state.marked_for_delete {
            return Err(CoordError::ControllerUnavailable {
                controller: self.inner.controller.clone(),
            });
        }
        state.marked_for_delete = true;
        debug!(
            target: "confsync::gate",
            controller = %self.inner.controller,
            "Delete mark set, draining"
        );
        while !state.drained() {
            self.inner.cond.wait(&mut state);
        }
        Ok(DeleteGuard {
            gate: self.clone(),
            completed: false,
        })
    }

    /// Mark the controller for update and drain in-flight operations
    ///
    /// In-flight reads and writes finish; nothing new starts until the
    /// returned guard is dropped, which broadcasts to waiters.
    ///
    /// # Errors
    /// `ControllerDisconnected` if deleted, `ControllerUnavailable` if a
    /// delete or another update is already draining.
    pub fn request_update(&self) -> CoordResult<UpdateGuard> {
        let mut state = self.inner.state.lock();
        if state.removed {
            return Err(self.disconnected());
        }
        if state.marked() {
            return Err(CoordError::ControllerUnavailable {
                controller: self.inner.controller.clone(),
            });
        }
        state.marked_for_update = true;
        while !state.drained() {
            self.inner.cond.wait(&mut state);
        }
        Ok(UpdateGuard { gate: self.clone() })
    }

    fn end_read(&self) {
        let mut state = self.inner.state.lock();
        debug_assert!(state.read_count > 0);
        state.read_count = state.read_count.saturating_sub(1);
        self.inner.cond.notify_all();
    }

    fn end_write(&self) {
        let mut state = self.inner.state.lock();
        debug_assert!(state.write_in_progress);
        state.write_in_progress = false;
        state.write_count = state.write_count.saturating_sub(1);
        self.inner.cond.notify_all();
    }
}

/// RAII permit for one in-flight read
pub struct ReadPermit {
    gate: ControllerAccessGate,
}

impl std::fmt::Debug for ReadPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadPermit").finish_non_exhaustive()
    }
}

impl Drop for ReadPermit {
    fn drop(&mut self) {
        self.gate.end_read();
    }
}

/// RAII permit for the single in-flight write
pub struct WritePermit {
    gate: ControllerAccessGate,
}

impl std::fmt::Debug for WritePermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WritePermit").finish_non_exhaustive()
    }
}

impl Drop for WritePermit {
    fn drop(&mut self) {
        self.gate.end_write();
    }
}

/// Drained delete in progress
///
/// Call `complete` once the controller entry is gone; dropping the guard
/// without completing abandons the delete and reopens the gate.
pub struct DeleteGuard {
    gate: ControllerAccessGate,
    completed: bool,
}

impl std::fmt::Debug for DeleteGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeleteGuard")
            .field("completed", &self.completed)
            .finish_non_exhaustive()
    }
}

impl DeleteGuard {
    /// Finish the delete: the gate never admits again
    pub fn complete(mut self) {
        {
            let mut state = self.gate.inner.state.lock();
            state.removed = true;
            state.marked_for_delete = false;
        }
        self.completed = true;
        self.gate.inner.cond.notify_all();
        debug!(
            target: "confsync::gate",
            controller = %self.gate.inner.controller,
            "Controller deleted"
        );
    }
}

impl Drop for DeleteGuard {
    fn drop(&mut self) {
        if !self.completed {
            {
                let mut state = self.gate.inner.state.lock();
                state.marked_for_delete = false;
            }
            self.gate.inner.cond.notify_all();
            warn!(
                target: "confsync::gate",
                controller = %self.gate.inner.controller,
                "Delete abandoned, gate reopened"
            );
        }
    }
}

/// Drained update in progress; dropping it broadcasts completion
pub struct UpdateGuard {
    gate: ControllerAccessGate,
}

impl Drop for UpdateGuard {
    fn drop(&mut self) {
        {
            let mut state = self.gate.inner.state.lock();
            state.marked_for_update = false;
        }
        self.gate.inner.cond.notify_all();
    }
}
