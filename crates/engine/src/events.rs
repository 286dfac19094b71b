//! Session event sinks
//!
//! The coordinator emits one event per phase transition. Sinks are
//! fire-and-forget observability taps and must never block; the default
//! sink just logs through `tracing`.

use confsync_core::phase::Phase;
use confsync_core::traits::SessionEventSink;
use confsync_core::types::{Scope, SessionId};
use tracing::info;

/// Sink that logs every phase transition
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl SessionEventSink for TracingEventSink {
    fn phase_changed(&self, session: SessionId, scope: &Scope, phase: Phase) {
        info!(
            target: "confsync::session",
            session = %session,
            scope = %scope,
            phase = %phase,
            "Phase transition"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_does_not_panic() {
        let sink = TracingEventSink;
        sink.phase_changed(SessionId::new(), &Scope::Global, Phase::VoteRequest);
    }
}
