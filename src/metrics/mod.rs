//! Process-wide session counters, exported in Prometheus text format.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::mcp::session::Outcome;

/// Metrics collector.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Sessions constructed
    pub sessions_opened: AtomicU64,
    /// Sessions currently alive
    pub active_sessions: AtomicU64,
    /// Sessions torn down after completing
    pub sessions_completed: AtomicU64,
    /// Sessions torn down after an internal failure
    pub sessions_failed: AtomicU64,
    /// Sessions torn down because the client went away
    pub sessions_aborted: AtomicU64,
    /// Tool calls dispatched to a handler
    pub tool_calls: AtomicU64,
    /// JSON-RPC error responses emitted
    pub protocol_errors: AtomicU64,
}

impl Metrics {
    /// Create a new metrics collector.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Record a new session.
    pub fn session_opened(&self) {
        self.sessions_opened.fetch_add(1, Ordering::Relaxed);
        self.active_sessions.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a session teardown.
    pub fn session_closed(&self, outcome: Outcome) {
        let counter = match outcome {
            Outcome::Completed => &self.sessions_completed,
            Outcome::Failed => &self.sessions_failed,
            Outcome::Aborted => &self.sessions_aborted,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        // Saturate at zero rather than wrap.
        let _ = self
            .active_sessions
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    /// Increment tool calls.
    pub fn inc_tool_calls(&self) {
        self.tool_calls.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment protocol error responses.
    pub fn inc_protocol_errors(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get all metrics as a snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            sessions_opened: self.sessions_opened.load(Ordering::Relaxed),
            active_sessions: self.active_sessions.load(Ordering::Relaxed),
            sessions_completed: self.sessions_completed.load(Ordering::Relaxed),
            sessions_failed: self.sessions_failed.load(Ordering::Relaxed),
            sessions_aborted: self.sessions_aborted.load(Ordering::Relaxed),
            tool_calls: self.tool_calls.load(Ordering::Relaxed),
            protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
        }
    }

    /// Export metrics in Prometheus format.
    pub fn to_prometheus(&self) -> String {
        let s = self.snapshot();
        format!(
            r#"# HELP genai_mcp_sessions_opened_total Sessions constructed
# TYPE genai_mcp_sessions_opened_total counter
genai_mcp_sessions_opened_total {}

# HELP genai_mcp_active_sessions Sessions currently alive
# TYPE genai_mcp_active_sessions gauge
genai_mcp_active_sessions {}

# HELP genai_mcp_sessions_closed_total Sessions torn down, by outcome
# TYPE genai_mcp_sessions_closed_total counter
genai_mcp_sessions_closed_total{{outcome="completed"}} {}
genai_mcp_sessions_closed_total{{outcome="failed"}} {}
genai_mcp_sessions_closed_total{{outcome="aborted"}} {}

# HELP genai_mcp_tool_calls_total Tool calls dispatched
# TYPE genai_mcp_tool_calls_total counter
genai_mcp_tool_calls_total {}

# HELP genai_mcp_protocol_errors_total JSON-RPC error responses
# TYPE genai_mcp_protocol_errors_total counter
genai_mcp_protocol_errors_total {}
"#,
            s.sessions_opened,
            s.active_sessions,
            s.sessions_completed,
            s.sessions_failed,
            s.sessions_aborted,
            s.tool_calls,
            s.protocol_errors
        )
    }
}

/// Metrics snapshot.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    pub sessions_opened: u64,
    pub active_sessions: u64,
    pub sessions_completed: u64,
    pub sessions_failed: u64,
    pub sessions_aborted: u64,
    pub tool_calls: u64,
    pub protocol_errors: u64,
}

impl MetricsSnapshot {
    /// Total teardowns across all outcomes.
    pub fn sessions_closed(&self) -> u64 {
        self.sessions_completed + self.sessions_failed + self.sessions_aborted
    }
}
