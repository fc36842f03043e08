//! Sandbox session lifecycle
//!
//! ```text
//!   Idle ──first execute──▶ Open ──close──▶ Closed
//!    │                       │
//!    └──open fails──▶ Degraded ◀── repeated transport failures
//! ```
//!
//! A degraded session refuses further work for the rest of the run; every
//! call still returns a failed [`ExecutionResult`] so the conversation can
//! tell the model why nothing ran.

use tracing::{error, info, warn};

use super::{ExecutionResult, SandboxBackend};
use crate::metrics::{CODE_EXECUTIONS, CODE_EXECUTION_DURATION, SANDBOX_SESSIONS};

/// Consecutive transport failures after which the session is abandoned
pub const MAX_TRANSPORT_FAILURES: u32 = 3;

/// Where a session is in its lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Not opened yet
    Idle,
    Open,
    /// Code execution disabled for this run
    Degraded(String),
    Closed,
}

/// The one remote execution session of a run
pub struct SandboxSession {
    backend: Box<dyn SandboxBackend>,
    state: SessionState,
    transport_failures: u32,
}

impl SandboxSession {
    pub fn new(backend: Box<dyn SandboxBackend>) -> Self {
        Self {
            backend,
            state: SessionState::Idle,
            transport_failures: 0,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Run `code`, opening the remote session on first use
    pub async fn execute(&mut self, code: &str) -> ExecutionResult {
        let backend = self.backend.name();

        match &self.state {
            SessionState::Closed => {
                return self.unavailable("sandbox session already closed".to_string());
            }
            SessionState::Degraded(reason) => {
                return self.unavailable(format!("code execution disabled for this run: {}", reason));
            }
            SessionState::Idle => {
                if let Err(e) = self.backend.open().await {
                    error!(backend, error = %e, "Failed to open sandbox session");
                    SANDBOX_SESSIONS.with_label_values(&[backend, "open_failed"]).inc();
                    let reason = format!("failed to start sandbox: {}", e);
                    self.state = SessionState::Degraded(reason.clone());
                    return self.unavailable(format!("code execution disabled for this run: {}", reason));
                }
                info!(backend, "Sandbox session opened");
                SANDBOX_SESSIONS.with_label_values(&[backend, "opened"]).inc();
                self.state = SessionState::Open;
            }
            SessionState::Open => {}
        }

        match self.backend.run(code).await {
            Ok(result) => {
                self.transport_failures = 0;
                let status = if result.success { "success" } else { "error" };
                CODE_EXECUTIONS.with_label_values(&[backend, status]).inc();
                CODE_EXECUTION_DURATION
                    .with_label_values(&[backend])
                    .observe(result.duration_ms / 1000.0);
                result
            }
            Err(e) => {
                self.transport_failures += 1;
                warn!(
                    backend,
                    error = %e,
                    failures = self.transport_failures,
                    "Sandbox request failed"
                );
                CODE_EXECUTIONS.with_label_values(&[backend, "error"]).inc();

                if self.transport_failures >= MAX_TRANSPORT_FAILURES {
                    error!(backend, "Too many sandbox failures, disabling code execution");
                    SANDBOX_SESSIONS.with_label_values(&[backend, "degraded"]).inc();
                    self.state = SessionState::Degraded(format!(
                        "{} consecutive sandbox failures, last: {}",
                        self.transport_failures, e
                    ));
                }
                ExecutionResult::failure(format!("Execution failed: {}", e))
            }
        }
    }

    /// Close the remote session; safe to call more than once
    pub async fn close(&mut self) {
        let backend = self.backend.name();
        let was_open = matches!(self.state, SessionState::Open | SessionState::Degraded(_));
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Closed;

        if !was_open {
            return;
        }
        match self.backend.close().await {
            Ok(()) => {
                SANDBOX_SESSIONS.with_label_values(&[backend, "closed"]).inc();
                info!(backend, "Sandbox session closed");
            }
            Err(e) => {
                SANDBOX_SESSIONS.with_label_values(&[backend, "close_failed"]).inc();
                error!(backend, error = %e, "Failed to close sandbox session");
            }
        }
    }

    fn unavailable(&self, reason: String) -> ExecutionResult {
        CODE_EXECUTIONS
            .with_label_values(&[self.backend.name(), "unavailable"])
            .inc();
        ExecutionResult::failure(reason)
    }
}
