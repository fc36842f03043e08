//! Prometheus metrics for model calls, code execution and turns
//!
//! All metrics live in the default registry; [`gather_text`] renders them
//! in the text exposition format.

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, Encoder, HistogramVec,
    IntCounter, IntCounterVec, TextEncoder,
};

lazy_static! {
    /// Model calls by model and status ("success" | "error")
    pub static ref LLM_CALLS: IntCounterVec = register_int_counter_vec!(
        "codeloop_llm_calls_total",
        "Model calls by model and status",
        &["model", "status"]
    )
    .unwrap();

    /// Model call latency in seconds
    pub static ref LLM_CALL_TIME: HistogramVec = register_histogram_vec!(
        "codeloop_llm_call_duration_seconds",
        "Model call latency",
        &["model"],
        vec![0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]
    )
    .unwrap();

    /// Code blocks run, by backend and status ("success" | "error" | "unavailable")
    pub static ref CODE_EXECUTIONS: IntCounterVec = register_int_counter_vec!(
        "codeloop_code_executions_total",
        "Code blocks executed by backend and status",
        &["backend", "status"]
    )
    .unwrap();

    /// Remote execution latency in seconds
    pub static ref CODE_EXECUTION_DURATION: HistogramVec = register_histogram_vec!(
        "codeloop_code_execution_duration_seconds",
        "Remote code execution latency",
        &["backend"],
        vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    )
    .unwrap();

    /// Sandbox session lifecycle events
    pub static ref SANDBOX_SESSIONS: IntCounterVec = register_int_counter_vec!(
        "codeloop_sandbox_session_events_total",
        "Sandbox session lifecycle events by backend",
        &["backend", "event"]
    )
    .unwrap();

    /// Finished user turns by outcome
    pub static ref CONVERSATION_TURNS: IntCounterVec = register_int_counter_vec!(
        "codeloop_conversation_turns_total",
        "User turns by outcome",
        &["outcome"]
    )
    .unwrap();

    /// Automatic error-recovery rounds sent to the model
    pub static ref REPAIR_ROUNDS: IntCounter = register_int_counter!(
        "codeloop_repair_rounds_total",
        "Automatic error-recovery rounds"
    )
    .unwrap();
}

/// Render every registered metric as Prometheus text
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
