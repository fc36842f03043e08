//! Conversation loop - user input, model call, code execution, feedback
//!
//! `Conversation` owns everything mutable in a run: the history, the
//! sandbox session and the loop state. One call to
//! [`Conversation::handle_line`] is one pass through the state machine:
//!
//! ```text
//! AwaitingInput ─exit word─▶ Terminated
//!      │
//!      ▼
//! QueryingModel ─error─▶ AwaitingInput (history untouched)
//!      │
//!      ▼
//! ExtractingCode ─no blocks─▶ ReportingResults ─▶ AwaitingInput
//!      │                            ▲
//!      ▼                            │
//! ExecutingCode ──(blocks run in order)──┘
//! ```
//!
//! When a block fails, the loop may go back to `QueryingModel` with an
//! automatic repair request, at most `max_repair_rounds` times per turn.

use std::fmt;
use std::io::{self, Write};
use std::time::Instant;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::console;
use super::history::History;
use crate::extract::{extract_code_blocks, CodeBlock};
use crate::llm::{ChatError, ChatModel, Message};
use crate::metrics::{CONVERSATION_TURNS, LLM_CALLS, LLM_CALL_TIME, REPAIR_ROUNDS};
use crate::sandbox::{SandboxSession, SessionState};

/// Words that end the session, compared case-insensitively
pub const EXIT_KEYWORDS: &[&str] = &["quit", "exit", "q"];

/// Whether `input` asks to end the session
pub fn is_exit_command(input: &str) -> bool {
    let input = input.trim();
    EXIT_KEYWORDS.iter().any(|k| input.eq_ignore_ascii_case(k))
}

/// Loop settings
#[derive(Debug, Clone)]
pub struct ConversationConfig {
    /// Automatic error-recovery rounds per user turn
    pub max_repair_rounds: usize,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            max_repair_rounds: 2,
        }
    }
}

/// Where the loop currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    AwaitingInput,
    QueryingModel,
    ExtractingCode,
    ExecutingCode,
    ReportingResults,
    Terminated,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoopState::AwaitingInput => "awaiting_input",
            LoopState::QueryingModel => "querying_model",
            LoopState::ExtractingCode => "extracting_code",
            LoopState::ExecutingCode => "executing_code",
            LoopState::ReportingResults => "reporting_results",
            LoopState::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// What a single line of input led to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Exit keyword, end of input, or the loop was already terminated
    Exit,
    /// Blank line; nothing happened
    Empty,
    /// The model could not be reached; history is unchanged
    ModelFailed(String),
    /// The model answered and any code it wrote was run
    Completed {
        blocks_executed: usize,
        blocks_failed: usize,
        repair_rounds: usize,
    },
}

/// Message asking the model to fix failed blocks
pub fn repair_prompt(failures: &[(usize, String)]) -> String {
    let mut prompt = String::from("The code execution resulted in an error:\n");
    for (index, error) in failures {
        prompt.push_str(&format!("\nCode block {}:\n{}\n", index, error.trim_end()));
    }
    prompt.push_str("\nCan you fix this?");
    prompt
}

/// A running conversation with one model and one sandbox session
pub struct Conversation {
    model: Box<dyn ChatModel>,
    sandbox: SandboxSession,
    history: History,
    state: LoopState,
    config: ConversationConfig,
    session_id: String,
    turns: usize,
}

impl Conversation {
    pub fn new(model: Box<dyn ChatModel>, sandbox: SandboxSession, config: ConversationConfig) -> Self {
        Self {
            model,
            sandbox,
            history: History::new(),
            state: LoopState::AwaitingInput,
            config,
            session_id: Uuid::now_v7().to_string(),
            turns: 0,
        }
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn sandbox_state(&self) -> &SessionState {
        self.sandbox.state()
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn transition(&mut self, next: LoopState) {
        debug!(session_id = %self.session_id, from = %self.state, to = %next, "State transition");
        self.state = next;
    }

    /// Read lines from `input` until an exit word or end of input
    pub async fn run<R, W>(&mut self, input: R, out: &mut W) -> io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: Write,
    {
        let mut lines = input.lines();
        while self.state != LoopState::Terminated {
            console::input_prompt(out)?;
            let line = match lines.next_line().await? {
                Some(line) => line,
                None => {
                    info!(session_id = %self.session_id, "End of input");
                    self.transition(LoopState::Terminated);
                    break;
                }
            };
            if self.handle_line(&line, out).await? == TurnOutcome::Exit {
                break;
            }
        }
        console::goodbye(out)
    }

    /// Process one line of user input
    ///
    /// Only console write failures are returned as errors; model and
    /// sandbox failures are reported and the loop stays usable.
    pub async fn handle_line<W: Write>(&mut self, line: &str, out: &mut W) -> io::Result<TurnOutcome> {
        if self.state == LoopState::Terminated {
            return Ok(TurnOutcome::Exit);
        }

        let input = line.trim();
        if input.is_empty() {
            return Ok(TurnOutcome::Empty);
        }
        if is_exit_command(input) {
            info!(session_id = %self.session_id, "Exit requested");
            CONVERSATION_TURNS.with_label_values(&["exit"]).inc();
            self.transition(LoopState::Terminated);
            return Ok(TurnOutcome::Exit);
        }

        self.turns += 1;
        let span = info_span!(
            "conversation_turn",
            session_id = %self.session_id,
            turn = self.turns,
            model = %self.model.name()
        );
        let input = input.to_string();
        let outcome = self.run_turn(input, out).instrument(span).await;

        self.transition(LoopState::AwaitingInput);
        outcome
    }

    async fn run_turn<W: Write>(&mut self, input: String, out: &mut W) -> io::Result<TurnOutcome> {
        let mut pending = Message::user(input);
        let mut repair_rounds = 0;
        let mut blocks_executed = 0;
        let mut blocks_failed = 0;

        loop {
            self.transition(LoopState::QueryingModel);
            console::thinking(out, self.model.name())?;

            let reply = match self.query_model(&pending).await {
                Ok(reply) => reply,
                Err(e) => {
                    warn!(error = %e, repair_round = repair_rounds, "Model call failed");
                    console::model_error(out, &e.to_string())?;
                    if repair_rounds == 0 {
                        CONVERSATION_TURNS.with_label_values(&["model_error"]).inc();
                        return Ok(TurnOutcome::ModelFailed(e.to_string()));
                    }
                    // The user's turn already stands; only the repair request is dropped
                    break;
                }
            };

            self.history.push(pending);
            self.history.push(Message::assistant(reply.clone()));
            console::assistant(out, &reply)?;

            self.transition(LoopState::ExtractingCode);
            let blocks: Vec<CodeBlock> = extract_code_blocks(&reply)
                .filter(|block| {
                    let keep = !block.source.trim().is_empty();
                    if !keep {
                        warn!(index = block.index, "Skipping empty code block");
                    }
                    keep
                })
                .collect();

            if blocks.is_empty() {
                debug!("No code blocks in reply");
                break;
            }

            self.transition(LoopState::ExecutingCode);
            let failures = self.execute_blocks(&blocks, out).await?;
            blocks_executed += blocks.len();
            blocks_failed += failures.len();

            if failures.is_empty() {
                break;
            }
            if repair_rounds >= self.config.max_repair_rounds {
                info!(repair_rounds, "Repair limit reached, returning control to user");
                break;
            }
            if matches!(self.sandbox.state(), SessionState::Degraded(_) | SessionState::Closed) {
                info!("Sandbox unavailable, not asking for a fix");
                break;
            }

            repair_rounds += 1;
            REPAIR_ROUNDS.inc();
            console::repairing(out, repair_rounds, self.config.max_repair_rounds)?;
            pending = Message::user(repair_prompt(&failures));
        }

        self.transition(LoopState::ReportingResults);
        CONVERSATION_TURNS.with_label_values(&["completed"]).inc();
        info!(blocks_executed, blocks_failed, repair_rounds, "Turn completed");

        Ok(TurnOutcome::Completed {
            blocks_executed,
            blocks_failed,
            repair_rounds,
        })
    }

    async fn query_model(&self, pending: &Message) -> Result<String, ChatError> {
        let request = self.history.with_pending(pending);
        let model = self.model.name().to_string();
        let span = info_span!("llm_call", model = %model, messages = request.len());

        let start = Instant::now();
        let result = self.model.complete(&request).instrument(span).await;
        let elapsed = start.elapsed().as_secs_f64();

        LLM_CALL_TIME.with_label_values(&[model.as_str()]).observe(elapsed);
        let status = if result.is_ok() { "success" } else { "error" };
        LLM_CALLS.with_label_values(&[model.as_str(), status]).inc();
        debug!(model = %model, duration_ms = elapsed * 1000.0, status, "Model call finished");

        result
    }

    /// Run blocks in order, appending one tool-result message per block
    ///
    /// Returns `(1-based index, error)` for each failed block.
    async fn execute_blocks<W: Write>(
        &mut self,
        blocks: &[CodeBlock],
        out: &mut W,
    ) -> io::Result<Vec<(usize, String)>> {
        let total = blocks.len();
        let mut failures = Vec::new();
        console::blocks_found(out, total)?;

        for (i, block) in blocks.iter().enumerate() {
            let number = i + 1;
            console::executing(out, number, total, &block.source)?;

            let span = info_span!(
                "code_execution",
                backend = self.sandbox.backend_name(),
                block = number,
                code_len = block.source.len()
            );
            let result = self.sandbox.execute(&block.source).instrument(span).await;

            console::execution_result(out, &result)?;
            self.history
                .push(Message::tool_result(result.to_feedback(number, total)));

            if !result.success {
                let error = result
                    .error
                    .clone()
                    .unwrap_or_else(|| "execution failed without an error message".to_string());
                failures.push((number, error));
            }
        }

        console::blocks_done(out)?;
        Ok(failures)
    }

    /// Close the sandbox session and end the loop
    pub async fn shutdown(&mut self) {
        self.transition(LoopState::Terminated);
        self.sandbox.close().await;
        info!(
            session_id = %self.session_id,
            turns = self.turns,
            messages = self.history.len(),
            "Conversation ended"
        );
    }
}
