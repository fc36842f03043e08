//! Integration tests for the conversation loop
//!
//! The model and the sandbox are replaced by in-memory doubles: the model
//! replays scripted replies, and the sandbox is a toy kernel that keeps
//! variables between calls like a real interpreter session.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use codeloop::agent::{Conversation, ConversationConfig, LoopState, TurnOutcome};
use codeloop::llm::{ChatError, ChatModel, Message, Role};
use codeloop::sandbox::{
    ExecutionResult, SandboxBackend, SandboxError, SandboxSession, SessionState,
};

// ─────────────────────────────────────────────────────────────────────────────
// Test doubles
// ─────────────────────────────────────────────────────────────────────────────

/// Replays replies in order and records every request
struct ScriptedModel {
    replies: Mutex<VecDeque<Result<String, ChatError>>>,
    requests: Arc<Mutex<Vec<Vec<Message>>>>,
}

impl ScriptedModel {
    fn new(replies: Vec<Result<String, ChatError>>) -> (Self, Arc<Mutex<Vec<Vec<Message>>>>) {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let model = Self {
            replies: Mutex::new(replies.into()),
            requests: requests.clone(),
        };
        (model, requests)
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted-model"
    }

    async fn complete(&self, history: &[Message]) -> Result<String, ChatError> {
        self.requests.lock().unwrap().push(history.to_vec());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ChatError::EmptyResponse(None)))
    }
}

#[derive(Default)]
struct KernelStats {
    opens: usize,
    closes: usize,
    executed: Vec<String>,
}

/// Understands just enough Python for these scenarios
struct ToyKernel {
    stats: Arc<Mutex<KernelStats>>,
    variables: HashMap<String, Vec<i64>>,
    fail_open: bool,
}

impl ToyKernel {
    fn new() -> (Self, Arc<Mutex<KernelStats>>) {
        let stats = Arc::new(Mutex::new(KernelStats::default()));
        let kernel = Self {
            stats: stats.clone(),
            variables: HashMap::new(),
            fail_open: false,
        };
        (kernel, stats)
    }

    fn eval(&mut self, code: &str) -> ExecutionResult {
        let mut stdout = String::new();
        for line in code.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if let Some((name, list)) = line.split_once(" = [") {
                let values = list
                    .trim_end_matches(']')
                    .split(',')
                    .filter_map(|v| v.trim().parse().ok())
                    .collect();
                self.variables.insert(name.trim().to_string(), values);
            } else if let Some(name) = line
                .strip_prefix("print(sum(")
                .and_then(|rest| rest.strip_suffix("))"))
            {
                match self.variables.get(name) {
                    Some(values) => {
                        stdout.push_str(&format!("{}\n", values.iter().sum::<i64>()))
                    }
                    None => {
                        return ExecutionResult {
                            stdout,
                            error: Some(format!(
                                "NameError: name '{}' is not defined",
                                name
                            )),
                            success: false,
                            ..Default::default()
                        }
                    }
                }
            } else if line.contains("factorial(5)") {
                stdout.push_str("120\n");
            } else if line == "print(1+1)" {
                stdout.push_str("2\n");
            } else if line.contains("1/0") {
                return ExecutionResult {
                    stdout,
                    error: Some("ZeroDivisionError: division by zero".to_string()),
                    success: false,
                    ..Default::default()
                };
            }
        }
        ExecutionResult {
            stdout,
            success: true,
            ..Default::default()
        }
    }
}

#[async_trait]
impl SandboxBackend for ToyKernel {
    fn name(&self) -> &'static str {
        "toy"
    }

    async fn open(&mut self) -> Result<(), SandboxError> {
        self.stats.lock().unwrap().opens += 1;
        if self.fail_open {
            return Err(SandboxError::Status {
                status: 401,
                message: "invalid API key".to_string(),
            });
        }
        Ok(())
    }

    async fn run(&mut self, code: &str) -> Result<ExecutionResult, SandboxError> {
        self.stats.lock().unwrap().executed.push(code.to_string());
        Ok(self.eval(code))
    }

    async fn close(&mut self) -> Result<(), SandboxError> {
        self.stats.lock().unwrap().closes += 1;
        Ok(())
    }
}

fn python(code: &str) -> String {
    format!("```python\n{}\n```", code)
}

struct Harness {
    conversation: Conversation,
    requests: Arc<Mutex<Vec<Vec<Message>>>>,
    kernel: Arc<Mutex<KernelStats>>,
    out: Vec<u8>,
}

impl Harness {
    fn new(replies: Vec<Result<String, ChatError>>) -> Self {
        Self::with_config(replies, ConversationConfig::default(), false)
    }

    fn with_config(
        replies: Vec<Result<String, ChatError>>,
        config: ConversationConfig,
        fail_open: bool,
    ) -> Self {
        let (model, requests) = ScriptedModel::new(replies);
        let (mut kernel, stats) = ToyKernel::new();
        kernel.fail_open = fail_open;
        let conversation = Conversation::new(
            Box::new(model),
            SandboxSession::new(Box::new(kernel)),
            config,
        );
        Self {
            conversation,
            requests,
            kernel: stats,
            out: Vec::new(),
        }
    }

    async fn say(&mut self, line: &str) -> TurnOutcome {
        self.conversation
            .handle_line(line, &mut self.out)
            .await
            .unwrap()
    }

    fn output(&self) -> String {
        String::from_utf8_lossy(&self.out).into_owned()
    }

    fn model_calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn roles(&self) -> Vec<Role> {
        self.conversation
            .history()
            .messages()
            .iter()
            .map(|m| m.role)
            .collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenarios
// ─────────────────────────────────────────────────────────────────────────────

/// Test that a one-block turn adds the user, assistant and tool-result messages
#[tokio::test]
async fn test_factorial_turn_adds_three_messages() {
    let reply = format!(
        "Here is the calculation:\n{}\nThis prints 120.",
        python("import math\nprint(math.factorial(5))")
    );
    let mut h = Harness::new(vec![Ok(reply)]);

    let outcome = h.say("Calculate 5 factorial").await;

    assert_eq!(
        outcome,
        TurnOutcome::Completed {
            blocks_executed: 1,
            blocks_failed: 0,
            repair_rounds: 0
        }
    );
    assert_eq!(h.roles(), vec![Role::User, Role::Assistant, Role::ToolResult]);
    assert!(h.conversation.history().messages()[2].text.contains("120"));
    assert!(h.output().contains("Executing code block 1/1..."));
    assert!(h.output().contains("Output:\n120"));
    assert_eq!(h.conversation.state(), LoopState::AwaitingInput);
}

/// Test that each model call carries every earlier message plus the new one
#[tokio::test]
async fn test_model_sees_full_history_plus_new_message() {
    let mut h = Harness::new(vec![Ok("Hi!".to_string()), Ok("Sure.".to_string())]);

    h.say("hello").await;
    h.say("and again").await;

    let requests = h.requests.lock().unwrap();
    assert_eq!(requests[0], vec![Message::user("hello")]);
    assert_eq!(
        requests[1],
        vec![
            Message::user("hello"),
            Message::assistant("Hi!"),
            Message::user("and again"),
        ]
    );
}

/// Test that "quit" terminates without touching the model or the sandbox
#[tokio::test]
async fn test_quit_makes_no_calls() {
    let mut h = Harness::new(vec![Ok("unused".to_string())]);

    assert_eq!(h.say("quit").await, TurnOutcome::Exit);

    assert_eq!(h.conversation.state(), LoopState::Terminated);
    assert_eq!(h.model_calls(), 0);
    assert_eq!(h.kernel.lock().unwrap().opens, 0);
    assert!(h.conversation.history().is_empty());

    // Nothing happens after termination
    assert_eq!(h.say("hello").await, TurnOutcome::Exit);
    assert_eq!(h.model_calls(), 0);
}

/// Test exit keywords in mixed case
#[tokio::test]
async fn test_exit_keyword_is_case_insensitive() {
    let mut h = Harness::new(vec![]);
    assert_eq!(h.say("  EXIT ").await, TurnOutcome::Exit);
    assert_eq!(h.model_calls(), 0);
}

/// Test that a blank line does nothing
#[tokio::test]
async fn test_blank_line_is_ignored() {
    let mut h = Harness::new(vec![]);
    assert_eq!(h.say("   ").await, TurnOutcome::Empty);
    assert_eq!(h.model_calls(), 0);
    assert_eq!(h.conversation.state(), LoopState::AwaitingInput);
}

/// Test a reply with no code blocks
#[tokio::test]
async fn test_reply_without_code_stands_alone() {
    let mut h = Harness::new(vec![Ok("Python is a programming language.".to_string())]);

    let outcome = h.say("What is Python?").await;

    assert_eq!(
        outcome,
        TurnOutcome::Completed {
            blocks_executed: 0,
            blocks_failed: 0,
            repair_rounds: 0
        }
    );
    assert_eq!(h.roles(), vec![Role::User, Role::Assistant]);
    assert_eq!(h.kernel.lock().unwrap().opens, 0);
    assert!(h.output().contains("Agent: Python is a programming language."));
}

/// Test that a failed model call leaves history as it was so the user can retry
#[tokio::test]
async fn test_model_failure_leaves_history_untouched() {
    let mut h = Harness::new(vec![
        Err(ChatError::Status {
            status: 429,
            message: "Quota exceeded".to_string(),
        }),
        Ok("Recovered.".to_string()),
    ]);

    let outcome = h.say("first try").await;
    assert!(matches!(outcome, TurnOutcome::ModelFailed(ref e) if e.contains("Quota exceeded")));
    assert!(h.conversation.history().is_empty());
    assert_eq!(h.conversation.state(), LoopState::AwaitingInput);
    assert!(h.output().contains("Error calling model"));

    // The loop stays usable
    h.say("second try").await;
    assert_eq!(h.roles(), vec![Role::User, Role::Assistant]);
    assert_eq!(h.conversation.history().messages()[0].text, "second try");
}

/// Test that a variable defined in one turn is visible in the next
#[tokio::test]
async fn test_session_is_reused_across_turns() {
    let mut h = Harness::new(vec![
        Ok(python("x = [1, 2, 3]")),
        Ok(python("print(sum(x))")),
    ]);

    h.say("Define x as [1, 2, 3]").await;
    let outcome = h.say("Now compute sum(x)").await;

    assert_eq!(
        outcome,
        TurnOutcome::Completed {
            blocks_executed: 1,
            blocks_failed: 0,
            repair_rounds: 0
        }
    );
    let last = h.conversation.history().last().unwrap();
    assert_eq!(last.role, Role::ToolResult);
    assert!(last.text.contains("Stdout:\n6"));

    let kernel = h.kernel.lock().unwrap();
    assert_eq!(kernel.opens, 1);
    assert_eq!(kernel.executed.len(), 2);
    assert_eq!(h.conversation.sandbox_state(), &SessionState::Open);
}

/// Test that blocks in one reply run in the order they appear
#[tokio::test]
async fn test_blocks_run_in_order_within_a_reply() {
    let reply = format!(
        "First define, then use:\n{}\nand\n{}",
        python("x = [4, 5]"),
        python("print(sum(x))")
    );
    let mut h = Harness::new(vec![Ok(reply)]);

    let outcome = h.say("sum 4 and 5").await;

    assert_eq!(
        outcome,
        TurnOutcome::Completed {
            blocks_executed: 2,
            blocks_failed: 0,
            repair_rounds: 0
        }
    );
    assert_eq!(
        h.roles(),
        vec![Role::User, Role::Assistant, Role::ToolResult, Role::ToolResult]
    );
    let kernel = h.kernel.lock().unwrap();
    assert_eq!(kernel.executed, vec!["x = [4, 5]\n", "print(sum(x))\n"]);
    assert!(h.output().contains("Found 2 code block(s) to execute"));
}

/// Test that a failed block sends the error back to the model for a fix
#[tokio::test]
async fn test_execution_error_triggers_repair_round() {
    let mut h = Harness::new(vec![Ok(python("print(1/0)")), Ok(python("print(1+1)"))]);

    let outcome = h.say("divide one by zero").await;

    assert_eq!(
        outcome,
        TurnOutcome::Completed {
            blocks_executed: 2,
            blocks_failed: 1,
            repair_rounds: 1
        }
    );
    assert_eq!(
        h.roles(),
        vec![
            Role::User,
            Role::Assistant,
            Role::ToolResult,
            Role::User,
            Role::Assistant,
            Role::ToolResult,
        ]
    );

    let requests = h.requests.lock().unwrap();
    assert_eq!(requests.len(), 2);
    let repair = requests[1].last().unwrap();
    assert_eq!(repair.role, Role::User);
    assert!(repair.text.contains("ZeroDivisionError"));
    assert!(repair.text.ends_with("Can you fix this?"));

    // The model also saw the failed tool result before the repair request
    assert_eq!(requests[1][2].role, Role::ToolResult);
    assert!(requests[1][2].text.contains("(failed)"));
}

/// Test that repeated failures stop after the configured number of repair rounds
#[tokio::test]
async fn test_repair_rounds_are_bounded() {
    let failing = || Ok(python("print(1/0)"));
    let mut h = Harness::with_config(
        vec![failing(), failing(), failing(), failing()],
        ConversationConfig {
            max_repair_rounds: 1,
        },
        false,
    );

    let outcome = h.say("keep failing").await;

    assert_eq!(
        outcome,
        TurnOutcome::Completed {
            blocks_executed: 2,
            blocks_failed: 2,
            repair_rounds: 1
        }
    );
    assert_eq!(h.model_calls(), 2);
    assert_eq!(h.conversation.state(), LoopState::AwaitingInput);
}

/// Test that zero repair rounds returns control to the user after a failure
#[tokio::test]
async fn test_no_repair_when_disabled() {
    let mut h = Harness::with_config(
        vec![Ok(python("print(1/0)"))],
        ConversationConfig {
            max_repair_rounds: 0,
        },
        false,
    );

    h.say("fail once").await;

    assert_eq!(h.model_calls(), 1);
    assert_eq!(h.roles(), vec![Role::User, Role::Assistant, Role::ToolResult]);
    assert!(h.output().contains("ZeroDivisionError"));
}

/// Test a model failure during a repair round
#[tokio::test]
async fn test_model_failure_during_repair_keeps_the_turn() {
    let mut h = Harness::new(vec![
        Ok(python("print(1/0)")),
        Err(ChatError::EmptyResponse(None)),
    ]);

    let outcome = h.say("divide").await;

    assert!(matches!(
        outcome,
        TurnOutcome::Completed {
            repair_rounds: 1,
            ..
        }
    ));
    // The repair request itself is not recorded
    assert_eq!(h.roles(), vec![Role::User, Role::Assistant, Role::ToolResult]);
}

/// Test that a sandbox that fails to start is reported without a repair loop
#[tokio::test]
async fn test_unavailable_sandbox_is_reported_to_model() {
    let mut h = Harness::with_config(
        vec![Ok(python("print(1+1)")), Ok("Understood.".to_string())],
        ConversationConfig::default(),
        true,
    );

    let outcome = h.say("add").await;

    // No repair round: the sandbox can't run a fix either
    assert_eq!(
        outcome,
        TurnOutcome::Completed {
            blocks_executed: 1,
            blocks_failed: 1,
            repair_rounds: 0
        }
    );
    assert!(matches!(h.conversation.sandbox_state(), SessionState::Degraded(_)));

    let tool = h.conversation.history().last().unwrap();
    assert_eq!(tool.role, Role::ToolResult);
    assert!(tool.text.contains("invalid API key"));

    // Later turns still reach the model
    h.say("ok?").await;
    assert_eq!(h.model_calls(), 2);
    assert_eq!(h.kernel.lock().unwrap().opens, 1);
}

/// Test that empty code blocks are not executed
#[tokio::test]
async fn test_empty_code_blocks_are_skipped() {
    let mut h = Harness::new(vec![Ok("```python\n   \n```".to_string())]);

    let outcome = h.say("nothing").await;

    assert_eq!(
        outcome,
        TurnOutcome::Completed {
            blocks_executed: 0,
            blocks_failed: 0,
            repair_rounds: 0
        }
    );
    assert_eq!(h.kernel.lock().unwrap().opens, 0);
}

/// Test the input loop up to "quit" and the sandbox teardown
#[tokio::test]
async fn test_run_reads_until_quit_and_shutdown_closes_session() {
    let mut h = Harness::new(vec![Ok(python("print(1+1)"))]);
    let input: &[u8] = b"add one and one\n\nquit\nnever read\n";

    h.conversation.run(input, &mut h.out).await.unwrap();
    h.conversation.shutdown().await;

    assert_eq!(h.model_calls(), 1);
    assert!(h.output().contains("You: "));
    assert!(h.output().contains("Goodbye!"));
    assert_eq!(h.conversation.state(), LoopState::Terminated);

    let kernel = h.kernel.lock().unwrap();
    assert_eq!(kernel.opens, 1);
    assert_eq!(kernel.closes, 1);
}

/// Test that end of input ends the loop
#[tokio::test]
async fn test_run_stops_at_end_of_input() {
    let mut h = Harness::new(vec![Ok("fine".to_string())]);
    let input: &[u8] = b"hello";

    h.conversation.run(input, &mut h.out).await.unwrap();

    assert_eq!(h.model_calls(), 1);
    assert_eq!(h.conversation.state(), LoopState::Terminated);
}

/// Test history growth over several turns
#[tokio::test]
async fn test_history_grows_per_completed_turn() {
    let mut h = Harness::new(vec![
        Ok("no code".to_string()),
        Ok(python("print(1+1)")),
        Ok(format!("{}\n{}", python("x = [1]"), python("print(sum(x))"))),
    ]);

    let mut expected = 0;
    for (input, tool_results) in [("a", 0), ("b", 1), ("c", 2)] {
        h.say(input).await;
        expected += 2 + tool_results;
        assert_eq!(h.conversation.history().len(), expected);
    }
    assert_eq!(h.conversation.history().count(Role::User), 3);
    assert_eq!(h.conversation.history().count(Role::Assistant), 3);
}
