//! Conversation loop for model-driven code execution
//!
//! This module ties the pieces together:
//! - the model (Gemini on Vertex AI, or Ollama)
//! - the code extractor
//! - the sandbox session, reused for every block of the run
//!
//! # Architecture
//!
//! ```text
//! User input → Conversation → ChatModel.complete(history)
//!                   ↓
//!           extract_code_blocks(reply)
//!                   ↓
//!           SandboxSession.execute(block)   (in order, same session)
//!                   ↓
//!           tool-result messages → History
//!                   ↓
//!           failures? → repair request (bounded) → ChatModel
//! ```

pub mod console;
pub mod conversation;
pub mod history;

pub use conversation::{
    is_exit_command, repair_prompt, Conversation, ConversationConfig, LoopState, TurnOutcome,
    EXIT_KEYWORDS,
};
pub use history::History;
