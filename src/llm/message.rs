//! Conversation messages and generation parameters

use serde::{Deserialize, Serialize};

/// Who produced a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    /// Outcome of running one code block, relayed back to the model
    ToolResult,
}

/// A single entry in the conversation history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub text: String,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }

    pub fn tool_result(text: impl Into<String>) -> Self {
        Self {
            role: Role::ToolResult,
            text: text.into(),
        }
    }
}

/// Fixed sampling knobs sent with every model call
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub max_output_tokens: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.95,
            top_k: 40,
            max_output_tokens: 2048,
        }
    }
}

/// Instruction sent ahead of the conversation on every call
pub const DEFAULT_SYSTEM_INSTRUCTION: &str = r#"You are a helpful Python coding assistant with code execution capabilities.

When the user asks you to perform tasks that require computation or code:
1. Write clear, well-commented Python code
2. Put the code in ```python code blocks
3. I will automatically execute it and show you the results
4. Explain what the code does before or after the code block

Code blocks run in order in one persistent Python session, so later blocks can use
variables defined by earlier ones. If a block fails you will be shown the error; fix it.
The execution environment has common packages like numpy, pandas, matplotlib pre-installed.
Keep code concise and focused on the task."#;
