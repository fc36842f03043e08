//! Runtime configuration loaded from the environment
//!
//! Every setting is read through a lookup function rather than
//! `std::env` directly, so the same code path serves the binary
//! (`Config::from_env`) and tests (`Config::from_lookup` over a map).
//! Values that may be asked for interactively go through a
//! [`PromptProvider`].

use std::io::{self, BufRead, Write};

use thiserror::Error;

use crate::llm::GenerationParams;

/// Default Vertex AI region
pub const DEFAULT_LOCATION: &str = "us-central1";
/// Default Gemini model
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash-exp";
/// Default E2B control-plane URL
pub const DEFAULT_E2B_API_URL: &str = "https://api.e2b.dev";
/// Default domain sandbox hosts live under
pub const DEFAULT_E2B_DOMAIN: &str = "e2b.app";
/// Default E2B template with a Jupyter-backed Python kernel
pub const DEFAULT_E2B_TEMPLATE: &str = "code-interpreter-v1";
/// Default Ollama server
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
/// Default Ollama model
pub const DEFAULT_OLLAMA_MODEL: &str = "qwen3";
/// Default VM instance for the gcloud SSH backend
pub const DEFAULT_VM_NAME: &str = "agent-exec-instance";
/// Default VM zone
pub const DEFAULT_VM_ZONE: &str = "us-central1-a";

/// Errors raised while building a [`Config`]
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(
        "E2B_API_KEY not found in environment.\n\
         Export it with: export E2B_API_KEY=your-key-here\n\
         Get your key from: https://e2b.dev/"
    )]
    MissingCredential,

    #[error("{0} is required")]
    MissingValue(&'static str),

    #[error("invalid value for {key}: '{value}'")]
    Invalid { key: &'static str, value: String },

    #[error("failed to read {what} from prompt: {source}")]
    Prompt {
        what: &'static str,
        #[source]
        source: io::Error,
    },
}

/// Capability for asking the user for a missing setting
pub trait PromptProvider {
    /// Ask `question` and return the trimmed answer
    fn prompt(&mut self, question: &str) -> io::Result<String>;
}

/// Prompts on stdout and reads one line from stdin
#[derive(Debug, Default)]
pub struct StdinPrompt;

impl PromptProvider for StdinPrompt {
    fn prompt(&mut self, question: &str) -> io::Result<String> {
        let mut stdout = io::stdout();
        write!(stdout, "{}", question)?;
        stdout.flush()?;

        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;
        Ok(line.trim().to_string())
    }
}

/// Answers every question with the same value
#[derive(Debug, Clone)]
pub struct FixedPrompt(pub String);

impl PromptProvider for FixedPrompt {
    fn prompt(&mut self, _question: &str) -> io::Result<String> {
        Ok(self.0.trim().to_string())
    }
}

/// Which hosted model service answers the conversation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LlmProvider {
    /// Gemini on Vertex AI
    Vertex,
    /// A local Ollama server
    Ollama,
}

/// Where extracted code runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SandboxKind {
    /// E2B code interpreter (stateful across blocks)
    E2b,
    /// A Compute Engine VM reached with `gcloud compute ssh`
    Vm,
}

/// E2B sandbox settings
#[derive(Debug, Clone)]
pub struct E2bSettings {
    pub api_key: String,
    pub api_url: String,
    pub domain: String,
    pub template: String,
    pub timeout_secs: u64,
}

/// gcloud SSH VM settings
#[derive(Debug, Clone)]
pub struct VmSettings {
    pub name: String,
    pub zone: String,
    pub username: String,
    pub project: String,
}

/// Complete process configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub provider: LlmProvider,
    /// Empty only when nothing needs a GCP project
    pub project_id: String,
    pub location: String,
    pub model: String,
    pub access_token: Option<String>,
    pub ollama_url: String,
    pub sandbox: SandboxKind,
    pub e2b: Option<E2bSettings>,
    pub vm: Option<VmSettings>,
    pub generation: GenerationParams,
    pub max_repair_rounds: usize,
    pub execution_timeout_secs: u64,
}

impl Config {
    /// Load from the process environment, prompting on the terminal
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok(), &mut StdinPrompt)
    }

    /// Load from an arbitrary key lookup
    ///
    /// Empty values count as unset.
    pub fn from_lookup<F, P>(lookup: F, prompt: &mut P) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
        P: PromptProvider + ?Sized,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let sandbox = match get("SANDBOX_BACKEND").as_deref().map(str::to_lowercase) {
            None => SandboxKind::E2b,
            Some(v) if v == "e2b" => SandboxKind::E2b,
            Some(v) if v == "vm" => SandboxKind::Vm,
            Some(v) => {
                return Err(ConfigError::Invalid {
                    key: "SANDBOX_BACKEND",
                    value: v,
                })
            }
        };

        let provider = match get("LLM_PROVIDER").as_deref().map(str::to_lowercase) {
            None => LlmProvider::Vertex,
            Some(v) if v == "vertex" || v == "gemini" => LlmProvider::Vertex,
            Some(v) if v == "ollama" => LlmProvider::Ollama,
            Some(v) => {
                return Err(ConfigError::Invalid {
                    key: "LLM_PROVIDER",
                    value: v,
                })
            }
        };

        // Fail fast on the credential before asking anything interactively
        let e2b = match sandbox {
            SandboxKind::E2b => {
                let api_key = get("E2B_API_KEY").ok_or(ConfigError::MissingCredential)?;
                Some(E2bSettings {
                    api_key,
                    api_url: get("E2B_API_URL").unwrap_or_else(|| DEFAULT_E2B_API_URL.to_string()),
                    domain: get("E2B_DOMAIN").unwrap_or_else(|| DEFAULT_E2B_DOMAIN.to_string()),
                    template: get("E2B_TEMPLATE").unwrap_or_else(|| DEFAULT_E2B_TEMPLATE.to_string()),
                    timeout_secs: parse_number(&get, "E2B_SANDBOX_TIMEOUT_SECS", 3600)?,
                })
            }
            SandboxKind::Vm => None,
        };

        let needs_project = provider == LlmProvider::Vertex || sandbox == SandboxKind::Vm;
        let project_id = match get("GCP_PROJECT_ID") {
            Some(p) => p,
            None if needs_project => {
                ask(prompt, "\nEnter your GCP Project ID: ", "GCP project ID")?
            }
            None => String::new(),
        };

        let vm = match sandbox {
            SandboxKind::Vm => {
                let username = match get("VM_USERNAME") {
                    Some(u) => u,
                    None => ask(prompt, "Enter VM username: ", "VM username")?,
                };
                Some(VmSettings {
                    name: get("VM_NAME").unwrap_or_else(|| DEFAULT_VM_NAME.to_string()),
                    zone: get("VM_ZONE").unwrap_or_else(|| DEFAULT_VM_ZONE.to_string()),
                    username,
                    project: project_id.clone(),
                })
            }
            SandboxKind::E2b => None,
        };

        let model = match provider {
            LlmProvider::Vertex => get("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            LlmProvider::Ollama => {
                get("OLLAMA_MODEL").unwrap_or_else(|| DEFAULT_OLLAMA_MODEL.to_string())
            }
        };

        Ok(Self {
            provider,
            project_id,
            location: get("GCP_LOCATION").unwrap_or_else(|| DEFAULT_LOCATION.to_string()),
            model,
            access_token: get("GOOGLE_ACCESS_TOKEN"),
            ollama_url: get("OLLAMA_URL").unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string()),
            sandbox,
            e2b,
            vm,
            generation: GenerationParams::default(),
            max_repair_rounds: parse_number(&get, "MAX_REPAIR_ROUNDS", 2)?,
            execution_timeout_secs: parse_number(&get, "EXECUTION_TIMEOUT_SECS", 60)?,
        })
    }

    /// The sandbox credential with everything but the last four characters masked
    pub fn redacted_key(&self) -> Option<String> {
        self.e2b.as_ref().map(|e2b| {
            let chars: Vec<char> = e2b.api_key.chars().collect();
            let tail: String = chars[chars.len().saturating_sub(4)..].iter().collect();
            format!("{}{}", "*".repeat(20), tail)
        })
    }
}

fn ask<P: PromptProvider + ?Sized>(
    prompt: &mut P,
    question: &str,
    what: &'static str,
) -> Result<String, ConfigError> {
    let answer = prompt
        .prompt(question)
        .map_err(|source| ConfigError::Prompt { what, source })?;
    if answer.is_empty() {
        return Err(ConfigError::MissingValue(what));
    }
    Ok(answer)
}

fn parse_number<G, T>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    G: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match get(key) {
        None => Ok(default),
        Some(value) => value.parse().map_err(|_| ConfigError::Invalid { key, value }),
    }
}
