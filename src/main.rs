use std::io::{self, Write};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::BufReader;
use tracing::{debug, error, info};

use codeloop::agent::{console, Conversation, ConversationConfig};
use codeloop::config::{Config, LlmProvider, SandboxKind};
use codeloop::llm::{AccessTokenSource, ChatModel, OllamaClient, VertexClient};
use codeloop::sandbox::{E2bSandbox, SandboxBackend, SandboxSession, VmSandbox};
use codeloop::tracing::{init_tracing, shutdown_tracing, LogFormat};

#[tokio::main]
async fn main() {
    let format = LogFormat::from_env_value(std::env::var("LOG_FORMAT").ok().as_deref());
    let otlp = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok();
    if let Err(e) = init_tracing("codeloop", format, otlp.as_deref()) {
        eprintln!("Failed to initialize tracing: {}", e);
    }

    let code = match run().await {
        Ok(()) => 0,
        Err(e) => {
            error!(error = %format!("{:#}", e), "Fatal error");
            eprintln!("\nError: {:#}", e);
            1
        }
    };

    debug!(metrics = %codeloop::metrics::gather_text(), "Session metrics");
    shutdown_tracing();
    std::process::exit(code);
}

async fn run() -> Result<()> {
    let config = Config::from_env().context("Configuration error")?;
    let mut stdout = io::stdout();
    let model = build_model(&config, &mut stdout).await?;
    let backend = build_backend(&config)?;

    console::banner(&mut stdout, &banner_lines(&config, backend.name()))?;

    let mut conversation = Conversation::new(
        model,
        SandboxSession::new(backend),
        ConversationConfig {
            max_repair_rounds: config.max_repair_rounds,
        },
    );
    info!(session_id = %conversation.session_id(), "Conversation started");

    let stdin = BufReader::new(tokio::io::stdin());
    let outcome = tokio::select! {
        result = conversation.run(stdin, &mut stdout) => result.map(|()| false),
        _ = tokio::signal::ctrl_c() => Ok(true),
    };

    // Close the sandbox even when the loop ended on an error
    conversation.shutdown().await;

    if outcome.context("Console I/O failed")? {
        writeln!(stdout, "\n\nInterrupted by user. Goodbye!")?;
    }
    Ok(())
}

async fn build_model(config: &Config, out: &mut io::Stdout) -> Result<Box<dyn ChatModel>> {
    match config.provider {
        LlmProvider::Vertex => {
            let tokens = match &config.access_token {
                Some(token) => AccessTokenSource::fixed(token.clone()),
                None => AccessTokenSource::application_default(),
            };
            let client = VertexClient::new(&config.project_id, &config.location, &config.model, tokens)
                .with_params(config.generation);

            console::vertex_init(out, &config.project_id, &config.location)?;
            client
                .verify_credentials()
                .await
                .context("Failed to initialize Vertex AI")?;
            console::vertex_ready(out)?;

            Ok(Box::new(client))
        }
        LlmProvider::Ollama => Ok(Box::new(
            OllamaClient::new(&config.ollama_url, &config.model).with_params(config.generation),
        )),
    }
}

fn build_backend(config: &Config) -> Result<Box<dyn SandboxBackend>> {
    let timeout = Duration::from_secs(config.execution_timeout_secs);
    match config.sandbox {
        SandboxKind::E2b => {
            let settings = config
                .e2b
                .clone()
                .context("E2B settings missing from configuration")?;
            let sandbox = E2bSandbox::new(settings, timeout).context("Failed to create E2B client")?;
            Ok(Box::new(sandbox))
        }
        SandboxKind::Vm => {
            let settings = config
                .vm
                .clone()
                .context("VM settings missing from configuration")?;
            Ok(Box::new(VmSandbox::new(settings, timeout)))
        }
    }
}

fn banner_lines(config: &Config, backend: &str) -> Vec<(&'static str, String)> {
    let mut lines = Vec::new();
    if let Some(key) = config.redacted_key() {
        lines.push(("E2B API Key", key));
    }
    if !config.project_id.is_empty() {
        lines.push(("GCP Project", config.project_id.clone()));
    }
    match config.provider {
        LlmProvider::Vertex => {
            lines.push(("GCP Location", config.location.clone()));
            lines.push(("Gemini Model", config.model.clone()));
        }
        LlmProvider::Ollama => {
            lines.push(("Ollama URL", config.ollama_url.clone()));
            lines.push(("Ollama Model", config.model.clone()));
        }
    }
    lines.push(("Sandbox", backend.to_string()));
    lines
}
