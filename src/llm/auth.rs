//! Google Cloud access tokens for Vertex AI
//!
//! Tokens come either from a fixed value (`GOOGLE_ACCESS_TOKEN`) or from
//! Application Default Credentials through the gcloud CLI. ADC tokens are
//! cached and refreshed when the service rejects them.

use std::process::Stdio;

use thiserror::Error;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Hint printed when credentials can't be obtained
pub const ADC_HINT: &str = "Make sure you've run: gcloud auth application-default login";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("gcloud CLI not found; install it from https://cloud.google.com/sdk/docs/install")]
    GcloudMissing,

    #[error("failed to run gcloud: {0}. {}", ADC_HINT)]
    Spawn(std::io::Error),

    #[error("gcloud returned no access token: {0}. {}", ADC_HINT)]
    NoToken(String),
}

/// Where bearer tokens come from
pub struct AccessTokenSource {
    fixed: Option<String>,
    cached: Mutex<Option<String>>,
    program: String,
    program_args: Vec<String>,
}

impl AccessTokenSource {
    /// Always hand out `token`
    pub fn fixed(token: impl Into<String>) -> Self {
        Self {
            fixed: Some(token.into()),
            cached: Mutex::new(None),
            program: "gcloud".to_string(),
            program_args: Vec::new(),
        }
    }

    /// Ask gcloud for Application Default Credentials tokens
    pub fn application_default() -> Self {
        Self {
            fixed: None,
            cached: Mutex::new(None),
            program: "gcloud".to_string(),
            program_args: Vec::new(),
        }
    }

    /// Launch `program args...` in place of `gcloud`
    #[cfg(test)]
    pub(crate) fn with_program(mut self, program: &str, args: &[&str]) -> Self {
        self.program = program.to_string();
        self.program_args = args.iter().map(|a| a.to_string()).collect();
        self
    }

    /// Current token, fetching one if nothing is cached
    pub async fn token(&self) -> Result<String, AuthError> {
        if let Some(token) = &self.fixed {
            return Ok(token.clone());
        }

        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            return Ok(token.clone());
        }

        let token = fetch_adc_token(&self.program, &self.program_args).await?;
        *cached = Some(token.clone());
        Ok(token)
    }

    /// Drop the cached token so the next call fetches a new one
    ///
    /// Returns false when the source can't produce a different token.
    pub async fn invalidate(&self) -> bool {
        if self.fixed.is_some() {
            return false;
        }
        *self.cached.lock().await = None;
        true
    }
}

async fn fetch_adc_token(program: &str, program_args: &[String]) -> Result<String, AuthError> {
    debug!("Fetching access token from gcloud");
    let output = Command::new(program)
        .args(program_args)
        .args(["auth", "application-default", "print-access-token"])
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => AuthError::GcloudMissing,
            _ => AuthError::Spawn(e),
        })?;

    let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if !output.status.success() || token.is_empty() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(AuthError::NoToken(stderr));
    }

    info!("Obtained access token from Application Default Credentials");
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fixed_token() {
        let source = AccessTokenSource::fixed("ya29.token");
        assert_eq!(source.token().await.unwrap(), "ya29.token");
        assert!(!source.invalidate().await);
        assert_eq!(source.token().await.unwrap(), "ya29.token");
    }

    #[tokio::test]
    async fn test_cached_adc_token_is_reused() {
        let source = AccessTokenSource::application_default();
        *source.cached.lock().await = Some("cached".to_string());
        assert_eq!(source.token().await.unwrap(), "cached");

        assert!(source.invalidate().await);
        assert!(source.cached.lock().await.is_none());
    }

    #[tokio::test]
    async fn test_adc_token_fetched_once() {
        let source = AccessTokenSource::application_default()
            .with_program("sh", &["-c", "echo ya29.fresh", "gcloud"]);
        assert_eq!(source.token().await.unwrap(), "ya29.fresh");
        assert_eq!(source.cached.lock().await.as_deref(), Some("ya29.fresh"));
    }

    #[tokio::test]
    async fn test_missing_gcloud() {
        let source = AccessTokenSource::application_default()
            .with_program("codeloop-test-no-such-gcloud", &[]);
        assert!(matches!(source.token().await, Err(AuthError::GcloudMissing)));
    }

    #[tokio::test]
    async fn test_rejected_login_carries_hint() {
        let source = AccessTokenSource::application_default().with_program(
            "sh",
            &[
                "-c",
                "echo 'ERROR: (gcloud.auth.application-default) Reauthentication required.' >&2; exit 1",
                "gcloud",
            ],
        );

        let err = source.token().await.unwrap_err();
        assert!(matches!(err, AuthError::NoToken(_)));
        let message = err.to_string();
        assert!(message.contains("Reauthentication required"));
        assert!(message.contains(ADC_HINT));
        assert!(source.cached.lock().await.is_none());
    }

    #[tokio::test]
    async fn test_empty_output_is_no_token() {
        let source = AccessTokenSource::application_default()
            .with_program("sh", &["-c", "exit 0", "gcloud"]);
        assert!(matches!(source.token().await, Err(AuthError::NoToken(_))));
    }
}
