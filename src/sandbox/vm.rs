//! Compute Engine VM backend over `gcloud compute ssh`
//!
//! Each block runs as `python3 -c '<code>'` in a fresh process on the VM,
//! so unlike the E2B kernel nothing carries over between blocks.

use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{info, warn};

use super::{ExecutionResult, SandboxBackend, SandboxError};
use crate::config::VmSettings;

/// stderr lines gcloud prints about the SSH tunnel itself
const SSH_NOISE: &[&str] = &[
    "updating project ssh metadata",
    "waiting for ssh key to propagate",
    "warning: permanently added",
    "external ip address was not found",
];

/// `gcloud compute ssh` exit status when the SSH connection itself failed
const SSH_CONNECTION_FAILED: i32 = 255;

/// Quote `s` as a single POSIX shell word
pub fn shell_quote(s: &str) -> String {
    if !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,@%+".contains(c))
    {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', r#"'\''"#))
}

/// Drop gcloud connection chatter from stderr
pub fn filter_ssh_noise(stderr: &str) -> String {
    stderr
        .lines()
        .filter(|line| {
            let lower = line.to_lowercase();
            !line.trim().is_empty() && !SSH_NOISE.iter().any(|noise| lower.contains(noise))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Error text for a remote python run that exited unsuccessfully
fn failure_message(status: ExitStatus, stderr: &str) -> String {
    if !stderr.is_empty() {
        return stderr.to_string();
    }
    match status.code() {
        Some(code) => format!("python3 exited with status {}", code),
        None => "python3 was terminated by a signal".to_string(),
    }
}

/// Runs code on a VM through gcloud SSH
pub struct VmSandbox {
    settings: VmSettings,
    timeout: Duration,
    connected: bool,
    program: String,
    program_args: Vec<String>,
}

impl VmSandbox {
    pub fn new(settings: VmSettings, timeout: Duration) -> Self {
        Self {
            settings,
            timeout,
            connected: false,
            program: "gcloud".to_string(),
            program_args: Vec::new(),
        }
    }

    /// Launch `program args...` in place of `gcloud`
    #[cfg(test)]
    fn with_program(mut self, program: &str, args: &[&str]) -> Self {
        self.program = program.to_string();
        self.program_args = args.iter().map(|a| a.to_string()).collect();
        self
    }

    fn connection_error(&self, status: ExitStatus, stderr: &str) -> SandboxError {
        let status = status
            .code()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        if stderr.is_empty() {
            SandboxError::Connection(format!(
                "gcloud ssh to {} failed with exit status {}",
                self.settings.name, status
            ))
        } else {
            SandboxError::Connection(format!("gcloud ssh to {} failed: {}", self.settings.name, stderr))
        }
    }

    fn ssh_args(&self, remote_command: &str) -> Vec<String> {
        vec![
            "compute".to_string(),
            "ssh".to_string(),
            format!("{}@{}", self.settings.username, self.settings.name),
            format!("--zone={}", self.settings.zone),
            format!("--project={}", self.settings.project),
            format!("--command={}", remote_command),
        ]
    }

    async fn ssh(&self, remote_command: &str) -> Result<std::process::Output, SandboxError> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.program_args)
            .args(self.ssh_args(remote_command))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let child = command.output();

        match tokio::time::timeout(self.timeout, child).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(SandboxError::Spawn {
                program: "gcloud",
                source: e,
            }),
            Err(_) => Err(SandboxError::Connection(format!(
                "gcloud ssh timed out after {:?}",
                self.timeout
            ))),
        }
    }
}

#[async_trait]
impl SandboxBackend for VmSandbox {
    fn name(&self) -> &'static str {
        "vm"
    }

    async fn open(&mut self) -> Result<(), SandboxError> {
        info!(
            vm = %self.settings.name,
            zone = %self.settings.zone,
            user = %self.settings.username,
            "Connecting to VM via gcloud SSH tunnel"
        );

        let output = self.ssh("echo 'Connection test successful'").await?;
        if !output.status.success() {
            let stderr = filter_ssh_noise(&String::from_utf8_lossy(&output.stderr));
            return Err(self.connection_error(output.status, &stderr));
        }

        self.connected = true;
        info!(vm = %self.settings.name, "VM connection ready");
        Ok(())
    }

    async fn run(&mut self, code: &str) -> Result<ExecutionResult, SandboxError> {
        if !self.connected {
            return Err(SandboxError::NotOpen);
        }

        let start = Instant::now();
        let output = self
            .ssh(&format!("python3 -c {}", shell_quote(code)))
            .await?;

        let stderr = filter_ssh_noise(&String::from_utf8_lossy(&output.stderr));
        if output.status.code() == Some(SSH_CONNECTION_FAILED) {
            return Err(self.connection_error(output.status, &stderr));
        }

        let success = output.status.success();
        if !success {
            warn!(exit_code = ?output.status.code(), "Remote python exited with failure");
        }

        Ok(ExecutionResult {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            error: if success { None } else { Some(failure_message(output.status, &stderr)) },
            stderr: if success { stderr } else { String::new() },
            success,
            duration_ms: start.elapsed().as_secs_f64() * 1000.0,
        })
    }

    async fn close(&mut self) -> Result<(), SandboxError> {
        // Nothing persistent to tear down; every call is its own SSH session
        if self.connected {
            info!(vm = %self.settings.name, "VM connection closed");
        }
        self.connected = false;
        Ok(())
    }
}
