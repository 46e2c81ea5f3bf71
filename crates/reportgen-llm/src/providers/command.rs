//! Local process backend
//!
//! Runs a command, writes the prompt to its stdin and takes stdout as the
//! generated text. Useful for local model runners and for wiring a script in
//! as a fallback provider.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, instrument};

use crate::{Generation, GenerationProvider, ProviderError, Result};

/// Provider backed by a local command
#[derive(Debug, Clone)]
pub struct CommandProvider {
    name: String,
    program: String,
    args: Vec<String>,
}

impl CommandProvider {
    pub fn new(name: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Parse a shell-like command line (`program arg1 arg2`), split on whitespace.
    pub fn from_command_line(name: impl Into<String>, command_line: &str) -> Result<Self> {
        let mut parts = command_line.split_whitespace();
        let program = parts.next().ok_or_else(|| {
            ProviderError::ConfigurationError("command line is empty".to_string())
        })?;
        Ok(Self::new(name, program).with_args(parts))
    }
}

#[async_trait]
impl GenerationProvider for CommandProvider {
    #[instrument(skip(self, prompt), fields(provider = %self.name, program = %self.program))]
    async fn generate(&self, prompt: &str, timeout: Duration) -> Result<Generation> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ProviderError::Transport(format!("failed to spawn {}: {e}", self.program)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(prompt.as_bytes())
                .await
                .map_err(|e| ProviderError::Transport(format!("failed to write prompt: {e}")))?;
        }

        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| ProviderError::Timeout(timeout))?
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProviderError::Transport(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        let text = String::from_utf8(output.stdout)
            .map_err(|e| ProviderError::MalformedResponse(format!("output is not UTF-8: {e}")))?;
        debug!(bytes = text.len(), "command finished");
        Ok(Generation::new(text))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_command_line_parsing() {
        let provider = CommandProvider::from_command_line("local", "llm-run --model small").unwrap();
        assert_eq!(provider.program, "llm-run");
        assert_eq!(provider.args, vec!["--model", "small"]);
        assert_err!(CommandProvider::from_command_line("local", "   "));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_prompt_round_trips_through_cat() {
        let provider = CommandProvider::new("cat", "cat");
        let generation = assert_ok!(provider.generate("Close $101.20", Duration::from_secs(5)).await);
        assert_eq!(generation.text, "Close $101.20");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_command_is_transport_error() {
        let provider = CommandProvider::new("false", "false");
        let err = provider.generate("x", Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, ProviderError::Transport(_)));
    }

    #[tokio::test]
    async fn test_missing_program_is_transport_error() {
        let provider = CommandProvider::new("missing", "definitely-not-a-real-binary-7f3a");
        let err = provider.generate("x", Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, ProviderError::Transport(_)));
    }
}
