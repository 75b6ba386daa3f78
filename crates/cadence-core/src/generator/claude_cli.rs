//! Generator backed by the `claude` command-line tool.
//!
//! Runs `claude -p --output-format json --model <model>` once per request,
//! writes the prompt to stdin and reads the single JSON result object from
//! stdout.

use std::process::Stdio;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{GenerationError, GenerationRequest, TextGenerator};

/// Adapter for the `claude` CLI in print mode.
#[derive(Debug, Clone)]
pub struct ClaudeCliGenerator {
    binary: String,
}

impl ClaudeCliGenerator {
    /// Look for `claude` on `$PATH`.
    pub fn new() -> Self {
        Self::with_binary("claude")
    }

    pub fn with_binary(path: impl Into<String>) -> Self {
        Self {
            binary: path.into(),
        }
    }
}

impl Default for ClaudeCliGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Map the CLI's JSON result object to text or an error.
///
/// The CLI prints `{"type":"result","is_error":bool,"result":"..."}`.
fn parse_result(stdout: &str) -> Result<String, GenerationError> {
    let line = stdout
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .ok_or_else(|| GenerationError::Failed("empty output from claude".to_string()))?;

    let v: Value = serde_json::from_str(line)
        .map_err(|e| GenerationError::Failed(format!("malformed JSON from claude: {e}")))?;

    let text = v.get("result").and_then(Value::as_str).unwrap_or("");
    let is_error = v.get("is_error").and_then(Value::as_bool).unwrap_or(false);

    if is_error {
        return Err(classify_error_text(text));
    }
    if text.trim().is_empty() {
        return Err(GenerationError::Failed("claude returned no text".to_string()));
    }
    Ok(text.to_string())
}

fn classify_error_text(text: &str) -> GenerationError {
    let lower = text.to_ascii_lowercase();
    if lower.contains("rate limit") || lower.contains("429") || lower.contains("usage limit") {
        GenerationError::RateLimited { retry_after: None }
    } else if lower.contains("overloaded") || lower.contains("529") {
        GenerationError::Unavailable(text.to_string())
    } else {
        GenerationError::Failed(text.to_string())
    }
}

#[async_trait]
impl TextGenerator for ClaudeCliGenerator {
    fn name(&self) -> &str {
        "claude-cli"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("-p")
            .arg("--output-format")
            .arg("json")
            .arg("--model")
            .arg(&request.model)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // The CLI does not expose sampling controls.
        debug!(
            binary = %self.binary,
            model = %request.model,
            temperature = request.temperature,
            "spawning claude"
        );

        let mut child = cmd.spawn().map_err(|e| {
            GenerationError::Unavailable(format!("failed to spawn {}: {e}", self.binary))
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(request.prompt.as_bytes())
                .await
                .map_err(|e| GenerationError::Failed(format!("failed to write prompt: {e}")))?;
            // Dropping stdin closes the pipe so the CLI starts processing.
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| GenerationError::Failed(format!("failed to wait for claude: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() && stdout.trim().is_empty() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(status = %output.status, "claude exited without output");
            return Err(classify_error_text(stderr.trim()));
        }

        parse_result(&stdout)
    }
}
