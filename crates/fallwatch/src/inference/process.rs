//! Child-process inference runner.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command as TokioCommand};
use tracing::Instrument;

use super::{parse_output, InferenceRequest, InferenceRunner, ParseError, ParsedOutput};
use crate::config::InferenceConfig;
use crate::error::InferenceError;
use crate::sanitize::{hash_path, redact_path};

/// Longest stderr excerpt kept in an error.
const MAX_STDERR_EXCERPT: usize = 2048;
/// Stdout kept for parsing. Longer output fails the attempt.
const MAX_STDOUT_BYTES: usize = 1024 * 1024;
/// Stderr kept for logging. The rest is discarded.
const MAX_STDERR_BYTES: usize = 64 * 1024;

/// Runs `<command> <args...> --video <path> --sensitivity <f> --confidence <f>`
/// and parses its stdout.
#[derive(Debug, Clone)]
pub struct SubprocessRunner {
    command: String,
    args: Vec<String>,
    timeout: Duration,
}

impl SubprocessRunner {
    pub fn new(command: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            args,
            timeout,
        }
    }

    pub fn from_config(config: &InferenceConfig) -> Self {
        Self::new(
            config.command.clone(),
            config.args.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn build_command(&self, request: &InferenceRequest) -> TokioCommand {
        let mut cmd = TokioCommand::new(&self.command);
        cmd.args(&self.args)
            .arg("--video")
            .arg(&request.media_path)
            .arg("--sensitivity")
            .arg(request.sensitivity.to_string())
            .arg("--confidence")
            .arg(request.confidence_threshold.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group, so a timeout also reaches processes the model spawns.
        #[cfg(unix)]
        cmd.process_group(0);
        cmd
    }
}

/// Reads at most `limit` bytes, then drains the rest so the child never
/// blocks on a full pipe. Returns the kept bytes and whether any were dropped.
async fn read_capped<R>(pipe: Option<R>, limit: usize) -> std::io::Result<(Vec<u8>, bool)>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    let Some(mut pipe) = pipe else {
        return Ok((buf, false));
    };
    (&mut pipe).take(limit as u64).read_to_end(&mut buf).await?;
    let dropped = tokio::io::copy(&mut pipe, &mut tokio::io::sink()).await?;
    Ok((buf, dropped > 0))
}

/// Kills the child's whole process group, then the child itself, and reaps it.
async fn kill_tree(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        // SAFETY: killpg only sends a signal; the group was created at spawn.
        let rc = unsafe { libc::killpg(pid as libc::pid_t, libc::SIGKILL) };
        if rc != 0 {
            tracing::debug!(
                error = %std::io::Error::last_os_error(),
                "Failed to signal inference process group"
            );
        }
    }
    // kill() sends SIGKILL and waits for the child to be reaped.
    if let Err(e) = child.kill().await {
        tracing::error!(error = %e, "Failed to kill inference process");
    }
}

fn stderr_excerpt(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    if text.len() <= MAX_STDERR_EXCERPT {
        return text.to_string();
    }
    let mut end = MAX_STDERR_EXCERPT;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

#[async_trait]
impl InferenceRunner for SubprocessRunner {
    async fn run(&self, request: &InferenceRequest) -> Result<ParsedOutput, InferenceError> {
        let span = tracing::info_span!(
            "inference.subprocess",
            media = %redact_path(&request.media_path),
            media_hash = %hash_path(&request.media_path),
            timeout_secs = self.timeout.as_secs(),
        );

        async {
            let mut child = self
                .build_command(request)
                .spawn()
                .map_err(|e| InferenceError::Spawn {
                    command: self.command.clone(),
                    source: e,
                })?;

            let stdout_pipe = child.stdout.take();
            let stderr_pipe = child.stderr.take();

            let collect = async {
                let (stdout, stderr) = tokio::join!(
                    read_capped(stdout_pipe, MAX_STDOUT_BYTES),
                    read_capped(stderr_pipe, MAX_STDERR_BYTES),
                );
                let status = child.wait().await?;
                Ok::<_, std::io::Error>((status, stdout?, stderr?))
            };

            let outcome = tokio::time::timeout(self.timeout, collect).await;
            let (status, (stdout, stdout_overflow), (stderr, _)) = match outcome {
                Ok(collected) => collected?,
                Err(_) => {
                    tracing::warn!("Inference exceeded timeout, killing child process");
                    kill_tree(&mut child).await;
                    return Err(InferenceError::Timeout {
                        secs: self.timeout.as_secs(),
                    });
                }
            };

            if !stderr.is_empty() {
                tracing::debug!(stderr = %stderr_excerpt(&stderr), "Inference stderr");
            }

            if !status.success() {
                return Err(InferenceError::NonZeroExit {
                    code: status.code(),
                    stderr: stderr_excerpt(&stderr),
                });
            }

            if stdout_overflow {
                return Err(ParseError::TooLarge {
                    limit: MAX_STDOUT_BYTES,
                }
                .into());
            }

            let parsed = parse_output(&stdout)?;
            tracing::debug!(
                format = ?parsed.format,
                fall_detected = parsed.fall_detected,
                confidence = parsed.confidence,
                "Inference output parsed"
            );
            Ok(parsed)
        }
        .instrument(span)
        .await
    }
}
