//! Command Execution
//!
//! Spawns validated ImageMagick commands as subprocesses with strict resource
//! bounds. Commands are executed from a token vector, never through a shell
//! interpreter, which is what makes the validator's metacharacter scan a
//! defense-in-depth measure rather than the sole safety mechanism.
//!
//! Every failure mode is reported as data in [`ExecutionOutcome`]: a timeout,
//! a non-zero exit, and a spawn failure are ordinary outcomes, never panics
//! or `Err` returns. Nothing here retries; retry policy belongs to the
//! orchestration layer above.

use super::resolver::ToolVariant;
use super::validator::SanitizedCommand;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::process::Command as TokioCommand;
use tracing::{debug, info, warn};

/// Default wall-clock timeout for one execution.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default character budget for captured stdout/stderr.
const DEFAULT_CAPTURE_LIMIT: usize = 500;

/// Classification of a failed execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The process exceeded the configured wall-clock timeout and was killed
    Timeout,
    /// The tool ran to completion but reported failure
    NonZeroExit,
    /// The process could not be created at all
    SpawnFailure,
}

/// Result of one execution attempt. Immutable once produced; owned by the
/// caller after return.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub exit_status: Option<i32>,
    pub duration_ms: u64,
    /// Standard output, truncated to the configured character budget
    pub stdout: String,
    /// Standard error, truncated to the configured character budget
    pub stderr: String,
    /// Heuristically extracted output file, when the command has one
    pub output_path: Option<String>,
    pub error_kind: Option<ErrorKind>,
}

impl ExecutionOutcome {
    /// Status label used for metrics and log lines.
    pub fn status_label(&self) -> &'static str {
        match self.error_kind {
            None => "success",
            Some(ErrorKind::Timeout) => "timeout",
            Some(ErrorKind::NonZeroExit) => "non_zero_exit",
            Some(ErrorKind::SpawnFailure) => "spawn_failure",
        }
    }
}

/// Configuration for command execution.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Wall-clock timeout per execution
    pub timeout: Duration,

    /// Character budget for each captured stream
    pub capture_limit: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            capture_limit: DEFAULT_CAPTURE_LIMIT,
        }
    }
}

impl ExecutorConfig {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Default::default()
        }
    }
}

/// Executes sanitized commands under the resolved tool variant.
///
/// `execute` accepts only [`SanitizedCommand`], which the validator alone can
/// construct, so a command that failed validation is unrepresentable here.
/// The executor therefore does not re-validate its input.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    variant: ToolVariant,
    config: ExecutorConfig,
}

impl CommandExecutor {
    pub fn new(variant: ToolVariant) -> Self {
        Self {
            variant,
            config: ExecutorConfig::default(),
        }
    }

    pub fn with_config(variant: ToolVariant, config: ExecutorConfig) -> Self {
        Self { variant, config }
    }

    pub fn variant(&self) -> ToolVariant {
        self.variant
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// The argument vector that will actually be spawned: the sanitized
    /// tokens with the resolved binary substituted into a generically-named
    /// first token.
    pub fn resolved_argv(&self, command: &SanitizedCommand) -> Vec<String> {
        let mut argv: Vec<String> = command.tokens().to_vec();
        // Only the generic converter entry points are rewritten; companion
        // utilities keep their own names in both dialects.
        if matches!(command.program(), "magick" | "convert") {
            argv[0] = self.variant.binary().to_string();
        }
        argv
    }

    /// Execute a sanitized command and report the outcome.
    pub async fn execute(&self, command: &SanitizedCommand) -> ExecutionOutcome {
        let start = Instant::now();
        let argv = self.resolved_argv(command);
        let output_path = extract_output_path(command);

        info!(command = %argv.join(" "), "executing");

        let mut process = TokioCommand::new(&argv[0]);
        process
            .args(&argv[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match process.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(program = %argv[0], error = %e, "failed to spawn process");
                return ExecutionOutcome {
                    success: false,
                    exit_status: None,
                    duration_ms: start.elapsed().as_millis() as u64,
                    stdout: String::new(),
                    stderr: e.to_string(),
                    output_path,
                    error_kind: Some(ErrorKind::SpawnFailure),
                };
            }
        };

        // Drain both pipes off-task so a chatty child cannot deadlock against
        // a full pipe buffer while we wait on it.
        let stdout_task = tokio::spawn(read_stream(child.stdout.take()));
        let stderr_task = tokio::spawn(read_stream(child.stderr.take()));

        let status = match tokio::time::timeout(self.config.timeout, child.wait()).await {
            Err(_) => {
                // Kill and reap so the child does not outlive the attempt.
                let _ = child.start_kill();
                let _ = child.wait().await;
                let duration_ms = start.elapsed().as_millis() as u64;
                warn!(timeout = ?self.config.timeout, "command timed out, child killed");

                let stdout = stdout_task.await.unwrap_or_default();
                let stderr = stderr_task.await.unwrap_or_default();
                return ExecutionOutcome {
                    success: false,
                    exit_status: None,
                    duration_ms,
                    stdout: truncate_chars(stdout, self.config.capture_limit),
                    stderr: truncate_chars(stderr, self.config.capture_limit),
                    output_path,
                    error_kind: Some(ErrorKind::Timeout),
                };
            }
            Ok(Err(e)) => {
                warn!(error = %e, "failed waiting on child process");
                return ExecutionOutcome {
                    success: false,
                    exit_status: None,
                    duration_ms: start.elapsed().as_millis() as u64,
                    stdout: String::new(),
                    stderr: e.to_string(),
                    output_path,
                    error_kind: Some(ErrorKind::SpawnFailure),
                };
            }
            Ok(Ok(status)) => status,
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        let stdout = truncate_chars(stdout_task.await.unwrap_or_default(), self.config.capture_limit);
        let stderr = truncate_chars(stderr_task.await.unwrap_or_default(), self.config.capture_limit);
        let exit_status = status.code();

        if status.success() {
            info!(duration_ms, "command succeeded");
            ExecutionOutcome {
                success: true,
                exit_status,
                duration_ms,
                stdout,
                stderr,
                output_path,
                error_kind: None,
            }
        } else {
            warn!(duration_ms, exit_status = ?exit_status, "command failed");
            ExecutionOutcome {
                success: false,
                exit_status,
                duration_ms,
                stdout,
                stderr,
                output_path,
                error_kind: Some(ErrorKind::NonZeroExit),
            }
        }
    }
}

/// Read a child stream to EOF, lossily decoding to a string.
async fn read_stream<R>(stream: Option<R>) -> String
where
    R: tokio::io::AsyncRead + Unpin,
{
    let Some(mut stream) = stream else {
        return String::new();
    };
    let mut buf = Vec::new();
    if let Err(e) = stream.read_to_end(&mut buf).await {
        debug!(error = %e, "failed reading child stream");
    }
    String::from_utf8_lossy(&buf).to_string()
}

/// Truncate a string to a character budget, appending an ellipsis marker
/// when anything was dropped.
fn truncate_chars(s: String, limit: usize) -> String {
    if s.chars().count() <= limit {
        return s;
    }
    let mut out: String = s.chars().take(limit).collect();
    out.push_str("...");
    out
}

/// Guess the output file of a command: the last token that is not a flag,
/// is not the program itself, and carries an extension.
///
/// Inspection (`identify`) and in-place batch mutation (`mogrify`) have no
/// single discernible output, so they yield `None` outright. A trailing
/// dotted token that also appears earlier in the command is an input being
/// re-referenced, not an output.
pub fn extract_output_path(command: &SanitizedCommand) -> Option<String> {
    if matches!(command.program(), "identify" | "mogrify") {
        return None;
    }

    let tokens = command.tokens();
    for i in (1..tokens.len()).rev() {
        let tok = &tokens[i];
        if !tok.starts_with('-') && tok.contains('.') && *tok != tokens[0] {
            if tokens[1..i].contains(tok) {
                return None;
            }
            return Some(tok.clone());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::validator::{CommandValidator, RuleSet};

    /// Validator whose allow-set contains common test utilities, so executor
    /// behavior can be exercised without ImageMagick installed.
    fn test_validator() -> CommandValidator {
        CommandValidator::new(RuleSet::new(
            ["echo", "false", "sleep", "seq", "magick", "convert", "identify", "mogrify"],
            ["-script", "-write"],
            vec![';', '|', '&', '$', '`', '(', ')'],
        ))
    }

    fn sanitized(line: &str) -> SanitizedCommand {
        test_validator()
            .validate(line)
            .sanitized()
            .expect("test command should validate")
            .clone()
    }

    #[tokio::test]
    async fn test_execute_success() {
        let executor = CommandExecutor::new(ToolVariant::Modern);
        let outcome = executor.execute(&sanitized("echo hello.txt")).await;

        assert!(outcome.success);
        assert_eq!(outcome.exit_status, Some(0));
        assert!(outcome.stdout.contains("hello.txt"));
        assert!(outcome.error_kind.is_none());
        assert_eq!(outcome.status_label(), "success");
    }

    #[tokio::test]
    async fn test_execute_non_zero_exit() {
        let executor = CommandExecutor::new(ToolVariant::Modern);
        let outcome = executor.execute(&sanitized("false")).await;

        assert!(!outcome.success);
        assert_eq!(outcome.exit_status, Some(1));
        assert_eq!(outcome.error_kind, Some(ErrorKind::NonZeroExit));
    }

    #[tokio::test]
    async fn test_execute_timeout_kills_child() {
        let config = ExecutorConfig::with_timeout(Duration::from_millis(300));
        let executor = CommandExecutor::with_config(ToolVariant::Modern, config);

        let start = Instant::now();
        let outcome = executor.execute(&sanitized("sleep 30")).await;

        assert!(!outcome.success);
        assert_eq!(outcome.error_kind, Some(ErrorKind::Timeout));
        assert!(outcome.exit_status.is_none());
        // The child was killed and reaped, not abandoned for 30 seconds.
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_execute_spawn_failure() {
        let validator = CommandValidator::new(RuleSet::new(
            ["no-such-binary-exists-here"],
            ["-script"],
            vec![';'],
        ));
        let command = validator
            .validate("no-such-binary-exists-here input.jpg out.png")
            .sanitized()
            .unwrap()
            .clone();

        let executor = CommandExecutor::new(ToolVariant::Modern);
        let outcome = executor.execute(&command).await;

        assert!(!outcome.success);
        assert_eq!(outcome.error_kind, Some(ErrorKind::SpawnFailure));
        assert!(outcome.exit_status.is_none());
    }

    #[tokio::test]
    async fn test_output_truncation() {
        let config = ExecutorConfig {
            timeout: Duration::from_secs(10),
            capture_limit: 50,
        };
        let executor = CommandExecutor::with_config(ToolVariant::Modern, config);
        let outcome = executor.execute(&sanitized("seq 1000")).await;

        assert!(outcome.success);
        assert!(outcome.stdout.chars().count() <= 50 + 3);
        assert!(outcome.stdout.ends_with("..."));
    }

    #[test]
    fn test_resolved_argv_substitutes_generic_entry() {
        let legacy = CommandExecutor::new(ToolVariant::Legacy);
        let argv = legacy.resolved_argv(&sanitized("magick input.jpg output.png"));
        assert_eq!(argv[0], "convert");

        let modern = CommandExecutor::new(ToolVariant::Modern);
        let argv = modern.resolved_argv(&sanitized("convert input.jpg output.png"));
        assert_eq!(argv[0], "magick");
    }

    #[test]
    fn test_resolved_argv_leaves_companions_alone() {
        let legacy = CommandExecutor::new(ToolVariant::Legacy);
        let argv = legacy.resolved_argv(&sanitized("identify input.jpg"));
        assert_eq!(argv[0], "identify");

        let argv = legacy.resolved_argv(&sanitized("mogrify -resize 50% photo.jpg"));
        assert_eq!(argv[0], "mogrify");
    }

    #[test]
    fn test_extract_output_simple() {
        assert_eq!(
            extract_output_path(&sanitized("magick input.jpg output.png")),
            Some("output.png".to_string())
        );
    }

    #[test]
    fn test_extract_output_with_options() {
        assert_eq!(
            extract_output_path(&sanitized(
                "magick input.jpg -resize 800x600 -quality 90 output.jpg"
            )),
            Some("output.jpg".to_string())
        );
    }

    #[test]
    fn test_extract_output_none_for_inspection_and_batch() {
        assert_eq!(extract_output_path(&sanitized("identify input.jpg")), None);
        assert_eq!(
            extract_output_path(&sanitized("mogrify -resize 50% photos.jpg")),
            None
        );
    }

    #[test]
    fn test_extract_output_skips_rereferenced_input() {
        // The trailing token repeats an earlier input; nothing new is written.
        assert_eq!(
            extract_output_path(&sanitized("magick a.jpg -compare a.jpg")),
            None
        );
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("hello".to_string(), 10), "hello");
        assert_eq!(truncate_chars("hello".to_string(), 5), "hello");
        assert_eq!(truncate_chars("hello world".to_string(), 5), "hello...");
        assert_eq!(truncate_chars(String::new(), 10), "");
    }

    #[test]
    fn test_truncate_chars_respects_utf8_boundaries() {
        let s = "héllö wörld".to_string();
        let out = truncate_chars(s, 4);
        assert_eq!(out, "héll...");
    }
}
