//! Audit Event Recording
//!
//! Every validate-then-execute attempt is mirrored to an append-only audit
//! stream as structured events keyed by a correlation identifier. A rejected
//! candidate still produces a validation event; only a passing validation is
//! ever followed by an execution event, preserving the engine's core
//! invariant in the audit trail itself.

use crate::engine::{ErrorKind, ExecutionOutcome, ValidationChecks, ValidationVerdict};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use uuid::Uuid;

/// Opaque token joining a validation event to its optional execution event.
/// Generated once per end-to-end request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Record of one validation decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationEvent {
    pub timestamp: DateTime<Utc>,
    pub correlation_id: CorrelationId,
    pub raw_command: String,
    /// Present only when the verdict passed
    pub sanitized_command: Option<String>,
    pub checks: ValidationChecks,
    pub passed: bool,
    pub failure_reason: Option<String>,
}

impl ValidationEvent {
    pub fn from_verdict(
        correlation_id: CorrelationId,
        raw_command: &str,
        verdict: &ValidationVerdict,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            correlation_id,
            raw_command: raw_command.to_string(),
            sanitized_command: verdict.sanitized().map(|c| c.display_line()),
            checks: verdict.checks,
            passed: verdict.passed,
            failure_reason: verdict.failure_reason.clone(),
        }
    }
}

/// Record of one execution attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionEvent {
    pub timestamp: DateTime<Utc>,
    pub correlation_id: CorrelationId,
    /// The command actually run, after binary substitution
    pub command: String,
    pub success: bool,
    pub exit_status: Option<i32>,
    pub duration_ms: u64,
    pub stdout: String,
    pub stderr: String,
    pub output_path: Option<String>,
    pub error_kind: Option<ErrorKind>,
}

impl ExecutionEvent {
    pub fn from_outcome(
        correlation_id: CorrelationId,
        command: String,
        outcome: &ExecutionOutcome,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            correlation_id,
            command,
            success: outcome.success,
            exit_status: outcome.exit_status,
            duration_ms: outcome.duration_ms,
            stdout: outcome.stdout.clone(),
            stderr: outcome.stderr.clone(),
            output_path: outcome.output_path.clone(),
            error_kind: outcome.error_kind,
        }
    }
}

/// One line of the audit stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    CommandValidation(ValidationEvent),
    CommandExecution(ExecutionEvent),
}

impl AuditEvent {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            AuditEvent::CommandValidation(e) => e.timestamp,
            AuditEvent::CommandExecution(e) => e.timestamp,
        }
    }

    pub fn correlation_id(&self) -> CorrelationId {
        match self {
            AuditEvent::CommandValidation(e) => e.correlation_id,
            AuditEvent::CommandExecution(e) => e.correlation_id,
        }
    }

    /// Pass/fail of the event: verdict outcome for validations, process
    /// outcome for executions.
    pub fn succeeded(&self) -> bool {
        match self {
            AuditEvent::CommandValidation(e) => e.passed,
            AuditEvent::CommandExecution(e) => e.success,
        }
    }
}

/// Sink for audit events.
///
/// Implementations must tolerate concurrent callers; each record is appended
/// as one atomic unit so concurrent appends never interleave partial records.
pub trait AuditRecorder: Send + Sync {
    fn record_validation(&self, event: ValidationEvent) -> Result<()>;
    fn record_execution(&self, event: ExecutionEvent) -> Result<()>;
}

/// Append-only JSON Lines recorder.
pub struct JsonlAuditRecorder {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlAuditRecorder {
    /// Open (creating parent directories as needed) the audit stream for
    /// appending.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create audit log directory {parent:?}"))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open audit log {path:?}"))?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, event: &AuditEvent) -> Result<()> {
        let mut line = serde_json::to_string(event).context("failed to encode audit event")?;
        line.push('\n');

        // One write_all of the full line under the lock keeps concurrent
        // appends from interleaving.
        let mut file = self
            .file
            .lock()
            .map_err(|_| anyhow::anyhow!("audit log lock poisoned"))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("failed to append to audit log {:?}", self.path))?;
        file.flush()?;
        Ok(())
    }
}

impl AuditRecorder for JsonlAuditRecorder {
    fn record_validation(&self, event: ValidationEvent) -> Result<()> {
        self.append(&AuditEvent::CommandValidation(event))
    }

    fn record_execution(&self, event: ExecutionEvent) -> Result<()> {
        self.append(&AuditEvent::CommandExecution(event))
    }
}

/// Recorder that drops everything. Used when audit logging is disabled and
/// in tests that do not assert on the stream.
pub struct NullAuditRecorder;

impl AuditRecorder for NullAuditRecorder {
    fn record_validation(&self, _event: ValidationEvent) -> Result<()> {
        Ok(())
    }

    fn record_execution(&self, _event: ExecutionEvent) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{CommandValidator, RuleSet};

    fn sample_validation_event(id: CorrelationId, candidate: &str) -> ValidationEvent {
        let verdict = CommandValidator::new(RuleSet::imagemagick()).validate(candidate);
        ValidationEvent::from_verdict(id, candidate, &verdict)
    }

    #[test]
    fn test_append_and_read_back_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("executions.jsonl");
        let recorder = JsonlAuditRecorder::open(&path).unwrap();

        let id = CorrelationId::new();
        recorder
            .record_validation(sample_validation_event(id, "magick in.jpg out.png"))
            .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 1);

        let event: AuditEvent = serde_json::from_str(content.lines().next().unwrap()).unwrap();
        assert_eq!(event.correlation_id(), id);
        assert!(event.succeeded());
        match event {
            AuditEvent::CommandValidation(v) => {
                assert_eq!(v.raw_command, "magick in.jpg out.png");
                assert_eq!(v.sanitized_command.as_deref(), Some("magick in.jpg out.png"));
            }
            _ => panic!("expected validation event"),
        }
    }

    #[test]
    fn test_event_tag_is_stable() {
        let id = CorrelationId::new();
        let event = AuditEvent::CommandValidation(sample_validation_event(id, "magick a.jpg b.png"));
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event\":\"command_validation\""));
    }

    #[test]
    fn test_rejected_validation_event_is_fully_populated() {
        let id = CorrelationId::new();
        let event = sample_validation_event(id, "rm -rf /");

        assert!(!event.passed);
        assert_eq!(event.failure_reason.as_deref(), Some("allowed_program"));
        assert!(event.sanitized_command.is_none());
        // The checks struct always carries the full key set.
        let json = serde_json::to_value(&event.checks).unwrap();
        assert_eq!(json.as_object().unwrap().len(), 5);
    }

    #[test]
    fn test_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/logs/executions.jsonl");
        let recorder = JsonlAuditRecorder::open(&path).unwrap();

        recorder
            .record_validation(sample_validation_event(CorrelationId::new(), "magick a.jpg b.png"))
            .unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_concurrent_appends_never_interleave() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("executions.jsonl");
        let recorder = std::sync::Arc::new(JsonlAuditRecorder::open(&path).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let recorder = recorder.clone();
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        recorder
                            .record_validation(sample_validation_event(
                                CorrelationId::new(),
                                "magick input.jpg -resize 800x600 output.png",
                            ))
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 200);
        for line in content.lines() {
            serde_json::from_str::<AuditEvent>(line).expect("every line is a complete record");
        }
    }
}
