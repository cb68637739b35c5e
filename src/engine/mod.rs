//! Command Validation & Execution Engine
//!
//! The guarded path between an untrusted text generator and the local
//! ImageMagick installation. The engine enforces strict security measures:
//!
//! - **Command Whitelisting**: only known ImageMagick programs are allowed
//! - **List Invocation**: commands are spawned as argument vectors, never
//!   through a shell
//! - **Timeout Enforcement**: every execution has a wall-clock bound and a
//!   forced kill on expiry
//! - **Full Audit**: every attempt produces a validation event, and every
//!   passing validation produces exactly one execution event
//!
//! The module is organized into:
//! - `resolver.rs`: one-time detection of the installed ImageMagick variant
//! - `validator.rs`: pure command validation and output-path sanitization
//! - `executor.rs`: subprocess execution with timeout handling
//!
//! The load-bearing invariant: an execution outcome can never exist for a
//! candidate whose verdict failed. [`CommandExecutor::execute`] accepts only
//! [`SanitizedCommand`], and only the validator can construct one, so the
//! invariant holds by construction rather than by runtime re-checking.

mod executor;
mod resolver;
mod validator;

pub use executor::{CommandExecutor, ErrorKind, ExecutionOutcome, ExecutorConfig};
pub use resolver::{resolve, ResolveError, ToolVariant};
pub use validator::{
    CommandValidator, RuleSet, SanitizedCommand, ValidationChecks, ValidationVerdict,
};

use crate::audit::{AuditRecorder, CorrelationId, ExecutionEvent, ValidationEvent};
use crate::metrics;
use std::sync::Arc;
use tracing::warn;

/// Result of one end-to-end attempt: the verdict, and the execution outcome
/// when the verdict passed.
#[derive(Debug)]
pub struct AttemptOutcome {
    pub correlation_id: CorrelationId,
    pub verdict: ValidationVerdict,
    pub execution: Option<ExecutionOutcome>,
}

/// The engine: validator and executor wired to an audit recorder.
///
/// Holds no mutable state; the resolved variant is a startup-time constant,
/// so one engine is safely shared across concurrent sessions.
pub struct Engine {
    validator: CommandValidator,
    executor: CommandExecutor,
    recorder: Arc<dyn AuditRecorder>,
}

impl Engine {
    pub fn new(
        variant: ToolVariant,
        rules: RuleSet,
        config: ExecutorConfig,
        recorder: Arc<dyn AuditRecorder>,
    ) -> Self {
        Self {
            validator: CommandValidator::new(rules),
            executor: CommandExecutor::with_config(variant, config),
            recorder,
        }
    }

    pub fn variant(&self) -> ToolVariant {
        self.executor.variant()
    }

    pub fn validator(&self) -> &CommandValidator {
        &self.validator
    }

    /// Validate a candidate, recording the validation event.
    pub fn validate(&self, correlation_id: CorrelationId, candidate: &str) -> ValidationVerdict {
        let verdict = self.validator.validate(candidate);

        let result = if verdict.passed { "passed" } else { "rejected" };
        metrics::COMMAND_VALIDATIONS_TOTAL
            .with_label_values(&[result])
            .inc();
        if let Some(check) = verdict.failure_reason.as_deref() {
            metrics::VALIDATION_REJECTIONS_TOTAL
                .with_label_values(&[check])
                .inc();
        }

        let event = ValidationEvent::from_verdict(correlation_id, candidate, &verdict);
        if let Err(e) = self.recorder.record_validation(event) {
            warn!(%correlation_id, error = %e, "failed to record validation event");
        }
        verdict
    }

    /// Execute a validated command, recording the execution event.
    pub async fn run(
        &self,
        correlation_id: CorrelationId,
        command: &SanitizedCommand,
    ) -> ExecutionOutcome {
        let resolved_line = self.executor.resolved_argv(command).join(" ");
        let outcome = self.executor.execute(command).await;

        metrics::COMMAND_EXECUTIONS_TOTAL
            .with_label_values(&[outcome.status_label()])
            .inc();
        metrics::EXECUTION_DURATION_SECONDS.observe(outcome.duration_ms as f64 / 1000.0);

        let event = ExecutionEvent::from_outcome(correlation_id, resolved_line, &outcome);
        if let Err(e) = self.recorder.record_execution(event) {
            warn!(%correlation_id, error = %e, "failed to record execution event");
        }
        outcome
    }

    /// One-shot attempt: validate, then execute iff the verdict passed.
    pub async fn attempt(&self, candidate: &str) -> AttemptOutcome {
        let correlation_id = CorrelationId::new();
        let verdict = self.validate(correlation_id, candidate);

        let execution = match verdict.sanitized() {
            Some(command) => Some(self.run(correlation_id, command).await),
            None => None,
        };

        AttemptOutcome {
            correlation_id,
            verdict,
            execution,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditEvent, AuditLogReader, EventFilter, JsonlAuditRecorder, NullAuditRecorder};

    fn test_engine(recorder: Arc<dyn AuditRecorder>) -> Engine {
        // "echo" in the allow-set lets the execution path run without
        // ImageMagick installed.
        let rules = RuleSet::new(
            ["magick", "convert", "identify", "mogrify", "composite", "echo"],
            ["-script", "-write"],
            vec![';', '|', '&', '$', '`', '(', ')'],
        );
        Engine::new(
            ToolVariant::Modern,
            rules,
            ExecutorConfig::default(),
            recorder,
        )
    }

    #[tokio::test]
    async fn test_rejected_attempt_never_executes() {
        let engine = test_engine(Arc::new(NullAuditRecorder));
        let outcome = engine.attempt("convert a.jpg -resize 50% b.png; rm -rf /").await;

        assert!(!outcome.verdict.passed);
        assert!(outcome.execution.is_none());
    }

    #[tokio::test]
    async fn test_passing_attempt_executes_and_pairs_events() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("executions.jsonl");
        let recorder = Arc::new(JsonlAuditRecorder::open(&path).unwrap());
        let engine = test_engine(recorder);

        let outcome = engine.attempt("echo painted.png").await;
        assert!(outcome.verdict.passed);
        let execution = outcome.execution.expect("passing verdict executes");
        assert!(execution.success);

        let events = AuditLogReader::new(&path)
            .events(&EventFilter {
                correlation_id: Some(outcome.correlation_id),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], AuditEvent::CommandValidation(_)));
        assert!(matches!(events[0], AuditEvent::CommandExecution(_)));
    }

    #[tokio::test]
    async fn test_rejected_attempt_emits_only_validation_event() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("executions.jsonl");
        let recorder = Arc::new(JsonlAuditRecorder::open(&path).unwrap());
        let engine = test_engine(recorder);

        let outcome = engine.attempt("magick -script evil.msl").await;
        assert!(!outcome.verdict.passed);

        let events = AuditLogReader::new(&path)
            .events(&EventFilter::default())
            .unwrap();
        assert_eq!(events.len(), 1);
        match &events[0] {
            AuditEvent::CommandValidation(v) => {
                assert_eq!(v.failure_reason.as_deref(), Some("no_dangerous_flags"));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
