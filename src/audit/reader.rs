//! Audit Log Reading
//!
//! Read-side of the JSONL audit stream: filtered queries for the CLI log
//! views and aggregate statistics. Malformed lines (a crashed writer, manual
//! edits) are skipped rather than failing the whole read.

use super::recorder::{AuditEvent, CorrelationId};
use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Which side of the attempt an event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Validation,
    Execution,
}

/// Query over the audit stream. The default filter matches every event with
/// no limit.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub kind: Option<EventKind>,
    pub correlation_id: Option<CorrelationId>,
    pub success: Option<bool>,
    pub limit: Option<usize>,
}

impl EventFilter {
    fn matches(&self, event: &AuditEvent) -> bool {
        if let Some(kind) = self.kind {
            let event_kind = match event {
                AuditEvent::CommandValidation(_) => EventKind::Validation,
                AuditEvent::CommandExecution(_) => EventKind::Execution,
            };
            if event_kind != kind {
                return false;
            }
        }
        if let Some(id) = self.correlation_id {
            if event.correlation_id() != id {
                return false;
            }
        }
        if let Some(success) = self.success {
            if event.succeeded() != success {
                return false;
            }
        }
        true
    }
}

/// Aggregate statistics over the audit stream.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AuditStats {
    pub validations: ValidationStats,
    pub executions: ExecutionStats,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationStats {
    pub total: u64,
    pub passed: u64,
    pub rejected: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionStats {
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub avg_duration_ms: f64,
}

/// Reader over one audit log file.
pub struct AuditLogReader {
    path: PathBuf,
}

impl AuditLogReader {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load events matching the filter, most recent first. A missing log
    /// file reads as an empty stream.
    pub fn events(&self, filter: &EventFilter) -> Result<Vec<AuditEvent>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read audit log {:?}", self.path))?;

        let mut events: Vec<AuditEvent> = content
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .filter(|event| filter.matches(event))
            .collect();

        events.reverse();
        if let Some(limit) = filter.limit {
            events.truncate(limit);
        }
        Ok(events)
    }

    /// Compute aggregate statistics over the whole stream.
    pub fn stats(&self) -> Result<AuditStats> {
        let events = self.events(&EventFilter::default())?;
        let mut stats = AuditStats::default();
        let mut total_duration_ms: u64 = 0;

        for event in &events {
            match event {
                AuditEvent::CommandValidation(v) => {
                    stats.validations.total += 1;
                    if v.passed {
                        stats.validations.passed += 1;
                    } else {
                        stats.validations.rejected += 1;
                    }
                }
                AuditEvent::CommandExecution(e) => {
                    stats.executions.total += 1;
                    if e.success {
                        stats.executions.succeeded += 1;
                    } else {
                        stats.executions.failed += 1;
                    }
                    total_duration_ms += e.duration_ms;
                }
            }
        }

        if stats.executions.total > 0 {
            stats.executions.avg_duration_ms =
                total_duration_ms as f64 / stats.executions.total as f64;
        }
        Ok(stats)
    }
}
