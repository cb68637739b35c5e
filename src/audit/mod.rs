//! Audit Trail
//!
//! Append-only audit stream for the validation and execution engine, plus
//! the read-side used by the CLI log views.
//!
//! Two event shapes, keyed by a [`CorrelationId`], are produced per attempt:
//! a validation event for every candidate (rejected ones included) and an
//! execution event only for candidates whose verdict passed. Each record is
//! appended as a single atomic write so concurrent sessions never interleave
//! partial records.

mod reader;
mod recorder;

pub use reader::{AuditLogReader, AuditStats, EventFilter, EventKind, ExecutionStats, ValidationStats};
pub use recorder::{
    AuditEvent, AuditRecorder, CorrelationId, ExecutionEvent, JsonlAuditRecorder,
    NullAuditRecorder, ValidationEvent,
};
