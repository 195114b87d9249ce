//! Audit stream: append-only events with metadata sanitization and a
//! normalized cross-service projection.

pub mod recorder;
pub mod sanitize;

pub use recorder::{AuditEventDraft, AuditRecorder};
pub use sanitize::{metadata_value, RedactionPolicy, REDACTED};
