//! Error kinds shared across the pipeline (spec §7).
//!
//! Each subsystem gets its own leaf enum so call sites can match on the
//! specific failure; `anyhow::Error` is used at the binary boundary where a
//! caller only needs to log-and-continue.

use thiserror::Error;

/// Errors raised while decoding a raw frame/datagram/request into a `RawEvent`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IngestError {
    #[error("malformed input: {0}")]
    MalformedInput(String),
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u16),
    #[error("record references unknown template {template_id} from exporter {exporter}")]
    UnknownTemplate { exporter: String, template_id: u16 },
}

/// Errors raised while normalizing a `RawEvent` into a CIM record.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("record has no parseable endpoints and no protocol")]
    InvalidRecord,
}

/// Errors raised by the windowing engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WindowError {
    #[error("event_time {event_time} is before watermark {watermark} minus lateness {lateness}")]
    LateEvent {
        event_time: i64,
        watermark: i64,
        lateness: i64,
    },
}

/// Errors surfaced by the policy orchestrator (spec §7, §4.5).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PolicyError {
    #[error("validation failed: {0:?}")]
    ValidationFailure(Vec<String>),
    #[error("{0} conflicting rule(s) detected")]
    ConflictDetected(usize),
    #[error("policy {0} not found")]
    NotFound(String),
    #[error("policy {0} has no prior version to roll back to")]
    NoHistory(String),
}

/// Classification of firewall adapter failures (spec §4.6).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdapterError {
    #[error("transient adapter failure: {0}")]
    Transient(String),
    #[error("permanent adapter failure: {0}")]
    Permanent(String),
    #[error("adapter failed after exhausting retry budget: {0}")]
    AdapterFailed(String),
}

/// A fatal, unrecoverable internal invariant violation (spec §7).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("fatal internal error: {0}")]
pub struct FatalError(pub String);
