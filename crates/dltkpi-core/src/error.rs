//! Error taxonomy for event correlation
//!
//! Two kinds are user-visible outcomes of a measurement (`Connection` and
//! `EventNotObserved`). `Sequence` and `Configuration` flag misuse by the
//! calling test code and are raised before any stream read. `Cancelled` is
//! reported when the owning scope is torn down while a wait is in flight.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::models::LogRecord;

/// Result type for correlation operations
pub type CorrelationResult<T> = Result<T, CorrelationError>;

/// Which side of a correlation an error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Start,
    End,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Start => f.write_str("start"),
            EventKind::End => f.write_str("end"),
        }
    }
}

/// Errors surfaced to the calling test scenario
#[derive(Debug, Error)]
pub enum CorrelationError {
    /// Broker/transport unreachable or the stream was lost
    #[error("Connection error: {0}")]
    Connection(String),

    /// All attempts elapsed without a matching record
    #[error("{event} event not observed after {attempts} attempt(s): {pattern} ({} record(s) observed)", .observed.len())]
    EventNotObserved {
        event: EventKind,
        /// Human-readable description of the missing pattern
        pattern: String,
        attempts: u32,
        /// Every record ingested by the subscription, for diagnosis
        observed: Vec<Arc<LogRecord>>,
    },

    /// API misuse: wrong call order or reporting from an unfinished correlator
    #[error("Sequence error: {0}")]
    Sequence(String),

    /// A propagated field was not captured, or a pattern is malformed
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The subscription was closed while a wait was in flight
    #[error("Correlation cancelled")]
    Cancelled,

    /// The end event carries an earlier timestamp than the start event
    #[error("Clock anomaly: end timestamp {end} precedes begin timestamp {begin}")]
    ClockAnomaly { begin: f64, end: f64 },
}

impl CorrelationError {
    pub fn sequence(msg: impl Into<String>) -> Self {
        Self::Sequence(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// True for errors caused by the calling code rather than by the target
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            CorrelationError::Sequence(_) | CorrelationError::Configuration(_)
        )
    }
}

/// Errors raised by KPI export sinks
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Format error: {0}")]
    Format(String),
}
