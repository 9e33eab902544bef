//! Decoded DLT log records and application/context filters

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One decoded trace line
///
/// Records are immutable once built. Transports hand them out as
/// `Arc<LogRecord>` so the fan-out, the subscription buffer and diagnostic
/// dumps share one allocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Source-clock timestamp in seconds (device monotonic clock)
    #[serde(alias = "tmsp")]
    pub timestamp: f64,
    /// Application ID (up to 4 characters, e.g. "ALD")
    #[serde(alias = "apid")]
    pub app_id: String,
    /// Context ID (up to 4 characters, e.g. "LCAT")
    #[serde(alias = "ctid")]
    pub context_id: String,
    /// Decoded payload text
    #[serde(alias = "payload_decoded")]
    pub payload: String,
}

impl LogRecord {
    pub fn new(
        timestamp: f64,
        app_id: impl Into<String>,
        context_id: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            app_id: app_id.into(),
            context_id: context_id.into(),
            payload: payload.into(),
        }
    }

    /// The filter pair this record would be routed by
    pub fn filter_pair(&self) -> FilterPair {
        FilterPair::new(&self.app_id, &self.context_id)
    }
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.4} {} {} {}",
            self.timestamp, self.app_id, self.context_id, self.payload
        )
    }
}

/// Exact-match `(app_id, context_id)` filter registered with a broker
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FilterPair {
    pub app_id: String,
    pub context_id: String,
}

impl FilterPair {
    pub fn new(app_id: impl Into<String>, context_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            context_id: context_id.into(),
        }
    }

    pub fn matches(&self, record: &LogRecord) -> bool {
        self.app_id == record.app_id && self.context_id == record.context_id
    }
}

impl fmt::Display for FilterPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.app_id, self.context_id)
    }
}

impl FromStr for FilterPair {
    type Err = String;

    /// Parse "APID:CTID"
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((app, ctx)) if !app.is_empty() && !ctx.is_empty() => {
                Ok(FilterPair::new(app.trim(), ctx.trim()))
            }
            _ => Err(format!("Invalid filter '{}', expected APID:CTID", s)),
        }
    }
}
