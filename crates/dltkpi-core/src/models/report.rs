//! KPI reports and the export boundary

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CorrelationError, CorrelationResult, SinkError};

/// Anything that can hand out a resolved `(begin, end)` timestamp pair
///
/// Implemented by the event correlator once both events were observed.
pub trait CorrelationWindow {
    /// Returns `(begin, end)` or a `Sequence` error if the window is not
    /// complete yet.
    fn window(&self) -> CorrelationResult<(f64, f64)>;
}

/// Destination for KPI rows (CSV file, metrics endpoint, log stream)
pub trait KpiSink {
    fn write_row(&mut self, row: &KpiRow) -> Result<(), SinkError>;
}

/// Outcome of comparing a duration with its threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Passed,
    Failed,
    /// No threshold configured
    Informational,
}

/// A measured latency KPI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiReport {
    pub kpi_name: String,
    /// Seconds between the two events, never negative
    pub measured_duration: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    pub passed: bool,
}

impl KpiReport {
    /// Build a report from a completed correlator
    pub fn from_correlator<C: CorrelationWindow + ?Sized>(
        correlator: &C,
        kpi_name: impl Into<String>,
        threshold: Option<f64>,
    ) -> CorrelationResult<Self> {
        let (begin, end) = correlator.window()?;
        Self::from_window(kpi_name, begin, end, threshold)
    }

    /// Build a report from two timestamps of the same clock domain
    pub fn from_window(
        kpi_name: impl Into<String>,
        begin: f64,
        end: f64,
        threshold: Option<f64>,
    ) -> CorrelationResult<Self> {
        if end < begin {
            return Err(CorrelationError::ClockAnomaly { begin, end });
        }
        Ok(Self::from_duration(kpi_name, end - begin, threshold))
    }

    /// Build a report from an already measured, non-negative value
    pub fn from_duration(kpi_name: impl Into<String>, duration: f64, threshold: Option<f64>) -> Self {
        let passed = threshold.map_or(true, |limit| duration <= limit);
        Self {
            kpi_name: kpi_name.into(),
            measured_duration: duration,
            threshold,
            passed,
        }
    }

    pub fn verdict(&self) -> Verdict {
        match (self.threshold, self.passed) {
            (None, _) => Verdict::Informational,
            (Some(_), true) => Verdict::Passed,
            (Some(_), false) => Verdict::Failed,
        }
    }

    /// Flat record handed to export sinks
    pub fn row(&self) -> KpiRow {
        KpiRow {
            kpi_name: self.kpi_name.clone(),
            duration_seconds: self.measured_duration,
            threshold: self.threshold,
            diff: self.threshold.map(|limit| self.measured_duration - limit),
            passed: self.passed,
            recorded_at: Utc::now(),
        }
    }

    /// Write this report as a single row to `sink`
    pub fn export(&self, sink: &mut dyn KpiSink) -> Result<(), SinkError> {
        sink.write_row(&self.row())
    }
}

/// Single exported KPI row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiRow {
    pub kpi_name: String,
    pub duration_seconds: f64,
    pub threshold: Option<f64>,
    /// `duration_seconds - threshold`, positive when over budget
    pub diff: Option<f64>,
    pub passed: bool,
    pub recorded_at: DateTime<Utc>,
}
