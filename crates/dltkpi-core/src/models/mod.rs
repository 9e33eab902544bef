//! Data models for DLT KPI correlation

pub mod record;
pub mod report;

pub use record::{FilterPair, LogRecord};
pub use report::{CorrelationWindow, KpiReport, KpiRow, KpiSink, Verdict};
