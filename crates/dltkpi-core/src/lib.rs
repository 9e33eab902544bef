//! dltkpi-core - Core types for DLT event correlation
//!
//! This crate holds the data model shared by the correlation engine and its
//! consumers: decoded log records, filter pairs, KPI reports, and the error
//! taxonomy surfaced to test scenarios. It has no runtime dependencies on a
//! transport or an async executor.

pub mod error;
pub mod models;

pub use error::{CorrelationError, CorrelationResult, EventKind, SinkError};
pub use models::*;
