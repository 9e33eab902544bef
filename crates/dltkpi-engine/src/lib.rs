//! dltkpi-engine - Event correlation over live DLT streams
//!
//! This crate measures latency KPIs by correlating two log events of a DLT
//! stream while the triggering action runs elsewhere.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       EventCorrelator                         │
//! │   begin_timestamp() / end_timestamp() with bounded retries    │
//! │                                                               │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────┐  │
//! │  │ PatternMatcher │  │ PatternMatcher │  │  RetryPolicy   │  │
//! │  │    (start)     │  │ (end, bound)   │  │                │  │
//! │  └────────────────┘  └────────────────┘  └────────────────┘  │
//! │                           │                                   │
//! │                 ┌─────────┴──────────┐                        │
//! │                 │ StreamSubscription │                        │
//! │                 │ (buffer + ingest)  │                        │
//! │                 └─────────┬──────────┘                        │
//! │                           │                                   │
//! │                 ┌─────────┴──────────┐                        │
//! │                 │    DltTransport    │                        │
//! │                 │ (TCP/replay/mock)  │                        │
//! │                 └────────────────────┘                        │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Reports are built with [`dltkpi_core::KpiReport`] and written to the
//! sinks in [`export`].

pub mod catalog;
pub mod collector;
pub mod config;
pub mod correlator;
pub mod error;
pub mod export;
pub mod matcher;
pub mod subscription;
pub mod transport;

pub use catalog::{CatalogError, KpiCatalog};
pub use collector::{CollectSpec, CollectValue, CollectionOutcome, MarkerCollector};
pub use config::{Backoff, LineFormat, RetryPolicy, SubscriptionConfig, TransportConfig};
pub use correlator::{CorrelatorBuilder, CorrelatorState, EventCorrelator};
pub use export::{CsvSink, JsonLinesSink, MemorySink, MetricLogSink};
pub use matcher::{Captures, MatchResult, PatternMatcher, PayloadPredicate};
pub use subscription::{CloseHandle, StreamSubscription, SubscriptionError, WaitOptions};
pub use transport::{create_transport, DltTransport, TransportError};

// Re-export for convenience
pub use dltkpi_core::{
    CorrelationError, CorrelationResult, FilterPair, KpiReport, KpiRow, KpiSink, LogRecord,
    Verdict,
};
