//! Transport trait and types

use std::sync::Arc;

use async_trait::async_trait;
use dltkpi_core::{FilterPair, LogRecord};
use tokio::sync::broadcast;
use uuid::Uuid;

use super::TransportError;

/// Capacity of the record fan-out channel of every transport
pub const FANOUT_CAPACITY: usize = 4096;

/// Handle of a filter registration at the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistrationId(Uuid);

impl RegistrationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RegistrationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RegistrationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Transport-agnostic interface to a DLT log broker
///
/// This trait abstracts the source of decoded records (live broker, replayed
/// file, in-memory test double). A transport is typically shared by many
/// subscriptions: it connects once and fans every decoded record out to all
/// receivers; filtering happens per subscription.
#[async_trait]
pub trait DltTransport: Send + Sync {
    /// Register `(app_id, context_id)` filters with the broker
    async fn register(&self, filters: &[FilterPair]) -> Result<RegistrationId, TransportError>;

    /// Release a registration. Unknown ids are ignored.
    ///
    /// Synchronous so it can run from `Drop`.
    fn unregister(&self, id: RegistrationId);

    /// Subscribe to decoded records
    ///
    /// The receiver reports `Closed` once the underlying connection is gone.
    fn subscribe(&self) -> broadcast::Receiver<Arc<LogRecord>>;

    /// Check if the broker connection is up
    async fn is_connected(&self) -> bool;
}
