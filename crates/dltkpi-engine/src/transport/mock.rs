//! Mock transport for testing

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dltkpi_core::{FilterPair, LogRecord};
use parking_lot::RwLock;
use tokio::sync::broadcast;

use super::{DltTransport, RegistrationId, TransportError, FANOUT_CAPACITY};
use crate::config::MockConfig;

/// In-memory broker: tests inject records, subscriptions receive them
pub struct MockTransport {
    config: MockConfig,
    connected: AtomicBool,
    /// `None` once disconnected, which closes every receiver
    incoming_tx: RwLock<Option<broadcast::Sender<Arc<LogRecord>>>>,
    registrations: RwLock<HashMap<RegistrationId, Vec<FilterPair>>>,
}

impl MockTransport {
    pub fn new(config: &MockConfig) -> Self {
        let (incoming_tx, _) = broadcast::channel(FANOUT_CAPACITY);
        Self {
            config: config.clone(),
            connected: AtomicBool::new(true),
            incoming_tx: RwLock::new(Some(incoming_tx)),
            registrations: RwLock::new(HashMap::new()),
        }
    }

    /// Inject a record (simulates the target emitting a log line)
    pub fn inject(&self, record: LogRecord) {
        if let Some(tx) = self.incoming_tx.read().as_ref() {
            let _ = tx.send(Arc::new(record));
        }
    }

    /// Inject a batch of records in order
    pub fn inject_all(&self, records: impl IntoIterator<Item = LogRecord>) {
        for record in records {
            self.inject(record);
        }
    }

    /// Inject a record after `delay` from a background task
    pub fn inject_after(&self, delay: Duration, record: LogRecord) {
        let Some(tx) = self.incoming_tx.read().clone() else {
            return;
        };
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(Arc::new(record));
        });
    }

    /// Drop the connection: receivers observe a closed stream and
    /// further registrations fail
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.incoming_tx.write().take();
    }

    /// Filter sets currently registered
    pub fn active_registrations(&self) -> Vec<Vec<FilterPair>> {
        self.registrations.read().values().cloned().collect()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new(&MockConfig::default())
    }
}

#[async_trait]
impl DltTransport for MockTransport {
    async fn register(&self, filters: &[FilterPair]) -> Result<RegistrationId, TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }

        // Simulate broker round-trip
        if self.config.latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.latency_ms)).await;
        }

        let id = RegistrationId::new();
        self.registrations.write().insert(id, filters.to_vec());
        tracing::debug!(%id, ?filters, "Mock transport: filters registered");
        Ok(id)
    }

    fn unregister(&self, id: RegistrationId) {
        if self.registrations.write().remove(&id).is_some() {
            tracing::debug!(%id, "Mock transport: filters released");
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<Arc<LogRecord>> {
        match self.incoming_tx.read().as_ref() {
            Some(tx) => tx.subscribe(),
            None => {
                // Sender dropped right away: the receiver reports Closed
                let (_, rx) = broadcast::channel(1);
                rx
            }
        }
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
