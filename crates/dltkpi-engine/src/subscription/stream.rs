//! Filtered, buffered view over a live record stream

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use dltkpi_core::{FilterPair, LogRecord};
use parking_lot::Mutex;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::SubscriptionConfig;
use crate::transport::{DltTransport, RegistrationId};

/// Options of a single `wait_for` call
#[derive(Debug, Clone)]
pub struct WaitOptions {
    /// Number of matching records to wait for; `0` collects until the deadline
    pub min_count: usize,
    pub timeout: Duration,
    /// Remove returned records from the buffer
    pub drop_consumed: bool,
    /// Fail with `Timeout` when the deadline passes with too few matches,
    /// otherwise return whatever matched
    pub raise_on_timeout: bool,
}

impl WaitOptions {
    pub fn new(timeout: Duration) -> Self {
        Self {
            min_count: 1,
            timeout,
            drop_consumed: true,
            raise_on_timeout: true,
        }
    }

    /// Collect every match until the deadline
    pub fn collect(timeout: Duration) -> Self {
        Self {
            min_count: 0,
            ..Self::new(timeout)
        }
    }

    pub fn min_count(mut self, count: usize) -> Self {
        self.min_count = count;
        self
    }

    pub fn keep_consumed(mut self) -> Self {
        self.drop_consumed = false;
        self
    }

    pub fn no_raise(mut self) -> Self {
        self.raise_on_timeout = false;
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SubscriptionError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Timed out with {matched} of {required} matching record(s)")]
    Timeout { matched: usize, required: usize },

    #[error("Subscription closed")]
    Cancelled,
}

#[derive(Default)]
struct BufferState {
    /// Matching records not consumed yet, in arrival order
    buffer: VecDeque<Arc<LogRecord>>,
    buffer_evicted: u64,
    /// Every ingested record, for diagnostics
    history: VecDeque<Arc<LogRecord>>,
    history_dropped: u64,
    closed: bool,
    disconnected: bool,
}

impl BufferState {
    fn ingest(&mut self, record: Arc<LogRecord>, config: &SubscriptionConfig) {
        let history_capacity = config.history_capacity;
        if history_capacity > 0 {
            if self.history.len() == history_capacity {
                self.history.pop_front();
                self.history_dropped += 1;
                if self.history_dropped == 1 {
                    warn!(history_capacity, "Diagnostic history full, dropping oldest records");
                }
            }
            self.history.push_back(record.clone());
        }

        let buffer_capacity = config.buffer_capacity.max(1);
        while self.buffer.len() >= buffer_capacity {
            self.buffer.pop_front();
            self.buffer_evicted += 1;
            if self.buffer_evicted == 1 {
                warn!(buffer_capacity, "Subscription buffer full, evicting oldest records");
            }
        }
        self.buffer.push_back(record);
    }

    /// Indices of buffered records satisfying `predicate`, ascending
    fn hits<P>(&self, predicate: &P) -> Vec<usize>
    where
        P: Fn(&LogRecord) -> bool,
    {
        self.buffer
            .iter()
            .enumerate()
            .filter_map(|(i, record)| predicate(record).then_some(i))
            .collect()
    }

    fn extract(&mut self, hits: &[usize], drop_consumed: bool) -> Vec<Arc<LogRecord>> {
        let records: Vec<_> = hits.iter().map(|&i| self.buffer[i].clone()).collect();
        if drop_consumed && !hits.is_empty() {
            let mut index = 0;
            self.buffer.retain(|_| {
                let keep = hits.binary_search(&index).is_err();
                index += 1;
                keep
            });
        }
        records
    }

    /// Outcome of a wait whose deadline has passed
    fn on_deadline<P>(
        &mut self,
        predicate: &P,
        options: &WaitOptions,
    ) -> Result<Vec<Arc<LogRecord>>, SubscriptionError>
    where
        P: Fn(&LogRecord) -> bool,
    {
        if self.closed {
            return Err(SubscriptionError::Cancelled);
        }
        let hits = self.hits(predicate);
        // a record ingested right at the deadline still satisfies the wait
        if options.min_count == 0 || hits.len() >= options.min_count || !options.raise_on_timeout {
            debug!(matched = hits.len(), "Wait deadline reached, returning matches");
            return Ok(self.extract(&hits, options.drop_consumed));
        }
        Err(SubscriptionError::Timeout {
            matched: hits.len(),
            required: options.min_count,
        })
    }
}

struct Shared {
    filters: Vec<FilterPair>,
    config: SubscriptionConfig,
    transport: Arc<dyn DltTransport>,
    state: Mutex<BufferState>,
    notify: Notify,
    registration: Mutex<Option<RegistrationId>>,
    ingest_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    fn close(&self) {
        {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
        }

        if let Some(handle) = self.ingest_handle.lock().take() {
            handle.abort();
        }
        if let Some(id) = self.registration.lock().take() {
            self.transport.unregister(id);
        }
        self.notify.notify_waiters();

        info!(filters = ?self.filters, "Stream subscription closed");
    }
}

/// A scoped, filtered subscription to a log stream
///
/// While open, a background task appends every record matching one of the
/// filters to an internal buffer. `wait_for` suspends until enough buffered
/// records satisfy a predicate. The subscription is closed on `close()`, on
/// `Drop`, or through a [`CloseHandle`]; the filter registration is released
/// on all of these paths.
pub struct StreamSubscription {
    shared: Arc<Shared>,
}

impl StreamSubscription {
    /// Register `filters` with the transport and start ingestion
    pub async fn open(
        transport: Arc<dyn DltTransport>,
        filters: Vec<FilterPair>,
        config: SubscriptionConfig,
    ) -> Result<Self, SubscriptionError> {
        if !transport.is_connected().await {
            return Err(SubscriptionError::Connection(
                "Transport is not connected".to_string(),
            ));
        }

        let mut filters = filters;
        filters.sort();
        filters.dedup();

        // Subscribe before registering so nothing emitted in between is lost
        let rx = transport.subscribe();
        let registration = transport
            .register(&filters)
            .await
            .map_err(|e| SubscriptionError::Connection(e.to_string()))?;

        let shared = Arc::new(Shared {
            filters,
            config,
            transport,
            state: Mutex::new(BufferState::default()),
            notify: Notify::new(),
            registration: Mutex::new(Some(registration)),
            ingest_handle: Mutex::new(None),
        });

        let handle = tokio::spawn(Self::ingest(shared.clone(), rx));
        *shared.ingest_handle.lock() = Some(handle);

        info!(filters = ?shared.filters, %registration, "Stream subscription opened");

        Ok(Self { shared })
    }

    async fn ingest(shared: Arc<Shared>, mut rx: broadcast::Receiver<Arc<LogRecord>>) {
        loop {
            match rx.recv().await {
                Ok(record) => {
                    if !shared.filters.iter().any(|f| f.matches(&record)) {
                        continue;
                    }
                    {
                        let mut state = shared.state.lock();
                        if state.closed {
                            break;
                        }
                        state.ingest(record, &shared.config);
                    }
                    shared.notify.notify_waiters();
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "Subscription ingestion lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!("Record stream closed by transport");
                    shared.state.lock().disconnected = true;
                    shared.notify.notify_waiters();
                    break;
                }
            }
        }
    }

    /// Wait until `options.min_count` buffered records satisfy `predicate`
    ///
    /// Returns all buffered matches in arrival order. Fails with `Timeout`
    /// when the deadline passes first, `Cancelled` when the subscription is
    /// closed meanwhile, and `Connection` when the transport goes away.
    pub async fn wait_for<P>(
        &self,
        predicate: P,
        options: &WaitOptions,
    ) -> Result<Vec<Arc<LogRecord>>, SubscriptionError>
    where
        P: Fn(&LogRecord) -> bool,
    {
        let deadline = Instant::now() + options.timeout;

        loop {
            // Register interest before inspecting the buffer so a record
            // ingested in between still wakes us
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.shared.state.lock();
                if state.closed {
                    return Err(SubscriptionError::Cancelled);
                }
                let hits = state.hits(&predicate);
                if options.min_count > 0 && hits.len() >= options.min_count {
                    return Ok(state.extract(&hits, options.drop_consumed));
                }
                if state.disconnected {
                    return Err(SubscriptionError::Connection(
                        "Record stream closed by transport".to_string(),
                    ));
                }
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(deadline) => {
                    return self.shared.state.lock().on_deadline(&predicate, options);
                }
            }
        }
    }

    /// Resolves once the subscription has been closed
    pub async fn closed(&self) {
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.shared.state.lock().closed {
                return;
            }
            notified.await;
        }
    }

    /// Stop ingestion and release the filter registration. Idempotent.
    pub fn close(&self) {
        self.shared.close();
    }

    /// Handle that can close this subscription from another task
    pub fn close_handle(&self) -> CloseHandle {
        CloseHandle {
            shared: self.shared.clone(),
        }
    }

    pub fn is_open(&self) -> bool {
        !self.shared.state.lock().closed
    }

    pub fn filters(&self) -> &[FilterPair] {
        &self.shared.filters
    }

    /// Records ingested so far (bounded by the history capacity)
    pub fn observed(&self) -> Vec<Arc<LogRecord>> {
        self.shared.state.lock().history.iter().cloned().collect()
    }

    /// Number of buffered, not yet consumed records
    pub fn buffered_len(&self) -> usize {
        self.shared.state.lock().buffer.len()
    }
}

impl Drop for StreamSubscription {
    fn drop(&mut self) {
        self.shared.close();
    }
}

/// Cloneable handle closing a subscription; in-flight waits end with
/// `Cancelled`
#[derive(Clone)]
pub struct CloseHandle {
    shared: Arc<Shared>,
}

impl CloseHandle {
    pub fn close(&self) {
        self.shared.close();
    }
}
