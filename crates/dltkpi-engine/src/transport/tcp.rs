//! TCP transport for line-oriented DLT brokers
//!
//! The broker streams one decoded message per line (ASCII or JSON). It has no
//! filter protocol of its own, so registrations are tracked locally and every
//! subscription filters on its side.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dltkpi_core::{FilterPair, LogRecord};
use parking_lot::{Mutex, RwLock};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::decode::decode_line;
use super::{DltTransport, RegistrationId, TransportError, FANOUT_CAPACITY};
use crate::config::{LineFormat, TcpConfig};

struct Shared {
    connected: AtomicBool,
    /// Dropped when the connection ends so receivers observe `Closed`
    incoming_tx: RwLock<Option<broadcast::Sender<Arc<LogRecord>>>>,
}

impl Shared {
    fn shutdown(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.incoming_tx.write().take();
    }
}

/// Connection to a TCP line broker
pub struct TcpTransport {
    address: String,
    shared: Arc<Shared>,
    registrations: RwLock<HashMap<RegistrationId, Vec<FilterPair>>>,
    reader_handle: Mutex<Option<JoinHandle<()>>>,
}

impl TcpTransport {
    /// Connect to the broker and start the reader task
    pub async fn connect(config: &TcpConfig) -> Result<Self, TransportError> {
        let timeout = Duration::from_millis(config.connect_timeout_ms);
        let stream = tokio::time::timeout(timeout, TcpStream::connect(&config.address))
            .await
            .map_err(|_| {
                TransportError::Timeout(format!("connecting to {} after {:?}", config.address, timeout))
            })?
            .map_err(|e| {
                TransportError::ConnectionFailed(format!("{}: {}", config.address, e))
            })?;

        info!(address = %config.address, format = ?config.format, "Connected to DLT broker");

        let (incoming_tx, _) = broadcast::channel(FANOUT_CAPACITY);
        let shared = Arc::new(Shared {
            connected: AtomicBool::new(true),
            incoming_tx: RwLock::new(Some(incoming_tx.clone())),
        });

        let handle = tokio::spawn(Self::read_loop(
            stream,
            config.format,
            incoming_tx,
            shared.clone(),
            config.address.clone(),
        ));

        Ok(Self {
            address: config.address.clone(),
            shared,
            registrations: RwLock::new(HashMap::new()),
            reader_handle: Mutex::new(Some(handle)),
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    async fn read_loop(
        stream: TcpStream,
        format: LineFormat,
        tx: broadcast::Sender<Arc<LogRecord>>,
        shared: Arc<Shared>,
        address: String,
    ) {
        let mut lines = BufReader::new(stream).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => match decode_line(&line, format) {
                    Ok(Some(record)) => {
                        let _ = tx.send(Arc::new(record));
                    }
                    Ok(None) => {}
                    Err(e) => debug!(error = %e, "Skipping undecodable line"),
                },
                Ok(None) => {
                    info!(%address, "DLT broker closed the connection");
                    break;
                }
                Err(e) => {
                    warn!(%address, error = %e, "DLT broker read failed");
                    break;
                }
            }
        }
        shared.shutdown();
    }
}

#[async_trait]
impl DltTransport for TcpTransport {
    async fn register(&self, filters: &[FilterPair]) -> Result<RegistrationId, TransportError> {
        if !self.shared.connected.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }
        let id = RegistrationId::new();
        self.registrations.write().insert(id, filters.to_vec());
        debug!(%id, ?filters, address = %self.address, "Filters registered");
        Ok(id)
    }

    fn unregister(&self, id: RegistrationId) {
        self.registrations.write().remove(&id);
    }

    fn subscribe(&self) -> broadcast::Receiver<Arc<LogRecord>> {
        match self.shared.incoming_tx.read().as_ref() {
            Some(tx) => tx.subscribe(),
            None => {
                let (_, rx) = broadcast::channel(1);
                rx
            }
        }
    }

    async fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        if let Some(handle) = self.reader_handle.lock().take() {
            handle.abort();
        }
        self.shared.shutdown();
    }
}
