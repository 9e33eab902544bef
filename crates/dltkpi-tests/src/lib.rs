//! Integration tests for the DLT KPI engine
//!
//! This crate contains end-to-end tests that exercise the full stack:
//! - TCP line broker transport
//! - Replay of recorded traces
//! - Catalog-driven correlation and collection
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p dltkpi-tests
//! ```
//!
//! # Test Structure
//!
//! - `tcp_broker_test.rs` - Correlation over a local TCP broker
//! - `catalog_measurement_test.rs` - Catalog KPIs against replayed traces
//!
//! The library part only holds the [`LineBroker`] test double.

use std::net::SocketAddr;
use std::sync::Arc;

use dltkpi_core::LogRecord;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::debug;

/// Local TCP server speaking the line protocol of a DLT broker
///
/// Every connected client receives every line sent after it connected.
pub struct LineBroker {
    address: SocketAddr,
    lines: broadcast::Sender<Arc<str>>,
    clients: watch::Receiver<usize>,
    accept_handle: JoinHandle<()>,
}

impl LineBroker {
    /// Bind to an ephemeral localhost port and start accepting clients
    pub async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let address = listener.local_addr()?;
        let (lines, _) = broadcast::channel::<Arc<str>>(1024);
        let (clients_tx, clients) = watch::channel(0usize);

        let tx = lines.clone();
        let accept_handle = tokio::spawn(async move {
            while let Ok((mut stream, peer)) = listener.accept().await {
                let mut rx = tx.subscribe();
                clients_tx.send_modify(|n| *n += 1);
                debug!(%peer, "Broker client connected");

                tokio::spawn(async move {
                    while let Ok(line) = rx.recv().await {
                        if stream.write_all(line.as_bytes()).await.is_err() {
                            break;
                        }
                    }
                    let _ = stream.shutdown().await;
                });
            }
        });

        Ok(Self {
            address,
            lines,
            clients,
            accept_handle,
        })
    }

    /// `host:port` for `TcpConfig::address`
    pub fn address(&self) -> String {
        self.address.to_string()
    }

    /// Wait until at least `count` clients are connected
    pub async fn wait_for_clients(&mut self, count: usize) {
        let _ = self.clients.wait_for(|n| *n >= count).await;
    }

    /// Send a raw line (newline appended)
    pub fn send_line(&self, line: &str) {
        let _ = self.lines.send(Arc::from(format!("{}\n", line)));
    }

    /// Send a record as a JSON line
    pub fn send_json(&self, record: &LogRecord) {
        if let Ok(line) = serde_json::to_string(record) {
            self.send_line(&line);
        }
    }

    /// Disconnect every client
    pub fn shutdown(self) {
        self.accept_handle.abort();
        // Dropping the last sender ends every writer task
        drop(self.lines);
    }
}

/// Render a record the way `dlt-convert -a` prints it
pub fn ascii_line(index: u32, record: &LogRecord) -> String {
    format!(
        "{} 2024/05/14 10:21:33.000000 {:>10.4} 000 IDCE {:-<4} {:-<4} log info V 1 {}",
        index, record.timestamp, record.app_id, record.context_id, record.payload
    )
}

/// Write records as an ASCII recording into `dir`
pub fn write_recording(dir: &std::path::Path, name: &str, records: &[LogRecord]) -> std::path::PathBuf {
    let path = dir.join(name);
    let content: Vec<String> = records
        .iter()
        .enumerate()
        .map(|(i, r)| ascii_line(i as u32, r))
        .collect();
    if let Err(e) = std::fs::write(&path, content.join("\n")) {
        panic!("Failed to write recording {}: {}", path.display(), e);
    }
    path
}
