//! Replay transport: feeds a recorded log file through the fan-out

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dltkpi_core::{FilterPair, LogRecord};
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::decode::decode_line;
use super::{DltTransport, RegistrationId, TransportError, FANOUT_CAPACITY};
use crate::config::ReplayConfig;

/// Replays recorded records once the first filter set is registered
///
/// After the last record the stream stays open and quiet, so waits for
/// events that are not in the recording time out instead of failing with a
/// connection error.
pub struct ReplayTransport {
    config: ReplayConfig,
    records: Arc<Vec<Arc<LogRecord>>>,
    incoming_tx: broadcast::Sender<Arc<LogRecord>>,
    started: AtomicBool,
    registrations: RwLock<HashMap<RegistrationId, Vec<FilterPair>>>,
    replay_handle: Mutex<Option<JoinHandle<()>>>,
}

impl ReplayTransport {
    /// Load and decode the recording
    ///
    /// Lines that cannot be decoded are skipped.
    pub async fn load(config: &ReplayConfig) -> Result<Self, TransportError> {
        if config.speed.is_nan() || config.speed <= 0.0 {
            return Err(TransportError::InvalidConfig(format!(
                "Replay speed must be positive, got {}",
                config.speed
            )));
        }

        let content = tokio::fs::read_to_string(&config.path).await.map_err(|e| {
            TransportError::ConnectionFailed(format!(
                "Cannot read recording {}: {}",
                config.path.display(),
                e
            ))
        })?;

        let mut records = Vec::new();
        let mut skipped = 0usize;
        for (line_no, line) in content.lines().enumerate() {
            match decode_line(line, config.format) {
                Ok(Some(record)) => records.push(Arc::new(record)),
                Ok(None) => {}
                Err(e) => {
                    skipped += 1;
                    debug!(line = line_no + 1, error = %e, "Skipping undecodable line");
                }
            }
        }

        info!(
            path = %config.path.display(),
            records = records.len(),
            skipped,
            "Recording loaded"
        );

        Ok(Self::from_records(config.clone(), records))
    }

    /// Build a replay transport from already decoded records
    pub fn from_records(config: ReplayConfig, records: Vec<Arc<LogRecord>>) -> Self {
        // Large enough to hold an unpaced replay without lagging receivers
        let (incoming_tx, _) = broadcast::channel(records.len().max(FANOUT_CAPACITY));
        Self {
            config,
            records: Arc::new(records),
            incoming_tx,
            started: AtomicBool::new(false),
            registrations: RwLock::new(HashMap::new()),
            replay_handle: Mutex::new(None),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn start_replay(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let records = self.records.clone();
        let tx = self.incoming_tx.clone();
        let pace = self.config.pace;
        // from_records skips the check done by load
        let speed = if self.config.speed > 0.0 {
            self.config.speed
        } else {
            warn!(speed = self.config.speed, "Invalid replay speed, using 1.0");
            1.0
        };

        let handle = tokio::spawn(async move {
            let mut previous: Option<f64> = None;
            for record in records.iter() {
                if pace {
                    if let Some(prev) = previous {
                        let gap = ((record.timestamp - prev) / speed).max(0.0);
                        tokio::time::sleep(Duration::from_secs_f64(gap)).await;
                    }
                    previous = Some(record.timestamp);
                }
                let _ = tx.send(record.clone());
            }
            debug!(records = records.len(), "Replay finished");
        });

        *self.replay_handle.lock() = Some(handle);
    }
}

#[async_trait]
impl DltTransport for ReplayTransport {
    async fn register(&self, filters: &[FilterPair]) -> Result<RegistrationId, TransportError> {
        let id = RegistrationId::new();
        self.registrations.write().insert(id, filters.to_vec());
        self.start_replay();
        Ok(id)
    }

    fn unregister(&self, id: RegistrationId) {
        self.registrations.write().remove(&id);
    }

    fn subscribe(&self) -> broadcast::Receiver<Arc<LogRecord>> {
        self.incoming_tx.subscribe()
    }

    async fn is_connected(&self) -> bool {
        true
    }
}

impl Drop for ReplayTransport {
    fn drop(&mut self) {
        if let Some(handle) = self.replay_handle.lock().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LineFormat;
    use std::io::Write;

    fn replay_config(path: std::path::PathBuf) -> ReplayConfig {
        ReplayConfig {
            path,
            format: LineFormat::Ascii,
            pace: false,
            speed: 1.0,
        }
    }

    #[tokio::test]
    async fn test_load_skips_garbage_and_replays_on_register() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "0 2024/05/14 10:00:00.000000 10.0000 000 ECU1 ALD- LCAT log info V 1 first").unwrap();
        writeln!(file, "this is not a dlt line").unwrap();
        writeln!(file, "1 2024/05/14 10:00:00.100000 10.1000 001 ECU1 NSM- NSMC log info V 1 second").unwrap();

        let transport = ReplayTransport::load(&replay_config(file.path().to_path_buf()))
            .await
            .unwrap();
        assert_eq!(transport.len(), 2);

        let mut rx = transport.subscribe();
        transport.register(&[]).await.unwrap();

        assert_eq!(rx.recv().await.unwrap().payload, "first");
        assert_eq!(rx.recv().await.unwrap().payload, "second");
    }

    #[tokio::test]
    async fn test_missing_file_is_connection_failure() {
        let result = ReplayTransport::load(&replay_config("/nonexistent/trace.log".into())).await;
        assert!(matches!(result, Err(TransportError::ConnectionFailed(_))));
    }

    #[tokio::test]
    async fn test_non_positive_speed_is_rejected() {
        let mut config = replay_config("/nonexistent/trace.log".into());
        config.speed = 0.0;
        let result = ReplayTransport::load(&config).await;
        assert!(matches!(result, Err(TransportError::InvalidConfig(_))));
    }
}
