//! Engine configuration
//!
//! This module contains configuration types for the transports, the retry
//! policy used by the correlator, and subscription buffering.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// =============================================================================
// Transport Configuration
// =============================================================================

/// Transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportConfig {
    /// In-memory broker for testing
    Mock(MockConfig),
    /// Replay a recorded log file
    Replay(ReplayConfig),
    /// Line broker reachable over TCP
    Tcp(TcpConfig),
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::Mock(MockConfig::default())
    }
}

/// Mock transport configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MockConfig {
    /// Simulated delivery latency in milliseconds
    #[serde(default)]
    pub latency_ms: u64,
}

/// Replay transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayConfig {
    /// Recorded log file
    pub path: PathBuf,
    /// Line format of the file
    #[serde(default)]
    pub format: LineFormat,
    /// Pace replay by record timestamps instead of replaying at once
    #[serde(default)]
    pub pace: bool,
    /// Playback speed factor when pacing (2.0 = twice as fast)
    #[serde(default = "default_speed")]
    pub speed: f64,
}

fn default_speed() -> f64 {
    1.0
}

/// TCP line broker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpConfig {
    /// Broker address (e.g., "192.168.0.10:3490")
    pub address: String,
    /// Line format spoken by the broker
    #[serde(default)]
    pub format: LineFormat,
    /// Connection timeout in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
}

fn default_connect_timeout() -> u64 {
    5000
}

/// Text representation of decoded DLT messages
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineFormat {
    /// dlt-convert / dlt-receive ASCII output
    #[default]
    Ascii,
    /// One JSON object per line
    Json,
}

// =============================================================================
// Retry Configuration
// =============================================================================

/// Bounded retry policy for event waits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Number of wait attempts before giving up
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    /// Timeout of a single wait attempt in milliseconds
    #[serde(default = "default_attempt_timeout")]
    pub attempt_timeout_ms: u64,
    /// Delay between attempts
    #[serde(default)]
    pub backoff: Backoff,
}

fn default_attempts() -> u32 {
    10
}

fn default_attempt_timeout() -> u64 {
    5000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            attempt_timeout_ms: default_attempt_timeout(),
            backoff: Backoff::default(),
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, attempt_timeout: Duration, backoff: Backoff) -> Self {
        Self {
            attempts,
            attempt_timeout_ms: attempt_timeout.as_millis() as u64,
            backoff,
        }
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    /// Delay to sleep after the given failed attempt (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff.delay(attempt)
    }
}

/// Delay strategy between attempts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Backoff {
    None,
    Fixed {
        delay_ms: u64,
    },
    Exponential {
        initial_ms: u64,
        max_ms: u64,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Fixed { delay_ms: 2000 }
    }
}

impl Backoff {
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            Backoff::None => Duration::ZERO,
            Backoff::Fixed { delay_ms } => Duration::from_millis(*delay_ms),
            Backoff::Exponential { initial_ms, max_ms } => {
                let shift = attempt.saturating_sub(1).min(31);
                let delay = initial_ms.saturating_mul(1u64 << shift);
                Duration::from_millis(delay.min(*max_ms))
            }
        }
    }
}

// =============================================================================
// Subscription Configuration
// =============================================================================

/// Buffering limits of a stream subscription
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    /// Maximum number of records kept for diagnostic dumps
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    /// Maximum number of unconsumed records; the oldest are evicted first
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
}

fn default_history_capacity() -> usize {
    10_000
}

fn default_buffer_capacity() -> usize {
    10_000
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            history_capacity: default_history_capacity(),
            buffer_capacity: default_buffer_capacity(),
        }
    }
}
