//! Transport layer for DLT log brokers
//!
//! This module provides the sources a subscription reads from:
//! - TCP adapter for line-oriented brokers
//! - Replay adapter for recorded traces
//! - Mock adapter for testing
//!
//! # Example
//!
//! ```ignore
//! use dltkpi_engine::transport::{create_transport, DltTransport};
//! use dltkpi_engine::config::TransportConfig;
//!
//! let transport = create_transport(&TransportConfig::Mock(Default::default())).await?;
//! let mut rx = transport.subscribe();
//! ```

mod adapter;
pub mod decode;
pub mod error;
pub mod mock;
pub mod replay;
pub mod tcp;

pub use adapter::{DltTransport, RegistrationId, FANOUT_CAPACITY};
pub use error::TransportError;

use std::sync::Arc;

use crate::config::TransportConfig;

/// Create a transport based on configuration
pub async fn create_transport(
    config: &TransportConfig,
) -> Result<Arc<dyn DltTransport>, TransportError> {
    match config {
        TransportConfig::Mock(cfg) => Ok(Arc::new(mock::MockTransport::new(cfg))),
        TransportConfig::Replay(cfg) => {
            let transport = replay::ReplayTransport::load(cfg).await?;
            Ok(Arc::new(transport))
        }
        TransportConfig::Tcp(cfg) => {
            let transport = tcp::TcpTransport::connect(cfg).await?;
            Ok(Arc::new(transport))
        }
    }
}
