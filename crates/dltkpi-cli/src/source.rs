//! Log source selection shared by the streaming commands

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, ValueEnum};
use dltkpi_engine::config::{LineFormat, ReplayConfig, TcpConfig, TransportConfig};
use dltkpi_engine::transport::{create_transport, DltTransport};

/// Line format of the log source
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum SourceFormat {
    /// dlt-receive / dlt-convert ASCII output
    #[default]
    Ascii,
    /// One JSON record per line
    Json,
}

impl From<SourceFormat> for LineFormat {
    fn from(format: SourceFormat) -> Self {
        match format {
            SourceFormat::Ascii => LineFormat::Ascii,
            SourceFormat::Json => LineFormat::Json,
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct SourceArgs {
    /// DLT line broker address (host:port)
    #[arg(long, env = "DLTKPI_BROKER", conflicts_with = "replay")]
    pub broker: Option<String>,

    /// Replay a recorded log file instead of connecting to a broker
    #[arg(long)]
    pub replay: Option<PathBuf>,

    /// Line format of the source
    #[arg(long, value_enum, default_value = "ascii")]
    pub format: SourceFormat,

    /// Pace the replay by record timestamps
    #[arg(long, requires = "replay")]
    pub pace: bool,

    /// Replay speed factor when pacing
    #[arg(long, default_value = "1.0", requires = "replay")]
    pub speed: f64,

    /// Broker connect timeout in milliseconds
    #[arg(long, default_value = "5000")]
    pub connect_timeout_ms: u64,
}

impl SourceArgs {
    /// Transport configuration, falling back to the configured broker
    pub fn transport_config(&self, default_broker: Option<&str>) -> Result<TransportConfig> {
        if let Some(path) = &self.replay {
            return Ok(TransportConfig::Replay(ReplayConfig {
                path: path.clone(),
                format: self.format.into(),
                pace: self.pace,
                speed: self.speed,
            }));
        }

        match self.broker.as_deref().or(default_broker) {
            Some(address) => Ok(TransportConfig::Tcp(TcpConfig {
                address: address.to_string(),
                format: self.format.into(),
                connect_timeout_ms: self.connect_timeout_ms,
            })),
            None => bail!("No log source: pass --broker or --replay, or set 'broker' in the config file"),
        }
    }

    pub async fn open(&self, default_broker: Option<&str>) -> Result<Arc<dyn DltTransport>> {
        let config = self.transport_config(default_broker)?;
        create_transport(&config)
            .await
            .context("Failed to open log source")
    }
}
