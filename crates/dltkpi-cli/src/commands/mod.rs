//! Command implementations for dltkpi

pub mod catalog;
pub mod collect;
pub mod measure;
pub mod watch;

pub use catalog::{kpis, markers};
pub use collect::collect;
pub use measure::measure;
pub use watch::watch;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use dltkpi_core::KpiReport;
use dltkpi_engine::export::{CsvSink, MetricLogSink};

/// Where measured KPIs are written besides the terminal
#[derive(Debug, Clone, Default, Args)]
pub struct ExportArgs {
    /// Append results to a CSV file
    #[arg(long, value_name = "FILE")]
    pub csv: Option<PathBuf>,

    /// Publish results as [METRIC] log lines
    #[arg(long)]
    pub metric_log: bool,
}

impl ExportArgs {
    pub fn export(&self, reports: &[KpiReport]) -> Result<()> {
        if let Some(path) = &self.csv {
            let mut sink = CsvSink::append(path)
                .with_context(|| format!("Failed to open CSV file: {}", path.display()))?;
            for report in reports {
                report
                    .export(&mut sink)
                    .with_context(|| format!("Failed to write CSV file: {}", path.display()))?;
            }
        }

        if self.metric_log {
            let mut sink = MetricLogSink;
            for report in reports {
                report.export(&mut sink)?;
            }
        }

        Ok(())
    }
}
