//! Measure command - correlate a start and an end marker once

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use dltkpi_engine::catalog::KpiCatalog;
use dltkpi_engine::transport::DltTransport;

use super::ExportArgs;
use crate::output::{OutputContext, ReportRow};

/// Overrides of the catalog retry policy
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryOverrides {
    pub attempts: Option<u32>,
    pub attempt_timeout: Option<Duration>,
}

/// Run one correlation of a catalog KPI
pub async fn measure(
    catalog: &KpiCatalog,
    kpi_name: &str,
    transport: Arc<dyn DltTransport>,
    branch: Option<&str>,
    retry: RetryOverrides,
    export: &ExportArgs,
    ctx: &OutputContext,
) -> Result<()> {
    let kpi = catalog
        .kpi(kpi_name)
        .with_context(|| format!("KPI '{}' is not defined in the catalog", kpi_name))?;
    let threshold = catalog.threshold(&kpi.thresholds, branch);

    let mut policy = kpi.retry.clone().unwrap_or_default();
    if let Some(attempts) = retry.attempts {
        policy.attempts = attempts;
    }
    if let Some(timeout) = retry.attempt_timeout {
        policy.attempt_timeout_ms = timeout.as_millis() as u64;
    }

    let mut correlator = catalog
        .correlator(kpi_name)?
        .retry(policy)
        .open(transport)
        .await
        .context("Failed to open correlator")?;

    let handle = correlator.cancel_handle();
    ctrlc::set_handler(move || handle.close())?;

    ctx.info(&format!(
        "Measuring '{}' ({} -> {}), press Ctrl+C to abort",
        kpi_name, kpi.start, kpi.end
    ));

    let report = match correlator.measure(kpi_name, threshold).await {
        Ok(report) => report,
        Err(e) if e.is_usage_error() => {
            return Err(anyhow::Error::new(e)
                .context(format!("KPI '{}' is misconfigured in the catalog", kpi_name)))
        }
        Err(e) => {
            return Err(anyhow::Error::new(e).context(format!("Measuring '{}' failed", kpi_name)))
        }
    };

    ctx.print(&[ReportRow::from(&report)]);
    ctx.verdict(&report);
    export.export(std::slice::from_ref(&report))?;

    if !report.passed {
        bail!("KPI '{}' exceeded its threshold", kpi_name);
    }
    Ok(())
}
