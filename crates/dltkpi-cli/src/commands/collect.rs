//! Collect command - single-marker and derived KPIs over a time window

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use dltkpi_core::{CorrelationError, KpiReport};
use dltkpi_engine::catalog::KpiCatalog;
use dltkpi_engine::transport::DltTransport;

use super::ExportArgs;
use crate::output::{OutputContext, ReportRow};

/// Observe the stream for `window` and report every catalog marker KPI
pub async fn collect(
    catalog: &KpiCatalog,
    transport: Arc<dyn DltTransport>,
    branch: Option<&str>,
    window: Duration,
    export: &ExportArgs,
    ctx: &OutputContext,
) -> Result<()> {
    let collector = catalog.collector(branch)?;
    if collector.specs().is_empty() {
        bail!("The catalog defines no [[collect]] entries");
    }

    ctx.info(&format!(
        "Collecting {} marker(s) for {:?}...",
        collector.specs().len(),
        window
    ));
    let outcome = collector.collect(transport, window).await?;

    let mut reports: Vec<KpiReport> = collector
        .specs()
        .iter()
        .filter_map(|spec| outcome.report(&spec.name, spec.threshold))
        .collect();

    for derived in &catalog.derived {
        let threshold = catalog.threshold(&derived.thresholds, branch);
        match outcome.derive(&derived.name, &derived.from, &derived.to, threshold) {
            Ok(Some(report)) => reports.push(report),
            Ok(None) => ctx.warn(&format!(
                "Derived KPI '{}' skipped: '{}' or '{}' not collected",
                derived.name, derived.from, derived.to
            )),
            Err(CorrelationError::ClockAnomaly { begin, end }) => ctx.warn(&format!(
                "Derived KPI '{}' skipped: '{}' ({}) precedes '{}' ({})",
                derived.name, derived.to, end, derived.from, begin
            )),
            Err(e) => return Err(e.into()),
        }
    }

    for name in &outcome.missing {
        ctx.warn(&format!("Marker for '{}' not observed", name));
    }

    let rows: Vec<ReportRow> = reports.iter().map(ReportRow::from).collect();
    ctx.print(&rows);
    export.export(&reports)?;

    let failed: Vec<&str> = reports
        .iter()
        .filter(|r| !r.passed)
        .map(|r| r.kpi_name.as_str())
        .collect();
    if !failed.is_empty() {
        bail!("KPI(s) over threshold: {}", failed.join(", "));
    }
    if !outcome.missing.is_empty() {
        bail!("{} marker(s) not observed", outcome.missing.len());
    }

    ctx.success(&format!("{} KPI(s) collected", reports.len()));
    Ok(())
}
