//! Catalog listing commands

use anyhow::Result;
use dltkpi_engine::catalog::{CollectKind, KpiCatalog};

use crate::output::{KpiDefRow, MarkerRow, OutputContext};

/// List catalog markers
pub fn markers(catalog: &KpiCatalog, ctx: &OutputContext) -> Result<()> {
    let rows: Vec<MarkerRow> = catalog
        .markers
        .iter()
        .map(|(name, marker)| MarkerRow {
            name: name.clone(),
            apid: marker.apid.clone(),
            ctid: marker.ctid.clone(),
            kind: if marker.template.is_some() {
                "template".to_string()
            } else {
                "pattern".to_string()
            },
            expression: marker.expression().to_string(),
        })
        .collect();

    ctx.print(&rows);
    Ok(())
}

/// List every KPI with the threshold that applies to `branch`
pub fn kpis(catalog: &KpiCatalog, branch: Option<&str>, ctx: &OutputContext) -> Result<()> {
    let threshold = |value: Option<f64>| {
        value
            .map(|v| format!("{:.3}", v))
            .unwrap_or_else(|| "-".to_string())
    };

    let correlated = catalog.kpi.iter().map(|kpi| KpiDefRow {
        name: kpi.name.clone(),
        kind: "correlated".to_string(),
        from: kpi.start.clone(),
        to: kpi.end.clone(),
        threshold: threshold(catalog.threshold(&kpi.thresholds, branch)),
    });

    let collected = catalog.collect.iter().map(|def| KpiDefRow {
        name: def.name.clone(),
        kind: match def.value {
            CollectKind::Timestamp => "timestamp".to_string(),
            CollectKind::Capture => "capture".to_string(),
        },
        from: def.marker.clone(),
        to: def.capture.clone().unwrap_or_default(),
        threshold: threshold(catalog.threshold(&def.thresholds, branch)),
    });

    let derived = catalog.derived.iter().map(|def| KpiDefRow {
        name: def.name.clone(),
        kind: "derived".to_string(),
        from: def.from.clone(),
        to: def.to.clone(),
        threshold: threshold(catalog.threshold(&def.thresholds, branch)),
    });

    let rows: Vec<KpiDefRow> = correlated.chain(collected).chain(derived).collect();
    ctx.print(&rows);
    Ok(())
}
