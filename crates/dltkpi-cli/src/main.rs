//! dltkpi - Command-line tool for DLT KPI measurements
//!
//! Measures latency KPIs by correlating markers of a live or recorded DLT
//! log stream against a KPI catalog.

mod commands;
mod config;
mod output;
mod source;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dltkpi_core::FilterPair;
use dltkpi_engine::catalog::KpiCatalog;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::commands::measure::RetryOverrides;
use crate::commands::ExportArgs;
use crate::config::{CliOverrides, Config, MergedConfig};
use crate::output::{OutputContext, OutputFormat};
use crate::source::SourceArgs;

#[derive(Parser)]
#[command(name = "dltkpi")]
#[command(author, version, about = "DLT KPI measurement CLI")]
#[command(propagate_version = true)]
struct Cli {
    /// KPI catalog (TOML or YAML)
    #[arg(long, env = "DLTKPI_CATALOG")]
    catalog: Option<PathBuf>,

    /// Configuration file path
    #[arg(short, long, env = "DLTKPI_CONFIG")]
    config: Option<PathBuf>,

    /// Software branch used for threshold lookup
    #[arg(short, long, env = "DLTKPI_BRANCH")]
    branch: Option<String>,

    /// Output format
    #[arg(short, long, value_enum)]
    output: Option<OutputFormat>,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Minimal output (for scripting)
    #[arg(short, long)]
    quiet: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List catalog markers
    Markers,

    /// List catalog KPIs with their thresholds
    Kpis,

    /// Measure a correlated KPI once
    Measure {
        /// KPI name from the catalog
        kpi: String,

        #[command(flatten)]
        source: SourceArgs,

        /// Number of wait attempts per event
        #[arg(long)]
        attempts: Option<u32>,

        /// Timeout of a single attempt in seconds
        #[arg(long, value_name = "SECS", value_parser = parse_seconds)]
        attempt_timeout: Option<Duration>,

        #[command(flatten)]
        export: ExportArgs,
    },

    /// Collect single-marker and derived KPIs over a time window
    Collect {
        #[command(flatten)]
        source: SourceArgs,

        /// Observation window in seconds
        #[arg(long, value_name = "SECS", default_value = "60", value_parser = parse_seconds)]
        window: Duration,

        #[command(flatten)]
        export: ExportArgs,
    },

    /// Print matching records in real time
    Watch {
        /// Filters as APID:CTID
        #[arg(required = true)]
        filters: Vec<FilterPair>,

        /// Payload regex
        #[arg(long)]
        pattern: Option<String>,

        #[command(flatten)]
        source: SourceArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let mut filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    if exports_metric_log(&cli.command) {
        filter = filter.add_directive("metric=info".parse()?);
    }

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();

    // Load config file
    let config = if let Some(config_path) = &cli.config {
        Config::load_from(config_path)?
    } else {
        Config::load().unwrap_or_default()
    };

    // Merge CLI args with config
    let merged = config.merge_with_args(CliOverrides {
        catalog: cli.catalog.as_deref(),
        branch: cli.branch.as_deref(),
        output: cli.output.map(|f| f.as_str()),
        no_color: cli.no_color,
    });
    let format = OutputFormat::parse(&merged.output).unwrap_or_default();

    // Create output context
    let ctx = OutputContext::new(format, merged.no_color, cli.quiet);
    let branch = merged.branch.as_deref();

    // Execute command
    match &cli.command {
        Commands::Markers => {
            let catalog = load_catalog(&merged)?;
            commands::markers(&catalog, &ctx)
        }

        Commands::Kpis => {
            let catalog = load_catalog(&merged)?;
            commands::kpis(&catalog, branch, &ctx)
        }

        Commands::Measure {
            kpi,
            source,
            attempts,
            attempt_timeout,
            export,
        } => {
            let catalog = load_catalog(&merged)?;
            let transport = source.open(merged.broker.as_deref()).await?;
            let retry = RetryOverrides {
                attempts: *attempts,
                attempt_timeout: *attempt_timeout,
            };
            commands::measure(&catalog, kpi, transport, branch, retry, export, &ctx).await
        }

        Commands::Collect {
            source,
            window,
            export,
        } => {
            let catalog = load_catalog(&merged)?;
            let transport = source.open(merged.broker.as_deref()).await?;
            commands::collect(
                &catalog,
                transport,
                branch,
                *window,
                export,
                &ctx,
            )
            .await
        }

        Commands::Watch {
            filters,
            pattern,
            source,
        } => {
            let transport = source.open(merged.broker.as_deref()).await?;
            commands::watch(transport, filters.clone(), pattern.as_deref(), &ctx).await
        }
    }
}

fn load_catalog(merged: &MergedConfig) -> Result<KpiCatalog> {
    KpiCatalog::load(&merged.catalog)
        .with_context(|| format!("Failed to load KPI catalog: {}", merged.catalog.display()))
}

/// Positive, finite number of seconds
fn parse_seconds(value: &str) -> Result<Duration, String> {
    let secs: f64 = value
        .parse()
        .map_err(|_| format!("'{}' is not a number of seconds", value))?;
    if !secs.is_finite() || secs <= 0.0 {
        return Err(format!("'{}' must be a positive number of seconds", value));
    }
    Duration::try_from_secs_f64(secs).map_err(|e| format!("'{}': {}", value, e))
}

fn exports_metric_log(command: &Commands) -> bool {
    match command {
        Commands::Measure { export, .. } | Commands::Collect { export, .. } => export.metric_log,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_seconds() {
        assert_eq!(parse_seconds("2.5"), Ok(Duration::from_millis(2500)));
        assert!(parse_seconds("-1").is_err());
        assert!(parse_seconds("0").is_err());
        assert!(parse_seconds("NaN").is_err());
        assert!(parse_seconds("inf").is_err());
        assert!(parse_seconds("1e30").is_err());
        assert!(parse_seconds("soon").is_err());
    }

    #[test]
    fn test_negative_window_is_a_usage_error() {
        let result = Cli::try_parse_from(["dltkpi", "collect", "--replay", "t.log", "--window=-1"]);
        assert!(result.is_err());

        let cli = Cli::try_parse_from(["dltkpi", "collect", "--replay", "t.log", "--window", "0.5"]).unwrap();
        match cli.command {
            Commands::Collect { window, .. } => assert_eq!(window, Duration::from_millis(500)),
            _ => panic!("Expected collect"),
        }
    }
}
