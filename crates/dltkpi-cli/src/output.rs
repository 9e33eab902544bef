//! Output formatting for dltkpi (table, json, csv)

use clap::ValueEnum;
use colored::{ColoredString, Colorize};
use dltkpi_core::{KpiReport, LogRecord, Verdict};
use serde::Serialize;
use std::io::Write;
use tabled::{Table, Tabled};

/// Output format options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// ASCII table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
    /// CSV format
    Csv,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Table => "table",
            OutputFormat::Json => "json",
            OutputFormat::Csv => "csv",
        }
    }

    /// Parse a format name from the config file
    pub fn parse(name: &str) -> Option<Self> {
        <Self as ValueEnum>::from_str(name, true).ok()
    }
}

/// Context for output rendering
pub struct OutputContext {
    pub format: OutputFormat,
    pub quiet: bool,
}

impl OutputContext {
    pub fn new(format: OutputFormat, no_color: bool, quiet: bool) -> Self {
        if no_color {
            colored::control::set_override(false);
        }
        Self { format, quiet }
    }

    /// Print a success message (unless in quiet mode)
    pub fn success(&self, msg: &str) {
        if !self.quiet {
            self.status(msg.green());
        }
    }

    /// Print an info message (unless in quiet mode)
    pub fn info(&self, msg: &str) {
        if !self.quiet {
            self.status(msg.normal());
        }
    }

    /// Print a warning message
    pub fn warn(&self, msg: &str) {
        eprintln!("{}", msg.yellow());
    }

    /// Print an error message
    pub fn error(&self, msg: &str) {
        eprintln!("{}", msg.red());
    }

    /// Print data in the configured format
    pub fn print<T: Tabled + Serialize>(&self, data: &[T]) {
        match self.format {
            OutputFormat::Table => {
                if data.is_empty() {
                    if !self.quiet {
                        println!("No data");
                    }
                } else {
                    let table = Table::new(data).to_string();
                    println!("{}", table);
                }
            }
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::to_string_pretty(data).unwrap_or_else(|_| "[]".to_string())
                );
            }
            OutputFormat::Csv => {
                print_csv(data, true);
            }
        }
    }

    /// Print records as they stream in; CSV and JSON emit one line each
    pub fn print_stream<T: Tabled + Serialize>(&self, data: &[T], first: bool) {
        match self.format {
            OutputFormat::Table => {
                if !data.is_empty() {
                    println!("{}", Table::new(data));
                }
            }
            OutputFormat::Json => {
                for item in data {
                    if let Ok(line) = serde_json::to_string(item) {
                        println!("{}", line);
                    }
                }
            }
            OutputFormat::Csv => print_csv(data, first),
        }
    }

    /// One-line verdict summary of a report
    pub fn verdict(&self, report: &KpiReport) {
        let line = match (report.verdict(), report.threshold) {
            (Verdict::Passed, Some(limit)) => format!(
                "PASSED {}: {:.3}s <= {:.3}s",
                report.kpi_name, report.measured_duration, limit
            )
            .green(),
            (Verdict::Failed, Some(limit)) => format!(
                "FAILED {}: {:.3}s > {:.3}s",
                report.kpi_name, report.measured_duration, limit
            )
            .red(),
            _ => format!("{}: {:.3}s", report.kpi_name, report.measured_duration).normal(),
        };
        if !self.quiet {
            self.status(line);
        }
    }

    /// Status lines go to stderr when stdout carries JSON or CSV
    fn status(&self, line: ColoredString) {
        if self.status_on_stdout() {
            println!("{}", line);
        } else {
            eprintln!("{}", line);
        }
    }

    fn status_on_stdout(&self) -> bool {
        self.format == OutputFormat::Table
    }
}

/// Print data as CSV, columns in field order
fn print_csv<T: Serialize>(data: &[T], header: bool) {
    if let Err(e) = write_csv(std::io::stdout().lock(), data, header) {
        eprintln!("{}", format!("CSV output failed: {}", e).red());
    }
}

fn write_csv<W: Write, T: Serialize>(writer: W, data: &[T], header: bool) -> csv::Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(header)
        .from_writer(writer);
    for item in data {
        writer.serialize(item)?;
    }
    writer.flush()?;
    Ok(())
}

fn optional(value: Option<f64>) -> String {
    value.map(|v| format!("{:.3}", v)).unwrap_or_else(|| "-".to_string())
}

// =============================================================================
// Display types for various commands
// =============================================================================

/// Marker display for markers command
#[derive(Debug, Tabled, Serialize)]
pub struct MarkerRow {
    #[tabled(rename = "Marker")]
    pub name: String,
    #[tabled(rename = "APID")]
    pub apid: String,
    #[tabled(rename = "CTID")]
    pub ctid: String,
    #[tabled(rename = "Kind")]
    pub kind: String,
    #[tabled(rename = "Expression")]
    pub expression: String,
}

/// KPI definition display for kpis command
#[derive(Debug, Tabled, Serialize)]
pub struct KpiDefRow {
    #[tabled(rename = "KPI")]
    pub name: String,
    #[tabled(rename = "Kind")]
    pub kind: String,
    #[tabled(rename = "From")]
    pub from: String,
    #[tabled(rename = "To")]
    pub to: String,
    #[tabled(rename = "Threshold")]
    pub threshold: String,
}

/// Measured KPI display
#[derive(Debug, Tabled, Serialize)]
pub struct ReportRow {
    #[tabled(rename = "KPI")]
    pub kpi: String,
    #[tabled(rename = "Value")]
    pub value: String,
    #[tabled(rename = "Threshold")]
    pub threshold: String,
    #[tabled(rename = "Diff")]
    pub diff: String,
    #[tabled(rename = "Verdict")]
    pub verdict: String,
}

impl From<&KpiReport> for ReportRow {
    fn from(report: &KpiReport) -> Self {
        let row = report.row();
        let verdict = match report.verdict() {
            Verdict::Passed => "passed",
            Verdict::Failed => "failed",
            Verdict::Informational => "info",
        };
        Self {
            kpi: row.kpi_name,
            value: format!("{:.3}", row.duration_seconds),
            threshold: optional(row.threshold),
            diff: optional(row.diff),
            verdict: verdict.to_string(),
        }
    }
}

/// Record display for watch command
#[derive(Debug, Tabled, Serialize)]
pub struct RecordRow {
    #[tabled(rename = "Time")]
    pub timestamp: String,
    #[tabled(rename = "APID")]
    pub apid: String,
    #[tabled(rename = "CTID")]
    pub ctid: String,
    #[tabled(rename = "Payload")]
    pub payload: String,
}

impl From<&LogRecord> for RecordRow {
    fn from(record: &LogRecord) -> Self {
        Self {
            timestamp: format!("{:.4}", record.timestamp),
            apid: record.app_id.clone(),
            ctid: record.context_id.clone(),
            payload: record.payload.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_report_row() {
        let report = KpiReport::from_duration("click_to_route", 3.5, Some(3.0));
        let row = ReportRow::from(&report);
        assert_eq!(row.value, "3.500");
        assert_eq!(row.threshold, "3.000");
        assert_eq!(row.diff, "0.500");
        assert_eq!(row.verdict, "failed");

        let info = ReportRow::from(&KpiReport::from_duration("boot", 1.0, None));
        assert_eq!(info.threshold, "-");
        assert_eq!(info.verdict, "info");
    }

    #[test]
    fn test_format_names() {
        assert_eq!(OutputFormat::parse("JSON"), Some(OutputFormat::Json));
        assert_eq!(OutputFormat::parse("xml"), None);
        assert_eq!(OutputFormat::Csv.as_str(), "csv");
    }

    #[test]
    fn test_csv_keeps_field_order_and_quotes() {
        let rows = [ReportRow::from(&KpiReport::from_duration("a,b", 1.0, None))];
        let mut out = Vec::new();
        write_csv(&mut out, &rows, true).unwrap();

        assert_eq!(
            String::from_utf8(out).unwrap(),
            "kpi,value,threshold,diff,verdict\n\"a,b\",1.000,-,-,info\n"
        );
    }

    #[test]
    fn test_csv_quotes_carriage_return_without_header() {
        let rows = [RecordRow {
            timestamp: "1.0000".into(),
            apid: "ALD".into(),
            ctid: "LCAT".into(),
            payload: "line\rbreak".into(),
        }];
        let mut out = Vec::new();
        write_csv(&mut out, &rows, false).unwrap();

        assert_eq!(String::from_utf8(out).unwrap(), "1.0000,ALD,LCAT,\"line\rbreak\"\n");
    }

    #[test]
    fn test_status_lines_leave_machine_output_clean() {
        assert!(OutputContext::new(OutputFormat::Table, true, false).status_on_stdout());
        assert!(!OutputContext::new(OutputFormat::Json, true, false).status_on_stdout());
        assert!(!OutputContext::new(OutputFormat::Csv, true, false).status_on_stdout());
    }
}
