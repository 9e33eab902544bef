//! KPI export sinks

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use dltkpi_core::{KpiRow, KpiSink, SinkError};
use tracing::info;

/// Column names of exported CSV files
pub const CSV_HEADER: [&str; 5] = ["metric", "metric_value", "kpi_threshold", "diff", "passed"];

fn csv_error(err: csv::Error) -> SinkError {
    SinkError::Format(format!("CSV: {}", err))
}

fn optional(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Appends rows to a CSV file, writing the header only into an empty file
pub struct CsvSink {
    writer: csv::Writer<File>,
}

impl CsvSink {
    pub fn append(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let empty = file.metadata()?.len() == 0;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if empty {
            writer.write_record(CSV_HEADER).map_err(csv_error)?;
            writer.flush()?;
        }

        Ok(Self { writer })
    }
}

impl KpiSink for CsvSink {
    fn write_row(&mut self, row: &KpiRow) -> Result<(), SinkError> {
        self.writer
            .write_record([
                row.kpi_name.clone(),
                row.duration_seconds.to_string(),
                optional(row.threshold),
                optional(row.diff),
                row.passed.to_string(),
            ])
            .map_err(csv_error)?;
        self.writer.flush()?;
        Ok(())
    }
}

/// One JSON object per line
pub struct JsonLinesSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> KpiSink for JsonLinesSink<W> {
    fn write_row(&mut self, row: &KpiRow) -> Result<(), SinkError> {
        serde_json::to_writer(&mut self.writer, row)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Publishes rows as `[METRIC]` log events
#[derive(Debug, Default)]
pub struct MetricLogSink;

impl MetricLogSink {
    pub fn format(row: &KpiRow) -> String {
        let mut line = format!(
            "[METRIC] name='{}' value={}",
            row.kpi_name, row.duration_seconds
        );
        if let Some(threshold) = row.threshold {
            line.push_str(&format!(" threshold={}", threshold));
        }
        if let Some(diff) = row.diff {
            line.push_str(&format!(" diff={}", diff));
        }
        line.push_str(&format!(" passed={}", row.passed));
        line
    }
}

impl KpiSink for MetricLogSink {
    fn write_row(&mut self, row: &KpiRow) -> Result<(), SinkError> {
        info!(target: "metric", "{}", Self::format(row));
        Ok(())
    }
}

/// Keeps rows in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    pub rows: Vec<KpiRow>,
}

impl KpiSink for MemorySink {
    fn write_row(&mut self, row: &KpiRow) -> Result<(), SinkError> {
        self.rows.push(row.clone());
        Ok(())
    }
}
