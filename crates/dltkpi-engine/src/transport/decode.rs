//! Line decoders for textual DLT output
//!
//! Frame decoding itself belongs to the broker; transports only receive text
//! lines. Two shapes are understood:
//!
//! - ASCII lines as printed by `dlt-convert -a` / `dlt-receive -a`:
//!   `index date time timestamp counter ecu apid ctid type subtype mode noar payload`
//! - JSON objects carrying the `LogRecord` fields (`timestamp`/`tmsp`,
//!   `app_id`/`apid`, `context_id`/`ctid`, `payload`/`payload_decoded`)

use dltkpi_core::LogRecord;

use super::TransportError;
use crate::config::LineFormat;

/// Number of header columns before the payload in ASCII output
const ASCII_HEADER_COLUMNS: usize = 12;

/// Decode one line; blank lines yield `Ok(None)`
pub fn decode_line(line: &str, format: LineFormat) -> Result<Option<LogRecord>, TransportError> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Ok(None);
    }

    match format {
        LineFormat::Ascii => decode_ascii(line).map(Some),
        LineFormat::Json => serde_json::from_str(line)
            .map(Some)
            .map_err(|e| TransportError::Decode(format!("Invalid JSON record: {}", e))),
    }
}

fn decode_ascii(line: &str) -> Result<LogRecord, TransportError> {
    let mut columns = Vec::with_capacity(ASCII_HEADER_COLUMNS);
    let mut rest = line;
    while columns.len() < ASCII_HEADER_COLUMNS {
        match next_token(rest) {
            Some((token, remainder)) => {
                columns.push(token);
                rest = remainder;
            }
            None => {
                return Err(TransportError::Decode(format!(
                    "Expected {} header columns, got {}: '{}'",
                    ASCII_HEADER_COLUMNS,
                    columns.len(),
                    line
                )))
            }
        }
    }

    let timestamp: f64 = columns[3]
        .parse()
        .map_err(|_| TransportError::Decode(format!("Invalid timestamp '{}'", columns[3])))?;

    Ok(LogRecord::new(
        timestamp,
        strip_id_padding(columns[6]),
        strip_id_padding(columns[7]),
        rest.trim(),
    ))
}

/// Split off the next whitespace-delimited token
fn next_token(s: &str) -> Option<(&str, &str)> {
    let s = s.trim_start();
    if s.is_empty() {
        return None;
    }
    match s.find(char::is_whitespace) {
        Some(end) => Some((&s[..end], &s[end..])),
        None => Some((s, "")),
    }
}

/// DLT tools pad IDs shorter than four characters with '-'
fn strip_id_padding(id: &str) -> &str {
    id.trim_end_matches('-')
}
