use chrono::{DateTime, FixedOffset, Utc};
use std::path::Path;

use crate::core::tide::{TideSample, TideSeries};
use crate::types::{ShoreError, ShoreResult};

/// Read a delimited tide table.
///
/// The first line is a header. `time_column` holds RFC 3339 timestamps that must
/// carry a zero (UTC) offset; `level_column` holds water levels in metres.
/// Comma, semicolon and tab delimiters are accepted.
pub fn load_tide_series(path: &Path, time_column: usize, level_column: usize) -> ShoreResult<TideSeries> {
    let text = std::fs::read_to_string(path)?;
    let series = parse_tide_table(&text, time_column, level_column).map_err(|e| match e {
        ShoreError::Config(msg) => ShoreError::Config(format!("{}: {}", path.display(), msg)),
        other => other,
    })?;
    log::info!("Loaded {} tide samples from {}", series.samples().len(), path.display());
    Ok(series)
}

pub fn parse_tide_table(text: &str, time_column: usize, level_column: usize) -> ShoreResult<TideSeries> {
    let mut lines = text.lines().enumerate().filter(|(_, l)| !l.trim().is_empty());
    let (_, header) = lines
        .next()
        .ok_or_else(|| ShoreError::Config("Tide table is empty".to_string()))?;
    let delimiter = detect_delimiter(header);
    let columns = header.split(delimiter).count();
    if time_column >= columns || level_column >= columns {
        return Err(ShoreError::Config(format!(
            "Tide table has {} columns, cannot read columns {} and {}",
            columns, time_column, level_column
        )));
    }

    let mut samples = Vec::new();
    for (line_no, line) in lines {
        let fields: Vec<&str> = line.split(delimiter).map(str::trim).collect();
        let field = |idx: usize| {
            fields.get(idx).copied().ok_or_else(|| {
                ShoreError::Config(format!("Line {}: missing column {}", line_no + 1, idx))
            })
        };
        let time = parse_utc(field(time_column)?)
            .map_err(|e| ShoreError::Config(format!("Line {}: {}", line_no + 1, e)))?;
        let raw_level = field(level_column)?;
        let level: f64 = raw_level.parse().map_err(|_| {
            ShoreError::Config(format!("Line {}: invalid tide level '{}'", line_no + 1, raw_level))
        })?;
        samples.push(TideSample { time, level });
    }

    TideSeries::new(samples)
}

fn detect_delimiter(header: &str) -> char {
    [',', ';', '\t']
        .into_iter()
        .max_by_key(|d| header.matches(*d).count())
        .unwrap_or(',')
}

/// Parse a timestamp that states a UTC offset of zero
fn parse_utc(raw: &str) -> Result<DateTime<Utc>, String> {
    let parsed: DateTime<FixedOffset> = DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%:z"))
        .map_err(|_| format!("timestamp '{}' has no explicit UTC offset", raw))?;
    if parsed.offset().local_minus_utc() != 0 {
        return Err(format!("timestamp '{}' is not in UTC", raw));
    }
    Ok(parsed.with_timezone(&Utc))
}
