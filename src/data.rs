//! Bar series loading
//!
//! Series are read from `{data_dir}/{instrument}_{interval}.csv`, one file
//! per key, as written by whatever process keeps the market data fresh.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{debug, warn};

use crate::types::{Bar, Instrument, Interval};

// =============================================================================
// Bar Sources
// =============================================================================

/// Where the scanner gets its bars from
pub trait BarSource: Send + Sync {
    /// `Ok(None)` when nothing is available for the key
    fn load(&self, instrument: &Instrument, interval: Interval) -> Result<Option<Vec<Bar>>>;
}

/// CSV files under one directory
#[derive(Debug, Clone)]
pub struct CsvBarSource {
    data_dir: PathBuf,
}

impl CsvBarSource {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn path_for(&self, instrument: &Instrument, interval: Interval) -> PathBuf {
        self.data_dir
            .join(format!("{}_{}.csv", instrument.as_str(), interval.as_str()))
    }
}

impl BarSource for CsvBarSource {
    fn load(&self, instrument: &Instrument, interval: Interval) -> Result<Option<Vec<Bar>>> {
        let path = self.path_for(instrument, interval);
        if !path.exists() {
            debug!("Data file not found: {}", path.display());
            return Ok(None);
        }
        load_csv(&path)
            .with_context(|| format!("Failed to load data for {} {}", instrument, interval))
            .map(Some)
    }
}

/// Preloaded series, for tests and embedding
#[derive(Debug, Default)]
pub struct MemoryBarSource {
    series: RwLock<HashMap<(Instrument, Interval), Vec<Bar>>>,
}

impl MemoryBarSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, instrument: &Instrument, interval: Interval, bars: Vec<Bar>) {
        if let Ok(mut series) = self.series.write() {
            series.insert((instrument.clone(), interval), bars);
        }
    }
}

impl BarSource for MemoryBarSource {
    fn load(&self, instrument: &Instrument, interval: Interval) -> Result<Option<Vec<Bar>>> {
        let series = self
            .series
            .read()
            .map_err(|_| anyhow::anyhow!("bar source lock poisoned"))?;
        Ok(series.get(&(instrument.clone(), interval)).cloned())
    }
}

// =============================================================================
// CSV Data Loading
// =============================================================================

/// Column positions resolved from the header row
struct Layout {
    time: usize,
    open: usize,
    high: usize,
    low: usize,
    close: usize,
    volume: Option<usize>,
}

impl Layout {
    /// `None` unless every OHLC column and a time column are named
    fn from_headers(headers: &csv::StringRecord) -> Option<Self> {
        let find = |names: &[&str]| {
            headers
                .iter()
                .position(|h| names.iter().any(|n| h.trim().eq_ignore_ascii_case(n)))
        };
        Some(Layout {
            time: find(&["datetime", "timestamp", "date", "time"])?,
            open: find(&["open"])?,
            high: find(&["high"])?,
            low: find(&["low"])?,
            close: find(&["close"])?,
            volume: find(&["volume"]),
        })
    }

    /// datetime,open,high,low,close,volume
    fn positional() -> Self {
        Layout {
            time: 0,
            open: 1,
            high: 2,
            low: 3,
            close: 4,
            volume: Some(5),
        }
    }
}

fn csv_reader(path: &Path, has_headers: bool) -> Result<csv::Reader<std::fs::File>> {
    csv::ReaderBuilder::new()
        .has_headers(has_headers)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("Failed to open CSV file: {}", path.display()))
}

/// Load an OHLCV series from a CSV file.
///
/// Rows may come in any order; the result is sorted by time with duplicate
/// timestamps collapsed to their first occurrence in the file. Rows that
/// fail to parse or violate bar invariants are dropped. Missing or empty
/// volume reads as zero. A file without a header row is read positionally.
pub fn load_csv(path: impl AsRef<Path>) -> Result<Vec<Bar>> {
    let path = path.as_ref();
    let mut reader = csv_reader(path, true)?;
    let headers = reader.headers().context("Failed to read CSV header")?.clone();

    let layout = match Layout::from_headers(&headers) {
        Some(layout) => layout,
        None if headers.get(0).and_then(parse_timestamp).is_some() => {
            // first line is data
            reader = csv_reader(path, false)?;
            Layout::positional()
        }
        None => Layout::positional(),
    };

    let mut bars: Vec<Bar> = Vec::new();
    let mut invalid = 0usize;

    for (row_idx, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("Failed to read row {}", row_idx + 1))?;
        match parse_row(&record, &layout) {
            Some(bar) => bars.push(bar),
            None => invalid += 1,
        }
    }

    let parsed = bars.len();
    bars.sort_by_key(|b| b.timestamp);
    bars.dedup_by_key(|b| b.timestamp);
    let duplicates = parsed - bars.len();

    if invalid + duplicates > 0 {
        warn!(
            "{}: dropped {} invalid and {} duplicate rows",
            path.display(),
            invalid,
            duplicates
        );
    }
    debug!("Loaded {} bars from {}", bars.len(), path.display());
    Ok(bars)
}

fn parse_row(record: &csv::StringRecord, layout: &Layout) -> Option<Bar> {
    let number = |idx: usize| record.get(idx)?.parse::<f64>().ok();

    let timestamp = parse_timestamp(record.get(layout.time)?)?;
    let volume = match layout.volume.and_then(|idx| record.get(idx)) {
        None | Some("") => 0.0,
        Some(v) => v.parse().ok()?,
    };
    Bar::new(
        timestamp,
        number(layout.open)?,
        number(layout.high)?,
        number(layout.low)?,
        number(layout.close)?,
        volume,
    )
    .ok()
}

/// RFC 3339, "YYYY-MM-DD HH:MM:SS[.fff][±HH:MM]" (naive is UTC), a bare
/// date, or epoch seconds/milliseconds.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Some(ts.with_timezone(&Utc));
    }
    if let Some(naive) = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
    {
        return Some(naive.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|d| d.and_utc());
    }
    let epoch: i64 = s.parse().ok()?;
    // 10^11 seconds is the year 5138; anything larger is milliseconds
    if epoch.abs() >= 100_000_000_000 {
        DateTime::from_timestamp_millis(epoch)
    } else {
        DateTime::from_timestamp(epoch, 0)
    }
}

/// Last-bar close change in percent; `None` with fewer than two bars
pub fn last_change_pct(bars: &[Bar]) -> Option<f64> {
    let [.., prev, last] = bars else {
        return None;
    };
    if prev.close == 0.0 {
        return None;
    }
    Some((last.close - prev.close) / prev.close * 100.0)
}
