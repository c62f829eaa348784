//! Evaluate command implementation

use anyhow::{bail, Result};
use chrono::Utc;
use signal_gate::data::{self, BarSource, CsvBarSource};
use signal_gate::{Config, Instrument, Interval, Pipeline};
use std::path::PathBuf;
use tracing::info;

pub fn run(config: Config, instrument: String, interval: String, file: Option<PathBuf>, json: bool) -> Result<()> {
    let instrument = Instrument::new(instrument);
    let interval: Interval = interval.parse()?;

    let bars = match file {
        Some(path) => data::load_csv(&path)?,
        None => {
            let source = CsvBarSource::new(&config.scheduler.data_dir);
            match source.load(&instrument, interval)? {
                Some(bars) => bars,
                None => bail!(
                    "No data for {} {} (expected {})",
                    instrument,
                    interval,
                    source.path_for(&instrument, interval).display()
                ),
            }
        }
    };
    info!("Loaded {} bars for {} {}", bars.len(), instrument, interval);

    let pipeline = Pipeline::new(config);
    let evaluation = pipeline.evaluate(&instrument, interval, &bars, Utc::now());

    if json {
        println!("{}", serde_json::to_string_pretty(&evaluation)?);
    } else {
        println!("\n{}", "=".repeat(60));
        print!("{}", evaluation.breakdown());
        println!("{}", "=".repeat(60));
    }
    Ok(())
}
