//! Dumps the whole event log to `speeds.csv`.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::BufWriter;
use tracing::info;

use netpulse::config::MonitorConfig;
use netpulse::store::EventStore;

const OUTPUT_PATH: &str = "speeds.csv";

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::INFO.into()))
        .init();

    let config = MonitorConfig::default();
    let store = EventStore::open(&config.db_path, &config.table_name)
        .with_context(|| format!("Failed to open {}", config.db_path.display()))?;

    let file = File::create(OUTPUT_PATH)
        .with_context(|| format!("Failed to create {}", OUTPUT_PATH))?;
    let rows = store
        .export_csv(BufWriter::new(file))
        .context("Failed to export event log")?;
    store.close()?;

    info!("Wrote {} rows to {}", rows, OUTPUT_PATH);
    Ok(())
}
