use anyhow::{Context, Result};
use tracing::{error, info, warn};

use netpulse::config::MonitorConfig;
use netpulse::connectivity::TlsProber;
use netpulse::engine::{Monitor, SystemClock};
use netpulse::store::EventStore;
use netpulse::throughput::SpeedtestClient;
use netpulse::{shutdown, utils};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    utils::setup_console();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::INFO.into()))
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .init();

    info!("Initializing NetPulse probe");
    let config = MonitorConfig::default();
    match serde_json::to_string(&config) {
        Ok(json) => info!("Configuration: {}", json),
        Err(e) => warn!("Unable to serialize configuration: {}", e),
    }

    let store = EventStore::open(&config.db_path, &config.table_name)
        .with_context(|| format!("Failed to open {}", config.db_path.display()))?;
    let tls = TlsProber::new(config.target.connect_timeout())?;
    let meter = SpeedtestClient::new(config.speedtest.clone())?;

    let (trigger, shutdown) = shutdown::channel();
    shutdown::trigger_on_ctrl_c(trigger);

    let mut monitor = Monitor::new(&config, tls, meter, store, SystemClock, shutdown);
    let outcome = monitor.run().await;

    info!("Attempting graceful exit");
    let closed = monitor.into_sink().close();

    match outcome {
        Ok(()) => {
            closed.context("Failed to close event store")?;
            info!("Goodbye!");
            Ok(())
        }
        Err(e) => {
            error!("Something went wrong: {:#}", e);
            if let Err(close_err) = closed {
                error!("Failed to close event store: {}", close_err);
            }
            Err(e)
        }
    }
}
