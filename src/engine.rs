use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::io::{self, Write};
use std::time::Duration;
use tracing::{info, warn};

use crate::config::{MonitorConfig, Target};
use crate::connectivity::TlsHandshake;
use crate::error::ProbeError;
use crate::models::{MonitorStats, Observation, ThroughputOutcome, ThroughputSample};
use crate::report::StatusLine;
use crate::scheduler::{Directive, Scheduler};
use crate::shutdown::Shutdown;
use crate::store::EventSink;
use crate::throughput::BandwidthMeter;

/// Source of timestamps and delays, swappable so the loop can be driven
/// without real sleeps.
#[allow(async_fn_in_trait)]
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
    async fn sleep(&mut self, duration: Duration);
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&mut self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// The probe loop. Owns all mutable state; nothing else touches the
/// counters or the sink while it runs.
pub struct Monitor<T, B, S, C> {
    target: Target,
    tls: T,
    meter: B,
    sink: S,
    clock: C,
    reporter: StatusLine<Box<dyn Write>>,
    scheduler: Scheduler,
    stats: MonitorStats,
    shutdown: Shutdown,
}

impl<T, B, S, C> Monitor<T, B, S, C>
where
    T: TlsHandshake,
    B: BandwidthMeter,
    S: EventSink,
    C: Clock,
{
    pub fn new(config: &MonitorConfig, tls: T, meter: B, sink: S, clock: C, shutdown: Shutdown) -> Self {
        Self {
            target: config.target.clone(),
            tls,
            meter,
            sink,
            clock,
            reporter: StatusLine::new(Box::new(io::stdout())),
            scheduler: Scheduler::new(config.check_delay(), config.throughput_interval()),
            stats: MonitorStats::default(),
            shutdown,
        }
    }

    pub fn with_status_output(mut self, out: impl Write + 'static) -> Self {
        self.reporter = StatusLine::new(Box::new(out));
        self
    }

    pub fn stats(&self) -> &MonitorStats {
        &self.stats
    }

    /// Hands the sink back so the caller can close it exactly once.
    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Runs until shutdown is requested (`Ok`) or a write to the event sink
    /// fails (`Err`). Probe failures never end the loop.
    pub async fn run(&mut self) -> Result<()> {
        info!(
            "Probing {}:{} every {:?}, throughput every {:?} of connectivity",
            self.target.host,
            self.target.port,
            self.scheduler.check_delay(),
            self.scheduler.throughput_interval(),
        );

        let mut next = Directive::BeginCycle;
        loop {
            next = match next {
                Directive::BeginCycle => {
                    if self.shutdown.is_requested() {
                        break;
                    }
                    self.reporter
                        .render(&self.stats)
                        .context("Failed to render status line")?;
                    Directive::CheckConnectivity
                }
                Directive::CheckConnectivity => {
                    let connected = self.check_connectivity().await?;
                    self.scheduler.on_connectivity(connected)
                }
                Directive::RetryConnectivity => {
                    if self.pause().await {
                        break;
                    }
                    Directive::CheckConnectivity
                }
                Directive::MeasureThroughput => {
                    let measured = self.measure_throughput().await?;
                    self.scheduler.on_throughput(measured)
                }
                Directive::EndCycle => {
                    if self.pause().await {
                        break;
                    }
                    Directive::BeginCycle
                }
            };
        }

        self.reporter.finish().context("Failed to render status line")?;
        info!(
            "Monitor stopped: {} events written, {} problems",
            self.stats.total_events_written, self.stats.problem_count
        );
        Ok(())
    }

    async fn check_connectivity(&mut self) -> Result<bool> {
        let outcome = self.tls.handshake(&self.target.host, self.target.port).await;
        let event = Observation::connectivity(&self.target.host, self.clock.now(), &outcome);
        self.record(&event)?;

        match &outcome {
            Ok(_) => Ok(true),
            Err(e) => {
                match e {
                    ProbeError::CertificateVerification { .. } => {
                        warn!("Certificate verification error for {}", self.target.host)
                    }
                    ProbeError::ConnectionTimeout => warn!("Connection timeout to {}", self.target.host),
                    other => warn!("Connection to {} failed: {}", self.target.host, other),
                }
                self.stats.problem_count += 1;
                Ok(false)
            }
        }
    }

    async fn measure_throughput(&mut self) -> Result<bool> {
        let outcome: ThroughputOutcome = self.meter.measure().await.map(ThroughputSample::from_raw);
        let event = Observation::throughput(self.clock.now(), &outcome);
        self.record(&event)?;

        match outcome {
            Ok(sample) => {
                self.stats.record_sample(sample);
                Ok(true)
            }
            Err(e) => {
                warn!("Problem with speed test: {}", e);
                self.stats.problem_count += 1;
                Ok(false)
            }
        }
    }

    /// Sleeps one check delay unless shutdown arrives first. Returns whether
    /// the loop should stop.
    async fn pause(&mut self) -> bool {
        let delay = self.scheduler.check_delay();
        tokio::select! {
            _ = self.clock.sleep(delay) => {}
            _ = self.shutdown.requested() => {}
        }
        self.shutdown.is_requested()
    }

    fn record(&mut self, event: &Observation) -> Result<()> {
        self.sink
            .append(event)
            .with_context(|| format!("Failed to record {} event", event.kind.as_str()))?;
        self.stats.total_events_written += 1;
        Ok(())
    }
}
