// Latency and bandwidth measurement against speedtest.net reference servers.

use anyhow::{Context, Result};
use futures::stream::StreamExt;
use serde::Deserialize;
use std::cmp::Ordering;
use std::fmt::Display;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::SpeedtestConfig;
use crate::error::ProbeError;
use crate::models::RawThroughput;
use crate::utils::bits_per_second;

/// One latency + download + upload run.
#[allow(async_fn_in_trait)]
pub trait BandwidthMeter {
    async fn measure(&mut self) -> Result<RawThroughput, ProbeError>;
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpeedtestServer {
    /// Upload endpoint, e.g. `https://host:8080/speedtest/upload.php`.
    pub url: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub sponsor: String,
    #[serde(default)]
    pub distance: Option<f64>,
}

impl SpeedtestServer {
    /// Directory that serves `latency.txt` and the `random*.jpg` payloads.
    pub fn base_url(&self) -> &str {
        self.url.rsplit_once('/').map(|(base, _)| base).unwrap_or(&self.url)
    }
}

pub struct SpeedtestClient {
    http: reqwest::Client,
    config: SpeedtestConfig,
}

impl SpeedtestClient {
    pub fn new(config: SpeedtestConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .user_agent(concat!("netpulse/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { http, config })
    }

    async fn fetch_servers(&self) -> Result<Vec<SpeedtestServer>, ProbeError> {
        let servers: Vec<SpeedtestServer> = self
            .http
            .get(&self.config.server_list_url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| measurement_error("server list", e))?
            .json()
            .await
            .map_err(|e| measurement_error("server list", e))?;
        Ok(nearest_candidates(servers, self.config.candidate_servers))
    }

    async fn best_server(&self, candidates: Vec<SpeedtestServer>) -> Option<(SpeedtestServer, f64)> {
        let mut best: Option<(SpeedtestServer, f64)> = None;
        for server in candidates {
            let Some(latency) = self.latency_ms(&server).await else {
                debug!("Skipping unresponsive server {}", server.url);
                continue;
            };
            if best.as_ref().map_or(true, |(_, current)| latency < *current) {
                best = Some((server, latency));
            }
        }
        best
    }

    /// Mean round trip over `latency_samples` requests, or `None` if any
    /// request fails or returns the wrong body.
    async fn latency_ms(&self, server: &SpeedtestServer) -> Option<f64> {
        let samples = self.config.latency_samples.max(1);
        let mut total = 0.0;
        for _ in 0..samples {
            let url = cache_busted(&format!("{}/latency.txt", server.base_url()));
            let start = Instant::now();
            let body = self.http.get(url).send().await.ok()?.text().await.ok()?;
            let elapsed = start.elapsed().as_secs_f64() * 1000.0;
            if body.trim() != "test=test" {
                return None;
            }
            total += elapsed;
        }
        Some((total / samples as f64 * 1000.0).round() / 1000.0)
    }

    async fn download_bps(&self, server: &SpeedtestServer) -> Result<f64, ProbeError> {
        let start = Instant::now();
        let mut bytes: u64 = 0;
        for size in &self.config.download_sizes {
            let url = cache_busted(&format!("{}/random{}x{}.jpg", server.base_url(), size, size));
            let response = self
                .http
                .get(url)
                .send()
                .await
                .and_then(|r| r.error_for_status())
                .map_err(|e| measurement_error("download", e))?;
            let mut body = response.bytes_stream();
            while let Some(chunk) = body.next().await {
                let chunk = chunk.map_err(|e| measurement_error("download", e))?;
                bytes += chunk.len() as u64;
            }
        }
        if bytes == 0 {
            return Err(ProbeError::ThroughputMeasurement("download returned no data".into()));
        }
        Ok(bits_per_second(bytes, start.elapsed().as_secs_f64()))
    }

    async fn upload_bps(&self, server: &SpeedtestServer) -> Result<f64, ProbeError> {
        let start = Instant::now();
        let mut bytes: u64 = 0;
        for &size in &self.config.upload_sizes {
            let payload = upload_payload(size);
            self.http
                .post(cache_busted(&server.url))
                .body(payload)
                .send()
                .await
                .and_then(|r| r.error_for_status())
                .map_err(|e| measurement_error("upload", e))?
                .bytes()
                .await
                .map_err(|e| measurement_error("upload", e))?;
            bytes += size as u64;
        }
        if bytes == 0 {
            return Err(ProbeError::ThroughputMeasurement("no upload sizes configured".into()));
        }
        Ok(bits_per_second(bytes, start.elapsed().as_secs_f64()))
    }
}

impl BandwidthMeter for SpeedtestClient {
    async fn measure(&mut self) -> Result<RawThroughput, ProbeError> {
        let candidates = self.fetch_servers().await?;
        if candidates.is_empty() {
            return Err(ProbeError::ThroughputMeasurement("server list was empty".into()));
        }

        let (server, ping_ms) = self.best_server(candidates).await.ok_or_else(|| {
            warn!("No speed test server answered the latency probe");
            ProbeError::ThroughputMeasurement("unable to connect to any test server".into())
        })?;
        info!("Speed test server: {} ({}) at {:.1} ms", server.sponsor, server.name, ping_ms);

        let download_bps = self.download_bps(&server).await?;
        let upload_bps = self.upload_bps(&server).await?;
        Ok(RawThroughput { ping_ms, download_bps, upload_bps })
    }
}

/// Keeps the closest `limit` servers. Entries without a distance sort last
/// and otherwise keep the provider's order.
fn nearest_candidates(mut servers: Vec<SpeedtestServer>, limit: usize) -> Vec<SpeedtestServer> {
    servers.sort_by(|a, b| match (a.distance, b.distance) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
    servers.truncate(limit.max(1));
    servers
}

fn cache_busted(url: &str) -> String {
    let sep = if url.contains('?') { '&' } else { '?' };
    format!("{}{}x={}", url, sep, rand::random::<u64>())
}

fn upload_payload(size: usize) -> Vec<u8> {
    const FILL: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    let mut payload = b"content1=".to_vec();
    payload.extend(FILL.iter().copied().cycle().take(size.saturating_sub(payload.len())));
    payload.truncate(size);
    payload
}

fn measurement_error(stage: &str, e: impl Display) -> ProbeError {
    ProbeError::ThroughputMeasurement(format!("{} failed: {}", stage, e))
}
