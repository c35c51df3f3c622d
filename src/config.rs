use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Compiled-in tunables for the probe loop. There is no runtime override;
/// `MonitorConfig::default()` is the configuration.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MonitorConfig {
    #[serde(default = "default_check_delay_secs")]
    pub check_delay_secs: u64,
    #[serde(default = "default_throughput_multiple")]
    pub throughput_multiple: u32,
    pub target: Target,
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default = "default_table_name")]
    pub table_name: String,
    pub speedtest: SpeedtestConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Target {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SpeedtestConfig {
    #[serde(default = "default_server_list_url")]
    pub server_list_url: String,
    #[serde(default = "default_candidate_servers")]
    pub candidate_servers: usize,
    #[serde(default = "default_latency_samples")]
    pub latency_samples: u32,
    #[serde(default = "default_download_sizes")]
    pub download_sizes: Vec<u32>,
    #[serde(default = "default_upload_sizes")]
    pub upload_sizes: Vec<usize>,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_check_delay_secs() -> u64 { 5 }
fn default_throughput_multiple() -> u32 { 10 }
fn default_db_path() -> PathBuf { PathBuf::from("speeds.db") }
fn default_table_name() -> String { "speed".into() }
fn default_connect_timeout_ms() -> u64 { 10_000 }

fn default_server_list_url() -> String {
    "https://www.speedtest.net/api/js/servers?engine=js&https_functional=true".into()
}
fn default_candidate_servers() -> usize { 5 }
fn default_latency_samples() -> u32 { 3 }
fn default_download_sizes() -> Vec<u32> { vec![350, 500, 750, 1000, 1500, 2000] }
fn default_upload_sizes() -> Vec<usize> { vec![262_144, 524_288, 1_048_576, 2_097_152] }
fn default_request_timeout_ms() -> u64 { 60_000 }

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            check_delay_secs: default_check_delay_secs(),
            throughput_multiple: default_throughput_multiple(),
            target: Target::default(),
            db_path: default_db_path(),
            table_name: default_table_name(),
            speedtest: SpeedtestConfig::default(),
        }
    }
}

impl Default for Target {
    fn default() -> Self {
        Self {
            host: "1.1.1.1".into(),
            port: 443,
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl Default for SpeedtestConfig {
    fn default() -> Self {
        Self {
            server_list_url: default_server_list_url(),
            candidate_servers: default_candidate_servers(),
            latency_samples: default_latency_samples(),
            download_sizes: default_download_sizes(),
            upload_sizes: default_upload_sizes(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl MonitorConfig {
    pub fn check_delay(&self) -> Duration {
        Duration::from_secs(self.check_delay_secs)
    }

    /// Successful-connectivity time that must accumulate before a throughput
    /// check is due.
    pub fn throughput_interval(&self) -> Duration {
        self.check_delay() * self.throughput_multiple
    }
}

impl Target {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl SpeedtestConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throughput_interval_is_ten_check_delays() {
        let config = MonitorConfig::default();
        assert_eq!(config.check_delay(), Duration::from_secs(5));
        assert_eq!(config.throughput_interval(), Duration::from_secs(50));
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let json = r#"{
            "target": { "host": "example.com", "port": 8443 },
            "speedtest": {}
        }"#;
        let config: MonitorConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.target.host, "example.com");
        assert_eq!(config.target.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.table_name, "speed");
        assert_eq!(config.speedtest.latency_samples, 3);
    }
}
