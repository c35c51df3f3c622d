use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProbeError;

pub const OUTCOME_CONNECTED: &str = "successful connection";
pub const OUTCOME_CERT_ERROR: &str = "certificate verification error";
pub const OUTCOME_NO_CONNECTION: &str = "no connection";
pub const OUTCOME_OTHER_ERROR: &str = "other error with connection";
pub const OUTCOME_SPEED_OK: &str = "successful speed test";
pub const OUTCOME_SPEED_ERROR: &str = "speed test error";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProbeKind {
    Connectivity,
    Throughput,
}

impl ProbeKind {
    /// Value of the `TYPE` column.
    pub fn as_str(self) -> &'static str {
        match self {
            ProbeKind::Connectivity => "status",
            ProbeKind::Throughput => "speed",
        }
    }
}

/// Common names pulled from the peer's end-entity certificate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerCertificate {
    pub subject: String,
    pub issuer: String,
}

pub type ConnectivityOutcome = Result<PeerCertificate, ProbeError>;

/// Raw figures reported by a bandwidth meter, rates in bits per second.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawThroughput {
    pub ping_ms: f64,
    pub download_bps: f64,
    pub upload_bps: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ThroughputSample {
    pub ping_ms: f64,
    pub download_mbps: f64,
    pub upload_mbps: f64,
}

pub type ThroughputOutcome = Result<ThroughputSample, ProbeError>;

impl ThroughputSample {
    /// Recorded in place of real figures when a measurement fails.
    pub const FAILED: ThroughputSample = ThroughputSample {
        ping_ms: -1.0,
        download_mbps: 0.0,
        upload_mbps: 0.0,
    };

    pub fn from_raw(raw: RawThroughput) -> Self {
        Self {
            ping_ms: raw.ping_ms,
            download_mbps: crate::utils::megabits(raw.download_bps),
            upload_mbps: crate::utils::megabits(raw.upload_bps),
        }
    }
}

/// One row of the event log. Built once and never changed after it is
/// handed to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub kind: ProbeKind,
    pub timestamp: DateTime<Utc>,
    pub outcome: String,
    pub target: String,
    pub certificate_subject: String,
    pub certificate_issuer: String,
    pub error_detail: String,
    pub metrics: Option<ThroughputSample>,
}

impl Observation {
    pub fn connectivity(target: &str, timestamp: DateTime<Utc>, outcome: &ConnectivityOutcome) -> Self {
        let (label, certificate, error_detail) = match outcome {
            Ok(cert) => (OUTCOME_CONNECTED, Some(cert), String::new()),
            Err(err @ ProbeError::CertificateVerification { certificate }) => {
                (OUTCOME_CERT_ERROR, certificate.as_ref(), err.to_string())
            }
            Err(err @ ProbeError::ConnectionTimeout) => (OUTCOME_NO_CONNECTION, None, err.to_string()),
            Err(err) => (OUTCOME_OTHER_ERROR, None, err.to_string()),
        };
        Self {
            kind: ProbeKind::Connectivity,
            timestamp,
            outcome: label.into(),
            target: target.to_string(),
            certificate_subject: certificate.map(|c| c.subject.clone()).unwrap_or_default(),
            certificate_issuer: certificate.map(|c| c.issuer.clone()).unwrap_or_default(),
            error_detail,
            metrics: None,
        }
    }

    pub fn throughput(timestamp: DateTime<Utc>, outcome: &ThroughputOutcome) -> Self {
        let (label, metrics, error_detail) = match outcome {
            Ok(sample) => (OUTCOME_SPEED_OK, *sample, String::new()),
            Err(err) => (OUTCOME_SPEED_ERROR, ThroughputSample::FAILED, err.to_string()),
        };
        Self {
            kind: ProbeKind::Throughput,
            timestamp,
            outcome: label.into(),
            target: String::new(),
            certificate_subject: String::new(),
            certificate_issuer: String::new(),
            error_detail,
            metrics: Some(metrics),
        }
    }
}

/// Running ½-weight smoothing. A zero average is treated as "no samples
/// yet" and is replaced outright by the next value.
pub fn smooth(average: f64, last: f64) -> f64 {
    if average != 0.0 {
        (last + average) / 2.0
    } else {
        last
    }
}

/// Counters shown on the status line. Lives for the whole process and is
/// never persisted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MonitorStats {
    pub total_events_written: u64,
    pub problem_count: u64,
    pub last: ThroughputSample,
    pub average: ThroughputSample,
}

impl MonitorStats {
    pub fn record_sample(&mut self, sample: ThroughputSample) {
        self.last = sample;
        self.average = ThroughputSample {
            ping_ms: smooth(self.average.ping_ms, sample.ping_ms),
            download_mbps: smooth(self.average.download_mbps, sample.download_mbps),
            upload_mbps: smooth(self.average.upload_mbps, sample.upload_mbps),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(v: f64) -> ThroughputSample {
        ThroughputSample { ping_ms: v, download_mbps: v, upload_mbps: v }
    }

    #[test]
    fn smoothing_weights_recent_samples() {
        let mut stats = MonitorStats::default();
        stats.record_sample(sample(10.0));
        assert_eq!(stats.average.download_mbps, 10.0);
        stats.record_sample(sample(20.0));
        stats.record_sample(sample(40.0));
        // (((10 + 20) / 2) + 40) / 2, not the arithmetic mean
        assert_eq!(stats.average.download_mbps, 27.5);
        assert_eq!(stats.average.ping_ms, 27.5);
        assert_eq!(stats.last, sample(40.0));
    }

    #[test]
    fn zero_average_is_replaced_not_halved() {
        assert_eq!(smooth(0.0, 8.0), 8.0);
        assert_eq!(smooth(4.0, 8.0), 6.0);
    }

    #[test]
    fn cert_failure_without_certificate_has_blank_names() {
        let outcome: ConnectivityOutcome =
            Err(ProbeError::CertificateVerification { certificate: None });
        let obs = Observation::connectivity("1.1.1.1", Utc::now(), &outcome);
        assert_eq!(obs.outcome, OUTCOME_CERT_ERROR);
        assert_eq!(obs.error_detail, "certificate verification");
        assert!(obs.certificate_subject.is_empty());
        assert!(obs.certificate_issuer.is_empty());
    }

    #[test]
    fn cert_failure_keeps_captured_names() {
        let outcome: ConnectivityOutcome = Err(ProbeError::CertificateVerification {
            certificate: Some(PeerCertificate {
                subject: "self-signed.test".into(),
                issuer: "self-signed.test".into(),
            }),
        });
        let obs = Observation::connectivity("self-signed.test", Utc::now(), &outcome);
        assert_eq!(obs.certificate_subject, "self-signed.test");
        assert_eq!(obs.error_detail, "certificate verification");
    }

    #[test]
    fn timeout_and_other_errors_are_labelled() {
        let timeout = Observation::connectivity("h", Utc::now(), &Err(ProbeError::ConnectionTimeout));
        assert_eq!(timeout.outcome, OUTCOME_NO_CONNECTION);
        assert_eq!(timeout.error_detail, "timeout");

        let other = Observation::connectivity(
            "h",
            Utc::now(),
            &Err(ProbeError::OtherConnection("connection refused".into())),
        );
        assert_eq!(other.outcome, OUTCOME_OTHER_ERROR);
        assert_eq!(other.error_detail, "connection refused");
    }

    #[test]
    fn failed_throughput_uses_sentinels() {
        let obs = Observation::throughput(
            Utc::now(),
            &Err(ProbeError::ThroughputMeasurement("no servers".into())),
        );
        assert_eq!(obs.kind, ProbeKind::Throughput);
        assert_eq!(obs.metrics, Some(ThroughputSample::FAILED));
        assert_eq!(obs.error_detail, "no servers");
        assert!(obs.target.is_empty());
    }

    #[test]
    fn raw_rates_become_rounded_megabits() {
        let sample = ThroughputSample::from_raw(RawThroughput {
            ping_ms: 12.5,
            download_bps: 93_456_789.0,
            upload_bps: 10_004_999.0,
        });
        assert_eq!(sample.download_mbps, 93.46);
        assert_eq!(sample.upload_mbps, 10.0);
        assert_eq!(sample.ping_ms, 12.5);
    }
}
