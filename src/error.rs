use thiserror::Error;

use crate::models::PeerCertificate;

/// Probe failures. None of these stop the monitor: each one becomes an
/// event and bumps the problem counter.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProbeError {
    /// The handshake was rejected by certificate validation. `certificate`
    /// is `None` when the peer certificate was never seen or could not be
    /// parsed.
    #[error("certificate verification")]
    CertificateVerification { certificate: Option<PeerCertificate> },

    #[error("timeout")]
    ConnectionTimeout,

    #[error("{0}")]
    OtherConnection(String),

    #[error("{0}")]
    ThroughputMeasurement(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("invalid table name {0:?}")]
    InvalidTableName(String),

    #[error("csv export failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
