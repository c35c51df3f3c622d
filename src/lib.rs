//! NetPulse probe.
//!
//! Checks that a TLS endpoint is reachable with a valid certificate, measures
//! throughput at a coarser interval, and appends every observation to an
//! SQLite event log while keeping running averages for a live status line.

pub mod config;
pub mod connectivity;
pub mod engine;
pub mod error;
pub mod models;
pub mod report;
pub mod scheduler;
pub mod shutdown;
pub mod store;
pub mod throughput;
pub mod utils;

pub use config::MonitorConfig;
pub use engine::{Clock, Monitor, SystemClock};
pub use error::{ProbeError, StoreError};
pub use models::{MonitorStats, Observation, ProbeKind, ThroughputSample};
pub use store::{EventSink, EventStore};
