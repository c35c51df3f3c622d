//! Decides which probe runs next.
//!
//! The scheduler never sleeps or touches the network. The monitor feeds it
//! each probe result and executes the [`Directive`] it returns.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    SeekingConnectivity,
    ThroughputDue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    /// Render the summary, then check connectivity.
    BeginCycle,
    CheckConnectivity,
    /// Connectivity failed: wait one check delay and try again.
    RetryConnectivity,
    MeasureThroughput,
    /// Wait one check delay, then begin a new cycle.
    EndCycle,
}

#[derive(Debug, Clone)]
pub struct Scheduler {
    check_delay: Duration,
    throughput_interval: Duration,
    elapsed: Duration,
    phase: Phase,
}

impl Scheduler {
    /// Starts with the elapsed counter already at the interval so the first
    /// successful connectivity check is followed by a throughput check.
    pub fn new(check_delay: Duration, throughput_interval: Duration) -> Self {
        Self {
            check_delay,
            throughput_interval,
            elapsed: throughput_interval,
            phase: Phase::SeekingConnectivity,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn check_delay(&self) -> Duration {
        self.check_delay
    }

    pub fn throughput_interval(&self) -> Duration {
        self.throughput_interval
    }

    pub fn on_connectivity(&mut self, connected: bool) -> Directive {
        if !connected {
            return Directive::RetryConnectivity;
        }
        self.elapsed += self.check_delay;
        if self.elapsed >= self.throughput_interval {
            self.phase = Phase::ThroughputDue;
            Directive::MeasureThroughput
        } else {
            Directive::EndCycle
        }
    }

    /// A failed measurement keeps the elapsed counter where it is, so the
    /// next successful connectivity check makes throughput due again.
    pub fn on_throughput(&mut self, measured: bool) -> Directive {
        self.phase = Phase::SeekingConnectivity;
        if measured {
            self.elapsed = Duration::ZERO;
            Directive::EndCycle
        } else {
            Directive::BeginCycle
        }
    }
}
