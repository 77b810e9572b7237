// Copyright The Storeflow Authors
// SPDX-License-Identifier: Apache-2.0

//! Configuration model for the storeflow ingestion buffer.
//!
//! The buffer sits between the message-log poller and the per-partition
//! storage writers. Its tunables fall into three groups:
//! - sizing of the drainer pool and its byte-bounded queues,
//! - the drain-barrier probe policy,
//! - diagnostic and shutdown deadlines.
//!
//! All fields carry serde defaults so an empty document deserializes into
//! the production configuration. Byte sizes accept either raw numbers or
//! unit strings ("32 MiB"), durations accept humantime syntax ("50ms",
//! "10s").

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub mod byte_units;
pub mod error;

/// Probe policy for the drain barrier.
///
/// Kept separate from [`BufferConfig`] so callers (and tests) can run a
/// barrier with a custom budget without touching the service-wide
/// configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DrainPolicy {
    /// Maximum number of `contains` probes before the barrier gives up.
    #[serde(default = "default_drain_retry_budget")]
    pub retry_budget: usize,

    /// Delay between consecutive probes.
    #[serde(default = "default_drain_sleep_interval", with = "humantime_serde")]
    pub sleep_interval: Duration,
}

impl Default for DrainPolicy {
    fn default() -> Self {
        Self {
            retry_budget: default_drain_retry_budget(),
            sleep_interval: default_drain_sleep_interval(),
        }
    }
}

impl DrainPolicy {
    /// A policy with the given budget and no sleep between probes.
    /// Intended for tests that need a fast-failing barrier.
    #[must_use]
    pub fn immediate(retry_budget: usize) -> Self {
        Self {
            retry_budget,
            sleep_interval: Duration::ZERO,
        }
    }
}

/// Configuration of the buffer service: drainer pool sizing, backpressure
/// accounting, barrier policy, and diagnostic thresholds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct BufferConfig {
    /// Number of parallel drainer workers; also the modulus of the
    /// topic/partition hash routing.
    #[serde(default = "default_drainer_count")]
    pub drainer_count: usize,

    /// Hard byte ceiling for each drainer's queue.
    #[serde(
        default = "default_capacity_per_drainer",
        deserialize_with = "byte_units::deserialize"
    )]
    pub capacity_per_drainer: u64,

    /// Producer wake-up granularity: a blocked producer is woken once at
    /// least this much queue capacity is free.
    #[serde(default = "default_notify_delta", deserialize_with = "byte_units::deserialize")]
    pub notify_delta: u64,

    /// Drain-barrier probe policy.
    #[serde(default)]
    pub drain: DrainPolicy,

    /// Fraction of queue capacity above which a drainer is reported as
    /// slow by the diagnostic burst.
    #[serde(default = "default_slow_drainer_threshold")]
    pub slow_drainer_threshold: f64,

    /// Maximum time `stop` waits for the drainer workers to terminate.
    #[serde(default = "default_stop_timeout", with = "humantime_serde")]
    pub stop_timeout: Duration,

    /// Constant added to each record's accounted size to cover struct and
    /// queue-node overhead.
    #[serde(default = "default_record_overhead_bytes")]
    pub record_overhead_bytes: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            drainer_count: default_drainer_count(),
            capacity_per_drainer: default_capacity_per_drainer(),
            notify_delta: default_notify_delta(),
            drain: DrainPolicy::default(),
            slow_drainer_threshold: default_slow_drainer_threshold(),
            stop_timeout: default_stop_timeout(),
            record_overhead_bytes: default_record_overhead_bytes(),
        }
    }
}

impl BufferConfig {
    /// Checks the configuration for values that would render the buffer
    /// inoperable.
    ///
    /// # Errors
    ///
    /// Returns the first violation found; see [`error::Error`] for the
    /// individual rules.
    pub fn validate(&self) -> Result<(), error::Error> {
        if self.drainer_count == 0 {
            return Err(error::Error::InvalidDrainerCount {
                value: self.drainer_count,
            });
        }
        if self.capacity_per_drainer == 0 {
            return Err(error::Error::InvalidCapacity {
                value: self.capacity_per_drainer,
            });
        }
        if self.notify_delta > self.capacity_per_drainer {
            return Err(error::Error::NotifyDeltaExceedsCapacity {
                notify_delta: self.notify_delta,
                capacity: self.capacity_per_drainer,
            });
        }
        if self.drain.retry_budget == 0 {
            return Err(error::Error::InvalidDrainRetryBudget {
                value: self.drain.retry_budget,
            });
        }
        if !(self.slow_drainer_threshold > 0.0 && self.slow_drainer_threshold <= 1.0) {
            return Err(error::Error::InvalidSlowDrainerThreshold {
                value: self.slow_drainer_threshold,
            });
        }
        Ok(())
    }
}

const fn default_drainer_count() -> usize {
    8
}

const fn default_capacity_per_drainer() -> u64 {
    32 * 1024 * 1024
}

const fn default_notify_delta() -> u64 {
    1024 * 1024
}

const fn default_drain_retry_budget() -> usize {
    1000
}

const fn default_drain_sleep_interval() -> Duration {
    Duration::from_millis(50)
}

const fn default_slow_drainer_threshold() -> f64 {
    0.8
}

const fn default_stop_timeout() -> Duration {
    Duration::from_secs(10)
}

const fn default_record_overhead_bytes() -> usize {
    256
}
