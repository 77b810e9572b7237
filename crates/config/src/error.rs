// Copyright The Storeflow Authors
// SPDX-License-Identifier: Apache-2.0

//! Errors for the config crate.

/// Errors that can occur while validating a buffer configuration.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// The drainer pool must contain at least one worker.
    #[error("drainer_count must be >= 1, got {value}")]
    InvalidDrainerCount {
        /// The rejected value.
        value: usize,
    },

    /// Each drainer queue needs a non-zero byte capacity.
    #[error("capacity_per_drainer must be >= 1 byte, got {value}")]
    InvalidCapacity {
        /// The rejected value.
        value: u64,
    },

    /// The producer wake-up delta cannot exceed the queue capacity; blocked
    /// producers would never be woken.
    #[error("notify_delta ({notify_delta}) must not exceed capacity_per_drainer ({capacity})")]
    NotifyDeltaExceedsCapacity {
        /// The configured delta.
        notify_delta: u64,
        /// The configured per-drainer capacity.
        capacity: u64,
    },

    /// The drain barrier needs at least one probe attempt.
    #[error("drain.retry_budget must be >= 1, got {value}")]
    InvalidDrainRetryBudget {
        /// The rejected value.
        value: usize,
    },

    /// The slow-drainer alert threshold is a fraction of the queue
    /// capacity and must lie in (0, 1].
    #[error("slow_drainer_threshold must be in (0, 1], got {value}")]
    InvalidSlowDrainerThreshold {
        /// The rejected value.
        value: f64,
    },
}
