// Copyright The Storeflow Authors
// SPDX-License-Identifier: Apache-2.0

//! Errors for the buffer-and-drain engine.
//!
//! Record-level processing failures are deliberately absent from this
//! enum: they are delivered asynchronously to the owning ingestion task
//! and its produced-record handle (see [`crate::task::ProcessError`]),
//! never surfaced from the engine's own API. The variants here cover
//! structural failures reported synchronously to the caller.

use std::io;

/// Errors reported synchronously by the buffer service.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// An operation requiring a started service was called before `start`.
    #[error("The buffer service has not been started")]
    NotStarted,

    /// `start` was called on a service that is already running.
    #[error("The buffer service is already started")]
    AlreadyStarted,

    /// An operation was called on a service that is stopping or stopped.
    #[error("The buffer service is stopped")]
    AlreadyStopped,

    /// A blocking operation was interrupted by shutdown. The record was
    /// not enqueued.
    #[error("The operation was interrupted by shutdown")]
    Cancelled,

    /// The record's accounted size exceeds the per-drainer queue capacity,
    /// so it could never be buffered.
    #[error("Record of {size} bytes exceeds the per-drainer capacity of {capacity} bytes")]
    OversizedRecord {
        /// Accounted size of the rejected record.
        size: usize,
        /// Byte capacity of a single drainer queue.
        capacity: usize,
    },

    /// The drain barrier exhausted its probe budget while records for the
    /// shard were still buffered or in flight.
    #[error("Shard {topic}-{partition} was still buffered after {attempts} drain probes")]
    DrainTimeout {
        /// Topic of the shard being drained.
        topic: String,
        /// Partition of the shard being drained.
        partition: u32,
        /// Number of probes performed before giving up.
        attempts: usize,
    },

    /// Spawning a drainer worker thread failed during `start`.
    #[error("Failed to spawn worker thread for drainer {drainer}: {source}")]
    ThreadSpawn {
        /// Index of the drainer whose worker could not be spawned.
        drainer: usize,
        /// The underlying OS error.
        #[source]
        source: io::Error,
    },

    /// One or more drainer workers were still running when the stop
    /// deadline expired.
    #[error("{pending} drainer worker(s) still running after the stop deadline")]
    StopTimeout {
        /// Number of workers that did not terminate in time.
        pending: usize,
    },

    /// The buffer configuration failed validation.
    #[error("Invalid buffer configuration: {0}")]
    Config(#[from] storeflow_config::error::Error),
}
