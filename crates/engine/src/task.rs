// Copyright The Storeflow Authors
// SPDX-License-Identifier: Apache-2.0

//! Collaborator contracts consumed by the drainer workers.
//!
//! The engine does not decode, validate, or persist anything itself; it
//! routes records to the ingestion task that owns their subscription and
//! signals the outcome through the optional produced-record handle. Both
//! collaborators live on the far side of a thread boundary, so the traits
//! are `Send + Sync` and the error type is shared through an `Arc`.

use crate::record::StoreRecord;
use std::sync::Arc;

/// High-level classification for record processing failures to aid
/// troubleshooting.
#[derive(thiserror::Error, Debug)]
pub enum ProcessError {
    /// The record envelope or payload could not be decoded.
    #[error("Record decoding failed: {0}")]
    Decode(String),

    /// Data-integrity validation rejected the record (e.g. a sequence or
    /// checksum mismatch within its partition).
    #[error("Data integrity validation failed: {0}")]
    Validation(String),

    /// The write to the local store failed.
    #[error("Storage write failed: {0}")]
    Storage(String),

    /// Catch-all for processing failures that do not fit other categories.
    #[error("{0}")]
    Other(String),
}

/// The per-subscription actor that owns decoding, validation, and storage
/// writes for the records it subscribed to.
///
/// `process` is invoked serially for all records sharing a (topic,
/// partition) shard; that ordering is the engine's load-bearing guarantee
/// and implementations may rely on it. The engine never retries on behalf
/// of the task.
pub trait IngestionTask: Send + Sync {
    /// Processes one buffered record. Synchronous; may take arbitrary
    /// time.
    ///
    /// # Errors
    ///
    /// A returned [`ProcessError`] is treated as a per-record failure: the
    /// drainer reports it through [`IngestionTask::on_drain_failure`] and
    /// the record's produced handle, then continues with the next record.
    fn process(&self, record: &StoreRecord) -> Result<(), ProcessError>;

    /// One-way notification that a record owned by this task failed on a
    /// drainer thread.
    ///
    /// Called once per failed record, from the drainer's thread.
    /// Overwriting semantics are expected: the task retains (at least) the
    /// most recent failure and surfaces it on its own schedule.
    fn on_drain_failure(&self, error: Arc<ProcessError>);
}

/// Completion handle for the downstream effect of processing one record.
///
/// The engine calls [`complete`](Self::complete) exactly once per record
/// that carries a handle: with `None` when `process` returned normally,
/// with the failure otherwise.
pub trait ProducedRecord: Send + Sync {
    /// Single-shot completion signal.
    fn complete(&self, error: Option<Arc<ProcessError>>);
}
