// SPDX-License-Identifier: Apache-2.0

//! Common testing utilities for the engine.
//!
//! This module provides shared constructs used across buffer service and
//! drainer tests:
//!
//! - [`RecordingTask`], an ingestion task that records every invocation
//!   and can inject per-offset failures and fixed processing delays
//! - [`GatedTask`], an ingestion task whose `process` blocks until a gate
//!   is opened, for backpressure and barrier scenarios
//! - [`CompletionProbe`], a produced-record handle capturing its
//!   completion outcome
//! - [`test_record`] / [`sized_record`] constructors

use crate::record::StoreRecord;
use crate::task::{IngestionTask, ProcessError, ProducedRecord};
use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use storeflow_telemetry::ShardKey;

/// Builds a record with a small fixed payload.
#[must_use]
pub fn test_record(topic: &str, partition: u32, offset: i64) -> StoreRecord {
    sized_record(topic, partition, offset, 16)
}

/// Builds a record whose value payload has exactly `value_len` bytes.
#[must_use]
pub fn sized_record(topic: &str, partition: u32, offset: i64, value_len: usize) -> StoreRecord {
    StoreRecord::new(
        topic,
        partition,
        offset,
        Some(Bytes::from(format!("key-{offset}").into_bytes())),
        Some(Bytes::from(vec![0u8; value_len])),
    )
}

/// An ingestion task that records every `process` invocation in order and
/// optionally sleeps or fails on selected offsets.
#[derive(Default)]
pub struct RecordingTask {
    processed: Mutex<Vec<(ShardKey, i64)>>,
    delay: Option<Duration>,
    fail_offsets: HashSet<i64>,
    last_failure: Mutex<Option<Arc<ProcessError>>>,
    failure_count: AtomicUsize,
}

impl RecordingTask {
    /// A task that records invocations and always succeeds immediately.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleeps for `delay` inside every `process` call.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fails `process` for records with any of the given offsets.
    #[must_use]
    pub fn failing_on(mut self, offsets: impl IntoIterator<Item = i64>) -> Self {
        self.fail_offsets = offsets.into_iter().collect();
        self
    }

    /// Every processed (shard, offset) pair, in processing order.
    #[must_use]
    pub fn processed(&self) -> Vec<(ShardKey, i64)> {
        self.processed.lock().clone()
    }

    /// Offsets processed for one shard, in processing order.
    #[must_use]
    pub fn offsets_for(&self, shard: &ShardKey) -> Vec<i64> {
        self.processed
            .lock()
            .iter()
            .filter(|(s, _)| s == shard)
            .map(|(_, offset)| *offset)
            .collect()
    }

    /// Total number of `process` invocations so far.
    #[must_use]
    pub fn processed_count(&self) -> usize {
        self.processed.lock().len()
    }

    /// The most recent failure reported through `on_drain_failure`.
    #[must_use]
    pub fn last_failure(&self) -> Option<Arc<ProcessError>> {
        self.last_failure.lock().clone()
    }

    /// Number of `on_drain_failure` notifications received.
    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.failure_count.load(Ordering::Acquire)
    }
}

impl IngestionTask for RecordingTask {
    fn process(&self, record: &StoreRecord) -> Result<(), ProcessError> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        self.processed.lock().push((record.shard(), record.offset()));
        if self.fail_offsets.contains(&record.offset()) {
            return Err(ProcessError::Validation(format!(
                "injected failure at offset {}",
                record.offset()
            )));
        }
        Ok(())
    }

    fn on_drain_failure(&self, error: Arc<ProcessError>) {
        _ = self.failure_count.fetch_add(1, Ordering::AcqRel);
        *self.last_failure.lock() = Some(error);
    }
}

/// An ingestion task whose `process` blocks until the gate is opened.
///
/// Starts closed. Opening the gate releases all blocked and future calls;
/// the gate can be closed again to hold the downstream shut.
#[derive(Default)]
pub struct GatedTask {
    open: Mutex<bool>,
    opened: Condvar,
    processed_count: AtomicUsize,
}

impl GatedTask {
    /// A task with a closed gate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens the gate, releasing every blocked `process` call.
    pub fn open(&self) {
        let mut open = self.open.lock();
        *open = true;
        _ = self.opened.notify_all();
    }

    /// Closes the gate again; subsequent `process` calls block.
    pub fn close(&self) {
        *self.open.lock() = false;
    }

    /// Number of `process` calls that have passed the gate.
    #[must_use]
    pub fn processed_count(&self) -> usize {
        self.processed_count.load(Ordering::Acquire)
    }
}

impl IngestionTask for GatedTask {
    fn process(&self, _record: &StoreRecord) -> Result<(), ProcessError> {
        let mut open = self.open.lock();
        while !*open {
            self.opened.wait(&mut open);
        }
        drop(open);
        _ = self.processed_count.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn on_drain_failure(&self, _error: Arc<ProcessError>) {}
}

/// A produced-record handle capturing how it was completed.
#[derive(Default)]
pub struct CompletionProbe {
    outcome: Mutex<Option<Option<Arc<ProcessError>>>>,
    calls: AtomicUsize,
}

impl CompletionProbe {
    /// An uncompleted probe.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of `complete` calls observed. Must end up at exactly one
    /// for every record carrying the handle.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::Acquire)
    }

    /// The completion outcome: `None` while incomplete, `Some(None)` for
    /// success, `Some(Some(error))` for failure.
    #[must_use]
    pub fn outcome(&self) -> Option<Option<Arc<ProcessError>>> {
        self.outcome.lock().clone()
    }

    /// True once completed successfully.
    #[must_use]
    pub fn completed_ok(&self) -> bool {
        matches!(self.outcome(), Some(None))
    }

    /// The failure the probe was completed with, if any.
    #[must_use]
    pub fn completed_err(&self) -> Option<Arc<ProcessError>> {
        self.outcome().flatten()
    }
}

impl ProducedRecord for CompletionProbe {
    fn complete(&self, error: Option<Arc<ProcessError>>) {
        _ = self.calls.fetch_add(1, Ordering::AcqRel);
        *self.outcome.lock() = Some(error);
    }
}
