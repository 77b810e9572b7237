// Copyright The Storeflow Authors
// SPDX-License-Identifier: Apache-2.0

//! The drainer: a single long-lived worker that owns one byte-bounded
//! queue and feeds the ingestion task.
//!
//! Failure policy: record processing failures are per-record, not
//! per-drainer. One poisoned record must not take down the other shards
//! that happen to hash to the same drainer, so `Err` returns from the task
//! are reported and the loop continues. A panic unwinding out of the task
//! indicates corrupted process state and must not be swallowed: the worker
//! logs it and terminates without respawn; detecting the dead shard is
//! left to supervision.

use crate::record::StoreRecord;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Instant;
use storeflow_channel::bounded::ByteBoundedQueue;
use storeflow_channel::error::RecvError;
use storeflow_telemetry::tracker::DrainTimeTracker;
use tracing::{debug, error, warn};

/// Terminal observation of a drainer worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainerState {
    /// The worker loop is running (or has not been spawned yet).
    Running,
    /// The worker observed its stop flag and exited cleanly.
    StoppedNormal,
    /// The worker was woken out of a blocking take by queue closure.
    StoppedCancelled,
    /// The worker terminated because the task panicked; its shard set is
    /// dead until the process restarts.
    StoppedFatal,
}

const STATE_RUNNING: u8 = 0;
const STATE_STOPPED_NORMAL: u8 = 1;
const STATE_STOPPED_CANCELLED: u8 = 2;
const STATE_STOPPED_FATAL: u8 = 3;

/// A single worker draining one byte-bounded queue of buffered records.
pub struct Drainer {
    index: usize,
    queue: Arc<ByteBoundedQueue<StoreRecord>>,
    running: AtomicBool,
    state: AtomicU8,
    times: DrainTimeTracker,
}

impl Drainer {
    pub(crate) fn new(index: usize, capacity_bytes: usize, notify_delta: usize) -> Self {
        Drainer {
            index,
            queue: Arc::new(ByteBoundedQueue::new(capacity_bytes, notify_delta)),
            running: AtomicBool::new(true),
            state: AtomicU8::new(STATE_RUNNING),
            times: DrainTimeTracker::new(),
        }
    }

    /// Index of this drainer in the pool.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// The queue owned by this drainer.
    #[must_use]
    pub fn queue(&self) -> &ByteBoundedQueue<StoreRecord> {
        &self.queue
    }

    /// Per-shard cumulative processing-time counters.
    #[must_use]
    pub fn times(&self) -> &DrainTimeTracker {
        &self.times
    }

    /// Terminal state of the worker, `Running` while it is alive.
    #[must_use]
    pub fn state(&self) -> DrainerState {
        match self.state.load(Ordering::Acquire) {
            STATE_STOPPED_NORMAL => DrainerState::StoppedNormal,
            STATE_STOPPED_CANCELLED => DrainerState::StoppedCancelled,
            STATE_STOPPED_FATAL => DrainerState::StoppedFatal,
            _ => DrainerState::Running,
        }
    }

    /// Asks the worker loop to exit after the record it is currently
    /// processing. Takes effect immediately for a worker blocked on an
    /// empty queue once the queue is closed.
    pub(crate) fn signal_stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// The worker loop. Runs on a dedicated thread until stopped, the
    /// queue is closed, or the task panics.
    pub(crate) fn run(&self) {
        debug!(drainer = self.index, "drainer worker started");
        while self.running.load(Ordering::Acquire) {
            let record = match self.queue.take() {
                Ok(record) => record,
                Err(RecvError::Closed | RecvError::Empty) => {
                    debug!(drainer = self.index, "drainer queue closed, worker exiting");
                    self.state
                        .store(STATE_STOPPED_CANCELLED, Ordering::Release);
                    return;
                }
            };
            let fatal = self.drain_one(&record);
            self.queue.release();
            if fatal {
                self.state.store(STATE_STOPPED_FATAL, Ordering::Release);
                return;
            }
        }
        debug!(drainer = self.index, "drainer worker stopped");
        self.state.store(STATE_STOPPED_NORMAL, Ordering::Release);
    }

    /// Processes one record. Returns true when the failure is fatal and
    /// the worker must terminate.
    fn drain_one(&self, record: &StoreRecord) -> bool {
        let Some(task) = record.task() else {
            // Only probe records lack a task, and probes are never
            // enqueued; skip rather than poison the worker.
            return false;
        };

        let start = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| task.process(record)));
        let elapsed = start.elapsed();

        match outcome {
            Ok(Ok(())) => {
                if let Some(produced) = record.produced() {
                    produced.complete(None);
                }
            }
            Ok(Err(process_error)) => {
                let process_error = Arc::new(process_error);
                warn!(
                    drainer = self.index,
                    record = %record.log_render(),
                    error = %process_error,
                    "record processing failed, reporting to the owning task"
                );
                task.on_drain_failure(Arc::clone(&process_error));
                if let Some(produced) = record.produced() {
                    produced.complete(Some(process_error));
                }
            }
            Err(payload) => {
                error!(
                    drainer = self.index,
                    record = %record.log_render(),
                    panic = %panic_message(payload.as_ref()),
                    "task panicked while processing a record, drainer terminating"
                );
                return true;
            }
        }

        self.times.record(record.shard(), elapsed);
        false
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
