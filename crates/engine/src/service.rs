// Copyright The Storeflow Authors
// SPDX-License-Identifier: Apache-2.0

//! The buffer service: facade over the drainer pool.
//!
//! Routing is the correctness-critical piece. All records of one (topic,
//! partition) shard must flow through the same queue, and thus the same
//! single-threaded drainer, so that downstream data-integrity validation
//! sees them in enqueue order. The routing formula is therefore a
//! compatibility contract: it must stay a pure function of (topic,
//! partition) for the life of the process.

use crate::drainer::{Drainer, DrainerState};
use crate::error::Error;
use crate::record::StoreRecord;
use crate::task::{IngestionTask, ProducedRecord};
use parking_lot::Mutex;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use storeflow_channel::error::SendError;
use storeflow_config::{BufferConfig, DrainPolicy};
use storeflow_telemetry::report::SlowDrainerReport;
use tracing::{info, warn};

const STATE_NEW: u8 = 0;
const STATE_STARTED: u8 = 1;
const STATE_STOPPING: u8 = 2;
const STATE_STOPPED: u8 = 3;

/// How many of the slowest shards the diagnostic burst enumerates for a
/// drainer above the slow threshold, and for a healthy one.
const SLOW_DRAINER_TOP_K: usize = 5;
const HEALTHY_DRAINER_TOP_K: usize = 1;

/// Poll interval while waiting for worker threads to finish during stop.
const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// The ingestion buffer: a fixed pool of drainer workers, each owning one
/// byte-bounded queue, fed by hash-routing incoming records on their
/// (topic, partition) shard.
///
/// Lifecycle is monotonic and one-shot: `NEW → STARTED → STOPPING →
/// STOPPED`. A stopped service cannot be restarted.
pub struct BufferService {
    config: BufferConfig,
    drainers: Vec<Arc<Drainer>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    state: AtomicU8,
}

impl BufferService {
    /// Builds the drainer pool from a validated configuration. No threads
    /// are spawned until [`start`](Self::start).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the configuration fails validation.
    pub fn new(config: BufferConfig) -> Result<Self, Error> {
        config.validate()?;
        let capacity = config.capacity_per_drainer as usize;
        let notify_delta = config.notify_delta as usize;
        let drainers = (0..config.drainer_count)
            .map(|index| Arc::new(Drainer::new(index, capacity, notify_delta)))
            .collect();
        Ok(BufferService {
            config,
            drainers,
            workers: Mutex::new(Vec::new()),
            state: AtomicU8::new(STATE_NEW),
        })
    }

    /// Spawns one named worker thread per drainer and transitions the
    /// service to `STARTED`.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyStarted`] / [`Error::AlreadyStopped`] on a second
    ///   call or a call after `stop`.
    /// - [`Error::ThreadSpawn`] when the OS refuses a worker thread; the
    ///   service is left stopped with any already-spawned workers signalled
    ///   to exit.
    pub fn start(&self) -> Result<(), Error> {
        if let Err(observed) = self.state.compare_exchange(
            STATE_NEW,
            STATE_STARTED,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            return Err(if observed == STATE_STARTED {
                Error::AlreadyStarted
            } else {
                Error::AlreadyStopped
            });
        }

        let mut workers = self.workers.lock();
        for drainer in &self.drainers {
            let index = drainer.index();
            let worker = Arc::clone(drainer);
            let spawned = thread::Builder::new()
                .name(format!("storeflow-drainer-{index}"))
                .spawn(move || worker.run());
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(source) => {
                    self.shutdown_drainers();
                    self.state.store(STATE_STOPPED, Ordering::Release);
                    return Err(Error::ThreadSpawn {
                        drainer: index,
                        source,
                    });
                }
            }
        }
        info!(
            drainer_count = self.drainers.len(),
            capacity_per_drainer = self.config.capacity_per_drainer,
            "buffer service started"
        );
        Ok(())
    }

    /// Routes a record to its drainer and inserts it, blocking while the
    /// target queue is over its byte capacity. Blocking is the
    /// backpressure signal: the upstream poller must not outrun the
    /// slowest downstream writer.
    ///
    /// # Errors
    ///
    /// - [`Error::NotStarted`] / [`Error::AlreadyStopped`] outside the
    ///   `STARTED` state.
    /// - [`Error::Cancelled`] when shutdown interrupts a blocked insert;
    ///   the record was not enqueued.
    /// - [`Error::OversizedRecord`] when the record alone exceeds the
    ///   per-drainer capacity and could never be buffered.
    pub fn enqueue(
        &self,
        record: StoreRecord,
        task: Arc<dyn IngestionTask>,
        produced: Option<Arc<dyn ProducedRecord>>,
    ) -> Result<(), Error> {
        self.ensure_started()?;
        let record = record
            .with_overhead(self.config.record_overhead_bytes)
            .attach(task, produced);
        let index = self.route(record.topic(), record.partition());
        match self.drainers[index].queue().put(record) {
            Ok(()) => Ok(()),
            Err(SendError::Closed(_)) => Err(Error::Cancelled),
            Err(SendError::Oversized { size, capacity }) => {
                Err(Error::OversizedRecord { size, capacity })
            }
        }
    }

    /// Maps a shard to its drainer index.
    ///
    /// This is a pure function of its inputs with a result in
    /// `[0, drainer_count)`, and it is a compatibility contract: the same
    /// shard maps to the same drainer for the life of the process, which
    /// is what serializes a partition through a single worker. The halved
    /// topic hash leaves headroom for the partition addend.
    #[must_use]
    pub fn route(&self, topic: &str, partition: u32) -> usize {
        let mut hasher = DefaultHasher::new();
        topic.hash(&mut hasher);
        let topic_hash = hasher.finish() / 2;
        ((topic_hash + u64::from(partition)) % self.drainers.len() as u64) as usize
    }

    /// Drain barrier: blocks until no buffered or in-flight record of the
    /// shard remains in its drainer's queue, using the configured probe
    /// policy.
    ///
    /// The caller must have halted upstream production for the shard
    /// first; the barrier observes quiescence, it does not create it.
    ///
    /// # Errors
    ///
    /// [`Error::DrainTimeout`] when the probe budget is exhausted; see
    /// also [`drain_shard_with`](Self::drain_shard_with).
    pub fn drain_shard(&self, topic: &str, partition: u32) -> Result<(), Error> {
        self.drain_shard_with(topic, partition, &self.config.drain)
    }

    /// [`drain_shard`](Self::drain_shard) with an explicit probe policy,
    /// for callers (and tests) that need a different budget than the
    /// service-wide configuration.
    ///
    /// # Errors
    ///
    /// As for [`drain_shard`](Self::drain_shard).
    pub fn drain_shard_with(
        &self,
        topic: &str,
        partition: u32,
        policy: &DrainPolicy,
    ) -> Result<(), Error> {
        self.ensure_started()?;
        let probe = StoreRecord::probe(topic, partition);
        let queue = self.drainers[self.route(topic, partition)].queue();
        for _ in 0..policy.retry_budget {
            if !queue.contains(|record| probe.same_shard(record)) {
                return Ok(());
            }
            if !policy.sleep_interval.is_zero() {
                thread::sleep(policy.sleep_interval);
            }
        }
        Err(Error::DrainTimeout {
            topic: topic.to_owned(),
            partition,
            attempts: policy.retry_budget,
        })
    }

    /// Stops the drainer pool: signals every worker, closes every queue
    /// (waking blocked producers and consumers), and waits up to the
    /// configured stop timeout for the workers to terminate.
    ///
    /// Workers inside `process` finish their current record; queued but
    /// unprocessed records are dropped. The caller is responsible for
    /// checkpointing offsets before stopping.
    ///
    /// # Errors
    ///
    /// - [`Error::NotStarted`] when the service was never started.
    /// - [`Error::AlreadyStopped`] on a second stop.
    /// - [`Error::StopTimeout`] when workers outlived the deadline.
    pub fn stop(&self) -> Result<(), Error> {
        if let Err(observed) = self.state.compare_exchange(
            STATE_STARTED,
            STATE_STOPPING,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            return Err(if observed == STATE_NEW {
                Error::NotStarted
            } else {
                Error::AlreadyStopped
            });
        }

        self.shutdown_drainers();

        let deadline = Instant::now() + self.config.stop_timeout;
        let workers = std::mem::take(&mut *self.workers.lock());
        let mut pending = 0usize;
        for worker in workers {
            while !worker.is_finished() && Instant::now() < deadline {
                thread::sleep(JOIN_POLL_INTERVAL);
            }
            if worker.is_finished() {
                if worker.join().is_err() {
                    warn!("drainer worker panicked before termination");
                }
            } else {
                pending += 1;
            }
        }

        self.state.store(STATE_STOPPED, Ordering::Release);
        if pending > 0 {
            warn!(pending, "drainer workers still running after stop deadline");
            Err(Error::StopTimeout { pending })
        } else {
            info!("buffer service stopped");
            Ok(())
        }
    }

    /// Number of drainers in the pool.
    #[must_use]
    pub fn drainer_count(&self) -> usize {
        self.drainers.len()
    }

    /// Terminal state of one drainer's worker, `None` for an out-of-range
    /// index. Supervision compares the number of `Running` workers against
    /// [`drainer_count`](Self::drainer_count) to detect dead shards.
    #[must_use]
    pub fn drainer_state(&self, index: usize) -> Option<DrainerState> {
        self.drainers.get(index).map(|drainer| drainer.state())
    }

    /// Accounted byte usage of one drainer's queue, `None` for an
    /// out-of-range index.
    #[must_use]
    pub fn memory_usage(&self, index: usize) -> Option<usize> {
        self.drainers
            .get(index)
            .map(|drainer| drainer.queue().memory_usage())
    }

    /// Sum of the accounted byte usage across all queues.
    #[must_use]
    pub fn total_memory_usage(&self) -> usize {
        self.drainers
            .iter()
            .map(|drainer| drainer.queue().memory_usage())
            .sum()
    }

    /// Sum of the free capacity across all queues.
    #[must_use]
    pub fn total_remaining(&self) -> usize {
        self.drainers
            .iter()
            .map(|drainer| drainer.queue().remaining())
            .sum()
    }

    /// Smallest per-drainer byte usage.
    #[must_use]
    pub fn min_memory_usage_per_drainer(&self) -> usize {
        self.drainers
            .iter()
            .map(|drainer| drainer.queue().memory_usage())
            .min()
            .unwrap_or(0)
    }

    /// Largest per-drainer byte usage.
    ///
    /// This observer doubles as the sampling tick of the slow-drainer
    /// diagnostics: when any drainer's usage exceeds the configured
    /// threshold fraction of its capacity, a diagnostic burst is logged
    /// (the slowest shards per drainer, shard counts, memory usage) and
    /// every drainer's processing-time counters are cleared. Counters
    /// therefore cover the interval since the previous burst.
    #[must_use]
    pub fn max_memory_usage_per_drainer(&self) -> usize {
        let usages: Vec<usize> = self
            .drainers
            .iter()
            .map(|drainer| drainer.queue().memory_usage())
            .collect();
        let max = usages.iter().copied().max().unwrap_or(0);

        let capacity = self.config.capacity_per_drainer as usize;
        let threshold =
            (capacity as f64 * self.config.slow_drainer_threshold) as usize;
        if usages.iter().any(|&usage| usage > threshold) {
            for (drainer, usage) in self.drainers.iter().zip(&usages) {
                let slow = *usage > threshold;
                let top_k = if slow {
                    SLOW_DRAINER_TOP_K
                } else {
                    HEALTHY_DRAINER_TOP_K
                };
                let report = SlowDrainerReport {
                    drainer_index: drainer.index(),
                    memory_usage: *usage,
                    capacity_bytes: capacity,
                    shard_count: drainer.times().shard_count(),
                    slowest: drainer.times().top(top_k),
                };
                if slow {
                    warn!(%report, "drainer queue above slow threshold");
                } else {
                    info!(%report, "drainer status");
                }
            }
            for drainer in &self.drainers {
                drainer.times().clear();
            }
        }
        max
    }

    fn ensure_started(&self) -> Result<(), Error> {
        match self.state.load(Ordering::Acquire) {
            STATE_STARTED => Ok(()),
            STATE_NEW => Err(Error::NotStarted),
            _ => Err(Error::AlreadyStopped),
        }
    }

    fn shutdown_drainers(&self) {
        for drainer in &self.drainers {
            drainer.signal_stop();
        }
        for drainer in &self.drainers {
            drainer.queue().close();
        }
    }
}

impl Drop for BufferService {
    /// Dropping a still-running service closes the queues so detached
    /// workers and blocked producers wake up instead of hanging forever.
    /// An orderly [`stop`](Self::stop) remains the supported shutdown
    /// path.
    fn drop(&mut self) {
        if self.state.load(Ordering::Acquire) == STATE_STARTED {
            self.shutdown_drainers();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sized_record;
    use storeflow_telemetry::ShardKey;

    fn service(drainer_count: usize) -> BufferService {
        let config = BufferConfig {
            drainer_count,
            ..BufferConfig::default()
        };
        BufferService::new(config).expect("config must validate")
    }

    fn small_service(drainer_count: usize, capacity: u64) -> BufferService {
        let config = BufferConfig {
            drainer_count,
            capacity_per_drainer: capacity,
            notify_delta: 0,
            record_overhead_bytes: 0,
            ..BufferConfig::default()
        };
        BufferService::new(config).expect("config must validate")
    }

    #[test]
    fn routing_is_deterministic_and_in_range() {
        let service = service(4);
        let first = service.route("storeA_v3", 0);
        assert_eq!(first, service.route("storeA_v3", 0));
        assert!(first < 4);
        assert!(service.route("storeA_v3", 1) < 4);
        assert!(service.route("another_store_v12", 7) < 4);
    }

    #[test]
    fn routing_spreads_partitions_with_single_drainer() {
        let service = service(1);
        for partition in 0..64u32 {
            assert_eq!(service.route("store_v1", partition), 0);
        }
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = BufferConfig {
            drainer_count: 0,
            ..BufferConfig::default()
        };
        assert!(matches!(
            BufferService::new(config),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn max_usage_observer_bursts_and_clears_trackers_above_threshold() {
        let service = small_service(2, 1000);
        // 806 accounted bytes: key "key-1" (5) + value (800) + topic (1).
        service.drainers[0]
            .queue()
            .put(sized_record("t", 0, 1, 800).with_overhead(0))
            .expect("put must succeed");
        service.drainers[0]
            .times()
            .record(ShardKey::new("t", 0), Duration::from_millis(5));
        service.drainers[1]
            .times()
            .record(ShardKey::new("u", 1), Duration::from_millis(2));

        // 806 > 0.8 * 1000: the burst fires and resets every tracker.
        assert_eq!(service.max_memory_usage_per_drainer(), 806);
        assert_eq!(service.drainers[0].times().shard_count(), 0);
        assert_eq!(service.drainers[1].times().shard_count(), 0);
    }

    #[test]
    fn max_usage_observer_keeps_trackers_below_threshold() {
        let service = small_service(2, 1000);
        service.drainers[0]
            .queue()
            .put(sized_record("t", 0, 1, 100).with_overhead(0))
            .expect("put must succeed");
        service.drainers[0]
            .times()
            .record(ShardKey::new("t", 0), Duration::from_millis(5));

        assert_eq!(service.max_memory_usage_per_drainer(), 106);
        assert_eq!(service.drainers[0].times().shard_count(), 1);
    }

    #[test]
    fn memory_observers_aggregate_across_drainers() {
        let service = small_service(2, 1000);
        service.drainers[0]
            .queue()
            .put(sized_record("t", 0, 1, 100).with_overhead(0))
            .expect("put must succeed");

        assert_eq!(service.memory_usage(0), Some(106));
        assert_eq!(service.memory_usage(1), Some(0));
        assert_eq!(service.memory_usage(2), None);
        assert_eq!(service.total_memory_usage(), 106);
        assert_eq!(service.total_remaining(), 2000 - 106);
        assert_eq!(service.min_memory_usage_per_drainer(), 0);
    }
}
