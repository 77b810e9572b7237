// Copyright The Storeflow Authors
// SPDX-License-Identifier: Apache-2.0

//! Cumulative processing-time counters, one per shard.

use crate::ShardKey;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;

/// Cumulative time spent processing records, keyed by shard.
///
/// Written by exactly one drainer thread; read and cleared by diagnostic
/// callers on other threads. A coarse lock around the whole map is
/// sufficient for that access pattern: the writer touches it once per
/// record, the readers a few times per sampling interval.
#[derive(Debug, Default)]
pub struct DrainTimeTracker {
    times: Mutex<HashMap<ShardKey, Duration>>,
}

impl DrainTimeTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `elapsed` to the shard's cumulative total.
    pub fn record(&self, shard: ShardKey, elapsed: Duration) {
        let mut times = self.times.lock();
        *times.entry(shard).or_default() += elapsed;
    }

    /// Number of shards with accumulated time in the current interval.
    #[must_use]
    pub fn shard_count(&self) -> usize {
        self.times.lock().len()
    }

    /// Cumulative total for one shard, if any time has been recorded.
    #[must_use]
    pub fn total(&self, shard: &ShardKey) -> Option<Duration> {
        self.times.lock().get(shard).copied()
    }

    /// The `k` shards with the largest cumulative totals, slowest first.
    #[must_use]
    pub fn top(&self, k: usize) -> Vec<(ShardKey, Duration)> {
        let times = self.times.lock();
        let mut entries: Vec<_> = times
            .iter()
            .map(|(shard, elapsed)| (shard.clone(), *elapsed))
            .collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1));
        entries.truncate(k);
        entries
    }

    /// Drops all accumulated totals, starting a new sampling interval.
    pub fn clear(&self) {
        self.times.lock().clear();
    }
}
