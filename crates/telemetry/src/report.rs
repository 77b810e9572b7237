// Copyright The Storeflow Authors
// SPDX-License-Identifier: Apache-2.0

//! Rendering of slow-drainer diagnostic bursts.

use crate::ShardKey;
use std::fmt;
use std::time::Duration;

/// Snapshot of one drainer's queue pressure and slowest shards, rendered
/// into the diagnostic log burst.
#[derive(Debug, Clone)]
pub struct SlowDrainerReport {
    /// Index of the drainer in the pool.
    pub drainer_index: usize,
    /// Bytes currently buffered (including the in-flight record).
    pub memory_usage: usize,
    /// Byte capacity of the drainer's queue.
    pub capacity_bytes: usize,
    /// Number of shards with accumulated processing time this interval.
    pub shard_count: usize,
    /// Slowest shards this interval, slowest first.
    pub slowest: Vec<(ShardKey, Duration)>,
}

impl fmt::Display for SlowDrainerReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "drainer {}: {}/{} bytes buffered, {} shards",
            self.drainer_index, self.memory_usage, self.capacity_bytes, self.shard_count
        )?;
        if self.slowest.is_empty() {
            return write!(f, ", no processing time recorded");
        }
        write!(f, ", slowest: ")?;
        for (i, (shard, elapsed)) in self.slowest.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={}ms", shard, elapsed.as_millis())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_slowest_shards() {
        let report = SlowDrainerReport {
            drainer_index: 2,
            memory_usage: 900,
            capacity_bytes: 1000,
            shard_count: 3,
            slowest: vec![
                (ShardKey::new("store_v1", 4), Duration::from_millis(120)),
                (ShardKey::new("store_v1", 1), Duration::from_millis(30)),
            ],
        };
        assert_eq!(
            report.to_string(),
            "drainer 2: 900/1000 bytes buffered, 3 shards, slowest: store_v1-4=120ms, store_v1-1=30ms"
        );
    }

    #[test]
    fn renders_idle_drainer() {
        let report = SlowDrainerReport {
            drainer_index: 0,
            memory_usage: 0,
            capacity_bytes: 1000,
            shard_count: 0,
            slowest: Vec::new(),
        };
        assert_eq!(
            report.to_string(),
            "drainer 0: 0/1000 bytes buffered, 0 shards, no processing time recorded"
        );
    }
}
