// Copyright The Storeflow Authors
// SPDX-License-Identifier: Apache-2.0

//! Per-shard drain-time accounting for the ingestion buffer.
//!
//! Each drainer worker accumulates how long the ingestion task spends
//! processing records of each (topic, partition) shard. Diagnostic callers
//! sample these counters to enumerate the slowest shards of a hot drainer;
//! sampling clears the counters, so each burst covers the interval since
//! the previous one.

use std::fmt;
use std::sync::Arc;

pub mod report;
pub mod tracker;

/// Coordinates of a log-stream shard on the upstream message bus.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShardKey {
    /// Topic identifier of the log stream.
    pub topic: Arc<str>,
    /// Partition number within the topic.
    pub partition: u32,
}

impl ShardKey {
    /// Creates a shard key from topic and partition coordinates.
    #[must_use]
    pub fn new(topic: impl Into<Arc<str>>, partition: u32) -> Self {
        ShardKey {
            topic: topic.into(),
            partition,
        }
    }
}

impl fmt::Display for ShardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.topic, self.partition)
    }
}
