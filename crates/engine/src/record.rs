// Copyright The Storeflow Authors
// SPDX-License-Identifier: Apache-2.0

//! The unit of work buffered between the upstream poller and the drainer
//! pool.

use crate::task::{IngestionTask, ProducedRecord};
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use storeflow_channel::bounded::ByteSized;
use storeflow_telemetry::ShardKey;

/// Maximum number of characters of a record rendering emitted into failure
/// logs. Keeps a single poisoned record from flooding the log.
pub const MAX_LOG_RENDER_CHARS: usize = 1024;

/// A raw record pulled from the upstream message bus, together with the
/// handles the drainer needs to process it and signal completion.
///
/// Payload bytes are reference-counted; cloning a record does not copy
/// key or value data.
#[derive(Clone)]
pub struct StoreRecord {
    topic: Arc<str>,
    partition: u32,
    offset: i64,
    key: Option<Bytes>,
    value: Option<Bytes>,
    overhead_bytes: usize,
    task: Option<Arc<dyn IngestionTask>>,
    produced: Option<Arc<dyn ProducedRecord>>,
}

impl StoreRecord {
    /// Offset carried by synthetic probe records, which were never
    /// assigned one by the upstream log.
    pub const PROBE_OFFSET: i64 = -1;

    /// Default accounting overhead added to the payload size, covering
    /// struct and queue-node overhead. Overridden from configuration when
    /// the record enters the buffer service.
    pub const DEFAULT_OVERHEAD_BYTES: usize = 256;

    /// Creates a record from its upstream coordinates and payload.
    #[must_use]
    pub fn new(
        topic: impl Into<Arc<str>>,
        partition: u32,
        offset: i64,
        key: Option<Bytes>,
        value: Option<Bytes>,
    ) -> Self {
        StoreRecord {
            topic: topic.into(),
            partition,
            offset,
            key,
            value,
            overhead_bytes: Self::DEFAULT_OVERHEAD_BYTES,
            task: None,
            produced: None,
        }
    }

    /// Creates a payload-less probe record for the given shard, used by
    /// the drain barrier to scan queues.
    #[must_use]
    pub fn probe(topic: impl Into<Arc<str>>, partition: u32) -> Self {
        Self::new(topic, partition, Self::PROBE_OFFSET, None, None)
    }

    /// Replaces the accounting overhead constant.
    pub(crate) fn with_overhead(mut self, overhead_bytes: usize) -> Self {
        self.overhead_bytes = overhead_bytes;
        self
    }

    /// Attaches the owning task and the optional completion handle.
    pub(crate) fn attach(
        mut self,
        task: Arc<dyn IngestionTask>,
        produced: Option<Arc<dyn ProducedRecord>>,
    ) -> Self {
        self.task = Some(task);
        self.produced = produced;
        self
    }

    /// Topic identifier of the log stream this record came from.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Partition number within the topic.
    #[must_use]
    pub fn partition(&self) -> u32 {
        self.partition
    }

    /// Offset assigned by the upstream log, or [`Self::PROBE_OFFSET`] for
    /// probe records.
    #[must_use]
    pub fn offset(&self) -> i64 {
        self.offset
    }

    /// Key bytes, if any.
    #[must_use]
    pub fn key(&self) -> Option<&Bytes> {
        self.key.as_ref()
    }

    /// Envelope bytes, if any.
    #[must_use]
    pub fn value(&self) -> Option<&Bytes> {
        self.value.as_ref()
    }

    /// The shard coordinates of this record.
    #[must_use]
    pub fn shard(&self) -> ShardKey {
        ShardKey {
            topic: Arc::clone(&self.topic),
            partition: self.partition,
        }
    }

    /// True iff both records belong to the same (topic, partition) shard.
    ///
    /// This is the only equality the engine defines on records. It exists
    /// for the drain-barrier scan, where a probe must compare equal to any
    /// buffered record of its shard; full identity would be the offset,
    /// which the barrier must ignore.
    #[must_use]
    pub fn same_shard(&self, other: &StoreRecord) -> bool {
        self.partition == other.partition && self.topic == other.topic
    }

    /// True for synthetic probe records.
    #[must_use]
    pub fn is_probe(&self) -> bool {
        self.offset == Self::PROBE_OFFSET && self.key.is_none() && self.value.is_none()
    }

    /// The owning ingestion task, absent on probe records.
    #[must_use]
    pub fn task(&self) -> Option<&Arc<dyn IngestionTask>> {
        self.task.as_ref()
    }

    /// The completion handle, if the upstream attached one.
    #[must_use]
    pub fn produced(&self) -> Option<&Arc<dyn ProducedRecord>> {
        self.produced.as_ref()
    }

    /// Debug rendering truncated to [`MAX_LOG_RENDER_CHARS`] characters,
    /// for failure logs.
    #[must_use]
    pub fn log_render(&self) -> String {
        let rendered = format!("{self:?}");
        if rendered.len() <= MAX_LOG_RENDER_CHARS {
            return rendered;
        }
        let cut = (0..=MAX_LOG_RENDER_CHARS)
            .rev()
            .find(|i| rendered.is_char_boundary(*i))
            .unwrap_or(0);
        format!("{}...", &rendered[..cut])
    }
}

impl fmt::Debug for StoreRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreRecord")
            .field("topic", &self.topic)
            .field("partition", &self.partition)
            .field("offset", &self.offset)
            .field("key", &self.key)
            .field("value", &self.value)
            .finish_non_exhaustive()
    }
}

impl ByteSized for StoreRecord {
    /// Payload bytes plus the topic name plus a constant per-record
    /// overhead; probe payloads count as zero.
    fn size_bytes(&self) -> usize {
        self.key.as_ref().map_or(0, Bytes::len)
            + self.value.as_ref().map_or(0, Bytes::len)
            + self.topic.len()
            + self.overhead_bytes
    }
}
