// Copyright The Storeflow Authors
// SPDX-License-Identifier: Apache-2.0

//! Ingestion buffer-and-drain engine.
//!
//! The engine mediates between an upstream message-log poller and the
//! per-partition storage writers downstream. Incoming records are
//! hash-routed on their (topic, partition) shard to one of a fixed pool of
//! drainer workers, each owning a byte-bounded blocking queue. A full
//! queue blocks the poller, which is the backpressure signal; a drain
//! barrier lets subscription changes wait for a shard to quiesce before
//! resubscribing or tearing down.
//!
//! The load-bearing guarantee is per-shard ordering: every record of one
//! shard is processed by the same single-threaded worker in enqueue order.
//! Nothing is promised across shards, even when they share a drainer.

pub mod drainer;
pub mod error;
pub mod record;
pub mod service;
pub mod task;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;
