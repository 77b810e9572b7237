// Copyright The Storeflow Authors
// SPDX-License-Identifier: Apache-2.0

//! End-to-end tests of the buffer service: routing, per-shard ordering,
//! failure isolation, backpressure, the drain barrier, and lifecycle.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use storeflow_config::{BufferConfig, DrainPolicy};
use storeflow_engine::drainer::DrainerState;
use storeflow_engine::error::Error;
use storeflow_engine::service::BufferService;
use storeflow_engine::task::{IngestionTask, ProcessError, ProducedRecord};
use storeflow_engine::testing::{
    CompletionProbe, GatedTask, RecordingTask, sized_record, test_record,
};
use storeflow_telemetry::ShardKey;

fn init_logging() {
    _ = tracing_subscriber::fmt()
        .with_env_filter("storeflow_engine=debug")
        .with_test_writer()
        .try_init();
}

fn config(drainer_count: usize, capacity: u64, notify_delta: u64) -> BufferConfig {
    BufferConfig {
        drainer_count,
        capacity_per_drainer: capacity,
        notify_delta,
        record_overhead_bytes: 0,
        ..BufferConfig::default()
    }
}

fn started(config: BufferConfig) -> BufferService {
    let service = BufferService::new(config).expect("config must validate");
    service.start().expect("start must succeed");
    service
}

#[test]
fn ordering_within_a_shard_under_slow_processing() {
    init_logging();
    let service = started(config(4, 1 << 20, 4096));
    let task = Arc::new(RecordingTask::new().with_delay(Duration::from_millis(10)));

    for offset in 1..=3 {
        service
            .enqueue(test_record("t", 0, offset), task.clone(), None)
            .expect("enqueue must succeed");
    }

    service.drain_shard("t", 0).expect("barrier must succeed");
    assert_eq!(task.offsets_for(&ShardKey::new("t", 0)), vec![1, 2, 3]);
    service.stop().expect("stop must succeed");
}

#[test]
fn per_record_failure_is_isolated() {
    init_logging();
    let service = started(config(2, 1 << 20, 4096));
    let task = Arc::new(RecordingTask::new().failing_on([2]));

    let probes = [CompletionProbe::new(), CompletionProbe::new(), CompletionProbe::new()];
    for (offset, probe) in (1..=3).zip(&probes) {
        service
            .enqueue(
                test_record("t", 0, offset),
                task.clone(),
                Some(probe.clone() as Arc<dyn ProducedRecord>),
            )
            .expect("enqueue must succeed");
    }

    service.drain_shard("t", 0).expect("barrier must succeed");

    assert!(probes[0].completed_ok());
    let failure = probes[1].completed_err().expect("offset 2 must fail");
    assert!(matches!(*failure, ProcessError::Validation(_)));
    assert!(probes[2].completed_ok());
    for probe in &probes {
        assert_eq!(probe.call_count(), 1);
    }

    assert_eq!(task.failure_count(), 1);
    assert!(task.last_failure().is_some());

    // The drainer survived the poisoned record.
    let index = service.route("t", 0);
    assert_eq!(service.drainer_state(index), Some(DrainerState::Running));
    service
        .enqueue(test_record("t", 0, 4), task.clone(), None)
        .expect("enqueue after failure must succeed");
    service.drain_shard("t", 0).expect("barrier must succeed");
    assert_eq!(task.offsets_for(&ShardKey::new("t", 0)), vec![1, 2, 3, 4]);

    service.stop().expect("stop must succeed");
}

#[test]
fn full_queue_blocks_producer_until_space_is_freed() {
    init_logging();
    // Records account to 400 bytes each: key "key-N" (5) + value (394) +
    // topic "t" (1), overhead zero.
    let service = Arc::new(started(config(1, 1000, 100)));
    let task = Arc::new(GatedTask::new());

    for offset in 1..=2 {
        service
            .enqueue(sized_record("t", 0, offset, 394), task.clone(), None)
            .expect("enqueue must succeed");
    }

    let blocked = Arc::new(AtomicBool::new(true));
    let producer = {
        let service = Arc::clone(&service);
        let task = task.clone();
        let blocked = Arc::clone(&blocked);
        thread::spawn(move || {
            service
                .enqueue(sized_record("t", 0, 3, 394), task, None)
                .expect("blocked enqueue must eventually succeed");
            blocked.store(false, Ordering::Release);
        })
    };

    thread::sleep(Duration::from_millis(100));
    assert!(
        blocked.load(Ordering::Acquire),
        "third enqueue must block on the full queue"
    );

    task.open();
    producer.join().expect("producer join");

    service.drain_shard("t", 0).expect("barrier must succeed");
    assert_eq!(task.processed_count(), 3);
    service.stop().expect("stop must succeed");
}

#[test]
fn drain_barrier_waits_for_the_last_record() {
    init_logging();
    let service = started(config(4, 1 << 20, 4096));
    let task = Arc::new(RecordingTask::new().with_delay(Duration::from_millis(20)));

    for offset in 1..=5 {
        service
            .enqueue(test_record("t", 0, offset), task.clone(), None)
            .expect("enqueue must succeed");
    }

    service.drain_shard("t", 0).expect("barrier must succeed");
    // The barrier observes the in-flight record, so at return time all
    // five have fully processed.
    assert_eq!(task.processed_count(), 5);

    // A second barrier on a quiescent shard succeeds on the first probe.
    service
        .drain_shard_with("t", 0, &DrainPolicy::immediate(1))
        .expect("second barrier must succeed immediately");

    service.stop().expect("stop must succeed");
}

#[test]
fn drain_barrier_times_out_when_the_shard_never_quiesces() {
    init_logging();
    let service = started(config(1, 1 << 20, 4096));
    let task = Arc::new(GatedTask::new());

    service
        .enqueue(test_record("t", 0, 1), task.clone(), None)
        .expect("enqueue must succeed");

    let policy = DrainPolicy {
        retry_budget: 3,
        sleep_interval: Duration::from_millis(1),
    };
    match service.drain_shard_with("t", 0, &policy) {
        Err(Error::DrainTimeout {
            topic,
            partition,
            attempts,
        }) => {
            assert_eq!(topic, "t");
            assert_eq!(partition, 0);
            assert_eq!(attempts, 3);
        }
        other => panic!("expected DrainTimeout, got {other:?}"),
    }

    task.open();
    service.drain_shard("t", 0).expect("barrier must succeed");
    service.stop().expect("stop must succeed");
}

#[test]
fn single_drainer_extends_fifo_across_shards() {
    init_logging();
    let service = started(config(1, 1 << 20, 4096));
    let task = Arc::new(RecordingTask::new());

    let sequence = [("a", 0u32, 1i64), ("b", 3, 2), ("a", 0, 3), ("b", 3, 4)];
    for (topic, partition, offset) in sequence {
        service
            .enqueue(test_record(topic, partition, offset), task.clone(), None)
            .expect("enqueue must succeed");
    }

    service.drain_shard("a", 0).expect("barrier must succeed");
    service.drain_shard("b", 3).expect("barrier must succeed");

    let processed = task.processed();
    let expected: Vec<(ShardKey, i64)> = sequence
        .iter()
        .map(|(topic, partition, offset)| (ShardKey::new(*topic, *partition), *offset))
        .collect();
    assert_eq!(processed, expected);
    service.stop().expect("stop must succeed");
}

#[test]
fn oversized_record_is_rejected_synchronously() {
    init_logging();
    let service = started(config(1, 500, 0));
    let task = Arc::new(RecordingTask::new());

    match service.enqueue(sized_record("t", 0, 1, 600), task, None) {
        Err(Error::OversizedRecord { size, capacity }) => {
            assert_eq!(size, 606);
            assert_eq!(capacity, 500);
        }
        other => panic!("expected OversizedRecord, got {other:?}"),
    }
    service.stop().expect("stop must succeed");
}

#[test]
fn lifecycle_misuse_is_reported_synchronously() {
    init_logging();
    let service = BufferService::new(config(2, 1 << 20, 4096)).expect("config must validate");
    let task: Arc<dyn IngestionTask> = Arc::new(RecordingTask::new());

    assert!(matches!(
        service.enqueue(test_record("t", 0, 1), task.clone(), None),
        Err(Error::NotStarted)
    ));
    assert!(matches!(service.stop(), Err(Error::NotStarted)));

    service.start().expect("start must succeed");
    assert!(matches!(service.start(), Err(Error::AlreadyStarted)));

    service.stop().expect("stop must succeed");
    assert!(matches!(service.stop(), Err(Error::AlreadyStopped)));
    assert!(matches!(service.start(), Err(Error::AlreadyStopped)));
    assert!(matches!(
        service.enqueue(test_record("t", 0, 2), task, None),
        Err(Error::AlreadyStopped)
    ));
}

#[test]
fn stop_drops_queued_records_but_finishes_the_current_one() {
    init_logging();
    let service = Arc::new(started(config(1, 1 << 20, 4096)));
    let task = Arc::new(GatedTask::new());

    for offset in 1..=3 {
        service
            .enqueue(test_record("t", 0, offset), task.clone(), None)
            .expect("enqueue must succeed");
    }
    // Give the drainer time to take the first record and block inside
    // `process`.
    thread::sleep(Duration::from_millis(50));

    let stopper = {
        let service = Arc::clone(&service);
        thread::spawn(move || service.stop())
    };
    thread::sleep(Duration::from_millis(50));
    task.open();

    stopper
        .join()
        .expect("stopper join")
        .expect("stop must succeed once the in-flight record finishes");
    assert_eq!(
        task.processed_count(),
        1,
        "queued but unprocessed records are dropped on stop"
    );
}

#[test]
fn shutdown_cancels_a_blocked_producer() {
    init_logging();
    let service = Arc::new(started(config(1, 1000, 0)));
    let task = Arc::new(GatedTask::new());

    // Fill the queue: one record in flight at the gate, one buffered.
    service
        .enqueue(sized_record("t", 0, 1, 394), task.clone(), None)
        .expect("enqueue must succeed");
    service
        .enqueue(sized_record("t", 0, 2, 394), task.clone(), None)
        .expect("enqueue must succeed");
    thread::sleep(Duration::from_millis(50));

    let producer = {
        let service = Arc::clone(&service);
        let task = task.clone();
        thread::spawn(move || service.enqueue(sized_record("t", 0, 3, 394), task, None))
    };
    thread::sleep(Duration::from_millis(50));

    let stopper = {
        let service = Arc::clone(&service);
        thread::spawn(move || service.stop())
    };
    thread::sleep(Duration::from_millis(50));
    task.open();

    assert!(matches!(
        producer.join().expect("producer join"),
        Err(Error::Cancelled)
    ));
    stopper
        .join()
        .expect("stopper join")
        .expect("stop must succeed");
}
