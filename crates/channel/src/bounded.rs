// Copyright The Storeflow Authors
// SPDX-License-Identifier: Apache-2.0

//! A blocking, FIFO, multi-producer/single-consumer queue whose capacity is
//! measured in bytes of payload rather than element count.
//!
//! Producers calling [`ByteBoundedQueue::put`] block while the insertion
//! would push the accounted usage past the configured capacity; this is the
//! backpressure signal that slows the upstream poller down. The single
//! consumer takes elements in FIFO order with a two-phase protocol: a taken
//! element remains accounted against the capacity and visible to
//! [`ByteBoundedQueue::contains`] until the consumer calls
//! [`ByteBoundedQueue::release`]. The drain barrier relies on this: an
//! element being processed downstream is still "in flight" from the queue's
//! point of view.

use crate::error::{RecvError, SendError};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

/// Byte-accounting hook for queue elements.
///
/// The reported size must be stable for the lifetime of the element; the
/// queue records it once at insertion time and uses the recorded value for
/// all subsequent accounting.
pub trait ByteSized {
    /// Accounted size of this element in bytes.
    fn size_bytes(&self) -> usize;
}

struct QueueState<T> {
    /// FIFO of (element, accounted size) pairs.
    buffer: VecDeque<(T, usize)>,
    /// Element handed to the consumer but not yet released.
    in_flight: Option<(T, usize)>,
    /// Sum of accounted sizes of buffered and in-flight elements.
    used_bytes: usize,
    closed: bool,
}

/// A blocking FIFO queue bounded by the total accounted byte size of its
/// elements.
///
/// Any number of producer threads may call [`put`](Self::put) concurrently.
/// Exactly one consumer thread must call [`take`](Self::take) /
/// [`release`](Self::release); the FIFO guarantee is undefined under
/// multiple concurrent consumers.
pub struct ByteBoundedQueue<T> {
    state: Mutex<QueueState<T>>,
    not_full: Condvar,
    not_empty: Condvar,
    capacity_bytes: usize,
    notify_delta: usize,
}

impl<T: ByteSized + Clone> ByteBoundedQueue<T> {
    /// Creates a queue with the given byte capacity and producer wake-up
    /// granularity.
    ///
    /// `notify_delta` is clamped to `capacity_bytes`: a delta larger than
    /// the capacity could never be reached and would strand blocked
    /// producers.
    #[must_use]
    pub fn new(capacity_bytes: usize, notify_delta: usize) -> Self {
        ByteBoundedQueue {
            state: Mutex::new(QueueState {
                buffer: VecDeque::new(),
                in_flight: None,
                used_bytes: 0,
                closed: false,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            capacity_bytes,
            notify_delta: notify_delta.min(capacity_bytes),
        }
    }

    /// Inserts an element at the tail, blocking while the insertion would
    /// exceed the byte capacity.
    ///
    /// The capacity check is strict: this method returns only once the
    /// element is enqueued with the post-insertion usage within capacity.
    /// Transient overshoot never occurs.
    ///
    /// # Errors
    ///
    /// - [`SendError::Oversized`] if the element alone exceeds the total
    ///   capacity; it could never be enqueued and blocking would stall the
    ///   producer forever.
    /// - [`SendError::Closed`] if the queue is closed before or while
    ///   blocked; the element is handed back and was not enqueued.
    pub fn put(&self, element: T) -> Result<(), SendError<T>> {
        let size = element.size_bytes();
        if size > self.capacity_bytes {
            return Err(SendError::Oversized {
                size,
                capacity: self.capacity_bytes,
            });
        }

        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(SendError::Closed(element));
            }
            if state.used_bytes + size <= self.capacity_bytes {
                break;
            }
            self.not_full.wait(&mut state);
        }

        state.buffer.push_back((element, size));
        state.used_bytes += size;
        _ = self.not_empty.notify_one();
        Ok(())
    }

    /// Removes and returns the head element, blocking while the queue is
    /// empty.
    ///
    /// The returned element stays accounted against the capacity and
    /// visible to [`contains`](Self::contains) until
    /// [`release`](Self::release) is called. Taking a new element while a
    /// previous one is still outstanding releases the previous one first.
    ///
    /// # Errors
    ///
    /// Returns [`RecvError::Closed`] once the queue has been closed, even
    /// if elements remain buffered: closure models stop-time interruption
    /// and remaining elements are dropped with the queue.
    pub fn take(&self) -> Result<T, RecvError> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(RecvError::Closed);
            }
            if !state.buffer.is_empty() {
                self.release_locked(&mut state);
                if let Some((element, size)) = state.buffer.pop_front() {
                    state.in_flight = Some((element.clone(), size));
                    return Ok(element);
                }
            }
            self.not_empty.wait(&mut state);
        }
    }

    /// Non-blocking variant of [`take`](Self::take).
    ///
    /// # Errors
    ///
    /// Returns [`RecvError::Empty`] when nothing is buffered and
    /// [`RecvError::Closed`] once the queue has been closed.
    pub fn try_take(&self) -> Result<T, RecvError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(RecvError::Closed);
        }
        if state.buffer.is_empty() {
            return Err(RecvError::Empty);
        }
        self.release_locked(&mut state);
        match state.buffer.pop_front() {
            Some((element, size)) => {
                state.in_flight = Some((element.clone(), size));
                Ok(element)
            }
            None => Err(RecvError::Empty),
        }
    }

    /// Releases the element most recently returned by
    /// [`take`](Self::take), subtracting it from the accounted usage and
    /// waking a blocked producer when enough free space is available.
    ///
    /// A no-op when no element is outstanding.
    pub fn release(&self) {
        let mut state = self.state.lock();
        self.release_locked(&mut state);
    }

    /// Returns true iff at least one buffered or in-flight element
    /// satisfies the predicate.
    ///
    /// The scan runs under the queue lock and is a point-in-time inclusion
    /// test: elements enqueued after the scan begins may be missed and
    /// elements released concurrently may still be observed.
    pub fn contains<F>(&self, predicate: F) -> bool
    where
        F: Fn(&T) -> bool,
    {
        let state = self.state.lock();
        state.buffer.iter().any(|(element, _)| predicate(element))
            || state
                .in_flight
                .as_ref()
                .is_some_and(|(element, _)| predicate(element))
    }

    /// Closes the queue, waking every blocked producer and the consumer.
    ///
    /// One-shot and irreversible. Buffered elements are not handed out
    /// after closure; they are dropped with the queue.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        _ = self.not_full.notify_all();
        _ = self.not_empty.notify_all();
    }

    /// Accounted byte usage of buffered plus in-flight elements.
    #[must_use]
    pub fn memory_usage(&self) -> usize {
        self.state.lock().used_bytes
    }

    /// Free capacity in bytes.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.capacity_bytes - self.state.lock().used_bytes
    }

    /// Number of buffered plus in-flight elements.
    #[must_use]
    pub fn len(&self) -> usize {
        let state = self.state.lock();
        state.buffer.len() + usize::from(state.in_flight.is_some())
    }

    /// True when no element is buffered or in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True once [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Total byte capacity.
    #[must_use]
    pub fn capacity_bytes(&self) -> usize {
        self.capacity_bytes
    }

    /// Subtracts the outstanding in-flight element, if any, and applies the
    /// producer wake-up policy: one blocked producer is woken when the free
    /// space after the release reaches the configured delta. Requiring a
    /// chunk of free space rather than waking on every release dampens
    /// thundering-herd wake-ups when many small producers are blocked.
    fn release_locked(&self, state: &mut QueueState<T>) {
        if let Some((_, size)) = state.in_flight.take() {
            state.used_bytes = state.used_bytes.saturating_sub(size);
            if self.capacity_bytes - state.used_bytes >= self.notify_delta {
                _ = self.not_full.notify_one();
            }
        }
    }
}
