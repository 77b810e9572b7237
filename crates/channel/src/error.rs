// Copyright The Storeflow Authors
// SPDX-License-Identifier: Apache-2.0

//! Errors for the byte-bounded queue.
//!
//! Important note: errors returned by a blocking endpoint hand the rejected
//! element back to the caller so it can be retried, dropped, or inspected
//! without a copy.

/// Errors that can occur when inserting elements into a queue.
#[derive(thiserror::Error, Debug)]
pub enum SendError<T> {
    /// The queue was closed before or while the element was being inserted.
    /// The element was not enqueued.
    #[error("Queue is closed and the element could not be enqueued")]
    Closed(T),

    /// The element's accounted size exceeds the queue's total capacity, so
    /// it could never be enqueued regardless of how much is drained.
    #[error("Element of {size} bytes exceeds the queue capacity of {capacity} bytes")]
    Oversized {
        /// Accounted size of the rejected element.
        size: usize,
        /// Total byte capacity of the queue.
        capacity: usize,
    },
}

impl<T> SendError<T> {
    /// Returns the rejected element for `Closed` errors; `None` when the
    /// error does not carry the element.
    pub fn into_inner(self) -> Option<T> {
        match self {
            Self::Closed(t) => Some(t),
            Self::Oversized { .. } => None,
        }
    }
}

/// Errors that can occur when consuming elements from a queue.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvError {
    /// The queue is closed. Elements still buffered at close time are
    /// intentionally not handed out.
    #[error("The queue is closed")]
    Closed,

    /// The queue is empty. Only returned by non-blocking reads.
    #[error("The queue is empty")]
    Empty,
}
