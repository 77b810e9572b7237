// Copyright The Storeflow Authors
// SPDX-License-Identifier: Apache-2.0

//! Blocking queue implementations bounded by payload bytes rather than
//! element count.

pub mod bounded;
pub mod error;
