// Copyright The Storeflow Authors
// SPDX-License-Identifier: Apache-2.0

//! Support for byte units like "KB / KiB", "MB / MiB", "GB / GiB" in configuration files.

use byte_unit::Byte;
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum Value {
    Number(u64),
    String(String),
}

/// Deserialize a byte size that can be specified either as a number (in
/// bytes) or as a string with units (e.g. "1 KB", "32 MiB").
pub fn deserialize<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;

    match value {
        Value::Number(value) => Ok(value),
        Value::String(text) => {
            let parsed: Byte = text.parse().map_err(DeError::custom)?;
            u64::try_from(parsed.as_u128()).map_err(|_| {
                DeError::custom(format!("byte size '{text}' exceeds u64::MAX bytes"))
            })
        }
    }
}
