// Switchyard
// Copyright 2023 Julio Merino
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not
// use this file except in compliance with the License.  You may obtain a copy
// of the License at:
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS, WITHOUT
// WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.  See the
// License for the specific language governing permissions and limitations
// under the License.

//! High-level data types.

use serde::{Deserialize, Serialize};

/// Maximum length of a key name.
const MAX_KEY_LENGTH: usize = 128;

/// Errors caused by invalid model values.
#[derive(Debug, PartialEq, thiserror::Error)]
#[error("{0}")]
pub(crate) struct ModelError(pub(crate) String);

/// Result type for this module.
pub(crate) type ModelResult<T> = Result<T, ModelError>;

/// Newtype pattern for the keys of our key/value store.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd, Serialize)]
pub(crate) struct Key(String);

impl Key {
    /// Creates a new key after validating its `name`.
    pub(crate) fn new<S: Into<String>>(name: S) -> ModelResult<Self> {
        let name = name.into();
        if name.is_empty() || name.len() > MAX_KEY_LENGTH {
            return Err(ModelError(format!(
                "Key name must have 1 to {} characters",
                MAX_KEY_LENGTH
            )));
        }
        let valid = |ch: &char| ch.is_ascii_alphanumeric() || "-._".contains(*ch);
        if let Some(ch) = name.chars().find(|ch| !valid(ch)) {
            return Err(ModelError(format!("Key name contains invalid character '{}'", ch)));
        }
        Ok(Self(name))
    }

    /// Returns the name of the key.
    pub(crate) fn as_str(&self) -> &str {
        &self.0
    }
}

/// A key's current version number.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub(crate) struct Version(u32);

impl Version {
    /// Returns the initial version assigned to new keys.
    pub(crate) fn initial() -> Version {
        Version(1)
    }

    /// Returns the next version to assign to an existing key.
    pub(crate) fn next(self) -> Version {
        Version(self.0.saturating_add(1))
    }

    /// Returns the version as a `u32`.
    pub(crate) fn as_u32(self) -> u32 {
        self.0
    }
}

/// Content of the keys stored in our key/value store.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub(crate) struct Entry {
    /// The key's raw value.
    pub(crate) value: String,

    /// The key's current version number.
    pub(crate) version: Version,
}

impl Entry {
    /// Creates a new entry.
    pub(crate) fn new<S: Into<String>>(value: S, version: Version) -> Self {
        Self { value: value.into(), version }
    }
}
