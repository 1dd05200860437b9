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

//! In-memory persistence layer for the key/value store.

use crate::model::{Entry, Key, Version};
use async_trait::async_trait;
use log::info;
use std::collections::BTreeMap;
use switchyard_core::store::{Store, StoreError, StoreResult};
use tokio::sync::RwLock;

/// A key/value store that keeps its contents in memory.
///
/// The contents are only accessible while the store is started and are lost when the store stops.
#[derive(Debug, Default)]
pub(crate) struct MemoryStore {
    /// The stored entries, or `None` if the store is not started.
    entries: RwLock<Option<BTreeMap<Key, Entry>>>,
}

impl MemoryStore {
    /// Creates a new store that must be started before it can be used.
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Error to return when accessing the store while it is stopped.
    fn not_started() -> StoreError {
        StoreError("Memory store is not started".to_owned())
    }

    /// Gets the names of all keys in order.
    pub(crate) async fn get_keys(&self) -> StoreResult<Vec<Key>> {
        let entries = self.entries.read().await;
        let entries = entries.as_ref().ok_or_else(Self::not_started)?;
        Ok(entries.keys().cloned().collect())
    }

    /// Gets the current value of the given `key`, if any.
    pub(crate) async fn get_key(&self, key: &Key) -> StoreResult<Option<Entry>> {
        let entries = self.entries.read().await;
        let entries = entries.as_ref().ok_or_else(Self::not_started)?;
        Ok(entries.get(key).cloned())
    }

    /// Sets `key` to `value`, assigning it the next version number, and returns the new entry.
    pub(crate) async fn set_key(&self, key: &Key, value: String) -> StoreResult<Entry> {
        let mut entries = self.entries.write().await;
        let entries = entries.as_mut().ok_or_else(Self::not_started)?;
        let version = entries.get(key).map(|e| e.version.next()).unwrap_or_else(Version::initial);
        let entry = Entry::new(value, version);
        entries.insert(key.clone(), entry.clone());
        Ok(entry)
    }

    /// Deletes `key` and returns whether it existed.
    pub(crate) async fn delete_key(&self, key: &Key) -> StoreResult<bool> {
        let mut entries = self.entries.write().await;
        let entries = entries.as_mut().ok_or_else(Self::not_started)?;
        Ok(entries.remove(key).is_some())
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn start(&self) -> StoreResult<()> {
        let mut entries = self.entries.write().await;
        if entries.is_some() {
            return Err(StoreError("Memory store already started".to_owned()));
        }
        *entries = Some(BTreeMap::default());
        info!("Memory store started");
        Ok(())
    }

    async fn stop(&self) -> StoreResult<()> {
        let mut entries = self.entries.write().await;
        match entries.take() {
            Some(old) => {
                info!("Memory store stopped; discarded {} keys", old.len());
                Ok(())
            }
            None => Err(Self::not_started()),
        }
    }
}
