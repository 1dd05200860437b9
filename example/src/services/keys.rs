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

//! Operations on the keys of the store.

use crate::model::Key;
use crate::store::MemoryStore;
use async_trait::async_trait;
use log::{debug, warn};
use serde::Deserialize;
use serde_json::Value;
use std::sync::{Arc, OnceLock};
use switchyard_core::capability::{Capability, Dependencies, Manifest};
use switchyard_core::catalog::ErrorManager;
use switchyard_core::service::{RequestContext, Service, ServiceError, ServiceResult};

/// Collaborators required by the keys service.
const MANIFEST: Manifest = Manifest::new(&[Capability::DataStore, Capability::ErrorManager]);

/// Arguments to the methods that operate on a single key.
#[derive(Deserialize)]
struct KeyArgs {
    /// Name of the key, if provided by the caller.
    name: Option<String>,
}

/// Arguments to the `put` method.
#[derive(Deserialize)]
struct PutArgs {
    /// Name of the key, if provided by the caller.
    name: Option<String>,

    /// New value for the key.
    value: String,
}

/// Service that exposes the contents of the `MemoryStore`.
#[derive(Debug, Default)]
pub(crate) struct KeysService {
    /// Collaborators received during registration.
    deps: OnceLock<Dependencies>,
}

impl KeysService {
    /// Returns the store and the error manager received during registration.
    fn collaborators(&self) -> ServiceResult<(Arc<MemoryStore>, &ErrorManager)> {
        let deps = self
            .deps
            .get()
            .ok_or_else(|| ServiceError::unexpected("Keys service has not been registered"))?;
        let store = deps
            .data_store::<MemoryStore>()
            .ok_or_else(|| ServiceError::unexpected("Keys service has no memory store"))?;
        let errors = deps
            .error_manager()
            .ok_or_else(|| ServiceError::unexpected("Keys service has no error manager"))?;
        Ok((store, errors))
    }

    /// Validates the key `name` provided by the caller.
    fn key(errors: &ErrorManager, name: Option<String>) -> ServiceResult<Key> {
        let name = name.ok_or_else(|| errors.error("InvalidKey"))?;
        Key::new(name).map_err(|e| {
            debug!("Rejecting key: {}", e);
            errors.error("InvalidKey")
        })
    }

    /// Gets the names of all keys.
    async fn list(&self) -> ServiceResult<Value> {
        let (store, _errors) = self.collaborators()?;
        let keys = store.get_keys().await?;
        Ok(serde_json::to_value(keys)?)
    }

    /// Gets the current value of a key.
    async fn get(&self, args: KeyArgs) -> ServiceResult<Value> {
        let (store, errors) = self.collaborators()?;
        let key = Self::key(errors, args.name)?;
        match store.get_key(&key).await? {
            Some(entry) => Ok(serde_json::to_value(entry)?),
            None => Err(errors.error("KeyNotFound")),
        }
    }

    /// Creates or updates a key.
    async fn put(&self, args: PutArgs) -> ServiceResult<Value> {
        let (store, errors) = self.collaborators()?;
        let key = Self::key(errors, args.name)?;
        let entry = store.set_key(&key, args.value).await?;
        Ok(serde_json::to_value(entry)?)
    }

    /// Deletes an existing key.
    async fn delete(&self, args: KeyArgs) -> ServiceResult<Value> {
        let (store, errors) = self.collaborators()?;
        let key = Self::key(errors, args.name)?;
        if store.delete_key(&key).await? {
            Ok(Value::Null)
        } else {
            Err(errors.error("KeyNotFound"))
        }
    }
}

#[async_trait]
impl Service for KeysService {
    fn manifest(&self) -> Manifest {
        MANIFEST
    }

    fn register(&self, deps: Dependencies) {
        if self.deps.set(deps).is_err() {
            warn!("Keys service registered more than once; keeping the first registration");
        }
    }

    fn has_method(&self, method: &str) -> bool {
        matches!(method, "list" | "get" | "put" | "delete")
    }

    async fn call(
        &self,
        method: &str,
        args: Value,
        context: &RequestContext,
    ) -> ServiceResult<Value> {
        debug!("[{}] Keys service: {}", context.request_id(), method);
        match method {
            "list" => self.list().await,
            "get" => self.get(serde_json::from_value(args)?).await,
            "put" => self.put(serde_json::from_value(args)?).await,
            "delete" => self.delete(serde_json::from_value(args)?).await,
            _ => Err(ServiceError::named(
                "TypeError",
                format!("Service method {} is not a function", method),
            )),
        }
    }
}
