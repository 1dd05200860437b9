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

//! Test utilities for the business layer.

use crate::error_catalog;
use crate::model::{Entry, Key};
use crate::services::KeysService;
use crate::store::MemoryStore;
use std::sync::Arc;
use switchyard_core::capability::{Collaborators, resolve};
use switchyard_core::catalog::ErrorManager;
use switchyard_core::service::{DependencyContext, RequestContext, RequestId, Service};
use switchyard_core::store::Store;

pub(crate) struct TestContext {
    store: Arc<MemoryStore>,
    shared: Arc<DependencyContext>,
    keys: KeysService,
}

impl TestContext {
    pub(crate) async fn setup() -> Self {
        let store = Arc::new(MemoryStore::new());
        store.start().await.unwrap();

        let collaborators = Collaborators::new(ErrorManager::new(error_catalog().unwrap()))
            .with_data_store(store.clone());

        let keys = KeysService::default();
        keys.register(resolve(keys.manifest(), &collaborators));

        let shared = Arc::new(DependencyContext::new(collaborators));
        Self { store, shared, keys }
    }

    pub(crate) fn keys(&self) -> &KeysService {
        &self.keys
    }

    pub(crate) fn request(&self) -> RequestContext {
        RequestContext::new(RequestId::generate(), self.shared.clone())
    }

    pub(crate) async fn set_key(&self, key: &str, value: &str) -> Entry {
        self.store.set_key(&Key::new(key).unwrap(), value.to_owned()).await.unwrap()
    }

    pub(crate) async fn get_key(&self, key: &str) -> Option<Entry> {
        self.store.get_key(&Key::new(key).unwrap()).await.unwrap()
    }
}
