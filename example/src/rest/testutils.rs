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

//! Test utilities for the REST API.

use crate::error_catalog;
use crate::model::{Entry, Key};
use crate::rest::routes;
use crate::services::{KeysService, health_service};
use crate::store::MemoryStore;
use axum::Router;
use std::sync::Arc;
use switchyard_core::capability::Collaborators;
use switchyard_core::catalog::ErrorManager;
use switchyard_core::rest::testutils::setup_logging;
use switchyard_core::routes::build;
use switchyard_core::service::DependencyContext;
use switchyard_core::store::Store;

pub(crate) struct TestContext {
    store: Arc<MemoryStore>,
    app: Router,
}

impl TestContext {
    pub(crate) async fn setup() -> Self {
        setup_logging();

        let store = Arc::new(MemoryStore::new());
        store.start().await.unwrap();

        let collaborators = Collaborators::new(ErrorManager::new(error_catalog().unwrap()))
            .with_data_store(store.clone());
        let shared = Arc::new(DependencyContext::new(collaborators));

        let routes = routes(Arc::new(health_service()), Arc::new(KeysService::default()));
        let app = build(&routes, "/api/v1", shared).unwrap().into_router();
        Self { store, app }
    }

    pub(crate) fn app(&self) -> Router {
        self.app.clone()
    }

    pub(crate) async fn set_key(&self, key: &str, value: &str) -> Entry {
        self.store.set_key(&Key::new(key).unwrap(), value.to_owned()).await.unwrap()
    }

    pub(crate) async fn get_key(&self, key: &str) -> Option<Entry> {
        self.store.get_key(&Key::new(key).unwrap()).await.unwrap()
    }
}
