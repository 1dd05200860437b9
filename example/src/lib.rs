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

//! Sample REST service that implements a key/value store.

// Keep these in sync with other top-level files.
#![warn(anonymous_parameters, bad_style, clippy::missing_docs_in_private_items, missing_docs)]
#![warn(unused, unused_extern_crates, unused_import_braces, unused_qualifications)]
#![warn(unsafe_code)]

use std::sync::Arc;
use switchyard_core::capability::Collaborators;
use switchyard_core::catalog::{ErrorCatalog, ErrorManager};
use switchyard_core::server::{Server, ServerOptions};

pub(crate) mod model;
mod rest;
mod services;
use services::{KeysService, health_service};
mod store;
use store::MemoryStore;

/// Loads the catalog of the domain errors raised by the service.
pub fn error_catalog() -> Result<ErrorCatalog, serde_json::Error> {
    ErrorCatalog::from_json(include_str!("../errors.json"))
}

/// Instantiates all resources to serve the application with `options`.
///
/// While it'd be nice to push this responsibility to `main`, doing so would force us to expose many
/// crate-internal types to the public, which in turn would make dead code detection harder.
pub fn new_server(options: ServerOptions) -> Result<Server, serde_json::Error> {
    let store = Arc::new(MemoryStore::new());
    let collaborators =
        Collaborators::new(ErrorManager::new(error_catalog()?)).with_data_store(store.clone());
    let routes = rest::routes(Arc::new(health_service()), Arc::new(KeysService::default()));
    Ok(Server::new(options, collaborators, routes).with_store(store))
}
