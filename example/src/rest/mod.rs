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

//! Route table of the REST API.

use serde_json::{Value, json};
use std::sync::Arc;
use switchyard_core::dispatch::Inbound;
use switchyard_core::routes::RouteEntry;
use switchyard_core::service::{Service, ServiceResult};

mod key_delete;
mod key_get;
mod key_put;
mod keys_get;
mod ping_get;
#[cfg(test)]
mod testutils;

/// Input transform that passes the `name` query parameter to the service.
fn name_from_query(request: &Inbound) -> ServiceResult<Value> {
    Ok(json!({ "name": request.query("name") }))
}

/// Creates the route table for the application.
pub(crate) fn routes(health: Arc<dyn Service>, keys: Arc<dyn Service>) -> Vec<RouteEntry> {
    vec![
        ping_get::route(health),
        keys_get::route(keys.clone()),
        key_get::route(keys.clone()),
        key_put::route(keys.clone()),
        key_delete::route(keys),
    ]
}
