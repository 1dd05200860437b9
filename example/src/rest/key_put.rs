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

//! API to create or update a key.

use crate::model::Entry;
use log::debug;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use switchyard_core::dispatch::Inbound;
use switchyard_core::routes::RouteEntry;
use switchyard_core::service::{RequestContext, Service, ServiceResult};

/// Message sent to the server to set the value of a key.
#[derive(Deserialize)]
struct PutRequest {
    /// The new value of the key.
    value: String,
}

/// Computes the arguments to the `put` method from the query and the body of the request.
async fn input(request: Inbound, context: RequestContext) -> ServiceResult<Value> {
    let body: PutRequest = request.json().map_err(|e| {
        debug!("[{}] Rejecting value: {}", context.request_id(), e);
        context.error_manager().error("InvalidValue")
    })?;
    Ok(json!({ "name": request.query("name"), "value": body.value }))
}

/// Reports the new version of the key in a header next to the updated entry.
async fn output(result: Value) -> ServiceResult<Value> {
    let entry: Entry = serde_json::from_value(result)?;
    Ok(json!({
        "headers": { "X-Key-Version": entry.version.as_u32() },
        "body": entry,
    }))
}

/// API route.
pub(crate) fn route(keys: Arc<dyn Service>) -> RouteEntry {
    RouteEntry::new("PUT", "/key", keys, "put").with_input(input).with_output(output)
}
