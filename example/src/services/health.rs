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

//! Liveness checks.

use serde_json::json;
use switchyard_core::service::ServiceModule;

/// Creates the health service, which has no collaborators and exposes a single `ping` method.
pub(crate) fn health_service() -> ServiceModule {
    ServiceModule::new().with_method("ping", |_args, _context| async move { Ok(json!("pong")) })
}
