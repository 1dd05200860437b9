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

//! API to delete a key.

use crate::rest::name_from_query;
use std::sync::Arc;
use switchyard_core::routes::RouteEntry;
use switchyard_core::service::Service;

/// API route.
pub(crate) fn route(keys: Arc<dyn Service>) -> RouteEntry {
    RouteEntry::new("DELETE", "/key", keys, "delete")
        .with_input(|request, _context| async move { name_from_query(&request) })
}

#[cfg(test)]
mod tests {
    use crate::rest::testutils::*;
    use axum::http;
    use switchyard_core::rest::testutils::*;

    fn route() -> (http::Method, String) {
        (http::Method::DELETE, "/api/v1/key".to_owned())
    }

    #[tokio::test]
    async fn test_ok() {
        let context = TestContext::setup().await;

        context.set_key("first", "value").await;
        context.set_key("second", "value").await;

        OneShotBuilder::new(context.app(), route())
            .with_query(&[("name", "first")])
            .send_empty()
            .await
            .expect_return_code(0)
            .expect_empty()
            .await;

        assert!(context.get_key("first").await.is_none());
        assert!(context.get_key("second").await.is_some());
    }

    #[tokio::test]
    async fn test_not_found() {
        let context = TestContext::setup().await;

        context.set_key("first", "value").await;

        OneShotBuilder::new(context.app(), route())
            .with_query(&[("name", "second")])
            .send_empty()
            .await
            .expect_status(http::StatusCode::NOT_FOUND)
            .expect_return_code(4004)
            .expect_error("KeyNotFound", "not found")
            .await;

        assert!(context.get_key("first").await.is_some());
    }
}
