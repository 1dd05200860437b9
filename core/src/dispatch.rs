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

//! Per-request pipeline that runs a route's transforms and service and shapes the outcome.

use crate::rest::{X_REQUEST_ID, X_RETURN_CODE, get_unique_header};
use crate::routes::RouteEntry;
use crate::service::{DependencyContext, RequestContext, RequestId, ServiceError, ServiceResult};
use axum::Json;
use axum::extract::Request;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::future::FutureExt;
use log::{debug, error, warn};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Maximum size of a request body that is read for an input transform.
pub const MAX_BODY_SIZE: usize = 100 * 1024 * 1024;

/// Decoded view of an incoming request, as handed to input transforms.
#[derive(Debug)]
pub struct Inbound {
    /// HTTP method of the request.
    method: Method,

    /// Full URI of the request.
    uri: Uri,

    /// Headers of the request.
    headers: HeaderMap,

    /// Decoded query parameters.  If a parameter is repeated, the last value wins.
    query: HashMap<String, String>,

    /// Raw body of the request.
    body: Bytes,
}

impl Inbound {
    /// Consumes `request` and reads its query and body.
    pub async fn read(request: Request) -> ServiceResult<Self> {
        let (parts, body) = request.into_parts();

        let query = match parts.uri.query() {
            Some(query) => serde_urlencoded::from_str::<Vec<(String, String)>>(query)
                .map_err(|e| ServiceError::named("InvalidQuery", e.to_string()))?
                .into_iter()
                .collect(),
            None => HashMap::default(),
        };

        let body = axum::body::to_bytes(body, MAX_BODY_SIZE)
            .await
            .map_err(|e| ServiceError::named("InvalidPayload", e.to_string()))?;

        Ok(Self { method: parts.method, uri: parts.uri, headers: parts.headers, query, body })
    }

    /// Returns the HTTP method of the request.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the URI of the request.
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Returns all headers of the request.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns the value of the header `name`, which must appear at most once and be valid text.
    pub fn header(&self, name: &HeaderName) -> ServiceResult<Option<&str>> {
        match get_unique_header(&self.headers, name)? {
            Some(value) => value.to_str().map(Some).map_err(|_| {
                ServiceError::named(
                    "InvalidRequest",
                    format!("Header {} has a non-text value", name.as_str()),
                )
            }),
            None => Ok(None),
        }
    }

    /// Returns the value of the query parameter `name`.
    pub fn query(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    /// Returns all query parameters.
    pub fn query_params(&self) -> &HashMap<String, String> {
        &self.query
    }

    /// Returns the raw body of the request.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Parses the body of the request as a JSON document of type `T`.
    pub fn json<T: DeserializeOwned>(&self) -> ServiceResult<T> {
        serde_json::from_slice(&self.body)
            .map_err(|e| ServiceError::named("InvalidPayload", format!("Invalid JSON body: {}", e)))
    }
}

/// Stages of the pipeline, used to tag failures.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Stage {
    /// Reading the request and running the input transform.
    Input,

    /// Running the service method.
    Service,

    /// Running the output transform.
    Output,

    /// Shaping the response payload.
    Response,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Input => "input",
            Stage::Service => "service",
            Stage::Output => "output",
            Stage::Response => "response",
        };
        f.write_str(name)
    }
}

/// A pipeline failure and the stage in which it happened.
struct Failure {
    /// Stage that failed.
    stage: Stage,

    /// The error raised by the stage.
    error: ServiceError,
}

impl Failure {
    /// Returns a function that tags errors with `stage`.
    fn at(stage: Stage) -> impl FnOnce(ServiceError) -> Failure {
        move |error| Failure { stage, error }
    }
}

/// Returns true if `value` counts as absent when shaping a response.
///
/// Only non-empty strings, arrays and objects count as present, so `0` and `true` are empty.
fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null | Value::Bool(_) | Value::Number(_) => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

/// Converts the `headers` field of a payload into HTTP headers.  Null values are skipped.
fn to_header_map(headers: &Value) -> ServiceResult<HeaderMap> {
    let invalid = |message: String| ServiceError::named("InvalidHeaders", message);

    let fields = headers
        .as_object()
        .ok_or_else(|| invalid(format!("Response headers must be an object; got {}", headers)))?;

    let mut map = HeaderMap::with_capacity(fields.len());
    for (name, value) in fields {
        let value = match value {
            Value::Null => continue,
            Value::String(s) => s.clone(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => n.to_string(),
            Value::Array(_) | Value::Object(_) => {
                return Err(invalid(format!("Header {} must have a scalar value", name)));
            }
        };
        let name = HeaderName::try_from(name.as_str())
            .map_err(|e| invalid(format!("Invalid header name {}: {}", name, e)))?;
        let value = HeaderValue::try_from(value)
            .map_err(|e| invalid(format!("Invalid value for header {}: {}", name, e)))?;
        map.insert(name, value);
    }
    Ok(map)
}

/// Builds a successful response with `headers` and `body`.
///
/// Strings are sent as plain text, null or missing bodies as an empty body, and anything else as
/// JSON.
fn send(mut headers: HeaderMap, body: Option<Value>) -> Response {
    headers.insert(X_RETURN_CODE, HeaderValue::from(0u32));
    match body {
        None | Some(Value::Null) => (StatusCode::OK, headers).into_response(),
        Some(Value::String(text)) => (StatusCode::OK, headers, text).into_response(),
        Some(value) => (StatusCode::OK, headers, Json(value)).into_response(),
    }
}

/// Turns the final `payload` of a route into a successful response.
///
/// A payload with non-empty `headers` sends those headers and its `body` as is.  A payload with
/// only a non-empty `body` sends the body.  Any other payload is sent whole.  All responses carry
/// an `X-Return-Code` of 0, which overrides any value set in `headers`.
pub fn shape(payload: Value) -> ServiceResult<Response> {
    let headers = payload.get("headers").filter(|v| !is_empty(v)).cloned();
    let body = payload.get("body").cloned();
    match (headers, body) {
        (None, Some(body)) if !is_empty(&body) => Ok(send(HeaderMap::new(), Some(body))),
        (None, _) => Ok(send(HeaderMap::new(), Some(payload))),
        (Some(headers), body) => Ok(send(to_header_map(&headers)?, body)),
    }
}

/// Runs all stages of the pipeline for `request` against `route`.
async fn run(
    request: Request,
    route: &RouteEntry,
    context: RequestContext,
) -> Result<Response, Failure> {
    let args = match route.input() {
        Some(input) => {
            let inbound = Inbound::read(request).await.map_err(Failure::at(Stage::Input))?;
            input(inbound, context.clone()).await.map_err(Failure::at(Stage::Input))?
        }
        None => Value::Object(Map::new()),
    };

    let result = route
        .service()
        .call(route.method_name(), args, &context)
        .await
        .map_err(Failure::at(Stage::Service))?;

    let payload = match route.output() {
        Some(output) => output(result).await.map_err(Failure::at(Stage::Output))?,
        None => result,
    };

    shape(payload).map_err(Failure::at(Stage::Response))
}

/// Extracts a printable message out of a panic payload.
fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "Unknown panic".to_owned()
    }
}

/// Processes `request` through the pipeline of `route`.
///
/// This never fails: errors raised by any stage, and panics, are converted to error responses.
/// All responses carry the `X-Request-Id` of the request.
pub async fn dispatch(
    request: Request,
    route: &RouteEntry,
    shared: Arc<DependencyContext>,
) -> Response {
    let request_id = RequestId::from_headers(request.headers());
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    debug!("[{}] {} {} -> {}", request_id, method, path, route.method_name());

    let context = RequestContext::new(request_id.clone(), shared);
    let mut response = match AssertUnwindSafe(run(request, route, context)).catch_unwind().await {
        Ok(Ok(response)) => response,
        Ok(Err(Failure { stage, error })) => {
            warn!("[{}] {} {} failed at {} stage: {}", request_id, method, path, stage, error);
            error.into_response()
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!("[{}] {} {} panicked: {}", request_id, method, path, message);
            ServiceError::named("Panic", message).into_response()
        }
    };

    if let Ok(value) = HeaderValue::from_str(request_id.as_str()) {
        response.headers_mut().insert(X_REQUEST_ID, value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::Collaborators;
    use crate::catalog::{ErrorCatalog, ErrorManager, ErrorSpec};
    use crate::rest::testutils::*;
    use crate::routes::{self, RouteEntry};
    use crate::service::{Service, ServiceModule};
    use axum::Router;
    use axum::http;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn shared() -> Arc<DependencyContext> {
        let catalog = ErrorCatalog::new().with("NotFound", ErrorSpec::new("missing", 404, 4004));
        Arc::new(DependencyContext::new(Collaborators::new(ErrorManager::new(catalog))))
    }

    fn app(entry: RouteEntry) -> Router {
        setup_logging();
        routes::build(&[entry], "", shared()).unwrap().into_router()
    }

    /// Creates a service whose `run` method returns a fixed `result`.
    fn returning(result: Value) -> Arc<dyn Service> {
        Arc::new(ServiceModule::new().with_method("run", move |_args, _context| {
            let result = result.clone();
            async move { Ok(result) }
        }))
    }

    /// Creates a service whose `run` method echoes its arguments.
    fn echo() -> Arc<dyn Service> {
        Arc::new(ServiceModule::new().with_method("run", |args, _context| async move { Ok(args) }))
    }

    async fn body_of(response: Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), MAX_BODY_SIZE).await.unwrap().to_vec()
    }

    #[tokio::test]
    async fn test_ping_pong() {
        let app = app(RouteEntry::new("GET", "/ping", returning(json!("pong")), "run"));

        let response = OneShotBuilder::new(app, (http::Method::GET, "/ping"))
            .send_empty()
            .await
            .expect_return_code(0)
            .take_response()
            .await;
        assert_eq!(
            "text/plain; charset=utf-8",
            response.headers().get(http::header::CONTENT_TYPE).unwrap()
        );
        assert!(response.headers().contains_key(X_REQUEST_ID));
        assert_eq!(b"pong", body_of(response).await.as_slice());
    }

    #[tokio::test]
    async fn test_no_input_transform_passes_empty_object() {
        let app = app(RouteEntry::new("POST", "/echo", echo(), "run"));

        let response = OneShotBuilder::new(app, (http::Method::POST, "/echo"))
            .with_query(&[("ignored", "yes")])
            .send_json(json!({"also": "ignored"}))
            .await
            .expect_return_code(0)
            .expect_json::<Value>()
            .await;
        assert_eq!(json!({}), response);
    }

    #[tokio::test]
    async fn test_raw_result_sent_whole() {
        let app = app(RouteEntry::new("GET", "/data", returning(json!({"a": 1, "b": [2]})), "run"));

        let response = OneShotBuilder::new(app, (http::Method::GET, "/data"))
            .send_empty()
            .await
            .expect_return_code(0)
            .expect_json::<Value>()
            .await;
        assert_eq!(json!({"a": 1, "b": [2]}), response);
    }

    #[tokio::test]
    async fn test_domain_error() {
        let service = Arc::new(ServiceModule::new().with_method("run", |_args, context| async move {
            Err(context.error_manager().error("NotFound"))
        }));
        let app = app(RouteEntry::new("GET", "/thing", service, "run"));

        OneShotBuilder::new(app, (http::Method::GET, "/thing"))
            .send_empty()
            .await
            .expect_status(http::StatusCode::NOT_FOUND)
            .expect_return_code(4004)
            .expect_error("NotFound", "^missing$")
            .await;
    }

    #[tokio::test]
    async fn test_unknown_domain_error() {
        let service = Arc::new(ServiceModule::new().with_method("run", |_args, context| async move {
            Err(context.error_manager().error("Bogus"))
        }));
        let app = app(RouteEntry::new("GET", "/thing", service, "run"));

        OneShotBuilder::new(app, (http::Method::GET, "/thing"))
            .send_empty()
            .await
            .expect_status(http::StatusCode::BAD_REQUEST)
            .expect_return_code(3000)
            .expect_error("Bogus", r"^Error name \[Bogus\] not supported$")
            .await;
    }

    #[tokio::test]
    async fn test_unexpected_error() {
        let service = Arc::new(ServiceModule::new().with_method(
            "run",
            |_args, _context| async move {
                Err(ServiceError::named("TypeError", "x is undefined"))
            },
        ));
        let app = app(RouteEntry::new("GET", "/thing", service, "run"));

        OneShotBuilder::new(app, (http::Method::GET, "/thing"))
            .send_empty()
            .await
            .expect_status(http::StatusCode::INTERNAL_SERVER_ERROR)
            .expect_no_return_code()
            .expect_error("TypeError", "x is undefined")
            .await;
    }

    #[tokio::test]
    async fn test_input_transform_reads_request() {
        fn describe(request: Inbound, context: RequestContext) -> ServiceResult<Value> {
            Ok(json!({
                "method": request.method().as_str(),
                "name": request.query("name"),
                "version": request.header(&HeaderName::from_static("x-version"))?,
                "payload": request.json::<Value>()?,
                "request_id": context.request_id().as_str(),
            }))
        }

        let entry = RouteEntry::new("PUT", "/item", echo(), "run")
            .with_input(|request, context| async move { describe(request, context) });

        let response = OneShotBuilder::new(app(entry), (http::Method::PUT, "/item"))
            .with_query(&[("name", "a b")])
            .with_header("X-Version", "7")
            .with_header("X-Request-Id", "req-1")
            .send_json(json!({"value": 3}))
            .await
            .expect_return_code(0)
            .expect_json::<Value>()
            .await;
        assert_eq!(
            json!({
                "method": "PUT",
                "name": "a b",
                "version": "7",
                "payload": {"value": 3},
                "request_id": "req-1",
            }),
            response
        );
    }

    #[tokio::test]
    async fn test_input_transform_failure_skips_service() {
        let calls = Arc::new(AtomicUsize::new(0));
        let service = {
            let calls = calls.clone();
            Arc::new(ServiceModule::new().with_method("run", move |args, _context| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Ok(args) }
            }))
        };
        let entry = RouteEntry::new("POST", "/item", service, "run")
            .with_input(|request, _context| async move { request.json::<Value>() });

        OneShotBuilder::new(app(entry), (http::Method::POST, "/item"))
            .send_text("not json")
            .await
            .expect_status(http::StatusCode::INTERNAL_SERVER_ERROR)
            .expect_no_return_code()
            .expect_error("InvalidPayload", "Invalid JSON body")
            .await;
        assert_eq!(0, calls.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_output_transform() {
        let entry = RouteEntry::new("GET", "/wrapped", returning(json!([1, 2])), "run")
            .with_output(|result| async move { Ok(json!({"body": {"items": result}})) });

        let response = OneShotBuilder::new(app(entry), (http::Method::GET, "/wrapped"))
            .send_empty()
            .await
            .expect_return_code(0)
            .expect_json::<Value>()
            .await;
        assert_eq!(json!({"items": [1, 2]}), response);
    }

    #[tokio::test]
    async fn test_output_transform_failure() {
        let entry = RouteEntry::new("GET", "/wrapped", returning(json!(1)), "run").with_output(
            |_result| async move { Err(ServiceError::unexpected("cannot transform")) },
        );

        OneShotBuilder::new(app(entry), (http::Method::GET, "/wrapped"))
            .send_empty()
            .await
            .expect_status(http::StatusCode::INTERNAL_SERVER_ERROR)
            .expect_no_return_code()
            .expect_error("Error", "cannot transform")
            .await;
    }

    #[tokio::test]
    async fn test_headers_and_body() {
        let result = json!({
            "headers": {"X-Custom": "yes", "X-Count": 3, "X-Return-Code": 7, "X-Skip": null},
            "body": {"ok": true},
        });
        let app = app(RouteEntry::new("GET", "/h", returning(result), "run"));

        let checker = OneShotBuilder::new(app, (http::Method::GET, "/h"))
            .send_empty()
            .await
            .expect_return_code(0);
        assert_eq!(Some("yes".to_owned()), checker.header("x-custom"));
        assert_eq!(Some("3".to_owned()), checker.header("x-count"));
        assert_eq!(None, checker.header("x-skip"));
        assert_eq!(json!({"ok": true}), checker.expect_json::<Value>().await);
    }

    #[tokio::test]
    async fn test_headers_without_body() {
        let result = json!({"headers": {"Location": "/elsewhere"}});
        let app = app(RouteEntry::new("GET", "/h", returning(result), "run"));

        let checker = OneShotBuilder::new(app, (http::Method::GET, "/h"))
            .send_empty()
            .await
            .expect_return_code(0);
        assert_eq!(Some("/elsewhere".to_owned()), checker.header("location"));
        checker.expect_empty().await;
    }

    #[tokio::test]
    async fn test_invalid_headers() {
        let result = json!({"headers": {"X-Bad": [1, 2]}, "body": "x"});
        let app = app(RouteEntry::new("GET", "/h", returning(result), "run"));

        OneShotBuilder::new(app, (http::Method::GET, "/h"))
            .send_empty()
            .await
            .expect_status(http::StatusCode::INTERNAL_SERVER_ERROR)
            .expect_no_return_code()
            .expect_error("InvalidHeaders", "X-Bad must have a scalar value")
            .await;
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let service = Arc::new(ServiceModule::new().with_method("run", |args, _context| async move {
            if args.is_object() {
                panic!("Service crashed");
            }
            Ok(args)
        }));
        let app = app(RouteEntry::new("GET", "/crash", service, "run"));

        let checker = OneShotBuilder::new(app.clone(), (http::Method::GET, "/crash"))
            .with_header("X-Request-Id", "crash-1")
            .send_empty()
            .await
            .expect_status(http::StatusCode::INTERNAL_SERVER_ERROR)
            .expect_no_return_code();
        assert_eq!(Some("crash-1".to_owned()), checker.header("x-request-id"));
        checker.expect_error("Panic", "^Service crashed$").await;

        // The router keeps serving after a panic.
        OneShotBuilder::new(app, (http::Method::GET, "/crash"))
            .send_empty()
            .await
            .expect_status(http::StatusCode::INTERNAL_SERVER_ERROR)
            .expect_error("Panic", "Service crashed")
            .await;
    }

    #[tokio::test]
    async fn test_request_id_generated_per_request() {
        let app = app(RouteEntry::new("GET", "/ping", returning(json!("pong")), "run"));

        let mut ids = vec![];
        for _ in 0..2 {
            let checker = OneShotBuilder::new(app.clone(), (http::Method::GET, "/ping"))
                .send_empty()
                .await;
            ids.push(checker.header("x-request-id").unwrap());
            checker.expect_text("pong").await;
        }
        assert_ne!(ids[0], ids[1]);
    }

    #[tokio::test]
    async fn test_shape_empty_payloads() {
        let response = shape(json!(null)).unwrap();
        assert!(body_of(response).await.is_empty());

        let response = shape(json!({"headers": {}, "body": ""})).unwrap();
        assert_eq!(
            json!({"headers": {}, "body": ""}),
            serde_json::from_slice::<Value>(&body_of(response).await).unwrap()
        );

        let response = shape(json!({"headers": null, "body": "text"})).unwrap();
        assert_eq!(b"text", body_of(response).await.as_slice());
    }

    #[tokio::test]
    async fn test_shape_scalars_are_empty() {
        for payload in [json!({"body": 0}), json!({"body": false}), json!({"body": 0, "extra": 1})]
        {
            let response = shape(payload.clone()).unwrap();
            assert_eq!(
                payload,
                serde_json::from_slice::<Value>(&body_of(response).await).unwrap()
            );
        }

        let response = shape(json!({"headers": {"X-Custom": "yes"}, "body": 0})).unwrap();
        assert_eq!(Some(&HeaderValue::from_static("yes")), response.headers().get("x-custom"));
        assert_eq!(b"0", body_of(response).await.as_slice());
    }

    #[test]
    fn test_shape_headers_must_be_object() {
        match shape(json!({"headers": ["a"], "body": "x"})) {
            Err(ServiceError::Unexpected { name, .. }) => assert_eq!("InvalidHeaders", name),
            e => panic!("Unexpected result {:?}", e.map(|_| ())),
        }
    }

    #[test]
    fn test_stage_display() {
        assert_eq!("input", Stage::Input.to_string());
        assert_eq!("service", Stage::Service.to_string());
        assert_eq!("output", Stage::Output.to_string());
        assert_eq!("response", Stage::Response.to_string());
    }
}
