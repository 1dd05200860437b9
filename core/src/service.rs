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

//! Generic contract for the services bound to the route table.
//!
//! Every service implements the `Service` trait.  A service exposes a set of named methods, each
//! of which takes a JSON value with its arguments and returns a JSON value with its result.  The
//! shape of these values is negotiated with the route's input and output transforms, so the
//! service itself never deals with HTTP.
//!
//! Services that need collaborators (data stores, the error manager) declare them in their
//! `manifest` and receive them exactly once via `register`, before the server starts listening.
//! Most services keep the received `Dependencies` in a `OnceLock` so that their methods can reach
//! them later on.

use crate::capability::{Collaborators, Dependencies, Manifest};
use crate::catalog::{ErrorDescriptor, ErrorManager};
use crate::rest::{ErrorResponse, X_REQUEST_ID, X_RETURN_CODE, get_unique_header};
use crate::store::StoreError;
use async_trait::async_trait;
use axum::Json;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use derivative::Derivative;
use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use uuid::Uuid;

/// Maximum length of a request identifier adopted from an incoming request.
const MAX_REQUEST_ID_LENGTH: usize = 128;

/// Errors raised by services and by the transforms that surround them.
///
/// The two variants tell apart defects from declared failures: an `Unexpected` error is always
/// reported as an internal server error, whereas a `Domain` error carries its own HTTP status and
/// return code as defined in the error catalog.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum ServiceError {
    /// A declared domain error, usually obtained from the `ErrorManager`.
    #[error("{0}")]
    Domain(ErrorDescriptor),

    /// Catch-all error type for unexpected failures.
    #[error("{name}: {message}")]
    Unexpected {
        /// Short name of the failure kind.
        name: String,

        /// Descriptive message explaining the nature of the problem.
        message: String,
    },
}

impl ServiceError {
    /// Creates an unexpected failure with a generic name.
    pub fn unexpected<M: Into<String>>(message: M) -> Self {
        Self::named("Error", message)
    }

    /// Creates an unexpected failure with a specific `name`.
    pub fn named<N: Into<String>, M: Into<String>>(name: N, message: M) -> Self {
        ServiceError::Unexpected { name: name.into(), message: message.into() }
    }
}

impl From<ErrorDescriptor> for ServiceError {
    fn from(descriptor: ErrorDescriptor) -> Self {
        ServiceError::Domain(descriptor)
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(e: serde_json::Error) -> Self {
        ServiceError::named("JsonError", e.to_string())
    }
}

impl From<StoreError> for ServiceError {
    fn from(e: StoreError) -> Self {
        ServiceError::named("StoreError", e.to_string())
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> axum::response::Response {
        match self {
            ServiceError::Domain(descriptor) => {
                let status = StatusCode::from_u16(descriptor.status_code)
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                let mut headers = HeaderMap::new();
                headers.insert(X_RETURN_CODE, HeaderValue::from(descriptor.return_code));
                let response =
                    ErrorResponse { name: descriptor.name, message: descriptor.message };
                (status, headers, Json(response)).into_response()
            }

            ServiceError::Unexpected { name, message } => {
                let response = ErrorResponse { name, message };
                (StatusCode::INTERNAL_SERVER_ERROR, Json(response)).into_response()
            }
        }
    }
}

/// Result type for this module.
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Correlation identifier attached to every request and to all of its log lines.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RequestId(String);

impl RequestId {
    /// Generates a new random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Adopts the identifier in the `X-Request-Id` header of a request if it is usable, or
    /// generates a new one otherwise.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        match get_unique_header(headers, &X_REQUEST_ID) {
            Ok(Some(value)) => match value.to_str() {
                Ok(s) if !s.is_empty() && s.len() <= MAX_REQUEST_ID_LENGTH => Self(s.to_owned()),
                _ => Self::generate(),
            },
            _ => Self::generate(),
        }
    }

    /// Returns a string view of the identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Process-wide state shared by all handlers.  Built once while the server starts and never
/// modified afterwards.
#[derive(Debug)]
pub struct DependencyContext {
    /// Collaborators available to services and transforms.
    collaborators: Collaborators,
}

impl DependencyContext {
    /// Creates a new context that exposes `collaborators`.
    pub fn new(collaborators: Collaborators) -> Self {
        Self { collaborators }
    }

    /// Returns the collaborators available to the app.
    pub fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }
}

/// Per-request view of the dependency context.
#[derive(Clone, Debug)]
pub struct RequestContext {
    /// Identifier of the request being processed.
    request_id: RequestId,

    /// The process-wide context.
    shared: Arc<DependencyContext>,
}

impl RequestContext {
    /// Creates a new context for the request identified by `request_id`.
    pub fn new(request_id: RequestId, shared: Arc<DependencyContext>) -> Self {
        Self { request_id, shared }
    }

    /// Returns the identifier of the request being processed.
    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    /// Returns the collaborators available to the app.
    pub fn collaborators(&self) -> &Collaborators {
        self.shared.collaborators()
    }

    /// Returns the error manager to raise catalogued errors.
    pub fn error_manager(&self) -> &ErrorManager {
        self.shared.collaborators().error_manager()
    }
}

/// Abstraction over a service that can be bound to routes.
#[async_trait]
pub trait Service: Send + Sync {
    /// Returns the collaborators that the service needs before it can run.
    fn manifest(&self) -> Manifest {
        Manifest::EMPTY
    }

    /// Receives the collaborators resolved from the `manifest`.
    ///
    /// This is called exactly once per service instance, no matter how many routes reference it.
    /// Capabilities that could not be resolved are left unset in `deps`.
    fn register(&self, _deps: Dependencies) {}

    /// Returns true if `method` names an operation exposed by this service.
    fn has_method(&self, method: &str) -> bool;

    /// Invokes `method` with the `args` computed by the route's input transform.
    async fn call(
        &self,
        method: &str,
        args: Value,
        context: &RequestContext,
    ) -> ServiceResult<Value>;
}

/// Type-erased method of a `ServiceModule`.
type ModuleMethod =
    Arc<dyn Fn(Value, RequestContext) -> BoxFuture<'static, ServiceResult<Value>> + Send + Sync>;

/// Type-erased registration hook of a `ServiceModule`.
type RegisterHook = Box<dyn Fn(&Dependencies) + Send + Sync>;

/// A service assembled out of closures.
///
/// Useful for services that have no state of their own, or that capture it from their
/// environment, and thus do not warrant a dedicated type.
#[derive(Derivative, Default)]
#[derivative(Debug)]
pub struct ServiceModule {
    /// Collaborators required by the service.
    manifest: Manifest,

    /// Methods exposed by the service, keyed by name.
    #[derivative(Debug = "ignore")]
    methods: HashMap<String, ModuleMethod>,

    /// Hook to run when the service is registered.
    #[derivative(Debug = "ignore")]
    on_register: Option<RegisterHook>,
}

impl ServiceModule {
    /// Creates a new service without methods.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares the collaborators required by the service.
    pub fn with_manifest(mut self, manifest: Manifest) -> Self {
        self.manifest = manifest;
        self
    }

    /// Exposes `method` as the operation called `name`.
    pub fn with_method<N, F, Fut>(mut self, name: N, method: F) -> Self
    where
        N: Into<String>,
        F: Fn(Value, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ServiceResult<Value>> + Send + 'static,
    {
        let method: ModuleMethod = Arc::new(move |args, context| method(args, context).boxed());
        self.methods.insert(name.into(), method);
        self
    }

    /// Runs `hook` with the resolved collaborators when the service is registered.
    pub fn on_register<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Dependencies) + Send + Sync + 'static,
    {
        self.on_register = Some(Box::new(hook));
        self
    }
}

#[async_trait]
impl Service for ServiceModule {
    fn manifest(&self) -> Manifest {
        self.manifest
    }

    fn register(&self, deps: Dependencies) {
        if let Some(hook) = self.on_register.as_ref() {
            hook(&deps);
        }
    }

    fn has_method(&self, method: &str) -> bool {
        self.methods.contains_key(method)
    }

    async fn call(
        &self,
        method: &str,
        args: Value,
        context: &RequestContext,
    ) -> ServiceResult<Value> {
        match self.methods.get(method) {
            Some(method) => method(args, context.clone()).await,
            None => Err(ServiceError::named(
                "TypeError",
                format!("Service method {} is not a function", method),
            )),
        }
    }
}
