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

//! Route table description and compilation.
//!
//! Apps describe their HTTP surface as a list of `RouteEntry` values, like this:
//!
//! ```rust,ignore
//! vec![
//!     RouteEntry::new("GET", "/ping", health.clone(), "ping"),
//!     RouteEntry::new("GET", "/key", keys.clone(), "get")
//!         .with_input(|request, _context| async move {
//!             Ok(json!({ "name": request.query("name") }))
//!         }),
//! ]
//! ```
//!
//! The list is compiled into an `axum::Router` by `build`, which also registers every distinct
//! service with the collaborators it declares in its manifest.

use crate::capability::{self, Collaborators};
use crate::dispatch::{Inbound, dispatch};
use crate::service::{DependencyContext, RequestContext, Service, ServiceResult};
use axum::Router;
use axum::extract::Request;
use axum::http::Method;
use axum::routing::{MethodFilter, MethodRouter, on};
use derivative::Derivative;
use futures::future::{BoxFuture, FutureExt};
use log::{debug, info};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::future::Future;
use std::sync::Arc;

/// Route table errors.  These are detected while the server starts and are fatal.
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// Indicates that two entries bind the same method and path.
    #[error("Duplicate route {method} {path}")]
    DuplicateRoute {
        /// The duplicated HTTP method.
        method: String,

        /// The duplicated full path.
        path: String,
    },

    /// Indicates that an entry has a method that is not a supported HTTP method.
    #[error("Invalid HTTP method '{method}' for {path}")]
    InvalidMethod {
        /// The offending method.
        method: String,

        /// Path of the entry.
        path: String,
    },

    /// Indicates that a path or the context path is malformed.
    #[error("Invalid path '{path}': {reason}")]
    InvalidPath {
        /// The offending path.
        path: String,

        /// Description of the problem.
        reason: String,
    },

    /// Indicates that an entry lacks an HTTP method.
    #[error("Route #{index} for {path} lacks an HTTP method")]
    MissingMethod {
        /// Position of the entry in the table.
        index: usize,

        /// Path of the entry.
        path: String,
    },

    /// Indicates that an entry lacks a path.
    #[error("Route #{0} lacks a path")]
    MissingPath(usize),

    /// Indicates that the route table is empty.
    #[error("Route table is empty")]
    NoRoutes,

    /// Indicates that an entry references a method that its service does not expose.
    #[error("Service method '{method_name}' for {path} does not exist")]
    UnknownMethodName {
        /// The unknown method name.
        method_name: String,

        /// Path of the entry.
        path: String,
    },
}

/// Result type for this module.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Transform that computes the arguments to a service method out of a request.
pub type InputTransform =
    Arc<dyn Fn(Inbound, RequestContext) -> BoxFuture<'static, ServiceResult<Value>> + Send + Sync>;

/// Transform that computes the response payload out of the result of a service method.
pub type OutputTransform =
    Arc<dyn Fn(Value) -> BoxFuture<'static, ServiceResult<Value>> + Send + Sync>;

/// Binding of an HTTP method and path to a service method.
#[derive(Clone, Derivative)]
#[derivative(Debug)]
pub struct RouteEntry {
    /// HTTP method, matched case-insensitively.
    method: String,

    /// Path of the route relative to the context path.
    path_name: String,

    /// Service that implements the route.
    #[derivative(Debug = "ignore")]
    service: Arc<dyn Service>,

    /// Name of the service method to invoke.
    method_name: String,

    /// Optional transform to compute the method's arguments.
    #[derivative(Debug = "ignore")]
    input: Option<InputTransform>,

    /// Optional transform to compute the response payload.
    #[derivative(Debug = "ignore")]
    output: Option<OutputTransform>,
}

impl RouteEntry {
    /// Binds `method` and `path_name` to the `method_name` operation of `service`.
    pub fn new<M, P, N>(method: M, path_name: P, service: Arc<dyn Service>, method_name: N) -> Self
    where
        M: Into<String>,
        P: Into<String>,
        N: Into<String>,
    {
        Self {
            method: method.into(),
            path_name: path_name.into(),
            service,
            method_name: method_name.into(),
            input: None,
            output: None,
        }
    }

    /// Sets the transform that computes the method's arguments out of the request.
    pub fn with_input<F, Fut>(mut self, transform: F) -> Self
    where
        F: Fn(Inbound, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ServiceResult<Value>> + Send + 'static,
    {
        self.input = Some(Arc::new(move |request, context| transform(request, context).boxed()));
        self
    }

    /// Sets the transform that computes the response payload out of the method's result.
    pub fn with_output<F, Fut>(mut self, transform: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ServiceResult<Value>> + Send + 'static,
    {
        self.output = Some(Arc::new(move |result| transform(result).boxed()));
        self
    }

    /// Returns the HTTP method of the route.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Returns the path of the route relative to the context path.
    pub fn path_name(&self) -> &str {
        &self.path_name
    }

    /// Returns the name of the service method to invoke.
    pub fn method_name(&self) -> &str {
        &self.method_name
    }

    /// Returns the service that implements the route.
    pub(crate) fn service(&self) -> &Arc<dyn Service> {
        &self.service
    }

    /// Returns the input transform, if any.
    pub(crate) fn input(&self) -> Option<&InputTransform> {
        self.input.as_ref()
    }

    /// Returns the output transform, if any.
    pub(crate) fn output(&self) -> Option<&OutputTransform> {
        self.output.as_ref()
    }
}

/// A compiled route table.
#[derive(Debug)]
pub struct RouteTable {
    /// Router that serves all routes.
    router: Router,

    /// Full paths bound by the table.
    paths: BTreeSet<String>,

    /// Number of distinct services that were registered.
    services: usize,
}

impl RouteTable {
    /// Returns the full paths bound by the table.
    pub fn paths(&self) -> &BTreeSet<String> {
        &self.paths
    }

    /// Returns the number of distinct services that were registered while building the table.
    pub fn services(&self) -> usize {
        self.services
    }

    /// Returns a router that serves all routes.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Consumes the table and returns its router.
    pub fn into_router(self) -> Router {
        self.router
    }
}

/// Checks that `path` is an exact path that axum can route.
pub(crate) fn check_path(path: &str) -> Result<(), String> {
    if !path.starts_with('/') {
        return Err("must start with /".to_owned());
    }
    if path.contains(['?', '#', '{', '}']) {
        return Err("must not contain query, fragment or template characters".to_owned());
    }
    if path.contains([':', '*']) {
        return Err("only exact paths are supported".to_owned());
    }
    Ok(())
}

/// Validates and normalizes the `context_path` under which all routes are bound.
fn normalize_context_path(context_path: &str) -> ConfigResult<String> {
    let trimmed = context_path.trim_end_matches('/');
    if trimmed.is_empty() {
        return Ok(String::new());
    }
    check_path(trimmed).map_err(|reason| ConfigError::InvalidPath {
        path: context_path.to_owned(),
        reason,
    })?;
    Ok(trimmed.to_owned())
}

/// Validated binding of a single entry.
struct Binding {
    /// HTTP method to match.
    method: Method,

    /// Filter equivalent to `method`.
    filter: MethodFilter,

    /// Full path, including the context path.
    path: String,
}

/// Validates the entry at position `index` and computes its binding under `context_path`.
fn validate(index: usize, entry: &RouteEntry, context_path: &str) -> ConfigResult<Binding> {
    if entry.path_name.is_empty() {
        return Err(ConfigError::MissingPath(index));
    }
    check_path(&entry.path_name).map_err(|reason| ConfigError::InvalidPath {
        path: entry.path_name.clone(),
        reason,
    })?;
    let path = format!("{}{}", context_path, entry.path_name);

    if entry.method.trim().is_empty() {
        return Err(ConfigError::MissingMethod { index, path });
    }
    let invalid_method =
        || ConfigError::InvalidMethod { method: entry.method.clone(), path: path.clone() };
    let method = Method::from_bytes(entry.method.trim().to_ascii_uppercase().as_bytes())
        .map_err(|_| invalid_method())?;
    let filter = MethodFilter::try_from(method.clone()).map_err(|_| invalid_method())?;

    if !entry.service.has_method(&entry.method_name) {
        return Err(ConfigError::UnknownMethodName {
            method_name: entry.method_name.clone(),
            path,
        });
    }

    Ok(Binding { method, filter, path })
}

/// Registers every distinct service referenced by `entries` exactly once, injecting the
/// collaborators declared in their manifests.
///
/// Services are told apart by the identity of their instances, so two entries that reference the
/// same `Arc` only cause one registration.  Returns the number of registered services.
fn register_services(entries: &[RouteEntry], collaborators: &Collaborators) -> usize {
    let mut registered = HashSet::new();
    for entry in entries {
        let identity = Arc::as_ptr(&entry.service).cast::<()>();
        if !registered.insert(identity) {
            continue;
        }

        let manifest = entry.service.manifest();
        let deps = capability::resolve(manifest, collaborators);
        debug!(
            "Registering service for {} {} with {:?}",
            entry.method,
            entry.path_name,
            manifest.capabilities()
        );
        entry.service.register(deps);
    }
    registered.len()
}

/// Compiles `entries` into a route table, binding every path under `context_path`.
///
/// All entries are validated before any service is registered, so a malformed table has no side
/// effects.  Every handler in the table dispatches requests with the shared context.
pub fn build(
    entries: &[RouteEntry],
    context_path: &str,
    shared: Arc<DependencyContext>,
) -> ConfigResult<RouteTable> {
    if entries.is_empty() {
        return Err(ConfigError::NoRoutes);
    }
    let context_path = normalize_context_path(context_path)?;

    let mut bindings = Vec::with_capacity(entries.len());
    let mut seen = HashSet::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        let binding = validate(index, entry, &context_path)?;
        if !seen.insert((binding.method.clone(), binding.path.clone())) {
            return Err(ConfigError::DuplicateRoute {
                method: binding.method.to_string(),
                path: binding.path,
            });
        }
        bindings.push(binding);
    }

    let services = register_services(entries, shared.collaborators());

    let mut method_routers: BTreeMap<String, MethodRouter> = BTreeMap::new();
    for (entry, binding) in entries.iter().zip(bindings) {
        let handler = {
            let entry = Arc::new(entry.clone());
            let shared = shared.clone();
            move |request: Request| {
                let entry = entry.clone();
                let shared = shared.clone();
                async move { dispatch(request, &entry, shared).await }
            }
        };

        let method_router = match method_routers.remove(&binding.path) {
            Some(method_router) => method_router.on(binding.filter, handler),
            None => on(binding.filter, handler),
        };
        method_routers.insert(binding.path, method_router);
    }

    let mut router = Router::new();
    let mut paths = BTreeSet::new();
    for (path, method_router) in method_routers {
        router = router.route(&path, method_router);
        paths.insert(path);
    }
    info!("Mapped {} routes onto {} services", entries.len(), services);

    Ok(RouteTable { router, paths, services })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{Capability, Dependencies, Manifest};
    use crate::catalog::ErrorManager;
    use crate::rest::testutils::*;
    use crate::service::ServiceModule;
    use axum::http;
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn shared() -> Arc<DependencyContext> {
        Arc::new(DependencyContext::new(Collaborators::new(ErrorManager::default())))
    }

    fn ping_service() -> Arc<ServiceModule> {
        Arc::new(
            ServiceModule::new()
                .with_method("ping", |_args, _context| async move { Ok(json!("pong")) }),
        )
    }

    /// Creates a service that counts how many times it is registered in `count`.
    fn counting_service(count: Arc<AtomicUsize>) -> Arc<ServiceModule> {
        Arc::new(
            ServiceModule::new()
                .with_method("a", |_args, _context| async move { Ok(json!("a")) })
                .with_method("b", |_args, _context| async move { Ok(json!("b")) })
                .on_register(move |_deps| {
                    count.fetch_add(1, Ordering::SeqCst);
                }),
        )
    }

    #[test]
    fn test_build_empty() {
        assert_eq!(ConfigError::NoRoutes, build(&[], "", shared()).unwrap_err());
    }

    #[test]
    fn test_build_missing_method() {
        let service = ping_service();
        let entries = vec![
            RouteEntry::new("GET", "/ok", service.clone(), "ping"),
            RouteEntry::new("", "/ping", service, "ping"),
        ];
        assert_eq!(
            ConfigError::MissingMethod { index: 1, path: "/api/ping".to_owned() },
            build(&entries, "/api", shared()).unwrap_err()
        );
    }

    #[test]
    fn test_build_invalid_method() {
        let entries = vec![RouteEntry::new("FETCH ME", "/ping", ping_service(), "ping")];
        assert_eq!(
            ConfigError::InvalidMethod { method: "FETCH ME".to_owned(), path: "/ping".to_owned() },
            build(&entries, "", shared()).unwrap_err()
        );
    }

    #[test]
    fn test_build_missing_and_invalid_paths() {
        let service = ping_service();
        assert_eq!(
            ConfigError::MissingPath(0),
            build(&[RouteEntry::new("GET", "", service.clone(), "ping")], "", shared())
                .unwrap_err()
        );

        for path in ["ping", "/keys/:key", "/files/*rest", "/files/a*b", "/v1:batch", "/a?b"] {
            match build(&[RouteEntry::new("GET", path, service.clone(), "ping")], "", shared()) {
                Err(ConfigError::InvalidPath { path: p, .. }) => assert_eq!(path, p),
                e => panic!("Unexpected result {:?}", e),
            }
        }

        match build(&[RouteEntry::new("GET", "/ping", service, "ping")], "api", shared()) {
            Err(ConfigError::InvalidPath { path, .. }) => assert_eq!("api", path),
            e => panic!("Unexpected result {:?}", e),
        }
    }

    #[test]
    fn test_build_unknown_method_name() {
        let entries = vec![RouteEntry::new("GET", "/ping", ping_service(), "pong")];
        assert_eq!(
            ConfigError::UnknownMethodName {
                method_name: "pong".to_owned(),
                path: "/ping".to_owned()
            },
            build(&entries, "", shared()).unwrap_err()
        );
    }

    #[test]
    fn test_build_duplicate_route() {
        let service = ping_service();
        let entries = vec![
            RouteEntry::new("GET", "/ping", service.clone(), "ping"),
            RouteEntry::new("get", "/ping", service, "ping"),
        ];
        assert_eq!(
            ConfigError::DuplicateRoute { method: "GET".to_owned(), path: "/ping".to_owned() },
            build(&entries, "", shared()).unwrap_err()
        );
    }

    #[test]
    fn test_build_invalid_table_registers_nothing() {
        let count = Arc::new(AtomicUsize::new(0));
        let service = counting_service(count.clone());
        let entries = vec![
            RouteEntry::new("GET", "/a", service.clone(), "a"),
            RouteEntry::new("GET", "/b", service, "unknown"),
        ];
        build(&entries, "", shared()).unwrap_err();
        assert_eq!(0, count.load(Ordering::SeqCst));
    }

    #[test]
    fn test_build_registers_each_service_once() {
        let count1 = Arc::new(AtomicUsize::new(0));
        let count2 = Arc::new(AtomicUsize::new(0));
        let service1 = counting_service(count1.clone());
        let service2 = counting_service(count2.clone());
        let entries = vec![
            RouteEntry::new("GET", "/one/a", service1.clone(), "a"),
            RouteEntry::new("POST", "/one/a", service1.clone(), "b"),
            RouteEntry::new("GET", "/one/b", service1, "b"),
            RouteEntry::new("GET", "/two/a", service2.clone(), "a"),
            RouteEntry::new("PUT", "/two/b", service2, "b"),
        ];

        let table = build(&entries, "", shared()).unwrap();
        assert_eq!(2, table.services());
        assert_eq!(1, count1.load(Ordering::SeqCst));
        assert_eq!(1, count2.load(Ordering::SeqCst));
        assert_eq!(
            vec!["/one/a", "/one/b", "/two/a", "/two/b"],
            table.paths().iter().collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_build_equal_but_distinct_services_register_separately() {
        let count = Arc::new(AtomicUsize::new(0));
        let entries = vec![
            RouteEntry::new("GET", "/a", counting_service(count.clone()), "a"),
            RouteEntry::new("GET", "/b", counting_service(count.clone()), "a"),
        ];
        let table = build(&entries, "", shared()).unwrap();
        assert_eq!(2, table.services());
        assert_eq!(2, count.load(Ordering::SeqCst));
    }

    #[test]
    fn test_build_injects_declared_collaborators() {
        const MANIFEST: Manifest =
            Manifest::new(&[Capability::DataStore, Capability::DataSequelize]);

        let received: Arc<Mutex<Option<Dependencies>>> = Arc::default();
        let service = {
            let received = received.clone();
            Arc::new(
                ServiceModule::new()
                    .with_manifest(MANIFEST)
                    .with_method("a", |_args, _context| async move { Ok(json!(null)) })
                    .on_register(move |deps| *received.lock().unwrap() = Some(deps.clone())),
            )
        };
        let collaborators =
            Collaborators::new(ErrorManager::default()).with_data_store(Arc::new(42u32));
        let shared = Arc::new(DependencyContext::new(collaborators));

        build(&[RouteEntry::new("GET", "/a", service, "a")], "", shared).unwrap();

        let deps = received.lock().unwrap().take().unwrap();
        assert_eq!(42, *deps.data_store::<u32>().unwrap());
        assert!(!deps.has(Capability::DataSequelize));
        assert!(!deps.has(Capability::ErrorManager));
    }

    #[tokio::test]
    async fn test_build_binds_under_context_path() {
        let table = build(
            &[RouteEntry::new("get", "/ping", ping_service(), "ping")],
            "/api/v1/",
            shared(),
        )
        .unwrap();
        assert_eq!(vec!["/api/v1/ping"], table.paths().iter().collect::<Vec<_>>());

        OneShotBuilder::new(table.router(), (http::Method::GET, "/api/v1/ping"))
            .send_empty()
            .await
            .expect_text("pong")
            .await;

        OneShotBuilder::new(table.router(), (http::Method::GET, "/ping"))
            .send_empty()
            .await
            .expect_status(http::StatusCode::NOT_FOUND)
            .expect_empty()
            .await;

        OneShotBuilder::new(table.into_router(), (http::Method::POST, "/api/v1/ping"))
            .send_empty()
            .await
            .expect_status(http::StatusCode::METHOD_NOT_ALLOWED)
            .expect_empty()
            .await;
    }

    #[tokio::test]
    async fn test_build_several_methods_on_one_path() {
        let count = Arc::new(AtomicUsize::new(0));
        let service = counting_service(count);
        let table = build(
            &[
                RouteEntry::new("GET", "/x", service.clone(), "a"),
                RouteEntry::new("DELETE", "/x", service, "b"),
            ],
            "",
            shared(),
        )
        .unwrap();

        OneShotBuilder::new(table.router(), (http::Method::GET, "/x"))
            .send_empty()
            .await
            .expect_text("^a$")
            .await;
        OneShotBuilder::new(table.router(), (http::Method::DELETE, "/x"))
            .send_empty()
            .await
            .expect_text("^b$")
            .await;
    }
}
