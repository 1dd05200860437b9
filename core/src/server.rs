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

//! Lifecycle of the HTTP server.
//!
//! A `Server` goes through the `Created`, `Starting`, `Listening`, `Stopping` and `Stopped` states,
//! in this order and only once.  Starting the server starts its stores, compiles the route table
//! and binds the listener.  Stopping the server drains the listener within a deadline and then
//! stops the stores in reverse order, whether or not the deadline was met.

use crate::capability::Collaborators;
use crate::env::get_optional_var;
use crate::routes::{self, ConfigError, RouteEntry, RouteTable, check_path};
use crate::service::{DependencyContext, ServiceError, ServiceResult};
use crate::store::{Store, StoreError};
use axum::Router;
use axum::routing::get;
use derivative::Derivative;
use http::StatusCode;
use http::header::CONTENT_TYPE;
use log::{debug, info, warn};
use std::collections::BTreeSet;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout, timeout_at};

/// Default deadline for the listener to close, and then for all stores to stop.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(3);

/// Configuration options for the server.
#[derive(Clone, Debug, PartialEq)]
pub struct ServerOptions {
    /// Address to bind to.
    pub host: String,

    /// Port to bind to.  Zero picks an ephemeral port.
    pub port: u16,

    /// Protocol under which the server is reachable, for informational purposes only.
    pub protocol: String,

    /// Prefix for all routes in the route table.
    pub context_path: String,

    /// Dialect of the API docs document.  The docs are not served if unset.
    pub docs_dialect: Option<String>,

    /// Path where the API docs are served.
    pub docs_path: String,

    /// File that contains the API docs document.
    pub docs_source: Option<PathBuf>,

    /// Whether to mount the gateway extension.
    pub gateway_enable: bool,

    /// Whether to mount the service registry extension.
    pub registry_enable: bool,

    /// Deadline for the listener to close, and then for all stores to stop.
    pub shutdown_timeout: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: 8080,
            protocol: "http".to_owned(),
            context_path: String::new(),
            docs_dialect: None,
            docs_path: "/api-docs".to_owned(),
            docs_source: None,
            gateway_enable: false,
            registry_enable: false,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

impl ServerOptions {
    /// Creates a new set of options from environment variables whose name is prefixed with
    /// `prefix` and an underscore.  Unset variables take their default values.
    pub fn from_env(prefix: &str) -> Result<Self, String> {
        let defaults = Self::default();
        Ok(Self {
            host: get_optional_var::<String>(prefix, "HOST")?.unwrap_or(defaults.host),
            port: get_optional_var::<u16>(prefix, "PORT")?.unwrap_or(defaults.port),
            protocol: get_optional_var::<String>(prefix, "PROTOCOL")?
                .unwrap_or(defaults.protocol),
            context_path: get_optional_var::<String>(prefix, "CONTEXT_PATH")?
                .unwrap_or(defaults.context_path),
            docs_dialect: get_optional_var::<String>(prefix, "DOCS_DIALECT")?,
            docs_path: get_optional_var::<String>(prefix, "DOCS_PATH")?
                .unwrap_or(defaults.docs_path),
            docs_source: get_optional_var::<PathBuf>(prefix, "DOCS_SOURCE")?,
            gateway_enable: get_optional_var::<bool>(prefix, "GATEWAY_ENABLE")?
                .unwrap_or(defaults.gateway_enable),
            registry_enable: get_optional_var::<bool>(prefix, "REGISTRY_ENABLE")?
                .unwrap_or(defaults.registry_enable),
            shutdown_timeout: get_optional_var::<Duration>(prefix, "SHUTDOWN_TIMEOUT")?
                .unwrap_or(defaults.shutdown_timeout),
        })
    }
}

/// Supported formats for the API docs document.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DocsDialect {
    /// A YAML document.
    Yaml,

    /// A JSON document.
    Json,
}

impl DocsDialect {
    /// Returns the content type with which to serve documents in this dialect.
    pub fn content_type(self) -> &'static str {
        match self {
            DocsDialect::Yaml => "application/yaml",
            DocsDialect::Json => "application/json",
        }
    }
}

impl FromStr for DocsDialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "yaml" => Ok(DocsDialect::Yaml),
            "json" => Ok(DocsDialect::Json),
            _ => Err(format!("Unknown docs dialect {}", s)),
        }
    }
}

/// Auxiliary middleware that can be mounted next to the route table, such as an API gateway or a
/// service registry client.
pub trait Extension: Send + Sync {
    /// Returns a name for the extension to use in log messages.
    fn name(&self) -> &str;

    /// Extends `router`, which serves the route table under `context_path`.
    fn mount(&self, context_path: &str, router: Router) -> Router;
}

/// States of the server.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ServerState {
    /// The server has been configured but not started.
    Created,

    /// The server is starting its stores and binding the listener.
    Starting,

    /// The server is accepting requests.
    Listening,

    /// The server is draining the listener and stopping its stores.
    Stopping,

    /// The server is done.  This is a terminal state.
    Stopped,
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServerState::Created => "created",
            ServerState::Starting => "starting",
            ServerState::Listening => "listening",
            ServerState::Stopping => "stopping",
            ServerState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Errors that prevent the server from starting.
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum LifecycleError {
    /// Indicates that the listener could not be bound.
    #[error("Cannot bind to {addr}: {message}")]
    Bind {
        /// Address that was requested.
        addr: String,

        /// Description of the failure.
        message: String,
    },

    /// Indicates that the route table is invalid.
    #[error("Invalid route table: {0}")]
    Config(#[from] ConfigError),

    /// Indicates that the requested transition is not valid in the current state.
    #[error("Operation not valid in state {0}")]
    InvalidState(ServerState),

    /// Indicates that a store failed to start.
    #[error("Store {name} failed to start: {error}")]
    StoreStart {
        /// Name of the store that failed.
        name: String,

        /// The error reported by the store.
        error: StoreError,
    },
}

/// Result type for this module.
pub type LifecycleResult<T> = Result<T, LifecycleError>;

/// How the listener went away when stopping the server.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ShutdownOutcome {
    /// The listener drained all connections within the deadline.
    Closed,

    /// The deadline elapsed before the listener drained all connections, so it was aborted.
    DeadlineElapsed,

    /// The server was not listening.
    NotRunning,
}

/// Handles to the serving task of a listening server.
struct Running {
    /// Address the listener is bound to.
    addr: SocketAddr,

    /// Channel to request a graceful shutdown of the listener.
    shutdown: oneshot::Sender<()>,

    /// The task that serves requests.
    task: JoinHandle<io::Result<()>>,
}

/// An HTTP server that serves a route table.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Server {
    /// Configuration of the server.
    options: ServerOptions,

    /// Collaborators offered to the services in the route table.
    collaborators: Collaborators,

    /// The route table.
    routes: Vec<RouteEntry>,

    /// Stores to start before listening and to stop after closing, in start order.
    #[derivative(Debug = "ignore")]
    stores: Vec<Arc<dyn Store>>,

    /// API gateway extension, if any.
    #[derivative(Debug = "ignore")]
    gateway: Option<Arc<dyn Extension>>,

    /// Service registry extension, if any.
    #[derivative(Debug = "ignore")]
    registry: Option<Arc<dyn Extension>>,

    /// Current state of the server.
    state: ServerState,

    /// Serving task, only present while listening.
    #[derivative(Debug = "ignore")]
    running: Option<Running>,
}

impl Server {
    /// Creates a new server that will serve `routes` with `collaborators` once started.
    pub fn new(
        options: ServerOptions,
        collaborators: Collaborators,
        routes: Vec<RouteEntry>,
    ) -> Self {
        Self {
            options,
            collaborators,
            routes,
            stores: vec![],
            gateway: None,
            registry: None,
            state: ServerState::Created,
            running: None,
        }
    }

    /// Adds a store whose lifetime is bound to the server's.
    pub fn with_store(mut self, store: Arc<dyn Store>) -> Self {
        self.stores.push(store);
        self
    }

    /// Sets the API gateway extension, which is only mounted if enabled in the options.
    pub fn with_gateway(mut self, gateway: Arc<dyn Extension>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// Sets the service registry extension, which is only mounted if enabled in the options.
    pub fn with_registry(mut self, registry: Arc<dyn Extension>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Returns the current state of the server.
    pub fn state(&self) -> ServerState {
        self.state
    }

    /// Returns the address the server is listening on, if it is listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|running| running.addr)
    }

    /// Starts the stores in order.  If any fails, stops the ones that already started.
    async fn start_stores(&self) -> LifecycleResult<()> {
        for (i, store) in self.stores.iter().enumerate() {
            debug!("Starting store {}", store.name());
            if let Err(error) = store.start().await {
                warn!("Store {} failed to start: {}", store.name(), error);
                self.stop_stores(&self.stores[..i]).await;
                return Err(LifecycleError::StoreStart { name: store.name().to_owned(), error });
            }
        }
        Ok(())
    }

    /// Stops `stores` in reverse order.  Failures are logged and otherwise ignored.
    ///
    /// All stores share a single shutdown deadline.  Once it elapses, the remaining stores are
    /// still asked to stop but are only waited for if they stop immediately.
    async fn stop_stores(&self, stores: &[Arc<dyn Store>]) {
        let deadline = Instant::now() + self.options.shutdown_timeout;
        for store in stores.iter().rev() {
            debug!("Stopping store {}", store.name());
            match timeout_at(deadline, store.stop()).await {
                Ok(Ok(())) => (),
                Ok(Err(e)) => warn!("Store {} failed to stop: {}", store.name(), e),
                Err(_) => warn!(
                    "Store {} did not stop within {:?}",
                    store.name(),
                    self.options.shutdown_timeout
                ),
            }
        }
    }

    /// Loads the API docs document and returns a router that serves it.
    ///
    /// The docs path must not be one of the `bound` paths of the route table.
    async fn docs_router(&self, dialect: &str, bound: &BTreeSet<String>) -> ServiceResult<Router> {
        let error_manager = self.collaborators.error_manager();

        let dialect = DocsDialect::from_str(dialect)
            .map_err(|_| error_manager.error("InvalidDocsDialect"))?;
        let source = match self.options.docs_source.as_ref() {
            Some(source) => source,
            None => return Err(error_manager.error("DocsSourceIsEmpty")),
        };
        check_path(&self.options.docs_path).map_err(|e| {
            ServiceError::named("InvalidDocsPath", format!("{}: {}", self.options.docs_path, e))
        })?;
        if bound.contains(&self.options.docs_path) {
            return Err(ServiceError::named(
                "DocsPathInUse",
                format!("{} is already bound by the route table", self.options.docs_path),
            ));
        }

        let document = tokio::fs::read_to_string(source).await.map_err(|e| {
            ServiceError::named("DocsSourceUnreadable", format!("{}: {}", source.display(), e))
        })?;
        if dialect == DocsDialect::Json {
            serde_json::from_str::<serde_json::Value>(&document)?;
        }

        let handler = move || {
            let document = document.clone();
            async move { (StatusCode::OK, [(CONTENT_TYPE, dialect.content_type())], document) }
        };
        Ok(Router::new().route(&self.options.docs_path, get(handler)))
    }

    /// Mounts the optional extension `name` if `enabled` and available.
    fn mount_extension(
        &self,
        name: &str,
        extension: Option<&Arc<dyn Extension>>,
        enabled: bool,
        router: Router,
    ) -> Router {
        match (enabled, extension) {
            (true, Some(extension)) => {
                info!("Mounting {} {} at '{}'", name, extension.name(), self.options.context_path);
                extension.mount(&self.options.context_path, router)
            }
            (true, None) => {
                warn!("The {} is enabled but none was provided; not mounting it", name);
                router
            }
            (false, _) => {
                warn!("The {} is disabled; not mounting it", name);
                router
            }
        }
    }

    /// Mounts the API docs and the extensions next to the route `table`.
    ///
    /// Misconfigurations are reported as warnings and cause the affected component to be skipped.
    async fn mount_auxiliaries(&self, table: RouteTable) -> Router {
        let mut router = table.router();
        match self.options.docs_dialect.as_ref() {
            Some(dialect) => match self.docs_router(dialect, table.paths()).await {
                Ok(docs) => {
                    info!("Serving API docs at {}", self.options.docs_path);
                    router = router.merge(docs);
                }
                Err(e) => warn!("Not serving API docs: {}", e),
            },
            None => warn!("No API docs dialect configured; not serving API docs"),
        }

        router = self.mount_extension(
            "API gateway",
            self.gateway.as_ref(),
            self.options.gateway_enable,
            router,
        );
        self.mount_extension(
            "service registry",
            self.registry.as_ref(),
            self.options.registry_enable,
            router,
        )
    }

    /// Compiles the route table, binds the listener and spawns the serving task.
    async fn listen(&self) -> LifecycleResult<Running> {
        let shared = Arc::new(DependencyContext::new(self.collaborators.clone()));
        let table = routes::build(&self.routes, &self.options.context_path, shared)?;

        let bind_addr = format!("{}:{}", self.options.host, self.options.port);
        let bind_error =
            |e: io::Error| LifecycleError::Bind { addr: bind_addr.clone(), message: e.to_string() };
        let listener = TcpListener::bind(&bind_addr).await.map_err(bind_error)?;
        let addr = listener.local_addr().map_err(bind_error)?;

        let router = self.mount_auxiliaries(table).await;

        let (shutdown, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(async move {
            axum::serve(listener, router.into_make_service())
                .with_graceful_shutdown(async move {
                    // A dropped sender also means that we must shut down.
                    let _ = shutdown_rx.await;
                })
                .await
        });

        Ok(Running { addr, shutdown, task })
    }

    /// Starts the stores and the listener, and returns the address the server is listening on.
    ///
    /// This is only valid on a newly-created server.  If anything fails, the stores that had been
    /// started are stopped again and the server transitions to `Stopped`.
    pub async fn start(&mut self) -> LifecycleResult<SocketAddr> {
        if self.state != ServerState::Created {
            return Err(LifecycleError::InvalidState(self.state));
        }
        self.state = ServerState::Starting;

        if let Err(e) = self.start_stores().await {
            self.state = ServerState::Stopped;
            return Err(e);
        }

        match self.listen().await {
            Ok(running) => {
                let addr = running.addr;
                self.running = Some(running);
                self.state = ServerState::Listening;
                info!(
                    "The server is running on {}://{}{}",
                    self.options.protocol, addr, self.options.context_path
                );
                Ok(addr)
            }
            Err(e) => {
                warn!("Failed to start server: {}", e);
                self.stop_stores(&self.stores).await;
                self.state = ServerState::Stopped;
                Err(e)
            }
        }
    }

    /// Stops the listener and the stores.
    ///
    /// The listener is given `shutdown_timeout` to drain in-flight requests; it is aborted if it
    /// does not make it in time.  The stores are stopped afterwards in any case, all of them within
    /// a second `shutdown_timeout`, so this returns within twice the deadline.
    pub async fn stop(&mut self) -> ShutdownOutcome {
        match self.state {
            ServerState::Created => {
                self.state = ServerState::Stopped;
                return ShutdownOutcome::NotRunning;
            }
            ServerState::Stopped => return ShutdownOutcome::NotRunning,
            ServerState::Starting | ServerState::Listening | ServerState::Stopping => (),
        }
        self.state = ServerState::Stopping;

        let outcome = match self.running.take() {
            None => ShutdownOutcome::NotRunning,
            Some(Running { addr, shutdown, mut task }) => {
                info!("Shutting down server on {}", addr);
                let _ = shutdown.send(());
                match timeout(self.options.shutdown_timeout, &mut task).await {
                    Ok(Ok(Ok(()))) => ShutdownOutcome::Closed,
                    Ok(Ok(Err(e))) => {
                        warn!("Listener failed while shutting down: {}", e);
                        ShutdownOutcome::Closed
                    }
                    Ok(Err(e)) => {
                        warn!("Listener task failed: {}", e);
                        ShutdownOutcome::Closed
                    }
                    Err(_) => {
                        warn!(
                            "Listener did not close within {:?}; aborting in-flight requests",
                            self.options.shutdown_timeout
                        );
                        task.abort();
                        ShutdownOutcome::DeadlineElapsed
                    }
                }
            }
        };

        self.stop_stores(&self.stores).await;
        self.state = ServerState::Stopped;
        info!("Server has been stopped");
        outcome
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            running.task.abort();
        }
    }
}
