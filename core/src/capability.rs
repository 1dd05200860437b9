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

//! Typed registry of the collaborators that services can depend on.
//!
//! The set of collaborator kinds is closed and known at compile time: services declare the kinds
//! they need in a `Manifest` and the resolver injects the matching instances from the
//! `Collaborators` offered by the app.  Data stores are type-erased at this level and recovered
//! by the service with a typed downcast, as only the service knows the concrete store it expects.

use crate::catalog::ErrorManager;
use derivative::Derivative;
use log::debug;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Type-erased collaborator instance.
type Collaborator = Arc<dyn Any + Send + Sync>;

/// Kinds of collaborators that a service can require.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Capability {
    /// The primary document or key/value store.
    DataStore,

    /// The relational (SQL) store.
    DataSequelize,

    /// The error manager backed by the app's error catalog.
    ErrorManager,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::DataStore => "dataStore",
            Capability::DataSequelize => "dataSequelize",
            Capability::ErrorManager => "errorManager",
        };
        f.write_str(name)
    }
}

/// Set of capabilities declared by a service.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Manifest(&'static [Capability]);

impl Manifest {
    /// A manifest that requires nothing.
    pub const EMPTY: Manifest = Manifest(&[]);

    /// Creates a manifest that requires `capabilities`.
    pub const fn new(capabilities: &'static [Capability]) -> Self {
        Self(capabilities)
    }

    /// Returns the required capabilities.
    pub fn capabilities(&self) -> &'static [Capability] {
        self.0
    }

    /// Returns true if the manifest requires `capability`.
    pub fn requires(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }
}

/// Collaborators offered by the app to its services.
#[derive(Clone, Derivative)]
#[derivative(Debug)]
pub struct Collaborators {
    /// Instance satisfying `Capability::DataStore`, if any.
    #[derivative(Debug = "ignore")]
    data_store: Option<Collaborator>,

    /// Instance satisfying `Capability::DataSequelize`, if any.
    #[derivative(Debug = "ignore")]
    data_sequelize: Option<Collaborator>,

    /// The error manager, which is always available.
    error_manager: ErrorManager,
}

impl Collaborators {
    /// Creates a new set of collaborators with only an `error_manager`.
    pub fn new(error_manager: ErrorManager) -> Self {
        Self { data_store: None, data_sequelize: None, error_manager }
    }

    /// Offers `store` as the data store.
    pub fn with_data_store<T: Any + Send + Sync>(mut self, store: Arc<T>) -> Self {
        let store: Collaborator = store;
        self.data_store = Some(store);
        self
    }

    /// Offers `store` as the relational store.
    pub fn with_data_sequelize<T: Any + Send + Sync>(mut self, store: Arc<T>) -> Self {
        let store: Collaborator = store;
        self.data_sequelize = Some(store);
        self
    }

    /// Returns the error manager.
    pub fn error_manager(&self) -> &ErrorManager {
        &self.error_manager
    }

    /// Returns true if an instance satisfying `capability` is available.
    pub fn provides(&self, capability: Capability) -> bool {
        match capability {
            Capability::DataStore => self.data_store.is_some(),
            Capability::DataSequelize => self.data_sequelize.is_some(),
            Capability::ErrorManager => true,
        }
    }
}

/// Collaborators injected into a specific service.
#[derive(Clone, Default, Derivative)]
#[derivative(Debug)]
pub struct Dependencies {
    /// The data store, if required and available.
    #[derivative(Debug = "ignore")]
    data_store: Option<Collaborator>,

    /// The relational store, if required and available.
    #[derivative(Debug = "ignore")]
    data_sequelize: Option<Collaborator>,

    /// The error manager, if required.
    error_manager: Option<ErrorManager>,
}

impl Dependencies {
    /// Returns the data store if it was injected and is of type `T`.
    pub fn data_store<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.data_store.clone()?.downcast::<T>().ok()
    }

    /// Returns the relational store if it was injected and is of type `T`.
    pub fn data_sequelize<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.data_sequelize.clone()?.downcast::<T>().ok()
    }

    /// Returns the error manager if it was injected.
    pub fn error_manager(&self) -> Option<&ErrorManager> {
        self.error_manager.as_ref()
    }

    /// Returns true if an instance satisfying `capability` was injected.
    pub fn has(&self, capability: Capability) -> bool {
        match capability {
            Capability::DataStore => self.data_store.is_some(),
            Capability::DataSequelize => self.data_sequelize.is_some(),
            Capability::ErrorManager => self.error_manager.is_some(),
        }
    }
}

/// Computes the dependencies of a service that declares `manifest` out of the available
/// `collaborators`.
///
/// Capabilities that are not available are left unset: a service may be able to run with only a
/// subset of what it asks for, and it is up to the service to decide.
pub fn resolve(manifest: Manifest, collaborators: &Collaborators) -> Dependencies {
    let mut deps = Dependencies::default();
    for capability in manifest.capabilities() {
        match capability {
            Capability::DataStore => deps.data_store = collaborators.data_store.clone(),
            Capability::DataSequelize => {
                deps.data_sequelize = collaborators.data_sequelize.clone()
            }
            Capability::ErrorManager => {
                deps.error_manager = Some(collaborators.error_manager.clone())
            }
        }
        if !deps.has(*capability) {
            debug!("Capability {} not available; leaving it unset", capability);
        }
    }
    deps
}
