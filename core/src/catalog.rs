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

//! Catalog of the domain errors that an app can raise.
//!
//! Apps describe their errors as data, typically in a JSON document with this shape:
//!
//! ```json
//! {
//!     "KeyNotFound": { "message": "Key not found", "statusCode": 404, "returnCode": 4004 }
//! }
//! ```
//!
//! Services then raise these errors by name via the `ErrorManager`.  Looking up a name that is not
//! in the catalog never fails: it yields a descriptor that reports the unknown name instead.

use crate::service::ServiceError;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Return code reported for error names that are not in the catalog.
pub const UNSUPPORTED_ERROR_RETURN_CODE: u32 = 3000;

/// HTTP status code reported for error names that are not in the catalog.
const UNSUPPORTED_ERROR_STATUS_CODE: u16 = 400;

/// Definition of a single error in the catalog.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorSpec {
    /// Human-readable description of the error.
    pub message: String,

    /// HTTP status code to respond with.
    pub status_code: u16,

    /// App-specific code to report in the `X-Return-Code` header.
    pub return_code: u32,
}

impl ErrorSpec {
    /// Creates a new error definition.
    pub fn new<M: Into<String>>(message: M, status_code: u16, return_code: u32) -> Self {
        Self { message: message.into(), status_code, return_code }
    }
}

/// A fully-resolved error, ready to be sent to the client.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDescriptor {
    /// Name of the error as known in the catalog.
    pub name: String,

    /// Human-readable description of the error.
    pub message: String,

    /// HTTP status code to respond with.
    pub status_code: u16,

    /// App-specific code to report in the `X-Return-Code` header.
    pub return_code: u32,
}

impl fmt::Display for ErrorDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (status {}, return code {}): {}",
            self.name, self.status_code, self.return_code, self.message
        )
    }
}

/// Mapping of error names to their definitions.
#[derive(Clone, Debug, PartialEq)]
pub struct ErrorCatalog(HashMap<String, ErrorSpec>);

impl Default for ErrorCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorCatalog {
    /// Creates a catalog with the errors that the framework itself raises.
    pub fn new() -> Self {
        let mut errors = HashMap::new();
        errors.insert(
            "InvalidDocsDialect".to_owned(),
            ErrorSpec::new("API docs dialect must be one of YAML, JSON", 400, 5000),
        );
        errors.insert(
            "DocsSourceIsEmpty".to_owned(),
            ErrorSpec::new("API docs source document is not configured", 400, 5001),
        );
        Self(errors)
    }

    /// Creates a catalog with the framework errors plus those defined in the `json` document.
    ///
    /// Definitions in `json` take precedence over the framework's.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let errors: HashMap<String, ErrorSpec> = serde_json::from_str(json)?;
        let mut catalog = Self::new();
        catalog.0.extend(errors);
        Ok(catalog)
    }

    /// Adds or replaces the error `name`.
    pub fn with<N: Into<String>>(mut self, name: N, spec: ErrorSpec) -> Self {
        self.0.insert(name.into(), spec);
        self
    }

    /// Returns true if the catalog defines `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Returns the descriptor of the error `name`.
    ///
    /// If `name` is unknown, returns a descriptor that reports the unknown name with a 400 status
    /// code and the `UNSUPPORTED_ERROR_RETURN_CODE` return code.
    pub fn lookup(&self, name: &str) -> ErrorDescriptor {
        match self.0.get(name) {
            Some(spec) => ErrorDescriptor {
                name: name.to_owned(),
                message: spec.message.clone(),
                status_code: spec.status_code,
                return_code: spec.return_code,
            },
            None => ErrorDescriptor {
                name: name.to_owned(),
                message: format!("Error name [{}] not supported", name),
                status_code: UNSUPPORTED_ERROR_STATUS_CODE,
                return_code: UNSUPPORTED_ERROR_RETURN_CODE,
            },
        }
    }
}

/// Handle to build domain errors out of a shared catalog.
#[derive(Clone, Debug, Default)]
pub struct ErrorManager(Arc<ErrorCatalog>);

impl ErrorManager {
    /// Creates a new manager backed by `catalog`.
    pub fn new(catalog: ErrorCatalog) -> Self {
        Self(Arc::new(catalog))
    }

    /// Returns the descriptor of the error `name`.
    pub fn descriptor(&self, name: &str) -> ErrorDescriptor {
        if !self.0.contains(name) {
            debug!("Error name {} not in catalog", name);
        }
        self.0.lookup(name)
    }

    /// Builds the domain error `name`, ready to be returned by a service.
    pub fn error(&self, name: &str) -> ServiceError {
        ServiceError::Domain(self.descriptor(name))
    }
}
