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

//! Rudimentary framework to serve declarative route tables.
//!
//! Services built using this framework describe their HTTP surface as data instead of as code:
//!
//! 1.  `service`: Every service implements the `Service` trait, which exposes a set of named
//!     methods that take and return JSON values.  A service declares the collaborators it needs
//!     (data stores, the error manager) in a static manifest and receives them exactly once via
//!     `Service::register`.
//!
//! 1.  `routes`: The app provides a list of `RouteEntry` values that bind an HTTP method and an
//!     exact path to a service method, plus optional input and output transforms.  The route table
//!     is validated and compiled into an `axum::Router` when the server starts.
//!
//! 1.  `dispatch`: Every request runs through a fixed pipeline: input transform, service call,
//!     output transform and response shaping.  Failures at any stage are turned into a uniform
//!     error envelope and never crash the process.
//!
//! 1.  `server`: The `Server` type owns the listening socket and sequences the startup and the
//!     deadline-bounded shutdown of the dependent stores.
//!
//! There are result and error types in every layer, such as `ConfigResult` and `ConfigError`.
//! Domain errors are declared in an `ErrorCatalog` and carry their own HTTP status and return
//! code, which the dispatcher reports in the `X-Return-Code` header.

// Keep these in sync with other top-level files.
#![warn(anonymous_parameters, bad_style, clippy::missing_docs_in_private_items, missing_docs)]
#![warn(unused, unused_extern_crates, unused_import_braces, unused_qualifications)]
#![warn(unsafe_code)]

pub mod capability;
pub mod catalog;
pub mod dispatch;
pub mod env;
pub mod rest;
pub mod routes;
pub mod server;
pub mod service;
pub mod store;
