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

//! Entry point to the sample service.

// Keep these in sync with other top-level files.
#![warn(anonymous_parameters, bad_style, clippy::missing_docs_in_private_items, missing_docs)]
#![warn(unused, unused_extern_crates, unused_import_braces, unused_qualifications)]
#![warn(unsafe_code)]

use log::{info, warn};
use std::error::Error;
use switchyard_core::server::{ServerOptions, ShutdownOutcome};
use switchyard_example::new_server;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let options = ServerOptions::from_env("SWITCHYARD")?;
    let mut server = new_server(options)?;
    let addr = server.start().await?;
    info!("Serving on {}; press Ctrl+C to stop", addr);

    tokio::signal::ctrl_c().await?;
    match server.stop().await {
        ShutdownOutcome::DeadlineElapsed => warn!("Shutdown deadline elapsed; forcing exit"),
        ShutdownOutcome::Closed | ShutdownOutcome::NotRunning => info!("Server stopped"),
    }
    Ok(())
}
