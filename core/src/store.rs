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

//! Start/stop contract of the subsystems that the server depends on.

use async_trait::async_trait;

/// Errors reported by stores when they change state.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
#[error("{0}")]
pub struct StoreError(pub String);

/// Result type for this module.
pub type StoreResult<T> = Result<T, StoreError>;

/// A subsystem (database client, cache, ...) whose lifetime is bound to the server's.
///
/// The server starts stores in the order in which they were added before it binds the listener,
/// and stops them in reverse order once the listener is closed.
#[async_trait]
pub trait Store: Send + Sync {
    /// Returns a name for the store to use in log messages.
    fn name(&self) -> &str;

    /// Connects to or otherwise initializes the store.
    async fn start(&self) -> StoreResult<()>;

    /// Disconnects from the store.
    async fn stop(&self) -> StoreResult<()>;
}

/// Test utilities.
#[cfg(any(test, feature = "testutils"))]
pub mod testutils {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Ordered record of lifecycle events shared among several stores.
    #[derive(Clone, Default)]
    pub struct EventLog(Arc<Mutex<Vec<String>>>);

    impl EventLog {
        /// Appends `event` to the log.
        pub fn record<S: Into<String>>(&self, event: S) {
            self.0.lock().unwrap().push(event.into());
        }

        /// Returns a copy of all events recorded so far.
        pub fn events(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }

    /// A store that records its lifecycle events and that can be told to misbehave.
    pub struct MockStore {
        /// Name of the store.
        name: String,

        /// Where to record the `start <name>` and `stop <name>` events.
        log: EventLog,

        /// Whether `start` fails.
        fail_start: bool,

        /// Whether `stop` fails.
        fail_stop: bool,

        /// Time that `stop` takes to complete.
        stop_delay: Duration,
    }

    impl MockStore {
        /// Creates a new well-behaved store that records its events in `log`.
        pub fn new<N: Into<String>>(name: N, log: &EventLog) -> Self {
            Self {
                name: name.into(),
                log: log.clone(),
                fail_start: false,
                fail_stop: false,
                stop_delay: Duration::ZERO,
            }
        }

        /// Makes `start` fail.
        pub fn with_start_failure(mut self) -> Self {
            self.fail_start = true;
            self
        }

        /// Makes `stop` fail.
        pub fn with_stop_failure(mut self) -> Self {
            self.fail_stop = true;
            self
        }

        /// Makes `stop` take `delay` to complete.
        pub fn with_stop_delay(mut self, delay: Duration) -> Self {
            self.stop_delay = delay;
            self
        }
    }

    #[async_trait]
    impl Store for MockStore {
        fn name(&self) -> &str {
            &self.name
        }

        async fn start(&self) -> StoreResult<()> {
            self.log.record(format!("start {}", self.name));
            if self.fail_start {
                return Err(StoreError(format!("{} refused to start", self.name)));
            }
            Ok(())
        }

        async fn stop(&self) -> StoreResult<()> {
            self.log.record(format!("stop {}", self.name));
            if !self.stop_delay.is_zero() {
                tokio::time::sleep(self.stop_delay).await;
            }
            if self.fail_stop {
                return Err(StoreError(format!("{} refused to stop", self.name)));
            }
            Ok(())
        }
    }

}
