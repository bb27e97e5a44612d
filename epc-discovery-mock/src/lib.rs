// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! In-memory discovery daemon for testing
//!
//! [`MockDaemon`] implements [`epc_discovery::DiscoveryBackend`] on a
//! simulated network shared by all its clones, so dispatchers and browsers
//! can be exercised without mDNS traffic. It also injects the faults a real
//! daemon produces: restarts, outages, host collisions, group failures and
//! competing announcements.
//!
//! # Example
//!
//! ```
//! use epc_discovery::{Dispatcher, DispatcherOptions};
//! use epc_discovery_mock::MockDaemon;
//! use std::sync::Arc;
//!
//! let daemon = MockDaemon::new();
//! let (mut dispatcher, mut events) =
//!     Dispatcher::new(Arc::new(daemon.clone()), "Living Room", DispatcherOptions::default());
//!
//! dispatcher.add_service("_http._tcp", None, None, 8080, &["path=/"]).unwrap();
//! while dispatcher.process_pending(&mut events) > 0 {}
//!
//! assert!(daemon.is_announced("Living Room", "_http._tcp"));
//! ```

mod browser;
mod client;
mod daemon;

pub use browser::MockBrowser;
pub use client::MockClient;
pub use daemon::{Announcement, MockDaemon};
