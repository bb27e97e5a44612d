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

//! mDNS implementation of Easy Publish and Consume discovery using mdns-sd
//!
//! [`MdnsBackend`] plugs an in-process mdns-sd responder into
//! [`epc_discovery::Dispatcher`]; [`MdnsBrowser`] resolves services for
//! consumers.
//!
//! # Example
//!
//! ```no_run
//! use epc_discovery::{Dispatcher, DispatcherOptions};
//! use epc_discovery_mdns::MdnsBackend;
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let (dispatcher, events) =
//!     Dispatcher::new(Arc::new(MdnsBackend::new()), "My Service", DispatcherOptions::default());
//! let handle = dispatcher.spawn(events);
//! handle.add_service("_http._tcp", None, None, 8080, &["path=/"]).await?;
//! # Ok(())
//! # }
//! ```

mod browser;
mod client;
mod utils;

pub use browser::MdnsBrowser;
pub use client::{MdnsBackend, MdnsClient};
