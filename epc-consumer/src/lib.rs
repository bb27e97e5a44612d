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

//! Easy Publish and Consume: the consumer
//!
//! A [`Consumer`] talks to one publisher: it finds it by name through a
//! [`DiscoveryBrowser`](epc_discovery::DiscoveryBrowser), fetches resources
//! with [`Consumer::lookup`], lists keys with [`Consumer::list`] and answers
//! authentication challenges with credentials it is given up front or asks
//! for through callbacks.
//!
//! ```no_run
//! use epc_consumer::{Consumer, Credentials};
//! use epc_discovery_mdns::MdnsBrowser;
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut consumer = Consumer::resolve(
//!     MdnsBrowser::new,
//!     "Weather Station",
//!     Some("weather"),
//!     None,
//!     Duration::from_secs(5),
//! )
//! .await?;
//! consumer.connect_authenticate(|credentials: &mut Credentials, _realm: &str| {
//!     credentials.username = Some("me".into());
//!     credentials.password = Some("secret".into());
//!     true
//! });
//! let temperature = consumer.lookup("temperature").await?;
//! # Ok(())
//! # }
//! ```

mod consumer;
mod error;

pub use consumer::{AuthCallback, Consumer, Credentials, Resource};
pub use error::ConsumerError;
