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

//! Easy Publish and Consume: service discovery
//!
//! This crate keeps a named service visible over DNS-SD (mDNS) without
//! committing to a particular discovery daemon.
//!
//! ## Architecture
//!
//! - **Adapter traits**: [`DiscoveryBackend`] creates [`DiscoveryClient`]s, the
//!   handle through which announcement groups are registered with a daemon.
//!   Daemon state changes come back as [`ClientEvent`]s.
//! - **Dispatcher**: [`Dispatcher`] is a synchronous state machine that owns
//!   the service records, reacts to client and group events, renames itself
//!   on collisions and recreates the client when the daemon goes away.
//!   [`Dispatcher::spawn`] moves it into a task behind a [`DispatcherHandle`].
//! - **Browsing**: [`DiscoveryBrowser`] finds announced services for consumers.
//! - **Pluggable backends**: implementations live in separate crates
//!   (`epc-discovery-mdns`, `epc-discovery-mock`).
//!
//! ```text
//! Publisher --add_service--> Dispatcher --groups--> DiscoveryClient --> daemon
//!                                ^                                        |
//!                                +------------- ClientEvent -------------+
//! ```

pub mod browser;
pub mod client;
pub mod dispatcher;
pub mod error;
pub mod record;
pub mod service_type;
mod task;

pub use browser::{wait_for_service, DiscoveryBrowser, DiscoveryEvent, ServiceInfo};
pub use client::{
    AddressFamily, ClientEvent, ClientId, ClientOptions, ClientState, DiscoveryBackend,
    DiscoveryClient, EventSink, GroupId, GroupState, InterfaceSelector,
};
pub use dispatcher::{
    CollisionHandling, Dispatcher, DispatcherEvents, DispatcherNotification, DispatcherOptions,
};
pub use error::DiscoveryError;
pub use record::{txt_lookup, ServiceRecord, COOKIE_KEY};
pub use service_type::{
    alternative_service_name, application_slug, service_type_base, service_type_list_supported,
    service_type_new, umbrella_service_type, Protocol,
};
pub use task::DispatcherHandle;
