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

//! Easy Publish and Consume: the publisher
//!
//! A [`Publisher`] serves a set of named resources over HTTP or HTTPS and
//! keeps itself visible on the local network through a DNS-SD dispatcher.
//! Resources come from handlers returning [`Content`]; any of them can be
//! guarded by an authentication handler.
//!
//! ```no_run
//! use epc_publisher::{AuthContext, Publisher};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), epc_publisher::PublisherError> {
//! let publisher = Publisher::new(Some("Notes"), Some("notes"), None);
//! publisher.add("greeting", "hello");
//! publisher.add_file("todo", "/home/me/todo.txt");
//! publisher.set_auth_handler(None, |ctx: &AuthContext<'_>, user: Option<&str>| {
//!     user == Some("me") && ctx.check_password("secret")
//! });
//! publisher.run().await
//! # }
//! ```

mod auth;
mod content;
mod error;
mod publisher;
mod registry;
mod server;

pub use auth::{AuthContext, AuthFlags, NONCE_LIFETIME};
pub use content::{mime_type_for_path, Content, DEFAULT_MIME_TYPE};
pub use epc_discovery::{CollisionHandling, Protocol};
pub use error::PublisherError;
pub use publisher::{Publisher, PublisherOptions};
pub use registry::{AuthHandler, ContentHandler};
