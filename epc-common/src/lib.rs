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

//! Shared pieces of the Easy Publish and Consume wire protocol.
//!
//! Both the publisher (server) and the consumer (client) need to agree on
//! request paths, on how `list` patterns are matched, and on the HTTP
//! authentication math. Everything here is transport-agnostic.

pub mod auth;
pub mod glob;
pub mod paths;

pub use auth::{AuthScheme, Authorization, Challenge, DigestResponse};
pub use glob::{GlobError, GlobPattern};
