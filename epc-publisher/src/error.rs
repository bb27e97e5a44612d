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

use epc_common::GlobError;
use epc_discovery::{DiscoveryError, Protocol};
use epc_tls::TlsError;
use std::net::SocketAddr;

/// Errors raised by a publisher
#[derive(Debug, thiserror::Error)]
pub enum PublisherError {
    #[error("Cannot listen on {address}: {source}")]
    Bind {
        address: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("Cannot publish using protocol '{0}'")]
    UnsupportedProtocol(Protocol),
    #[error("Publisher is not running")]
    NotRunning,
    #[error(transparent)]
    Glob(#[from] GlobError),
    #[error("Server credentials unavailable: {0}")]
    Tls(#[from] TlsError),
    #[error("Announcement failed: {0}")]
    Discovery(#[from] DiscoveryError),
    #[error("Background task failed: {0}")]
    Task(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
