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

use epc_discovery::{DiscoveryError, Protocol};

/// Errors raised by a consumer
///
/// A missing resource is [`NotFound`](Self::NotFound), kept apart from
/// failures to talk to the publisher.
#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    #[error("No resource '{key}'")]
    NotFound { key: String },
    #[error("Cannot fetch '{key}': {message}")]
    Transport {
        key: String,
        /// HTTP status, when the publisher answered
        status: Option<u16>,
        message: String,
    },
    #[error("Authentication for '{key}' in realm '{realm}' declined")]
    Cancelled { key: String, realm: String },
    #[error("Publisher '{0}' is not resolved")]
    NotResolved(String),
    #[error("Cannot talk to publishers using protocol '{0}'")]
    UnsupportedProtocol(Protocol),
    #[error("Cannot resolve publisher: {0}")]
    Discovery(#[from] DiscoveryError),
    #[error("HTTP client unavailable: {0}")]
    Client(#[source] reqwest::Error),
}

impl ConsumerError {
    pub(crate) fn transport(key: &str, error: reqwest::Error) -> Self {
        Self::Transport {
            key: key.to_string(),
            status: error.status().map(|status| status.as_u16()),
            message: error.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// HTTP status behind a transport error
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Transport { status, .. } => *status,
            _ => None,
        }
    }
}
