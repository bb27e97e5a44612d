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

//! Error types for credential provisioning

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while provisioning or loading TLS credentials
#[derive(Debug, Error)]
pub enum TlsError {
    /// No per-user configuration directory on this platform
    #[error("No user configuration directory available")]
    NoConfigDir,

    /// Reading or writing a credential file failed
    #[error("Failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Key or certificate generation failed
    #[error("Failed to generate credentials: {0}")]
    Generate(#[from] rcgen::Error),

    /// A credential file does not hold what it should
    #[error("Invalid credentials in {}: {reason}", path.display())]
    Invalid { path: PathBuf, reason: String },

    /// rustls rejected the credentials
    #[error("TLS configuration error: {0}")]
    Rustls(#[from] rustls::Error),
}

impl TlsError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn invalid(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
