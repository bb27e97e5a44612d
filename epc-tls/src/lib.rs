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

//! TLS credentials for Easy Publish and Consume
//!
//! Publishers serving HTTPS need a certificate for their host name. This crate
//! provisions a self-signed pair on first use, keeps it in the user's
//! configuration directory and turns it into a rustls server configuration.
//!
//! ```no_run
//! # fn main() -> Result<(), epc_tls::TlsError> {
//! let credentials = epc_tls::get_server_credentials("myhost.local")?;
//! let config = epc_tls::server_config(&credentials)?;
//! # Ok(())
//! # }
//! ```

mod config;
mod credentials;
mod error;
mod progress;

pub use config::server_config;
pub use credentials::{
    credentials_dir, get_server_credentials, get_server_credentials_with_progress,
    ServerCredentials,
};
pub use error::TlsError;
pub use progress::{LogProgress, ProgressHooks, ProgressTask};
