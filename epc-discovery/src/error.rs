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

//! Discovery error types

use crate::client::GroupId;

/// Errors that can occur during discovery operations
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    /// The discovery daemon could not be reached
    #[error("Failed to create discovery client: {0}")]
    ClientFailed(String),

    /// Failed to publish service
    #[error("Failed to publish service: {0}")]
    PublishFailed(String),

    /// Failed to withdraw service
    #[error("Failed to withdraw service: {0}")]
    UnpublishFailed(String),

    /// Failed to start browsing
    #[error("Failed to start browsing: {0}")]
    BrowseFailed(String),

    /// Failed to stop browsing
    #[error("Failed to stop browsing: {0}")]
    StopBrowseFailed(String),

    /// Invalid service record
    #[error("Invalid service record: {0}")]
    InvalidServiceRecord(String),

    /// The client does not know this announcement group
    #[error("Unknown announcement group {0:?}")]
    UnknownGroup(GroupId),

    /// The dispatcher task is gone
    #[error("Dispatcher task has stopped")]
    DispatcherStopped,

    /// No matching service appeared in time
    #[error("Timed out waiting for service '{0}'")]
    Timeout(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}
