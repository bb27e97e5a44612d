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

//! Discovery browser trait

use crate::record::txt_lookup;
use crate::service_type::Protocol;
use crate::DiscoveryError;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::net::IpAddr;
use std::time::Duration;

/// A resolved service instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    /// Instance name, e.g. `"Living Room"`
    pub name: String,

    /// Service type the instance was found under, e.g. `"_https._tcp"`
    /// or `"_myapp._sub._https._tcp"`
    pub service_type: String,

    /// Browse domain, normally `"local"`
    pub domain: String,

    /// Target host name
    pub host: String,

    /// Resolved addresses of `host`; may be empty
    pub addresses: Vec<IpAddr>,

    pub port: u16,

    /// TXT entries as `key=value` strings
    pub txt: Vec<String>,
}

impl ServiceInfo {
    /// Transport protocol implied by the service type
    pub fn protocol(&self) -> Protocol {
        Protocol::from_service_type(&self.service_type)
    }

    /// Value of TXT entry `key`
    pub fn txt_value(&self, key: &str) -> Option<&str> {
        txt_lookup(&self.txt, key)
    }

    /// Host to connect to: the first address if resolved, the host name otherwise
    pub fn connect_host(&self) -> String {
        match self.addresses.first() {
            Some(IpAddr::V6(addr)) => format!("[{addr}]"),
            Some(IpAddr::V4(addr)) => addr.to_string(),
            None => self.host.trim_end_matches('.').to_string(),
        }
    }
}

/// Finds announced services
///
/// Implementations browse one service type at a time and keep a table of
/// resolved instances.
#[async_trait]
pub trait DiscoveryBrowser: Send + Sync {
    /// Start browsing for `service_type` (e.g. `"_https._tcp"`)
    ///
    /// # Errors
    ///
    /// Returns `DiscoveryError::BrowseFailed` if browsing cannot be started.
    async fn start_browsing(&mut self, service_type: &str) -> Result<(), DiscoveryError>;

    /// Stop browsing
    ///
    /// # Errors
    ///
    /// Returns `DiscoveryError::StopBrowseFailed` if browsing cannot be stopped.
    async fn stop_browsing(&mut self) -> Result<(), DiscoveryError>;

    /// Snapshot of the services resolved so far
    fn discovered_services(&self) -> Vec<ServiceInfo>;

    /// Stream of discovery events from now on
    fn event_stream(&self) -> BoxStream<'_, DiscoveryEvent>;
}

/// Discovery events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    /// A new service was resolved
    ServiceDiscovered(ServiceInfo),

    /// A service went away
    ServiceRemoved {
        name: String,
        service_type: String,
    },

    /// A known service changed (TXT, port or addresses)
    ServiceUpdated(ServiceInfo),
}

/// Wait until `browser` knows a service matching `predicate`
///
/// Services resolved before the call count too.
///
/// # Errors
///
/// Returns `DiscoveryError::Timeout` if nothing matches within `timeout`.
pub async fn wait_for_service<F>(
    browser: &dyn DiscoveryBrowser,
    predicate: F,
    timeout: Duration,
) -> Result<ServiceInfo, DiscoveryError>
where
    F: Fn(&ServiceInfo) -> bool + Send,
{
    // Subscribe first so nothing slips between snapshot and stream.
    let mut events = browser.event_stream();
    if let Some(found) = browser.discovered_services().into_iter().find(|s| predicate(s)) {
        return Ok(found);
    }

    let search = async {
        while let Some(event) = events.next().await {
            match event {
                DiscoveryEvent::ServiceDiscovered(info) | DiscoveryEvent::ServiceUpdated(info)
                    if predicate(&info) =>
                {
                    return Some(info);
                }
                _ => {}
            }
        }
        None
    };

    match tokio::time::timeout(timeout, search).await {
        Ok(Some(info)) => Ok(info),
        Ok(None) => Err(DiscoveryError::BrowseFailed(
            "browser event stream ended".to_string(),
        )),
        Err(_) => Err(DiscoveryError::Timeout(format!(
            "no matching service within {timeout:?}"
        ))),
    }
}
