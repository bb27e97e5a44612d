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

//! mDNS browser implementation

use crate::utils::{instance_name, service_info_from_mdns, strip_domain, ty_domain};
use async_trait::async_trait;
use epc_discovery::{DiscoveryBrowser, DiscoveryError, DiscoveryEvent, ServiceInfo};
use futures::stream::{BoxStream, StreamExt};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;

type ServiceTable = Arc<Mutex<HashMap<String, ServiceInfo>>>;

/// mDNS-based implementation of [`DiscoveryBrowser`]
///
/// A background task drains mdns-sd browse events into a table of resolved
/// services and rebroadcasts them to every [`event_stream`](DiscoveryBrowser::event_stream).
pub struct MdnsBrowser {
    mdns: mdns_sd::ServiceDaemon,
    services: ServiceTable,
    events: broadcast::Sender<DiscoveryEvent>,
    browsing: Option<String>,
}

impl MdnsBrowser {
    /// Create a new mDNS browser using the default port (5353).
    ///
    /// # Errors
    ///
    /// Returns an error if the mDNS daemon cannot be started.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use epc_discovery_mdns::MdnsBrowser;
    ///
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let browser = MdnsBrowser::new()?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn new() -> Result<Self, DiscoveryError> {
        Self::new_with_port(mdns_sd::MDNS_PORT)
    }

    /// Create a new mDNS browser using a custom port.
    ///
    /// Both publisher and browser must use the same port to communicate.
    ///
    /// # Errors
    ///
    /// Returns an error if the mDNS daemon cannot be started.
    pub fn new_with_port(port: u16) -> Result<Self, DiscoveryError> {
        let mdns = mdns_sd::ServiceDaemon::new_with_port(port).map_err(|e| {
            DiscoveryError::BrowseFailed(format!("Failed to create mDNS daemon: {e}"))
        })?;
        let (events, _) = broadcast::channel(64);

        Ok(Self {
            mdns,
            services: Arc::new(Mutex::new(HashMap::new())),
            events,
            browsing: None,
        })
    }
}

fn apply_event(
    event: mdns_sd::ServiceEvent,
    service_type: &str,
    services: &ServiceTable,
) -> Option<DiscoveryEvent> {
    let mut table = services.lock().unwrap_or_else(PoisonError::into_inner);
    match event {
        mdns_sd::ServiceEvent::ServiceResolved(info) => {
            log::debug!("Service resolved: {}", info.get_fullname());
            let service = service_info_from_mdns(&info, service_type);
            let previous = table.insert(info.get_fullname().to_string(), service.clone());
            match previous {
                None => Some(DiscoveryEvent::ServiceDiscovered(service)),
                Some(previous) if previous != service => {
                    Some(DiscoveryEvent::ServiceUpdated(service))
                }
                Some(_) => None,
            }
        }
        mdns_sd::ServiceEvent::ServiceRemoved(_, fullname) => {
            log::debug!("Service removed: {fullname}");
            table.remove(&fullname)?;
            Some(DiscoveryEvent::ServiceRemoved {
                name: instance_name(&fullname, service_type),
                service_type: strip_domain(service_type).to_string(),
            })
        }
        _ => None,
    }
}

#[async_trait]
impl DiscoveryBrowser for MdnsBrowser {
    async fn start_browsing(&mut self, service_type: &str) -> Result<(), DiscoveryError> {
        if self.browsing.is_some() {
            self.stop_browsing().await?;
        }

        let ty = ty_domain(service_type);
        let receiver = self
            .mdns
            .browse(&ty)
            .map_err(|e| DiscoveryError::BrowseFailed(format!("Failed to start browsing: {e}")))?;

        let services = self.services.clone();
        let events = self.events.clone();
        let browsed = ty.clone();
        tokio::spawn(async move {
            // Ends when stop_browse closes the channel.
            while let Ok(event) = receiver.recv_async().await {
                if let Some(event) = apply_event(event, &browsed, &services) {
                    let _ = events.send(event);
                }
            }
            log::debug!("Browse of {browsed} ended");
        });

        log::info!("Started browsing for {ty}");
        self.browsing = Some(ty);
        Ok(())
    }

    async fn stop_browsing(&mut self) -> Result<(), DiscoveryError> {
        if let Some(ty) = self.browsing.take() {
            self.mdns.stop_browse(&ty).map_err(|e| {
                DiscoveryError::StopBrowseFailed(format!("Failed to stop browsing: {e}"))
            })?;
            self.services
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clear();
            log::info!("Stopped browsing for {ty}");
        }
        Ok(())
    }

    fn discovered_services(&self) -> Vec<ServiceInfo> {
        self.services
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    fn event_stream(&self) -> BoxStream<'_, DiscoveryEvent> {
        let mut receiver = self.events.subscribe();

        async_stream::stream! {
            loop {
                match receiver.recv().await {
                    Ok(event) => yield event,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        log::warn!("Browser event stream lagged, {missed} events lost");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
        .boxed()
    }
}

impl Drop for MdnsBrowser {
    fn drop(&mut self) {
        if let Some(ty) = self.browsing.take() {
            let _ = self.mdns.stop_browse(&ty);
        }
        let _ = self.mdns.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mdns_browser_new() {
        // mDNS might not be available in all test environments (CI, containers).
        match MdnsBrowser::new_with_port(5454) {
            Ok(browser) => assert!(browser.discovered_services().is_empty()),
            Err(e) => log::debug!("mDNS not available (expected in some environments): {e}"),
        }
    }
}
