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

//! Mock discovery browser implementation

use crate::daemon::{Announcement, BrowseEvent, MockDaemon};
use async_trait::async_trait;
use epc_discovery::{DiscoveryBrowser, DiscoveryError, DiscoveryEvent, ServiceInfo};
use futures::stream::{BoxStream, StreamExt};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast::error::RecvError;

/// Browses the announcements of a [`MockDaemon`]
///
/// Every instance resolves to the daemon's configured address (127.0.0.1 by
/// default).
pub struct MockBrowser {
    daemon: MockDaemon,
    browsing: Arc<Mutex<Option<String>>>,
}

impl MockBrowser {
    /// Create a browser on `daemon`
    ///
    /// # Example
    ///
    /// ```
    /// use epc_discovery_mock::{MockBrowser, MockDaemon};
    ///
    /// let daemon = MockDaemon::new();
    /// let browser = MockBrowser::new(daemon);
    /// ```
    pub fn new(daemon: MockDaemon) -> Self {
        Self {
            daemon,
            browsing: Arc::new(Mutex::new(None)),
        }
    }

    fn browse_type(&self) -> Option<String> {
        self.browsing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

fn resolve(announcement: Announcement, browsed: &str, daemon: &MockDaemon) -> ServiceInfo {
    ServiceInfo {
        name: announcement.name,
        service_type: browsed.to_string(),
        domain: announcement.domain,
        host: announcement.host,
        addresses: vec![daemon.address()],
        port: announcement.port,
        txt: announcement.txt,
    }
}

#[async_trait]
impl DiscoveryBrowser for MockBrowser {
    async fn start_browsing(&mut self, service_type: &str) -> Result<(), DiscoveryError> {
        *self.browsing.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(service_type.to_string());
        Ok(())
    }

    async fn stop_browsing(&mut self) -> Result<(), DiscoveryError> {
        *self.browsing.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }

    fn discovered_services(&self) -> Vec<ServiceInfo> {
        let Some(browsed) = self.browse_type() else {
            return Vec::new();
        };
        self.daemon
            .announcements()
            .into_iter()
            .filter(|a| a.matches_type(&browsed))
            .map(|a| resolve(a, &browsed, &self.daemon))
            .collect()
    }

    fn event_stream(&self) -> BoxStream<'_, DiscoveryEvent> {
        let mut receiver = self.daemon.subscribe();
        let browsing = self.browsing.clone();
        let daemon = self.daemon.clone();

        async_stream::stream! {
            loop {
                let event = match receiver.recv().await {
                    Ok(event) => event,
                    Err(RecvError::Lagged(missed)) => {
                        log::warn!("Mock browser missed {missed} events");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };

                let browsed = browsing.lock().unwrap_or_else(PoisonError::into_inner).clone();
                let Some(browsed) = browsed else {
                    continue;
                };

                match event {
                    BrowseEvent::Added(a) if a.matches_type(&browsed) => {
                        yield DiscoveryEvent::ServiceDiscovered(resolve(a, &browsed, &daemon));
                    }
                    BrowseEvent::Updated(a) if a.matches_type(&browsed) => {
                        yield DiscoveryEvent::ServiceUpdated(resolve(a, &browsed, &daemon));
                    }
                    BrowseEvent::Removed(a) if a.matches_type(&browsed) => {
                        yield DiscoveryEvent::ServiceRemoved {
                            name: a.name,
                            service_type: browsed,
                        };
                    }
                    _ => {}
                }
            }
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_browses_by_subtype() {
        let daemon = MockDaemon::new();
        daemon.inject_foreign("Printer", "_ipp._tcp", 631, &["rp=queue"]);
        let mut browser = MockBrowser::new(daemon.clone());

        assert!(browser.discovered_services().is_empty());
        browser.start_browsing("_ipp._tcp").await.unwrap();

        let services = browser.discovered_services();
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].name, "Printer");
        assert_eq!(services[0].port, 631);
        assert_eq!(services[0].txt_value("rp"), Some("queue"));
        assert_eq!(services[0].addresses, vec!["127.0.0.1".parse::<std::net::IpAddr>().unwrap()]);

        browser.start_browsing("_http._tcp").await.unwrap();
        assert!(browser.discovered_services().is_empty());
    }

    #[tokio::test]
    async fn test_event_stream() {
        let daemon = MockDaemon::new();
        let mut browser = MockBrowser::new(daemon.clone());
        browser.start_browsing("_ipp._tcp").await.unwrap();
        let mut events = browser.event_stream();

        daemon.inject_foreign("Other", "_http._tcp", 80, &[]);
        daemon.inject_foreign("Printer", "_ipp._tcp", 631, &[]);
        daemon.withdraw_foreign("Printer", "_ipp._tcp");

        let first = tokio::time::timeout(Duration::from_millis(500), events.next())
            .await
            .expect("Timeout waiting for event")
            .expect("Stream ended");
        match first {
            DiscoveryEvent::ServiceDiscovered(info) => assert_eq!(info.name, "Printer"),
            other => panic!("Expected ServiceDiscovered, got {other:?}"),
        }

        let second = tokio::time::timeout(Duration::from_millis(500), events.next())
            .await
            .expect("Timeout waiting for event")
            .expect("Stream ended");
        assert_eq!(
            second,
            DiscoveryEvent::ServiceRemoved {
                name: "Printer".into(),
                service_type: "_ipp._tcp".into(),
            }
        );
    }
}
