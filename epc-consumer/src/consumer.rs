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

//! Resource client for one publisher

use crate::error::ConsumerError;
use bytes::Bytes;
use epc_common::paths::{encode_key, resource_path, LIST_PATH, TXT_PATH_KEY};
use epc_common::{Authorization, Challenge};
use epc_discovery::{
    service_type_list_supported, wait_for_service, DiscoveryBrowser, DiscoveryError, Protocol,
    ServiceInfo,
};
use futures::stream::{FuturesUnordered, StreamExt};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, WWW_AUTHENTICATE};
use reqwest::{StatusCode, Url};
use std::fmt;
use std::time::Duration;

/// Stale-nonce retries before the publisher is asked for a new challenge
/// through the callbacks again
const MAX_STALE_RETRIES: usize = 3;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Credentials the consumer answers challenges with
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Asked for credentials for a realm; returns whether to try them
///
/// Leaving the user name unset declines as well.
pub type AuthCallback = Box<dyn FnMut(&mut Credentials, &str) -> bool + Send>;

/// A fetched resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub data: Bytes,
    pub mime_type: Option<String>,
}

impl Resource {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Where a publisher can be reached
#[derive(Debug, Clone, PartialEq, Eq)]
struct Endpoint {
    protocol: Protocol,
    host: String,
    port: u16,
    contents_path: Option<String>,
}

impl Endpoint {
    fn url(&self, path: &str) -> Option<Url> {
        let scheme = self.protocol.scheme()?;
        Url::parse(&format!("{scheme}://{}:{}{path}", self.host, self.port)).ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuthEvent {
    Authenticate,
    Reauthenticate,
}

/// Fetches resources from one publisher
///
/// # Example
///
/// ```no_run
/// use epc_consumer::Consumer;
/// use epc_discovery::Protocol;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), epc_consumer::ConsumerError> {
/// let mut consumer = Consumer::for_address(Protocol::Http, "192.168.1.20", 8080)?;
/// let greeting = consumer.lookup("greeting").await?;
/// println!("{}", String::from_utf8_lossy(&greeting.data));
/// # Ok(())
/// # }
/// ```
pub struct Consumer {
    client: reqwest::Client,
    name: String,
    application: Option<String>,
    domain: Option<String>,
    endpoint: Option<Endpoint>,
    credentials: Credentials,
    /// Last accepted challenge, answered up front on later requests
    challenge: Option<Challenge>,
    /// Requests sent with the current challenge's nonce
    nonce_count: u32,
    authenticate: Option<AuthCallback>,
    reauthenticate: Option<AuthCallback>,
}

impl Consumer {
    /// Consumer for a browsed publisher
    pub fn new(info: &ServiceInfo) -> Result<Self, ConsumerError> {
        let mut consumer = Self::for_service(&info.name, None, Some(info.domain.as_str()))?;
        consumer.set_endpoint(info)?;
        Ok(consumer)
    }

    /// Consumer for a publisher at a known address
    pub fn for_address(protocol: Protocol, host: &str, port: u16) -> Result<Self, ConsumerError> {
        if protocol.scheme().is_none() {
            return Err(ConsumerError::UnsupportedProtocol(protocol));
        }
        let host = if host.contains(':') && !host.starts_with('[') {
            format!("[{host}]")
        } else {
            host.to_string()
        };

        let mut consumer = Self::for_service(&host, None, None)?;
        consumer.endpoint = Some(Endpoint {
            protocol,
            host,
            port,
            contents_path: None,
        });
        Ok(consumer)
    }

    /// Consumer for the publisher named `name`, resolved later through
    /// [`resolve_publisher`](Self::resolve_publisher)
    pub fn for_service(
        name: &str,
        application: Option<&str>,
        domain: Option<&str>,
    ) -> Result<Self, ConsumerError> {
        // Publishers serve self-signed certificates.
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(ConsumerError::Client)?;

        Ok(Self {
            client,
            name: name.to_string(),
            application: application.map(str::to_string),
            domain: domain.map(str::to_string),
            endpoint: None,
            credentials: Credentials::default(),
            challenge: None,
            nonce_count: 0,
            authenticate: None,
            reauthenticate: None,
        })
    }

    /// Find the publisher named `name` and build a consumer for it
    ///
    /// See [`resolve_publisher`](Self::resolve_publisher).
    pub async fn resolve<B, F>(
        new_browser: F,
        name: &str,
        application: Option<&str>,
        domain: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, ConsumerError>
    where
        B: DiscoveryBrowser,
        F: FnMut() -> Result<B, DiscoveryError>,
    {
        let mut consumer = Self::for_service(name, application, domain)?;
        consumer.resolve_publisher(new_browser, timeout).await?;
        Ok(consumer)
    }

    /// Browse every service type the publisher may use and wait for it
    ///
    /// One browser per type comes from `new_browser`. TLS variants win when
    /// the publisher offers both.
    pub async fn resolve_publisher<B, F>(
        &mut self,
        mut new_browser: F,
        timeout: Duration,
    ) -> Result<(), ConsumerError>
    where
        B: DiscoveryBrowser,
        F: FnMut() -> Result<B, DiscoveryError>,
    {
        let mut browsers = Vec::new();
        for service_type in service_type_list_supported(self.application.as_deref()) {
            let mut browser = new_browser()?;
            browser.start_browsing(&service_type).await?;
            tracing::debug!("Looking for '{}' as {service_type}", self.name);
            browsers.push(browser);
        }

        let name = self.name.as_str();
        let domain = self.domain.as_deref();
        let matches = move |info: &ServiceInfo| info.name == name && same_domain(&info.domain, domain);

        let mut found = None;
        let mut last_error = None;
        {
            let mut waits: FuturesUnordered<_> = browsers
                .iter()
                .map(|browser| wait_for_service(browser, matches, timeout))
                .collect();
            while let Some(result) = waits.next().await {
                match result {
                    Ok(info) => {
                        found = Some(info);
                        break;
                    }
                    Err(e) => last_error = Some(e),
                }
            }
        }

        let preferred = browsers
            .iter()
            .find_map(|browser| browser.discovered_services().into_iter().find(|s| matches(s)));
        for browser in &mut browsers {
            if let Err(e) = browser.stop_browsing().await {
                tracing::debug!("Cannot stop browsing: {e}");
            }
        }

        let Some(info) = preferred.or(found) else {
            return Err(match last_error {
                Some(e) => e.into(),
                None => ConsumerError::NotResolved(self.name.clone()),
            });
        };
        self.set_endpoint(&info)
    }

    fn set_endpoint(&mut self, info: &ServiceInfo) -> Result<(), ConsumerError> {
        let protocol = info.protocol();
        if protocol.scheme().is_none() {
            return Err(ConsumerError::UnsupportedProtocol(protocol));
        }

        let endpoint = Endpoint {
            protocol,
            host: info.connect_host(),
            port: info.port,
            contents_path: info.txt_value(TXT_PATH_KEY).map(str::to_string),
        };
        tracing::info!(
            "Publisher '{}' resolved at {protocol}://{}:{}",
            info.name,
            endpoint.host,
            endpoint.port
        );
        self.endpoint = Some(endpoint);
        Ok(())
    }

    pub fn is_publisher_resolved(&self) -> bool {
        self.endpoint.is_some()
    }

    /// Name of the publisher this consumer talks to
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn protocol(&self) -> Protocol {
        self.endpoint
            .as_ref()
            .map_or(Protocol::Unknown, |endpoint| endpoint.protocol)
    }

    pub fn host(&self) -> Option<&str> {
        self.endpoint.as_ref().map(|endpoint| endpoint.host.as_str())
    }

    pub fn port(&self) -> Option<u16> {
        self.endpoint.as_ref().map(|endpoint| endpoint.port)
    }

    /// Path of the publisher's contents index, as announced
    pub fn contents_path(&self) -> Option<&str> {
        self.endpoint.as_ref()?.contents_path.as_deref()
    }

    pub fn username(&self) -> Option<&str> {
        self.credentials.username.as_deref()
    }

    pub fn set_username(&mut self, username: Option<&str>) {
        self.credentials.username = username.map(str::to_string);
    }

    pub fn set_password(&mut self, password: Option<&str>) {
        self.credentials.password = password.map(str::to_string);
    }

    /// Called on the first challenge for a request
    ///
    /// Without a callback, credentials set beforehand are tried once.
    pub fn connect_authenticate<F>(&mut self, callback: F)
    where
        F: FnMut(&mut Credentials, &str) -> bool + Send + 'static,
    {
        self.authenticate = Some(Box::new(callback));
    }

    /// Called each time the publisher rejects the credentials
    pub fn connect_reauthenticate<F>(&mut self, callback: F)
    where
        F: FnMut(&mut Credentials, &str) -> bool + Send + 'static,
    {
        self.reauthenticate = Some(Box::new(callback));
    }

    /// Fetch the resource `key`
    ///
    /// # Errors
    ///
    /// [`ConsumerError::NotFound`] when the publisher does not know `key`,
    /// [`ConsumerError::Transport`] when the request fails,
    /// [`ConsumerError::Cancelled`] when authentication is declined.
    pub async fn lookup(&mut self, key: &str) -> Result<Resource, ConsumerError> {
        let url = self.url(key, &resource_path(&encode_key(key)))?;
        let response = self.fetch(key, url).await?;

        match response.status() {
            status if status.is_success() => {
                let mime_type = response
                    .headers()
                    .get(CONTENT_TYPE)
                    .and_then(|value| value.to_str().ok())
                    .map(str::to_string);
                let data = response
                    .bytes()
                    .await
                    .map_err(|e| ConsumerError::transport(key, e))?;
                Ok(Resource { data, mime_type })
            }
            StatusCode::NOT_FOUND => Err(ConsumerError::NotFound {
                key: key.to_string(),
            }),
            status => Err(unexpected_status(key, status)),
        }
    }

    /// Keys the publisher offers, optionally filtered by a glob `pattern`
    pub async fn list(&mut self, pattern: Option<&str>) -> Result<Vec<String>, ConsumerError> {
        let target = pattern.unwrap_or(LIST_PATH);
        let mut url = self.url(target, LIST_PATH)?;
        if let Some(pattern) = pattern {
            url.query_pairs_mut().append_pair("pattern", pattern);
        }

        let response = self.fetch(target, url).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(unexpected_status(target, status));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ConsumerError::transport(target, e))?;
        Ok(body
            .lines()
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn url(&self, key: &str, path: &str) -> Result<Url, ConsumerError> {
        let endpoint = self
            .endpoint
            .as_ref()
            .ok_or_else(|| ConsumerError::NotResolved(self.name.clone()))?;
        endpoint.url(path).ok_or_else(|| ConsumerError::Transport {
            key: key.to_string(),
            status: None,
            message: format!("invalid address '{}:{}'", endpoint.host, endpoint.port),
        })
    }

    /// GET `url`, answering authentication challenges
    async fn fetch(&mut self, key: &str, url: Url) -> Result<reqwest::Response, ConsumerError> {
        let request_uri = match url.query() {
            Some(query) => format!("{}?{query}", url.path()),
            None => url.path().to_string(),
        };
        let mut challenge = self.challenge.take();
        let mut stale_retries = 0;

        loop {
            let mut request = self.client.get(url.clone());
            let authorization = match (&challenge, self.credentials.username.as_deref()) {
                (Some(challenge), Some(username)) => {
                    self.nonce_count += 1;
                    let password = self.credentials.password.as_deref().unwrap_or_default();
                    Authorization::answer(
                        challenge,
                        username,
                        password,
                        "GET",
                        &request_uri,
                        self.nonce_count,
                    )
                }
                _ => None,
            };
            let sent_credentials = authorization.is_some();
            if let Some(authorization) = authorization {
                request = request.header(AUTHORIZATION, authorization.to_header_value());
            }

            tracing::debug!("GET {url}");
            let response = request
                .send()
                .await
                .map_err(|e| ConsumerError::transport(key, e))?;
            if response.status() != StatusCode::UNAUTHORIZED {
                if sent_credentials {
                    self.challenge = challenge;
                }
                return Ok(response);
            }

            let Some(next) = response
                .headers()
                .get(WWW_AUTHENTICATE)
                .and_then(|value| std::str::from_utf8(value.as_bytes()).ok())
                .and_then(Challenge::parse)
            else {
                return Err(ConsumerError::Transport {
                    key: key.to_string(),
                    status: Some(StatusCode::UNAUTHORIZED.as_u16()),
                    message: "unsupported authentication challenge".to_string(),
                });
            };

            if sent_credentials && next.stale && stale_retries < MAX_STALE_RETRIES {
                stale_retries += 1;
                challenge = Some(next);
                self.nonce_count = 0;
                continue;
            }

            let event = if sent_credentials {
                AuthEvent::Reauthenticate
            } else {
                AuthEvent::Authenticate
            };
            if !self.raise(event, &next.realm) {
                return Err(ConsumerError::Cancelled {
                    key: key.to_string(),
                    realm: next.realm,
                });
            }
            challenge = Some(next);
            self.nonce_count = 0;
        }
    }

    /// Ask for credentials; `true` when there are some to try
    fn raise(&mut self, event: AuthEvent, realm: &str) -> bool {
        tracing::debug!("{event:?} for realm '{realm}'");
        let callback = match event {
            AuthEvent::Authenticate => self.authenticate.as_mut(),
            AuthEvent::Reauthenticate => self.reauthenticate.as_mut(),
        };
        let proceed = match callback {
            Some(callback) => callback(&mut self.credentials, realm),
            None => event == AuthEvent::Authenticate,
        };
        proceed && self.credentials.username.is_some()
    }
}

impl fmt::Debug for Consumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("name", &self.name)
            .field("endpoint", &self.endpoint)
            .field("username", &self.credentials.username)
            .finish()
    }
}

fn unexpected_status(key: &str, status: StatusCode) -> ConsumerError {
    ConsumerError::Transport {
        key: key.to_string(),
        status: Some(status.as_u16()),
        message: format!("publisher answered {status}"),
    }
}

fn same_domain(found: &str, wanted: Option<&str>) -> bool {
    match wanted {
        Some(wanted) => found.trim_end_matches('.') == wanted.trim_end_matches('.'),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(service_type: &str) -> ServiceInfo {
        ServiceInfo {
            name: "Box".into(),
            service_type: service_type.into(),
            domain: "local".into(),
            host: "box.local.".into(),
            addresses: vec!["fe80::1".parse().unwrap()],
            port: 8443,
            txt: vec!["path=/contents".into()],
        }
    }

    #[test]
    fn test_consumer_from_service_info() {
        let consumer = Consumer::new(&info("_https._sub._easy-publish._tcp")).unwrap();
        assert!(consumer.is_publisher_resolved());
        assert_eq!(consumer.protocol(), Protocol::Https);
        assert_eq!(consumer.host(), Some("[fe80::1]"));
        assert_eq!(consumer.port(), Some(8443));
        assert_eq!(consumer.contents_path(), Some("/contents"));
    }

    #[test]
    fn test_unknown_protocol_is_refused() {
        assert!(matches!(
            Consumer::new(&info("_ftp._tcp")),
            Err(ConsumerError::UnsupportedProtocol(Protocol::Unknown))
        ));
        assert!(Consumer::for_address(Protocol::Unknown, "host", 1).is_err());
    }

    #[test]
    fn test_ipv6_addresses_are_bracketed() {
        let consumer = Consumer::for_address(Protocol::Http, "::1", 8080).unwrap();
        assert_eq!(consumer.host(), Some("[::1]"));
        let url = consumer.url("k", "/get/k").unwrap();
        assert_eq!(url.as_str(), "http://[::1]:8080/get/k");
    }

    #[tokio::test]
    async fn test_unresolved_consumer_cannot_fetch() {
        let mut consumer = Consumer::for_service("Box", Some("app"), None).unwrap();
        assert!(!consumer.is_publisher_resolved());
        assert!(matches!(
            consumer.lookup("k").await,
            Err(ConsumerError::NotResolved(name)) if name == "Box"
        ));
    }

    #[test]
    fn test_declining_without_callbacks() {
        let mut consumer = Consumer::for_address(Protocol::Http, "127.0.0.1", 1).unwrap();
        assert!(!consumer.raise(AuthEvent::Authenticate, "Box"));

        consumer.set_username(Some("alice"));
        assert!(consumer.raise(AuthEvent::Authenticate, "Box"));
        assert!(!consumer.raise(AuthEvent::Reauthenticate, "Box"));
    }

    #[test]
    fn test_callback_can_fill_credentials() {
        let mut consumer = Consumer::for_address(Protocol::Http, "127.0.0.1", 1).unwrap();
        consumer.connect_authenticate(|credentials: &mut Credentials, realm: &str| {
            credentials.username = Some(format!("user@{realm}"));
            true
        });

        assert!(consumer.raise(AuthEvent::Authenticate, "Box"));
        assert_eq!(consumer.username(), Some("user@Box"));
    }

    #[test]
    fn test_same_domain() {
        assert!(same_domain("local.", Some("local")));
        assert!(same_domain("anything", None));
        assert!(!same_domain("local", Some("example.org")));
    }
}
