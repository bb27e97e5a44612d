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

//! The publisher: a resource registry served over HTTP(S) and kept visible
//! through a service dispatcher

use crate::auth::{AuthContext, AuthFlags, NonceStore};
use crate::content::Content;
use crate::error::PublisherError;
use crate::registry::{Registry, Resolved};
use crate::server::{self, TlsListener};
use bytes::Bytes;
use epc_common::paths::{
    encode_key, normalize_contents_path, resource_path, DEFAULT_CONTENTS_PATH, TXT_PATH_KEY,
};
use epc_discovery::{
    service_type_new, umbrella_service_type, AddressFamily, CollisionHandling, DiscoveryBackend,
    Dispatcher, DispatcherHandle, DispatcherOptions, InterfaceSelector, Protocol,
};
use epc_discovery_mdns::MdnsBackend;
use epc_tls::ProgressHooks;
use std::collections::HashMap;
use std::fmt;
use std::future::IntoFuture;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

/// How long `quit` waits for in-flight responses
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Publisher configuration
#[derive(Debug, Clone)]
pub struct PublisherOptions {
    /// Announced service name; defaults to the application name
    pub name: Option<String>,
    /// Application identifying subtype; defaults to the program name
    pub application: Option<String>,
    /// DNS-SD domain, `None` for the link-local domain
    pub domain: Option<String>,
    pub protocol: Protocol,
    /// Where the HTML index of all resources is served
    pub contents_path: String,
    pub collision_handling: CollisionHandling,
    /// Added to announcements to recognize duplicates of this service
    pub service_cookie: Option<String>,
    pub auth_flags: AuthFlags,
    /// Where server credentials are kept, see [`epc_tls::credentials_dir`]
    pub credentials_dir: Option<PathBuf>,
    pub bind_address: SocketAddr,
}

impl Default for PublisherOptions {
    fn default() -> Self {
        Self {
            name: None,
            application: None,
            domain: None,
            protocol: Protocol::Https,
            contents_path: DEFAULT_CONTENTS_PATH.to_string(),
            collision_handling: CollisionHandling::default(),
            service_cookie: None,
            auth_flags: AuthFlags::default(),
            credentials_dir: None,
            bind_address: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Bookmark {
    key: Option<String>,
    label: Option<String>,
}

/// Listener, server task and announcements of a running publisher
struct Running {
    local_address: SocketAddr,
    host: String,
    protocol: Protocol,
    shutdown: Option<oneshot::Sender<()>>,
    server: Option<JoinHandle<std::io::Result<()>>>,
    dispatcher: DispatcherHandle,
    bookmarks: HashMap<Option<String>, DispatcherHandle>,
}

impl Running {
    /// Stop accepting connections and let in-flight responses finish
    async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        let Some(server) = self.server.take() else {
            return;
        };

        let abort = server.abort_handle();
        match tokio::time::timeout(SHUTDOWN_GRACE, server).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => tracing::warn!("Server on {} failed: {e}", self.local_address),
            Ok(Err(e)) => tracing::warn!("Server task on {} failed: {e}", self.local_address),
            Err(_) => {
                tracing::warn!("Responses still in flight on {}, aborting", self.local_address);
                abort.abort();
            }
        }
    }
}

impl Drop for Running {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

pub(crate) struct PublisherInner {
    options: RwLock<PublisherOptions>,
    registry: RwLock<Registry>,
    pub(crate) nonces: NonceStore,
    backend: Arc<dyn DiscoveryBackend>,
    progress: RwLock<Option<Arc<dyn ProgressHooks>>>,
    bookmarks: Mutex<Vec<Bookmark>>,
    /// Serializes start, stop and reconfiguration
    lifecycle: tokio::sync::Mutex<()>,
    running: Mutex<Option<Running>>,
    state: watch::Sender<bool>,
}

impl PublisherInner {
    fn options(&self) -> RwLockReadGuard<'_, PublisherOptions> {
        self.options.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn options_mut(&self) -> RwLockWriteGuard<'_, PublisherOptions> {
        self.options.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn registry(&self) -> RwLockReadGuard<'_, Registry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn registry_mut(&self) -> RwLockWriteGuard<'_, Registry> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn bookmarks(&self) -> MutexGuard<'_, Vec<Bookmark>> {
        self.bookmarks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn running(&self) -> MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn resolve(&self, key: &str) -> Resolved {
        self.registry().resolve(key)
    }
}

/// Publishes resources over HTTP(S) and announces them via DNS-SD
///
/// Clones share one publisher. Dropping the last clone stops the server and
/// withdraws the announcements.
///
/// # Example
///
/// ```no_run
/// use epc_publisher::Publisher;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), epc_publisher::PublisherError> {
/// let publisher = Publisher::new(Some("Weather Station"), Some("weather"), None);
/// publisher.add("temperature", "21.5");
/// publisher.run().await
/// # }
/// ```
#[derive(Clone)]
pub struct Publisher {
    pub(crate) inner: Arc<PublisherInner>,
}

impl Publisher {
    /// Publisher announced through mDNS
    ///
    /// `name` falls back to the application name, `application` to the
    /// program name.
    pub fn new(name: Option<&str>, application: Option<&str>, domain: Option<&str>) -> Self {
        Self::with_options(PublisherOptions {
            name: name.map(str::to_string),
            application: application.map(str::to_string),
            domain: domain.map(str::to_string),
            ..PublisherOptions::default()
        })
    }

    pub fn with_options(options: PublisherOptions) -> Self {
        Self::with_backend(options, Arc::new(MdnsBackend::new()))
    }

    /// Publisher announcing through `backend`
    pub fn with_backend(mut options: PublisherOptions, backend: Arc<dyn DiscoveryBackend>) -> Self {
        let application = options
            .application
            .take()
            .or_else(program_name)
            .filter(|application| !application.is_empty());
        let name = options
            .name
            .take()
            .filter(|name| !name.is_empty())
            .or_else(|| application.clone())
            .unwrap_or_else(|| fallback_name(options.protocol));

        options.name = Some(name);
        options.application = application;
        options.contents_path = normalize_contents_path(&options.contents_path);

        Self {
            inner: Arc::new(PublisherInner {
                options: RwLock::new(options),
                registry: RwLock::new(Registry::default()),
                nonces: NonceStore::default(),
                backend,
                progress: RwLock::new(None),
                bookmarks: Mutex::new(Vec::new()),
                lifecycle: tokio::sync::Mutex::new(()),
                running: Mutex::new(None),
                state: watch::channel(false).0,
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<PublisherInner>) -> Self {
        Self { inner }
    }

    /// Publish `value` as `text/plain` under `key`
    pub fn add(&self, key: &str, value: impl Into<Bytes>) {
        let content = Content::new(Some("text/plain"), value);
        self.inner.registry_mut().insert_static(key, content);
    }

    /// Publish the file at `path` under `key`
    ///
    /// The file is read on every request; an unreadable file answers
    /// "not found".
    pub fn add_file(&self, key: &str, path: impl Into<PathBuf>) {
        self.inner.registry_mut().insert_file(key, path.into());
    }

    /// Publish whatever `handler` produces under `key`
    ///
    /// Replaces a previous registration of `key`; its handler and any gate
    /// attached to it are dropped.
    pub fn add_handler<F>(&self, key: &str, handler: F)
    where
        F: Fn(&Publisher, &str) -> Option<Content> + Send + Sync + 'static,
    {
        self.inner.registry_mut().insert(key, Arc::new(handler));
    }

    /// Guard `key`, or every key without its own gate when `key` is `None`
    ///
    /// Unknown keys are logged and ignored.
    pub fn set_auth_handler<F>(&self, key: Option<&str>, handler: F)
    where
        F: Fn(&AuthContext<'_>, Option<&str>) -> bool + Send + Sync + 'static,
    {
        if !self.inner.registry_mut().set_auth(key, Arc::new(handler)) {
            tracing::warn!(
                "Cannot set auth handler for unknown key '{}'",
                key.unwrap_or_default()
            );
        }
    }

    /// Withdraw `key` and its bookmark
    pub fn remove(&self, key: &str) -> bool {
        let removed = self.inner.registry_mut().remove(key);

        let bookmark_key = Some(key.to_string());
        self.inner
            .bookmarks()
            .retain(|bookmark| bookmark.key != bookmark_key);
        if let Some(running) = self.inner.running().as_mut() {
            running.bookmarks.remove(&bookmark_key);
        }

        removed
    }

    /// Produce the content of `key` locally, bypassing authentication
    pub fn lookup(&self, key: &str) -> Option<Content> {
        let handler = self.inner.resolve(key).content?;
        handler(self, key)
    }

    pub fn has_key(&self, key: &str) -> bool {
        self.inner.registry().contains(key)
    }

    /// Published keys matching the glob `pattern`, sorted
    pub fn list(&self, pattern: Option<&str>) -> Result<Vec<String>, PublisherError> {
        Ok(self.inner.registry().keys(pattern)?)
    }

    /// URL path of `key`, or of the contents index for `None`
    pub fn get_path(&self, key: Option<&str>) -> String {
        match key {
            Some(key) => resource_path(&encode_key(key)),
            None => self.inner.options().contents_path.clone(),
        }
    }

    /// Full URI of `key` on the running server
    pub fn get_uri(&self, key: Option<&str>) -> Result<String, PublisherError> {
        let (scheme, host, port) = {
            let running = self.inner.running();
            let running = running.as_ref().ok_or(PublisherError::NotRunning)?;
            (
                running.protocol.scheme().unwrap_or("http"),
                running.host.clone(),
                running.local_address.port(),
            )
        };
        Ok(format!("{scheme}://{host}:{port}{}", self.get_path(key)))
    }

    /// Name currently announced, following collision renames
    pub fn service_name(&self) -> String {
        if let Some(running) = self.inner.running().as_ref() {
            return running.dispatcher.name();
        }
        self.inner.options().name.clone().unwrap_or_default()
    }

    pub fn application(&self) -> Option<String> {
        self.inner.options().application.clone()
    }

    pub fn service_domain(&self) -> Option<String> {
        self.inner.options().domain.clone()
    }

    pub fn protocol(&self) -> Protocol {
        self.inner.options().protocol
    }

    pub fn contents_path(&self) -> String {
        self.inner.options().contents_path.clone()
    }

    pub fn collision_handling(&self) -> CollisionHandling {
        self.inner.options().collision_handling
    }

    pub fn service_cookie(&self) -> Option<String> {
        self.inner.options().service_cookie.clone()
    }

    pub fn auth_flags(&self) -> AuthFlags {
        self.inner.options().auth_flags
    }

    /// Takes effect with the next request
    pub fn set_auth_flags(&self, flags: AuthFlags) {
        self.inner.options_mut().auth_flags = flags;
    }

    /// Report slow credential generation to `hooks`
    pub fn set_progress_hooks(&self, hooks: Option<Arc<dyn ProgressHooks>>) {
        *self
            .inner
            .progress
            .write()
            .unwrap_or_else(PoisonError::into_inner) = hooks;
    }

    /// Address the server listens on, while running
    pub fn local_address(&self) -> Option<SocketAddr> {
        self.inner.running().as_ref().map(|running| running.local_address)
    }

    pub fn is_running(&self) -> bool {
        self.inner.running().is_some()
    }

    pub async fn set_protocol(&self, protocol: Protocol) -> Result<(), PublisherError> {
        if protocol.service_type().is_none() {
            return Err(PublisherError::UnsupportedProtocol(protocol));
        }
        self.reconfigure(|options| options.protocol = protocol).await
    }

    pub async fn set_service_name(&self, name: &str) -> Result<(), PublisherError> {
        let name = name.to_string();
        self.reconfigure(|options| options.name = Some(name)).await
    }

    pub async fn set_service_domain(&self, domain: Option<&str>) -> Result<(), PublisherError> {
        let domain = domain.map(str::to_string);
        self.reconfigure(|options| options.domain = domain).await
    }

    pub async fn set_contents_path(&self, path: &str) -> Result<(), PublisherError> {
        let path = normalize_contents_path(path);
        self.reconfigure(|options| options.contents_path = path).await
    }

    pub async fn set_collision_handling(
        &self,
        collisions: CollisionHandling,
    ) -> Result<(), PublisherError> {
        self.reconfigure(|options| options.collision_handling = collisions)
            .await
    }

    pub async fn set_service_cookie(&self, cookie: Option<&str>) -> Result<(), PublisherError> {
        let cookie = cookie.map(str::to_string);
        self.reconfigure(|options| options.service_cookie = cookie).await
    }

    /// Announce a link to `key` (or the contents index) for web browsers
    ///
    /// The bookmark is named `label`, defaulting to the service name.
    pub async fn add_bookmark(
        &self,
        key: Option<&str>,
        label: Option<&str>,
    ) -> Result<(), PublisherError> {
        let _lifecycle = self.inner.lifecycle.lock().await;

        let bookmark = Bookmark {
            key: key.map(str::to_string),
            label: label.map(str::to_string),
        };
        {
            let mut bookmarks = self.inner.bookmarks();
            bookmarks.retain(|existing| existing.key != bookmark.key);
            bookmarks.push(bookmark.clone());
        }

        let local_address = self.local_address();
        let Some(local_address) = local_address else {
            return Ok(());
        };

        let options = self.inner.options().clone();
        let handle = self
            .announce_bookmark(&options, local_address, &bookmark)
            .await?;

        // `remove` may have raced the announcement.
        if self.inner.bookmarks().contains(&bookmark) {
            if let Some(running) = self.inner.running().as_mut() {
                running.bookmarks.insert(bookmark.key, handle);
            }
        }
        Ok(())
    }

    /// Start serving in the background
    ///
    /// Binds the listener, provisions TLS credentials for HTTPS and announces
    /// the service. Does nothing when already running.
    pub async fn run_async(&self) -> Result<(), PublisherError> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        if self.is_running() {
            return Ok(());
        }
        let running = self.start().await?;
        self.install(running);
        Ok(())
    }

    /// Serve until [`quit`](Self::quit) is called
    pub async fn run(&self) -> Result<(), PublisherError> {
        let mut state = self.inner.state.subscribe();
        self.run_async().await?;
        // The sender lives as long as `self`.
        let _ = state.wait_for(|running| !*running).await;
        Ok(())
    }

    /// Stop serving and withdraw the announcements
    ///
    /// In-flight responses complete first. Returns whether the publisher was
    /// running.
    pub async fn quit(&self) -> bool {
        let _lifecycle = self.inner.lifecycle.lock().await;
        self.stop().await
    }

    async fn reconfigure<F>(&self, change: F) -> Result<(), PublisherError>
    where
        F: FnOnce(&mut PublisherOptions),
    {
        let _lifecycle = self.inner.lifecycle.lock().await;
        let was_running = self.stop().await;
        change(&mut self.inner.options_mut());
        if was_running {
            let running = self.start().await?;
            self.install(running);
        }
        Ok(())
    }

    fn install(&self, running: Running) {
        *self.inner.running() = Some(running);
        self.inner.state.send_replace(true);
    }

    async fn stop(&self) -> bool {
        let running = self.inner.running().take();
        let Some(running) = running else {
            return false;
        };

        tracing::info!("Stopping publisher on {}", running.local_address);
        running.stop().await;
        self.inner.state.send_replace(false);
        true
    }

    async fn start(&self) -> Result<Running, PublisherError> {
        let options = self.inner.options().clone();
        let protocol = options.protocol;
        if protocol.service_type().is_none() {
            return Err(PublisherError::UnsupportedProtocol(protocol));
        }

        let listener = TcpListener::bind(options.bind_address)
            .await
            .map_err(|source| PublisherError::Bind {
                address: options.bind_address,
                source,
            })?;
        let local_address = listener.local_addr()?;
        let host = local_host_name();

        let router = server::router(Arc::downgrade(&self.inner), &options.contents_path);
        let (shutdown, shutdown_rx) = oneshot::channel::<()>();
        let signal = async move {
            let _ = shutdown_rx.await;
        };

        let server = match protocol {
            Protocol::Https => {
                let config = self
                    .tls_config(&host, options.credentials_dir.clone())
                    .await?;
                tokio::spawn(
                    axum::serve(TlsListener::new(listener, config), router)
                        .with_graceful_shutdown(signal)
                        .into_future(),
                )
            }
            _ => tokio::spawn(
                axum::serve(listener, router)
                    .with_graceful_shutdown(signal)
                    .into_future(),
            ),
        };

        let name = options.name.clone().unwrap_or_default();
        let dispatcher = self.spawn_dispatcher(
            &name,
            &options,
            local_address,
            options.service_cookie.clone(),
        );

        // From here on dropping `running` shuts the server down again.
        let mut running = Running {
            local_address,
            host,
            protocol,
            shutdown: Some(shutdown),
            server: Some(server),
            dispatcher,
            bookmarks: HashMap::new(),
        };

        let txt = [format!("{TXT_PATH_KEY}={}", options.contents_path)];
        announce(
            &running.dispatcher,
            &options,
            options.application.as_deref(),
            local_address.port(),
            &txt,
        )
        .await?;

        let bookmarks = self.inner.bookmarks().clone();
        for bookmark in bookmarks {
            let handle = self
                .announce_bookmark(&options, local_address, &bookmark)
                .await?;
            running.bookmarks.insert(bookmark.key, handle);
        }

        tracing::info!(
            "Publishing '{name}' at {protocol}://{}:{}{}",
            running.host,
            local_address.port(),
            options.contents_path
        );
        Ok(running)
    }

    fn spawn_dispatcher(
        &self,
        name: &str,
        options: &PublisherOptions,
        local_address: SocketAddr,
        cookie: Option<String>,
    ) -> DispatcherHandle {
        let dispatcher_options = DispatcherOptions {
            interface: InterfaceSelector::Any,
            family: AddressFamily::of(&local_address),
            collisions: options.collision_handling,
            cookie,
        };
        let (dispatcher, events) =
            Dispatcher::new(self.inner.backend.clone(), name, dispatcher_options);
        dispatcher.spawn(events)
    }

    async fn announce_bookmark(
        &self,
        options: &PublisherOptions,
        local_address: SocketAddr,
        bookmark: &Bookmark,
    ) -> Result<DispatcherHandle, PublisherError> {
        let label = match &bookmark.label {
            Some(label) => label.clone(),
            None => options.name.clone().unwrap_or_default(),
        };
        let handle = self.spawn_dispatcher(&label, options, local_address, None);
        let txt = [format!(
            "{TXT_PATH_KEY}={}",
            self.get_path(bookmark.key.as_deref())
        )];
        announce(&handle, options, None, local_address.port(), &txt).await?;
        tracing::debug!("Bookmark '{label}' announced");
        Ok(handle)
    }

    async fn tls_config(
        &self,
        host: &str,
        dir: Option<PathBuf>,
    ) -> Result<Arc<rustls::ServerConfig>, PublisherError> {
        let hooks = self
            .inner
            .progress
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let host = host.to_string();

        let config = tokio::task::spawn_blocking(move || {
            let credentials =
                epc_tls::get_server_credentials_with_progress(&host, dir.as_deref(), hooks.as_deref())?;
            epc_tls::server_config(&credentials)
        })
        .await
        .map_err(|e| PublisherError::Task(e.to_string()))??;
        Ok(config)
    }
}

impl fmt::Debug for Publisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publisher")
            .field("name", &self.service_name())
            .field("protocol", &self.protocol())
            .field("local_address", &self.local_address())
            .finish()
    }
}

/// Announce the base type (with the application subtype) and the umbrella type
async fn announce(
    dispatcher: &DispatcherHandle,
    options: &PublisherOptions,
    application: Option<&str>,
    port: u16,
    txt: &[String],
) -> Result<(), PublisherError> {
    let domain = options.domain.as_deref();
    let record_types = [
        service_type_new(options.protocol, application),
        umbrella_service_type(options.protocol),
    ];
    for record_type in record_types.into_iter().flatten() {
        dispatcher
            .add_service(&record_type, domain, None, port, txt)
            .await?;
    }
    Ok(())
}

fn program_name() -> Option<String> {
    let exe = std::env::current_exe().ok()?;
    Some(exe.file_stem()?.to_string_lossy().into_owned())
}

fn fallback_name(protocol: Protocol) -> String {
    let name = format!(
        "{}-{:08x}",
        protocol.scheme().unwrap_or("epc"),
        rand::random::<u32>()
    );
    tracing::warn!("No service name configured, using '{name}'");
    name
}

/// Host name as announced on the link, e.g. `myhost.local`
fn local_host_name() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|host| host.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string());
    let host = host.trim_end_matches('.');
    if host.ends_with(".local") {
        return host.to_string();
    }
    let label = host.split('.').next().unwrap_or(host);
    format!("{label}.local")
}
