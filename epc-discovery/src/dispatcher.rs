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

//! Service dispatcher
//!
//! The dispatcher keeps a set of service records announced under one
//! human-readable name. It is a plain state machine: operations and daemon
//! events are applied one at a time through `&mut self`, and all side effects
//! go through the current [`DiscoveryClient`].
//!
//! ## Client state flow
//!
//! ```text
//! Connecting -> Registering/Collision -> Running   (publish every record)
//!                       ^                   |
//!                       +-------------------+       (withdraw, wait for Running)
//! Failure -> drop client, connect again with no_fail -> Connecting
//! ```
//!
//! ## Group state flow (one group per record)
//!
//! ```text
//! Uncommitted -> Registering -> Established
//!                     |              |
//!                     +--> Collision <+  (rename, republish everything)
//! any -> Failure                         (recreate the client)
//! ```

use crate::client::{
    AddressFamily, ClientEvent, ClientId, ClientOptions, ClientState, DiscoveryBackend,
    DiscoveryClient, EventSink, GroupId, GroupState, InterfaceSelector,
};
use crate::record::{txt_lookup, COOKIE_KEY};
use crate::service_type::alternative_service_name;
use crate::{DiscoveryError, ServiceRecord};
use indexmap::IndexMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// How the dispatcher reacts when its name is already taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CollisionHandling {
    /// Keep the name and log the collision
    Ignore,
    /// Switch to the next alternative name and republish
    #[default]
    ChangeName,
    /// Like `ChangeName`, unless the other announcement carries the same
    /// cookie: then it is the same service announced twice and this copy is
    /// withdrawn
    UniqueService,
}

/// Dispatcher configuration
#[derive(Debug, Clone, Default)]
pub struct DispatcherOptions {
    pub interface: InterfaceSelector,
    pub family: AddressFamily,
    pub collisions: CollisionHandling,
    /// Added to every record as `cookie=<value>`
    pub cookie: Option<String>,
}

/// Things the dispatcher tells its owner about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatcherNotification {
    /// The service name changed, by request or after a collision
    NameChanged { old: String, new: String },
    /// Another announcement with our cookie already holds the name
    DuplicateService { service_type: String },
}

type NotificationHandler = Box<dyn Fn(&DispatcherNotification) + Send>;

/// Receiving end of the daemon events a [`Dispatcher`] consumes
#[derive(Debug)]
pub struct DispatcherEvents {
    rx: mpsc::UnboundedReceiver<ClientEvent>,
}

impl DispatcherEvents {
    /// Wait for the next daemon event
    pub async fn recv(&mut self) -> Option<ClientEvent> {
        self.rx.recv().await
    }

    /// Next queued daemon event, if any
    pub fn try_recv(&mut self) -> Option<ClientEvent> {
        self.rx.try_recv().ok()
    }
}

/// Live state of one record on the daemon
#[derive(Debug)]
struct AnnouncementGroup {
    record: ServiceRecord,
    group: Option<GroupId>,
    state: GroupState,
    /// Another instance with our cookie owns the name; stay withdrawn
    duplicate: bool,
}

impl AnnouncementGroup {
    fn new(record: ServiceRecord) -> Self {
        Self {
            record,
            group: None,
            state: GroupState::Uncommitted,
            duplicate: false,
        }
    }

    fn is_committed(&self) -> bool {
        self.group.is_some()
            && matches!(self.state, GroupState::Registering | GroupState::Established)
    }

    fn release(&mut self, client: Option<&mut Box<dyn DiscoveryClient>>) {
        if let (Some(group), Some(client)) = (self.group.take(), client) {
            client.free_group(group);
        }
        self.state = GroupState::Uncommitted;
    }
}

/// Keeps service records announced under one name
pub struct Dispatcher {
    backend: Arc<dyn DiscoveryBackend>,
    options: DispatcherOptions,
    name: String,
    client: Option<Box<dyn DiscoveryClient>>,
    client_id: ClientId,
    client_state: ClientState,
    events: mpsc::UnboundedSender<ClientEvent>,
    services: IndexMap<String, AnnouncementGroup>,
    paused: bool,
    handlers: Vec<NotificationHandler>,
}

impl Dispatcher {
    /// Create a dispatcher announcing under `name`
    ///
    /// Connects a client right away but publishes nothing until records are
    /// added. If the daemon cannot be reached the failure is logged and the
    /// dispatcher stays inert until [`reset`](Self::reset) or
    /// [`run`](Self::run) manage to connect.
    ///
    /// Daemon events arrive on the returned [`DispatcherEvents`] and must be
    /// fed back through [`handle_event`](Self::handle_event), or let
    /// [`spawn`](Self::spawn) do that.
    pub fn new(
        backend: Arc<dyn DiscoveryBackend>,
        name: impl Into<String>,
        options: DispatcherOptions,
    ) -> (Self, DispatcherEvents) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut dispatcher = Self {
            backend,
            options,
            name: name.into(),
            client: None,
            client_id: ClientId(0),
            client_state: ClientState::Connecting,
            events: tx,
            services: IndexMap::new(),
            paused: false,
            handlers: Vec::new(),
        };

        if let Err(e) = dispatcher.connect(false) {
            log::error!(
                "Cannot announce '{}', discovery daemon unavailable: {e}",
                dispatcher.name
            );
        }

        (dispatcher, DispatcherEvents { rx })
    }

    /// Current service name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Last known state of the daemon client
    pub fn client_state(&self) -> ClientState {
        self.client_state
    }

    /// Whether there is no daemon client at all
    pub fn is_inert(&self) -> bool {
        self.client.is_none()
    }

    /// Registered records in registration order
    pub fn records(&self) -> impl Iterator<Item = &ServiceRecord> {
        self.services.values().map(|entry| &entry.record)
    }

    /// State of the announcement group for base type `service_type`
    pub fn group_state(&self, service_type: &str) -> Option<GroupState> {
        self.services.get(service_type).map(|entry| entry.state)
    }

    /// Call `handler` for every future notification
    pub fn on_notification<F>(&mut self, handler: F)
    where
        F: Fn(&DispatcherNotification) + Send + 'static,
    {
        self.handlers.push(Box::new(handler));
    }

    /// Register a service record and publish it once the client is running
    ///
    /// `record_type` may name a subtype (`"_anon._sub._ftp._tcp"`); the record
    /// is then filed under its base type with that subtype attached. A record
    /// already registered for the same base type is withdrawn and replaced.
    ///
    /// # Errors
    ///
    /// Returns `DiscoveryError::InvalidServiceRecord` for an empty type or port 0.
    pub fn add_service<S: AsRef<str>>(
        &mut self,
        record_type: &str,
        domain: Option<&str>,
        host: Option<&str>,
        port: u16,
        txt: &[S],
    ) -> Result<(), DiscoveryError> {
        let mut record = ServiceRecord::new(record_type, port)?
            .with_domain(domain)
            .with_host(host)
            .with_txt(txt.iter().map(|s| s.as_ref().to_string()));
        self.stamp_cookie(&mut record);

        let key = record.service_type().to_string();
        log::debug!("Adding service '{}' of type {record_type}", self.name);

        if let Some(mut previous) = self.services.shift_remove(&key) {
            previous.release(self.client.as_mut());
        }
        self.services
            .insert(key.clone(), AnnouncementGroup::new(record));

        if self.can_publish() {
            self.publish(&key);
        }
        Ok(())
    }

    /// Attach one more subtype to the record of `base_type`
    ///
    /// Unknown base types are logged and ignored.
    pub fn add_service_subtype(&mut self, base_type: &str, subtype: &str) {
        let Some(entry) = self.services.get_mut(base_type) else {
            log::warn!("Cannot add subtype {subtype}: no service of type {base_type}");
            return;
        };
        if !entry.record.push_subtype(subtype) {
            return;
        }

        if let (Some(client), Some(group)) = (self.client.as_mut(), entry.group) {
            if let Err(e) = client.add_subtype(group, &self.name, &entry.record, subtype) {
                log::warn!("Failed to announce subtype {subtype} of '{}': {e}", self.name);
            }
        }
    }

    /// Replace the TXT entries of the record of `service_type`
    ///
    /// Unknown service types are logged and ignored.
    pub fn set_service_details<S: AsRef<str>>(&mut self, service_type: &str, txt: &[S]) {
        let Some(mut entry) = self.services.get_mut(service_type).map(|entry| {
            entry
                .record
                .set_txt(txt.iter().map(|s| s.as_ref().to_string()));
            entry.record.clone()
        }) else {
            log::warn!("Cannot update details: no service of type {service_type}");
            return;
        };
        self.stamp_cookie(&mut entry);

        if let Some(slot) = self.services.get_mut(service_type) {
            slot.record = entry;
            if let (Some(client), Some(group)) = (self.client.as_mut(), slot.group) {
                if let Err(e) = client.update_txt(group, &self.name, &slot.record) {
                    log::warn!("Failed to update details of '{}': {e}", self.name);
                }
            }
        }
    }

    /// Change the service name and republish every record under it
    pub fn set_name(&mut self, name: impl Into<String>) {
        let name = name.into();
        if name == self.name {
            return;
        }

        let old = std::mem::replace(&mut self.name, name);
        log::info!("Service '{old}' is now known as '{}'", self.name);
        self.notify(&DispatcherNotification::NameChanged {
            old,
            new: self.name.clone(),
        });

        self.withdraw_all();
        for entry in self.services.values_mut() {
            entry.duplicate = false;
        }
        if self.can_publish() {
            self.publish_all();
        }
    }

    /// Set the cookie attached to every record
    pub fn set_cookie(&mut self, cookie: Option<String>) {
        self.options.cookie = cookie;
        let keys: Vec<String> = self.services.keys().cloned().collect();
        for key in keys {
            let txt: Vec<String> = self.services[&key]
                .record
                .txt()
                .iter()
                .filter(|entry| entry.split_once('=').map_or(entry.as_str(), |(k, _)| k) != COOKIE_KEY)
                .cloned()
                .collect();
            self.set_service_details(&key, &txt);
        }
    }

    /// Set how name collisions are resolved
    pub fn set_collision_handling(&mut self, collisions: CollisionHandling) {
        self.options.collisions = collisions;
    }

    /// Withdraw every announcement
    ///
    /// Records are kept and come back with [`run`](Self::run). An inert
    /// dispatcher retries to connect here.
    pub fn reset(&mut self) {
        log::debug!("Resetting dispatcher '{}'", self.name);
        self.withdraw_all();
        self.paused = true;

        if self.client.is_none() {
            if let Err(e) = self.connect(false) {
                log::warn!("Discovery daemon still unavailable: {e}");
            }
        }
    }

    /// Resume publishing after [`reset`](Self::reset)
    ///
    /// # Errors
    ///
    /// Returns `DiscoveryError::ClientFailed` if no client can be created.
    pub fn run(&mut self) -> Result<(), DiscoveryError> {
        if self.client.is_none() {
            self.connect(false)?;
        }
        self.paused = false;
        if self.can_publish() {
            self.publish_all();
        }
        Ok(())
    }

    /// Apply one daemon event
    ///
    /// Events of clients that were replaced in the meantime are ignored.
    pub fn handle_event(&mut self, event: ClientEvent) {
        if event.client() != self.client_id {
            log::trace!("Ignoring event of stale client: {event:?}");
            return;
        }

        match event {
            ClientEvent::Client { state, .. } => self.on_client_state(state),
            ClientEvent::Group { group, state, .. } => self.on_group_state(group, state),
        }
    }

    /// Apply every queued event in `events`; returns how many were applied
    pub fn process_pending(&mut self, events: &mut DispatcherEvents) -> usize {
        let mut count = 0;
        while let Some(event) = events.try_recv() {
            self.handle_event(event);
            count += 1;
        }
        count
    }

    fn on_client_state(&mut self, state: ClientState) {
        log::debug!(
            "Discovery client of '{}': {:?} -> {state:?}",
            self.name,
            self.client_state
        );
        self.client_state = state;

        match state {
            ClientState::Running => {
                if self.can_publish() {
                    self.publish_all();
                }
            }
            ClientState::Registering | ClientState::Collision => {
                // The daemon renames its host; everything is republished on Running.
                self.withdraw_all();
            }
            ClientState::Failure => self.recover_client(),
            ClientState::Connecting => {}
        }
    }

    fn on_group_state(&mut self, group: GroupId, state: GroupState) {
        let Some(key) = self
            .services
            .iter()
            .find(|(_, entry)| entry.group == Some(group))
            .map(|(key, _)| key.clone())
        else {
            log::trace!("Ignoring event of released group {group:?}");
            return;
        };

        log::trace!("Group {key} of '{}': {state:?}", self.name);
        if let Some(entry) = self.services.get_mut(&key) {
            entry.state = state;
        }

        match state {
            GroupState::Uncommitted => {
                if self.can_publish() {
                    self.publish(&key);
                }
            }
            GroupState::Registering => {}
            GroupState::Established => {
                log::info!("Service '{}' of type {key} established", self.name);
            }
            GroupState::Collision => self.handle_collision(&key),
            GroupState::Failure => {
                log::warn!("Announcement of '{}' ({key}) failed", self.name);
                self.recover_client();
            }
        }
    }

    fn handle_collision(&mut self, key: &str) {
        match self.options.collisions {
            CollisionHandling::Ignore => {
                log::warn!("Service name '{}' collides for {key}, ignoring", self.name);
            }
            CollisionHandling::UniqueService if self.is_duplicate(key) => {
                log::info!(
                    "Service '{}' ({key}) is already announced with our cookie, withdrawing",
                    self.name
                );
                if let Some(entry) = self.services.get_mut(key) {
                    entry.release(self.client.as_mut());
                    entry.duplicate = true;
                }
                self.notify(&DispatcherNotification::DuplicateService {
                    service_type: key.to_string(),
                });
            }
            CollisionHandling::ChangeName | CollisionHandling::UniqueService => {
                let alternative = alternative_service_name(&self.name);
                log::info!(
                    "Service name '{}' collides for {key}, renaming to '{alternative}'",
                    self.name
                );
                self.set_name(alternative);
            }
        }
    }

    fn is_duplicate(&self, key: &str) -> bool {
        let Some(cookie) = self.options.cookie.as_deref() else {
            return false;
        };
        let (Some(client), Some(group)) = (
            self.client.as_ref(),
            self.services.get(key).and_then(|e| e.group),
        ) else {
            return false;
        };

        client
            .conflicting_txt(group)
            .is_some_and(|txt| txt_lookup(&txt, COOKIE_KEY) == Some(cookie))
    }

    fn recover_client(&mut self) {
        log::warn!(
            "Discovery client of '{}' failed, reconnecting",
            self.name
        );

        // Groups died with the client; forget them without talking to it.
        for entry in self.services.values_mut() {
            entry.group = None;
            entry.state = GroupState::Uncommitted;
        }
        self.client = None;
        self.client_state = ClientState::Connecting;

        if let Err(e) = self.connect(true) {
            log::error!("Failed to recreate discovery client: {e}");
        }
    }

    fn connect(&mut self, no_fail: bool) -> Result<(), DiscoveryError> {
        self.client_id = ClientId(self.client_id.0 + 1);
        let options = ClientOptions {
            interface: self.options.interface.clone(),
            family: self.options.family,
            no_fail,
        };

        let client = self
            .backend
            .connect(&options, EventSink::new(self.client_id, self.events.clone()))?;
        self.client_state = client.state();
        self.client = Some(client);
        log::debug!(
            "Discovery client {:?} of '{}' created in state {:?}",
            self.client_id,
            self.name,
            self.client_state
        );

        if self.can_publish() {
            self.publish_all();
        }
        Ok(())
    }

    fn can_publish(&self) -> bool {
        !self.paused && self.client.is_some() && self.client_state == ClientState::Running
    }

    fn publish_all(&mut self) {
        let keys: Vec<String> = self.services.keys().cloned().collect();
        for key in keys {
            self.publish(&key);
        }
    }

    fn publish(&mut self, key: &str) {
        let (Some(client), Some(entry)) = (self.client.as_mut(), self.services.get_mut(key)) else {
            return;
        };
        if entry.duplicate || entry.is_committed() {
            return;
        }

        let name = self.name.as_str();
        let result = (|| -> Result<(), DiscoveryError> {
            let group = match entry.group {
                Some(group) => group,
                None => {
                    let group = client.new_group()?;
                    entry.group = Some(group);
                    group
                }
            };
            client.add_service(group, name, &entry.record)?;
            client.commit(group)
        })();

        match result {
            Ok(()) => {
                entry.state = GroupState::Registering;
                log::debug!("Publishing '{}' as {key}", self.name);
            }
            Err(e) => {
                log::warn!("Failed to publish '{}' as {key}: {e}", self.name);
                if let Some(group) = entry.group.take() {
                    client.free_group(group);
                }
                entry.state = GroupState::Failure;
            }
        }
    }

    fn withdraw_all(&mut self) {
        for entry in self.services.values_mut() {
            entry.release(self.client.as_mut());
        }
    }

    fn stamp_cookie(&self, record: &mut ServiceRecord) {
        if let Some(cookie) = &self.options.cookie {
            record.set_txt_value(COOKIE_KEY, cookie);
        }
    }

    fn notify(&self, notification: &DispatcherNotification) {
        for handler in &self.handlers {
            handler(notification);
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        // Best-effort withdrawal; the daemon is not waited for.
        self.withdraw_all();
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("name", &self.name)
            .field("client_id", &self.client_id)
            .field("client_state", &self.client_state)
            .field("services", &self.services)
            .field("paused", &self.paused)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        NewGroup(GroupId),
        AddService(GroupId, String, String),
        Commit(GroupId),
        Free(GroupId),
        UpdateTxt(GroupId, Vec<String>),
    }

    /// Backend that records client calls and never emits events by itself
    #[derive(Default)]
    struct RecordingBackend {
        calls: Arc<Mutex<Vec<Call>>>,
        sinks: Arc<Mutex<Vec<EventSink>>>,
        unavailable: bool,
    }

    struct RecordingClient {
        calls: Arc<Mutex<Vec<Call>>>,
        next_group: u64,
    }

    impl DiscoveryBackend for RecordingBackend {
        fn connect(
            &self,
            _options: &ClientOptions,
            sink: EventSink,
        ) -> Result<Box<dyn DiscoveryClient>, DiscoveryError> {
            if self.unavailable {
                return Err(DiscoveryError::ClientFailed("no daemon".into()));
            }
            self.sinks.lock().unwrap().push(sink);
            Ok(Box::new(RecordingClient {
                calls: self.calls.clone(),
                next_group: 0,
            }))
        }
    }

    impl DiscoveryClient for RecordingClient {
        fn state(&self) -> ClientState {
            ClientState::Running
        }

        fn new_group(&mut self) -> Result<GroupId, DiscoveryError> {
            self.next_group += 1;
            let group = GroupId(self.next_group);
            self.calls.lock().unwrap().push(Call::NewGroup(group));
            Ok(group)
        }

        fn add_service(
            &mut self,
            group: GroupId,
            name: &str,
            record: &ServiceRecord,
        ) -> Result<(), DiscoveryError> {
            self.calls.lock().unwrap().push(Call::AddService(
                group,
                name.to_string(),
                record.service_type().to_string(),
            ));
            Ok(())
        }

        fn add_subtype(
            &mut self,
            _group: GroupId,
            _name: &str,
            _record: &ServiceRecord,
            _subtype: &str,
        ) -> Result<(), DiscoveryError> {
            Ok(())
        }

        fn update_txt(
            &mut self,
            group: GroupId,
            _name: &str,
            record: &ServiceRecord,
        ) -> Result<(), DiscoveryError> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::UpdateTxt(group, record.txt().to_vec()));
            Ok(())
        }

        fn commit(&mut self, group: GroupId) -> Result<(), DiscoveryError> {
            self.calls.lock().unwrap().push(Call::Commit(group));
            Ok(())
        }

        fn free_group(&mut self, group: GroupId) {
            self.calls.lock().unwrap().push(Call::Free(group));
        }

        fn conflicting_txt(&self, _group: GroupId) -> Option<Vec<String>> {
            None
        }
    }

    fn dispatcher(backend: RecordingBackend) -> (Dispatcher, DispatcherEvents, Arc<Mutex<Vec<Call>>>) {
        let calls = backend.calls.clone();
        let (dispatcher, events) =
            Dispatcher::new(Arc::new(backend), "Living Room", DispatcherOptions::default());
        (dispatcher, events, calls)
    }

    #[test]
    fn test_publishes_when_running() {
        let (mut dispatcher, _events, calls) = dispatcher(RecordingBackend::default());
        dispatcher
            .add_service("_http._tcp", None, None, 8080, &["path=/"])
            .unwrap();

        assert_eq!(
            *calls.lock().unwrap(),
            vec![
                Call::NewGroup(GroupId(1)),
                Call::AddService(GroupId(1), "Living Room".into(), "_http._tcp".into()),
                Call::Commit(GroupId(1)),
            ]
        );
        assert_eq!(dispatcher.group_state("_http._tcp"), Some(GroupState::Registering));
    }

    #[test]
    fn test_same_base_type_replaces_record() {
        let (mut dispatcher, _events, calls) = dispatcher(RecordingBackend::default());
        dispatcher.add_service::<&str>("_http._tcp", None, None, 8080, &[]).unwrap();
        dispatcher
            .add_service::<&str>("_foo._sub._http._tcp", None, None, 9090, &[])
            .unwrap();

        assert_eq!(dispatcher.records().count(), 1);
        let record = dispatcher.records().next().unwrap();
        assert_eq!(record.port(), 9090);
        assert!(calls.lock().unwrap().contains(&Call::Free(GroupId(1))));
    }

    #[test]
    fn test_reset_withdraws_and_run_republishes() {
        let (mut dispatcher, _events, calls) = dispatcher(RecordingBackend::default());
        dispatcher.add_service::<&str>("_http._tcp", None, None, 8080, &[]).unwrap();

        dispatcher.reset();
        assert!(calls.lock().unwrap().contains(&Call::Free(GroupId(1))));
        assert_eq!(dispatcher.group_state("_http._tcp"), Some(GroupState::Uncommitted));

        // Nothing is published while paused.
        dispatcher.add_service::<&str>("_ftp._tcp", None, None, 21, &[]).unwrap();
        assert_eq!(dispatcher.group_state("_ftp._tcp"), Some(GroupState::Uncommitted));

        dispatcher.run().unwrap();
        assert_eq!(dispatcher.group_state("_http._tcp"), Some(GroupState::Registering));
        assert_eq!(dispatcher.group_state("_ftp._tcp"), Some(GroupState::Registering));
    }

    #[test]
    fn test_set_name_republishes_and_notifies() {
        let (mut dispatcher, _events, calls) = dispatcher(RecordingBackend::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        dispatcher.on_notification(move |n| sink.lock().unwrap().push(n.clone()));

        dispatcher.add_service::<&str>("_http._tcp", None, None, 8080, &[]).unwrap();
        dispatcher.set_name("Kitchen");

        assert_eq!(dispatcher.name(), "Kitchen");
        assert_eq!(
            *seen.lock().unwrap(),
            vec![DispatcherNotification::NameChanged {
                old: "Living Room".into(),
                new: "Kitchen".into(),
            }]
        );
        assert!(calls
            .lock()
            .unwrap()
            .contains(&Call::AddService(GroupId(2), "Kitchen".into(), "_http._tcp".into())));
    }

    #[test]
    fn test_cookie_is_stamped_and_replaced() {
        let backend = RecordingBackend::default();
        let calls = backend.calls.clone();
        let options = DispatcherOptions {
            cookie: Some("1234".into()),
            ..Default::default()
        };
        let (mut dispatcher, _events) = Dispatcher::new(Arc::new(backend), "Box", options);

        dispatcher
            .add_service("_http._tcp", None, None, 80, &["path=/"])
            .unwrap();
        let record = dispatcher.records().next().unwrap();
        assert_eq!(record.txt_value(COOKIE_KEY), Some("1234"));

        dispatcher.set_cookie(Some("5678".into()));
        assert_eq!(
            calls.lock().unwrap().last(),
            Some(&Call::UpdateTxt(
                GroupId(1),
                vec!["path=/".to_string(), "cookie=5678".to_string()]
            ))
        );

        dispatcher.set_cookie(None);
        let record = dispatcher.records().next().unwrap();
        assert_eq!(record.txt(), ["path=/"]);
    }

    #[test]
    fn test_stale_client_events_are_ignored() {
        let backend = RecordingBackend::default();
        let sinks = backend.sinks.clone();
        let (mut dispatcher, mut events, _calls) = dispatcher(backend);
        dispatcher.add_service::<&str>("_http._tcp", None, None, 8080, &[]).unwrap();

        let first = sinks.lock().unwrap()[0].clone();
        first.client_state(ClientState::Failure);
        assert_eq!(dispatcher.process_pending(&mut events), 1);
        // A replacement client was created and the record republished.
        assert_eq!(sinks.lock().unwrap().len(), 2);
        assert_eq!(dispatcher.group_state("_http._tcp"), Some(GroupState::Registering));

        // Events of the dead client no longer matter.
        first.client_state(ClientState::Failure);
        dispatcher.process_pending(&mut events);
        assert_eq!(sinks.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_inert_without_daemon() {
        let backend = RecordingBackend {
            unavailable: true,
            ..Default::default()
        };
        let (mut dispatcher, _events, calls) = dispatcher(backend);
        assert!(dispatcher.is_inert());

        dispatcher.add_service::<&str>("_http._tcp", None, None, 8080, &[]).unwrap();
        assert!(calls.lock().unwrap().is_empty());
        assert!(dispatcher.run().is_err());
    }
}
