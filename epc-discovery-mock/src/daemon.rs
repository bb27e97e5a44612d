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

//! Shared in-memory discovery daemon

use crate::client::MockClient;
use epc_discovery::{
    ClientOptions, ClientState, DiscoveryBackend, DiscoveryClient, DiscoveryError, EventSink,
    GroupId, GroupState, ServiceRecord,
};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;

const DEFAULT_DOMAIN: &str = "local";
const DEFAULT_HOST: &str = "mock-host.local.";

/// A service currently announced on the simulated network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    pub name: String,
    /// Base service type
    pub service_type: String,
    pub subtypes: Vec<String>,
    pub domain: String,
    pub host: String,
    pub port: u16,
    pub txt: Vec<String>,
    owner: Owner,
}

impl Announcement {
    /// Whether this announcement was injected rather than published by a client
    pub fn is_foreign(&self) -> bool {
        self.owner == Owner::Foreign
    }

    /// Whether a browse for `service_type` finds this announcement
    pub fn matches_type(&self, service_type: &str) -> bool {
        self.service_type == service_type || self.subtypes.iter().any(|s| s == service_type)
    }

    fn same_instance(&self, name: &str, service_type: &str, domain: &str) -> bool {
        self.name == name && self.service_type == service_type && self.domain == domain
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Owner {
    Group(u64, GroupId),
    Foreign,
}

/// Changes browsers are told about
#[derive(Debug, Clone)]
pub(crate) enum BrowseEvent {
    Added(Announcement),
    Updated(Announcement),
    Removed(Announcement),
}

#[derive(Debug, Default)]
struct GroupSlot {
    entries: Vec<(String, ServiceRecord)>,
    committed: bool,
    conflict: Option<Vec<String>>,
}

#[derive(Debug)]
struct ClientSlot {
    sink: EventSink,
    state: ClientState,
    next_group: u64,
    groups: HashMap<GroupId, GroupSlot>,
}

impl ClientSlot {
    fn set_state(&mut self, state: ClientState) {
        self.state = state;
        self.sink.client_state(state);
    }
}

#[derive(Debug)]
struct DaemonState {
    available: bool,
    hold_registration: bool,
    address: IpAddr,
    next_client: u64,
    clients: HashMap<u64, ClientSlot>,
    announcements: Vec<Announcement>,
}

struct Inner {
    state: Mutex<DaemonState>,
    browse_tx: broadcast::Sender<BrowseEvent>,
}

/// In-memory stand-in for a DNS-SD daemon
///
/// Clones share one simulated network. Every state change is reported to the
/// owning client's [`EventSink`] synchronously, so a dispatcher driven with
/// `process_pending` sees a deterministic event order.
///
/// Fault injection: [`restart`](Self::restart),
/// [`set_available`](Self::set_available),
/// [`simulate_host_collision`](Self::simulate_host_collision),
/// [`fail_group`](Self::fail_group) and foreign announcements through
/// [`inject_foreign`](Self::inject_foreign).
///
/// # Example
///
/// ```
/// use epc_discovery_mock::MockDaemon;
///
/// let daemon = MockDaemon::new();
/// assert!(daemon.announcements().is_empty());
/// ```
#[derive(Clone)]
pub struct MockDaemon {
    inner: Arc<Inner>,
}

impl MockDaemon {
    /// Create an available daemon with an empty network
    pub fn new() -> Self {
        let (browse_tx, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(DaemonState {
                    available: true,
                    hold_registration: false,
                    address: IpAddr::V4(Ipv4Addr::LOCALHOST),
                    next_client: 0,
                    clients: HashMap::new(),
                    announcements: Vec::new(),
                }),
                browse_tx,
            }),
        }
    }

    /// Address browsers resolve every announcement to
    pub fn set_address(&self, address: IpAddr) {
        self.lock().address = address;
    }

    pub(crate) fn address(&self) -> IpAddr {
        self.lock().address
    }

    /// Snapshot of everything announced
    pub fn announcements(&self) -> Vec<Announcement> {
        self.lock().announcements.clone()
    }

    /// Whether `name` is announced for base type `service_type`
    pub fn is_announced(&self, name: &str, service_type: &str) -> bool {
        self.lock()
            .announcements
            .iter()
            .any(|a| a.name == name && a.service_type == service_type)
    }

    /// Number of connected (or waiting) clients
    pub fn client_count(&self) -> usize {
        self.lock().clients.len()
    }

    /// Keep new clients in `Registering` until [`release_clients`](Self::release_clients)
    pub fn hold_registration(&self, hold: bool) {
        self.lock().hold_registration = hold;
    }

    /// Move every client waiting in `Registering` to `Running`
    pub fn release_clients(&self) {
        let mut state = self.lock();
        for slot in state.clients.values_mut() {
            if slot.state == ClientState::Registering {
                slot.set_state(ClientState::Running);
            }
        }
    }

    /// Take the daemon down or bring it back
    ///
    /// Going down fails every client and drops their announcements. Coming
    /// back wakes clients that connected with `no_fail` while it was down.
    pub fn set_available(&self, available: bool) {
        let mut state = self.lock();
        if state.available == available {
            return;
        }
        state.available = available;

        if available {
            log::debug!("Mock daemon available");
            let hold = state.hold_registration;
            for slot in state.clients.values_mut() {
                if slot.state == ClientState::Connecting {
                    slot.set_state(ClientState::Registering);
                    if !hold {
                        slot.set_state(ClientState::Running);
                    }
                }
            }
        } else {
            log::debug!("Mock daemon unavailable");
            self.fail_all_clients(&mut state);
        }
    }

    /// Simulate a daemon restart: every client fails and loses its announcements
    pub fn restart(&self) {
        log::debug!("Mock daemon restarting");
        let mut state = self.lock();
        self.fail_all_clients(&mut state);
    }

    /// Simulate a host name collision
    ///
    /// Clients see `Collision`, lose their announcements and then return to
    /// `Running`.
    pub fn simulate_host_collision(&self) {
        let mut state = self.lock();
        let live: Vec<u64> = state
            .clients
            .iter()
            .filter(|(_, slot)| slot.state == ClientState::Running)
            .map(|(key, _)| *key)
            .collect();

        for key in live {
            if let Some(slot) = state.clients.get_mut(&key) {
                slot.set_state(ClientState::Collision);
                for group in slot.groups.values_mut() {
                    group.committed = false;
                }
            }
            self.remove_announcements(&mut state, |a| matches!(a.owner, Owner::Group(k, _) if k == key));
            if let Some(slot) = state.clients.get_mut(&key) {
                slot.set_state(ClientState::Running);
            }
        }
    }

    /// Put the group that announces `name`/`service_type` into `Failure`
    ///
    /// Returns whether such a group exists.
    pub fn fail_group(&self, name: &str, service_type: &str) -> bool {
        let mut state = self.lock();
        let owner = state
            .announcements
            .iter()
            .find(|a| a.name == name && a.service_type == service_type)
            .map(|a| a.owner);

        let Some(Owner::Group(key, group)) = owner else {
            return false;
        };
        self.remove_announcements(&mut state, |a| a.owner == Owner::Group(key, group));
        if let Some(slot) = state.clients.get_mut(&key) {
            if let Some(g) = slot.groups.get_mut(&group) {
                g.committed = false;
            }
            slot.sink.group_state(group, GroupState::Failure);
        }
        true
    }

    /// Announce a service that belongs to some other host
    ///
    /// A client announcement with the same name and type loses the name: its
    /// group reports `Collision`.
    pub fn inject_foreign(&self, name: &str, service_type: &str, port: u16, txt: &[&str]) {
        let txt: Vec<String> = txt.iter().map(|s| s.to_string()).collect();
        let mut state = self.lock();

        let losers: Vec<Owner> = state
            .announcements
            .iter()
            .filter(|a| a.same_instance(name, service_type, DEFAULT_DOMAIN))
            .map(|a| a.owner)
            .collect();
        for owner in losers {
            self.remove_announcements(&mut state, |a| a.owner == owner);
            if let Owner::Group(key, group) = owner {
                if let Some(slot) = state.clients.get_mut(&key) {
                    if let Some(g) = slot.groups.get_mut(&group) {
                        g.committed = false;
                        g.conflict = Some(txt.clone());
                    }
                    slot.sink.group_state(group, GroupState::Collision);
                }
            }
        }

        let announcement = Announcement {
            name: name.to_string(),
            service_type: service_type.to_string(),
            subtypes: Vec::new(),
            domain: DEFAULT_DOMAIN.to_string(),
            host: "foreign-host.local.".to_string(),
            port,
            txt,
            owner: Owner::Foreign,
        };
        state.announcements.push(announcement.clone());
        let _ = self.inner.browse_tx.send(BrowseEvent::Added(announcement));
    }

    /// Remove a foreign announcement
    pub fn withdraw_foreign(&self, name: &str, service_type: &str) {
        let mut state = self.lock();
        self.remove_announcements(&mut state, |a| {
            a.is_foreign() && a.name == name && a.service_type == service_type
        });
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<BrowseEvent> {
        self.inner.browse_tx.subscribe()
    }

    pub(crate) fn client_state(&self, key: u64) -> ClientState {
        self.lock()
            .clients
            .get(&key)
            .map_or(ClientState::Failure, |slot| slot.state)
    }

    pub(crate) fn new_group(&self, key: u64) -> Result<GroupId, DiscoveryError> {
        let mut state = self.lock();
        let slot = Self::slot(&mut state, key)?;
        slot.next_group += 1;
        let group = GroupId(slot.next_group);
        slot.groups.insert(group, GroupSlot::default());
        Ok(group)
    }

    pub(crate) fn stage(
        &self,
        key: u64,
        group: GroupId,
        name: &str,
        record: &ServiceRecord,
    ) -> Result<(), DiscoveryError> {
        let mut state = self.lock();
        let slot = Self::group(&mut state, key, group)?;
        slot.entries
            .retain(|(_, r)| r.service_type() != record.service_type());
        slot.entries.push((name.to_string(), record.clone()));
        let committed = slot.committed;

        if committed {
            self.refresh(&mut state, key, group, name, record);
        }
        Ok(())
    }

    pub(crate) fn commit(&self, key: u64, group: GroupId) -> Result<(), DiscoveryError> {
        let mut state = self.lock();
        if Self::slot(&mut state, key)?.state != ClientState::Running {
            return Err(DiscoveryError::PublishFailed(
                "client is not running".to_string(),
            ));
        }

        let owner = Owner::Group(key, group);
        let entries = Self::group(&mut state, key, group)?.entries.clone();
        let conflict = entries.iter().find_map(|(name, record)| {
            let domain = record.domain().unwrap_or(DEFAULT_DOMAIN);
            state
                .announcements
                .iter()
                .find(|a| a.owner != owner && a.same_instance(name, record.service_type(), domain))
                .map(|a| a.txt.clone())
        });

        let slot = Self::slot(&mut state, key)?;
        slot.sink.group_state(group, GroupState::Registering);

        if let Some(txt) = conflict {
            if let Some(g) = slot.groups.get_mut(&group) {
                g.conflict = Some(txt);
            }
            slot.sink.group_state(group, GroupState::Collision);
            return Ok(());
        }

        if let Some(g) = slot.groups.get_mut(&group) {
            g.committed = true;
            g.conflict = None;
        }
        slot.sink.group_state(group, GroupState::Established);

        for (name, record) in entries {
            let announcement = Announcement {
                name,
                service_type: record.service_type().to_string(),
                subtypes: record.subtypes().to_vec(),
                domain: record.domain().unwrap_or(DEFAULT_DOMAIN).to_string(),
                host: record.host().unwrap_or(DEFAULT_HOST).to_string(),
                port: record.port(),
                txt: record.txt().to_vec(),
                owner,
            };
            log::trace!("Mock daemon announcing {announcement:?}");
            state.announcements.push(announcement.clone());
            let _ = self.inner.browse_tx.send(BrowseEvent::Added(announcement));
        }
        Ok(())
    }

    pub(crate) fn free_group(&self, key: u64, group: GroupId) {
        let mut state = self.lock();
        if let Some(slot) = state.clients.get_mut(&key) {
            slot.groups.remove(&group);
        }
        self.remove_announcements(&mut state, |a| a.owner == Owner::Group(key, group));
    }

    pub(crate) fn conflicting_txt(&self, key: u64, group: GroupId) -> Option<Vec<String>> {
        self.lock()
            .clients
            .get(&key)
            .and_then(|slot| slot.groups.get(&group))
            .and_then(|g| g.conflict.clone())
    }

    pub(crate) fn disconnect(&self, key: u64) {
        let mut state = self.lock();
        state.clients.remove(&key);
        self.remove_announcements(&mut state, |a| matches!(a.owner, Owner::Group(k, _) if k == key));
    }

    fn refresh(
        &self,
        state: &mut DaemonState,
        key: u64,
        group: GroupId,
        name: &str,
        record: &ServiceRecord,
    ) {
        let owner = Owner::Group(key, group);
        for a in state.announcements.iter_mut() {
            if a.owner == owner && a.name == name && a.service_type == record.service_type() {
                a.subtypes = record.subtypes().to_vec();
                a.txt = record.txt().to_vec();
                a.port = record.port();
                let _ = self.inner.browse_tx.send(BrowseEvent::Updated(a.clone()));
            }
        }
    }

    fn fail_all_clients(&self, state: &mut DaemonState) {
        for slot in state.clients.values_mut() {
            slot.groups.clear();
            slot.set_state(ClientState::Failure);
        }
        self.remove_announcements(state, |a| !a.is_foreign());
    }

    fn remove_announcements(
        &self,
        state: &mut DaemonState,
        doomed: impl Fn(&Announcement) -> bool,
    ) {
        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut state.announcements)
            .into_iter()
            .partition(|a| doomed(a));
        state.announcements = kept;
        for a in removed {
            let _ = self.inner.browse_tx.send(BrowseEvent::Removed(a));
        }
    }

    fn slot(state: &mut DaemonState, key: u64) -> Result<&mut ClientSlot, DiscoveryError> {
        state
            .clients
            .get_mut(&key)
            .filter(|slot| slot.state != ClientState::Failure)
            .ok_or_else(|| DiscoveryError::ClientFailed("client is gone".to_string()))
    }

    fn group(
        state: &mut DaemonState,
        key: u64,
        group: GroupId,
    ) -> Result<&mut GroupSlot, DiscoveryError> {
        Self::slot(state, key)?
            .groups
            .get_mut(&group)
            .ok_or(DiscoveryError::UnknownGroup(group))
    }

    fn lock(&self) -> MutexGuard<'_, DaemonState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MockDaemon {
    fn default() -> Self {
        Self::new()
    }
}

impl DiscoveryBackend for MockDaemon {
    fn connect(
        &self,
        options: &ClientOptions,
        events: EventSink,
    ) -> Result<Box<dyn DiscoveryClient>, DiscoveryError> {
        let mut state = self.lock();
        if !state.available && !options.no_fail {
            return Err(DiscoveryError::ClientFailed(
                "mock daemon is not available".to_string(),
            ));
        }

        state.next_client += 1;
        let key = state.next_client;
        let mut slot = ClientSlot {
            sink: events,
            state: ClientState::Connecting,
            next_group: 0,
            groups: HashMap::new(),
        };

        if state.available {
            slot.state = ClientState::Registering;
            if !state.hold_registration {
                // Host records are up already; the dispatcher may publish at once.
                slot.set_state(ClientState::Running);
            }
        }
        state.clients.insert(key, slot);
        log::debug!("Mock daemon accepted client {key}");

        Ok(Box::new(MockClient::new(self.clone(), key)))
    }
}
