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

//! Announcement transport adapter
//!
//! A [`DiscoveryBackend`] stands for a discovery daemon. Each call to
//! [`DiscoveryBackend::connect`] yields a fresh [`DiscoveryClient`] through
//! which announcement groups are registered. The daemon reports progress
//! asynchronously by pushing [`ClientEvent`]s into the [`EventSink`] handed
//! over at connect time. Client calls never block on the daemon.

use crate::{DiscoveryError, ServiceRecord};
use tokio::sync::mpsc;

/// Identifies one client connection; events of replaced clients are stale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub u64);

/// Identifies one announcement group within a client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(pub u64);

/// Connection state of a discovery client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Waiting for the daemon to become available
    Connecting,
    /// The daemon is registering its host records
    Registering,
    /// Host records are established; services can be published
    Running,
    /// The daemon's host name collided and is being changed
    Collision,
    /// The connection is broken and must be recreated
    Failure,
}

/// State of one announcement group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupState {
    /// Empty or reset, nothing announced
    Uncommitted,
    /// Committed, the daemon is probing
    Registering,
    /// Announced on the network
    Established,
    /// Another announcement already uses this name
    Collision,
    /// The daemon gave up on this group
    Failure,
}

/// Which network interfaces to announce on
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum InterfaceSelector {
    /// Every usable interface
    #[default]
    Any,
    /// A single interface by name (e.g. `eth0`)
    Named(String),
}

/// Which address family to announce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddressFamily {
    /// IPv4 and IPv6
    #[default]
    Unspecified,
    /// IPv4 only
    Inet,
    /// IPv6 only
    Inet6,
}

impl AddressFamily {
    /// Family of a bound socket address
    pub fn of(addr: &std::net::SocketAddr) -> Self {
        if addr.ip().is_unspecified() {
            // A wildcard bind accepts both families on dual-stack hosts
            return if addr.is_ipv6() {
                Self::Unspecified
            } else {
                Self::Inet
            };
        }
        if addr.is_ipv4() {
            Self::Inet
        } else {
            Self::Inet6
        }
    }
}

/// Options for a new client connection
#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    pub interface: InterfaceSelector,
    pub family: AddressFamily,
    /// Succeed even when the daemon is unreachable and wait in
    /// [`ClientState::Connecting`] until it appears
    pub no_fail: bool,
}

/// State change reported by a discovery daemon
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// The client connection changed state
    Client { client: ClientId, state: ClientState },
    /// An announcement group changed state
    Group {
        client: ClientId,
        group: GroupId,
        state: GroupState,
    },
}

impl ClientEvent {
    /// The client this event belongs to
    pub fn client(&self) -> ClientId {
        match self {
            Self::Client { client, .. } | Self::Group { client, .. } => *client,
        }
    }
}

/// Channel end through which a client reports daemon state changes
#[derive(Debug, Clone)]
pub struct EventSink {
    client: ClientId,
    tx: mpsc::UnboundedSender<ClientEvent>,
}

impl EventSink {
    /// Sink tagging every event with `client`
    pub fn new(client: ClientId, tx: mpsc::UnboundedSender<ClientEvent>) -> Self {
        Self { client, tx }
    }

    /// The client this sink belongs to
    pub fn client(&self) -> ClientId {
        self.client
    }

    /// Report a client state change
    pub fn client_state(&self, state: ClientState) {
        self.send(ClientEvent::Client {
            client: self.client,
            state,
        });
    }

    /// Report a group state change
    pub fn group_state(&self, group: GroupId, state: GroupState) {
        self.send(ClientEvent::Group {
            client: self.client,
            group,
            state,
        });
    }

    fn send(&self, event: ClientEvent) {
        // The dispatcher may already be gone; nothing is listening then.
        if self.tx.send(event).is_err() {
            log::trace!("Dropping discovery event for closed dispatcher");
        }
    }
}

/// A discovery daemon that clients can connect to
pub trait DiscoveryBackend: Send + Sync {
    /// Open a new client connection reporting through `events`
    ///
    /// # Errors
    ///
    /// Returns `DiscoveryError::ClientFailed` if the daemon cannot be reached
    /// and `options.no_fail` is not set (or the backend cannot wait).
    fn connect(
        &self,
        options: &ClientOptions,
        events: EventSink,
    ) -> Result<Box<dyn DiscoveryClient>, DiscoveryError>;
}

/// A live connection to a discovery daemon
///
/// Groups are filled with [`add_service`](Self::add_service) and announced
/// by [`commit`](Self::commit). Outcomes arrive later as
/// [`ClientEvent::Group`] events.
pub trait DiscoveryClient: Send {
    /// Connection state right now
    fn state(&self) -> ClientState;

    /// Create an empty, uncommitted announcement group
    fn new_group(&mut self) -> Result<GroupId, DiscoveryError>;

    /// Stage `record` (with its subtypes) under `name` in `group`
    fn add_service(
        &mut self,
        group: GroupId,
        name: &str,
        record: &ServiceRecord,
    ) -> Result<(), DiscoveryError>;

    /// Announce one more subtype of an already staged or committed record
    fn add_subtype(
        &mut self,
        group: GroupId,
        name: &str,
        record: &ServiceRecord,
        subtype: &str,
    ) -> Result<(), DiscoveryError>;

    /// Replace the TXT data of a staged or committed record
    fn update_txt(
        &mut self,
        group: GroupId,
        name: &str,
        record: &ServiceRecord,
    ) -> Result<(), DiscoveryError>;

    /// Announce everything staged in `group`
    fn commit(&mut self, group: GroupId) -> Result<(), DiscoveryError>;

    /// Withdraw and discard `group`; best effort
    fn free_group(&mut self, group: GroupId);

    /// TXT data of the announcement that collided with `group`, if the
    /// daemon can resolve it
    fn conflicting_txt(&self, group: GroupId) -> Option<Vec<String>>;
}
