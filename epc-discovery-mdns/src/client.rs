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

//! mDNS discovery client

use crate::utils::{host_name, ty_domain, txt_properties, LOCAL_DOMAIN};
use epc_discovery::{
    AddressFamily, ClientOptions, ClientState, DiscoveryBackend, DiscoveryClient, DiscoveryError,
    EventSink, GroupId, GroupState, InterfaceSelector, ServiceRecord,
};
use mdns_sd::{DaemonEvent, IfKind, ServiceDaemon};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Creates [`MdnsClient`]s, each with its own mdns-sd daemon
#[derive(Debug, Clone)]
pub struct MdnsBackend {
    port: u16,
}

impl MdnsBackend {
    /// Backend on the standard mDNS port (5353)
    pub fn new() -> Self {
        Self::with_port(mdns_sd::MDNS_PORT)
    }

    /// Backend on a custom UDP port
    ///
    /// Publishers and browsers must agree on the port. A non-standard port
    /// (e.g. 5454) keeps development traffic away from the system responder.
    pub fn with_port(port: u16) -> Self {
        Self { port }
    }
}

impl Default for MdnsBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DiscoveryBackend for MdnsBackend {
    /// mdns-sd runs in-process, so `no_fail` cannot wait for anything: a
    /// daemon that does not start is always an error.
    fn connect(
        &self,
        options: &ClientOptions,
        events: EventSink,
    ) -> Result<Box<dyn DiscoveryClient>, DiscoveryError> {
        let client = MdnsClient::start(self.port, options, events)?;
        Ok(Box::new(client))
    }
}

#[derive(Debug, Default)]
struct MdnsGroup {
    staged: Vec<(String, ServiceRecord)>,
    registered: Vec<String>,
}

type Fullnames = Arc<Mutex<HashMap<String, GroupId>>>;

/// One mdns-sd daemon announcing the groups of one dispatcher
pub struct MdnsClient {
    daemon: ServiceDaemon,
    events: EventSink,
    next_group: u64,
    groups: HashMap<GroupId, MdnsGroup>,
    fullnames: Fullnames,
    closing: Arc<AtomicBool>,
}

impl MdnsClient {
    fn start(port: u16, options: &ClientOptions, events: EventSink) -> Result<Self, DiscoveryError> {
        let daemon = ServiceDaemon::new_with_port(port).map_err(|e| {
            DiscoveryError::ClientFailed(format!("Failed to create mDNS daemon: {e}"))
        })?;
        select_interfaces(&daemon, options)?;

        let monitor = daemon.monitor().map_err(|e| {
            DiscoveryError::ClientFailed(format!("Failed to monitor mDNS daemon: {e}"))
        })?;

        let fullnames: Fullnames = Arc::new(Mutex::new(HashMap::new()));
        let closing = Arc::new(AtomicBool::new(false));
        {
            let fullnames = fullnames.clone();
            let closing = closing.clone();
            let events = events.clone();
            std::thread::Builder::new()
                .name("epc-mdns-monitor".to_string())
                .spawn(move || {
                    while let Ok(event) = monitor.recv() {
                        forward_daemon_event(event, &fullnames, &events);
                    }
                    if !closing.load(Ordering::Acquire) {
                        log::warn!("mDNS daemon stopped unexpectedly");
                        events.client_state(ClientState::Failure);
                    }
                })
                .map_err(DiscoveryError::Io)?;
        }

        // Nothing to register for the host itself; services can go out at once.
        events.client_state(ClientState::Running);
        log::debug!("mDNS client started on port {port}");

        Ok(Self {
            daemon,
            events,
            next_group: 0,
            groups: HashMap::new(),
            fullnames,
            closing,
        })
    }

    fn group(&mut self, group: GroupId) -> Result<&mut MdnsGroup, DiscoveryError> {
        self.groups
            .get_mut(&group)
            .ok_or(DiscoveryError::UnknownGroup(group))
    }

    fn register(
        &self,
        group: GroupId,
        name: &str,
        record: &ServiceRecord,
    ) -> Result<String, DiscoveryError> {
        if let Some(domain) = record.domain() {
            if domain.trim_end_matches('.') != LOCAL_DOMAIN {
                return Err(DiscoveryError::PublishFailed(format!(
                    "mDNS only serves the local domain, not {domain}"
                )));
            }
        }

        // mdns-sd announces at most one subtype per instance.
        let ty = match record.subtypes() {
            [] => ty_domain(record.service_type()),
            [first, rest @ ..] => {
                if !rest.is_empty() {
                    log::debug!(
                        "Announcing '{name}' with subtype {first} only, {} more ignored",
                        rest.len()
                    );
                }
                ty_domain(first)
            }
        };

        let info = mdns_sd::ServiceInfo::new(
            &ty,
            name,
            &host_name(record.host()),
            (),
            record.port(),
            Some(txt_properties(record.txt())),
        )
        .map_err(|e| DiscoveryError::PublishFailed(format!("Failed to create service info: {e}")))?
        .enable_addr_auto();

        let fullname = info.get_fullname().to_string();
        self.daemon.register(info).map_err(|e| {
            DiscoveryError::PublishFailed(format!("Failed to register service: {e}"))
        })?;
        self.fullnames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(fullname.clone(), group);

        log::info!("Registered mDNS service: {fullname}");
        Ok(fullname)
    }

    fn unregister(&self, fullname: &str) {
        self.fullnames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(fullname);
        match self.daemon.unregister(fullname) {
            Ok(_) => log::info!("Unregistered mDNS service: {fullname}"),
            Err(e) => log::debug!("Failed to unregister {fullname}: {e}"),
        }
    }

    fn reregister(
        &mut self,
        group: GroupId,
        name: &str,
        record: &ServiceRecord,
    ) -> Result<(), DiscoveryError> {
        let slot = self.group(group)?;
        slot.staged
            .retain(|(_, r)| r.service_type() != record.service_type());
        slot.staged.push((name.to_string(), record.clone()));
        if slot.registered.is_empty() {
            return Ok(());
        }

        // Registering the same full name again replaces the announcement.
        let fullname = self.register(group, name, record)?;
        let slot = self.group(group)?;
        if !slot.registered.contains(&fullname) {
            slot.registered.push(fullname);
        }
        Ok(())
    }
}

fn select_interfaces(daemon: &ServiceDaemon, options: &ClientOptions) -> Result<(), DiscoveryError> {
    let failed = |e: mdns_sd::Error| {
        DiscoveryError::ClientFailed(format!("Failed to select mDNS interfaces: {e}"))
    };

    if let InterfaceSelector::Named(name) = &options.interface {
        daemon.disable_interface(IfKind::All).map_err(failed)?;
        daemon
            .enable_interface(IfKind::Name(name.clone()))
            .map_err(failed)?;
    }
    match options.family {
        AddressFamily::Unspecified => {}
        AddressFamily::Inet => daemon.disable_interface(IfKind::IPv6).map_err(failed)?,
        AddressFamily::Inet6 => daemon.disable_interface(IfKind::IPv4).map_err(failed)?,
    }
    Ok(())
}

fn forward_daemon_event(event: DaemonEvent, fullnames: &Fullnames, events: &EventSink) {
    let lookup = |fullname: &str| {
        fullnames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(fullname)
            .copied()
    };

    match event {
        DaemonEvent::Announce(fullname, addresses) => {
            log::debug!("mDNS announced {fullname} on {addresses}");
            if let Some(group) = lookup(&fullname) {
                events.group_state(group, GroupState::Established);
            }
        }
        DaemonEvent::NameChange(change) => {
            log::info!(
                "mDNS name conflict: {} renamed to {}",
                change.original,
                change.new_name
            );
            if let Some(group) = lookup(&change.original) {
                events.group_state(group, GroupState::Collision);
            }
        }
        DaemonEvent::Error(e) => log::warn!("mDNS daemon error: {e}"),
        other => log::trace!("mDNS daemon event: {other:?}"),
    }
}

impl DiscoveryClient for MdnsClient {
    fn state(&self) -> ClientState {
        if self.closing.load(Ordering::Acquire) {
            ClientState::Failure
        } else {
            ClientState::Running
        }
    }

    fn new_group(&mut self) -> Result<GroupId, DiscoveryError> {
        self.next_group += 1;
        let group = GroupId(self.next_group);
        self.groups.insert(group, MdnsGroup::default());
        Ok(group)
    }

    fn add_service(
        &mut self,
        group: GroupId,
        name: &str,
        record: &ServiceRecord,
    ) -> Result<(), DiscoveryError> {
        self.reregister(group, name, record)
    }

    fn add_subtype(
        &mut self,
        group: GroupId,
        name: &str,
        record: &ServiceRecord,
        _subtype: &str,
    ) -> Result<(), DiscoveryError> {
        self.reregister(group, name, record)
    }

    fn update_txt(
        &mut self,
        group: GroupId,
        name: &str,
        record: &ServiceRecord,
    ) -> Result<(), DiscoveryError> {
        self.reregister(group, name, record)
    }

    fn commit(&mut self, group: GroupId) -> Result<(), DiscoveryError> {
        let staged = self.group(group)?.staged.clone();
        self.events.group_state(group, GroupState::Registering);

        let mut registered = Vec::with_capacity(staged.len());
        for (name, record) in &staged {
            match self.register(group, name, record) {
                Ok(fullname) => registered.push(fullname),
                Err(e) => {
                    for fullname in &registered {
                        self.unregister(fullname);
                    }
                    return Err(e);
                }
            }
        }
        self.group(group)?.registered = registered;
        Ok(())
    }

    fn free_group(&mut self, group: GroupId) {
        if let Some(slot) = self.groups.remove(&group) {
            for fullname in &slot.registered {
                self.unregister(fullname);
            }
        }
    }

    fn conflicting_txt(&self, _group: GroupId) -> Option<Vec<String>> {
        // mdns-sd resolves conflicts itself and does not report the winner.
        None
    }
}

impl Drop for MdnsClient {
    fn drop(&mut self) {
        self.closing.store(true, Ordering::Release);
        let groups: Vec<GroupId> = self.groups.keys().copied().collect();
        for group in groups {
            self.free_group(group);
        }
        if let Err(e) = self.daemon.shutdown() {
            log::debug!("Failed to shut down mDNS daemon: {e}");
        }
    }
}
