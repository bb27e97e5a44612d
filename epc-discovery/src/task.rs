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

//! Task-owned dispatcher
//!
//! [`Dispatcher::spawn`] moves a dispatcher into a tokio task that applies
//! commands and daemon events in arrival order. [`DispatcherHandle`] is the
//! cloneable front end; dropping the last handle stops the task and withdraws
//! every announcement.

use crate::dispatcher::{Dispatcher, DispatcherEvents, DispatcherNotification};
use crate::{DiscoveryError, ServiceRecord};
use tokio::sync::{mpsc, oneshot, watch};

enum Command {
    AddService {
        record_type: String,
        domain: Option<String>,
        host: Option<String>,
        port: u16,
        txt: Vec<String>,
        reply: oneshot::Sender<Result<(), DiscoveryError>>,
    },
    AddSubtype {
        base_type: String,
        subtype: String,
    },
    SetDetails {
        service_type: String,
        txt: Vec<String>,
    },
    SetName(String),
    SetCookie(Option<String>),
    Records(oneshot::Sender<Vec<ServiceRecord>>),
    Reset(oneshot::Sender<()>),
    Run(oneshot::Sender<Result<(), DiscoveryError>>),
}

/// Cloneable handle to a spawned [`Dispatcher`]
#[derive(Clone)]
pub struct DispatcherHandle {
    commands: mpsc::UnboundedSender<Command>,
    name: watch::Receiver<String>,
    notifications: tokio::sync::broadcast::Sender<DispatcherNotification>,
}

impl Dispatcher {
    /// Run this dispatcher in a tokio task fed by `events`
    ///
    /// Must be called within a tokio runtime.
    pub fn spawn(mut self, mut events: DispatcherEvents) -> DispatcherHandle {
        let (commands, mut rx) = mpsc::unbounded_channel();
        let (name_tx, name) = watch::channel(self.name().to_string());
        let (notifications, _) = tokio::sync::broadcast::channel(16);

        let forward = notifications.clone();
        self.on_notification(move |notification| {
            if let DispatcherNotification::NameChanged { new, .. } = notification {
                name_tx.send_replace(new.clone());
            }
            // No subscribers is fine.
            let _ = forward.send(notification.clone());
        });

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    command = rx.recv() => match command {
                        Some(command) => self.apply(command),
                        None => break,
                    },
                    Some(event) = events.recv() => self.handle_event(event),
                }
            }
            log::debug!("Dispatcher '{}' stopped", self.name());
        });

        DispatcherHandle {
            commands,
            name,
            notifications,
        }
    }

    fn apply(&mut self, command: Command) {
        match command {
            Command::AddService {
                record_type,
                domain,
                host,
                port,
                txt,
                reply,
            } => {
                let result =
                    self.add_service(&record_type, domain.as_deref(), host.as_deref(), port, &txt);
                let _ = reply.send(result);
            }
            Command::AddSubtype { base_type, subtype } => {
                self.add_service_subtype(&base_type, &subtype);
            }
            Command::SetDetails { service_type, txt } => {
                self.set_service_details(&service_type, &txt);
            }
            Command::SetName(name) => self.set_name(name),
            Command::SetCookie(cookie) => self.set_cookie(cookie),
            Command::Records(reply) => {
                let _ = reply.send(self.records().cloned().collect());
            }
            Command::Reset(reply) => {
                self.reset();
                let _ = reply.send(());
            }
            Command::Run(reply) => {
                let _ = reply.send(self.run());
            }
        }
    }
}

impl DispatcherHandle {
    /// Current service name, following collision renames
    pub fn name(&self) -> String {
        self.name.borrow().clone()
    }

    /// Watch the service name
    pub fn watch_name(&self) -> watch::Receiver<String> {
        self.name.clone()
    }

    /// Subscribe to renames and duplicate detection
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<DispatcherNotification> {
        self.notifications.subscribe()
    }

    /// See [`Dispatcher::add_service`]
    pub async fn add_service<S: AsRef<str>>(
        &self,
        record_type: &str,
        domain: Option<&str>,
        host: Option<&str>,
        port: u16,
        txt: &[S],
    ) -> Result<(), DiscoveryError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::AddService {
            record_type: record_type.to_string(),
            domain: domain.map(str::to_string),
            host: host.map(str::to_string),
            port,
            txt: txt.iter().map(|s| s.as_ref().to_string()).collect(),
            reply,
        })?;
        rx.await.map_err(|_| DiscoveryError::DispatcherStopped)?
    }

    /// See [`Dispatcher::add_service_subtype`]
    pub fn add_service_subtype(&self, base_type: &str, subtype: &str) -> Result<(), DiscoveryError> {
        self.send(Command::AddSubtype {
            base_type: base_type.to_string(),
            subtype: subtype.to_string(),
        })
    }

    /// See [`Dispatcher::set_service_details`]
    pub fn set_service_details<S: AsRef<str>>(
        &self,
        service_type: &str,
        txt: &[S],
    ) -> Result<(), DiscoveryError> {
        self.send(Command::SetDetails {
            service_type: service_type.to_string(),
            txt: txt.iter().map(|s| s.as_ref().to_string()).collect(),
        })
    }

    /// See [`Dispatcher::set_name`]
    pub fn set_name(&self, name: impl Into<String>) -> Result<(), DiscoveryError> {
        self.send(Command::SetName(name.into()))
    }

    /// See [`Dispatcher::set_cookie`]
    pub fn set_cookie(&self, cookie: Option<String>) -> Result<(), DiscoveryError> {
        self.send(Command::SetCookie(cookie))
    }

    /// Snapshot of the registered records
    pub async fn records(&self) -> Result<Vec<ServiceRecord>, DiscoveryError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Records(reply))?;
        rx.await.map_err(|_| DiscoveryError::DispatcherStopped)
    }

    /// See [`Dispatcher::reset`]
    pub async fn reset(&self) -> Result<(), DiscoveryError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Reset(reply))?;
        rx.await.map_err(|_| DiscoveryError::DispatcherStopped)
    }

    /// See [`Dispatcher::run`]
    pub async fn run(&self) -> Result<(), DiscoveryError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Run(reply))?;
        rx.await.map_err(|_| DiscoveryError::DispatcherStopped)?
    }

    fn send(&self, command: Command) -> Result<(), DiscoveryError> {
        self.commands
            .send(command)
            .map_err(|_| DiscoveryError::DispatcherStopped)
    }
}

impl std::fmt::Debug for DispatcherHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatcherHandle")
            .field("name", &*self.name.borrow())
            .finish_non_exhaustive()
    }
}
