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

//! Mock discovery client

use crate::daemon::MockDaemon;
use epc_discovery::{ClientState, DiscoveryClient, DiscoveryError, GroupId, ServiceRecord};

/// Client connection to a [`MockDaemon`]
///
/// Dropping the client withdraws everything it announced.
pub struct MockClient {
    daemon: MockDaemon,
    key: u64,
}

impl MockClient {
    pub(crate) fn new(daemon: MockDaemon, key: u64) -> Self {
        Self { daemon, key }
    }
}

impl DiscoveryClient for MockClient {
    fn state(&self) -> ClientState {
        self.daemon.client_state(self.key)
    }

    fn new_group(&mut self) -> Result<GroupId, DiscoveryError> {
        self.daemon.new_group(self.key)
    }

    fn add_service(
        &mut self,
        group: GroupId,
        name: &str,
        record: &ServiceRecord,
    ) -> Result<(), DiscoveryError> {
        self.daemon.stage(self.key, group, name, record)
    }

    fn add_subtype(
        &mut self,
        group: GroupId,
        name: &str,
        record: &ServiceRecord,
        _subtype: &str,
    ) -> Result<(), DiscoveryError> {
        // The record already carries the new subtype.
        self.daemon.stage(self.key, group, name, record)
    }

    fn update_txt(
        &mut self,
        group: GroupId,
        name: &str,
        record: &ServiceRecord,
    ) -> Result<(), DiscoveryError> {
        self.daemon.stage(self.key, group, name, record)
    }

    fn commit(&mut self, group: GroupId) -> Result<(), DiscoveryError> {
        self.daemon.commit(self.key, group)
    }

    fn free_group(&mut self, group: GroupId) {
        self.daemon.free_group(self.key, group);
    }

    fn conflicting_txt(&self, group: GroupId) -> Option<Vec<String>> {
        self.daemon.conflicting_txt(self.key, group)
    }
}

impl Drop for MockClient {
    fn drop(&mut self) {
        self.daemon.disconnect(self.key);
    }
}
