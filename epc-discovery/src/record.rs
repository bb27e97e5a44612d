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

//! DNS-SD service records

use crate::service_type::service_type_base;
use crate::DiscoveryError;

/// TXT key identifying a service instance across renames
pub const COOKIE_KEY: &str = "cookie";

/// One DNS-SD advertisement: a base service type plus its subtypes, target and TXT data
///
/// Records are identified by their base service type; a dispatcher holds at
/// most one record per base type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRecord {
    service_type: String,
    subtypes: Vec<String>,
    domain: Option<String>,
    host: Option<String>,
    port: u16,
    txt: Vec<String>,
}

impl ServiceRecord {
    /// Create a record for `record_type` on `port`
    ///
    /// A record type of the form `"_anon._sub._ftp._tcp"` yields the base type
    /// `"_ftp._tcp"` with `"_anon._sub._ftp._tcp"` as its first subtype.
    ///
    /// # Errors
    ///
    /// Returns `DiscoveryError::InvalidServiceRecord` for an empty type or port 0.
    ///
    /// # Example
    ///
    /// ```
    /// use epc_discovery::ServiceRecord;
    ///
    /// let record = ServiceRecord::new("_anon._sub._ftp._tcp", 21).unwrap();
    /// assert_eq!(record.service_type(), "_ftp._tcp");
    /// assert_eq!(record.subtypes(), ["_anon._sub._ftp._tcp"]);
    /// ```
    pub fn new(record_type: &str, port: u16) -> Result<Self, DiscoveryError> {
        if port == 0 {
            return Err(DiscoveryError::InvalidServiceRecord(format!(
                "port of '{record_type}' must be greater than zero"
            )));
        }

        let base = service_type_base(record_type);
        if base.is_empty() {
            return Err(DiscoveryError::InvalidServiceRecord(
                "service type must not be empty".to_string(),
            ));
        }

        let subtypes = if base == record_type {
            Vec::new()
        } else {
            vec![record_type.to_string()]
        };

        Ok(Self {
            service_type: base.to_string(),
            subtypes,
            domain: None,
            host: None,
            port,
            txt: Vec::new(),
        })
    }

    /// Announce in `domain` instead of the local link
    #[must_use]
    pub fn with_domain(mut self, domain: Option<&str>) -> Self {
        self.domain = domain.filter(|d| !d.is_empty()).map(str::to_string);
        self
    }

    /// Point the record at `host` instead of the local host
    #[must_use]
    pub fn with_host(mut self, host: Option<&str>) -> Self {
        self.host = host.filter(|h| !h.is_empty()).map(str::to_string);
        self
    }

    /// Replace the TXT entries
    #[must_use]
    pub fn with_txt<I, S>(mut self, txt: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.set_txt(txt);
        self
    }

    /// Base service type, e.g. `_http._tcp`
    pub fn service_type(&self) -> &str {
        &self.service_type
    }

    /// Subtypes in registration order
    pub fn subtypes(&self) -> &[String] {
        &self.subtypes
    }

    /// Domain, `None` for the local link
    pub fn domain(&self) -> Option<&str> {
        self.domain.as_deref()
    }

    /// Host override, `None` for the local host
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// Port number
    pub fn port(&self) -> u16 {
        self.port
    }

    /// TXT entries (`key=value`) in order
    pub fn txt(&self) -> &[String] {
        &self.txt
    }

    /// Value of the first TXT entry named `key`
    pub fn txt_value(&self, key: &str) -> Option<&str> {
        txt_lookup(&self.txt, key)
    }

    /// Append `subtype` unless already present; returns whether it was added
    pub fn push_subtype(&mut self, subtype: &str) -> bool {
        if self.subtypes.iter().any(|s| s == subtype) {
            return false;
        }
        self.subtypes.push(subtype.to_string());
        true
    }

    /// Replace the TXT entries
    pub fn set_txt<I, S>(&mut self, txt: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.txt = txt.into_iter().map(Into::into).collect();
    }

    /// Set `key=value`, replacing an existing entry for `key`
    pub fn set_txt_value(&mut self, key: &str, value: &str) {
        let entry = format!("{key}={value}");
        match self
            .txt
            .iter_mut()
            .find(|e| e.split_once('=').map_or(e.as_str(), |(k, _)| k) == key)
        {
            Some(existing) => *existing = entry,
            None => self.txt.push(entry),
        }
    }
}

/// Value of the first `key=value` entry in `txt` named `key`
pub fn txt_lookup<'a>(txt: &'a [String], key: &str) -> Option<&'a str> {
    txt.iter().find_map(|entry| match entry.split_once('=') {
        Some((k, v)) if k == key => Some(v),
        None if entry == key => Some(""),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_type_has_no_subtypes() {
        let record = ServiceRecord::new("_http._tcp", 8080).unwrap();
        assert_eq!(record.service_type(), "_http._tcp");
        assert!(record.subtypes().is_empty());
        assert_eq!(record.port(), 8080);
        assert_eq!(record.domain(), None);
    }

    #[test]
    fn test_rejects_invalid_records() {
        assert!(ServiceRecord::new("_http._tcp", 0).is_err());
        assert!(ServiceRecord::new("", 80).is_err());
        assert!(ServiceRecord::new("_x._sub.", 80).is_err());
    }

    #[test]
    fn test_subtypes_are_an_ordered_set() {
        let mut record = ServiceRecord::new("_a._sub._http._tcp", 80).unwrap();
        assert!(record.push_subtype("_b._sub._http._tcp"));
        assert!(!record.push_subtype("_a._sub._http._tcp"));
        assert_eq!(
            record.subtypes(),
            ["_a._sub._http._tcp", "_b._sub._http._tcp"]
        );
    }

    #[test]
    fn test_txt_values() {
        let mut record = ServiceRecord::new("_http._tcp", 80)
            .unwrap()
            .with_txt(["path=/contents", "flag"]);
        assert_eq!(record.txt_value("path"), Some("/contents"));
        assert_eq!(record.txt_value("flag"), Some(""));
        assert_eq!(record.txt_value("missing"), None);

        record.set_txt_value("path", "/other");
        record.set_txt_value("cookie", "abc");
        assert_eq!(record.txt(), ["path=/other", "flag", "cookie=abc"]);
    }

    #[test]
    fn test_empty_domain_means_local() {
        let record = ServiceRecord::new("_http._tcp", 80)
            .unwrap()
            .with_domain(Some(""))
            .with_host(Some("box.local"));
        assert_eq!(record.domain(), None);
        assert_eq!(record.host(), Some("box.local"));
    }
}
