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

//! Conversions between discovery types and mdns-sd types

use epc_discovery::{service_type_base, ServiceInfo};
use std::net::IpAddr;

/// Domain mdns-sd serves
pub const LOCAL_DOMAIN: &str = "local";

/// Fully qualified type for mdns-sd: `"_http._tcp"` becomes `"_http._tcp.local."`
pub fn ty_domain(service_type: &str) -> String {
    let trimmed = service_type.trim_end_matches('.');
    if trimmed.ends_with(".local") {
        format!("{trimmed}.")
    } else {
        format!("{trimmed}.local.")
    }
}

/// Service type without the `.local.` suffix
pub fn strip_domain(ty_domain: &str) -> &str {
    let trimmed = ty_domain.trim_end_matches('.');
    trimmed.strip_suffix(".local").unwrap_or(trimmed)
}

/// Host name to announce
///
/// mdns-sd requires names ending in `".local."`; without an explicit host the
/// machine's host name is used.
pub fn host_name(host: Option<&str>) -> String {
    let host = match host {
        Some(host) => host.to_string(),
        None => hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "localhost".to_string()),
    };

    let lower = host.to_lowercase();
    if lower.ends_with(".local.") {
        host
    } else if lower.ends_with(".local") {
        format!("{host}.")
    } else {
        format!("{}.local.", host.trim_end_matches('.'))
    }
}

/// Instance name part of a full service name
///
/// `"Living Room._http._tcp.local."` gives `"Living Room"` for any browse of
/// `_http._tcp` or one of its subtypes.
pub fn instance_name(fullname: &str, service_type: &str) -> String {
    let base = ty_domain(service_type_base(strip_domain(service_type)));
    fullname
        .strip_suffix(&base)
        .and_then(|name| name.strip_suffix('.'))
        .unwrap_or(fullname)
        .to_string()
}

/// TXT entries (`key=value` or bare `key`) as mdns-sd properties
pub fn txt_properties(txt: &[String]) -> Vec<mdns_sd::TxtProperty> {
    txt.iter()
        .map(|entry| match entry.split_once('=') {
            Some((key, value)) => (key, value).into(),
            None => (entry.as_str(), "").into(),
        })
        .collect()
}

/// mdns-sd properties as `key=value` strings
pub fn txt_strings(properties: &mdns_sd::TxtProperties) -> Vec<String> {
    properties
        .iter()
        .map(|prop| match prop.val() {
            Some(_) => format!("{}={}", prop.key(), prop.val_str()),
            None => prop.key().to_string(),
        })
        .collect()
}

fn scoped_ip_to_ip_addr(host: &mdns_sd::ScopedIp) -> Option<IpAddr> {
    let host = host.to_string();
    let clean = host.split_once('%').map_or(host.as_str(), |(addr, _)| addr);
    clean.parse().ok()
}

/// Build a [`ServiceInfo`] for a service found while browsing `service_type`
///
/// IPv4 addresses come first, then routable IPv6, then link-local IPv6.
pub fn service_info_from_mdns(info: &mdns_sd::ResolvedService, service_type: &str) -> ServiceInfo {
    let mut addresses: Vec<IpAddr> = info
        .get_addresses()
        .iter()
        .filter_map(scoped_ip_to_ip_addr)
        .collect();
    addresses.sort_by_key(|addr| match addr {
        IpAddr::V4(_) => 0,
        IpAddr::V6(v6) if (v6.segments()[0] & 0xffc0) == 0xfe80 => 2,
        IpAddr::V6(_) => 1,
    });

    ServiceInfo {
        name: instance_name(info.get_fullname(), service_type),
        service_type: strip_domain(service_type).to_string(),
        domain: LOCAL_DOMAIN.to_string(),
        host: info.get_hostname().to_string(),
        addresses,
        port: info.get_port(),
        txt: txt_strings(info.get_properties()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ty_domain() {
        assert_eq!(ty_domain("_http._tcp"), "_http._tcp.local.");
        assert_eq!(ty_domain("_http._tcp.local"), "_http._tcp.local.");
        assert_eq!(ty_domain("_http._tcp.local."), "_http._tcp.local.");
        assert_eq!(
            ty_domain("_glom._sub._https._tcp"),
            "_glom._sub._https._tcp.local."
        );
        assert_eq!(strip_domain("_https._tcp.local."), "_https._tcp");
    }

    #[test]
    fn test_host_name() {
        assert_eq!(host_name(Some("box")), "box.local.");
        assert_eq!(host_name(Some("box.local")), "box.local.");
        assert_eq!(host_name(Some("box.local.")), "box.local.");
        assert!(host_name(None).ends_with(".local."));
    }

    #[test]
    fn test_instance_name() {
        assert_eq!(
            instance_name("Living Room._http._tcp.local.", "_http._tcp"),
            "Living Room"
        );
        assert_eq!(
            instance_name("Box #2._https._tcp.local.", "_myapp._sub._https._tcp.local."),
            "Box #2"
        );
        assert_eq!(instance_name("odd", "_http._tcp"), "odd");
    }

    #[test]
    fn test_txt_properties() {
        let props = txt_properties(&["path=/contents".to_string(), "cookie=abc".to_string()]);
        assert_eq!(props.len(), 2);
        assert_eq!(props[0].key(), "path");
        assert_eq!(props[0].val_str(), "/contents");
        assert_eq!(props[1].key(), "cookie");
        assert_eq!(props[1].val_str(), "abc");
    }
}
