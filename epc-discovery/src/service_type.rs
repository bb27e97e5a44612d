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

//! Service types, transport protocols and service names

use core::fmt;
use core::str::FromStr;

/// Base service type of plain HTTP publishers
pub const HTTP_SERVICE_TYPE: &str = "_http._tcp";

/// Base service type of TLS-secured publishers
pub const HTTPS_SERVICE_TYPE: &str = "_https._tcp";

/// Umbrella service type shared by all Easy Publish and Consume publishers
pub const EASY_PUBLISH_SERVICE_TYPE: &str = "_easy-publish._tcp";

const SUBTYPE_SEPARATOR: &str = "._sub.";

/// Transport protocol of a publisher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Protocol {
    /// Not known (yet)
    #[default]
    Unknown,
    /// Plain HTTP
    Http,
    /// HTTP over TLS
    Https,
}

impl Protocol {
    /// Base DNS-SD service type of this protocol
    ///
    /// ```
    /// use epc_discovery::Protocol;
    ///
    /// assert_eq!(Protocol::Https.service_type(), Some("_https._tcp"));
    /// assert_eq!(Protocol::Unknown.service_type(), None);
    /// ```
    pub fn service_type(self) -> Option<&'static str> {
        match self {
            Self::Http => Some(HTTP_SERVICE_TYPE),
            Self::Https => Some(HTTPS_SERVICE_TYPE),
            Self::Unknown => None,
        }
    }

    /// URI scheme of this protocol
    pub fn scheme(self) -> Option<&'static str> {
        match self {
            Self::Http => Some("http"),
            Self::Https => Some("https"),
            Self::Unknown => None,
        }
    }

    /// Derive the protocol from any service type a publisher announces
    ///
    /// Understands the base types (`_http._tcp`), application subtypes
    /// (`_app._sub._https._tcp`) and the umbrella selectors
    /// (`_https._sub._easy-publish._tcp`).
    pub fn from_service_type(service_type: &str) -> Self {
        let service_type = service_type.trim_end_matches('.');
        let service_type = service_type
            .strip_suffix(".local")
            .unwrap_or(service_type);

        match service_type_base(service_type) {
            HTTP_SERVICE_TYPE => Self::Http,
            HTTPS_SERVICE_TYPE => Self::Https,
            EASY_PUBLISH_SERVICE_TYPE => match service_type.split_once(SUBTYPE_SEPARATOR) {
                Some(("_http", _)) => Self::Http,
                Some(("_https", _)) => Self::Https,
                _ => Self::Unknown,
            },
            _ => Self::Unknown,
        }
    }

    /// Derive the protocol from a URI scheme
    pub fn from_scheme(scheme: &str) -> Self {
        if scheme.eq_ignore_ascii_case("http") {
            Self::Http
        } else if scheme.eq_ignore_ascii_case("https") {
            Self::Https
        } else {
            Self::Unknown
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scheme().unwrap_or("unknown"))
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match Self::from_scheme(s) {
            Self::Unknown => Err(format!("unknown protocol '{s}' (expected http or https)")),
            protocol => Ok(protocol),
        }
    }
}

/// Turn an application or program name into a DNS-label-safe token
///
/// The name is transliterated to ASCII first, then every character outside
/// `[A-Za-z0-9]` becomes `-`.
///
/// ```
/// use epc_discovery::application_slug;
///
/// assert_eq!(application_slug("Café Menu"), "Cafe-Menu");
/// assert_eq!(application_slug("my_app.v2"), "my-app-v2");
/// ```
pub fn application_slug(name: &str) -> String {
    deunicode::deunicode(name)
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}

/// Service type identifying publishers of `application` using `protocol`
///
/// Without an application this is the protocol's base type.
///
/// ```
/// use epc_discovery::{service_type_new, Protocol};
///
/// assert_eq!(
///     service_type_new(Protocol::Http, Some("glom")).as_deref(),
///     Some("_glom._sub._http._tcp")
/// );
/// assert_eq!(service_type_new(Protocol::Https, None).as_deref(), Some("_https._tcp"));
/// ```
pub fn service_type_new(protocol: Protocol, application: Option<&str>) -> Option<String> {
    let base = protocol.service_type()?;
    match application.map(application_slug) {
        Some(slug) if !slug.is_empty() => Some(format!("_{slug}{SUBTYPE_SEPARATOR}{base}")),
        _ => Some(base.to_string()),
    }
}

/// Umbrella selector (`_https._sub._easy-publish._tcp`) for `protocol`
pub fn umbrella_service_type(protocol: Protocol) -> Option<String> {
    let scheme = protocol.scheme()?;
    Some(format!(
        "_{scheme}{SUBTYPE_SEPARATOR}{EASY_PUBLISH_SERVICE_TYPE}"
    ))
}

/// Strip the subtype part of a service type
///
/// ```
/// use epc_discovery::service_type_base;
///
/// assert_eq!(service_type_base("_anon._sub._ftp._tcp"), "_ftp._tcp");
/// assert_eq!(service_type_base("_ftp._tcp"), "_ftp._tcp");
/// ```
pub fn service_type_base(service_type: &str) -> &str {
    service_type
        .split_once(SUBTYPE_SEPARATOR)
        .map_or(service_type, |(_, base)| base)
}

/// Service types a consumer browses to find publishers of `application`
///
/// TLS-secured variants come first, so they are preferred when a publisher
/// announces both.
pub fn service_type_list_supported(application: Option<&str>) -> Vec<String> {
    [Protocol::Https, Protocol::Http]
        .into_iter()
        .filter_map(|protocol| match application {
            Some(application) => service_type_new(protocol, Some(application)),
            None => umbrella_service_type(protocol),
        })
        .collect()
}

/// Next candidate name after a collision
///
/// Follows the discovery daemon convention: `"Foo"` becomes `"Foo #2"`,
/// `"Foo #2"` becomes `"Foo #3"` and so on.
pub fn alternative_service_name(name: &str) -> String {
    if let Some((stem, counter)) = name.rsplit_once(" #") {
        if let Ok(counter) = counter.parse::<u32>() {
            if counter >= 2 {
                return format!("{stem} #{}", counter.saturating_add(1));
            }
        }
    }
    format!("{name} #2")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_from_service_type() {
        assert_eq!(Protocol::from_service_type("_http._tcp"), Protocol::Http);
        assert_eq!(Protocol::from_service_type("_https._tcp.local."), Protocol::Https);
        assert_eq!(
            Protocol::from_service_type("_glom._sub._https._tcp"),
            Protocol::Https
        );
        assert_eq!(
            Protocol::from_service_type("_http._sub._easy-publish._tcp"),
            Protocol::Http
        );
        assert_eq!(
            Protocol::from_service_type("_https._sub._easy-publish._tcp.local."),
            Protocol::Https
        );
        assert_eq!(Protocol::from_service_type("_ftp._tcp"), Protocol::Unknown);
    }

    #[test]
    fn test_protocol_parse() {
        assert_eq!("HTTPS".parse::<Protocol>().unwrap(), Protocol::Https);
        assert!("gopher".parse::<Protocol>().is_err());
        assert_eq!(Protocol::Http.to_string(), "http");
    }

    #[test]
    fn test_application_slug() {
        assert_eq!(application_slug("Test Application"), "Test-Application");
        assert_eq!(application_slug("Ünïcødé"), "Unicode");
        assert_eq!(application_slug("a+b"), "a-b");
    }

    #[test]
    fn test_service_type_list_supported() {
        assert_eq!(
            service_type_list_supported(Some("glom")),
            vec!["_glom._sub._https._tcp", "_glom._sub._http._tcp"]
        );
        assert_eq!(
            service_type_list_supported(None),
            vec![
                "_https._sub._easy-publish._tcp",
                "_http._sub._easy-publish._tcp"
            ]
        );
    }

    #[test]
    fn test_alternative_service_name() {
        assert_eq!(alternative_service_name("Foo"), "Foo #2");
        assert_eq!(alternative_service_name("Foo #2"), "Foo #3");
        assert_eq!(alternative_service_name("Foo #9"), "Foo #10");
        assert_eq!(alternative_service_name("Foo #bar"), "Foo #bar #2");
        assert_eq!(alternative_service_name("Issue #1"), "Issue #1 #2");
    }
}
