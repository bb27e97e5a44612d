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

//! HTTP authentication math (RFC 7617 Basic, RFC 7616 Digest with MD5)
//!
//! The publisher never sees a Digest password: it only receives a proof
//! derived from the password, the realm and a server nonce. Verification
//! therefore happens by recomputing the proof from a candidate password,
//! see [`DigestResponse::verify`].

use base64::{engine::general_purpose::STANDARD, Engine};
use md5::{Digest, Md5};
use rand::RngCore;

/// Authentication scheme announced in a `WWW-Authenticate` challenge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    /// Password travels base64-encoded (needs TLS to be safe)
    Basic,
    /// Only a password-derived proof travels
    Digest,
}

/// A `WWW-Authenticate` challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub scheme: AuthScheme,
    pub realm: String,
    pub nonce: Option<String>,
    pub opaque: Option<String>,
    /// The previous nonce expired; credentials were fine
    pub stale: bool,
}

impl Challenge {
    /// Basic challenge for `realm`
    pub fn basic(realm: &str) -> Self {
        Self {
            scheme: AuthScheme::Basic,
            realm: realm.to_string(),
            nonce: None,
            opaque: None,
            stale: false,
        }
    }

    /// Digest challenge for `realm` with a fresh nonce
    pub fn digest(realm: &str, nonce: String, stale: bool) -> Self {
        Self {
            scheme: AuthScheme::Digest,
            realm: realm.to_string(),
            nonce: Some(nonce),
            opaque: None,
            stale,
        }
    }

    /// Format as a `WWW-Authenticate` header value
    pub fn to_header_value(&self) -> String {
        match self.scheme {
            AuthScheme::Basic => format!("Basic realm={}", quote(&self.realm)),
            AuthScheme::Digest => {
                let mut value = format!(
                    "Digest realm={}, nonce={}, qop=\"auth\", algorithm=MD5",
                    quote(&self.realm),
                    quote(self.nonce.as_deref().unwrap_or_default())
                );
                if let Some(opaque) = &self.opaque {
                    value.push_str(&format!(", opaque={}", quote(opaque)));
                }
                if self.stale {
                    value.push_str(", stale=true");
                }
                value
            }
        }
    }

    /// Parse a `WWW-Authenticate` header value
    ///
    /// Returns `None` for schemes other than Basic and Digest, and for
    /// Digest challenges lacking a nonce.
    pub fn parse(header: &str) -> Option<Self> {
        let (scheme, rest) = split_scheme(header)?;
        let params = parse_params(rest);
        let realm = param(&params, "realm").unwrap_or_default().to_string();

        match scheme {
            AuthScheme::Basic => Some(Self::basic(&realm)),
            AuthScheme::Digest => Some(Self {
                scheme,
                realm,
                nonce: Some(param(&params, "nonce")?.to_string()),
                opaque: param(&params, "opaque").map(str::to_string),
                stale: param(&params, "stale").is_some_and(|s| s.eq_ignore_ascii_case("true")),
            }),
        }
    }
}

/// Credentials presented in an `Authorization` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authorization {
    Basic { username: String, password: String },
    Digest(DigestResponse),
}

impl Authorization {
    /// Parse an `Authorization` header value
    pub fn parse(header: &str) -> Option<Self> {
        let (scheme, rest) = split_scheme(header)?;
        match scheme {
            AuthScheme::Basic => {
                let decoded = STANDARD.decode(rest.trim()).ok()?;
                let decoded = String::from_utf8(decoded).ok()?;
                let (username, password) = decoded.split_once(':')?;
                Some(Self::Basic {
                    username: username.to_string(),
                    password: password.to_string(),
                })
            }
            AuthScheme::Digest => DigestResponse::from_params(&parse_params(rest)).map(Self::Digest),
        }
    }

    /// Name of the user presenting these credentials
    pub fn username(&self) -> &str {
        match self {
            Self::Basic { username, .. } => username,
            Self::Digest(digest) => &digest.username,
        }
    }

    /// Format as an `Authorization` header value
    pub fn to_header_value(&self) -> String {
        match self {
            Self::Basic { username, password } => {
                format!("Basic {}", STANDARD.encode(format!("{username}:{password}")))
            }
            Self::Digest(digest) => digest.to_header_value(),
        }
    }

    /// Answer `challenge` with the given credentials
    ///
    /// `nonce_count` numbers the requests made with the challenge's nonce,
    /// starting at 1. Basic credentials ignore it.
    pub fn answer(
        challenge: &Challenge,
        username: &str,
        password: &str,
        method: &str,
        uri: &str,
        nonce_count: u32,
    ) -> Option<Self> {
        match challenge.scheme {
            AuthScheme::Basic => Some(Self::Basic {
                username: username.to_string(),
                password: password.to_string(),
            }),
            AuthScheme::Digest => {
                DigestResponse::answer(challenge, username, password, method, uri, nonce_count)
                    .map(Self::Digest)
            }
        }
    }
}

/// The parameters of a Digest `Authorization` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestResponse {
    pub username: String,
    pub realm: String,
    pub nonce: String,
    pub uri: String,
    pub response: String,
    pub qop: Option<String>,
    pub nc: Option<String>,
    pub cnonce: Option<String>,
    pub opaque: Option<String>,
}

impl DigestResponse {
    /// Compute the client's answer to a Digest challenge
    pub fn answer(
        challenge: &Challenge,
        username: &str,
        password: &str,
        method: &str,
        uri: &str,
        nonce_count: u32,
    ) -> Option<Self> {
        let nonce = challenge.nonce.clone()?;
        let mut cnonce = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut cnonce);

        let mut answer = Self {
            username: username.to_string(),
            realm: challenge.realm.clone(),
            nonce,
            uri: uri.to_string(),
            response: String::new(),
            qop: Some("auth".to_string()),
            nc: Some(format!("{nonce_count:08x}")),
            cnonce: Some(hex::encode(cnonce)),
            opaque: challenge.opaque.clone(),
        };
        answer.response = answer.expected_response(password, method);
        Some(answer)
    }

    /// The `nc` parameter, absent for answers without `qop`
    pub fn nonce_count(&self) -> Option<u32> {
        u32::from_str_radix(self.nc.as_deref()?, 16).ok()
    }

    /// Whether this proof was computed from `password`
    pub fn verify(&self, password: &str, method: &str) -> bool {
        let expected = self.expected_response(password, method);
        constant_time_eq(expected.as_bytes(), self.response.to_ascii_lowercase().as_bytes())
    }

    fn expected_response(&self, password: &str, method: &str) -> String {
        let ha1 = md5_hex(&[&self.username, &self.realm, password]);
        let ha2 = md5_hex(&[method, &self.uri]);

        match (&self.qop, &self.nc, &self.cnonce) {
            (Some(qop), Some(nc), Some(cnonce)) => {
                md5_hex(&[&ha1, &self.nonce, nc, cnonce, qop, &ha2])
            }
            _ => md5_hex(&[&ha1, &self.nonce, &ha2]),
        }
    }

    fn from_params(params: &[(String, String)]) -> Option<Self> {
        Some(Self {
            username: param(params, "username")?.to_string(),
            realm: param(params, "realm")?.to_string(),
            nonce: param(params, "nonce")?.to_string(),
            uri: param(params, "uri")?.to_string(),
            response: param(params, "response")?.to_string(),
            qop: param(params, "qop").map(str::to_string),
            nc: param(params, "nc").map(str::to_string),
            cnonce: param(params, "cnonce").map(str::to_string),
            opaque: param(params, "opaque").map(str::to_string),
        })
    }

    fn to_header_value(&self) -> String {
        let mut value = format!(
            "Digest username={}, realm={}, nonce={}, uri={}, response={}, algorithm=MD5",
            quote(&self.username),
            quote(&self.realm),
            quote(&self.nonce),
            quote(&self.uri),
            quote(&self.response)
        );
        if let (Some(qop), Some(nc), Some(cnonce)) = (&self.qop, &self.nc, &self.cnonce) {
            value.push_str(&format!(", qop={qop}, nc={nc}, cnonce={}", quote(cnonce)));
        }
        if let Some(opaque) = &self.opaque {
            value.push_str(&format!(", opaque={}", quote(opaque)));
        }
        value
    }
}

/// Generate a random server nonce
pub fn generate_nonce() -> String {
    let mut nonce = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut nonce);
    hex::encode(nonce)
}

fn md5_hex(parts: &[&str]) -> String {
    let mut hasher = Md5::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update(b":");
        }
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn split_scheme(header: &str) -> Option<(AuthScheme, &str)> {
    let header = header.trim_start();
    let (scheme, rest) = header.split_once(' ').unwrap_or((header, ""));
    let scheme = if scheme.eq_ignore_ascii_case("basic") {
        AuthScheme::Basic
    } else if scheme.eq_ignore_ascii_case("digest") {
        AuthScheme::Digest
    } else {
        return None;
    };
    Some((scheme, rest))
}

fn param<'a>(params: &'a [(String, String)], name: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

fn quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// Parse a comma separated list of `key=value` / `key="quoted value"` pairs
fn parse_params(input: &str) -> Vec<(String, String)> {
    let mut params = Vec::new();
    let mut chars = input.chars().peekable();

    loop {
        while chars.next_if(|c| c.is_whitespace() || *c == ',').is_some() {}

        let mut key = String::new();
        while let Some(c) = chars.next_if(|c| *c != '=' && *c != ',') {
            key.push(c);
        }
        let key = key.trim().to_string();
        if key.is_empty() {
            if chars.peek().is_none() {
                break;
            }
            chars.next();
            continue;
        }

        let mut value = String::new();
        if chars.next_if_eq(&'=').is_some() {
            while chars.next_if(|c| c.is_whitespace()).is_some() {}
            if chars.next_if_eq(&'"').is_some() {
                while let Some(c) = chars.next() {
                    match c {
                        '\\' => {
                            if let Some(escaped) = chars.next() {
                                value.push(escaped);
                            }
                        }
                        '"' => break,
                        other => value.push(other),
                    }
                }
            } else {
                while let Some(c) = chars.next_if(|c| *c != ',') {
                    value.push(c);
                }
                value = value.trim().to_string();
            }
        }
        params.push((key, value));
    }

    params
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_params_mixed_quoting() {
        let params = parse_params(r#"realm="a, \"b\"", qop=auth,  nc=00000001"#);
        assert_eq!(
            params,
            vec![
                ("realm".to_string(), r#"a, "b""#.to_string()),
                ("qop".to_string(), "auth".to_string()),
                ("nc".to_string(), "00000001".to_string()),
            ]
        );
    }

    #[test]
    fn test_challenge_header_roundtrip() {
        let challenge = Challenge::digest("My \"Service\"", "abc123".to_string(), true);
        let parsed = Challenge::parse(&challenge.to_header_value()).unwrap();
        assert_eq!(parsed, challenge);

        let basic = Challenge::basic("Realm");
        assert_eq!(basic.to_header_value(), "Basic realm=\"Realm\"");
        assert_eq!(Challenge::parse("Basic realm=\"Realm\"").unwrap(), basic);
    }

    #[test]
    fn test_unknown_scheme_is_rejected() {
        assert!(Challenge::parse("Bearer realm=\"x\"").is_none());
        assert!(Authorization::parse("Negotiate abc").is_none());
    }

    #[test]
    fn test_rfc2617_example() {
        // Worked example from RFC 2617 section 3.5
        let response = DigestResponse {
            username: "Mufasa".to_string(),
            realm: "testrealm@host.com".to_string(),
            nonce: "dcd98b7102dd2f0e8b11d0f600bfb0c093".to_string(),
            uri: "/dir/index.html".to_string(),
            response: "6629fae49393a05397450978507c4ef1".to_string(),
            qop: Some("auth".to_string()),
            nc: Some("00000001".to_string()),
            cnonce: Some("0a4f113b".to_string()),
            opaque: Some("5ccc069c403ebaf9f0171e9517f40e41".to_string()),
        };

        assert!(response.verify("Circle Of Life", "GET"));
        assert!(!response.verify("circle of life", "GET"));
        assert!(!response.verify("Circle Of Life", "POST"));
    }

    #[test]
    fn test_digest_answer_verifies_on_server() {
        let challenge = Challenge::digest("publisher", generate_nonce(), false);
        let answer =
            Authorization::answer(&challenge, "alice", "secret", "GET", "/get/key", 1).unwrap();

        let header = answer.to_header_value();
        let parsed = Authorization::parse(&header).unwrap();
        assert_eq!(parsed.username(), "alice");

        let Authorization::Digest(digest) = parsed else {
            panic!("expected digest credentials");
        };
        assert_eq!(digest.uri, "/get/key");
        assert_eq!(digest.nonce_count(), Some(1));
        assert!(digest.verify("secret", "GET"));
        assert!(!digest.verify("wrong", "GET"));
    }

    #[test]
    fn test_nonce_count_is_hex_and_signed() {
        let challenge = Challenge::digest("publisher", generate_nonce(), false);
        let Some(Authorization::Digest(mut digest)) =
            Authorization::answer(&challenge, "alice", "secret", "GET", "/", 26)
        else {
            panic!("expected digest credentials");
        };
        assert_eq!(digest.nc.as_deref(), Some("0000001a"));
        assert_eq!(digest.nonce_count(), Some(26));
        assert!(digest.verify("secret", "GET"));

        // The count is part of the proof.
        digest.nc = Some("0000001b".to_string());
        assert!(!digest.verify("secret", "GET"));
    }

    #[test]
    fn test_basic_roundtrip() {
        let challenge = Challenge::basic("publisher");
        let answer = Authorization::answer(&challenge, "bob", "pa:ss", "GET", "/", 1).unwrap();
        let parsed = Authorization::parse(&answer.to_header_value()).unwrap();
        assert_eq!(
            parsed,
            Authorization::Basic {
                username: "bob".to_string(),
                password: "pa:ss".to_string()
            }
        );
    }
}
