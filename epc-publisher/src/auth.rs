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

//! Authentication gate
//!
//! Resources guarded by an [`AuthHandler`](crate::AuthHandler) answer
//! unauthenticated requests with a challenge. By default that is an HTTP
//! Digest challenge: the password never travels, so handlers verify the
//! client's proof through [`AuthContext::check_password`]. With
//! [`AuthFlags::PasswordTextNeeded`] the gate asks for Basic credentials
//! instead and [`AuthContext::password`] exposes the plain text.

use crate::publisher::Publisher;
use crate::registry::AuthHandler;
use epc_common::auth::generate_nonce;
use epc_common::{Authorization, Challenge};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// How long an issued Digest nonce stays valid
pub const NONCE_LIFETIME: Duration = Duration::from_secs(5 * 60);

/// Authentication behavior of a publisher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthFlags {
    /// Digest authentication
    #[default]
    Default,
    /// Basic authentication, so handlers can read the password
    PasswordTextNeeded,
}

/// What an auth handler gets to see of one request
pub struct AuthContext<'a> {
    publisher: &'a Publisher,
    key: &'a str,
    method: &'a str,
    authorization: Option<&'a Authorization>,
}

impl<'a> AuthContext<'a> {
    pub(crate) fn new(
        publisher: &'a Publisher,
        key: &'a str,
        method: &'a str,
        authorization: Option<&'a Authorization>,
    ) -> Self {
        Self {
            publisher,
            key,
            method,
            authorization,
        }
    }

    /// The publisher serving the request
    pub fn publisher(&self) -> &Publisher {
        self.publisher
    }

    /// Key of the requested resource
    pub fn key(&self) -> &str {
        self.key
    }

    /// Whether the client knows `password`
    ///
    /// Anonymous requests never pass.
    pub fn check_password(&self, password: &str) -> bool {
        match self.authorization {
            Some(Authorization::Digest(digest)) => digest.verify(password, self.method),
            Some(Authorization::Basic {
                password: presented,
                ..
            }) => presented == password,
            None => false,
        }
    }

    /// The plain-text password, only available with Basic authentication
    pub fn password(&self) -> Option<&str> {
        match self.authorization {
            Some(Authorization::Basic { password, .. }) => Some(password),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct IssuedNonce {
    created: Instant,
    /// Highest `nc` accepted so far
    last_count: u32,
}

/// How a presented nonce and count compare to what was issued
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NonceCheck {
    Fresh,
    /// Unknown or expired
    Stale,
    /// The count did not increase
    Replayed,
}

/// Digest nonces handed out in challenges
#[derive(Debug, Default)]
pub(crate) struct NonceStore {
    issued: Mutex<HashMap<String, IssuedNonce>>,
}

impl NonceStore {
    pub fn issue(&self) -> String {
        let now = Instant::now();
        let nonce = generate_nonce();
        let mut issued = self.lock();
        issued.retain(|_, entry| now.duration_since(entry.created) < NONCE_LIFETIME);
        issued.insert(
            nonce.clone(),
            IssuedNonce {
                created: now,
                last_count: 0,
            },
        );
        nonce
    }

    #[cfg(test)]
    pub fn is_fresh(&self, nonce: &str) -> bool {
        self.lock()
            .get(nonce)
            .is_some_and(|entry| entry.created.elapsed() < NONCE_LIFETIME)
    }

    pub fn check(&self, nonce: &str, count: u32) -> NonceCheck {
        match self.lock().get(nonce) {
            Some(entry) if entry.created.elapsed() >= NONCE_LIFETIME => NonceCheck::Stale,
            Some(entry) if count <= entry.last_count => NonceCheck::Replayed,
            Some(_) => NonceCheck::Fresh,
            None => NonceCheck::Stale,
        }
    }

    /// Record an accepted `count`; `false` if another request got there first
    pub fn accept(&self, nonce: &str, count: u32) -> bool {
        match self.lock().get_mut(nonce) {
            Some(entry) if count > entry.last_count => {
                entry.last_count = count;
                true
            }
            _ => false,
        }
    }

    #[cfg(test)]
    pub fn expire_all(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, IssuedNonce>> {
        self.issued.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The request details the gate looks at
pub(crate) struct GateRequest<'a> {
    pub key: &'a str,
    pub method: &'a str,
    /// Path and query as sent, matched against the Digest `uri`
    pub uri: &'a str,
    pub authorization: Option<&'a str>,
}

/// Outcome of running the gate
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Verdict {
    Granted,
    Challenge(Challenge),
}

/// Run `gate` for `request`
pub(crate) fn authorize(
    publisher: &Publisher,
    gate: &AuthHandler,
    request: &GateRequest<'_>,
    flags: AuthFlags,
    realm: &str,
    nonces: &NonceStore,
) -> Verdict {
    let challenge = |stale: bool| match flags {
        AuthFlags::Default => Verdict::Challenge(Challenge::digest(realm, nonces.issue(), stale)),
        AuthFlags::PasswordTextNeeded => Verdict::Challenge(Challenge::basic(realm)),
    };

    let authorization = request.authorization.and_then(Authorization::parse);
    let authorization = match (flags, authorization) {
        (AuthFlags::PasswordTextNeeded, Some(basic @ Authorization::Basic { .. })) => Some(basic),
        (AuthFlags::Default, Some(Authorization::Digest(digest))) => {
            if digest.realm != realm || digest.uri != request.uri {
                tracing::debug!(
                    "Digest for '{}' does not match realm '{realm}' and uri '{}'",
                    digest.uri,
                    request.uri
                );
                return challenge(false);
            }
            let Some(count) = digest.nonce_count() else {
                tracing::debug!("Digest from '{}' lacks a nonce count", digest.username);
                return challenge(false);
            };
            match nonces.check(&digest.nonce, count) {
                NonceCheck::Fresh => {}
                NonceCheck::Stale => return challenge(true),
                NonceCheck::Replayed => {
                    tracing::debug!("Replayed nonce count {count} from '{}'", digest.username);
                    return challenge(true);
                }
            }
            Some(Authorization::Digest(digest))
        }
        (_, Some(other)) => {
            tracing::debug!("Ignoring credentials of user '{}'", other.username());
            None
        }
        (_, None) => None,
    };

    let context = AuthContext::new(publisher, request.key, request.method, authorization.as_ref());
    let username = authorization.as_ref().map(Authorization::username);

    if gate(&context, username) {
        match &authorization {
            Some(Authorization::Digest(digest)) => {
                let count = digest.nonce_count().unwrap_or_default();
                if nonces.accept(&digest.nonce, count) {
                    Verdict::Granted
                } else {
                    challenge(true)
                }
            }
            _ => Verdict::Granted,
        }
    } else {
        tracing::debug!(
            "Access to '{}' denied for {}",
            request.key,
            username.unwrap_or("anonymous user")
        );
        challenge(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::PublisherOptions;
    use epc_common::AuthScheme;
    use epc_discovery_mock::MockDaemon;
    use std::sync::Arc;

    const REALM: &str = "Box";

    fn publisher() -> Publisher {
        Publisher::with_backend(PublisherOptions::default(), Arc::new(MockDaemon::new()))
    }

    fn password_gate(password: &'static str) -> AuthHandler {
        Arc::new(move |ctx: &AuthContext<'_>, user: Option<&str>| {
            user == Some("alice") && ctx.check_password(password)
        })
    }

    fn request<'a>(authorization: Option<&'a str>) -> GateRequest<'a> {
        GateRequest {
            key: "secret",
            method: "GET",
            uri: "/get/secret",
            authorization,
        }
    }

    fn digest_answer(challenge: &Challenge, password: &str, count: u32) -> String {
        Authorization::answer(challenge, "alice", password, "GET", "/get/secret", count)
            .map(|a| a.to_header_value())
            .unwrap_or_default()
    }

    #[test]
    fn test_anonymous_request_gets_digest_challenge() {
        let publisher = publisher();
        let nonces = NonceStore::default();
        let verdict = authorize(
            &publisher,
            &password_gate("pw"),
            &request(None),
            AuthFlags::Default,
            REALM,
            &nonces,
        );

        let Verdict::Challenge(challenge) = verdict else {
            panic!("expected a challenge");
        };
        assert_eq!(challenge.scheme, AuthScheme::Digest);
        assert_eq!(challenge.realm, REALM);
        assert!(!challenge.stale);
        assert!(nonces.is_fresh(challenge.nonce.as_deref().unwrap_or_default()));
    }

    #[test]
    fn test_digest_round_trip() {
        let publisher = publisher();
        let nonces = NonceStore::default();
        let gate = password_gate("pw");
        let challenge = Challenge::digest(REALM, nonces.issue(), false);

        let good = digest_answer(&challenge, "pw", 1);
        assert_eq!(
            authorize(&publisher, &gate, &request(Some(&good)), AuthFlags::Default, REALM, &nonces),
            Verdict::Granted
        );

        let bad = digest_answer(&challenge, "wrong", 2);
        assert!(matches!(
            authorize(&publisher, &gate, &request(Some(&bad)), AuthFlags::Default, REALM, &nonces),
            Verdict::Challenge(Challenge { stale: false, .. })
        ));
    }

    #[test]
    fn test_replayed_digest_is_refused() {
        let publisher = publisher();
        let nonces = NonceStore::default();
        let gate = password_gate("pw");
        let challenge = Challenge::digest(REALM, nonces.issue(), false);
        let verdict = |header: &str| {
            authorize(&publisher, &gate, &request(Some(header)), AuthFlags::Default, REALM, &nonces)
        };

        let first = digest_answer(&challenge, "pw", 1);
        assert_eq!(verdict(&first), Verdict::Granted);
        assert!(matches!(verdict(&first), Verdict::Challenge(Challenge { stale: true, .. })));

        // A later count on the same nonce still works, an older one does not.
        assert_eq!(verdict(&digest_answer(&challenge, "pw", 5)), Verdict::Granted);
        assert!(matches!(
            verdict(&digest_answer(&challenge, "pw", 3)),
            Verdict::Challenge(Challenge { stale: true, .. })
        ));
    }

    #[test]
    fn test_refused_password_does_not_spend_count() {
        let nonces = NonceStore::default();
        let nonce = nonces.issue();
        assert_eq!(nonces.check(&nonce, 1), NonceCheck::Fresh);
        assert!(nonces.accept(&nonce, 1));
        assert_eq!(nonces.check(&nonce, 1), NonceCheck::Replayed);
        assert!(!nonces.accept(&nonce, 1));
        assert_eq!(nonces.check("unknown", 1), NonceCheck::Stale);

        let publisher = publisher();
        let gate = password_gate("pw");
        let challenge = Challenge::digest(REALM, nonce.clone(), false);
        let wrong = digest_answer(&challenge, "wrong", 2);
        assert!(matches!(
            authorize(&publisher, &gate, &request(Some(&wrong)), AuthFlags::Default, REALM, &nonces),
            Verdict::Challenge(Challenge { stale: false, .. })
        ));
        assert_eq!(nonces.check(&nonce, 2), NonceCheck::Fresh);
    }

    #[test]
    fn test_expired_nonce_is_stale() {
        let publisher = publisher();
        let nonces = NonceStore::default();
        let challenge = Challenge::digest(REALM, nonces.issue(), false);
        let answer = digest_answer(&challenge, "pw", 1);
        nonces.expire_all();

        let verdict = authorize(
            &publisher,
            &password_gate("pw"),
            &request(Some(&answer)),
            AuthFlags::Default,
            REALM,
            &nonces,
        );
        assert!(matches!(verdict, Verdict::Challenge(Challenge { stale: true, .. })));
    }

    #[test]
    fn test_digest_for_other_uri_is_rejected() {
        let publisher = publisher();
        let nonces = NonceStore::default();
        let challenge = Challenge::digest(REALM, nonces.issue(), false);
        let answer = Authorization::answer(&challenge, "alice", "pw", "GET", "/get/other", 1)
            .map(|a| a.to_header_value())
            .unwrap_or_default();

        let verdict = authorize(
            &publisher,
            &password_gate("pw"),
            &request(Some(&answer)),
            AuthFlags::Default,
            REALM,
            &nonces,
        );
        assert!(matches!(verdict, Verdict::Challenge(_)));
    }

    #[test]
    fn test_basic_mode_exposes_password() {
        let publisher = publisher();
        let nonces = NonceStore::default();
        let gate: AuthHandler = Arc::new(|ctx: &AuthContext<'_>, user: Option<&str>| {
            user == Some("alice") && ctx.password() == Some("pw") && ctx.check_password("pw")
        });
        let header = Authorization::Basic {
            username: "alice".to_string(),
            password: "pw".to_string(),
        }
        .to_header_value();

        assert_eq!(
            authorize(
                &publisher,
                &gate,
                &request(Some(&header)),
                AuthFlags::PasswordTextNeeded,
                REALM,
                &nonces
            ),
            Verdict::Granted
        );

        // Basic credentials are ignored while Digest is expected.
        assert!(matches!(
            authorize(&publisher, &gate, &request(Some(&header)), AuthFlags::Default, REALM, &nonces),
            Verdict::Challenge(Challenge { scheme: AuthScheme::Digest, .. })
        ));
    }

    #[test]
    fn test_gate_may_admit_anonymous_users() {
        let publisher = publisher();
        let nonces = NonceStore::default();
        let gate: AuthHandler = Arc::new(|ctx: &AuthContext<'_>, user: Option<&str>| {
            user.is_none() && ctx.key() == "secret" && ctx.password().is_none()
        });

        assert_eq!(
            authorize(&publisher, &gate, &request(None), AuthFlags::Default, REALM, &nonces),
            Verdict::Granted
        );
    }
}
