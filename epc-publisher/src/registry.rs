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

//! Publication registry: resource keys mapped to content and auth handlers

use crate::auth::AuthContext;
use crate::content::{mime_type_for_path, Content};
use crate::publisher::Publisher;
use bytes::Bytes;
use epc_common::{GlobError, GlobPattern};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Produces the content of a resource, `None` when it declines
pub type ContentHandler = Arc<dyn Fn(&Publisher, &str) -> Option<Content> + Send + Sync>;

/// Decides whether a request may proceed, given the presented user name
pub type AuthHandler = Arc<dyn Fn(&AuthContext<'_>, Option<&str>) -> bool + Send + Sync>;

#[derive(Clone, Default)]
struct Publication {
    content: Option<ContentHandler>,
    auth: Option<AuthHandler>,
}

/// The handlers serving one request, resolved under the registry lock
pub(crate) struct Resolved {
    pub content: Option<ContentHandler>,
    pub auth: Option<AuthHandler>,
}

#[derive(Default)]
pub(crate) struct Registry {
    publications: BTreeMap<String, Publication>,
    default_auth: Option<AuthHandler>,
}

impl Registry {
    /// Register `handler` under `key`, dropping any previous publication
    ///
    /// The old content and auth handlers are released, together with whatever
    /// state their closures captured.
    pub fn insert(&mut self, key: &str, handler: ContentHandler) {
        let publication = Publication {
            content: Some(handler),
            auth: None,
        };
        self.publications.insert(key.to_string(), publication);
    }

    pub fn insert_static(&mut self, key: &str, content: Content) {
        self.insert(key, Arc::new(move |_: &Publisher, _: &str| Some(content.clone())));
    }

    pub fn insert_file(&mut self, key: &str, path: PathBuf) {
        self.insert(
            key,
            Arc::new(move |_: &Publisher, key: &str| match std::fs::read(&path) {
                Ok(data) => Some(Content::new(
                    Some(&mime_type_for_path(&path)),
                    Bytes::from(data),
                )),
                Err(e) => {
                    tracing::warn!("Cannot read '{}' for '{key}': {e}", path.display());
                    None
                }
            }),
        );
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.publications.remove(key).is_some()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.publications
            .get(key)
            .is_some_and(|publication| publication.content.is_some())
    }

    /// Attach an auth handler to `key`, or the default gate when `key` is `None`
    ///
    /// Returns `false`, leaving the registry untouched, for unknown keys.
    pub fn set_auth(&mut self, key: Option<&str>, handler: AuthHandler) -> bool {
        match key {
            None => {
                self.default_auth = Some(handler);
                true
            }
            Some(key) => match self.publications.get_mut(key) {
                Some(publication) => {
                    publication.auth = Some(handler);
                    true
                }
                None => false,
            },
        }
    }

    /// Handlers for `key`; the auth handler falls back to the default gate
    pub fn resolve(&self, key: &str) -> Resolved {
        let publication = self.publications.get(key).cloned().unwrap_or_default();
        Resolved {
            content: publication.content,
            auth: publication.auth.or_else(|| self.default_auth.clone()),
        }
    }

    /// Sorted keys, filtered by a glob `pattern`
    pub fn keys(&self, pattern: Option<&str>) -> Result<Vec<String>, GlobError> {
        let pattern = pattern.map(GlobPattern::new).transpose()?;
        Ok(self
            .publications
            .iter()
            .filter(|(_, publication)| publication.content.is_some())
            .map(|(key, _)| key)
            .filter(|key| pattern.as_ref().map_or(true, |p| p.matches(key)))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn deny() -> AuthHandler {
        Arc::new(|_: &AuthContext<'_>, _: Option<&str>| false)
    }

    #[test]
    fn test_auth_falls_back_to_default_gate() {
        let mut registry = Registry::default();
        registry.insert_static("k", Content::new(None, "v"));
        assert!(registry.resolve("k").auth.is_none());

        assert!(registry.set_auth(None, deny()));
        let default_gate = registry.resolve("k").auth;
        assert!(default_gate.is_some());

        let specific = deny();
        assert!(registry.set_auth(Some("k"), specific.clone()));
        let resolved = registry.resolve("k").auth;
        assert!(resolved.is_some_and(|gate| Arc::ptr_eq(&gate, &specific)));
    }

    #[test]
    fn test_set_auth_for_unknown_key_is_refused() {
        let mut registry = Registry::default();
        assert!(!registry.set_auth(Some("missing"), deny()));
        assert!(registry.resolve("missing").auth.is_none());
        assert!(!registry.contains("missing"));
    }

    #[test]
    fn test_reregistration_releases_previous_handlers() {
        struct Guard(Arc<AtomicUsize>);

        impl Drop for Guard {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let gate_dropped = Arc::new(AtomicUsize::new(0));
        let content_released = Arc::new(AtomicUsize::new(0));

        let mut registry = Registry::default();
        let counter = content_released.clone();
        registry.insert_static(
            "k",
            Content::new(None, "one").on_release(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let guard = Guard(gate_dropped.clone());
        registry.set_auth(
            Some("k"),
            Arc::new(move |_: &AuthContext<'_>, _: Option<&str>| {
                guard.0.load(Ordering::SeqCst) == usize::MAX
            }),
        );

        registry.insert_static("k", Content::new(None, "two"));

        assert_eq!(gate_dropped.load(Ordering::SeqCst), 1);
        assert_eq!(content_released.load(Ordering::SeqCst), 1);
        assert!(registry.resolve("k").auth.is_none());
    }

    #[test]
    fn test_keys_are_sorted_and_filtered() {
        let mut registry = Registry::default();
        for key in ["sensor/b", "sensor/a", "photo"] {
            registry.insert_static(key, Content::new(None, "x"));
        }

        assert_eq!(
            registry.keys(None).unwrap_or_default(),
            ["photo", "sensor/a", "sensor/b"]
        );
        assert_eq!(
            registry.keys(Some("sensor/*")).unwrap_or_default(),
            ["sensor/a", "sensor/b"]
        );
        assert!(registry.keys(Some("none*")).unwrap_or_default().is_empty());
    }

    #[test]
    fn test_remove() {
        let mut registry = Registry::default();
        registry.insert_static("k", Content::new(None, "v"));
        assert!(registry.remove("k"));
        assert!(!registry.remove("k"));
        assert!(registry.resolve("k").content.is_none());
    }
}
