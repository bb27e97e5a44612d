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

//! Shared content buffers
//!
//! A [`Content`] is what a resource handler produces: a MIME type plus either
//! a static buffer or a pull callback yielding chunks. Clones share one
//! allocation; the release hook runs once, when the last clone goes away.

use bytes::Bytes;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

/// MIME type used when none is given
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

type Pull = Box<dyn FnMut() -> Option<Bytes> + Send>;
type Release = Box<dyn FnOnce() + Send>;

enum Body {
    Static(Bytes),
    Stream(Mutex<Pull>),
}

struct Inner {
    mime_type: String,
    body: Body,
    on_release: Mutex<Option<Release>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let release = self
            .on_release
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(release) = release {
            release();
        }
    }
}

/// Reference-counted resource content
#[derive(Clone)]
pub struct Content {
    inner: Arc<Inner>,
}

impl Content {
    /// Static content; `mime_type` defaults to `application/octet-stream`
    ///
    /// ```
    /// use epc_publisher::Content;
    ///
    /// let content = Content::new(Some("text/plain"), "hello");
    /// assert_eq!(content.static_data().as_deref(), Some(&b"hello"[..]));
    /// assert!(content.read_chunk().is_none());
    /// ```
    pub fn new(mime_type: Option<&str>, data: impl Into<Bytes>) -> Self {
        Self::with_body(mime_type, Body::Static(data.into()))
    }

    /// Streaming content pulling chunks from `pull` until it returns `None`
    pub fn stream<F>(mime_type: Option<&str>, pull: F) -> Self
    where
        F: FnMut() -> Option<Bytes> + Send + 'static,
    {
        Self::with_body(mime_type, Body::Stream(Mutex::new(Box::new(pull))))
    }

    fn with_body(mime_type: Option<&str>, body: Body) -> Self {
        Self {
            inner: Arc::new(Inner {
                mime_type: mime_type.unwrap_or(DEFAULT_MIME_TYPE).to_string(),
                body,
                on_release: Mutex::new(None),
            }),
        }
    }

    /// Run `release` once the last reference is dropped
    ///
    /// Replaces a previously set hook without running it.
    pub fn on_release<F>(self, release: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        *self
            .inner
            .on_release
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Box::new(release));
        self
    }

    pub fn mime_type(&self) -> &str {
        &self.inner.mime_type
    }

    pub fn is_stream(&self) -> bool {
        matches!(self.inner.body, Body::Stream(_))
    }

    /// The buffer of static content; `None` for streams
    pub fn static_data(&self) -> Option<Bytes> {
        match &self.inner.body {
            Body::Static(data) => Some(data.clone()),
            Body::Stream(_) => None,
        }
    }

    /// Next chunk of a stream; `None` at the end and for static content
    pub fn read_chunk(&self) -> Option<Bytes> {
        match &self.inner.body {
            Body::Static(_) => None,
            Body::Stream(pull) => (pull.lock().unwrap_or_else(PoisonError::into_inner))(),
        }
    }

    /// Number of live references
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

impl fmt::Debug for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Content");
        s.field("mime_type", &self.inner.mime_type);
        match &self.inner.body {
            Body::Static(data) => s.field("len", &data.len()),
            Body::Stream(_) => s.field("stream", &true),
        };
        s.finish()
    }
}

/// MIME type guessed from a file extension
pub fn mime_type_for_path(path: &Path) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_static_content_is_not_a_stream() {
        let content = Content::new(None, "abc");
        assert_eq!(content.mime_type(), DEFAULT_MIME_TYPE);
        assert!(!content.is_stream());
        assert_eq!(content.static_data(), Some(Bytes::from_static(b"abc")));
        assert_eq!(content.read_chunk(), None);
    }

    #[test]
    fn test_stream_content_has_no_static_data() {
        let mut chunks = vec![Bytes::from_static(b"b"), Bytes::from_static(b"a")];
        let content = Content::stream(Some("text/plain"), move || chunks.pop());

        assert!(content.is_stream());
        assert_eq!(content.static_data(), None);
        assert_eq!(content.read_chunk(), Some(Bytes::from_static(b"a")));
        assert_eq!(content.read_chunk(), Some(Bytes::from_static(b"b")));
        assert_eq!(content.read_chunk(), None);
    }

    #[test]
    fn test_release_runs_once_after_last_reference() {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = released.clone();
        let content = Content::new(None, "x").on_release(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let registry_ref = content.clone();
        let response_ref = content.clone();
        assert_eq!(content.ref_count(), 3);

        drop(content);
        drop(registry_ref);
        assert_eq!(released.load(Ordering::SeqCst), 0);

        drop(response_ref);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_mime_type_for_path() {
        assert_eq!(mime_type_for_path(Path::new("a/readme.TXT")), "text/plain");
        assert_eq!(mime_type_for_path(Path::new("photo.jpeg")), "image/jpeg");
        assert_eq!(mime_type_for_path(Path::new("table.csv")), "text/csv");
        assert_eq!(mime_type_for_path(Path::new("still.webp")), "image/webp");
        assert_eq!(mime_type_for_path(Path::new("blob")), DEFAULT_MIME_TYPE);
    }
}
