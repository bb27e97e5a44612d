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

//! HTTP side of a publisher
//!
//! Routes:
//!
//! | Request | Response |
//! |---------|----------|
//! | `GET /get/<key>` | the resource, `404` when unknown, `401` when gated |
//! | `GET /list`, `GET /list/<glob>`, `GET /list?pattern=<glob>` | matching keys, one per line |
//! | `GET <contents path>` | HTML index linking every key |

use crate::auth::{authorize, GateRequest, Verdict};
use crate::content::{Content, DEFAULT_MIME_TYPE};
use crate::publisher::{Publisher, PublisherInner};
use axum::body::Body;
use axum::extract::rejection::PathRejection;
use axum::extract::{Path, Query, State};
use axum::http::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, WWW_AUTHENTICATE};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, Uri};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use epc_common::paths::{encode_key, GET_PREFIX, LIST_PATH};
use epc_common::Challenge;
use serde::Deserialize;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
struct ServerState {
    publisher: Weak<PublisherInner>,
}

impl ServerState {
    fn publisher(&self) -> Option<Publisher> {
        self.publisher.upgrade().map(Publisher::from_inner)
    }
}

/// What a resource request resolved to
#[derive(Debug)]
pub(crate) enum Served {
    Content(Content),
    NotFound,
    Unauthorized(Challenge),
}

/// Run the gate, then the content handler, for one resource request
///
/// Blocking: handlers may read files or compute content.
pub(crate) fn serve_resource(
    publisher: &Publisher,
    key: &str,
    method: &str,
    uri: &str,
    authorization: Option<&str>,
) -> Served {
    let resolved = publisher.inner.resolve(key);

    if let Some(gate) = &resolved.auth {
        let request = GateRequest {
            key,
            method,
            uri,
            authorization,
        };
        let realm = publisher.service_name();
        let flags = publisher.auth_flags();
        if let Verdict::Challenge(challenge) =
            authorize(publisher, gate, &request, flags, &realm, &publisher.inner.nonces)
        {
            return Served::Unauthorized(challenge);
        }
    }

    match resolved.content.and_then(|handler| handler(publisher, key)) {
        Some(content) => Served::Content(content),
        None => Served::NotFound,
    }
}

/// Build the router for `publisher`, with the index at `contents_path`
pub(crate) fn router(publisher: Weak<PublisherInner>, contents_path: &str) -> Router {
    let mut router = Router::new()
        .route("/get/{*key}", get(get_resource))
        .route(LIST_PATH, get(list_keys))
        .route("/list/{*pattern}", get(list_pattern));

    if is_reserved(contents_path) {
        tracing::warn!("Contents path '{contents_path}' clashes with a resource route, index disabled");
    } else {
        router = router.route(contents_path, get(contents_index));
    }

    router
        .fallback(|| async { StatusCode::NOT_FOUND })
        .with_state(ServerState { publisher })
}

fn is_reserved(path: &str) -> bool {
    path == LIST_PATH
        || path.starts_with(GET_PREFIX)
        || path.starts_with("/list/")
        || path.contains(['{', '}'])
}

async fn get_resource(
    State(state): State<ServerState>,
    key: Result<Path<String>, PathRejection>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let Some(publisher) = state.publisher() else {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };
    let key = match key {
        Ok(Path(key)) => key,
        Err(e) => {
            tracing::debug!("Malformed resource path {}: {e}", uri.path());
            return (StatusCode::NOT_FOUND, "No such resource\n").into_response();
        }
    };

    let request_uri = uri
        .path_and_query()
        .map_or_else(|| uri.path().to_string(), |pq| pq.as_str().to_string());
    let authorization = headers
        .get(AUTHORIZATION)
        .and_then(|value| std::str::from_utf8(value.as_bytes()).ok())
        .map(str::to_string);

    tracing::debug!("{method} {request_uri}");

    let served = {
        let key = key.clone();
        tokio::task::spawn_blocking(move || {
            serve_resource(
                &publisher,
                &key,
                method.as_str(),
                &request_uri,
                authorization.as_deref(),
            )
        })
        .await
    };

    match served {
        Ok(Served::Content(content)) => content_response(content),
        Ok(Served::NotFound) => (StatusCode::NOT_FOUND, format!("No resource '{key}'\n")).into_response(),
        Ok(Served::Unauthorized(challenge)) => {
            // Realms are service names and may carry non-ASCII UTF-8.
            let header = challenge.to_header_value();
            match HeaderValue::from_bytes(header.as_bytes()) {
                Ok(value) => (StatusCode::UNAUTHORIZED, [(WWW_AUTHENTICATE, value)]).into_response(),
                Err(e) => {
                    tracing::error!("Cannot encode challenge for '{key}': {e}");
                    StatusCode::INTERNAL_SERVER_ERROR.into_response()
                }
            }
        }
        Err(e) => {
            tracing::error!("Handler for '{key}' failed: {e}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Stream `content`, holding a reference until the body is fully sent
fn content_response(content: Content) -> Response {
    let mime_type = HeaderValue::from_str(content.mime_type())
        .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_MIME_TYPE));
    let length = content.static_data().map(|data| data.len());

    let body = async_stream::stream! {
        if let Some(data) = content.static_data() {
            yield Ok::<Bytes, io::Error>(data);
        } else {
            loop {
                let source = content.clone();
                match tokio::task::spawn_blocking(move || source.read_chunk()).await {
                    Ok(Some(chunk)) => yield Ok(chunk),
                    Ok(None) => break,
                    Err(e) => {
                        yield Err(io::Error::other(e));
                        break;
                    }
                }
            }
        }
    };

    let mut response = Response::new(Body::from_stream(body));
    response.headers_mut().insert(CONTENT_TYPE, mime_type);
    if let Some(length) = length {
        response.headers_mut().insert(CONTENT_LENGTH, HeaderValue::from(length));
    }
    response
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    pattern: Option<String>,
}

async fn list_keys(State(state): State<ServerState>, Query(query): Query<ListQuery>) -> Response {
    list_response(&state, query.pattern.as_deref())
}

async fn list_pattern(State(state): State<ServerState>, Path(pattern): Path<String>) -> Response {
    list_response(&state, Some(&pattern))
}

fn list_response(state: &ServerState, pattern: Option<&str>) -> Response {
    let Some(publisher) = state.publisher() else {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };

    match publisher.list(pattern) {
        Ok(keys) => {
            let body: String = keys.iter().map(|key| format!("{key}\n")).collect();
            ([(CONTENT_TYPE, "text/plain; charset=utf-8")], body).into_response()
        }
        Err(e) => (StatusCode::BAD_REQUEST, format!("{e}\n")).into_response(),
    }
}

async fn contents_index(State(state): State<ServerState>) -> Response {
    let Some(publisher) = state.publisher() else {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };

    let keys = publisher.list(None).unwrap_or_default();
    Html(render_index(&publisher.service_name(), &keys)).into_response()
}

fn render_index(title: &str, keys: &[String]) -> String {
    let title = escape_html(title);
    let mut page = format!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>{title}</title></head>\n<body><h1>{title}</h1>\n<ul>\n"
    );
    for key in keys {
        page.push_str(&format!(
            "<li><a href=\"{GET_PREFIX}{}\">{}</a></li>\n",
            encode_key(key),
            escape_html(key)
        ));
    }
    page.push_str("</ul>\n</body></html>\n");
    page
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// TCP listener completing TLS handshakes off the accept loop
pub(crate) struct TlsListener {
    tcp: TcpListener,
    acceptor: TlsAcceptor,
    ready_tx: mpsc::Sender<(TlsStream<TcpStream>, SocketAddr)>,
    ready_rx: mpsc::Receiver<(TlsStream<TcpStream>, SocketAddr)>,
}

impl TlsListener {
    pub fn new(tcp: TcpListener, config: Arc<rustls::ServerConfig>) -> Self {
        let (ready_tx, ready_rx) = mpsc::channel(32);
        Self {
            tcp,
            acceptor: TlsAcceptor::from(config),
            ready_tx,
            ready_rx,
        }
    }
}

impl axum::serve::Listener for TlsListener {
    type Io = TlsStream<TcpStream>;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        loop {
            tokio::select! {
                Some(ready) = self.ready_rx.recv() => return ready,
                accepted = self.tcp.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let acceptor = self.acceptor.clone();
                        let ready = self.ready_tx.clone();
                        tokio::spawn(async move {
                            match tokio::time::timeout(HANDSHAKE_TIMEOUT, acceptor.accept(stream)).await {
                                Ok(Ok(tls)) => {
                                    let _ = ready.send((tls, peer)).await;
                                }
                                Ok(Err(e)) => tracing::debug!("TLS handshake with {peer} failed: {e}"),
                                Err(_) => tracing::debug!("TLS handshake with {peer} timed out"),
                            }
                        });
                    }
                    Err(e) => {
                        tracing::warn!("Accept failed: {e}");
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                },
            }
        }
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        self.tcp.local_addr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_escapes_keys() {
        let page = render_index("Box <1>", &["x&y".to_string()]);
        assert!(page.contains("<title>Box &lt;1&gt;</title>"));
        assert!(page.contains("<a href=\"/get/x%26y\">x&amp;y</a>"));
    }

    #[test]
    fn test_reserved_contents_paths() {
        assert!(is_reserved("/list"));
        assert!(is_reserved("/get/x"));
        assert!(!is_reserved("/contents"));
        assert!(!is_reserved("/"));
    }
}
