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

//! Request paths understood by a publisher.

/// Prefix of resource requests: `GET /get/<key>`
pub const GET_PREFIX: &str = "/get/";

/// Path of key listings: `GET /list`, `GET /list/<pattern>` or `GET /list?pattern=<glob>`
pub const LIST_PATH: &str = "/list";

/// Default location of the HTML contents index
pub const DEFAULT_CONTENTS_PATH: &str = "/contents";

/// TXT key announcing where the contents index lives
pub const TXT_PATH_KEY: &str = "path";

/// Path at which the resource `key` is served.
///
/// The key is kept verbatim; HTTP clients percent-encode it when building URLs.
pub fn resource_path(key: &str) -> String {
    format!("{GET_PREFIX}{key}")
}

/// Percent-encode `key` for use in a URL path
///
/// `/` is kept so hierarchical keys stay readable; everything outside the
/// RFC 3986 unreserved set is escaped.
///
/// ```
/// use epc_common::paths::encode_key;
///
/// assert_eq!(encode_key("photos/summer day"), "photos/summer%20day");
/// ```
pub fn encode_key(key: &str) -> String {
    let mut encoded = String::with_capacity(key.len());
    for byte in key.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' | b'/' => {
                encoded.push(byte as char)
            }
            other => encoded.push_str(&format!("%{other:02X}")),
        }
    }
    encoded
}

/// Normalize a contents path so it starts with exactly one `/` and has no trailing slash.
pub fn normalize_contents_path(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{trimmed}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_path() {
        assert_eq!(resource_path("sensor"), "/get/sensor");
        assert_eq!(resource_path("a/b"), "/get/a/b");
    }

    #[test]
    fn test_encode_key() {
        assert_eq!(encode_key("a/b c"), "a/b%20c");
        assert_eq!(encode_key("ä?%"), "%C3%A4%3F%25");
        assert_eq!(encode_key("plain-key_1.txt"), "plain-key_1.txt");
    }

    #[test]
    fn test_normalize_contents_path() {
        assert_eq!(normalize_contents_path("contents"), "/contents");
        assert_eq!(normalize_contents_path("/contents/"), "/contents");
        assert_eq!(normalize_contents_path("//"), "/");
        assert_eq!(normalize_contents_path("/a/b"), "/a/b");
    }
}
