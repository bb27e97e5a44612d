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

//! Glob patterns for key listings (`*` and `?` wildcards).

use regex::Regex;

/// Error raised for patterns that cannot be compiled
#[derive(Debug, thiserror::Error)]
#[error("Invalid glob pattern '{pattern}': {source}")]
pub struct GlobError {
    pattern: String,
    #[source]
    source: regex::Error,
}

/// A compiled glob pattern
///
/// `*` matches any run of characters (including `/`), `?` matches exactly one
/// character, everything else matches literally. The whole key must match.
#[derive(Debug, Clone)]
pub struct GlobPattern {
    pattern: String,
    regex: Regex,
}

impl GlobPattern {
    /// Compile `pattern`.
    ///
    /// # Example
    ///
    /// ```
    /// use epc_common::GlobPattern;
    ///
    /// let pattern = GlobPattern::new("sensor-?.*").unwrap();
    /// assert!(pattern.matches("sensor-1.temp"));
    /// assert!(!pattern.matches("sensor-10.temp"));
    /// ```
    pub fn new(pattern: &str) -> Result<Self, GlobError> {
        let mut source = String::with_capacity(pattern.len() + 8);
        source.push_str("(?s)^");
        for c in pattern.chars() {
            match c {
                '*' => source.push_str(".*"),
                '?' => source.push('.'),
                other => source.push_str(&regex::escape(other.encode_utf8(&mut [0u8; 4]))),
            }
        }
        source.push('$');

        let regex = Regex::new(&source).map_err(|source| GlobError {
            pattern: pattern.to_string(),
            source,
        })?;

        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    /// Whether `key` matches this pattern
    pub fn matches(&self, key: &str) -> bool {
        self.regex.is_match(key)
    }

    /// The pattern text as given
    pub fn as_str(&self) -> &str {
        &self.pattern
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_star_matches_everything() {
        let pattern = GlobPattern::new("*").unwrap();
        assert!(pattern.matches(""));
        assert!(pattern.matches("anything/at all"));
    }

    #[test]
    fn test_question_mark_matches_one_char() {
        let pattern = GlobPattern::new("k?").unwrap();
        assert!(pattern.matches("k1"));
        assert!(!pattern.matches("k"));
        assert!(!pattern.matches("k12"));
    }

    #[test]
    fn test_regex_metacharacters_are_literal() {
        let pattern = GlobPattern::new("a.b+(c)").unwrap();
        assert!(pattern.matches("a.b+(c)"));
        assert!(!pattern.matches("axb+(c)"));
    }

    #[test]
    fn test_prefix_pattern() {
        let pattern = GlobPattern::new("doc-*").unwrap();
        assert!(pattern.matches("doc-1"));
        assert!(pattern.matches("doc-"));
        assert!(!pattern.matches("my-doc-1"));
        assert_eq!(pattern.as_str(), "doc-*");
    }
}
