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

//! Pieces shared by the demo binaries

use anyhow::{Context, Result};
use epc_consumer::Consumer;
use epc_discovery_mdns::MdnsBrowser;
use std::path::PathBuf;
use std::time::Duration;

/// Install the `tracing` subscriber, honoring `RUST_LOG` (default `info`)
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

/// A resource named on the command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Item {
    /// `KEY=VALUE`
    Value { key: String, value: String },
    /// `file:KEY=PATH`
    File { key: String, path: PathBuf },
}

/// Parse `KEY=VALUE` or `file:KEY=PATH`
pub fn parse_item(arg: &str) -> Result<Item, String> {
    let (spec, is_file) = match arg.strip_prefix("file:") {
        Some(spec) => (spec, true),
        None => (arg, false),
    };
    let Some((key, value)) = spec.split_once('=') else {
        return Err(format!("expected KEY=VALUE or file:KEY=PATH, got '{arg}'"));
    };
    if key.is_empty() {
        return Err(format!("empty key in '{arg}'"));
    }

    Ok(if is_file {
        Item::File {
            key: key.to_string(),
            path: PathBuf::from(value),
        }
    } else {
        Item::Value {
            key: key.to_string(),
            value: value.to_string(),
        }
    })
}

/// Options of the consuming demos
#[derive(clap::Args, Debug)]
pub struct ConsumerArgs {
    /// Name of the publisher to read from
    #[arg(short = 'n', long)]
    pub service_name: String,

    /// Application the publisher identifies as
    #[arg(short, long)]
    pub application: Option<String>,

    /// DNS-SD domain to look in
    #[arg(short, long)]
    pub domain: Option<String>,

    /// User name for protected resources
    #[arg(short, long)]
    pub username: Option<String>,

    /// Password for protected resources
    #[arg(short, long)]
    pub password: Option<String>,

    /// Seconds to wait for the publisher to show up
    #[arg(short, long, default_value_t = 5)]
    pub timeout: u64,
}

impl ConsumerArgs {
    /// Resolve the publisher over mDNS and apply the credentials
    pub async fn connect(&self) -> Result<Consumer> {
        let mut consumer = Consumer::resolve(
            MdnsBrowser::new,
            &self.service_name,
            self.application.as_deref(),
            self.domain.as_deref(),
            Duration::from_secs(self.timeout),
        )
        .await
        .with_context(|| format!("Cannot find publisher '{}'", self.service_name))?;

        consumer.set_username(self.username.as_deref());
        consumer.set_password(self.password.as_deref());
        Ok(consumer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_value() {
        assert_eq!(
            parse_item("greeting=hello=world"),
            Ok(Item::Value {
                key: "greeting".into(),
                value: "hello=world".into()
            })
        );
    }

    #[test]
    fn test_parse_file() {
        assert_eq!(
            parse_item("file:notes=/tmp/notes.txt"),
            Ok(Item::File {
                key: "notes".into(),
                path: PathBuf::from("/tmp/notes.txt")
            })
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_item("novalue").is_err());
        assert!(parse_item("=x").is_err());
        assert!(parse_item("file:").is_err());
    }
}
