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

//! Publish values and files until interrupted
//!
//! ```text
//! epc-publish --service-name Notes greeting=hello file:todo=~/todo.txt
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use epc_demos::{init_tracing, parse_item, Item};
use epc_discovery::Protocol;
use epc_publisher::{AuthContext, Publisher, PublisherOptions};
use epc_tls::LogProgress;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "epc-publish")]
#[command(about = "Publish values and files on the local network", long_about = None)]
struct Args {
    /// Announced service name
    #[arg(short = 'n', long)]
    service_name: Option<String>,

    /// Application name announced as a subtype
    #[arg(short, long)]
    application: Option<String>,

    /// DNS-SD domain to announce in
    #[arg(short, long)]
    domain: Option<String>,

    /// Require this user name for every resource
    #[arg(short, long, requires = "password")]
    username: Option<String>,

    /// Require this password for every resource
    #[arg(short, long)]
    password: Option<String>,

    /// Transport: http or https
    #[arg(long, default_value = "https")]
    protocol: Protocol,

    /// Also announce a bookmark for the contents index
    #[arg(long)]
    bookmark: bool,

    /// Resources as KEY=VALUE or file:KEY=PATH
    #[arg(required = true, value_parser = parse_item)]
    items: Vec<Item>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let publisher = Publisher::with_options(PublisherOptions {
        name: args.service_name.clone(),
        application: args.application.clone(),
        domain: args.domain.clone(),
        protocol: args.protocol,
        ..PublisherOptions::default()
    });
    publisher.set_progress_hooks(Some(Arc::new(LogProgress)));

    for item in &args.items {
        match item {
            Item::Value { key, value } => publisher.add(key, value.clone()),
            Item::File { key, path } => publisher.add_file(key, path.clone()),
        }
    }

    if let Some(password) = args.password.clone() {
        let username = args.username.clone();
        publisher.set_auth_handler(None, move |ctx: &AuthContext<'_>, user: Option<&str>| {
            let user_ok = username.as_deref().map_or(true, |expected| user == Some(expected));
            user_ok && ctx.check_password(&password)
        });
    }

    if args.bookmark {
        publisher
            .add_bookmark(None, None)
            .await
            .context("Cannot announce bookmark")?;
    }

    publisher
        .run_async()
        .await
        .context("Cannot start publisher")?;

    println!(
        "{} {}",
        "Publishing".bright_green().bold(),
        publisher.service_name().bright_white()
    );
    for key in publisher.list(None)? {
        let uri = publisher.get_uri(Some(key.as_str()))?;
        println!("  {key}: {}", uri.bright_cyan());
    }

    tokio::signal::ctrl_c()
        .await
        .context("Cannot wait for Ctrl-C")?;
    info!("Interrupted, withdrawing '{}'", publisher.service_name());
    publisher.quit().await;
    Ok(())
}
