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

//! List the keys a publisher offers

use anyhow::{Context, Result};
use clap::Parser;
use epc_demos::{init_tracing, ConsumerArgs};

#[derive(Parser, Debug)]
#[command(name = "epc-list")]
#[command(about = "List resources of a publisher on the local network", long_about = None)]
struct Args {
    #[command(flatten)]
    consumer: ConsumerArgs,

    /// Glob pattern keys must match, e.g. 'sensor/*'
    pattern: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let mut consumer = args.consumer.connect().await?;
    let keys = consumer
        .list(args.pattern.as_deref())
        .await
        .with_context(|| format!("Cannot list '{}'", consumer.name()))?;

    for key in keys {
        println!("{key}");
    }
    Ok(())
}
