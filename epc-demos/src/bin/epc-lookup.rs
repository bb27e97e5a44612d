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

//! Fetch resources from a publisher and print them

use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use epc_demos::{init_tracing, ConsumerArgs};

#[derive(Parser, Debug)]
#[command(name = "epc-lookup")]
#[command(about = "Print resources of a publisher on the local network", long_about = None)]
struct Args {
    #[command(flatten)]
    consumer: ConsumerArgs,

    /// Keys to fetch
    #[arg(required = true)]
    keys: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let mut consumer = args.consumer.connect().await?;
    let mut failed = false;

    for key in &args.keys {
        match consumer.lookup(key).await {
            Ok(resource) => {
                println!(
                    "{}: {}",
                    key.bright_white(),
                    String::from_utf8_lossy(&resource.data)
                );
            }
            Err(e) => {
                failed = true;
                eprintln!("{} {e}", "FAIL:".bright_red().bold());
            }
        }
    }

    if failed {
        std::process::exit(1);
    }
    Ok(())
}
