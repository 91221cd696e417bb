// crates/cli/src/main.rs
//! `netops` binary.

mod cli;
mod render;

use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::Cli::parse().run().await
}
