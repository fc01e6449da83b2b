//! Binary crate for the `stations` command-line tool.
//!
//! This crate focuses on:
//! - Parsing CLI arguments and interactive configuration
//! - Wiring the core refresh engine from the on-disk config
//! - Serving the refresh endpoint alongside the scheduled bulk refresh

use clap::Parser;
use tracing_subscriber::EnvFilter;

mod app;
mod cli;
mod server;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cmd = cli::Cli::parse();
    cmd.run().await
}
