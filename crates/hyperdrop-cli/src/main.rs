//! HyperDrop CLI - peer-to-peer chunked file transfer
//!
//! HyperDrop moves files directly between two machines over a single
//! ordered connection, with live progress and backpressure.
//!
//! ## Quick Start
//!
//! ```bash
//! # Wait for files (on the receiving machine)
//! hyperdrop receive --output ./inbox
//!
//! # Send files (on the other machine)
//! hyperdrop send 192.168.1.20:52530 ./document.pdf ./photo.jpg
//! ```

#![allow(clippy::doc_markdown)]
#![allow(clippy::uninlined_format_args)]

use anyhow::Result;
use clap::Parser;

mod commands;
pub mod ui;

use commands::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    match cli.command {
        Command::Send(args) => commands::send::run(args).await,
        Command::Receive(args) => commands::receive::run(args).await,
        Command::Config(args) => commands::config::run(args),
    }
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let default_filter = if verbose {
        "warn,hyperdrop=debug,hyperdrop_core=debug"
    } else {
        "warn,hyperdrop=info,hyperdrop_core=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time())
        .with(filter)
        .init();
}
