//! CLI command definitions and handlers.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use anyhow::{Context, Result};
use hyperdrop_core::config::Config;
use hyperdrop_core::transfer::TransferConfig;

/// Load and validate the user's configuration.
///
/// A missing file yields the defaults; an unreadable or invalid one is an error.
pub fn load_config() -> Result<Config> {
    let config = Config::load().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Split the configuration into the session settings and the name to announce.
///
/// A name given on the command line wins over the configured one.
pub fn session_settings(config: Config, name: Option<String>) -> (TransferConfig, String) {
    let transfer = config.transfer_config();
    let device_name = name.unwrap_or(config.general.device_name);
    (transfer, device_name)
}

pub mod config;
pub mod receive;
pub mod send;

/// HyperDrop - peer-to-peer chunked file transfer
#[derive(Parser)]
#[command(name = "hyperdrop")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand)]
pub enum Command {
    /// Send files to a waiting receiver
    Send(SendArgs),

    /// Wait for a sender and save the files it sends
    Receive(ReceiveArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

/// Arguments for the send command
#[derive(Parser)]
pub struct SendArgs {
    /// Receiver address (host:port)
    pub addr: String,

    /// Files to send
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Name announced to the receiver
    #[arg(short, long)]
    pub name: Option<String>,

    /// Minimal output
    #[arg(short, long)]
    pub quiet: bool,
}

/// Arguments for the receive command
#[derive(Parser)]
pub struct ReceiveArgs {
    /// Address to listen on (default from config)
    #[arg(short, long)]
    pub listen: Option<String>,

    /// Output directory
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Name announced to the sender
    #[arg(short, long)]
    pub name: Option<String>,

    /// How long to wait for a sender (e.g., 30s, 5m, 1h)
    #[arg(short, long, default_value = "5m")]
    pub timeout: String,

    /// Minimal output
    #[arg(short, long)]
    pub quiet: bool,
}

/// Arguments for the config command
#[derive(Parser)]
pub struct ConfigArgs {
    /// Config subcommand
    #[command(subcommand)]
    pub action: ConfigAction,
}

/// Config subcommands
#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show all configuration
    Show,

    /// Show the configuration file path
    Path,

    /// Reset to defaults
    Reset,
}
