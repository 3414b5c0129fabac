//! Config command implementation.

use anyhow::{Context, Result};

use hyperdrop_core::config::Config;

use super::{ConfigAction, ConfigArgs};

/// Run the config command.
pub fn run(args: ConfigArgs) -> Result<()> {
    match args.action {
        ConfigAction::Show => {
            let config = super::load_config()?;
            print!("{}", config.to_toml()?);
        }
        ConfigAction::Path => {
            println!("{}", Config::config_path().display());
        }
        ConfigAction::Reset => {
            Config::default()
                .save()
                .context("Failed to write default configuration")?;
            println!(
                "  Configuration reset to defaults ({})",
                Config::config_path().display()
            );
        }
    }
    Ok(())
}
