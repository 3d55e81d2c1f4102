//! Validate command implementation.

use anyhow::Result;
use k2l_core::Config;

/// Validate the effective configuration and print it.
pub fn run(config: &Config) -> Result<()> {
    config.validate()?;

    println!("Configuration is valid\n");
    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}
