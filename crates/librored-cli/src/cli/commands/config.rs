//! Config command handlers.

use anyhow::{Context, Result};
use librored_core::config::{Config, paths};

pub fn path() {
    println!("{}", paths::config_path().display());
}

pub fn init() -> Result<()> {
    let config_path = paths::config_path();
    Config::init(&config_path)
        .with_context(|| format!("init config at {}", config_path.display()))?;
    println!("Created config at {}", config_path.display());
    Ok(())
}

/// Prints the commented default config; `xtask` writes it back to the repo.
pub fn generate() -> Result<()> {
    let toml = Config::generate().context("generate default config")?;
    print!("{toml}");
    Ok(())
}
