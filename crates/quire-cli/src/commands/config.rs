//! Inspect or initialize the configuration file.

use anyhow::{Context, Result};
use quire_core::Config;

use crate::output::{self, OutputFormat};

/// Execute the config command.
pub fn execute(show_path: bool, init: bool, format: OutputFormat) -> Result<()> {
    let path = Config::resolve_path()?;
    if show_path {
        println!("{}", path.display());
        return Ok(());
    }

    let config = Config::load()?;
    if init {
        // Secrets come from the environment; never write them to disk.
        let mut on_disk = config;
        on_disk.backend.api_key = None;
        on_disk.save(&path)?;
        println!("Wrote {}", path.display());
        return Ok(());
    }

    let redacted = config.redacted();
    if format == OutputFormat::Json {
        return output::print_json(&redacted);
    }
    let rendered = toml::to_string_pretty(&redacted).context("Failed to render configuration")?;
    println!("# {}", path.display());
    print!("{rendered}");
    Ok(())
}
