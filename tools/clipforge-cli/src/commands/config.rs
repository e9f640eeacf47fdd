//! Show or initialise the configuration file.

use clipforge_common::config::{config_file_path, AppConfig};

pub fn run(init: bool, config: &AppConfig) -> anyhow::Result<()> {
    let path = config_file_path();
    if init {
        if path.exists() {
            anyhow::bail!("Config already exists at {}", path.display());
        }
        config.save()?;
        println!("Wrote default config to {}", path.display());
        return Ok(());
    }

    let source = if path.exists() { "file" } else { "defaults" };
    println!("# {} ({source})", path.display());
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}
