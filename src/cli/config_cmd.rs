//! Configuration commands.

use crate::config::Config;

use super::helpers::print_json;

/// Print the effective configuration, after file and environment overrides.
pub fn cmd_config_show(config: &Config) -> anyhow::Result<()> {
    match &config.source_path {
        Some(path) => eprintln!("Loaded from {}", path.display()),
        None => eprintln!("No config file found, showing defaults"),
    }
    print_json(config)
}
