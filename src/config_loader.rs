use crate::config::Config;
use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use log::info;
use std::fs::File;
use std::path::Path;

/// Topology built into the binary, used when no file is given
const BASIC_TOPOLOGY: &str = include_str!("../topologies/basic.yaml");

/// Load and parse a topology from a YAML file
pub fn load_config(config_path: &Path) -> Result<Config> {
    info!("Loading topology from: {:?}", config_path);

    let file = File::open(config_path)
        .wrap_err_with(|| format!("Failed to open topology file '{}'", config_path.display()))?;

    let config: Config = serde_yaml::from_reader(file)
        .wrap_err_with(|| format!("Failed to parse topology file '{}'", config_path.display()))?;

    config.validate()?;
    log_summary(&config);

    Ok(config)
}

/// Parse and validate a topology held in memory
pub fn load_config_str(yaml: &str) -> Result<Config> {
    let config: Config = serde_yaml::from_str(yaml).wrap_err("Failed to parse topology")?;
    config.validate()?;
    Ok(config)
}

/// The two-host, one-switch reference topology
pub fn basic_config() -> Result<Config> {
    info!("No topology file given, using the built-in basic topology");
    let config = load_config_str(BASIC_TOPOLOGY)?;
    log_summary(&config);
    Ok(config)
}

fn log_summary(config: &Config) {
    info!(
        "Topology: {} hosts, {} switches, {} links",
        config.hosts.len(),
        config.switches.len(),
        config.links.len()
    );
}
