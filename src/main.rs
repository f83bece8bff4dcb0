use clap::Parser;
use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use env_logger::Env;
use log::{info, warn};
use std::io;
use std::path::PathBuf;

use p4topo::config::Backend;
use p4topo::config_loader;
use p4topo::orchestrator::{self, RunOptions};
use p4topo::runtime::{Emulator, NetnsFactory, SimulatedFactory};
use p4topo::session::SignalAwareInput;
use p4topo::utils::SignalFlags;

/// Build and run a P4 switch topology on this machine
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the topology YAML file (defaults to the built-in basic topology)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Emulation backend, overrides the topology file
    #[arg(short, long, value_enum)]
    backend: Option<Backend>,

    /// Do not open the interactive shell
    #[arg(long)]
    no_cli: bool,

    /// Write a JSON registry of the live topology to this path
    #[arg(long)]
    registry: Option<PathBuf>,

    /// Print the effective topology as YAML and exit
    #[arg(long)]
    print_config: bool,
}

fn main() -> Result<()> {
    // Initialize error handling
    color_eyre::install()?;

    let args = Args::parse();

    // Initialize logging with default filter level of "info"
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let mut config = match &args.config {
        Some(path) => config_loader::load_config(path)?,
        None => config_loader::basic_config()?,
    };
    if let Some(backend) = args.backend {
        config.general.backend = backend;
    }
    if args.no_cli {
        config.general.interactive = false;
    }

    if args.print_config {
        let yaml = serde_yaml::to_string(&config).wrap_err("Failed to serialize topology")?;
        print!("{}", yaml);
        return Ok(());
    }

    // From here on the process owns namespaces and switch processes
    let signals = SignalFlags::new();
    signals.install().wrap_err("Failed to install signal handlers")?;

    let options = RunOptions {
        interactive: config.general.interactive,
        registry_path: args.registry.clone(),
        signals: signals.clone(),
    };

    let input = SignalAwareInput::new(io::stdin(), signals.clone());
    let mut stdout = io::stdout();
    let summary = match config.general.backend {
        Backend::Netns => {
            if !is_root() {
                warn!("The netns backend needs root privileges to create namespaces");
            }
            let factory = NetnsFactory::new().with_signals(signals.clone());
            orchestrator::run(&config, Emulator::new(factory), &options, input, &mut stdout)?
        }
        Backend::Simulated => {
            orchestrator::run(&config, Emulator::new(SimulatedFactory::new()), &options, input, &mut stdout)?
        }
    };

    info!(
        "Done: {} hosts, {} switches, {} links, {} shell commands",
        summary.hosts, summary.switches, summary.links, summary.commands
    );
    Ok(())
}

/// `/proc/self` is owned by the effective uid of the process
fn is_root() -> bool {
    use std::os::unix::fs::MetadataExt;
    std::fs::metadata("/proc/self").map(|m| m.uid() == 0).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let args = Args::parse_from(["p4topo", "--config", "topo.yaml"]);

        assert_eq!(args.config, Some(PathBuf::from("topo.yaml")));
        assert_eq!(args.backend, None);
        assert!(!args.no_cli);
        assert!(!args.print_config);
    }

    #[test]
    fn test_backend_and_flags() {
        let args = Args::parse_from([
            "p4topo",
            "--backend",
            "simulated",
            "--no-cli",
            "--registry",
            "/tmp/topology.json",
        ]);

        assert_eq!(args.config, None);
        assert_eq!(args.backend, Some(Backend::Simulated));
        assert!(args.no_cli);
        assert_eq!(args.registry, Some(PathBuf::from("/tmp/topology.json")));
    }

    #[test]
    fn test_unknown_backend_rejected() {
        assert!(Args::try_parse_from(["p4topo", "--backend", "docker"]).is_err());
    }
}
