//! High-level control flow.
//!
//! Turns a loaded [`Config`] into builder calls and runs the fixed sequence
//! materialize -> configure hosts -> (registry) -> interactive session ->
//! teardown. Teardown runs on every exit path, including a SIGINT during
//! set-up and a SIGTERM at any point.

use color_eyre::eyre::{bail, WrapErr};
use color_eyre::Result;
use log::{error, info, warn};
use std::collections::HashSet;
use std::io::Write;
use std::path::PathBuf;

use crate::config::Config;
use crate::registry::{write_registry, TopologyRegistry};
use crate::runtime::NetworkRuntime;
use crate::session::{InputSource, Session};
use crate::topology::{Endpoint, RouteConfig, SwitchSpec, TopologyBuilder, TopologyError, TopologyState};
use crate::utils::SignalFlags;

/// Run-time options that are not part of the topology itself
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub interactive: bool,
    /// Where to write the JSON registry once the topology is configured
    pub registry_path: Option<PathBuf>,
    /// Checked between phases; a raised flag ends the run
    pub signals: SignalFlags,
}

/// What a run did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub hosts: usize,
    pub switches: usize,
    pub links: usize,
    pub configured_hosts: usize,
    pub commands: usize,
    pub final_state: TopologyState,
}

/// Declare every node and link of `config` on a fresh builder.
///
/// Switches without an explicit device id get the lowest id not claimed by
/// any switch in the file.
pub fn build_topology<R: NetworkRuntime>(config: &Config, runtime: R) -> Result<TopologyBuilder<R>, TopologyError> {
    let mut topo = TopologyBuilder::new(runtime);

    for host in &config.hosts {
        topo.declare_host(&host.name, &host.ip.to_string(), &host.mac.to_string())?;
    }

    let mut taken: HashSet<u64> = config.switches.iter().filter_map(|s| s.device_id).collect();
    let mut next_id = 0;
    for switch in &config.switches {
        let device_id = match switch.device_id {
            Some(id) => id,
            None => {
                while taken.contains(&next_id) {
                    next_id += 1;
                }
                taken.insert(next_id);
                next_id
            }
        };

        let mut spec = SwitchSpec::new(&switch.name, &switch.sw_path, switch.grpc_port);
        spec.device_id = device_id;
        spec.json_path = switch.json_path.clone();
        spec.thrift_port = switch.thrift_port;
        spec.log_file = switch.log_file.clone();
        spec.log_console = switch.log_console;
        spec.pcap_dump = switch.pcap_dump.clone();
        spec.cpu_port = switch.cpu_port;
        spec.start_timeout = switch.start_timeout;
        topo.declare_switch_spec(spec)?;
    }

    for link in &config.links {
        if link.a_port.is_some() || link.b_port.is_some() {
            let a = Endpoint { node: link.a.clone(), port: link.a_port };
            let b = Endpoint { node: link.b.clone(), port: link.b_port };
            topo.declare_link_between(a, b)?;
        } else {
            topo.declare_link(link.a.as_str(), link.b.as_str(), link.port)?;
        }
    }

    Ok(topo)
}

/// Issue every route record to its host; returns how many hosts were configured.
pub fn configure_hosts<R: NetworkRuntime>(
    topo: &mut TopologyBuilder<R>,
    routes: &[RouteConfig],
) -> Result<usize, TopologyError> {
    for route in routes {
        topo.apply_route_config(route)?;
    }

    let unconfigured: Vec<&str> = topo
        .description()
        .hosts
        .iter()
        .map(|h| h.name.as_str())
        .filter(|name| !routes.iter().any(|r| r.host == *name))
        .collect();
    if !unconfigured.is_empty() {
        warn!("Hosts without routing configuration: {}", unconfigured.join(", "));
    }

    Ok(routes.len())
}

/// Build, run and tear down the topology described by `config`.
pub fn run<R, I, O>(config: &Config, runtime: R, options: &RunOptions, input: I, output: &mut O) -> Result<RunSummary>
where
    R: NetworkRuntime,
    I: InputSource,
    O: Write,
{
    let mut topo = build_topology(config, runtime).wrap_err("Failed to declare topology")?;

    let outcome = drive(&mut topo, config, options, input, output);
    if let Err(e) = &outcome {
        error!("Run failed: {:#}", e);
    }

    let teardown = topo.teardown();
    let mut summary = outcome?;
    teardown.wrap_err("Failed to tear down topology")?;

    summary.final_state = topo.state();
    info!("Topology torn down");
    Ok(summary)
}

fn drive<R, I, O>(
    topo: &mut TopologyBuilder<R>,
    config: &Config,
    options: &RunOptions,
    input: I,
    output: &mut O,
) -> Result<RunSummary>
where
    R: NetworkRuntime,
    I: InputSource,
    O: Write,
{
    let handle = topo.materialize().wrap_err("Failed to materialize topology")?;
    let (hosts, switches, links) = (handle.host_count(), handle.switch_count(), handle.link_count());
    info!("Topology is up: {} hosts, {} switches, {} links", hosts, switches, links);
    check_signals(&options.signals, "materialize")?;

    let routes = config.route_configs();
    let configured_hosts = configure_hosts(topo, &routes).wrap_err("Failed to configure hosts")?;
    info!("Configured {} hosts, topology is {}", configured_hosts, topo.state());
    check_signals(&options.signals, "host configuration")?;

    if let Some(path) = &options.registry_path {
        if let Some(handle) = topo.handle() {
            let registry = TopologyRegistry::build(topo.description(), handle, &routes);
            write_registry(&registry, path)?;
        }
    }

    let commands = if options.interactive {
        info!("Starting interactive session, type 'help' for commands");
        Session::new(topo).run(input, output).wrap_err("Interactive session failed")?
    } else {
        info!("Interactive session disabled");
        0
    };

    Ok(RunSummary {
        hosts,
        switches,
        links,
        configured_hosts,
        commands,
        final_state: topo.state(),
    })
}

fn check_signals(signals: &SignalFlags, phase: &str) -> Result<()> {
    if signals.terminate_requested() {
        bail!("Terminated after {}", phase);
    }
    if signals.take_interrupt() {
        bail!("Interrupted after {}", phase);
    }
    Ok(())
}
