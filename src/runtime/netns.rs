//! Linux network-namespace backend.
//!
//! Hosts are network namespaces, links are veth pairs, and every switch is a
//! BMv2-style process (`simple_switch_grpc` by default) running in the root
//! namespace and bound to its `<switch>-eth<port>` interfaces.
//!
//! ## Host set-up
//!
//! - `ip netns add <host>` and loopback up
//! - the default interface is renamed to `eth0` and receives the host's MAC
//!   and address; TX/RX/SG offloads are disabled and IPv6 is turned off
//!   (best effort, a missing `ethtool`/`sysctl` only logs a warning)
//! - neighbors: `ip neigh replace <ip> lladdr <mac> dev <default> nud permanent`
//! - default route: `ip route del default` (a missing route is fine) then
//!   `ip route add default <directive>`; the connected subnet route stays
//!
//! Everything here needs `CAP_NET_ADMIN`, in practice root.

use log::{debug, info, warn};
use std::fs::File;
use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use super::command::{in_netns, ip, render};
use super::{DataplaneEntityFactory, HostRef, Interface, RuntimeError, SwitchRef};
use crate::ip::{MacAddr, RouteDirective};
use crate::topology::{HostSpec, NodeKind, SwitchSpec};
use crate::utils::binary::validate_binary_spec;
use crate::utils::SignalFlags;

/// Poll interval while waiting for a switch to open its control port
const START_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Name of a host's default interface inside its namespace
const DEFAULT_INTERFACE: &str = "eth0";

/// Factory for namespace hosts and process switches
#[derive(Debug, Default)]
pub struct NetnsFactory {
    signals: SignalFlags,
}

impl NetnsFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Abort switch start-up waits when these flags are raised
    pub fn with_signals(mut self, signals: SignalFlags) -> Self {
        self.signals = signals;
        self
    }
}

impl DataplaneEntityFactory for NetnsFactory {
    fn create_host(&mut self, spec: &HostSpec) -> Result<Box<dyn HostRef>, RuntimeError> {
        ip(&["netns", "add", &spec.name])?;
        let mut host = NetnsHost {
            spec: spec.clone(),
            default_interface: None,
            alive: true,
        };
        if let Err(e) = in_netns(&spec.name, "ip", &["link", "set", "dev", "lo", "up"]) {
            if let Err(cleanup) = host.stop() {
                warn!("Failed to remove namespace {} after failed set-up: {}", spec.name, cleanup);
            }
            return Err(e);
        }
        info!("Created namespace for host {}", spec.name);
        Ok(Box::new(host))
    }

    fn create_switch(&mut self, spec: &SwitchSpec) -> Result<Box<dyn SwitchRef>, RuntimeError> {
        let executable = validate_binary_spec(&spec.executable)?;
        debug!("Switch {} will run {}", spec.name, executable.display());
        Ok(Box::new(NetnsSwitch {
            spec: spec.clone(),
            executable,
            child: None,
            signals: self.signals.clone(),
        }))
    }

    fn create_link(&mut self, a: &Interface, b: &Interface) -> Result<(), RuntimeError> {
        setup_link(ip, a, b)
    }

    fn delete_link(&mut self, a: &Interface, b: &Interface) -> Result<(), RuntimeError> {
        // Host ends go away with their namespace; deleting one end of a veth
        // pair removes both, so only a root-namespace end needs deleting.
        match [a, b].into_iter().find(|end| end.kind == NodeKind::Switch) {
            Some(end) => ip(&["link", "delete", "dev", &end.name]).map(|_| ()),
            None => {
                debug!("Link {} <-> {} is released with its namespaces", a.name, b.name);
                Ok(())
            }
        }
    }
}

/// A host living in its own network namespace
struct NetnsHost {
    spec: HostSpec,
    default_interface: Option<String>,
    alive: bool,
}

impl NetnsHost {
    fn exec_in(&self, program: &str, args: &[&str]) -> Result<String, RuntimeError> {
        in_netns(&self.spec.name, program, args)
    }

    /// Tuning the host needs for a software switch; failures are not fatal
    fn tune_interface(&self, intf: &str) {
        for offload in ["rx", "tx", "sg"] {
            if let Err(e) = self.exec_in("ethtool", &["--offload", intf, offload, "off"]) {
                warn!("Host {}: could not disable {} offload on {}: {}", self.spec.name, offload, intf, e);
            }
        }
        for key in [
            "net.ipv6.conf.all.disable_ipv6=1",
            "net.ipv6.conf.default.disable_ipv6=1",
            "net.ipv6.conf.lo.disable_ipv6=1",
        ] {
            if let Err(e) = self.exec_in("sysctl", &["-q", "-w", key]) {
                warn!("Host {}: could not set {}: {}", self.spec.name, key, e);
            }
        }
    }
}

impl HostRef for NetnsHost {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn attach_interface(&mut self, intf: &Interface, default: bool) -> Result<String, RuntimeError> {
        if !default {
            self.exec_in("ip", &["link", "set", "dev", &intf.name, "up"])?;
            return Ok(intf.name.clone());
        }

        let name = DEFAULT_INTERFACE;
        let mac = self.spec.mac.to_string();
        let addr = self.spec.ip.to_string();
        self.exec_in("ip", &["link", "set", "dev", &intf.name, "name", name])?;
        self.exec_in("ip", &["link", "set", "dev", name, "address", &mac])?;
        self.exec_in("ip", &["addr", "add", &addr, "dev", name])?;
        self.exec_in("ip", &["link", "set", "dev", name, "up"])?;
        self.tune_interface(name);

        info!("Host {}: {} is {} ({})", self.spec.name, name, addr, mac);
        self.default_interface = Some(name.to_string());
        Ok(name.to_string())
    }

    fn set_static_neighbor(&mut self, ip: Ipv4Addr, mac: &MacAddr) -> Result<(), RuntimeError> {
        let dev = self.default_interface.clone().ok_or_else(|| {
            RuntimeError::Unsupported(format!("host '{}' has no interface for neighbor entries", self.spec.name))
        })?;
        let args = neighbor_args(ip, mac, &dev);
        self.exec_in("ip", &as_strs(&args))?;
        Ok(())
    }

    fn set_default_route(&mut self, route: &RouteDirective) -> Result<(), RuntimeError> {
        let ns = self.spec.name.as_str();
        replace_default_route(|args| in_netns(ns, "ip", args), route)
    }

    fn exec(&mut self, command: &str) -> Result<String, RuntimeError> {
        self.exec_in("sh", &["-c", command])
    }

    fn stop(&mut self) -> Result<(), RuntimeError> {
        if !self.alive {
            return Ok(());
        }
        self.alive = false;
        ip(&["netns", "delete", &self.spec.name])?;
        Ok(())
    }
}

/// A switch process
struct NetnsSwitch {
    spec: SwitchSpec,
    executable: PathBuf,
    child: Option<Child>,
    signals: SignalFlags,
}

impl NetnsSwitch {
    fn wait_until_listening(&mut self) -> Result<(), RuntimeError> {
        let addr = SocketAddr::from(([127, 0, 0, 1], self.spec.control_port));
        let deadline = Instant::now() + self.spec.start_timeout;

        loop {
            if let Some(child) = self.child.as_mut() {
                if let Some(status) = child.try_wait()? {
                    self.child = None;
                    return Err(RuntimeError::SwitchExited {
                        name: self.spec.name.clone(),
                        status: status.to_string(),
                        log: self.spec.log_path().display().to_string(),
                    });
                }
            }
            if TcpStream::connect_timeout(&addr, START_POLL_INTERVAL).is_ok() {
                return Ok(());
            }
            if self.signals.should_abort() {
                return Err(RuntimeError::Interrupted(format!("start-up of switch {}", self.spec.name)));
            }
            if Instant::now() >= deadline {
                return Err(RuntimeError::SwitchStartTimeout {
                    name: self.spec.name.clone(),
                    port: self.spec.control_port,
                    timeout: self.spec.start_timeout,
                });
            }
            thread::sleep(START_POLL_INTERVAL);
        }
    }
}

impl SwitchRef for NetnsSwitch {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn control_port(&self) -> u16 {
        self.spec.control_port
    }

    fn start(&mut self, ports: &[Interface]) -> Result<(), RuntimeError> {
        let args = switch_args(&self.spec, ports);
        let program = self.executable.display().to_string();
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        info!("Starting switch {}: {}", self.spec.name, render(&program, &arg_refs));

        let log_path = self.spec.log_path();
        let log = File::create(&log_path)?;
        let child = Command::new(&self.executable)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(log.try_clone()?)
            .stderr(log)
            .spawn()
            .map_err(|source| RuntimeError::Spawn { program, source })?;
        debug!("Switch {} has pid {}", self.spec.name, child.id());
        self.child = Some(child);

        self.wait_until_listening()?;
        info!("Switch {} is listening on gRPC port {}", self.spec.name, self.spec.control_port);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), RuntimeError> {
        if let Some(mut child) = self.child.take() {
            debug!("Killing switch {} (pid {})", self.spec.name, child.id());
            // The process may already have exited on its own
            if let Err(e) = child.kill() {
                debug!("Switch {} kill: {}", self.spec.name, e);
            }
            child.wait()?;
        }
        Ok(())
    }
}

impl Drop for NetnsSwitch {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("Failed to stop switch {}: {}", self.spec.name, e);
        }
    }
}

fn as_strs(args: &[String]) -> Vec<&str> {
    args.iter().map(String::as_str).collect()
}

/// Create the veth pair for a link and move each end into place.
///
/// `run` executes one `ip` invocation in the root namespace. When a step
/// after the pair exists fails, the pair is deleted again through the end
/// that is still in the root namespace.
fn setup_link<F>(mut run: F, a: &Interface, b: &Interface) -> Result<(), RuntimeError>
where
    F: FnMut(&[&str]) -> Result<String, RuntimeError>,
{
    run(&["link", "add", &a.name, "type", "veth", "peer", "name", &b.name])?;
    for end in [a, b] {
        let step = match end.kind {
            NodeKind::Host => run(&["link", "set", "dev", &end.name, "netns", &end.node]),
            NodeKind::Switch => run(&["link", "set", "dev", &end.name, "up"]),
        };
        if let Err(e) = step {
            // The failing end never left the root namespace
            if let Err(cleanup) = run(&["link", "delete", "dev", &end.name]) {
                warn!("Failed to delete veth {} after failed set-up: {}", end.name, cleanup);
            }
            return Err(e);
        }
    }
    Ok(())
}

/// `ip neigh` arguments for a permanent neighbor entry
pub fn neighbor_args(ip: Ipv4Addr, mac: &MacAddr, dev: &str) -> Vec<String> {
    ["neigh", "replace", &ip.to_string(), "lladdr", &mac.to_string(), "dev", dev, "nud", "permanent"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// `ip route` arguments that install `route` as the default route
pub fn default_route_args(route: &RouteDirective) -> Vec<String> {
    let mut args = vec!["route".to_string(), "add".to_string(), "default".to_string()];
    args.extend(route.route_args());
    args
}

/// Swap the default route of a host, leaving every other route alone.
///
/// `run` executes one `ip` invocation inside the host.
fn replace_default_route<F>(mut run: F, route: &RouteDirective) -> Result<(), RuntimeError>
where
    F: FnMut(&[&str]) -> Result<String, RuntimeError>,
{
    match run(&["route", "del", "default"]) {
        Ok(_) => {}
        // No default route installed yet
        Err(RuntimeError::CommandFailed { stderr, .. }) if stderr.contains("No such process") => {
            debug!("No previous default route");
        }
        Err(e) => return Err(e),
    }
    run(&as_strs(&default_route_args(route)))?;
    Ok(())
}

/// Command-line arguments for a BMv2 switch with a P4Runtime server
pub fn switch_args(spec: &SwitchSpec, ports: &[Interface]) -> Vec<String> {
    let mut args = Vec::new();
    for port in ports {
        args.push("-i".to_string());
        args.push(format!("{}@{}", port.port, port.name));
    }
    if let Some(pcap) = &spec.pcap_dump {
        args.push("--pcap".to_string());
        args.push(pcap.display().to_string());
    }
    if let Some(thrift_port) = spec.thrift_port {
        args.push("--thrift-port".to_string());
        args.push(thrift_port.to_string());
    }
    args.push("--nanolog".to_string());
    args.push(format!("ipc:///tmp/bm-{}-log.ipc", spec.device_id));
    args.push("--device-id".to_string());
    args.push(spec.device_id.to_string());
    match &spec.json_path {
        Some(json) => args.push(json.display().to_string()),
        None => args.push("--no-p4".to_string()),
    }
    if spec.log_console {
        args.push("--log-console".to_string());
    }

    // Target-specific options follow the `--` separator
    args.push("--".to_string());
    args.push("--grpc-server-addr".to_string());
    args.push(format!("0.0.0.0:{}", spec.control_port));
    if let Some(cpu_port) = spec.cpu_port {
        args.push("--cpu-port".to_string());
        args.push(cpu_port.to_string());
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ports() -> Vec<Interface> {
        vec![Interface::new("s1", NodeKind::Switch, 1), Interface::new("s1", NodeKind::Switch, 2)]
    }

    #[test]
    fn test_switch_args_without_program() {
        let spec = SwitchSpec::new("s1", "simple_switch_grpc", 9559);
        let args = switch_args(&spec, &ports());
        assert_eq!(
            args,
            vec![
                "-i", "1@s1-eth1", "-i", "2@s1-eth2",
                "--nanolog", "ipc:///tmp/bm-0-log.ipc",
                "--device-id", "0",
                "--no-p4",
                "--", "--grpc-server-addr", "0.0.0.0:9559",
            ]
        );
    }

    #[test]
    fn test_switch_args_with_all_options() {
        let mut spec = SwitchSpec::new("s2", "simple_switch_grpc", 50052);
        spec.device_id = 1;
        spec.json_path = Some(PathBuf::from("build/main.json"));
        spec.thrift_port = Some(9091);
        spec.pcap_dump = Some(PathBuf::from("pcaps"));
        spec.log_console = true;
        spec.cpu_port = Some(255);

        let args = switch_args(&spec, &[]);
        assert_eq!(
            args,
            vec![
                "--pcap", "pcaps",
                "--thrift-port", "9091",
                "--nanolog", "ipc:///tmp/bm-1-log.ipc",
                "--device-id", "1",
                "build/main.json",
                "--log-console",
                "--", "--grpc-server-addr", "0.0.0.0:50052",
                "--cpu-port", "255",
            ]
        );
    }

    #[test]
    fn test_missing_switch_binary_is_reported() {
        let mut factory = NetnsFactory::new();
        let spec = SwitchSpec::new("s1", "/nonexistent/simple_switch_grpc", 9559);
        assert!(matches!(factory.create_switch(&spec), Err(RuntimeError::Binary(_))));
    }

    /// Records every `ip` invocation and fails the ones matching `fail_on`
    fn recorder<'a>(
        calls: &'a mut Vec<String>,
        fail_on: &'a str,
        stderr: &'a str,
    ) -> impl FnMut(&[&str]) -> Result<String, RuntimeError> + 'a {
        move |args: &[&str]| {
            let line = args.join(" ");
            calls.push(line.clone());
            if !fail_on.is_empty() && line.contains(fail_on) {
                return Err(RuntimeError::CommandFailed {
                    command: format!("ip {}", line),
                    status: "exit status: 2".to_string(),
                    stderr: stderr.to_string(),
                });
            }
            Ok(String::new())
        }
    }

    #[test]
    fn test_default_route_keeps_connected_routes() {
        let mut calls = Vec::new();
        let route = RouteDirective::new("dev eth0 via 10.0.1.1");
        replace_default_route(recorder(&mut calls, "", ""), &route).unwrap();

        assert_eq!(calls, vec!["route del default", "route add default dev eth0 via 10.0.1.1"]);
        // Only the default route is ever touched
        assert!(calls.iter().all(|c| !c.contains("flush")));
    }

    #[test]
    fn test_default_route_without_previous_route() {
        let mut calls = Vec::new();
        let route = RouteDirective::new("eth0");
        replace_default_route(
            recorder(&mut calls, "route del", "RTNETLINK answers: No such process"),
            &route,
        )
        .unwrap();

        assert_eq!(calls, vec!["route del default", "route add default dev eth0"]);
    }

    #[test]
    fn test_default_route_delete_error_is_reported() {
        let mut calls = Vec::new();
        let route = RouteDirective::new("dev eth0 via 10.0.1.1");
        let err = replace_default_route(
            recorder(&mut calls, "route del", "Cannot open network namespace"),
            &route,
        )
        .unwrap_err();

        assert!(matches!(err, RuntimeError::CommandFailed { .. }));
        assert_eq!(calls.len(), 1);
    }

    #[test]
    fn test_neighbor_args() {
        let mac: MacAddr = "08:00:00:00:01:01".parse().unwrap();
        assert_eq!(
            neighbor_args(Ipv4Addr::new(10, 0, 1, 1), &mac, "eth0"),
            vec!["neigh", "replace", "10.0.1.1", "lladdr", "08:00:00:00:01:01", "dev", "eth0", "nud", "permanent"]
        );
    }

    #[test]
    fn test_link_setup_commands() {
        let mut calls = Vec::new();
        let h1 = Interface::new("h1", NodeKind::Host, 0);
        let s1 = Interface::new("s1", NodeKind::Switch, 1);
        setup_link(recorder(&mut calls, "", ""), &h1, &s1).unwrap();

        assert_eq!(
            calls,
            vec![
                "link add h1-eth0 type veth peer name s1-eth1",
                "link set dev h1-eth0 netns h1",
                "link set dev s1-eth1 up",
            ]
        );
    }

    #[test]
    fn test_failed_link_setup_deletes_veth() {
        let mut calls = Vec::new();
        let h1 = Interface::new("h1", NodeKind::Host, 0);
        let s1 = Interface::new("s1", NodeKind::Switch, 1);
        let result = setup_link(
            recorder(&mut calls, "netns h1", "Cannot open network namespace \"h1\""),
            &h1,
            &s1,
        );

        assert!(result.is_err());
        assert_eq!(calls.last().map(String::as_str), Some("link delete dev h1-eth0"));
    }

    #[test]
    fn test_failed_switch_end_deletes_veth() {
        let mut calls = Vec::new();
        let h1 = Interface::new("h1", NodeKind::Host, 0);
        let s1 = Interface::new("s1", NodeKind::Switch, 1);
        let result = setup_link(recorder(&mut calls, "s1-eth1 up", "Operation not permitted"), &h1, &s1);

        assert!(result.is_err());
        assert_eq!(calls.last().map(String::as_str), Some("link delete dev s1-eth1"));
    }

    #[test]
    fn test_switch_wait_gives_up_on_signal() {
        let signals = SignalFlags::new();
        let mut spec = SwitchSpec::new("s1", "sleep", 1);
        spec.start_timeout = Duration::from_secs(30);
        let child = Command::new("sleep").arg("30").spawn().unwrap();
        let mut switch = NetnsSwitch {
            spec,
            executable: PathBuf::from("sleep"),
            child: Some(child),
            signals: signals.clone(),
        };

        signals.raise_interrupt();
        let started = Instant::now();
        let err = switch.wait_until_listening().unwrap_err();

        assert!(matches!(err, RuntimeError::Interrupted(_)));
        assert!(started.elapsed() < Duration::from_secs(5));
        switch.stop().unwrap();
    }

    /// Needs root and iproute2: `cargo test -- --ignored`
    #[test]
    #[ignore]
    fn test_netns_host_route_table() {
        let mut factory = NetnsFactory::new();
        let spec = HostSpec {
            name: "p4topo-rt".to_string(),
            ip: "10.0.1.2/24".parse().unwrap(),
            mac: "08:00:00:00:01:02".parse().unwrap(),
        };
        let host_end = Interface::new("p4topo-rt", NodeKind::Host, 0);
        let switch_end = Interface::new("p4topo-sw", NodeKind::Switch, 1);

        let mut host = factory.create_host(&spec).unwrap();
        factory.create_link(&host_end, &switch_end).unwrap();
        host.attach_interface(&host_end, true).unwrap();
        host.set_static_neighbor(Ipv4Addr::new(10, 0, 1, 1), &"08:00:00:00:01:01".parse().unwrap())
            .unwrap();
        host.set_default_route(&RouteDirective::new("dev eth0 via 10.0.1.1")).unwrap();
        // A second configuration replaces the route
        host.set_default_route(&RouteDirective::new("dev eth0 via 10.0.1.1")).unwrap();

        let routes = host.exec("ip route show").unwrap();
        factory.delete_link(&host_end, &switch_end).unwrap();
        host.stop().unwrap();

        assert!(routes.contains("10.0.1.0/24 dev eth0"), "connected route missing: {}", routes);
        assert_eq!(routes.matches("default via 10.0.1.1 dev eth0").count(), 1, "{}", routes);
    }
}
