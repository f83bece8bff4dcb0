//! Interactive shell over a live topology.
//!
//! Reads one command per line until `exit`, `quit`, end of input or a
//! termination signal. Failed commands print an error line and the shell
//! keeps going; so does Ctrl-C.

use log::{debug, info};
use std::collections::HashMap;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use crate::runtime::NetworkRuntime;
use crate::topology::{TopologyBuilder, TopologyError};
use crate::utils::SignalFlags;

const PROMPT: &str = "p4topo> ";

/// How often a waiting shell looks at the signal flags
const SIGNAL_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// One event from the user's side of the shell
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionInput {
    Line(String),
    /// Ctrl-C
    Interrupted,
    /// SIGTERM or SIGHUP
    Terminated,
    Eof,
}

/// Source of shell input
pub trait InputSource {
    /// Block until the next line or signal
    fn next_input(&mut self) -> io::Result<SessionInput>;
}

/// Lines from a reader, without signal handling
pub struct ReaderInput<B: BufRead> {
    lines: io::Lines<B>,
}

impl<B: BufRead> ReaderInput<B> {
    pub fn new(reader: B) -> Self {
        ReaderInput { lines: reader.lines() }
    }
}

impl<B: BufRead> InputSource for ReaderInput<B> {
    fn next_input(&mut self) -> io::Result<SessionInput> {
        match self.lines.next() {
            Some(line) => line.map(SessionInput::Line),
            None => Ok(SessionInput::Eof),
        }
    }
}

/// Lines read on a helper thread, so that signals are seen while the shell
/// waits for the user. The thread starts on the first read.
pub struct SignalAwareInput<R: Read + Send + 'static> {
    reader: Option<R>,
    lines: Option<Receiver<io::Result<String>>>,
    signals: SignalFlags,
}

impl<R: Read + Send + 'static> SignalAwareInput<R> {
    pub fn new(reader: R, signals: SignalFlags) -> Self {
        SignalAwareInput { reader: Some(reader), lines: None, signals }
    }

    fn receiver(&mut self) -> &Receiver<io::Result<String>> {
        let reader = self.reader.take();
        self.lines.get_or_insert_with(|| {
            let (tx, rx) = mpsc::channel();
            if let Some(reader) = reader {
                thread::spawn(move || {
                    for line in BufReader::new(reader).lines() {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                });
            }
            rx
        })
    }
}

impl<R: Read + Send + 'static> InputSource for SignalAwareInput<R> {
    fn next_input(&mut self) -> io::Result<SessionInput> {
        loop {
            if self.signals.terminate_requested() {
                return Ok(SessionInput::Terminated);
            }
            if self.signals.take_interrupt() {
                return Ok(SessionInput::Interrupted);
            }
            match self.receiver().recv_timeout(SIGNAL_POLL_INTERVAL) {
                Ok(line) => return line.map(SessionInput::Line),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Ok(SessionInput::Eof),
            }
        }
    }
}

const HELP: &str = "\
Commands:
  help               show this message
  nodes              list nodes
  net                list nodes with their links
  links              list links
  dump               show node details
  routes <host>      show the default route of a host
  arp <host>         show the static neighbor entries of a host
  <node> <command>   run a command on a node
  exit | quit        leave the shell (end of input works too)
";

/// Shell bound to a live topology
pub struct Session<'a, R: NetworkRuntime> {
    topo: &'a mut TopologyBuilder<R>,
}

impl<'a, R: NetworkRuntime> Session<'a, R> {
    pub fn new(topo: &'a mut TopologyBuilder<R>) -> Self {
        Session { topo }
    }

    /// Run the shell; returns the number of commands executed.
    pub fn run<I: InputSource, O: Write>(&mut self, mut input: I, output: &mut O) -> io::Result<usize> {
        let mut commands = 0;

        loop {
            write!(output, "{}", PROMPT)?;
            output.flush()?;

            let line = match input.next_input()? {
                SessionInput::Line(line) => line,
                SessionInput::Interrupted => {
                    writeln!(output, "\nInterrupt")?;
                    continue;
                }
                SessionInput::Terminated => {
                    info!("Termination requested, leaving the shell");
                    writeln!(output, "\n*** Terminated")?;
                    break;
                }
                SessionInput::Eof => {
                    writeln!(output)?;
                    break;
                }
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if line == "exit" || line == "quit" {
                break;
            }

            debug!("session: {}", line);
            commands += 1;
            if let Err(e) = self.dispatch(line, output)? {
                writeln!(output, "*** {}", e)?;
            }
        }

        Ok(commands)
    }

    /// I/O errors abort the shell; topology errors are reported to the user.
    fn dispatch<O: Write>(&mut self, line: &str, output: &mut O) -> io::Result<Result<(), TopologyError>> {
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        match (word, rest) {
            ("help", _) => write!(output, "{}", HELP).map(Ok),
            ("nodes", _) => self.nodes(output).map(Ok),
            ("net", _) => self.net(output).map(Ok),
            ("links", _) => self.links(output).map(Ok),
            ("dump", _) => self.dump(output).map(Ok),
            ("routes", host) => self.routes(host, output),
            ("arp", host) => self.arp(host, output),
            (node, "") => {
                writeln!(output, "*** Unknown command: {}", node)?;
                Ok(Ok(()))
            }
            (node, command) => {
                let command = self.substitute_hosts(command);
                match self.topo.exec(node, &command) {
                    Ok(out) => write!(output, "{}", out).map(Ok),
                    Err(e) => Ok(Err(e)),
                }
            }
        }
    }

    /// Replace words naming a declared host with its address, so that
    /// `h1 ping h2` pings h2.
    fn substitute_hosts(&self, command: &str) -> String {
        let description = self.topo.description();
        command
            .split_whitespace()
            .map(|word| match description.host(word) {
                Some(host) => host.ip.addr().to_string(),
                None => word.to_string(),
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn node_names(&self) -> Vec<String> {
        let description = self.topo.description();
        description
            .hosts
            .iter()
            .map(|h| h.name.clone())
            .chain(description.switches.iter().map(|s| s.name.clone()))
            .collect()
    }

    fn nodes<O: Write>(&self, output: &mut O) -> io::Result<()> {
        writeln!(output, "available nodes are:")?;
        writeln!(output, "{}", self.node_names().join(" "))
    }

    fn net<O: Write>(&self, output: &mut O) -> io::Result<()> {
        let Some(handle) = self.topo.handle() else {
            return writeln!(output, "*** Topology is not running");
        };

        let mut peers: HashMap<&str, &str> = HashMap::new();
        for link in handle.links() {
            peers.insert(&link.a.name, &link.b.name);
            peers.insert(&link.b.name, &link.a.name);
        }

        for name in self.node_names() {
            let Some(node) = handle.node(&name) else { continue };
            let ends: Vec<String> = node
                .interfaces
                .iter()
                .map(|i| format!("{}:{}", i.name, peers.get(i.name.as_str()).copied().unwrap_or("?")))
                .collect();
            writeln!(output, "{} {}", name, ends.join(" "))?;
        }
        Ok(())
    }

    fn links<O: Write>(&self, output: &mut O) -> io::Result<()> {
        let Some(handle) = self.topo.handle() else {
            return writeln!(output, "*** Topology is not running");
        };
        for link in handle.links() {
            writeln!(output, "{}<->{}", link.a.name, link.b.name)?;
        }
        Ok(())
    }

    fn dump<O: Write>(&self, output: &mut O) -> io::Result<()> {
        let description = self.topo.description();
        for host in &description.hosts {
            writeln!(output, "<Host {}: ip={} mac={}>", host.name, host.ip, host.mac)?;
        }
        for switch in &description.switches {
            writeln!(
                output,
                "<P4Switch {}: device_id={} grpc_port={} exe={}>",
                switch.name, switch.device_id, switch.control_port, switch.executable
            )?;
        }
        Ok(())
    }

    fn routes<O: Write>(&mut self, host: &str, output: &mut O) -> io::Result<Result<(), TopologyError>> {
        if host.is_empty() {
            writeln!(output, "usage: routes <host>")?;
            return Ok(Ok(()));
        }
        let live = match self.topo.live_host(host) {
            Ok(live) => live,
            Err(e) => return Ok(Err(e)),
        };
        for route in live.default_routes() {
            writeln!(output, "default {}", route.route_args().join(" "))?;
        }
        Ok(Ok(()))
    }

    fn arp<O: Write>(&mut self, host: &str, output: &mut O) -> io::Result<Result<(), TopologyError>> {
        if host.is_empty() {
            writeln!(output, "usage: arp <host>")?;
            return Ok(Ok(()));
        }
        let live = match self.topo.live_host(host) {
            Ok(live) => live,
            Err(e) => return Ok(Err(e)),
        };
        let device = live.default_interface().unwrap_or("-").to_string();
        for (ip, mac) in live.neighbors() {
            writeln!(output, "{} dev {} lladdr {} PERMANENT", ip, device, mac)?;
        }
        Ok(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{Emulator, SimEvent, SimulatedFactory};
    use crate::topology::TopologyState;
    use std::io::Cursor;
    use std::net::Ipv4Addr;

    fn live_topology(factory: SimulatedFactory) -> TopologyBuilder<Emulator<SimulatedFactory>> {
        let mut topo = TopologyBuilder::new(Emulator::new(factory));
        let h1 = topo.declare_host("h1", "10.0.1.2/24", "08:00:00:00:01:02").unwrap();
        let h2 = topo.declare_host("h2", "10.0.2.2/24", "08:00:00:00:02:02").unwrap();
        let s1 = topo.declare_switch("s1", "simple_switch_grpc", 9559).unwrap();
        topo.declare_link(&h1, &s1, Some(1)).unwrap();
        topo.declare_link(&h2, &s1, Some(2)).unwrap();
        topo.materialize().unwrap();
        topo.configure_host_network(&h1, Ipv4Addr::new(10, 0, 1, 1), "08:00:00:00:01:01".parse().unwrap(), "dev eth0 via 10.0.1.1")
            .unwrap();
        topo
    }

    fn run_script(topo: &mut TopologyBuilder<Emulator<SimulatedFactory>>, script: &str) -> (usize, String) {
        let mut output = Vec::new();
        let count = Session::new(topo).run(ReaderInput::new(Cursor::new(script)), &mut output).unwrap();
        (count, String::from_utf8(output).unwrap())
    }

    #[test]
    fn test_listing_commands() {
        let mut topo = live_topology(SimulatedFactory::new());
        let (count, output) = run_script(&mut topo, "nodes\nnet\nlinks\ndump\nexit\n");

        assert_eq!(count, 4);
        assert!(output.contains("h1 h2 s1"));
        assert!(output.contains("h1 h1-eth0:s1-eth1"));
        assert!(output.contains("s1 s1-eth1:h1-eth0 s1-eth2:h2-eth0"));
        assert!(output.contains("h2-eth0<->s1-eth2"));
        assert!(output.contains("<P4Switch s1: device_id=0 grpc_port=9559"));
    }

    #[test]
    fn test_routes_and_arp() {
        let mut topo = live_topology(SimulatedFactory::new());
        let (_, output) = run_script(&mut topo, "routes h1\narp h1\nroutes h2\n");

        assert!(output.contains("default dev eth0 via 10.0.1.1"));
        assert!(output.contains("10.0.1.1 dev eth0 lladdr 08:00:00:00:01:01 PERMANENT"));
        assert_eq!(output.matches("default ").count(), 1);
    }

    #[test]
    fn test_exec_and_errors_keep_session_alive() {
        let factory = SimulatedFactory::new();
        let journal = factory.journal();
        let mut topo = live_topology(factory);

        let (count, output) = run_script(&mut topo, "h1 ping -c 1 10.0.2.2\nh9 true\ns1 ls\nbogus\nroutes s1\nhelp\n");

        assert_eq!(count, 6);
        assert!(journal.events().contains(&SimEvent::Exec {
            node: "h1".to_string(),
            command: "ping -c 1 10.0.2.2".to_string(),
        }));
        assert!(output.contains("*** Link endpoint 'h9' has not been declared"));
        assert!(output.contains("*** Host 's1' is not declared in this topology"));
        assert!(output.contains("*** Unknown command: bogus"));
        assert!(output.contains("Commands:"));
        assert_eq!(output.matches("***").count(), 4);
    }

    #[test]
    fn test_eof_ends_session() {
        let mut topo = live_topology(SimulatedFactory::new());
        let (count, output) = run_script(&mut topo, "nodes");
        assert_eq!(count, 1);
        assert!(output.ends_with("p4topo> \n"));
    }

    #[test]
    fn test_host_names_become_addresses() {
        let factory = SimulatedFactory::new();
        let journal = factory.journal();
        let mut topo = live_topology(factory);

        run_script(&mut topo, "h1 ping -c 1 h2\nh2 ping h1\nh1 echo s1\n");

        let events = journal.events();
        assert!(events.contains(&SimEvent::Exec { node: "h1".to_string(), command: "ping -c 1 10.0.2.2".to_string() }));
        assert!(events.contains(&SimEvent::Exec { node: "h2".to_string(), command: "ping 10.0.1.2".to_string() }));
        assert!(events.contains(&SimEvent::Exec { node: "h1".to_string(), command: "echo s1".to_string() }));
    }

    struct Scripted(Vec<SessionInput>);

    impl InputSource for Scripted {
        fn next_input(&mut self) -> io::Result<SessionInput> {
            if self.0.is_empty() {
                return Ok(SessionInput::Eof);
            }
            Ok(self.0.remove(0))
        }
    }

    #[test]
    fn test_interrupt_keeps_session_running() {
        let mut topo = live_topology(SimulatedFactory::new());
        let mut output = Vec::new();
        let input = Scripted(vec![
            SessionInput::Interrupted,
            SessionInput::Line("nodes".to_string()),
            SessionInput::Interrupted,
            SessionInput::Line("exit".to_string()),
        ]);

        let count = Session::new(&mut topo).run(input, &mut output).unwrap();
        let output = String::from_utf8(output).unwrap();

        assert_eq!(count, 1);
        assert_eq!(output.matches("Interrupt").count(), 2);
        assert!(output.contains("h1 h2 s1"));
        assert_eq!(topo.state(), TopologyState::Materialized);
    }

    #[test]
    fn test_termination_ends_session() {
        let mut topo = live_topology(SimulatedFactory::new());
        let mut output = Vec::new();
        let input = Scripted(vec![
            SessionInput::Line("nodes".to_string()),
            SessionInput::Terminated,
            SessionInput::Line("net".to_string()),
        ]);

        let count = Session::new(&mut topo).run(input, &mut output).unwrap();
        let output = String::from_utf8(output).unwrap();

        assert_eq!(count, 1);
        assert!(output.contains("*** Terminated"));
        assert!(!output.contains("h1-eth0:s1-eth1"));
    }

    #[test]
    fn test_signal_aware_input_reports_interrupt_before_lines() {
        let signals = SignalFlags::new();
        let mut input = SignalAwareInput::new(Cursor::new(b"nodes\n".to_vec()), signals.clone());
        signals.raise_interrupt();

        assert_eq!(input.next_input().unwrap(), SessionInput::Interrupted);
        assert_eq!(input.next_input().unwrap(), SessionInput::Line("nodes".to_string()));
        assert_eq!(input.next_input().unwrap(), SessionInput::Eof);
    }

    #[test]
    fn test_signal_aware_input_reports_termination() {
        let signals = SignalFlags::new();
        let mut input = SignalAwareInput::new(Cursor::new(b"nodes\n".to_vec()), signals.clone());
        signals.request_terminate();

        assert_eq!(input.next_input().unwrap(), SessionInput::Terminated);
        assert_eq!(input.next_input().unwrap(), SessionInput::Terminated);
    }
}
