//! Helpers for running `ip` and friends.

use log::debug;
use std::process::Command;

use super::RuntimeError;

/// Render a command line for logs and error messages
pub(crate) fn render(program: &str, args: &[&str]) -> String {
    let mut line = program.to_string();
    for arg in args {
        line.push(' ');
        if arg.is_empty() || arg.contains(char::is_whitespace) {
            line.push_str(&format!("'{}'", arg));
        } else {
            line.push_str(arg);
        }
    }
    line
}

/// Run a command to completion, returning its standard output.
///
/// A non-zero exit status becomes `RuntimeError::CommandFailed` carrying the
/// command's standard error.
pub(crate) fn run(program: &str, args: &[&str]) -> Result<String, RuntimeError> {
    let line = render(program, args);
    debug!("Running: {}", line);

    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|source| RuntimeError::Spawn { program: program.to_string(), source })?;

    if !output.status.success() {
        return Err(RuntimeError::CommandFailed {
            command: line,
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// `ip <args>` in the root namespace
pub(crate) fn ip(args: &[&str]) -> Result<String, RuntimeError> {
    run("ip", args)
}

/// `ip netns exec <ns> <program> <args>`
pub(crate) fn in_netns(ns: &str, program: &str, args: &[&str]) -> Result<String, RuntimeError> {
    let mut full = vec!["netns", "exec", ns, program];
    full.extend_from_slice(args);
    run("ip", &full)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_quotes_whitespace() {
        assert_eq!(
            render("ip", &["netns", "exec", "h1", "sh", "-c", "ping -c 1 10.0.2.2"]),
            "ip netns exec h1 sh -c 'ping -c 1 10.0.2.2'"
        );
    }

    #[test]
    fn test_missing_program_is_spawn_error() {
        let err = run("p4topo-definitely-not-a-binary", &[]).unwrap_err();
        assert!(matches!(err, RuntimeError::Spawn { .. }));
    }

    #[test]
    fn test_nonzero_exit_is_command_failed() {
        let err = run("sh", &["-c", "echo oops >&2; exit 3"]).unwrap_err();
        match err {
            RuntimeError::CommandFailed { stderr, .. } => assert_eq!(stderr, "oops"),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
