//! Default-route directives.
//!
//! Routes are issued to hosts as opaque `ip route` argument strings such as
//! `dev eth0 via 10.0.1.1`. The string is passed to the host unchanged.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

/// Opaque default-route directive, kept exactly as written.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RouteDirective(String);

impl RouteDirective {
    pub fn new(directive: impl Into<String>) -> Self {
        RouteDirective(directive.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Arguments to append after `ip route add default`.
    ///
    /// A single word with no whitespace names an interface, so it expands to
    /// `dev <word>`.
    pub fn route_args(&self) -> Vec<String> {
        let words: Vec<&str> = self.0.split_whitespace().collect();
        if words.len() == 1 {
            vec!["dev".to_string(), words[0].to_string()]
        } else {
            words.into_iter().map(str::to_string).collect()
        }
    }

    /// Gateway named after `via`, if the directive has one and it parses.
    pub fn gateway(&self) -> Option<Ipv4Addr> {
        let mut words = self.0.split_whitespace();
        while let Some(word) = words.next() {
            if word == "via" {
                return words.next().and_then(|gw| gw.parse().ok());
            }
        }
        None
    }

    /// Output device named after `dev`, or the single-word interface form.
    pub fn device(&self) -> Option<&str> {
        let words: Vec<&str> = self.0.split_whitespace().collect();
        if words.len() == 1 {
            return Some(words[0]);
        }
        words
            .iter()
            .position(|w| *w == "dev")
            .and_then(|i| words.get(i + 1).copied())
    }
}

impl From<&str> for RouteDirective {
    fn from(value: &str) -> Self {
        RouteDirective::new(value)
    }
}

impl From<String> for RouteDirective {
    fn from(value: String) -> Self {
        RouteDirective(value)
    }
}

impl fmt::Display for RouteDirective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
