use ahash::AHashMap as HashMap;
use std::{collections::BTreeMap, fmt, str::FromStr};

/// A logical port published for a host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Port {
    /// The name of the binding that publishes the port.
    pub name: String,

    /// The port clients connect to.
    pub port: u16,

    /// The router-local port traffic is forwarded to.
    pub target_port: u16,

    pub protocol: Protocol,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

/// All of the ports currently published for a single host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExposedPortSet {
    pub host: String,
    pub ports: BTreeMap<String, Port>,
}

/// The outcome of withdrawing a port from a host.
#[derive(Debug, PartialEq, Eq)]
pub enum Unexposed<'a> {
    /// The host has no ports left and should no longer be published.
    Host,

    /// The host's remaining ports.
    Ports(&'a ExposedPortSet),
}

/// Tracks the ports published for each host so that only changes reach the cluster.
#[derive(Debug, Default)]
pub struct ExposedPorts {
    by_host: HashMap<String, ExposedPortSet>,
}

// === impl Protocol ===

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => f.write_str("TCP"),
            Self::Udp => f.write_str("UDP"),
        }
    }
}

impl FromStr for Protocol {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("tcp") {
            return Ok(Self::Tcp);
        }
        if s.eq_ignore_ascii_case("udp") {
            return Ok(Self::Udp);
        }
        Err(crate::Error::InvalidBindingSpec(format!(
            "unsupported protocol: {s}"
        )))
    }
}

// === impl ExposedPorts ===

impl ExposedPorts {
    /// Publishes `port` for `host`.
    ///
    /// Returns the host's updated port set if anything changed, or `None` if the port was
    /// already published as-is.
    pub fn expose(&mut self, host: &str, port: Port) -> Option<&ExposedPortSet> {
        let set = self
            .by_host
            .entry(host.to_string())
            .or_insert_with(|| ExposedPortSet {
                host: host.to_string(),
                ports: BTreeMap::new(),
            });
        if set.ports.get(&port.name) == Some(&port) {
            return None;
        }
        set.ports.insert(port.name.clone(), port);
        Some(set)
    }

    /// Withdraws the port named `name` from `host`.
    ///
    /// Returns `None` if the port wasn't published for the host.
    pub fn unexpose(&mut self, host: &str, name: &str) -> Option<Unexposed<'_>> {
        let emptied = {
            let set = self.by_host.get_mut(host)?;
            set.ports.remove(name)?;
            set.ports.is_empty()
        };
        if emptied {
            self.by_host.remove(host);
            return Some(Unexposed::Host);
        }
        self.by_host.get(host).map(Unexposed::Ports)
    }

    pub fn get(&self, host: &str) -> Option<&ExposedPortSet> {
        self.by_host.get(host)
    }

    pub fn len(&self) -> usize {
        self.by_host.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_host.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port(name: &str, port: u16, target_port: u16) -> Port {
        Port {
            name: name.to_string(),
            port,
            target_port,
            protocol: Protocol::Tcp,
        }
    }

    #[test]
    fn expose_reports_changes_only() {
        let mut exposed = ExposedPorts::default();

        let set = exposed.expose("db", port("db", 5432, 1024)).cloned();
        assert_eq!(
            set.map(|s| s.ports.into_values().collect::<Vec<_>>()),
            Some(vec![port("db", 5432, 1024)])
        );

        assert!(exposed.expose("db", port("db", 5432, 1024)).is_none());

        let set = exposed.expose("db", port("db", 5433, 1024)).cloned();
        assert_eq!(
            set.map(|s| s.ports.into_values().collect::<Vec<_>>()),
            Some(vec![port("db", 5433, 1024)])
        );
    }

    #[test]
    fn ports_accumulate_per_host() {
        let mut exposed = ExposedPorts::default();
        exposed.expose("shared", port("a", 80, 1024));
        let set = exposed.expose("shared", port("b", 81, 1025)).unwrap();
        assert_eq!(set.host, "shared");
        assert_eq!(set.ports.len(), 2);
        assert_eq!(exposed.len(), 1);
    }

    #[test]
    fn unexpose_forgets_host() {
        let mut exposed = ExposedPorts::default();
        exposed.expose("db", port("db", 5432, 1024));
        assert_eq!(exposed.unexpose("db", "db"), Some(Unexposed::Host));
        assert_eq!(exposed.unexpose("db", "db"), None);
        assert!(exposed.is_empty());

        // Exposing again after the host was dropped is a change.
        assert!(exposed.expose("db", port("db", 5432, 1024)).is_some());
    }

    #[test]
    fn unexpose_keeps_other_ports_on_host() {
        let mut exposed = ExposedPorts::default();
        exposed.expose("shared", port("a", 80, 1024));
        exposed.expose("shared", port("b", 81, 1025));

        let Some(Unexposed::Ports(set)) = exposed.unexpose("shared", "a") else {
            panic!("host must keep its remaining port");
        };
        assert_eq!(set.ports.keys().collect::<Vec<_>>(), vec!["b"]);
        assert_eq!(exposed.unexpose("shared", "a"), None);
        assert_eq!(exposed.unexpose("other", "b"), None);
        assert_eq!(exposed.get("shared").unwrap().ports.len(), 1);

        assert_eq!(exposed.unexpose("shared", "b"), Some(Unexposed::Host));
        assert!(exposed.get("shared").is_none());
    }

    #[test]
    fn parse_protocol() {
        assert_eq!("tcp".parse::<Protocol>(), Ok(Protocol::Tcp));
        assert_eq!("UDP".parse::<Protocol>(), Ok(Protocol::Udp));
        assert!("http".parse::<Protocol>().is_err());
        assert_eq!(Protocol::Udp.to_string(), "UDP");
    }
}
