use crate::{BridgeConfig, Error};
use ahash::AHashMap as HashMap;
use std::{fmt, str::FromStr};

/// A `HashMap` keyed by port.
///
/// Because ports are `u16` values, this type avoids the overhead of actually hashing ports.
pub(crate) type PortMap<V> =
    std::collections::HashMap<u16, V, std::hash::BuildHasherDefault<PortHasher>>;

/// A hasher for ports.
///
/// Because ports are single `u16` values, we don't have to hash them; we can just use the integer
/// values as hashes directly.
#[derive(Debug, Default)]
pub struct PortHasher(u16);

/// An inclusive range of router-local ports that may be handed out to bindings.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PortRange {
    start: u16,
    end: u16,
}

/// Allocates router-local ports to binding keys.
///
/// Ports are stable for as long as a key is held: allocating for a key that already holds a port
/// returns that port. The mapping can be rebuilt from the bridge configuration persisted for the
/// router (see [`PortMapping::recover`]) so that a restarted controller keeps handing out the ports
/// that Services and routes already point at.
#[derive(Clone, Debug)]
pub struct PortMapping {
    range: PortRange,
    by_key: HashMap<String, u16>,
    by_port: PortMap<String>,
}

// === impl PortHasher ===

impl std::hash::Hasher for PortHasher {
    fn write(&mut self, _: &[u8]) {
        unreachable!("hashing a `u16` calls `write_u16`");
    }

    #[inline]
    fn write_u16(&mut self, port: u16) {
        self.0 = port;
    }

    #[inline]
    fn finish(&self) -> u64 {
        self.0 as u64
    }
}

// === impl PortRange ===

impl PortRange {
    pub const DEFAULT: Self = Self {
        start: 1024,
        end: 65535,
    };

    pub fn new(start: u16, end: u16) -> Result<Self, Error> {
        if start == 0 {
            return Err(Error::InvalidConfig("port range must not include 0".to_string()));
        }
        if start > end {
            return Err(Error::InvalidConfig(
                "port range must be increasing".to_string(),
            ));
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, port: u16) -> bool {
        self.start <= port && port <= self.end
    }

    fn iter(&self) -> impl Iterator<Item = u16> {
        self.start..=self.end
    }
}

impl Default for PortRange {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

impl FromStr for PortRange {
    type Err = Error;

    /// Parses a `floor-ceil` pair, e.g. `1024-65535`.
    fn from_str(s: &str) -> Result<Self, Error> {
        let (floor, ceil) = s
            .split_once('-')
            .ok_or_else(|| Error::InvalidConfig(format!("invalid port range: {s}")))?;
        let parse = |p: &str| {
            p.trim()
                .parse::<u16>()
                .map_err(|error| Error::InvalidConfig(format!("invalid port {p:?}: {error}")))
        };
        Self::new(parse(floor)?, parse(ceil)?)
    }
}

// === impl PortMapping ===

impl PortMapping {
    pub fn new(range: PortRange) -> Self {
        Self {
            range,
            by_key: HashMap::default(),
            by_port: PortMap::default(),
        }
    }

    /// Rebuilds a mapping from the `tcpListener` stanzas of a persisted bridge configuration.
    ///
    /// Each listener stanza is named by its binding key and carries the router port that was
    /// allocated to it.
    pub fn recover(range: PortRange, config: Option<&BridgeConfig>) -> Self {
        let mut mapping = Self::new(range);
        for listener in config.into_iter().flat_map(|c| c.tcp_listeners.values()) {
            let port = match listener.port.parse::<u16>() {
                Ok(port) if range.contains(port) => port,
                Ok(port) => {
                    tracing::warn!(key = %listener.name, port, %range, "Persisted port outside of range");
                    continue;
                }
                Err(error) => {
                    tracing::warn!(key = %listener.name, port = %listener.port, %error, "Invalid persisted port");
                    continue;
                }
            };
            if let Some(holder) = mapping.by_port.get(&port) {
                tracing::warn!(key = %listener.name, port, %holder, "Persisted port already recovered");
                continue;
            }
            tracing::debug!(key = %listener.name, port, "Recovered port");
            mapping.insert(listener.name.clone(), port);
        }
        mapping
    }

    /// Returns the port held by `key`, allocating the lowest free port if it holds none.
    pub fn get_port_for_key(&mut self, key: &str) -> Result<u16, Error> {
        if let Some(port) = self.by_key.get(key) {
            return Ok(*port);
        }

        let port = self
            .range
            .iter()
            .find(|p| !self.by_port.contains_key(p))
            .ok_or(Error::PoolExhausted(self.range))?;
        tracing::debug!(%key, port, "Allocated port");
        self.insert(key.to_string(), port);
        Ok(port)
    }

    /// Returns the port held by `key` without allocating one.
    pub fn port_for_key(&self, key: &str) -> Option<u16> {
        self.by_key.get(key).copied()
    }

    /// Frees the port held by `key`, if any.
    pub fn release_port_for_key(&mut self, key: &str) {
        if let Some(port) = self.by_key.remove(key) {
            self.by_port.remove(&port);
            tracing::debug!(%key, port, "Released port");
        }
    }

    pub fn range(&self) -> PortRange {
        self.range
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u16)> {
        self.by_key.iter().map(|(k, p)| (k.as_str(), *p))
    }

    fn insert(&mut self, key: String, port: u16) {
        self.by_port.insert(port, key.clone());
        self.by_key.insert(key, port);
    }
}

impl Default for PortMapping {
    fn default() -> Self {
        Self::new(PortRange::DEFAULT)
    }
}
