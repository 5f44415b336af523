//! The router's text (transport) configuration.
//!
//! The text configuration is a static preamble followed by [`CONNECTORS_MARKER`] and then one
//! `connector { ... }` stanza per inter-router connector. The layout is shared with the router
//! image and must be reproduced exactly: everything up to the marker is never rewritten.

use crate::Error;
use std::fmt;

pub const CONNECTORS_MARKER: &str = "## Connectors: ##";

/// An inter-router connector stanza.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RouterConnector {
    pub name: String,
    pub host: String,
    pub port: String,
    pub role: String,
    pub cost: i32,
    pub ssl_profile: Option<String>,
}

impl fmt::Display for RouterConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f)?;
        writeln!(f, "connector {{")?;
        writeln!(f, "    name: {}", self.name)?;
        writeln!(f, "    host: {}", self.host)?;
        writeln!(f, "    port: {}", self.port)?;
        writeln!(f, "    role: {}", self.role)?;
        writeln!(f, "    cost: {}", self.cost)?;
        if let Some(profile) = &self.ssl_profile {
            writeln!(f, "    sslProfile: {profile}")?;
        }
        writeln!(f, "}}")
    }
}

/// Lists the connectors configured after the connectors marker, in order.
pub fn list_connectors(config: &str) -> Result<Vec<RouterConnector>, Error> {
    let (_, connectors) = split(config)?;

    let mut parsed = Vec::new();
    let mut current: Option<RouterConnector> = None;
    for line in connectors.lines().map(str::trim) {
        if line.starts_with("connector") && line.ends_with('{') {
            if current.is_some() {
                return Err(Error::InvalidConfig("unterminated connector stanza".into()));
            }
            current = Some(RouterConnector::default());
            continue;
        }

        let Some(connector) = current.as_mut() else {
            continue;
        };
        if line == "}" {
            parsed.extend(current.take());
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim().to_string();
        match key.trim() {
            "name" => connector.name = value,
            "host" => connector.host = value,
            "port" => connector.port = value,
            "role" => connector.role = value,
            "cost" => {
                connector.cost = value
                    .parse()
                    .map_err(|_| Error::InvalidConfig(format!("invalid connector cost: {value}")))?
            }
            "sslProfile" => connector.ssl_profile = Some(value),
            key => tracing::trace!(%key, "Ignoring connector attribute"),
        }
    }

    if current.is_some() {
        return Err(Error::InvalidConfig("unterminated connector stanza".into()));
    }
    Ok(parsed)
}

/// Rewrites the connectors section of `config`, keeping the preamble byte-for-byte.
pub fn rewrite_connectors<'c>(
    config: &str,
    connectors: impl IntoIterator<Item = &'c RouterConnector>,
) -> Result<String, Error> {
    let (preamble, _) = split(config)?;
    let mut updated = format!("{preamble}{CONNECTORS_MARKER}");
    for connector in connectors {
        updated.push_str(&connector.to_string());
    }
    Ok(updated)
}

/// Removes the connector named `name`.
///
/// Returns `None` if no such connector is configured. Remaining connectors keep their relative
/// order.
pub fn remove_connector(config: &str, name: &str) -> Result<Option<String>, Error> {
    let connectors = list_connectors(config)?;
    if !connectors.iter().any(|c| c.name == name) {
        return Ok(None);
    }
    rewrite_connectors(config, connectors.iter().filter(|c| c.name != name)).map(Some)
}

fn split(config: &str) -> Result<(&str, &str), Error> {
    config
        .split_once(CONNECTORS_MARKER)
        .ok_or_else(|| Error::MissingConfigKey(CONNECTORS_MARKER.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const PREAMBLE: &str = "router {\n    mode: interior\n    id: site-0\n}\n\nlistener {\n    host: 0.0.0.0\n    port: 5672\n}\n\n";

    fn connector(name: &str, cost: i32) -> RouterConnector {
        RouterConnector {
            name: name.to_string(),
            host: format!("{name}.example.com"),
            port: "55671".to_string(),
            role: "inter-router".to_string(),
            cost,
            ssl_profile: Some(format!("{name}-profile")),
        }
    }

    #[test]
    fn remove_keeps_preamble_and_order() {
        let (a, b, c) = (connector("a", 1), connector("b", 2), connector("c", 3));
        let config = format!("{PREAMBLE}{CONNECTORS_MARKER}{a}{b}{c}");

        let updated = remove_connector(&config, "b").unwrap().unwrap();
        assert_eq!(updated, format!("{PREAMBLE}{CONNECTORS_MARKER}{a}{c}"));
        assert!(updated.starts_with(PREAMBLE));
    }

    #[test]
    fn remove_missing_connector() {
        let a = connector("a", 1);
        let config = format!("{PREAMBLE}{CONNECTORS_MARKER}{a}");
        assert_eq!(remove_connector(&config, "z").unwrap(), None);
    }

    #[test]
    fn remove_last_connector() {
        let a = connector("a", 1);
        let config = format!("{PREAMBLE}{CONNECTORS_MARKER}{a}");
        assert_eq!(
            remove_connector(&config, "a").unwrap().unwrap(),
            format!("{PREAMBLE}{CONNECTORS_MARKER}")
        );
    }

    #[test]
    fn missing_marker() {
        assert_eq!(
            remove_connector(PREAMBLE, "a"),
            Err(Error::MissingConfigKey(CONNECTORS_MARKER.to_string()))
        );
        assert!(list_connectors(PREAMBLE).is_err());
    }

    #[test]
    fn lists_connectors() {
        let a = connector("a", 1);
        let b = RouterConnector {
            ssl_profile: None,
            ..connector("b", 5)
        };
        let config = format!("{PREAMBLE}{CONNECTORS_MARKER}{a}{b}");
        assert_eq!(list_connectors(&config).unwrap(), vec![a, b]);
    }

    #[test]
    fn rejects_unterminated_stanza() {
        let config = format!("{PREAMBLE}{CONNECTORS_MARKER}\nconnector {{\n    name: a\n");
        assert!(list_connectors(&config).is_err());
    }
}
