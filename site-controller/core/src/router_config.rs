use crate::{BridgeConfig, Error, TcpEndpoint};
use serde_json::Value;

const TCP_LISTENER: &str = "tcpListener";
const TCP_CONNECTOR: &str = "tcpConnector";

/// The router's JSON configuration: a list of `[entityType, attributes]` pairs.
///
/// Bridge entities are lifted into a [`BridgeConfig`]; every other entity is carried through
/// untouched so that rewriting the bridges never disturbs the rest of the router's configuration.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RouterConfig {
    entities: Vec<(String, Value)>,
    pub bridges: BridgeConfig,
}

impl RouterConfig {
    pub fn from_json(json: &str) -> Result<Self, Error> {
        let raw: Vec<(String, Value)> =
            serde_json::from_str(json).map_err(|e| Error::InvalidConfig(e.to_string()))?;

        let mut config = Self::default();
        for (kind, attrs) in raw {
            match kind.as_str() {
                TCP_LISTENER => config.bridges.add_tcp_listener(Self::endpoint(&kind, attrs)?),
                TCP_CONNECTOR => config
                    .bridges
                    .add_tcp_connector(Self::endpoint(&kind, attrs)?),
                _ => config.entities.push((kind, attrs)),
            }
        }
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, Error> {
        let bridges = self
            .bridges
            .tcp_listeners
            .values()
            .map(|l| (TCP_LISTENER, l))
            .chain(self.bridges.tcp_connectors.values().map(|c| (TCP_CONNECTOR, c)))
            .map(|(kind, endpoint)| {
                serde_json::to_value(endpoint).map(|attrs| (kind.to_string(), attrs))
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;

        let entities = self.entities.iter().cloned().chain(bridges).collect::<Vec<_>>();
        serde_json::to_string_pretty(&entities).map_err(|e| Error::InvalidConfig(e.to_string()))
    }

    /// Replaces the bridge configuration, returning false if it was already current.
    pub fn replace_bridges(&mut self, bridges: BridgeConfig) -> bool {
        if self.bridges == bridges {
            return false;
        }
        self.bridges = bridges;
        true
    }

    fn endpoint(kind: &str, attrs: Value) -> Result<TcpEndpoint, Error> {
        serde_json::from_value(attrs).map_err(|e| Error::InvalidConfig(format!("{kind}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const CONFIG: &str = r#"[
        ["router", {"id": "site-0", "mode": "interior"}],
        ["listener", {"name": "amqp", "host": "localhost", "port": 5672}],
        ["tcpListener", {"name": "db", "host": "0.0.0.0", "port": "1024", "address": "db", "siteId": "site-0"}],
        ["tcpConnector", {"name": "db@10.0.0.5", "host": "10.0.0.5", "port": "5432", "address": "db", "siteId": "site-0"}]
    ]"#;

    #[test]
    fn parses_bridges() {
        let config = RouterConfig::from_json(CONFIG).unwrap();
        assert_eq!(config.entities.len(), 2);
        assert_eq!(config.bridges.tcp_listeners["db"].port, "1024");
        assert_eq!(config.bridges.tcp_connectors["db@10.0.0.5"].host, "10.0.0.5");
    }

    #[test]
    fn replacing_bridges_preserves_other_entities() {
        let mut config = RouterConfig::from_json(CONFIG).unwrap();
        assert!(!config.replace_bridges(config.bridges.clone()));
        assert!(config.replace_bridges(BridgeConfig::default()));

        let json: Value = serde_json::from_str(&config.to_json().unwrap()).unwrap();
        assert_eq!(
            json,
            json!([
                ["router", {"id": "site-0", "mode": "interior"}],
                ["listener", {"name": "amqp", "host": "localhost", "port": 5672}],
            ])
        );
    }

    #[test]
    fn serialized_bridges_reparse() {
        let config = RouterConfig::from_json(CONFIG).unwrap();
        let reparsed = RouterConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(reparsed, config);
    }

    #[test]
    fn rejects_malformed_config() {
        assert!(RouterConfig::from_json("{}").is_err());
        assert!(RouterConfig::from_json(r#"[["tcpListener", {"host": "x"}]]"#).is_err());
    }
}
