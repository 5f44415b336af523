use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The router's bridge configuration: the TCP listeners and connectors that carry application
/// traffic between the router network and local endpoints.
///
/// A bridge configuration is always generated whole from the current bindings; it is never
/// patched in place.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BridgeConfig {
    pub tcp_listeners: BTreeMap<String, TcpEndpoint>,
    pub tcp_connectors: BTreeMap<String, TcpEndpoint>,
}

/// A single `tcpListener` or `tcpConnector` router entity.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TcpEndpoint {
    pub name: String,
    #[serde(default)]
    pub host: String,
    pub port: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub site_id: String,
}

// === impl BridgeConfig ===

impl BridgeConfig {
    pub fn add_tcp_listener(&mut self, endpoint: TcpEndpoint) {
        self.tcp_listeners.insert(endpoint.name.clone(), endpoint);
    }

    pub fn add_tcp_connector(&mut self, endpoint: TcpEndpoint) {
        self.tcp_connectors.insert(endpoint.name.clone(), endpoint);
    }

    pub fn is_empty(&self) -> bool {
        self.tcp_listeners.is_empty() && self.tcp_connectors.is_empty()
    }
}
