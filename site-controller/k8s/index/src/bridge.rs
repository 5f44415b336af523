//! Router bridge entities for bindings.
//!
//! Connector entities are named `<connector>@<host>` so that a connector selecting several pods
//! yields one entity per pod. Listener entities are named after the listener and bind the router
//! port allocated to it on all interfaces.

use site_controller_core::{BridgeConfig, TcpEndpoint, WILDCARD_HOST};
use site_controller_k8s_api::{Connector, Listener, ResourceExt};

pub fn add_connector(site_id: &str, connector: &Connector, host: &str, config: &mut BridgeConfig) {
    config.add_tcp_connector(TcpEndpoint {
        name: format!("{}@{}", connector.name_any(), host),
        host: host.to_string(),
        port: connector.spec.port.to_string(),
        address: connector.spec.routing_key.clone(),
        site_id: site_id.to_string(),
    });
}

pub fn add_listener(site_id: &str, listener: &Listener, port: u16, config: &mut BridgeConfig) {
    config.add_tcp_listener(TcpEndpoint {
        name: listener.name_any(),
        host: WILDCARD_HOST.to_string(),
        port: port.to_string(),
        address: listener.spec.routing_key.clone(),
        site_id: site_id.to_string(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use site_controller_k8s_api::{ConnectorSpec, ListenerSpec};

    #[test]
    fn entity_names() {
        let connector = Connector::new(
            "db",
            ConnectorSpec {
                routing_key: "db-key".to_string(),
                host: None,
                selector: Some("app=db".to_string()),
                port: 5432,
                include_not_ready: false,
                type_: None,
                tls_credentials: None,
            },
        );
        let listener = Listener::new(
            "web",
            ListenerSpec {
                routing_key: "web-key".to_string(),
                host: "web".to_string(),
                port: 8080,
                type_: None,
                tls_credentials: None,
            },
        );

        let mut config = BridgeConfig::default();
        add_connector("site-0", &connector, "10.0.0.5", &mut config);
        add_connector("site-0", &connector, "10.0.0.6", &mut config);
        add_listener("site-0", &listener, 1024, &mut config);

        assert_eq!(
            config.tcp_connectors.keys().collect::<Vec<_>>(),
            vec!["db@10.0.0.5", "db@10.0.0.6"]
        );
        let endpoint = &config.tcp_connectors["db@10.0.0.5"];
        assert_eq!(endpoint.host, "10.0.0.5");
        assert_eq!(endpoint.port, "5432");
        assert_eq!(endpoint.address, "db-key");
        assert_eq!(endpoint.site_id, "site-0");

        let endpoint = &config.tcp_listeners["web"];
        assert_eq!(endpoint.host, "0.0.0.0");
        assert_eq!(endpoint.port, "1024");
        assert_eq!(endpoint.address, "web-key");
    }
}
