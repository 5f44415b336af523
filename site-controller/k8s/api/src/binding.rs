use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use site_controller_core::{Error, Protocol};

/// Binds a routing key to local workloads, reached either at a fixed host or at each pod matched by
/// a label selector.
#[derive(Clone, Debug, PartialEq, Eq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "skupper.io",
    version = "v1alpha1",
    kind = "Connector",
    status = "BindingStatus",
    derive = "PartialEq",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorSpec {
    pub routing_key: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,

    pub port: u16,

    /// Selects pods that are running but not yet ready.
    #[serde(default)]
    pub include_not_ready: bool,

    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_credentials: Option<String>,
}

/// Publishes a routing key on a host and port within the site.
#[derive(Clone, Debug, PartialEq, Eq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "skupper.io",
    version = "v1alpha1",
    kind = "Listener",
    status = "BindingStatus",
    derive = "PartialEq",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ListenerSpec {
    pub routing_key: String,
    pub host: String,
    pub port: u16,

    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_credentials: Option<String>,
}

/// The outcome of the last reconciliation of a binding.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct BindingStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

// === impl ConnectorSpec ===

impl ConnectorSpec {
    /// The fixed host to connect to, if one is set.
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref().filter(|h| !h.is_empty())
    }

    /// The label selector identifying target pods, if one is set.
    pub fn selector(&self) -> Option<&str> {
        self.selector.as_deref().filter(|s| !s.is_empty())
    }
}

// === impl Listener ===

impl Listener {
    /// The protocol the listener's port is published with. Anything other than UDP is carried
    /// over TCP.
    pub fn protocol(&self) -> Protocol {
        self.spec
            .type_
            .as_deref()
            .and_then(|t| t.parse().ok())
            .unwrap_or_default()
    }
}

// === impl BindingStatus ===

impl BindingStatus {
    pub const OK: &'static str = "Ok";

    pub fn ok() -> Self {
        Self {
            status: Some(Self::OK.to_string()),
        }
    }

    pub fn from_error(error: Option<&Error>) -> Self {
        match error {
            None => Self::ok(),
            Some(error) => Self {
                status: Some(error.to_string()),
            },
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status.as_deref() == Some(Self::OK)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_fields_are_unset() {
        let spec = ConnectorSpec {
            routing_key: "db".to_string(),
            host: Some(String::new()),
            selector: Some(String::new()),
            port: 5432,
            include_not_ready: false,
            type_: None,
            tls_credentials: None,
        };
        assert_eq!(spec.host(), None);
        assert_eq!(spec.selector(), None);
    }

    #[test]
    fn connector_spec_from_json() {
        let spec: ConnectorSpec = serde_json::from_value(serde_json::json!({
            "routingKey": "db",
            "selector": "app=db",
            "port": 5432,
            "includeNotReady": true,
            "type": "tcp",
        }))
        .unwrap();
        assert_eq!(spec.selector(), Some("app=db"));
        assert_eq!(spec.host(), None);
        assert!(spec.include_not_ready);
        assert_eq!(spec.type_.as_deref(), Some("tcp"));
    }

    #[test]
    fn listener_protocol() {
        let mut listener = Listener::new(
            "web",
            ListenerSpec {
                routing_key: "web".to_string(),
                host: "web".to_string(),
                port: 8080,
                type_: None,
                tls_credentials: None,
            },
        );
        assert_eq!(listener.protocol(), Protocol::Tcp);
        listener.spec.type_ = Some("udp".to_string());
        assert_eq!(listener.protocol(), Protocol::Udp);
        listener.spec.type_ = Some("http".to_string());
        assert_eq!(listener.protocol(), Protocol::Tcp);
    }

    #[test]
    fn status_messages() {
        assert!(BindingStatus::from_error(None).is_ok());
        assert_eq!(
            BindingStatus::from_error(Some(&Error::NoMatchingEndpoints)).status,
            Some("No matches for selector".to_string())
        );
    }
}
