use anyhow::{bail, Result};
use site_controller_core::ExposedPortSet;
use site_controller_k8s_api::{
    self as k8s, IntOrString, ObjectMeta, Service, ServicePort, ServiceSpec,
};
use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const FIELD_MANAGER: &str = "skupper-site-controller";

/// A change to the Services that publish listener ports.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Exposure {
    Expose(ExposedPortSet),
    Unexpose(String),
}

/// Maintains a Service for each exposed host, routing its ports to the router pods.
pub struct ServiceController {
    api: k8s::Api<Service>,
    router_selector: BTreeMap<String, String>,
    exposures: mpsc::UnboundedReceiver<Exposure>,
}

/// Parses an equality-based label selector (e.g. `application=skupper-router`) into the label map
/// a Service selects pods with.
pub fn parse_router_selector(selector: &str) -> Result<BTreeMap<String, String>> {
    let mut labels = BTreeMap::new();
    for term in selector.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        let Some((key, value)) = term.split_once('=') else {
            bail!("router selector term {term:?} must be of the form key=value");
        };
        let (key, value) = (key.trim(), value.trim_start_matches('=').trim());
        if key.is_empty() || key.ends_with('!') {
            bail!("router selector term {term:?} must be of the form key=value");
        }
        labels.insert(key.to_string(), value.to_string());
    }
    if labels.is_empty() {
        bail!("router selector must not be empty");
    }
    Ok(labels)
}

/// Builds the Service that publishes `ports`.
pub fn service_for(ports: &ExposedPortSet, router_selector: &BTreeMap<String, String>) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(ports.host.clone()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(router_selector.clone()),
            ports: Some(
                ports
                    .ports
                    .values()
                    .map(|port| ServicePort {
                        name: Some(port.name.clone()),
                        port: port.port.into(),
                        target_port: Some(IntOrString::Int(port.target_port.into())),
                        protocol: Some(port.protocol.to_string()),
                        ..Default::default()
                    })
                    .collect(),
            ),
            ..Default::default()
        }),
        ..Default::default()
    }
}

// === impl ServiceController ===

impl ServiceController {
    pub fn new(
        client: k8s::Client,
        namespace: &str,
        router_selector: BTreeMap<String, String>,
        exposures: mpsc::UnboundedReceiver<Exposure>,
    ) -> Self {
        Self {
            api: k8s::Api::namespaced(client, namespace),
            router_selector,
            exposures,
        }
    }

    pub async fn run(mut self) {
        while let Some(exposure) = self.exposures.recv().await {
            let host = match &exposure {
                Exposure::Expose(ports) => ports.host.clone(),
                Exposure::Unexpose(host) => host.clone(),
            };
            if let Err(error) = self.apply(exposure).await {
                warn!(%host, %error, "Failed to update service");
            }
        }
        debug!("Exposure updates closed");
    }

    async fn apply(&self, exposure: Exposure) -> Result<()> {
        match exposure {
            Exposure::Expose(ports) => {
                let service = service_for(&ports, &self.router_selector);
                let params = k8s::PatchParams::apply(FIELD_MANAGER).force();
                self.api
                    .patch(&ports.host, &params, &k8s::Patch::Apply(&service))
                    .await?;
                info!(host = %ports.host, ports = ports.ports.len(), "Exposed");
            }
            Exposure::Unexpose(host) => {
                match self.api.delete(&host, &k8s::DeleteParams::default()).await {
                    Ok(_) => info!(%host, "Unexposed"),
                    Err(error) if k8s::is_not_found(&error) => debug!(%host, "Service already deleted"),
                    Err(error) => return Err(error.into()),
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::btreemap;
    use pretty_assertions::assert_eq;
    use site_controller_core::{Port, Protocol};

    #[test]
    fn parses_router_selector() {
        assert_eq!(
            parse_router_selector("application=skupper-router").unwrap(),
            btreemap! { "application".to_string() => "skupper-router".to_string() }
        );
        assert_eq!(
            parse_router_selector("a==b, c=d").unwrap(),
            btreemap! {
                "a".to_string() => "b".to_string(),
                "c".to_string() => "d".to_string(),
            }
        );
        assert!(parse_router_selector("").is_err());
        assert!(parse_router_selector("application").is_err());
        assert!(parse_router_selector("a!=b").is_err());
    }

    #[test]
    fn service_routes_ports_to_router() {
        let ports = ExposedPortSet {
            host: "backend".to_string(),
            ports: btreemap! {
                "api".to_string() => Port {
                    name: "api".to_string(),
                    port: 8080,
                    target_port: 1024,
                    protocol: Protocol::Tcp,
                },
                "metrics".to_string() => Port {
                    name: "metrics".to_string(),
                    port: 9090,
                    target_port: 1025,
                    protocol: Protocol::Tcp,
                },
            },
        };
        let selector = btreemap! { "application".to_string() => "skupper-router".to_string() };

        let service = service_for(&ports, &selector);
        assert_eq!(service.metadata.name.as_deref(), Some("backend"));
        let spec = service.spec.unwrap();
        assert_eq!(spec.selector, Some(selector));
        assert_eq!(
            spec.ports.unwrap(),
            vec![
                ServicePort {
                    name: Some("api".to_string()),
                    port: 8080,
                    target_port: Some(IntOrString::Int(1024)),
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                },
                ServicePort {
                    name: Some("metrics".to_string()),
                    port: 9090,
                    target_port: Some(IntOrString::Int(1025)),
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                },
            ]
        );
    }
}
