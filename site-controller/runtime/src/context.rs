use crate::expose::Exposure;
use futures::prelude::*;
use kube::runtime::WatchStreamExt;
use site_controller_core::ExposedPortSet;
use site_controller_k8s_api::{self as k8s, watcher, Connector, Pod, ResourceExt};
use site_controller_k8s_index::{BindingContext, SiteEvent, TargetSelection};
use tokio::sync::mpsc;

/// Binds the site's adaptor to the cluster: pod selections are backed by label-selector watches
/// and exposures are handed to the Service controller.
pub struct KubeContext {
    client: k8s::Client,
    namespace: String,
    events: mpsc::UnboundedSender<SiteEvent>,
    exposures: mpsc::UnboundedSender<Exposure>,
    generation: u64,
}

impl KubeContext {
    pub fn new(
        client: k8s::Client,
        namespace: impl ToString,
        events: mpsc::UnboundedSender<SiteEvent>,
        exposures: mpsc::UnboundedSender<Exposure>,
    ) -> Self {
        Self {
            client,
            namespace: namespace.to_string(),
            events,
            exposures,
            generation: 0,
        }
    }

    fn send(&self, exposure: Exposure) {
        if self.exposures.send(exposure).is_err() {
            tracing::warn!("Service controller stopped");
        }
    }
}

impl BindingContext for KubeContext {
    fn select(&mut self, connector: &Connector) -> TargetSelection {
        self.generation += 1;
        let namespace = connector
            .namespace()
            .unwrap_or_else(|| self.namespace.clone());
        let config =
            watcher::Config::default().labels(connector.spec.selector().unwrap_or_default());
        let pods = watcher(k8s::Api::<Pod>::namespaced(self.client.clone(), &namespace), config)
            .default_backoff()
            .filter_map(|event| {
                future::ready(match event {
                    Ok(event) => Some(event),
                    Err(error) => {
                        tracing::warn!(%error, "Pod watch failed");
                        None
                    }
                })
            });
        TargetSelection::spawn(connector, self.generation, self.events.clone(), pods)
    }

    fn expose(&mut self, ports: &ExposedPortSet) {
        self.send(Exposure::Expose(ports.clone()));
    }

    fn unexpose(&mut self, host: &str) {
        self.send(Exposure::Unexpose(host.to_string()));
    }
}
