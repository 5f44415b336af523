use anyhow::{anyhow, Result};
use site_controller_core::BridgeConfig;
use site_controller_k8s_api::{BindingStatus, Connector, Listener};
use site_controller_k8s_index::SiteClient;
use site_controller_k8s_status::Update;
use tokio::sync::{mpsc, watch};

/// Hands the site's outputs to the controllers that write them to the cluster.
///
/// Bridge configurations are published on a latest-value channel, so a configuration superseded
/// before the router controller picks it up is never written. Status updates are queued in order.
#[derive(Debug)]
pub struct KubeSiteClient {
    bridges: watch::Sender<BridgeConfig>,
    statuses: mpsc::UnboundedSender<Update>,
}

impl KubeSiteClient {
    pub fn new(bridges: watch::Sender<BridgeConfig>, statuses: mpsc::UnboundedSender<Update>) -> Self {
        Self { bridges, statuses }
    }

    fn send_status(&self, update: Update) -> Result<()> {
        self.statuses
            .send(update)
            .map_err(|_| anyhow!("status controller stopped"))
    }
}

impl SiteClient for KubeSiteClient {
    fn update_bridge_config(&mut self, config: &BridgeConfig) -> Result<()> {
        self.bridges
            .send(config.clone())
            .map_err(|_| anyhow!("router configuration controller stopped"))
    }

    fn update_connector_status(&mut self, connector: &Connector, status: BindingStatus) -> Result<()> {
        self.send_status(Update::connector(connector, status))
    }

    fn update_listener_status(&mut self, listener: &Listener, status: BindingStatus) -> Result<()> {
        self.send_status(Update::listener(listener, status))
    }
}
