use crate::{BindingAdaptor, BindingContext, SiteMetrics};
use anyhow::{anyhow, Result};
use site_controller_core::{BridgeConfig, Error};
use site_controller_k8s_api::{BindingStatus, Connector, Listener, ResourceExt, Selector};
use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, trace, warn};

/// An event on the site's single ordered queue.
#[derive(Clone, Debug, PartialEq)]
pub enum SiteEvent {
    ConnectorApplied(Connector),
    ConnectorDeleted(String),
    ListenerApplied(Listener),
    ListenerDeleted(String),
    PodsUpdated(HostsUpdate),

    /// The connector watch has listed every connector.
    ConnectorsSynced,

    /// The listener watch has listed every listener.
    ListenersSynced,

    /// The router configuration controller wrote the latest bridge configuration.
    RouterConfigApplied,

    /// The router configuration controller failed to write the latest bridge configuration.
    RouterConfigFailed(String),
}

/// The hosts selected by a connector's pod watch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostsUpdate {
    pub connector: String,

    /// The generation of the selection whose pod watch produced the update.
    pub generation: u64,

    /// Sorted pod IPs.
    pub hosts: Vec<String>,
}

/// Writes the site's results back to the cluster.
pub trait SiteClient {
    fn update_bridge_config(&mut self, config: &BridgeConfig) -> Result<()>;

    fn update_connector_status(&mut self, connector: &Connector, status: BindingStatus)
        -> Result<()>;

    fn update_listener_status(&mut self, listener: &Listener, status: BindingStatus) -> Result<()>;
}

/// Drives a [`BindingAdaptor`] from the site's event queue.
///
/// The site holds the latest version of every connector and listener. Whenever the adaptor reports
/// that the router configuration may have changed, the bridge configuration is regenerated from all
/// of them and pushed to the router if it differs from the last push. The outcome is then reported
/// on the binding's status.
///
/// Nothing is pushed until both binding watches have synced, since a configuration generated from
/// a partial listing would drop the router's existing connectors and listeners.
#[derive(Debug)]
pub struct Site<C, S> {
    id: String,
    bindings: BindingAdaptor<C>,
    client: S,
    connectors: BTreeMap<String, Connector>,
    listeners: BTreeMap<String, Listener>,
    connectors_synced: bool,
    listeners_synced: bool,
    pushed: Option<BridgeConfig>,

    /// The last error reported by the router configuration controller, until a write succeeds.
    push_error: Option<String>,
    metrics: SiteMetrics,
}

// === impl SiteEvent ===

impl SiteEvent {
    fn kind(&self) -> &'static str {
        match self {
            Self::ConnectorApplied(_) => "connector_applied",
            Self::ConnectorDeleted(_) => "connector_deleted",
            Self::ListenerApplied(_) => "listener_applied",
            Self::ListenerDeleted(_) => "listener_deleted",
            Self::PodsUpdated(_) => "pods_updated",
            Self::ConnectorsSynced => "connectors_synced",
            Self::ListenersSynced => "listeners_synced",
            Self::RouterConfigApplied => "router_config_applied",
            Self::RouterConfigFailed(_) => "router_config_failed",
        }
    }
}

// === impl Site ===

impl<C: BindingContext, S: SiteClient> Site<C, S> {
    pub fn new(
        id: impl ToString,
        bindings: BindingAdaptor<C>,
        client: S,
        metrics: SiteMetrics,
    ) -> Self {
        Self {
            id: id.to_string(),
            bindings,
            client,
            connectors: BTreeMap::new(),
            listeners: BTreeMap::new(),
            connectors_synced: false,
            listeners_synced: false,
            pushed: None,
            push_error: None,
            metrics,
        }
    }

    /// Processes events until every sender has been dropped, then stops all pod watches.
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<SiteEvent>) {
        info!(site = %self.id, "Processing binding events");
        while let Some(event) = events.recv().await {
            if let Err(error) = self.handle(event) {
                warn!(%error, "Failed to process event");
            }
        }
        debug!("Event queue closed");
        self.bindings.cleanup();
    }

    #[instrument(skip_all, fields(event = event.kind()))]
    pub fn handle(&mut self, event: SiteEvent) -> Result<()> {
        self.metrics.event(event.kind());
        let result = match event {
            SiteEvent::ConnectorApplied(connector) => self.apply_connector(connector),
            SiteEvent::ConnectorDeleted(name) => self.delete_connector(&name),
            SiteEvent::ListenerApplied(listener) => self.apply_listener(listener),
            SiteEvent::ListenerDeleted(name) => self.delete_listener(&name),
            SiteEvent::PodsUpdated(update) => self.update_hosts(update),
            SiteEvent::ConnectorsSynced => {
                self.connectors_synced = true;
                self.synced()
            }
            SiteEvent::ListenersSynced => {
                self.listeners_synced = true;
                self.synced()
            }
            SiteEvent::RouterConfigApplied => self.router_config_applied(),
            SiteEvent::RouterConfigFailed(error) => self.router_config_failed(error),
        };
        self.metrics
            .set_sizes(self.bindings.selections_len(), self.bindings.allocated_ports());
        result
    }

    /// Generates the bridge configuration for every known binding.
    pub fn bridge_config(&self) -> BridgeConfig {
        let mut config = BridgeConfig::default();
        for connector in self.connectors.values() {
            self.bindings
                .update_bridge_config_for_connector(&self.id, connector, &mut config);
        }
        for listener in self.listeners.values() {
            self.bindings
                .update_bridge_config_for_listener(&self.id, listener, &mut config);
        }
        config
    }

    pub fn bindings(&self) -> &BindingAdaptor<C> {
        &self.bindings
    }

    pub fn client(&self) -> &S {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut S {
        &mut self.client
    }

    fn apply_connector(&mut self, connector: Connector) -> Result<()> {
        let name = connector.name_any();
        let spec_changed = self
            .connectors
            .get(&name)
            .map_or(true, |c| c.spec != connector.spec);
        self.connectors.insert(name.clone(), connector.clone());

        if !self.bindings.connector_updated(&connector, spec_changed) {
            trace!(connector = %name, "Router configuration unaffected");
            return Ok(());
        }
        let updated = self.update_router_config();
        self.report_connector(&connector, updated)
    }

    fn delete_connector(&mut self, name: &str) -> Result<()> {
        let Some(connector) = self.connectors.remove(name) else {
            debug!(connector = %name, "Unknown connector deleted");
            return Ok(());
        };
        self.bindings.connector_deleted(&connector);
        self.update_router_config()
    }

    fn apply_listener(&mut self, listener: Listener) -> Result<()> {
        let name = listener.name_any();
        if let Some(previous) = self.listeners.insert(name, listener.clone()) {
            if previous.spec.host != listener.spec.host {
                debug!(from = %previous.spec.host, to = %listener.spec.host, "Listener host changed");
                self.bindings.unexpose_listener(&previous);
            }
        }
        self.bindings.listener_updated(&listener);
        let updated = self.update_router_config();
        self.report_listener(&listener, updated)
    }

    fn delete_listener(&mut self, name: &str) -> Result<()> {
        let Some(listener) = self.listeners.remove(name) else {
            debug!(listener = %name, "Unknown listener deleted");
            return Ok(());
        };
        self.bindings.listener_deleted(&listener);
        self.update_router_config()
    }

    fn update_hosts(&mut self, update: HostsUpdate) -> Result<()> {
        let Some(connector) = self.bindings.hosts_updated(update) else {
            self.metrics.host_update(false);
            return Ok(());
        };
        self.metrics.host_update(true);

        let connector = self
            .connectors
            .get(&connector.name_any())
            .cloned()
            .unwrap_or(connector);
        let updated = self.update_router_config();
        self.report_connector(&connector, updated)
    }

    fn is_synced(&self) -> bool {
        self.connectors_synced && self.listeners_synced
    }

    /// Pushes the first bridge configuration once both binding watches have synced, releasing
    /// recovered ports whose listeners were removed while the controller was down.
    fn synced(&mut self) -> Result<()> {
        if !self.is_synced() {
            return Ok(());
        }
        info!(
            connectors = self.connectors.len(),
            listeners = self.listeners.len(),
            "Bindings synced"
        );
        self.bindings
            .release_unused_ports(self.listeners.keys().map(String::as_str));
        self.update_router_config()
    }

    fn router_config_applied(&mut self) -> Result<()> {
        if self.push_error.take().is_none() {
            return Ok(());
        }
        info!("Router configuration updated");
        self.report_all()
    }

    /// Reports a failed write on every binding. The configuration is pushed again on the next
    /// change.
    fn router_config_failed(&mut self, error: String) -> Result<()> {
        warn!(%error, "Router configuration was not updated");
        self.pushed = None;
        if self.push_error.as_ref() == Some(&error) {
            return Ok(());
        }
        self.push_error = Some(error);
        self.report_all()
    }

    /// Regenerates the bridge configuration, pushing it only when it has changed.
    fn update_router_config(&mut self) -> Result<()> {
        if !self.is_synced() {
            trace!("Waiting for bindings to sync");
            return Ok(());
        }
        let config = self.bridge_config();
        if self.pushed.as_ref() == Some(&config) {
            trace!("Bridge configuration unchanged");
            return Ok(());
        }
        self.client.update_bridge_config(&config)?;
        debug!(
            listeners = config.tcp_listeners.len(),
            connectors = config.tcp_connectors.len(),
            "Updated bridge configuration"
        );
        self.metrics.bridge_config_updated();
        self.pushed = Some(config);
        Ok(())
    }

    /// The error from the last router configuration write, if it failed.
    fn push_result(&self) -> Result<()> {
        match &self.push_error {
            Some(error) => Err(anyhow!("{error}")),
            None => Ok(()),
        }
    }

    fn report_all(&mut self) -> Result<()> {
        let connectors = self.connectors.values().cloned().collect::<Vec<_>>();
        for connector in &connectors {
            self.report_connector(connector, Ok(()))?;
        }
        let listeners = self.listeners.values().cloned().collect::<Vec<_>>();
        for listener in &listeners {
            self.report_listener(listener, Ok(()))?;
        }
        Ok(())
    }

    /// Reports a connector's status unless it already holds it.
    fn report_connector(&mut self, connector: &Connector, updated: Result<()>) -> Result<()> {
        let status = match updated.and_then(|()| self.push_result()) {
            Ok(()) => BindingStatus::from_error(self.connector_error(connector).as_ref()),
            Err(error) => status_from(error),
        };
        let name = connector.name_any();
        let current = self.connectors.get(&name).unwrap_or(connector);
        if current.status.as_ref() == Some(&status) {
            return Ok(());
        }
        self.client
            .update_connector_status(connector, status.clone())?;
        if let Some(connector) = self.connectors.get_mut(&name) {
            connector.status = Some(status);
        }
        Ok(())
    }

    fn report_listener(&mut self, listener: &Listener, updated: Result<()>) -> Result<()> {
        let status = match updated.and_then(|()| self.push_result()) {
            Ok(()) => BindingStatus::from_error(self.listener_error(listener).as_ref()),
            Err(error) => status_from(error),
        };
        let name = listener.name_any();
        let current = self.listeners.get(&name).unwrap_or(listener);
        if current.status.as_ref() == Some(&status) {
            return Ok(());
        }
        self.client.update_listener_status(listener, status.clone())?;
        if let Some(listener) = self.listeners.get_mut(&name) {
            listener.status = Some(status);
        }
        Ok(())
    }

    fn listener_error(&self, listener: &Listener) -> Option<Error> {
        if listener.spec.host.is_empty() {
            return Some(Error::InvalidBindingSpec(
                "listener host must be set".to_string(),
            ));
        }
        self.bindings.listener_port(&listener.name_any()).err()
    }

    fn connector_error(&self, connector: &Connector) -> Option<Error> {
        if connector.spec.host().is_some() {
            return None;
        }
        let Some(selector) = connector.spec.selector() else {
            return Some(Error::InvalidBindingSpec(
                "connector has neither host nor selector set".to_string(),
            ));
        };
        if let Err(error) = selector.parse::<Selector>() {
            return Some(Error::InvalidBindingSpec(error.to_string()));
        }
        match self.bindings.selection(&connector.name_any()) {
            Some(selection) if !selection.list().is_empty() => None,
            _ => Some(Error::NoMatchingEndpoints),
        }
    }
}

fn status_from(error: anyhow::Error) -> BindingStatus {
    BindingStatus {
        status: Some(format!("{error:#}")),
    }
}
