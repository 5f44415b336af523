use crate::{bridge, HostsUpdate, TargetSelection};
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use site_controller_core::{
    BridgeConfig, Error, ExposedPortSet, ExposedPorts, Port, PortMapping, PortRange, Unexposed,
};
use site_controller_k8s_api::{Connector, Listener, ResourceExt};
use std::collections::hash_map::Entry;
use tracing::{debug, error, trace, warn};

/// The adaptor's view of the cluster.
///
/// Implementations start pod watches and publish listener hosts. Calls are made from the site's
/// event loop and must not block it.
pub trait BindingContext {
    /// Starts a pod watch for a connector with a selector.
    fn select(&mut self, connector: &Connector) -> TargetSelection;

    /// Publishes a host with all of the ports currently exposed on it.
    fn expose(&mut self, ports: &ExposedPortSet);

    /// Withdraws a host.
    fn unexpose(&mut self, host: &str);
}

/// Maintains the state derived from a site's connectors and listeners: a pod selection per
/// selector-based connector, a router port per listener and the set of exposed listener hosts.
///
/// The adaptor is owned by a single task and is never shared.
#[derive(Debug)]
pub struct BindingAdaptor<C> {
    context: C,
    selectors: HashMap<String, TargetSelection>,
    mapping: PortMapping,
    exposed: ExposedPorts,
}

// === impl BindingAdaptor ===

impl<C: BindingContext> BindingAdaptor<C> {
    /// Creates an adaptor, recovering listener port allocations from the last bridge configuration
    /// pushed to the router.
    pub fn new(context: C, range: PortRange, config: Option<&BridgeConfig>) -> Self {
        Self {
            context,
            selectors: HashMap::default(),
            mapping: PortMapping::recover(range, config),
            exposed: ExposedPorts::default(),
        }
    }

    /// Reconciles a connector's pod selection.
    ///
    /// Returns true if the router configuration must be regenerated now. When a new selection is
    /// started the configuration is regenerated later, once the selection reports its hosts.
    pub fn connector_updated(&mut self, connector: &Connector, spec_changed: bool) -> bool {
        let name = connector.name_any();
        let selector = connector.spec.selector();

        if !spec_changed {
            if selector.is_some() {
                match self.selectors.entry(name) {
                    Entry::Occupied(mut entry) => entry.get_mut().set_connector(connector.clone()),
                    Entry::Vacant(entry) => {
                        warn!(
                            connector = %entry.key(),
                            "Connector has a selector but its pods are not tracked"
                        );
                        entry.insert(self.context.select(connector));
                    }
                }
            }
            return false;
        }

        match self.selectors.entry(name.clone()) {
            Entry::Occupied(mut entry) => {
                if Some(entry.get().selector()) == selector {
                    // The pod watch is unaffected, but the connector's other settings may have
                    // changed.
                    entry.get_mut().set_connector(connector.clone());
                    return true;
                }
                debug!(connector = %name, "Selector changed");
                entry.remove().close();
            }
            Entry::Vacant(_) => {}
        }

        let Some(selector) = selector else {
            return true;
        };
        debug!(connector = %name, %selector, "Selecting pods");
        let selection = self.context.select(connector);
        self.selectors.insert(name, selection);
        false
    }

    pub fn connector_deleted(&mut self, connector: &Connector) {
        if let Some(selection) = self.selectors.remove(&connector.name_any()) {
            selection.close();
        }
    }

    /// Ensures the listener holds a router port and that its host is exposed on it.
    ///
    /// A listener without a host can't be exposed, so it holds no port.
    pub fn listener_updated(&mut self, listener: &Listener) {
        let name = listener.name_any();
        if listener.spec.host.is_empty() {
            warn!(listener = %name, "Listener has no host");
            self.mapping.release_port_for_key(&name);
            return;
        }
        let target_port = match self.mapping.get_port_for_key(&name) {
            Ok(port) => port,
            Err(error) => {
                warn!(listener = %name, %error, "Unable to allocate router port");
                return;
            }
        };

        let port = Port {
            name,
            port: listener.spec.port,
            target_port,
            protocol: listener.protocol(),
        };
        if let Some(exposed) = self.exposed.expose(&listener.spec.host, port) {
            self.context.expose(exposed);
        }
    }

    pub fn listener_deleted(&mut self, listener: &Listener) {
        self.unexpose_listener(listener);
        self.mapping.release_port_for_key(&listener.name_any());
    }

    /// Withdraws the listener's port from its host, keeping the router port it holds.
    ///
    /// The host stays exposed while other listeners share it.
    pub fn unexpose_listener(&mut self, listener: &Listener) {
        let host = &listener.spec.host;
        match self.exposed.unexpose(host, &listener.name_any()) {
            Some(Unexposed::Host) => self.context.unexpose(host),
            Some(Unexposed::Ports(remaining)) => self.context.expose(remaining),
            None => {}
        }
    }

    /// Releases recovered router ports whose listeners no longer exist.
    ///
    /// Called once the listener watch has listed every listener.
    pub fn release_unused_ports<'l>(&mut self, listeners: impl IntoIterator<Item = &'l str>) {
        let live = listeners.into_iter().collect::<HashSet<_>>();
        let unused = self
            .mapping
            .iter()
            .filter(|(key, _)| !live.contains(key))
            .map(|(key, _)| key.to_string())
            .collect::<Vec<_>>();
        for key in unused {
            debug!(listener = %key, "Releasing port of a removed listener");
            self.mapping.release_port_for_key(&key);
        }
    }

    /// Records the hosts reported by a pod watch.
    ///
    /// Returns the selection's connector if the report came from its current pod watch. Reports
    /// from watches that have since been stopped or replaced are dropped.
    pub fn hosts_updated(&mut self, update: HostsUpdate) -> Option<Connector> {
        let Some(selection) = self.selectors.get_mut(&update.connector) else {
            debug!(connector = %update.connector, "Dropping hosts for an untracked connector");
            return None;
        };
        if selection.generation() != update.generation {
            debug!(
                connector = %update.connector,
                generation = update.generation,
                current = selection.generation(),
                "Dropping hosts from a stale pod watch"
            );
            return None;
        }
        selection.set_hosts(update.hosts);
        Some(selection.connector().clone())
    }

    /// Adds the router connectors for `connector` to `config`: one for a fixed host or one for each
    /// selected pod.
    pub fn update_bridge_config_for_connector(
        &self,
        site_id: &str,
        connector: &Connector,
        config: &mut BridgeConfig,
    ) {
        let name = connector.name_any();
        if let Some(host) = connector.spec.host() {
            bridge::add_connector(site_id, connector, host, config);
        } else if connector.spec.selector().is_some() {
            match self.selectors.get(&name) {
                Some(selection) => {
                    for host in selection.list() {
                        bridge::add_connector(site_id, connector, host, config);
                    }
                }
                None => error!(connector = %name, "Not tracking pods for connector with a selector"),
            }
        } else {
            error!(connector = %name, "Connector has neither host nor selector set");
        }
    }

    /// Adds the router listener for `listener` to `config` if it holds a router port.
    pub fn update_bridge_config_for_listener(
        &self,
        site_id: &str,
        listener: &Listener,
        config: &mut BridgeConfig,
    ) {
        let name = listener.name_any();
        if listener.spec.host.is_empty() {
            trace!(listener = %name, "Listener has no host");
            return;
        }
        match self.mapping.port_for_key(&name) {
            Some(port) => bridge::add_listener(site_id, listener, port, config),
            None => error!(listener = %name, "Listener has no router port"),
        }
    }

    /// The router port held by the named listener.
    pub fn listener_port(&self, name: &str) -> Result<u16, Error> {
        self.mapping
            .port_for_key(name)
            .ok_or(Error::PoolExhausted(self.mapping.range()))
    }

    pub fn selection(&self, connector: &str) -> Option<&TargetSelection> {
        self.selectors.get(connector)
    }

    pub fn selections_len(&self) -> usize {
        self.selectors.len()
    }

    pub fn allocated_ports(&self) -> usize {
        self.mapping.len()
    }

    #[cfg(test)]
    pub(crate) fn exposed(&self) -> &ExposedPorts {
        &self.exposed
    }

    #[cfg(test)]
    pub(crate) fn context(&self) -> &C {
        &self.context
    }

    /// Stops every pod watch.
    pub fn cleanup(&mut self) {
        for (connector, selection) in self.selectors.drain() {
            debug!(%connector, "Closing selection");
            selection.close();
        }
    }
}
