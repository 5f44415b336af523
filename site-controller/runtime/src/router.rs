use crate::retry::retry_on_conflict;
use anyhow::{Context, Result};
use site_controller_core::{BridgeConfig, Error, RouterConfig};
use site_controller_k8s_api::{self as k8s, ConfigMap};
use site_controller_k8s_index::SiteEvent;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Access to the ConfigMap holding the router's configuration.
#[async_trait::async_trait]
pub trait ConfigMapStore: Send + Sync {
    async fn get(&self) -> Result<ConfigMap>;

    /// Writes `config_map`, failing with a conflict if it was modified since it was read.
    async fn replace(&self, config_map: &ConfigMap) -> Result<()>;
}

/// Keeps the bridges in the router's persisted configuration up to date.
pub struct RouterConfigController<S> {
    store: S,
    key: String,
    attempts: usize,
}

pub struct KubeConfigMapStore {
    api: k8s::Api<ConfigMap>,
    name: String,
}

// === impl RouterConfigController ===

impl<S: ConfigMapStore> RouterConfigController<S> {
    pub fn new(store: S, key: impl ToString, attempts: usize) -> Self {
        Self {
            store,
            key: key.to_string(),
            attempts,
        }
    }

    /// Reads the bridges last written to the router's configuration.
    pub async fn load_bridges(&self) -> Result<BridgeConfig> {
        let config_map = self.store.get().await?;
        Ok(self.router_config(&config_map)?.bridges)
    }

    /// Replaces the bridges in the router's configuration, leaving all other entities as they are.
    ///
    /// Returns false if the configuration already held these bridges.
    pub async fn update_bridges(&self, bridges: &BridgeConfig) -> Result<bool> {
        retry_on_conflict(self.attempts, move || async move {
            let mut config_map = self.store.get().await?;
            let mut config = self.router_config(&config_map)?;
            if !config.replace_bridges(bridges.clone()) {
                return Ok(false);
            }
            config_map
                .data
                .get_or_insert_with(Default::default)
                .insert(self.key.clone(), config.to_json()?);
            self.store.replace(&config_map).await?;
            Ok(true)
        })
        .await
        .context("Failed to update router configuration")
    }

    /// Writes each new bridge configuration published on `bridges`, reporting the outcome of each
    /// write on the site's event queue.
    ///
    /// Configurations published while a write is in progress coalesce: only the latest is written.
    pub async fn run(
        self,
        mut bridges: watch::Receiver<BridgeConfig>,
        events: mpsc::UnboundedSender<SiteEvent>,
    ) {
        while bridges.changed().await.is_ok() {
            let config = bridges.borrow_and_update().clone();
            let outcome = match self.update_bridges(&config).await {
                Ok(updated) => {
                    if updated {
                        info!(
                            listeners = config.tcp_listeners.len(),
                            connectors = config.tcp_connectors.len(),
                            "Updated router configuration"
                        );
                    } else {
                        debug!("Router configuration already current");
                    }
                    SiteEvent::RouterConfigApplied
                }
                Err(error) => {
                    let error = format!("{error:#}");
                    warn!(%error, "Failed to update router configuration");
                    SiteEvent::RouterConfigFailed(error)
                }
            };
            if events.send(outcome).is_err() {
                debug!("Site event queue closed");
                return;
            }
        }
        debug!("Bridge configuration updates closed");
    }

    fn router_config(&self, config_map: &ConfigMap) -> Result<RouterConfig> {
        let json = config_map
            .data
            .as_ref()
            .and_then(|data| data.get(&self.key))
            .ok_or_else(|| Error::MissingConfigKey(self.key.clone()))?;
        Ok(RouterConfig::from_json(json)?)
    }
}

// === impl KubeConfigMapStore ===

impl KubeConfigMapStore {
    pub fn new(client: k8s::Client, namespace: &str, name: impl ToString) -> Self {
        Self {
            api: k8s::Api::namespaced(client, namespace),
            name: name.to_string(),
        }
    }
}

#[async_trait::async_trait]
impl ConfigMapStore for KubeConfigMapStore {
    async fn get(&self) -> Result<ConfigMap> {
        Ok(self.api.get(&self.name).await?)
    }

    async fn replace(&self, config_map: &ConfigMap) -> Result<()> {
        self.api
            .replace(&self.name, &k8s::PostParams::default(), config_map)
            .await?;
        Ok(())
    }
}
