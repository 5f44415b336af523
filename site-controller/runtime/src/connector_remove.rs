use crate::retry::retry_on_conflict;
use anyhow::{Context, Result};
use site_controller_core::{transport, Error};
use site_controller_k8s_api::{self as k8s, Deployment, Secret};

/// The router deployment environment variable that carries the router's transport configuration.
pub const TRANSPORT_CONFIG_ENV: &str = "QDROUTERD_CONF";

pub const DEFAULT_ROUTER_DEPLOYMENT: &str = "skupper-router";

#[derive(Clone, Debug)]
pub struct RemoveOptions {
    pub name: String,

    /// Rewrites the configuration even if no connector is named `name`, still removing the
    /// connector's secret and volume.
    pub force_current: bool,
}

/// Access to the router deployment and the secrets it mounts.
#[async_trait::async_trait]
pub trait RouterDeployment: Send + Sync {
    async fn get(&self) -> Result<Deployment>;

    /// Writes `deployment`, failing with a conflict if it was modified since it was read.
    async fn replace(&self, deployment: &Deployment) -> Result<()>;

    async fn delete_secret(&self, name: &str) -> Result<()>;
}

pub struct KubeRouterDeployment {
    deployments: k8s::Api<Deployment>,
    secrets: k8s::Api<Secret>,
    name: String,
}

/// Removes an inter-router connector from the router deployment.
///
/// The connector's stanza is dropped from the transport configuration and the secret volume
/// holding its credentials is unmounted. The whole read-modify-write is retried if the deployment
/// is concurrently modified.
pub async fn remove_connector<D: RouterDeployment>(
    router: &D,
    options: &RemoveOptions,
    attempts: usize,
) -> Result<()> {
    retry_on_conflict(attempts, move || async move {
        let mut deployment = router.get().await?;
        let Some(config) = transport_config(&deployment) else {
            return Err(Error::MissingConfigKey(TRANSPORT_CONFIG_ENV.to_string()).into());
        };

        let updated = match transport::remove_connector(config, &options.name)? {
            Some(updated) => updated,
            None if options.force_current => {
                transport::rewrite_connectors(config, &transport::list_connectors(config)?)?
            }
            None => {
                tracing::debug!(connector = %options.name, "Connector not configured");
                return Ok(());
            }
        };

        set_transport_config(&mut deployment, updated);
        remove_secret_volume(&mut deployment, &options.name);
        router.replace(&deployment).await?;
        router.delete_secret(&options.name).await?;
        tracing::info!(connector = %options.name, "Removed connector");
        Ok(())
    })
    .await
    .context("Failed to update router deployment")
}

fn transport_config(deployment: &Deployment) -> Option<&str> {
    deployment
        .spec
        .as_ref()?
        .template
        .spec
        .as_ref()?
        .containers
        .first()?
        .env
        .as_ref()?
        .iter()
        .find(|e| e.name == TRANSPORT_CONFIG_ENV)?
        .value
        .as_deref()
}

fn set_transport_config(deployment: &mut Deployment, config: String) {
    let env = deployment
        .spec
        .as_mut()
        .and_then(|spec| spec.template.spec.as_mut())
        .and_then(|spec| spec.containers.first_mut())
        .and_then(|container| container.env.as_mut())
        .and_then(|env| env.iter_mut().find(|e| e.name == TRANSPORT_CONFIG_ENV));
    if let Some(env) = env {
        env.value = Some(config);
    }
}

/// Drops the volume named `name` and the router container's mounts of it.
fn remove_secret_volume(deployment: &mut Deployment, name: &str) {
    let Some(spec) = deployment
        .spec
        .as_mut()
        .and_then(|spec| spec.template.spec.as_mut())
    else {
        return;
    };
    if let Some(volumes) = spec.volumes.as_mut() {
        volumes.retain(|v| v.name != name);
    }
    if let Some(mounts) = spec
        .containers
        .first_mut()
        .and_then(|c| c.volume_mounts.as_mut())
    {
        mounts.retain(|m| m.name != name);
    }
}

// === impl KubeRouterDeployment ===

impl KubeRouterDeployment {
    pub fn new(client: k8s::Client, namespace: &str, name: impl ToString) -> Self {
        Self {
            deployments: k8s::Api::namespaced(client.clone(), namespace),
            secrets: k8s::Api::namespaced(client, namespace),
            name: name.to_string(),
        }
    }
}

#[async_trait::async_trait]
impl RouterDeployment for KubeRouterDeployment {
    async fn get(&self) -> Result<Deployment> {
        Ok(self.deployments.get(&self.name).await?)
    }

    async fn replace(&self, deployment: &Deployment) -> Result<()> {
        self.deployments
            .replace(&self.name, &k8s::PostParams::default(), deployment)
            .await?;
        Ok(())
    }

    async fn delete_secret(&self, name: &str) -> Result<()> {
        match self.secrets.delete(name, &k8s::DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(error) if k8s::is_not_found(&error) => Ok(()),
            Err(error) => Err(error.into()),
        }
    }
}
