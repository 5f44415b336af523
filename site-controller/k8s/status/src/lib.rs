//! Writes binding statuses back to the cluster.
//!
//! The site reports statuses without waiting on the API server: each status is queued as an
//! [`Update`] and the [`Controller`] applies updates in order as merge patches of the resource's
//! `status` subresource. Patches that fail or time out are logged and counted; the next
//! reconciliation of the binding reports its status again.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

use anyhow::Result;
use prometheus_client::{metrics::counter::Counter, registry::Registry};
use site_controller_k8s_api::{self as k8s, BindingStatus, Connector, Listener, ResourceExt};
use std::time::Duration;
use tokio::{sync::mpsc, time};

#[cfg(test)]
mod tests;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Kind {
    Connector,
    Listener,
}

/// A status to write to a binding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Update {
    pub kind: Kind,
    pub namespace: String,
    pub name: String,
    pub status: BindingStatus,
}

/// Applies a status update to the cluster.
#[async_trait::async_trait]
pub trait PatchStatus: Send + Sync {
    async fn patch_status(&self, update: &Update) -> Result<()>;
}

pub struct Controller<P> {
    patcher: P,
    updates: mpsc::UnboundedReceiver<Update>,
    patch_timeout: Duration,
    metrics: ControllerMetrics,
}

#[derive(Clone, Debug, Default)]
pub struct ControllerMetrics {
    patch_succeeded: Counter,
    patch_failed: Counter,
    patch_timeout: Counter,
}

// === impl Update ===

impl Update {
    pub fn connector(connector: &Connector, status: BindingStatus) -> Self {
        Self {
            kind: Kind::Connector,
            namespace: connector.namespace().unwrap_or_default(),
            name: connector.name_any(),
            status,
        }
    }

    pub fn listener(listener: &Listener, status: BindingStatus) -> Self {
        Self {
            kind: Kind::Listener,
            namespace: listener.namespace().unwrap_or_default(),
            name: listener.name_any(),
            status,
        }
    }
}

// === impl Controller ===

impl<P: PatchStatus> Controller<P> {
    pub fn new(
        patcher: P,
        updates: mpsc::UnboundedReceiver<Update>,
        patch_timeout: Duration,
        metrics: ControllerMetrics,
    ) -> Self {
        Self {
            patcher,
            updates,
            patch_timeout,
            metrics,
        }
    }

    /// Applies updates until every sender has been dropped.
    pub async fn run(mut self) {
        while let Some(update) = self.updates.recv().await {
            self.patch(update).await;
        }
        tracing::debug!("Status updates closed");
    }

    async fn patch(&self, update: Update) {
        let Update {
            kind,
            namespace,
            name,
            status,
        } = &update;
        tracing::debug!(?kind, %namespace, %name, status = ?status.status, "Patching status");
        match time::timeout(self.patch_timeout, self.patcher.patch_status(&update)).await {
            Ok(Ok(())) => {
                self.metrics.patch_succeeded.inc();
            }
            Ok(Err(error)) => {
                self.metrics.patch_failed.inc();
                tracing::warn!(?kind, %namespace, %name, %error, "Failed to patch status");
            }
            Err(_) => {
                self.metrics.patch_timeout.inc();
                tracing::warn!(?kind, %namespace, %name, timeout = ?self.patch_timeout, "Patching status timed out");
            }
        };
    }
}

#[async_trait::async_trait]
impl PatchStatus for k8s::Client {
    async fn patch_status(&self, update: &Update) -> Result<()> {
        let patch = k8s::Patch::Merge(serde_json::json!({ "status": update.status }));
        let params = k8s::PatchParams::default();
        match update.kind {
            Kind::Connector => {
                k8s::Api::<Connector>::namespaced(self.clone(), &update.namespace)
                    .patch_status(&update.name, &params, &patch)
                    .await?;
            }
            Kind::Listener => {
                k8s::Api::<Listener>::namespaced(self.clone(), &update.namespace)
                    .patch_status(&update.name, &params, &patch)
                    .await?;
            }
        }
        Ok(())
    }
}

// === impl ControllerMetrics ===

impl ControllerMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let patch_succeeded = Counter::default();
        prom.register(
            "patch_succeeded",
            "Count of successful status patches",
            patch_succeeded.clone(),
        );

        let patch_failed = Counter::default();
        prom.register(
            "patch_failed",
            "Count of failed status patches",
            patch_failed.clone(),
        );

        let patch_timeout = Counter::default();
        prom.register(
            "patch_timeout",
            "Count of status patches that timed out",
            patch_timeout.clone(),
        );

        Self {
            patch_succeeded,
            patch_failed,
            patch_timeout,
        }
    }
}
