use crate::{HostsUpdate, PodWatcher, PodWatchingContext, SiteEvent};
use futures::prelude::*;
use site_controller_k8s_api::{watcher, Connector, Pod, ResourceExt};
use tokio::sync::mpsc;

/// Tracks the pods selected for a connector.
///
/// A selection is owned by the site's event loop. Its pod watch runs on a separate task and reports
/// hosts through a [`SelectionHandle`], tagged with the selection's generation so that reports from
/// a watch that has since been replaced can be recognized and dropped.
#[derive(Debug)]
pub struct TargetSelection {
    id: String,
    generation: u64,
    include_not_ready: bool,
    connector: Connector,
    hosts: Vec<String>,
    watcher: PodWatcher,
}

/// The watch-side half of a [`TargetSelection`]: reports selected hosts onto the site's event
/// queue.
#[derive(Clone, Debug)]
pub struct SelectionHandle {
    id: String,
    connector: String,
    selector: String,
    include_not_ready: bool,
    generation: u64,
    events: mpsc::UnboundedSender<SiteEvent>,
}

fn selection_id(connector: &Connector) -> String {
    format!(
        "Connector {}/{}",
        connector.name_any(),
        connector.namespace().unwrap_or_default()
    )
}

// === impl TargetSelection ===

impl TargetSelection {
    /// Starts watching `pods` on behalf of `connector`.
    ///
    /// `pods` should yield the pods matching the connector's selector in the connector's namespace.
    pub fn spawn<S>(
        connector: &Connector,
        generation: u64,
        events: mpsc::UnboundedSender<SiteEvent>,
        pods: S,
    ) -> Self
    where
        S: Stream<Item = watcher::Event<Pod>> + Send + 'static,
    {
        let handle = SelectionHandle::new(connector, generation, events);
        Self {
            id: handle.id.clone(),
            generation,
            include_not_ready: handle.include_not_ready,
            connector: connector.clone(),
            hosts: Vec::new(),
            watcher: PodWatcher::spawn(handle, pods),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// The selector the pod watch was started with.
    pub fn selector(&self) -> &str {
        self.connector.spec.selector().unwrap_or_default()
    }

    /// Whether the pod watch selects unready pods.
    ///
    /// This is fixed when the watch starts: a later change to the connector's `includeNotReady` that
    /// doesn't also change its selector does not affect an existing selection.
    pub fn include_not_ready(&self) -> bool {
        self.include_not_ready
    }

    /// The most recently reported set of selected hosts.
    pub fn list(&self) -> &[String] {
        &self.hosts
    }

    pub fn connector(&self) -> &Connector {
        &self.connector
    }

    /// Records a new version of the connector whose selector is unchanged.
    pub(crate) fn set_connector(&mut self, connector: Connector) {
        debug_assert_eq!(connector.spec.selector(), Some(self.selector()));
        self.connector = connector;
    }

    pub(crate) fn set_hosts(&mut self, hosts: Vec<String>) {
        self.hosts = hosts;
    }

    /// Stops the pod watch.
    pub fn close(self) {
        tracing::debug!(id = %self.id, generation = self.generation, "Stopping pod watch");
        self.watcher.close();
    }
}

// === impl SelectionHandle ===

impl SelectionHandle {
    fn new(connector: &Connector, generation: u64, events: mpsc::UnboundedSender<SiteEvent>) -> Self {
        Self {
            id: selection_id(connector),
            connector: connector.name_any(),
            selector: connector.spec.selector().unwrap_or_default().to_string(),
            include_not_ready: connector.spec.include_not_ready,
            generation,
            events,
        }
    }
}

impl PodWatchingContext for SelectionHandle {
    fn selector(&self) -> &str {
        &self.selector
    }

    fn include_not_ready(&self) -> bool {
        self.include_not_ready
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn updated(&self, hosts: Vec<String>) -> anyhow::Result<()> {
        self.events
            .send(SiteEvent::PodsUpdated(HostsUpdate {
                connector: self.connector.clone(),
                generation: self.generation,
                hosts,
            }))
            .map_err(|_| anyhow::anyhow!("site event queue closed"))
    }
}
