use ahash::AHashMap as HashMap;
use futures::prelude::*;
use site_controller_k8s_api::{pod, watcher, Labels, Pod, ResourceExt, Selector};
use tokio::sync::oneshot;
use tracing::{debug, info_span, trace, warn, Instrument};

/// The consumer of a pod watch.
///
/// A context describes which pods to watch and receives the host set each time it changes.
pub trait PodWatchingContext: Send + 'static {
    fn selector(&self) -> &str;

    fn include_not_ready(&self) -> bool;

    /// Identifies the watch in logs.
    fn id(&self) -> &str;

    /// Receives the complete, sorted set of selected pod IPs.
    ///
    /// An error indicates that the consumer has gone away and stops the watch.
    fn updated(&self, hosts: Vec<String>) -> anyhow::Result<()>;
}

/// A running pod watch.
///
/// The watch runs on its own task until it is closed. Closing consumes the watcher, so a watch can
/// only be stopped once; once the task observes the stop signal it reports nothing further.
#[derive(Debug)]
pub struct PodWatcher {
    stop: oneshot::Sender<()>,
}

/// Selects the IPs of the pods that may receive traffic.
///
/// A pod is selected when it is ready (or `include_not_ready` is set), running, not terminating and
/// has been assigned an IP.
pub fn select_hosts<'p>(
    pods: impl IntoIterator<Item = &'p Pod>,
    include_not_ready: bool,
    id: &str,
) -> Vec<String> {
    let mut hosts = Vec::new();
    for p in pods {
        let name = p.name_any();
        if !include_not_ready && !pod::is_ready(p) {
            trace!(pod = %name, %id, "Pod not ready");
            continue;
        }
        if !pod::is_running(p) || pod::is_terminating(p) {
            trace!(pod = %name, %id, "Pod not running");
            continue;
        }
        match pod::pod_ip(p) {
            Some(ip) => {
                debug!(pod = %name, %ip, %id, "Pod selected");
                hosts.push(ip.to_string());
            }
            None => trace!(pod = %name, %id, "Pod has no IP"),
        }
    }
    hosts
}

// === impl PodWatcher ===

impl PodWatcher {
    /// Spawns a task that consumes `pods`, reporting selected hosts to `context`.
    ///
    /// Host sets are reported only once a (re-)list has completed: the first complete result is
    /// always reported, even when empty, and subsequent results only when they differ from the last
    /// report.
    pub fn spawn<C, S>(context: C, pods: S) -> Self
    where
        C: PodWatchingContext,
        S: Stream<Item = watcher::Event<Pod>> + Send + 'static,
    {
        let (stop, stop_rx) = oneshot::channel();
        let span = info_span!("pods", id = %context.id());
        tokio::spawn(Self::run(context, pods, stop_rx).instrument(span));
        Self { stop }
    }

    pub fn close(self) {
        // The task may already have exited if the event queue closed.
        let _ = self.stop.send(());
    }

    async fn run<C, S>(context: C, pods: S, mut stop: oneshot::Receiver<()>)
    where
        C: PodWatchingContext,
        S: Stream<Item = watcher::Event<Pod>>,
    {
        // The API server filters by the selector; this only guards sources that don't.
        let selector = match context.selector().parse::<Selector>() {
            Ok(selector) => Some(selector),
            Err(error) => {
                warn!(%error, "Not filtering pods locally");
                None
            }
        };
        let matches = |pod: &Pod| {
            selector.as_ref().map_or(true, |s| {
                s.matches(&Labels::from(pod.metadata.labels.clone()))
            })
        };

        tokio::pin!(pods);
        let mut pods_by_name = HashMap::<String, Pod>::default();
        let mut relisting: Option<HashMap<String, Pod>> = None;
        let mut reported: Option<Vec<String>> = None;
        loop {
            let event = tokio::select! {
                biased;
                _ = &mut stop => {
                    debug!("Stopped");
                    return;
                }
                event = pods.next() => match event {
                    Some(event) => event,
                    None => {
                        debug!("Pod watch ended");
                        return;
                    }
                },
            };

            match event {
                watcher::Event::Init => {
                    trace!("Relisting pods");
                    relisting = Some(HashMap::default());
                    continue;
                }
                watcher::Event::InitApply(pod) => {
                    let store = relisting.as_mut().unwrap_or(&mut pods_by_name);
                    if matches(&pod) {
                        store.insert(pod.name_any(), pod);
                    }
                    if relisting.is_some() {
                        continue;
                    }
                }
                watcher::Event::InitDone => {
                    if let Some(pods) = relisting.take() {
                        pods_by_name = pods;
                    }
                }
                watcher::Event::Apply(pod) => {
                    let name = pod.name_any();
                    if matches(&pod) {
                        pods_by_name.insert(name, pod);
                    } else if pods_by_name.remove(&name).is_some() {
                        debug!(pod = %name, "Pod no longer matches selector");
                    }
                }
                watcher::Event::Delete(pod) => {
                    pods_by_name.remove(&pod.name_any());
                }
            }

            let mut hosts =
                select_hosts(pods_by_name.values(), context.include_not_ready(), context.id());
            hosts.sort();
            if reported.as_ref() == Some(&hosts) {
                trace!("Hosts unchanged");
                continue;
            }

            debug!(?hosts, "Hosts updated");
            if let Err(error) = context.updated(hosts.clone()) {
                debug!(%error, "Stopping pod watch");
                return;
            }
            reported = Some(hosts);
        }
    }
}
