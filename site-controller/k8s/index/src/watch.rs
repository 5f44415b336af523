//! Forwards binding watches onto the site's event queue.
//!
//! A watch that restarts re-lists every resource; resources that disappeared while the watch was
//! down are reported as deleted once the re-list completes. The site is told when the first
//! listing completes.

use crate::SiteEvent;
use ahash::AHashSet as HashSet;
use futures::prelude::*;
use site_controller_k8s_api::{watcher, Connector, Listener, ResourceExt};
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// A binding resource that can be reported to the site.
pub trait Binding: ResourceExt + Sized {
    fn applied(self) -> SiteEvent;

    fn deleted(name: String) -> SiteEvent;

    fn synced() -> SiteEvent;
}

impl Binding for Connector {
    fn applied(self) -> SiteEvent {
        SiteEvent::ConnectorApplied(self)
    }

    fn deleted(name: String) -> SiteEvent {
        SiteEvent::ConnectorDeleted(name)
    }

    fn synced() -> SiteEvent {
        SiteEvent::ConnectorsSynced
    }
}

impl Binding for Listener {
    fn applied(self) -> SiteEvent {
        SiteEvent::ListenerApplied(self)
    }

    fn deleted(name: String) -> SiteEvent {
        SiteEvent::ListenerDeleted(name)
    }

    fn synced() -> SiteEvent {
        SiteEvent::ListenersSynced
    }
}

/// Forwards watch events until the watch ends or the site's queue closes.
pub async fn forward<T, S>(resources: S, events: mpsc::UnboundedSender<SiteEvent>)
where
    T: Binding,
    S: Stream<Item = watcher::Event<T>>,
{
    tokio::pin!(resources);
    let mut known = HashSet::<String>::default();
    let mut relisted: Option<HashSet<String>> = None;
    let mut synced = false;
    while let Some(event) = resources.next().await {
        let mut updates = Vec::new();
        match event {
            watcher::Event::Init => {
                trace!("Relisting");
                relisted = Some(HashSet::default());
            }
            watcher::Event::InitApply(resource) | watcher::Event::Apply(resource) => {
                let name = resource.name_any();
                if let Some(relisted) = relisted.as_mut() {
                    relisted.insert(name.clone());
                }
                known.insert(name);
                updates.push(resource.applied());
            }
            watcher::Event::Delete(resource) => {
                let name = resource.name_any();
                known.remove(&name);
                updates.push(T::deleted(name));
            }
            watcher::Event::InitDone => {
                if let Some(relisted) = relisted.take() {
                    let mut removed = known
                        .iter()
                        .filter(|name| !relisted.contains(*name))
                        .cloned()
                        .collect::<Vec<_>>();
                    removed.sort();
                    updates.extend(removed.into_iter().map(T::deleted));
                    known = relisted;
                }
                if !synced {
                    synced = true;
                    updates.push(T::synced());
                }
            }
        }

        for update in updates {
            if events.send(update).is_err() {
                debug!("Site event queue closed");
                return;
            }
        }
    }
    debug!("Watch ended");
}
