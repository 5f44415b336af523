//! Site binding index
//!
//! The index reconciles a site's bindings into router configuration. It consumes a single ordered
//! queue of [`SiteEvent`]s:
//!
//! - A `Connector` binds a routing key to local workloads. A connector with a fixed `host` is
//!   configured immediately; a connector with a label `selector` starts a [`TargetSelection`] that
//!   watches matching pods and reports the set of reachable pod IPs back onto the queue.
//! - A `Listener` publishes a routing key on a host and port. Each listener is allocated a
//!   router-local port that is stable across restarts, and its host is exposed through the
//!   [`BindingContext`].
//!
//! ```text
//! [ Connector ] -> [ TargetSelection ] -> [ PodWatcher ] ~~> SiteEvent::PodsUpdated
//! [ Listener  ] -> [ PortMapping ] -> [ ExposedPorts ]
//!                              \-> [ BridgeConfig ] -> router
//! ```
//!
//! All state is owned by the single task that runs the [`Site`]: pod watches run concurrently but
//! only ever communicate through the queue, so the [`BindingAdaptor`] is never shared.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod bindings;
pub mod bridge;
pub mod metrics;
mod pod_watcher;
mod selection;
mod site;
pub mod watch;


pub use self::{
    bindings::{BindingAdaptor, BindingContext},
    metrics::SiteMetrics,
    pod_watcher::{select_hosts, PodWatcher, PodWatchingContext},
    selection::{SelectionHandle, TargetSelection},
    site::{HostsUpdate, Site, SiteClient, SiteEvent},
};
