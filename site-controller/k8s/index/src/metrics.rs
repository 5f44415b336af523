use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::Registry,
};

#[derive(Clone, Debug, Default)]
pub struct SiteMetrics {
    events: Family<EventLabels, Counter>,
    host_updates: Family<HostUpdateLabels, Counter>,
    bridge_config_updates: Counter,
    selections: Gauge,
    allocated_ports: Gauge,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct EventLabels {
    kind: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct HostUpdateLabels {
    result: String,
}

impl SiteMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let events = Family::default();
        prom.register(
            "events",
            "Count of binding events processed by the site",
            events.clone(),
        );

        let host_updates = Family::default();
        prom.register(
            "host_updates",
            "Count of host sets reported by pod watches",
            host_updates.clone(),
        );

        let bridge_config_updates = Counter::default();
        prom.register(
            "bridge_config_updates",
            "Count of bridge configurations pushed to the router",
            bridge_config_updates.clone(),
        );

        let selections = Gauge::default();
        prom.register(
            "selections",
            "Gauge of the number of running pod watches",
            selections.clone(),
        );

        let allocated_ports = Gauge::default();
        prom.register(
            "allocated_ports",
            "Gauge of the number of router ports allocated to listeners",
            allocated_ports.clone(),
        );

        Self {
            events,
            host_updates,
            bridge_config_updates,
            selections,
            allocated_ports,
        }
    }

    pub(crate) fn event(&self, kind: &str) {
        self.events
            .get_or_create(&EventLabels {
                kind: kind.to_string(),
            })
            .inc();
    }

    pub(crate) fn host_update(&self, accepted: bool) {
        let result = if accepted { "accepted" } else { "discarded" };
        self.host_updates
            .get_or_create(&HostUpdateLabels {
                result: result.to_string(),
            })
            .inc();
    }

    pub(crate) fn bridge_config_updated(&self) {
        self.bridge_config_updates.inc();
    }

    pub(crate) fn set_sizes(&self, selections: usize, allocated_ports: usize) {
        self.selections.set(selections as i64);
        self.allocated_ports.set(allocated_ports as i64);
    }
}
