use crate::{
    client::KubeSiteClient,
    context::KubeContext,
    core::{BridgeConfig, PortRange},
    expose::{parse_router_selector, ServiceController},
    index::{self, BindingAdaptor, Site, SiteMetrics},
    k8s::{self, watcher},
    router::{KubeConfigMapStore, RouterConfigController},
    status,
};
use anyhow::{bail, Context, Result};
use clap::Parser;
use prometheus_client::registry::Registry;
use tokio::{
    sync::{mpsc, watch},
    time::Duration,
};
use tracing::{info, info_span, warn, Instrument};

#[derive(Debug, Parser)]
#[clap(name = "site-controller", about = "Reconciles a site's bindings into router configuration")]
pub struct Args {
    #[clap(
        long,
        default_value = "site_controller=info,warn",
        env = "SITE_CONTROLLER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// The namespace the site's bindings and router live in.
    #[clap(long, env = "SITE_NAMESPACE")]
    namespace: String,

    #[clap(long, env = "SITE_ID")]
    site_id: String,

    /// The ConfigMap holding the router's JSON configuration.
    #[clap(long, default_value = "skupper-internal")]
    router_config_map: String,

    #[clap(long, default_value = "skrouterd.json")]
    router_config_key: String,

    /// Labels selecting the router pods that exposed Services route to.
    #[clap(long, default_value = "application=skupper-router")]
    router_selector: String,

    /// The first router port that may be allocated to a listener.
    #[clap(long, default_value = "1024")]
    port_range_start: u16,

    /// The last router port that may be allocated to a listener.
    #[clap(long, default_value = "65535")]
    port_range_end: u16,

    #[clap(long, default_value = "5000")]
    patch_timeout_ms: u64,

    /// The number of times a router configuration update is attempted while it conflicts with
    /// other writers.
    #[clap(long, default_value = "5")]
    config_update_attempts: usize,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            admin,
            client,
            log_level,
            log_format,
            namespace,
            site_id,
            router_config_map,
            router_config_key,
            router_selector,
            port_range_start,
            port_range_end,
            patch_timeout_ms,
            config_update_attempts,
        } = self;

        let range = PortRange::new(port_range_start, port_range_end)?;
        let router_selector = parse_router_selector(&router_selector)?;
        if config_update_attempts == 0 {
            bail!("--config-update-attempts must be at least 1");
        }

        let mut prom = <Registry>::default();
        let site_metrics = SiteMetrics::register(prom.sub_registry_with_prefix("site"));
        let status_metrics =
            status::ControllerMetrics::register(prom.sub_registry_with_prefix("binding_status"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        // Listener ports are recovered from the router's current configuration so that a restart
        // doesn't move existing listeners.
        let router_config = RouterConfigController::new(
            KubeConfigMapStore::new(runtime.client(), &namespace, &router_config_map),
            &router_config_key,
            config_update_attempts,
        );
        let recovered = router_config
            .load_bridges()
            .await
            .context("Failed to load router configuration")?;
        info!(
            listeners = recovered.tcp_listeners.len(),
            connectors = recovered.tcp_connectors.len(),
            "Loaded router configuration"
        );

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (exposures_tx, exposures_rx) = mpsc::unbounded_channel();
        let (statuses_tx, statuses_rx) = mpsc::unbounded_channel();
        let (bridges_tx, bridges_rx) = watch::channel(BridgeConfig::default());

        // Spawn the controllers that write the site's outputs to the cluster. The outcome of each
        // router configuration write is reported back to the site.

        tokio::spawn(
            router_config
                .run(bridges_rx, events_tx.clone())
                .instrument(info_span!("router_config")),
        );

        tokio::spawn(
            ServiceController::new(runtime.client(), &namespace, router_selector, exposures_rx)
                .run()
                .instrument(info_span!("services")),
        );

        let status_controller = status::Controller::new(
            runtime.client(),
            statuses_rx,
            Duration::from_millis(patch_timeout_ms),
            status_metrics,
        );
        tokio::spawn(
            status_controller
                .run()
                .instrument(info_span!("status_controller")),
        );

        // Spawn resource watches.

        let connectors =
            runtime.watch_namespaced::<k8s::Connector>(namespace.clone(), watcher::Config::default());
        tokio::spawn(
            index::watch::forward(connectors, events_tx.clone())
                .instrument(info_span!("connectors")),
        );

        let listeners =
            runtime.watch_namespaced::<k8s::Listener>(namespace.clone(), watcher::Config::default());
        tokio::spawn(
            index::watch::forward(listeners, events_tx.clone())
                .instrument(info_span!("listeners")),
        );

        // Spawn the site, which owns the binding state.
        let context = KubeContext::new(runtime.client(), &namespace, events_tx, exposures_tx);
        let bindings = BindingAdaptor::new(context, range, Some(&recovered));
        let site = Site::new(
            &site_id,
            bindings,
            KubeSiteClient::new(bridges_tx, statuses_tx),
            site_metrics,
        );
        tokio::spawn(site.run(events_rx).instrument(info_span!("site", id = %site_id)));

        // Block the main thread on the shutdown signal. Once it fires, wait for the background tasks to
        // complete before exiting.
        if runtime.run().await.is_err() {
            warn!("Shutdown did not complete gracefully");
            bail!("Aborted");
        }

        Ok(())
    }
}
