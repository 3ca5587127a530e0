use crate::{
    controller::{self, Backoff, Context, Metrics},
    index::{self, Index},
    k8s::{
        ClusterRole, ClusterRoleBinding, ClusterRoleTemplateBinding, GlobalRoleBinding,
        ProjectRoleTemplateBinding, RoleBinding, RoleTemplate,
    },
    lease, Reconciler,
};
use anyhow::{bail, Context as _, Result};
use clap::Parser;
use kube::runtime::watcher;
use prometheus_client::registry::Registry;
use std::{sync::Arc, time::Duration};
use tracing::{info, info_span, warn, Instrument};

#[derive(Debug, Parser)]
#[clap(name = "authz-controller", about = "Reconciles role template bindings into RBAC")]
pub struct Args {
    #[clap(
        long,
        default_value = "authz_controller=info,warn",
        env = "AUTHZ_CONTROLLER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Objects of each kind reconciled concurrently.
    #[clap(long, default_value = "16")]
    workers: u16,

    #[clap(long, default_value = "cattle-system")]
    lease_namespace: String,

    #[clap(long, default_value = "authz-controller-write")]
    lease_name: String,

    /// Used as the field manager and to qualify finalizers.
    #[clap(long, default_value = "authz-controller")]
    controller_name: String,

    #[clap(long, default_value = "5000")]
    backoff_base_ms: u64,

    #[clap(long, default_value = "300000")]
    backoff_max_ms: u64,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            log_level,
            log_format,
            client,
            admin,
            workers,
            lease_namespace,
            lease_name,
            controller_name,
            backoff_base_ms,
            backoff_max_ms,
        } = self;

        let index = Index::shared();

        let mut prom = <Registry>::default();
        index::metrics::register(prom.sub_registry_with_prefix("index"), index.clone());
        let metrics = Metrics::register(prom.sub_registry_with_prefix("controller"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        let hostname =
            std::env::var("HOSTNAME").context("Failed to fetch `HOSTNAME` environment variable")?;

        let mut claims = lease::init(
            &runtime,
            &lease_namespace,
            &lease_name,
            &controller_name,
            &hostname,
        )
        .await?;

        // Spawn resource watches. Every replica keeps its index warm so that a new leader can
        // start reconciling immediately.

        let role_templates = runtime.watch_all::<RoleTemplate>(watcher::Config::default());
        tokio::spawn(
            kubert::index::cluster(index.clone(), role_templates)
                .instrument(info_span!("roletemplates")),
        );

        let cluster_roles = runtime.watch_all::<ClusterRole>(watcher::Config::default());
        tokio::spawn(
            kubert::index::cluster(index.clone(), cluster_roles)
                .instrument(info_span!("clusterroles")),
        );

        let crtbs = runtime.watch_all::<ClusterRoleTemplateBinding>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(index.clone(), crtbs)
                .instrument(info_span!("clusterroletemplatebindings")),
        );

        let prtbs = runtime.watch_all::<ProjectRoleTemplateBinding>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(index.clone(), prtbs)
                .instrument(info_span!("projectroletemplatebindings")),
        );

        let grbs = runtime.watch_all::<GlobalRoleBinding>(watcher::Config::default());
        tokio::spawn(
            kubert::index::cluster(index.clone(), grbs)
                .instrument(info_span!("globalrolebindings")),
        );

        let crbs = runtime.watch_all::<ClusterRoleBinding>(watcher::Config::default());
        tokio::spawn(
            kubert::index::cluster(index.clone(), crbs)
                .instrument(info_span!("clusterrolebindings")),
        );

        let rbs = runtime.watch_all::<RoleBinding>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(index.clone(), rbs).instrument(info_span!("rolebindings")),
        );

        let client = runtime.client();
        let ctx = Arc::new(Context {
            reconciler: Reconciler::new(client.clone(), index),
            client,
            name: controller_name,
            backoff: Backoff::new(
                Duration::from_millis(backoff_base_ms),
                Duration::from_millis(backoff_max_ms),
            ),
            metrics,
        });

        // Only the lease holder writes. Controllers are dropped when the lease is lost and
        // restarted if it is claimed again.
        tokio::spawn(
            async move {
                loop {
                    if !lease::acquired(&mut claims, &hostname).await {
                        warn!("Lease manager stopped; controllers will not run");
                        return;
                    }
                    info!(%hostname, "Acquired write lease");
                    tokio::select! {
                        () = controller::run(ctx.clone(), workers) => return,
                        reacquirable = lease::lost(&mut claims, &hostname) => {
                            if !reacquirable {
                                warn!(%hostname, "Lease manager stopped; stopping controllers");
                                return;
                            }
                            warn!(%hostname, "Lost write lease; stopping controllers");
                        }
                    }
                }
            }
            .instrument(info_span!("controllers")),
        );

        // Block the main thread on the shutdown signal. Once it fires, wait for the background tasks to
        // complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}
