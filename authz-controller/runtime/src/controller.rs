//! `kube::runtime` controllers driving the [`Reconciler`].
//!
//! The controller runtime serializes work per object key and runs different keys
//! concurrently. Kinds that must clean up before they disappear hold a finalizer.

use crate::{
    error::{Error, Result},
    index::{BindingRef, SharedIndex},
    k8s::{
        Cluster, ClusterRoleTemplateBinding, GlobalRole, GlobalRoleBinding, Object, Project,
        ProjectRoleTemplateBinding, ResourceExt, RoleTemplate, User,
    },
    Reconciler,
};
use ahash::AHashMap;
use futures::prelude::*;
use kube::{
    runtime::{
        controller::{self, Action, Controller},
        finalizer::{finalizer, Event},
        reflector::ObjectRef,
        watcher,
    },
    Api,
};
use parking_lot::Mutex;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::{debug, error, info, warn};

/// Shared state of every controller.
pub(crate) struct Context {
    pub reconciler: Reconciler<kube::Client>,
    pub client: kube::Client,
    /// Qualifies finalizer names.
    pub name: String,
    pub backoff: Backoff,
    pub metrics: Metrics,
}

/// Per-key exponential backoff, reset when a key reconciles successfully.
///
/// Keys that stop failing without ever succeeding (their object was deleted) are forgotten
/// once they have not failed for twice the longest delay.
#[derive(Debug)]
pub(crate) struct Backoff {
    base: Duration,
    max: Duration,
    failures: Mutex<AHashMap<String, Failures>>,
}

#[derive(Copy, Clone, Debug)]
struct Failures {
    count: u32,
    last: Instant,
}

#[derive(Clone, Debug)]
pub struct Metrics {
    reconciles: Family<KindLabels, Counter>,
    failures: Family<KindLabels, Counter>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct KindLabels {
    kind: &'static str,
}

/// A kind driven by a controller.
#[async_trait::async_trait]
pub(crate) trait Reconcile: Object {
    const KIND: &'static str;

    /// Whether deletion waits for [`Reconcile::cleanup`].
    const FINALIZED: bool;

    async fn apply(&self, reconciler: &Reconciler<kube::Client>) -> Result<()>;

    async fn cleanup(&self, _reconciler: &Reconciler<kube::Client>) -> Result<()> {
        Ok(())
    }
}

/// Runs every controller until shutdown.
pub(crate) async fn run(ctx: Arc<Context>, workers: u16) {
    let index = ctx.reconciler.index().clone();
    let crtbs = controller_for::<ClusterRoleTemplateBinding>(&ctx, workers).watches(
        Api::<RoleTemplate>::all(ctx.client.clone()),
        watcher::Config::default(),
        {
            let index = index.clone();
            move |rt| {
                dependents(&index, &rt.name_any(), |binding| match binding {
                    BindingRef::Cluster(key) => Some(ObjectRef::new(&key.name).within(&key.namespace)),
                    _ => None,
                })
            }
        },
    );
    let prtbs = controller_for::<ProjectRoleTemplateBinding>(&ctx, workers).watches(
        Api::<RoleTemplate>::all(ctx.client.clone()),
        watcher::Config::default(),
        move |rt| {
            dependents(&index, &rt.name_any(), |binding| match binding {
                BindingRef::Project(key) => Some(ObjectRef::new(&key.name).within(&key.namespace)),
                _ => None,
            })
        },
    );

    info!(workers, "Starting controllers");
    tokio::join!(
        drive(crtbs, ctx.clone()),
        drive(prtbs, ctx.clone()),
        drive(controller_for::<GlobalRole>(&ctx, workers), ctx.clone()),
        drive(controller_for::<GlobalRoleBinding>(&ctx, workers), ctx.clone()),
        drive(controller_for::<User>(&ctx, workers), ctx.clone()),
        drive(controller_for::<Cluster>(&ctx, workers), ctx.clone()),
        drive(controller_for::<Project>(&ctx, workers), ctx.clone()),
    );
    info!("Controllers stopped");
}

fn controller_for<K: Reconcile>(ctx: &Context, workers: u16) -> Controller<K> {
    Controller::new(Api::<K>::all(ctx.client.clone()), watcher::Config::default())
        .with_config(controller::Config::default().concurrency(workers))
}

async fn drive<K: Reconcile>(controller: Controller<K>, ctx: Arc<Context>) {
    controller
        .shutdown_on_signal()
        .run(reconcile::<K>, error_policy::<K>, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, action)) => debug!(kind = K::KIND, %obj, ?action, "Reconciled"),
                Err(error) => debug!(kind = K::KIND, %error, "Controller error"),
            }
        })
        .await
}

/// The bindings affected by a change to a role template, directly or through inheritance.
fn dependents<K, F>(index: &SharedIndex, role_template: &str, select: F) -> Vec<ObjectRef<K>>
where
    K: Object,
    F: Fn(BindingRef) -> Option<ObjectRef<K>>,
{
    let bindings = index.read().bindings_for_role_template(role_template);
    debug!(%role_template, bindings = bindings.len(), "Requeueing dependent bindings");
    bindings.into_iter().filter_map(select).collect()
}

async fn reconcile<K: Reconcile>(obj: Arc<K>, ctx: Arc<Context>) -> Result<Action> {
    let key = key_of(&*obj);
    ctx.metrics.reconciles.get_or_create(&KindLabels { kind: K::KIND }).inc();

    let action = if K::FINALIZED {
        let api = K::api(ctx.client.clone(), obj.namespace().as_deref());
        let name = format!("controller.cattle.io/{}-{}", ctx.name, K::KIND);
        let reconciler = &ctx.reconciler;
        finalizer(&api, &name, obj, |event| async move {
            match event {
                Event::Apply(obj) => obj.apply(reconciler).await,
                Event::Cleanup(obj) => obj.cleanup(reconciler).await,
            }
            .map(|()| Action::await_change())
        })
        .await?
    } else {
        obj.apply(&ctx.reconciler).await?;
        Action::await_change()
    };

    ctx.backoff.reset(&key);
    Ok(action)
}

fn error_policy<K: Reconcile>(obj: Arc<K>, error: &Error, ctx: Arc<Context>) -> Action {
    let key = key_of(&*obj);
    ctx.metrics.failures.get_or_create(&KindLabels { kind: K::KIND }).inc();
    if error.is_invalid() {
        warn!(%key, %error, "Invalid object; waiting for it to change");
        return Action::await_change();
    }
    let delay = ctx.backoff.next(&key);
    error!(%key, %error, ?delay, "Reconcile failed");
    Action::requeue(delay)
}

fn key_of<K: Reconcile>(obj: &K) -> String {
    match obj.namespace() {
        Some(ns) => format!("{}/{}/{}", K::KIND, ns, obj.name_any()),
        None => format!("{}/{}", K::KIND, obj.name_any()),
    }
}

// === impl Reconcile ===

#[async_trait::async_trait]
impl Reconcile for ClusterRoleTemplateBinding {
    const KIND: &'static str = "crtb";
    const FINALIZED: bool = true;

    async fn apply(&self, reconciler: &Reconciler<kube::Client>) -> Result<()> {
        reconciler.reconcile_crtb(self).await
    }

    async fn cleanup(&self, reconciler: &Reconciler<kube::Client>) -> Result<()> {
        reconciler.remove_crtb(self).await
    }
}

#[async_trait::async_trait]
impl Reconcile for ProjectRoleTemplateBinding {
    const KIND: &'static str = "prtb";
    const FINALIZED: bool = true;

    async fn apply(&self, reconciler: &Reconciler<kube::Client>) -> Result<()> {
        reconciler.reconcile_prtb(self).await
    }

    async fn cleanup(&self, reconciler: &Reconciler<kube::Client>) -> Result<()> {
        reconciler.remove_prtb(self).await
    }
}

#[async_trait::async_trait]
impl Reconcile for GlobalRole {
    const KIND: &'static str = "globalrole";
    const FINALIZED: bool = false;

    async fn apply(&self, reconciler: &Reconciler<kube::Client>) -> Result<()> {
        reconciler.reconcile_global_role(self).await
    }
}

#[async_trait::async_trait]
impl Reconcile for GlobalRoleBinding {
    const KIND: &'static str = "globalrolebinding";
    const FINALIZED: bool = false;

    async fn apply(&self, reconciler: &Reconciler<kube::Client>) -> Result<()> {
        reconciler.reconcile_global_role_binding(self).await
    }
}

#[async_trait::async_trait]
impl Reconcile for User {
    const KIND: &'static str = "user";
    const FINALIZED: bool = true;

    async fn apply(&self, _: &Reconciler<kube::Client>) -> Result<()> {
        Ok(())
    }

    async fn cleanup(&self, reconciler: &Reconciler<kube::Client>) -> Result<()> {
        reconciler.remove_user(self).await
    }
}

#[async_trait::async_trait]
impl Reconcile for Cluster {
    const KIND: &'static str = "cluster";
    const FINALIZED: bool = true;

    async fn apply(&self, _: &Reconciler<kube::Client>) -> Result<()> {
        Ok(())
    }

    async fn cleanup(&self, reconciler: &Reconciler<kube::Client>) -> Result<()> {
        reconciler.remove_cluster(self).await
    }
}

#[async_trait::async_trait]
impl Reconcile for Project {
    const KIND: &'static str = "project";
    const FINALIZED: bool = true;

    async fn apply(&self, _: &Reconciler<kube::Client>) -> Result<()> {
        Ok(())
    }

    async fn cleanup(&self, reconciler: &Reconciler<kube::Client>) -> Result<()> {
        reconciler.remove_project(self).await
    }
}

// === impl Backoff ===

impl Backoff {
    pub(crate) fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: Mutex::default(),
        }
    }

    /// Records a failure of `key` and returns how long to wait before retrying it.
    pub(crate) fn next(&self, key: &str) -> Duration {
        self.next_at(key, Instant::now())
    }

    fn next_at(&self, key: &str, now: Instant) -> Duration {
        let horizon = self.max.saturating_mul(2);
        let mut failures = self.failures.lock();
        failures.retain(|_, f| now.saturating_duration_since(f.last) <= horizon);

        let f = failures
            .entry(key.to_string())
            .or_insert(Failures { count: 0, last: now });
        let factor = 1u32.checked_shl(f.count).unwrap_or(u32::MAX);
        f.count = f.count.saturating_add(1);
        f.last = now;
        self.base.saturating_mul(factor).min(self.max)
    }

    pub(crate) fn reset(&self, key: &str) {
        self.failures.lock().remove(key);
    }
}

// === impl Metrics ===

impl Metrics {
    pub fn register(reg: &mut Registry) -> Self {
        let reconciles = Family::<KindLabels, Counter>::default();
        reg.register(
            "reconciles",
            "Total number of reconciliations started",
            reconciles.clone(),
        );

        let failures = Family::<KindLabels, Counter>::default();
        reg.register(
            "reconcile_failures",
            "Total number of failed reconciliations",
            failures.clone(),
        );

        Self {
            reconciles,
            failures,
        }
    }
}
