#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use authz_controller_core as core;
pub use authz_controller_k8s_api as k8s;
pub use authz_controller_k8s_index as index;

mod args;
mod cascade;
mod controller;
mod crtb;
pub mod error;
mod global;
mod labels;
mod lease;
mod management_plane;
mod membership;
mod primitive;
mod prtb;
mod retry;
mod subject;


pub use self::{
    args::Args,
    controller::Metrics,
    error::{Error, Result},
    retry::retry_on_conflict,
};
use self::{
    index::SharedIndex,
    k8s::{Object, OwnerReference, ResourceExt, Store},
};

/// Converges generated primitives for bindings, global roles and scopes.
///
/// Objects are written through `store`; generated primitives are looked up in `index`.
#[derive(Clone, Debug)]
pub struct Reconciler<S> {
    store: S,
    index: SharedIndex,
}

// === impl Reconciler ===

impl<S: Store> Reconciler<S> {
    pub fn new(store: S, index: SharedIndex) -> Self {
        Self { store, index }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn index(&self) -> &SharedIndex {
        &self.index
    }

    /// Re-reads an object so that work is skipped for objects deleted since they were queued.
    async fn fresh<K: Object>(&self, obj: &K) -> Result<Option<K>> {
        let ns = obj.namespace();
        match self.store.get::<K>(ns.as_deref(), &obj.name_any()).await {
            Ok(obj) => Ok(Some(obj)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// A non-controlling owner reference to `obj`.
fn owner_reference<K: Object>(obj: &K) -> Result<OwnerReference> {
    obj.owner_ref(&()).ok_or_else(|| {
        k8s::store::Error::Invalid(format!("{} {} has no uid", K::kind(&()), obj.name_any()))
            .into()
    })
}

impl<S: Store> Reconciler<S> {
    /// Reads the cluster or project a binding is scoped to.
    async fn scope<K: Object>(
        &self,
        kind: &'static str,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<K> {
        match self.store.get::<K>(namespace, name).await {
            Ok(scope) => Ok(scope),
            Err(e) if e.is_not_found() => Err(Error::scope(kind, name)),
            Err(e) => Err(e.into()),
        }
    }
}
