//! The object-store seam.
//!
//! Reconcilers and batch tools read and write through [`Store`] rather than through a
//! `kube::Client` directly, so the same logic runs against the API server, behind the
//! [`DryRun`] decorator, or against the in-memory store used in tests.

mod dry_run;
#[cfg(feature = "memory")]
pub mod memory;

pub use self::dry_run::DryRun;
use crate::{labels::Selector, management::*};
use k8s_openapi::api::{
    core::v1::{Namespace, Secret},
    rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding},
};
use kube::{
    api::{Api, DeleteParams, ListParams, PostParams, Preconditions},
    Resource, ResourceExt,
};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid: {0}")]
    Invalid(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error(transparent)]
    Api(kube::Error),
}

/// A resource kind the store can address.
///
/// Bridges namespaced and cluster-scoped kinds so that callers can be generic over both.
pub trait Object:
    Resource<DynamicType = ()>
    + Clone
    + fmt::Debug
    + DeserializeOwned
    + Serialize
    + Send
    + Sync
    + 'static
{
    fn api(client: kube::Client, namespace: Option<&str>) -> Api<Self>;
}

/// Object-store operations, all optionally scoped by namespace.
///
/// `update` is optimistic: an object whose `resourceVersion` is stale fails with
/// [`Error::Conflict`]. `delete` is optimistic when given the `resourceVersion` the caller read.
#[async_trait::async_trait]
pub trait Store: Clone + Send + Sync + 'static {
    async fn get<K: Object>(&self, namespace: Option<&str>, name: &str) -> Result<K>;

    async fn list<K: Object>(&self, namespace: Option<&str>, selector: &Selector)
        -> Result<Vec<K>>;

    async fn create<K: Object>(&self, obj: &K) -> Result<K>;

    async fn update<K: Object>(&self, obj: &K) -> Result<K>;

    async fn delete<K: Object>(
        &self,
        namespace: Option<&str>,
        name: &str,
        resource_version: Option<&str>,
    ) -> Result<()>;
}

// === impl Error ===

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }
}

impl From<kube::Error> for Error {
    fn from(error: kube::Error) -> Self {
        match error {
            kube::Error::Api(rsp) => match rsp.code {
                403 => Self::Forbidden(rsp.message),
                404 => Self::NotFound(rsp.message),
                409 if rsp.reason == "AlreadyExists" => Self::AlreadyExists(rsp.message),
                409 => Self::Conflict(rsp.message),
                422 => Self::Invalid(rsp.message),
                _ => Self::Api(kube::Error::Api(rsp)),
            },
            error => Self::Api(error),
        }
    }
}

// === impl Object ===

macro_rules! cluster_scoped {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl Object for $ty {
                fn api(client: kube::Client, _: Option<&str>) -> Api<Self> {
                    Api::all(client)
                }
            }
        )+
    };
}

macro_rules! namespaced {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl Object for $ty {
                fn api(client: kube::Client, namespace: Option<&str>) -> Api<Self> {
                    match namespace {
                        Some(ns) => Api::namespaced(client, ns),
                        None => Api::all(client),
                    }
                }
            }
        )+
    };
}

cluster_scoped!(
    ClusterRole,
    ClusterRoleBinding,
    Namespace,
    RoleTemplate,
    GlobalRole,
    GlobalRoleBinding,
    User,
    Token,
    Cluster,
);

namespaced!(
    Role,
    RoleBinding,
    Secret,
    ClusterRoleTemplateBinding,
    ProjectRoleTemplateBinding,
    Project,
);

// === impl Store for kube::Client ===

#[async_trait::async_trait]
impl Store for kube::Client {
    async fn get<K: Object>(&self, namespace: Option<&str>, name: &str) -> Result<K> {
        Ok(K::api(self.clone(), namespace).get(name).await?)
    }

    async fn list<K: Object>(
        &self,
        namespace: Option<&str>,
        selector: &Selector,
    ) -> Result<Vec<K>> {
        let mut params = ListParams::default();
        if !selector.is_empty() {
            params = params.labels(&selector.to_string());
        }
        let list = K::api(self.clone(), namespace).list(&params).await?;
        Ok(list.items)
    }

    async fn create<K: Object>(&self, obj: &K) -> Result<K> {
        let api = K::api(self.clone(), obj.namespace().as_deref());
        Ok(api.create(&PostParams::default(), obj).await?)
    }

    async fn update<K: Object>(&self, obj: &K) -> Result<K> {
        let api = K::api(self.clone(), obj.namespace().as_deref());
        Ok(api.replace(&obj.name_any(), &PostParams::default(), obj).await?)
    }

    async fn delete<K: Object>(
        &self,
        namespace: Option<&str>,
        name: &str,
        resource_version: Option<&str>,
    ) -> Result<()> {
        let mut params = DeleteParams::default();
        if let Some(rv) = resource_version {
            params = params.preconditions(Preconditions {
                resource_version: Some(rv.to_string()),
                uid: None,
            });
        }
        K::api(self.clone(), namespace).delete(name, &params).await?;
        Ok(())
    }
}
