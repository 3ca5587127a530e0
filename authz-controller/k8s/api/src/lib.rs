#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod labels;
pub mod management;
pub mod store;

pub use self::{
    labels::Selector,
    management::*,
    store::{DryRun, Object, Store},
};
pub use k8s_openapi::{
    api::{
        self,
        core::v1::{Namespace, Secret},
        rbac::v1::{ClusterRole, ClusterRoleBinding, PolicyRule, Role, RoleBinding, RoleRef, Subject},
    },
    apimachinery::pkg::apis::meta::v1::{OwnerReference, Time},
};
pub use kube::{
    api::{ObjectMeta, ResourceExt},
    Resource,
};
