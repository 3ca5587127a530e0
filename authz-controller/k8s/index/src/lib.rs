//! Watch-fed indexes over bindings, role templates and generated primitives.
//!
//! The reconcilers consult these indexes instead of listing from the API server:
//!
//! - role templates by name, plus the reverse inheritance edges used to find every binding that
//!   depends on a template, directly or transitively;
//! - cluster and project bindings by role template and by user;
//! - generated ClusterRoleBindings and RoleBindings by `(role, subject)` identity, by owner-label
//!   key, and (RoleBindings only) by owner-reference UID.
//!
//! Indexes are updated by `kubert::index` from watch streams and are shared as
//! [`SharedIndex`].

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

mod binding;
mod index;
pub mod metrics;
mod multimap;
mod primitive;
mod role_template;

#[cfg(test)]
mod tests;

pub use self::index::Index;
use kube::ResourceExt;
use parking_lot::RwLock;
use std::sync::Arc;

pub type SharedIndex = Arc<RwLock<Index>>;

/// Identifies a namespaced object.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjKey {
    pub namespace: String,
    pub name: String,
}

/// A binding that depends on a role template or names a user.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BindingRef {
    Cluster(ObjKey),
    Project(ObjKey),
    Global(String),
}

// === impl ObjKey ===

impl ObjKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn of<R: ResourceExt>(resource: &R) -> Self {
        Self::new(resource.namespace().unwrap_or_default(), resource.name_any())
    }
}

impl std::fmt::Display for ObjKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}
