//! Shared, owner-labelled primitives.
//!
//! A membership primitive is claimed by adding a binding's owner key to its labels and
//! released by removing it; the primitive is deleted once no owner keys remain.

use crate::{
    core::ownership::{self, Owners, ALL_MARKERS},
    error::{ignore_not_found, Result},
    k8s::{
        ClusterRoleBinding, Object, ObjectMeta, ResourceExt, RoleBinding, RoleRef, Store,
        Subject,
    },
    membership::create_racing,
    retry_on_conflict, Reconciler,
};
use maplit::btreemap;
use tracing::{debug, info};

/// A generated binding of a role to a single subject.
pub(crate) trait Primitive: Object {
    fn build(meta: ObjectMeta, role: RoleRef, subject: Subject) -> Self;
}

impl Primitive for ClusterRoleBinding {
    fn build(metadata: ObjectMeta, role_ref: RoleRef, subject: Subject) -> Self {
        Self {
            metadata,
            role_ref,
            subjects: Some(vec![subject]),
        }
    }
}

impl Primitive for RoleBinding {
    fn build(metadata: ObjectMeta, role_ref: RoleRef, subject: Subject) -> Self {
        Self {
            metadata,
            role_ref,
            subjects: Some(vec![subject]),
        }
    }
}

/// Where a shared primitive lives and what it grants.
pub(crate) struct Claim<'a> {
    pub namespace: Option<&'a str>,
    /// The deterministic name a new primitive is created with.
    pub name: String,
    /// Existing primitives with the same identity, by name.
    pub existing: Vec<String>,
    pub role: RoleRef,
    pub subject: &'a Subject,
}

impl<S: Store> Reconciler<S> {
    /// Ensures a primitive matching `claim` exists and carries `key` under `marker`.
    pub(crate) async fn claim<P: Primitive>(
        &self,
        claim: &Claim<'_>,
        key: &str,
        marker: &str,
    ) -> Result<()> {
        let name = claim
            .existing
            .iter()
            .find(|n| **n == claim.name)
            .or_else(|| claim.existing.first())
            .unwrap_or(&claim.name);
        retry_on_conflict(name, || self.try_claim::<P>(claim, name, key, marker)).await
    }

    async fn try_claim<P: Primitive>(
        &self,
        claim: &Claim<'_>,
        name: &str,
        key: &str,
        marker: &str,
    ) -> Result<()> {
        match self.store.get::<P>(claim.namespace, name).await {
            Ok(mut primitive) => {
                if !ownership::add_owner(primitive.labels_mut(), key, marker) {
                    debug!(kind = %P::kind(&()), %name, %key, "Already owned");
                    return Ok(());
                }
                info!(kind = %P::kind(&()), ns = ?claim.namespace, %name, owner = %key, "Adding owner");
                self.store.update(&primitive).await?;
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                let meta = ObjectMeta {
                    name: Some(claim.name.clone()),
                    namespace: claim.namespace.map(str::to_string),
                    labels: Some(btreemap! { key.to_string() => marker.to_string() }),
                    ..Default::default()
                };
                let primitive = P::build(meta, claim.role.clone(), claim.subject.clone());
                info!(kind = %P::kind(&()), ns = ?claim.namespace, name = %claim.name, owner = %key, "Creating");
                // Another binding may have created it first; that is retried from a fresh read.
                create_racing(self.store.create(&primitive).await)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Removes `key` from a primitive, deleting it when no owners remain.
    pub(crate) async fn release<P: Primitive>(
        &self,
        namespace: Option<&str>,
        name: &str,
        key: &str,
        markers: &[&str],
    ) -> Result<()> {
        retry_on_conflict(name, || self.try_release::<P>(namespace, name, key, markers)).await
    }

    async fn try_release<P: Primitive>(
        &self,
        namespace: Option<&str>,
        name: &str,
        key: &str,
        markers: &[&str],
    ) -> Result<()> {
        let mut primitive = match self.store.get::<P>(namespace, name).await {
            Ok(primitive) => primitive,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        if !ownership::remove_owner(primitive.labels_mut(), key, markers) {
            return Ok(());
        }
        if Owners::of(primitive.meta().labels.as_ref(), &ALL_MARKERS).is_empty() {
            info!(kind = %P::kind(&()), ns = ?namespace, %name, owner = %key, "Deleting; last owner released");
            // Fails with a conflict, and is retried, if an owner was added since the read.
            let rv = primitive.resource_version();
            let deleted = self.store.delete::<P>(namespace, name, rv.as_deref()).await;
            return ignore_not_found(deleted.map_err(Into::into));
        }
        info!(kind = %P::kind(&()), ns = ?namespace, %name, owner = %key, "Removing owner");
        self.store.update(&primitive).await?;
        Ok(())
    }

    /// Deletes a primitive, treating a missing one as deleted.
    pub(crate) async fn delete<K: Object>(&self, namespace: Option<&str>, name: &str) -> Result<()> {
        info!(kind = %K::kind(&()), ns = ?namespace, %name, "Deleting");
        ignore_not_found(
            self.store
                .delete::<K>(namespace, name, None)
                .await
                .map_err(Into::into),
        )
    }
}
