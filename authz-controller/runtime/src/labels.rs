//! Migration of owner labels from binding UIDs to composite keys.

use crate::{
    core::ownership::{
        self, OwnershipScheme, ALL_MARKERS, CURRENT, LABELS_UPDATED, LEGACY, MEMBERSHIP_BINDING_OWNER,
        MEMBERSHIP_BINDING_OWNER_LEGACY, RTB_LABEL_UPDATED,
    },
    error::Result,
    k8s::{ClusterRoleBinding, Object, ResourceExt, RoleBinding, Store},
    retry_on_conflict, Reconciler,
};
use tracing::{debug, info};

impl<S: Store> Reconciler<S> {
    /// Adds `binding`'s composite owner key next to its UID key on every primitive it owns,
    /// then marks the binding as migrated. Migrated bindings are returned unchanged.
    pub(crate) async fn migrate_labels<B: Object>(&self, binding: B) -> Result<B> {
        if ownership::labels_updated(binding.meta()) {
            return Ok(binding);
        }
        let (Some(legacy), Some(current)) = (
            LEGACY.owner_key(binding.meta()),
            CURRENT.owner_key(binding.meta()),
        ) else {
            return Ok(binding);
        };

        let crbs = self
            .index
            .read()
            .cluster_role_bindings_owned_by(&legacy, &ALL_MARKERS);
        for crb in crbs {
            let name = crb.name_any();
            retry_on_conflict(&name, || {
                self.try_migrate::<ClusterRoleBinding>(None, &name, &legacy, &current)
            })
            .await?;
        }

        let rbs = self.index.read().role_bindings_owned_by(&legacy, &ALL_MARKERS);
        for rb in rbs {
            let (ns, name) = (rb.namespace(), rb.name_any());
            retry_on_conflict(&name, || {
                self.try_migrate::<RoleBinding>(ns.as_deref(), &name, &legacy, &current)
            })
            .await?;
        }

        retry_on_conflict(&binding.name_any(), || self.try_mark_updated(&binding)).await
    }

    async fn try_migrate<P: Object>(
        &self,
        namespace: Option<&str>,
        name: &str,
        legacy: &str,
        current: &str,
    ) -> Result<()> {
        let mut primitive = match self.store.get::<P>(namespace, name).await {
            Ok(p) => p,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let labels = primitive.labels_mut();
        let Some(marker) = labels.get(legacy).cloned() else {
            return Ok(());
        };
        let marker = match marker.as_str() {
            MEMBERSHIP_BINDING_OWNER_LEGACY => MEMBERSHIP_BINDING_OWNER,
            marker => marker,
        }
        .to_string();

        let mut changed = ownership::add_owner(labels, current, &marker);
        if labels.get(RTB_LABEL_UPDATED).map(String::as_str) != Some("true") {
            labels.insert(RTB_LABEL_UPDATED.to_string(), "true".to_string());
            changed = true;
        }
        if !changed {
            debug!(kind = %P::kind(&()), ?namespace, %name, "Owner labels already migrated");
            return Ok(());
        }
        info!(kind = %P::kind(&()), ?namespace, %name, owner = %current, "Migrating owner label");
        self.store.update(&primitive).await?;
        Ok(())
    }

    async fn try_mark_updated<B: Object>(&self, binding: &B) -> Result<B> {
        let ns = binding.namespace();
        let mut binding = self.store.get::<B>(ns.as_deref(), &binding.name_any()).await?;
        if ownership::labels_updated(binding.meta()) {
            return Ok(binding);
        }
        binding
            .labels_mut()
            .insert(LABELS_UPDATED.to_string(), "true".to_string());
        info!(kind = %B::kind(&()), ?ns, name = %binding.name_any(), "Marking owner labels updated");
        Ok(self.store.update(&binding).await?)
    }
}
