//! Global roles and bindings.
//!
//! Each GlobalRole is backed 1:1 by a ClusterRole and each GlobalRoleBinding by a
//! ClusterRoleBinding. Both are owned by reference, so the API server collects them when the
//! global object is deleted.

use crate::{
    core::{naming, subject::RBAC_GROUP, Error as CoreError},
    error::Result,
    k8s::{
        ClusterRole, ClusterRoleBinding, GlobalRole, GlobalRoleBinding, Object, ObjectMeta,
        ResourceExt, RoleRef, Store, Subject,
    },
    membership::create_racing,
    owner_reference, retry_on_conflict, Reconciler,
};
use tracing::{debug, info, instrument};

/// Records the ClusterRole generated for a GlobalRole.
pub const CR_NAME_ANNOTATION: &str = "authz.management.cattle.io/cr-name";

/// Records the ClusterRoleBinding generated for a GlobalRoleBinding.
pub const CRB_NAME_ANNOTATION: &str = "authz.management.cattle.io/crb-name";

impl<S: Store> Reconciler<S> {
    /// Keeps a GlobalRole's ClusterRole rules in sync with the GlobalRole.
    #[instrument(skip_all, fields(name = %gr.name_any()))]
    pub async fn reconcile_global_role(&self, gr: &GlobalRole) -> Result<()> {
        let Some(gr) = self.fresh(gr).await? else {
            return Ok(());
        };
        let name = generated_name(&gr, CR_NAME_ANNOTATION, naming::global_role);
        retry_on_conflict(&name, || self.try_sync_cluster_role(&gr, &name)).await?;
        self.record_generated_name(&gr, CR_NAME_ANNOTATION, &name).await
    }

    /// Keeps a GlobalRoleBinding's ClusterRoleBinding bound to the right role and subject.
    #[instrument(skip_all, fields(name = %grb.name_any()))]
    pub async fn reconcile_global_role_binding(&self, grb: &GlobalRoleBinding) -> Result<()> {
        let Some(grb) = self.fresh(grb).await? else {
            return Ok(());
        };
        let subject = global_subject(&grb)?;
        let gr = self
            .scope::<GlobalRole>("globalrole", None, &grb.spec.global_role_name)
            .await?;
        let role = RoleRef {
            api_group: RBAC_GROUP.to_string(),
            kind: "ClusterRole".to_string(),
            name: generated_name(&gr, CR_NAME_ANNOTATION, naming::global_role),
        };
        let name = generated_name(&grb, CRB_NAME_ANNOTATION, naming::global_role_binding);
        retry_on_conflict(&name, || self.try_sync_cluster_role_binding(&grb, &name, &role, &subject))
            .await?;
        self.record_generated_name(&grb, CRB_NAME_ANNOTATION, &name).await
    }

    async fn try_sync_cluster_role(&self, gr: &GlobalRole, name: &str) -> Result<()> {
        match self.store.get::<ClusterRole>(None, name).await {
            Ok(mut cr) => {
                if cr.rules.as_deref().unwrap_or_default() == gr.spec.rules.as_slice() {
                    return Ok(());
                }
                info!(%name, "Updating ClusterRole rules");
                cr.rules = Some(gr.spec.rules.clone());
                self.store.update(&cr).await?;
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                let cr = ClusterRole {
                    metadata: ObjectMeta {
                        name: Some(name.to_string()),
                        owner_references: Some(vec![owner_reference(gr)?]),
                        ..Default::default()
                    },
                    rules: Some(gr.spec.rules.clone()),
                    ..Default::default()
                };
                info!(%name, "Creating ClusterRole");
                create_racing(self.store.create(&cr).await)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn try_sync_cluster_role_binding(
        &self,
        grb: &GlobalRoleBinding,
        name: &str,
        role: &RoleRef,
        subject: &Subject,
    ) -> Result<()> {
        let crb = match self.store.get::<ClusterRoleBinding>(None, name).await {
            Ok(crb) => Some(crb),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e.into()),
        };
        match crb {
            Some(crb) if crb.role_ref != *role => {
                // The role of a binding cannot change; replace it.
                info!(%name, from = %crb.role_ref.name, to = %role.name, "Replacing ClusterRoleBinding");
                self.delete::<ClusterRoleBinding>(None, name).await?;
            }
            Some(mut crb) => {
                if crb.subjects.as_deref() == Some(std::slice::from_ref(subject)) {
                    return Ok(());
                }
                info!(%name, subject = %subject.name, "Updating ClusterRoleBinding subject");
                crb.subjects = Some(vec![subject.clone()]);
                self.store.update(&crb).await?;
                return Ok(());
            }
            None => {}
        }

        let crb = ClusterRoleBinding {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                owner_references: Some(vec![owner_reference(grb)?]),
                ..Default::default()
            },
            role_ref: role.clone(),
            subjects: Some(vec![subject.clone()]),
        };
        info!(%name, role = %role.name, subject = %subject.name, "Creating ClusterRoleBinding");
        create_racing(self.store.create(&crb).await)
    }

    /// Stamps the generated object's name on its owner for later lookups.
    async fn record_generated_name<K: Object>(&self, obj: &K, annotation: &str, name: &str) -> Result<()> {
        if obj.annotations().get(annotation).map(String::as_str) == Some(name) {
            return Ok(());
        }
        retry_on_conflict(name, || self.try_record_generated_name(obj, annotation, name)).await
    }

    async fn try_record_generated_name<K: Object>(
        &self,
        obj: &K,
        annotation: &str,
        name: &str,
    ) -> Result<()> {
        let mut obj = self.store.get::<K>(None, &obj.name_any()).await?;
        if obj.annotations().get(annotation).map(String::as_str) == Some(name) {
            debug!(%annotation, "Generated name already recorded");
            return Ok(());
        }
        obj.annotations_mut()
            .insert(annotation.to_string(), name.to_string());
        info!(kind = %K::kind(&()), name = %obj.name_any(), %annotation, generated = %name, "Recording generated name");
        self.store.update(&obj).await?;
        Ok(())
    }
}

fn generated_name<K: ResourceExt>(obj: &K, annotation: &str, derive: fn(&str) -> String) -> String {
    obj.annotations()
        .get(annotation)
        .filter(|n| !n.is_empty())
        .cloned()
        .unwrap_or_else(|| derive(&obj.name_any()))
}

/// A global binding names either a user or a group principal.
fn global_subject(grb: &GlobalRoleBinding) -> Result<Subject> {
    let set = |v: &Option<String>| v.as_deref().filter(|s| !s.is_empty()).map(str::to_string);
    let (kind, name) = match (set(&grb.spec.user_name), set(&grb.spec.group_principal_name)) {
        (Some(user), None) => ("User", user),
        (None, Some(group)) => ("Group", group),
        (Some(_), Some(_)) => return Err(CoreError::AmbiguousSubject(grb.name_any()).into()),
        (None, None) => return Err(CoreError::NoSubject(grb.name_any()).into()),
    };
    Ok(Subject {
        api_group: Some(RBAC_GROUP.to_string()),
        kind: kind.to_string(),
        name,
        namespace: None,
    })
}
