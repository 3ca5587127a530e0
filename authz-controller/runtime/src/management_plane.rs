//! Management-plane RoleBindings.
//!
//! Resources that belong to a cluster or project but are stored in its namespace are guarded by
//! one Role per role template in that namespace. Bindings get one RoleBinding per template in
//! their closure that grants any of the namespace's resources. Bindings in their own namespace
//! are owned by reference; those fanned out into other namespaces are owned by label.

use crate::{
    core::{
        naming,
        ownership::{self, CRTB_IN_PROJECT_BINDING_OWNER, PRTB_IN_CLUSTER_BINDING_OWNER},
        role_template::Closure,
        rules::{
            self, Resource, COMMON_MANAGEMENT_PLANE, PROJECT_IN_CLUSTER_MANAGEMENT_PLANE,
            PROJECT_MANAGEMENT_PLANE,
        },
        subject::RBAC_GROUP,
    },
    error::Result,
    index::ObjKey,
    k8s::{
        ClusterRoleTemplateBinding, Object, ObjectMeta, PolicyRule, Project,
        ProjectRoleTemplateBinding, Resource as _, ResourceExt, Role, RoleBinding, RoleRef, Selector, Store,
        Subject,
    },
    membership::{create_racing, membership_owner},
    owner_reference, retry_on_conflict, Reconciler,
};
use maplit::btreemap;
use std::collections::BTreeMap;
use tracing::{debug, info};

impl<S: Store> Reconciler<S> {
    /// Converges the RoleBindings `binding` owns by reference in `namespace`.
    pub(crate) async fn sync_management_plane<B: Object>(
        &self,
        binding: &B,
        namespace: &str,
        closure: &Closure,
        registry: &[Resource],
        subject: &Subject,
    ) -> Result<()> {
        let owner = owner_reference(binding)?;
        let mut desired = BTreeMap::new();
        for rt in closure.templates() {
            let rules = rules::management_plane_rules(&rt.rules, registry);
            if rules.is_empty() {
                continue;
            }
            self.ensure_management_role(namespace, &rt.name, &rules).await?;
            let name = naming::management_plane_binding(&binding.name_any(), &rt.name);
            let mut rb = role_binding(namespace, name, &rt.name, subject);
            rb.metadata.owner_references = Some(vec![owner.clone()]);
            desired.insert(ObjKey::of(&rb), rb);
        }

        let current = self
            .index
            .read()
            .role_bindings_with_owner(&owner.uid)
            .into_iter()
            .filter(|rb| rb.namespace().as_deref() == Some(namespace))
            .collect();
        self.converge_role_bindings(current, desired).await
    }

    /// Propagates a cluster binding's management-plane access into each project of its cluster.
    ///
    /// Projects being deleted are skipped. Resources common to clusters and projects are only
    /// propagated for administrative templates.
    pub(crate) async fn sync_project_namespaces(
        &self,
        crtb: &ClusterRoleTemplateBinding,
        closure: &Closure,
        subject: &Subject,
    ) -> Result<()> {
        let (key, _) = membership_owner(crtb.meta())?;
        let projects = self
            .store
            .list::<Project>(Some(&crtb.spec.cluster_name), &Selector::default())
            .await?;

        let mut desired = BTreeMap::new();
        for project in projects.iter() {
            if project.meta().deletion_timestamp.is_some() {
                debug!(project = %project.name_any(), "Skipping project being deleted");
                continue;
            }
            let namespace = project.name_any();
            for rt in closure.templates() {
                let registry = PROJECT_MANAGEMENT_PLANE
                    .iter()
                    .filter(|r| rt.administrative || !COMMON_MANAGEMENT_PLANE.contains(*r));
                let rules = rules::management_plane_rules(&rt.rules, registry);
                if rules.is_empty() {
                    continue;
                }
                self.ensure_management_role(&namespace, &rt.name, &rules)
                    .await?;
                let name = naming::management_plane_binding(&crtb.name_any(), &rt.name);
                let mut rb = role_binding(&namespace, name, &rt.name, subject);
                rb.metadata.labels =
                    Some(btreemap! { key.clone() => CRTB_IN_PROJECT_BINDING_OWNER.to_string() });
                desired.insert(ObjKey::of(&rb), rb);
            }
        }

        let current = self
            .index
            .read()
            .role_bindings_owned_by(&key, &[CRTB_IN_PROJECT_BINDING_OWNER]);
        self.converge_role_bindings(current, desired).await
    }

    /// Grants a project binding access to the shared resources in its cluster's namespace.
    pub(crate) async fn sync_cluster_namespace(
        &self,
        prtb: &ProjectRoleTemplateBinding,
        cluster_namespace: &str,
        closure: &Closure,
        subject: &Subject,
    ) -> Result<()> {
        let (key, _) = membership_owner(prtb.meta())?;
        let prtb_namespace = prtb.namespace().unwrap_or_default();

        let mut desired = BTreeMap::new();
        for rt in closure.templates() {
            let rules = rules::management_plane_rules(&rt.rules, PROJECT_IN_CLUSTER_MANAGEMENT_PLANE);
            if rules.is_empty() {
                continue;
            }
            self.ensure_management_role(cluster_namespace, &rt.name, &rules)
                .await?;
            let name = naming::project_binding_in_cluster(&prtb_namespace, &prtb.name_any(), &rt.name);
            let mut rb = role_binding(cluster_namespace, name, &rt.name, subject);
            rb.metadata.labels =
                Some(btreemap! { key.clone() => PRTB_IN_CLUSTER_BINDING_OWNER.to_string() });
            desired.insert(ObjKey::of(&rb), rb);
        }

        let current = self
            .index
            .read()
            .role_bindings_owned_by(&key, &[PRTB_IN_CLUSTER_BINDING_OWNER]);
        self.converge_role_bindings(current, desired).await
    }

    /// Deletes the management-plane RoleBindings of a deleted binding: those it owns by
    /// reference and those labelled with one of its owner keys under `marker`.
    pub(crate) async fn remove_management_plane<B: Object>(
        &self,
        binding: &B,
        marker: &str,
    ) -> Result<()> {
        let mut stale = Vec::new();
        if let Some(uid) = binding.meta().uid.as_deref() {
            stale.extend(self.index.read().role_bindings_with_owner(uid));
        }
        for scheme in ownership::schemes() {
            if let Some(key) = scheme.owner_key(binding.meta()) {
                stale.extend(self.index.read().role_bindings_owned_by(&key, &[marker]));
            }
        }
        for rb in stale {
            self.delete::<RoleBinding>(rb.namespace().as_deref(), &rb.name_any())
                .await?;
        }
        Ok(())
    }

    /// Ensures the Role backing a role template in `namespace` grants at least `rules`.
    async fn ensure_management_role(
        &self,
        namespace: &str,
        name: &str,
        rules: &[PolicyRule],
    ) -> Result<()> {
        retry_on_conflict(name, || self.try_ensure_management_role(namespace, name, rules)).await
    }

    async fn try_ensure_management_role(
        &self,
        namespace: &str,
        name: &str,
        desired: &[PolicyRule],
    ) -> Result<()> {
        match self.store.get::<Role>(Some(namespace), name).await {
            Ok(mut role) => {
                let current = role.rules.as_deref().unwrap_or_default();
                let Some(merged) = rules::merge(current, desired) else {
                    return Ok(());
                };
                info!(%namespace, %name, "Updating management-plane Role");
                role.rules = Some(merged);
                self.store.update(&role).await?;
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                let role = Role {
                    metadata: ObjectMeta {
                        name: Some(name.to_string()),
                        namespace: Some(namespace.to_string()),
                        ..Default::default()
                    },
                    rules: Some(desired.to_vec()),
                };
                info!(%namespace, %name, "Creating management-plane Role");
                create_racing(self.store.create(&role).await)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Creates missing RoleBindings, recreates drifted ones and deletes those not desired.
    ///
    /// A RoleBinding's role is immutable, so drift is repaired by replacement.
    async fn converge_role_bindings(
        &self,
        current: Vec<RoleBinding>,
        desired: BTreeMap<ObjKey, RoleBinding>,
    ) -> Result<()> {
        let mut current = current
            .into_iter()
            .map(|rb| (ObjKey::of(&rb), rb))
            .collect::<BTreeMap<_, _>>();

        for (key, rb) in desired {
            if let Some(existing) = current.remove(&key) {
                if existing.role_ref == rb.role_ref && existing.subjects == rb.subjects {
                    continue;
                }
                self.delete::<RoleBinding>(Some(&key.namespace), &key.name)
                    .await?;
            }
            info!(ns = %key.namespace, name = %key.name, role = %rb.role_ref.name, "Creating RoleBinding");
            match self.store.create(&rb).await {
                Ok(_) => {}
                Err(e) if e.is_already_exists() => debug!(%key, "RoleBinding already exists"),
                Err(e) => return Err(e.into()),
            }
        }

        for key in current.into_keys() {
            self.delete::<RoleBinding>(Some(&key.namespace), &key.name)
                .await?;
        }
        Ok(())
    }
}

fn role_binding(namespace: &str, name: String, role: &str, subject: &Subject) -> RoleBinding {
    RoleBinding {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: RBAC_GROUP.to_string(),
            kind: "Role".to_string(),
            name: role.to_string(),
        },
        subjects: Some(vec![subject.clone()]),
    }
}
