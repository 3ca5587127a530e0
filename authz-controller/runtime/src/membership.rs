//! Membership primitives: visibility of the cluster or project resource itself.
//!
//! Membership roles are named after the scope and whether the binding is owner-level. At most
//! one binding of a membership role to a subject exists; every binding that needs it is
//! recorded in its owner labels.

use crate::{
    core::{
        naming,
        ownership::{self, MEMBERSHIP_MARKERS},
        subject::RBAC_GROUP,
        Identity,
    },
    error::Result,
    k8s::{
        self, store, Cluster, ClusterRole, ClusterRoleBinding, ObjectMeta, PolicyRule, Project,
        ResourceExt, Role, RoleBinding, RoleRef, Store, Subject,
    },
    owner_reference,
    primitive::Claim,
    retry_on_conflict, Reconciler,
};
use tracing::info;

impl<S: Store> Reconciler<S> {
    /// Grants `subject` visibility of `cluster` on behalf of `binding`.
    pub(crate) async fn ensure_cluster_membership(
        &self,
        binding: &ObjectMeta,
        cluster: &Cluster,
        subject: &Subject,
        owner: bool,
    ) -> Result<()> {
        let role = naming::cluster_membership_role(&cluster.name_any(), owner);
        let rules = vec![membership_rule("clusters", &cluster.name_any(), owner)];
        let owner_ref = owner_reference(cluster)?;
        retry_on_conflict(&role, || self.try_ensure_cluster_role(&role, &rules, &owner_ref))
            .await?;

        // Moving between member and owner leaves the other role's binding behind.
        self.release_cluster_membership(binding, Some(role.as_str()))
            .await?;

        let role = RoleRef {
            api_group: RBAC_GROUP.to_string(),
            kind: "ClusterRole".to_string(),
            name: role,
        };
        let identity = Identity::new(&role, subject);
        let existing = self
            .index
            .read()
            .cluster_role_bindings_for(&identity)
            .iter()
            .map(ResourceExt::name_any)
            .collect();
        let claim = Claim {
            namespace: None,
            name: naming::cluster_role_binding(&role, subject),
            existing,
            role,
            subject,
        };
        let (key, marker) = membership_owner(binding)?;
        self.claim::<ClusterRoleBinding>(&claim, &key, marker).await
    }

    /// Grants `subject` visibility of `project` on behalf of `binding`. The role and its
    /// binding live in the cluster's namespace.
    pub(crate) async fn ensure_project_membership(
        &self,
        binding: &ObjectMeta,
        project: &Project,
        subject: &Subject,
        owner: bool,
    ) -> Result<()> {
        let namespace = project.namespace().unwrap_or_default();
        let role = naming::project_membership_role(&project.name_any(), owner);
        let rules = vec![membership_rule("projects", &project.name_any(), owner)];
        let owner_ref = owner_reference(project)?;
        retry_on_conflict(&role, || {
            self.try_ensure_role(&namespace, &role, &rules, &owner_ref)
        })
        .await?;

        self.release_project_membership(binding, Some(namespace.as_str()), Some(role.as_str()))
            .await?;

        let role = RoleRef {
            api_group: RBAC_GROUP.to_string(),
            kind: "Role".to_string(),
            name: role,
        };
        let identity = Identity::new(&role, subject);
        let existing = self
            .index
            .read()
            .role_bindings_for(&namespace, &identity)
            .iter()
            .map(ResourceExt::name_any)
            .collect();
        let claim = Claim {
            namespace: Some(namespace.as_str()),
            name: naming::role_binding(&namespace, &role, subject),
            existing,
            role,
            subject,
        };
        let (key, marker) = membership_owner(binding)?;
        self.claim::<RoleBinding>(&claim, &key, marker).await
    }

    /// Releases `binding`'s membership ClusterRoleBindings, except those bound to `keep`.
    pub(crate) async fn release_cluster_membership(
        &self,
        binding: &ObjectMeta,
        keep: Option<&str>,
    ) -> Result<()> {
        for scheme in ownership::schemes() {
            let Some(key) = scheme.owner_key(binding) else {
                continue;
            };
            let crbs = self
                .index
                .read()
                .cluster_role_bindings_owned_by(&key, &MEMBERSHIP_MARKERS);
            for crb in crbs.iter().filter(|crb| Some(crb.role_ref.name.as_str()) != keep) {
                self.release::<ClusterRoleBinding>(None, &crb.name_any(), &key, &MEMBERSHIP_MARKERS)
                    .await?;
            }
        }
        Ok(())
    }

    /// Releases `binding`'s membership RoleBindings in `namespace` (or in any namespace),
    /// except those bound to `keep`.
    pub(crate) async fn release_project_membership(
        &self,
        binding: &ObjectMeta,
        namespace: Option<&str>,
        keep: Option<&str>,
    ) -> Result<()> {
        for scheme in ownership::schemes() {
            let Some(key) = scheme.owner_key(binding) else {
                continue;
            };
            let rbs = self
                .index
                .read()
                .role_bindings_owned_by(&key, &MEMBERSHIP_MARKERS);
            let rbs = rbs.iter().filter(|rb| {
                (namespace.is_none() || rb.namespace().as_deref() == namespace)
                    && Some(rb.role_ref.name.as_str()) != keep
            });
            for rb in rbs {
                let ns = rb.namespace();
                self.release::<RoleBinding>(ns.as_deref(), &rb.name_any(), &key, &MEMBERSHIP_MARKERS)
                    .await?;
            }
        }
        Ok(())
    }

    async fn try_ensure_cluster_role(
        &self,
        name: &str,
        rules: &[PolicyRule],
        owner: &k8s::OwnerReference,
    ) -> Result<()> {
        match self.store.get::<ClusterRole>(None, name).await {
            Ok(mut role) => {
                if role.rules.as_deref() == Some(rules) {
                    return Ok(());
                }
                info!(%name, "Updating membership ClusterRole");
                role.rules = Some(rules.to_vec());
                self.store.update(&role).await?;
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                let role = ClusterRole {
                    metadata: ObjectMeta {
                        name: Some(name.to_string()),
                        owner_references: Some(vec![owner.clone()]),
                        ..Default::default()
                    },
                    rules: Some(rules.to_vec()),
                    ..Default::default()
                };
                info!(%name, "Creating membership ClusterRole");
                create_racing(self.store.create(&role).await)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn try_ensure_role(
        &self,
        namespace: &str,
        name: &str,
        rules: &[PolicyRule],
        owner: &k8s::OwnerReference,
    ) -> Result<()> {
        match self.store.get::<Role>(Some(namespace), name).await {
            Ok(mut role) => {
                if role.rules.as_deref() == Some(rules) {
                    return Ok(());
                }
                info!(%namespace, %name, "Updating membership Role");
                role.rules = Some(rules.to_vec());
                self.store.update(&role).await?;
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                let role = Role {
                    metadata: ObjectMeta {
                        name: Some(name.to_string()),
                        namespace: Some(namespace.to_string()),
                        owner_references: Some(vec![owner.clone()]),
                        ..Default::default()
                    },
                    rules: Some(rules.to_vec()),
                };
                info!(%namespace, %name, "Creating membership Role");
                create_racing(self.store.create(&role).await)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// The owner key and membership marker `binding` claims primitives with.
pub(crate) fn membership_owner(binding: &ObjectMeta) -> Result<(String, &'static str)> {
    let scheme = ownership::scheme_for(binding);
    let key = scheme.owner_key(binding).ok_or_else(|| {
        store::Error::Invalid(format!(
            "binding {} has no owner key",
            binding.name.as_deref().unwrap_or_default()
        ))
    })?;
    Ok((key, scheme.membership_marker()))
}

/// Access to a single named cluster or project: read-only for members, full for owners.
fn membership_rule(resource: &str, name: &str, owner: bool) -> PolicyRule {
    let verb = if owner { "*" } else { "get" };
    PolicyRule {
        api_groups: Some(vec![k8s::GROUP.to_string()]),
        resources: Some(vec![resource.to_string()]),
        resource_names: Some(vec![name.to_string()]),
        verbs: vec![verb.to_string()],
        ..Default::default()
    }
}

/// A create that lost a race is retried from a fresh read.
pub(crate) fn create_racing<K>(result: store::Result<K>) -> Result<()> {
    match result {
        Ok(_) => Ok(()),
        Err(e) if e.is_already_exists() => Err(store::Error::Conflict(e.to_string()).into()),
        Err(e) => Err(e.into()),
    }
}
