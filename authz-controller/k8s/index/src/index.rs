use crate::{multimap::Multimap, BindingRef, ObjKey, SharedIndex};
use ahash::{AHashMap, AHashSet};
use authz_controller_core::{
    ownership::ALL_MARKERS,
    role_template::RoleTemplateLookup,
    Identity,
};
use authz_controller_k8s_api::{
    labels::Map, ClusterRoleBinding, ClusterRoleTemplateBinding, GlobalRoleBinding, PolicyRule,
    ProjectRoleTemplateBinding, RoleBinding, RoleTemplate,
};
use parking_lot::RwLock;
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct Index {
    pub(crate) role_templates: AHashMap<String, RoleTemplate>,
    /// Parent template -> templates that inherit from it.
    pub(crate) inherited_by: Multimap<String, String>,
    pub(crate) cluster_role_rules: AHashMap<String, Vec<PolicyRule>>,

    pub(crate) crtbs: AHashMap<ObjKey, ClusterRoleTemplateBinding>,
    pub(crate) prtbs: AHashMap<ObjKey, ProjectRoleTemplateBinding>,
    pub(crate) grbs: AHashMap<String, GlobalRoleBinding>,
    pub(crate) bindings_by_role_template: Multimap<String, BindingRef>,
    pub(crate) bindings_by_user: Multimap<String, BindingRef>,

    pub(crate) crbs: AHashMap<String, ClusterRoleBinding>,
    pub(crate) crbs_by_identity: Multimap<Identity, String>,
    pub(crate) crbs_by_owner: Multimap<String, String>,

    pub(crate) rbs: AHashMap<ObjKey, RoleBinding>,
    pub(crate) rbs_by_identity: Multimap<(String, Identity), ObjKey>,
    pub(crate) rbs_by_owner: Multimap<String, ObjKey>,
    pub(crate) rbs_by_owner_ref: Multimap<String, ObjKey>,
}

/// The owner-label keys of a primitive, of any generation and relationship.
pub(crate) fn owner_keys(labels: &Map) -> impl Iterator<Item = &String> {
    labels
        .iter()
        .filter(|(_, v)| ALL_MARKERS.contains(&v.as_str()))
        .map(|(k, _)| k)
}

// === impl Index ===

impl Index {
    pub fn shared() -> SharedIndex {
        Arc::new(RwLock::new(Self::default()))
    }

    /// Every binding whose role template is `name` or inherits from it.
    pub fn bindings_for_role_template(&self, name: &str) -> Vec<BindingRef> {
        let mut templates = AHashSet::new();
        let mut pending = vec![name.to_string()];
        while let Some(rt) = pending.pop() {
            if templates.insert(rt.clone()) {
                pending.extend(self.inherited_by.get(&rt).cloned());
            }
        }

        let mut bindings = templates
            .iter()
            .flat_map(|rt| self.bindings_by_role_template.get(rt))
            .cloned()
            .collect::<Vec<_>>();
        bindings.sort();
        bindings.dedup();
        bindings
    }

    /// Every cluster, project and global binding naming `user`.
    pub fn bindings_for_user(&self, user: &str) -> Vec<BindingRef> {
        let mut bindings = self.bindings_by_user.get(user).cloned().collect::<Vec<_>>();
        bindings.sort();
        bindings
    }

    pub fn cluster_role_bindings_for(&self, identity: &Identity) -> Vec<ClusterRoleBinding> {
        let mut names = self.crbs_by_identity.get(identity).collect::<Vec<_>>();
        names.sort();
        names
            .into_iter()
            .filter_map(|name| self.crbs.get(name))
            .cloned()
            .collect()
    }

    pub fn role_bindings_for(&self, namespace: &str, identity: &Identity) -> Vec<RoleBinding> {
        let key = (namespace.to_string(), identity.clone());
        self.role_bindings(self.rbs_by_identity.get(&key))
    }

    /// ClusterRoleBindings carrying `key` as an owner under one of `markers`.
    pub fn cluster_role_bindings_owned_by(
        &self,
        key: &str,
        markers: &[&str],
    ) -> Vec<ClusterRoleBinding> {
        let mut names = self.crbs_by_owner.get(key).collect::<Vec<_>>();
        names.sort();
        names
            .into_iter()
            .filter_map(|name| self.crbs.get(name))
            .filter(|crb| has_marker(crb.metadata.labels.as_ref(), key, markers))
            .cloned()
            .collect()
    }

    /// RoleBindings, in any namespace, carrying `key` as an owner under one of `markers`.
    pub fn role_bindings_owned_by(&self, key: &str, markers: &[&str]) -> Vec<RoleBinding> {
        self.role_bindings(self.rbs_by_owner.get(key))
            .into_iter()
            .filter(|rb| has_marker(rb.metadata.labels.as_ref(), key, markers))
            .collect()
    }

    /// RoleBindings with an owner reference to `uid`.
    pub fn role_bindings_with_owner(&self, uid: &str) -> Vec<RoleBinding> {
        self.role_bindings(self.rbs_by_owner_ref.get(uid))
    }

    fn role_bindings<'k>(&self, keys: impl Iterator<Item = &'k ObjKey>) -> Vec<RoleBinding> {
        let mut keys = keys.collect::<Vec<_>>();
        keys.sort();
        keys.into_iter()
            .filter_map(|k| self.rbs.get(k))
            .cloned()
            .collect()
    }
}

fn has_marker(labels: Option<&Map>, key: &str, markers: &[&str]) -> bool {
    labels
        .and_then(|l| l.get(key))
        .map(|v| markers.contains(&v.as_str()))
        .unwrap_or(false)
}

impl RoleTemplateLookup for Index {
    fn role_template(&self, name: &str) -> Option<RoleTemplate> {
        self.role_templates.get(name).cloned()
    }

    fn cluster_role_rules(&self, name: &str) -> Option<Vec<PolicyRule>> {
        self.cluster_role_rules.get(name).cloned()
    }
}
