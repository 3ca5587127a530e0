use crate::{index::owner_keys, Index, ObjKey};
use authz_controller_core::Identity;
use authz_controller_k8s_api::{ClusterRoleBinding, ResourceExt, RoleBinding};

impl kubert::index::IndexClusterResource<ClusterRoleBinding> for Index {
    fn apply(&mut self, crb: ClusterRoleBinding) {
        let name = crb.name_any();
        self.forget_crb(&name);

        for key in owner_keys(crb.labels()) {
            self.crbs_by_owner.insert(key.clone(), name.clone());
        }
        if let Some(id) = Identity::of(&crb.role_ref, crb.subjects.as_deref()) {
            self.crbs_by_identity.insert(id, name.clone());
        }
        self.crbs.insert(name, crb);
    }

    fn delete(&mut self, name: String) {
        self.forget_crb(&name);
    }
}

impl kubert::index::IndexNamespacedResource<RoleBinding> for Index {
    fn apply(&mut self, rb: RoleBinding) {
        let key = ObjKey::of(&rb);
        self.forget_rb(&key);

        for owner in owner_keys(rb.labels()) {
            self.rbs_by_owner.insert(owner.clone(), key.clone());
        }
        for owner in rb.owner_references() {
            self.rbs_by_owner_ref.insert(owner.uid.clone(), key.clone());
        }
        if let Some(id) = Identity::of(&rb.role_ref, rb.subjects.as_deref()) {
            self.rbs_by_identity
                .insert((key.namespace.clone(), id), key.clone());
        }
        self.rbs.insert(key, rb);
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.forget_rb(&ObjKey::new(namespace, name));
    }
}

impl Index {
    fn forget_crb(&mut self, name: &str) {
        let Some(old) = self.crbs.remove(name) else {
            return;
        };
        let name = name.to_string();
        for key in owner_keys(old.labels()) {
            self.crbs_by_owner.remove(key, &name);
        }
        if let Some(id) = Identity::of(&old.role_ref, old.subjects.as_deref()) {
            self.crbs_by_identity.remove(&id, &name);
        }
    }

    fn forget_rb(&mut self, key: &ObjKey) {
        let Some(old) = self.rbs.remove(key) else {
            return;
        };
        for owner in owner_keys(old.labels()) {
            self.rbs_by_owner.remove(owner, key);
        }
        for owner in old.owner_references() {
            self.rbs_by_owner_ref.remove(&owner.uid, key);
        }
        if let Some(id) = Identity::of(&old.role_ref, old.subjects.as_deref()) {
            self.rbs_by_identity
                .remove(&(key.namespace.clone(), id), key);
        }
    }
}
