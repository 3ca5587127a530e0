use crate::Index;
use authz_controller_k8s_api::{ClusterRole, ResourceExt, RoleTemplate};

impl kubert::index::IndexClusterResource<RoleTemplate> for Index {
    fn apply(&mut self, rt: RoleTemplate) {
        let name = rt.name_any();
        self.forget_role_template(&name);
        for parent in rt.spec.role_template_names.iter() {
            self.inherited_by.insert(parent.clone(), name.clone());
        }
        self.role_templates.insert(name, rt);
    }

    fn delete(&mut self, name: String) {
        self.forget_role_template(&name);
    }
}

/// Only rules are kept; they back external role templates.
impl kubert::index::IndexClusterResource<ClusterRole> for Index {
    fn apply(&mut self, role: ClusterRole) {
        let name = role.name_any();
        self.cluster_role_rules
            .insert(name, role.rules.unwrap_or_default());
    }

    fn delete(&mut self, name: String) {
        self.cluster_role_rules.remove(&name);
    }
}

impl Index {
    fn forget_role_template(&mut self, name: &str) {
        if let Some(old) = self.role_templates.remove(name) {
            for parent in old.spec.role_template_names.iter() {
                self.inherited_by.remove(parent, &name.to_string());
            }
        }
    }
}
