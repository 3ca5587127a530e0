use crate::{BindingRef, Index, ObjKey};
use authz_controller_k8s_api::{
    ClusterRoleTemplateBinding, GlobalRoleBinding, ProjectRoleTemplateBinding, ResourceExt,
    RoleTemplateBinding,
};

impl kubert::index::IndexNamespacedResource<ClusterRoleTemplateBinding> for Index {
    fn apply(&mut self, crtb: ClusterRoleTemplateBinding) {
        let key = ObjKey::of(&crtb);
        self.forget_crtb(&key);
        self.remember(BindingRef::Cluster(key.clone()), &crtb);
        self.crtbs.insert(key, crtb);
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.forget_crtb(&ObjKey::new(namespace, name));
    }
}

impl kubert::index::IndexNamespacedResource<ProjectRoleTemplateBinding> for Index {
    fn apply(&mut self, prtb: ProjectRoleTemplateBinding) {
        let key = ObjKey::of(&prtb);
        self.forget_prtb(&key);
        self.remember(BindingRef::Project(key.clone()), &prtb);
        self.prtbs.insert(key, prtb);
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.forget_prtb(&ObjKey::new(namespace, name));
    }
}

impl kubert::index::IndexClusterResource<GlobalRoleBinding> for Index {
    fn apply(&mut self, grb: GlobalRoleBinding) {
        let name = grb.name_any();
        self.forget_grb(&name);
        if let Some(user) = grb.spec.user_name.as_ref().filter(|u| !u.is_empty()) {
            self.bindings_by_user
                .insert(user.clone(), BindingRef::Global(name.clone()));
        }
        self.grbs.insert(name, grb);
    }

    fn delete(&mut self, name: String) {
        self.forget_grb(&name);
    }
}

impl Index {
    fn remember<B: RoleTemplateBinding>(&mut self, binding: BindingRef, rtb: &B) {
        self.bindings_by_role_template
            .insert(rtb.role_template_name().to_string(), binding.clone());
        if let Some(user) = rtb.subject().user_name.as_ref().filter(|u| !u.is_empty()) {
            self.bindings_by_user.insert(user.clone(), binding);
        }
    }

    fn forget<B: RoleTemplateBinding>(&mut self, binding: &BindingRef, rtb: &B) {
        self.bindings_by_role_template
            .remove(rtb.role_template_name(), binding);
        if let Some(user) = rtb.subject().user_name.as_deref() {
            self.bindings_by_user.remove(user, binding);
        }
    }

    fn forget_crtb(&mut self, key: &ObjKey) {
        if let Some(old) = self.crtbs.remove(key) {
            self.forget(&BindingRef::Cluster(key.clone()), &old);
        }
    }

    fn forget_prtb(&mut self, key: &ObjKey) {
        if let Some(old) = self.prtbs.remove(key) {
            self.forget(&BindingRef::Project(key.clone()), &old);
        }
    }

    fn forget_grb(&mut self, name: &str) {
        if let Some(old) = self.grbs.remove(name) {
            if let Some(user) = old.spec.user_name.as_deref() {
                self.bindings_by_user
                    .remove(user, &BindingRef::Global(name.to_string()));
            }
        }
    }
}
