use kube::{CustomResource, Resource};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Grants a subject a role template within a cluster. Lives in the cluster's namespace.
#[derive(Clone, Debug, Default, PartialEq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "management.cattle.io",
    version = "v3",
    kind = "ClusterRoleTemplateBinding",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterRoleTemplateBindingSpec {
    pub cluster_name: String,
    pub role_template_name: String,
    #[serde(flatten)]
    pub subject: BindingSubject,
}

/// Grants a subject a role template within a project. Lives in the project's namespace.
#[derive(Clone, Debug, Default, PartialEq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "management.cattle.io",
    version = "v3",
    kind = "ProjectRoleTemplateBinding",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRoleTemplateBindingSpec {
    /// `<cluster>:<project>`.
    pub project_name: String,
    pub role_template_name: String,
    #[serde(flatten)]
    pub subject: BindingSubject,
    /// `<namespace>:<name>` of a service account.
    pub service_account: Option<String>,
}

/// The subject fields shared by cluster and project bindings. Exactly one kind of subject may
/// be set.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BindingSubject {
    pub user_name: Option<String>,
    pub user_principal_name: Option<String>,
    pub group_name: Option<String>,
    pub group_principal_name: Option<String>,
}

/// Common accessors over cluster and project bindings.
pub trait RoleTemplateBinding: Resource<DynamicType = ()> {
    fn role_template_name(&self) -> &str;

    fn subject(&self) -> &BindingSubject;

    fn subject_mut(&mut self) -> &mut BindingSubject;

    fn service_account(&self) -> Option<&str> {
        None
    }
}

impl RoleTemplateBinding for ClusterRoleTemplateBinding {
    fn role_template_name(&self) -> &str {
        &self.spec.role_template_name
    }

    fn subject(&self) -> &BindingSubject {
        &self.spec.subject
    }

    fn subject_mut(&mut self) -> &mut BindingSubject {
        &mut self.spec.subject
    }
}

impl RoleTemplateBinding for ProjectRoleTemplateBinding {
    fn role_template_name(&self) -> &str {
        &self.spec.role_template_name
    }

    fn subject(&self) -> &BindingSubject {
        &self.spec.subject
    }

    fn subject_mut(&mut self) -> &mut BindingSubject {
        &mut self.spec.subject
    }

    fn service_account(&self) -> Option<&str> {
        self.spec.service_account.as_deref()
    }
}
