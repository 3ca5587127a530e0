use k8s_openapi::api::rbac::v1::PolicyRule;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(group = "management.cattle.io", version = "v3", kind = "GlobalRole")]
#[serde(rename_all = "camelCase")]
pub struct GlobalRoleSpec {
    pub display_name: Option<String>,
    #[serde(default)]
    pub rules: Vec<PolicyRule>,
    #[serde(default)]
    pub builtin: bool,
}

/// Binds a single user or group principal to a [`GlobalRole`].
#[derive(Clone, Debug, Default, PartialEq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(group = "management.cattle.io", version = "v3", kind = "GlobalRoleBinding")]
#[serde(rename_all = "camelCase")]
pub struct GlobalRoleBindingSpec {
    pub global_role_name: String,
    pub user_name: Option<String>,
    pub group_principal_name: Option<String>,
}
