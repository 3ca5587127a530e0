use k8s_openapi::api::rbac::v1::PolicyRule;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A named, reusable bundle of permission rules that may inherit from other templates.
#[derive(Clone, Debug, Default, PartialEq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(group = "management.cattle.io", version = "v3", kind = "RoleTemplate")]
#[serde(rename_all = "camelCase")]
pub struct RoleTemplateSpec {
    pub display_name: Option<String>,

    #[serde(default)]
    pub rules: Vec<PolicyRule>,

    /// Templates whose rules this template inherits.
    #[serde(default)]
    pub role_template_names: Vec<String>,

    /// When set, rules are sourced from the ClusterRole of the same name rather than `rules`.
    #[serde(default)]
    pub external: bool,

    /// Overrides the backing ClusterRole's rules for external templates.
    pub external_rules: Option<Vec<PolicyRule>>,

    #[serde(default)]
    pub context: Context,

    #[serde(default)]
    pub builtin: bool,

    /// Administrative templates additionally grant the resources shared by clusters and
    /// projects when propagated into project namespaces.
    #[serde(default)]
    pub administrative: bool,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Context {
    #[default]
    Cluster,
    Project,
}
