use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A managed cluster. Its name doubles as the name of its backing namespace.
#[derive(Clone, Debug, Default, PartialEq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(group = "management.cattle.io", version = "v3", kind = "Cluster")]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    pub display_name: Option<String>,
}

/// A project within a cluster. Lives in the cluster's namespace; its name doubles as the name
/// of its backing namespace.
#[derive(Clone, Debug, Default, PartialEq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(group = "management.cattle.io", version = "v3", kind = "Project", namespaced)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSpec {
    pub display_name: Option<String>,
    pub cluster_name: String,
}
