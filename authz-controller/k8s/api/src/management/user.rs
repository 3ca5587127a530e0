use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(group = "management.cattle.io", version = "v3", kind = "User")]
#[serde(rename_all = "camelCase")]
pub struct UserSpec {
    pub display_name: Option<String>,
    pub username: Option<String>,
    /// External identities, e.g. `github_user://1234`.
    #[serde(default)]
    pub principal_ids: Vec<String>,
}

/// A session token issued to a user.
#[derive(Clone, Debug, Default, PartialEq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(group = "management.cattle.io", version = "v3", kind = "Token")]
#[serde(rename_all = "camelCase")]
pub struct TokenSpec {
    pub user_id: String,
    pub auth_provider: Option<String>,
}
