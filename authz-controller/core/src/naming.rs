//! Deterministic names for generated objects.
//!
//! Generated primitives are found again by name, so the creation path and every lookup path
//! must derive names through these functions.

use authz_controller_k8s_api::{ObjectMeta, RoleRef, Subject};
use data_encoding::{BASE32_NOPAD, HEXLOWER};
use sha2::{Digest, Sha256};

/// Object names may not exceed this length.
const MAX_NAME_LEN: usize = 63;

/// Length of the hash suffix embedded in binding names.
const BINDING_HASH_LEN: usize = 10;

/// Joins `parts` with `-`, truncating and suffixing a hash when the result is too long.
pub fn safe_concat(parts: &[&str]) -> String {
    let full = parts.join("-");
    if full.len() <= MAX_NAME_LEN {
        return full;
    }

    let digest = HEXLOWER.encode(&Sha256::digest(full.as_bytes()));
    let bytes = full.as_bytes();
    // The cut must not leave a trailing separator.
    let (keep, suffix) = if bytes[56].is_ascii_lowercase() || bytes[56].is_ascii_digit() {
        (57, 5)
    } else {
        (56, 6)
    };
    format!(
        "{}-{}",
        String::from_utf8_lossy(&bytes[..keep]),
        &digest[..suffix]
    )
}

/// The name of the RoleBinding granting `role` to `subject` in `namespace`.
pub fn role_binding(namespace: &str, role: &RoleRef, subject: &Subject) -> String {
    format!("rb-{}", binding_hash(namespace, role, subject))
}

/// The name of the ClusterRoleBinding granting `role` to `subject`.
pub fn cluster_role_binding(role: &RoleRef, subject: &Subject) -> String {
    format!("crb-{}", binding_hash("", role, subject))
}

fn binding_hash(namespace: &str, role: &RoleRef, subject: &Subject) -> String {
    let input = [
        namespace,
        &role.kind,
        &role.name,
        &subject.kind,
        &subject.name,
    ]
    .concat();
    short_hash(&input)
}

fn short_hash(input: &str) -> String {
    let mut encoded = BASE32_NOPAD.encode(&Sha256::digest(input.as_bytes()));
    encoded.truncate(BINDING_HASH_LEN);
    encoded.to_ascii_lowercase()
}

/// The composite owner key of a cluster or project binding.
pub fn owner_key(binding: &ObjectMeta) -> String {
    let ns = binding.namespace.as_deref().unwrap_or_default();
    let name = binding.name.as_deref().unwrap_or_default();
    safe_concat(&[&format!("{ns}_{name}")])
}

/// The name of the user created for an external principal.
pub fn user_for_principal(principal: &str) -> String {
    format!("u-{}", short_hash(principal))
}

pub fn cluster_membership_role(cluster: &str, owner: bool) -> String {
    let suffix = if owner { "clusterowner" } else { "clustermember" };
    format!("{cluster}-{suffix}").to_ascii_lowercase()
}

pub fn project_membership_role(project: &str, owner: bool) -> String {
    let suffix = if owner { "projectowner" } else { "projectmember" };
    format!("{project}-{suffix}").to_ascii_lowercase()
}

/// The management-plane RoleBinding of a binding for one of its role templates.
pub fn management_plane_binding(binding: &str, role_template: &str) -> String {
    format!("{binding}-{role_template}")
}

/// The cluster-namespace RoleBinding of a project binding for one of its role templates.
pub fn project_binding_in_cluster(namespace: &str, binding: &str, role_template: &str) -> String {
    format!("{namespace}-{binding}-{role_template}")
}

pub fn global_role(name: &str) -> String {
    format!("cattle-globalrole-{name}")
}

pub fn global_role_binding(name: &str) -> String {
    format!("cattle-globalrolebinding-{name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn role(name: &str) -> RoleRef {
        RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "ClusterRole".to_string(),
            name: name.to_string(),
        }
    }

    fn group(name: &str) -> Subject {
        Subject {
            api_group: Some("rbac.authorization.k8s.io".to_string()),
            kind: "Group".to_string(),
            name: name.to_string(),
            namespace: None,
        }
    }

    #[test]
    fn short_names_are_joined() {
        assert_eq!(safe_concat(&["a", "b", "c"]), "a-b-c");
    }

    #[test]
    fn long_names_are_truncated() {
        let long = "a".repeat(70);
        let name = safe_concat(&[&long]);
        assert_eq!(name.len(), 63);
        assert_eq!(&name[..58], &format!("{}-", "a".repeat(57)));

        // A separator at the cut point is dropped in favour of a longer hash.
        let dashed = format!("{}-{}", "b".repeat(56), "c".repeat(20));
        let name = safe_concat(&[&dashed]);
        assert_eq!(name.len(), 63);
        assert_eq!(&name[..57], &format!("{}-", "b".repeat(56)));
    }

    #[test]
    fn binding_names_are_stable() {
        let a = cluster_role_binding(&role("c-1-clustermember"), &group("devs"));
        let b = cluster_role_binding(&role("c-1-clustermember"), &group("devs"));
        assert_eq!(a, b);
        assert_eq!(a, "crb-q4x3hu4skb");

        assert_ne!(
            a,
            cluster_role_binding(&role("c-1-clusterowner"), &group("devs"))
        );
        assert_ne!(
            role_binding("ns-a", &role("r"), &group("devs")),
            role_binding("ns-b", &role("r"), &group("devs")),
        );
    }

    #[test]
    fn owner_keys() {
        let meta = ObjectMeta {
            namespace: Some("c-abc".to_string()),
            name: Some("crtb-xyz".to_string()),
            ..Default::default()
        };
        assert_eq!(owner_key(&meta), "c-abc_crtb-xyz");
    }

    #[test]
    fn principal_users() {
        assert_eq!(user_for_principal("github_user://1"), "u-ngmeaicbcg");
    }

    #[test]
    fn membership_roles() {
        assert_eq!(cluster_membership_role("C-1", true), "c-1-clusterowner");
        assert_eq!(project_membership_role("p-1", false), "p-1-projectmember");
    }
}
