//! Management-plane resources and the rules that grant access to them.
//!
//! Resources that belong to a cluster or project but are stored centrally are guarded by
//! namespace-local Roles in the cluster's or project's namespace. Only blanket grants are
//! propagated: a rule restricted to specific resource names never is.

use authz_controller_k8s_api::PolicyRule;
use std::collections::{BTreeMap, BTreeSet};

/// An `(apiGroup, resource)` pair.
pub type Resource = (&'static str, &'static str);

const MANAGEMENT: &str = "management.cattle.io";
const PROJECT: &str = "project.cattle.io";

/// Resources in a cluster's namespace granted by cluster bindings.
pub const CLUSTER_MANAGEMENT_PLANE: &[Resource] = &[
    (MANAGEMENT, "clusterscans"),
    (MANAGEMENT, "catalogtemplates"),
    (MANAGEMENT, "catalogtemplateversions"),
    (MANAGEMENT, "clusteralertrules"),
    (MANAGEMENT, "clusteralertgroups"),
    (MANAGEMENT, "clustercatalogs"),
    (MANAGEMENT, "clusterloggings"),
    (MANAGEMENT, "clustermonitorgraphs"),
    (MANAGEMENT, "clusterregistrationtokens"),
    (MANAGEMENT, "clusterroletemplatebindings"),
    (MANAGEMENT, "etcdbackups"),
    (MANAGEMENT, "nodes"),
    (MANAGEMENT, "nodepools"),
    (MANAGEMENT, "notifiers"),
    (MANAGEMENT, "projects"),
    ("rke.cattle.io", "etcdsnapshots"),
];

/// Resources in a project's namespace granted by project bindings, and by cluster bindings
/// propagated into each project.
pub const PROJECT_MANAGEMENT_PLANE: &[Resource] = &[
    (PROJECT, "apps"),
    (PROJECT, "apprevisions"),
    (PROJECT, "sourcecodeproviderconfigs"),
    (PROJECT, "pipelines"),
    (PROJECT, "pipelineexecutions"),
    (PROJECT, "pipelinesettings"),
    (PROJECT, "sourcecodecredentials"),
    (PROJECT, "sourcecoderepositories"),
    (MANAGEMENT, "catalogtemplates"),
    (MANAGEMENT, "catalogtemplateversions"),
    (MANAGEMENT, "projectloggings"),
    (MANAGEMENT, "projectalertrules"),
    (MANAGEMENT, "projectalertgroups"),
    (MANAGEMENT, "projectcatalogs"),
    (MANAGEMENT, "projectmonitorgraphs"),
    (MANAGEMENT, "projectroletemplatebindings"),
    ("", "secrets"),
];

/// Resources in a cluster's namespace granted by project bindings.
pub const PROJECT_IN_CLUSTER_MANAGEMENT_PLANE: &[Resource] =
    &[(MANAGEMENT, "notifiers"), (MANAGEMENT, "clustercatalogs")];

/// Resources shared by clusters and projects. Only administrative templates propagate them
/// from a cluster binding into project namespaces.
pub const COMMON_MANAGEMENT_PLANE: &[Resource] = &[
    (MANAGEMENT, "catalogtemplates"),
    (MANAGEMENT, "catalogtemplateversions"),
];

/// The verbs `rules` grant on every object of `resource`.
pub fn blanket_verbs(rules: &[PolicyRule], (group, resource): Resource) -> BTreeSet<String> {
    let mut verbs = BTreeSet::new();
    for rule in rules {
        let names = rule.resource_names.as_deref().unwrap_or_default();
        if !names.is_empty() {
            continue;
        }
        let resources = rule.resources.as_deref().unwrap_or_default();
        if !resources.iter().any(|r| r == resource || r == "*") {
            continue;
        }
        let groups = rule.api_groups.as_deref().unwrap_or_default();
        if !groups.iter().any(|g| g == group || g == "*") {
            continue;
        }
        verbs.extend(rule.verbs.iter().cloned());
    }
    verbs
}

/// One rule per resource in `registry` that `rules` grant blanket access to, ordered by group
/// and resource.
pub fn management_plane_rules<'r>(
    rules: &[PolicyRule],
    registry: impl IntoIterator<Item = &'r Resource>,
) -> Vec<PolicyRule> {
    let mut granted = BTreeMap::new();
    for &resource in registry {
        let verbs = blanket_verbs(rules, resource);
        if !verbs.is_empty() {
            granted.insert(resource, verbs);
        }
    }
    granted
        .into_iter()
        .map(|((group, resource), verbs)| build_rule(group, resource, verbs))
        .collect()
}

pub fn build_rule(group: &str, resource: &str, verbs: impl IntoIterator<Item = String>) -> PolicyRule {
    let mut verbs = verbs.into_iter().collect::<Vec<_>>();
    verbs.sort();
    verbs.dedup();
    PolicyRule {
        api_groups: Some(vec![group.to_string()]),
        resources: Some(vec![resource.to_string()]),
        verbs,
        ..Default::default()
    }
}

/// Merges per-resource `desired` rules into a Role's `current` rules.
///
/// A current rule covering exactly the same group and resource is replaced when its verbs
/// differ; other current rules are left alone. Returns `None` when nothing changes.
pub fn merge(current: &[PolicyRule], desired: &[PolicyRule]) -> Option<Vec<PolicyRule>> {
    let mut merged = current.to_vec();
    let mut changed = false;
    for rule in desired {
        match merged.iter_mut().find(|r| same_target(r, rule)) {
            Some(existing) if same_verbs(existing, rule) => {}
            Some(existing) => {
                *existing = rule.clone();
                changed = true;
            }
            None => {
                merged.push(rule.clone());
                changed = true;
            }
        }
    }
    changed.then_some(merged)
}

fn same_target(a: &PolicyRule, b: &PolicyRule) -> bool {
    a.api_groups == b.api_groups
        && a.resources == b.resources
        && a.resource_names.as_deref().unwrap_or_default().is_empty()
        && b.resource_names.as_deref().unwrap_or_default().is_empty()
}

fn same_verbs(a: &PolicyRule, b: &PolicyRule) -> bool {
    verbs(a) == verbs(b)
}

fn verbs(rule: &PolicyRule) -> BTreeSet<&String> {
    rule.verbs.iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(groups: &[&str], resources: &[&str], names: &[&str], verbs: &[&str]) -> PolicyRule {
        let strings = |s: &[&str]| s.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        PolicyRule {
            api_groups: Some(strings(groups)),
            resources: Some(strings(resources)),
            resource_names: (!names.is_empty()).then(|| strings(names)),
            verbs: strings(verbs),
            ..Default::default()
        }
    }

    #[test]
    fn blanket_grants_only() {
        let rules = vec![
            rule(&[MANAGEMENT], &["nodes"], &[], &["list", "get"]),
            rule(&[MANAGEMENT], &["nodes"], &["node-1"], &["delete"]),
            rule(&["*"], &["*"], &[], &["watch"]),
            rule(&["apps"], &["nodes"], &[], &["create"]),
        ];
        assert_eq!(
            blanket_verbs(&rules, (MANAGEMENT, "nodes")),
            ["get", "list", "watch"]
                .iter()
                .map(|v| v.to_string())
                .collect::<BTreeSet<_>>()
        );
    }

    #[test]
    fn rules_per_resource() {
        let rules = vec![rule(
            &[MANAGEMENT],
            &["projects", "notifiers"],
            &[],
            &["update", "get"],
        )];
        let granted = management_plane_rules(&rules, CLUSTER_MANAGEMENT_PLANE);
        assert_eq!(
            granted,
            vec![
                build_rule(MANAGEMENT, "notifiers", ["get".to_string(), "update".to_string()]),
                build_rule(MANAGEMENT, "projects", ["get".to_string(), "update".to_string()]),
            ]
        );
        assert_eq!(granted[0].verbs, ["get", "update"]);
    }

    #[test]
    fn core_group_resources() {
        let rules = vec![rule(&[""], &["secrets"], &[], &["get"])];
        let granted = management_plane_rules(&rules, PROJECT_MANAGEMENT_PLANE);
        assert_eq!(granted, vec![build_rule("", "secrets", ["get".to_string()])]);
    }

    #[test]
    fn merges_changed_resources_only() {
        let unrelated = rule(&["apps"], &["deployments"], &[], &["get"]);
        let current = vec![
            build_rule(MANAGEMENT, "nodes", ["get".to_string()]),
            unrelated.clone(),
        ];

        let desired = vec![build_rule(MANAGEMENT, "nodes", ["get".to_string()])];
        assert_eq!(merge(&current, &desired), None);

        let desired = vec![
            build_rule(MANAGEMENT, "nodes", ["get".to_string(), "list".to_string()]),
            build_rule(MANAGEMENT, "projects", ["get".to_string()]),
        ];
        let merged = merge(&current, &desired).expect("rules must change");
        assert_eq!(
            merged,
            vec![desired[0].clone(), unrelated, desired[1].clone()]
        );
    }
}
