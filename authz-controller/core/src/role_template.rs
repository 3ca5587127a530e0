//! Role-template inheritance.
//!
//! Templates form a graph through `roleTemplateNames`. Diamonds are allowed; cycles are
//! reported as [`Error::CycleDetected`] with the offending chain. Traversal tracks the current
//! path and the set of finished templates, so each template is expanded at most once.

use crate::{Error, Result};
use authz_controller_k8s_api::{Context, PolicyRule, RoleTemplate};
use std::collections::BTreeMap;
use tracing::warn;

/// Depth at which a warning is logged.
const SOFT_DEPTH_LIMIT: usize = 100;

/// Depth at which expansion fails.
pub const HARD_DEPTH_LIMIT: usize = 500;

/// Read access to role templates and the ClusterRoles backing external templates.
pub trait RoleTemplateLookup {
    fn role_template(&self, name: &str) -> Option<RoleTemplate>;

    fn cluster_role_rules(&self, name: &str) -> Option<Vec<PolicyRule>>;
}

/// Every template reachable from a root template, with its effective rules.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Closure {
    templates: BTreeMap<String, Resolved>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Resolved {
    pub name: String,
    pub context: Context,
    pub administrative: bool,
    pub rules: Vec<PolicyRule>,
}

/// Expands `name` into its inheritance closure.
pub fn resolve<L: RoleTemplateLookup + ?Sized>(lookup: &L, name: &str) -> Result<Closure> {
    let mut closure = Closure::default();
    let mut path = Vec::new();
    expand(lookup, name, &mut path, &mut closure)?;
    Ok(closure)
}

fn expand<L: RoleTemplateLookup + ?Sized>(
    lookup: &L,
    name: &str,
    path: &mut Vec<String>,
    closure: &mut Closure,
) -> Result<()> {
    check_path(path, name)?;
    if closure.templates.contains_key(name) {
        return Ok(());
    }

    let rt = lookup
        .role_template(name)
        .ok_or_else(|| Error::RoleTemplateNotFound(name.to_string()))?;

    path.push(name.to_string());
    for parent in rt.spec.role_template_names.iter() {
        expand(lookup, parent, path, closure)?;
    }
    path.pop();

    let resolved = Resolved::new(lookup, name, &rt);
    closure.templates.insert(name.to_string(), resolved);
    Ok(())
}

/// Whether `name`, or any template it inherits within `context`, is owner-level.
///
/// Templates of another context cannot grant ownership and are not descended into.
pub fn is_owner<L: RoleTemplateLookup + ?Sized>(
    lookup: &L,
    name: &str,
    context: Context,
) -> Result<bool> {
    let mut path = Vec::new();
    let mut seen = ahash::AHashSet::new();
    owner_in(lookup, name, context, &mut path, &mut seen)
}

fn owner_in<L: RoleTemplateLookup + ?Sized>(
    lookup: &L,
    name: &str,
    context: Context,
    path: &mut Vec<String>,
    seen: &mut ahash::AHashSet<String>,
) -> Result<bool> {
    check_path(path, name)?;
    if !seen.insert(name.to_string()) {
        return Ok(false);
    }

    let rt = lookup
        .role_template(name)
        .ok_or_else(|| Error::RoleTemplateNotFound(name.to_string()))?;
    if rt.spec.context != context {
        return Ok(false);
    }
    if rt.spec.builtin && name == owner_template(context) {
        return Ok(true);
    }
    if rt.spec.rules.iter().any(grants_ownership) {
        return Ok(true);
    }

    path.push(name.to_string());
    for parent in rt.spec.role_template_names.iter() {
        if owner_in(lookup, parent, context, path, seen)? {
            return Ok(true);
        }
    }
    path.pop();
    Ok(false)
}

fn owner_template(context: Context) -> &'static str {
    match context {
        Context::Cluster => "cluster-owner",
        Context::Project => "project-owner",
    }
}

fn grants_ownership(rule: &PolicyRule) -> bool {
    rule.resources
        .iter()
        .flatten()
        .any(|r| r == "clusters" || r == "projects")
        && rule.verbs.iter().any(|v| v == "own")
}

fn check_path(path: &[String], name: &str) -> Result<()> {
    if let Some(start) = path.iter().position(|n| n == name) {
        let mut chain = path[start..].to_vec();
        chain.push(name.to_string());
        return Err(Error::CycleDetected { chain });
    }

    let depth = path.len();
    if depth == SOFT_DEPTH_LIMIT {
        warn!(%name, depth, "Role template inheritance is unusually deep");
    }
    if depth >= HARD_DEPTH_LIMIT {
        return Err(Error::InheritanceTooDeep {
            name: name.to_string(),
            depth: HARD_DEPTH_LIMIT,
        });
    }
    Ok(())
}

// === impl Closure ===

impl Closure {
    pub fn get(&self, name: &str) -> Option<&Resolved> {
        self.templates.get(name)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn templates(&self) -> impl Iterator<Item = &Resolved> {
        self.templates.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }
}

// === impl Resolved ===

impl Resolved {
    fn new<L: RoleTemplateLookup + ?Sized>(lookup: &L, name: &str, rt: &RoleTemplate) -> Self {
        let mut rules = Vec::new();
        if rt.spec.external {
            match rt.spec.external_rules.as_ref() {
                Some(external) => rules.extend(external.iter().cloned()),
                None => rules.extend(lookup.cluster_role_rules(name).unwrap_or_default()),
            }
        }
        rules.extend(rt.spec.rules.iter().cloned());

        Self {
            name: name.to_string(),
            context: rt.spec.context,
            administrative: rt.spec.administrative,
            rules,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use authz_controller_k8s_api::{ObjectMeta, RoleTemplateSpec};
    use maplit::hashmap;
    use std::collections::HashMap;

    #[derive(Default)]
    struct Templates {
        templates: HashMap<String, RoleTemplate>,
        cluster_roles: HashMap<String, Vec<PolicyRule>>,
    }

    impl RoleTemplateLookup for Templates {
        fn role_template(&self, name: &str) -> Option<RoleTemplate> {
            self.templates.get(name).cloned()
        }

        fn cluster_role_rules(&self, name: &str) -> Option<Vec<PolicyRule>> {
            self.cluster_roles.get(name).cloned()
        }
    }

    fn template(name: &str, parents: &[&str], spec: RoleTemplateSpec) -> (String, RoleTemplate) {
        let rt = RoleTemplate {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: RoleTemplateSpec {
                role_template_names: parents.iter().map(|p| p.to_string()).collect(),
                ..spec
            },
        };
        (name.to_string(), rt)
    }

    fn rule(resources: &[&str], verbs: &[&str]) -> PolicyRule {
        PolicyRule {
            api_groups: Some(vec!["management.cattle.io".to_string()]),
            resources: Some(resources.iter().map(|r| r.to_string()).collect()),
            verbs: verbs.iter().map(|v| v.to_string()).collect(),
            ..Default::default()
        }
    }

    fn lookup(entries: Vec<(String, RoleTemplate)>) -> Templates {
        Templates {
            templates: entries.into_iter().collect(),
            ..Default::default()
        }
    }

    #[test]
    fn two_node_cycle() {
        let templates = lookup(vec![
            template("a", &["b"], Default::default()),
            template("b", &["a"], Default::default()),
        ]);
        assert_eq!(
            resolve(&templates, "a"),
            Err(Error::CycleDetected {
                chain: vec!["a".to_string(), "b".to_string(), "a".to_string()]
            })
        );
        assert!(matches!(
            is_owner(&templates, "a", Context::Cluster),
            Err(Error::CycleDetected { .. })
        ));
    }

    #[test]
    fn self_reference() {
        let templates = lookup(vec![template("a", &["a"], Default::default())]);
        assert!(matches!(
            resolve(&templates, "a"),
            Err(Error::CycleDetected { .. })
        ));
    }

    #[test]
    fn diamonds_are_not_cycles() {
        let templates = lookup(vec![
            template("top", &["left", "right"], Default::default()),
            template("left", &["base"], Default::default()),
            template("right", &["base"], Default::default()),
            template("base", &[], Default::default()),
        ]);
        let closure = resolve(&templates, "top").expect("must resolve");
        assert_eq!(
            closure.names().collect::<Vec<_>>(),
            ["base", "left", "right", "top"]
        );
    }

    #[test]
    fn missing_parent() {
        let templates = lookup(vec![template("a", &["gone"], Default::default())]);
        assert_eq!(
            resolve(&templates, "a"),
            Err(Error::RoleTemplateNotFound("gone".to_string()))
        );
    }

    #[test]
    fn deep_chains_fail() {
        let names = (0..=HARD_DEPTH_LIMIT + 1)
            .map(|i| format!("rt-{i}"))
            .collect::<Vec<_>>();
        let entries = names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let parents = names.get(i + 1).map(|n| vec![n.as_str()]).unwrap_or_default();
                template(name, &parents, Default::default())
            })
            .collect();
        let templates = lookup(entries);
        assert!(matches!(
            resolve(&templates, "rt-0"),
            Err(Error::InheritanceTooDeep { .. })
        ));
    }

    #[test]
    fn external_rules() {
        let mut templates = lookup(vec![
            template(
                "ext",
                &[],
                RoleTemplateSpec {
                    external: true,
                    ..Default::default()
                },
            ),
            template(
                "ext-override",
                &[],
                RoleTemplateSpec {
                    external: true,
                    external_rules: Some(vec![rule(&["nodes"], &["list"])]),
                    ..Default::default()
                },
            ),
        ]);
        templates.cluster_roles = hashmap! {
            "ext".to_string() => vec![rule(&["projects"], &["get"])],
            "ext-override".to_string() => vec![rule(&["projects"], &["*"])],
        };

        let closure = resolve(&templates, "ext").unwrap();
        assert_eq!(
            closure.get("ext").unwrap().rules,
            vec![rule(&["projects"], &["get"])]
        );
        let closure = resolve(&templates, "ext-override").unwrap();
        assert_eq!(
            closure.get("ext-override").unwrap().rules,
            vec![rule(&["nodes"], &["list"])]
        );
    }

    #[test]
    fn owners() {
        let templates = lookup(vec![
            template(
                "cluster-owner",
                &[],
                RoleTemplateSpec {
                    builtin: true,
                    ..Default::default()
                },
            ),
            template(
                "custom-owner",
                &["viewer"],
                RoleTemplateSpec {
                    rules: vec![rule(&["clusters"], &["own"])],
                    ..Default::default()
                },
            ),
            template("inherits-owner", &["custom-owner"], Default::default()),
            template("viewer", &[], Default::default()),
            template(
                "project-owner",
                &[],
                RoleTemplateSpec {
                    builtin: true,
                    context: Context::Project,
                    ..Default::default()
                },
            ),
            template("mixed", &["project-owner"], Default::default()),
        ]);

        assert!(is_owner(&templates, "cluster-owner", Context::Cluster).unwrap());
        assert!(is_owner(&templates, "custom-owner", Context::Cluster).unwrap());
        assert!(is_owner(&templates, "inherits-owner", Context::Cluster).unwrap());
        assert!(!is_owner(&templates, "viewer", Context::Cluster).unwrap());
        assert!(is_owner(&templates, "project-owner", Context::Project).unwrap());
        assert!(!is_owner(&templates, "mixed", Context::Cluster).unwrap());
    }
}
