//! Removes RoleBindings whose owning project bindings no longer exist.
//!
//! Only RoleBindings with a single Group subject are examined. Owners are read from the
//! membership and project-in-cluster owner labels; a current key is matched against the owner
//! keys of the existing project bindings and a legacy key against their UIDs.

use authz_controller_runtime::{
    core::ownership::{
        self, OwnershipScheme, ALL_MARKERS, CURRENT, LEGACY, MEMBERSHIP_BINDING_OWNER,
        MEMBERSHIP_BINDING_OWNER_LEGACY, PRTB_IN_CLUSTER_BINDING_OWNER,
    },
    error::{aggregate, Result},
    k8s::{ProjectRoleTemplateBinding, Resource, ResourceExt, RoleBinding, Selector, Store},
    retry_on_conflict,
};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// Markers of owner keys that name project bindings.
const PROJECT_BINDING_MARKERS: [&str; 3] = [
    MEMBERSHIP_BINDING_OWNER,
    MEMBERSHIP_BINDING_OWNER_LEGACY,
    PRTB_IN_CLUSTER_BINDING_OWNER,
];

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Summary {
    /// RoleBindings with a single Group subject.
    pub scanned: usize,
    pub orphans: usize,
    /// RoleBindings that lost some, but not all, of their owners.
    pub stripped: usize,
}

/// The project bindings that exist, by owner key of either generation.
#[derive(Debug, Default)]
struct Live {
    keys: BTreeSet<String>,
    uids: BTreeSet<String>,
}

impl Live {
    fn contains(&self, key: &str) -> bool {
        if LEGACY.recognizes(key) {
            self.uids.contains(key)
        } else {
            self.keys.contains(key)
        }
    }
}

/// Deletes orphaned RoleBindings and strips stale owners from the rest.
pub async fn run<S: Store>(store: &S) -> Result<Summary> {
    let mut live = Live::default();
    for prtb in store
        .list::<ProjectRoleTemplateBinding>(None, &Selector::default())
        .await?
    {
        live.keys.extend(CURRENT.owner_key(prtb.meta()));
        live.uids.extend(prtb.uid());
    }

    let mut summary = Summary::default();
    let mut errors = Vec::new();
    for rb in store.list::<RoleBinding>(None, &Selector::default()).await? {
        if !single_group(&rb) {
            continue;
        }
        summary.scanned += 1;

        let owners = project_owners(&rb);
        if owners.is_empty() {
            continue;
        }
        let stale = owners
            .iter()
            .filter(|key| !live.contains(key))
            .cloned()
            .collect::<Vec<_>>();
        if stale.is_empty() {
            continue;
        }

        let (ns, name) = (rb.namespace(), rb.name_any());
        let result = if stale.len() == owners.len() {
            info!(ns = ?ns, %name, owners = ?stale, "Deleting orphaned RoleBinding");
            summary.orphans += 1;
            delete(store, &rb).await
        } else {
            info!(ns = ?ns, %name, stale = ?stale, "Removing stale owners");
            summary.stripped += 1;
            retry_on_conflict(&name, || strip(store, ns.as_deref(), &name, &stale)).await
        };
        if let Err(error) = result {
            warn!(ns = ?ns, %name, %error, "Failed to clean RoleBinding");
            errors.push(error);
        }
    }

    let Summary {
        scanned,
        orphans,
        stripped,
    } = summary;
    info!(scanned, orphans, stripped, failures = errors.len(), "Orphan cleanup complete");
    aggregate(errors)?;
    Ok(summary)
}

fn single_group(rb: &RoleBinding) -> bool {
    matches!(rb.subjects.as_deref(), Some([subject]) if subject.kind == "Group")
}

fn project_owners(rb: &RoleBinding) -> Vec<String> {
    rb.labels()
        .iter()
        .filter(|(_, marker)| PROJECT_BINDING_MARKERS.contains(&marker.as_str()))
        .map(|(key, _)| key.clone())
        .collect()
}

/// Deletes the RoleBinding as listed; one that gained an owner since fails with a conflict.
async fn delete<S: Store>(store: &S, rb: &RoleBinding) -> Result<()> {
    let (ns, rv) = (rb.namespace(), rb.resource_version());
    match store
        .delete::<RoleBinding>(ns.as_deref(), &rb.name_any(), rv.as_deref())
        .await
    {
        Ok(()) => Ok(()),
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(e.into()),
    }
}

async fn strip<S: Store>(
    store: &S,
    namespace: Option<&str>,
    name: &str,
    stale: &[String],
) -> Result<()> {
    let mut rb = match store.get::<RoleBinding>(namespace, name).await {
        Ok(rb) => rb,
        Err(e) if e.is_not_found() => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    let mut changed = false;
    for key in stale {
        changed |= ownership::remove_owner(rb.labels_mut(), key, &ALL_MARKERS);
    }
    if !changed {
        debug!(ns = ?namespace, %name, "Stale owners already removed");
        return Ok(());
    }
    store.update(&rb).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use authz_controller_runtime::k8s::{
        store::memory::MemStore, BindingSubject, DryRun, ObjectMeta,
        ProjectRoleTemplateBindingSpec, RoleRef, Subject,
    };
    use maplit::btreemap;

    fn prtb(name: &str) -> ProjectRoleTemplateBinding {
        ProjectRoleTemplateBinding {
            metadata: ObjectMeta {
                namespace: Some("p-1".to_string()),
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: ProjectRoleTemplateBindingSpec {
                project_name: "c-1:p-1".to_string(),
                role_template_name: "project-member".to_string(),
                subject: BindingSubject {
                    group_principal_name: Some("okta_group://devs".to_string()),
                    ..Default::default()
                },
                service_account: None,
            },
        }
    }

    fn rb(name: &str, kind: &str, owners: &[&str]) -> RoleBinding {
        RoleBinding {
            metadata: ObjectMeta {
                namespace: Some("c-1".to_string()),
                name: Some(name.to_string()),
                labels: Some(
                    owners
                        .iter()
                        .map(|key| (key.to_string(), MEMBERSHIP_BINDING_OWNER_LEGACY.to_string()))
                        .collect(),
                ),
                ..Default::default()
            },
            role_ref: RoleRef {
                api_group: "rbac.authorization.k8s.io".to_string(),
                kind: "Role".to_string(),
                name: "p-1-projectmember".to_string(),
            },
            subjects: Some(vec![Subject {
                api_group: Some("rbac.authorization.k8s.io".to_string()),
                kind: kind.to_string(),
                name: "okta_group://devs".to_string(),
                namespace: None,
            }]),
        }
    }

    const GONE: &str = "0b5c9d2e-7a41-4f3b-9c2d-5e6f7a8b9c0d";

    fn names(store: &MemStore) -> Vec<String> {
        store
            .all::<RoleBinding>()
            .iter()
            .map(ResourceExt::name_any)
            .collect()
    }

    #[tokio::test]
    async fn deletes_only_group_bindings_of_missing_owners() {
        let store = MemStore::new();
        let live = store.seed(prtb("prtb-1"));
        let uid = live.uid().expect("seeded with a uid");
        store.seed(rb("rb-live", "Group", &[&uid]));
        store.seed(rb("rb-orphan", "Group", &[GONE]));
        store.seed(rb("rb-user", "User", &[GONE]));
        store.seed(rb("rb-unowned", "Group", &[]));

        let summary = run(&store).await.expect("sweeps");
        assert_eq!(
            summary,
            Summary {
                scanned: 3,
                orphans: 1,
                stripped: 0,
            }
        );
        assert_eq!(
            names(&store),
            vec![
                "rb-live".to_string(),
                "rb-unowned".to_string(),
                "rb-user".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn resolves_current_keys_by_name() {
        let store = MemStore::new();
        store.seed(prtb("prtb-1"));
        let mut current = rb("rb-current", "Group", &[]);
        current.labels_mut().insert(
            "p-1_prtb-1".to_string(),
            PRTB_IN_CLUSTER_BINDING_OWNER.to_string(),
        );
        store.seed(current);
        let mut gone = rb("rb-gone", "Group", &[]);
        gone.labels_mut().insert(
            "p-1_prtb-2".to_string(),
            PRTB_IN_CLUSTER_BINDING_OWNER.to_string(),
        );
        store.seed(gone);

        let summary = run(&store).await.expect("sweeps");
        assert_eq!(summary.orphans, 1);
        assert_eq!(names(&store), vec!["rb-current".to_string()]);
    }

    #[tokio::test]
    async fn strips_stale_owners_of_shared_bindings() {
        let store = MemStore::new();
        let live = store.seed(prtb("prtb-1"));
        let uid = live.uid().expect("seeded with a uid");
        store.seed(rb("rb-shared", "Group", &[&uid, GONE]));

        let summary = run(&store).await.expect("sweeps");
        assert_eq!(summary.stripped, 1);
        assert_eq!(summary.orphans, 0);

        let rb = store
            .get::<RoleBinding>(Some("c-1"), "rb-shared")
            .await
            .expect("retained");
        assert_eq!(
            rb.metadata.labels,
            Some(btreemap! { uid => MEMBERSHIP_BINDING_OWNER_LEGACY.to_string() })
        );
    }

    #[tokio::test]
    async fn dry_run_counts_without_writing() {
        let store = MemStore::new();
        let live = store.seed(prtb("prtb-1"));
        let uid = live.uid().expect("seeded with a uid");
        store.seed(rb("rb-orphan", "Group", &[GONE]));
        store.seed(rb("rb-shared", "Group", &[&uid, GONE]));

        let dry = run(&DryRun::new(store.clone(), true)).await.expect("sweeps");
        assert_eq!(store.writes(), 0);
        assert_eq!(store.all::<RoleBinding>().len(), 2);

        let wet = run(&store).await.expect("sweeps");
        assert_eq!(dry, wet);
        assert_eq!(names(&store), vec!["rb-shared".to_string()]);
    }
}
