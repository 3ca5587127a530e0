//! Removes redundant membership primitives.
//!
//! Older controllers could create several primitives granting the same role to the same subject
//! on behalf of one binding. For every cluster and project binding, the primitives selected by
//! its owner keys (of both generations) are grouped by namespace and identity; each group keeps
//! one survivor and the rest are deleted after their owner keys are merged into it.
//!
//! The sweep is not linearized against the controller. Duplicates created while it runs are
//! caught by a later run.

use authz_controller_runtime::{
    core::{
        naming,
        ownership::{self, Owners, ALL_MARKERS},
        Identity,
    },
    error::{aggregate, Result},
    k8s::{
        ClusterRoleBinding, ClusterRoleTemplateBinding, Object, ObjectMeta,
        ProjectRoleTemplateBinding, ResourceExt, RoleBinding, RoleRef, Selector, Store, Subject,
        Time,
    },
    retry_on_conflict,
};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// Records the cleanup version a binding was last processed with.
pub const VERSION_ANNOTATION: &str = "cleanup.authz.management.cattle.io/duplicates-version";

pub const VERSION: &str = "1";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Summary {
    /// Bindings examined, excluding those already at the current version.
    pub bindings: usize,
    pub duplicates: usize,
}

/// A primitive that can be deduplicated.
trait Generated: Object {
    fn role_ref(&self) -> &RoleRef;

    fn subjects(&self) -> Option<&[Subject]>;

    /// The name a primitive with this identity is created with.
    fn deterministic_name(&self, subject: &Subject) -> String;
}

impl Generated for ClusterRoleBinding {
    fn role_ref(&self) -> &RoleRef {
        &self.role_ref
    }

    fn subjects(&self) -> Option<&[Subject]> {
        self.subjects.as_deref()
    }

    fn deterministic_name(&self, subject: &Subject) -> String {
        naming::cluster_role_binding(&self.role_ref, subject)
    }
}

impl Generated for RoleBinding {
    fn role_ref(&self) -> &RoleRef {
        &self.role_ref
    }

    fn subjects(&self) -> Option<&[Subject]> {
        self.subjects.as_deref()
    }

    fn deterministic_name(&self, subject: &Subject) -> String {
        let ns = self.namespace().unwrap_or_default();
        naming::role_binding(&ns, &self.role_ref, subject)
    }
}

/// A primitive's kind, namespace and name.
type PrimitiveKey = (String, String, String);

/// One pass of the duplicate cleaner.
///
/// Deletions and owner merges are also tracked in memory, so that later bindings select the
/// same primitives whether or not the writes reached the store.
struct Sweep<'s, S> {
    store: &'s S,
    /// Primitives deleted earlier in this pass.
    removed: BTreeSet<PrimitiveKey>,
    /// Labels of survivors after owners were merged into them.
    merged: BTreeMap<PrimitiveKey, BTreeMap<String, String>>,
    summary: Summary,
}

/// Deletes duplicate primitives of every cluster and project binding.
///
/// Failures are collected per binding and returned together once every binding was visited.
pub async fn run<S: Store>(store: &S) -> Result<Summary> {
    let mut sweep = Sweep {
        store,
        removed: BTreeSet::new(),
        merged: BTreeMap::new(),
        summary: Summary::default(),
    };
    let mut errors = Vec::new();

    let crtbs = store
        .list::<ClusterRoleTemplateBinding>(None, &Selector::default())
        .await?;
    for crtb in crtbs.iter() {
        if let Err(error) = sweep.binding(crtb).await {
            warn!(ns = ?crtb.namespace(), name = %crtb.name_any(), %error, "Failed to clean binding");
            errors.push(error);
        }
    }

    let prtbs = store
        .list::<ProjectRoleTemplateBinding>(None, &Selector::default())
        .await?;
    for prtb in prtbs.iter() {
        if let Err(error) = sweep.binding(prtb).await {
            warn!(ns = ?prtb.namespace(), name = %prtb.name_any(), %error, "Failed to clean binding");
            errors.push(error);
        }
    }

    let Summary {
        bindings,
        duplicates,
    } = sweep.summary;
    info!(bindings, duplicates, failures = errors.len(), "Duplicate cleanup complete");
    aggregate(errors)?;
    Ok(sweep.summary)
}

impl<S: Store> Sweep<'_, S> {
    async fn binding<B: Object>(&mut self, binding: &B) -> Result<()> {
        if binding.annotations().get(VERSION_ANNOTATION).map(String::as_str) == Some(VERSION) {
            debug!(ns = ?binding.namespace(), name = %binding.name_any(), "Already cleaned");
            return Ok(());
        }
        self.summary.bindings += 1;

        let selectors = selectors(binding.meta());
        self.dedup::<ClusterRoleBinding>(&selectors).await?;
        self.dedup::<RoleBinding>(&selectors).await?;

        retry_on_conflict(&binding.name_any(), || self.try_stamp(binding)).await
    }

    async fn dedup<P: Generated>(&mut self, selectors: &[Selector]) -> Result<()> {
        let kind = P::kind(&()).to_string();
        let mut matches = BTreeMap::new();
        for selector in selectors {
            for mut primitive in self.store.list::<P>(None, selector).await? {
                let key = (
                    kind.clone(),
                    primitive.namespace().unwrap_or_default(),
                    primitive.name_any(),
                );
                if self.removed.contains(&key) {
                    continue;
                }
                if let Some(labels) = self.merged.get(&key) {
                    *primitive.labels_mut() = labels.clone();
                }
                matches.insert((key.1, key.2), primitive);
            }
        }

        // Survivors whose merged owners are not yet visible in the store.
        for ((k, ns, name), labels) in self.merged.iter() {
            let pending = *k == kind
                && !matches.contains_key(&(ns.clone(), name.clone()))
                && selectors.iter().any(|selector| selector.matches(labels));
            if !pending {
                continue;
            }
            let namespace = (!ns.is_empty()).then_some(ns.as_str());
            match self.store.get::<P>(namespace, name).await {
                Ok(mut primitive) => {
                    *primitive.labels_mut() = labels.clone();
                    matches.insert((ns.clone(), name.clone()), primitive);
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }

        let mut groups = BTreeMap::<(String, Identity), Vec<P>>::new();
        for ((ns, _), primitive) in matches {
            let Some(identity) = Identity::of(primitive.role_ref(), primitive.subjects()) else {
                debug!(kind = %P::kind(&()), %ns, name = %primitive.name_any(), "Skipping binding without a single subject");
                continue;
            };
            groups.entry((ns, identity)).or_default().push(primitive);
        }

        for (_, group) in groups {
            if group.len() > 1 {
                self.keep_one(group).await?;
            }
        }
        Ok(())
    }

    async fn keep_one<P: Generated>(&mut self, mut group: Vec<P>) -> Result<()> {
        let survivor = survivor(&mut group);
        let (ns, name) = (survivor.namespace(), survivor.name_any());

        let mut owners = BTreeMap::new();
        for duplicate in group.iter() {
            for (key, marker) in duplicate.labels() {
                if ALL_MARKERS.contains(&marker.as_str()) {
                    owners.insert(key.clone(), marker.clone());
                }
            }
        }
        retry_on_conflict(&name, || self.try_merge_owners::<P>(ns.as_deref(), &name, &owners))
            .await?;
        let mut labels = survivor.labels().clone();
        for (key, marker) in owners {
            labels.entry(key).or_insert(marker);
        }
        let key = (P::kind(&()).to_string(), ns.clone().unwrap_or_default(), name.clone());
        self.merged.insert(key, labels);

        for duplicate in group {
            let dup_ns = duplicate.namespace();
            let dup_name = duplicate.name_any();
            info!(kind = %P::kind(&()), ns = ?dup_ns, name = %dup_name, survivor = %name, "Deleting duplicate");
            let rv = duplicate.resource_version();
            match self
                .store
                .delete::<P>(dup_ns.as_deref(), &dup_name, rv.as_deref())
                .await
            {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
            self.removed
                .insert((P::kind(&()).to_string(), dup_ns.unwrap_or_default(), dup_name));
            self.summary.duplicates += 1;
        }
        Ok(())
    }

    async fn try_merge_owners<P: Generated>(
        &self,
        namespace: Option<&str>,
        name: &str,
        owners: &BTreeMap<String, String>,
    ) -> Result<()> {
        let mut primitive = self.store.get::<P>(namespace, name).await?;
        let labels = primitive.labels_mut();
        let mut changed = false;
        for (key, marker) in owners {
            if !labels.contains_key(key) {
                changed |= ownership::add_owner(labels, key, marker);
            }
        }
        if changed {
            let owners = Owners::of(primitive.meta().labels.as_ref(), &ALL_MARKERS);
            info!(kind = %P::kind(&()), ns = ?namespace, %name, owners = owners.len(), "Merging owners of duplicates");
            self.store.update(&primitive).await?;
        }
        Ok(())
    }

    async fn try_stamp<B: Object>(&self, binding: &B) -> Result<()> {
        let ns = binding.namespace();
        let mut binding = match self.store.get::<B>(ns.as_deref(), &binding.name_any()).await {
            Ok(binding) => binding,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        binding
            .annotations_mut()
            .insert(VERSION_ANNOTATION.to_string(), VERSION.to_string());
        self.store.update(&binding).await?;
        Ok(())
    }
}

/// Both generations' membership selectors of a binding.
fn selectors(binding: &ObjectMeta) -> Vec<Selector> {
    ownership::schemes()
        .into_iter()
        .filter_map(|scheme| scheme.selector(binding, scheme.membership_marker()))
        .collect()
}

/// Removes and returns the primitive to keep: the one with the deterministic name, otherwise
/// the oldest.
fn survivor<P: Generated>(group: &mut Vec<P>) -> P {
    let deterministic = group.iter().position(|p| {
        p.subjects()
            .and_then(|s| s.first())
            .map(|subject| p.deterministic_name(subject) == p.name_any())
            .unwrap_or(false)
    });
    let index = deterministic.unwrap_or_else(|| {
        group
            .iter()
            .enumerate()
            .min_by_key(|(_, p)| {
                let created = created(*p);
                (created.is_none(), created, p.name_any())
            })
            .map(|(i, _)| i)
            .unwrap_or_default()
    });
    group.remove(index)
}

fn created<P: Object>(primitive: &P) -> Option<Time> {
    primitive.meta().creation_timestamp.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use authz_controller_runtime::{
        core::ownership::{LABELS_UPDATED, MEMBERSHIP_BINDING_OWNER},
        k8s::{store::memory::MemStore, BindingSubject, ClusterRoleTemplateBindingSpec, DryRun},
    };
    use maplit::btreemap;

    fn role() -> RoleRef {
        RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "ClusterRole".to_string(),
            name: "c-1-clustermember".to_string(),
        }
    }

    fn user() -> Subject {
        Subject {
            api_group: Some("rbac.authorization.k8s.io".to_string()),
            kind: "User".to_string(),
            name: "u-1".to_string(),
            namespace: None,
        }
    }

    fn crtb(name: &str) -> ClusterRoleTemplateBinding {
        ClusterRoleTemplateBinding {
            metadata: ObjectMeta {
                namespace: Some("c-1".to_string()),
                name: Some(name.to_string()),
                labels: Some(btreemap! { LABELS_UPDATED.to_string() => "true".to_string() }),
                ..Default::default()
            },
            spec: ClusterRoleTemplateBindingSpec {
                cluster_name: "c-1".to_string(),
                role_template_name: "cluster-member".to_string(),
                subject: BindingSubject {
                    user_name: Some("u-1".to_string()),
                    ..Default::default()
                },
            },
        }
    }

    fn crb(name: &str) -> ClusterRoleBinding {
        owned_by(name, &["c-1_crtb-1"])
    }

    fn owned_by(name: &str, owners: &[&str]) -> ClusterRoleBinding {
        ClusterRoleBinding {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(
                    owners
                        .iter()
                        .map(|key| (key.to_string(), MEMBERSHIP_BINDING_OWNER.to_string()))
                        .collect(),
                ),
                ..Default::default()
            },
            role_ref: role(),
            subjects: Some(vec![user()]),
        }
    }

    fn names(store: &MemStore) -> Vec<String> {
        store
            .all::<ClusterRoleBinding>()
            .iter()
            .map(ResourceExt::name_any)
            .collect()
    }

    #[tokio::test]
    async fn keeps_the_oldest() {
        let store = MemStore::new();
        store.seed(crtb("crtb-1"));
        // Seeding order is creation order.
        for name in ["crb-b", "crb-a", "crb-c"] {
            store.seed(crb(name));
        }

        let summary = run(&store).await.expect("sweeps");
        assert_eq!(summary, Summary { bindings: 1, duplicates: 2 });
        assert_eq!(names(&store), vec!["crb-b".to_string()]);

        let crtb = store
            .get::<ClusterRoleTemplateBinding>(Some("c-1"), "crtb-1")
            .await
            .expect("exists");
        assert_eq!(
            crtb.annotations().get(VERSION_ANNOTATION).map(String::as_str),
            Some(VERSION)
        );
    }

    #[tokio::test]
    async fn prefers_the_deterministic_name() {
        let store = MemStore::new();
        store.seed(crtb("crtb-1"));
        store.seed(crb("crb-old"));
        let canonical = naming::cluster_role_binding(&role(), &user());
        store.seed(crb(&canonical));

        let summary = run(&store).await.expect("sweeps");
        assert_eq!(summary.duplicates, 1);
        assert_eq!(names(&store), vec![canonical]);
    }

    #[tokio::test]
    async fn merges_owners_into_the_survivor() {
        let store = MemStore::new();
        store.seed(crtb("crtb-1"));
        store.seed(crb("crb-a"));
        let mut shared = crb("crb-b");
        shared
            .labels_mut()
            .insert("c-1_crtb-2".to_string(), MEMBERSHIP_BINDING_OWNER.to_string());
        store.seed(shared);

        run(&store).await.expect("sweeps");

        let survivor = store
            .get::<ClusterRoleBinding>(None, "crb-a")
            .await
            .expect("exists");
        let owners = Owners::of(survivor.metadata.labels.as_ref(), &ALL_MARKERS);
        assert!(owners.contains("c-1_crtb-1"));
        assert!(owners.contains("c-1_crtb-2"));
    }

    #[tokio::test]
    async fn cleaned_bindings_are_skipped() {
        let store = MemStore::new();
        store.seed(crtb("crtb-1"));
        store.seed(crb("crb-a"));
        run(&store).await.expect("sweeps");

        store.seed(crb("crb-b"));
        let writes = store.writes();
        let summary = run(&store).await.expect("sweeps");
        assert_eq!(summary, Summary::default());
        assert_eq!(store.writes(), writes);
    }

    #[tokio::test]
    async fn dry_run_counts_without_writing() {
        let store = MemStore::new();
        store.seed(crtb("crtb-1"));
        for name in ["crb-a", "crb-b", "crb-c"] {
            store.seed(crb(name));
        }

        let dry = run(&DryRun::new(store.clone(), true)).await.expect("sweeps");
        assert_eq!(store.writes(), 0);
        assert_eq!(store.all::<ClusterRoleBinding>().len(), 3);

        let wet = run(&store).await.expect("sweeps");
        assert_eq!(dry, wet);
    }

    #[tokio::test]
    async fn dry_run_follows_merged_owners() {
        let store = MemStore::new();
        store.seed(crtb("crtb-1"));
        store.seed(crtb("crtb-2"));
        store.seed(owned_by("crb-a", &["c-1_crtb-1"]));
        store.seed(owned_by("crb-b", &["c-1_crtb-1", "c-1_crtb-2"]));
        store.seed(owned_by("crb-c", &["c-1_crtb-2"]));

        let dry = run(&DryRun::new(store.clone(), true)).await.expect("sweeps");
        assert_eq!(store.writes(), 0);
        assert_eq!(dry, Summary { bindings: 2, duplicates: 2 });

        let wet = run(&store).await.expect("sweeps");
        assert_eq!(dry, wet);
        assert_eq!(names(&store), vec!["crb-a".to_string()]);
        let survivor = store
            .get::<ClusterRoleBinding>(None, "crb-a")
            .await
            .expect("exists");
        let owners = Owners::of(survivor.metadata.labels.as_ref(), &ALL_MARKERS);
        assert_eq!(owners.len(), 2);
    }
}
