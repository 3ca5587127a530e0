//! Owner tracking for generated primitives.
//!
//! A generated primitive records the bindings that require it as label keys whose value is a
//! marker naming the relationship. The keys form a set: a primitive is shared by every binding
//! that resolves to the same role and subject, and it is deleted once the set is empty.
//!
//! Two generations of owner keys exist. Legacy keys are the binding's UID; current keys are
//! derived from the binding's namespace and name. Bindings carrying the [`LABELS_UPDATED`]
//! marker have had their primitives migrated to the current generation.

use crate::naming;
use authz_controller_k8s_api::{labels::Map, ObjectMeta, Selector};
use std::collections::BTreeSet;

/// Marks a binding whose primitives carry current-generation owner keys.
pub const LABELS_UPDATED: &str = "auth.management.cattle.io/crb-rb-labels-updated";

/// Marks a primitive that was migrated from a legacy owner key.
pub const RTB_LABEL_UPDATED: &str = "auth.management.cattle.io/rtb-label-updated";

pub const MEMBERSHIP_BINDING_OWNER: &str = "membership-binding-owner";

/// The misspelling is part of the legacy wire format.
pub const MEMBERSHIP_BINDING_OWNER_LEGACY: &str = "memberhsip-binding-owner";

pub const CRTB_IN_PROJECT_BINDING_OWNER: &str = "crtb-in-project-binding-owner";

pub const PRTB_IN_CLUSTER_BINDING_OWNER: &str = "prtb-in-cluster-binding-owner";

/// Both membership markers, current first.
pub const MEMBERSHIP_MARKERS: [&str; 2] =
    [MEMBERSHIP_BINDING_OWNER, MEMBERSHIP_BINDING_OWNER_LEGACY];

/// Every marker of an owner-label key, of any generation and relationship.
pub const ALL_MARKERS: [&str; 4] = [
    MEMBERSHIP_BINDING_OWNER,
    MEMBERSHIP_BINDING_OWNER_LEGACY,
    CRTB_IN_PROJECT_BINDING_OWNER,
    PRTB_IN_CLUSTER_BINDING_OWNER,
];

/// A generation of owner keys.
pub trait OwnershipScheme: Send + Sync {
    /// The key identifying `binding` as an owner.
    fn owner_key(&self, binding: &ObjectMeta) -> Option<String>;

    /// The marker used on membership primitives.
    fn membership_marker(&self) -> &'static str;

    /// Whether `key` has the shape of a key produced by this scheme.
    fn recognizes(&self, key: &str) -> bool;

    /// Selects the primitives `binding` owns with `marker`.
    fn selector(&self, binding: &ObjectMeta, marker: &str) -> Option<Selector> {
        self.owner_key(binding)
            .map(|key| Selector::default().label(key, marker))
    }
}

#[derive(Copy, Clone, Debug, Default)]
pub struct LegacyOwnershipScheme;

#[derive(Copy, Clone, Debug, Default)]
pub struct CurrentOwnershipScheme;

pub static LEGACY: LegacyOwnershipScheme = LegacyOwnershipScheme;
pub static CURRENT: CurrentOwnershipScheme = CurrentOwnershipScheme;

/// Both schemes, current first.
pub fn schemes() -> [&'static dyn OwnershipScheme; 2] {
    [&CURRENT, &LEGACY]
}

/// The scheme a binding's primitives are written with.
pub fn scheme_for(binding: &ObjectMeta) -> &'static dyn OwnershipScheme {
    if labels_updated(binding) {
        &CURRENT
    } else {
        &LEGACY
    }
}

pub fn labels_updated(binding: &ObjectMeta) -> bool {
    binding
        .labels
        .as_ref()
        .and_then(|l| l.get(LABELS_UPDATED))
        .map(|v| v == "true")
        .unwrap_or(false)
}

// === impl LegacyOwnershipScheme ===

impl OwnershipScheme for LegacyOwnershipScheme {
    fn owner_key(&self, binding: &ObjectMeta) -> Option<String> {
        binding.uid.clone()
    }

    fn membership_marker(&self) -> &'static str {
        MEMBERSHIP_BINDING_OWNER_LEGACY
    }

    fn recognizes(&self, key: &str) -> bool {
        is_uid(key)
    }
}

// === impl CurrentOwnershipScheme ===

impl OwnershipScheme for CurrentOwnershipScheme {
    fn owner_key(&self, binding: &ObjectMeta) -> Option<String> {
        binding.name.as_ref()?;
        Some(naming::owner_key(binding))
    }

    fn membership_marker(&self) -> &'static str {
        MEMBERSHIP_BINDING_OWNER
    }

    fn recognizes(&self, key: &str) -> bool {
        !key.is_empty() && !key.contains('/') && !is_uid(key)
    }
}

/// Matches the `8-4-4-4-12` hex layout of object UIDs.
fn is_uid(key: &str) -> bool {
    let groups = key.split('-').map(str::len).collect::<Vec<_>>();
    groups == [8, 4, 4, 4, 12] && key.chars().all(|c| c == '-' || c.is_ascii_hexdigit())
}

/// The set of owner keys carried by a primitive under some set of markers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Owners(BTreeSet<String>);

// === impl Owners ===

impl Owners {
    pub fn of(labels: Option<&Map>, markers: &[&str]) -> Self {
        Self(
            labels
                .into_iter()
                .flatten()
                .filter(|(_, v)| markers.contains(&v.as_str()))
                .map(|(k, _)| k.clone())
                .collect(),
        )
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

/// Records `key` as an owner. Returns whether the labels changed.
pub fn add_owner(labels: &mut Map, key: &str, marker: &str) -> bool {
    if labels.get(key).map(String::as_str) == Some(marker) {
        return false;
    }
    labels.insert(key.to_string(), marker.to_string());
    true
}

/// Drops `key` if it is recorded under one of `markers`. Returns whether the labels changed.
pub fn remove_owner(labels: &mut Map, key: &str, markers: &[&str]) -> bool {
    match labels.get(key) {
        Some(v) if markers.contains(&v.as_str()) => {
            labels.remove(key);
            true
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::btreemap;

    fn binding(labels_updated: bool) -> ObjectMeta {
        ObjectMeta {
            namespace: Some("p-1".to_string()),
            name: Some("prtb-1".to_string()),
            uid: Some("6f1c2a3e-1b2c-4d5e-8f90-0a1b2c3d4e5f".to_string()),
            labels: labels_updated
                .then(|| btreemap! { LABELS_UPDATED.to_string() => "true".to_string() }),
            ..Default::default()
        }
    }

    #[test]
    fn scheme_follows_marker() {
        let legacy = binding(false);
        assert_eq!(
            scheme_for(&legacy).owner_key(&legacy).as_deref(),
            Some("6f1c2a3e-1b2c-4d5e-8f90-0a1b2c3d4e5f")
        );
        assert_eq!(
            scheme_for(&legacy).membership_marker(),
            MEMBERSHIP_BINDING_OWNER_LEGACY
        );

        let current = binding(true);
        assert_eq!(
            scheme_for(&current).owner_key(&current).as_deref(),
            Some("p-1_prtb-1")
        );
    }

    #[test]
    fn recognizes_key_shapes() {
        assert!(LEGACY.recognizes("6f1c2a3e-1b2c-4d5e-8f90-0a1b2c3d4e5f"));
        assert!(!LEGACY.recognizes("p-1_prtb-1"));
        assert!(CURRENT.recognizes("p-1_prtb-1"));
        assert!(!CURRENT.recognizes("6f1c2a3e-1b2c-4d5e-8f90-0a1b2c3d4e5f"));
        assert!(!CURRENT.recognizes("kubernetes.io/name"));
    }

    #[test]
    fn owner_set() {
        let mut labels = btreemap! {
            "a".to_string() => MEMBERSHIP_BINDING_OWNER.to_string(),
            "b".to_string() => MEMBERSHIP_BINDING_OWNER_LEGACY.to_string(),
            "c".to_string() => "unrelated".to_string(),
        };
        let owners = Owners::of(Some(&labels), &MEMBERSHIP_MARKERS);
        assert_eq!(owners.iter().collect::<Vec<_>>(), ["a", "b"]);

        assert!(!add_owner(&mut labels, "a", MEMBERSHIP_BINDING_OWNER));
        assert!(add_owner(&mut labels, "d", MEMBERSHIP_BINDING_OWNER));
        assert!(!remove_owner(&mut labels, "c", &MEMBERSHIP_MARKERS));
        assert!(remove_owner(&mut labels, "a", &MEMBERSHIP_MARKERS));
        assert_eq!(Owners::of(Some(&labels), &MEMBERSHIP_MARKERS).len(), 2);
    }
}
