use super::*;
use authz_controller_core::{ownership, Identity};
use authz_controller_k8s_api::{
    BindingSubject, ClusterRoleBinding, ClusterRoleTemplateBinding,
    ClusterRoleTemplateBindingSpec, ObjectMeta, OwnerReference, RoleBinding, RoleRef,
    RoleTemplate, RoleTemplateSpec, Subject,
};
use kubert::index::{IndexClusterResource, IndexNamespacedResource};
use maplit::btreemap;

fn role_template(name: &str, parents: &[&str]) -> RoleTemplate {
    RoleTemplate {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: RoleTemplateSpec {
            role_template_names: parents.iter().map(|p| p.to_string()).collect(),
            ..Default::default()
        },
    }
}

fn crtb(ns: &str, name: &str, rt: &str, user: &str) -> ClusterRoleTemplateBinding {
    ClusterRoleTemplateBinding {
        metadata: ObjectMeta {
            namespace: Some(ns.to_string()),
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: ClusterRoleTemplateBindingSpec {
            cluster_name: ns.to_string(),
            role_template_name: rt.to_string(),
            subject: BindingSubject {
                user_name: Some(user.to_string()),
                ..Default::default()
            },
        },
    }
}

fn role_ref(name: &str) -> RoleRef {
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

fn crb(name: &str, role: &str, owners: &[&str]) -> ClusterRoleBinding {
    ClusterRoleBinding {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(
                owners
                    .iter()
                    .map(|o| (o.to_string(), ownership::MEMBERSHIP_BINDING_OWNER.to_string()))
                    .collect(),
            ),
            ..Default::default()
        },
        role_ref: role_ref(role),
        subjects: Some(vec![group("devs")]),
    }
}

#[test]
fn transitive_role_template_dependents() {
    let mut idx = Index::default();
    IndexClusterResource::apply(&mut idx, role_template("base", &[]));
    IndexClusterResource::apply(&mut idx, role_template("mid", &["base"]));
    IndexClusterResource::apply(&mut idx, role_template("top", &["mid"]));
    IndexClusterResource::apply(&mut idx, role_template("other", &[]));

    IndexNamespacedResource::apply(&mut idx, crtb("c-1", "a", "top", "u-1"));
    IndexNamespacedResource::apply(&mut idx, crtb("c-1", "b", "base", "u-2"));
    IndexNamespacedResource::apply(&mut idx, crtb("c-1", "c", "other", "u-1"));

    assert_eq!(
        idx.bindings_for_role_template("base"),
        vec![
            BindingRef::Cluster(ObjKey::new("c-1", "a")),
            BindingRef::Cluster(ObjKey::new("c-1", "b")),
        ]
    );
    assert_eq!(
        idx.bindings_for_role_template("top"),
        vec![BindingRef::Cluster(ObjKey::new("c-1", "a"))]
    );

    // Re-parenting drops the old edge.
    IndexClusterResource::apply(&mut idx, role_template("top", &[]));
    assert_eq!(
        idx.bindings_for_role_template("base"),
        vec![BindingRef::Cluster(ObjKey::new("c-1", "b"))]
    );

    assert_eq!(
        idx.bindings_for_user("u-1"),
        vec![
            BindingRef::Cluster(ObjKey::new("c-1", "a")),
            BindingRef::Cluster(ObjKey::new("c-1", "c")),
        ]
    );
    IndexNamespacedResource::<ClusterRoleTemplateBinding>::delete(
        &mut idx,
        "c-1".to_string(),
        "a".to_string(),
    );
    assert_eq!(
        idx.bindings_for_user("u-1"),
        vec![BindingRef::Cluster(ObjKey::new("c-1", "c"))]
    );
}

#[test]
fn inheritance_cycles_terminate() {
    let mut idx = Index::default();
    IndexClusterResource::apply(&mut idx, role_template("a", &["b"]));
    IndexClusterResource::apply(&mut idx, role_template("b", &["a"]));
    IndexNamespacedResource::apply(&mut idx, crtb("c-1", "x", "a", "u-1"));
    assert_eq!(
        idx.bindings_for_role_template("b"),
        vec![BindingRef::Cluster(ObjKey::new("c-1", "x"))]
    );
}

#[test]
fn cluster_role_bindings_by_identity_and_owner() {
    let mut idx = Index::default();
    IndexClusterResource::apply(&mut idx, crb("crb-1", "c-1-clustermember", &["c-1_a"]));
    IndexClusterResource::apply(&mut idx, crb("crb-2", "c-1-clustermember", &[]));
    IndexClusterResource::apply(&mut idx, crb("crb-3", "c-1-clusterowner", &["c-1_a"]));

    let id = Identity::new(&role_ref("c-1-clustermember"), &group("devs"));
    let found = idx.cluster_role_bindings_for(&id);
    assert_eq!(
        found.iter().map(|c| c.name_any()).collect::<Vec<_>>(),
        ["crb-1", "crb-2"]
    );

    let owned = idx.cluster_role_bindings_owned_by("c-1_a", &ownership::MEMBERSHIP_MARKERS);
    assert_eq!(
        owned.iter().map(|c| c.name_any()).collect::<Vec<_>>(),
        ["crb-1", "crb-3"]
    );
    assert!(idx
        .cluster_role_bindings_owned_by("c-1_a", &[ownership::CRTB_IN_PROJECT_BINDING_OWNER])
        .is_empty());

    // Dropping the owner label removes the binding from the owner index.
    IndexClusterResource::apply(&mut idx, crb("crb-1", "c-1-clustermember", &[]));
    let owned = idx.cluster_role_bindings_owned_by("c-1_a", &ownership::MEMBERSHIP_MARKERS);
    assert_eq!(
        owned.iter().map(|c| c.name_any()).collect::<Vec<_>>(),
        ["crb-3"]
    );

    IndexClusterResource::<ClusterRoleBinding>::delete(&mut idx, "crb-2".to_string());
    assert_eq!(idx.cluster_role_bindings_for(&id).len(), 1);
}

#[test]
fn role_bindings_by_owner_reference() {
    let mut idx = Index::default();
    let rb = RoleBinding {
        metadata: ObjectMeta {
            namespace: Some("c-1".to_string()),
            name: Some("a-nodes-manage".to_string()),
            owner_references: Some(vec![OwnerReference {
                api_version: "management.cattle.io/v3".to_string(),
                kind: "ClusterRoleTemplateBinding".to_string(),
                name: "a".to_string(),
                uid: "uid-a".to_string(),
                ..Default::default()
            }]),
            labels: Some(btreemap! {
                "c-1_a".to_string() => ownership::CRTB_IN_PROJECT_BINDING_OWNER.to_string(),
            }),
            ..Default::default()
        },
        role_ref: role_ref("nodes-manage"),
        subjects: Some(vec![group("devs")]),
    };
    IndexNamespacedResource::apply(&mut idx, rb);

    assert_eq!(idx.role_bindings_with_owner("uid-a").len(), 1);
    assert!(idx.role_bindings_with_owner("uid-b").is_empty());
    assert_eq!(
        idx.role_bindings_owned_by("c-1_a", &[ownership::CRTB_IN_PROJECT_BINDING_OWNER])
            .len(),
        1
    );
    let id = Identity::new(&role_ref("nodes-manage"), &group("devs"));
    assert_eq!(idx.role_bindings_for("c-1", &id).len(), 1);
    assert!(idx.role_bindings_for("c-2", &id).is_empty());

    IndexNamespacedResource::<RoleBinding>::delete(
        &mut idx,
        "c-1".to_string(),
        "a-nodes-manage".to_string(),
    );
    assert!(idx.role_bindings_with_owner("uid-a").is_empty());
    assert!(idx.role_bindings_for("c-1", &id).is_empty());
}
