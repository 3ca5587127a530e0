use authz_controller_k8s_api::{RoleRef, Subject};

/// What a generated primitive grants: a role to a single subject.
///
/// Two primitives with the same identity (in the same namespace) are redundant.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity {
    pub role_kind: String,
    pub role: String,
    pub subject_kind: String,
    pub subject: String,
}

impl Identity {
    pub fn new(role: &RoleRef, subject: &Subject) -> Self {
        Self {
            role_kind: role.kind.clone(),
            role: role.name.clone(),
            subject_kind: subject.kind.clone(),
            subject: subject.name.clone(),
        }
    }

    /// The identity of a primitive, if it has exactly one subject.
    pub fn of(role: &RoleRef, subjects: Option<&[Subject]>) -> Option<Self> {
        match subjects? {
            [subject] => Some(Self::new(role, subject)),
            _ => None,
        }
    }
}
