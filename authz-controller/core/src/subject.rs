//! Binding subjects.

use crate::{Error, Result};
use authz_controller_k8s_api::{BindingSubject, Subject};

pub const RBAC_GROUP: &str = "rbac.authorization.k8s.io";

/// The single kind of subject a binding names.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubjectRef {
    /// A user by name, by external principal, or both.
    User {
        name: Option<String>,
        principal: Option<String>,
    },
    Group(String),
    GroupPrincipal(String),
    ServiceAccount {
        namespace: String,
        name: String,
    },
}

/// Determines which kind of subject `binding` names.
///
/// A user name and a user principal describe the same user and may be set together; any other
/// combination of subject kinds is ambiguous.
pub fn classify(
    binding: &str,
    subject: &BindingSubject,
    service_account: Option<&str>,
) -> Result<SubjectRef> {
    let set = |v: &Option<String>| v.as_deref().filter(|s| !s.is_empty()).map(str::to_string);

    let mut found = Vec::with_capacity(1);
    let user = set(&subject.user_name);
    let principal = set(&subject.user_principal_name);
    if user.is_some() || principal.is_some() {
        found.push(SubjectRef::User {
            name: user,
            principal,
        });
    }
    if let Some(group) = set(&subject.group_name) {
        found.push(SubjectRef::Group(group));
    }
    if let Some(group) = set(&subject.group_principal_name) {
        found.push(SubjectRef::GroupPrincipal(group));
    }
    if let Some(sa) = service_account.filter(|s| !s.is_empty()) {
        found.push(parse_service_account(sa)?);
    }

    let subject = found
        .pop()
        .ok_or_else(|| Error::NoSubject(binding.to_string()))?;
    if !found.is_empty() {
        return Err(Error::AmbiguousSubject(binding.to_string()));
    }
    Ok(subject)
}

fn parse_service_account(sa: &str) -> Result<SubjectRef> {
    match sa.split_once(':') {
        Some((namespace, name)) if !namespace.is_empty() && !name.is_empty() => {
            Ok(SubjectRef::ServiceAccount {
                namespace: namespace.to_string(),
                name: name.to_string(),
            })
        }
        _ => Err(Error::InvalidServiceAccount(sa.to_string())),
    }
}

// === impl SubjectRef ===

impl SubjectRef {
    /// The RBAC subject, once a user has been resolved to a name.
    pub fn to_rbac(&self) -> Option<Subject> {
        let (kind, name, namespace) = match self {
            Self::User { name, .. } => ("User", name.clone()?, None),
            Self::Group(name) | Self::GroupPrincipal(name) => ("Group", name.clone(), None),
            Self::ServiceAccount { namespace, name } => {
                ("ServiceAccount", name.clone(), Some(namespace.clone()))
            }
        };
        let api_group = match self {
            Self::ServiceAccount { .. } => None,
            _ => Some(RBAC_GROUP.to_string()),
        };
        Some(Subject {
            api_group,
            kind: kind.to_string(),
            name,
            namespace,
        })
    }

    /// The user this subject refers to by name, if any.
    pub fn user_name(&self) -> Option<&str> {
        match self {
            Self::User { name, .. } => name.as_deref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subject(user: &str, principal: &str, group: &str, group_principal: &str) -> BindingSubject {
        let set = |s: &str| (!s.is_empty()).then(|| s.to_string());
        BindingSubject {
            user_name: set(user),
            user_principal_name: set(principal),
            group_name: set(group),
            group_principal_name: set(group_principal),
        }
    }

    #[test]
    fn ambiguous_groups() {
        assert_eq!(
            classify("b", &subject("", "", "devs", "ldap_group://devs"), None),
            Err(Error::AmbiguousSubject("b".to_string()))
        );
        assert_eq!(
            classify("b", &subject("u-1", "", "devs", ""), None),
            Err(Error::AmbiguousSubject("b".to_string()))
        );
        assert_eq!(
            classify("b", &subject("", "", "devs", ""), Some("ns:sa")),
            Err(Error::AmbiguousSubject("b".to_string()))
        );
    }

    #[test]
    fn no_subject() {
        assert_eq!(
            classify("b", &subject("", "", "", ""), None),
            Err(Error::NoSubject("b".to_string()))
        );
        assert_eq!(
            classify("b", &subject("", "", "", ""), Some("")),
            Err(Error::NoSubject("b".to_string()))
        );
    }

    #[test]
    fn user_name_and_principal() {
        let user = classify("b", &subject("u-1", "local://u-1", "", ""), None).unwrap();
        assert_eq!(
            user,
            SubjectRef::User {
                name: Some("u-1".to_string()),
                principal: Some("local://u-1".to_string()),
            }
        );
        let rbac = user.to_rbac().unwrap();
        assert_eq!((rbac.kind.as_str(), rbac.name.as_str()), ("User", "u-1"));

        let unresolved = classify("b", &subject("", "github_user://9", "", ""), None).unwrap();
        assert_eq!(unresolved.to_rbac(), None);
    }

    #[test]
    fn service_accounts() {
        let sa = classify("b", &subject("", "", "", ""), Some("ns-1:builder")).unwrap();
        let rbac = sa.to_rbac().unwrap();
        assert_eq!(rbac.kind, "ServiceAccount");
        assert_eq!(rbac.namespace.as_deref(), Some("ns-1"));
        assert_eq!(rbac.api_group, None);

        assert_eq!(
            classify("b", &subject("", "", "", ""), Some("builder")),
            Err(Error::InvalidServiceAccount("builder".to_string()))
        );
    }
}
