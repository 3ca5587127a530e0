//! Subject resolution for cluster and project bindings.

use crate::{
    core::{
        naming,
        subject::{self, SubjectRef},
    },
    error::Result,
    k8s::{Object, ObjectMeta, ResourceExt, RoleTemplateBinding, Selector, Store, Subject, User, UserSpec},
    Reconciler,
};
use tracing::{debug, info};

/// Supplies the display name of a user created for a principal.
pub const PRINCIPAL_DISPLAY_NAME: &str = "auth.cattle.io/principal-display-name";

impl<S: Store> Reconciler<S> {
    /// Classifies a binding's subject and fills in a missing user name or principal.
    ///
    /// A binding naming only a principal gets the name of the user for that principal, which
    /// is created if needed. A binding naming only a user gets the principal of that user whose
    /// identifier ends with the user's name. A changed binding is written back and returned.
    pub(crate) async fn resolve_subject<B>(&self, mut binding: B) -> Result<(B, Subject)>
    where
        B: Object + RoleTemplateBinding,
    {
        let resolved = subject::classify(
            &binding.name_any(),
            binding.subject(),
            binding.service_account(),
        )?;

        let mut changed = false;
        if let SubjectRef::User { name, principal } = &resolved {
            match (name, principal) {
                (None, Some(principal)) => {
                    let display = binding.annotations().get(PRINCIPAL_DISPLAY_NAME).cloned();
                    let user = self.ensure_user(principal, display).await?;
                    binding.subject_mut().user_name = Some(user);
                    changed = true;
                }
                (Some(name), None) => {
                    let user = self.store.get::<User>(None, name).await?;
                    if let Some(principal) =
                        user.spec.principal_ids.iter().find(|p| p.ends_with(name.as_str()))
                    {
                        binding.subject_mut().user_principal_name = Some(principal.clone());
                        changed = true;
                    }
                }
                _ => {}
            }
        }

        // Classify again so that a resolved user name is reflected in the subject.
        let resolved = subject::classify(
            &binding.name_any(),
            binding.subject(),
            binding.service_account(),
        )?;
        let rbac = resolved
            .to_rbac()
            .ok_or_else(|| crate::core::Error::NoSubject(binding.name_any()))?;

        if changed {
            info!(kind = %B::kind(&()), ns = ?binding.namespace(), name = %binding.name_any(), "Updating resolved subject");
            binding = self.store.update(&binding).await?;
        }
        Ok((binding, rbac))
    }

    /// Returns the name of the user holding `principal`, creating one if none does.
    pub(crate) async fn ensure_user(&self, principal: &str, display_name: Option<String>) -> Result<String> {
        let name = naming::user_for_principal(principal);
        match self.store.get::<User>(None, &name).await {
            Ok(_) => return Ok(name),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }

        let users = self.store.list::<User>(None, &Selector::default()).await?;
        if let Some(user) = users
            .iter()
            .find(|u| u.spec.principal_ids.iter().any(|p| p == principal))
        {
            debug!(user = %user.name_any(), %principal, "Found user for principal");
            return Ok(user.name_any());
        }

        let user = User {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                ..Default::default()
            },
            spec: UserSpec {
                display_name,
                username: None,
                principal_ids: vec![principal.to_string()],
            },
        };
        info!(user = %name, %principal, "Creating user for principal");
        match self.store.create(&user).await {
            Ok(_) => Ok(name),
            Err(e) if e.is_already_exists() => Ok(name),
            Err(e) => Err(e.into()),
        }
    }
}
