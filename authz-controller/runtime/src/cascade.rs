//! Cleanup of everything that refers to a deleted user, cluster or project.
//!
//! Cascades are best effort: every item is attempted and the failures are reported together.

use crate::{
    error::{aggregate, Error, Result},
    index::BindingRef,
    k8s::{
        Cluster, ClusterRoleTemplateBinding, GlobalRoleBinding, Namespace, Project,
        ProjectRoleTemplateBinding, ResourceExt, RoleBinding, Secret, Selector, Store, Token, User,
    },
    Reconciler,
};
use tracing::{info, instrument};

/// Labels a token with the user it was issued to.
pub const TOKEN_USER_LABEL: &str = "authn.management.cattle.io/token-userId";

/// Holds the secrets of local users.
pub const USER_SECRET_NAMESPACE: &str = "cattle-local-user-passwords";

const CLUSTER_RESTRICTED_ADMIN_BINDING: &str = "restricted-admin-rb-cluster";
const PROJECT_RESTRICTED_ADMIN_BINDING: &str = "restricted-admin-rb-project";

impl<S: Store> Reconciler<S> {
    /// Deletes a user's bindings and tokens, then its namespace and secret.
    #[instrument(skip_all, fields(user = %user.name_any()))]
    pub async fn remove_user(&self, user: &User) -> Result<()> {
        let name = user.name_any();
        let mut errors = Vec::new();

        let bindings = self.index.read().bindings_for_user(&name);
        for binding in bindings {
            let result = match &binding {
                BindingRef::Cluster(key) => {
                    self.delete::<ClusterRoleTemplateBinding>(Some(&key.namespace), &key.name)
                        .await
                }
                BindingRef::Project(key) => {
                    self.delete::<ProjectRoleTemplateBinding>(Some(&key.namespace), &key.name)
                        .await
                }
                BindingRef::Global(name) => self.delete::<GlobalRoleBinding>(None, name).await,
            };
            errors.extend(result.err());
        }

        let selector = Selector::default().label(TOKEN_USER_LABEL, &name);
        match self.store.list::<Token>(None, &selector).await {
            Ok(tokens) => {
                for token in tokens {
                    errors.extend(self.delete::<Token>(None, &token.name_any()).await.err());
                }
            }
            Err(e) => errors.push(e.into()),
        }

        errors.extend(self.delete::<Namespace>(None, &name).await.err());
        let secret = format!("{name}-secret");
        errors.extend(
            self.delete::<Secret>(Some(USER_SECRET_NAMESPACE), &secret)
                .await
                .err(),
        );

        report("user", &name, errors)
    }

    /// Deletes a cluster's restricted-admin binding and its namespace.
    #[instrument(skip_all, fields(cluster = %cluster.name_any()))]
    pub async fn remove_cluster(&self, cluster: &Cluster) -> Result<()> {
        self.remove_scope_namespace(&cluster.name_any(), CLUSTER_RESTRICTED_ADMIN_BINDING)
            .await
    }

    /// Deletes a project's restricted-admin binding and its namespace.
    #[instrument(skip_all, fields(project = %project.name_any()))]
    pub async fn remove_project(&self, project: &Project) -> Result<()> {
        self.remove_scope_namespace(&project.name_any(), PROJECT_RESTRICTED_ADMIN_BINDING)
            .await
    }

    async fn remove_scope_namespace(&self, namespace: &str, restricted_admin: &str) -> Result<()> {
        let mut errors = Vec::new();
        errors.extend(
            self.delete::<RoleBinding>(Some(namespace), restricted_admin)
                .await
                .err(),
        );
        errors.extend(self.delete::<Namespace>(None, namespace).await.err());
        report("namespace", namespace, errors)
    }
}

fn report(kind: &str, name: &str, errors: Vec<Error>) -> Result<()> {
    if errors.is_empty() {
        info!(%kind, %name, "Cascade complete");
    } else {
        info!(%kind, %name, failures = errors.len(), "Cascade incomplete");
    }
    aggregate(errors)
}

