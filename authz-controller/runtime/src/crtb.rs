use crate::{
    core::{
        ownership::CRTB_IN_PROJECT_BINDING_OWNER,
        role_template::{self, is_owner},
        rules::CLUSTER_MANAGEMENT_PLANE,
    },
    error::Result,
    k8s::{Cluster, ClusterRoleTemplateBinding, Context, Resource, ResourceExt, Store},
    Reconciler,
};
use tracing::{debug, instrument};

impl<S: Store> Reconciler<S> {
    /// Converges the primitives of a cluster binding.
    ///
    /// Steps run in order and the first failure aborts the pass; each step is idempotent, so
    /// the next pass picks up where this one stopped.
    #[instrument(skip_all, fields(ns = ?crtb.namespace(), name = %crtb.name_any()))]
    pub async fn reconcile_crtb(&self, crtb: &ClusterRoleTemplateBinding) -> Result<()> {
        let Some(crtb) = self.fresh(crtb).await? else {
            debug!("Binding was deleted");
            return Ok(());
        };
        if crtb.meta().deletion_timestamp.is_some() {
            return Ok(());
        }

        let (crtb, subject) = self.resolve_subject(crtb).await?;
        let crtb = self.migrate_labels(crtb).await?;
        let cluster = self
            .scope::<Cluster>("cluster", None, &crtb.spec.cluster_name)
            .await?;

        let rt = &crtb.spec.role_template_name;
        let (owner, closure) = {
            let index = self.index.read();
            (
                is_owner(&*index, rt, Context::Cluster),
                role_template::resolve(&*index, rt),
            )
        };
        let (owner, closure) = (owner?, closure?);

        self.ensure_cluster_membership(crtb.meta(), &cluster, &subject, owner)
            .await?;

        let namespace = crtb.namespace().unwrap_or_default();
        self.sync_management_plane(&crtb, &namespace, &closure, CLUSTER_MANAGEMENT_PLANE, &subject)
            .await?;
        self.sync_project_namespaces(&crtb, &closure, &subject)
            .await
    }

    /// Releases everything a deleted cluster binding owns.
    #[instrument(skip_all, fields(ns = ?crtb.namespace(), name = %crtb.name_any()))]
    pub async fn remove_crtb(&self, crtb: &ClusterRoleTemplateBinding) -> Result<()> {
        self.release_cluster_membership(crtb.meta(), None).await?;
        self.remove_management_plane(crtb, CRTB_IN_PROJECT_BINDING_OWNER)
            .await
    }
}
