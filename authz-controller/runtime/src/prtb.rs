use crate::{
    core::{
        ownership::PRTB_IN_CLUSTER_BINDING_OWNER,
        role_template::{self, is_owner},
        rules::PROJECT_MANAGEMENT_PLANE,
        scope::ProjectRef,
    },
    error::Result,
    k8s::{Cluster, Context, Project, ProjectRoleTemplateBinding, Resource, ResourceExt, Store},
    Reconciler,
};
use tracing::{debug, instrument};

impl<S: Store> Reconciler<S> {
    /// Converges the primitives of a project binding.
    ///
    /// Project members also get member visibility of the project's cluster.
    #[instrument(skip_all, fields(ns = ?prtb.namespace(), name = %prtb.name_any()))]
    pub async fn reconcile_prtb(&self, prtb: &ProjectRoleTemplateBinding) -> Result<()> {
        let Some(prtb) = self.fresh(prtb).await? else {
            debug!("Binding was deleted");
            return Ok(());
        };
        if prtb.meta().deletion_timestamp.is_some() {
            return Ok(());
        }

        let (prtb, subject) = self.resolve_subject(prtb).await?;
        let prtb = self.migrate_labels(prtb).await?;
        let scope = ProjectRef::parse(&prtb.spec.project_name)?;
        let cluster = self
            .scope::<Cluster>("cluster", None, &scope.cluster)
            .await?;
        let project = self
            .scope::<Project>("project", Some(&scope.cluster), &scope.project)
            .await?;

        let rt = &prtb.spec.role_template_name;
        let (owner, closure) = {
            let index = self.index.read();
            (
                is_owner(&*index, rt, Context::Project),
                role_template::resolve(&*index, rt),
            )
        };
        let (owner, closure) = (owner?, closure?);

        self.ensure_cluster_membership(prtb.meta(), &cluster, &subject, false)
            .await?;
        self.ensure_project_membership(prtb.meta(), &project, &subject, owner)
            .await?;

        let namespace = prtb.namespace().unwrap_or_default();
        self.sync_management_plane(&prtb, &namespace, &closure, PROJECT_MANAGEMENT_PLANE, &subject)
            .await?;
        self.sync_cluster_namespace(&prtb, &scope.cluster, &closure, &subject)
            .await
    }

    /// Releases everything a deleted project binding owns.
    #[instrument(skip_all, fields(ns = ?prtb.namespace(), name = %prtb.name_any()))]
    pub async fn remove_prtb(&self, prtb: &ProjectRoleTemplateBinding) -> Result<()> {
        self.release_cluster_membership(prtb.meta(), None).await?;
        self.release_project_membership(prtb.meta(), None, None)
            .await?;
        self.remove_management_plane(prtb, PRTB_IN_CLUSTER_BINDING_OWNER)
            .await
    }
}
