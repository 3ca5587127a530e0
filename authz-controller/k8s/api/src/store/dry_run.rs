use super::{Object, Result, Store};
use crate::labels::Selector;
use kube::ResourceExt;
use tracing::info;

/// Wraps a [`Store`] so that, when enabled, writes are logged instead of performed.
///
/// Reads always go to the inner store.
#[derive(Clone, Debug)]
pub struct DryRun<S> {
    inner: S,
    enabled: bool,
}

impl<S> DryRun<S> {
    pub fn new(inner: S, enabled: bool) -> Self {
        Self { inner, enabled }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

#[async_trait::async_trait]
impl<S: Store> Store for DryRun<S> {
    async fn get<K: Object>(&self, namespace: Option<&str>, name: &str) -> Result<K> {
        self.inner.get(namespace, name).await
    }

    async fn list<K: Object>(
        &self,
        namespace: Option<&str>,
        selector: &Selector,
    ) -> Result<Vec<K>> {
        self.inner.list(namespace, selector).await
    }

    async fn create<K: Object>(&self, obj: &K) -> Result<K> {
        if self.enabled {
            info!(kind = %K::kind(&()), ns = ?obj.namespace(), name = %obj.name_any(), "Dry run: would create");
            return Ok(obj.clone());
        }
        self.inner.create(obj).await
    }

    async fn update<K: Object>(&self, obj: &K) -> Result<K> {
        if self.enabled {
            info!(kind = %K::kind(&()), ns = ?obj.namespace(), name = %obj.name_any(), "Dry run: would update");
            return Ok(obj.clone());
        }
        self.inner.update(obj).await
    }

    async fn delete<K: Object>(
        &self,
        namespace: Option<&str>,
        name: &str,
        resource_version: Option<&str>,
    ) -> Result<()> {
        if self.enabled {
            info!(kind = %K::kind(&()), ns = ?namespace, %name, "Dry run: would delete");
            return Ok(());
        }
        self.inner
            .delete::<K>(namespace, name, resource_version)
            .await
    }
}
