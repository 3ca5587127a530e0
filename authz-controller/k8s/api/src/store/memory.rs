//! An in-memory [`Store`] for tests.
//!
//! Objects are kept as JSON, keyed by kind, namespace and name. Writes assign a uid, a
//! monotonically increasing `resourceVersion` and (when unset) a creation timestamp, and every
//! create/update/delete is counted so that tests can assert on the number of writes.

use super::{Error, Object, Result, Store};
use crate::labels::Selector;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::ResourceExt;
use parking_lot::Mutex;
use std::{collections::BTreeMap, sync::Arc};

#[derive(Clone, Debug, Default)]
pub struct MemStore(Arc<Mutex<State>>);

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<Key, serde_json::Value>,
    version: u64,
    writes: usize,
    conflicts: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Key {
    kind: String,
    namespace: String,
    name: String,
}

// === impl MemStore ===

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an object without counting it as a write.
    pub fn seed<K: Object>(&self, obj: K) -> K {
        let mut state = self.0.lock();
        let obj = state.stamp(obj);
        let key = Key::of::<K>(obj.namespace().as_deref(), &obj.name_any());
        state.objects.insert(key, to_json(&obj));
        obj
    }

    /// Returns every stored object of kind `K`, in namespace/name order.
    pub fn all<K: Object>(&self) -> Vec<K> {
        let kind = Key::kind::<K>();
        let state = self.0.lock();
        state
            .objects
            .iter()
            .filter(|(k, _)| k.kind == kind)
            .filter_map(|(_, v)| serde_json::from_value(v.clone()).ok())
            .collect()
    }

    pub fn writes(&self) -> usize {
        self.0.lock().writes
    }

    /// Makes the next `n` updates fail with a conflict.
    pub fn inject_conflicts(&self, n: usize) {
        self.0.lock().conflicts = n;
    }
}

#[async_trait::async_trait]
impl Store for MemStore {
    async fn get<K: Object>(&self, namespace: Option<&str>, name: &str) -> Result<K> {
        let key = Key::of::<K>(namespace, name);
        let state = self.0.lock();
        let obj = state
            .objects
            .get(&key)
            .ok_or_else(|| Error::NotFound(key.to_string()))?;
        from_json(obj.clone())
    }

    async fn list<K: Object>(
        &self,
        namespace: Option<&str>,
        selector: &Selector,
    ) -> Result<Vec<K>> {
        let kind = Key::kind::<K>();
        let state = self.0.lock();
        let mut items = Vec::new();
        for (key, obj) in state.objects.iter() {
            if key.kind != kind || namespace.map_or(false, |ns| ns != key.namespace) {
                continue;
            }
            let obj = from_json::<K>(obj.clone())?;
            if selector.matches(obj.labels()) {
                items.push(obj);
            }
        }
        Ok(items)
    }

    async fn create<K: Object>(&self, obj: &K) -> Result<K> {
        let mut state = self.0.lock();
        state.writes += 1;

        let mut obj = obj.clone();
        if obj.meta().name.is_none() {
            let prefix = obj.meta().generate_name.clone().unwrap_or_default();
            obj.meta_mut().name = Some(format!("{prefix}{:05}", state.version + 1));
        }
        let key = Key::of::<K>(obj.namespace().as_deref(), &obj.name_any());
        if state.objects.contains_key(&key) {
            return Err(Error::AlreadyExists(key.to_string()));
        }
        obj.meta_mut().uid = None;
        obj.meta_mut().resource_version = None;
        let obj = state.stamp(obj);
        state.objects.insert(key, to_json(&obj));
        Ok(obj)
    }

    async fn update<K: Object>(&self, obj: &K) -> Result<K> {
        let mut state = self.0.lock();
        state.writes += 1;

        let key = Key::of::<K>(obj.namespace().as_deref(), &obj.name_any());
        if state.conflicts > 0 {
            state.conflicts -= 1;
            return Err(Error::Conflict(key.to_string()));
        }
        let current = state
            .objects
            .get(&key)
            .ok_or_else(|| Error::NotFound(key.to_string()))
            .and_then(|v| from_json::<K>(v.clone()))?;
        if obj.resource_version().is_some() && obj.resource_version() != current.resource_version()
        {
            return Err(Error::Conflict(key.to_string()));
        }

        let mut obj = obj.clone();
        obj.meta_mut().uid = current.uid();
        obj.meta_mut().creation_timestamp = current.meta().creation_timestamp.clone();
        obj.meta_mut().resource_version = None;
        let obj = state.stamp(obj);
        state.objects.insert(key, to_json(&obj));
        Ok(obj)
    }

    async fn delete<K: Object>(
        &self,
        namespace: Option<&str>,
        name: &str,
        resource_version: Option<&str>,
    ) -> Result<()> {
        let mut state = self.0.lock();
        state.writes += 1;

        let key = Key::of::<K>(namespace, name);
        let current = state
            .objects
            .get(&key)
            .ok_or_else(|| Error::NotFound(key.to_string()))
            .and_then(|v| from_json::<K>(v.clone()))?;
        if resource_version.is_some() && resource_version != current.resource_version().as_deref() {
            return Err(Error::Conflict(key.to_string()));
        }
        state.objects.remove(&key);
        Ok(())
    }
}

// === impl State ===

impl State {
    /// Assigns the server-managed metadata fields that are not already set.
    fn stamp<K: Object>(&mut self, mut obj: K) -> K {
        self.version += 1;
        let version = self.version;
        let meta = obj.meta_mut();
        meta.resource_version = Some(version.to_string());
        if meta.uid.is_none() {
            meta.uid = Some(format!("00000000-0000-4000-8000-{version:012x}"));
        }
        if meta.creation_timestamp.is_none() {
            meta.creation_timestamp = timestamp(version);
        }
        obj
    }
}

// === impl Key ===

impl Key {
    fn of<K: Object>(namespace: Option<&str>, name: &str) -> Self {
        Self {
            kind: Self::kind::<K>(),
            namespace: namespace.unwrap_or_default().to_string(),
            name: name.to_string(),
        }
    }

    fn kind<K: Object>() -> String {
        format!("{}/{}", K::api_version(&()), K::kind(&()))
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{} {}", self.kind, self.name)
        } else {
            write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
        }
    }
}

fn to_json<K: Object>(obj: &K) -> serde_json::Value {
    serde_json::to_value(obj).unwrap_or_default()
}

fn from_json<K: Object>(value: serde_json::Value) -> Result<K> {
    serde_json::from_value(value).map_err(|e| Error::Invalid(e.to_string()))
}

/// One second past midnight per version, so creation order is reflected in timestamps.
fn timestamp(seconds: u64) -> Option<Time> {
    let ts = format!(
        "2024-01-01T{:02}:{:02}:{:02}Z",
        (seconds / 3600) % 24,
        (seconds / 60) % 60,
        seconds % 60
    );
    serde_json::from_value(serde_json::Value::String(ts)).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::rbac::v1::ClusterRoleBinding;
    use kube::api::ObjectMeta;
    use maplit::btreemap;

    fn crb(name: &str) -> ClusterRoleBinding {
        ClusterRoleBinding {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(btreemap! { "owner".to_string() => "x".to_string() }),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn create_get_list_delete() {
        let store = MemStore::new();
        let created = store.create(&crb("a")).await.unwrap();
        assert!(created.uid().is_some());
        assert!(created.creation_timestamp().is_some());

        let got = store.get::<ClusterRoleBinding>(None, "a").await.unwrap();
        assert_eq!(got.uid(), created.uid());

        assert!(store.create(&crb("a")).await.unwrap_err().is_already_exists());

        let listed = store
            .list::<ClusterRoleBinding>(None, &Selector::default().exists("owner"))
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        let listed = store
            .list::<ClusterRoleBinding>(None, &Selector::default().exists("other"))
            .await
            .unwrap();
        assert!(listed.is_empty());

        store
            .delete::<ClusterRoleBinding>(None, "a", None)
            .await
            .unwrap();
        assert!(store
            .delete::<ClusterRoleBinding>(None, "a", None)
            .await
            .unwrap_err()
            .is_not_found());
        assert_eq!(store.writes(), 4);
    }

    #[tokio::test]
    async fn stale_update_conflicts() {
        let store = MemStore::new();
        let v1 = store.seed(crb("a"));
        let v2 = store.update(&v1).await.unwrap();
        assert_ne!(v1.resource_version(), v2.resource_version());
        assert!(store.update(&v1).await.unwrap_err().is_conflict());
        store.update(&v2).await.unwrap();
    }

    #[tokio::test]
    async fn stale_delete_conflicts() {
        let store = MemStore::new();
        let v1 = store.seed(crb("a"));
        let v2 = store.update(&v1).await.unwrap();

        let error = store
            .delete::<ClusterRoleBinding>(None, "a", v1.resource_version().as_deref())
            .await
            .unwrap_err();
        assert!(error.is_conflict());
        assert!(store.get::<ClusterRoleBinding>(None, "a").await.is_ok());

        store
            .delete::<ClusterRoleBinding>(None, "a", v2.resource_version().as_deref())
            .await
            .unwrap();
        assert!(store.all::<ClusterRoleBinding>().is_empty());
    }
}
