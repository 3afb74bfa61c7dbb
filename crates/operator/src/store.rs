//! Access to the cluster's object store. Reconcilers only talk to [`ObjectStore`], so
//! they run unchanged against the API server ([`KubeStore`]) or the in-memory store
//! used by the tests.
use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::{
    api::{DeleteParams, Patch, PatchParams, PostParams},
    Api, Client, Resource, ResourceExt,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Map, Value};
use std::fmt::Debug;

use crate::error::{Error, Result};

/// Any namespaced kind, built-in or custom, that can be read and written by key.
pub trait Managed:
    Resource<DynamicType = (), Scope = NamespaceResourceScope> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<K> Managed for K where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// `Ok(None)` when the object does not exist.
    async fn get<K: Managed>(&self, namespace: &str, name: &str) -> Result<Option<K>>;

    /// Fails with [`Error::AlreadyExists`] when the key is taken.
    async fn create<K: Managed>(&self, obj: &K) -> Result<K>;

    /// Spec/metadata update. Conditional on the object's resourceVersion when it carries one.
    async fn replace<K: Managed>(&self, obj: &K) -> Result<K>;

    /// Writes only the `status` of `obj`, through the status subresource.
    async fn update_status<K: Managed>(&self, obj: &K) -> Result<K>;

    /// Requests deletion. Objects with finalizers linger with a deletion timestamp.
    async fn delete<K: Managed>(&self, namespace: &str, name: &str) -> Result<()>;
}

/// RFC 7386 merge patch that turns `current` into `desired`. Keys the serializer
/// skipped on `desired` are sent as `null` so the stored value is cleared.
pub fn merge_patch(current: &Value, desired: &Value) -> Value {
    match (current, desired) {
        (Value::Object(cur), Value::Object(want)) => {
            let mut patch = Map::new();
            for (key, value) in want {
                match cur.get(key) {
                    Some(existing) if existing == value => {}
                    Some(existing) => { patch.insert(key.clone(), merge_patch(existing, value)); }
                    None => { patch.insert(key.clone(), value.clone()); }
                }
            }
            for key in cur.keys().filter(|k| !want.contains_key(*k)) {
                patch.insert(key.clone(), Value::Null);
            }
            Value::Object(patch)
        }
        _ => desired.clone(),
    }
}

/// The `status` member of `obj` as stored JSON; `Null` when unset.
pub(crate) fn status_value<K: Serialize>(obj: &K) -> Result<Value> {
    Ok(serde_json::to_value(obj)?.get("status").cloned().unwrap_or(Value::Null))
}

pub(crate) fn object_key<K: Managed>(obj: &K) -> Result<(String, String)> {
    let ns = obj.namespace().ok_or(Error::MissingField("metadata.namespace"))?;
    let name = obj.meta().name.clone().ok_or(Error::MissingField("metadata.name"))?;
    Ok((ns, name))
}

#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self { Self { client } }

    fn api<K: Managed>(&self, namespace: &str) -> Api<K> { Api::namespaced(self.client.clone(), namespace) }
}

/// Maps API status codes onto the store's error classes.
fn classify<K: Managed>(err: kube::Error, namespace: &str, name: &str) -> Error {
    let kind = K::kind(&()).to_string();
    let key = format!("{namespace}/{name}");
    match err {
        kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => Error::AlreadyExists { kind, key },
        kube::Error::Api(ae) if ae.code == 409 => Error::Conflict { kind, key },
        kube::Error::Api(ae) if ae.code == 404 => Error::NotFound { kind, key },
        e => Error::Kube(e),
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get<K: Managed>(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        self.api::<K>(namespace).get_opt(name).await.map_err(|e| classify::<K>(e, namespace, name))
    }

    async fn create<K: Managed>(&self, obj: &K) -> Result<K> {
        let (ns, name) = object_key(obj)?;
        self.api::<K>(&ns).create(&PostParams::default(), obj).await.map_err(|e| classify::<K>(e, &ns, &name))
    }

    async fn replace<K: Managed>(&self, obj: &K) -> Result<K> {
        let (ns, name) = object_key(obj)?;
        self.api::<K>(&ns).replace(&name, &PostParams::default(), obj).await.map_err(|e| classify::<K>(e, &ns, &name))
    }

    async fn update_status<K: Managed>(&self, obj: &K) -> Result<K> {
        let (ns, name) = object_key(obj)?;
        let api = self.api::<K>(&ns);
        let stored = api.get_status(&name).await.map_err(|e| classify::<K>(e, &ns, &name))?;
        if obj.resource_version().is_some() && stored.resource_version() != obj.resource_version() {
            return Err(Error::Conflict { kind: K::kind(&()).to_string(), key: format!("{ns}/{name}") });
        }
        // resourceVersion in the patch body turns the merge patch into a conditional write.
        let patch = json!({
            "metadata": { "resourceVersion": obj.resource_version() },
            "status": merge_patch(&status_value(&stored)?, &status_value(obj)?),
        });
        api.patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| classify::<K>(e, &ns, &name))
    }

    async fn delete<K: Managed>(&self, namespace: &str, name: &str) -> Result<()> {
        match self.api::<K>(namespace).delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(classify::<K>(e, namespace, name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleared_fields_are_nulled() {
        let current = json!({"phase": "Ready", "connectionSecret": "pgdb-app", "boundApps": ["web"]});
        let desired = json!({"phase": "Provisioning", "boundApps": ["web"]});
        let patch = merge_patch(&current, &desired);
        assert_eq!(patch, json!({"phase": "Provisioning", "connectionSecret": null}));

        let mut merged = current.clone();
        json_patch::merge(&mut merged, &patch);
        assert_eq!(merged, desired);
    }

    #[test]
    fn nested_objects_patch_per_key_and_arrays_replace() {
        let current = json!({"a": {"x": 1, "y": 2}, "list": [1, 2]});
        let desired = json!({"a": {"x": 1}, "list": [3]});
        assert_eq!(merge_patch(&current, &desired), json!({"a": {"y": null}, "list": [3]}));
        assert_eq!(merge_patch(&Value::Null, &desired), desired);
        assert_eq!(merge_patch(&desired, &desired), json!({}));
    }
}
