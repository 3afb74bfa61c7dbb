//! Test harness utilities for integration & unit tests.
//! [`MemoryStore`] behaves like a single API server closely enough to exercise the
//! reconcilers: uid/resourceVersion assignment, conflicts on stale writes, a separate
//! status path, finalizer-gated deletion and owner-reference garbage collection.
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde_json::{json, Map, Value};
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard},
};

use crate::{
    config::OperatorConfig,
    controller::Context,
    error::{Error, Result},
    store::{merge_patch, object_key, status_value, Managed, ObjectStore},
};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct ObjectKey {
    type_: String,
    namespace: String,
    name: String,
}

impl ObjectKey {
    fn of<K: Managed>(namespace: &str, name: &str) -> Self {
        Self { type_: format!("{}/{}", K::api_version(&()), K::kind(&())), namespace: namespace.into(), name: name.into() }
    }
}

#[derive(Default)]
struct State {
    objects: BTreeMap<ObjectKey, Value>,
    version: u64,
}

impl State {
    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }

    /// Removes the object and, transitively, everything whose owner references point at it.
    fn remove_cascading(&mut self, key: &ObjectKey) {
        let Some(removed) = self.objects.remove(key) else { return };
        let Some(uid) = removed.pointer("/metadata/uid").and_then(Value::as_str).map(str::to_string) else { return };
        let dependents: Vec<ObjectKey> = self
            .objects
            .iter()
            .filter(|(_, v)| {
                v.pointer("/metadata/ownerReferences")
                    .and_then(Value::as_array)
                    .is_some_and(|refs| refs.iter().any(|r| r.get("uid").and_then(Value::as_str) == Some(uid.as_str())))
            })
            .map(|(k, _)| k.clone())
            .collect();
        for dep in dependents {
            self.finalize_or_remove(&dep);
        }
    }

    fn finalize_or_remove(&mut self, key: &ObjectKey) {
        let has_finalizers = self
            .objects
            .get(key)
            .and_then(|v| v.pointer("/metadata/finalizers"))
            .and_then(Value::as_array)
            .is_some_and(|f| !f.is_empty());
        if has_finalizers {
            let rv = self.next_version();
            if let Some(meta) = self.objects.get_mut(key).and_then(|v| v.get_mut("metadata")).and_then(Value::as_object_mut) {
                meta.entry("deletionTimestamp").or_insert_with(|| json!(now()));
                meta.insert("resourceVersion".into(), json!(rv));
            }
        } else {
            self.remove_cascading(key);
        }
    }
}

fn now() -> String { Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true) }

fn metadata_mut(value: &mut Value) -> Result<&mut Map<String, Value>> {
    value.get_mut("metadata").and_then(Value::as_object_mut).ok_or(Error::MissingField("metadata"))
}

fn stored_version(value: &Value) -> Option<&str> { value.pointer("/metadata/resourceVersion").and_then(Value::as_str) }

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    fn lock(&self) -> MutexGuard<'_, State> { self.state.lock().unwrap_or_else(|e| e.into_inner()) }

    fn conflict<K: Managed>(namespace: &str, name: &str) -> Error {
        Error::Conflict { kind: K::kind(&()).to_string(), key: format!("{namespace}/{name}") }
    }

    /// Applies `f` to the stored object, status included, the way another controller
    /// (kpack, CloudNativePG, the Deployment controller) would.
    pub fn mutate<K: Managed>(&self, namespace: &str, name: &str, f: impl FnOnce(&mut K)) -> Result<()> {
        let mut state = self.lock();
        let key = ObjectKey::of::<K>(namespace, name);
        let current = state.objects.get(&key).cloned().ok_or_else(|| Error::not_found(K::kind(&()), namespace, name))?;
        let mut obj: K = serde_json::from_value(current)?;
        f(&mut obj);
        let mut value = serde_json::to_value(&obj)?;
        let rv = state.next_version();
        metadata_mut(&mut value)?.insert("resourceVersion".into(), json!(rv));
        state.objects.insert(key, value);
        Ok(())
    }

    pub fn resource_version<K: Managed>(&self, namespace: &str, name: &str) -> Option<String> {
        let state = self.lock();
        state.objects.get(&ObjectKey::of::<K>(namespace, name)).and_then(stored_version).map(str::to_string)
    }

    pub fn contains<K: Managed>(&self, namespace: &str, name: &str) -> bool {
        self.lock().objects.contains_key(&ObjectKey::of::<K>(namespace, name))
    }

    pub fn len(&self) -> usize { self.lock().objects.len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get<K: Managed>(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        let state = self.lock();
        match state.objects.get(&ObjectKey::of::<K>(namespace, name)) {
            Some(v) => Ok(Some(serde_json::from_value(v.clone())?)),
            None => Ok(None),
        }
    }

    async fn create<K: Managed>(&self, obj: &K) -> Result<K> {
        let (ns, name) = object_key(obj)?;
        let key = ObjectKey::of::<K>(&ns, &name);
        let mut state = self.lock();
        if state.objects.contains_key(&key) {
            return Err(Error::AlreadyExists { kind: K::kind(&()).to_string(), key: format!("{ns}/{name}") });
        }
        let mut value = serde_json::to_value(obj)?;
        let rv = state.next_version();
        let meta = metadata_mut(&mut value)?;
        meta.insert("uid".into(), json!(uuid::Uuid::new_v4().to_string()));
        meta.insert("resourceVersion".into(), json!(rv));
        meta.insert("generation".into(), json!(1));
        meta.insert("creationTimestamp".into(), json!(now()));
        meta.remove("deletionTimestamp");
        state.objects.insert(key, value.clone());
        Ok(serde_json::from_value(value)?)
    }

    async fn replace<K: Managed>(&self, obj: &K) -> Result<K> {
        let (ns, name) = object_key(obj)?;
        let key = ObjectKey::of::<K>(&ns, &name);
        let mut state = self.lock();
        let stored = state.objects.get(&key).cloned().ok_or_else(|| Error::not_found(K::kind(&()), &ns, &name))?;
        let stored_rv = stored_version(&stored).unwrap_or_default().to_string();
        if obj.meta().resource_version.as_deref().is_some_and(|rv| rv != stored_rv) {
            return Err(Self::conflict::<K>(&ns, &name));
        }
        let mut value = serde_json::to_value(obj)?;
        // Status and server-owned metadata are not writable through this path.
        if let Some(o) = value.as_object_mut() {
            match stored.get("status") {
                Some(s) => { o.insert("status".into(), s.clone()); }
                None => { o.remove("status"); }
            }
        }
        let stored_meta = stored.get("metadata").cloned().unwrap_or_default();
        let meta = metadata_mut(&mut value)?;
        for field in ["uid", "creationTimestamp", "deletionTimestamp", "generation"] {
            match stored_meta.get(field) {
                Some(v) => { meta.insert(field.into(), v.clone()); }
                None => { meta.remove(field); }
            }
        }
        meta.insert("resourceVersion".into(), json!(stored_rv));
        if value == stored {
            return Ok(serde_json::from_value(stored)?);
        }
        if value.get("spec") != stored.get("spec") {
            let generation = stored.pointer("/metadata/generation").and_then(Value::as_i64).unwrap_or(1);
            metadata_mut(&mut value)?.insert("generation".into(), json!(generation + 1));
        }
        let rv = state.next_version();
        metadata_mut(&mut value)?.insert("resourceVersion".into(), json!(rv));
        let deleting = value.pointer("/metadata/deletionTimestamp").is_some();
        let finalizers_empty = value.pointer("/metadata/finalizers").and_then(Value::as_array).map_or(true, Vec::is_empty);
        state.objects.insert(key.clone(), value.clone());
        if deleting && finalizers_empty {
            state.remove_cascading(&key);
        }
        Ok(serde_json::from_value(value)?)
    }

    async fn update_status<K: Managed>(&self, obj: &K) -> Result<K> {
        let (ns, name) = object_key(obj)?;
        let key = ObjectKey::of::<K>(&ns, &name);
        let mut state = self.lock();
        let mut stored = state.objects.get(&key).cloned().ok_or_else(|| Error::not_found(K::kind(&()), &ns, &name))?;
        if obj.meta().resource_version.as_deref().is_some_and(|rv| Some(rv) != stored_version(&stored)) {
            return Err(Self::conflict::<K>(&ns, &name));
        }
        let current = stored.get("status").cloned().unwrap_or(Value::Null);
        // Applied the way the API server applies a merge patch to the status subresource.
        let mut status = current.clone();
        json_patch::merge(&mut status, &merge_patch(&current, &status_value(obj)?));
        if status == current {
            return Ok(serde_json::from_value(stored)?);
        }
        let rv = state.next_version();
        if let Some(o) = stored.as_object_mut() {
            o.insert("status".into(), status);
        }
        metadata_mut(&mut stored)?.insert("resourceVersion".into(), json!(rv));
        state.objects.insert(key, stored.clone());
        Ok(serde_json::from_value(stored)?)
    }

    async fn delete<K: Managed>(&self, namespace: &str, name: &str) -> Result<()> {
        let key = ObjectKey::of::<K>(namespace, name);
        let mut state = self.lock();
        if state.objects.contains_key(&key) {
            state.finalize_or_remove(&key);
        }
        Ok(())
    }
}

/// Config used across the suites: no TLS issuer, `example.com` as base domain.
pub fn test_config() -> OperatorConfig {
    OperatorConfig {
        builder_name: "default".into(),
        registry_prefix: "registry.example.com/apps".into(),
        base_domain: "example.com".into(),
        ..OperatorConfig::default()
    }
}

pub fn context(config: OperatorConfig) -> Context<MemoryStore> { Context::new(MemoryStore::new(), config) }
