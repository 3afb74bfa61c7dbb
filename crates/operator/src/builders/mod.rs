//! Desired state for every child kind. Pure functions of the custom resource and the
//! operator config; the reconcilers decide when to write them.
pub mod database;
pub mod image;
pub mod routing;
pub mod workload;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;

use crate::error::{Error, Result};

pub const MANAGER: &str = "launchpad-operator";
pub const APP_LABEL: &str = "launchpad.dev/app";
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

pub fn tls_secret_name(app: &str) -> String { format!("{app}-tls") }
pub fn network_policy_name(service: &str) -> String { format!("{service}-netpol") }
/// CloudNativePG publishes application credentials under this name.
pub fn connection_secret_name(service: &str) -> String { format!("{service}-app") }

pub fn labels(name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app.kubernetes.io/name".to_string(), name.to_string()),
        (MANAGED_BY_LABEL.to_string(), MANAGER.to_string()),
        (APP_LABEL.to_string(), name.to_string()),
    ])
}

pub fn selector_labels(name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(APP_LABEL.to_string(), name.to_string())])
}

fn owner_ref<K: Resource<DynamicType = ()>>(owner: &K) -> Result<OwnerReference> {
    owner.controller_owner_ref(&()).ok_or(Error::MissingField("metadata.uid"))
}

/// Metadata for a child living next to `owner`, controlled by it.
pub(crate) fn child_meta<K: Resource<DynamicType = ()>>(owner: &K, name: String, labels: BTreeMap<String, String>) -> Result<ObjectMeta> {
    Ok(ObjectMeta {
        name: Some(name),
        namespace: Some(owner.namespace().ok_or(Error::MissingField("metadata.namespace"))?),
        labels: Some(labels),
        owner_references: Some(vec![owner_ref(owner)?]),
        ..ObjectMeta::default()
    })
}
