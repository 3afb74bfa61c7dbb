//! Custom resources served by the operator: `Application`, `ManagedService` and the
//! read-only `DataSource`.
use chrono::{DateTime, SecondsFormat, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Aggregate condition type mirrored on both custom resources.
pub const READY_CONDITION: &str = "Ready";

#[derive(CustomResource, Serialize, Deserialize, Debug, Clone, JsonSchema, PartialEq)]
#[kube(group = "launchpad.dev", version = "v1", kind = "Application", namespaced, status = "ApplicationStatus", shortname = "app")]
#[kube(printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#)]
#[kube(printcolumn = r#"{"name":"URL","type":"string","jsonPath":".status.url"}"#)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSpec {
    /// Prebuilt image reference. Takes precedence over `git` and `blob`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git: Option<GitSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob: Option<BlobSource>,
    #[serde(default = "default_port")]
    pub port: i32,
    #[serde(default = "default_replicas")]
    pub replicas: i32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVarSpec>,
    /// Names of `DataSource` objects in the same namespace.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data_sources: Vec<String>,
    /// Names of `ManagedService` objects whose connection secret is injected.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default = "default_true")]
    pub tls: bool,
}

fn default_port() -> i32 { 8080 }
fn default_replicas() -> i32 { 1 }
fn default_true() -> bool { true }
fn default_revision() -> String { "main".into() }

impl Default for ApplicationSpec {
    fn default() -> Self {
        Self {
            image: None,
            git: None,
            blob: None,
            port: default_port(),
            replicas: default_replicas(),
            env: Vec::new(),
            data_sources: Vec::new(),
            services: Vec::new(),
            host: None,
            tls: true,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, JsonSchema, PartialEq)]
pub struct GitSource {
    pub url: String,
    #[serde(default = "default_revision")]
    pub revision: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, JsonSchema, PartialEq)]
pub struct BlobSource {
    pub url: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, JsonSchema, PartialEq)]
pub struct EnvVarSpec {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, JsonSchema, PartialEq, Eq)]
pub enum ApplicationPhase {
    #[default]
    #[serde(alias = "")]
    Pending,
    Building,
    Deploying,
    Running,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, JsonSchema, PartialEq, Eq)]
pub enum BuildStatus {
    NotRequired,
    Building,
    Succeeded,
    Failed,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationStatus {
    #[serde(default)]
    pub phase: ApplicationPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_status: Option<BuildStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_image: Option<String>,
    #[serde(default)]
    pub available_replicas: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Conditions::is_empty")]
    pub conditions: Conditions,
}

#[derive(CustomResource, Serialize, Deserialize, Debug, Clone, JsonSchema, PartialEq)]
#[kube(group = "launchpad.dev", version = "v1", kind = "ManagedService", namespaced, status = "ManagedServiceStatus", shortname = "msvc")]
#[kube(printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#)]
#[serde(rename_all = "camelCase")]
pub struct ManagedServiceSpec {
    #[serde(rename = "type")]
    pub service_type: ServiceType,
    #[serde(default)]
    pub plan: Plan,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    Postgres,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    #[default]
    Small,
    Medium,
    Large,
}

impl Plan {
    pub fn instances(self) -> i32 {
        match self { Self::Small => 1, Self::Medium => 2, Self::Large => 3 }
    }

    pub fn storage_size(self) -> &'static str {
        match self { Self::Small => "1Gi", Self::Medium => "10Gi", Self::Large => "50Gi" }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, JsonSchema, PartialEq, Eq)]
pub enum ServicePhase {
    #[default]
    #[serde(alias = "")]
    Pending,
    Provisioning,
    Ready,
    /// Written while deletion is blocked by bound applications.
    Failed,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManagedServiceStatus {
    #[serde(default)]
    pub phase: ServicePhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub bound_apps: Vec<String>,
}

#[derive(CustomResource, Serialize, Deserialize, Debug, Clone, Default, JsonSchema, PartialEq)]
#[kube(group = "launchpad.dev", version = "v1", kind = "DataSource", namespaced, shortname = "ds")]
#[serde(rename_all = "camelCase")]
pub struct DataSourceSpec {
    /// Secret holding the values; defaults to the DataSource's own name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_name: Option<String>,
    /// Secret key -> environment variable name.
    #[serde(default)]
    pub mapping: BTreeMap<String, String>,
}

impl DataSource {
    pub fn secret_name(&self) -> String {
        match self.spec.secret_name.as_deref() {
            Some(s) if !s.is_empty() => s.to_string(),
            _ => kube::ResourceExt::name_any(self),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    True,
    False,
}

impl From<bool> for ConditionStatus {
    fn from(v: bool) -> Self { if v { Self::True } else { Self::False } }
}

#[derive(Serialize, Deserialize, Debug, Clone, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    pub reason: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

/// Conditions keyed by type, kept in first-insertion order.
#[derive(Serialize, Deserialize, Debug, Clone, Default, JsonSchema, PartialEq)]
#[serde(transparent)]
pub struct Conditions(Vec<Condition>);

impl Conditions {
    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    pub fn iter(&self) -> impl Iterator<Item = &Condition> { self.0.iter() }

    pub fn get(&self, type_: &str) -> Option<&Condition> {
        self.0.iter().find(|c| c.type_ == type_)
    }

    /// Replaces the condition of the same type in place, or appends it. The
    /// transition time only moves when the status flips.
    pub fn upsert(&mut self, type_: &str, status: bool, reason: &str, message: impl Into<String>, now: DateTime<Utc>) {
        let status = ConditionStatus::from(status);
        let message = message.into();
        let stamp = now.to_rfc3339_opts(SecondsFormat::Secs, true);
        match self.0.iter_mut().find(|c| c.type_ == type_) {
            Some(existing) => {
                if existing.status != status || existing.last_transition_time.is_none() {
                    existing.last_transition_time = Some(stamp);
                }
                existing.status = status;
                existing.reason = reason.to_string();
                existing.message = message;
            }
            None => self.0.push(Condition {
                type_: type_.to_string(),
                status,
                reason: reason.to_string(),
                message,
                last_transition_time: Some(stamp),
            }),
        }
    }
}
