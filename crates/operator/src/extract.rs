//! Reduce child status blocks to what the reconcilers act on.
use k8s_openapi::api::apps::v1::Deployment;
use kube::ResourceExt;

use crate::{
    builders::connection_secret_name,
    crd::BuildStatus,
    external::{cnpg::Cluster, find_condition, kpack::Image},
};

const READY: &str = "Ready";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildObservation {
    pub status: BuildStatus,
    /// Deployable image. Never set while a build is in flight.
    pub image: Option<String>,
}

pub fn build_outcome(image: &Image) -> BuildObservation {
    let status = image.status.as_ref();
    // Conditions written for an older spec say nothing about the current source.
    let stale = match (status.and_then(|s| s.observed_generation), image.metadata.generation) {
        (Some(observed), Some(current)) => observed < current,
        _ => false,
    };
    let ready = status.and_then(|s| find_condition(&s.conditions, READY)).map(|c| c.status.as_str());
    let outcome = match ready {
        _ if stale => BuildStatus::Building,
        Some("True") => BuildStatus::Succeeded,
        Some("False") => BuildStatus::Failed,
        _ => BuildStatus::Building,
    };
    let latest = status.and_then(|s| s.latest_image.clone()).filter(|i| !i.is_empty());
    BuildObservation {
        status: outcome,
        image: if outcome == BuildStatus::Building { None } else { latest },
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseObservation {
    pub ready: bool,
    pub connection_secret: Option<String>,
}

pub fn database_readiness(cluster: &Cluster) -> DatabaseObservation {
    let ready = cluster
        .status
        .as_ref()
        .and_then(|s| find_condition(&s.conditions, READY))
        .is_some_and(|c| c.status == "True");
    DatabaseObservation { ready, connection_secret: ready.then(|| connection_secret_name(&cluster.name_any())) }
}

pub fn available_replicas(deployment: &Deployment) -> i32 {
    deployment.status.as_ref().and_then(|s| s.available_replicas).unwrap_or(0)
}
