//! Create-or-update used for every child kind.
//!
//! Labels and owner references are written once at creation and never diffed; on
//! later passes only the fields listed in [`OwnedSpec::sync_spec`] are overwritten.
use k8s_openapi::api::{
    apps::v1::{Deployment, DeploymentSpec},
    core::v1::{ContainerPort, EnvVar, Service, TCPSocketAction},
    networking::v1::NetworkPolicy,
};
use kube::ResourceExt;
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::{
    error::{Error, Result},
    external::{certmanager::Certificate, cnpg::Cluster, kpack::Image, traefik::IngressRoute},
    store::{object_key, Managed, ObjectStore},
};

pub trait OwnedSpec: Managed {
    /// Copies the operator-owned fields of `desired` onto `self`; `true` if anything changed.
    fn sync_spec(&mut self, desired: &Self) -> bool;
}

fn assign<T: PartialEq + Clone>(current: &mut T, desired: &T) -> bool {
    if current == desired { return false; }
    *current = desired.clone();
    true
}

/// The parts of a Deployment the builder sets. The stored template also carries
/// API-server defaults such as pull and DNS policy, so it is compared through this
/// projection rather than as a whole.
#[derive(PartialEq)]
struct WorkloadView<'a> {
    replicas: Option<i32>,
    pod_labels: Option<&'a BTreeMap<String, String>>,
    containers: Vec<ContainerView<'a>>,
}

#[derive(PartialEq)]
struct ContainerView<'a> {
    name: &'a str,
    image: Option<&'a str>,
    env: &'a [EnvVar],
    ports: &'a [ContainerPort],
    tcp_readiness: Option<&'a TCPSocketAction>,
    initial_delay: Option<i32>,
    period: Option<i32>,
}

fn workload_view(spec: &DeploymentSpec) -> WorkloadView<'_> {
    let containers = spec.template.spec.as_ref().map(|p| p.containers.as_slice()).unwrap_or_default();
    WorkloadView {
        replicas: spec.replicas,
        pod_labels: spec.template.metadata.as_ref().and_then(|m| m.labels.as_ref()),
        containers: containers
            .iter()
            .map(|c| {
                let readiness = c.readiness_probe.as_ref();
                ContainerView {
                    name: &c.name,
                    image: c.image.as_deref(),
                    env: c.env.as_deref().unwrap_or_default(),
                    ports: c.ports.as_deref().unwrap_or_default(),
                    tcp_readiness: readiness.and_then(|p| p.tcp_socket.as_ref()),
                    initial_delay: readiness.and_then(|p| p.initial_delay_seconds),
                    period: readiness.and_then(|p| p.period_seconds),
                }
            })
            .collect(),
    }
}

impl OwnedSpec for Deployment {
    fn sync_spec(&mut self, desired: &Self) -> bool {
        if self.spec.is_none() || desired.spec.is_none() {
            return assign(&mut self.spec, &desired.spec);
        }
        let (Some(current), Some(want)) = (self.spec.as_mut(), desired.spec.as_ref()) else { return false };
        if workload_view(current) == workload_view(want) {
            return false;
        }
        // The selector is immutable once created.
        current.replicas = want.replicas;
        current.template = want.template.clone();
        true
    }
}

impl OwnedSpec for Service {
    fn sync_spec(&mut self, desired: &Self) -> bool {
        if self.spec.is_none() || desired.spec.is_none() {
            return assign(&mut self.spec, &desired.spec);
        }
        let (Some(current), Some(want)) = (self.spec.as_mut(), desired.spec.as_ref()) else { return false };
        // clusterIP and friends are allocated by the API server; leave them alone.
        let ports = assign(&mut current.ports, &want.ports);
        let selector = assign(&mut current.selector, &want.selector);
        let type_ = assign(&mut current.type_, &want.type_);
        ports || selector || type_
    }
}

impl OwnedSpec for NetworkPolicy {
    fn sync_spec(&mut self, desired: &Self) -> bool { assign(&mut self.spec, &desired.spec) }
}

macro_rules! whole_spec {
    ($($kind:ty),+ $(,)?) => {
        $(impl OwnedSpec for $kind {
            fn sync_spec(&mut self, desired: &Self) -> bool { assign(&mut self.spec, &desired.spec) }
        })+
    };
}

whole_spec!(Image, Certificate, IngressRoute, Cluster);

/// Gets by name; creates `desired` when absent (a racing create counts as success),
/// otherwise syncs the owned fields and updates only when they differ.
pub async fn apply<S: ObjectStore, K: OwnedSpec>(store: &S, desired: K) -> Result<K> {
    let (ns, name) = object_key(&desired)?;
    let kind = K::kind(&());
    match store.get::<K>(&ns, &name).await? {
        None => match store.create(&desired).await {
            Ok(created) => {
                info!(%kind, %ns, %name, "child.created");
                Ok(created)
            }
            Err(Error::AlreadyExists { .. }) => {
                debug!(%kind, %ns, %name, "child.create.raced");
                store.get::<K>(&ns, &name).await?.ok_or_else(|| Error::not_found(kind.clone(), &ns, &name))
            }
            Err(e) => Err(e),
        },
        Some(mut existing) => {
            if !existing.sync_spec(&desired) {
                debug!(%kind, %ns, %name, version=?existing.resource_version(), "child.unchanged");
                return Ok(existing);
            }
            let updated = store.replace(&existing).await?;
            info!(%kind, %ns, %name, "child.updated");
            Ok(updated)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{ServicePort, ServiceSpec};

    fn svc(cluster_ip: Option<&str>, port: i32) -> Service {
        Service {
            spec: Some(ServiceSpec {
                cluster_ip: cluster_ip.map(str::to_string),
                ports: Some(vec![ServicePort { port, ..Default::default() }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn service_sync_keeps_allocated_cluster_ip() {
        let mut existing = svc(Some("10.0.0.12"), 8080);
        assert!(existing.sync_spec(&svc(None, 9090)));
        let spec = existing.spec.unwrap();
        assert_eq!(spec.cluster_ip.as_deref(), Some("10.0.0.12"));
        assert_eq!(spec.ports.unwrap()[0].port, 9090);
    }

    fn deployment(image: &str) -> Deployment {
        let mut app = crate::crd::Application::new("web", crate::crd::ApplicationSpec::default());
        app.metadata.namespace = Some("test-ns".into());
        app.metadata.uid = Some("uid-1".into());
        crate::builders::workload::deployment(&app, image, Vec::new()).unwrap()
    }

    /// What the API server hands back after admission fills in its defaults.
    fn with_server_defaults(mut d: Deployment) -> Deployment {
        let spec = d.spec.as_mut().unwrap();
        spec.revision_history_limit = Some(10);
        spec.progress_deadline_seconds = Some(600);
        let pod = spec.template.spec.as_mut().unwrap();
        pod.restart_policy = Some("Always".into());
        pod.dns_policy = Some("ClusterFirst".into());
        pod.termination_grace_period_seconds = Some(30);
        pod.scheduler_name = Some("default-scheduler".into());
        let container = &mut pod.containers[0];
        container.image_pull_policy = Some("IfNotPresent".into());
        container.termination_message_path = Some("/dev/termination-log".into());
        container.termination_message_policy = Some("File".into());
        let readiness = container.readiness_probe.as_mut().unwrap();
        readiness.timeout_seconds = Some(1);
        readiness.success_threshold = Some(1);
        readiness.failure_threshold = Some(3);
        d
    }

    #[test]
    fn deployment_sync_ignores_server_defaults() {
        let mut existing = with_server_defaults(deployment("nginx:1.27"));
        assert!(!existing.sync_spec(&deployment("nginx:1.27")));
        let pod = existing.spec.unwrap().template.spec.unwrap();
        assert_eq!(pod.dns_policy.as_deref(), Some("ClusterFirst"));
    }

    #[test]
    fn deployment_sync_rolls_out_new_image() {
        let mut existing = with_server_defaults(deployment("nginx:1.27"));
        assert!(existing.sync_spec(&deployment("nginx:1.28")));
        let container = &existing.spec.unwrap().template.spec.unwrap().containers[0];
        assert_eq!(container.image.as_deref(), Some("nginx:1.28"));
    }

    #[test]
    fn sync_reports_no_change_for_equal_spec() {
        let mut existing = svc(Some("10.0.0.12"), 8080);
        assert!(!existing.sync_spec(&svc(None, 8080)));
    }
}
