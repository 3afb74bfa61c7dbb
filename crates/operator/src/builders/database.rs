use k8s_openapi::{
    api::networking::v1::{NetworkPolicy, NetworkPolicyIngressRule, NetworkPolicyPeer, NetworkPolicyPort, NetworkPolicySpec},
    apimachinery::pkg::{apis::meta::v1::LabelSelector, util::intstr::IntOrString},
};
use kube::ResourceExt;
use std::collections::BTreeMap;

use super::{child_meta, network_policy_name, MANAGED_BY_LABEL, MANAGER};
use crate::{
    crd::ManagedService,
    error::Result,
    external::cnpg::{Cluster, ClusterSpec, StorageConfiguration},
};

pub const CLUSTER_LABEL: &str = "cnpg.io/cluster";
pub const POSTGRES_PORT: i32 = 5432;
/// CloudNativePG instance manager status endpoint.
pub const INSTANCE_STATUS_PORT: i32 = 8000;

fn service_labels(name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app.kubernetes.io/name".to_string(), name.to_string()),
        (MANAGED_BY_LABEL.to_string(), MANAGER.to_string()),
    ])
}

fn match_labels(pairs: &[(&str, &str)]) -> LabelSelector {
    LabelSelector {
        match_labels: Some(pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()),
        match_expressions: None,
    }
}

fn tcp(port: i32) -> NetworkPolicyPort {
    NetworkPolicyPort { port: Some(IntOrString::Int(port)), protocol: Some("TCP".into()), end_port: None }
}

pub fn database_cluster(svc: &ManagedService) -> Result<Cluster> {
    let name = svc.name_any();
    Ok(Cluster {
        metadata: child_meta(svc, name.clone(), service_labels(&name))?,
        spec: ClusterSpec {
            instances: svc.spec.plan.instances(),
            storage: StorageConfiguration { size: svc.spec.plan.storage_size().to_string() },
        },
        status: None,
    })
}

/// Admits postgres traffic from operator-managed workloads, replication between the
/// cluster's own instances, and the instance-manager port from anywhere.
pub fn network_policy(svc: &ManagedService) -> Result<NetworkPolicy> {
    let name = svc.name_any();
    let workloads = NetworkPolicyIngressRule {
        from: Some(vec![NetworkPolicyPeer { pod_selector: Some(match_labels(&[(MANAGED_BY_LABEL, MANAGER)])), ..NetworkPolicyPeer::default() }]),
        ports: Some(vec![tcp(POSTGRES_PORT)]),
    };
    let peers = NetworkPolicyIngressRule {
        from: Some(vec![NetworkPolicyPeer { pod_selector: Some(match_labels(&[(CLUSTER_LABEL, &name)])), ..NetworkPolicyPeer::default() }]),
        ports: None,
    };
    let operator = NetworkPolicyIngressRule {
        from: Some(vec![NetworkPolicyPeer { namespace_selector: Some(LabelSelector::default()), ..NetworkPolicyPeer::default() }]),
        ports: Some(vec![tcp(INSTANCE_STATUS_PORT)]),
    };
    Ok(NetworkPolicy {
        metadata: child_meta(svc, network_policy_name(&name), service_labels(&name))?,
        spec: Some(NetworkPolicySpec {
            pod_selector: match_labels(&[(CLUSTER_LABEL, &name)]),
            policy_types: Some(vec!["Ingress".into()]),
            ingress: Some(vec![workloads, peers, operator]),
            egress: None,
        }),
        ..NetworkPolicy::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{ManagedServiceSpec, Plan, ServiceType};

    fn svc(plan: Plan) -> ManagedService {
        let mut s = ManagedService::new("pgdb", ManagedServiceSpec { service_type: ServiceType::Postgres, plan });
        s.metadata.namespace = Some("test-ns".into());
        s.metadata.uid = Some("svc-uid".into());
        s
    }

    #[test]
    fn cluster_sized_by_plan() {
        let c = database_cluster(&svc(Plan::Medium)).unwrap();
        assert_eq!(c.metadata.name.as_deref(), Some("pgdb"));
        assert_eq!(c.spec.instances, 2);
        assert_eq!(c.spec.storage.size, "10Gi");
        assert_eq!(c.metadata.owner_references.unwrap()[0].kind, "ManagedService");
    }

    #[test]
    fn policy_selects_database_pods() {
        let p = network_policy(&svc(Plan::Small)).unwrap();
        assert_eq!(p.metadata.name.as_deref(), Some("pgdb-netpol"));
        let spec = p.spec.unwrap();
        assert_eq!(spec.pod_selector.match_labels.unwrap().get(CLUSTER_LABEL).map(String::as_str), Some("pgdb"));
        let rules = spec.ingress.unwrap();
        assert_eq!(rules.len(), 3);
        assert_eq!(rules[0].ports.as_ref().unwrap()[0].port, Some(IntOrString::Int(5432)));
    }
}
