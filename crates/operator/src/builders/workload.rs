use k8s_openapi::{
    api::{
        apps::v1::{Deployment, DeploymentSpec},
        core::v1::{
            Container, ContainerPort, EnvVar, EnvVarSource, PodSpec, PodTemplateSpec, Probe, SecretKeySelector, Service,
            ServicePort, ServiceSpec, TCPSocketAction,
        },
    },
    apimachinery::pkg::{
        apis::meta::v1::{LabelSelector, ObjectMeta},
        util::intstr::IntOrString,
    },
};
use kube::ResourceExt;
use once_cell::sync::Lazy;
use regex::Regex;

use super::{child_meta, connection_secret_name, labels, selector_labels};
use crate::{
    crd::{Application, ApplicationSpec, DataSource},
    error::Result,
};

pub const CONTAINER_NAME: &str = "app";

/// Secret key -> env var, in the order they are injected.
pub const SERVICE_ENV_KEYS: [(&str, &str); 6] = [
    ("uri", "DATABASE_URL"),
    ("host", "PGHOST"),
    ("port", "PGPORT"),
    ("dbname", "PGDATABASE"),
    ("username", "PGUSER"),
    ("password", "PGPASSWORD"),
];

static ENV_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static regex"));

pub fn is_valid_env_name(name: &str) -> bool { ENV_NAME.is_match(name) }

/// An environment variable sourced from one key of a secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretEnv {
    pub name: String,
    pub secret: String,
    pub key: String,
}

/// Splits a DataSource mapping into injectable references and the env names that
/// failed validation.
pub fn data_source_env(ds: &DataSource) -> (Vec<SecretEnv>, Vec<String>) {
    let secret = ds.secret_name();
    let mut accepted = Vec::new();
    let mut rejected = Vec::new();
    for (key, env_name) in &ds.spec.mapping {
        if is_valid_env_name(env_name) {
            accepted.push(SecretEnv { name: env_name.clone(), secret: secret.clone(), key: key.clone() });
        } else {
            rejected.push(env_name.clone());
        }
    }
    (accepted, rejected)
}

pub fn service_env(service: &str) -> Vec<SecretEnv> {
    let secret = connection_secret_name(service);
    SERVICE_ENV_KEYS
        .iter()
        .map(|(key, name)| SecretEnv { name: name.to_string(), secret: secret.clone(), key: key.to_string() })
        .collect()
}

/// Inline variables first, then secret references in the order given.
pub fn container_env(spec: &ApplicationSpec, secret_refs: &[SecretEnv]) -> Vec<EnvVar> {
    let inline = spec.env.iter().map(|e| EnvVar { name: e.name.clone(), value: Some(e.value.clone()), value_from: None });
    let from_secrets = secret_refs.iter().map(|r| EnvVar {
        name: r.name.clone(),
        value: None,
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector { name: r.secret.clone(), key: r.key.clone(), optional: None }),
            ..EnvVarSource::default()
        }),
    });
    inline.chain(from_secrets).collect()
}

pub fn deployment(app: &Application, image: &str, env: Vec<EnvVar>) -> Result<Deployment> {
    let name = app.name_any();
    let port = app.spec.port;
    let container = Container {
        name: CONTAINER_NAME.into(),
        image: Some(image.to_string()),
        ports: Some(vec![ContainerPort { name: Some("http".into()), container_port: port, protocol: Some("TCP".into()), ..ContainerPort::default() }]),
        env: if env.is_empty() { None } else { Some(env) },
        readiness_probe: Some(Probe {
            tcp_socket: Some(TCPSocketAction { host: None, port: IntOrString::Int(port) }),
            initial_delay_seconds: Some(2),
            period_seconds: Some(10),
            ..Probe::default()
        }),
        ..Container::default()
    };
    Ok(Deployment {
        metadata: child_meta(app, name.clone(), labels(&name))?,
        spec: Some(DeploymentSpec {
            replicas: Some(app.spec.replicas),
            selector: LabelSelector { match_labels: Some(selector_labels(&name)), match_expressions: None },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta { labels: Some(labels(&name)), ..ObjectMeta::default() }),
                spec: Some(PodSpec { containers: vec![container], ..PodSpec::default() }),
            },
            ..DeploymentSpec::default()
        }),
        status: None,
    })
}

pub fn service(app: &Application) -> Result<Service> {
    let name = app.name_any();
    Ok(Service {
        metadata: child_meta(app, name.clone(), labels(&name))?,
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".into()),
            selector: Some(selector_labels(&name)),
            ports: Some(vec![ServicePort {
                name: Some("http".into()),
                port: app.spec.port,
                target_port: Some(IntOrString::Int(app.spec.port)),
                protocol: Some("TCP".into()),
                ..ServicePort::default()
            }]),
            ..ServiceSpec::default()
        }),
        status: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{DataSourceSpec, EnvVarSpec};
    use std::collections::BTreeMap;

    fn app(name: &str, spec: ApplicationSpec) -> Application {
        let mut a = Application::new(name, spec);
        a.metadata.namespace = Some("test-ns".into());
        a.metadata.uid = Some("uid-1".into());
        a
    }

    fn secret_ref(env: &EnvVar) -> (String, String) {
        let sel = env.value_from.as_ref().and_then(|v| v.secret_key_ref.as_ref()).unwrap();
        (sel.name.clone(), sel.key.clone())
    }

    #[test]
    fn env_name_validation() {
        assert!(is_valid_env_name("DATABASE_URL"));
        assert!(is_valid_env_name("_private1"));
        assert!(!is_valid_env_name("1BAD"));
        assert!(!is_valid_env_name("has-dash"));
        assert!(!is_valid_env_name(""));
        assert!(!is_valid_env_name("A=B"));
    }

    #[test]
    fn data_source_mapping_rejects_bad_names() {
        let mut ds = DataSource::new("stripe", DataSourceSpec {
            secret_name: None,
            mapping: BTreeMap::from([("api-key".to_string(), "STRIPE_KEY".to_string()), ("other".to_string(), "bad name".to_string())]),
        });
        ds.metadata.namespace = Some("test-ns".into());
        let (ok, bad) = data_source_env(&ds);
        assert_eq!(ok, vec![SecretEnv { name: "STRIPE_KEY".into(), secret: "stripe".into(), key: "api-key".into() }]);
        assert_eq!(bad, vec!["bad name".to_string()]);
    }

    #[test]
    fn service_env_uses_connection_secret() {
        let env = service_env("pgdb");
        let names: Vec<_> = env.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["DATABASE_URL", "PGHOST", "PGPORT", "PGDATABASE", "PGUSER", "PGPASSWORD"]);
        assert!(env.iter().all(|e| e.secret == "pgdb-app"));
    }

    #[test]
    fn inline_env_precedes_secret_refs() {
        let spec = ApplicationSpec { env: vec![EnvVarSpec { name: "MODE".into(), value: "prod".into() }], ..ApplicationSpec::default() };
        let env = container_env(&spec, &service_env("pgdb"));
        assert_eq!(env[0].name, "MODE");
        assert_eq!(env[0].value.as_deref(), Some("prod"));
        assert_eq!(env[1].name, "DATABASE_URL");
        assert_eq!(secret_ref(&env[1]), ("pgdb-app".to_string(), "uri".to_string()));
    }

    #[test]
    fn deployment_shape() {
        let a = app("myapp", ApplicationSpec { port: 3000, replicas: 2, ..ApplicationSpec::default() });
        let d = deployment(&a, "nginx:latest", Vec::new()).unwrap();
        assert_eq!(d.metadata.name.as_deref(), Some("myapp"));
        assert_eq!(d.metadata.namespace.as_deref(), Some("test-ns"));
        let owner = &d.metadata.owner_references.as_ref().unwrap()[0];
        assert_eq!((owner.kind.as_str(), owner.uid.as_str(), owner.controller), ("Application", "uid-1", Some(true)));
        let spec = d.spec.unwrap();
        assert_eq!(spec.replicas, Some(2));
        let pod = spec.template.spec.unwrap();
        assert_eq!(pod.containers[0].image.as_deref(), Some("nginx:latest"));
        assert_eq!(pod.containers[0].ports.as_ref().unwrap()[0].container_port, 3000);
        assert!(pod.containers[0].env.is_none());
        assert_eq!(spec.selector.match_labels, Some(selector_labels("myapp")));
    }

    #[test]
    fn owner_uid_required() {
        let mut a = app("myapp", ApplicationSpec::default());
        a.metadata.uid = None;
        assert!(service(&a).is_err());
    }
}
