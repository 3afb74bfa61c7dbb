use kube::CustomResourceExt;
use launchpad_operator::crd::{
    Application, ApplicationPhase, ApplicationSpec, ApplicationStatus, BuildStatus, DataSource, ManagedService,
    ManagedServiceSpec, ManagedServiceStatus, Plan, ServicePhase, ServiceType,
};
use serde_json::json;

#[test]
fn application_spec_uses_camel_case() {
    let spec = ApplicationSpec {
        image: Some("nginx:latest".into()),
        data_sources: vec!["creds".into()],
        ..ApplicationSpec::default()
    };
    let j = serde_json::to_value(&spec).unwrap();
    assert_eq!(j, json!({"image": "nginx:latest", "port": 8080, "replicas": 1, "dataSources": ["creds"], "tls": true}));
}

#[test]
fn status_fields_use_camel_case() {
    let status: ApplicationStatus =
        serde_json::from_value(json!({"phase": "Running", "buildStatus": "NotRequired", "availableReplicas": 2})).unwrap();
    assert_eq!(status.phase, ApplicationPhase::Running);
    assert_eq!(status.build_status, Some(BuildStatus::NotRequired));
    assert_eq!(status.available_replicas, 2);
    let svc: ManagedServiceStatus = serde_json::from_value(json!({"phase": "", "boundApps": ["web"]})).unwrap();
    assert_eq!(svc.phase, ServicePhase::Pending);
    assert_eq!(svc.bound_apps, vec!["web".to_string()]);
}

#[test]
fn managed_service_type_and_plan() {
    let spec: ManagedServiceSpec = serde_json::from_value(json!({"type": "postgres"})).unwrap();
    assert_eq!(spec, ManagedServiceSpec { service_type: ServiceType::Postgres, plan: Plan::Small });
    assert!(serde_json::from_value::<ManagedServiceSpec>(json!({"type": "mysql"})).is_err());
}

#[test]
fn crds_are_served_under_launchpad_group() {
    for (crd, kind, short) in [
        (Application::crd(), "Application", "app"),
        (ManagedService::crd(), "ManagedService", "msvc"),
        (DataSource::crd(), "DataSource", "ds"),
    ] {
        assert_eq!(crd.spec.group, "launchpad.dev");
        assert_eq!(crd.spec.names.kind, kind);
        assert_eq!(crd.spec.scope, "Namespaced");
        assert_eq!(crd.spec.names.short_names, Some(vec![short.to_string()]));
        assert_eq!(crd.spec.versions[0].name, "v1");
    }
    let app = Application::crd();
    assert!(app.spec.versions[0].subresources.as_ref().and_then(|s| s.status.as_ref()).is_some());
}
