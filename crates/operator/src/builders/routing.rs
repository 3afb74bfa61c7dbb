use kube::ResourceExt;

use super::{child_meta, labels, tls_secret_name};
use crate::{
    crd::Application,
    error::Result,
    external::{
        certmanager::{Certificate, CertificateSpec, IssuerRef},
        traefik::{IngressRoute, IngressRouteSpec, Route, RouteService, RouteTls, ENTRY_POINT_WEB, ENTRY_POINT_WEBSECURE},
    },
};

/// Explicit host, else `<name>.<base_domain>`.
pub fn host(app: &Application, base_domain: &str) -> String {
    match app.spec.host.as_deref().map(str::trim) {
        Some(h) if !h.is_empty() => h.to_string(),
        _ => format!("{}.{}", app.name_any(), base_domain),
    }
}

pub fn url(host: &str, tls: bool) -> String {
    let scheme = if tls { "https" } else { "http" };
    format!("{scheme}://{host}")
}

pub fn certificate(app: &Application, host: &str, issuer: &str) -> Result<Certificate> {
    let name = app.name_any();
    Ok(Certificate {
        metadata: child_meta(app, name.clone(), labels(&name))?,
        spec: CertificateSpec {
            secret_name: tls_secret_name(&name),
            dns_names: vec![host.to_string()],
            issuer_ref: IssuerRef { name: issuer.to_string(), kind: "ClusterIssuer".into() },
        },
    })
}

pub fn ingress_route(app: &Application, host: &str, tls: bool) -> Result<IngressRoute> {
    let name = app.name_any();
    let entry_point = if tls { ENTRY_POINT_WEBSECURE } else { ENTRY_POINT_WEB };
    Ok(IngressRoute {
        metadata: child_meta(app, name.clone(), labels(&name))?,
        spec: IngressRouteSpec {
            entry_points: vec![entry_point.to_string()],
            routes: vec![Route {
                match_: format!("Host(`{host}`)"),
                kind: "Rule".into(),
                services: vec![RouteService { name: name.clone(), port: app.spec.port }],
            }],
            tls: tls.then(|| RouteTls { secret_name: tls_secret_name(&name) }),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::ApplicationSpec;

    fn app(host: Option<&str>) -> Application {
        let mut a = Application::new("myapp", ApplicationSpec { host: host.map(str::to_string), ..ApplicationSpec::default() });
        a.metadata.namespace = Some("test-ns".into());
        a.metadata.uid = Some("uid-1".into());
        a
    }

    #[test]
    fn host_defaults_to_base_domain() {
        assert_eq!(host(&app(None), "example.com"), "myapp.example.com");
        assert_eq!(host(&app(Some("  ")), "example.com"), "myapp.example.com");
        assert_eq!(host(&app(Some("shop.acme.io")), "example.com"), "shop.acme.io");
    }

    #[test]
    fn url_scheme_follows_tls() {
        assert_eq!(url("a.example.com", true), "https://a.example.com");
        assert_eq!(url("a.example.com", false), "http://a.example.com");
    }

    #[test]
    fn plain_route_has_no_tls_block() {
        let r = ingress_route(&app(None), "myapp.example.com", false).unwrap();
        assert_eq!(r.spec.entry_points, vec!["web"]);
        assert!(r.spec.tls.is_none());
        assert_eq!(r.spec.routes[0].match_, "Host(`myapp.example.com`)");
        assert_eq!(r.spec.routes[0].services[0].port, 8080);
    }

    #[test]
    fn secure_route_references_tls_secret() {
        let r = ingress_route(&app(None), "myapp.example.com", true).unwrap();
        assert_eq!(r.spec.entry_points, vec!["websecure"]);
        assert_eq!(r.spec.tls.unwrap().secret_name, "myapp-tls");
        let c = certificate(&app(None), "myapp.example.com", "letsencrypt").unwrap();
        assert_eq!(c.spec.secret_name, "myapp-tls");
        assert_eq!(c.spec.dns_names, vec!["myapp.example.com"]);
        assert_eq!(c.spec.issuer_ref.name, "letsencrypt");
    }

    #[test]
    fn route_serializes_match_keyword() {
        let r = ingress_route(&app(None), "myapp.example.com", false).unwrap();
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["apiVersion"], "traefik.io/v1alpha1");
        assert_eq!(v["spec"]["routes"][0]["match"], "Host(`myapp.example.com`)");
        assert_eq!(v["spec"]["entryPoints"][0], "web");
    }
}
