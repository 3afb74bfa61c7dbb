use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const ENTRY_POINT_WEB: &str = "web";
pub const ENTRY_POINT_WEBSECURE: &str = "websecure";

#[derive(CustomResource, Serialize, Deserialize, Debug, Clone, JsonSchema, PartialEq)]
#[kube(group = "traefik.io", version = "v1alpha1", kind = "IngressRoute", namespaced)]
#[serde(rename_all = "camelCase")]
pub struct IngressRouteSpec {
    pub entry_points: Vec<String>,
    pub routes: Vec<Route>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<RouteTls>,
}

#[derive(Serialize, Deserialize, Debug, Clone, JsonSchema, PartialEq)]
pub struct Route {
    #[serde(rename = "match")]
    pub match_: String,
    pub kind: String,
    pub services: Vec<RouteService>,
}

#[derive(Serialize, Deserialize, Debug, Clone, JsonSchema, PartialEq)]
pub struct RouteService {
    pub name: String,
    pub port: i32,
}

#[derive(Serialize, Deserialize, Debug, Clone, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RouteTls {
    pub secret_name: String,
}
