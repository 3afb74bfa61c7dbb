use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// cert-manager `Certificate` request; the issued key pair lands in `secret_name`.
#[derive(CustomResource, Serialize, Deserialize, Debug, Clone, JsonSchema, PartialEq)]
#[kube(group = "cert-manager.io", version = "v1", kind = "Certificate", namespaced)]
#[serde(rename_all = "camelCase")]
pub struct CertificateSpec {
    pub secret_name: String,
    pub dns_names: Vec<String>,
    pub issuer_ref: IssuerRef,
}

#[derive(Serialize, Deserialize, Debug, Clone, JsonSchema, PartialEq)]
pub struct IssuerRef {
    pub name: String,
    pub kind: String,
}
