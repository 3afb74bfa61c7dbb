//! Typed views of the third-party kinds the operator writes: only the fields it sets
//! or reads are modelled.
pub mod certmanager;
pub mod cnpg;
pub mod kpack;
pub mod traefik;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition shape shared by kpack and CloudNativePG status blocks. `status` stays a
/// string because both emit `Unknown` as well as `True`/`False`.
#[derive(Serialize, Deserialize, Debug, Clone, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusCondition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

pub fn find_condition<'a>(conditions: &'a [StatusCondition], type_: &str) -> Option<&'a StatusCondition> {
    conditions.iter().find(|c| c.type_ == type_)
}
