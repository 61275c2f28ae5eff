use serde::{Deserialize, Serialize};

use gpkeeper_core::acl::{AggregatedRule, PermissionRule};

#[derive(Debug, Deserialize)]
pub struct DecodeRuleQuery {
    pub rule: String,
}

#[derive(Debug, Deserialize)]
pub struct DecodeRulesRequest {
    pub rules: Vec<String>,
    #[serde(default)]
    pub aggregate: bool,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum DecodeRulesResponse {
    Rules(Vec<PermissionRule>),
    Aggregated(Vec<AggregatedRule>),
}

#[derive(Debug, Default, Deserialize)]
pub struct MemberQuery {
    #[serde(default)]
    pub with_admin_option: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct AppliedResponse {
    pub status: &'static str,
}

impl AppliedResponse {
    pub fn applied() -> Self {
        Self { status: "applied" }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
