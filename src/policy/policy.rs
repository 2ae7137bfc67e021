//! `Policy`: versioned container of `Rule`s (spec §3 "Policy", §4.5 state
//! machine).

use crate::policy::rule::Rule;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyStatus {
    Active,
    Superseded,
    Deleted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub policy_id: String,
    pub name: String,
    pub version: u32,
    pub status: PolicyStatus,
    pub rules: Vec<Rule>,
    pub vendors: Vec<String>,
    pub created_at_ns: i64,
    pub updated_at_ns: i64,
    pub expires_at_ns: Option<i64>,
}

impl Policy {
    pub fn is_active(&self) -> bool {
        self.status == PolicyStatus::Active
    }
}
