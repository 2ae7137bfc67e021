//! AWS Security Group adapter (spec §4.6).
//!
//! Security groups are allow-list only: `DENY`/`DROP`/`REJECT` have no SG
//! primitive and translate to a local no-op with a warning rather than an
//! error, so a policy spanning several vendors doesn't fail outright on the
//! one vendor that can't express a deny. No AWS SDK is wired up here (none
//! is in the dependency graph); `is_available()` reports that absence
//! honestly rather than pretending to reach the API, matching the spec's
//! "on cloud SDK absence, is_available() returns false".

use crate::adapters::{managed_tag, AddRuleOutcome, FirewallAdapter};
use crate::error::AdapterError;
use crate::policy::intent::{Action, Direction};
use crate::policy::rule::Rule;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct AwsSgRequest {
    pub group_id: String,
    pub direction: &'static str, // "ingress" | "egress"
    pub protocol: String,        // "-1" for ALL
    pub from_port: i32,
    pub to_port: i32,
    pub cidr: String,
    pub description: String,
}

pub struct AwsAdapter {
    group_id: String,
    handles: Mutex<HashMap<String, AwsSgRequest>>,
}

impl AwsAdapter {
    pub fn new(group_id: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            handles: Mutex::new(HashMap::new()),
        }
    }

    fn protocol_for(protocol: &str) -> String {
        if protocol.eq_ignore_ascii_case("ANY") {
            "-1".to_string()
        } else {
            protocol.to_lowercase()
        }
    }

    fn ports_for(rule: &Rule) -> (i32, i32) {
        match rule.protocol.as_str() {
            "ICMP" => (-1, -1),
            _ => match rule.dest_port {
                Some(p) => (p as i32, p as i32),
                None => (0, 65535),
            },
        }
    }

    fn translate(&self, rule: &Rule) -> AwsSgRequest {
        let cidr = if rule.source_cidr.is_empty() {
            "0.0.0.0/0".to_string()
        } else {
            rule.source_cidr.clone()
        };
        let (from_port, to_port) = Self::ports_for(rule);
        let description = match &rule.created_by {
            by if by.is_empty() => managed_tag(&rule.rule_id),
            by => format!("{} - {}", managed_tag(&rule.rule_id), by),
        };
        AwsSgRequest {
            group_id: self.group_id.clone(),
            direction: match rule.direction {
                Direction::Ingress => "ingress",
                Direction::Egress => "egress",
            },
            protocol: Self::protocol_for(&rule.protocol),
            from_port,
            to_port,
            cidr,
            description,
        }
    }

    /// Short-circuits every call with an informative error while no AWS SDK
    /// is wired up (spec §4.6 "on cloud SDK absence, is_available() returns
    /// false and other calls short-circuit with an informative error").
    async fn ensure_available(&self) -> Result<(), AdapterError> {
        if self.is_available().await {
            Ok(())
        } else {
            Err(AdapterError::Permanent("aws adapter unavailable: no AWS SDK configured".to_string()))
        }
    }

    /// Actions with no security-group primitive translate to a local no-op
    /// carrying a warning rather than a hard error (spec §4.6 AWS row).
    fn warning_for(action: Action) -> Option<&'static str> {
        match action {
            Action::Allow | Action::RateLimit => None,
            Action::Deny | Action::Drop | Action::Reject => {
                Some("DENY not expressible on AWS SG; translated to no-op")
            }
            Action::Log | Action::Quarantine | Action::Monitor => {
                Some("action not expressible on AWS SG; translated to no-op")
            }
        }
    }
}

#[async_trait]
impl FirewallAdapter for AwsAdapter {
    fn vendor(&self) -> &'static str {
        "aws"
    }

    async fn is_available(&self) -> bool {
        false
    }

    async fn add_rule(&self, rule: &Rule) -> Result<AddRuleOutcome, AdapterError> {
        self.ensure_available().await?;
        let warning = Self::warning_for(rule.action);
        let request = self.translate(rule);
        if warning.is_none() {
            self.handles.lock().insert(rule.rule_id.clone(), request);
        }
        Ok(AddRuleOutcome {
            success: true,
            rule_id: rule.rule_id.clone(),
            vendor_handle: warning.is_none().then(|| managed_tag(&rule.rule_id)),
            warning: warning.map(str::to_string),
        })
    }

    async fn remove_rule(&self, rule_id: &str) -> Result<(), AdapterError> {
        self.ensure_available().await?;
        if self.handles.lock().remove(rule_id).is_some() {
            Ok(())
        } else {
            Err(AdapterError::Permanent(format!("no local handle for rule {rule_id}")))
        }
    }

    async fn list_rules(&self) -> Result<Vec<String>, AdapterError> {
        self.ensure_available().await?;
        Ok(self.handles.lock().keys().cloned().collect())
    }

    async fn clear_managed(&self) -> (usize, Vec<AdapterError>) {
        let count = self.handles.lock().len();
        self.handles.lock().clear();
        (count, Vec::new())
    }
}
