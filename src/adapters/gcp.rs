//! GCP VPC firewall adapter (spec §4.6).
//!
//! Rules are named `sentinel-<rule_id>`; priority mirrors the policy rule's
//! own priority. Real GCP firewall operations are asynchronous and must be
//! polled to completion; `poll_operation` models that with a bounded
//! timeout (default 120s per spec) even though no GCP SDK is wired up here.

use crate::adapters::{managed_tag, AddRuleOutcome, FirewallAdapter};
use crate::error::AdapterError;
use crate::policy::intent::{Action, Direction};
use crate::policy::rule::Rule;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;

const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone)]
pub struct GcpFirewallRule {
    pub name: String,
    pub direction: &'static str, // "INGRESS" | "EGRESS"
    pub priority: u16,
    pub action: &'static str, // "allowed" | "denied"
    pub protocol: String,
    pub port: Option<String>,
    pub source_ranges: Vec<String>,
}

pub struct GcpAdapter {
    operation_timeout: Duration,
    handles: Mutex<HashMap<String, GcpFirewallRule>>,
}

impl GcpAdapter {
    pub fn new() -> Self {
        Self {
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            handles: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_operation_timeout(timeout: Duration) -> Self {
        Self {
            operation_timeout: timeout,
            handles: Mutex::new(HashMap::new()),
        }
    }

    fn action_for(action: Action) -> Result<&'static str, AdapterError> {
        match action {
            Action::Allow | Action::RateLimit => Ok("allowed"),
            Action::Deny | Action::Drop | Action::Reject => Ok("denied"),
            Action::Log | Action::Quarantine | Action::Monitor => {
                Err(AdapterError::Permanent(format!("{action:?} has no GCP firewall mapping")))
            }
        }
    }

    fn translate(&self, rule: &Rule) -> Result<GcpFirewallRule, AdapterError> {
        let action = Self::action_for(rule.action)?;
        Ok(GcpFirewallRule {
            name: format!("sentinel-{}", rule.rule_id),
            direction: match rule.direction {
                Direction::Ingress => "INGRESS",
                Direction::Egress => "EGRESS",
            },
            priority: rule.priority,
            action,
            protocol: rule.protocol.to_lowercase(),
            port: rule.dest_port.map(|p| p.to_string()),
            source_ranges: vec![if rule.source_cidr.is_empty() {
                "0.0.0.0/0".to_string()
            } else {
                rule.source_cidr.clone()
            }],
        })
    }

    /// Short-circuits every call with an informative error while no GCP
    /// SDK is wired up (spec §4.6 "on cloud SDK absence, is_available()
    /// returns false and other calls short-circuit with an informative
    /// error").
    async fn ensure_available(&self) -> Result<(), AdapterError> {
        if self.is_available().await {
            Ok(())
        } else {
            Err(AdapterError::Permanent("gcp adapter unavailable: no GCP SDK configured".to_string()))
        }
    }

    /// Polls a long-running GCP operation to completion, bounded by the
    /// adapter's configured timeout (spec §4.6 "poll to completion, default
    /// 120s"). `poll` is expected to return `Some(())` once the operation
    /// has settled.
    pub async fn poll_operation<F, Fut>(&self, mut poll: F) -> Result<(), AdapterError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Option<Result<(), String>>>,
    {
        let deadline = tokio::time::Instant::now() + self.operation_timeout;
        loop {
            if let Some(result) = poll().await {
                return result.map_err(AdapterError::Permanent);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(AdapterError::AdapterFailed("operation polling timed out".to_string()));
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    }
}

impl Default for GcpAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FirewallAdapter for GcpAdapter {
    fn vendor(&self) -> &'static str {
        "gcp"
    }

    async fn is_available(&self) -> bool {
        false
    }

    async fn add_rule(&self, rule: &Rule) -> Result<AddRuleOutcome, AdapterError> {
        self.ensure_available().await?;
        let fw_rule = self.translate(rule)?;
        let handle = managed_tag(&rule.rule_id);
        self.handles.lock().insert(rule.rule_id.clone(), fw_rule);
        Ok(AddRuleOutcome {
            success: true,
            rule_id: rule.rule_id.clone(),
            vendor_handle: Some(handle),
            warning: None,
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
