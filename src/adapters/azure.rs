//! Azure Network Security Group adapter (spec §4.6).
//!
//! Rules are named `sentinel-<rule_id>` and assigned a priority starting at
//! 1000, incrementing per adapter instance so successive rules don't
//! collide (NSG priorities must be unique within a direction). No Azure SDK
//! is wired up; `is_available()` reports that honestly.

use crate::adapters::{managed_tag, AddRuleOutcome, FirewallAdapter};
use crate::error::AdapterError;
use crate::policy::intent::{Action, Direction};
use crate::policy::rule::Rule;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

const STARTING_PRIORITY: u32 = 1000;

#[derive(Debug, Clone)]
pub struct AzureNsgRule {
    pub name: String,
    pub priority: u32,
    pub direction: &'static str, // "Inbound" | "Outbound"
    pub access: &'static str,    // "Allow" | "Deny"
    pub protocol: String,        // "*" for ALL
    pub source_cidr: String,
    pub dest_port: String, // "*" when unspecified
}

pub struct AzureAdapter {
    next_priority: AtomicU32,
    handles: Mutex<HashMap<String, AzureNsgRule>>,
}

impl AzureAdapter {
    pub fn new() -> Self {
        Self {
            next_priority: AtomicU32::new(STARTING_PRIORITY),
            handles: Mutex::new(HashMap::new()),
        }
    }

    fn access_for(action: Action) -> Result<&'static str, AdapterError> {
        match action {
            Action::Allow | Action::RateLimit => Ok("Allow"),
            Action::Deny | Action::Drop | Action::Reject => Ok("Deny"),
            Action::Log | Action::Quarantine | Action::Monitor => {
                Err(AdapterError::Permanent(format!("{action:?} has no Azure NSG mapping")))
            }
        }
    }

    /// Short-circuits every call with an informative error while no Azure
    /// SDK is wired up (spec §4.6 "on cloud SDK absence, is_available()
    /// returns false and other calls short-circuit with an informative
    /// error").
    async fn ensure_available(&self) -> Result<(), AdapterError> {
        if self.is_available().await {
            Ok(())
        } else {
            Err(AdapterError::Permanent("azure adapter unavailable: no Azure SDK configured".to_string()))
        }
    }

    fn translate(&self, rule: &Rule) -> Result<AzureNsgRule, AdapterError> {
        let access = Self::access_for(rule.action)?;
        let priority = self.next_priority.fetch_add(1, Ordering::SeqCst);
        Ok(AzureNsgRule {
            name: format!("sentinel-{}", rule.rule_id),
            priority,
            direction: match rule.direction {
                Direction::Ingress => "Inbound",
                Direction::Egress => "Outbound",
            },
            access,
            protocol: if rule.protocol.eq_ignore_ascii_case("ANY") {
                "*".to_string()
            } else {
                rule.protocol.clone()
            },
            source_cidr: if rule.source_cidr.is_empty() {
                "*".to_string()
            } else {
                rule.source_cidr.clone()
            },
            dest_port: rule.dest_port.map(|p| p.to_string()).unwrap_or_else(|| "*".to_string()),
        })
    }
}

impl Default for AzureAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FirewallAdapter for AzureAdapter {
    fn vendor(&self) -> &'static str {
        "azure"
    }

    async fn is_available(&self) -> bool {
        false
    }

    async fn add_rule(&self, rule: &Rule) -> Result<AddRuleOutcome, AdapterError> {
        self.ensure_available().await?;
        let nsg_rule = self.translate(rule)?;
        let handle = managed_tag(&rule.rule_id);
        self.handles.lock().insert(rule.rule_id.clone(), nsg_rule);
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
