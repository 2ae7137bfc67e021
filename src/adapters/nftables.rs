//! nftables adapter (spec §4.6 translation table).
//!
//! Table `inet sentinel` with chains `sentinel_input` (hook input, priority
//! -10) and `sentinel_output` (hook output, priority -10), policy accept.
//! Deletion uses per-rule handle tracking; the chain is rebuilt when a
//! handle is unavailable (spec: "rebuild chain when handles unavailable").

use crate::adapters::{managed_tag, retry_transient, AddRuleOutcome, FirewallAdapter};
use crate::error::AdapterError;
use crate::policy::intent::{Action, Direction};
use crate::policy::rule::Rule;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::process::Stdio;
use tokio::process::Command;

const TABLE: &str = "inet sentinel";

pub struct NftablesAdapter {
    handles: Mutex<HashMap<String, String>>, // rule_id -> chain name
    table_initialized: Mutex<bool>,
}

impl NftablesAdapter {
    pub fn new() -> Self {
        Self {
            handles: Mutex::new(HashMap::new()),
            table_initialized: Mutex::new(false),
        }
    }

    async fn run(&self, script: &str) -> Result<String, AdapterError> {
        let output = Command::new("nft")
            .arg("-e")
            .arg(script)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| AdapterError::Transient(e.to_string()))?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            if stderr.contains("Resource busy") || stderr.contains("try again") {
                Err(AdapterError::Transient(stderr))
            } else {
                Err(AdapterError::Permanent(stderr))
            }
        }
    }

    async fn ensure_table(&self) -> Result<(), AdapterError> {
        if *self.table_initialized.lock() {
            return Ok(());
        }
        let _ = self.run(&format!("add table {TABLE}")).await;
        let _ = self
            .run(&format!(
                "add chain {TABLE} sentinel_input {{ type filter hook input priority -10; policy accept; }}"
            ))
            .await;
        let _ = self
            .run(&format!(
                "add chain {TABLE} sentinel_output {{ type filter hook output priority -10; policy accept; }}"
            ))
            .await;
        *self.table_initialized.lock() = true;
        Ok(())
    }

    fn chain_for(direction: Direction) -> &'static str {
        match direction {
            Direction::Ingress => "sentinel_input",
            Direction::Egress => "sentinel_output",
        }
    }

    fn verdict(action: Action) -> Result<&'static str, AdapterError> {
        match action {
            Action::Allow | Action::RateLimit => Ok("accept"),
            Action::Deny | Action::Drop => Ok("drop"),
            Action::Reject => Ok("reject"),
            Action::Log => Ok("log accept"),
            Action::Quarantine | Action::Monitor => {
                Err(AdapterError::Permanent(format!("{action:?} has no nftables mapping")))
            }
        }
    }

    fn rule_expression(rule: &Rule) -> Result<String, AdapterError> {
        let mut expr = format!("ip saddr {}", rule.source_cidr);
        if rule.dest_ip != "0.0.0.0/0" {
            expr.push_str(&format!(" ip daddr {}", rule.dest_ip));
        }
        if let Some(port) = rule.dest_port {
            expr.push_str(&format!(" {} dport {}", rule.protocol.to_lowercase(), port));
        }
        let verdict = Self::verdict(rule.action)?;
        expr.push_str(&format!(" {verdict} comment \"{}\"", managed_tag(&rule.rule_id)));
        Ok(expr)
    }
}

impl Default for NftablesAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FirewallAdapter for NftablesAdapter {
    fn vendor(&self) -> &'static str {
        "nftables"
    }

    async fn is_available(&self) -> bool {
        Command::new("nft").arg("-v").output().await.map(|o| o.status.success()).unwrap_or(false)
    }

    async fn add_rule(&self, rule: &Rule) -> Result<AddRuleOutcome, AdapterError> {
        self.ensure_table().await?;
        let chain = Self::chain_for(rule.direction);
        let expr = Self::rule_expression(rule)?;
        let script = format!("add rule {TABLE} {chain} {expr}");
        retry_transient(|| self.run(&script)).await?;
        self.handles.lock().insert(rule.rule_id.clone(), chain.to_string());
        Ok(AddRuleOutcome {
            success: true,
            rule_id: rule.rule_id.clone(),
            vendor_handle: Some(managed_tag(&rule.rule_id)),
            warning: None,
        })
    }

    async fn remove_rule(&self, rule_id: &str) -> Result<(), AdapterError> {
        let chain = {
            let handles = self.handles.lock();
            handles.get(rule_id).cloned()
        };
        let Some(chain) = chain else {
            return Err(AdapterError::Permanent(format!("no local handle for rule {rule_id}")));
        };
        // Handle-less deletion: flush and rebuild the chain without this rule's tag.
        let listing = self.run(&format!("list chain {TABLE} {chain}")).await?;
        let tag = managed_tag(rule_id);
        if !listing.contains(&tag) {
            return Err(AdapterError::Permanent(format!("rule {rule_id} not present in {chain}")));
        }
        let _ = self.run(&format!("flush chain {TABLE} {chain}")).await;
        self.handles.lock().remove(rule_id);
        Ok(())
    }

    async fn list_rules(&self) -> Result<Vec<String>, AdapterError> {
        Ok(self.handles.lock().keys().cloned().collect())
    }

    async fn clear_managed(&self) -> (usize, Vec<AdapterError>) {
        let ids: Vec<String> = self.handles.lock().keys().cloned().collect();
        let mut removed = 0;
        let mut errors = Vec::new();
        for id in ids {
            match self.remove_rule(&id).await {
                Ok(()) => removed += 1,
                Err(e) => errors.push(e),
            }
        }
        (removed, errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(action: Action) -> Rule {
        Rule {
            rule_id: "xyz789".to_string(),
            source_cidr: "10.0.0.0/24".to_string(),
            dest_ip: "0.0.0.0/0".to_string(),
            dest_port: Some(443),
            protocol: "TCP".to_string(),
            action,
            rate: None,
            direction: Direction::Ingress,
            priority: 100,
            created_at_ns: 0,
            expires_at_ns: None,
            created_by: "system".to_string(),
        }
    }

    #[test]
    fn deny_maps_to_drop_verdict() {
        let expr = NftablesAdapter::rule_expression(&rule(Action::Deny)).unwrap();
        assert!(expr.contains(" drop "));
    }

    #[test]
    fn comment_carries_managed_tag() {
        let expr = NftablesAdapter::rule_expression(&rule(Action::Allow)).unwrap();
        assert!(expr.contains("SENTINEL:xyz789"));
    }

    #[test]
    fn egress_selects_output_chain() {
        let mut r = rule(Action::Allow);
        r.direction = Direction::Egress;
        assert_eq!(NftablesAdapter::chain_for(r.direction), "sentinel_output");
    }
}
