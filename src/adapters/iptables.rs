//! iptables adapter (spec §4.6 translation table).
//!
//! Maintains a dedicated `SENTINEL` chain jumped to from `INPUT`/`OUTPUT`,
//! created idempotently on first use. Each managed rule is tagged with a
//! comment so it can be found and removed later; since `iptables -D`
//! requires the exact original arguments, the adapter keeps a local handle
//! cache mapping `rule_id -> append args`.

use crate::adapters::{managed_tag, retry_transient, AddRuleOutcome, FirewallAdapter};
use crate::error::AdapterError;
use crate::policy::intent::Action;
use crate::policy::rule::Rule;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::process::Stdio;
use tokio::process::Command;

const CHAIN: &str = "SENTINEL";

pub struct IptablesAdapter {
    handles: Mutex<HashMap<String, Vec<String>>>,
    chain_initialized: Mutex<bool>,
}

impl IptablesAdapter {
    pub fn new() -> Self {
        Self {
            handles: Mutex::new(HashMap::new()),
            chain_initialized: Mutex::new(false),
        }
    }

    async fn run(&self, args: &[String]) -> Result<(), AdapterError> {
        let output = Command::new("iptables")
            .args(args)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| AdapterError::Transient(e.to_string()))?;
        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            if stderr.contains("Resource temporarily unavailable") {
                Err(AdapterError::Transient(stderr))
            } else {
                Err(AdapterError::Permanent(stderr))
            }
        }
    }

    async fn ensure_chain(&self) -> Result<(), AdapterError> {
        if *self.chain_initialized.lock() {
            return Ok(());
        }
        let _ = self.run(&[s("-N"), CHAIN.to_string()]).await; // already exists: ignore
        for parent in ["INPUT", "OUTPUT"] {
            let exists = self.run(&[s("-C"), parent.to_string(), s("-j"), CHAIN.to_string()]).await.is_ok();
            if !exists {
                let _ = self.run(&[s("-A"), parent.to_string(), s("-j"), CHAIN.to_string()]).await;
            }
        }
        *self.chain_initialized.lock() = true;
        Ok(())
    }

    fn build_args(rule: &Rule) -> Result<Vec<String>, AdapterError> {
        let target = match rule.action {
            Action::Allow => "ACCEPT",
            Action::Deny | Action::Drop => "DROP",
            Action::Reject => "REJECT",
            Action::Log => "LOG",
            Action::RateLimit => "ACCEPT",
            Action::Quarantine | Action::Monitor => {
                return Err(AdapterError::Permanent(format!("{:?} has no iptables mapping", rule.action)))
            }
        };

        let mut args = vec![s("-A"), CHAIN.to_string(), s("-s"), rule.source_cidr.clone()];
        if rule.dest_ip != "0.0.0.0/0" {
            args.push(s("-d"));
            args.push(rule.dest_ip.clone());
        }
        if rule.protocol != "ANY" {
            args.push(s("-p"));
            args.push(rule.protocol.to_lowercase());
        }
        if let Some(port) = rule.dest_port {
            args.push(s("--dport"));
            args.push(port.to_string());
        }
        args.push(s("-j"));
        args.push(target.to_string());
        if let (Action::RateLimit, Some(rate)) = (rule.action, &rule.rate) {
            args.push(s("-m"));
            args.push(s("limit"));
            args.push(s("--limit"));
            args.push(format!("{}/sec", rate.packets_per_second));
            args.push(s("--limit-burst"));
            args.push(rate.burst.to_string());
        }
        args.push(s("-m"));
        args.push(s("comment"));
        args.push(s("--comment"));
        args.push(managed_tag(&rule.rule_id));
        let _ = rule.direction; // iptables chain already encodes ingress/egress via INPUT/OUTPUT
        Ok(args)
    }
}

fn s(v: &str) -> String {
    v.to_string()
}

impl Default for IptablesAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FirewallAdapter for IptablesAdapter {
    fn vendor(&self) -> &'static str {
        "iptables"
    }

    async fn is_available(&self) -> bool {
        Command::new("iptables").arg("-V").output().await.map(|o| o.status.success()).unwrap_or(false)
    }

    async fn add_rule(&self, rule: &Rule) -> Result<AddRuleOutcome, AdapterError> {
        self.ensure_chain().await?;
        let args = Self::build_args(rule)?;
        retry_transient(|| self.run(&args)).await?;
        self.handles.lock().insert(rule.rule_id.clone(), args.clone());
        Ok(AddRuleOutcome {
            success: true,
            rule_id: rule.rule_id.clone(),
            vendor_handle: Some(managed_tag(&rule.rule_id)),
            warning: None,
        })
    }

    async fn remove_rule(&self, rule_id: &str) -> Result<(), AdapterError> {
        let args = {
            let handles = self.handles.lock();
            handles.get(rule_id).cloned()
        };
        let Some(mut append_args) = args else {
            return Err(AdapterError::Permanent(format!("no local handle for rule {rule_id}")));
        };
        append_args[0] = s("-D");
        retry_transient(|| self.run(&append_args)).await?;
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
    use crate::policy::intent::Direction;

    fn rule(action: Action) -> Rule {
        Rule {
            rule_id: "abc123".to_string(),
            source_cidr: "192.168.1.100/32".to_string(),
            dest_ip: "0.0.0.0/0".to_string(),
            dest_port: Some(22),
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
    fn deny_maps_to_drop_target() {
        let args = IptablesAdapter::build_args(&rule(Action::Deny)).unwrap();
        assert!(args.windows(2).any(|w| w == ["-j", "DROP"]));
    }

    #[test]
    fn comment_tag_is_attached() {
        let args = IptablesAdapter::build_args(&rule(Action::Allow)).unwrap();
        assert!(args.contains(&"SENTINEL:abc123".to_string()));
    }

    #[test]
    fn monitor_has_no_mapping() {
        assert!(IptablesAdapter::build_args(&rule(Action::Monitor)).is_err());
    }
}
