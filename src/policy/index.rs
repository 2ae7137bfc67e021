//! Selector-key -> policy-id index (spec §3 "selector-key index",
//! GLOSSARY). Non-owning: policies own their rules, the index holds only
//! back-references.

use crate::policy::rule::Rule;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};

fn index_key(rule: &Rule) -> String {
    format!(
        "{}:{}:{}:{}",
        rule.source_cidr,
        rule.dest_ip,
        rule.dest_port.map(|p| p.to_string()).unwrap_or_else(|| "*".to_string()),
        rule.protocol,
    )
}

#[derive(Default)]
pub struct SelectorIndex {
    inner: RwLock<HashMap<String, HashSet<String>>>,
}

impl SelectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn index_rules(&self, policy_id: &str, rules: &[Rule]) {
        let mut inner = self.inner.write();
        for rule in rules {
            inner.entry(index_key(rule)).or_default().insert(policy_id.to_string());
        }
    }

    pub fn remove_policy(&self, policy_id: &str) {
        let mut inner = self.inner.write();
        for policies in inner.values_mut() {
            policies.remove(policy_id);
        }
        inner.retain(|_, policies| !policies.is_empty());
    }

    /// Returns the policy ids currently indexed under the same selector key
    /// as `rule` (spec §4.5 step 3).
    pub fn lookup(&self, rule: &Rule) -> Vec<String> {
        let inner = self.inner.read();
        inner
            .get(&index_key(rule))
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }
}
