//! Conflict detection against the live selector-key index (spec §4.5 step
//! 3, §3 "ConflictRecord").

use crate::policy::index::SelectorIndex;
use crate::policy::rule::Rule;
use crate::policy::store::PolicyStore;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct ConflictRecord {
    pub candidate_rule_id: String,
    pub existing_policy_id: String,
    pub existing_action: String,
}

/// A conflict exists iff both rules index to the same selector key and have
/// mutually inconsistent actions (spec §3 "ConflictRecord" invariant: "at
/// least one != MONITOR/LOG" is the passive-action exemption).
pub fn check_conflicts(rules: &[Rule], index: &SelectorIndex, store: &dyn PolicyStore) -> Vec<ConflictRecord> {
    let mut conflicts = Vec::new();
    for rule in rules {
        for policy_id in index.lookup(rule) {
            let Some(policy) = store.get_active(&policy_id) else {
                continue;
            };
            for existing_rule in &policy.rules {
                if existing_rule.action == rule.action {
                    continue;
                }
                if existing_rule.action.is_passive() || rule.action.is_passive() {
                    continue;
                }
                conflicts.push(ConflictRecord {
                    candidate_rule_id: rule.rule_id.clone(),
                    existing_policy_id: policy_id.clone(),
                    existing_action: existing_rule.action.as_str().to_string(),
                });
            }
        }
    }
    conflicts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::intent::{Action, Direction};
    use crate::policy::policy::{Policy, PolicyStatus};
    use crate::policy::store::InMemoryPolicyStore;

    fn rule(action: Action) -> Rule {
        Rule {
            rule_id: "r1".to_string(),
            source_cidr: "192.168.1.100/32".to_string(),
            dest_ip: "10.0.0.1".to_string(),
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
    fn deny_then_allow_on_same_selector_conflicts() {
        let store = InMemoryPolicyStore::new();
        let index = SelectorIndex::new();
        let p1 = Policy {
            policy_id: "pol_1".to_string(),
            name: "deny-ssh".to_string(),
            version: 1,
            status: PolicyStatus::Active,
            rules: vec![rule(Action::Deny)],
            vendors: vec![],
            created_at_ns: 0,
            updated_at_ns: 0,
            expires_at_ns: None,
        };
        index.index_rules(&p1.policy_id, &p1.rules);
        store.put(p1);

        let conflicts = check_conflicts(&[rule(Action::Allow)], &index, &store);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].existing_policy_id, "pol_1");
    }

    #[test]
    fn monitor_never_conflicts() {
        let store = InMemoryPolicyStore::new();
        let index = SelectorIndex::new();
        let p1 = Policy {
            policy_id: "pol_1".to_string(),
            name: "watch".to_string(),
            version: 1,
            status: PolicyStatus::Active,
            rules: vec![rule(Action::Monitor)],
            vendors: vec![],
            created_at_ns: 0,
            updated_at_ns: 0,
            expires_at_ns: None,
        };
        index.index_rules(&p1.policy_id, &p1.rules);
        store.put(p1);

        let conflicts = check_conflicts(&[rule(Action::Deny)], &index, &store);
        assert!(conflicts.is_empty());
    }
}
