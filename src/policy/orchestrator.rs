//! `PolicyOrchestrator`: ties rule generation, validation, conflict
//! detection, merging and per-vendor apply into the policy state machine
//! (spec §4.5).

use crate::adapters::FirewallAdapter;
use serde::Serialize;
use crate::error::PolicyError;
use crate::policy::conflict::{check_conflicts, ConflictRecord};
use crate::policy::index::SelectorIndex;
use crate::policy::intent::PolicyIntent;
use crate::policy::merge::merge_rules;
use crate::policy::policy::{Policy, PolicyStatus};
use crate::policy::rule::{generate_rules, Rule};
use crate::policy::store::PolicyStore;
use crate::policy::validate::{validate, ValidationResult};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Result of applying a policy's rules to its vendors: the orchestrator's
/// own state is authoritative even when a vendor call fails, so failures
/// are reported rather than unwound (spec §4.6: adapters never read back
/// vendor state for correctness).
#[derive(Debug, Clone, Serialize)]
pub struct ApplyOutcome {
    pub policy: Policy,
    pub adapter_warnings: Vec<String>,
}

pub struct PolicyOrchestrator {
    store: Arc<dyn PolicyStore>,
    index: SelectorIndex,
    adapters: HashMap<String, Arc<dyn FirewallAdapter>>,
}

impl PolicyOrchestrator {
    pub fn new(store: Arc<dyn PolicyStore>, adapters: HashMap<String, Arc<dyn FirewallAdapter>>) -> Self {
        Self {
            store,
            index: SelectorIndex::new(),
            adapters,
        }
    }

    /// Step 2 in isolation, exposed for a dry-run UI/API call (spec §6).
    pub fn validate_intent(&self, intent: &PolicyIntent, created_at_ns: i64) -> ValidationResult {
        let rules = generate_rules(intent, created_at_ns, "dry-run");
        validate(&rules)
    }

    /// Step 3 in isolation, exposed for a dry-run UI/API call (spec §6).
    pub fn check_conflicts_for(&self, intent: &PolicyIntent, created_at_ns: i64) -> Vec<ConflictRecord> {
        let rules = generate_rules(intent, created_at_ns, "dry-run");
        check_conflicts(&rules, &self.index, self.store.as_ref())
    }

    pub fn get_policy(&self, policy_id: &str) -> Option<Policy> {
        self.store.get_active(policy_id).filter(|p| p.is_active())
    }

    pub fn list_policies(&self) -> Vec<Policy> {
        self.store.list().into_iter().filter(|p| p.is_active()).collect()
    }

    /// Rule generation -> validation -> conflict detection -> merge -> apply
    /// -> persist (spec §4.5 steps 1-5). `force` bypasses step 3's conflict
    /// rejection (spec §4.5 step 3, §6, testable property 6, scenario S4):
    /// validation still runs unconditionally, but a caller who knows the
    /// conflict is intentional (e.g. deliberately overlapping a quarantine
    /// with a narrower allow) can push the policy through anyway.
    pub async fn create_policy(
        &self,
        intent: PolicyIntent,
        created_at_ns: i64,
        created_by: &str,
        force: bool,
    ) -> Result<ApplyOutcome, PolicyError> {
        let rules = generate_rules(&intent, created_at_ns, created_by);

        let validation = validate(&rules);
        if !validation.valid {
            return Err(PolicyError::ValidationFailure(
                validation.issues.into_iter().map(|i| i.message).collect(),
            ));
        }

        let conflicts = check_conflicts(&rules, &self.index, self.store.as_ref());
        let mut adapter_warnings = Vec::new();
        if !conflicts.is_empty() {
            if !force {
                return Err(PolicyError::ConflictDetected(conflicts.len()));
            }
            warn!(policy_id = %intent.id, count = conflicts.len(), "force=true: overriding detected conflicts");
            adapter_warnings.push(format!("{} conflicting rule(s) overridden by force", conflicts.len()));
        }

        let merged = merge_rules(rules);
        let vendors = self.target_vendors(&intent);
        let (applied_vendors, apply_warnings) = self.apply_to_vendors(&merged, &vendors).await;
        adapter_warnings.extend(apply_warnings);

        let expires_at_ns = merged.iter().filter_map(|r| r.expires_at_ns).min();
        let policy = Policy {
            policy_id: intent.id.clone(),
            name: intent.name.clone(),
            version: 1,
            status: PolicyStatus::Active,
            rules: merged,
            vendors: applied_vendors,
            created_at_ns,
            updated_at_ns: created_at_ns,
            expires_at_ns,
        };

        self.index.index_rules(&policy.policy_id, &policy.rules);
        self.store.put(policy.clone());
        self.store.save_version(&policy);

        Ok(ApplyOutcome { policy, adapter_warnings })
    }

    /// Supersedes the active version with a freshly generated rule set
    /// (spec §4.5 "Policy.update"). The prior version stays retrievable via
    /// `get_version` until the 30-day retention window sweeps it.
    pub async fn update_policy(
        &self,
        intent: PolicyIntent,
        updated_at_ns: i64,
        updated_by: &str,
        force: bool,
    ) -> Result<ApplyOutcome, PolicyError> {
        let current = self.get_policy(&intent.id).ok_or_else(|| PolicyError::NotFound(intent.id.clone()))?;

        self.remove_from_vendors(&current).await;
        self.index.remove_policy(&current.policy_id);

        let rules = generate_rules(&intent, updated_at_ns, updated_by);
        let validation = validate(&rules);
        if !validation.valid {
            return Err(PolicyError::ValidationFailure(
                validation.issues.into_iter().map(|i| i.message).collect(),
            ));
        }

        let conflicts = check_conflicts(&rules, &self.index, self.store.as_ref());
        let mut adapter_warnings = Vec::new();
        if !conflicts.is_empty() {
            if !force {
                return Err(PolicyError::ConflictDetected(conflicts.len()));
            }
            warn!(policy_id = %intent.id, count = conflicts.len(), "force=true: overriding detected conflicts");
            adapter_warnings.push(format!("{} conflicting rule(s) overridden by force", conflicts.len()));
        }

        let merged = merge_rules(rules);
        let vendors = self.target_vendors(&intent);
        let (applied_vendors, apply_warnings) = self.apply_to_vendors(&merged, &vendors).await;
        adapter_warnings.extend(apply_warnings);

        let expires_at_ns = merged.iter().filter_map(|r| r.expires_at_ns).min();
        let policy = Policy {
            policy_id: current.policy_id.clone(),
            name: intent.name.clone(),
            version: current.version + 1,
            status: PolicyStatus::Active,
            rules: merged,
            vendors: applied_vendors,
            created_at_ns: current.created_at_ns,
            updated_at_ns,
            expires_at_ns,
        };

        self.index.index_rules(&policy.policy_id, &policy.rules);
        self.store.put(policy.clone());
        self.store.save_version(&policy);

        Ok(ApplyOutcome { policy, adapter_warnings })
    }

    /// Removes every rule from its vendors, marks the policy deleted and
    /// drops its selector-index entries. Kept as `Deleted` rather than
    /// physically removed so the version history stays consistent.
    pub async fn delete_policy(&self, policy_id: &str, deleted_at_ns: i64) -> Result<(), PolicyError> {
        let mut policy = self.get_policy(policy_id).ok_or_else(|| PolicyError::NotFound(policy_id.to_string()))?;

        self.remove_from_vendors(&policy).await;
        self.index.remove_policy(policy_id);

        policy.status = PolicyStatus::Deleted;
        policy.updated_at_ns = deleted_at_ns;
        self.store.put(policy.clone());
        self.store.save_version(&policy);
        Ok(())
    }

    /// Re-applies the immediately preceding version (spec §4.5 "Policy
    /// rollback"). Fails with `NoHistory` if there is nothing to roll back
    /// to (version 1 or an absent prior snapshot).
    pub async fn rollback_policy(&self, policy_id: &str, rolled_back_at_ns: i64) -> Result<ApplyOutcome, PolicyError> {
        let current = self.get_policy(policy_id).ok_or_else(|| PolicyError::NotFound(policy_id.to_string()))?;
        if current.version <= 1 {
            return Err(PolicyError::NoHistory(policy_id.to_string()));
        }
        let prior = self
            .store
            .get_version(policy_id, current.version - 1)
            .ok_or_else(|| PolicyError::NoHistory(policy_id.to_string()))?;

        self.remove_from_vendors(&current).await;
        self.index.remove_policy(policy_id);

        let (applied_vendors, adapter_warnings) = self.apply_to_vendors(&prior.rules, &prior.vendors).await;

        let restored = Policy {
            policy_id: current.policy_id,
            name: prior.name,
            version: current.version + 1,
            status: PolicyStatus::Active,
            rules: prior.rules,
            vendors: applied_vendors,
            created_at_ns: current.created_at_ns,
            updated_at_ns: rolled_back_at_ns,
            expires_at_ns: prior.expires_at_ns,
        };

        self.index.index_rules(&restored.policy_id, &restored.rules);
        self.store.put(restored.clone());
        self.store.save_version(&restored);

        Ok(ApplyOutcome {
            policy: restored,
            adapter_warnings,
        })
    }

    fn target_vendors(&self, intent: &PolicyIntent) -> Vec<String> {
        if intent.vendors.is_empty() {
            self.adapters.keys().cloned().collect()
        } else {
            intent.vendors.clone()
        }
    }

    async fn apply_to_vendors(&self, rules: &[Rule], vendors: &[String]) -> (Vec<String>, Vec<String>) {
        let mut applied = Vec::new();
        let mut warnings = Vec::new();
        for vendor in vendors {
            let Some(adapter) = self.adapters.get(vendor) else {
                warnings.push(format!("no adapter registered for vendor {vendor}"));
                continue;
            };
            let mut vendor_ok = true;
            for rule in rules {
                match adapter.add_rule(rule).await {
                    Ok(outcome) => {
                        if let Some(warning) = outcome.warning {
                            warnings.push(format!("{vendor}/{}: {warning}", rule.rule_id));
                        }
                    }
                    Err(e) => {
                        warn!(vendor = %vendor, rule_id = %rule.rule_id, error = %e, "adapter add_rule failed");
                        warnings.push(format!("{vendor}/{}: {e}", rule.rule_id));
                        vendor_ok = false;
                    }
                }
            }
            if vendor_ok {
                applied.push(vendor.clone());
            }
        }
        (applied, warnings)
    }

    async fn remove_from_vendors(&self, policy: &Policy) {
        for vendor in &policy.vendors {
            let Some(adapter) = self.adapters.get(vendor) else { continue };
            for rule in &policy.rules {
                if let Err(e) = adapter.remove_rule(&rule.rule_id).await {
                    warn!(vendor = %vendor, rule_id = %rule.rule_id, error = %e, "adapter remove_rule failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::intent::{Action, Protocol, Selector};
    use crate::policy::store::InMemoryPolicyStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeAdapter {
        adds: AtomicUsize,
    }

    #[async_trait]
    impl FirewallAdapter for FakeAdapter {
        fn vendor(&self) -> &'static str {
            "fake"
        }
        async fn is_available(&self) -> bool {
            true
        }
        async fn add_rule(&self, rule: &Rule) -> Result<crate::adapters::AddRuleOutcome, crate::error::AdapterError> {
            self.adds.fetch_add(1, Ordering::SeqCst);
            Ok(crate::adapters::AddRuleOutcome {
                success: true,
                rule_id: rule.rule_id.clone(),
                vendor_handle: None,
                warning: None,
            })
        }
        async fn remove_rule(&self, _rule_id: &str) -> Result<(), crate::error::AdapterError> {
            Ok(())
        }
        async fn list_rules(&self) -> Result<Vec<String>, crate::error::AdapterError> {
            Ok(vec![])
        }
        async fn clear_managed(&self) -> (usize, Vec<crate::error::AdapterError>) {
            (0, vec![])
        }
    }

    fn intent(id: &str, action: Action) -> PolicyIntent {
        PolicyIntent {
            id: id.to_string(),
            name: "test".to_string(),
            action,
            protocol: Protocol::Tcp,
            destination: Selector {
                port: Some(22),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn orchestrator() -> PolicyOrchestrator {
        let mut adapters: HashMap<String, Arc<dyn FirewallAdapter>> = HashMap::new();
        adapters.insert("fake".to_string(), Arc::new(FakeAdapter { adds: AtomicUsize::new(0) }));
        PolicyOrchestrator::new(Arc::new(InMemoryPolicyStore::new()), adapters)
    }

    #[tokio::test]
    async fn create_then_get_roundtrips() {
        let orch = orchestrator();
        let outcome = orch.create_policy(intent("pol_1", Action::Deny), 0, "system", false).await.unwrap();
        assert_eq!(outcome.policy.version, 1);
        assert_eq!(orch.get_policy("pol_1").unwrap().policy_id, "pol_1");
    }

    #[tokio::test]
    async fn conflicting_second_policy_is_rejected() {
        let orch = orchestrator();
        orch.create_policy(intent("pol_1", Action::Deny), 0, "system", false).await.unwrap();
        let result = orch.create_policy(intent("pol_2", Action::Allow), 1, "system", false).await;
        assert!(matches!(result, Err(PolicyError::ConflictDetected(_))));
    }

    #[tokio::test]
    async fn force_true_overrides_conflict_rejection() {
        let orch = orchestrator();
        orch.create_policy(intent("pol_1", Action::Deny), 0, "system", false).await.unwrap();
        let outcome = orch
            .create_policy(intent("pol_2", Action::Allow), 1, "system", true)
            .await
            .unwrap();
        assert!(outcome.adapter_warnings.iter().any(|w| w.contains("overridden by force")));
        assert_eq!(orch.get_policy("pol_2").unwrap().policy_id, "pol_2");
    }

    #[tokio::test]
    async fn update_bumps_version_and_survives_as_history() {
        let orch = orchestrator();
        orch.create_policy(intent("pol_1", Action::Deny), 0, "system", false).await.unwrap();
        let updated = orch.update_policy(intent("pol_1", Action::Deny), 10, "system", false).await.unwrap();
        assert_eq!(updated.policy.version, 2);
    }

    #[tokio::test]
    async fn rollback_without_prior_version_fails() {
        let orch = orchestrator();
        orch.create_policy(intent("pol_1", Action::Deny), 0, "system", false).await.unwrap();
        let result = orch.rollback_policy("pol_1", 10).await;
        assert!(matches!(result, Err(PolicyError::NoHistory(_))));
    }

    #[tokio::test]
    async fn rollback_after_update_restores_prior_rules() {
        let orch = orchestrator();
        let created = orch.create_policy(intent("pol_1", Action::Deny), 0, "system", false).await.unwrap();
        orch.update_policy(intent("pol_1", Action::Deny), 10, "system", false).await.unwrap();
        let rolled_back = orch.rollback_policy("pol_1", 20).await.unwrap();
        assert_eq!(rolled_back.policy.version, 3);
        assert_eq!(rolled_back.policy.rules, created.policy.rules);
    }

    #[tokio::test]
    async fn delete_marks_policy_deleted_and_clears_index() {
        let orch = orchestrator();
        orch.create_policy(intent("pol_1", Action::Deny), 0, "system", false).await.unwrap();
        orch.delete_policy("pol_1", 10).await.unwrap();
        assert!(orch.get_policy("pol_1").is_none());
        assert!(orch.check_conflicts_for(&intent("pol_2", Action::Allow), 20).is_empty());
    }
}
