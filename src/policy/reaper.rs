//! Expiry reaper: periodically removes rules whose `expires_at_ns` has
//! passed (spec §9 Open Questions: "resolved with an explicit 30s expiry
//! reaper task" rather than relying on vendor-side TTLs).

use crate::adapters::FirewallAdapter;
use crate::policy::policy::{Policy, PolicyStatus};
use crate::policy::store::{sweep_version_history, InMemoryPolicyStore, PolicyStore};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub const REAP_INTERVAL: Duration = Duration::from_secs(30);

/// Removes every rule of an expired policy from its vendors and marks it
/// `Deleted` in place. Returns the number of policies reaped.
pub async fn reap_once(
    store: &dyn PolicyStore,
    adapters: &HashMap<String, Arc<dyn FirewallAdapter>>,
    now_ns: i64,
) -> usize {
    let expired = store.list_expired(now_ns);
    for mut policy in expired {
        remove_policy_rules(&policy, adapters).await;
        policy.status = PolicyStatus::Deleted;
        policy.updated_at_ns = now_ns;
        store.put(policy.clone());
        store.save_version(&policy);
        info!(policy_id = %policy.policy_id, "reaped expired policy");
    }
    store.list_expired(now_ns).len()
}

async fn remove_policy_rules(policy: &Policy, adapters: &HashMap<String, Arc<dyn FirewallAdapter>>) {
    for vendor in &policy.vendors {
        let Some(adapter) = adapters.get(vendor) else { continue };
        for rule in &policy.rules {
            if let Err(e) = adapter.remove_rule(&rule.rule_id).await {
                warn!(vendor = %vendor, rule_id = %rule.rule_id, error = %e, "reaper failed to remove rule");
            }
        }
    }
}

/// Runs `reap_once` on a fixed tick until cancelled, sweeping stale version
/// history on the same cadence (spec §4.5 "history kept <= 30 days").
pub async fn run(
    store: Arc<InMemoryPolicyStore>,
    adapters: HashMap<String, Arc<dyn FirewallAdapter>>,
    cancel: CancellationToken,
    now_ns: impl Fn() -> i64,
) {
    let mut ticker = tokio::time::interval(REAP_INTERVAL);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("policy reaper shutting down");
                return;
            }
            _ = ticker.tick() => {
                let now = now_ns();
                reap_once(store.as_ref(), &adapters, now).await;
                sweep_version_history(&store, now);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::AddRuleOutcome;
    use crate::error::AdapterError;
    use crate::policy::intent::{Action, Direction};
    use crate::policy::rule::Rule;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingAdapter {
        removed: AtomicUsize,
    }

    #[async_trait]
    impl FirewallAdapter for CountingAdapter {
        fn vendor(&self) -> &'static str {
            "fake"
        }
        async fn is_available(&self) -> bool {
            true
        }
        async fn add_rule(&self, rule: &Rule) -> Result<AddRuleOutcome, AdapterError> {
            Ok(AddRuleOutcome {
                success: true,
                rule_id: rule.rule_id.clone(),
                vendor_handle: None,
                warning: None,
            })
        }
        async fn remove_rule(&self, _rule_id: &str) -> Result<(), AdapterError> {
            self.removed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn list_rules(&self) -> Result<Vec<String>, AdapterError> {
            Ok(vec![])
        }
        async fn clear_managed(&self) -> (usize, Vec<AdapterError>) {
            (0, vec![])
        }
    }

    fn rule() -> Rule {
        Rule {
            rule_id: "r1".to_string(),
            source_cidr: "10.0.0.0/24".to_string(),
            dest_ip: "0.0.0.0/0".to_string(),
            dest_port: Some(22),
            protocol: "TCP".to_string(),
            action: Action::Deny,
            rate: None,
            direction: Direction::Ingress,
            priority: 100,
            created_at_ns: 0,
            expires_at_ns: Some(100),
            created_by: "system".to_string(),
        }
    }

    #[tokio::test]
    async fn reap_once_removes_expired_policy_from_its_vendors() {
        let store = InMemoryPolicyStore::new();
        let policy = Policy {
            policy_id: "pol_1".to_string(),
            name: "expiring".to_string(),
            version: 1,
            status: PolicyStatus::Active,
            rules: vec![rule()],
            vendors: vec!["fake".to_string()],
            created_at_ns: 0,
            updated_at_ns: 0,
            expires_at_ns: Some(100),
        };
        store.put(policy);

        let mut adapters: HashMap<String, Arc<dyn FirewallAdapter>> = HashMap::new();
        let counting = Arc::new(CountingAdapter { removed: AtomicUsize::new(0) });
        adapters.insert("fake".to_string(), counting.clone());

        reap_once(&store, &adapters, 200).await;

        assert_eq!(counting.removed.load(Ordering::SeqCst), 1);
        assert_eq!(store.get_active("pol_1").unwrap().status, PolicyStatus::Deleted);
    }

    #[tokio::test]
    async fn reap_once_leaves_unexpired_policies_alone() {
        let store = InMemoryPolicyStore::new();
        let mut policy = Policy {
            policy_id: "pol_1".to_string(),
            name: "not-yet".to_string(),
            version: 1,
            status: PolicyStatus::Active,
            rules: vec![rule()],
            vendors: vec!["fake".to_string()],
            created_at_ns: 0,
            updated_at_ns: 0,
            expires_at_ns: Some(1_000),
        };
        policy.rules[0].expires_at_ns = Some(1_000);
        store.put(policy);

        let adapters: HashMap<String, Arc<dyn FirewallAdapter>> = HashMap::new();
        reap_once(&store, &adapters, 200).await;
        assert_eq!(store.get_active("pol_1").unwrap().status, PolicyStatus::Active);
    }
}
