//! Policy persistence (spec §6 "Persisted state layout"). Abstracted behind
//! a trait so the backing KV is swappable; `InMemoryPolicyStore` is the
//! in-process implementation (spec: "any ordered-map-with-TTL KV suffices").

use crate::policy::policy::Policy;
use parking_lot::RwLock;
use std::collections::HashMap;

pub trait PolicyStore: Send + Sync {
    fn get_active(&self, policy_id: &str) -> Option<Policy>;
    fn get_version(&self, policy_id: &str, version: u32) -> Option<Policy>;
    fn put(&self, policy: Policy);
    fn save_version(&self, policy: &Policy);
    fn remove(&self, policy_id: &str) -> bool;
    fn list(&self) -> Vec<Policy>;
    /// Active, non-deleted policies whose `expires_at_ns` has passed
    /// (spec §9 Open Questions: "an explicit 30 s expiry reaper").
    fn list_expired(&self, now_ns: i64) -> Vec<Policy>;
}

/// `policy:<id>` keyed map plus `policy_version:<id>:<n>` history, matching
/// the key layout of `policy_engine.py::PolicyEngine`. History is retained
/// for 30 days by timestamp rather than evicted eagerly.
pub struct InMemoryPolicyStore {
    policies: RwLock<HashMap<String, Policy>>,
    versions: RwLock<HashMap<(String, u32), Policy>>,
}

const VERSION_RETENTION_NS: i64 = 30 * 24 * 60 * 60 * 1_000_000_000;

impl InMemoryPolicyStore {
    pub fn new() -> Self {
        Self {
            policies: RwLock::new(HashMap::new()),
            versions: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryPolicyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicyStore for InMemoryPolicyStore {
    fn get_active(&self, policy_id: &str) -> Option<Policy> {
        self.policies.read().get(policy_id).cloned()
    }

    fn get_version(&self, policy_id: &str, version: u32) -> Option<Policy> {
        self.versions.read().get(&(policy_id.to_string(), version)).cloned()
    }

    fn put(&self, policy: Policy) {
        self.policies.write().insert(policy.policy_id.clone(), policy);
    }

    fn save_version(&self, policy: &Policy) {
        self.versions
            .write()
            .insert((policy.policy_id.clone(), policy.version), policy.clone());
    }

    fn remove(&self, policy_id: &str) -> bool {
        self.policies.write().remove(policy_id).is_some()
    }

    fn list(&self) -> Vec<Policy> {
        self.policies.read().values().cloned().collect()
    }

    fn list_expired(&self, now_ns: i64) -> Vec<Policy> {
        self.policies
            .read()
            .values()
            .filter(|p| p.is_active())
            .filter(|p| p.expires_at_ns.map(|exp| exp <= now_ns).unwrap_or(false))
            .cloned()
            .collect()
    }
}

/// Sweeps version history older than the 30-day retention window. Called
/// opportunistically by the reaper tick; not required for correctness since
/// stale history only wastes memory (spec §4.5 "prior version ... kept <= 30
/// days").
pub fn sweep_version_history(store: &InMemoryPolicyStore, now_ns: i64) {
    store
        .versions
        .write()
        .retain(|_, policy| now_ns - policy.updated_at_ns < VERSION_RETENTION_NS);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::policy::PolicyStatus;

    fn policy(id: &str, version: u32) -> Policy {
        Policy {
            policy_id: id.to_string(),
            name: "p".to_string(),
            version,
            status: PolicyStatus::Active,
            rules: vec![],
            vendors: vec![],
            created_at_ns: 0,
            updated_at_ns: 0,
            expires_at_ns: None,
        }
    }

    #[test]
    fn put_then_get_active_roundtrips() {
        let store = InMemoryPolicyStore::new();
        store.put(policy("pol_1", 1));
        assert_eq!(store.get_active("pol_1").unwrap().version, 1);
    }

    #[test]
    fn versions_are_independently_retrievable() {
        let store = InMemoryPolicyStore::new();
        store.save_version(&policy("pol_1", 1));
        store.save_version(&policy("pol_1", 2));
        assert_eq!(store.get_version("pol_1", 1).unwrap().version, 1);
        assert_eq!(store.get_version("pol_1", 2).unwrap().version, 2);
    }

    #[test]
    fn list_expired_only_returns_active_past_deadline() {
        let store = InMemoryPolicyStore::new();
        let mut p = policy("pol_1", 1);
        p.expires_at_ns = Some(100);
        store.put(p);
        assert!(store.list_expired(50).is_empty());
        assert_eq!(store.list_expired(200).len(), 1);
    }
}
