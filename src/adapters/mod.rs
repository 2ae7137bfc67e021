//! Firewall adapters: one per vendor, behind a common interface (spec
//! §4.6).

pub mod aws;
pub mod azure;
pub mod gcp;
pub mod iptables;
pub mod nftables;

use crate::error::AdapterError;
use crate::policy::rule::Rule;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone, Serialize)]
pub struct AddRuleOutcome {
    pub success: bool,
    pub rule_id: String,
    pub vendor_handle: Option<String>,
    pub warning: Option<String>,
}

/// Common firewall control interface (spec §4.6). Implementations keep a
/// local handle cache and never read vendor-side state for correctness
/// (spec: "adapters ... treat the orchestrator as authoritative").
#[async_trait]
pub trait FirewallAdapter: Send + Sync {
    fn vendor(&self) -> &'static str;
    async fn is_available(&self) -> bool;
    async fn add_rule(&self, rule: &Rule) -> Result<AddRuleOutcome, AdapterError>;
    async fn remove_rule(&self, rule_id: &str) -> Result<(), AdapterError>;
    async fn list_rules(&self) -> Result<Vec<String>, AdapterError>;
    async fn clear_managed(&self) -> (usize, Vec<AdapterError>);
}

const MAX_RETRIES: u32 = 3;
const BASE_BACKOFF: Duration = Duration::from_millis(100);
const MAX_BACKOFF: Duration = Duration::from_secs(2);

/// Retries a transient-classified adapter call with exponential backoff
/// (spec §4.6 "retry <= 3 times with exponential backoff (100ms * 2^n, max
/// 2s)"), escalating to `AdapterFailed` once the budget is exhausted.
pub async fn retry_transient<F, Fut, T>(mut op: F) -> Result<T, AdapterError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, AdapterError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(AdapterError::Transient(msg)) => {
                if attempt >= MAX_RETRIES {
                    return Err(AdapterError::AdapterFailed(msg));
                }
                let backoff = (BASE_BACKOFF * 2u32.pow(attempt)).min(MAX_BACKOFF);
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(other) => return Err(other),
        }
    }
}

/// Tags every SENTINEL-managed rule so it can be found and removed later
/// (spec §4.6: `-m comment --comment "SENTINEL:<rule_id>"` and equivalents).
pub fn managed_tag(rule_id: &str) -> String {
    format!("SENTINEL:{rule_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retry_transient_gives_up_after_budget_and_wraps_error() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), AdapterError> = retry_transient(|| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(AdapterError::Transient("timeout".to_string())) }
        })
        .await;
        assert!(matches!(result, Err(AdapterError::AdapterFailed(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), MAX_RETRIES + 1);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), AdapterError> = retry_transient(|| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(AdapterError::Permanent("bad arg".to_string())) }
        })
        .await;
        assert!(matches!(result, Err(AdapterError::Permanent(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
