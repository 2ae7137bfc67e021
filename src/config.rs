//! Runtime configuration (spec §6 "Configuration (enumerated)").
//!
//! Loaded from an optional TOML file, then overridden by environment
//! variables, mirroring the teacher's `route_quality::config` layering.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub http_bind: String,
    pub netflow_port: u16,
    pub sflow_port: u16,
    pub pcap_interfaces: Vec<String>,
    pub api_auth_token: Option<String>,

    pub shard_count: usize,
    pub windows: WindowConfig,
    pub lateness: LatenessConfig,
    pub thresholds: ThresholdConfig,

    pub adapter: AdapterConfig,
    pub sandbox_enabled: bool,
    pub auto_rollback_error_rate: f64,

    pub ingest_queue_capacity: usize,
    pub publisher_queue_capacity: usize,
    pub publisher_block_timeout_ms: u64,

    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window_secs: u64,
    pub burst: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    pub tumbling_secs: [u64; 3], // 1m, 5m, 15m
    pub sliding_window_secs: u64,
    pub sliding_slide_secs: u64,
    pub session_gap_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatenessConfig {
    pub network_secs: u64,
    pub flow_record_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdConfig {
    pub syn_flood: u64,
    pub port_scan: usize,
    pub large_payload: u64,
    pub rate_spike: u64,
    pub entropy_zscore: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterConfig {
    pub kind: AdapterKind,
    pub aws: Option<AwsAdapterConfig>,
    pub azure: Option<AzureAdapterConfig>,
    pub gcp: Option<GcpAdapterConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdapterKind {
    Auto,
    Iptables,
    Nftables,
    Aws,
    Azure,
    Gcp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwsAdapterConfig {
    pub region: String,
    pub security_group_id: String,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AzureAdapterConfig {
    pub subscription: String,
    pub resource_group: String,
    pub nsg_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GcpAdapterConfig {
    pub project: String,
    pub network: String,
    pub credentials_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_bind: "0.0.0.0:8088".to_string(),
            netflow_port: 2055,
            sflow_port: 6343,
            pcap_interfaces: vec!["any".to_string()],
            api_auth_token: None,
            shard_count: default_shard_count(),
            windows: WindowConfig {
                tumbling_secs: [60, 300, 900],
                sliding_window_secs: 300,
                sliding_slide_secs: 60,
                session_gap_secs: 300,
            },
            lateness: LatenessConfig {
                network_secs: 5,
                flow_record_secs: 30,
            },
            thresholds: ThresholdConfig {
                syn_flood: 100,
                port_scan: 50,
                large_payload: 10_000,
                rate_spike: 1000,
                entropy_zscore: 3.0,
            },
            adapter: AdapterConfig {
                kind: AdapterKind::Auto,
                aws: None,
                azure: None,
                gcp: None,
            },
            sandbox_enabled: true,
            auto_rollback_error_rate: 0.5,
            ingest_queue_capacity: 4096,
            publisher_queue_capacity: 4096,
            publisher_block_timeout_ms: 500,
            rate_limit: RateLimitConfig {
                max_requests: 1000,
                window_secs: 60,
                burst: 200,
            },
        }
    }
}

fn default_shard_count() -> usize {
    let parallelism = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);
    (2 * parallelism).next_power_of_two()
}

impl Config {
    /// Load from an optional TOML file, then apply `SENTINEL_*` env overrides.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut cfg = match path {
            Some(p) if p.exists() => {
                let text = std::fs::read_to_string(p)?;
                toml::from_str(&text)?
            }
            _ => Config::default(),
        };
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = env::var("SENTINEL_HTTP_BIND") {
            self.http_bind = v;
        }
        if let Ok(v) = env::var("SENTINEL_NETFLOW_PORT") {
            if let Ok(p) = v.parse() {
                self.netflow_port = p;
            }
        }
        if let Ok(v) = env::var("SENTINEL_SFLOW_PORT") {
            if let Ok(p) = v.parse() {
                self.sflow_port = p;
            }
        }
        if let Ok(v) = env::var("SENTINEL_API_AUTH_TOKEN") {
            self.api_auth_token = Some(v);
        }
    }

    pub fn tumbling_durations(&self) -> [Duration; 3] {
        self.windows.tumbling_secs.map(Duration::from_secs)
    }

    pub fn lateness_for(&self, is_flow_record_source: bool) -> Duration {
        if is_flow_record_source {
            Duration::from_secs(self.lateness.flow_record_secs)
        } else {
            Duration::from_secs(self.lateness.network_secs)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_shard_count_is_power_of_two() {
        let n = default_shard_count();
        assert!(n.is_power_of_two());
        assert!(n >= 2);
    }

    #[test]
    fn load_without_file_uses_defaults() {
        let cfg = Config::load(None).unwrap();
        assert_eq!(cfg.netflow_port, 2055);
        assert_eq!(cfg.sflow_port, 6343);
    }

    #[test]
    fn load_reads_overrides_from_toml_file() {
        use std::io::Write;
        let toml_text = r#"
            http_bind = "127.0.0.1:9999"
            netflow_port = 3000
            sflow_port = 6343
            pcap_interfaces = ["any"]
            shard_count = 8
            sandbox_enabled = true
            auto_rollback_error_rate = 0.5
            ingest_queue_capacity = 4096
            publisher_queue_capacity = 4096
            publisher_block_timeout_ms = 500

            [windows]
            tumbling_secs = [60, 300, 900]
            sliding_window_secs = 300
            sliding_slide_secs = 60
            session_gap_secs = 300

            [lateness]
            network_secs = 5
            flow_record_secs = 30

            [thresholds]
            syn_flood = 100
            port_scan = 50
            large_payload = 10000
            rate_spike = 1000
            entropy_zscore = 3.0

            [adapter]
            kind = "auto"

            [rate_limit]
            max_requests = 1000
            window_secs = 60
            burst = 200
        "#;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{toml_text}").unwrap();

        let cfg = Config::load(Some(file.path())).unwrap();
        assert_eq!(cfg.http_bind, "127.0.0.1:9999");
        assert_eq!(cfg.netflow_port, 3000);
        // `api_auth_token` is absent from the file; `Option<T>` fields fall
        // back to `None` without a file entry.
        assert!(cfg.api_auth_token.is_none());
    }
}
