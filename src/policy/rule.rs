//! `Rule`: one concrete firewall rule generated from a `PolicyIntent` (spec
//! §3 "Rule", §4.5 step 1).

use crate::policy::intent::{expand_protocol, Action, Direction, PolicyIntent};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateParams {
    pub packets_per_second: u32,
    pub burst: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub rule_id: String,
    pub source_cidr: String,
    pub dest_ip: String,
    pub dest_port: Option<u16>,
    pub protocol: String,
    pub action: Action,
    pub rate: Option<RateParams>,
    pub direction: Direction,
    pub priority: u16,
    pub created_at_ns: i64,
    pub expires_at_ns: Option<i64>,
    pub created_by: String,
}

/// `rule_id = uuid-v4, first 64 bits presented` (spec §3 "Rule" identity).
pub fn new_rule_id() -> String {
    let uuid = Uuid::new_v4();
    let bytes = uuid.as_bytes();
    hex::encode(&bytes[0..8])
}

/// Expands one `PolicyIntent` into the Cartesian product of source ×
/// destination × protocol candidates (spec §4.5 step 1).
pub fn generate_rules(intent: &PolicyIntent, created_at_ns: i64, created_by: &str) -> Vec<Rule> {
    let sources = intent.source.source_candidates();
    let dest_ips = intent.destination.source_candidates();
    let dest_ports = intent.destination.port_candidates();
    let protocols = expand_protocol(intent.protocol);

    let expires_at_ns = intent
        .duration_secs
        .map(|d| created_at_ns + (d as i64) * 1_000_000_000);

    let mut rules = Vec::with_capacity(sources.len() * dest_ips.len() * dest_ports.len() * protocols.len());
    for source_cidr in &sources {
        for dest_ip in &dest_ips {
            for dest_port in &dest_ports {
                for protocol in &protocols {
                    rules.push(Rule {
                        rule_id: new_rule_id(),
                        source_cidr: source_cidr.clone(),
                        dest_ip: dest_ip.clone(),
                        dest_port: *dest_port,
                        protocol: protocol.to_string(),
                        action: intent.action,
                        rate: if intent.action == Action::RateLimit {
                            Some(RateParams {
                                packets_per_second: 100,
                                burst: 20,
                            })
                        } else {
                            None
                        },
                        direction: intent.direction,
                        priority: intent.priority,
                        created_at_ns,
                        expires_at_ns,
                        created_by: created_by.to_string(),
                    });
                }
            }
        }
    }
    rules
}
