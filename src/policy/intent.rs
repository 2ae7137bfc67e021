//! `PolicyIntent`: the externally supplied desired state (spec §3, §4.5).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Allow,
    Deny,
    Drop,
    Reject,
    RateLimit,
    Log,
    Quarantine,
    Monitor,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Allow => "ALLOW",
            Action::Deny => "DENY",
            Action::Drop => "DROP",
            Action::Reject => "REJECT",
            Action::RateLimit => "RATE_LIMIT",
            Action::Log => "LOG",
            Action::Quarantine => "QUARANTINE",
            Action::Monitor => "MONITOR",
        }
    }

    /// Actions that never participate in a conflict (spec §4.5 "neither is
    /// MONITOR/LOG").
    pub fn is_passive(&self) -> bool {
        matches!(self, Action::Monitor | Action::Log)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Ingress,
    Egress,
}

/// Source/destination selector (spec §3 "PolicyIntent.selector").
///
/// `ip`/`ips`/`network` expand into the Cartesian product of candidates at
/// rule-generation time (spec §4.5 step 1); an empty selector falls back to
/// `0.0.0.0/0`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Selector {
    pub ip: Option<String>,
    pub ips: Option<Vec<String>>,
    pub network: Option<String>,
    pub port: Option<u16>,
    pub ports: Option<Vec<u16>>,
    pub port_range: Option<(u16, u16)>,
}

impl Selector {
    pub fn source_candidates(&self) -> Vec<String> {
        self.ip_candidates()
    }

    fn ip_candidates(&self) -> Vec<String> {
        let mut out = Vec::new();
        if let Some(ip) = &self.ip {
            out.push(ip.clone());
        }
        if let Some(ips) = &self.ips {
            out.extend(ips.iter().cloned());
        }
        if let Some(net) = &self.network {
            out.push(net.clone());
        }
        if out.is_empty() {
            out.push("0.0.0.0/0".to_string());
        }
        out
    }

    pub fn port_candidates(&self) -> Vec<Option<u16>> {
        let mut out = Vec::new();
        if let Some(p) = self.port {
            out.push(Some(p));
        }
        if let Some(ps) = &self.ports {
            out.extend(ps.iter().copied().map(Some));
        }
        if let Some((lo, hi)) = self.port_range {
            out.extend((lo..=hi).map(Some));
        }
        if out.is_empty() {
            out.push(None);
        }
        out
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyIntent {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub action: Action,
    pub source: Selector,
    pub destination: Selector,
    pub protocol: Protocol,
    pub priority: u16,
    pub duration_secs: Option<u64>,
    pub vendors: Vec<String>,
    pub direction: Direction,
    pub metadata: serde_json::Value,
}

impl Default for PolicyIntent {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: "Unnamed Policy".to_string(),
            description: None,
            action: Action::Deny,
            source: Selector::default(),
            destination: Selector::default(),
            protocol: Protocol::Any,
            priority: 100,
            duration_secs: None,
            vendors: Vec::new(),
            direction: Direction::Ingress,
            metadata: serde_json::Value::Null,
        }
    }
}

/// Concrete protocols a `Protocol::Any` selector expands to (spec §4.5 step
/// 1: `ANY`/`ALL` protocol expands to {TCP, UDP, ICMP}).
pub fn expand_protocol(protocol: Protocol) -> Vec<&'static str> {
    match protocol {
        Protocol::Tcp => vec!["TCP"],
        Protocol::Udp => vec!["UDP"],
        Protocol::Icmp => vec!["ICMP"],
        Protocol::Any => vec!["TCP", "UDP", "ICMP"],
    }
}
