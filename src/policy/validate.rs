//! Rule validation (spec §4.5 step 2), grounded on
//! `policy_validator.py::PolicyValidator`.

use crate::policy::intent::Action;
use crate::policy::rule::Rule;
use ipnetwork::IpNetwork;
use serde::Serialize;
use std::str::FromStr;

const RESERVED_PORTS: [u16; 7] = [22, 80, 443, 3306, 5432, 6379, 27017];

#[derive(Debug, Clone, Serialize)]
pub struct ValidationIssue {
    pub rule_index: usize,
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub issues: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
    pub rules_validated: usize,
}

/// Validates every rule; errors block apply, warnings are informational
/// (spec §4.5 step 2).
pub fn validate(rules: &[Rule]) -> ValidationResult {
    let mut issues = Vec::new();
    let mut warnings = Vec::new();

    for (i, rule) in rules.iter().enumerate() {
        if !is_valid_ip_or_cidr(&rule.source_cidr) {
            issues.push(ValidationIssue {
                rule_index: i,
                field: "source_cidr".to_string(),
                message: format!("invalid IP/CIDR: {}", rule.source_cidr),
            });
        }
        if rule.dest_ip != "0.0.0.0/0" && !is_valid_ip_or_cidr(&rule.dest_ip) {
            issues.push(ValidationIssue {
                rule_index: i,
                field: "dest_ip".to_string(),
                message: format!("invalid IP/CIDR: {}", rule.dest_ip),
            });
        }
        if let Some(port) = rule.dest_port {
            if port == 0 {
                issues.push(ValidationIssue {
                    rule_index: i,
                    field: "dest_port".to_string(),
                    message: format!("invalid port: {port}"),
                });
            } else if matches!(rule.action, Action::Deny | Action::Drop | Action::Reject)
                && RESERVED_PORTS.contains(&port)
            {
                warnings.push(ValidationIssue {
                    rule_index: i,
                    field: "dest_port".to_string(),
                    message: format!("blocking common service port {port}"),
                });
            }
        }

        if rule.action == Action::RateLimit {
            match &rule.rate {
                Some(r) if r.packets_per_second >= 1 && r.burst >= 1 => {}
                _ => issues.push(ValidationIssue {
                    rule_index: i,
                    field: "rate".to_string(),
                    message: "RATE_LIMIT requires packets_per_second >= 1 and burst >= 1".to_string(),
                }),
            }
        }

        if let Some(expires_at) = rule.expires_at_ns {
            if expires_at <= rule.created_at_ns {
                issues.push(ValidationIssue {
                    rule_index: i,
                    field: "expires_at".to_string(),
                    message: "duration must be > 0".to_string(),
                });
            }
        }

        if rule.source_cidr == "0.0.0.0/0" && rule.action == Action::Allow {
            warnings.push(ValidationIssue {
                rule_index: i,
                field: "source_cidr".to_string(),
                message: "allowing traffic from any source (0.0.0.0/0)".to_string(),
            });
        }
    }

    let no_expiry = rules.iter().filter(|r| r.expires_at_ns.is_none()).count();
    if no_expiry > 5 {
        warnings.push(ValidationIssue {
            rule_index: usize::MAX,
            field: "expires_at".to_string(),
            message: format!("{no_expiry} rules have no expiration"),
        });
    }

    ValidationResult {
        valid: issues.is_empty(),
        issues,
        warnings,
        rules_validated: rules.len(),
    }
}

fn is_valid_ip_or_cidr(value: &str) -> bool {
    IpNetwork::from_str(value).is_ok() || value.parse::<std::net::IpAddr>().is_ok()
}
