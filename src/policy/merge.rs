//! CIDR rule merging before apply (spec §4.5 "Rule merging optimization").

#[cfg(test)]
use crate::policy::intent::Action;
use crate::policy::intent::Direction;
use crate::policy::rule::Rule;
use ipnetwork::IpNetwork;
use std::collections::HashMap;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct GroupKey {
    action: String,
    protocol: String,
    dest_port: Option<u16>,
    dest_ip: String,
    direction: String,
    priority: u16,
    rate: Option<(u32, u32)>,
}

fn group_key(rule: &Rule) -> GroupKey {
    GroupKey {
        action: rule.action.as_str().to_string(),
        protocol: rule.protocol.clone(),
        dest_port: rule.dest_port,
        dest_ip: rule.dest_ip.clone(),
        direction: match rule.direction {
            Direction::Ingress => "ingress".to_string(),
            Direction::Egress => "egress".to_string(),
        },
        priority: rule.priority,
        rate: rule.rate.as_ref().map(|r| (r.packets_per_second, r.burst)),
    }
}

/// Groups rules by `(action, protocol, dest_port, dest_ip, direction,
/// priority, rate)` and merges source CIDRs within each group via canonical
/// supernetting; groups whose CIDRs don't merge pass through unchanged.
pub fn merge_rules(rules: Vec<Rule>) -> Vec<Rule> {
    let mut groups: HashMap<GroupKey, Vec<Rule>> = HashMap::new();
    for rule in rules {
        groups.entry(group_key(&rule)).or_default().push(rule);
    }

    let mut out = Vec::new();
    for (_, group) in groups {
        out.extend(merge_group(group));
    }
    out
}

fn merge_group(mut group: Vec<Rule>) -> Vec<Rule> {
    if group.len() <= 1 {
        return group;
    }

    let networks: Option<Vec<IpNetwork>> = group.iter().map(|r| IpNetwork::from_str(&r.source_cidr).ok()).collect();
    let Some(mut networks) = networks else {
        return group;
    };

    let merged = supernet_merge(&mut networks);
    if merged.len() >= group.len() {
        return group;
    }

    let template = group.swap_remove(0);
    merged
        .into_iter()
        .map(|net| Rule {
            rule_id: crate::policy::rule::new_rule_id(),
            source_cidr: net.to_string(),
            ..template.clone()
        })
        .collect()
}

/// Repeatedly merges adjacent equal-prefix-length networks that together
/// form their shared parent supernet, until no further merge applies.
fn supernet_merge(networks: &mut Vec<IpNetwork>) -> Vec<IpNetwork> {
    networks.sort_by_key(|n| (n.network(), n.prefix()));
    networks.dedup();

    loop {
        let mut merged_any = false;
        let mut next: Vec<IpNetwork> = Vec::with_capacity(networks.len());
        let mut i = 0;
        while i < networks.len() {
            if i + 1 < networks.len() {
                if let Some(parent) = try_merge_pair(&networks[i], &networks[i + 1]) {
                    next.push(parent);
                    i += 2;
                    merged_any = true;
                    continue;
                }
            }
            next.push(networks[i].clone());
            i += 1;
        }
        *networks = next;
        if !merged_any {
            break;
        }
    }
    networks.clone()
}

fn try_merge_pair(a: &IpNetwork, b: &IpNetwork) -> Option<IpNetwork> {
    if a.prefix() != b.prefix() || a.prefix() == 0 {
        return None;
    }
    let (IpNetwork::V4(a4), IpNetwork::V4(b4)) = (a, b) else {
        return None;
    };
    let parent_prefix = a4.prefix() - 1;
    let a_parent = ipnetwork::Ipv4Network::new(a4.network(), parent_prefix).ok()?;
    let b_parent = ipnetwork::Ipv4Network::new(b4.network(), parent_prefix).ok()?;
    if a_parent.network() == b_parent.network() && a4.network() != b4.network() {
        Some(IpNetwork::V4(a_parent))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(cidr: &str) -> Rule {
        Rule {
            rule_id: "r".to_string(),
            source_cidr: cidr.to_string(),
            dest_ip: "10.0.0.1".to_string(),
            dest_port: Some(443),
            protocol: "TCP".to_string(),
            action: Action::Deny,
            rate: None,
            direction: Direction::Ingress,
            priority: 100,
            created_at_ns: 0,
            expires_at_ns: None,
            created_by: "system".to_string(),
        }
    }

    #[test]
    fn adjacent_equal_size_blocks_merge_into_parent() {
        let rules = vec![rule("192.168.0.0/25"), rule("192.168.0.128/25")];
        let merged = merge_rules(rules);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].source_cidr, "192.168.0.0/24");
    }

    #[test]
    fn non_mergeable_group_passes_through_unchanged() {
        let rules = vec![rule("10.0.0.0/24"), rule("192.168.0.0/24")];
        let merged = merge_rules(rules);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn different_groups_never_merge_across_action() {
        let mut deny = rule("192.168.0.0/25");
        let mut allow = rule("192.168.0.128/25");
        allow.action = Action::Allow;
        let merged = merge_rules(vec![deny.clone(), allow.clone()]);
        assert_eq!(merged.len(), 2);
        let _ = (&mut deny, &mut allow);
    }
}
