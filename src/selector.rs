//! src/selector.rs
//! Maps (target, policy) -> ordered list of candidate runways. Never a
//! single runway: the caller must be able to fall back.

use serde::{Deserialize, Serialize};

use crate::registry::{Registry, RunwayKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    FirstAvailable,
    RoundRobin,
    Latency,
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        SelectionPolicy::Latency
    }
}

/// Returns an ordered list of candidate runways for `target` under
/// `policy`. An empty result means no up-runway exists; the caller must
/// surface `NoRunwayAvailable`.
pub fn select(registry: &Registry, target: &str, policy: SelectionPolicy) -> Vec<RunwayKey> {
    match policy {
        SelectionPolicy::FirstAvailable => registry.available(true),
        SelectionPolicy::RoundRobin => {
            let mut candidates = registry.available(false);
            if candidates.is_empty() {
                return candidates;
            }
            // The counter advances once per selection, not once per
            // candidate tried.
            let offset = (registry.next_round_robin() as usize) % candidates.len();
            candidates.rotate_left(offset);
            candidates
        }
        SelectionPolicy::Latency => {
            let mut candidates = registry.available(false);
            candidates.sort_by(|a, b| {
                let la = registry.latest_latency(target, a);
                let lb = registry.latest_latency(target, b);
                match (la, lb) {
                    (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal),
                    (Some(_), None) => std::cmp::Ordering::Less,
                    (None, Some(_)) => std::cmp::Ordering::Greater,
                    (None, None) => std::cmp::Ordering::Equal,
                }
            });
            candidates
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::Interface;
    use std::time::Instant;

    fn ifaces(names: &[&str]) -> Vec<Interface> {
        names
            .iter()
            .map(|n| Interface {
                name: n.to_string(),
            })
            .collect()
    }

    #[test]
    fn first_available_prefers_direct_whenever_one_is_up() {
        let ups = vec![crate::config::UpstreamProxy {
            host: "10.0.0.1".into(),
            port: 3128,
        }];
        let reg = Registry::new(&ifaces(&["eth0"]), &ups);
        let now = Instant::now();
        for key in reg.keys_in_order().to_vec() {
            reg.update_status(&key, true, Some(0.05), now);
        }
        let candidates = select(&reg, "example.com", SelectionPolicy::FirstAvailable);
        assert!(candidates[0].is_direct());
    }

    #[test]
    fn latency_policy_returns_argmin_with_unknowns_last() {
        let ifs = ifaces(&["eth0", "wlan0"]);
        let reg = Registry::new(&ifs, &[]);
        let now = Instant::now();
        let keys = reg.keys_in_order().to_vec();
        reg.update_status(&keys[0], true, Some(0.12), now);
        reg.update_status(&keys[1], true, Some(0.03), now);
        reg.record_latency("1.2.3.4:443", &keys[0], 0.12);
        reg.record_latency("1.2.3.4:443", &keys[1], 0.03);

        let candidates = select(&reg, "1.2.3.4:443", SelectionPolicy::Latency);
        assert_eq!(candidates[0], keys[1]);
    }

    #[test]
    fn latency_policy_sorts_unsampled_runways_last() {
        let ifs = ifaces(&["eth0", "wlan0"]);
        let reg = Registry::new(&ifs, &[]);
        let now = Instant::now();
        let keys = reg.keys_in_order().to_vec();
        reg.update_status(&keys[0], true, None, now);
        reg.update_status(&keys[1], true, Some(0.03), now);
        reg.record_latency("t", &keys[1], 0.03);

        let candidates = select(&reg, "t", SelectionPolicy::Latency);
        assert_eq!(candidates[0], keys[1]);
        assert_eq!(candidates[1], keys[0]);
    }

    #[test]
    fn round_robin_advances_once_per_selection() {
        let reg = Registry::new(&ifaces(&["eth0", "wlan0"]), &[]);
        let now = Instant::now();
        for key in reg.keys_in_order().to_vec() {
            reg.update_status(&key, true, None, now);
        }
        let first = select(&reg, "t", SelectionPolicy::RoundRobin);
        let second = select(&reg, "t", SelectionPolicy::RoundRobin);
        assert_ne!(first[0], second[0]);
    }

    #[test]
    fn no_up_runway_yields_empty_sequence() {
        let reg = Registry::new(&ifaces(&["eth0"]), &[]);
        assert!(select(&reg, "t", SelectionPolicy::FirstAvailable).is_empty());
        assert!(select(&reg, "t", SelectionPolicy::Latency).is_empty());
    }
}
