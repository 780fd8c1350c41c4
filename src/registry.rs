//! src/registry.rs
//! The runway registry: owns the runway set, per-runway status, and
//! per-target latency records. The prober is the sole writer; all other
//! readers see eventually-consistent snapshots. Backed by `DashMap` so
//! reads are wait-free with respect to the single writer.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use dashmap::DashMap;

use crate::config::UpstreamProxy;
use crate::platform::{self, Interface};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunwayStatus {
    Unknown,
    Up,
    Down,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RunwayKey {
    pub interface: String,
    pub upstream: Option<UpstreamProxy>,
}

impl RunwayKey {
    pub fn is_direct(&self) -> bool {
        self.upstream.is_none()
    }
}

impl std::fmt::Display for RunwayKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.upstream {
            None => write!(f, "{}/direct", self.interface),
            Some(u) => write!(f, "{}/{}:{}", self.interface, u.host, u.port),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunwayState {
    pub status: RunwayStatus,
    pub last_probe: Option<Instant>,
}

/// A status-change event, published by the prober on transition only —
/// steady-state probes never emit one.
#[derive(Debug, Clone)]
pub struct RunwayEvent {
    pub runway: RunwayKey,
    pub from: RunwayStatus,
    pub to: RunwayStatus,
    pub latency: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct RunwaySnapshot {
    pub key: RunwayKey,
    pub status: RunwayStatus,
    pub last_probe: Option<Instant>,
    pub interface_ipv4: Option<Ipv4Addr>,
}

pub struct Registry {
    order: Vec<RunwayKey>,
    states: DashMap<RunwayKey, RunwayState>,
    latency: DashMap<(String, RunwayKey), f64>,
    round_robin: AtomicU64,
}

impl Registry {
    /// Builds the runway set as cross-product(interfaces × ({direct} ∪
    /// upstreams)), direct listed first per interface. Created once at
    /// startup; the set itself is fixed for the process lifetime
    /// (reconfigure = restart, per the data model).
    pub fn new(interfaces: &[Interface], upstreams: &[UpstreamProxy]) -> Self {
        let mut order = Vec::with_capacity(interfaces.len() * (1 + upstreams.len()));
        let states = DashMap::new();
        for iface in interfaces {
            let direct_key = RunwayKey {
                interface: iface.name.clone(),
                upstream: None,
            };
            states.insert(
                direct_key.clone(),
                RunwayState {
                    status: RunwayStatus::Unknown,
                    last_probe: None,
                },
            );
            order.push(direct_key);

            for up in upstreams {
                let key = RunwayKey {
                    interface: iface.name.clone(),
                    upstream: Some(up.clone()),
                };
                states.insert(
                    key.clone(),
                    RunwayState {
                        status: RunwayStatus::Unknown,
                        last_probe: None,
                    },
                );
                order.push(key);
            }
        }
        Registry {
            order,
            states,
            latency: DashMap::new(),
            round_robin: AtomicU64::new(0),
        }
    }

    pub fn keys_in_order(&self) -> &[RunwayKey] {
        &self.order
    }

    /// Sole mutator of runway status; called only from the prober. Returns
    /// the transition event iff the outcome differs from the prior
    /// observed status — a steady-state probe (same outcome) returns
    /// `None` and does not log.
    pub fn update_status(
        &self,
        key: &RunwayKey,
        up: bool,
        latency: Option<f64>,
        now: Instant,
    ) -> Option<RunwayEvent> {
        let new_status = if up { RunwayStatus::Up } else { RunwayStatus::Down };
        let mut entry = self.states.entry(key.clone()).or_insert(RunwayState {
            status: RunwayStatus::Unknown,
            last_probe: None,
        });
        let prev = entry.status;
        entry.status = new_status;
        entry.last_probe = Some(now);
        if prev != new_status {
            Some(RunwayEvent {
                runway: key.clone(),
                from: prev,
                to: new_status,
                latency,
            })
        } else {
            None
        }
    }

    /// Appends/overwrites the latency sample for `(target, key)`.
    pub fn record_latency(&self, target: &str, key: &RunwayKey, secs: f64) {
        self.latency.insert((target.to_string(), key.clone()), secs);
    }

    pub fn latest_latency(&self, target: &str, key: &RunwayKey) -> Option<f64> {
        self.latency
            .get(&(target.to_string(), key.clone()))
            .map(|v| *v)
    }

    /// All recorded (target, latency) samples for one runway, used by the
    /// control surface's `runway_view`.
    pub fn latencies_for_runway(&self, key: &RunwayKey) -> Vec<(String, f64)> {
        self.latency
            .iter()
            .filter(|entry| &entry.key().1 == key)
            .map(|entry| (entry.key().0.clone(), *entry.value()))
            .collect()
    }

    /// An immutable snapshot of every runway in registry enumeration order.
    pub fn snapshot_runways(&self) -> Vec<RunwaySnapshot> {
        self.order
            .iter()
            .map(|key| {
                let state = self.states.get(key);
                let (status, last_probe) = state
                    .map(|s| (s.status, s.last_probe))
                    .unwrap_or((RunwayStatus::Unknown, None));
                RunwaySnapshot {
                    key: key.clone(),
                    status,
                    last_probe,
                    interface_ipv4: platform::iface_ipv4(&key.interface),
                }
            })
            .collect()
    }

    /// The sequence of up-runways, direct runways ordered before proxied
    /// ones when `prefer_direct` is set. Ties broken by enumeration order.
    pub fn available(&self, prefer_direct: bool) -> Vec<RunwayKey> {
        let mut up: Vec<RunwayKey> = self
            .order
            .iter()
            .filter(|k| {
                self.states
                    .get(*k)
                    .map(|s| s.status == RunwayStatus::Up)
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        if prefer_direct {
            up.sort_by_key(|k| !k.is_direct());
        }
        up
    }

    /// Advances the round-robin counter once per selection (not once per
    /// candidate tried) and returns the previous value.
    pub fn next_round_robin(&self) -> u64 {
        self.round_robin.fetch_add(1, Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ifaces(names: &[&str]) -> Vec<Interface> {
        names
            .iter()
            .map(|n| Interface {
                name: n.to_string(),
            })
            .collect()
    }

    #[test]
    fn single_interface_no_upstream_yields_one_direct_runway() {
        let reg = Registry::new(&ifaces(&["eth0"]), &[]);
        assert_eq!(reg.keys_in_order().len(), 1);
        assert!(reg.keys_in_order()[0].is_direct());
    }

    #[test]
    fn cross_product_includes_direct_and_each_upstream_per_interface() {
        let ups = vec![
            UpstreamProxy {
                host: "10.0.0.1".into(),
                port: 3128,
            },
            UpstreamProxy {
                host: "10.0.0.2".into(),
                port: 8080,
            },
        ];
        let reg = Registry::new(&ifaces(&["eth0", "wlan0"]), &ups);
        assert_eq!(reg.keys_in_order().len(), 2 * (1 + 2));
    }

    #[test]
    fn unknown_transitions_to_up_or_down_exactly_once_then_free_transitions() {
        let reg = Registry::new(&ifaces(&["eth0"]), &[]);
        let key = reg.keys_in_order()[0].clone();
        let now = Instant::now();

        let ev1 = reg.update_status(&key, true, Some(0.01), now);
        assert!(matches!(
            ev1,
            Some(RunwayEvent {
                from: RunwayStatus::Unknown,
                to: RunwayStatus::Up,
                ..
            })
        ));

        // Same outcome again: no event (steady state).
        let ev2 = reg.update_status(&key, true, Some(0.01), now);
        assert!(ev2.is_none());

        // Flip to down: event fires.
        let ev3 = reg.update_status(&key, false, None, now);
        assert!(matches!(
            ev3,
            Some(RunwayEvent {
                from: RunwayStatus::Up,
                to: RunwayStatus::Down,
                ..
            })
        ));
    }

    #[test]
    fn available_orders_direct_before_proxied_when_requested() {
        let ups = vec![UpstreamProxy {
            host: "10.0.0.1".into(),
            port: 3128,
        }];
        let reg = Registry::new(&ifaces(&["eth0"]), &ups);
        let now = Instant::now();
        for key in reg.keys_in_order().to_vec() {
            reg.update_status(&key, true, Some(0.05), now);
        }
        let avail = reg.available(true);
        assert!(avail[0].is_direct());
    }

    #[test]
    fn available_is_empty_when_no_runway_up() {
        let reg = Registry::new(&ifaces(&["eth0"]), &[]);
        assert!(reg.available(true).is_empty());
    }
}
