//! src/control.rs
//! The control surface: stats counters, the status-change event feed, and
//! the query API used by the (external) operator CLI. Stats are
//! many-writer atomic counters; the event feed is a single-writer (the
//! prober) ring buffer of the last N transitions.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::error::Result;
use crate::registry::{Registry, RunwayEvent, RunwayStatus};

pub const DEFAULT_EVENT_CAPACITY: usize = 1000;

#[derive(Debug, Default)]
pub struct Stats {
    total: AtomicU64,
    active: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct StatsSnapshot {
    pub total_connections: u64,
    pub active_connections: u64,
    pub failed_connections: u64,
}

impl Stats {
    pub fn conn_started(&self) {
        self.total.fetch_add(1, Ordering::SeqCst);
        self.active.fetch_add(1, Ordering::SeqCst);
    }

    pub fn conn_ended(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn conn_failed(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_connections: self.total.load(Ordering::SeqCst),
            active_connections: self.active.load(Ordering::SeqCst),
            failed_connections: self.failed.load(Ordering::SeqCst),
        }
    }
}

pub struct EventFeed {
    capacity: usize,
    ring: Mutex<VecDeque<RunwayEvent>>,
}

impl EventFeed {
    pub fn new(capacity: usize) -> Self {
        EventFeed {
            capacity,
            ring: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn push(&self, event: RunwayEvent) {
        let mut ring = self.ring.lock().unwrap();
        if ring.len() == self.capacity {
            ring.pop_front();
        }
        ring.push_back(event);
    }

    /// The last `n` status-change events, most recent last.
    pub fn recent(&self, n: usize) -> Vec<RunwayEvent> {
        let ring = self.ring.lock().unwrap();
        ring.iter().rev().take(n).rev().cloned().collect()
    }
}

impl Default for EventFeed {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct RunwayView {
    pub key: String,
    pub status: String,
    pub last_probe_age_secs: Option<f64>,
    pub latencies: Vec<(String, f64)>,
}

/// The query API exposed to the operator surface. Running sessions are
/// unaffected by `reload_config`: they hold an owned `RunwayKey`, not a
/// reference into the swapped config, so a reload mid-session cannot
/// invalidate an already-selected runway.
pub struct ControlSurface {
    registry: Arc<Registry>,
    stats: Arc<Stats>,
    events: Arc<EventFeed>,
    config: Arc<tokio::sync::RwLock<Config>>,
    config_path: std::path::PathBuf,
}

impl ControlSurface {
    pub fn new(
        registry: Arc<Registry>,
        stats: Arc<Stats>,
        events: Arc<EventFeed>,
        config: Arc<tokio::sync::RwLock<Config>>,
        config_path: std::path::PathBuf,
    ) -> Self {
        ControlSurface {
            registry,
            stats,
            events,
            config,
            config_path,
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn runway_view(&self) -> Vec<RunwayView> {
        let now = Instant::now();
        self.registry
            .snapshot_runways()
            .into_iter()
            .map(|snap| RunwayView {
                key: snap.key.to_string(),
                status: match snap.status {
                    RunwayStatus::Unknown => "unknown",
                    RunwayStatus::Up => "up",
                    RunwayStatus::Down => "down",
                }
                .to_string(),
                last_probe_age_secs: snap
                    .last_probe
                    .map(|t| duration_since(t, now).as_secs_f64()),
                latencies: self.registry.latencies_for_runway(&snap.key),
            })
            .collect()
    }

    pub fn recent_events(&self, n: usize) -> Vec<RunwayEvent> {
        self.events.recent(n)
    }

    /// Validates and swaps the active config. The probe interval and
    /// timeout take effect on the next prober cycle; the runway set is not
    /// rebuilt (that requires a restart).
    pub async fn reload_config(&self) -> Result<()> {
        let contents = std::fs::read_to_string(&self.config_path)?;
        let new_config = Config::parse_reload(&contents)?;
        *self.config.write().await = new_config;
        Ok(())
    }
}

fn duration_since(earlier: Instant, now: Instant) -> Duration {
    now.saturating_duration_since(earlier)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_active_returns_to_prior_value_after_session() {
        let stats = Stats::default();
        let before = stats.snapshot().active_connections;
        stats.conn_started();
        stats.conn_ended();
        let after = stats.snapshot().active_connections;
        assert_eq!(before, after);
    }

    #[test]
    fn event_feed_caps_at_capacity() {
        let feed = EventFeed::new(2);
        for i in 0..5u8 {
            feed.push(RunwayEvent {
                runway: crate::registry::RunwayKey {
                    interface: format!("eth{i}"),
                    upstream: None,
                },
                from: RunwayStatus::Unknown,
                to: RunwayStatus::Up,
                latency: None,
            });
        }
        assert_eq!(feed.recent(10).len(), 2);
    }
}
