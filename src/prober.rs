//! src/prober.rs
//! Runs a single cooperative loop on a fixed interval, concurrently probing
//! every runway against every reachability target, then updating the
//! registry. Probe cycles never overlap: a new cycle starts only after the
//! previous cycle's tasks have completed or been cancelled.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpSocket, TcpStream};
use tracing::info;

use crate::config::{Config, UpstreamProxy};
use crate::control::EventFeed;
use crate::platform;
use crate::registry::{Registry, RunwayKey};

/// A fixed (ip, port) used purely to exercise a runway — never a
/// per-session target host.
#[derive(Debug, Clone)]
pub struct ReachabilityTarget {
    pub host: String,
    pub port: u16,
}

impl ReachabilityTarget {
    pub fn key(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

pub fn default_targets(upstreams: &[UpstreamProxy]) -> Vec<ReachabilityTarget> {
    let mut targets = vec![ReachabilityTarget {
        host: "8.8.8.8".to_string(),
        port: 53,
    }];
    for up in upstreams {
        targets.push(ReachabilityTarget {
            host: up.host.clone(),
            port: up.port,
        });
    }
    targets
}

async fn direct_probe(key: &RunwayKey, target: &ReachabilityTarget, timeout: Duration) -> Option<f64> {
    let ip: IpAddr = target.host.parse().ok()?;
    let dest = SocketAddr::new(ip, target.port);

    let probe = async {
        let socket = if ip.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .ok()?;

        if let Some(src_ip) = platform::iface_ipv4(&key.interface) {
            if !src_ip.is_unspecified() {
                socket
                    .bind(SocketAddr::new(IpAddr::V4(src_ip), 0))
                    .ok()?;
            }
        }

        let start = Instant::now();
        socket.connect(dest).await.ok()?;
        Some(start.elapsed().as_secs_f64())
    };

    tokio::time::timeout(timeout, probe).await.ok().flatten()
}

async fn upstream_probe(
    upstream: &UpstreamProxy,
    target: &ReachabilityTarget,
    timeout: Duration,
) -> Option<f64> {
    let probe = async {
        let start = Instant::now();
        let mut stream = TcpStream::connect((upstream.host.as_str(), upstream.port))
            .await
            .ok()?;
        let request = format!(
            "CONNECT {}:{} HTTP/1.1\r\nHost: {}\r\n\r\n",
            target.host, target.port, target.host
        );
        stream.write_all(request.as_bytes()).await.ok()?;

        let mut buf = [0u8; 4096];
        let n = stream.read(&mut buf).await.ok()?;
        let status_line = String::from_utf8_lossy(&buf[..n]);
        if status_line.contains("200") {
            Some(start.elapsed().as_secs_f64())
        } else {
            None
        }
    };

    tokio::time::timeout(timeout, probe).await.ok().flatten()
}

async fn probe_runway(
    key: RunwayKey,
    targets: Vec<ReachabilityTarget>,
    timeout: Duration,
) -> (RunwayKey, Vec<(String, Option<f64>)>) {
    let mut futures = Vec::with_capacity(targets.len());
    for target in targets {
        let key = key.clone();
        futures.push(async move {
            let latency = match &key.upstream {
                None => direct_probe(&key, &target, timeout).await,
                Some(up) => upstream_probe(up, &target, timeout).await,
            };
            (target.key(), latency)
        });
    }
    let results = futures::future::join_all(futures).await;
    (key, results)
}

/// Runs the prober loop until `shutdown` fires. Each cycle: build the
/// reachability target list from the current config, probe every runway
/// concurrently, then update the registry and publish transition events.
pub async fn run(
    registry: Arc<Registry>,
    config: Arc<tokio::sync::RwLock<Config>>,
    events: Arc<EventFeed>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    loop {
        let (interval, timeout, targets) = {
            let cfg = config.read().await;
            (
                Duration::from_secs(cfg.probe_interval.max(1)),
                Duration::from_secs_f64(cfg.tcp_timeout.max(0.001)),
                default_targets(&cfg.upstream_proxies),
            )
        };

        let keys = registry.keys_in_order().to_vec();
        let cycle = keys
            .into_iter()
            .map(|key| probe_runway(key, targets.clone(), timeout));
        let results = futures::future::join_all(cycle).await;

        let now = Instant::now();
        for (key, target_results) in results {
            let mut any_up = false;
            let mut best_latency: Option<f64> = None;
            for (target_key, latency) in target_results {
                if let Some(secs) = latency {
                    any_up = true;
                    registry.record_latency(&target_key, &key, secs);
                    best_latency = Some(best_latency.map_or(secs, |b: f64| b.min(secs)));
                }
            }
            if let Some(event) = registry.update_status(&key, any_up, best_latency, now) {
                info!(
                    runway = %event.runway,
                    from = ?event.from,
                    to = ?event.to,
                    latency = ?event.latency,
                    "runway status changed"
                );
                events.push(event);
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}
