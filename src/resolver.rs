//! src/resolver.rs
//! Turns a target host into an IP, preferring IPv4. Pure delegation to the
//! platform DNS; resolution is per-session, never cached in the core. The
//! `DnsCache` here is a resolver-local convenience for CLI introspection
//! only (supplemented from the original's `dns_cache` dict) — it is never
//! consulted by the selector or registry, since the spec deliberately
//! drops DNS-server identity as a runway dimension.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;

use crate::error::{ProxyError, Result};

#[derive(Default)]
pub struct DnsCache {
    entries: Mutex<HashMap<String, Vec<IpAddr>>>,
}

impl DnsCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, host: &str, ips: &[IpAddr]) {
        self.entries
            .lock()
            .unwrap()
            .insert(host.to_string(), ips.to_vec());
    }

    pub fn snapshot(&self) -> HashMap<String, Vec<IpAddr>> {
        self.entries.lock().unwrap().clone()
    }

    pub fn purge(&self, host: &str) -> bool {
        self.entries.lock().unwrap().remove(host).is_some()
    }
}

/// Resolves `host` to an IP address. Literal IPv4/IPv6 addresses are
/// returned unchanged. Otherwise looks up A records, preferring IPv4,
/// falling back to AAAA. Lookup failure propagates as `ResolutionError`.
pub async fn resolve(host: &str, port: u16, cache: &DnsCache) -> Result<IpAddr> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip);
    }

    let addrs: Vec<std::net::SocketAddr> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| ProxyError::Resolution(format!("{host}: {e}")))?
        .collect();

    if addrs.is_empty() {
        return Err(ProxyError::Resolution(format!("no addresses for {host}")));
    }

    let ips: Vec<IpAddr> = addrs.iter().map(|a| a.ip()).collect();
    cache.record(host, &ips);

    addrs
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addrs.first())
        .map(|a| a.ip())
        .ok_or_else(|| ProxyError::Resolution(format!("no addresses for {host}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn literal_ipv4_returned_unchanged() {
        let cache = DnsCache::new();
        let ip = resolve("93.184.216.34", 80, &cache).await.unwrap();
        assert_eq!(ip, "93.184.216.34".parse::<IpAddr>().unwrap());
    }

    #[tokio::test]
    async fn literal_ipv6_returned_unchanged() {
        let cache = DnsCache::new();
        let ip = resolve("::1", 80, &cache).await.unwrap();
        assert_eq!(ip, "::1".parse::<IpAddr>().unwrap());
    }
}
