//! src/platform.rs
//! Platform adapter: interface enumeration, isolated from the rest of the
//! core so everything else stays portable. Pure with respect to registry
//! state; must not block on network I/O (only a local kernel query).

use std::net::Ipv4Addr;

/// Interface name used when the platform has no usable interface list —
/// binds to the unspecified address, same as the original's fallback.
pub const UNSPECIFIED_IFACE: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interface {
    pub name: String,
}

/// Returns the ordered sequence of non-loopback interface names. On
/// enumeration failure, returns a single synthetic entry meaning "bind to
/// the unspecified address".
///
/// Known limitation: `if_addrs` only reports interfaces that currently
/// have an address assigned, and exposes no administrative up/down flag.
/// An interface that is down but still carries a stale address (or a
/// non-loopback interface disabled at the link layer) is indistinguishable
/// here from one that is up, so a runway is still built for it; the
/// prober's reachability check is what ultimately marks such a runway
/// `Down`. This is a narrower guarantee than spec.md §4.1's "administratively
/// up and not loopback" — it is loopback-filtering only.
pub fn list_interfaces() -> Vec<Interface> {
    match if_addrs::get_if_addrs() {
        Ok(addrs) => {
            let mut seen = std::collections::BTreeSet::new();
            let mut out = Vec::new();
            for a in addrs {
                if a.is_loopback() {
                    continue;
                }
                if seen.insert(a.name.clone()) {
                    out.push(Interface { name: a.name });
                }
            }
            if out.is_empty() {
                vec![Interface {
                    name: UNSPECIFIED_IFACE.to_string(),
                }]
            } else {
                out
            }
        }
        Err(_) => vec![Interface {
            name: UNSPECIFIED_IFACE.to_string(),
        }],
    }
}

/// Resolves an interface name to its primary IPv4 address. The synthetic
/// "bind to unspecified" entry maps to `0.0.0.0`.
pub fn iface_ipv4(name: &str) -> Option<Ipv4Addr> {
    if name == UNSPECIFIED_IFACE {
        return Some(Ipv4Addr::UNSPECIFIED);
    }
    if_addrs::get_if_addrs().ok()?.into_iter().find_map(|a| {
        if a.name == name && !a.is_loopback() {
            match a.ip() {
                std::net::IpAddr::V4(v4) => Some(v4),
                _ => None,
            }
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unspecified_iface_maps_to_zero() {
        assert_eq!(iface_ipv4(UNSPECIFIED_IFACE), Some(Ipv4Addr::UNSPECIFIED));
    }

    #[test]
    fn list_interfaces_never_empty() {
        // Even on a minimal sandboxed host this must return at least the
        // synthetic fallback entry.
        assert!(!list_interfaces().is_empty());
    }
}
