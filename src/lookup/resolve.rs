use std::net::{IpAddr, ToSocketAddrs};

use tracing::debug;

use crate::config::IpFamily;
use crate::error::{PingError, Result};
use crate::state::Target;

/// Resolve a host string into a target of the requested family
///
/// IP literals are taken as-is when they match the family. Hostnames go
/// through the system resolver and the first address of the right family wins.
pub fn resolve(host: &str, family: IpFamily) -> Result<Target> {
    let fail = |reason: String| PingError::Resolution {
        host: host.to_string(),
        family,
        reason,
    };

    // Try parsing as IP address first
    if let Ok(ip) = host.parse::<IpAddr>() {
        if family.matches(&ip) {
            return Ok(Target::new(host.to_string(), ip));
        }
        return Err(fail(format!("{} is not an {} address", ip, family)));
    }

    let addrs: Vec<IpAddr> = format!("{}:0", host)
        .to_socket_addrs()
        .map_err(|e| fail(e.to_string()))?
        .map(|s| s.ip())
        .collect();

    debug!(host, candidates = ?addrs, "resolved host");

    if addrs.is_empty() {
        return Err(fail("no addresses found for hostname".into()));
    }

    addrs
        .into_iter()
        .find(|ip| family.matches(ip))
        .map(|ip| Target::new(host.to_string(), ip))
        .ok_or_else(|| fail(format!("no {} addresses found", family)))
}
