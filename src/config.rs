use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

use tracing::warn;

use crate::cli::Args;
use crate::probe::ICMP_HEADER_SIZE;

/// IP family selected for the run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IpFamily {
    #[default]
    V4,
    V6,
}

impl IpFamily {
    pub fn is_ipv6(self) -> bool {
        matches!(self, IpFamily::V6)
    }

    /// True if `addr` belongs to this family
    pub fn matches(self, addr: &IpAddr) -> bool {
        match self {
            IpFamily::V4 => addr.is_ipv4(),
            IpFamily::V6 => addr.is_ipv6(),
        }
    }
}

impl fmt::Display for IpFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpFamily::V4 => f.write_str("IPv4"),
            IpFamily::V6 => f.write_str("IPv6"),
        }
    }
}

/// Default ICMP message size (header included), as sent by the classic client
pub const DEFAULT_PAYLOAD_SIZE: usize = 32;
/// Default time-to-live / hop limit
pub const DEFAULT_TTL: u8 = 64;

/// Session configuration, built once before the loop starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Number of echo requests to resolve before stopping (None = until interrupted)
    pub count: Option<u64>,
    /// Spacing between consecutive sends
    pub interval: Duration,
    /// How long to wait for a reply after each send
    pub timeout: Duration,
    /// ICMP message size in bytes, 8-byte echo header included
    pub payload_size: usize,
    /// Time-to-live (IPv4) or hop limit (IPv6) applied to the socket
    pub ttl: u8,
    pub family: IpFamily,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            count: None,
            interval: Duration::from_millis(1000),
            timeout: Duration::from_millis(1000),
            payload_size: DEFAULT_PAYLOAD_SIZE,
            ttl: DEFAULT_TTL,
            family: IpFamily::V4,
        }
    }
}

impl SessionConfig {
    /// Floor the payload size at the echo header size
    ///
    /// Applied once when a session is created, whatever built the config.
    pub fn normalized(mut self) -> Self {
        if self.payload_size < ICMP_HEADER_SIZE {
            warn!(
                requested = self.payload_size,
                effective = ICMP_HEADER_SIZE,
                "payload size below echo header size, clamping"
            );
            self.payload_size = ICMP_HEADER_SIZE;
        }
        self
    }
}

impl From<&Args> for SessionConfig {
    fn from(args: &Args) -> Self {
        Self {
            count: if args.count == 0 { None } else { Some(args.count) },
            interval: args.interval_duration(),
            timeout: args.timeout_duration(),
            payload_size: args.size,
            // Range is checked by Args::validate
            ttl: u8::try_from(args.ttl).unwrap_or(DEFAULT_TTL),
            family: if args.ipv6 { IpFamily::V6 } else { IpFamily::V4 },
        }
    }
}
