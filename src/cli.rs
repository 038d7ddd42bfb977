use clap::Parser;
use std::ffi::OsString;
use std::time::Duration;

/// ICMP echo client: per-packet round-trip times and loss statistics
#[derive(Parser, Debug, Clone)]
#[command(name = "echoping")]
#[command(author, version, about, long_about = None)]
#[command(after_help = "Example:\n  echoping -c 7 -i 1200 example.com")]
pub struct Args {
    /// Host to ping (IP address or hostname)
    pub host: Option<String>,

    /// Number of echo requests to send (0 = until interrupted)
    #[arg(short = 'c', long = "count", default_value = "0")]
    pub count: u64,

    /// Interval between echo requests in milliseconds
    #[arg(short = 'i', long = "interval", default_value = "1000")]
    pub interval: u64,

    /// Time to wait for a reply in milliseconds
    #[arg(short = 't', long = "timeout", default_value = "1000")]
    pub timeout: u64,

    /// ICMP message size in bytes, 8-byte header included (minimum 8)
    #[arg(short = 's', long = "size", default_value = "32")]
    pub size: usize,

    /// Time-to-live / hop limit of outgoing packets (also accepted as -ttl)
    #[arg(long = "ttl", default_value = "64", allow_negative_numbers = true)]
    pub ttl: i32,

    /// Use IPv6
    #[arg(short = '6', long = "ipv6")]
    pub ipv6: bool,
}

impl Args {
    /// Parse process arguments, accepting the single-dash `-ttl` spelling
    pub fn parse_normalized() -> Self {
        Self::parse_from(normalize_args(std::env::args_os()))
    }

    /// Get interval as Duration
    pub fn interval_duration(&self) -> Duration {
        Duration::from_millis(self.interval)
    }

    /// Get timeout as Duration
    pub fn timeout_duration(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }

    /// Validate arguments
    pub fn validate(&self) -> Result<(), String> {
        if self.timeout == 0 {
            return Err("Timeout must be positive".into());
        }

        if !(1..=255).contains(&self.ttl) {
            return Err(format!("TTL must be between 1 and 255 (got {})", self.ttl));
        }

        if let Some(ref host) = self.host
            && host.trim().is_empty()
        {
            return Err("Host cannot be empty".into());
        }

        Ok(())
    }
}

/// Rewrite `-ttl` / `-ttl=N` into the `--ttl` form clap understands
pub fn normalize_args<I, T>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    args.into_iter()
        .map(Into::into)
        .map(|arg| match arg.to_str() {
            Some("-ttl") => OsString::from("--ttl"),
            Some(s) if s.starts_with("-ttl=") => OsString::from(format!("-{}", s)),
            _ => arg,
        })
        .collect()
}
