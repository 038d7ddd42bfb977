use std::io;

use thiserror::Error;

use crate::config::IpFamily;

/// Failures surfaced by the ping engine and its collaborators
#[derive(Debug, Error)]
pub enum PingError {
    #[error("cannot resolve {host} to an {family} address: {reason}")]
    Resolution {
        host: String,
        family: IpFamily,
        reason: String,
    },

    #[error(
        "cannot open raw ICMP socket: {0}\n\n\
         Fix options:\n\
         \u{2022} Run with sudo: sudo echoping <host>\n\
         \u{2022} Add capability: sudo setcap cap_net_raw+ep <path to echoping>"
    )]
    Socket(#[source] io::Error),

    /// Reported and retried after one interval; never ends the session
    #[error("Network unreachable: {0}")]
    Send(#[source] io::Error),

    #[error("malformed ICMP message: {0}")]
    Decode(String),

    #[error("receive failed: {0}")]
    Receive(#[source] io::Error),

    #[error("cannot write output: {0}")]
    Output(#[source] io::Error),
}

pub type Result<T> = std::result::Result<T, PingError>;
