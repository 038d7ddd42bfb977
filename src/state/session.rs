use std::net::IpAddr;
use std::time::Duration;

/// Host being pinged
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Host as given on the command line
    pub original: String,
    pub resolved: IpAddr,
}

impl Target {
    pub fn new(original: String, resolved: IpAddr) -> Self {
        Self { original, resolved }
    }

    /// `host (ip)` when the host was a name, bare `ip` otherwise
    pub fn display_name(&self) -> String {
        if self.original == self.resolved.to_string() {
            self.original.clone()
        } else {
            format!("{} ({})", self.original, self.resolved)
        }
    }
}

/// Identifier/sequence pair of an echo request
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub struct EchoId {
    pub identifier: u16,
    pub sequence: u16,
}

impl EchoId {
    pub fn new(identifier: u16, sequence: u16) -> Self {
        Self {
            identifier,
            sequence,
        }
    }
}

/// Classification of one received ICMP message (or of a missed deadline)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EchoOutcome {
    /// Echo reply carrying our identifier
    Reply {
        responder: IpAddr,
        /// ICMP message length in bytes
        size: usize,
        sequence: u16,
        /// TTL / hop limit of the reply, when the socket exposes it
        ttl: Option<u8>,
        rtt: Duration,
    },
    /// Destination Unreachable; `quoted` is the request it refers to, if readable
    Unreachable {
        responder: IpAddr,
        code: u8,
        quoted: Option<EchoId>,
    },
    /// Time Exceeded in transit
    TimeExceeded {
        responder: IpAddr,
        code: u8,
        quoted: Option<EchoId>,
    },
    /// Echo reply belonging to another process on this host
    ForeignReply {
        responder: IpAddr,
        identifier: u16,
        sequence: u16,
    },
    Timeout,
    /// Any other ICMP message type
    Unrecognized { responder: IpAddr, icmp_type: u8 },
}

impl EchoOutcome {
    /// True if an ICMP error message refers to a request carrying `identifier`
    ///
    /// Errors without a readable quote are attributed to us.
    pub fn concerns(&self, identifier: u16) -> bool {
        match self {
            EchoOutcome::Unreachable { quoted, .. } | EchoOutcome::TimeExceeded { quoted, .. } => {
                quoted.is_none_or(|q| q.identifier == identifier)
            }
            EchoOutcome::Reply { .. } | EchoOutcome::Timeout => true,
            EchoOutcome::ForeignReply { .. } | EchoOutcome::Unrecognized { .. } => false,
        }
    }
}

/// Lifecycle of a ping session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
    /// Requested count reached
    Completed,
    /// Stopped by an external signal
    Interrupted,
    /// Stopped by a non-recoverable error
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Interrupted | SessionState::Failed
        )
    }
}
