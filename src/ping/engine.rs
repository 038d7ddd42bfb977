use std::io::Write;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::config::{IpFamily, SessionConfig};
use crate::error::{PingError, Result};
use crate::export::{format_ms, write_report};
use crate::ping::transport::EchoTransport;
use crate::probe::{
    ICMPV6_ECHO_REQUEST, IcmpSocket, build_echo_request, decode_reply_with_hop_limit,
    process_identifier,
};
use crate::state::{EchoId, EchoOutcome, RunningStats, SessionState, Target};

/// Large enough for any IPv4 datagram
const RECV_BUFFER_SIZE: usize = 65536;

/// ICMPv4 Echo Request type, seen when the target is a local address
const ICMP_ECHO_REQUEST: u8 = 8;

/// How a reply wait ended
enum Wait {
    /// Reply, ICMP error or deadline: the request is resolved
    Resolved,
    Interrupted,
}

/// Drives one ping run against a single target
///
/// Owns the transport, the identifier and the statistics. `run` is the only
/// place that mutates the statistics and the only place that renders them.
pub struct PingSession<T> {
    config: SessionConfig,
    target: Target,
    identifier: u16,
    transport: T,
    stats: RunningStats,
    state: SessionState,
    cancel: CancellationToken,
    next_sequence: u16,
}

impl PingSession<IcmpSocket> {
    /// Open a raw ICMP socket for the configured family and TTL
    pub fn open(target: Target, config: SessionConfig, cancel: CancellationToken) -> Result<Self> {
        let socket = IcmpSocket::open(config.family, config.ttl)?;
        Ok(Self::with_transport(target, config, socket, cancel))
    }
}

impl<T: EchoTransport> PingSession<T> {
    pub fn with_transport(
        target: Target,
        config: SessionConfig,
        transport: T,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config: config.normalized(),
            target,
            identifier: process_identifier(),
            transport,
            stats: RunningStats::new(),
            state: SessionState::Idle,
            cancel,
            next_sequence: 1,
        }
    }

    /// Override the echo identifier (defaults to the low 16 bits of the pid)
    pub fn with_identifier(mut self, identifier: u16) -> Self {
        self.identifier = identifier;
        self
    }

    pub fn identifier(&self) -> u16 {
        self.identifier
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn stats(&self) -> &RunningStats {
        &self.stats
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Run the send/receive loop until the count is reached, the token is
    /// cancelled or a fatal error occurs, writing progress and the final
    /// report to `out`.
    ///
    /// Returns the terminal state; on a fatal error the state is
    /// [`SessionState::Failed`] and the error is returned instead.
    pub async fn run<W: Write>(&mut self, out: &mut W) -> Result<SessionState> {
        if self.state.is_terminal() {
            return Ok(self.state);
        }
        self.state = SessionState::Running;

        let result = self.run_loop(out).await;
        let state = match &result {
            Ok(state) => *state,
            Err(_) => SessionState::Failed,
        };
        self.state = state;

        // Partial statistics are still worth showing after a mid-run failure
        if state != SessionState::Failed || self.stats.sent() > 0 {
            write_report(&self.target, &self.stats.report(), &mut *out)
                .map_err(PingError::Output)?;
        }
        info!(
            ?state,
            sent = self.stats.sent(),
            received = self.stats.received(),
            "session finished"
        );

        result
    }

    async fn run_loop<W: Write>(&mut self, out: &mut W) -> Result<SessionState> {
        writeln!(
            out,
            "Pinging {} with {} bytes of data:",
            self.announce_name(),
            self.config.payload_size
        )
        .map_err(PingError::Output)?;

        let mut buffer = vec![0u8; RECV_BUFFER_SIZE];

        loop {
            if self.cancel.is_cancelled() {
                return Ok(SessionState::Interrupted);
            }

            let sequence = self.next_sequence;
            let packet = build_echo_request(
                self.identifier,
                sequence,
                self.config.payload_size,
                self.config.family,
            );

            let sent_at = Instant::now();
            if let Err(e) = self.transport.send_to(&packet, self.target.resolved) {
                let err = PingError::Send(e);
                debug!(sequence, error = %err, "retrying after interval");
                writeln!(out, "{}", err).map_err(PingError::Output)?;
                if !self.pause_until(sent_at + self.config.interval).await {
                    return Ok(SessionState::Interrupted);
                }
                continue;
            }
            self.stats.record_sent();
            // 16-bit on the wire: after 65535 sends the numbers repeat, and a
            // reply 65536 requests late would match the request in flight
            self.next_sequence = sequence.wrapping_add(1);
            trace!(sequence, bytes = packet.len(), "echo request sent");

            let deadline = sent_at + self.config.timeout;
            match self
                .await_reply(sequence, sent_at, deadline, &mut buffer, out)
                .await?
            {
                Wait::Resolved => {}
                Wait::Interrupted => return Ok(SessionState::Interrupted),
            }

            if let Some(count) = self.config.count
                && self.stats.sent() >= count
            {
                return Ok(SessionState::Completed);
            }

            if !self.pause_until(sent_at + self.config.interval).await {
                return Ok(SessionState::Interrupted);
            }
        }
    }

    /// Read datagrams until one resolves `sequence` or the deadline passes
    async fn await_reply<W: Write>(
        &mut self,
        sequence: u16,
        sent_at: Instant,
        deadline: Instant,
        buffer: &mut [u8],
        out: &mut W,
    ) -> Result<Wait> {
        loop {
            let received = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(Wait::Interrupted),
                res = tokio::time::timeout_at(deadline, self.transport.recv(&mut buffer[..])) => res,
            };

            let recv = match received {
                Err(_elapsed) => {
                    self.render(EchoOutcome::Timeout, sequence, out)?;
                    return Ok(Wait::Resolved);
                }
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Ok(Err(e)) => return Err(PingError::Receive(e)),
                Ok(Ok(recv)) => recv,
            };

            let elapsed = sent_at.elapsed();
            let len = recv.len.min(buffer.len());
            let outcome = decode_reply_with_hop_limit(
                &buffer[..len],
                self.config.family,
                self.identifier,
                recv.source,
                elapsed,
                recv.response_ttl,
            )?;

            if self.render(outcome, sequence, out)? {
                return Ok(Wait::Resolved);
            }
        }
    }

    /// Apply one outcome to the statistics and print it
    ///
    /// Returns true when the outcome resolves the in-flight request.
    fn render<W: Write>(&mut self, outcome: EchoOutcome, sequence: u16, out: &mut W) -> Result<bool> {
        let resolved = match outcome {
            EchoOutcome::Reply {
                size,
                sequence: seq,
                ttl,
                rtt,
                ..
            } if seq == sequence => {
                self.stats.record(rtt);
                let ttl = ttl.map(|t| format!(" ttl={}", t)).unwrap_or_default();
                writeln!(
                    out,
                    "{} bytes from {}: icmp_seq={}{} time={} ms",
                    size,
                    self.reply_name(),
                    seq,
                    ttl,
                    format_ms(rtt)
                )
                .map_err(PingError::Output)?;
                true
            }
            EchoOutcome::Reply {
                responder,
                sequence: seq,
                ..
            } => {
                debug!(seq, expected = sequence, "late reply");
                writeln!(out, "Late reply from {} for icmp_seq={}, ignored", responder, seq)
                    .map_err(PingError::Output)?;
                false
            }
            EchoOutcome::ForeignReply {
                responder,
                identifier,
                sequence: seq,
            } => {
                writeln!(
                    out,
                    "Not our echo reply from {} (id={}, icmp_seq={})",
                    responder, identifier, seq
                )
                .map_err(PingError::Output)?;
                false
            }
            EchoOutcome::Unrecognized {
                responder,
                icmp_type,
            } => {
                if self.is_own_request(icmp_type) {
                    debug!(%responder, icmp_type, "looped back echo request");
                } else {
                    writeln!(
                        out,
                        "Unexpected ICMP message type {} from {}",
                        icmp_type, responder
                    )
                    .map_err(PingError::Output)?;
                }
                false
            }
            ref err @ (EchoOutcome::Unreachable { .. } | EchoOutcome::TimeExceeded { .. })
                if !err.concerns(self.identifier) =>
            {
                debug!(?err, "ICMP error for another process");
                false
            }
            EchoOutcome::Unreachable {
                responder,
                code,
                quoted,
            } => {
                let reason = unreachable_reason(self.config.family, code);
                self.render_icmp_error(responder, quoted, reason, sequence, out)?
            }
            EchoOutcome::TimeExceeded {
                responder, quoted, ..
            } => {
                let reason = match self.config.family {
                    IpFamily::V4 => "Time to live exceeded",
                    IpFamily::V6 => "Hop limit exceeded",
                };
                self.render_icmp_error(responder, quoted, reason, sequence, out)?
            }
            EchoOutcome::Timeout => {
                writeln!(out, "Request timeout for icmp_seq={}", sequence)
                    .map_err(PingError::Output)?;
                true
            }
        };
        Ok(resolved)
    }

    /// Print an ICMP error about one of our requests
    ///
    /// Only an error quoting the in-flight sequence (or quoting nothing)
    /// resolves the wait; one about an earlier request is reported and skipped.
    fn render_icmp_error<W: Write>(
        &self,
        responder: std::net::IpAddr,
        quoted: Option<EchoId>,
        reason: &str,
        sequence: u16,
        out: &mut W,
    ) -> Result<bool> {
        let seq = quoted.map_or(sequence, |q| q.sequence);
        if seq != sequence {
            debug!(seq, expected = sequence, "ICMP error for an earlier request");
            writeln!(
                out,
                "From {} icmp_seq={}: {} (earlier request, ignored)",
                responder, seq, reason
            )
            .map_err(PingError::Output)?;
            return Ok(false);
        }
        writeln!(out, "From {} icmp_seq={}: {}", responder, seq, reason)
            .map_err(PingError::Output)?;
        Ok(true)
    }

    /// Wait until `deadline`; false if cancelled first
    async fn pause_until(&self, deadline: Instant) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep_until(deadline) => true,
        }
    }

    fn is_own_request(&self, icmp_type: u8) -> bool {
        match self.config.family {
            IpFamily::V4 => icmp_type == ICMP_ECHO_REQUEST,
            IpFamily::V6 => icmp_type == ICMPV6_ECHO_REQUEST,
        }
    }

    fn announce_name(&self) -> String {
        if self.target.original == self.target.resolved.to_string() {
            self.target.original.clone()
        } else {
            format!("{} [{}]", self.target.original, self.target.resolved)
        }
    }

    fn reply_name(&self) -> String {
        self.target.display_name()
    }
}

/// Human-readable Destination Unreachable code
pub fn unreachable_reason(family: IpFamily, code: u8) -> &'static str {
    match (family, code) {
        (IpFamily::V4, 0) => "Destination network unreachable",
        (IpFamily::V4, 1) => "Destination host unreachable",
        (IpFamily::V4, 2) => "Destination protocol unreachable",
        (IpFamily::V4, 3) => "Destination port unreachable",
        (IpFamily::V4, 4) => "Fragmentation needed",
        (IpFamily::V4, 6) => "Destination network unknown",
        (IpFamily::V4, 7) => "Destination host unknown",
        (IpFamily::V4, 9 | 10 | 13) => "Communication administratively prohibited",
        (IpFamily::V6, 0) => "No route to destination",
        (IpFamily::V6, 1) => "Communication administratively prohibited",
        (IpFamily::V6, 2) => "Beyond scope of source address",
        (IpFamily::V6, 3) => "Destination address unreachable",
        (IpFamily::V6, 4) => "Destination port unreachable",
        _ => "Destination unreachable",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{ICMP_HEADER_SIZE, RecvResult, echo_fields};
    use std::collections::VecDeque;
    use std::io;
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;

    const ID: u16 = 0x4242;
    const TARGET: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 1);
    const ROUTER: Ipv4Addr = Ipv4Addr::new(198, 51, 100, 1);

    type Responder = Box<dyn FnMut(u16, u16, &[u8]) -> Vec<(Duration, Vec<u8>)>>;

    struct Scheduled {
        deliver_at: Instant,
        data: Vec<u8>,
    }

    /// In-memory transport answering each request from a closure
    struct ScriptedTransport {
        respond: Responder,
        inbox: VecDeque<Scheduled>,
        sent: Vec<u16>,
        fail_sends: usize,
    }

    impl ScriptedTransport {
        fn new(respond: Responder) -> Self {
            Self {
                respond,
                inbox: VecDeque::new(),
                sent: Vec::new(),
                fail_sends: 0,
            }
        }

        fn silent() -> Self {
            Self::new(Box::new(|_, _, _| Vec::new()))
        }

        fn echoing(delay: Duration) -> Self {
            Self::new(Box::new(move |_, _, request| {
                vec![(delay, reply_for(request))]
            }))
        }
    }

    impl EchoTransport for ScriptedTransport {
        fn send_to(&mut self, packet: &[u8], _target: IpAddr) -> io::Result<usize> {
            if self.fail_sends > 0 {
                self.fail_sends -= 1;
                return Err(io::Error::from(io::ErrorKind::NetworkUnreachable));
            }
            let (identifier, sequence) = echo_fields(packet).unwrap();
            self.sent.push(sequence);
            let now = Instant::now();
            for (delay, data) in (self.respond)(identifier, sequence, packet) {
                self.inbox.push_back(Scheduled {
                    deliver_at: now + delay,
                    data,
                });
            }
            self.inbox.make_contiguous().sort_by_key(|s| s.deliver_at);
            Ok(packet.len())
        }

        async fn recv(&mut self, buffer: &mut [u8]) -> io::Result<RecvResult> {
            let Some(deliver_at) = self.inbox.front().map(|s| s.deliver_at) else {
                return std::future::pending().await;
            };
            tokio::time::sleep_until(deliver_at).await;
            let next = self.inbox.pop_front().unwrap();
            buffer[..next.data.len()].copy_from_slice(&next.data);
            let d = &next.data;
            Ok(RecvResult {
                len: d.len(),
                source: IpAddr::V4(Ipv4Addr::new(d[12], d[13], d[14], d[15])),
                response_ttl: None,
            })
        }
    }

    fn ipv4_wrap(src: Ipv4Addr, icmp: &[u8]) -> Vec<u8> {
        let mut packet = vec![0u8; 20];
        packet[0] = 0x45;
        packet[2..4].copy_from_slice(&((20 + icmp.len()) as u16).to_be_bytes());
        packet[8] = 57;
        packet[9] = 1;
        packet[12..16].copy_from_slice(&src.octets());
        packet.extend_from_slice(icmp);
        packet
    }

    fn reply_for(request: &[u8]) -> Vec<u8> {
        let mut icmp = request.to_vec();
        icmp[0] = 0;
        ipv4_wrap(TARGET, &icmp)
    }

    fn foreign_reply(request: &[u8]) -> Vec<u8> {
        let mut icmp = request.to_vec();
        icmp[0] = 0;
        icmp[4] ^= 0xFF;
        ipv4_wrap(TARGET, &icmp)
    }

    fn icmp_error_for(icmp_type: u8, code: u8, request: &[u8]) -> Vec<u8> {
        let quoted = ipv4_wrap(Ipv4Addr::new(192, 0, 2, 100), request);
        let mut icmp = vec![icmp_type, code, 0, 0, 0, 0, 0, 0];
        icmp.extend_from_slice(&quoted[..28]);
        ipv4_wrap(ROUTER, &icmp)
    }

    fn time_exceeded_for(request: &[u8]) -> Vec<u8> {
        icmp_error_for(11, 0, request)
    }

    fn config(count: u64, interval_ms: u64, timeout_ms: u64) -> SessionConfig {
        SessionConfig {
            count: Some(count),
            interval: Duration::from_millis(interval_ms),
            timeout: Duration::from_millis(timeout_ms),
            ..SessionConfig::default()
        }
    }

    fn session(config: SessionConfig, transport: ScriptedTransport) -> PingSession<ScriptedTransport> {
        let target = Target::new("example.test".into(), IpAddr::V4(TARGET));
        PingSession::with_transport(target, config, transport, CancellationToken::new())
            .with_identifier(ID)
    }

    async fn run_to_string(session: &mut PingSession<ScriptedTransport>) -> (Result<SessionState>, String) {
        let mut out = Vec::new();
        let result = session.run(&mut out).await;
        (result, String::from_utf8(out).unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_target_terminates_after_count() {
        let mut session = session(config(3, 200, 100), ScriptedTransport::silent());
        let start = Instant::now();

        let (result, out) = run_to_string(&mut session).await;

        assert_eq!(result.unwrap(), SessionState::Completed);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(500), "{:?}", elapsed);
        assert!(elapsed <= Duration::from_millis(600), "{:?}", elapsed);
        assert_eq!(session.stats().sent(), 3);
        assert_eq!(session.stats().received(), 0);
        assert_eq!(session.stats().loss_pct(), 100.0);
        assert_eq!(out.matches("Request timeout for icmp_seq=").count(), 3);
        assert!(out.contains("3 packets transmitted, 0 received, 100% packet loss"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_replying_target_counts_every_reply() {
        let transport = ScriptedTransport::echoing(Duration::from_millis(20));
        let mut session = session(config(5, 1000, 1000), transport);

        let (result, out) = run_to_string(&mut session).await;

        assert_eq!(result.unwrap(), SessionState::Completed);
        assert_eq!(session.state(), SessionState::Completed);
        assert_eq!(session.stats().sent(), 5);
        assert_eq!(session.stats().received(), 5);
        assert_eq!(session.transport().sent, vec![1, 2, 3, 4, 5]);
        for seq in 1..=5 {
            assert!(out.contains(&format!(
                "32 bytes from example.test (192.0.2.1): icmp_seq={} ttl=57 time=20.000 ms",
                seq
            )));
        }
        assert_eq!(out.matches("ping statistics").count(), 1);
        assert!(out.starts_with("Pinging example.test [192.0.2.1] with 32 bytes of data:\n"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_measured_from_send() {
        let transport = ScriptedTransport::echoing(Duration::from_millis(300));
        let mut session = session(config(3, 1000, 1000), transport);
        let start = Instant::now();

        let (result, _) = run_to_string(&mut session).await;

        assert_eq!(result.unwrap(), SessionState::Completed);
        // Sends at 0, 1000, 2000; last reply at 2300
        assert_eq!(start.elapsed(), Duration::from_millis(2300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_foreign_replies_change_nothing() {
        let transport = ScriptedTransport::new(Box::new(|_, _, request| {
            vec![(Duration::from_millis(5), foreign_reply(request))]
        }));
        let mut session = session(config(2, 100, 50), transport);

        let (result, out) = run_to_string(&mut session).await;

        assert_eq!(result.unwrap(), SessionState::Completed);
        assert_eq!(session.stats().sent(), 2);
        assert_eq!(session.stats().received(), 0);
        assert!(session.stats().rtts().is_empty());
        assert_eq!(out.matches("Not our echo reply").count(), 2);
        assert_eq!(out.matches("Request timeout").count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_failure_retries_same_sequence() {
        let mut transport = ScriptedTransport::echoing(Duration::from_millis(1));
        transport.fail_sends = 2;
        let mut session = session(config(2, 100, 50), transport);
        let start = Instant::now();

        let (result, out) = run_to_string(&mut session).await;

        assert_eq!(result.unwrap(), SessionState::Completed);
        assert_eq!(out.matches("Network unreachable: ").count(), 2);
        assert!(!out.contains("Request timeout"));
        assert_eq!(session.transport().sent, vec![1, 2]);
        assert_eq!(session.stats().sent(), 2);
        assert_eq!(session.stats().received(), 2);
        // Two failed attempts each wait one interval
        assert_eq!(start.elapsed(), Duration::from_millis(301));
    }

    #[tokio::test(start_paused = true)]
    async fn test_time_exceeded_ends_wait() {
        let transport = ScriptedTransport::new(Box::new(|_, _, request| {
            vec![(Duration::from_millis(10), time_exceeded_for(request))]
        }));
        let mut session = session(config(1, 100, 500), transport);
        let start = Instant::now();

        let (result, out) = run_to_string(&mut session).await;

        assert_eq!(result.unwrap(), SessionState::Completed);
        assert_eq!(start.elapsed(), Duration::from_millis(10));
        assert!(out.contains("From 198.51.100.1 icmp_seq=1: Time to live exceeded"));
        assert!(!out.contains("Request timeout"));
        assert_eq!(session.stats().received(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_reply_not_counted() {
        // Reply arrives 150ms after send; timeout 100ms, interval 200ms
        let transport = ScriptedTransport::echoing(Duration::from_millis(150));
        let mut session = session(config(2, 200, 100), transport);

        let (result, out) = run_to_string(&mut session).await;

        assert_eq!(result.unwrap(), SessionState::Completed);
        assert_eq!(session.stats().sent(), 2);
        assert_eq!(session.stats().received(), 0);
        assert!(out.contains("Late reply from 192.0.2.1 for icmp_seq=1, ignored"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_decode_failure_fails_with_partial_report() {
        let transport = ScriptedTransport::new(Box::new(|_, sequence, request| {
            if sequence == 1 {
                vec![(Duration::from_millis(5), reply_for(request))]
            } else {
                // Wrong IP version
                vec![(Duration::from_millis(5), vec![0x60; 28])]
            }
        }));
        let mut session = session(config(5, 100, 50), transport);

        let (result, out) = run_to_string(&mut session).await;

        assert!(matches!(result, Err(PingError::Decode(_))));
        assert_eq!(session.state(), SessionState::Failed);
        assert_eq!(session.stats().sent(), 2);
        assert_eq!(session.stats().received(), 1);
        assert!(out.contains("2 packets transmitted, 1 received, 50% packet loss"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_mid_wait() {
        let transport = ScriptedTransport::echoing(Duration::from_millis(300));
        let cancel = CancellationToken::new();
        let target = Target::new("192.0.2.1".into(), IpAddr::V4(TARGET));
        let mut session = PingSession::with_transport(
            target,
            SessionConfig {
                count: None,
                interval: Duration::from_millis(1000),
                timeout: Duration::from_millis(500),
                ..SessionConfig::default()
            },
            transport,
            cancel.clone(),
        )
        .with_identifier(ID);

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(2100)).await;
            cancel.cancel();
        });

        let (result, out) = run_to_string(&mut session).await;
        canceller.await.unwrap();

        assert_eq!(result.unwrap(), SessionState::Interrupted);
        assert_eq!(session.stats().sent(), 3);
        assert_eq!(session.stats().received(), 2);
        assert_eq!(session.stats().rtts().len(), 2);
        assert!(out.starts_with("Pinging 192.0.2.1 with 32 bytes of data:\n"));
        assert!(out.contains("3 packets transmitted, 2 received"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_start_sends_nothing() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let target = Target::new("example.test".into(), IpAddr::V4(TARGET));
        let mut session = PingSession::with_transport(
            target,
            config(3, 100, 100),
            ScriptedTransport::silent(),
            cancel,
        );

        let (result, out) = run_to_string(&mut session).await;

        assert_eq!(result.unwrap(), SessionState::Interrupted);
        assert!(session.transport().sent.is_empty());
        assert!(out.contains("0 packets transmitted, 0 received, 100% packet loss"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_twice_is_noop() {
        let mut session = session(config(1, 10, 10), ScriptedTransport::silent());
        let (first, _) = run_to_string(&mut session).await;
        let (second, out) = run_to_string(&mut session).await;
        assert_eq!(first.unwrap(), SessionState::Completed);
        assert_eq!(second.unwrap(), SessionState::Completed);
        assert!(out.is_empty());
        assert_eq!(session.stats().sent(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_for_earlier_request_does_not_resolve_current() {
        // seq 1 times out; its Time Exceeded shows up during seq 2's wait
        let transport = ScriptedTransport::new(Box::new(|_, sequence, request| {
            if sequence == 1 {
                vec![(Duration::from_millis(210), time_exceeded_for(request))]
            } else {
                vec![(Duration::from_millis(30), reply_for(request))]
            }
        }));
        let mut session = session(config(2, 200, 100), transport);

        let (result, out) = run_to_string(&mut session).await;

        assert_eq!(result.unwrap(), SessionState::Completed);
        assert_eq!(session.stats().sent(), 2);
        assert_eq!(session.stats().received(), 1);
        assert!(out.contains("Request timeout for icmp_seq=1"));
        assert!(out.contains(
            "From 198.51.100.1 icmp_seq=1: Time to live exceeded (earlier request, ignored)"
        ));
        assert!(out.contains("icmp_seq=2 ttl=57 time=30.000 ms"));
        assert!(!out.contains("icmp_seq=2: Time to live exceeded"));
        assert!(out.contains("2 packets transmitted, 1 received, 50% packet loss"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_ends_wait() {
        let transport = ScriptedTransport::new(Box::new(|_, _, request| {
            vec![(Duration::from_millis(15), icmp_error_for(3, 1, request))]
        }));
        let mut session = session(config(2, 100, 500), transport);
        let start = Instant::now();

        let (result, out) = run_to_string(&mut session).await;

        assert_eq!(result.unwrap(), SessionState::Completed);
        // Second request sent at 100, its error at 115
        assert_eq!(start.elapsed(), Duration::from_millis(115));
        assert!(out.contains("From 198.51.100.1 icmp_seq=1: Destination host unreachable"));
        assert!(out.contains("From 198.51.100.1 icmp_seq=2: Destination host unreachable"));
        assert!(!out.contains("Request timeout"));
        assert_eq!(session.stats().sent(), 2);
        assert_eq!(session.stats().received(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_for_another_process_is_ignored() {
        let transport = ScriptedTransport::new(Box::new(|_, _, request| {
            let mut theirs = request.to_vec();
            theirs[4] ^= 0xFF;
            vec![
                (Duration::from_millis(5), time_exceeded_for(&theirs)),
                (Duration::from_millis(20), reply_for(request)),
            ]
        }));
        let mut session = session(config(1, 100, 500), transport);
        let start = Instant::now();

        let (result, out) = run_to_string(&mut session).await;

        assert_eq!(result.unwrap(), SessionState::Completed);
        // The wait continued past the foreign error up to the reply
        assert_eq!(start.elapsed(), Duration::from_millis(20));
        assert!(!out.contains("Time to live exceeded"));
        assert_eq!(session.stats().sent(), 1);
        assert_eq!(session.stats().received(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrecognized_types_keep_waiting() {
        let transport = ScriptedTransport::new(Box::new(|_, _, request| {
            // Timestamp request, then our own request looped back
            let timestamp = ipv4_wrap(TARGET, &[13, 0, 0, 0, 0, 0, 0, 0]);
            vec![
                (Duration::from_millis(5), timestamp),
                (Duration::from_millis(6), ipv4_wrap(TARGET, request)),
            ]
        }));
        let mut session = session(config(1, 100, 50), transport);

        let (result, out) = run_to_string(&mut session).await;

        assert_eq!(result.unwrap(), SessionState::Completed);
        assert!(out.contains("Unexpected ICMP message type 13 from 192.0.2.1"));
        assert!(!out.contains("type 8"));
        assert!(out.contains("Request timeout for icmp_seq=1"));
        assert_eq!(session.stats().received(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequence_wraps_after_u16_max() {
        let transport = ScriptedTransport::echoing(Duration::from_millis(1));
        let mut session = session(config(2, 10, 5), transport);
        session.next_sequence = u16::MAX;

        let (result, out) = run_to_string(&mut session).await;

        assert_eq!(result.unwrap(), SessionState::Completed);
        assert_eq!(session.transport().sent, vec![u16::MAX, 0]);
        assert_eq!(session.stats().received(), 2);
        assert!(out.contains("icmp_seq=0 ttl=57"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_small_payload_normalized_once() {
        let transport = ScriptedTransport::echoing(Duration::from_millis(1));
        let config = SessionConfig {
            payload_size: 5,
            ..config(2, 10, 5)
        };
        let mut session = session(config, transport);
        assert_eq!(session.config().payload_size, ICMP_HEADER_SIZE);

        let (_, out) = run_to_string(&mut session).await;

        assert!(out.starts_with("Pinging example.test [192.0.2.1] with 8 bytes of data:\n"));
        assert!(out.contains("8 bytes from example.test (192.0.2.1): icmp_seq=1"));
    }

    #[test]
    fn test_unreachable_reason() {
        assert_eq!(unreachable_reason(IpFamily::V4, 1), "Destination host unreachable");
        assert_eq!(unreachable_reason(IpFamily::V6, 4), "Destination port unreachable");
        assert_eq!(unreachable_reason(IpFamily::V4, 200), "Destination unreachable");
    }
}
