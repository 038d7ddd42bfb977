use pnet::packet::icmp::{IcmpPacket, IcmpTypes};
use pnet::packet::ipv4::Ipv4Packet;
use std::net::IpAddr;
use std::time::Duration;

use crate::config::IpFamily;
use crate::error::{PingError, Result};
use crate::probe::icmp::{ICMP_HEADER_SIZE, ICMPV6_ECHO_REQUEST, echo_fields};
use crate::state::{EchoId, EchoOutcome};

// IP protocol numbers
const IPPROTO_ICMP: u8 = 1;
const IPPROTO_ICMPV6: u8 = 58;

// ICMPv4 Echo Request type (for error payload validation)
const ICMP_ECHO_REQUEST: u8 = 8;

// ICMPv6 type codes
const ICMPV6_DEST_UNREACHABLE: u8 = 1;
const ICMPV6_TIME_EXCEEDED: u8 = 3;
const ICMPV6_ECHO_REPLY: u8 = 129;

const IPV4_MIN_HEADER: usize = 20;
const IPV6_HEADER: usize = 40;

/// Classify one datagram read from the ICMP socket
///
/// IPv4 raw sockets hand us the IP header; ICMPv6 raw sockets deliver the
/// ICMP message only. `elapsed` is the time since the in-flight request was
/// sent and becomes the RTT of a matching reply.
///
/// Malformed input (empty, truncated, wrong IP version) is an error: the
/// socket is not supposed to deliver it.
pub fn decode_reply(
    data: &[u8],
    family: IpFamily,
    our_identifier: u16,
    responder: IpAddr,
    elapsed: Duration,
) -> Result<EchoOutcome> {
    if data.is_empty() {
        return Err(PingError::Decode("empty datagram".into()));
    }

    match family {
        IpFamily::V4 => decode_v4(data, our_identifier, responder, elapsed),
        IpFamily::V6 => decode_v6(data, our_identifier, responder, elapsed, None),
    }
}

/// Parse IPv4 datagram (IP header + ICMP message)
fn decode_v4(
    data: &[u8],
    our_identifier: u16,
    responder: IpAddr,
    elapsed: Duration,
) -> Result<EchoOutcome> {
    let ip_packet = Ipv4Packet::new(data).ok_or_else(|| {
        PingError::Decode(format!("truncated IPv4 header ({} bytes)", data.len()))
    })?;

    if ip_packet.get_version() != 4 {
        return Err(PingError::Decode(format!(
            "unexpected IP version {}",
            ip_packet.get_version()
        )));
    }

    let ip_header_len = (ip_packet.get_header_length() as usize) * 4;
    if ip_header_len < IPV4_MIN_HEADER {
        return Err(PingError::Decode(format!(
            "invalid IPv4 header length {}",
            ip_header_len
        )));
    }
    if data.len() < ip_header_len + ICMP_HEADER_SIZE {
        return Err(PingError::Decode(format!(
            "truncated ICMP message ({} bytes after {}-byte IP header)",
            data.len().saturating_sub(ip_header_len),
            ip_header_len
        )));
    }

    let icmp_data = &data[ip_header_len..];
    let icmp_packet = IcmpPacket::new(icmp_data)
        .ok_or_else(|| PingError::Decode("truncated ICMP header".into()))?;
    let code = icmp_packet.get_icmp_code().0;

    let outcome = match icmp_packet.get_icmp_type() {
        IcmpTypes::EchoReply => {
            echo_outcome(icmp_data, our_identifier, responder, elapsed, Some(ip_packet.get_ttl()))
        }
        IcmpTypes::DestinationUnreachable => EchoOutcome::Unreachable {
            responder,
            code,
            quoted: quoted_request_v4(&icmp_data[ICMP_HEADER_SIZE..]),
        },
        IcmpTypes::TimeExceeded => EchoOutcome::TimeExceeded {
            responder,
            code,
            quoted: quoted_request_v4(&icmp_data[ICMP_HEADER_SIZE..]),
        },
        other => EchoOutcome::Unrecognized {
            responder,
            icmp_type: other.0,
        },
    };

    Ok(outcome)
}

/// Parse ICMPv6 message (no IP header)
///
/// `hop_limit` comes from ancillary data when the caller has it.
fn decode_v6(
    data: &[u8],
    our_identifier: u16,
    responder: IpAddr,
    elapsed: Duration,
    hop_limit: Option<u8>,
) -> Result<EchoOutcome> {
    if data.len() < ICMP_HEADER_SIZE {
        return Err(PingError::Decode(format!(
            "truncated ICMPv6 message ({} bytes)",
            data.len()
        )));
    }

    let icmp_type = data[0];
    let code = data[1];

    let outcome = match icmp_type {
        ICMPV6_ECHO_REPLY => echo_outcome(data, our_identifier, responder, elapsed, hop_limit),
        ICMPV6_DEST_UNREACHABLE => EchoOutcome::Unreachable {
            responder,
            code,
            quoted: quoted_request_v6(&data[ICMP_HEADER_SIZE..]),
        },
        ICMPV6_TIME_EXCEEDED => EchoOutcome::TimeExceeded {
            responder,
            code,
            quoted: quoted_request_v6(&data[ICMP_HEADER_SIZE..]),
        },
        other => EchoOutcome::Unrecognized {
            responder,
            icmp_type: other,
        },
    };

    Ok(outcome)
}

/// Echo reply: ours if the identifier matches, foreign otherwise
fn echo_outcome(
    icmp_data: &[u8],
    our_identifier: u16,
    responder: IpAddr,
    elapsed: Duration,
    ttl: Option<u8>,
) -> EchoOutcome {
    // Callers have already checked the header length
    let (identifier, sequence) = echo_fields(icmp_data).unwrap_or_default();

    if identifier == our_identifier {
        EchoOutcome::Reply {
            responder,
            size: icmp_data.len(),
            sequence,
            ttl,
            rtt: elapsed,
        }
    } else {
        EchoOutcome::ForeignReply {
            responder,
            identifier,
            sequence,
        }
    }
}

/// Extract the echo request quoted in an ICMPv4 error payload
///
/// The payload is the original IP header followed by at least the first
/// 8 bytes of the original ICMP message.
fn quoted_request_v4(payload: &[u8]) -> Option<EchoId> {
    let original = Ipv4Packet::new(payload)?;
    if original.get_version() != 4 || original.get_next_level_protocol().0 != IPPROTO_ICMP {
        return None;
    }

    let header_len = (original.get_header_length() as usize) * 4;
    if header_len < IPV4_MIN_HEADER {
        return None;
    }

    let icmp = payload.get(header_len..)?;
    if icmp.first() != Some(&ICMP_ECHO_REQUEST) {
        return None;
    }
    echo_fields(icmp).map(|(identifier, sequence)| EchoId::new(identifier, sequence))
}

/// Extract the echo request quoted in an ICMPv6 error payload
///
/// Only a quote whose next header is ICMPv6 directly is understood;
/// extension headers in the quoted packet are not walked.
fn quoted_request_v6(payload: &[u8]) -> Option<EchoId> {
    if payload.len() < IPV6_HEADER + ICMP_HEADER_SIZE {
        return None;
    }
    if payload[0] >> 4 != 6 || payload[6] != IPPROTO_ICMPV6 {
        return None;
    }

    let icmp = &payload[IPV6_HEADER..];
    if icmp[0] != ICMPV6_ECHO_REQUEST {
        return None;
    }
    echo_fields(icmp).map(|(identifier, sequence)| EchoId::new(identifier, sequence))
}

/// Decode variant for IPv6 that also carries the hop limit from ancillary data
pub fn decode_reply_with_hop_limit(
    data: &[u8],
    family: IpFamily,
    our_identifier: u16,
    responder: IpAddr,
    elapsed: Duration,
    hop_limit: Option<u8>,
) -> Result<EchoOutcome> {
    match family {
        IpFamily::V6 if !data.is_empty() => {
            decode_v6(data, our_identifier, responder, elapsed, hop_limit)
        }
        _ => decode_reply(data, family, our_identifier, responder, elapsed).map(|outcome| {
            // IPv4 header TTL wins; ancillary data only fills a gap
            match outcome {
                EchoOutcome::Reply {
                    responder,
                    size,
                    sequence,
                    ttl,
                    rtt,
                } => EchoOutcome::Reply {
                    responder,
                    size,
                    sequence,
                    ttl: ttl.or(hop_limit),
                    rtt,
                },
                other => other,
            }
        }),
    }
}
