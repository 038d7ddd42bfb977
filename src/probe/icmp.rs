use pnet::packet::MutablePacket;
use pnet::packet::icmp::echo_request::MutableEchoRequestPacket;
use pnet::packet::icmp::{IcmpCode, IcmpPacket, IcmpType, IcmpTypes, checksum};

use crate::config::IpFamily;

/// ICMP echo header size (fixed)
pub const ICMP_HEADER_SIZE: usize = 8;

/// ICMPv6 Echo Request type
pub const ICMPV6_ECHO_REQUEST: u8 = 128;

/// Build an ICMP Echo Request of `payload_size` bytes (header included)
///
/// The body is `payload_size - 8` filler bytes; anything smaller than the
/// header yields a bare header (see [`crate::config::SessionConfig::normalized`]).
/// The ICMPv4 checksum is filled in here; for ICMPv6 the kernel computes it
/// over the pseudo-header.
pub fn build_echo_request(
    identifier: u16,
    sequence: u16,
    payload_size: usize,
    family: IpFamily,
) -> Vec<u8> {
    let mut buffer = vec![0u8; payload_size.max(ICMP_HEADER_SIZE)];

    {
        // Buffer is at least ICMP_HEADER_SIZE, which is the packet's minimum size
        let Some(mut packet) = MutableEchoRequestPacket::new(&mut buffer) else {
            return buffer;
        };

        if family.is_ipv6() {
            packet.set_icmp_type(IcmpType::new(ICMPV6_ECHO_REQUEST));
        } else {
            packet.set_icmp_type(IcmpTypes::EchoRequest);
        }
        packet.set_icmp_code(IcmpCode::new(0));
        packet.set_identifier(identifier);
        packet.set_sequence_number(sequence);

        for (i, byte) in packet.payload_mut().iter_mut().enumerate() {
            *byte = (i & 0xFF) as u8;
        }
    }

    if !family.is_ipv6()
        && let Some(icmp) = IcmpPacket::new(&buffer)
    {
        let cksum = checksum(&icmp);
        buffer[2..4].copy_from_slice(&cksum.to_be_bytes());
    }

    buffer
}

/// Read identifier and sequence back out of an echo request or reply header
pub fn echo_fields(icmp: &[u8]) -> Option<(u16, u16)> {
    if icmp.len() < ICMP_HEADER_SIZE {
        return None;
    }
    let identifier = u16::from_be_bytes([icmp[4], icmp[5]]);
    let sequence = u16::from_be_bytes([icmp[6], icmp[7]]);
    Some((identifier, sequence))
}

/// Get process identifier for ICMP identification field
pub fn process_identifier() -> u16 {
    (std::process::id() & 0xFFFF) as u16
}
