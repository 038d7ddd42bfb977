use std::future::Future;
use std::io;
use std::net::IpAddr;

use crate::probe::RecvResult;

/// Datagram channel the ping engine sends requests and reads ICMP through
///
/// [`crate::probe::IcmpSocket`] is the raw-socket implementation.
pub trait EchoTransport {
    /// Send one serialized ICMP message to `target`
    fn send_to(&mut self, packet: &[u8], target: IpAddr) -> io::Result<usize>;

    /// Wait for the next datagram and copy it into `buffer`
    ///
    /// Must be cancel safe: dropping the future before it completes loses no
    /// datagram.
    fn recv(&mut self, buffer: &mut [u8]) -> impl Future<Output = io::Result<RecvResult>>;
}
