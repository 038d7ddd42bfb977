use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io;
use std::net::{IpAddr, SocketAddr};
use tokio::io::unix::AsyncFd;
use tracing::{debug, warn};

use crate::config::IpFamily;
use crate::error::{PingError, Result};
use crate::ping::transport::EchoTransport;

/// Result of receiving an ICMP packet with TTL info
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecvResult {
    pub len: usize,
    pub source: IpAddr,
    /// TTL/hop-limit of the received packet, from ancillary data
    pub response_ttl: Option<u8>,
}

/// Raw ICMP socket registered with the tokio reactor
///
/// The descriptor is closed when this value is dropped.
#[derive(Debug)]
pub struct IcmpSocket {
    inner: AsyncFd<Socket>,
    family: IpFamily,
}

impl IcmpSocket {
    /// Open a raw socket for `family` with the given TTL / hop limit
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(family: IpFamily, ttl: u8) -> Result<Self> {
        let socket = create_raw_icmp_socket(family).map_err(PingError::Socket)?;
        set_ttl(&socket, ttl, family).map_err(PingError::Socket)?;

        // Best effort: replies still parse without these
        if let Err(e) = enable_recv_ttl(&socket, family) {
            debug!(error = %e, "could not enable TTL reception");
        }
        if let Err(e) = install_icmp_filter(&socket, family) {
            debug!(error = %e, "could not install ICMP type filter");
        }

        let inner = AsyncFd::new(socket).map_err(PingError::Socket)?;
        debug!(%family, ttl, "raw ICMP socket open");
        Ok(Self { inner, family })
    }

    pub fn family(&self) -> IpFamily {
        self.family
    }
}

impl EchoTransport for IcmpSocket {
    fn send_to(&mut self, packet: &[u8], target: IpAddr) -> io::Result<usize> {
        send_icmp(self.inner.get_ref(), packet, target)
    }

    async fn recv(&mut self, buffer: &mut [u8]) -> io::Result<RecvResult> {
        let family = self.family;
        loop {
            let mut guard = self.inner.readable().await?;
            match guard.try_io(|inner| recv_icmp_with_ttl(inner.get_ref(), buffer, family)) {
                Ok(result) => return result,
                // Spurious wakeup, readiness was cleared
                Err(_would_block) => continue,
            }
        }
    }
}

/// Create a non-blocking raw ICMP socket
pub fn create_raw_icmp_socket(family: IpFamily) -> io::Result<Socket> {
    let (domain, protocol) = match family {
        IpFamily::V4 => (Domain::IPV4, Protocol::ICMPV4),
        IpFamily::V6 => (Domain::IPV6, Protocol::ICMPV6),
    };

    let socket = Socket::new(domain, Type::RAW, Some(protocol))?;
    socket.set_nonblocking(true)?;

    if let Err(e) = socket.set_recv_buffer_size(256 * 1024) {
        warn!(error = %e, "could not enlarge receive buffer");
    }

    Ok(socket)
}

/// Set TTL (IPv4) or unicast hop limit (IPv6) on a socket
pub fn set_ttl(socket: &Socket, ttl: u8, family: IpFamily) -> io::Result<()> {
    match family {
        IpFamily::V4 => socket.set_ttl(ttl as u32),
        IpFamily::V6 => socket.set_unicast_hops_v6(ttl as u32),
    }
}

/// Send ICMP packet to target
pub fn send_icmp(socket: &Socket, packet: &[u8], target: IpAddr) -> io::Result<usize> {
    let addr = SocketAddr::new(target, 0);
    let sock_addr = SockAddr::from(addr);
    socket.send_to(packet, &sock_addr)
}

/// Enable IP_RECVTTL/IPV6_RECVHOPLIMIT socket option
/// This allows recvmsg() to return the TTL of received packets in ancillary data
pub fn enable_recv_ttl(socket: &Socket, family: IpFamily) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    // Platform-specific constants
    #[cfg(target_os = "linux")]
    const IP_RECVTTL: libc::c_int = 12;
    #[cfg(target_os = "linux")]
    const IPV6_RECVHOPLIMIT: libc::c_int = 51;
    #[cfg(not(target_os = "linux"))]
    const IP_RECVTTL: libc::c_int = 24;
    #[cfg(not(target_os = "linux"))]
    const IPV6_RECVHOPLIMIT: libc::c_int = 37;

    let (level, optname) = match family {
        IpFamily::V6 => (libc::IPPROTO_IPV6, IPV6_RECVHOPLIMIT),
        IpFamily::V4 => (libc::IPPROTO_IP, IP_RECVTTL),
    };

    let val: libc::c_int = 1;
    setsockopt_raw(socket.as_raw_fd(), level, optname, &val)
}

/// Restrict delivery to echo replies and the two error types we classify
///
/// Linux only; on other platforms the session filters in user space.
#[cfg(target_os = "linux")]
pub fn install_icmp_filter(socket: &Socket, family: IpFamily) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    // Bit set = type blocked (Linux semantics for both filters)
    match family {
        IpFamily::V4 => {
            // ICMP_FILTER on SOL_RAW, 32-bit mask over types 0..31
            const SOL_RAW: libc::c_int = 255;
            const ICMP_FILTER: libc::c_int = 1;
            let pass: u32 = (1 << 0) | (1 << 3) | (1 << 11);
            let mask: u32 = !pass;
            setsockopt_raw(socket.as_raw_fd(), SOL_RAW, ICMP_FILTER, &mask)
        }
        IpFamily::V6 => {
            // ICMP6_FILTER on IPPROTO_ICMPV6, 256-bit mask
            const ICMP6_FILTER: libc::c_int = 1;
            let mut filter = [u32::MAX; 8];
            for icmp_type in [1u32, 3, 129] {
                filter[(icmp_type >> 5) as usize] &= !(1 << (icmp_type & 31));
            }
            setsockopt_raw(socket.as_raw_fd(), libc::IPPROTO_ICMPV6, ICMP6_FILTER, &filter)
        }
    }
}

#[cfg(not(target_os = "linux"))]
pub fn install_icmp_filter(_socket: &Socket, _family: IpFamily) -> io::Result<()> {
    Ok(())
}

fn setsockopt_raw<T>(
    fd: std::os::unix::io::RawFd,
    level: libc::c_int,
    optname: libc::c_int,
    value: &T,
) -> io::Result<()> {
    let ret = unsafe {
        libc::setsockopt(
            fd,
            level,
            optname,
            value as *const T as *const libc::c_void,
            std::mem::size_of::<T>() as libc::socklen_t,
        )
    };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Receive ICMP packet with response TTL from control message
/// Uses recvmsg() to access ancillary data containing TTL/hop-limit
pub fn recv_icmp_with_ttl(
    socket: &Socket,
    buffer: &mut [u8],
    family: IpFamily,
) -> io::Result<RecvResult> {
    use std::os::unix::io::AsRawFd;

    // Set up iovec for the data buffer
    let mut iov = libc::iovec {
        iov_base: buffer.as_mut_ptr() as *mut libc::c_void,
        iov_len: buffer.len(),
    };

    // Allocate control message buffer (for TTL)
    let mut cmsg_buf = [0u8; 64];

    // Source address storage
    let mut src_storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };

    let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
    msg.msg_name = &mut src_storage as *mut _ as *mut libc::c_void;
    msg.msg_namelen = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = cmsg_buf.as_mut_ptr() as *mut libc::c_void;
    // msg_controllen type differs: usize on Linux, u32 on macOS
    msg.msg_controllen = cmsg_buf.len() as _;

    let len = unsafe { libc::recvmsg(socket.as_raw_fd(), &mut msg, 0) };
    if len < 0 {
        return Err(io::Error::last_os_error());
    }

    let source = parse_sockaddr_storage(&src_storage)?;
    let response_ttl = extract_ttl_from_cmsg(&msg, family);

    Ok(RecvResult {
        len: len as usize,
        source,
        response_ttl,
    })
}

/// Extract TTL/hop limit from control message
fn extract_ttl_from_cmsg(msg: &libc::msghdr, family: IpFamily) -> Option<u8> {
    // Linux: IP_TTL = 2
    // macOS: IP_TTL = 4, but IP_RECVTTL = 24 - accept both
    #[cfg(target_os = "linux")]
    fn is_ip_ttl_type(cmsg_type: libc::c_int) -> bool {
        cmsg_type == 2
    }
    #[cfg(not(target_os = "linux"))]
    fn is_ip_ttl_type(cmsg_type: libc::c_int) -> bool {
        cmsg_type == 4 || cmsg_type == 24
    }

    unsafe {
        let mut cmsg = libc::CMSG_FIRSTHDR(msg);
        while !cmsg.is_null() {
            let hdr = &*cmsg;
            let data_ptr = libc::CMSG_DATA(cmsg);

            let found = match family {
                IpFamily::V6 => {
                    hdr.cmsg_level == libc::IPPROTO_IPV6 && hdr.cmsg_type == libc::IPV6_HOPLIMIT
                }
                IpFamily::V4 => hdr.cmsg_level == libc::IPPROTO_IP && is_ip_ttl_type(hdr.cmsg_type),
            };
            if found {
                let ttl = std::ptr::read_unaligned(data_ptr as *const libc::c_int);
                return Some(ttl as u8);
            }

            cmsg = libc::CMSG_NXTHDR(msg, cmsg);
        }
    }
    None
}

/// Parse sockaddr_storage to IpAddr
fn parse_sockaddr_storage(storage: &libc::sockaddr_storage) -> io::Result<IpAddr> {
    match storage.ss_family as libc::c_int {
        libc::AF_INET => {
            let addr: &libc::sockaddr_in = unsafe { &*(storage as *const _ as *const _) };
            let ip = std::net::Ipv4Addr::from(u32::from_be(addr.sin_addr.s_addr));
            Ok(IpAddr::V4(ip))
        }
        libc::AF_INET6 => {
            let addr: &libc::sockaddr_in6 = unsafe { &*(storage as *const _ as *const _) };
            let ip = std::net::Ipv6Addr::from(addr.sin6_addr.s6_addr);
            Ok(IpAddr::V6(ip))
        }
        other => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unknown address family: {}", other),
        )),
    }
}
