use std::{
    fmt, io,
    mem::MaybeUninit,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
    time::{Duration, Instant},
};

use etherparse::Ipv4HeaderSlice;
use log::{debug, info};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use crate::error::{classify_open_error, PingError, ProtocolError, Result};
use crate::probe::Family;

const RECV_BUFFER_LEN: usize = 2048;

// set_read_timeout rejects a zero duration
const MIN_READ_TIMEOUT: Duration = Duration::from_millis(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportKind {
    /// SOCK_RAW, needs CAP_NET_RAW or root
    Raw,
    /// SOCK_DGRAM ping socket, needs no privilege where the OS offers it
    Datagram,
}

impl TransportKind {
    pub fn from_privileged(privileged: bool) -> Self {
        if privileged {
            TransportKind::Raw
        } else {
            TransportKind::Datagram
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Raw => f.write_str("raw"),
            TransportKind::Datagram => f.write_str("datagram"),
        }
    }
}

/// An ICMP message as handed to the codec, with any IP header removed.
#[derive(Clone, Debug)]
pub struct Frame {
    pub bytes: Vec<u8>,
    pub from: IpAddr,
    /// Only known when the IP header was visible
    pub ttl: Option<u8>,
    pub received_at: Instant,
}

pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Identifier the OS stamps on outgoing requests, if it overrides ours.
    fn identifier(&self) -> Option<u16> {
        None
    }

    fn send_to(&self, buf: &[u8], dest: IpAddr) -> io::Result<usize>;

    /// Wait up to `timeout` for one frame. `Ok(None)` means the wait ran out.
    fn recv(&self, timeout: Duration) -> Result<Option<Frame>>;

    fn close(self: Box<Self>) -> io::Result<()>;
}

pub fn open_transport(
    kind: TransportKind,
    family: Family,
    source: Option<IpAddr>,
    ttl: u8,
) -> Result<Box<dyn Transport>> {
    let transport: Box<dyn Transport> = match kind {
        TransportKind::Raw => Box::new(RawSocket::open(family, source, ttl)?),
        TransportKind::Datagram => Box::new(DatagramSocket::open(family, source, ttl)?),
    };
    info!("Opened {kind} ICMP socket for {family:?}");
    Ok(transport)
}

pub struct RawSocket {
    inner: Socket,
    family: Family,
}

impl RawSocket {
    pub fn open(family: Family, source: Option<IpAddr>, ttl: u8) -> Result<Self> {
        let inner = open_socket(TransportKind::Raw, family, source, ttl)?;
        Ok(Self { inner, family })
    }
}

impl Transport for RawSocket {
    fn kind(&self) -> TransportKind {
        TransportKind::Raw
    }

    fn send_to(&self, buf: &[u8], dest: IpAddr) -> io::Result<usize> {
        send_to(&self.inner, buf, dest)
    }

    fn recv(&self, timeout: Duration) -> Result<Option<Frame>> {
        let Some((bytes, from, received_at)) = recv_from(&self.inner, timeout)? else {
            return Ok(None);
        };
        // Raw IPv4 sockets deliver the IP header, raw IPv6 sockets do not
        let frame = match self.family {
            Family::V4 => strip_ipv4_header(bytes, from, received_at)?,
            Family::V6 => Frame {
                bytes,
                from,
                ttl: None,
                received_at,
            },
        };
        Ok(Some(frame))
    }

    fn close(self: Box<Self>) -> io::Result<()> {
        debug!("Closing raw ICMP socket");
        drop(self.inner);
        Ok(())
    }
}

pub struct DatagramSocket {
    inner: Socket,
    family: Family,
    identifier: Option<u16>,
}

impl DatagramSocket {
    pub fn open(family: Family, source: Option<IpAddr>, ttl: u8) -> Result<Self> {
        let inner = open_socket(TransportKind::Datagram, family, source, ttl)?;
        let identifier = kernel_identifier(&inner)?;
        if let Some(id) = identifier {
            debug!("Kernel assigned echo identifier {id}");
        }
        Ok(Self {
            inner,
            family,
            identifier,
        })
    }
}

impl Transport for DatagramSocket {
    fn kind(&self) -> TransportKind {
        TransportKind::Datagram
    }

    fn identifier(&self) -> Option<u16> {
        self.identifier
    }

    fn send_to(&self, buf: &[u8], dest: IpAddr) -> io::Result<usize> {
        send_to(&self.inner, buf, dest)
    }

    fn recv(&self, timeout: Duration) -> Result<Option<Frame>> {
        let Some((bytes, from, received_at)) = recv_from(&self.inner, timeout)? else {
            return Ok(None);
        };
        // Darwin ping sockets hand back the IPv4 header like a raw socket
        let frame = if cfg!(target_os = "macos") && self.family == Family::V4 {
            strip_ipv4_header(bytes, from, received_at)?
        } else {
            Frame {
                bytes,
                from,
                ttl: None,
                received_at,
            }
        };
        Ok(Some(frame))
    }

    fn close(self: Box<Self>) -> io::Result<()> {
        debug!("Closing datagram ICMP socket");
        drop(self.inner);
        Ok(())
    }
}

fn open_socket(
    kind: TransportKind,
    family: Family,
    source: Option<IpAddr>,
    ttl: u8,
) -> Result<Socket> {
    let (domain, protocol) = match family {
        Family::V4 => (Domain::IPV4, Protocol::ICMPV4),
        Family::V6 => (Domain::IPV6, Protocol::ICMPV6),
    };
    let ty = match kind {
        TransportKind::Raw => Type::RAW,
        TransportKind::Datagram => Type::DGRAM,
    };

    let socket =
        Socket::new(domain, ty, Some(protocol)).map_err(|e| classify_open_error(kind, e))?;

    match family {
        Family::V4 => socket.set_ttl(ttl as u32)?,
        Family::V6 => socket.set_unicast_hops_v6(ttl as u32)?,
    }

    // Datagram sockets are always bound so the kernel settles the identifier now
    let bind_to = match (source, kind) {
        (Some(ip), _) => Some(ip),
        (None, TransportKind::Datagram) => Some(match family {
            Family::V4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            Family::V6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        }),
        (None, TransportKind::Raw) => None,
    };
    if let Some(ip) = bind_to {
        socket.bind(&SockAddr::from(SocketAddr::new(ip, 0)))?;
    }

    Ok(socket)
}

// Linux and Android rewrite the echo identifier to the socket's local port
fn kernel_identifier(socket: &Socket) -> io::Result<Option<u16>> {
    if cfg!(any(target_os = "linux", target_os = "android")) {
        Ok(socket.local_addr()?.as_socket().map(|sa| sa.port()))
    } else {
        Ok(None)
    }
}

fn send_to(socket: &Socket, buf: &[u8], dest: IpAddr) -> io::Result<usize> {
    socket.send_to(buf, &SockAddr::from(SocketAddr::new(dest, 0)))
}

fn recv_from(socket: &Socket, timeout: Duration) -> io::Result<Option<(Vec<u8>, IpAddr, Instant)>> {
    socket.set_read_timeout(Some(timeout.max(MIN_READ_TIMEOUT)))?;

    let mut buf = [MaybeUninit::<u8>::uninit(); RECV_BUFFER_LEN];
    match socket.recv_from(&mut buf) {
        Ok((n, from)) => {
            let received_at = Instant::now();
            // SAFETY: recv_from initialized the first `n` bytes of `buf`
            let bytes = buf[..n]
                .iter()
                .map(|b| unsafe { b.assume_init() })
                .collect();
            let from = from
                .as_socket()
                .map(|sa| sa.ip())
                .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
            Ok(Some((bytes, from, received_at)))
        }
        Err(e)
            if matches!(
                e.kind(),
                io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
            ) =>
        {
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Remove the variable-length IPv4 header, keeping its TTL.
pub(crate) fn strip_ipv4_header(
    bytes: Vec<u8>,
    from: IpAddr,
    received_at: Instant,
) -> Result<Frame> {
    let header = Ipv4HeaderSlice::from_slice(&bytes)
        .map_err(|e| PingError::Protocol(ProtocolError::IpHeader(e.to_string())))?;
    let header_len = header.slice().len();
    let ttl = header.ttl();

    Ok(Frame {
        bytes: bytes[header_len..].to_vec(),
        from,
        ttl: Some(ttl),
        received_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ipv4_frame(options: &[u8], payload: &[u8]) -> Vec<u8> {
        let ihl = 5 + options.len() / 4;
        let total = ihl * 4 + payload.len();
        let mut buf = vec![
            0x40 | ihl as u8,
            0,
            (total >> 8) as u8,
            total as u8,
            0,
            0,
            0,
            0,
            57, // ttl
            1,  // icmp
            0,
            0,
            10,
            0,
            0,
            1,
            10,
            0,
            0,
            2,
        ];
        buf.extend_from_slice(options);
        buf.extend_from_slice(payload);
        buf
    }

    #[test]
    fn test_strip_ipv4_header() {
        let from = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        let frame = strip_ipv4_header(ipv4_frame(&[], &[0, 0, 1, 2]), from, Instant::now()).unwrap();
        assert_eq!(frame.bytes, vec![0, 0, 1, 2]);
        assert_eq!(frame.ttl, Some(57));
        assert_eq!(frame.from, from);
    }

    #[test]
    fn test_strip_ipv4_header_with_options() {
        let from = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        let frame =
            strip_ipv4_header(ipv4_frame(&[1, 1, 1, 0], &[9, 9]), from, Instant::now()).unwrap();
        assert_eq!(frame.bytes, vec![9, 9]);
    }

    #[test]
    fn test_strip_ipv4_header_rejects_garbage() {
        let from = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        assert!(matches!(
            strip_ipv4_header(vec![0x60, 0, 0], from, Instant::now()),
            Err(PingError::Protocol(ProtocolError::IpHeader(_)))
        ));
    }

    #[test]
    fn test_transport_kind_from_privileged() {
        assert_eq!(TransportKind::from_privileged(true), TransportKind::Raw);
        assert_eq!(TransportKind::from_privileged(false), TransportKind::Datagram);
    }

    // Run as an unprivileged user: `cargo test -- --ignored raw_socket_requires`
    #[ignore]
    #[test]
    fn test_raw_socket_requires_privilege() {
        let err = RawSocket::open(Family::V4, None, 64).err().unwrap();
        assert!(matches!(
            err,
            PingError::Permission {
                kind: TransportKind::Raw,
                ..
            }
        ));
    }

    // Needs ping sockets enabled (net.ipv4.ping_group_range on Linux)
    #[ignore]
    #[test]
    fn test_datagram_socket_loopback_echo() {
        let socket = DatagramSocket::open(Family::V4, None, 64).unwrap();
        let mut request = vec![8, 0, 0, 0, 0, 1, 0, 1];
        request.extend_from_slice(&[0u8; 24]);
        let sum = crate::probe::checksum(&request);
        request[2..4].copy_from_slice(&sum.to_be_bytes());

        socket
            .send_to(&request, IpAddr::V4(Ipv4Addr::LOCALHOST))
            .unwrap();
        let frame = socket.recv(Duration::from_secs(1)).unwrap().unwrap();
        assert_eq!(frame.bytes[0], 0);
        Box::new(socket).close().unwrap();
    }
}
