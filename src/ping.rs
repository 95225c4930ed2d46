use std::io::{Error, ErrorKind, Result};
use std::net::{IpAddr, SocketAddr};
use std::process;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bincode::Options;
use log::{debug, trace, warn};
use socket2::{Domain, Protocol, SockAddr, Socket};

use crate::error::ProbeError;
use crate::header;
use crate::packet::{self, EchoMessage, IPv6Header, ProtocolFamily, IPV6_HEADER_LEN};

const RECV_BUFFER_LEN: usize = 4096;
const ICMP_PREFIX_LEN: usize = 4; // type, code, checksum

/// A datagram channel bound to one destination.
pub trait Transport {
    fn write(&mut self, bytes: &[u8]) -> Result<()>;

    /// Blocks for one inbound datagram, which starts with its IP header.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    fn set_read_deadline(&mut self, timeout: Duration) -> Result<()>;
}

/// Raw ICMP socket connected to the destination. Needs CAP_NET_RAW or root.
pub struct SocketTransport {
    socket: Socket,
    destination: IpAddr,
}

impl SocketTransport {
    pub fn connect(destination: IpAddr) -> Result<Self> {
        let (domain, protocol) = match ProtocolFamily::of(&destination) {
            ProtocolFamily::V4 => (Domain::ipv4(), Protocol::icmpv4()),
            ProtocolFamily::V6 => (Domain::ipv6(), Protocol::icmpv6()),
        };
        let stype = socket2::Type::raw().cloexec();
        let socket = Socket::new(domain, stype, Some(protocol))?;

        // Connecting filters inbound datagrams down to ones sent by the destination
        socket.connect(&SockAddr::from(SocketAddr::from((destination, 0))))?;

        Ok(SocketTransport { socket, destination })
    }

    /// Sets the ttl (unicast hop limit for IPv6) of outgoing requests.
    pub fn set_ttl(&self, ttl: u32) -> Result<()> {
        match self.destination {
            IpAddr::V4(_) => self.socket.set_ttl(ttl),
            IpAddr::V6(_) => self.socket.set_unicast_hops_v6(ttl),
        }
    }

    /// Raw ICMPv6 sockets don't put the IPv6 header into our buffer (unlike
    /// IPv4), and the hop limit is only reachable through `recvmsg`. Frame the
    /// message with a header carrying what we do know; hop limit 0 = unknown.
    fn read_v6(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.len() <= IPV6_HEADER_LEN {
            return Err(Error::new(ErrorKind::InvalidInput, "receive buffer cannot hold an IPv6 header"));
        }
        let n = self.socket.recv(&mut buf[IPV6_HEADER_LEN..])?;

        let source_ip = match self.destination {
            IpAddr::V6(addr) => addr.octets(),
            IpAddr::V4(addr) => addr.to_ipv6_mapped().octets(),
        };
        let header = IPv6Header {
            version_class_and_flow: 6 << 28,
            payload_length: n as u16,
            next_header: ProtocolFamily::V6.protocol_number(),
            hop_limit: 0,
            source_ip,
            destination_ip: [0; 16],
        };
        packet::wire().serialize_into(&mut buf[..IPV6_HEADER_LEN], &header)
            .map_err(|e| Error::new(ErrorKind::Other, e.to_string()))?;

        Ok(IPV6_HEADER_LEN + n)
    }
}

impl Transport for SocketTransport {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let sent = self.socket.send(bytes)?;
        if sent != bytes.len() {
            return Err(Error::new(ErrorKind::WriteZero, format!("sent {} of {} bytes", sent, bytes.len())));
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.destination {
            IpAddr::V4(_) => self.socket.recv(buf),
            IpAddr::V6(_) => self.read_v6(buf),
        }
    }

    fn set_read_deadline(&mut self, timeout: Duration) -> Result<()> {
        self.socket.set_read_timeout(Some(timeout))
    }
}

/// The only mutable state of a probe run.
#[derive(Debug, Clone)]
pub struct ProbeSession {
    family: ProtocolFamily,
    identifier: u16,  // Used as 'identifier' word to match echo requests/replies
    next_sequence: u16,
    timeout: Duration,
}

impl ProbeSession {
    /// Identifies requests by the low 16 bits of our process id.
    pub fn new(family: ProtocolFamily, timeout: Duration) -> Self {
        Self::with_identifier(family, timeout, (process::id() & 0xFFFF) as u16)
    }

    pub fn with_identifier(family: ProtocolFamily, timeout: Duration, identifier: u16) -> Self {
        ProbeSession { family, identifier, next_sequence: 0, timeout }
    }

    pub fn family(&self) -> ProtocolFamily {
        self.family
    }

    pub fn identifier(&self) -> u16 {
        self.identifier
    }

    pub fn next_sequence(&self) -> u16 {
        self.next_sequence
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn advance(&mut self) -> u16 {
        let sequence = self.next_sequence;
        self.next_sequence = sequence.wrapping_add(1);
        sequence
    }
}

/// One successful measurement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub payload_length: usize,
    pub source: IpAddr,
    pub sequence: u16,
    pub ttl: u8,
    pub round_trip_nanos: i64,
}

impl ProbeResult {
    /// Round trip time, clamped at zero for replies stamped in the future.
    pub fn rtt(&self) -> Duration {
        Duration::from_nanos(self.round_trip_nanos.max(0) as u64)
    }
}

/// Drives request/reply cycles over a transport it owns for the whole session.
pub struct Pinger<T: Transport> {
    transport: T,
    session: ProbeSession,
    buf: Vec<u8>,
}

impl<T: Transport> Pinger<T> {
    pub fn new(transport: T, session: ProbeSession) -> Self {
        Pinger { transport, session, buf: vec![0; RECV_BUFFER_LEN] }
    }

    pub fn session(&self) -> &ProbeSession {
        &self.session
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Sends one echo request and waits at most the session timeout for a
    /// single datagram. Whatever arrives ends the cycle, matching or not.
    pub fn round_trip(&mut self) -> std::result::Result<ProbeResult, ProbeError> {
        let family = self.session.family;
        let sequence = self.session.advance();
        let request = EchoMessage::request(family, self.session.identifier, sequence, now_nanos());

        let payload = request.encode()?;
        self.transport.write(&payload).map_err(ProbeError::Transport)?;
        debug!("Sent echo request icmp_seq={} id={} ({} bytes)", sequence, request.identifier, payload.len());

        let budget = self.session.timeout;
        self.transport.set_read_deadline(budget).map_err(ProbeError::Transport)?;
        let received = self.transport.read(&mut self.buf)
            .map_err(|e| ProbeError::from_read(e, budget))?;
        let arrival = now_nanos();
        trace!("Received {} byte datagram for icmp_seq={}", received, sequence);

        let envelope = header::parse(&self.buf[..received], family)?;
        let reply = EchoMessage::decode_fields(envelope.icmp)?;

        if reply.message_type != family.echo_reply_type() {
            debug!("Got ICMP type {} code {} from {} instead of an echo reply",
                reply.message_type, reply.message_code, envelope.source);
            return Err(ProbeError::ProtocolMismatch { icmp_type: reply.message_type, code: reply.message_code });
        }

        debug!("Echo reply icmp_seq={} from {}", reply.sequence_num, envelope.source);
        Ok(ProbeResult {
            // Echo body only: identifier onwards
            payload_length: envelope.icmp.len().saturating_sub(ICMP_PREFIX_LEN),
            source: envelope.source,
            sequence: reply.sequence_num,
            ttl: envelope.ttl,
            // The timestamp is whatever the target sent back
            round_trip_nanos: arrival.wrapping_sub(reply.send_timestamp),
        })
    }
}

fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|since_epoch| since_epoch.as_nanos() as i64)
        .unwrap_or_else(|e| {
            warn!("System clock is {:?} before the unix epoch, timestamping with 0", e.duration());
            0
        })
}
