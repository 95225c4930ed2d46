use std::collections::VecDeque;
use std::io::{self, Result};
use std::net::Ipv6Addr;
use std::time::Duration;

use bincode::Options;

use crate::packet::{self, EchoMessage, IPv4Header, IPv6Header, IPV4_MIN_HEADER_LEN, IPV6_HEADER_LEN};
use crate::ping::Transport;

/// An IPv4 datagram with a 20 byte header carrying `icmp`.
pub fn ipv4_datagram(source: [u8; 4], ttl: u8, icmp: &[u8]) -> Vec<u8> {
    let header = IPv4Header {
        version_and_header_len: 0x45,
        type_of_service: 0,
        datagram_length: (IPV4_MIN_HEADER_LEN + icmp.len()) as u16,
        ip_identifier: 0,
        flags_and_5frag_offset: 0x40,
        rest_of_frag_offset: 0,
        ttl,
        protocol: 1,
        checksum: 0,
        source_ip: source,
        destination_ip: [192, 0, 2, 1],
    };
    let mut raw = packet::wire().serialize(&header).unwrap();
    raw.extend_from_slice(icmp);
    raw
}

/// An IPv6 datagram without extension headers carrying `icmp`.
pub fn ipv6_datagram(source: Ipv6Addr, hop_limit: u8, icmp: &[u8]) -> Vec<u8> {
    let header = IPv6Header {
        version_class_and_flow: 6 << 28,
        payload_length: icmp.len() as u16,
        next_header: 58,
        hop_limit,
        source_ip: source.octets(),
        destination_ip: Ipv6Addr::LOCALHOST.octets(),
    };
    let mut raw = packet::wire().serialize(&header).unwrap();
    assert_eq!(raw.len(), IPV6_HEADER_LEN);
    raw.extend_from_slice(icmp);
    raw
}

/// Rewrites a captured echo request into the reply a well-behaved target
/// would send, keeping identifier, sequence and embedded timestamp.
pub fn reply_to(request: &[u8], reply_type: u8) -> Vec<u8> {
    let sent = EchoMessage::decode_fields(request).unwrap();
    EchoMessage { message_type: reply_type, ..sent }.encode().unwrap()
}

pub enum Scripted {
    /// Hands the datagram to the next read.
    Datagram(Vec<u8>),
    /// Wraps the most recent write with this closure, so replies can embed
    /// the real send timestamp.
    EchoLast(Box<dyn Fn(&[u8]) -> Vec<u8>>),
    Fail(io::ErrorKind),
}

/// In-memory [`Transport`] replaying scripted reads. An exhausted script reads
/// as an expired deadline.
#[derive(Default)]
pub struct MockTransport {
    pub written: Vec<Vec<u8>>,
    pub deadlines: Vec<Duration>,
    pub reads: VecDeque<Scripted>,
    pub fail_writes: bool,
}

impl MockTransport {
    pub fn scripted(reads: Vec<Scripted>) -> Self {
        MockTransport { reads: reads.into(), ..Default::default() }
    }

    pub fn echoing(wrap: impl Fn(&[u8]) -> Vec<u8> + 'static) -> Scripted {
        Scripted::EchoLast(Box::new(wrap))
    }
}

impl Transport for MockTransport {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        if self.fail_writes {
            return Err(io::Error::from(io::ErrorKind::BrokenPipe));
        }
        self.written.push(bytes.to_vec());
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let datagram = match self.reads.pop_front() {
            Some(Scripted::Datagram(d)) => d,
            Some(Scripted::EchoLast(wrap)) => wrap(self.written.last().map(Vec::as_slice).unwrap_or_default()),
            Some(Scripted::Fail(kind)) => return Err(io::Error::from(kind)),
            None => return Err(io::Error::from(io::ErrorKind::WouldBlock)),
        };
        let n = datagram.len().min(buf.len());
        buf[..n].copy_from_slice(&datagram[..n]);
        Ok(n)
    }

    fn set_read_deadline(&mut self, timeout: Duration) -> Result<()> {
        self.deadlines.push(timeout);
        Ok(())
    }
}
