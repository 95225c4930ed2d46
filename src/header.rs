use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use bincode::Options;

use crate::error::ProbeError;
use crate::packet::{self, IPv4Header, IPv6Header, ProtocolFamily, IPV4_MIN_HEADER_LEN, IPV6_HEADER_LEN};

const NEXT_HEADER_HOP_BY_HOP: u8 = 0;
const NEXT_HEADER_ROUTING: u8 = 43;
const NEXT_HEADER_FRAGMENT: u8 = 44;
const NEXT_HEADER_DEST_OPTIONS: u8 = 60;
const FRAGMENT_HEADER_LEN: usize = 8;

/// What the encapsulating IP header tells us about a received datagram.
#[derive(Debug, PartialEq, Eq)]
pub struct IpEnvelope<'a> {
    pub source: IpAddr,
    pub ttl: u8, // hop limit for IPv6
    pub icmp: &'a [u8],
}

/// Strips the IP header(s) off `raw`, which must start with a header of the
/// given family.
pub fn parse(raw: &[u8], family: ProtocolFamily) -> Result<IpEnvelope<'_>, ProbeError> {
    match family {
        ProtocolFamily::V4 => parse_v4(raw),
        ProtocolFamily::V6 => parse_v6(raw),
    }
}

fn parse_v4(raw: &[u8]) -> Result<IpEnvelope<'_>, ProbeError> {
    if raw.len() < IPV4_MIN_HEADER_LEN {
        return Err(too_short(raw.len(), IPV4_MIN_HEADER_LEN, "IPv4"));
    }

    let header = packet::wire().deserialize::<IPv4Header>(raw)
        .map_err(|e| ProbeError::HeaderParse(e.to_string()))?;

    let version = header.version_and_header_len >> 4;
    if version != 4 {
        return Err(ProbeError::HeaderParse(format!("expected IP version 4, got {}", version)));
    }

    // Get the 'header length' portion of the u8, which is encoded as u8/4 (bits/32)
    let header_len = 4 * (header.version_and_header_len & 0x0F) as usize;
    let total_len = header.datagram_length as usize;
    if header_len < IPV4_MIN_HEADER_LEN || header_len > total_len || total_len > raw.len() {
        return Err(ProbeError::HeaderParse(format!(
            "inconsistent lengths: header {}, datagram {}, received {}", header_len, total_len, raw.len())));
    }

    Ok(IpEnvelope {
        source: IpAddr::V4(Ipv4Addr::from(header.source_ip)),
        ttl: header.ttl,
        icmp: &raw[header_len..total_len],
    })
}

fn parse_v6(raw: &[u8]) -> Result<IpEnvelope<'_>, ProbeError> {
    if raw.len() < IPV6_HEADER_LEN {
        return Err(too_short(raw.len(), IPV6_HEADER_LEN, "IPv6"));
    }

    let header = packet::wire().deserialize::<IPv6Header>(raw)
        .map_err(|e| ProbeError::HeaderParse(e.to_string()))?;

    let version = header.version_class_and_flow >> 28;
    if version != 6 {
        return Err(ProbeError::HeaderParse(format!("expected IP version 6, got {}", version)));
    }

    // A zero payload length (jumbogram, or a stack that leaves it unset) runs to the end
    let end = match header.payload_length as usize {
        0 => raw.len(),
        declared => IPV6_HEADER_LEN + declared,
    };
    if end > raw.len() {
        return Err(ProbeError::HeaderParse(format!(
            "declared payload ends at {} but only {} bytes were received", end, raw.len())));
    }

    let start = skip_extension_headers(&raw[..end], header.next_header)?;

    Ok(IpEnvelope {
        source: IpAddr::V6(Ipv6Addr::from(header.source_ip)),
        ttl: header.hop_limit,
        icmp: &raw[start..end],
    })
}

/// Walks the extension header chain after the fixed IPv6 header and returns
/// the offset of the ICMPv6 message.
fn skip_extension_headers(datagram: &[u8], first: u8) -> Result<usize, ProbeError> {
    let icmpv6 = ProtocolFamily::V6.protocol_number();
    let mut offset = IPV6_HEADER_LEN;
    let mut next = first;

    while next != icmpv6 {
        let ext = datagram.get(offset..offset + 2)
            .ok_or_else(|| ProbeError::HeaderParse(format!("extension header {} truncated", next)))?;

        let len = match next {
            NEXT_HEADER_HOP_BY_HOP | NEXT_HEADER_ROUTING | NEXT_HEADER_DEST_OPTIONS => (ext[1] as usize + 1) * 8,
            NEXT_HEADER_FRAGMENT => FRAGMENT_HEADER_LEN,
            other => {
                return Err(ProbeError::HeaderParse(format!("datagram does not carry ICMPv6 (next header {})", other)));
            }
        };

        next = ext[0];
        offset += len;
        if offset > datagram.len() {
            return Err(ProbeError::HeaderParse(format!("extension header chain overruns datagram at {}", offset)));
        }
    }

    Ok(offset)
}

fn too_short(got: usize, need: usize, family: &str) -> ProbeError {
    ProbeError::HeaderParse(format!("{} bytes is shorter than the minimum {} header ({} bytes)", got, family, need))
}
