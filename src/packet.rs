use std::net::IpAddr;

use bincode::Options;
use serde::{Deserialize, Serialize};

use crate::error::ProbeError;
use crate::util;

/// type(1) code(1) checksum(2) identifier(2) sequence(2) timestamp(8)
pub const ECHO_MESSAGE_LEN: usize = 16;
pub const IPV4_MIN_HEADER_LEN: usize = 20;
pub const IPV6_HEADER_LEN: usize = 40;

const ECHO_REQUEST_V4: u8 = 8;
const ECHO_REQUEST_V6: u8 = 128;
const ECHO_REPLY_V4: u8 = 0;
const ECHO_REPLY_V6: u8 = 129;

/// Which IP/ICMP pair a probe session speaks. Fixed for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolFamily {
    V4,
    V6,
}

impl ProtocolFamily {
    pub fn of(address: &IpAddr) -> Self {
        if address.is_ipv6() { ProtocolFamily::V6 } else { ProtocolFamily::V4 }
    }

    /// IANA protocol number of the family's ICMP flavour.
    pub fn protocol_number(self) -> u8 {
        match self {
            ProtocolFamily::V4 => 1,
            ProtocolFamily::V6 => 58,
        }
    }

    pub fn echo_request_type(self) -> u8 {
        match self {
            ProtocolFamily::V4 => ECHO_REQUEST_V4,
            ProtocolFamily::V6 => ECHO_REQUEST_V6,
        }
    }

    pub fn echo_reply_type(self) -> u8 {
        match self {
            ProtocolFamily::V4 => ECHO_REPLY_V4,
            ProtocolFamily::V6 => ECHO_REPLY_V6,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct EchoMessage {
    pub message_type: u8,
    pub message_code: u8,
    pub checksum: u16,
    pub identifier: u16,
    pub sequence_num: u16,
    pub send_timestamp: i64, // nanoseconds since the unix epoch
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
pub struct IPv4Header {
    pub version_and_header_len: u8,
    pub type_of_service: u8,
    pub datagram_length: u16,
    pub ip_identifier: u16,
    pub flags_and_5frag_offset: u8, // flags are u3
    pub rest_of_frag_offset: u8,
    pub ttl: u8,
    pub protocol: u8,
    pub checksum: u16,
    pub source_ip: [u8; 4],
    pub destination_ip: [u8; 4],
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
pub struct IPv6Header {
    pub version_class_and_flow: u32, // version is the top 4 bits
    pub payload_length: u16,
    pub next_header: u8,
    pub hop_limit: u8,
    pub source_ip: [u8; 16],
    pub destination_ip: [u8; 16],
}

/// ICMP uses network byte order and fixed-width fields throughout. Receive
/// buffers are larger than any record, so trailing bytes are expected.
pub(crate) fn wire() -> impl Options {
    bincode::DefaultOptions::new()
        .with_big_endian()
        .with_fixint_encoding()
        .allow_trailing_bytes()
}

impl EchoMessage {
    /// A fresh echo request. The checksum is filled in by [`EchoMessage::encode`].
    pub fn request(family: ProtocolFamily, identifier: u16, sequence_num: u16, send_timestamp: i64) -> Self {
        EchoMessage {
            message_type: family.echo_request_type(),
            message_code: 0,
            checksum: 0,
            identifier,
            sequence_num,
            send_timestamp,
        }
    }

    /// Serializes the message with a checksum computed over exactly the bytes
    /// returned. Whatever is in `self.checksum` is ignored.
    pub fn encode(&self) -> Result<Vec<u8>, ProbeError> {
        let unsummed = EchoMessage { checksum: 0, ..*self };
        let first_pass = wire().serialize(&unsummed)?;

        let summed = EchoMessage { checksum: util::checksum(&first_pass), ..unsummed };
        Ok(wire().serialize(&summed)?)
    }

    /// Reads the echo fields from the start of an ICMP message.
    pub fn decode_fields(data: &[u8]) -> Result<EchoMessage, ProbeError> {
        if data.len() < ECHO_MESSAGE_LEN {
            return Err(ProbeError::Malformed(format!(
                "{} bytes is shorter than the {} byte echo header", data.len(), ECHO_MESSAGE_LEN)));
        }

        Ok(wire().deserialize::<EchoMessage>(data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> EchoMessage {
        EchoMessage::request(ProtocolFamily::V4, 0x1234, 7, 1_600_000_000_123_456_789)
    }

    #[test]
    fn encodes_fields_big_endian_in_order() {
        // given
        let msg = sample();

        // when
        let bytes = msg.encode().unwrap();

        // then
        assert_eq!(bytes.len(), ECHO_MESSAGE_LEN);
        assert_eq!(bytes[0], 8);
        assert_eq!(bytes[1], 0);
        assert_eq!(&bytes[4..6], &[0x12, 0x34]);
        assert_eq!(&bytes[6..8], &[0x00, 0x07]);
        assert_eq!(&bytes[8..16], &1_600_000_000_123_456_789i64.to_be_bytes());
    }

    #[test]
    fn encoded_checksum_is_valid_over_sent_bytes() {
        let bytes = sample().encode().unwrap();
        assert!(util::verify_checksum(&bytes));
    }

    #[test]
    fn stale_checksum_is_recomputed() {
        // given
        let mut msg = sample();
        let original = msg.encode().unwrap();

        // when
        msg.sequence_num += 1;
        msg.checksum = 0xDEAD;
        let changed = msg.encode().unwrap();

        // then
        assert!(util::verify_checksum(&changed));
        assert_ne!(original[2..4], changed[2..4]);
    }

    #[test]
    fn decode_recovers_encoded_fields() {
        // given
        let msg = EchoMessage::request(ProtocolFamily::V6, 0xFFFF, 65535, -1);

        // when
        let decoded = EchoMessage::decode_fields(&msg.encode().unwrap()).unwrap();

        // then
        assert_eq!(decoded.message_type, 128);
        assert_eq!(decoded.message_code, 0);
        assert_eq!(decoded.identifier, 0xFFFF);
        assert_eq!(decoded.sequence_num, 65535);
        assert_eq!(decoded.send_timestamp, -1);
    }

    #[test]
    fn decode_ignores_trailing_payload() {
        let mut bytes = sample().encode().unwrap();
        bytes.extend_from_slice(&[0xAA; 40]);

        let decoded = EchoMessage::decode_fields(&bytes).unwrap();
        assert_eq!(decoded.sequence_num, 7);
    }

    #[test]
    fn short_message_is_malformed() {
        let bytes = sample().encode().unwrap();
        let err = EchoMessage::decode_fields(&bytes[..ECHO_MESSAGE_LEN - 1]).unwrap_err();
        assert!(matches!(err, ProbeError::Malformed(_)));
    }

    #[test]
    fn family_constants() {
        assert_eq!(ProtocolFamily::V4.protocol_number(), 1);
        assert_eq!(ProtocolFamily::V6.protocol_number(), 58);
        assert_eq!(ProtocolFamily::V4.echo_reply_type(), 0);
        assert_eq!(ProtocolFamily::V6.echo_reply_type(), 129);
        assert_eq!(ProtocolFamily::of(&"::1".parse().unwrap()), ProtocolFamily::V6);
    }
}
