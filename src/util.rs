use std::io::{Error, ErrorKind, Result};
use std::net::IpAddr;

use crate::packet::ProtocolFamily;

/// Resolves `dest` to a single address. Literal addresses are taken as-is,
/// hostnames go through the system resolver. If `family` is given, only
/// addresses of that family are considered.
pub fn resolve_dest(dest: &str, family: Option<ProtocolFamily>) -> Result<IpAddr> {
    let candidates = match dest.parse::<IpAddr>() {
        Ok(addr) => vec![addr],
        Err(_) => dns_lookup::lookup_host(dest)?,
    };

    candidates
        .into_iter()
        .find(|addr| family.map_or(true, |f| ProtocolFamily::of(addr) == f))
        .ok_or_else(|| Error::new(ErrorKind::NotFound, format!("no usable address for {}", dest)))
}

/// Internet checksum (RFC 1071) of `data`.
pub fn checksum(data: &[u8]) -> u16 {
    let mut sum = sum_be_words(data);
    while sum >> 16 != 0 {
        sum = (sum >> 16) + (sum & 0xFFFF);
    }

    !sum as u16 // The checksum field should be the ones complement of the sum
}

/// True if `data`, checksum field included, sums to 0xFFFF.
pub fn verify_checksum(data: &[u8]) -> bool {
    checksum(data) == 0
}

/// Sum all words (16 bit chunks) in the given data, each treated as big endian.
/// A trailing odd byte is the high half of a word whose low half is zero.
fn sum_be_words(data: &[u8]) -> u32 {
    data.chunks(2)
        .map(|word| match *word {
            [wh] => u16::from_be_bytes([wh, 0]),
            [wh, wl] => u16::from_be_bytes([wh, wl]),
            _ => unreachable!(),
        })
        .map(u32::from)
        .fold(0, u32::wrapping_add)
}
