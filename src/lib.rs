//! ICMP echo probing for IPv4 and IPv6.
//!
//! A [`ping::Pinger`] owns a [`ping::Transport`] bound to one destination and
//! runs request/reply cycles over it, one inbound datagram per cycle.
//! [`probe::run`] repeats those cycles at a fixed interval until stopped.

pub mod error;
pub mod header;
pub mod logging;
pub mod packet;
pub mod ping;
pub mod probe;
pub mod util;

#[cfg(test)]
mod test_utils;

pub use error::{ErrorKind, ProbeError};
pub use packet::{EchoMessage, ProtocolFamily};
pub use ping::{Pinger, ProbeResult, ProbeSession, SocketTransport, Transport};
pub use probe::{Cycle, ProbeConfig};
