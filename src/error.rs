use std::fmt;
use std::io;
use std::time::Duration;

use thiserror::Error;

/// Why a single probe cycle produced no measurement. None of these are fatal
/// to the probe loop.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("transport failure: {0}")]
    Transport(#[source] io::Error),

    #[error("no echo reply within {0:?}")]
    Timeout(Duration),

    #[error("malformed ICMP message: {0}")]
    Malformed(String),

    #[error("unparseable IP header: {0}")]
    HeaderParse(String),

    #[error("expected an echo reply, got ICMP type {icmp_type} code {code}")]
    ProtocolMismatch { icmp_type: u8, code: u8 },
}

/// Coarse tag reported alongside a failed cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Transport,
    Timeout,
    Malformed,
    ProtocolMismatch,
}

impl ProbeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProbeError::Transport(_) => ErrorKind::Transport,
            ProbeError::Timeout(_) => ErrorKind::Timeout,
            ProbeError::Malformed(_) | ProbeError::HeaderParse(_) => ErrorKind::Malformed,
            ProbeError::ProtocolMismatch { .. } => ErrorKind::ProtocolMismatch,
        }
    }

    /// Classifies a failed read. An expired read deadline surfaces as
    /// `WouldBlock` on unix and `TimedOut` on windows. A signal (Ctrl-C) cutting
    /// the wait short means no reply arrived either.
    pub fn from_read(err: io::Error, budget: Duration) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted => {
                ProbeError::Timeout(budget)
            }
            _ => ProbeError::Transport(err),
        }
    }
}

impl From<bincode::Error> for ProbeError {
    fn from(err: bincode::Error) -> Self {
        ProbeError::Malformed(err.to_string())
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            ErrorKind::Transport => "transport",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Malformed => "malformed",
            ErrorKind::ProtocolMismatch => "protocol-mismatch",
        };
        f.write_str(tag)
    }
}
