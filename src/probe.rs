use std::io::{Error, ErrorKind, Result};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};

use crate::error::ProbeError;
use crate::packet::ProtocolFamily;
use crate::ping::{Pinger, ProbeResult, ProbeSession, SocketTransport, Transport};

/// Everything a probe session is started from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeConfig {
    pub destination: IpAddr,
    pub family: ProtocolFamily,
    pub timeout: Duration,
    pub interval: Duration,
    pub ttl: Option<u32>,
}

impl ProbeConfig {
    /// Waits `timeout` for each reply and sleeps the same between cycles.
    /// The timeout must be non-zero, which [`open`] checks.
    pub fn new(destination: IpAddr, timeout: Duration) -> Self {
        ProbeConfig {
            destination,
            family: ProtocolFamily::of(&destination),
            timeout,
            interval: timeout,
            ttl: None,
        }
    }

    pub fn with_interval(self, interval: Duration) -> Self {
        ProbeConfig { interval, ..self }
    }

    pub fn with_ttl(self, ttl: Option<u32>) -> Self {
        ProbeConfig { ttl, ..self }
    }
}

/// Opens the raw socket for `config`. Failing here is fatal to the run.
pub fn open(config: &ProbeConfig) -> Result<Pinger<SocketTransport>> {
    if config.timeout.as_nanos() == 0 {
        return Err(Error::new(ErrorKind::InvalidInput, "timeout must be longer than zero"));
    }

    let transport = SocketTransport::connect(config.destination)?;
    if let Some(ttl) = config.ttl {
        transport.set_ttl(ttl)?;
    }
    debug!("Opened raw {:?} socket to {}", config.family, config.destination);

    Ok(Pinger::new(transport, ProbeSession::new(config.family, config.timeout)))
}

/// Outcome of one cycle, tagged with the sequence number it was sent with.
#[derive(Debug)]
pub struct Cycle {
    pub sequence: u16,
    pub outcome: std::result::Result<ProbeResult, ProbeError>,
}

/// Runs cycles back to back, `interval` apart, until `running` is cleared.
/// The flag is checked before each cycle and after each sleep. A cycle that
/// fails after the flag was cleared is not reported. Returns the number of
/// cycles run.
pub fn run<T, F>(pinger: &mut Pinger<T>, interval: Duration, running: &AtomicBool, mut report: F) -> u64
where
    T: Transport,
    F: FnMut(&Cycle),
{
    let mut cycles = 0;
    while running.load(Ordering::SeqCst) {
        let sequence = pinger.session().next_sequence();
        let cycle = Cycle { sequence, outcome: pinger.round_trip() };
        cycles += 1;

        if cycle.outcome.is_err() && !running.load(Ordering::SeqCst) {
            debug!("Dropping cycle icmp_seq={} cut short by stop", sequence);
            break;
        }
        if let Err(e) = &cycle.outcome {
            warn!("Cycle icmp_seq={} failed: {}", sequence, e);
        }
        report(&cycle);

        if !running.load(Ordering::SeqCst) {
            break;
        }
        thread::sleep(interval);
    }

    info!("Stopped after {} cycles", cycles);
    cycles
}
