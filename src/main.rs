use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{value_t, App, AppSettings, Arg};
use colored::*;

use echoprobe::{probe, util, Cycle, ErrorKind, ProbeConfig, ProtocolFamily};

fn main() -> Result<()> {
    let matches = App::new("echoprobe")
        .setting(AppSettings::ColoredHelp)
        .version("v1.0")
        .author("Bryan Becar <becar.bryan@gmail.com>")
        .about("Sends ICMP echo requests to a host and reports each reply's round trip time.")
        .arg(Arg::with_name("DESTINATION")
            .help("Hostname or IP adddress")
            .required(true)
            .index(1))
        .arg(Arg::with_name("timeout")
            .help("Set how long to wait for each reply before timing out (Default 1s)")
            .short("W")
            .takes_value(true))
        .arg(Arg::with_name("interval")
            .help("Set how long to wait in between requests (Default: the timeout)")
            .short("i")
            .takes_value(true))
        .arg(Arg::with_name("ttl")
            .help("Set ttl (hop limit for IPv6) on outgoing packets")
            .short("t")
            .takes_value(true))
        .arg(Arg::with_name("ipv4")
            .help("Only resolve to IPv4 addresses")
            .short("4")
            .conflicts_with("ipv6"))
        .arg(Arg::with_name("ipv6")
            .help("Only resolve to IPv6 addresses")
            .short("6"))
        .arg(Arg::with_name("numeric")
            .help("Don't look up hostnames of replying addresses")
            .short("n"))
        .arg(Arg::with_name("verbose")
            .help("Log more details to stderr (repeat for more)")
            .short("v")
            .multiple(true))
        .get_matches();

    // Handle needs to be kept alive until end of program
    let _logger = echoprobe::logging::configure(matches.occurrences_of("verbose"))?;

    let family = if matches.is_present("ipv4") {
        Some(ProtocolFamily::V4)
    } else if matches.is_present("ipv6") {
        Some(ProtocolFamily::V6)
    } else {
        None
    };

    let destination_host = matches.value_of("DESTINATION").unwrap_or_default();
    let destination = util::resolve_dest(destination_host, family)
        .with_context(|| format!("Error resolving destination {}", destination_host))?;

    let timeout = matches.value_of("timeout").unwrap_or("1s");
    let timeout = humantime::parse_duration(timeout)
        .context("Invalid duration for timeout (ex: 1s, 400ms, 1m)")?;
    if timeout.as_nanos() == 0 {
        bail!("Timeout must be longer than zero");
    }

    let interval = match matches.value_of("interval") {
        Some(i) => humantime::parse_duration(i).context("Invalid duration for interval (ex: 1s, 400ms, 1m)")?,
        None => timeout,
    };

    let ttl = if matches.is_present("ttl") {
        Some(value_t!(matches, "ttl", u32).context("Invalid ttl (ex: 64)")?)
    } else {
        None
    };

    let config = ProbeConfig::new(destination, timeout)
        .with_interval(interval)
        .with_ttl(ttl);
    let mut pinger = probe::open(&config)
        .context("Error opening raw ICMP socket (are you root / do you have CAP_NET_RAW?)")?;

    println!("{} {} ({})", "PING".cyan(), destination_host.bold(), destination);

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();

    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    }).context("Error setting Ctrl-C handler")?;

    let resolve = !matches.is_present("numeric");
    let mut answered = 0u64;
    let sent = probe::run(&mut pinger, config.interval, &running, |cycle| {
        if cycle.outcome.is_ok() {
            answered += 1;
        }
        print_cycle(cycle, config.family, resolve);
    });

    println!(); // New line
    println!("{} {} {} {}", "===".yellow(), destination_host.bold(), "probe summary".cyan(), "===".yellow());
    println!("{} requests sent, {} echo replies received", sent.to_string().bold(), answered.to_string().bold());

    Ok(())
}

fn print_cycle(cycle: &Cycle, family: ProtocolFamily, resolve: bool) {
    let pong = match &cycle.outcome {
        Ok(p) => p,
        Err(e) => {
            match e.kind() {
                ErrorKind::Timeout => println!("Request icmp_seq={} timed out", cycle.sequence.to_string().bold()),
                kind => eprintln!("icmp_seq={} {}: {}", cycle.sequence, kind.to_string().red(), e),
            }
            return;
        }
    };

    let hostname = if resolve { dns_lookup::lookup_addr(&pong.source).ok() } else { None };
    print!("{} bytes from {} ({}): ",
        pong.payload_length, hostname.unwrap_or_else(|| pong.source.to_string()).yellow(), pong.source);

    print!("icmp_seq={} ", pong.sequence.to_string().bold());

    // The kernel hands us IPv6 replies without their header, so the hop limit is unknown
    if family == ProtocolFamily::V4 || pong.ttl != 0 {
        print!("ttl={} ", pong.ttl.to_string().bold());
    }

    println!("time={}ms", format!("{:.3}", pong.round_trip_nanos as f64 / 1e6).bold());
}
