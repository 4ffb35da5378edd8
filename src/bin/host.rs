//! Runs one or more virtual hosts generating ARP/UDP traffic into a single
//! virtual-link endpoint each.
//!
//! Usage:
//!   host -n N [-p] [-r pps] [-c count] [-d duration-seconds]
//!        [--dst-mac MAC] [--dst-ip IP] [--dst-port PORT]

use std::env;
use std::net::Ipv4Addr;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use vswitch::host::{run_packet_generator, HostConfig, HostStats};
use vswitch::{MacAddress, VlinkConfig, VlinkManager};

struct Args {
    num_hosts: usize,
    pktgen_enabled: bool,
    pps: u32,
    count: u64,
    duration_secs: Option<u64>,
    dst_mac: MacAddress,
    dst_ip: Ipv4Addr,
    dst_port: u16,
}

fn parse_args() -> Result<Args, String> {
    let mut num_hosts = 1usize;
    let mut pktgen_enabled = false;
    let mut pps = 10u32;
    let mut count = 0u64; // 0 = infinite
    let mut duration_secs = None;
    let mut dst_mac = MacAddress([0x02, 0, 0, 0, 0xff, 0xff]);
    let mut dst_ip = Ipv4Addr::new(10, 0, 0, 254);
    let mut dst_port = 9000u16;

    let mut it = env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "-n" => num_hosts = next(&mut it, "-n")?.parse().map_err(|_| "-n must be a number")?,
            "-p" => pktgen_enabled = true,
            "-r" => pps = next(&mut it, "-r")?.parse().map_err(|_| "-r must be a number")?,
            "-c" => count = next(&mut it, "-c")?.parse().map_err(|_| "-c must be a number")?,
            "-d" => {
                duration_secs = Some(
                    next(&mut it, "-d")?
                        .parse()
                        .map_err(|_| "-d must be a number")?,
                )
            }
            "--dst-mac" => {
                dst_mac = MacAddress::parse(&next(&mut it, "--dst-mac")?)
                    .ok_or("--dst-mac is not a valid MAC address")?
            }
            "--dst-ip" => {
                dst_ip = next(&mut it, "--dst-ip")?
                    .parse()
                    .map_err(|_| "--dst-ip is not a valid IPv4 address")?
            }
            "--dst-port" => {
                dst_port = next(&mut it, "--dst-port")?
                    .parse()
                    .map_err(|_| "--dst-port must be a number")?
            }
            other => return Err(format!("unknown argument: {other}")),
        }
    }

    Ok(Args {
        num_hosts,
        pktgen_enabled,
        pps,
        count,
        duration_secs,
        dst_mac,
        dst_ip,
        dst_port,
    })
}

fn next(it: &mut impl Iterator<Item = String>, flag: &str) -> Result<String, String> {
    it.next().ok_or_else(|| format!("{flag} requires a value"))
}

fn main() -> ExitCode {
    vswitch::init_logging("host=info");

    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            tracing::error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let manager = Arc::new(VlinkManager::new(0xee, args.num_hosts, VlinkConfig::default()));
    let keep_running = Arc::new(AtomicBool::new(true));
    {
        let keep_running = keep_running.clone();
        if let Err(e) = ctrlc::set_handler(move || {
            keep_running.store(false, Ordering::Relaxed);
        }) {
            tracing::warn!("failed to install signal handler: {e}");
        }
    }

    let mut handles = Vec::new();
    for i in 0..args.num_hosts {
        let endpoint = manager
            .endpoint(i)
            .expect("endpoint index is within configured host count");
        let config = HostConfig {
            mac: endpoint.mac(),
            ip: Ipv4Addr::new(10, 0, 0, (i + 1) as u8),
            dst_mac: args.dst_mac,
            dst_ip: args.dst_ip,
            dst_port: args.dst_port,
            src_port: 12345,
            packets_per_second: if args.pktgen_enabled { args.pps } else { 0 },
            packet_count: if args.count == 0 { None } else { Some(args.count) },
        };
        let keep_running = keep_running.clone();
        let handle = std::thread::Builder::new()
            .name(format!("vhost-pktgen-{i}"))
            .spawn(move || {
                let stats = HostStats::default();
                run_packet_generator(&config, &endpoint, &stats, keep_running);
                tracing::info!(
                    host = i,
                    tx_packets = stats.tx_packets.load(Ordering::Relaxed),
                    tx_errors = stats.tx_errors.load(Ordering::Relaxed),
                    "host packet generator finished"
                );
            })
            .expect("failed to spawn host packet generator thread");
        handles.push(handle);
    }

    if let Some(secs) = args.duration_secs {
        std::thread::sleep(Duration::from_secs(secs));
        keep_running.store(false, Ordering::Relaxed);
    }

    for handle in handles {
        let _ = handle.join();
    }

    ExitCode::SUCCESS
}
