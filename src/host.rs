//! Virtual host: byte-exact Ethernet/ARP/IPv4/UDP builders and a traffic
//! generator thread that ARP-bootstraps before sending UDP load.
//!
//! A host sends one ARP request, waits [`ARP_BOOTSTRAP_GRACE_MS`] regardless of
//! whether a reply arrives, then starts its UDP packet generator. A host
//! never blocks indefinitely on ARP resolution — the destination MAC is
//! supplied by the caller up front, matching the flood-on-unknown-unicast
//! behavior that a miss would hit anyway on the switch side.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::ARP_BOOTSTRAP_GRACE_MS;
use crate::frame::Frame;
use crate::mac::MacAddress;
use crate::vlink::VlinkEndpoint;

const ETHERTYPE_ARP: [u8; 2] = [0x08, 0x06];
const ETHERTYPE_IPV4: [u8; 2] = [0x08, 0x00];
const ARP_HTYPE_ETHERNET: [u8; 2] = [0x00, 0x01];
const ARP_PTYPE_IPV4: [u8; 2] = [0x08, 0x00];
const ARP_OP_REQUEST: [u8; 2] = [0x00, 0x01];
const ARP_OP_REPLY: [u8; 2] = [0x00, 0x02];

/// Build an Ethernet + ARP "who-has" request, broadcast to `ff:ff:ff:ff:ff:ff`.
pub fn build_arp_request(src_mac: MacAddress, src_ip: Ipv4Addr, target_ip: Ipv4Addr) -> Frame {
    let mut buf = vec![0u8; 14 + 28];
    buf[0..6].copy_from_slice(&MacAddress::BROADCAST.0);
    buf[6..12].copy_from_slice(&src_mac.0);
    buf[12..14].copy_from_slice(&ETHERTYPE_ARP);

    let arp = &mut buf[14..];
    arp[0..2].copy_from_slice(&ARP_HTYPE_ETHERNET);
    arp[2..4].copy_from_slice(&ARP_PTYPE_IPV4);
    arp[4] = 6;
    arp[5] = 4;
    arp[6..8].copy_from_slice(&ARP_OP_REQUEST);
    arp[8..14].copy_from_slice(&src_mac.0);
    arp[14..18].copy_from_slice(&src_ip.octets());
    // sender hardware/protocol already zeroed for the "unknown" target MAC.
    arp[24..28].copy_from_slice(&target_ip.octets());
    Frame::new(buf)
}

/// Build an Ethernet + ARP "is-at" reply addressed directly to `dst_mac`.
pub fn build_arp_reply(
    src_mac: MacAddress,
    src_ip: Ipv4Addr,
    dst_mac: MacAddress,
    dst_ip: Ipv4Addr,
) -> Frame {
    let mut buf = vec![0u8; 14 + 28];
    buf[0..6].copy_from_slice(&dst_mac.0);
    buf[6..12].copy_from_slice(&src_mac.0);
    buf[12..14].copy_from_slice(&ETHERTYPE_ARP);

    let arp = &mut buf[14..];
    arp[0..2].copy_from_slice(&ARP_HTYPE_ETHERNET);
    arp[2..4].copy_from_slice(&ARP_PTYPE_IPV4);
    arp[4] = 6;
    arp[5] = 4;
    arp[6..8].copy_from_slice(&ARP_OP_REPLY);
    arp[8..14].copy_from_slice(&src_mac.0);
    arp[14..18].copy_from_slice(&src_ip.octets());
    arp[18..24].copy_from_slice(&dst_mac.0);
    arp[24..28].copy_from_slice(&dst_ip.octets());
    Frame::new(buf)
}

/// Parsed view of an incoming ARP packet, if `data` is one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArpPacket {
    pub is_request: bool,
    pub sender_mac: MacAddress,
    pub sender_ip: Ipv4Addr,
    pub target_ip: Ipv4Addr,
}

pub fn parse_arp(data: &[u8]) -> Option<ArpPacket> {
    if data.len() < 14 + 28 {
        return None;
    }
    if data[12..14] != ETHERTYPE_ARP {
        return None;
    }
    let arp = &data[14..];
    let is_request = arp[6..8] == ARP_OP_REQUEST;
    let is_reply = arp[6..8] == ARP_OP_REPLY;
    if !is_request && !is_reply {
        return None;
    }
    let sender_mac = MacAddress::from_slice(&arp[8..14])?;
    let sender_ip = Ipv4Addr::new(arp[14], arp[15], arp[16], arp[17]);
    let target_ip = Ipv4Addr::new(arp[24], arp[25], arp[26], arp[27]);
    Some(ArpPacket {
        is_request,
        sender_mac,
        sender_ip,
        target_ip,
    })
}

/// Build an Ethernet + IPv4 + UDP datagram, with IPv4 header checksum
/// computed over the header (UDP checksum left as zero, per the datagram's
/// optional-checksum allowance).
pub fn build_udp_packet(
    dst_mac: MacAddress,
    src_mac: MacAddress,
    dst_ip: Ipv4Addr,
    src_ip: Ipv4Addr,
    dst_port: u16,
    src_port: u16,
    payload: &[u8],
) -> Frame {
    let ip_len = 20 + 8 + payload.len();
    let total_len = 14 + ip_len;
    let mut buf = vec![0u8; total_len];

    buf[0..6].copy_from_slice(&dst_mac.0);
    buf[6..12].copy_from_slice(&src_mac.0);
    buf[12..14].copy_from_slice(&ETHERTYPE_IPV4);

    let ip = &mut buf[14..14 + 20];
    ip[0] = 0x45;
    ip[1] = 0x00;
    ip[2..4].copy_from_slice(&(ip_len as u16).to_be_bytes());
    ip[8] = 64; // TTL
    ip[9] = 17; // UDP
    ip[12..16].copy_from_slice(&src_ip.octets());
    ip[16..20].copy_from_slice(&dst_ip.octets());
    let checksum = Frame::ones_complement_checksum(ip);
    ip[10..12].copy_from_slice(&checksum.to_be_bytes());

    let udp_len = 8 + payload.len();
    let udp = &mut buf[14 + 20..14 + 20 + 8 + payload.len()];
    udp[0..2].copy_from_slice(&src_port.to_be_bytes());
    udp[2..4].copy_from_slice(&dst_port.to_be_bytes());
    udp[4..6].copy_from_slice(&(udp_len as u16).to_be_bytes());
    udp[8..].copy_from_slice(payload);

    Frame::new(buf)
}

/// Static identity and traffic-generation parameters for one virtual host.
#[derive(Debug, Clone)]
pub struct HostConfig {
    pub mac: MacAddress,
    pub ip: Ipv4Addr,
    pub dst_mac: MacAddress,
    pub dst_ip: Ipv4Addr,
    pub dst_port: u16,
    pub src_port: u16,
    pub packets_per_second: u32,
    /// `None` means run until told to stop.
    pub packet_count: Option<u64>,
}

#[derive(Default)]
pub struct HostStats {
    pub tx_packets: AtomicU64,
    pub tx_bytes: AtomicU64,
    pub tx_errors: AtomicU64,
    pub rx_packets: AtomicU64,
    pub rx_bytes: AtomicU64,
}

/// Run one host's packet generator to completion (or until `keep_running` is
/// cleared). Blocks the calling thread; callers spawn one OS thread per host.
pub fn run_packet_generator(
    config: &HostConfig,
    endpoint: &Arc<VlinkEndpoint>,
    stats: &HostStats,
    keep_running: Arc<AtomicBool>,
) {
    let arp = build_arp_request(config.mac, config.ip, config.dst_ip);
    if endpoint.send(arp).is_ok() {
        tracing::info!(src_ip = %config.ip, dst_ip = %config.dst_ip, "sent ARP bootstrap request");
    } else {
        tracing::warn!("ARP bootstrap request failed to send");
    }
    std::thread::sleep(Duration::from_millis(ARP_BOOTSTRAP_GRACE_MS));

    if config.packets_per_second == 0 {
        return;
    }
    let interval = Duration::from_secs_f64(1.0 / config.packets_per_second as f64);
    let payload = b"Test packet";
    let mut sent: u64 = 0;

    while keep_running.load(Ordering::Relaxed) {
        if let Some(limit) = config.packet_count {
            if sent >= limit {
                break;
            }
        }
        let frame = build_udp_packet(
            config.dst_mac,
            config.mac,
            config.dst_ip,
            config.ip,
            config.dst_port,
            config.src_port,
            payload,
        );
        let len = frame.len() as u64;
        match endpoint.send(frame) {
            Ok(()) => {
                stats.tx_packets.fetch_add(1, Ordering::Relaxed);
                stats.tx_bytes.fetch_add(len, Ordering::Relaxed);
                sent += 1;
            }
            Err(_) => {
                stats.tx_errors.fetch_add(1, Ordering::Relaxed);
            }
        }
        std::thread::sleep(interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac(n: u8) -> MacAddress {
        MacAddress([2, 0, 0, 0, 0, n])
    }

    #[test]
    fn arp_request_is_broadcast_and_parses_back() {
        let src_ip = Ipv4Addr::new(10, 0, 0, 1);
        let target_ip = Ipv4Addr::new(10, 0, 0, 2);
        let frame = build_arp_request(mac(1), src_ip, target_ip);
        assert!(frame.dst_mac().unwrap().is_broadcast());
        let parsed = parse_arp(frame.as_bytes()).unwrap();
        assert!(parsed.is_request);
        assert_eq!(parsed.sender_mac, mac(1));
        assert_eq!(parsed.sender_ip, src_ip);
        assert_eq!(parsed.target_ip, target_ip);
    }

    #[test]
    fn arp_reply_targets_requester_directly() {
        let frame = build_arp_reply(
            mac(2),
            Ipv4Addr::new(10, 0, 0, 2),
            mac(1),
            Ipv4Addr::new(10, 0, 0, 1),
        );
        assert_eq!(frame.dst_mac().unwrap(), mac(1));
        let parsed = parse_arp(frame.as_bytes()).unwrap();
        assert!(!parsed.is_request);
        assert_eq!(parsed.sender_mac, mac(2));
    }

    #[test]
    fn udp_packet_has_valid_ip_checksum() {
        let frame = build_udp_packet(
            mac(2),
            mac(1),
            Ipv4Addr::new(10, 0, 0, 2),
            Ipv4Addr::new(10, 0, 0, 1),
            9000,
            12345,
            b"hello",
        );
        let sum = Frame::ones_complement_checksum(&frame.as_bytes()[14..34]);
        assert_eq!(sum, 0);
    }

    #[test]
    fn udp_packet_length_matches_payload() {
        let payload = b"Test packet";
        let frame = build_udp_packet(
            mac(2),
            mac(1),
            Ipv4Addr::new(10, 0, 0, 2),
            Ipv4Addr::new(10, 0, 0, 1),
            9000,
            12345,
            payload,
        );
        assert_eq!(frame.len(), 14 + 20 + 8 + payload.len());
    }

    #[test]
    fn non_arp_frame_does_not_parse() {
        let frame = build_udp_packet(
            mac(2),
            mac(1),
            Ipv4Addr::new(10, 0, 0, 2),
            Ipv4Addr::new(10, 0, 0, 1),
            1,
            2,
            b"x",
        );
        assert!(parse_arp(frame.as_bytes()).is_none());
    }
}
