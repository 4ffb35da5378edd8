//! Centralized runtime constants for the switch fabric.
//!
//! All table capacities, timeouts, and weights are collected here so they can
//! be found and adjusted in a single place rather than scattered across
//! modules.

/// Number of slots in a switch's MAC address table.
pub const MAC_TABLE_CAPACITY: usize = 1024;

/// Seconds after which a learned MAC entry is considered stale.
pub const MAC_AGING_SECS: u64 = 300;

/// Number of priority classes per egress port (DSCP/PCP space is 0..=7).
pub const PRIORITY_CLASSES: usize = 8;

/// Capacity of a single per-priority egress ring.
pub const PRIORITY_QUEUE_CAPACITY: usize = 512;

/// Starting scheduler credits per priority class, index 0..=7 (class 7 = EF).
pub const DRR_WEIGHTS: [u32; PRIORITY_CLASSES] = [1, 2, 4, 8, 16, 32, 64, 128];

/// Maximum frames a single scheduler sweep may emit.
pub const DEFAULT_BURST_SIZE: usize = 32;

/// Maximum ports a single switch instance may own.
pub const MAX_PORTS: usize = 11;

/// Capacity of a virtual-link tx/rx ring, in frames.
pub const VLINK_QUEUE_CAPACITY: usize = 16384;

/// Maximum frame size the virtual-link fabric will carry.
pub const MAX_FRAME_SIZE: usize = 9000;

/// Default polling-recv timeout for a virtual-link endpoint.
pub const DEFAULT_RECV_TIMEOUT_US: u64 = 100_000;

/// Grace window after the ARP bootstrap request before UDP traffic begins.
pub const ARP_BOOTSTRAP_GRACE_MS: u64 = 100;

/// Minimum bytes required before a frame can carry an IPv4/IPv6 header.
pub const MIN_IP_FRAME_LEN: usize = 14 + 20;

/// Byte width of a single 802.1Q VLAN tag.
pub const VLAN_TAG_LEN: usize = 4;

/// The broadcast MAC address, ff:ff:ff:ff:ff:ff.
pub const BROADCAST_MAC: [u8; 6] = [0xff; 6];
