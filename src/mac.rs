//! The 6-byte MAC address primitive shared by the frame view and MAC table.

use std::fmt;

use crate::config::BROADCAST_MAC;

/// An opaque 6-byte hardware address, compared and hashed byte-for-byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    pub const BROADCAST: MacAddress = MacAddress(BROADCAST_MAC);

    pub fn is_broadcast(&self) -> bool {
        self.0 == BROADCAST_MAC
    }

    /// Multicast addresses have the low bit of the first octet set.
    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }

    /// A cheap polynomial hash over the 6 bytes, used to pick the MAC
    /// table's starting probe bucket.
    pub fn hash_bucket(&self, capacity: usize) -> usize {
        let mut h: u64 = 0;
        for &b in &self.0 {
            h = h.wrapping_mul(31).wrapping_add(b as u64);
        }
        (h as usize) % capacity
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != 6 {
            return None;
        }
        let mut arr = [0u8; 6];
        arr.copy_from_slice(bytes);
        Some(MacAddress(arr))
    }

    /// Parse the canonical `xx:xx:xx:xx:xx:xx` textual form.
    pub fn parse(s: &str) -> Option<Self> {
        let mut out = [0u8; 6];
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 6 {
            return None;
        }
        for (i, part) in parts.iter().enumerate() {
            out[i] = u8::from_str_radix(part, 16).ok()?;
        }
        Some(MacAddress(out))
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}
