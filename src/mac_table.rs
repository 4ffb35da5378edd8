//! MAC learning table (component B).
//!
//! Fixed-capacity, open-addressed table mapping MAC address to egress port.
//! Collisions are resolved by linear probing. The whole table is guarded by
//! a single mutex: aging plus linear probing is not a good fit for a
//! lock-free structure, and a single lock keeps readers from ever
//! misrouting on a torn read.

use std::collections::HashSet;
use std::io::BufRead;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::{MAC_AGING_SECS, MAC_TABLE_CAPACITY};
use crate::mac::MacAddress;

#[derive(Debug, Clone, Copy)]
struct MacEntry {
    mac: MacAddress,
    port: usize,
    last_seen: u64,
    valid: bool,
}

impl MacEntry {
    const EMPTY: MacEntry = MacEntry {
        mac: MacAddress([0; 6]),
        port: 0,
        last_seen: 0,
        valid: false,
    };
}

/// Result of loading a static MAC table file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StaticLoadSummary {
    pub loaded: usize,
    pub skipped: usize,
}

struct Inner {
    slots: Vec<MacEntry>,
    /// MACs pinned by a static load; opportunistic learning never overwrites them.
    pinned: HashSet<MacAddress>,
}

/// A fixed-capacity MAC learning table shared by all ingress workers of a
/// switch instance.
pub struct MacTable {
    inner: Mutex<Inner>,
    capacity: usize,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

impl MacTable {
    pub fn new() -> Self {
        Self::with_capacity(MAC_TABLE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        MacTable {
            inner: Mutex::new(Inner {
                slots: vec![MacEntry::EMPTY; capacity],
                pinned: HashSet::new(),
            }),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Insert or refresh a MAC -> port mapping. Returns `false` only if the
    /// table is entirely full of valid, non-expired entries.
    pub fn insert(&self, mac: MacAddress, port: usize) -> bool {
        self.insert_at(mac, port, now_secs())
    }

    fn insert_at(&self, mac: MacAddress, port: usize, now: u64) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let start = mac.hash_bucket(self.capacity);
        for step in 0..self.capacity {
            let idx = (start + step) % self.capacity;
            let slot = &inner.slots[idx];
            let expired = slot.valid && now.saturating_sub(slot.last_seen) > MAC_AGING_SECS;
            if !slot.valid || expired || slot.mac == mac {
                inner.slots[idx] = MacEntry {
                    mac,
                    port,
                    last_seen: now,
                    valid: true,
                };
                return true;
            }
        }
        false
    }

    /// Pin a MAC to a port from static configuration; opportunistic learning
    /// will never overwrite it.
    pub fn insert_static(&self, mac: MacAddress, port: usize) -> bool {
        let ok = self.insert_at(mac, port, now_secs());
        if ok {
            self.inner.lock().unwrap().pinned.insert(mac);
        }
        ok
    }

    /// Learn a source MAC on an ingress port, unless it is pinned by a
    /// static entry.
    pub fn learn(&self, mac: MacAddress, port: usize) {
        if self.inner.lock().unwrap().pinned.contains(&mac) {
            return;
        }
        self.insert(mac, port);
    }

    /// Look up the egress port for a MAC. A hit requires full equality and
    /// an unexpired timestamp; aged entries are invalidated in place as they
    /// are encountered, and probing continues past them.
    pub fn lookup(&self, mac: MacAddress) -> Option<usize> {
        self.lookup_at(mac, now_secs())
    }

    fn lookup_at(&self, mac: MacAddress, now: u64) -> Option<usize> {
        let mut inner = self.inner.lock().unwrap();
        let start = mac.hash_bucket(self.capacity);
        for step in 0..self.capacity {
            let idx = (start + step) % self.capacity;
            let slot = inner.slots[idx];
            if !slot.valid {
                return None;
            }
            if slot.mac == mac {
                if now.saturating_sub(slot.last_seen) <= MAC_AGING_SECS {
                    return Some(slot.port);
                }
                inner.slots[idx].valid = false;
                continue;
            }
        }
        None
    }

    /// Scan all entries and invalidate expired ones. Called opportunistically,
    /// not from a dedicated thread.
    pub fn age(&self) {
        let now = now_secs();
        let mut inner = self.inner.lock().unwrap();
        for slot in inner.slots.iter_mut() {
            if slot.valid && now.saturating_sub(slot.last_seen) > MAC_AGING_SECS {
                slot.valid = false;
            }
        }
    }

    /// Parse lines of the form `MAC port-index [comment]`. Lines starting
    /// with `#` or blank lines are ignored. `configured_ports` restricts
    /// which port indices are legal targets (`None` disables the check).
    pub fn load_static(
        &self,
        reader: impl BufRead,
        configured_ports: Option<&[usize]>,
    ) -> StaticLoadSummary {
        let mut summary = StaticLoadSummary::default();
        for line in reader.lines() {
            let Ok(line) = line else {
                summary.skipped += 1;
                continue;
            };
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let mut parts = trimmed.split_whitespace();
            let (Some(mac_str), Some(port_str)) = (parts.next(), parts.next()) else {
                tracing::warn!("unparseable static MAC line: {trimmed:?}");
                summary.skipped += 1;
                continue;
            };
            let Some(mac) = MacAddress::parse(mac_str) else {
                tracing::warn!("bad MAC address in static line: {mac_str:?}");
                summary.skipped += 1;
                continue;
            };
            let Ok(port) = port_str.parse::<usize>() else {
                tracing::warn!("bad port index in static line: {port_str:?}");
                summary.skipped += 1;
                continue;
            };
            if let Some(ports) = configured_ports {
                if !ports.contains(&port) {
                    tracing::warn!("static MAC {mac} targets unconfigured port {port}");
                    summary.skipped += 1;
                    continue;
                }
            }
            if self.insert_static(mac, port) {
                summary.loaded += 1;
            } else {
                tracing::warn!("MAC table full, dropping static entry for {mac}");
                summary.skipped += 1;
            }
        }
        summary
    }
}

impl Default for MacTable {
    fn default() -> Self {
        Self::new()
    }
}
