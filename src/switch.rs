//! Forwarding plane (component E): the `IngressEgress` adapter seam, port
//! state, and the switch instance that ties MAC learning, TTL rewrite, QoS
//! classification, and scheduling into one service loop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::DEFAULT_BURST_SIZE;
use crate::frame::{self, Frame, TtlOutcome};
use crate::mac::MacAddress;
use crate::mac_table::MacTable;
use crate::qos::{EgressQueues, Scheduler};

/// The pluggable boundary between a switch instance and whatever actually
/// moves bytes: the virtual-link fabric in this crate, or (out of scope
/// here) a real NIC/packet-socket backend a host integration could supply.
pub trait IngressEgress: Send + Sync {
    fn recv_burst(&self, port: usize, max: usize) -> Vec<Frame>;
    fn send_burst(&self, port: usize, frames: Vec<Frame>) -> usize;
    fn port_count(&self) -> usize;
    fn port_mac(&self, port: usize) -> MacAddress;
    fn enable_promiscuous(&self, port: usize);
}

/// Per-port configuration and per-class egress queues.
pub struct Port {
    pub index: usize,
    /// When set, VLAN PCP takes priority over DSCP for classification.
    pub vlan_priority: bool,
    queues: Mutex<EgressQueues>,
    scheduler: Mutex<Scheduler>,
}

impl Port {
    pub fn new(index: usize) -> Self {
        Port {
            index,
            vlan_priority: false,
            queues: Mutex::new(EgressQueues::new()),
            scheduler: Mutex::new(Scheduler::new()),
        }
    }

    pub fn with_vlan_priority(index: usize, vlan_priority: bool) -> Self {
        Port {
            index,
            vlan_priority,
            queues: Mutex::new(EgressQueues::new()),
            scheduler: Mutex::new(Scheduler::new()),
        }
    }
}

/// Aggregate, lock-free counters for a switch instance's forwarding plane.
#[derive(Default)]
pub struct SwitchCounters {
    pub rx: AtomicU64,
    pub tx: AtomicU64,
    pub dropped: AtomicU64,
    pub ttl_expired: AtomicU64,
    pub qos_classified: AtomicU64,
}

impl SwitchCounters {
    pub fn snapshot(&self) -> SwitchCountersSnapshot {
        SwitchCountersSnapshot {
            rx: self.rx.load(Ordering::Relaxed),
            tx: self.tx.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            ttl_expired: self.ttl_expired.load(Ordering::Relaxed),
            qos_classified: self.qos_classified.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SwitchCountersSnapshot {
    pub rx: u64,
    pub tx: u64,
    pub dropped: u64,
    pub ttl_expired: u64,
    pub qos_classified: u64,
}

/// A single simulated switch: one MAC table, one port array, one adapter.
pub struct SwitchInstance {
    pub id: u8,
    adapter: Arc<dyn IngressEgress>,
    mac_table: MacTable,
    ports: Vec<Port>,
    pub counters: SwitchCounters,
}

impl SwitchInstance {
    pub fn new(id: u8, adapter: Arc<dyn IngressEgress>) -> Self {
        let num_ports = adapter.port_count();
        let ports = (0..num_ports).map(Port::new).collect();
        SwitchInstance {
            id,
            adapter,
            mac_table: MacTable::new(),
            ports,
            counters: SwitchCounters::default(),
        }
    }

    pub fn port_count(&self) -> usize {
        self.ports.len()
    }

    pub fn mac_table(&self) -> &MacTable {
        &self.mac_table
    }

    pub fn set_vlan_priority(&mut self, port: usize, enabled: bool) {
        if let Some(p) = self.ports.get_mut(port) {
            p.vlan_priority = enabled;
        }
    }

    /// One sweep: drain every ingress port, forward/flood/drop each frame,
    /// then drain every egress port's scheduler and hand the result to the
    /// adapter. Returns the number of frames actually transmitted.
    pub fn service_once(&self, burst_size: usize) -> usize {
        for ingress in 0..self.ports.len() {
            let frames = self.adapter.recv_burst(ingress, burst_size);
            for frame in frames {
                self.counters.rx.fetch_add(1, Ordering::Relaxed);
                self.ingest(ingress, frame);
            }
        }

        let mut transmitted = 0;
        for egress in 0..self.ports.len() {
            let port = &self.ports[egress];
            let mut queues = port.queues.lock().unwrap();
            let mut scheduler = port.scheduler.lock().unwrap();
            let drained = scheduler.drain(&mut queues, burst_size);
            if drained.is_empty() {
                continue;
            }
            let frames: Vec<Frame> = drained.into_iter().map(|(_, f)| f).collect();
            let sent = self.adapter.send_burst(egress, frames);
            self.counters.tx.fetch_add(sent as u64, Ordering::Relaxed);
            transmitted += sent;
        }
        transmitted
    }

    /// Classify, TTL-check, learn, and either unicast-enqueue or flood a
    /// single ingress frame.
    fn ingest(&self, ingress: usize, mut incoming: Frame) {
        match incoming.decrement_ttl() {
            TtlOutcome::Expired => {
                self.counters.ttl_expired.fetch_add(1, Ordering::Relaxed);
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                return;
            }
            TtlOutcome::Forwarded | TtlOutcome::NotIp => {}
        }

        if let Some(src) = incoming.src_mac() {
            self.mac_table.learn(src, ingress);
        }

        let vlan_priority = self.ports[ingress].vlan_priority;
        let priority = frame::classify_priority(&incoming, vlan_priority);
        self.counters.qos_classified.fetch_add(1, Ordering::Relaxed);

        let dst = incoming.dst_mac();
        let broadcast = dst.map(|m| m.is_broadcast() || m.is_multicast()).unwrap_or(true);

        if !broadcast {
            if let Some(egress) = dst.and_then(|m| self.mac_table.lookup(m)) {
                if egress == ingress {
                    self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                } else {
                    self.enqueue(egress, priority, incoming);
                }
                return;
            }
        }

        // Unknown unicast or broadcast/multicast: flood to every other port.
        // Clone for every recipient but the last, and move the original into
        // that one instead of cloning for it too.
        let targets: Vec<usize> = (0..self.ports.len()).filter(|&p| p != ingress).collect();
        if let Some((&last, rest)) = targets.split_last() {
            for &egress in rest {
                self.enqueue(egress, priority, incoming.clone());
            }
            self.enqueue(last, priority, incoming);
        }
    }

    fn enqueue(&self, egress: usize, priority: u8, frame: Frame) {
        let mut queues = self.ports[egress].queues.lock().unwrap();
        if !queues.enqueue(priority, frame) {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Run the service loop until `keep_running` is cleared, sleeping
    /// briefly between empty sweeps to avoid busy-spinning a CPU.
    pub fn run(self: &Arc<Self>, keep_running: Arc<std::sync::atomic::AtomicBool>) {
        while keep_running.load(Ordering::Relaxed) {
            let sent = self.service_once(DEFAULT_BURST_SIZE);
            if sent == 0 {
                std::thread::sleep(Duration::from_micros(200));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct FakeAdapter {
        macs: Vec<MacAddress>,
        inbox: StdMutex<Vec<Vec<(usize, Frame)>>>,
        outbox: StdMutex<Vec<Vec<(usize, Frame)>>>,
    }

    impl FakeAdapter {
        fn new(num_ports: usize) -> Self {
            FakeAdapter {
                macs: (0..num_ports)
                    .map(|p| MacAddress([2, 0, 0, 0, 0, p as u8]))
                    .collect(),
                inbox: StdMutex::new(vec![Vec::new()]),
                outbox: StdMutex::new(Vec::new()),
            }
        }

        fn inject(&self, port: usize, frame: Frame) {
            self.inbox.lock().unwrap()[0].push((port, frame));
        }

        fn sent_on(&self, port: usize) -> Vec<Frame> {
            self.outbox
                .lock()
                .unwrap()
                .iter()
                .flatten()
                .filter(|(p, _)| *p == port)
                .map(|(_, f)| f.clone())
                .collect()
        }
    }

    impl IngressEgress for FakeAdapter {
        fn recv_burst(&self, port: usize, max: usize) -> Vec<Frame> {
            let mut inbox = self.inbox.lock().unwrap();
            let queue = &mut inbox[0];
            let mut out = Vec::new();
            let mut i = 0;
            while i < queue.len() && out.len() < max {
                if queue[i].0 == port {
                    out.push(queue.remove(i).1);
                } else {
                    i += 1;
                }
            }
            out
        }

        fn send_burst(&self, port: usize, frames: Vec<Frame>) -> usize {
            let n = frames.len();
            let mut outbox = self.outbox.lock().unwrap();
            outbox.push(frames.into_iter().map(|f| (port, f)).collect());
            n
        }

        fn port_count(&self) -> usize {
            self.macs.len()
        }

        fn port_mac(&self, port: usize) -> MacAddress {
            self.macs[port]
        }

        fn enable_promiscuous(&self, _port: usize) {}
    }

    fn eth_frame(dst: MacAddress, src: MacAddress) -> Frame {
        let mut buf = vec![0u8; 14];
        buf[0..6].copy_from_slice(&dst.0);
        buf[6..12].copy_from_slice(&src.0);
        Frame::new(buf)
    }

    #[test]
    fn unknown_unicast_floods_all_other_ports() {
        let adapter = Arc::new(FakeAdapter::new(3));
        let unknown = MacAddress([9, 9, 9, 9, 9, 9]);
        let src = MacAddress([2, 0, 0, 0, 0, 7]);
        adapter.inject(0, eth_frame(unknown, src));
        let sw = SwitchInstance::new(0, adapter.clone());
        sw.service_once(16);
        assert_eq!(adapter.sent_on(1).len(), 1);
        assert_eq!(adapter.sent_on(2).len(), 1);
        assert_eq!(adapter.sent_on(0).len(), 0);
    }

    #[test]
    fn learned_mac_is_forwarded_unicast_not_flooded() {
        let adapter = Arc::new(FakeAdapter::new(3));
        let host_a = MacAddress([2, 0, 0, 0, 0, 1]);
        let host_b = MacAddress([2, 0, 0, 0, 0, 2]);
        // First frame from B on port 2 teaches the table where B lives.
        adapter.inject(2, eth_frame(MacAddress::BROADCAST, host_b));
        let sw = SwitchInstance::new(0, adapter.clone());
        sw.service_once(16);

        // Now A (port 0) sends to B; should be unicast to port 2 only.
        adapter.inject(0, eth_frame(host_b, host_a));
        sw.service_once(16);
        assert_eq!(adapter.sent_on(2).len(), 1);
        assert_eq!(adapter.sent_on(1).len(), 0);
    }

    #[test]
    fn broadcast_floods_to_every_other_port() {
        let adapter = Arc::new(FakeAdapter::new(4));
        let src = MacAddress([2, 0, 0, 0, 0, 5]);
        adapter.inject(1, eth_frame(MacAddress::BROADCAST, src));
        let sw = SwitchInstance::new(0, adapter.clone());
        sw.service_once(16);
        for p in [0, 2, 3] {
            assert_eq!(adapter.sent_on(p).len(), 1);
        }
        assert_eq!(adapter.sent_on(1).len(), 0);
    }

    #[test]
    fn ingress_port_is_excluded_from_flood() {
        let adapter = Arc::new(FakeAdapter::new(2));
        let src = MacAddress([2, 0, 0, 0, 0, 5]);
        adapter.inject(0, eth_frame(MacAddress::BROADCAST, src));
        let sw = SwitchInstance::new(0, adapter.clone());
        sw.service_once(16);
        assert_eq!(adapter.sent_on(0).len(), 0);
        assert_eq!(adapter.sent_on(1).len(), 1);
    }

    #[test]
    fn expired_ttl_frame_is_dropped_and_counted() {
        let adapter = Arc::new(FakeAdapter::new(2));
        let host_a = MacAddress([2, 0, 0, 0, 0, 1]);
        let host_b = MacAddress([2, 0, 0, 0, 0, 2]);
        let mut buf = vec![0u8; 14 + 20];
        buf[0..6].copy_from_slice(&host_b.0);
        buf[6..12].copy_from_slice(&host_a.0);
        buf[12] = 0x08;
        buf[13] = 0x00;
        buf[14] = 0x45;
        buf[14 + 8] = 1; // TTL=1, decrements to expiry
        adapter.inject(0, Frame::new(buf));
        let sw = SwitchInstance::new(0, adapter.clone());
        sw.service_once(16);
        assert_eq!(adapter.sent_on(1).len(), 0);
        assert_eq!(sw.counters.snapshot().ttl_expired, 1);
        assert_eq!(sw.counters.snapshot().dropped, 1);
    }
}
