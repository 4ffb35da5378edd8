//! Virtual link fabric (component D).
//!
//! A [`VlinkManager`] owns a fixed set of [`VlinkEndpoint`]s, each backed by
//! an independent ring queue guarded by a mutex and a pair of condvars
//! (`not_empty`/`not_full`). `connect` wires two endpoints together so that
//! a `send` on one mirrors the frame into the other's receive ring after a
//! simulated loss draw and latency/jitter delay; an endpoint never receives
//! traffic from a peer it was not explicitly connected to.
//!
//! Every endpoint moves through a `created -> started -> stopped` lifecycle.
//! `start`/`stop` are idempotent and, when a [`RxSink::Callback`] is
//! configured, own the single background thread that drives it: `start`
//! spawns it at most once, `stop` clears the running flag, wakes the rx
//! ring so a blocked receive unwinds promptly, and joins the thread before
//! returning.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use rand::RngExt;

use crate::config::{DEFAULT_RECV_TIMEOUT_US, VLINK_QUEUE_CAPACITY};
use crate::error::LinkError;
use crate::frame::Frame;
use crate::mac::MacAddress;
use crate::switch::IngressEgress;

/// Per-link simulated transport characteristics.
#[derive(Debug, Clone, Copy)]
pub struct VlinkConfig {
    pub latency_us: u32,
    pub jitter_us: u32,
    pub loss_rate: f32,
}

impl Default for VlinkConfig {
    fn default() -> Self {
        VlinkConfig {
            latency_us: 0,
            jitter_us: 0,
            loss_rate: 0.0,
        }
    }
}

/// Counters for one endpoint, safe to read concurrently with traffic.
#[derive(Default)]
pub struct VlinkStats {
    pub tx_frames: AtomicU64,
    pub tx_bytes: AtomicU64,
    pub rx_frames: AtomicU64,
    pub rx_bytes: AtomicU64,
    pub dropped_loss: AtomicU64,
    pub dropped_full: AtomicU64,
}

impl VlinkStats {
    pub fn snapshot(&self) -> VlinkStatsSnapshot {
        VlinkStatsSnapshot {
            tx_frames: self.tx_frames.load(Ordering::Relaxed),
            tx_bytes: self.tx_bytes.load(Ordering::Relaxed),
            rx_frames: self.rx_frames.load(Ordering::Relaxed),
            rx_bytes: self.rx_bytes.load(Ordering::Relaxed),
            dropped_loss: self.dropped_loss.load(Ordering::Relaxed),
            dropped_full: self.dropped_full.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VlinkStatsSnapshot {
    pub tx_frames: u64,
    pub tx_bytes: u64,
    pub rx_frames: u64,
    pub rx_bytes: u64,
    pub dropped_loss: u64,
    pub dropped_full: u64,
}

/// How an endpoint hands received frames to its owner.
pub enum RxSink {
    /// The owner calls `recv`/`recv_burst` itself.
    Polling,
    /// A dedicated thread calls this closure for every frame as it arrives.
    Callback(Box<dyn Fn(&[u8]) + Send + Sync>),
}

struct Ring {
    slots: VecDeque<Frame>,
    capacity: usize,
}

struct RingQueue {
    state: Mutex<Ring>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl RingQueue {
    fn new(capacity: usize) -> Self {
        RingQueue {
            state: Mutex::new(Ring {
                slots: VecDeque::with_capacity(capacity),
                capacity,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    fn try_push(&self, frame: Frame) -> bool {
        let mut ring = self.state.lock().unwrap();
        if ring.slots.len() >= ring.capacity {
            return false;
        }
        ring.slots.push_back(frame);
        self.not_empty.notify_one();
        true
    }

    /// Block until a frame arrives, `timeout` elapses, or (if `cancel` is
    /// given) the flag it points to is cleared.
    fn pop_blocking(&self, timeout: Duration, cancel: Option<&AtomicBool>) -> Option<Frame> {
        let deadline = Instant::now() + timeout;
        let mut ring = self.state.lock().unwrap();
        loop {
            if let Some(frame) = ring.slots.pop_front() {
                self.not_full.notify_one();
                return Some(frame);
            }
            if let Some(flag) = cancel {
                if !flag.load(Ordering::Relaxed) {
                    return None;
                }
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, result) = self
                .not_empty
                .wait_timeout(ring, deadline - now)
                .unwrap();
            ring = guard;
            if result.timed_out() && ring.slots.is_empty() {
                return None;
            }
        }
    }

    /// Wake any thread blocked in `pop_blocking`, so a cleared cancel flag
    /// is observed immediately rather than at the next timeout.
    fn wake_all(&self) {
        let _guard = self.state.lock().unwrap();
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    fn drain_available(&self, max: usize) -> Vec<Frame> {
        let mut ring = self.state.lock().unwrap();
        let mut out = Vec::with_capacity(max.min(ring.slots.len()));
        while out.len() < max {
            match ring.slots.pop_front() {
                Some(frame) => out.push(frame),
                None => break,
            }
        }
        if !out.is_empty() {
            self.not_full.notify_all();
        }
        out
    }
}

/// One side of a point-to-point virtual link.
pub struct VlinkEndpoint {
    id: usize,
    mac: MacAddress,
    config: Mutex<VlinkConfig>,
    rx: RingQueue,
    peer: Mutex<Option<Arc<VlinkEndpoint>>>,
    stats: VlinkStats,
    sink: Mutex<RxSink>,
    running: AtomicBool,
    rx_thread: Mutex<Option<JoinHandle<()>>>,
}

impl VlinkEndpoint {
    fn new(id: usize, mac: MacAddress, config: VlinkConfig) -> Arc<Self> {
        Arc::new(VlinkEndpoint {
            id,
            mac,
            config: Mutex::new(config),
            rx: RingQueue::new(VLINK_QUEUE_CAPACITY),
            peer: Mutex::new(None),
            stats: VlinkStats::default(),
            sink: Mutex::new(RxSink::Polling),
            running: AtomicBool::new(false),
            rx_thread: Mutex::new(None),
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn mac(&self) -> MacAddress {
        self.mac
    }

    pub fn stats(&self) -> VlinkStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn set_config(&self, config: VlinkConfig) {
        *self.config.lock().unwrap() = config;
    }

    pub fn set_sink(&self, sink: RxSink) {
        *self.sink.lock().unwrap() = sink;
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Move the endpoint into the `started` state. Idempotent: calling
    /// `start` on an already-started endpoint is a no-op. If a
    /// [`RxSink::Callback`] is configured, spawns the single background
    /// thread that drives it; a `Polling` sink just flips the flag.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let has_callback = matches!(&*self.sink.lock().unwrap(), RxSink::Callback(_));
        if !has_callback {
            return;
        }
        let endpoint = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name(format!("vlink-rx-{}", endpoint.id))
            .spawn(move || {
                while endpoint.running.load(Ordering::Relaxed) {
                    if let Some(frame) =
                        endpoint.recv_cancelable(Duration::from_micros(DEFAULT_RECV_TIMEOUT_US))
                    {
                        let sink = endpoint.sink.lock().unwrap();
                        if let RxSink::Callback(cb) = &*sink {
                            cb(frame.as_bytes());
                        }
                    }
                }
            })
            .expect("failed to spawn vlink rx thread");
        *self.rx_thread.lock().unwrap() = Some(handle);
    }

    /// Move the endpoint into the `stopped` state. Idempotent. Wakes the rx
    /// ring so a blocked callback thread unwinds promptly, then joins it.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.rx.wake_all();
        if let Some(handle) = self.rx_thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    /// Send a frame toward this endpoint's connected peer, if any. Applies
    /// the configured loss draw and latency/jitter delay before delivery.
    pub fn send(&self, frame: Frame) -> Result<(), LinkError> {
        let peer = self.peer.lock().unwrap().clone();
        let Some(peer) = peer else {
            return Err(LinkError::InvalidState(format!(
                "link {} is not connected",
                self.id
            )));
        };

        let cfg = *self.config.lock().unwrap();
        if cfg.loss_rate > 0.0 && rand::rng().random::<f32>() < cfg.loss_rate {
            self.stats.dropped_loss.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        let mut delay_us = cfg.latency_us as i64;
        if cfg.jitter_us > 0 {
            let jitter = rand::rng().random_range(-(cfg.jitter_us as i64)..=(cfg.jitter_us as i64));
            delay_us = (delay_us + jitter).max(0);
        }
        if delay_us > 0 {
            std::thread::sleep(Duration::from_micros(delay_us as u64));
        }

        let len = frame.len() as u64;
        if peer.rx.try_push(frame) {
            self.stats.tx_frames.fetch_add(1, Ordering::Relaxed);
            self.stats.tx_bytes.fetch_add(len, Ordering::Relaxed);
            peer.stats.rx_frames.fetch_add(1, Ordering::Relaxed);
            peer.stats.rx_bytes.fetch_add(len, Ordering::Relaxed);
            Ok(())
        } else {
            self.stats.dropped_full.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    /// Poll-mode receive with a bounded wait. Returns [`LinkError::Timeout`]
    /// if nothing arrives in time.
    pub fn recv(&self, timeout: Duration) -> Result<Frame, LinkError> {
        self.rx.pop_blocking(timeout, None).ok_or(LinkError::Timeout)
    }

    /// Like `recv`, but also returns early once `running` is cleared. Used
    /// by the callback-delivery thread so `stop` unwinds it promptly.
    fn recv_cancelable(&self, timeout: Duration) -> Option<Frame> {
        self.rx.pop_blocking(timeout, Some(&self.running))
    }

    fn recv_burst(&self, max: usize) -> Vec<Frame> {
        self.rx.drain_available(max)
    }
}

/// Owns every virtual-link endpoint belonging to one simulated switch and
/// implements [`IngressEgress`] so a `SwitchInstance` can treat the fabric
/// like any other adapter.
pub struct VlinkManager {
    endpoints: Vec<Arc<VlinkEndpoint>>,
}

impl VlinkManager {
    /// Build `num_ports` endpoints, one per switch port, each with its own
    /// locally-administered MAC derived from `switch_id` and the port index.
    pub fn new(switch_id: u8, num_ports: usize, config: VlinkConfig) -> Self {
        let endpoints = (0..num_ports)
            .map(|port| {
                let mac = MacAddress([0x02, 0x00, 0x00, 0x00, switch_id, port as u8]);
                VlinkEndpoint::new(port, mac, config)
            })
            .collect();
        VlinkManager { endpoints }
    }

    pub fn endpoint(&self, port: usize) -> Option<Arc<VlinkEndpoint>> {
        self.endpoints.get(port).cloned()
    }

    /// Wire two endpoints (possibly belonging to different managers)
    /// together bidirectionally. Each endpoint may be connected at most once;
    /// reconnecting returns [`LinkError::InvalidState`].
    pub fn connect(a: &Arc<VlinkEndpoint>, b: &Arc<VlinkEndpoint>) -> Result<(), LinkError> {
        let mut a_peer = a.peer.lock().unwrap();
        let mut b_peer = b.peer.lock().unwrap();
        if a_peer.is_some() || b_peer.is_some() {
            return Err(LinkError::InvalidState(
                "endpoint is already connected".to_string(),
            ));
        }
        *a_peer = Some(b.clone());
        *b_peer = Some(a.clone());
        Ok(())
    }
}

impl IngressEgress for VlinkManager {
    fn recv_burst(&self, port: usize, max: usize) -> Vec<Frame> {
        match self.endpoints.get(port) {
            Some(ep) => ep.recv_burst(max),
            None => Vec::new(),
        }
    }

    fn send_burst(&self, port: usize, frames: Vec<Frame>) -> usize {
        let Some(ep) = self.endpoints.get(port) else {
            return 0;
        };
        let mut sent = 0;
        for frame in frames {
            if ep.send(frame).is_ok() {
                sent += 1;
            }
        }
        sent
    }

    fn port_count(&self) -> usize {
        self.endpoints.len()
    }

    fn port_mac(&self, port: usize) -> MacAddress {
        self.endpoints[port].mac()
    }

    fn enable_promiscuous(&self, _port: usize) {
        // The virtual fabric never filters by destination before delivery,
        // so every port is effectively promiscuous already.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(tag: u8) -> Frame {
        Frame::new(vec![tag; 14])
    }

    #[test]
    fn connect_then_send_mirrors_into_peer_rx() {
        let mgr_a = VlinkManager::new(1, 1, VlinkConfig::default());
        let mgr_b = VlinkManager::new(2, 1, VlinkConfig::default());
        let a = mgr_a.endpoint(0).unwrap();
        let b = mgr_b.endpoint(0).unwrap();
        VlinkManager::connect(&a, &b).unwrap();

        a.send(frame(7)).unwrap();
        let received = b.recv(Duration::from_millis(50)).unwrap();
        assert_eq!(received.as_bytes()[0], 7);
    }

    #[test]
    fn unconnected_endpoint_send_errors() {
        let mgr = VlinkManager::new(1, 1, VlinkConfig::default());
        let ep = mgr.endpoint(0).unwrap();
        assert!(matches!(ep.send(frame(1)), Err(LinkError::InvalidState(_))));
    }

    #[test]
    fn recv_times_out_when_nothing_arrives() {
        let mgr = VlinkManager::new(1, 1, VlinkConfig::default());
        let ep = mgr.endpoint(0).unwrap();
        assert_eq!(ep.recv(Duration::from_millis(20)), Err(LinkError::Timeout));
    }

    #[test]
    fn full_rx_ring_increments_dropped_full_not_peer_rx() {
        let mgr_a = VlinkManager::new(1, 1, VlinkConfig::default());
        let mgr_b = VlinkManager::new(2, 1, VlinkConfig::default());
        let a = mgr_a.endpoint(0).unwrap();
        let b = mgr_b.endpoint(0).unwrap();
        VlinkManager::connect(&a, &b).unwrap();
        for i in 0..1_000u32 {
            a.send(frame((i % 256) as u8)).unwrap();
        }
        let snap = a.stats();
        assert_eq!(snap.tx_frames + snap.dropped_full, 1_000);
    }

    #[test]
    fn reconnecting_an_endpoint_is_rejected() {
        let mgr_a = VlinkManager::new(1, 2, VlinkConfig::default());
        let a0 = mgr_a.endpoint(0).unwrap();
        let a1 = mgr_a.endpoint(1).unwrap();
        let mgr_b = VlinkManager::new(2, 1, VlinkConfig::default());
        let b = mgr_b.endpoint(0).unwrap();
        VlinkManager::connect(&a0, &b).unwrap();
        assert!(VlinkManager::connect(&a1, &b).is_err());
    }

    #[test]
    fn recv_burst_drains_up_to_max() {
        let mgr_a = VlinkManager::new(1, 1, VlinkConfig::default());
        let mgr_b = VlinkManager::new(2, 1, VlinkConfig::default());
        let a = mgr_a.endpoint(0).unwrap();
        let b = mgr_b.endpoint(0).unwrap();
        VlinkManager::connect(&a, &b).unwrap();
        for i in 0..10u8 {
            a.send(frame(i)).unwrap();
        }
        std::thread::sleep(Duration::from_millis(10));
        let batch = mgr_b.recv_burst(0, 4);
        assert_eq!(batch.len(), 4);
    }

    #[test]
    fn callback_sink_observes_sent_frames() {
        let mgr_a = VlinkManager::new(1, 1, VlinkConfig::default());
        let mgr_b = VlinkManager::new(2, 1, VlinkConfig::default());
        let a = mgr_a.endpoint(0).unwrap();
        let b = mgr_b.endpoint(0).unwrap();
        VlinkManager::connect(&a, &b).unwrap();

        let seen: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_cb = Arc::clone(&seen);
        b.set_sink(RxSink::Callback(Box::new(move |bytes: &[u8]| {
            seen_cb.lock().unwrap().push(bytes[0]);
        })));
        b.start();

        a.send(frame(42)).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            if !seen.lock().unwrap().is_empty() {
                break;
            }
            assert!(Instant::now() < deadline, "callback never observed the frame");
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(seen.lock().unwrap().as_slice(), &[42]);

        b.stop();
        assert!(!b.is_running());
    }

    #[test]
    fn start_stop_start_round_trip_leaves_running_with_no_leaked_thread() {
        let mgr = VlinkManager::new(1, 1, VlinkConfig::default());
        let ep = mgr.endpoint(0).unwrap();
        ep.set_sink(RxSink::Callback(Box::new(|_: &[u8]| {})));

        assert!(!ep.is_running());
        ep.start();
        assert!(ep.is_running());
        assert!(ep.rx_thread.lock().unwrap().is_some());

        ep.stop();
        assert!(!ep.is_running());
        assert!(ep.rx_thread.lock().unwrap().is_none());

        ep.start();
        assert!(ep.is_running());
        ep.stop();
        assert!(!ep.is_running());
    }

    #[test]
    fn start_called_twice_does_not_spawn_a_second_thread() {
        let mgr = VlinkManager::new(1, 1, VlinkConfig::default());
        let ep = mgr.endpoint(0).unwrap();
        ep.set_sink(RxSink::Callback(Box::new(|_: &[u8]| {})));

        ep.start();
        let first_thread_id = ep
            .rx_thread
            .lock()
            .unwrap()
            .as_ref()
            .map(|h| h.thread().id());
        ep.start();
        let second_thread_id = ep
            .rx_thread
            .lock()
            .unwrap()
            .as_ref()
            .map(|h| h.thread().id());
        assert_eq!(first_thread_id, second_thread_id);

        ep.stop();
    }

    #[test]
    fn loss_rate_one_drops_every_frame() {
        let mgr_a = VlinkManager::new(
            1,
            1,
            VlinkConfig {
                latency_us: 0,
                jitter_us: 0,
                loss_rate: 1.0,
            },
        );
        let mgr_b = VlinkManager::new(2, 1, VlinkConfig::default());
        let a = mgr_a.endpoint(0).unwrap();
        let b = mgr_b.endpoint(0).unwrap();
        VlinkManager::connect(&a, &b).unwrap();
        a.send(frame(1)).unwrap();
        assert_eq!(b.recv(Duration::from_millis(50)), Err(LinkError::Timeout));
        assert_eq!(a.stats().dropped_loss, 1);
    }
}
