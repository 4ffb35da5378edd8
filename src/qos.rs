//! Priority queues and deficit round-robin scheduling (component C).
//!
//! Each egress port owns one [`EgressQueues`]: eight fixed-capacity ring
//! buffers, one per DSCP/PCP-derived priority class. A [`Scheduler`] drains
//! them in deficit round-robin order so that high classes get more bytes per
//! sweep without starving the low ones outright.

use std::collections::VecDeque;

use crate::config::{DRR_WEIGHTS, PRIORITY_CLASSES, PRIORITY_QUEUE_CAPACITY};
use crate::frame::Frame;

/// A single bounded FIFO for one priority class.
struct PriorityQueue {
    ring: VecDeque<Frame>,
    capacity: usize,
}

impl PriorityQueue {
    fn new(capacity: usize) -> Self {
        PriorityQueue {
            ring: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Enqueue a frame, returning `false` (dropped) if the ring is full.
    fn push(&mut self, frame: Frame) -> bool {
        if self.ring.len() >= self.capacity {
            return false;
        }
        self.ring.push_back(frame);
        true
    }

    fn pop(&mut self) -> Option<Frame> {
        self.ring.pop_front()
    }

    fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    fn len(&self) -> usize {
        self.ring.len()
    }
}

/// The eight priority rings belonging to a single egress port.
pub struct EgressQueues {
    classes: [PriorityQueue; PRIORITY_CLASSES],
}

impl EgressQueues {
    pub fn new() -> Self {
        Self::with_capacity(PRIORITY_QUEUE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        EgressQueues {
            classes: std::array::from_fn(|_| PriorityQueue::new(capacity)),
        }
    }

    /// Enqueue a frame into its priority class. `priority` is clamped into
    /// `0..PRIORITY_CLASSES`. Returns `false` if that class's ring is full.
    pub fn enqueue(&mut self, priority: u8, frame: Frame) -> bool {
        let class = (priority as usize).min(PRIORITY_CLASSES - 1);
        self.classes[class].push(frame)
    }

    pub fn is_empty(&self) -> bool {
        self.classes.iter().all(|c| c.is_empty())
    }

    pub fn depth(&self, class: usize) -> usize {
        self.classes[class].len()
    }
}

impl Default for EgressQueues {
    fn default() -> Self {
        Self::new()
    }
}

/// Deficit round-robin scheduler over a single port's [`EgressQueues`].
///
/// Credits are per-call and never persist between sweeps: each `drain` call
/// starts every class fresh at its [`DRR_WEIGHTS`] allotment, visits
/// non-empty classes highest first, and emits frames while that call's
/// credit remains ("frame count" standing in for the usual byte-length
/// deficit since every frame here costs one credit to emit). A class cut off
/// mid-burst by `burst_size` loses its leftover credit; it starts fresh
/// again on the next call rather than carrying a balance forward.
pub struct Scheduler;

impl Scheduler {
    pub fn new() -> Self {
        Scheduler
    }

    /// Drain up to `burst_size` frames from `queues` in DRR order, highest
    /// class first. Returns `(class, frame)` pairs in emission order.
    pub fn drain(&mut self, queues: &mut EgressQueues, burst_size: usize) -> Vec<(u8, Frame)> {
        let mut out = Vec::new();
        if queues.is_empty() {
            return out;
        }
        let mut credits = DRR_WEIGHTS;
        // Highest class first: EF-class traffic should lead a sweep.
        for class in (0..PRIORITY_CLASSES).rev() {
            if out.len() >= burst_size {
                break;
            }
            if queues.classes[class].is_empty() {
                continue;
            }
            while credits[class] > 0 && out.len() < burst_size {
                let Some(frame) = queues.classes[class].pop() else {
                    break;
                };
                credits[class] -= 1;
                out.push((class as u8, frame));
            }
        }
        out
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
