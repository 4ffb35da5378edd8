//! Multi-switch wiring (line, ring, mesh) over the virtual-link fabric.
//!
//! Each shape connects two ports between adjacent switch instances using
//! [`VlinkManager::connect`]; TTL expiry (component A) is the fabric's only
//! loop-break mechanism, so a ring or mesh topology is expected to shed
//! looped traffic via `decrement_ttl` rather than spanning-tree.

use std::sync::Arc;

use crate::error::SwitchError;
use crate::switch::SwitchInstance;
use crate::vlink::{VlinkConfig, VlinkManager};

/// The shape used to wire a set of switch instances together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyKind {
    /// Switch `i` is linked only to switch `i+1`; the ends are not joined.
    Line,
    /// Like `Line`, with the last switch also linked back to the first.
    Ring,
    /// Every pair of switches is directly linked.
    Mesh,
}

impl TopologyKind {
    pub fn parse(s: &str) -> Result<Self, SwitchError> {
        match s.to_ascii_lowercase().as_str() {
            "line" => Ok(TopologyKind::Line),
            "ring" => Ok(TopologyKind::Ring),
            "mesh" => Ok(TopologyKind::Mesh),
            other => Err(SwitchError::UnknownTopology(other.to_string())),
        }
    }

    /// Number of inter-switch links this shape needs for `n` switches.
    pub fn link_count(&self, n: usize) -> usize {
        match self {
            TopologyKind::Line => n.saturating_sub(1),
            TopologyKind::Ring => {
                if n <= 2 {
                    n.saturating_sub(1)
                } else {
                    n
                }
            }
            TopologyKind::Mesh => n * n.saturating_sub(1) / 2,
        }
    }
}

/// A set of switch instances wired together, plus the vlink managers that
/// back their fabric-facing ports. One manager per switch; the first
/// `n - 1` ports (Line/Ring) or `n - 1` ports (Mesh, one per peer) are
/// reserved for inter-switch links, with any remaining ports left free for
/// host attachment.
pub struct Topology {
    pub kind: TopologyKind,
    pub switches: Vec<Arc<SwitchInstance>>,
    pub managers: Vec<Arc<VlinkManager>>,
}

impl Topology {
    /// Build `n` switches, each with `host_ports` ports reserved for host
    /// attachment plus however many inter-switch links `kind` requires.
    pub fn build(
        kind: TopologyKind,
        n: usize,
        host_ports: usize,
        link_config: VlinkConfig,
    ) -> Result<Self, SwitchError> {
        if n == 0 {
            return Err(SwitchError::PortSetup("topology needs at least one switch".into()));
        }

        let uplinks_per_switch = match kind {
            TopologyKind::Line | TopologyKind::Ring => 2,
            TopologyKind::Mesh => n.saturating_sub(1),
        };
        let total_ports = host_ports + uplinks_per_switch;
        if total_ports > crate::config::MAX_PORTS {
            return Err(SwitchError::PortSetup(format!(
                "topology requires {total_ports} ports per switch, exceeding the fabric's {} maximum",
                crate::config::MAX_PORTS
            )));
        }

        let managers: Vec<Arc<VlinkManager>> = (0..n)
            .map(|i| Arc::new(VlinkManager::new(i as u8, total_ports, link_config)))
            .collect();

        match kind {
            TopologyKind::Line => {
                for i in 0..n.saturating_sub(1) {
                    let a = managers[i].endpoint(host_ports + 1).expect("uplink port within configured range");
                    let b = managers[i + 1].endpoint(host_ports).expect("uplink port within configured range");
                    VlinkManager::connect(&a, &b)
                        .map_err(|e| SwitchError::PortSetup(e.to_string()))?;
                }
            }
            TopologyKind::Ring => {
                for i in 0..n {
                    let next = (i + 1) % n;
                    if n <= 2 && next == i {
                        continue;
                    }
                    if n == 2 && i == 1 {
                        // Already joined by the i=0 iteration's single link.
                        continue;
                    }
                    let a = managers[i].endpoint(host_ports + 1).expect("uplink port within configured range");
                    let b = managers[next].endpoint(host_ports).expect("uplink port within configured range");
                    VlinkManager::connect(&a, &b)
                        .map_err(|e| SwitchError::PortSetup(e.to_string()))?;
                }
            }
            TopologyKind::Mesh => {
                // Each switch reserves one uplink port per peer, in peer-index order.
                let mut next_port = vec![host_ports; n];
                for i in 0..n {
                    for j in (i + 1)..n {
                        let pi = next_port[i];
                        let pj = next_port[j];
                        next_port[i] += 1;
                        next_port[j] += 1;
                        let a = managers[i].endpoint(pi).expect("mesh uplink port within configured range");
                        let b = managers[j].endpoint(pj).expect("mesh uplink port within configured range");
                        VlinkManager::connect(&a, &b)
                            .map_err(|e| SwitchError::PortSetup(e.to_string()))?;
                    }
                }
            }
        }

        let switches: Vec<Arc<SwitchInstance>> = managers
            .iter()
            .enumerate()
            .map(|(i, mgr)| Arc::new(SwitchInstance::new(i as u8, mgr.clone())))
            .collect();

        Ok(Topology {
            kind,
            switches,
            managers,
        })
    }
}
