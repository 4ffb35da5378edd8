pub mod config;
pub mod error;
pub mod frame;
pub mod host;
pub mod mac;
pub mod mac_table;
pub mod qos;
pub mod switch;
pub mod topology;
pub mod vlink;

pub use error::{LinkError, SwitchError};
pub use frame::{Frame, TtlOutcome};
pub use mac::MacAddress;
pub use mac_table::{MacTable, StaticLoadSummary};
pub use switch::{IngressEgress, Port, SwitchCountersSnapshot, SwitchInstance};
pub use topology::{Topology, TopologyKind};
pub use vlink::{RxSink, VlinkConfig, VlinkEndpoint, VlinkManager, VlinkStatsSnapshot};

/// Install the crate's standard `tracing` subscriber. Both binaries call
/// this once at startup; `RUST_LOG` overrides the default filter.
pub fn init_logging(default_filter: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
