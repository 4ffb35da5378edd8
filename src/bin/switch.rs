//! Runs one switch instance inside a simulated topology.
//!
//! Usage:
//!   switch --switch-id N --topology {ring|line|mesh} --num-switches N
//!          [--host-ports N] [--static-macs PATH]

use std::env;
use std::fs::File;
use std::io::BufReader;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use vswitch::{SwitchError, Topology, TopologyKind, VlinkConfig};

struct Args {
    switch_id: usize,
    topology: TopologyKind,
    num_switches: usize,
    host_ports: usize,
    static_macs: Option<String>,
}

fn parse_args() -> Result<Args, SwitchError> {
    let mut switch_id = 1usize;
    let mut topology = TopologyKind::Line;
    let mut num_switches = 1usize;
    let mut host_ports = 1usize;
    let mut static_macs = None;

    let mut it = env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--switch-id" => {
                switch_id = next_value(&mut it, "--switch-id")?
                    .parse()
                    .map_err(|_| SwitchError::PortSetup("--switch-id must be a number".into()))?;
            }
            "--topology" => {
                topology = TopologyKind::parse(&next_value(&mut it, "--topology")?)?;
            }
            "--num-switches" => {
                num_switches = next_value(&mut it, "--num-switches")?
                    .parse()
                    .map_err(|_| SwitchError::PortSetup("--num-switches must be a number".into()))?;
            }
            "--host-ports" => {
                host_ports = next_value(&mut it, "--host-ports")?
                    .parse()
                    .map_err(|_| SwitchError::PortSetup("--host-ports must be a number".into()))?;
            }
            "--static-macs" => {
                static_macs = Some(next_value(&mut it, "--static-macs")?);
            }
            other => {
                return Err(SwitchError::PortSetup(format!("unknown argument: {other}")));
            }
        }
    }

    if switch_id == 0 || switch_id > num_switches {
        return Err(SwitchError::PortSetup(format!(
            "switch-id {switch_id} out of range for {num_switches} switches"
        )));
    }

    Ok(Args {
        switch_id,
        topology,
        num_switches,
        host_ports,
        static_macs,
    })
}

fn next_value(it: &mut impl Iterator<Item = String>, flag: &str) -> Result<String, SwitchError> {
    it.next()
        .ok_or_else(|| SwitchError::PortSetup(format!("{flag} requires a value")))
}

fn main() -> ExitCode {
    vswitch::init_logging("switch=info");

    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            tracing::error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let topo = match Topology::build(
        args.topology,
        args.num_switches,
        args.host_ports,
        VlinkConfig::default(),
    ) {
        Ok(topo) => topo,
        Err(e) => {
            tracing::error!("failed to build topology: {e}");
            return ExitCode::FAILURE;
        }
    };

    let index = args.switch_id - 1;
    let instance = &topo.switches[index];

    if instance.port_count() != args.host_ports + topology_uplinks(args.topology, args.num_switches) {
        tracing::error!(
            "port count mismatch: expected {}, found {}",
            args.host_ports,
            instance.port_count()
        );
        return ExitCode::FAILURE;
    }

    if let Some(path) = &args.static_macs {
        let valid_ports: Vec<usize> = (0..instance.port_count()).collect();
        match File::open(path) {
            Ok(file) => {
                let summary = instance
                    .mac_table()
                    .load_static(BufReader::new(file), Some(&valid_ports));
                tracing::info!(
                    loaded = summary.loaded,
                    skipped = summary.skipped,
                    "loaded static MAC table from {path}"
                );
            }
            Err(e) => {
                tracing::warn!("could not open static MAC table {path}: {e}");
            }
        }
    }

    let keep_running = Arc::new(AtomicBool::new(true));
    {
        let keep_running = keep_running.clone();
        if let Err(e) = ctrlc::set_handler(move || {
            keep_running.store(false, Ordering::Relaxed);
        }) {
            tracing::warn!("failed to install signal handler: {e}");
        }
    }

    tracing::info!(
        switch_id = args.switch_id,
        topology = ?args.topology,
        ports = instance.port_count(),
        "switch instance starting"
    );
    instance.run(keep_running);
    tracing::info!("switch instance {} shutting down", args.switch_id);

    ExitCode::SUCCESS
}

fn topology_uplinks(kind: TopologyKind, num_switches: usize) -> usize {
    match kind {
        TopologyKind::Line | TopologyKind::Ring => 2,
        TopologyKind::Mesh => num_switches.saturating_sub(1),
    }
}
