//! Domain memory orchestration.
//!
//! Thin glue between the pure map arithmetic in [`crate::e820`] and the
//! outside world. The host map comes in through a [`HostMapSource`] and the
//! finalized result leaves through a [`MapCommitSink`]; both are traits so
//! tests (and the dry-run CLI) can substitute synthetic maps and recording
//! sinks for the real hypervisor control plane.
//!
//! Two entry points, mirroring the two hypervisor calls they feed:
//!
//! - [`commit_memory_map`]: fetch the raw host map, sanitize it for the
//!   guest, commit it.
//! - [`setup_vnuma`]: fetch the raw host map, compute per-node address
//!   ranges, publish them together with a node distance table and a
//!   vCPU-to-node mapping.
//!
//! No algorithmic policy lives here.

mod host;

pub use host::{LogSink, MapFile, ProcIomem};

use crate::e820::{
    align_vnuma_ranges, sanitize, E820Error, GuestMemoryParams, MemoryRegion, VmemRange,
};
use thiserror::Error;

/// Smallest supported vNUMA node, in megabytes. Linux currently boots with
/// 32MB nodes; keep some slack above that.
pub const MIN_VNODE_SIZE_MB: u64 = 64;

/// Upper bound on virtual nodes per domain.
pub const MAX_VNUMA_NODES: usize = 1 << 10;

/// SLIT distance to a node's own memory.
const DISTANCE_LOCAL: u32 = 10;

/// SLIT distance to any other node's memory.
const DISTANCE_REMOTE: u32 = 20;

/// A vNUMA topology request: one memory size per virtual node, in
/// node-index order. Built once per domain-creation attempt from parsed
/// configuration.
#[derive(Clone, Debug)]
pub struct VNumaRequest {
    /// Per-node memory sizes in MiB.
    pub node_sizes_mb: Vec<u64>,
}

/// Errors surfaced by the orchestrator.
#[derive(Error, Debug)]
pub enum DomainError {
    /// Map sanitization or range allocation failed.
    #[error(transparent)]
    E820(#[from] E820Error),

    /// The host memory map could not be read.
    #[error("failed to read host memory map from {path}")]
    HostMap {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// A memory map file could not be parsed.
    #[error("{path}:{line}: {msg}")]
    MapParse {
        path: String,
        line: usize,
        msg: String,
    },

    /// The vNUMA request violated a configuration bound.
    #[error("invalid vNUMA request: {0}")]
    InvalidVnuma(&'static str),

    /// The hypervisor rejected the committed map or topology.
    #[error("hypervisor commit failed: {0}")]
    Commit(String),
}

/// Supplies the host's raw E820 memory map.
pub trait HostMapSource {
    fn host_memory_map(&self) -> Result<Vec<MemoryRegion>, DomainError>;
}

/// Receives finalized guest memory configuration.
pub trait MapCommitSink {
    /// Commit the sanitized memory map for the guest.
    fn set_memory_map(&mut self, map: &[MemoryRegion]) -> Result<(), DomainError>;

    /// Publish the vNUMA topology: per-node ranges, an NxN row-major node
    /// distance table, and a per-vCPU node index.
    fn set_vnuma_topology(
        &mut self,
        ranges: &[VmemRange],
        distances: &[u32],
        vcpu_to_node: &[u32],
    ) -> Result<(), DomainError>;
}

/// Fetch the host map, sanitize it for `guest` and commit the result.
///
/// Returns the sanitized map so callers can inspect what was committed.
pub fn commit_memory_map(
    source: &dyn HostMapSource,
    sink: &mut dyn MapCommitSink,
    guest: &GuestMemoryParams,
) -> Result<Vec<MemoryRegion>, DomainError> {
    let raw = source.host_memory_map()?;
    let map = sanitize(&raw, guest)?;
    log_map(guest, &map);
    sink.set_memory_map(&map)?;
    Ok(map)
}

/// Fetch the host map, compute per-node ranges for `request` and publish
/// the full vNUMA topology.
///
/// The distance table uses the ACPI SLIT convention (10 local, 20 remote),
/// the toolstack default when configuration supplies none; vCPUs are
/// assigned to nodes round-robin.
pub fn setup_vnuma(
    source: &dyn HostMapSource,
    sink: &mut dyn MapCommitSink,
    guest: &GuestMemoryParams,
    request: &VNumaRequest,
    nr_vcpus: u32,
) -> Result<Vec<VmemRange>, DomainError> {
    let nodes = request.node_sizes_mb.len();
    if nodes == 0 {
        return Err(DomainError::InvalidVnuma("no virtual nodes requested"));
    }
    if nodes > MAX_VNUMA_NODES {
        return Err(DomainError::InvalidVnuma("too many virtual nodes"));
    }
    if request.node_sizes_mb.iter().any(|&s| s < MIN_VNODE_SIZE_MB) {
        return Err(DomainError::InvalidVnuma("node size below minimum"));
    }
    if nr_vcpus == 0 {
        return Err(DomainError::InvalidVnuma("no vCPUs to map to nodes"));
    }

    let raw = source.host_memory_map()?;
    let ranges = align_vnuma_ranges(&raw, guest, &request.node_sizes_mb)?;
    let distances = distance_table(nodes);
    let vcpu_to_node: Vec<u32> = (0..nr_vcpus).map(|v| v % nodes as u32).collect();

    for (i, range) in ranges.iter().enumerate() {
        eprintln!(
            "[vNUMA] node {}: [{:#x} -> {:#x}]",
            i, range.start, range.end
        );
    }

    sink.set_vnuma_topology(&ranges, &distances, &vcpu_to_node)?;
    Ok(ranges)
}

fn distance_table(nodes: usize) -> Vec<u32> {
    let mut table = Vec::with_capacity(nodes * nodes);
    for from in 0..nodes {
        for to in 0..nodes {
            table.push(if from == to { DISTANCE_LOCAL } else { DISTANCE_REMOTE });
        }
    }
    table
}

fn log_map(guest: &GuestMemoryParams, map: &[MemoryRegion]) {
    let ram_end = map.first().map(|r| r.end()).unwrap_or(0);
    eprintln!(
        "[E820] Memory: {} kB, end of RAM: {:#x}, balloon: {} kB",
        guest.target_kb,
        ram_end,
        guest.balloon_kb()
    );
    for region in map {
        eprintln!(
            "[E820]   [{:#x} -> {:#x}] {}",
            region.addr,
            region.end(),
            region.kind.name()
        );
    }
}
