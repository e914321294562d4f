//! boron - guest physical memory map synthesis for paravirtualized VMs.
//!
//! Takes the host's raw E820 memory map, sanitizes it for a guest with a
//! given memory target, and optionally partitions it into per-vNUMA-node
//! address ranges. Runs as a dry-run inspection tool: the map that would be
//! committed to the hypervisor is printed instead.

mod domain;
mod e820;

use clap::Parser;
use domain::{HostMapSource, LogSink, MapFile, ProcIomem, VNumaRequest};
use e820::GuestMemoryParams;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "boron")]
#[command(about = "Synthesize a guest physical memory map from the host E820 layout")]
struct Args {
    /// Guest boot memory target in megabytes
    #[arg(short, long)]
    target_mb: u64,

    /// Balloon ceiling in megabytes (defaults to the target)
    #[arg(long)]
    max_mb: Option<u64>,

    /// Extra balloon slack in megabytes
    #[arg(long, default_value = "0")]
    slack_mb: u64,

    /// Mirror the host memory layout (holes and all) into the guest
    #[arg(long)]
    host_layout: bool,

    /// Read the raw map from an `addr size kind` dump file instead of /proc/iomem
    #[arg(short, long)]
    map: Option<String>,

    /// Comma-separated vNUMA node sizes in megabytes (e.g. 512,512)
    #[arg(long, value_delimiter = ',')]
    vnuma: Option<Vec<u64>>,

    /// Number of vCPUs, for the vCPU-to-node mapping
    #[arg(long, default_value = "1")]
    vcpus: u32,
}

fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = run(args) {
        eprintln!("Error: {e}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let guest = GuestMemoryParams {
        target_kb: args.target_mb * 1024,
        max_kb: args.max_mb.unwrap_or(args.target_mb) * 1024,
        slack_kb: args.slack_mb * 1024,
        use_host_layout: args.host_layout,
    };

    let source: Box<dyn HostMapSource> = match args.map {
        Some(path) => Box::new(MapFile::new(path)),
        None => Box::new(ProcIomem::default()),
    };
    let mut sink = LogSink;

    let map = domain::commit_memory_map(source.as_ref(), &mut sink, &guest)?;
    eprintln!("[VMM] sanitized map: {} entries", map.len());

    if let Some(node_sizes_mb) = args.vnuma {
        let request = VNumaRequest { node_sizes_mb };
        let ranges = domain::setup_vnuma(source.as_ref(), &mut sink, &guest, &request, args.vcpus)?;
        eprintln!("[VMM] vNUMA topology: {} nodes", ranges.len());
    }

    Ok(())
}
