//! E820 memory map synthesis for paravirtualized guests.
//!
//! When a paravirtualized guest is created with host memory layout enabled,
//! it must see a physical memory map derived from the host's real E820 map:
//! reserved regions, ACPI tables and unusable holes stay where the hardware
//! put them, while RAM is resized to the guest's memory target. Handing the
//! host map through unmodified would give the guest RAM it does not own;
//! handing it a flat synthetic map would let the guest place PCI I/O windows
//! on top of host RAM. This module implements the transformation in between.
//!
//! # E820 Memory Map
//!
//! The E820 map is the standard firmware table of physical address ranges,
//! named after the BIOS call (`int 15h, ax=E820h`) that returns it. Each
//! entry describes one region:
//!
//! - **Address**: Start of the memory region
//! - **Size**: Length in bytes
//! - **Type**: What the memory is used for
//!
//! Memory types:
//! - Type 1 (RAM): Available for general use
//! - Type 2 (Reserved): Reserved by firmware, do not use
//! - Type 3 (ACPI): ACPI tables, reclaimable after parsing
//! - Type 4 (NVS): ACPI Non-Volatile Storage, must be preserved
//! - Type 5 (Unusable): Defective or otherwise unusable memory
//!
//! # Pipeline
//!
//! Data flows one way through this module:
//!
//! ```text
//! raw host map ──► sanitize ──► sanitized guest map ──► align_vnuma_ranges
//!                  (sanitize.rs)                        (vnuma.rs, optional)
//! ```
//!
//! Everything here is pure computation over value types: no hypervisor
//! calls, no I/O, no shared state. The caller's map is never mutated; a
//! failed call produces no partial output.

mod hole;
mod sanitize;
mod vnuma;

pub use hole::memory_hole_size;
pub use sanitize::sanitize;
pub use vnuma::{align_vnuma_ranges, VmemRange};

use thiserror::Error;

/// Maximum number of entries in an E820 map.
///
/// Fixed by the hypervisor's set-memory-map interface; both the raw host
/// map and the sanitized output must fit.
pub const E820_MAX: usize = 128;

/// Guest low memory boundary (1 MiB).
///
/// Host entries at or below this address are never propagated to the guest:
/// boot-critical low memory (IVT, BDA, EBDA, ROM shadows) is always supplied
/// as plain RAM instead of whatever the host firmware reported.
pub const LOW_MEMORY_BOUNDARY: u64 = 0x10_0000;

/// Classification of an E820 region.
///
/// The discriminants are the E820 type codes the hypervisor interface
/// expects. `Unset` is a scratch-only sentinel meaning "drop this entry";
/// it never appears in a finalized map.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegionKind {
    /// Drop marker used while sanitizing. Never emitted.
    Unset = 0,

    /// Usable RAM.
    Ram = 1,

    /// Reserved by firmware or hardware.
    Reserved = 2,

    /// ACPI tables, reclaimable after parsing.
    Acpi = 3,

    /// ACPI Non-Volatile Storage.
    AcpiNvs = 4,

    /// Defective or otherwise unusable memory.
    Unusable = 5,
}

impl RegionKind {
    /// Human-readable name for map dumps.
    pub fn name(self) -> &'static str {
        match self {
            RegionKind::Ram => "RAM",
            RegionKind::Reserved => "Reserved",
            RegionKind::Acpi => "ACPI",
            RegionKind::AcpiNvs => "ACPI NVS",
            RegionKind::Unusable => "Unusable",
            RegionKind::Unset => "Unset",
        }
    }
}

/// One E820 map entry: a half-open byte range `[addr, addr + size)` and its
/// classification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryRegion {
    /// Start address in bytes.
    pub addr: u64,

    /// Length in bytes.
    pub size: u64,

    /// Region classification.
    pub kind: RegionKind,
}

impl MemoryRegion {
    /// Construct an entry.
    pub fn new(addr: u64, size: u64, kind: RegionKind) -> Self {
        Self { addr, size, kind }
    }

    /// End address of the region (exclusive). Saturates rather than wraps
    /// so a corrupt host entry cannot fold back around address zero.
    pub fn end(&self) -> u64 {
        self.addr.saturating_add(self.size)
    }
}

/// Guest memory sizing parameters, in kilobytes.
///
/// Drawn from domain configuration once per creation attempt. `target_kb`
/// is the memory the guest boots with; `max_kb` is the ceiling it may
/// balloon up to; `slack_kb` is extra headroom added on top of the balloon
/// region. Invariant: `max_kb >= target_kb` (checked by [`sanitize`]).
#[derive(Clone, Copy, Debug)]
pub struct GuestMemoryParams {
    /// Boot-time memory target in KiB. Must be nonzero.
    pub target_kb: u64,

    /// Balloon ceiling in KiB. Must be at least `target_kb`.
    pub max_kb: u64,

    /// Extra balloon headroom in KiB.
    pub slack_kb: u64,

    /// Mirror the host memory layout (holes and all) into the guest.
    /// When false the guest sees one contiguous RAM region and vNUMA
    /// ranges need no hole adjustment.
    pub use_host_layout: bool,
}

impl GuestMemoryParams {
    /// Size of the balloon region in KiB: the gap between target and max,
    /// plus slack.
    pub fn balloon_kb(&self) -> u64 {
        self.max_kb.saturating_sub(self.target_kb) + self.slack_kb
    }
}

/// Errors produced by map sanitization and vNUMA range allocation.
///
/// These are pure computations: none of them is retryable, and on any error
/// no partial output map is returned.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum E820Error {
    /// An input precondition was violated (empty map, zero memory target,
    /// zero node count, max below target).
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The raw map or the computed output map exceeds [`E820_MAX`] entries.
    #[error("memory map exceeds {E820_MAX} entries")]
    OutOfCapacity,

    /// An internal arithmetic cross-check failed. This signals a logic
    /// defect in the sanitizer and must be surfaced, never patched over
    /// by dropping the offending entry.
    #[error("inconsistent map arithmetic: {0}")]
    Inconsistent(&'static str),
}
