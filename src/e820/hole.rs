//! Hole accounting over an E820 map.
//!
//! A sanitized map for a guest built from the host layout is not contiguous:
//! reserved and ACPI regions punch holes into the RAM address space. The
//! vNUMA allocator needs to know how many bytes of a candidate range are
//! *not* backed by RAM so it can grow the range until the requested amount
//! of real memory fits.

use super::{MemoryRegion, RegionKind};

/// Number of bytes in `[start, end)` not covered by any RAM region of `map`.
///
/// Starts from `end - start` and credits back RAM regions touching the
/// range's boundaries:
///
/// - a region containing `start` is credited up to `min(region end, end)`
/// - a region containing `end` is credited from `max(region start, start)`
///   and terminates the scan; the first such region in map order wins, and
///   only one terminating credit is ever applied
///
/// Non-RAM regions never reduce the result. Returns `0` when the range is
/// fully covered and `end - start` when no RAM region overlaps it at all.
///
/// The scan-order tie-break is load-bearing: maps are emitted low-to-high by
/// construction rather than sorted, and changing which region terminates the
/// scan changes the guest-visible vNUMA layout.
pub fn memory_hole_size(start: u64, end: u64, map: &[MemoryRegion]) -> u64 {
    let mut absent = end.saturating_sub(start);

    for region in map {
        if region.kind != RegionKind::Ram {
            continue;
        }
        let region_start = region.addr;
        let region_end = region.end();

        // Range begins inside this region?
        if start >= region_start && start <= region_end {
            if end > region_end {
                absent = absent.saturating_sub(region_end - start);
            } else {
                // Region swallows the whole range: nothing absent here.
                absent = absent.saturating_sub(end - start);
            }
            continue;
        }

        // Range ends inside this region? First match wins.
        if end <= region_end && end >= region_start {
            absent = absent.saturating_sub(end - region_start);
            break;
        }
    }

    absent
}
