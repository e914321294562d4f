//! vNUMA range allocation over a sanitized E820 map.
//!
//! A guest with virtual NUMA nodes needs one guest-physical address range
//! per node. When the host layout is mirrored in, the sanitized map has
//! holes (reserved and ACPI regions), so a node's range must be stretched
//! past them until it contains the requested amount of real RAM: node
//! ranges stay contiguous in index order while their sizes stay honest.

use super::{memory_hole_size, sanitize, E820Error, GuestMemoryParams, MemoryRegion, RegionKind};

/// One virtual NUMA node's guest-physical address span, in bytes.
///
/// Callers convert to page-frame units at the hypervisor boundary.
/// `end >= start` always holds; a node starved of host RAM degrades to an
/// empty range rather than violating it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VmemRange {
    /// Start address (inclusive).
    pub start: u64,

    /// End address (exclusive).
    pub end: u64,
}

/// Compute per-node address ranges for a vNUMA guest.
///
/// Sanitizes `raw_map` with the same parameters the memory-map commit uses,
/// then walks the node sizes in order, handing each node the next span of
/// address space. With `guest.use_host_layout` set, each node's end grows
/// past map holes until the range holds the requested number of non-hole
/// bytes, capped at the end of host RAM.
///
/// Running out of host RAM is a normal degrade path, not an error: the
/// shortfall is confined to the trailing nodes, which may come back smaller
/// than requested or empty.
pub fn align_vnuma_ranges(
    raw_map: &[MemoryRegion],
    guest: &GuestMemoryParams,
    node_sizes_mb: &[u64],
) -> Result<Vec<VmemRange>, E820Error> {
    if node_sizes_mb.is_empty() {
        return Err(E820Error::InvalidArgument("no vNUMA node sizes"));
    }
    let map = sanitize(raw_map, guest)?;
    align_over_map(&map, guest.use_host_layout, node_sizes_mb)
}

fn align_over_map(
    map: &[MemoryRegion],
    use_host_layout: bool,
    node_sizes_mb: &[u64],
) -> Result<Vec<VmemRange>, E820Error> {
    // End of host RAM: the last RAM entry in map order, scanning backward.
    let end_max = map
        .iter()
        .rev()
        .find(|r| r.kind == RegionKind::Ram)
        .map(|r| r.end())
        .unwrap_or(0);

    let mut ranges = Vec::with_capacity(node_sizes_mb.len());
    let mut cursor = map.first().map(|r| r.addr).unwrap_or(0);

    for &size_mb in node_sizes_mb {
        let requested = size_mb
            .checked_mul(1 << 20)
            .ok_or(E820Error::InvalidArgument("vNUMA node size overflows"))?;
        let start = cursor;
        let mut end = start
            .checked_add(requested)
            .ok_or(E820Error::InvalidArgument("vNUMA range overflows"))?;

        if use_host_layout {
            // Grow the range until it contains `requested` bytes of RAM.
            // The cap at end_max is the termination bound: reaching it
            // leaves this node (and every later one) with whatever is left.
            loop {
                let hole = memory_hole_size(start, end, map);
                if end - start - hole >= requested {
                    break;
                }
                end = end.saturating_add(hole);
                if end > end_max {
                    end = end_max.max(start);
                    break;
                }
            }
        }

        ranges.push(VmemRange { start, end });
        cursor = end;
    }

    // Accumulated rounding may have pushed the last node past host RAM.
    if let Some(last) = ranges.last_mut() {
        if last.end > end_max {
            last.end = end_max.max(last.start);
        }
    }

    Ok(ranges)
}

#[cfg(test)]
mod tests {
    use super::*;
    use RegionKind::{Ram, Reserved};

    const MB: u64 = 1 << 20;
    const GB: u64 = 1 << 30;

    fn region(addr: u64, size: u64, kind: RegionKind) -> MemoryRegion {
        MemoryRegion::new(addr, size, kind)
    }

    fn params(target_kb: u64, use_host_layout: bool) -> GuestMemoryParams {
        GuestMemoryParams {
            target_kb,
            max_kb: target_kb,
            slack_kb: 0,
            use_host_layout,
        }
    }

    /// Sanitized-shape map with a 64MB reserved hole at 400MB and RAM
    /// resuming right after it.
    fn holey_map() -> Vec<MemoryRegion> {
        vec![
            region(0, 400 * MB, Ram),
            region(400 * MB, 64 * MB, Reserved),
            region(464 * MB, 624 * MB, Ram),
        ]
    }

    #[test]
    fn test_empty_node_list_rejected() {
        let raw = vec![region(2 * MB, 2 * GB, Ram)];
        assert_eq!(
            align_vnuma_ranges(&raw, &params(1 << 20, false), &[]),
            Err(E820Error::InvalidArgument("no vNUMA node sizes"))
        );
    }

    #[test]
    fn test_contiguous_map_splits_without_adjustment() {
        let raw = vec![region(0, MB, Ram), region(2 * MB, 512 * MB, Ram)];
        let ranges = align_vnuma_ranges(&raw, &params(1 << 20, false), &[512, 512]).unwrap();
        assert_eq!(
            ranges,
            vec![
                VmemRange { start: 0, end: 512 * MB },
                VmemRange { start: 512 * MB, end: GB },
            ]
        );
    }

    #[test]
    fn test_node_grows_past_hole() {
        // First node must stretch 64MB past the hole at 400MB to deliver
        // its full 512MB of RAM; the second starts where the first ended.
        let ranges = align_over_map(&holey_map(), true, &[512, 512]).unwrap();
        assert_eq!(
            ranges,
            vec![
                VmemRange { start: 0, end: 576 * MB },
                VmemRange { start: 576 * MB, end: 1088 * MB },
            ]
        );
    }

    #[test]
    fn test_node_sizes_conserved_over_holes() {
        let map = holey_map();
        let sizes = [512u64, 512];
        let ranges = align_over_map(&map, true, &sizes).unwrap();
        for (range, &size_mb) in ranges.iter().zip(&sizes) {
            let hole = memory_hole_size(range.start, range.end, &map);
            assert_eq!(range.end - range.start - hole, size_mb * MB);
        }
    }

    #[test]
    fn test_exhausted_ram_degrades_trailing_node() {
        // Only 512MB of RAM for two 512MB nodes: the second collapses to
        // an empty range at the end of RAM.
        let map = vec![region(0, 512 * MB, Ram)];
        let ranges = align_over_map(&map, true, &[512, 512]).unwrap();
        assert_eq!(
            ranges,
            vec![
                VmemRange { start: 0, end: 512 * MB },
                VmemRange { start: 512 * MB, end: 512 * MB },
            ]
        );
    }

    #[test]
    fn test_final_node_clamped_without_host_layout() {
        let map = vec![region(0, 512 * MB, Ram)];
        let ranges = align_over_map(&map, false, &[256, 512]).unwrap();
        assert_eq!(
            ranges,
            vec![
                VmemRange { start: 0, end: 256 * MB },
                VmemRange { start: 256 * MB, end: 512 * MB },
            ]
        );
    }

    #[test]
    fn test_growth_capped_at_end_of_ram() {
        // The hole never ends (no RAM past 464MB up to 4GB), so the first
        // node caps at end_max and the second gets nothing.
        let map = vec![
            region(0, 400 * MB, Ram),
            region(400 * MB, 64 * MB, Reserved),
        ];
        let ranges = align_over_map(&map, true, &[512, 512]).unwrap();
        assert_eq!(ranges[0], VmemRange { start: 0, end: 400 * MB });
        assert_eq!(ranges[1], VmemRange { start: 400 * MB, end: 400 * MB });
    }

    #[test]
    fn test_full_pipeline_through_sanitize() {
        let raw = vec![region(2 * MB, 4 * GB, Ram)];
        let ranges = align_vnuma_ranges(&raw, &params(1 << 20, true), &[512, 512]).unwrap();
        assert_eq!(
            ranges,
            vec![
                VmemRange { start: 0, end: 512 * MB },
                VmemRange { start: 512 * MB, end: GB },
            ]
        );
    }
}
