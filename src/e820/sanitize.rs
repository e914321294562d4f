//! Host E820 map sanitization for guest consumption.
//!
//! The host's raw E820 map describes memory the *host* owns. A guest created
//! with the host layout mirrored in gets a derived map: one synthesized RAM
//! region sized to its memory target, the host's reserved/ACPI regions kept
//! where hardware put them, and everything in between marked Unusable so the
//! guest kernel never places PCI I/O windows over host RAM.
//!
//! The transformation runs in fixed passes over a scratch copy of the input:
//!
//! 1. Drop everything at or under 1 MiB (guest low memory is synthesized,
//!    never inherited).
//! 2. Find the bounds of the reserved portion of the map.
//! 3. Synthesize the guest RAM region, trimmed to stop short of the first
//!    reserved host region.
//! 4. Retype or clip host RAM the guest does not own (the IGD guard).
//! 5. Cover the gap between guest RAM and the first reserved region with an
//!    Unusable entry.
//! 6. Copy the surviving non-RAM entries through.
//! 7. Append a high RAM region restoring the trimmed memory plus any balloon
//!    headroom.

use super::{E820Error, GuestMemoryParams, MemoryRegion, RegionKind, E820_MAX, LOW_MEMORY_BOUNDARY};

const FOUR_GB: u64 = 1 << 32;

/// Capacity-checked append; the output map must fit the hypervisor's fixed
/// entry table.
fn push(out: &mut Vec<MemoryRegion>, region: MemoryRegion) -> Result<(), E820Error> {
    if out.len() >= E820_MAX {
        return Err(E820Error::OutOfCapacity);
    }
    out.push(region);
    Ok(())
}

/// Transform a raw host E820 map into a map safe to hand to a guest with the
/// given memory parameters.
///
/// The caller's map is never mutated; on error no partial output is
/// returned. Output entries are emitted low-to-high by construction:
/// synthesized RAM first, then the gap guard (when freshly appended), then
/// the copied-through host entries in input order, then the balloon tail.
pub fn sanitize(
    raw_map: &[MemoryRegion],
    guest: &GuestMemoryParams,
) -> Result<Vec<MemoryRegion>, E820Error> {
    if raw_map.is_empty() {
        return Err(E820Error::InvalidArgument("empty host memory map"));
    }
    if guest.target_kb == 0 {
        return Err(E820Error::InvalidArgument("zero memory target"));
    }
    if guest.max_kb < guest.target_kb {
        return Err(E820Error::InvalidArgument("memory maximum below target"));
    }
    if raw_map.len() > E820_MAX {
        return Err(E820Error::OutOfCapacity);
    }

    let balloon_kb = guest.balloon_kb();
    let mut scratch = raw_map.to_vec();

    // Weed out anything at or under 1MB. The guest's boot-critical low
    // memory is always supplied as plain RAM, never taken from host
    // firmware data.
    for region in &mut scratch {
        if region.addr <= LOW_MEMORY_BOUNDARY {
            region.kind = RegionKind::Unset;
        }
    }

    // Bounds of the reserved portion of the host map (Reserved, ACPI, NVS).
    // RAM and Unusable entries do not count; if nothing qualifies the
    // sentinels stand for "no reserved region found".
    let mut lowest_reserved = u64::MAX;
    let mut highest_reserved_end = 0u64;
    for region in &scratch {
        match region.kind {
            RegionKind::Ram | RegionKind::Unusable | RegionKind::Unset => continue,
            _ => {}
        }
        lowest_reserved = lowest_reserved.min(region.addr);
        highest_reserved_end = highest_reserved_end.max(region.end());
    }
    let lowest_reserved_kb = if lowest_reserved != u64::MAX && lowest_reserved > 1024 {
        lowest_reserved >> 10
    } else {
        0
    };

    let mut out = Vec::new();

    // Synthesize the guest RAM region, shrunk so it never overlaps the
    // first reserved host region. The trimmed amount comes back as part of
    // the balloon tail.
    let mut ram_size = guest
        .target_kb
        .checked_mul(1024)
        .ok_or(E820Error::InvalidArgument("memory target overflows"))?;
    let mut delta_kb = 0;
    if lowest_reserved_kb != 0 && guest.target_kb > lowest_reserved_kb {
        delta_kb = guest.target_kb - lowest_reserved_kb;
        ram_size -= delta_kb << 10;
    }
    let ram_end = ram_size;
    push(&mut out, MemoryRegion::new(0, ram_size, RegionKind::Ram))?;

    // IGD guard. Intel firmware interleaves RAM with reserved regions, and
    // Linux treats E820 gaps as PCI I/O space, so host RAM the guest does
    // not own must not simply vanish from the map: anything wholly inside
    // the guest RAM region is dropped, RAM overlapping its end is clipped
    // to the non-owned suffix, and surviving low RAM is retyped Unusable.
    for region in &mut scratch {
        if region.kind == RegionKind::Unset {
            continue;
        }
        let end = region.end();

        // Host Unusable entries are dropped here and re-synthesized by the
        // gap guard below when needed.
        if region.kind == RegionKind::Unusable || end < ram_end {
            region.kind = RegionKind::Unset;
            continue;
        }
        if region.kind != RegionKind::Ram {
            continue;
        }
        if region.addr >= FOUR_GB {
            continue;
        }

        if region.addr < ram_end {
            region.kind = RegionKind::Unusable;
            let overlap = ram_end - region.addr;
            match region.size.checked_sub(overlap) {
                // Clip would invert the region: drop it.
                None => {
                    region.kind = RegionKind::Unset;
                    continue;
                }
                Some(rest) => {
                    region.size = rest;
                    region.addr = ram_end;
                }
            }
            if region.end() != end {
                return Err(E820Error::Inconsistent("clipped region end moved"));
            }
        }
        if end > ram_end {
            region.kind = RegionKind::Unusable;
        }
    }

    // Gap between the end of guest RAM and the first reserved region. It
    // must be covered by an Unusable entry or the guest assumes it is PCI
    // I/O space. A clipped entry from the pass above may already start at
    // ram_end; stretch it instead of adding a second one.
    if lowest_reserved != u64::MAX && lowest_reserved > ram_end {
        let mut covered = false;
        for region in &mut scratch {
            if region.kind != RegionKind::Unusable || region.addr != ram_end {
                continue;
            }
            if region.end() != lowest_reserved {
                region.size = lowest_reserved - region.addr;
            }
            covered = true;
            break;
        }
        if !covered {
            push(
                &mut out,
                MemoryRegion::new(ram_end, lowest_reserved - ram_end, RegionKind::Unusable),
            )?;
        }
    }

    // Copy the surviving host entries through, in input order.
    for region in &scratch {
        if region.kind == RegionKind::Ram || region.kind == RegionKind::Unset {
            continue;
        }
        push(&mut out, *region)?;
    }

    // Balloon tail: restore the memory trimmed off the RAM region plus any
    // requested balloon headroom, placed above 4GB and above every reserved
    // region.
    if balloon_kb != 0 || delta_kb != 0 {
        let tail_size = delta_kb
            .checked_add(balloon_kb)
            .and_then(|kb| kb.checked_mul(1024))
            .ok_or(E820Error::InvalidArgument("balloon region overflows"))?;
        push(
            &mut out,
            MemoryRegion::new(FOUR_GB.max(highest_reserved_end), tail_size, RegionKind::Ram),
        )?;
    }

    Ok(out)
}
