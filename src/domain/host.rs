//! Host map sources and a dry-run commit sink.
//!
//! Two [`HostMapSource`] implementations: [`ProcIomem`] reads the live
//! host layout from `/proc/iomem`, and [`MapFile`] reads an `addr size
//! kind` dump file so runs are reproducible offline. [`LogSink`] is a
//! [`MapCommitSink`] that prints what would have been committed.

use super::{DomainError, HostMapSource, MapCommitSink};
use crate::e820::{MemoryRegion, RegionKind, VmemRange};
use std::fs;
use std::path::{Path, PathBuf};

/// Reads the raw host memory map from `/proc/iomem`.
///
/// Only top-level resources are considered; nested lines (kernel code,
/// PCI BARs and the like) describe claims inside their parent range, not
/// additional physical memory.
pub struct ProcIomem {
    path: PathBuf,
}

impl ProcIomem {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Default for ProcIomem {
    fn default() -> Self {
        Self::new("/proc/iomem")
    }
}

impl HostMapSource for ProcIomem {
    fn host_memory_map(&self) -> Result<Vec<MemoryRegion>, DomainError> {
        let text = read(&self.path)?;
        parse_iomem(&text, &self.path.display().to_string())
    }
}

/// Reads a raw memory map from a dump file of `addr size kind` lines.
///
/// Addresses and sizes are decimal or `0x`-prefixed hex; kinds are `ram`,
/// `reserved`, `acpi`, `nvs` or `unusable`. Blank lines and `#` comments
/// are skipped.
pub struct MapFile {
    path: PathBuf,
}

impl MapFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl HostMapSource for MapFile {
    fn host_memory_map(&self) -> Result<Vec<MemoryRegion>, DomainError> {
        let text = read(&self.path)?;
        parse_map_file(&text, &self.path.display().to_string())
    }
}

fn read(path: &Path) -> Result<String, DomainError> {
    fs::read_to_string(path).map_err(|source| DomainError::HostMap {
        path: path.display().to_string(),
        source,
    })
}

fn parse_iomem(text: &str, path: &str) -> Result<Vec<MemoryRegion>, DomainError> {
    let mut map = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        // Indented lines are nested resources.
        if line.starts_with(' ') || line.is_empty() {
            continue;
        }
        let parse_err = |msg: &str| DomainError::MapParse {
            path: path.to_string(),
            line: idx + 1,
            msg: msg.to_string(),
        };

        let (range, name) = line
            .split_once(" : ")
            .ok_or_else(|| parse_err("expected 'start-end : name'"))?;
        let (lo, hi) = range
            .split_once('-')
            .ok_or_else(|| parse_err("expected 'start-end' range"))?;
        let addr = u64::from_str_radix(lo.trim(), 16)
            .map_err(|_| parse_err("bad start address"))?;
        let end = u64::from_str_radix(hi.trim(), 16)
            .map_err(|_| parse_err("bad end address"))?;
        if end < addr {
            return Err(parse_err("range end below start"));
        }

        map.push(MemoryRegion::new(
            addr,
            // /proc/iomem ends are inclusive.
            end - addr + 1,
            kind_for_iomem_name(name.trim()),
        ));
    }
    Ok(map)
}

fn kind_for_iomem_name(name: &str) -> RegionKind {
    match name {
        "System RAM" => RegionKind::Ram,
        "ACPI Tables" => RegionKind::Acpi,
        "ACPI Non-volatile Storage" => RegionKind::AcpiNvs,
        "Unusable memory" => RegionKind::Unusable,
        _ => RegionKind::Reserved,
    }
}

fn parse_map_file(text: &str, path: &str) -> Result<Vec<MemoryRegion>, DomainError> {
    let mut map = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let parse_err = |msg: &str| DomainError::MapParse {
            path: path.to_string(),
            line: idx + 1,
            msg: msg.to_string(),
        };

        let mut fields = line.split_whitespace();
        let addr = fields.next().ok_or_else(|| parse_err("missing address"))?;
        let size = fields.next().ok_or_else(|| parse_err("missing size"))?;
        let kind = fields.next().ok_or_else(|| parse_err("missing kind"))?;
        if fields.next().is_some() {
            return Err(parse_err("trailing fields"));
        }

        let addr = parse_u64(addr).ok_or_else(|| parse_err("bad address"))?;
        let size = parse_u64(size).ok_or_else(|| parse_err("bad size"))?;
        let kind = match kind.to_ascii_lowercase().as_str() {
            "ram" => RegionKind::Ram,
            "reserved" => RegionKind::Reserved,
            "acpi" => RegionKind::Acpi,
            "nvs" | "acpi-nvs" => RegionKind::AcpiNvs,
            "unusable" => RegionKind::Unusable,
            _ => return Err(parse_err("unknown region kind")),
        };

        map.push(MemoryRegion::new(addr, size, kind));
    }
    Ok(map)
}

fn parse_u64(s: &str) -> Option<u64> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else {
        s.parse().ok()
    }
}

/// Dry-run sink: prints what would be handed to the hypervisor.
pub struct LogSink;

impl MapCommitSink for LogSink {
    fn set_memory_map(&mut self, map: &[MemoryRegion]) -> Result<(), DomainError> {
        eprintln!("[Commit] set_memory_map: {} entries", map.len());
        Ok(())
    }

    fn set_vnuma_topology(
        &mut self,
        ranges: &[VmemRange],
        distances: &[u32],
        vcpu_to_node: &[u32],
    ) -> Result<(), DomainError> {
        eprintln!(
            "[Commit] set_vnuma_topology: {} nodes, {} distances, {} vCPUs",
            ranges.len(),
            distances.len(),
            vcpu_to_node.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_iomem_top_level_only() {
        let text = "\
00000000-00000fff : Reserved
00001000-0009ffff : System RAM
000a0000-000fffff : PCI Bus 0000:00
00100000-bffdffff : System RAM
  01000000-01ffffff : Kernel code
bffe0000-bfffffff : ACPI Tables
100000000-13fffffff : System RAM
";
        let map = parse_iomem(text, "test").unwrap();
        assert_eq!(
            map,
            vec![
                MemoryRegion::new(0, 0x1000, RegionKind::Reserved),
                MemoryRegion::new(0x1000, 0x9f000, RegionKind::Ram),
                MemoryRegion::new(0xa0000, 0x60000, RegionKind::Reserved),
                MemoryRegion::new(0x10_0000, 0xbfee_0000, RegionKind::Ram),
                MemoryRegion::new(0xbffe_0000, 0x2_0000, RegionKind::Acpi),
                MemoryRegion::new(0x1_0000_0000, 0x4000_0000, RegionKind::Ram),
            ]
        );
    }

    #[test]
    fn test_parse_iomem_rejects_malformed_range() {
        let err = parse_iomem("zzz : System RAM\n", "test");
        assert!(matches!(
            err,
            Err(DomainError::MapParse { line: 1, .. })
        ));
    }

    #[test]
    fn test_parse_iomem_rejects_inverted_range() {
        let err = parse_iomem("00002000-00001000 : System RAM\n", "test");
        assert!(matches!(err, Err(DomainError::MapParse { .. })));
    }

    #[test]
    fn test_parse_map_file_mixed_radix() {
        let text = "\
# host snapshot
0x0 0x100000 ram

1048576 0x10000000 ram
0xF0000000 65536 reserved
0xF0010000 0x1000 nvs
";
        let map = parse_map_file(text, "test").unwrap();
        assert_eq!(
            map,
            vec![
                MemoryRegion::new(0, 0x10_0000, RegionKind::Ram),
                MemoryRegion::new(0x10_0000, 0x1000_0000, RegionKind::Ram),
                MemoryRegion::new(0xF000_0000, 0x1_0000, RegionKind::Reserved),
                MemoryRegion::new(0xF001_0000, 0x1000, RegionKind::AcpiNvs),
            ]
        );
    }

    #[test]
    fn test_parse_map_file_reports_line_number() {
        let text = "0x0 0x1000 ram\n0x1000 0x1000 bogus\n";
        match parse_map_file(text, "test") {
            Err(DomainError::MapParse { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected parse error, got {other:?}"),
        }
    }
}
