// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! The regions of one chip's memory that are in use.

use std::collections::BTreeMap;

use fabtest_topology::{FabricResult, fabric_error};

/// Identity of a single allocation, shared by every chip it spans.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AllocationId(pub u64);

#[derive(Clone, Debug)]
pub struct MemoryRegion {
    pub start: u64,
    pub end: u64,
    pub allocation: AllocationId,
}

#[derive(Debug, Default)]
pub struct MemoryMap {
    // key = start address of region
    regions: BTreeMap<u64, MemoryRegion>,
}

impl MemoryMap {
    #[must_use]
    pub fn new() -> Self {
        Self {
            regions: BTreeMap::new(),
        }
    }

    /// Reserve [start, start+size-1] for an allocation.
    pub fn insert(&mut self, start: u64, size: u64, allocation: AllocationId) -> FabricResult<()> {
        let end = match size.checked_sub(1).and_then(|s| start.checked_add(s)) {
            Some(end) if size > 0 => end,
            _ => return fabric_error!(AllocationFailed, "Invalid region size {size} at {start:#x}"),
        };

        if let Some(region) = self.overlapping(start, size) {
            return fabric_error!(
                AllocationFailed,
                "Region overlap at {:#x} with [{:#x}, {:#x}]",
                start.max(region.start),
                region.start,
                region.end
            );
        }

        let region = MemoryRegion {
            start,
            end,
            allocation,
        };
        self.regions.insert(start, region);
        Ok(())
    }

    /// The highest region that intersects [start, start+size-1], if any.
    #[must_use]
    pub fn overlapping(&self, start: u64, size: u64) -> Option<&MemoryRegion> {
        let last = start.saturating_add(size.saturating_sub(1));
        // Regions never overlap, so only the last one starting at or before
        // `last` can reach into the range
        let (_, region) = self.regions.range(..=last).next_back()?;
        (region.end >= start).then_some(region)
    }

    /// Remove a region by its exact start address.
    pub fn unmap(&mut self, start: u64) -> Option<MemoryRegion> {
        self.regions.remove(&start)
    }

    /// Resolve an address to (allocation, offset_in_region).
    #[must_use]
    pub fn lookup(&self, addr: u64) -> Option<(AllocationId, u64)> {
        // Find region with greatest start <= addr
        let (_, region) = self.regions.range(..=addr).next_back()?;
        if addr <= region.end {
            Some((region.allocation, addr - region.start))
        } else {
            None
        }
    }

    #[must_use]
    pub fn num_regions(&self) -> usize {
        self.regions.len()
    }
}
