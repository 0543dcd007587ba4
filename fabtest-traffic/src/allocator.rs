// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Placement of receive buffers in chip memory.

use std::collections::HashMap;

use fabtest_device::CoreCoord;
use fabtest_topology::{ChipId, FabricResult, fabric_error};
use log::debug;

use crate::memory_map::{AllocationId, MemoryMap};
use crate::types::MemoryWindowSection;

/// Where a receiver's data lands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Allocation {
    pub id: AllocationId,
    pub target_address: u64,
    pub noc_xy_encoding: u32,
}

/// Source of receive buffer addresses.
pub trait MemoryAllocator {
    /// Reserve `num_bytes` at the same address on every chip in `chips`, for
    /// the given receiving core.
    fn allocate(
        &mut self,
        chips: &[ChipId],
        core: CoreCoord,
        num_bytes: u64,
    ) -> FabricResult<Allocation>;

    /// Release one allocation on every chip it spans.
    fn release(&mut self, allocation: &Allocation);

    /// Release every allocation.
    fn reset(&mut self);
}

/// Encode a worker core as the NOC XY coordinate a sender writes to.
#[must_use]
pub fn noc_xy_encoding(core: CoreCoord) -> u32 {
    core.x | (core.y << 6)
}

fn align_up(addr: u64, alignment: u64) -> Option<u64> {
    addr.checked_add(alignment - 1).map(|a| a & !(alignment - 1))
}

/// Allocates lowest-address-first within a fixed window of every chip.
#[derive(Debug)]
pub struct LinearAllocator {
    base: u64,
    size: u64,
    alignment: u64,
    next_id: u64,
    maps: HashMap<ChipId, MemoryMap>,
}

impl LinearAllocator {
    /// Allocate within `[base, base + size)` with every address a multiple
    /// of `alignment`.
    pub fn new(base: u64, size: u64, alignment: u64) -> FabricResult<Self> {
        if size == 0 {
            return fabric_error!(Config, "memory window size must be non-zero");
        }
        if !alignment.is_power_of_two() {
            return fabric_error!(
                Config,
                "memory alignment {alignment} must be a power of two"
            );
        }
        if base.checked_add(size).is_none() {
            return fabric_error!(
                Config,
                "memory window {base:#x} + {size:#x} overflows the address space"
            );
        }
        Ok(Self {
            base,
            size,
            alignment,
            next_id: 0,
            maps: HashMap::new(),
        })
    }

    pub fn from_window(window: &MemoryWindowSection) -> FabricResult<Self> {
        Self::new(window.base, window.size, window.alignment)
    }

    /// Memory in use on `chip_id`, if it has ever been allocated on.
    #[must_use]
    pub fn memory_map(&self, chip_id: ChipId) -> Option<&MemoryMap> {
        self.maps.get(&chip_id)
    }

    fn window_end(&self) -> u64 {
        self.base + self.size
    }
}

impl MemoryAllocator for LinearAllocator {
    fn allocate(
        &mut self,
        chips: &[ChipId],
        core: CoreCoord,
        num_bytes: u64,
    ) -> FabricResult<Allocation> {
        if chips.is_empty() {
            return fabric_error!(AllocationFailed, "no chips to allocate on");
        }
        if num_bytes == 0 {
            return fabric_error!(AllocationFailed, "cannot allocate zero bytes");
        }

        let out_of_memory = || -> FabricResult<Allocation> {
            fabric_error!(
                AllocationFailed,
                "no room for {num_bytes} bytes on chips {chips:?} in window [{:#x}, {:#x})",
                self.base,
                self.window_end()
            )
        };

        let Some(mut addr) = align_up(self.base, self.alignment) else {
            return out_of_memory();
        };
        loop {
            match addr.checked_add(num_bytes) {
                Some(end) if end <= self.window_end() => {}
                _ => return out_of_memory(),
            }

            let conflict = chips.iter().find_map(|chip| {
                self.maps
                    .get(chip)
                    .and_then(|map| map.overlapping(addr, num_bytes))
                    .map(|region| region.end)
            });
            match conflict {
                None => break,
                Some(end) => match end.checked_add(1).and_then(|a| align_up(a, self.alignment)) {
                    Some(next) => addr = next,
                    None => return out_of_memory(),
                },
            }
        }

        let id = AllocationId(self.next_id);
        self.next_id += 1;
        for chip in chips {
            self.maps
                .entry(*chip)
                .or_default()
                .insert(addr, num_bytes, id)?;
        }

        let allocation = Allocation {
            id,
            target_address: addr,
            noc_xy_encoding: noc_xy_encoding(core),
        };
        debug!("Allocated {num_bytes} bytes at {addr:#x} on chips {chips:?} for core {core}");
        Ok(allocation)
    }

    fn release(&mut self, allocation: &Allocation) {
        let addr = allocation.target_address;
        for (chip, map) in &mut self.maps {
            if map.lookup(addr) == Some((allocation.id, 0)) {
                map.unmap(addr);
                debug!("Released {:?} at {addr:#x} on chip {chip}", allocation.id);
            }
        }
    }

    fn reset(&mut self) {
        self.maps.clear();
        self.next_id = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_core() {
        assert_eq!(noc_xy_encoding(CoreCoord::new(0, 0)), 0);
        assert_eq!(noc_xy_encoding(CoreCoord::new(3, 2)), 3 | (2 << 6));
    }

    #[test]
    fn aligns_addresses() {
        assert_eq!(align_up(0x11, 0x10), Some(0x20));
        assert_eq!(align_up(0x20, 0x10), Some(0x20));
        assert_eq!(align_up(u64::MAX, 0x10), None);
    }

    #[test]
    fn allocations_are_aligned_and_disjoint() {
        let mut allocator = LinearAllocator::new(0x1000, 0x1000, 0x40).unwrap();
        let a = allocator
            .allocate(&[ChipId(0)], CoreCoord::default(), 0x10)
            .unwrap();
        let b = allocator
            .allocate(&[ChipId(0)], CoreCoord::default(), 0x10)
            .unwrap();
        assert_eq!(a.target_address, 0x1000);
        assert_eq!(b.target_address, 0x1040);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn shared_address_skips_busy_chips() {
        let mut allocator = LinearAllocator::new(0, 0x1000, 0x100).unwrap();
        allocator
            .allocate(&[ChipId(1)], CoreCoord::default(), 0x180)
            .unwrap();
        let shared = allocator
            .allocate(&[ChipId(0), ChipId(1)], CoreCoord::new(1, 1), 0x100)
            .unwrap();
        assert_eq!(shared.target_address, 0x200);
        assert_eq!(allocator.memory_map(ChipId(0)).unwrap().num_regions(), 1);
        assert_eq!(allocator.memory_map(ChipId(1)).unwrap().num_regions(), 2);
    }

    #[test]
    #[should_panic(expected = "no room for 4096 bytes")]
    fn window_exhausted() {
        let mut allocator = LinearAllocator::new(0, 0x1000, 0x10).unwrap();
        allocator
            .allocate(&[ChipId(0)], CoreCoord::default(), 0x10)
            .unwrap();
        allocator
            .allocate(&[ChipId(0)], CoreCoord::default(), 0x1000)
            .unwrap();
    }

    #[test]
    fn reset_frees_everything() {
        let mut allocator = LinearAllocator::new(0, 0x100, 0x10).unwrap();
        allocator
            .allocate(&[ChipId(0)], CoreCoord::default(), 0x100)
            .unwrap();
        allocator.reset();
        let again = allocator
            .allocate(&[ChipId(0)], CoreCoord::default(), 0x100)
            .unwrap();
        assert_eq!(again.target_address, 0);
    }

    #[test]
    fn release_frees_every_chip() {
        let mut allocator = LinearAllocator::new(0, 0x100, 0x10).unwrap();
        let kept = allocator
            .allocate(&[ChipId(0)], CoreCoord::default(), 0x40)
            .unwrap();
        let shared = allocator
            .allocate(&[ChipId(0), ChipId(1)], CoreCoord::default(), 0x40)
            .unwrap();
        allocator.release(&shared);
        assert_eq!(allocator.memory_map(ChipId(0)).unwrap().num_regions(), 1);
        assert_eq!(allocator.memory_map(ChipId(1)).unwrap().num_regions(), 0);

        // Releasing twice leaves other allocations alone
        allocator.release(&shared);
        assert_eq!(allocator.memory_map(ChipId(0)).unwrap().num_regions(), 1);

        let again = allocator
            .allocate(&[ChipId(1)], CoreCoord::default(), 0x100)
            .unwrap();
        assert_eq!(again.target_address, 0);
        assert_ne!(again.id, kept.id);
    }

    #[test]
    #[should_panic(expected = "must be a power of two")]
    fn bad_alignment() {
        LinearAllocator::new(0, 0x100, 3).unwrap();
    }
}
