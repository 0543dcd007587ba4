// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Open, track and close the devices of a cluster.
//!
//! The [DeviceManager](manager::DeviceManager) is the only owner of
//! [DeviceHandle]s. Everything else borrows them for as long as the devices
//! are open.

use std::fmt;

use fabtest_topology::ChipId;
use fabtest_topology::types::ClusterType;

pub mod dispatch;
pub mod manager;
pub mod sim;
pub mod types;

pub use crate::dispatch::ProgramDispatch;
pub use crate::manager::DeviceManager;
pub use crate::types::{CoreCoord, DispatchMode, FabricConfig, KernelConfig, Program};
pub use fabtest_topology::{FabricError, FabricResult};

/// Opaque handle to an open device.
///
/// Deliberately not `Clone`: a handle is created by a [DeviceBackend] and
/// consumed again when the device is closed.
#[derive(Debug, PartialEq, Eq)]
pub struct DeviceHandle {
    chip_id: ChipId,
    id: u64,
}

impl DeviceHandle {
    #[must_use]
    pub fn new(chip_id: ChipId, id: u64) -> Self {
        Self { chip_id, id }
    }

    #[must_use]
    pub fn chip_id(&self) -> ChipId {
        self.chip_id
    }

    /// Backend-specific identity of the open device.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "device {} (chip {})", self.id, self.chip_id)
    }
}

/// Device open/close primitives.
pub trait DeviceBackend {
    fn num_available_devices(&self) -> usize;

    fn initialize_fabric(&mut self, config: FabricConfig) -> FabricResult<()>;

    fn open_device(&mut self, chip_id: ChipId) -> FabricResult<DeviceHandle>;

    fn close_device(&mut self, handle: DeviceHandle) -> FabricResult<()>;
}

/// Anything that can say whether a chip is usable for traffic.
pub trait ChipRegistry {
    fn has_chip(&self, chip_id: ChipId) -> bool;
}

impl ChipRegistry for [ChipId] {
    fn has_chip(&self, chip_id: ChipId) -> bool {
        self.contains(&chip_id)
    }
}

impl ChipRegistry for Vec<ChipId> {
    fn has_chip(&self, chip_id: ChipId) -> bool {
        self.contains(&chip_id)
    }
}

/// First chip id of a cluster, unless explicitly overridden.
#[must_use]
pub fn chip_id_offset(cluster_type: ClusterType, explicit: Option<u32>) -> u32 {
    explicit.unwrap_or_else(|| cluster_type.default_chip_id_offset())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn galaxy_offset() {
        assert_eq!(chip_id_offset(ClusterType::Galaxy, None), 4);
        assert_eq!(chip_id_offset(ClusterType::Standard, None), 0);
        assert_eq!(chip_id_offset(ClusterType::Galaxy, Some(1)), 1);
    }

    #[test]
    fn slice_registry() {
        let chips = vec![ChipId(2), ChipId(3)];
        assert!(chips.has_chip(ChipId(3)));
        assert!(!chips.as_slice().has_chip(ChipId(4)));
    }
}
