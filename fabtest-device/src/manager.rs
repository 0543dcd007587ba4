// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

use std::collections::BTreeMap;

use fabtest_topology::{ChipId, FabricError, FabricResult, fabric_error};
use log::{debug, error, info};

use crate::dispatch::ProgramDispatch;
use crate::types::{DispatchMode, FabricConfig, Program};
use crate::{ChipRegistry, DeviceBackend, DeviceHandle};

/// Owns every open [DeviceHandle] of a cluster.
///
/// Devices are either all open or all closed: a failure part way through
/// [open_all](DeviceManager::open_all) closes whatever had been opened.
pub struct DeviceManager<B: DeviceBackend> {
    backend: B,
    dispatch_mode: DispatchMode,
    chip_id_offset: u32,
    chip_ids: Vec<ChipId>,
    handles: BTreeMap<ChipId, DeviceHandle>,
    fabric_config: FabricConfig,
}

impl<B: DeviceBackend> DeviceManager<B> {
    #[must_use]
    pub fn new(backend: B, dispatch_mode: DispatchMode, chip_id_offset: u32) -> Self {
        Self {
            backend,
            dispatch_mode,
            chip_id_offset,
            chip_ids: Vec::new(),
            handles: BTreeMap::new(),
            fabric_config: FabricConfig::Disabled,
        }
    }

    /// Enumerate the chip ids of every available device.
    ///
    /// Ids are consecutive, starting at the chip id offset.
    pub fn discover_chip_ids(&mut self) -> FabricResult<&[ChipId]> {
        let num_available = self.backend.num_available_devices();
        let Ok(num_devices) = u32::try_from(num_available) else {
            return fabric_error!(Device, "{num_available} devices exceed the chip id range");
        };
        let Some(end) = self.chip_id_offset.checked_add(num_devices) else {
            return fabric_error!(
                Config,
                "chip id offset {} leaves no room for {num_devices} device(s)",
                self.chip_id_offset
            );
        };
        self.chip_ids = (self.chip_id_offset..end).map(ChipId).collect();
        debug!(
            "{num_devices} device(s) available, chip ids {:?}",
            self.chip_ids
        );
        Ok(&self.chip_ids)
    }

    #[must_use]
    pub fn chip_ids(&self) -> &[ChipId] {
        &self.chip_ids
    }

    #[must_use]
    pub fn dispatch_mode(&self) -> DispatchMode {
        self.dispatch_mode
    }

    #[must_use]
    pub fn fabric_config(&self) -> FabricConfig {
        self.fabric_config
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.handles.is_empty()
    }

    pub fn open_chip_ids(&self) -> impl Iterator<Item = ChipId> + '_ {
        self.handles.keys().copied()
    }

    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Bring up the fabric and open a device for every discovered chip.
    pub fn open_all(&mut self, fabric_config: FabricConfig) -> FabricResult<()> {
        if self.is_open() {
            return fabric_error!(InvalidState, "devices are already open");
        }
        if self.chip_ids.is_empty() {
            return fabric_error!(Device, "no chip ids discovered to open");
        }

        info!(
            "Opening {} device(s) with {fabric_config}",
            self.chip_ids.len()
        );
        self.backend.initialize_fabric(fabric_config)?;
        self.fabric_config = fabric_config;

        for chip_id in self.chip_ids.clone() {
            match self.backend.open_device(chip_id) {
                Ok(handle) => {
                    debug!("Opened {handle}");
                    self.handles.insert(chip_id, handle);
                }
                Err(e) => {
                    error!("Failed to open chip {chip_id}: {e}");
                    // Report the open failure rather than any close failure
                    if let Err(close_err) = self.close_all() {
                        error!("Failed to clean up after open failure: {close_err}");
                    }
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Borrow the handle of an open chip.
    pub fn handle_of(&self, chip_id: ChipId) -> FabricResult<&DeviceHandle> {
        self.handles
            .get(&chip_id)
            .ok_or(FabricError::UnknownChip(chip_id))
    }

    /// Close every device and disable the fabric.
    ///
    /// Calling this when nothing is open does nothing. Every handle is
    /// released even if closing one of them fails; the first failure is
    /// returned.
    pub fn close_all(&mut self) -> FabricResult<()> {
        if !self.is_open() && self.fabric_config == FabricConfig::Disabled {
            return Ok(());
        }

        info!("Closing {} device(s)", self.handles.len());
        let mut result = Ok(());
        for (chip_id, handle) in std::mem::take(&mut self.handles) {
            if let Err(e) = self.backend.close_device(handle) {
                error!("Failed to close chip {chip_id}: {e}");
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }

        if let Err(e) = self.backend.initialize_fabric(FabricConfig::Disabled) {
            error!("Failed to disable fabric: {e}");
            if result.is_ok() {
                result = Err(e);
            }
        }
        self.fabric_config = FabricConfig::Disabled;
        result
    }

    /// Start `program` on `chip_id` without waiting for it to complete.
    pub fn run_program_non_blocking(
        &self,
        dispatch: &mut dyn ProgramDispatch,
        chip_id: ChipId,
        program: &Program,
    ) -> FabricResult<()> {
        let handle = self.handle_of(chip_id)?;
        debug!("Starting program '{}' on {handle}", program.name);
        match self.dispatch_mode {
            DispatchMode::Slow => dispatch.launch_program(handle, program),
            DispatchMode::Fast => dispatch.enqueue_program(handle, program),
        }
    }

    /// Block until `program` has completed on `chip_id`.
    pub fn wait_for_program_done(
        &self,
        dispatch: &mut dyn ProgramDispatch,
        chip_id: ChipId,
        program: &Program,
    ) -> FabricResult<()> {
        let handle = self.handle_of(chip_id)?;
        debug!("Waiting for program '{}' on {handle}", program.name);
        match self.dispatch_mode {
            DispatchMode::Slow => dispatch.wait_program_done(handle, program),
            DispatchMode::Fast => dispatch.finish(handle),
        }
    }
}

impl<B: DeviceBackend> ChipRegistry for DeviceManager<B> {
    fn has_chip(&self, chip_id: ChipId) -> bool {
        self.handles.contains_key(&chip_id)
    }
}
