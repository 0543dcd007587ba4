// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! An in-process cluster that records what was asked of it.
//!
//! Clones share the same state, so one clone can be handed to a
//! [DeviceManager](crate::DeviceManager) as its backend while another is used
//! to dispatch programs.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use fabtest_topology::{ChipId, FabricResult, fabric_error};
use log::trace;

use crate::dispatch::ProgramDispatch;
use crate::types::{FabricConfig, Program};
use crate::{DeviceBackend, DeviceHandle};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SimEvent {
    FabricInitialized(FabricConfig),
    Opened(ChipId),
    Closed(ChipId),
    Launched { chip_id: ChipId, program: String },
    Waited { chip_id: ChipId, program: String },
    Enqueued { chip_id: ChipId, program: String },
    Finished(ChipId),
}

impl fmt::Display for SimEvent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SimEvent::FabricInitialized(config) => write!(f, "fabric {config}"),
            SimEvent::Opened(chip_id) => write!(f, "open {chip_id}"),
            SimEvent::Closed(chip_id) => write!(f, "close {chip_id}"),
            SimEvent::Launched { chip_id, program } => write!(f, "launch {program}@{chip_id}"),
            SimEvent::Waited { chip_id, program } => write!(f, "wait {program}@{chip_id}"),
            SimEvent::Enqueued { chip_id, program } => write!(f, "enqueue {program}@{chip_id}"),
            SimEvent::Finished(chip_id) => write!(f, "finish {chip_id}"),
        }
    }
}

#[derive(Default)]
struct SimState {
    chip_ids: Vec<ChipId>,
    fail_open_on: Option<ChipId>,
    fabric_config: FabricConfig,
    next_handle_id: u64,
    open: BTreeMap<ChipId, u64>,
    pending: BTreeMap<ChipId, Vec<String>>,
    events: Vec<SimEvent>,
}

impl SimState {
    fn check_handle(&self, device: &DeviceHandle) -> FabricResult<()> {
        match self.open.get(&device.chip_id()) {
            Some(id) if *id == device.id() => Ok(()),
            _ => fabric_error!(Device, "{device} is not open"),
        }
    }
}

#[derive(Clone)]
pub struct SimulatedCluster {
    state: Rc<RefCell<SimState>>,
}

impl SimulatedCluster {
    /// A cluster whose devices open as the given chip ids.
    #[must_use]
    pub fn new(chip_ids: Vec<ChipId>) -> Self {
        let state = SimState {
            chip_ids,
            fabric_config: FabricConfig::Disabled,
            ..SimState::default()
        };
        Self {
            state: Rc::new(RefCell::new(state)),
        }
    }

    /// `num_devices` devices with consecutive ids from `first_chip_id`.
    #[must_use]
    pub fn with_devices(num_devices: u32, first_chip_id: u32) -> Self {
        Self::new(
            (first_chip_id..first_chip_id.saturating_add(num_devices))
                .map(ChipId)
                .collect(),
        )
    }

    /// Make opening `chip_id` fail.
    pub fn fail_open_on(&self, chip_id: ChipId) {
        self.state.borrow_mut().fail_open_on = Some(chip_id);
    }

    #[must_use]
    pub fn events(&self) -> Vec<SimEvent> {
        self.state.borrow().events.clone()
    }

    pub fn clear_events(&self) {
        self.state.borrow_mut().events.clear();
    }

    #[must_use]
    pub fn open_chip_ids(&self) -> Vec<ChipId> {
        self.state.borrow().open.keys().copied().collect()
    }

    #[must_use]
    pub fn fabric_config(&self) -> FabricConfig {
        self.state.borrow().fabric_config
    }

    /// Programs started on `chip_id` that have not been waited for.
    #[must_use]
    pub fn pending_programs(&self, chip_id: ChipId) -> Vec<String> {
        self.state
            .borrow()
            .pending
            .get(&chip_id)
            .cloned()
            .unwrap_or_default()
    }

    fn record(&self, event: SimEvent) {
        trace!("sim: {event}");
        self.state.borrow_mut().events.push(event);
    }
}

impl DeviceBackend for SimulatedCluster {
    fn num_available_devices(&self) -> usize {
        self.state.borrow().chip_ids.len()
    }

    fn initialize_fabric(&mut self, config: FabricConfig) -> FabricResult<()> {
        self.state.borrow_mut().fabric_config = config;
        self.record(SimEvent::FabricInitialized(config));
        Ok(())
    }

    fn open_device(&mut self, chip_id: ChipId) -> FabricResult<DeviceHandle> {
        let handle = {
            let mut state = self.state.borrow_mut();
            if state.fail_open_on == Some(chip_id) {
                return fabric_error!(Device, "injected failure opening chip {chip_id}");
            }
            if !state.chip_ids.contains(&chip_id) {
                return fabric_error!(Device, "no device with chip id {chip_id}");
            }
            if state.open.contains_key(&chip_id) {
                return fabric_error!(Device, "chip {chip_id} is already open");
            }
            let id = state.next_handle_id;
            state.next_handle_id += 1;
            state.open.insert(chip_id, id);
            DeviceHandle::new(chip_id, id)
        };
        self.record(SimEvent::Opened(chip_id));
        Ok(handle)
    }

    fn close_device(&mut self, handle: DeviceHandle) -> FabricResult<()> {
        let chip_id = handle.chip_id();
        {
            let mut state = self.state.borrow_mut();
            state.check_handle(&handle)?;
            state.open.remove(&chip_id);
            state.pending.remove(&chip_id);
        }
        self.record(SimEvent::Closed(chip_id));
        Ok(())
    }
}

impl ProgramDispatch for SimulatedCluster {
    fn launch_program(&mut self, device: &DeviceHandle, program: &Program) -> FabricResult<()> {
        {
            let mut state = self.state.borrow_mut();
            state.check_handle(device)?;
            state
                .pending
                .entry(device.chip_id())
                .or_default()
                .push(program.name.clone());
        }
        self.record(SimEvent::Launched {
            chip_id: device.chip_id(),
            program: program.name.clone(),
        });
        Ok(())
    }

    fn wait_program_done(
        &mut self,
        device: &DeviceHandle,
        program: &Program,
    ) -> FabricResult<()> {
        {
            let mut state = self.state.borrow_mut();
            state.check_handle(device)?;
            let pending = state.pending.entry(device.chip_id()).or_default();
            match pending.iter().position(|name| *name == program.name) {
                Some(index) => {
                    pending.remove(index);
                }
                None => {
                    return fabric_error!(
                        InvalidState,
                        "program '{}' was never launched on {device}",
                        program.name
                    );
                }
            }
        }
        self.record(SimEvent::Waited {
            chip_id: device.chip_id(),
            program: program.name.clone(),
        });
        Ok(())
    }

    fn enqueue_program(&mut self, device: &DeviceHandle, program: &Program) -> FabricResult<()> {
        {
            let mut state = self.state.borrow_mut();
            state.check_handle(device)?;
            state
                .pending
                .entry(device.chip_id())
                .or_default()
                .push(program.name.clone());
        }
        self.record(SimEvent::Enqueued {
            chip_id: device.chip_id(),
            program: program.name.clone(),
        });
        Ok(())
    }

    fn finish(&mut self, device: &DeviceHandle) -> FabricResult<()> {
        {
            let mut state = self.state.borrow_mut();
            state.check_handle(device)?;
            state.pending.remove(&device.chip_id());
        }
        self.record(SimEvent::Finished(device.chip_id()));
        Ok(())
    }
}

impl fmt::Debug for SimulatedCluster {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "SimulatedCluster({:?})", self.state.borrow().chip_ids)
    }
}
