// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

use fabtest_topology::FabricResult;

use crate::DeviceHandle;
use crate::types::Program;

/// Program dispatch for both dispatch modes.
///
/// Slow dispatch pairs [launch_program](ProgramDispatch::launch_program) with
/// [wait_program_done](ProgramDispatch::wait_program_done). Fast dispatch
/// pairs [enqueue_program](ProgramDispatch::enqueue_program) with
/// [finish](ProgramDispatch::finish). Neither launch nor enqueue waits for
/// the program to complete.
pub trait ProgramDispatch {
    fn launch_program(&mut self, device: &DeviceHandle, program: &Program) -> FabricResult<()>;

    fn wait_program_done(&mut self, device: &DeviceHandle, program: &Program)
    -> FabricResult<()>;

    fn enqueue_program(&mut self, device: &DeviceHandle, program: &Program) -> FabricResult<()>;

    /// Block until everything enqueued on `device` has completed.
    fn finish(&mut self, device: &DeviceHandle) -> FabricResult<()>;
}
