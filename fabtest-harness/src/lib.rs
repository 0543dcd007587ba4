// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Run fabric traffic tests on the devices of a cluster.
//!
//! A [TestContext] walks through a fixed sequence of states. Calling an
//! operation from any other state fails with
//! [InvalidState](fabtest_topology::FabricError::InvalidState):
//!
//! ```txt
//!  Uninitialized --init--> Initialized --open_devices--> DevicesOpen
//!                                                         |      ^
//!                                          handle_traffic |      |
//!                                                         v      |
//!                                                        Resolving
//!
//!  any state --close_devices--> Closed
//! ```
//!
//! By default a rejected traffic config closes the devices straight away.
//! With [ErrorPolicy::Continue] the context stays in `DevicesOpen` and the
//! caller decides what to do next.
//!
//! # Example
//!
//! ```rust
//! use fabtest_device::sim::SimulatedCluster;
//! use fabtest_device::{DeviceManager, DispatchMode, FabricConfig};
//! use fabtest_harness::TestContext;
//! use fabtest_topology::test_helpers::mesh_control_plane;
//! use fabtest_topology::{ChipId, RoutingPolicy};
//! use fabtest_traffic::{
//!     ChipSendType, LinearAllocator, NocSendType, TrafficConfig, TrafficDataConfig,
//! };
//!
//! let cluster = SimulatedCluster::with_devices(4, 0);
//! let manager = DeviceManager::new(cluster.clone(), DispatchMode::Fast, 0);
//! let allocator = LinearAllocator::new(0x1000, 0x1000, 16).unwrap();
//! let mut context = TestContext::new(manager, RoutingPolicy::ColumnFirst, Box::new(allocator));
//!
//! context.init(&mesh_control_plane(&[(2, 2)], 0)).unwrap();
//! context.open_devices(FabricConfig::Fabric2D).unwrap();
//!
//! let data_config = TrafficDataConfig {
//!     chip_send_type: ChipSendType::Unicast,
//!     noc_send_type: NocSendType::UnicastWrite,
//!     num_packets: 4,
//!     payload_size_bytes: 64,
//! };
//! let traffic = TrafficConfig::new(ChipId(0), data_config, Some(vec![ChipId(3)]), None).unwrap();
//! let resolved = context.handle_traffic(&traffic).unwrap();
//! assert_eq!(resolved.senders.len(), 1);
//!
//! let mut dispatch = cluster.clone();
//! assert_eq!(context.run_programs(&mut dispatch).unwrap(), 2);
//! context.close_devices().unwrap();
//! assert!(cluster.open_chip_ids().is_empty());
//! ```

use std::collections::BTreeMap;
use std::fmt;

use fabtest_device::{DeviceBackend, DeviceManager, FabricConfig, ProgramDispatch};
use fabtest_topology::{
    ChipId, ControlPlane, FabricError, FabricResult, MeshTopology, RoutingPolicy, fabric_error,
};
use fabtest_traffic::{
    LinearAllocator, MemoryAllocator, ResolvedTraffic, TrafficConfig, TrafficGen, TrafficResolver,
};
use indicatif::ProgressBar;
use log::{debug, error, info, warn};

pub mod config;
pub mod test_device;
pub mod types;

use crate::test_device::TestDevice;
use crate::types::{TestCaseSection, TestFile};

const DEFAULT_TEST_NAME: &str = "traffic";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ContextState {
    #[default]
    Uninitialized,
    Initialized,
    DevicesOpen,
    Resolving,
    Closed,
}

impl fmt::Display for ContextState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// What a test file run does when something fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Close the devices and return the first error
    #[default]
    Abort,

    /// Record the failure against its test and carry on
    Continue,
}

/// Result of running one test of a test file.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct TestOutcome {
    pub name: String,
    pub num_traffic: usize,
    pub num_senders: usize,
    pub num_receivers: usize,
    pub num_programs: usize,
    pub failures: Vec<String>,
}

impl TestOutcome {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

impl fmt::Display for TestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}: {} traffic config(s), {} sender(s), {} receiver(s), {} program(s)",
            self.name, self.num_traffic, self.num_senders, self.num_receivers, self.num_programs
        )?;
        if !self.is_success() {
            write!(f, ", {} failure(s)", self.failures.len())?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct TestReport {
    pub tests: Vec<TestOutcome>,
}

impl TestReport {
    #[must_use]
    pub fn num_failures(&self) -> usize {
        self.tests.iter().map(|test| test.failures.len()).sum()
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.num_failures() == 0
    }

    #[must_use]
    pub fn test(&self, name: &str) -> Option<&TestOutcome> {
        self.tests.iter().find(|test| test.name == name)
    }
}

impl fmt::Display for TestReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for test in &self.tests {
            writeln!(f, "{test}")?;
            for failure in &test.failures {
                writeln!(f, "  {failure}")?;
            }
        }
        Ok(())
    }
}

pub struct TestContext<B: DeviceBackend> {
    state: ContextState,
    manager: DeviceManager<B>,
    topology: Option<MeshTopology>,
    resolver: TrafficResolver,
    allocator: Box<dyn MemoryAllocator>,
    test_devices: BTreeMap<ChipId, TestDevice>,
    fabric_config: FabricConfig,
    error_policy: ErrorPolicy,
    seed: u64,
    current_test: String,
    progress: Option<ProgressBar>,
}

impl<B: DeviceBackend> TestContext<B> {
    #[must_use]
    pub fn new(
        manager: DeviceManager<B>,
        policy: RoutingPolicy,
        allocator: Box<dyn MemoryAllocator>,
    ) -> Self {
        Self {
            state: ContextState::Uninitialized,
            manager,
            topology: None,
            resolver: TrafficResolver::new(policy),
            allocator,
            test_devices: BTreeMap::new(),
            fabric_config: FabricConfig::default(),
            error_policy: ErrorPolicy::default(),
            seed: 0,
            current_test: DEFAULT_TEST_NAME.to_string(),
            progress: None,
        }
    }

    #[must_use]
    pub fn with_error_policy(mut self, error_policy: ErrorPolicy) -> Self {
        self.error_policy = error_policy;
        self
    }

    /// Seed for random traffic sections that do not set their own.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Fabric config for test files that do not set their own.
    #[must_use]
    pub fn with_fabric_config(mut self, fabric_config: FabricConfig) -> Self {
        self.fabric_config = fabric_config;
        self
    }

    /// Advance `progress` by one for every completed test.
    #[must_use]
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    #[must_use]
    pub fn state(&self) -> ContextState {
        self.state
    }

    #[must_use]
    pub fn manager(&self) -> &DeviceManager<B> {
        &self.manager
    }

    pub fn topology(&self) -> FabricResult<&MeshTopology> {
        self.topology
            .as_ref()
            .ok_or_else(|| FabricError::InvalidState("topology not discovered yet".to_string()))
    }

    #[must_use]
    pub fn test_device(&self, chip_id: ChipId) -> Option<&TestDevice> {
        self.test_devices.get(&chip_id)
    }

    fn expect_state(&self, expected: ContextState, operation: &str) -> FabricResult<()> {
        if self.state != expected {
            return fabric_error!(
                InvalidState,
                "{operation} requires state {expected}, context is {}",
                self.state
            );
        }
        Ok(())
    }

    /// Discover the topology and the chip ids of every available device.
    pub fn init(&mut self, control_plane: &dyn ControlPlane) -> FabricResult<()> {
        self.expect_state(ContextState::Uninitialized, "init")?;

        let topology = MeshTopology::discover(control_plane)?;
        for chip_id in self.manager.discover_chip_ids()? {
            if !topology.contains(*chip_id) {
                warn!("Chip {chip_id} is not part of any mesh and will not carry traffic");
            }
        }
        topology.log_meshes();

        self.topology = Some(topology);
        self.state = ContextState::Initialized;
        Ok(())
    }

    /// Open every device and give each one an empty [TestDevice].
    pub fn open_devices(&mut self, fabric_config: FabricConfig) -> FabricResult<()> {
        self.expect_state(ContextState::Initialized, "open_devices")?;

        self.manager.open_all(fabric_config)?;
        self.test_devices = self
            .manager
            .open_chip_ids()
            .map(|chip_id| (chip_id, TestDevice::new(chip_id)))
            .collect();
        self.state = ContextState::DevicesOpen;
        Ok(())
    }

    /// Resolve `config` and attach its descriptors to the devices that own
    /// them.
    ///
    /// Nothing is attached unless every descriptor has a device. Under
    /// [ErrorPolicy::Abort] a rejected config also closes the devices.
    pub fn handle_traffic(&mut self, config: &TrafficConfig) -> FabricResult<ResolvedTraffic> {
        self.expect_state(ContextState::DevicesOpen, "handle_traffic")?;

        self.state = ContextState::Resolving;
        let result = self.resolve_and_attach(config);
        self.state = ContextState::DevicesOpen;

        if let Err(e) = &result
            && self.error_policy == ErrorPolicy::Abort
        {
            error!(
                "Traffic from chip {} rejected, closing devices: {e}",
                config.src_chip_id
            );
            if let Err(close_err) = self.close_devices() {
                error!("Failed to close devices after error: {close_err}");
            }
        }
        result
    }

    fn resolve_and_attach(&mut self, config: &TrafficConfig) -> FabricResult<ResolvedTraffic> {
        let topology = self
            .topology
            .as_ref()
            .ok_or_else(|| FabricError::InvalidState("topology not discovered yet".to_string()))?;
        let resolved =
            self.resolver
                .resolve(config, topology, &self.manager, self.allocator.as_mut())?;

        let owners = resolved
            .senders
            .iter()
            .map(|sender| sender.src_chip_id)
            .chain(resolved.receivers.iter().map(|receiver| receiver.chip_id));
        for chip_id in owners {
            if !self.test_devices.contains_key(&chip_id) {
                return Err(FabricError::UnknownChip(chip_id));
            }
        }

        for sender in &resolved.senders {
            if let Some(device) = self.test_devices.get_mut(&sender.src_chip_id) {
                device.add_sender(sender.clone());
            }
        }
        for receiver in &resolved.receivers {
            if let Some(device) = self.test_devices.get_mut(&receiver.chip_id) {
                device.add_receiver(receiver.clone());
            }
        }
        Ok(resolved)
    }

    /// Run one program on every device with attached descriptors.
    ///
    /// Every program is started before any is waited for. Descriptors and
    /// receive buffers are released afterwards, whether or not the programs
    /// succeeded. Returns the number of programs run.
    pub fn run_programs(&mut self, dispatch: &mut dyn ProgramDispatch) -> FabricResult<usize> {
        self.expect_state(ContextState::DevicesOpen, "run_programs")?;

        let programs: Vec<_> = self
            .test_devices
            .values()
            .filter(|device| device.has_work())
            .map(|device| (device.chip_id(), device.build_program(&self.current_test)))
            .collect();
        info!("Running {} program(s) for {}", programs.len(), self.current_test);

        let mut result = Ok(());
        let mut started = Vec::new();
        for (chip_id, program) in &programs {
            match self
                .manager
                .run_program_non_blocking(dispatch, *chip_id, program)
            {
                Ok(()) => started.push((*chip_id, program)),
                Err(e) => {
                    error!("Failed to start program on chip {chip_id}: {e}");
                    result = Err(e);
                    break;
                }
            }
        }

        // Programs already started are always waited for
        for (chip_id, program) in started {
            if let Err(e) = self
                .manager
                .wait_for_program_done(dispatch, chip_id, program)
            {
                error!("Program on chip {chip_id} failed: {e}");
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }

        for device in self.test_devices.values_mut() {
            device.clear();
        }
        self.allocator.reset();
        result.map(|()| programs.len())
    }

    /// Release every device. Calling this again does nothing.
    pub fn close_devices(&mut self) -> FabricResult<()> {
        if self.state == ContextState::Closed {
            return Ok(());
        }

        let result = self.manager.close_all();
        self.test_devices.clear();
        self.allocator.reset();
        self.state = ContextState::Closed;
        result
    }

    /// Open the devices, run every test of `test_file` and close the
    /// devices again.
    ///
    /// With [ErrorPolicy::Abort] the first error closes the devices and is
    /// returned. With [ErrorPolicy::Continue] failures are recorded in the
    /// report; only failing to open or close the devices is returned as an
    /// error.
    pub fn run_test_file(
        &mut self,
        test_file: &TestFile,
        dispatch: &mut dyn ProgramDispatch,
    ) -> FabricResult<TestReport> {
        self.expect_state(ContextState::Initialized, "run_test_file")?;

        match self.run_tests(test_file, dispatch) {
            Ok(report) => {
                self.close_devices()?;
                info!(
                    "Ran {} test(s) with {} failure(s)",
                    report.tests.len(),
                    report.num_failures()
                );
                Ok(report)
            }
            Err(e) => {
                error!("Aborting test run: {e}");
                // Report the test failure rather than any close failure
                if let Err(close_err) = self.close_devices() {
                    error!("Failed to close devices after error: {close_err}");
                }
                Err(e)
            }
        }
    }

    fn run_tests(
        &mut self,
        test_file: &TestFile,
        dispatch: &mut dyn ProgramDispatch,
    ) -> FabricResult<TestReport> {
        if let Some(policy) = test_file.routing_policy {
            self.resolver.set_policy(policy);
        }
        if let Some(window) = &test_file.memory {
            self.allocator = Box::new(LinearAllocator::from_window(window)?);
        }
        let fabric_config = test_file.fabric_config.unwrap_or(self.fabric_config);
        self.open_devices(fabric_config)?;

        let mut report = TestReport::default();
        for test in &test_file.tests {
            let outcome = self.run_test(test, dispatch)?;
            info!("{outcome}");
            report.tests.push(outcome);
            if let Some(progress) = &self.progress {
                progress.inc(1);
            }
        }
        Ok(report)
    }

    fn run_test(
        &mut self,
        test: &TestCaseSection,
        dispatch: &mut dyn ProgramDispatch,
    ) -> FabricResult<TestOutcome> {
        info!("Running test {}", test.name);
        self.current_test.clone_from(&test.name);
        let mut outcome = TestOutcome::new(&test.name);

        let configs = self.traffic_configs(test)?;
        for config in configs {
            outcome.num_traffic += 1;
            match config.and_then(|config| self.handle_traffic(&config)) {
                Ok(resolved) => {
                    outcome.num_senders += resolved.senders.len();
                    outcome.num_receivers += resolved.receivers.len();
                }
                Err(e) => self.record_failure(&mut outcome, e)?,
            }
        }

        match self.run_programs(dispatch) {
            Ok(num_programs) => outcome.num_programs = num_programs,
            Err(e) => self.record_failure(&mut outcome, e)?,
        }
        self.current_test = DEFAULT_TEST_NAME.to_string();
        Ok(outcome)
    }

    /// Every traffic config of `test`, explicit ones first. A config that
    /// cannot be built is kept as its error so it can be recorded.
    fn traffic_configs(
        &self,
        test: &TestCaseSection,
    ) -> FabricResult<Vec<FabricResult<TrafficConfig>>> {
        let topology = self.topology()?;
        let mut configs: Vec<_> = test
            .traffic
            .iter()
            .map(|section| section.to_config(topology))
            .collect();

        if let Some(random) = &test.random {
            let seed = random.seed.unwrap_or(self.seed);
            let available: Vec<ChipId> = self.manager.open_chip_ids().collect();
            debug!(
                "Generating {} traffic for {} with seed {seed}",
                random.pattern, test.name
            );
            let mut traffic_gen = TrafficGen::new(topology, &available, seed);
            match traffic_gen.generate(random) {
                Ok(generated) => configs.extend(generated.into_iter().map(Ok)),
                Err(e) => configs.push(Err(e)),
            }
        }
        Ok(configs)
    }

    fn record_failure(&self, outcome: &mut TestOutcome, e: FabricError) -> FabricResult<()> {
        match self.error_policy {
            ErrorPolicy::Abort => Err(e),
            ErrorPolicy::Continue => {
                warn!("Test {} failed: {e}", outcome.name);
                outcome.failures.push(e.to_string());
                Ok(())
            }
        }
    }
}
