// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Types that map directly to the test file contents

use std::collections::HashSet;
use std::path::Path;

use fabtest_device::FabricConfig;
use fabtest_topology::{FabricError, FabricResult, RoutingPolicy, fabric_error};
use fabtest_traffic::types::{MemoryWindowSection, RandomSection, TrafficSection};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct TestFile {
    /// Overrides the harness fabric config for every test in the file.
    pub fabric_config: Option<FabricConfig>,

    /// Overrides the harness routing policy for every test in the file.
    pub routing_policy: Option<RoutingPolicy>,

    /// Window of chip memory that receive buffers are placed in.
    pub memory: Option<MemoryWindowSection>,

    pub tests: Vec<TestCaseSection>,
}

impl TestFile {
    pub fn from_file(tests_path: &Path) -> FabricResult<Self> {
        let s = std::fs::read_to_string(tests_path).map_err(|e| {
            FabricError::Config(format!("Unable to read {}: {e}", tests_path.display()))
        })?;
        Self::from_string(&s)
    }

    pub fn from_string(tests_str: &str) -> FabricResult<Self> {
        let test_file: Self = serde_yaml::from_str(tests_str)
            .map_err(|e| FabricError::Config(format!("serde_yaml::from_str failed: {e}")))?;
        test_file.validate()?;
        Ok(test_file)
    }

    pub fn validate(&self) -> FabricResult<()> {
        let mut errors = Vec::new();

        let mut names = HashSet::new();
        for test in &self.tests {
            if !names.insert(test.name.as_str()) {
                errors.push(format!("Duplicate test name {}", test.name));
            }
            if test.traffic.is_empty() && test.random.is_none() {
                errors.push(format!("Test {} declares no traffic", test.name));
            }
        }

        if !errors.is_empty() {
            return fabric_error!(Config, "Failed to validate tests:\n{}", errors.join("\n"));
        }
        Ok(())
    }

    #[must_use]
    pub fn num_tests(&self) -> usize {
        self.tests.len()
    }
}

/// One named test: explicit traffic, random traffic or both.
#[derive(Debug, Deserialize)]
pub struct TestCaseSection {
    pub name: String,

    #[serde(default)]
    pub traffic: Vec<TrafficSection>,

    pub random: Option<RandomSection>,
}
