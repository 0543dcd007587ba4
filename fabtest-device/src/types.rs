// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Environment variable that selects slow dispatch when set to any value.
pub const SLOW_DISPATCH_ENV: &str = "FABTEST_SLOW_DISPATCH_MODE";

/// Runtime configuration of the inter-chip fabric.
#[derive(clap::ValueEnum, Clone, Copy, Default, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FabricConfig {
    #[serde(rename = "disabled")]
    #[value(name = "disabled")]
    Disabled,

    #[default]
    #[serde(rename = "fabric-1d")]
    #[value(name = "fabric-1d")]
    Fabric1D,

    #[serde(rename = "fabric-1d-ring")]
    #[value(name = "fabric-1d-ring")]
    Fabric1DRing,

    #[serde(rename = "fabric-2d")]
    #[value(name = "fabric-2d")]
    Fabric2D,

    #[serde(rename = "fabric-2d-torus")]
    #[value(name = "fabric-2d-torus")]
    Fabric2DTorus,
}

impl fmt::Display for FabricConfig {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// How programs reach the devices.
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DispatchMode {
    /// Programs are launched directly and waited for individually
    Slow,

    #[default]
    /// Programs are enqueued on a command queue and completed with a finish
    Fast,
}

impl DispatchMode {
    /// Slow dispatch if [SLOW_DISPATCH_ENV] is set, fast otherwise.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_env_value(std::env::var_os(SLOW_DISPATCH_ENV).is_some())
    }

    #[must_use]
    pub fn from_env_value(slow_dispatch_set: bool) -> Self {
        if slow_dispatch_set {
            DispatchMode::Slow
        } else {
            DispatchMode::Fast
        }
    }
}

impl fmt::Display for DispatchMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Logical worker core on a chip.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CoreCoord {
    pub x: u32,
    pub y: u32,
}

impl CoreCoord {
    #[must_use]
    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for CoreCoord {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// A kernel placed on one core along with its runtime arguments.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KernelConfig {
    pub kernel_src: String,
    pub core: CoreCoord,
    pub runtime_args: Vec<u32>,
}

/// Everything dispatched to a single device in one go.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Program {
    pub name: String,
    pub kernels: Vec<KernelConfig>,
}

impl Program {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kernels: Vec::new(),
        }
    }

    pub fn add_kernel(&mut self, kernel: KernelConfig) {
        self.kernels.push(kernel);
    }
}
