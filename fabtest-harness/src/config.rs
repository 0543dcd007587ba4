// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Harness configuration gathered from every source.
//!
//! Sources are layered, each overriding the one before:
//!
//! ```txt
//!  built-in defaults
//!  TOML file named by `conf_file` (command line, then FABTEST_CONF_FILE)
//!  FABTEST_* environment variables
//!  command-line arguments that were actually given
//! ```

use std::path::{Path, PathBuf};

use clap::Parser;
use fabtest_device::{DispatchMode, FabricConfig};
use fabtest_topology::types::ClusterType;
use fabtest_topology::{FabricError, FabricResult, RoutingPolicy, fabric_error};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use log::LevelFilter;
use serde::{Deserialize, Serialize};

use crate::ErrorPolicy;

pub const ENV_PREFIX: &str = "FABTEST_";

#[derive(Parser, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[command(about = "Run fabric traffic tests across the devices of a cluster")]
pub struct HarnessConfig {
    /// Cluster description file
    #[arg(long)]
    pub cluster: Option<PathBuf>,

    /// Test file
    #[arg(long)]
    pub tests: Option<PathBuf>,

    /// Fabric config used unless the test file sets one.
    #[arg(long, value_enum)]
    pub fabric_config: Option<FabricConfig>,

    /// Routing policy used unless the test file sets one.
    #[arg(long, value_enum)]
    pub routing_policy: Option<RoutingPolicy>,

    /// Overrides the cluster type given by the cluster description.
    #[arg(long, value_enum)]
    pub cluster_type: Option<ClusterType>,

    /// Overrides the first chip id implied by the cluster type.
    #[arg(long)]
    pub chip_id_offset: Option<u32>,

    /// Launch and wait for programs individually instead of through a
    /// command queue.
    #[arg(long)]
    pub slow_dispatch: Option<bool>,

    /// Record failing traffic and carry on rather than stopping at the
    /// first error.
    #[arg(long)]
    pub continue_on_error: Option<bool>,

    /// Level of log message to display.
    #[arg(long)]
    pub log_level: Option<LevelFilter>,

    /// Show a progress bar of completed tests.
    #[arg(long)]
    pub progress: Option<bool>,

    /// Seed for random traffic that does not set its own.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Path to a configuration file
    ///
    /// This configuration file must contain TOML, and set values for
    /// fields of this struct.
    #[arg(long)]
    pub conf_file: Option<PathBuf>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            cluster: Some(PathBuf::from("cluster.yaml")),
            tests: Some(PathBuf::from("tests.yaml")),
            fabric_config: Some(FabricConfig::default()),
            routing_policy: Some(RoutingPolicy::default()),
            cluster_type: None,
            chip_id_offset: None,
            slow_dispatch: Some(false),
            continue_on_error: Some(false),
            log_level: Some(LevelFilter::Info),
            progress: Some(false),
            seed: Some(0),
            conf_file: None,
        }
    }
}

impl HarnessConfig {
    /// Parse the command line and layer it over every other source.
    pub fn parse_all_sources() -> FabricResult<Self> {
        Self::from_sources(Self::parse())
    }

    /// Layer `cli` over the defaults, the configuration file and the
    /// environment.
    pub fn from_sources(cli: HarnessConfig) -> FabricResult<Self> {
        let conf_file = match &cli.conf_file {
            Some(conf_file) => Some(conf_file.clone()),
            None => Self::figment_env_var_merge(Figment::new())
                .extract_inner::<PathBuf>("conf_file")
                .ok(),
        };

        let mut figment = Self::figment_with_defaults();
        if let Some(conf_file) = &conf_file {
            figment = Self::figment_conf_file_merge(figment, conf_file)?;
        }
        figment = Self::figment_env_var_merge(figment);

        let mut config: HarnessConfig = figment
            .extract()
            .map_err(|e| FabricError::Config(format!("Unable to load configuration: {e}")))?;
        config.conf_file = conf_file;
        Ok(Self::clap_merge(config, cli))
    }

    fn figment_with_defaults() -> Figment {
        Figment::new().merge(Serialized::defaults(HarnessConfig::default()))
    }

    fn figment_conf_file_merge(figment: Figment, conf_file: &Path) -> FabricResult<Figment> {
        if conf_file.is_dir() {
            return fabric_error!(Config, "{} is not a file path", conf_file.display());
        }
        if !conf_file.exists() {
            return fabric_error!(Config, "{} not found", conf_file.display());
        }
        Ok(figment.merge(Toml::file(conf_file)))
    }

    fn figment_env_var_merge(figment: Figment) -> Figment {
        figment.merge(Env::prefixed(ENV_PREFIX))
    }

    fn clap_merge(mut config: HarnessConfig, cli: HarnessConfig) -> HarnessConfig {
        macro_rules! merge {
            ($($field:ident),*) => {
                $(
                    if cli.$field.is_some() {
                        config.$field = cli.$field;
                    }
                )*
            };
        }
        merge!(
            cluster,
            tests,
            fabric_config,
            routing_policy,
            cluster_type,
            chip_id_offset,
            slow_dispatch,
            continue_on_error,
            log_level,
            progress,
            seed,
            conf_file
        );
        config
    }

    #[must_use]
    pub fn dispatch_mode(&self) -> DispatchMode {
        if self.slow_dispatch.unwrap_or(false) {
            DispatchMode::Slow
        } else {
            DispatchMode::from_env()
        }
    }

    #[must_use]
    pub fn error_policy(&self) -> ErrorPolicy {
        if self.continue_on_error.unwrap_or(false) {
            ErrorPolicy::Continue
        } else {
            ErrorPolicy::Abort
        }
    }

    #[must_use]
    pub fn log_level(&self) -> LevelFilter {
        self.log_level.unwrap_or(LevelFilter::Info)
    }

    pub fn cluster_path(&self) -> FabricResult<&Path> {
        self.cluster
            .as_deref()
            .ok_or_else(|| FabricError::Config("No cluster file configured".to_string()))
    }

    pub fn tests_path(&self) -> FabricResult<&Path> {
        self.tests
            .as_deref()
            .ok_or_else(|| FabricError::Config("No test file configured".to_string()))
    }
}
