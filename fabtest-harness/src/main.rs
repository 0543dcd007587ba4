// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Command-line front-end that runs a test file against a simulated cluster
//!
//! For example, run using:
//!   cargo run --bin fabtest -- --cluster configs/cluster.yaml
//! --tests configs/tests.yaml --log-level debug

use anyhow::{Result, bail};
use fabtest_device::sim::SimulatedCluster;
use fabtest_device::{DeviceManager, chip_id_offset};
use fabtest_harness::TestContext;
use fabtest_harness::config::HarnessConfig;
use fabtest_harness::types::TestFile;
use fabtest_topology::{ControlPlane, StaticControlPlane};
use fabtest_traffic::LinearAllocator;
use fabtest_traffic::types::MemoryWindowSection;
use indicatif::ProgressBar;
use simplelog::{ConfigBuilder, LevelFilter, SimpleLogger};

fn setup_logging(config: &HarnessConfig) -> Result<()> {
    let log_config = ConfigBuilder::new()
        .set_time_level(LevelFilter::Off)
        .set_location_level(LevelFilter::Off)
        .set_thread_level(LevelFilter::Off)
        .set_target_level(LevelFilter::Off)
        .build();
    SimpleLogger::init(config.log_level(), log_config)?;
    Ok(())
}

fn main() -> Result<()> {
    let config = HarnessConfig::parse_all_sources()?;
    setup_logging(&config)?;

    let control_plane = StaticControlPlane::from_file(config.cluster_path()?)?;
    println!(
        "Loaded cluster with {} mesh(es), {} chip(s)",
        control_plane.mesh_ids().len(),
        control_plane.num_chips()
    );

    let test_file = TestFile::from_file(config.tests_path()?)?;
    println!("Loaded {} test(s).", test_file.num_tests());

    let cluster_type = config
        .cluster_type
        .unwrap_or_else(|| control_plane.cluster_type());
    let offset = chip_id_offset(cluster_type, config.chip_id_offset);

    // Every chip of the cluster description is backed by a simulated device
    let mut chip_ids: Vec<_> = control_plane
        .config()
        .meshes
        .iter()
        .flat_map(|mesh| mesh.chip_ids.iter().copied())
        .collect();
    chip_ids.sort();
    let cluster = SimulatedCluster::new(chip_ids);

    let manager = DeviceManager::new(cluster.clone(), config.dispatch_mode(), offset);
    let allocator = LinearAllocator::from_window(&MemoryWindowSection::default())?;
    let mut context = TestContext::new(
        manager,
        config.routing_policy.unwrap_or_default(),
        Box::new(allocator),
    )
    .with_error_policy(config.error_policy())
    .with_seed(config.seed.unwrap_or_default())
    .with_fabric_config(config.fabric_config.unwrap_or_default());

    let mut progress_bar = None;
    if config.progress.unwrap_or(false) {
        let bar = ProgressBar::new(test_file.num_tests() as u64);
        context = context.with_progress(bar.clone());
        progress_bar = Some(bar);
    }

    context.init(&control_plane)?;
    let mut dispatch = cluster;
    let report = context.run_test_file(&test_file, &mut dispatch)?;

    if let Some(progress_bar) = progress_bar {
        progress_bar.finish();
    }

    print!("{report}");
    if !report.is_success() {
        bail!("{} traffic failure(s)", report.num_failures());
    }

    Ok(())
}
