// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

use simplelog::{ConfigBuilder, LevelFilter, TestLogger};

use crate::types::{ClusterConfig, ClusterType, MeshSection};
use crate::{ChipId, MeshId, MeshTopology, StaticControlPlane};

/// Route log output through the test harness capture.
///
/// Safe to call from every test; only the first call installs the logger.
pub fn start_test(full_filepath: &str) {
    let config = ConfigBuilder::new()
        .set_time_level(LevelFilter::Off)
        .set_location_level(LevelFilter::Off)
        .build();
    if TestLogger::init(LevelFilter::Debug, config).is_ok() {
        log::debug!("logging started for {full_filepath}");
    }
}

/// A control plane with one mesh per `(rows, cols)` entry.
///
/// Chip ids are allocated row-major and consecutively across meshes,
/// starting at `first_chip_id`.
#[must_use]
pub fn mesh_control_plane(shapes: &[(usize, usize)], first_chip_id: u32) -> StaticControlPlane {
    let mut next_chip_id = first_chip_id;
    let meshes = shapes
        .iter()
        .enumerate()
        .map(|(i, (rows, cols))| {
            let chip_ids = (0..rows * cols)
                .map(|_| {
                    let chip_id = ChipId(next_chip_id);
                    next_chip_id += 1;
                    chip_id
                })
                .collect();
            MeshSection {
                mesh_id: MeshId(i as u32),
                rows: *rows,
                cols: *cols,
                chip_ids,
            }
        })
        .collect();

    StaticControlPlane::new(ClusterConfig {
        cluster_type: ClusterType::Standard,
        meshes,
    })
}

/// Discover a topology of meshes built by [mesh_control_plane].
///
/// # Panics
///
/// If discovery fails, which cannot happen for non-empty shapes.
#[must_use]
pub fn mesh_topology(shapes: &[(usize, usize)], first_chip_id: u32) -> MeshTopology {
    MeshTopology::discover(&mesh_control_plane(shapes, first_chip_id)).unwrap()
}
