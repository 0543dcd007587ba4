// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! The source of truth for which chips form which mesh.

use std::path::Path;

use crate::error::{FabricError, FabricResult};
use crate::mesh::MeshShape;
use crate::types::{ClusterConfig, ClusterType, MeshSection};
use crate::{ChipId, MeshId, fabric_error};

/// Read-only view of the fabric control plane.
///
/// Only queried while a [MeshTopology](crate::MeshTopology) is discovered.
pub trait ControlPlane {
    /// User-visible mesh ids.
    fn mesh_ids(&self) -> Vec<MeshId>;

    /// Physical `(rows, cols)` shape of a mesh.
    fn shape(&self, mesh_id: MeshId) -> FabricResult<MeshShape>;

    /// The physical chip occupying a row-major logical slot of a mesh.
    fn physical_id_at(&self, mesh_id: MeshId, logical_index: usize) -> FabricResult<ChipId>;

    fn cluster_type(&self) -> ClusterType {
        ClusterType::Standard
    }
}

/// A [ControlPlane] backed by a cluster description.
#[derive(Debug)]
pub struct StaticControlPlane {
    config: ClusterConfig,
}

impl StaticControlPlane {
    #[must_use]
    pub fn new(config: ClusterConfig) -> Self {
        Self { config }
    }

    pub fn from_file(cluster_path: &Path) -> FabricResult<Self> {
        let s = std::fs::read_to_string(cluster_path).map_err(|e| {
            FabricError::Config(format!("Unable to read {}: {e}", cluster_path.display()))
        })?;
        Self::from_string(&s)
    }

    /// Parse a YAML cluster description.
    ///
    /// Each mesh must list exactly `rows * cols` chip ids.
    pub fn from_string(cluster_config: &str) -> FabricResult<Self> {
        let config: ClusterConfig = serde_yaml::from_str(cluster_config)
            .map_err(|e| FabricError::Config(format!("serde_yaml::from_str failed: {e}")))?;

        let mut errors = Vec::new();
        for mesh in &config.meshes {
            let Some(expected) = mesh.rows.checked_mul(mesh.cols) else {
                errors.push(format!(
                    "mesh {} is {}x{}, too large to address",
                    mesh.mesh_id, mesh.rows, mesh.cols
                ));
                continue;
            };
            if mesh.chip_ids.len() != expected {
                errors.push(format!(
                    "mesh {} is {}x{} but lists {} chip ids",
                    mesh.mesh_id,
                    mesh.rows,
                    mesh.cols,
                    mesh.chip_ids.len()
                ));
            }
        }
        if !errors.is_empty() {
            return fabric_error!(InconsistentTopology, "{}", errors.join("\n"));
        }

        Ok(Self::new(config))
    }

    #[must_use]
    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Total number of chips described.
    #[must_use]
    pub fn num_chips(&self) -> usize {
        self.config.meshes.iter().map(|m| m.chip_ids.len()).sum()
    }

    fn mesh_section(&self, mesh_id: MeshId) -> FabricResult<&MeshSection> {
        self.config
            .meshes
            .iter()
            .find(|m| m.mesh_id == mesh_id)
            .ok_or(FabricError::UnknownMesh(mesh_id))
    }
}

impl ControlPlane for StaticControlPlane {
    fn mesh_ids(&self) -> Vec<MeshId> {
        self.config.meshes.iter().map(|m| m.mesh_id).collect()
    }

    fn shape(&self, mesh_id: MeshId) -> FabricResult<MeshShape> {
        let mesh = self.mesh_section(mesh_id)?;
        Ok(MeshShape::new(mesh.rows, mesh.cols))
    }

    fn physical_id_at(&self, mesh_id: MeshId, logical_index: usize) -> FabricResult<ChipId> {
        let mesh = self.mesh_section(mesh_id)?;
        mesh.chip_ids
            .get(logical_index)
            .copied()
            .ok_or(FabricError::UnknownLogicalChip {
                mesh_id,
                logical_index,
            })
    }

    fn cluster_type(&self) -> ClusterType {
        self.config.cluster_type
    }
}
