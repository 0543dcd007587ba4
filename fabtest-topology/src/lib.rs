// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Discover how chips are arranged into 2-D meshes and answer placement
//! queries about them.
//!
//! The [MeshTopology] is built once from a [ControlPlane] and never changes
//! afterwards:
//!
//! ```rust
//! use fabtest_topology::test_helpers::mesh_control_plane;
//! use fabtest_topology::{ChipId, MeshId, MeshTopology};
//!
//! let control_plane = mesh_control_plane(&[(2, 2)], 0);
//! let topology = MeshTopology::discover(&control_plane).unwrap();
//! assert_eq!(topology.coordinates_of(MeshId(0), ChipId(3)).unwrap(), (1, 1));
//! assert_eq!(topology.peers_same_row(ChipId(2)).unwrap(), vec![ChipId(3)]);
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use log::info;
use serde::{Deserialize, Serialize};

pub mod control_plane;
pub mod error;
pub mod mesh;
pub mod routing;
pub mod test_helpers;
pub mod types;

pub use crate::control_plane::{ControlPlane, StaticControlPlane};
pub use crate::error::{FabricError, FabricResult};
pub use crate::mesh::{Mesh, MeshShape};
pub use crate::routing::{HopMap, RoutingDirection, RoutingPolicy};

/// Physical chip id, unique across the whole cluster.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChipId(pub u32);

impl fmt::Display for ChipId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MeshId(pub u32);

impl fmt::Display for MeshId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// All meshes of a cluster plus the reverse lookup from chip to mesh.
#[derive(Debug, Clone)]
pub struct MeshTopology {
    meshes: BTreeMap<MeshId, Mesh>,
    mesh_by_chip: HashMap<ChipId, MeshId>,
}

impl MeshTopology {
    /// Build every mesh reported by the control plane.
    ///
    /// Fails if no meshes are reported, a mesh id is repeated or a chip
    /// belongs to more than one mesh.
    pub fn discover(control_plane: &dyn ControlPlane) -> FabricResult<Self> {
        let mesh_ids = control_plane.mesh_ids();
        if mesh_ids.is_empty() {
            return fabric_error!(InconsistentTopology, "control plane reports no meshes");
        }

        let mut meshes = BTreeMap::new();
        let mut mesh_by_chip = HashMap::new();
        for mesh_id in mesh_ids {
            if meshes.contains_key(&mesh_id) {
                return fabric_error!(InconsistentTopology, "mesh {mesh_id} reported twice");
            }

            let mesh = Mesh::from_control_plane(control_plane, mesh_id)?;
            for chip_id in mesh.chip_ids() {
                if let Some(other) = mesh_by_chip.insert(chip_id, mesh_id) {
                    return fabric_error!(
                        InconsistentTopology,
                        "chip {chip_id} is part of both mesh {other} and mesh {mesh_id}"
                    );
                }
            }
            meshes.insert(mesh_id, mesh);
        }

        Ok(Self {
            meshes,
            mesh_by_chip,
        })
    }

    pub fn mesh(&self, mesh_id: MeshId) -> FabricResult<&Mesh> {
        self.meshes
            .get(&mesh_id)
            .ok_or(FabricError::UnknownMesh(mesh_id))
    }

    /// The mesh that physically contains `chip_id`.
    pub fn mesh_of(&self, chip_id: ChipId) -> FabricResult<MeshId> {
        self.mesh_by_chip
            .get(&chip_id)
            .copied()
            .ok_or(FabricError::UnknownChip(chip_id))
    }

    pub fn shape_of(&self, mesh_id: MeshId) -> FabricResult<MeshShape> {
        Ok(self.mesh(mesh_id)?.shape())
    }

    pub fn coordinates_of(&self, mesh_id: MeshId, chip_id: ChipId) -> FabricResult<(usize, usize)> {
        self.mesh(mesh_id)?.coordinates_of(chip_id)
    }

    /// The `(row, col)` of a row-major logical chip index.
    pub fn coordinates_from_logical_id(
        &self,
        mesh_id: MeshId,
        logical_index: usize,
    ) -> FabricResult<(usize, usize)> {
        self.shape_of(mesh_id)?
            .delinearize(logical_index)
            .ok_or(FabricError::UnknownLogicalChip {
                mesh_id,
                logical_index,
            })
    }

    /// The chip at `(row, col)`, or `None` when outside the mesh.
    pub fn chip_at(&self, mesh_id: MeshId, row: usize, col: usize) -> FabricResult<Option<ChipId>> {
        Ok(self.mesh(mesh_id)?.chip_at(row, col))
    }

    /// Other chips in the same row, ascending by column.
    pub fn peers_same_row(&self, chip_id: ChipId) -> FabricResult<Vec<ChipId>> {
        let mesh = self.mesh(self.mesh_of(chip_id)?)?;
        let (row, _) = mesh.coordinates_of(chip_id)?;
        Ok(mesh
            .row(row)
            .iter()
            .copied()
            .filter(|peer| *peer != chip_id)
            .collect())
    }

    /// Other chips in the same column, ascending by row.
    pub fn peers_same_col(&self, chip_id: ChipId) -> FabricResult<Vec<ChipId>> {
        let mesh = self.mesh(self.mesh_of(chip_id)?)?;
        let (_, col) = mesh.coordinates_of(chip_id)?;
        Ok(mesh
            .column(col)
            .into_iter()
            .filter(|peer| *peer != chip_id)
            .collect())
    }

    pub fn mesh_ids(&self) -> impl Iterator<Item = MeshId> + '_ {
        self.meshes.keys().copied()
    }

    /// Every chip, in mesh order and then row-major.
    pub fn chip_ids(&self) -> impl Iterator<Item = ChipId> + '_ {
        self.meshes.values().flat_map(Mesh::chip_ids)
    }

    #[must_use]
    pub fn contains(&self, chip_id: ChipId) -> bool {
        self.mesh_by_chip.contains_key(&chip_id)
    }

    #[must_use]
    pub fn num_chips(&self) -> usize {
        self.mesh_by_chip.len()
    }

    pub fn log_meshes(&self) {
        for mesh in self.meshes.values() {
            for line in mesh.to_string().lines() {
                info!("{line}");
            }
        }
    }
}

impl fmt::Display for MeshTopology {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for mesh in self.meshes.values() {
            write!(f, "{mesh}")?;
        }
        Ok(())
    }
}
