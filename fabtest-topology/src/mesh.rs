// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! A single rectangular mesh of physical chips.

use std::collections::HashMap;
use std::fmt;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::control_plane::ControlPlane;
use crate::error::{FabricError, FabricResult};
use crate::{ChipId, MeshId, fabric_error};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshShape {
    pub num_rows: usize,
    pub num_cols: usize,
}

impl MeshShape {
    #[must_use]
    pub fn new(num_rows: usize, num_cols: usize) -> Self {
        Self { num_rows, num_cols }
    }

    /// Number of chips in the shape, `None` if it does not fit in `usize`.
    #[must_use]
    pub fn checked_num_chips(&self) -> Option<usize> {
        self.num_rows.checked_mul(self.num_cols)
    }

    /// Number of chips in the shape, saturating at `usize::MAX`.
    #[must_use]
    pub fn num_chips(&self) -> usize {
        self.num_rows.saturating_mul(self.num_cols)
    }

    /// Row-major `(row, col)` of a logical chip index.
    #[must_use]
    pub fn delinearize(&self, logical_index: usize) -> Option<(usize, usize)> {
        (logical_index < self.num_chips())
            .then(|| (logical_index / self.num_cols, logical_index % self.num_cols))
    }
}

impl fmt::Display for MeshShape {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}x{}", self.num_rows, self.num_cols)
    }
}

/// The physical chip ids of a mesh laid out by logical position.
///
/// The grid is always fully populated, and every chip in it maps back to its
/// `(row, col)` through the reverse map.
#[derive(Debug, Clone)]
pub struct Mesh {
    mesh_id: MeshId,
    shape: MeshShape,
    grid: Vec<Vec<ChipId>>,
    coords: HashMap<ChipId, (usize, usize)>,
}

impl Mesh {
    /// Query the control plane for the shape of `mesh_id` and the physical
    /// chip at every logical index (row-major).
    pub fn from_control_plane(
        control_plane: &dyn ControlPlane,
        mesh_id: MeshId,
    ) -> FabricResult<Self> {
        let shape = control_plane.shape(mesh_id)?;
        match shape.checked_num_chips() {
            Some(0) => {
                return fabric_error!(
                    InconsistentTopology,
                    "mesh {mesh_id} has an empty shape {shape}"
                );
            }
            None => {
                return fabric_error!(
                    InconsistentTopology,
                    "mesh {mesh_id} has a shape {shape} too large to address"
                );
            }
            Some(_) => {}
        }

        // The control plane has to back every slot, so grow as they resolve
        let mut grid = Vec::new();
        let mut coords = HashMap::new();
        let mut logical_index = 0;
        for row in 0..shape.num_rows {
            let mut chips = Vec::with_capacity(shape.num_cols);
            for col in 0..shape.num_cols {
                let chip_id = control_plane
                    .physical_id_at(mesh_id, logical_index)
                    .map_err(|e| {
                        FabricError::InconsistentTopology(format!(
                            "mesh {mesh_id} ({shape}) cannot resolve logical chip {logical_index}: {e}"
                        ))
                    })?;
                if coords.insert(chip_id, (row, col)).is_some() {
                    return fabric_error!(
                        InconsistentTopology,
                        "chip {chip_id} appears more than once in mesh {mesh_id}"
                    );
                }
                chips.push(chip_id);
                logical_index += 1;
            }
            grid.push(chips);
        }

        Ok(Self {
            mesh_id,
            shape,
            grid,
            coords,
        })
    }

    #[must_use]
    pub fn mesh_id(&self) -> MeshId {
        self.mesh_id
    }

    #[must_use]
    pub fn shape(&self) -> MeshShape {
        self.shape
    }

    #[must_use]
    pub fn grid(&self) -> &[Vec<ChipId>] {
        &self.grid
    }

    #[must_use]
    pub fn contains(&self, chip_id: ChipId) -> bool {
        self.coords.contains_key(&chip_id)
    }

    pub fn coordinates_of(&self, chip_id: ChipId) -> FabricResult<(usize, usize)> {
        self.coords
            .get(&chip_id)
            .copied()
            .ok_or(FabricError::UnknownChip(chip_id))
    }

    #[must_use]
    pub fn chip_at(&self, row: usize, col: usize) -> Option<ChipId> {
        self.grid.get(row).and_then(|chips| chips.get(col)).copied()
    }

    #[must_use]
    pub fn chip_at_logical(&self, logical_index: usize) -> Option<ChipId> {
        let (row, col) = self.shape.delinearize(logical_index)?;
        self.chip_at(row, col)
    }

    /// Chips of `row` in ascending column order.
    #[must_use]
    pub fn row(&self, row: usize) -> &[ChipId] {
        self.grid.get(row).map_or(&[], |chips| chips.as_slice())
    }

    /// Chips of `col` in ascending row order.
    #[must_use]
    pub fn column(&self, col: usize) -> Vec<ChipId> {
        self.grid
            .iter()
            .filter_map(|chips| chips.get(col).copied())
            .collect()
    }

    /// All chips in row-major order.
    pub fn chip_ids(&self) -> impl Iterator<Item = ChipId> + '_ {
        self.grid.iter().flatten().copied()
    }
}

impl fmt::Display for Mesh {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "Mesh id: {} ({})", self.mesh_id, self.shape)?;
        for chips in &self.grid {
            writeln!(f, "  [{}]", chips.iter().format(", "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delinearize_row_major() {
        let shape = MeshShape::new(3, 4);
        assert_eq!(shape.delinearize(0), Some((0, 0)));
        assert_eq!(shape.delinearize(5), Some((1, 1)));
        assert_eq!(shape.delinearize(11), Some((2, 3)));
        assert_eq!(shape.delinearize(12), None);
    }

    #[test]
    fn empty_shape_has_no_chips() {
        let shape = MeshShape::new(0, 4);
        assert_eq!(shape.num_chips(), 0);
        assert_eq!(shape.delinearize(0), None);
    }

    #[test]
    fn oversized_shape() {
        let shape = MeshShape::new(usize::MAX, 2);
        assert_eq!(shape.checked_num_chips(), None);
        assert_eq!(shape.num_chips(), usize::MAX);
    }
}
