// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Hop-based routing across a 2-D mesh.
//!
//! Rows are numbered from the top of the mesh and columns from the left:
//! ```txt
//!              North (row - 1)
//!                    ^
//!                    |
//! West (col - 1) <-- x --> East (col + 1)
//!                    |
//!                    v
//!              South (row + 1)
//! ```
//!
//! Paths longer than a straight line are dimension ordered: the
//! [RoutingPolicy] decides whether the column or the row is reached first.
//! Paths never interleave the two dimensions.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{FabricError, FabricResult};
use crate::mesh::MeshShape;
use crate::{ChipId, MeshTopology, fabric_error};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingDirection {
    North,
    South,
    East,
    West,
}

impl RoutingDirection {
    pub const ALL: [RoutingDirection; 4] = [
        RoutingDirection::North,
        RoutingDirection::South,
        RoutingDirection::East,
        RoutingDirection::West,
    ];

    #[must_use]
    pub fn opposite(&self) -> RoutingDirection {
        match self {
            RoutingDirection::North => RoutingDirection::South,
            RoutingDirection::South => RoutingDirection::North,
            RoutingDirection::East => RoutingDirection::West,
            RoutingDirection::West => RoutingDirection::East,
        }
    }

    /// True for directions that change the row index.
    #[must_use]
    pub fn is_vertical(&self) -> bool {
        matches!(self, RoutingDirection::North | RoutingDirection::South)
    }

    /// Apply `hops` steps to the `(row, col)` position, returning `None` if
    /// that leaves a mesh of the given shape.
    #[must_use]
    pub fn offset(
        &self,
        (row, col): (usize, usize),
        hops: u32,
        shape: MeshShape,
    ) -> Option<(usize, usize)> {
        let hops = hops as usize;
        match self {
            RoutingDirection::North => row.checked_sub(hops).map(|row| (row, col)),
            RoutingDirection::South => {
                let row = row + hops;
                (row < shape.num_rows).then_some((row, col))
            }
            RoutingDirection::East => {
                let col = col + hops;
                (col < shape.num_cols).then_some((row, col))
            }
            RoutingDirection::West => col.checked_sub(hops).map(|col| (row, col)),
        }
    }
}

impl fmt::Display for RoutingDirection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Number of hops to travel in each direction.
pub type HopMap = BTreeMap<RoutingDirection, u32>;

/// Total number of hops in a [HopMap].
#[must_use]
pub fn total_hops(hops: &HopMap) -> u32 {
    hops.values().sum()
}

/// Drop directions with no hops so that maps compare equal regardless of
/// explicit zero entries.
#[must_use]
pub fn normalize_hops(hops: &HopMap) -> HopMap {
    hops.iter()
        .filter(|(_, count)| **count > 0)
        .map(|(direction, count)| (*direction, *count))
        .collect()
}

#[derive(clap::ValueEnum, Clone, Copy, Default, Debug, Serialize, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RoutingPolicy {
    #[default]
    /// Travel East/West to the destination column first
    ColumnFirst,

    /// Travel North/South to the destination row first
    RowFirst,
}

impl RoutingPolicy {
    /// The order in which directions of a hop map are walked.
    #[must_use]
    pub fn direction_order(&self) -> [RoutingDirection; 4] {
        match self {
            RoutingPolicy::ColumnFirst => [
                RoutingDirection::East,
                RoutingDirection::West,
                RoutingDirection::North,
                RoutingDirection::South,
            ],
            RoutingPolicy::RowFirst => [
                RoutingDirection::North,
                RoutingDirection::South,
                RoutingDirection::East,
                RoutingDirection::West,
            ],
        }
    }
}

impl fmt::Display for RoutingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Reject hop maps that travel both ways along one axis.
fn check_single_path(hops: &HopMap) -> FabricResult<()> {
    for (a, b) in [
        (RoutingDirection::East, RoutingDirection::West),
        (RoutingDirection::North, RoutingDirection::South),
    ] {
        let forward = hops.get(&a).copied().unwrap_or(0);
        let backward = hops.get(&b).copied().unwrap_or(0);
        if forward > 0 && backward > 0 {
            return fabric_error!(
                AmbiguousRouting,
                "hop map travels both {a} ({forward}) and {b} ({backward})"
            );
        }
    }
    Ok(())
}

impl MeshTopology {
    /// The chips passed through when walking `hops` steps in a straight line
    /// from `chip`, in walk order and excluding `chip` itself.
    pub fn arm(
        &self,
        chip: ChipId,
        direction: RoutingDirection,
        hops: u32,
    ) -> FabricResult<Vec<ChipId>> {
        let mesh = self.mesh(self.mesh_of(chip)?)?;
        let start = mesh.coordinates_of(chip)?;
        if direction.offset(start, hops, mesh.shape()).is_none() {
            return Err(FabricError::HopOutOfBounds {
                chip,
                direction,
                hops,
            });
        }

        let mut chips = Vec::with_capacity(hops as usize);
        for step in 1..=hops {
            // Bounds were checked for the full walk above
            if let Some((row, col)) = direction.offset(start, step, mesh.shape())
                && let Some(next) = mesh.chip_at(row, col)
            {
                chips.push(next);
            }
        }
        Ok(chips)
    }

    /// The chip reached by walking `hops` steps from `chip`.
    pub fn step(&self, chip: ChipId, direction: RoutingDirection, hops: u32) -> FabricResult<ChipId> {
        let mesh = self.mesh(self.mesh_of(chip)?)?;
        let start = mesh.coordinates_of(chip)?;
        direction
            .offset(start, hops, mesh.shape())
            .and_then(|(row, col)| mesh.chip_at(row, col))
            .ok_or(FabricError::HopOutOfBounds {
                chip,
                direction,
                hops,
            })
    }

    /// Every chip visited (excluding `src`) when following `hops` from `src`
    /// with the dimension order of `policy`.
    pub fn route(
        &self,
        src: ChipId,
        hops: &HopMap,
        policy: RoutingPolicy,
    ) -> FabricResult<Vec<ChipId>> {
        check_single_path(hops)?;

        let mut path = Vec::new();
        let mut current = src;
        for direction in policy.direction_order() {
            let count = hops.get(&direction).copied().unwrap_or(0);
            if count == 0 {
                continue;
            }
            let arm = self.arm(current, direction, count)?;
            if let Some(last) = arm.last() {
                current = *last;
            }
            path.extend(arm);
        }
        Ok(path)
    }

    /// The single chip at the end of a unicast hop map.
    pub fn destination(&self, src: ChipId, hops: &HopMap) -> FabricResult<ChipId> {
        // The end point does not depend on the dimension order
        let path = self.route(src, hops, RoutingPolicy::default())?;
        match path.last() {
            Some(dst) => Ok(*dst),
            None => fabric_error!(AmbiguousRouting, "hop map from chip {src} contains no hops"),
        }
    }

    /// Hop counts needed to travel from `src` to `dst`.
    ///
    /// Both chips must be part of the same mesh. The result only contains
    /// directions with at least one hop, so it is empty when `src == dst`.
    pub fn hops_between(&self, src: ChipId, dst: ChipId) -> FabricResult<HopMap> {
        let src_mesh = self.mesh_of(src)?;
        let dst_mesh = self.mesh_of(dst)?;
        if src_mesh != dst_mesh {
            return Err(FabricError::Unroutable {
                src,
                dst,
                reason: format!("chips are in different meshes ({src_mesh} and {dst_mesh})"),
            });
        }

        let (src_row, src_col) = self.coordinates_of(src_mesh, src)?;
        let (dst_row, dst_col) = self.coordinates_of(dst_mesh, dst)?;

        let mut hops = HopMap::new();
        if dst_col > src_col {
            hops.insert(RoutingDirection::East, (dst_col - src_col) as u32);
        } else if dst_col < src_col {
            hops.insert(RoutingDirection::West, (src_col - dst_col) as u32);
        }
        if dst_row > src_row {
            hops.insert(RoutingDirection::South, (dst_row - src_row) as u32);
        } else if dst_row < src_row {
            hops.insert(RoutingDirection::North, (src_row - dst_row) as u32);
        }
        Ok(hops)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_stay_in_shape() {
        let shape = MeshShape::new(2, 3);
        assert_eq!(RoutingDirection::East.offset((0, 0), 2, shape), Some((0, 2)));
        assert_eq!(RoutingDirection::East.offset((0, 0), 3, shape), None);
        assert_eq!(RoutingDirection::West.offset((1, 2), 2, shape), Some((1, 0)));
        assert_eq!(RoutingDirection::North.offset((0, 1), 1, shape), None);
        assert_eq!(RoutingDirection::South.offset((0, 1), 1, shape), Some((1, 1)));
    }

    #[test]
    fn opposite_is_involution() {
        for direction in RoutingDirection::ALL {
            assert_eq!(direction.opposite().opposite(), direction);
            assert_eq!(direction.opposite().is_vertical(), direction.is_vertical());
        }
    }

    #[test]
    fn normalize_drops_zero_entries() {
        let hops = HopMap::from([(RoutingDirection::East, 0), (RoutingDirection::North, 2)]);
        assert_eq!(
            normalize_hops(&hops),
            HopMap::from([(RoutingDirection::North, 2)])
        );
        assert_eq!(total_hops(&hops), 2);
    }

    #[test]
    #[should_panic(expected = "travels both East (1) and West (2)")]
    fn opposing_hops_rejected() {
        let hops = HopMap::from([(RoutingDirection::East, 1), (RoutingDirection::West, 2)]);
        check_single_path(&hops).unwrap();
    }
}
