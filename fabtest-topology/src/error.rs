// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! The error type shared by every `fabtest` crate.

use std::error::Error;
use std::fmt;

use crate::routing::RoutingDirection;
use crate::{ChipId, MeshId};

/// Build an `Err(FabricError::<kind>(String))` from a format string.
///
/// Only usable with the variants that carry a message.
#[macro_export]
macro_rules! fabric_error {
    ($kind:ident, $($arg:tt)+) => {
        Err($crate::error::FabricError::$kind(format!($($arg)+)))
    };
}

/// Everything that can go wrong while discovering, opening or routing.
///
/// All of these are fatal to the operation that raised them. Nothing in the
/// harness retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FabricError {
    UnknownMesh(MeshId),
    UnknownChip(ChipId),
    UnknownLogicalChip {
        mesh_id: MeshId,
        logical_index: usize,
    },
    /// Both or neither of destination set / hop map were given, or the hop
    /// map cannot describe a single path.
    AmbiguousRouting(String),
    HopOutOfBounds {
        chip: ChipId,
        direction: RoutingDirection,
        hops: u32,
    },
    /// The control plane reported data that cannot form a set of meshes.
    InconsistentTopology(String),
    Unroutable {
        src: ChipId,
        dst: ChipId,
        reason: String,
    },
    AllocationFailed(String),
    Device(String),
    InvalidState(String),
    Config(String),
}

impl fmt::Display for FabricError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::UnknownMesh(mesh_id) => write!(f, "Unknown mesh id: {mesh_id}"),
            Self::UnknownChip(chip_id) => write!(f, "Unknown chip id: {chip_id}"),
            Self::UnknownLogicalChip {
                mesh_id,
                logical_index,
            } => write!(
                f,
                "Unknown logical chip index {logical_index} in mesh {mesh_id}"
            ),
            Self::AmbiguousRouting(msg) => write!(f, "Ambiguous routing: {msg}"),
            Self::HopOutOfBounds {
                chip,
                direction,
                hops,
            } => write!(
                f,
                "Hop out of bounds: {hops} hop(s) {direction} from chip {chip} leaves the mesh"
            ),
            Self::InconsistentTopology(msg) => write!(f, "Inconsistent topology: {msg}"),
            Self::Unroutable { src, dst, reason } => {
                write!(f, "No route from chip {src} to chip {dst}: {reason}")
            }
            Self::AllocationFailed(msg) => write!(f, "Allocation failed: {msg}"),
            Self::Device(msg) => write!(f, "Device error: {msg}"),
            Self::InvalidState(msg) => write!(f, "Invalid state: {msg}"),
            Self::Config(msg) => write!(f, "Config error: {msg}"),
        }
    }
}

impl Error for FabricError {}

pub type FabricResult<T> = Result<T, FabricError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn config_failure(value: u32) -> FabricResult<()> {
        fabric_error!(Config, "bad value {value}")
    }

    #[test]
    fn macro_formats_message() {
        assert_eq!(
            config_failure(3),
            Err(FabricError::Config("bad value 3".to_string()))
        );
    }

    #[test]
    fn display_hop_out_of_bounds() {
        let err = FabricError::HopOutOfBounds {
            chip: ChipId(5),
            direction: RoutingDirection::East,
            hops: 2,
        };
        assert_eq!(
            err.to_string(),
            "Hop out of bounds: 2 hop(s) East from chip 5 leaves the mesh"
        );
    }
}
