// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Types that map directly to the cluster description file contents

use serde::{Deserialize, Serialize};

use crate::{ChipId, MeshId};

#[derive(clap::ValueEnum, Clone, Copy, Default, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClusterType {
    #[default]
    /// Chip ids start at zero
    Standard,

    /// The first block of chip ids is reserved for gateway chips
    Galaxy,
}

impl ClusterType {
    /// The first user-visible chip id on this kind of cluster.
    #[must_use]
    pub fn default_chip_id_offset(&self) -> u32 {
        match self {
            ClusterType::Standard => 0,
            ClusterType::Galaxy => 4,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default)]
    pub cluster_type: ClusterType,
    pub meshes: Vec<MeshSection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshSection {
    pub mesh_id: MeshId,
    pub rows: usize,
    pub cols: usize,
    /// Physical chip ids in row-major logical order.
    pub chip_ids: Vec<ChipId>,
}
