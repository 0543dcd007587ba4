// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Types that map directly to the traffic sections of a test file

use std::fmt;
use std::sync::LazyLock;

use byte_unit::Byte;
use fabtest_device::CoreCoord;
use fabtest_topology::{ChipId, FabricError, FabricResult, HopMap, MeshId, MeshTopology};
use regex::Regex;
use serde::{Deserialize, Serialize, de};
use serde_yaml::Value;

use crate::config::{ChipSendType, NocSendType, TrafficConfig, TrafficDataConfig};
use crate::traffic_gen::TrafficPattern;

/// Parse a value which could be an integer or a string and return u64 value
///
/// The string can be a hex string with underscores or a Byte string that
/// specifies units. Some examples are:
///  0x10000000
///  0x1000_0000
///  10B
///  4K, 4KB, 4KiB
pub fn parse_byte_str<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: de::Deserializer<'de>,
{
    // Deserialize to a generic `Value` first to support plain integers
    let value: Value = Deserialize::deserialize(deserializer)?;

    if let Some(number) = value.as_u64() {
        return Ok(number);
    }

    let Some(s) = value.as_str() else {
        return Err(de::Error::custom(format!(
            "'{value:?}': Unsupported type for Deserialize (should be u64 or String)"
        )));
    };

    // Convert to lowercase in order to standardise any 0x prefix
    let lowercase = s.to_lowercase();

    if let Some(hex) = lowercase.strip_prefix("0x") {
        u64::from_str_radix(&hex.replace('_', ""), 16)
            .map_err(|e| de::Error::custom(format!("Unable to parse {s} as hex string: {e}")))
    } else {
        let ignore_case = false;
        let num_bytes = Byte::parse_str(s, ignore_case)
            .map_err(|e| de::Error::custom(format!("Unable to parse {s} as Byte string: {e}")))?;
        Ok(num_bytes.as_u64())
    }
}

/// A chip given either by physical id or by mesh coordinate.
///
/// Mesh coordinates are written `mesh<id>@r<row>c<col>`, for example
/// `mesh0@r1c2`. The form holds no comma so it can sit unquoted in a YAML
/// flow sequence.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChipRef {
    Physical(ChipId),
    Coordinate(String),
}

impl ChipRef {
    pub fn resolve(&self, topology: &MeshTopology) -> FabricResult<ChipId> {
        static COORD_RE: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(r"^mesh(\d+)@r(\d+)c(\d+)$").unwrap()
        });

        match self {
            ChipRef::Physical(chip_id) => {
                if topology.contains(*chip_id) {
                    Ok(*chip_id)
                } else {
                    Err(FabricError::UnknownChip(*chip_id))
                }
            }
            ChipRef::Coordinate(s) => {
                let Some(caps) = COORD_RE.captures(s) else {
                    return Err(FabricError::Config(format!(
                        "Unable to parse chip '{s}', expected mesh<id>@r<row>c<col>"
                    )));
                };
                let parse_err = |e: std::num::ParseIntError| {
                    FabricError::Config(format!("Unable to parse chip '{s}': {e}"))
                };
                let mesh_id = MeshId(caps[1].parse().map_err(parse_err)?);
                let row = caps[2].parse().map_err(parse_err)?;
                let col = caps[3].parse().map_err(parse_err)?;
                topology.chip_at(mesh_id, row, col)?.ok_or_else(|| {
                    FabricError::Config(format!(
                        "No chip at ({row},{col}) in mesh {mesh_id} ({})",
                        topology
                            .shape_of(mesh_id)
                            .map_or_else(|_| "?".to_string(), |shape| shape.to_string())
                    ))
                })
            }
        }
    }
}

impl fmt::Display for ChipRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ChipRef::Physical(chip_id) => write!(f, "{chip_id}"),
            ChipRef::Coordinate(s) => write!(f, "{s}"),
        }
    }
}

/// One declared traffic flow.
#[derive(Debug, Clone, Deserialize)]
pub struct TrafficSection {
    pub src: ChipRef,
    pub dst: Option<Vec<ChipRef>>,
    pub hops: Option<HopMap>,
    #[serde(default)]
    pub chip_send_type: ChipSendType,
    #[serde(default)]
    pub noc_send_type: NocSendType,
    pub num_packets: u32,
    #[serde(deserialize_with = "parse_byte_str")]
    pub payload_size: u64,
    #[serde(default)]
    pub bidirectional: bool,
    pub src_core: Option<CoreCoord>,
    pub dst_core: Option<CoreCoord>,
    pub sender_kernel: Option<String>,
    pub receiver_kernel: Option<String>,
}

impl TrafficSection {
    /// Resolve chip references and build the [TrafficConfig].
    pub fn to_config(&self, topology: &MeshTopology) -> FabricResult<TrafficConfig> {
        let src = self.src.resolve(topology)?;
        let dsts = match &self.dst {
            Some(dsts) => Some(
                dsts.iter()
                    .map(|dst| dst.resolve(topology))
                    .collect::<FabricResult<Vec<_>>>()?,
            ),
            None => None,
        };
        let data_config = TrafficDataConfig::new(
            self.chip_send_type,
            self.noc_send_type,
            self.num_packets,
            self.payload_size,
        )?;
        Ok(TrafficConfig::new(src, data_config, dsts, self.hops.clone())?
            .with_bidirectional(self.bidirectional)
            .with_cores(self.src_core, self.dst_core)
            .with_kernels(self.sender_kernel.clone(), self.receiver_kernel.clone()))
    }
}

fn default_window_base() -> u64 {
    0x10_0000
}

fn default_window_size() -> u64 {
    0x10_0000
}

fn default_alignment() -> u64 {
    16
}

/// The part of every chip's memory that receive buffers are placed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct MemoryWindowSection {
    #[serde(deserialize_with = "parse_byte_str", default = "default_window_base")]
    pub base: u64,
    #[serde(deserialize_with = "parse_byte_str", default = "default_window_size")]
    pub size: u64,
    #[serde(deserialize_with = "parse_byte_str", default = "default_alignment")]
    pub alignment: u64,
}

impl Default for MemoryWindowSection {
    fn default() -> Self {
        Self {
            base: default_window_base(),
            size: default_window_size(),
            alignment: default_alignment(),
        }
    }
}

fn default_num_configs() -> usize {
    1
}

/// Randomly generated traffic.
#[derive(Debug, Clone, Deserialize)]
pub struct RandomSection {
    #[serde(default)]
    pub pattern: TrafficPattern,
    /// Only used by the random patterns.
    #[serde(default = "default_num_configs")]
    pub num_configs: usize,
    pub num_packets: u32,
    #[serde(deserialize_with = "parse_byte_str")]
    pub payload_size: u64,
    #[serde(default)]
    pub bidirectional: bool,
    /// Caps the hops generated per direction.
    pub max_hops: Option<u32>,
    /// Overrides the harness seed for this section.
    pub seed: Option<u64>,
}
