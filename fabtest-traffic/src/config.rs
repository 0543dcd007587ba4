// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

use std::fmt;
use std::rc::Rc;

use fabtest_device::CoreCoord;
use fabtest_topology::routing::normalize_hops;
use fabtest_topology::{ChipId, FabricResult, HopMap, fabric_error};
use serde::{Deserialize, Serialize};

#[derive(clap::ValueEnum, Clone, Copy, Default, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChipSendType {
    #[default]
    /// One destination chip
    Unicast,

    /// Every chip along one or more straight arms from the source
    Multicast,
}

impl fmt::Display for ChipSendType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Default, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NocSendType {
    #[default]
    UnicastWrite,
    UnicastAtomicInc,
    FusedUnicastAtomicInc,
}

impl NocSendType {
    pub const ALL: [NocSendType; 3] = [
        NocSendType::UnicastWrite,
        NocSendType::UnicastAtomicInc,
        NocSendType::FusedUnicastAtomicInc,
    ];
}

impl fmt::Display for NocSendType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Shape of the data moved by one traffic flow.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrafficDataConfig {
    pub chip_send_type: ChipSendType,
    pub noc_send_type: NocSendType,
    pub num_packets: u32,
    pub payload_size_bytes: u32,
}

impl TrafficDataConfig {
    /// Build a data config from a parsed payload size, which must fit the
    /// 32-bit runtime argument handed to the kernels.
    pub fn new(
        chip_send_type: ChipSendType,
        noc_send_type: NocSendType,
        num_packets: u32,
        payload_size: u64,
    ) -> FabricResult<Self> {
        let Ok(payload_size_bytes) = u32::try_from(payload_size) else {
            return fabric_error!(
                Config,
                "payload size {payload_size} does not fit in 32 bits (max {})",
                u32::MAX
            );
        };
        Ok(Self {
            chip_send_type,
            noc_send_type,
            num_packets,
            payload_size_bytes,
        })
    }

    /// Bytes landing at each receiver.
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        // Two 32-bit factors cannot overflow 64 bits
        u64::from(self.num_packets) * u64::from(self.payload_size_bytes)
    }

    #[must_use]
    pub fn with_chip_send_type(&self, chip_send_type: ChipSendType) -> Self {
        Self {
            chip_send_type,
            ..*self
        }
    }
}

/// Where the traffic goes: exactly one of an explicit set of chips or a
/// number of hops per direction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TrafficRouting {
    Destinations(Vec<ChipId>),
    Hops(HopMap),
}

/// A declared traffic flow before it is resolved against the topology.
#[derive(Clone, Debug)]
pub struct TrafficConfig {
    pub src_chip_id: ChipId,
    pub data_config: Rc<TrafficDataConfig>,
    pub routing: TrafficRouting,
    pub bidirectional: bool,
    pub src_core: Option<CoreCoord>,
    pub dst_core: Option<CoreCoord>,
    pub sender_kernel_src: Option<String>,
    pub receiver_kernel_src: Option<String>,
}

impl TrafficConfig {
    /// Build a config from optional routing inputs, exactly one of which
    /// must be given. A given input must also be usable: an empty
    /// destination list or a hop map without any hops is rejected.
    pub fn new(
        src_chip_id: ChipId,
        data_config: TrafficDataConfig,
        dst_chip_ids: Option<Vec<ChipId>>,
        hops: Option<HopMap>,
    ) -> FabricResult<Self> {
        if data_config.total_bytes() == 0 {
            return fabric_error!(
                Config,
                "traffic from chip {src_chip_id} moves no data ({} packet(s) of {} byte(s))",
                data_config.num_packets,
                data_config.payload_size_bytes
            );
        }

        let routing = match (dst_chip_ids, hops) {
            (Some(dsts), None) => {
                if dsts.is_empty() {
                    return fabric_error!(
                        AmbiguousRouting,
                        "traffic from chip {src_chip_id} has an empty destination list"
                    );
                }
                TrafficRouting::Destinations(dsts)
            }
            (None, Some(hops)) => {
                let hops = normalize_hops(&hops);
                if hops.is_empty() {
                    return fabric_error!(
                        AmbiguousRouting,
                        "traffic from chip {src_chip_id} has a hop map without any hops"
                    );
                }
                TrafficRouting::Hops(hops)
            }
            (Some(_), Some(_)) => {
                return fabric_error!(
                    AmbiguousRouting,
                    "traffic from chip {src_chip_id} specifies both destination chips and hops"
                );
            }
            (None, None) => {
                return fabric_error!(
                    AmbiguousRouting,
                    "traffic from chip {src_chip_id} specifies neither destination chips nor hops"
                );
            }
        };

        Ok(Self {
            src_chip_id,
            data_config: Rc::new(data_config),
            routing,
            bidirectional: false,
            src_core: None,
            dst_core: None,
            sender_kernel_src: None,
            receiver_kernel_src: None,
        })
    }

    #[must_use]
    pub fn with_bidirectional(mut self, bidirectional: bool) -> Self {
        self.bidirectional = bidirectional;
        self
    }

    #[must_use]
    pub fn with_cores(mut self, src_core: Option<CoreCoord>, dst_core: Option<CoreCoord>) -> Self {
        self.src_core = src_core;
        self.dst_core = dst_core;
        self
    }

    #[must_use]
    pub fn with_kernels(
        mut self,
        sender_kernel_src: Option<String>,
        receiver_kernel_src: Option<String>,
    ) -> Self {
        self.sender_kernel_src = sender_kernel_src;
        self.receiver_kernel_src = receiver_kernel_src;
        self
    }
}

#[cfg(test)]
mod tests {
    use fabtest_topology::{FabricError, RoutingDirection};

    use super::*;

    fn data() -> TrafficDataConfig {
        TrafficDataConfig {
            chip_send_type: ChipSendType::Unicast,
            noc_send_type: NocSendType::UnicastWrite,
            num_packets: 4,
            payload_size_bytes: 1024,
        }
    }

    #[test]
    #[should_panic(expected = "specifies both destination chips and hops")]
    fn zero_hops_still_given() {
        let hops = HopMap::from([(RoutingDirection::East, 0)]);
        TrafficConfig::new(ChipId(0), data(), Some(vec![ChipId(1)]), Some(hops)).unwrap();
    }

    #[test]
    #[should_panic(expected = "specifies both destination chips and hops")]
    fn empty_destinations_still_given() {
        let hops = HopMap::from([(RoutingDirection::East, 1)]);
        TrafficConfig::new(ChipId(0), data(), Some(vec![]), Some(hops)).unwrap();
    }

    #[test]
    fn unusable_routing_input() {
        let err = TrafficConfig::new(ChipId(0), data(), Some(vec![]), None).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Ambiguous routing: traffic from chip 0 has an empty destination list"
        );

        let hops = HopMap::from([(RoutingDirection::East, 0), (RoutingDirection::North, 0)]);
        let err = TrafficConfig::new(ChipId(0), data(), None, Some(hops)).unwrap_err();
        assert!(matches!(err, FabricError::AmbiguousRouting(_)));
    }

    #[test]
    fn zero_entries_dropped() {
        let hops = HopMap::from([(RoutingDirection::East, 1), (RoutingDirection::North, 0)]);
        let config = TrafficConfig::new(ChipId(0), data(), None, Some(hops)).unwrap();
        assert_eq!(
            config.routing,
            TrafficRouting::Hops(HopMap::from([(RoutingDirection::East, 1)]))
        );
    }

    #[test]
    fn payload_must_fit_runtime_arg() {
        let data = TrafficDataConfig::new(
            ChipSendType::Unicast,
            NocSendType::UnicastWrite,
            2,
            (1 << 32) + 16,
        )
        .unwrap_err();
        assert!(matches!(data, FabricError::Config(_)));

        let data = TrafficDataConfig::new(
            ChipSendType::Unicast,
            NocSendType::UnicastWrite,
            u32::MAX,
            u64::from(u32::MAX),
        )
        .unwrap();
        assert_eq!(data.total_bytes(), u64::from(u32::MAX) * u64::from(u32::MAX));
    }

    #[test]
    fn total_bytes() {
        assert_eq!(data().total_bytes(), 4096);
    }
}
