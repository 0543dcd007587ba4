// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Per-device instructions produced by resolving a traffic config.

use std::fmt;
use std::rc::Rc;

use fabtest_device::CoreCoord;
use fabtest_topology::{ChipId, HopMap};
use itertools::Itertools;

use crate::config::TrafficDataConfig;

/// Links every receiver to the sender that feeds it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SenderId(pub u32);

impl fmt::Display for SenderId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug)]
pub struct SenderDescriptor {
    pub sender_id: SenderId,
    pub src_chip_id: ChipId,
    pub src_core: CoreCoord,
    pub data_config: Rc<TrafficDataConfig>,
    /// One chip for unicast, the full fan-out for multicast.
    pub dst_chip_ids: Vec<ChipId>,
    pub hops: HopMap,
    /// Chips the traffic passes through, in order, excluding the source.
    pub route: Vec<ChipId>,
    pub target_address: u64,
    pub receiver_noc_encoding: u32,
    pub kernel_src: String,
}

impl fmt::Display for SenderDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "sender {} chip {} core {} -> [{}] {} {} x {}B hops {{{}}} @ {:#x}",
            self.sender_id,
            self.src_chip_id,
            self.src_core,
            self.dst_chip_ids.iter().format(", "),
            self.data_config.chip_send_type,
            self.data_config.num_packets,
            self.data_config.payload_size_bytes,
            self.hops
                .iter()
                .format_with(", ", |(d, n), f| f(&format_args!("{d}: {n}"))),
            self.target_address
        )
    }
}

#[derive(Clone, Debug)]
pub struct ReceiverDescriptor {
    pub sender_id: SenderId,
    pub chip_id: ChipId,
    pub core: CoreCoord,
    pub data_config: Rc<TrafficDataConfig>,
    pub target_address: u64,
    pub kernel_src: String,
}

impl fmt::Display for ReceiverDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "receiver for sender {} chip {} core {} expects {}B @ {:#x}",
            self.sender_id,
            self.chip_id,
            self.core,
            self.data_config.total_bytes(),
            self.target_address
        )
    }
}

/// Every descriptor produced by one traffic config.
#[derive(Clone, Debug, Default)]
pub struct ResolvedTraffic {
    pub senders: Vec<SenderDescriptor>,
    pub receivers: Vec<ReceiverDescriptor>,
}

impl ResolvedTraffic {
    #[must_use]
    pub fn sender(&self, sender_id: SenderId) -> Option<&SenderDescriptor> {
        self.senders.iter().find(|s| s.sender_id == sender_id)
    }

    pub fn receivers_for(&self, sender_id: SenderId) -> impl Iterator<Item = &ReceiverDescriptor> {
        self.receivers
            .iter()
            .filter(move |r| r.sender_id == sender_id)
    }

    #[must_use]
    pub fn num_descriptors(&self) -> usize {
        self.senders.len() + self.receivers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.num_descriptors() == 0
    }

    pub fn append(&mut self, mut other: ResolvedTraffic) {
        self.senders.append(&mut other.senders);
        self.receivers.append(&mut other.receivers);
    }
}
