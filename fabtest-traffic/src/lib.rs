// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Resolve declarative traffic into per-device sender and receiver
//! descriptors.
//!
//! A [TrafficConfig] names a source chip and either a set of destination
//! chips or a number of hops in each direction. The [TrafficResolver] checks
//! it against the [MeshTopology](fabtest_topology::MeshTopology), expands
//! multicast and bidirectional traffic, and asks a [MemoryAllocator] where
//! each receiver's data should land.

pub mod allocator;
pub mod config;
pub mod descriptor;
pub mod memory_map;
pub mod resolver;
pub mod traffic_gen;
pub mod types;

pub use fabtest_topology::{FabricError, FabricResult};

pub use crate::allocator::{Allocation, LinearAllocator, MemoryAllocator};
pub use crate::config::{
    ChipSendType, NocSendType, TrafficConfig, TrafficDataConfig, TrafficRouting,
};
pub use crate::descriptor::{ReceiverDescriptor, ResolvedTraffic, SenderDescriptor, SenderId};
pub use crate::resolver::TrafficResolver;
pub use crate::traffic_gen::{TrafficGen, TrafficPattern};
