// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Turn a [TrafficConfig] into sender and receiver descriptors.
//!
//! Resolution happens in two phases. The first validates the source and
//! works out the full destination set without side effects, so a bad config
//! never allocates memory. The second allocates every receive buffer, or
//! none if any of them does not fit, and then emits the descriptors:
//!
//! ```txt
//!                     unicast            multicast            bidirectional
//!  senders            1                  1                    + 1 per receiver
//!  receivers          1                  1 per destination    + 1 per receiver
//! ```

use std::collections::HashSet;
use std::rc::Rc;

use fabtest_device::{ChipRegistry, CoreCoord};
use fabtest_topology::{
    ChipId, FabricError, FabricResult, HopMap, MeshTopology, RoutingPolicy, fabric_error,
};
use log::{debug, info};

use crate::allocator::{Allocation, MemoryAllocator};
use crate::config::{ChipSendType, TrafficConfig, TrafficRouting};
use crate::descriptor::{ReceiverDescriptor, ResolvedTraffic, SenderDescriptor, SenderId};

pub const DEFAULT_SENDER_KERNEL: &str = "kernels/fabric_test_sender.cpp";
pub const DEFAULT_RECEIVER_KERNEL: &str = "kernels/fabric_test_receiver.cpp";

/// The validated destination set of a traffic config.
#[derive(Debug, PartialEq, Eq)]
struct Route {
    dst_chip_ids: Vec<ChipId>,
    hops: HopMap,
    path: Vec<ChipId>,
    multicast: bool,
}

/// Resolves traffic configs and hands out [SenderId]s that are unique for
/// the lifetime of the resolver.
#[derive(Debug, Default)]
pub struct TrafficResolver {
    policy: RoutingPolicy,
    next_sender_id: u32,
}

impl TrafficResolver {
    #[must_use]
    pub fn new(policy: RoutingPolicy) -> Self {
        Self {
            policy,
            next_sender_id: 0,
        }
    }

    #[must_use]
    pub fn policy(&self) -> RoutingPolicy {
        self.policy
    }

    /// Change the policy for subsequent resolutions. Sender ids keep
    /// counting from where they were.
    pub fn set_policy(&mut self, policy: RoutingPolicy) {
        self.policy = policy;
    }

    pub fn resolve(
        &mut self,
        config: &TrafficConfig,
        topology: &MeshTopology,
        registry: &dyn ChipRegistry,
        allocator: &mut dyn MemoryAllocator,
    ) -> FabricResult<ResolvedTraffic> {
        let src = config.src_chip_id;
        if !registry.has_chip(src) || !topology.contains(src) {
            return Err(FabricError::UnknownChip(src));
        }

        let route = self.route(config, topology, registry)?;
        debug!(
            "Traffic from chip {src} resolves to {:?} (multicast: {})",
            route.dst_chip_ids, route.multicast
        );

        let data_config = if route.multicast
            && config.data_config.chip_send_type != ChipSendType::Multicast
        {
            Rc::new(config.data_config.with_chip_send_type(ChipSendType::Multicast))
        } else {
            Rc::clone(&config.data_config)
        };

        let src_core = config.src_core.unwrap_or_default();
        let dst_core = config.dst_core.unwrap_or_default();
        let sender_kernel = config
            .sender_kernel_src
            .as_deref()
            .unwrap_or(DEFAULT_SENDER_KERNEL);
        let receiver_kernel = config
            .receiver_kernel_src
            .as_deref()
            .unwrap_or(DEFAULT_RECEIVER_KERNEL);

        // Reverse routes have no side effects, so work them out before
        // anything is allocated
        let mut reverse_routes = Vec::new();
        if config.bidirectional {
            for dst in &route.dst_chip_ids {
                let hops = topology.hops_between(*dst, src)?;
                let path = topology.route(*dst, &hops, self.policy)?;
                reverse_routes.push((*dst, hops, path));
            }
        }

        // Every receiver chip sends the same amount of data back to the source
        let num_bytes = data_config.total_bytes();
        let src_chips = std::slice::from_ref(&src);
        let mut requests = vec![(route.dst_chip_ids.as_slice(), dst_core, num_bytes)];
        requests.extend(
            reverse_routes
                .iter()
                .map(|_| (src_chips, src_core, num_bytes)),
        );
        let allocations = allocate_all(allocator, &requests)?;

        let mut resolved = ResolvedTraffic::default();
        let allocation = &allocations[0];
        let sender_id = self.next_sender_id();
        for dst in &route.dst_chip_ids {
            resolved.receivers.push(ReceiverDescriptor {
                sender_id,
                chip_id: *dst,
                core: dst_core,
                data_config: Rc::clone(&data_config),
                target_address: allocation.target_address,
                kernel_src: receiver_kernel.to_string(),
            });
        }
        resolved.senders.push(SenderDescriptor {
            sender_id,
            src_chip_id: src,
            src_core,
            data_config: Rc::clone(&data_config),
            dst_chip_ids: route.dst_chip_ids.clone(),
            hops: route.hops,
            route: route.path,
            target_address: allocation.target_address,
            receiver_noc_encoding: allocation.noc_xy_encoding,
            kernel_src: sender_kernel.to_string(),
        });

        let reverse_data = Rc::new(data_config.with_chip_send_type(ChipSendType::Unicast));
        for ((dst, hops, path), allocation) in reverse_routes.into_iter().zip(&allocations[1..]) {
            let sender_id = self.next_sender_id();
            resolved.senders.push(SenderDescriptor {
                sender_id,
                src_chip_id: dst,
                src_core: dst_core,
                data_config: Rc::clone(&reverse_data),
                dst_chip_ids: vec![src],
                hops,
                route: path,
                target_address: allocation.target_address,
                receiver_noc_encoding: allocation.noc_xy_encoding,
                kernel_src: sender_kernel.to_string(),
            });
            resolved.receivers.push(ReceiverDescriptor {
                sender_id,
                chip_id: src,
                core: src_core,
                data_config: Rc::clone(&reverse_data),
                target_address: allocation.target_address,
                kernel_src: receiver_kernel.to_string(),
            });
        }

        for sender in &resolved.senders {
            debug!("{sender}");
        }
        for receiver in &resolved.receivers {
            debug!("{receiver}");
        }
        info!(
            "Resolved traffic from chip {src}: {} sender(s), {} receiver(s)",
            resolved.senders.len(),
            resolved.receivers.len()
        );
        Ok(resolved)
    }

    fn next_sender_id(&mut self) -> SenderId {
        let sender_id = SenderId(self.next_sender_id);
        self.next_sender_id += 1;
        sender_id
    }

    /// Work out where the traffic goes without side effects.
    fn route(
        &self,
        config: &TrafficConfig,
        topology: &MeshTopology,
        registry: &dyn ChipRegistry,
    ) -> FabricResult<Route> {
        let src = config.src_chip_id;
        let declared_multicast = config.data_config.chip_send_type == ChipSendType::Multicast;

        let route = match &config.routing {
            TrafficRouting::Destinations(dsts) => {
                let mut seen = HashSet::new();
                for dst in dsts {
                    if !seen.insert(*dst) {
                        return fabric_error!(
                            AmbiguousRouting,
                            "chip {dst} is listed more than once as a destination of chip {src}"
                        );
                    }
                    if *dst == src {
                        return Err(FabricError::Unroutable {
                            src,
                            dst: *dst,
                            reason: "destination is the source chip".to_string(),
                        });
                    }
                    if !registry.has_chip(*dst) {
                        return Err(FabricError::UnknownChip(*dst));
                    }
                }

                match dsts.as_slice() {
                    [] => {
                        return fabric_error!(
                            AmbiguousRouting,
                            "traffic from chip {src} has an empty destination list"
                        );
                    }
                    [dst] if !declared_multicast => {
                        let hops = topology.hops_between(src, *dst)?;
                        let path = topology.route(src, &hops, self.policy)?;
                        Route {
                            dst_chip_ids: vec![*dst],
                            hops,
                            path,
                            multicast: false,
                        }
                    }
                    _ => self.multicast_to(src, dsts, topology)?,
                }
            }
            TrafficRouting::Hops(hops) => {
                if declared_multicast {
                    self.multicast_arms(src, hops, topology)?
                } else {
                    let path = topology.route(src, hops, self.policy)?;
                    let Some(dst) = path.last().copied() else {
                        return fabric_error!(
                            AmbiguousRouting,
                            "hop map from chip {src} contains no hops"
                        );
                    };
                    Route {
                        dst_chip_ids: vec![dst],
                        hops: hops.clone(),
                        path,
                        multicast: false,
                    }
                }
            }
        };

        if route.dst_chip_ids.is_empty() {
            return fabric_error!(AmbiguousRouting, "traffic from chip {src} reaches no chips");
        }
        for dst in &route.dst_chip_ids {
            if !registry.has_chip(*dst) {
                return Err(FabricError::UnknownChip(*dst));
            }
        }
        Ok(route)
    }

    /// Explicit multicast destinations, which must all lie on a straight
    /// line through the source.
    fn multicast_to(
        &self,
        src: ChipId,
        dsts: &[ChipId],
        topology: &MeshTopology,
    ) -> FabricResult<Route> {
        let row_peers = topology.peers_same_row(src)?;
        let col_peers = topology.peers_same_col(src)?;

        let mut hops = HopMap::new();
        for dst in dsts {
            let to_dst = topology.hops_between(src, *dst)?;
            if !row_peers.contains(dst) && !col_peers.contains(dst) {
                return Err(FabricError::Unroutable {
                    src,
                    dst: *dst,
                    reason: "multicast destinations must share a row or column with the source"
                        .to_string(),
                });
            }
            for (direction, count) in to_dst {
                let longest = hops.entry(direction).or_insert(0);
                *longest = (*longest).max(count);
            }
        }

        let path = self.arms(src, &hops, topology)?;
        Ok(Route {
            dst_chip_ids: dsts.to_vec(),
            hops,
            path,
            multicast: true,
        })
    }

    /// Every chip on every arm of the hop map is a destination.
    fn multicast_arms(
        &self,
        src: ChipId,
        hops: &HopMap,
        topology: &MeshTopology,
    ) -> FabricResult<Route> {
        let path = self.arms(src, hops, topology)?;
        Ok(Route {
            dst_chip_ids: path.clone(),
            hops: hops.clone(),
            path,
            multicast: true,
        })
    }

    /// Walk each direction independently from `src`, in policy order.
    fn arms(&self, src: ChipId, hops: &HopMap, topology: &MeshTopology) -> FabricResult<Vec<ChipId>> {
        let mut chips = Vec::new();
        for direction in self.policy.direction_order() {
            if let Some(count) = hops.get(&direction)
                && *count > 0
            {
                chips.extend(topology.arm(src, direction, *count)?);
            }
        }
        Ok(chips)
    }
}

/// Make every allocation in `requests` or none of them.
fn allocate_all(
    allocator: &mut dyn MemoryAllocator,
    requests: &[(&[ChipId], CoreCoord, u64)],
) -> FabricResult<Vec<Allocation>> {
    let mut allocations = Vec::with_capacity(requests.len());
    for (chips, core, num_bytes) in requests {
        match allocator.allocate(chips, *core, *num_bytes) {
            Ok(allocation) => allocations.push(allocation),
            Err(e) => {
                for allocation in &allocations {
                    allocator.release(allocation);
                }
                return Err(e);
            }
        }
    }
    Ok(allocations)
}
