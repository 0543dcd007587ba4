// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

use fabtest_topology::test_helpers::{mesh_topology, start_test};
use fabtest_topology::{ChipId, RoutingPolicy};
use fabtest_traffic::types::RandomSection;
use fabtest_traffic::{
    ChipSendType, LinearAllocator, TrafficConfig, TrafficGen, TrafficPattern, TrafficResolver,
    TrafficRouting,
};

fn section(pattern: TrafficPattern, num_configs: usize) -> RandomSection {
    RandomSection {
        pattern,
        num_configs,
        num_packets: 2,
        payload_size: 128,
        bidirectional: false,
        max_hops: None,
        seed: None,
    }
}

fn summary(configs: &[TrafficConfig]) -> Vec<String> {
    configs
        .iter()
        .map(|c| {
            format!(
                "{} {:?} {:?} {:?}",
                c.src_chip_id, c.routing, c.data_config.chip_send_type, c.data_config.noc_send_type
            )
        })
        .collect()
}

#[test]
fn same_seed_same_traffic() {
    start_test(file!());
    let topology = mesh_topology(&[(4, 4)], 0);
    let chips: Vec<ChipId> = topology.chip_ids().collect();
    for pattern in [
        TrafficPattern::RandomUnicast,
        TrafficPattern::RandomHops,
        TrafficPattern::AllToOne,
    ] {
        let a = TrafficGen::new(&topology, &chips, 7)
            .generate(&section(pattern, 20))
            .unwrap();
        let b = TrafficGen::new(&topology, &chips, 7)
            .generate(&section(pattern, 20))
            .unwrap();
        assert_eq!(summary(&a), summary(&b));
    }
}

#[test]
fn generated_traffic_always_resolves() {
    start_test(file!());
    let topology = mesh_topology(&[(3, 5), (2, 2)], 0);
    let chips: Vec<ChipId> = topology.chip_ids().collect();
    for seed in 0..20 {
        for pattern in [
            TrafficPattern::RandomUnicast,
            TrafficPattern::RandomHops,
            TrafficPattern::AllToOne,
        ] {
            let mut random = section(pattern, 10);
            random.bidirectional = seed % 2 == 0;
            let configs = TrafficGen::new(&topology, &chips, seed)
                .generate(&random)
                .unwrap();
            assert!(!configs.is_empty());

            let mut resolver = TrafficResolver::new(RoutingPolicy::ColumnFirst);
            for config in &configs {
                let mut allocator = LinearAllocator::new(0, 0x10_0000, 0x10).unwrap();
                resolver
                    .resolve(config, &topology, &chips, &mut allocator)
                    .unwrap();
            }
        }
    }
}

#[test]
fn max_hops_is_respected() {
    start_test(file!());
    let topology = mesh_topology(&[(8, 8)], 0);
    let chips: Vec<ChipId> = topology.chip_ids().collect();
    let mut random = section(TrafficPattern::RandomHops, 50);
    random.max_hops = Some(2);
    let configs = TrafficGen::new(&topology, &chips, 3)
        .generate(&random)
        .unwrap();
    for config in configs {
        let TrafficRouting::Hops(hops) = &config.routing else {
            panic!("random hops generated destinations");
        };
        assert!(hops.values().all(|count| (1..=2).contains(count)));
    }
}

#[test]
fn all_to_all_covers_every_pair() {
    start_test(file!());
    let topology = mesh_topology(&[(2, 3), (1, 2)], 0);
    let chips: Vec<ChipId> = topology.chip_ids().collect();
    let configs = TrafficGen::new(&topology, &chips, 0)
        .generate(&section(TrafficPattern::AllToAll, 1))
        .unwrap();
    // 6 * 5 in the first mesh and 2 * 1 in the second
    assert_eq!(configs.len(), 32);
    assert!(
        configs
            .iter()
            .all(|c| c.data_config.chip_send_type == ChipSendType::Unicast)
    );
}

#[test]
fn all_to_one_shares_destination() {
    start_test(file!());
    let topology = mesh_topology(&[(3, 3)], 0);
    let chips: Vec<ChipId> = topology.chip_ids().collect();
    let configs = TrafficGen::new(&topology, &chips, 11)
        .generate(&section(TrafficPattern::AllToOne, 1))
        .unwrap();
    assert_eq!(configs.len(), 8);
    let TrafficRouting::Destinations(first) = &configs[0].routing else {
        panic!("all-to-one generated hops");
    };
    for config in &configs {
        assert_eq!(config.routing, TrafficRouting::Destinations(first.clone()));
        assert!(!first.contains(&config.src_chip_id));
    }
}

#[test]
fn only_available_chips_are_used() {
    start_test(file!());
    let topology = mesh_topology(&[(4, 4)], 0);
    let chips = vec![ChipId(0), ChipId(1), ChipId(2)];
    let configs = TrafficGen::new(&topology, &chips, 5)
        .generate(&section(TrafficPattern::AllToAll, 1))
        .unwrap();
    assert_eq!(configs.len(), 6);
    for config in &configs {
        assert!(chips.contains(&config.src_chip_id));
    }
}

#[test]
fn lone_chip_generates_nothing() {
    start_test(file!());
    let topology = mesh_topology(&[(1, 1)], 0);
    let configs = TrafficGen::new(&topology, &[ChipId(0)], 5)
        .generate(&section(TrafficPattern::RandomUnicast, 4))
        .unwrap();
    assert!(configs.is_empty());
}
