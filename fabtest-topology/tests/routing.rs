// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

use fabtest_topology::test_helpers::{mesh_topology, start_test};
use fabtest_topology::{ChipId, FabricError, HopMap, MeshId, RoutingDirection, RoutingPolicy};

use RoutingDirection::{East, North, South, West};

// 4x4 mesh, chip id == row * 4 + col
//
//   0  1  2  3
//   4  5  6  7
//   8  9 10 11
//  12 13 14 15

#[test]
fn step_in_every_direction() {
    start_test(file!());
    let topology = mesh_topology(&[(4, 4)], 0);
    assert_eq!(topology.step(ChipId(5), North, 1).unwrap(), ChipId(1));
    assert_eq!(topology.step(ChipId(5), South, 2).unwrap(), ChipId(13));
    assert_eq!(topology.step(ChipId(5), East, 2).unwrap(), ChipId(7));
    assert_eq!(topology.step(ChipId(5), West, 1).unwrap(), ChipId(4));
    assert_eq!(topology.step(ChipId(5), West, 0).unwrap(), ChipId(5));
}

#[test]
fn every_out_of_range_walk_is_rejected() {
    start_test(file!());
    let topology = mesh_topology(&[(4, 4)], 0);
    let shape = topology.shape_of(MeshId(0)).unwrap();
    for chip in topology.chip_ids().collect::<Vec<_>>() {
        let (row, col) = topology.coordinates_of(MeshId(0), chip).unwrap();
        for direction in RoutingDirection::ALL {
            let room = match direction {
                North => row,
                South => shape.num_rows - 1 - row,
                East => shape.num_cols - 1 - col,
                West => col,
            } as u32;
            assert!(topology.step(chip, direction, room).is_ok());
            for hops in room + 1..room + 5 {
                assert_eq!(
                    topology.step(chip, direction, hops),
                    Err(FabricError::HopOutOfBounds {
                        chip,
                        direction,
                        hops
                    })
                );
                let hop_map = HopMap::from([(direction, hops)]);
                assert!(matches!(
                    topology.route(chip, &hop_map, RoutingPolicy::ColumnFirst),
                    Err(FabricError::HopOutOfBounds { .. })
                ));
            }
        }
    }
}

#[test]
fn arm_lists_every_chip() {
    start_test(file!());
    let topology = mesh_topology(&[(4, 4)], 0);
    assert_eq!(
        topology.arm(ChipId(12), North, 3).unwrap(),
        vec![ChipId(8), ChipId(4), ChipId(0)]
    );
    assert!(topology.arm(ChipId(12), North, 0).unwrap().is_empty());
}

#[test]
fn route_follows_policy() {
    start_test(file!());
    let topology = mesh_topology(&[(4, 4)], 0);
    let hops = HopMap::from([(East, 2), (South, 2)]);

    assert_eq!(
        topology
            .route(ChipId(0), &hops, RoutingPolicy::ColumnFirst)
            .unwrap(),
        vec![ChipId(1), ChipId(2), ChipId(6), ChipId(10)]
    );
    assert_eq!(
        topology
            .route(ChipId(0), &hops, RoutingPolicy::RowFirst)
            .unwrap(),
        vec![ChipId(4), ChipId(8), ChipId(9), ChipId(10)]
    );
    assert_eq!(topology.destination(ChipId(0), &hops).unwrap(), ChipId(10));
}

#[test]
fn hops_between_round_trips() {
    start_test(file!());
    let topology = mesh_topology(&[(4, 4)], 0);
    for src in 0..16 {
        for dst in 0..16 {
            let (src, dst) = (ChipId(src), ChipId(dst));
            let hops = topology.hops_between(src, dst).unwrap();
            if src == dst {
                assert!(hops.is_empty());
            } else {
                assert_eq!(topology.destination(src, &hops).unwrap(), dst);
            }
        }
    }
    assert_eq!(
        topology.hops_between(ChipId(15), ChipId(4)).unwrap(),
        HopMap::from([(West, 3), (North, 2)])
    );
}

#[test]
fn opposing_route() {
    start_test(file!());
    let topology = mesh_topology(&[(4, 4)], 0);
    let hops = HopMap::from([(North, 1), (South, 1)]);
    let err = topology
        .route(ChipId(5), &hops, RoutingPolicy::ColumnFirst)
        .unwrap_err();
    assert!(matches!(err, FabricError::AmbiguousRouting(_)));
    assert_eq!(
        err.to_string(),
        "Ambiguous routing: hop map travels both North (1) and South (1)"
    );
}
