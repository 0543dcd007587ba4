// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

use fabtest_topology::test_helpers::{mesh_control_plane, mesh_topology, start_test};
use fabtest_topology::{
    ChipId, ControlPlane, FabricError, FabricResult, HopMap, MeshId, MeshShape, MeshTopology,
    RoutingDirection, StaticControlPlane,
};

/// A control plane that reports whatever it is told to, even when that is
/// not a valid set of meshes.
struct FaultyControlPlane {
    mesh_ids: Vec<MeshId>,
    shape: MeshShape,
    chip_ids: Vec<u32>,
}

impl ControlPlane for FaultyControlPlane {
    fn mesh_ids(&self) -> Vec<MeshId> {
        self.mesh_ids.clone()
    }

    fn shape(&self, _mesh_id: MeshId) -> FabricResult<MeshShape> {
        Ok(self.shape)
    }

    fn physical_id_at(&self, mesh_id: MeshId, logical_index: usize) -> FabricResult<ChipId> {
        self.chip_ids
            .get(logical_index)
            .map(|id| ChipId(*id + mesh_id.0 * 100))
            .ok_or(FabricError::UnknownLogicalChip {
                mesh_id,
                logical_index,
            })
    }
}

#[test]
#[should_panic(expected = "control plane reports no meshes")]
fn no_meshes() {
    start_test(file!());
    MeshTopology::discover(&mesh_control_plane(&[], 0)).unwrap();
}

#[test]
#[should_panic(expected = "mesh 0 reported twice")]
fn duplicate_mesh_id() {
    start_test(file!());
    let control_plane = FaultyControlPlane {
        mesh_ids: vec![MeshId(0), MeshId(0)],
        shape: MeshShape::new(1, 2),
        chip_ids: vec![0, 1],
    };
    MeshTopology::discover(&control_plane).unwrap();
}

#[test]
#[should_panic(expected = "has an empty shape 0x4")]
fn empty_shape() {
    start_test(file!());
    let control_plane = FaultyControlPlane {
        mesh_ids: vec![MeshId(0)],
        shape: MeshShape::new(0, 4),
        chip_ids: vec![],
    };
    MeshTopology::discover(&control_plane).unwrap();
}

#[test]
#[should_panic(expected = "chip 1 appears more than once in mesh 0")]
fn duplicate_chip_in_mesh() {
    start_test(file!());
    let control_plane = FaultyControlPlane {
        mesh_ids: vec![MeshId(0)],
        shape: MeshShape::new(2, 2),
        chip_ids: vec![0, 1, 1, 3],
    };
    MeshTopology::discover(&control_plane).unwrap();
}

#[test]
#[should_panic(expected = "cannot resolve logical chip 3")]
fn missing_slot() {
    start_test(file!());
    let control_plane = FaultyControlPlane {
        mesh_ids: vec![MeshId(0)],
        shape: MeshShape::new(2, 2),
        chip_ids: vec![0, 1, 2],
    };
    MeshTopology::discover(&control_plane).unwrap();
}

#[test]
#[should_panic(expected = "chip 2 is part of both mesh 0 and mesh 1")]
fn chip_in_two_meshes() {
    start_test(file!());
    let control_plane = StaticControlPlane::from_string(
        "
meshes:
  - mesh_id: 0
    rows: 1
    cols: 2
    chip_ids: [1, 2]
  - mesh_id: 1
    rows: 1
    cols: 2
    chip_ids: [2, 3]
",
    )
    .unwrap();
    MeshTopology::discover(&control_plane).unwrap();
}

#[test]
#[should_panic(expected = "mesh 0 is 2x2 but lists 3 chip ids")]
fn wrong_chip_count() {
    start_test(file!());
    StaticControlPlane::from_string(
        "
meshes:
  - mesh_id: 0
    rows: 2
    cols: 2
    chip_ids: [0, 1, 2]
",
    )
    .unwrap();
}

#[test]
fn oversized_cluster_mesh() {
    start_test(file!());
    let err = StaticControlPlane::from_string(
        "
meshes:
  - mesh_id: 0
    rows: 18446744073709551615
    cols: 2
    chip_ids: [0, 1]
",
    )
    .unwrap_err();
    assert_eq!(
        err,
        FabricError::InconsistentTopology(
            "mesh 0 is 18446744073709551615x2, too large to address".to_string()
        )
    );
}

#[test]
fn oversized_control_plane_shape() {
    start_test(file!());
    let control_plane = FaultyControlPlane {
        mesh_ids: vec![MeshId(0)],
        shape: MeshShape::new(usize::MAX, 2),
        chip_ids: vec![0, 1],
    };
    let err = MeshTopology::discover(&control_plane).unwrap_err();
    assert!(matches!(err, FabricError::InconsistentTopology(_)));
    assert!(err.to_string().contains("too large to address"), "{err}");
}

#[test]
#[should_panic(expected = "serde_yaml::from_str failed")]
fn malformed_cluster() {
    start_test(file!());
    StaticControlPlane::from_string("meshes: 3").unwrap();
}

#[test]
fn unknown_mesh() {
    start_test(file!());
    let topology = mesh_topology(&[(2, 2)], 0);
    let err = topology.shape_of(MeshId(7)).unwrap_err();
    assert_eq!(err, FabricError::UnknownMesh(MeshId(7)));
    assert_eq!(err.to_string(), "Unknown mesh id: 7");
}

#[test]
fn unknown_chip() {
    start_test(file!());
    let topology = mesh_topology(&[(2, 2)], 0);
    assert_eq!(
        topology.peers_same_row(ChipId(42)).unwrap_err(),
        FabricError::UnknownChip(ChipId(42))
    );
    assert_eq!(
        topology.peers_same_col(ChipId(42)).unwrap_err().to_string(),
        "Unknown chip id: 42"
    );
}

#[test]
fn chip_in_other_mesh() {
    start_test(file!());
    let topology = mesh_topology(&[(2, 2), (2, 2)], 0);
    assert_eq!(
        topology.coordinates_of(MeshId(0), ChipId(4)).unwrap_err(),
        FabricError::UnknownChip(ChipId(4))
    );
}

#[test]
fn logical_index_out_of_range() {
    start_test(file!());
    let topology = mesh_topology(&[(2, 2)], 0);
    let err = topology.coordinates_from_logical_id(MeshId(0), 4).unwrap_err();
    assert_eq!(
        err,
        FabricError::UnknownLogicalChip {
            mesh_id: MeshId(0),
            logical_index: 4
        }
    );
    assert_eq!(err.to_string(), "Unknown logical chip index 4 in mesh 0");
}

#[test]
fn step_off_the_top() {
    start_test(file!());
    let topology = mesh_topology(&[(4, 4)], 0);
    let err = topology.step(ChipId(0), RoutingDirection::North, 1).unwrap_err();
    assert_eq!(
        err,
        FabricError::HopOutOfBounds {
            chip: ChipId(0),
            direction: RoutingDirection::North,
            hops: 1
        }
    );
    assert_eq!(
        err.to_string(),
        "Hop out of bounds: 1 hop(s) North from chip 0 leaves the mesh"
    );
}

#[test]
fn hops_between_meshes() {
    start_test(file!());
    let topology = mesh_topology(&[(2, 2), (2, 2)], 0);
    let err = topology.hops_between(ChipId(0), ChipId(5)).unwrap_err();
    assert!(matches!(
        err,
        FabricError::Unroutable {
            src: ChipId(0),
            dst: ChipId(5),
            ..
        }
    ));
    assert_eq!(
        err.to_string(),
        "No route from chip 0 to chip 5: chips are in different meshes (0 and 1)"
    );
}

#[test]
#[should_panic(expected = "hop map from chip 0 contains no hops")]
fn destination_without_hops() {
    start_test(file!());
    let topology = mesh_topology(&[(2, 2)], 0);
    topology.destination(ChipId(0), &HopMap::new()).unwrap();
}
