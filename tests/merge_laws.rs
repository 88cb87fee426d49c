//! Merge round-trip laws and map-wide invariants.

mod common;

use common::*;
use disha_nav::features::FeatureEngine;
use disha_nav::map::PointMap;
use disha_nav::point::{PointFlags, Vertex};
use nalgebra::Vector3;

#[test]
fn test_jittered_remerge_does_not_grow_map() {
    let config = scenario_config();
    let positions = grid_positions(6, 6, 0.4);
    let mut map = build_map(&config, &positions);
    let count = map.len();

    // Every candidate sits within points_min_dist of a live point.
    let jittered: Vec<_> = positions
        .iter()
        .map(|p| p + Vector3::new(0.05, -0.03, 0.0))
        .collect();
    merge_into(&config, &mut map, &jittered);
    assert_eq!(map.len(), count);
}

#[test]
fn test_double_merge_matches_single_merge() {
    let config = scenario_config();
    let positions = grid_positions(6, 6, 0.4);

    let once = build_map(&config, &positions);

    let mut twice = PointMap::new(&config.ingestion, &config.graph);
    let normals = vec![Vector3::z(); positions.len()];
    twice.merge(&positions, &normals, Vector3::new(0.0, 0.0, 10.0));
    twice.merge(&positions, &normals, Vector3::new(0.0, 0.0, 10.0));
    FeatureEngine::new(&config).refresh(&mut twice);

    assert_eq!(once.len(), twice.len());
    for v in 0..once.len() as Vertex {
        let a = once.point(v);
        let b = twice.point(v);
        assert_eq!(a.position, b.position);
        assert_eq!(a.normal, b.normal);
        assert_eq!(a.flags.bits() & !PointFlags::EMPTY.bits(), b.flags.bits() & !PointFlags::EMPTY.bits());
        assert_eq!(a.num_edge_neighbors, b.num_edge_neighbors);
        assert!((a.ground_diff_std - b.ground_diff_std).abs() < 1e-6);
    }
}

#[test]
fn test_traversable_points_satisfy_label_invariants() {
    let config = scenario_config();
    // Flat ground, a steep ramp and an obstacle column in one map.
    let mut positions = grid_positions(8, 8, 0.3);
    for iy in 0..4 {
        for ix in 0..4 {
            let x = 3.0 + ix as f32 * 0.3;
            positions.push(Vector3::new(x, iy as f32 * 0.3, x - 3.0));
        }
    }
    positions.extend(column_positions(1.2, 1.2, 0.2, 0.15, 5));
    let map = build_map(&config, &positions);

    let max_pitch = config.graph.max_pitch();
    let max_roll = config.graph.max_roll();
    let mut traversable = 0;
    for v in 0..map.len() as Vertex {
        let p = map.point(v);
        if !p.flags.contains(PointFlags::TRAVERSABLE) {
            continue;
        }
        traversable += 1;
        assert!(p.flags.contains(PointFlags::NORMAL_OK), "vertex {}", v);
        assert!((p.normal.norm() - 1.0).abs() < 1e-3, "vertex {}", v);

        let nz = p.normal.z.abs().max(1e-9);
        assert!(p.normal.x.abs().atan2(nz) <= max_pitch + 1e-4, "vertex {}", v);
        assert!(p.normal.y.abs().atan2(nz) <= max_roll + 1e-4, "vertex {}", v);
        assert!(p.ground_diff_std <= config.tuning.max_ground_diff_std + 1e-6);
        assert!(p.num_obstacle_pts < config.tuning.min_points_obstacle);
    }
    assert!(traversable > 0, "fixture must keep some traversable ground");

    // EDGE implies TRAVERSABLE, and the dedup invariant holds globally.
    for v in 0..map.len() as Vertex {
        let p = map.point(v);
        if p.flags.contains(PointFlags::EDGE) {
            assert!(p.flags.contains(PointFlags::TRAVERSABLE));
        }
        let close: Vec<_> = map
            .nearby_indices(&p.position, 0.09)
            .into_iter()
            .filter(|(u, _)| *u != v)
            .collect();
        assert!(close.is_empty(), "vertex {} violates points_min_dist", v);
    }
}
