//! Shared fixtures for DishaNav integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use disha_nav::config::DishaConfig;
use disha_nav::features::FeatureEngine;
use disha_nav::map::PointMap;
use disha_nav::planner::Planner;
use disha_nav::point::Vertex;
use disha_nav::shared::SharedState;
use disha_nav::transforms::StaticTransforms;
use nalgebra::Vector3;

/// Configuration suitable for small test maps: tight dedup radius and a
/// low planning floor on map size.
pub fn scenario_config() -> DishaConfig {
    let mut config = DishaConfig::default();
    config.frames.map_frame = "map".to_string();
    config.ingestion.points_min_dist = 0.1;
    config.graph.min_map_points = 4;
    config
}

/// Row-major flat grid positions in the z = 0 plane.
pub fn grid_positions(nx: usize, ny: usize, spacing: f32) -> Vec<Vector3<f32>> {
    let mut positions = Vec::with_capacity(nx * ny);
    for iy in 0..ny {
        for ix in 0..nx {
            positions.push(Vector3::new(ix as f32 * spacing, iy as f32 * spacing, 0.0));
        }
    }
    positions
}

/// Vertical stack of `n` points above `(x, y)`, first at `z0`, spaced
/// `dz` apart.
pub fn column_positions(x: f32, y: f32, z0: f32, dz: f32, n: usize) -> Vec<Vector3<f32>> {
    (0..n)
        .map(|i| Vector3::new(x, y, z0 + dz * i as f32))
        .collect()
}

/// Merge positions (up normals) into a fresh map and run the feature
/// engine.
pub fn build_map(config: &DishaConfig, positions: &[Vector3<f32>]) -> PointMap {
    let mut map = PointMap::new(&config.ingestion, &config.graph);
    merge_into(config, &mut map, positions);
    map
}

/// Merge positions (up normals) into an existing map and refresh.
pub fn merge_into(config: &DishaConfig, map: &mut PointMap, positions: &[Vector3<f32>]) {
    let normals = vec![Vector3::z(); positions.len()];
    map.merge(positions, &normals, Vector3::new(0.0, 0.0, 10.0));
    FeatureEngine::new(config).refresh(map);
}

/// An initialized planner with an empty static transform table.
pub fn ready_planner(config: &DishaConfig) -> (Planner, Arc<SharedState>, Arc<StaticTransforms>) {
    let state = Arc::new(SharedState::new(config.tuning));
    state.set_initialized();
    let transforms = Arc::new(StaticTransforms::new());
    let planner = Planner::new(config, transforms.clone(), Arc::clone(&state));
    (planner, state, transforms)
}

/// Vertex whose position matches `(x, y, z)` almost exactly.
pub fn vertex_at(map: &PointMap, x: f32, y: f32, z: f32) -> Vertex {
    let hits = map.nearby_indices(&Vector3::new(x, y, z), 0.05);
    assert!(!hits.is_empty(), "no vertex at ({}, {}, {})", x, y, z);
    hits[0].0
}
