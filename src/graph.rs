//! Neighborhood graph view over the point map.
//!
//! Edges are not materialized: each vertex enumerates its out-edges on
//! demand from a spatial query, filtered by traversability, height step
//! and segment clearance. Non-traversable vertices are effectively
//! isolated. Costs are Euclidean distance scaled by a terrain penalty of
//! the worse endpoint; rejected edges are simply not enumerated, so every
//! reported cost is finite and strictly positive.

use nalgebra::Vector3;
use std::cmp::Ordering;

use crate::config::{GraphConfig, TuningParams};
use crate::features::WORLD_UP;
use crate::map::PointMap;
use crate::point::{MapPoint, Vertex};

pub struct NeighborhoodGraph<'m> {
    map: &'m PointMap,
    radius: f32,
    knn: usize,
    tuning: TuningParams,
}

impl<'m> NeighborhoodGraph<'m> {
    pub fn new(map: &'m PointMap, graph: &GraphConfig, tuning: TuningParams) -> Self {
        Self {
            map,
            radius: graph.neighborhood_radius,
            knn: graph.neighborhood_knn,
            tuning,
        }
    }

    pub fn num_vertices(&self) -> usize {
        self.map.len()
    }

    /// Enumerate `(target, cost)` out-edges of `v`.
    pub fn out_edges(&self, v: Vertex) -> Vec<(Vertex, f32)> {
        let point = self.map.point(v);
        if !point.passable() {
            return Vec::new();
        }
        let p = point.position;

        let mut nbrs = self.map.nearby_indices(&p, self.radius);
        nbrs.retain(|(u, _)| *u != v);
        nbrs.sort_unstable_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));
        nbrs.truncate(self.knn);

        let mut edges = Vec::with_capacity(nbrs.len());
        for (u, _) in nbrs {
            let other = self.map.point(u);
            if !other.passable() {
                continue;
            }
            if (other.position.z - p.z).abs() > self.tuning.max_nn_height_diff {
                continue;
            }
            if !self.segment_clear(point, other) {
                continue;
            }
            edges.push((u, self.edge_cost(v, u)));
        }
        edges
    }

    /// Cost of an accepted edge: Euclidean distance scaled by the worse
    /// endpoint's terrain penalty.
    pub fn edge_cost(&self, v: Vertex, u: Vertex) -> f32 {
        let a = self.map.point(v);
        let b = self.map.point(u);
        let dist = (b.position - a.position).norm();
        dist * self.terrain_factor(a).max(self.terrain_factor(b))
    }

    /// Penalty multiplier >= 1, non-decreasing in surface roughness and
    /// obstacle proximity, finite for any accepted edge.
    fn terrain_factor(&self, point: &MapPoint) -> f32 {
        let mut factor = 1.0
            + point.ground_diff_std / self.tuning.max_ground_diff_std
            + point.mean_abs_ground_diff / self.tuning.max_mean_abs_ground_diff;
        if point.min_dist_to_obstacle.is_finite() {
            factor += self.tuning.min_dist_to_obstacle
                / point.min_dist_to_obstacle.max(self.tuning.min_dist_to_obstacle);
        }
        factor
    }

    /// Clearance band check at the segment midpoint, along the mean
    /// up-oriented endpoint normal.
    fn segment_clear(&self, a: &MapPoint, b: &MapPoint) -> bool {
        let mid = (a.position + b.position) * 0.5;
        let mut up = oriented(a.normal) + oriented(b.normal);
        if up.norm() < 1e-6 || !up.iter().all(|c| c.is_finite()) {
            up = WORLD_UP;
        } else {
            up.normalize_mut();
        }

        let reach = (self.tuning.clearance_radius * self.tuning.clearance_radius
            + self.tuning.clearance_high * self.tuning.clearance_high)
            .sqrt();
        let mut blocking = 0;
        for (w, _) in self.map.nearby_indices(&mid, reach) {
            let d = self.map.position(w) - mid;
            let h = up.dot(&d);
            if h < self.tuning.clearance_low || h > self.tuning.clearance_high {
                continue;
            }
            if (d - h * up).norm() > self.tuning.clearance_radius {
                continue;
            }
            blocking += 1;
            if blocking >= self.tuning.min_points_obstacle {
                return false;
            }
        }
        true
    }
}

fn oriented(normal: Vector3<f32>) -> Vector3<f32> {
    if normal.dot(&WORLD_UP) < 0.0 {
        -normal
    } else {
        normal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DishaConfig;
    use crate::features::FeatureEngine;
    use crate::point::PointFlags;

    fn flat_grid(config: &DishaConfig, nx: usize, ny: usize, spacing: f32) -> PointMap {
        let mut map = PointMap::new(&config.ingestion, &config.graph);
        let mut positions = Vec::new();
        for iy in 0..ny {
            for ix in 0..nx {
                positions.push(Vector3::new(ix as f32 * spacing, iy as f32 * spacing, 0.0));
            }
        }
        let normals = vec![Vector3::z(); positions.len()];
        map.merge(&positions, &normals, Vector3::new(0.0, 0.0, 10.0));
        let engine = FeatureEngine::new(config);
        engine.refresh(&mut map);
        map
    }

    fn test_config() -> DishaConfig {
        let mut config = DishaConfig::default();
        config.ingestion.points_min_dist = 0.1;
        config
    }

    fn vertex_at(map: &PointMap, x: f32, y: f32) -> Vertex {
        map.nearby_indices(&Vector3::new(x, y, 0.0), 0.05)[0].0
    }

    #[test]
    fn test_flat_grid_adjacency_and_costs() {
        let config = test_config();
        let map = flat_grid(&config, 5, 5, 0.3);
        let graph = NeighborhoodGraph::new(&map, &config.graph, config.tuning);

        assert_eq!(graph.num_vertices(), 25);
        let center = vertex_at(&map, 0.6, 0.6);
        let edges = graph.out_edges(center);
        // 4 orthogonal + 4 diagonal neighbors inside the 0.5 m ball.
        assert_eq!(edges.len(), 8);

        for (u, cost) in &edges {
            let dist = (map.position(*u) - map.position(center)).norm();
            // Clean flat terrain: penalty factor is exactly 1.
            assert!((cost - dist).abs() < 1e-5);
            assert!(*cost > 0.0 && cost.is_finite());
        }
    }

    #[test]
    fn test_non_traversable_vertex_is_isolated() {
        let config = test_config();
        let mut map = flat_grid(&config, 5, 5, 0.3);
        let center = vertex_at(&map, 0.6, 0.6);
        let point = map.point_mut(center);
        point.flags.remove(PointFlags::TRAVERSABLE);
        point.flags.remove(PointFlags::EDGE);

        let graph = NeighborhoodGraph::new(&map, &config.graph, config.tuning);
        assert!(graph.out_edges(center).is_empty());
        let side = vertex_at(&map, 0.3, 0.6);
        assert!(graph.out_edges(side).iter().all(|(u, _)| *u != center));
    }

    #[test]
    fn test_height_step_filters_edges() {
        let mut config = test_config();
        // Keep the stepped fixture traversable so only the height-step
        // filter is under test.
        config.tuning.max_mean_abs_ground_diff = 0.3;
        config.tuning.max_ground_diff_std = 0.3;
        let mut map = PointMap::new(&config.ingestion, &config.graph);
        // Two parallel rows, one raised above the step limit.
        let positions = vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(0.3, 0.0, 0.0),
            Vector3::new(0.0, 0.3, 0.2),
            Vector3::new(0.3, 0.3, 0.2),
        ];
        let normals = vec![Vector3::z(); positions.len()];
        map.merge(&positions, &normals, Vector3::new(0.0, 0.0, 10.0));
        FeatureEngine::new(&config).refresh(&mut map);

        let graph = NeighborhoodGraph::new(&map, &config.graph, config.tuning);
        let low = vertex_at(&map, 0.0, 0.0);
        let edges = graph.out_edges(low);
        // Only the same-level neighbor survives the 0.15 m height step.
        assert_eq!(edges.len(), 1);
        assert_eq!(map.position(edges[0].0).z, 0.0);
    }

    #[test]
    fn test_rough_terrain_costs_more() {
        let config = test_config();
        let mut map = flat_grid(&config, 5, 5, 0.3);
        let a = vertex_at(&map, 0.6, 0.6);
        let b = vertex_at(&map, 0.9, 0.6);
        // Inflate one endpoint's roughness below the traversability
        // limits; the edge survives but costs more.
        map.point_mut(b).ground_diff_std = 0.05;

        let graph = NeighborhoodGraph::new(&map, &config.graph, config.tuning);
        let edges = graph.out_edges(a);
        let (_, cost) = edges.iter().find(|(u, _)| *u == b).copied().unwrap();
        let dist = (map.position(b) - map.position(a)).norm();
        assert!(cost > dist * 1.4 && cost < dist * 1.6);
    }
}
