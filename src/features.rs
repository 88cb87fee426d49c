//! Per-point feature computation and traversability labeling.
//!
//! Consumes the map's dirty set and recomputes, for each dirty point:
//! the PCA surface normal, ground height-difference statistics, clearance
//! counts in the band above local ground, the frontier indicator, and the
//! final label flags. Recomputation depends only on point positions and
//! is therefore idempotent and order-independent.

use nalgebra::{Matrix3, Vector3};
use std::cmp::Ordering;
use tracing::debug;

use crate::config::{DishaConfig, TuningParams};
use crate::map::PointMap;
use crate::point::{PointFlags, Vertex};

/// World-up direction the map frame is assumed to share.
pub const WORLD_UP: Vector3<f32> = Vector3::new(0.0, 0.0, 1.0);

/// Recomputes features and labels for dirty map points.
pub struct FeatureEngine {
    neighborhood_radius: f32,
    neighborhood_knn: usize,
    min_normal_pts: usize,
    normal_radius: f32,
    max_pitch: f32,
    max_roll: f32,
    points_min_dist: f32,
    tuning: TuningParams,
}

impl FeatureEngine {
    pub fn new(config: &DishaConfig) -> Self {
        Self {
            neighborhood_radius: config.graph.neighborhood_radius,
            neighborhood_knn: config.graph.neighborhood_knn,
            min_normal_pts: config.graph.min_normal_pts,
            normal_radius: config.graph.normal_radius,
            max_pitch: config.graph.max_pitch(),
            max_roll: config.graph.max_roll(),
            points_min_dist: config.ingestion.points_min_dist,
            tuning: config.tuning,
        }
    }

    /// Swap in updated tuning parameters; takes effect on the next
    /// refresh.
    pub fn set_tuning(&mut self, tuning: TuningParams) {
        self.tuning = tuning;
    }

    /// Recompute all dirty points, clear the dirty set, and return the
    /// refreshed indices.
    pub fn refresh(&self, map: &mut PointMap) -> Vec<Vertex> {
        let dirty = map.dirty_indices();
        for &v in &dirty {
            self.refresh_point(map, v);
        }
        map.clear_dirty();
        if !dirty.is_empty() {
            debug!("Recomputed features for {} dirty points", dirty.len());
        }
        dirty
    }

    fn refresh_point(&self, map: &mut PointMap, v: Vertex) {
        let p = map.position(v);

        // Neighborhood: radius ball around the point, capped at the
        // nearest `neighborhood_knn`, the point itself excluded.
        let mut nbrs = map.nearby_indices(&p, self.neighborhood_radius);
        nbrs.retain(|(u, _)| *u != v);
        nbrs.sort_unstable_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));
        nbrs.truncate(self.neighborhood_knn);
        let nbr_pos: Vec<Vector3<f32>> = nbrs.iter().map(|(u, _)| map.position(*u)).collect();

        // Normal. PCA over the normal-fitting ball when populated
        // enough, otherwise the measured sensor normal is kept.
        let normal_hits = map.nearby_indices(&p, self.normal_radius);
        let (normal, num_normal_pts) = if normal_hits.len() >= self.min_normal_pts {
            match fit_plane_normal(normal_hits.iter().map(|(u, _)| map.position(*u))) {
                Some(n) => (n, normal_hits.len() as u32),
                None => (Vector3::zeros(), normal_hits.len() as u32),
            }
        } else {
            (map.point(v).normal, 0)
        };
        let normal_ok = normal.iter().all(|c| c.is_finite()) && (normal.norm() - 1.0).abs() < 1e-3;

        // Orient along world-up so height differences read as "above
        // ground".
        let up_normal = if normal_ok {
            if normal.dot(&WORLD_UP) < 0.0 {
                -normal
            } else {
                normal
            }
        } else {
            WORLD_UP
        };

        // Ground height differences of the neighbors, along the normal.
        let mut ground_diff_min = 0.0f32;
        let mut ground_diff_max = 0.0f32;
        let mut ground_diff_std = 0.0f32;
        let mut mean_abs_ground_diff = 0.0f32;
        if !nbr_pos.is_empty() {
            let heights: Vec<f32> = nbr_pos.iter().map(|q| up_normal.dot(&(q - p))).collect();
            ground_diff_min = heights.iter().copied().fold(f32::INFINITY, f32::min);
            ground_diff_max = heights.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            let n = heights.len() as f32;
            let mean = heights.iter().sum::<f32>() / n;
            ground_diff_std = (heights.iter().map(|h| (h - mean) * (h - mean)).sum::<f32>() / n)
                .sqrt();
            mean_abs_ground_diff = heights.iter().map(|h| h.abs()).sum::<f32>() / n;
        }

        // Clearance: points in the band above local ground, inside a
        // cylinder around the normal axis. The query ball covers the
        // whole cylinder.
        let clearance_reach = (self.tuning.clearance_radius * self.tuning.clearance_radius
            + self.tuning.clearance_high * self.tuning.clearance_high)
            .sqrt();
        let mut num_obstacle_pts = 0u32;
        let mut min_dist_to_obstacle = f32::INFINITY;
        for (u, sq) in map.nearby_indices(&p, clearance_reach) {
            if u == v {
                continue;
            }
            let d = map.position(u) - p;
            let h = up_normal.dot(&d);
            if h < self.tuning.clearance_low || h > self.tuning.clearance_high {
                continue;
            }
            let radial = (d - h * up_normal).norm();
            if radial > self.tuning.clearance_radius {
                continue;
            }
            num_obstacle_pts += 1;
            min_dist_to_obstacle = min_dist_to_obstacle.min(sq.sqrt());
        }

        // Frontier indicator: neighbors whose mirror image across the
        // point is not populated. A one-sided neighborhood means the
        // point sits at the boundary of the observed region.
        let mut num_edge_neighbors = 0u32;
        for (i, q) in nbr_pos.iter().enumerate() {
            let dist = nbrs[i].1.sqrt();
            let mirror = 2.0 * p - q;
            let tol = (self.tuning.edge_min_centroid_offset * dist).max(self.points_min_dist);
            if map.nearby_indices(&mirror, tol).is_empty() {
                num_edge_neighbors += 1;
            }
        }

        // Labels. EMPTY stays a standalone annotation and does not feed
        // the traversability predicate.
        let (pitch, roll) = pitch_roll(&up_normal);
        let obstacle = num_obstacle_pts >= self.tuning.min_points_obstacle;
        let traversable = normal_ok
            && pitch <= self.max_pitch
            && roll <= self.max_roll
            && ground_diff_std <= self.tuning.max_ground_diff_std
            && mean_abs_ground_diff <= self.tuning.max_mean_abs_ground_diff
            && !obstacle
            && min_dist_to_obstacle >= self.tuning.min_dist_to_obstacle;
        let edge = traversable && num_edge_neighbors >= 1;

        let point = map.point_mut(v);
        if normal_ok {
            point.normal = normal;
        }
        point.num_normal_pts = num_normal_pts;
        point.ground_diff_min = ground_diff_min;
        point.ground_diff_max = ground_diff_max;
        point.ground_diff_std = ground_diff_std;
        point.mean_abs_ground_diff = mean_abs_ground_diff;
        point.num_obstacle_pts = num_obstacle_pts;
        point.min_dist_to_obstacle = min_dist_to_obstacle;
        point.num_edge_neighbors = num_edge_neighbors;
        point.flags.set(PointFlags::NORMAL_OK, normal_ok);
        point.flags.set(PointFlags::TRAVERSABLE, traversable);
        point.flags.set(PointFlags::EDGE, edge);
        point.flags.set(PointFlags::OBSTACLE, obstacle);
    }
}

/// Smallest-eigenvector plane normal of a neighborhood.
///
/// Returns `None` when the covariance is degenerate (coincident or
/// collinear samples) and the direction would be arbitrary.
fn fit_plane_normal(positions: impl Iterator<Item = Vector3<f32>>) -> Option<Vector3<f32>> {
    let mut centroid = Vector3::zeros();
    let mut samples: Vec<Vector3<f32>> = Vec::new();
    for q in positions {
        centroid += q;
        samples.push(q);
    }
    if samples.is_empty() {
        return None;
    }
    centroid /= samples.len() as f32;

    let mut cov = Matrix3::zeros();
    for q in &samples {
        let d = q - centroid;
        cov += d * d.transpose();
    }
    cov /= samples.len() as f32;

    let eigen = cov.symmetric_eigen();
    let mut order = [0usize, 1, 2];
    order.sort_unstable_by(|&a, &b| {
        eigen.eigenvalues[a]
            .partial_cmp(&eigen.eigenvalues[b])
            .unwrap_or(Ordering::Equal)
    });
    let smallest = eigen.eigenvalues[order[0]];
    let mid = eigen.eigenvalues[order[1]];
    if !smallest.is_finite() || !mid.is_finite() || mid <= 1e-9 {
        return None;
    }
    let normal = eigen.eigenvectors.column(order[0]).into_owned();
    let norm = normal.norm();
    if !norm.is_finite() || norm <= 1e-6 {
        return None;
    }
    Some(normal / norm)
}

/// Pitch and roll of a surface with the given up-oriented normal.
fn pitch_roll(normal: &Vector3<f32>) -> (f32, f32) {
    let nz = normal.z.abs().max(1e-9);
    (normal.x.abs().atan2(nz), normal.y.abs().atan2(nz))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DishaConfig;

    /// Flat grid of `nx * ny` points at `spacing`, sensor normals up.
    fn grid_map(config: &DishaConfig, nx: usize, ny: usize, spacing: f32) -> PointMap {
        let mut map = PointMap::new(&config.ingestion, &config.graph);
        let mut positions = Vec::new();
        for iy in 0..ny {
            for ix in 0..nx {
                positions.push(Vector3::new(ix as f32 * spacing, iy as f32 * spacing, 0.0));
            }
        }
        let normals = vec![Vector3::z(); positions.len()];
        map.merge(&positions, &normals, Vector3::new(0.0, 0.0, 10.0));
        map
    }

    fn small_map_config() -> DishaConfig {
        let mut config = DishaConfig::default();
        config.ingestion.points_min_dist = 0.1;
        config
    }

    #[test]
    fn test_flat_grid_is_traversable() {
        let config = small_map_config();
        let engine = FeatureEngine::new(&config);
        let mut map = grid_map(&config, 5, 5, 0.3);
        let refreshed = engine.refresh(&mut map);
        assert_eq!(refreshed.len(), 25);
        assert_eq!(map.dirty_len(), 0);

        for v in 0..map.len() as Vertex {
            let p = map.point(v);
            assert!(p.flags.contains(PointFlags::NORMAL_OK), "point {}", v);
            assert!(p.flags.contains(PointFlags::TRAVERSABLE), "point {}", v);
            assert!(p.ground_diff_std <= 1e-4);
            assert!(p.num_obstacle_pts == 0);
            assert!(!p.flags.contains(PointFlags::DIRTY));
        }
    }

    #[test]
    fn test_interior_vs_boundary_edges() {
        let config = small_map_config();
        let engine = FeatureEngine::new(&config);
        let mut map = grid_map(&config, 7, 7, 0.3);
        engine.refresh(&mut map);

        // Interior point: symmetric neighborhood, no missing mirrors.
        let center = map
            .nearby_indices(&Vector3::new(0.9, 0.9, 0.0), 0.05)[0]
            .0;
        assert_eq!(map.point(center).num_edge_neighbors, 0);
        assert!(!map.point(center).flags.contains(PointFlags::EDGE));

        // Corner point: one-sided neighborhood.
        let corner = map.nearby_indices(&Vector3::zeros(), 0.05)[0].0;
        assert!(map.point(corner).num_edge_neighbors >= 1);
        assert!(map.point(corner).flags.contains(PointFlags::EDGE));

        // Boundary-side point: inward neighbors have no mirrors.
        let side = map
            .nearby_indices(&Vector3::new(0.9, 0.0, 0.0), 0.05)[0]
            .0;
        assert!(map.point(side).num_edge_neighbors >= 1);
        assert!(map.point(side).flags.contains(PointFlags::EDGE));
    }

    #[test]
    fn test_pca_normal_on_dense_plane() {
        let mut config = small_map_config();
        config.graph.min_normal_pts = 5;
        let engine = FeatureEngine::new(&config);
        // Dense plane tilted measurement normals: PCA must override them.
        let mut map = PointMap::new(&config.ingestion, &config.graph);
        let mut positions = Vec::new();
        for iy in 0..5 {
            for ix in 0..5 {
                positions.push(Vector3::new(ix as f32 * 0.2, iy as f32 * 0.2, 0.0));
            }
        }
        let skewed = vec![Vector3::x(); positions.len()];
        map.merge(&positions, &skewed, Vector3::new(0.0, 0.0, 10.0));
        engine.refresh(&mut map);

        let center = map.nearby_indices(&Vector3::new(0.4, 0.4, 0.0), 0.05)[0].0;
        let p = map.point(center);
        assert!(p.num_normal_pts >= 5);
        assert!(p.flags.contains(PointFlags::NORMAL_OK));
        assert!(p.normal.z.abs() > 0.99, "normal = {:?}", p.normal);
    }

    #[test]
    fn test_collinear_points_have_no_normal() {
        let mut config = small_map_config();
        config.graph.min_normal_pts = 3;
        let engine = FeatureEngine::new(&config);
        let mut map = PointMap::new(&config.ingestion, &config.graph);
        let positions: Vec<_> = (0..5)
            .map(|i| Vector3::new(i as f32 * 0.12, 0.0, 0.0))
            .collect();
        // Non-finite measured normals so only PCA could set NORMAL_OK.
        let normals = vec![Vector3::new(f32::NAN, f32::NAN, f32::NAN); 5];
        map.merge(&positions, &normals, Vector3::new(0.0, 0.0, 10.0));
        engine.refresh(&mut map);

        for v in 0..map.len() as Vertex {
            assert!(!map.point(v).flags.contains(PointFlags::NORMAL_OK));
            assert!(!map.point(v).flags.contains(PointFlags::TRAVERSABLE));
        }
    }

    #[test]
    fn test_obstacle_column_blocks_ground() {
        let config = small_map_config();
        let engine = FeatureEngine::new(&config);
        let mut map = grid_map(&config, 7, 7, 0.3);

        // Vertical stack above the grid point at (0.9, 0.9).
        let column: Vec<_> = (0..5)
            .map(|i| Vector3::new(0.9, 0.9, 0.2 + i as f32 * 0.15))
            .collect();
        let normals = vec![Vector3::z(); column.len()];
        map.merge(&column, &normals, Vector3::new(0.9, 0.9, 10.0));
        engine.refresh(&mut map);

        let under = map.nearby_indices(&Vector3::new(0.9, 0.9, 0.0), 0.05)[0].0;
        let p = map.point(under);
        assert!(p.num_obstacle_pts >= 3);
        assert!(p.flags.contains(PointFlags::OBSTACLE));
        assert!(!p.flags.contains(PointFlags::TRAVERSABLE));

        // Far corner keeps its clearance.
        let corner = map.nearby_indices(&Vector3::new(1.8, 1.8, 0.0), 0.05)[0].0;
        assert!(map.point(corner).flags.contains(PointFlags::TRAVERSABLE));
    }

    #[test]
    fn test_steep_slope_is_not_traversable() {
        let config = small_map_config();
        let engine = FeatureEngine::new(&config);
        let mut map = PointMap::new(&config.ingestion, &config.graph);
        // 45 degree ramp: measured normals match the surface.
        let normal = Vector3::new(-1.0, 0.0, 1.0).normalize();
        let mut positions = Vec::new();
        for iy in 0..3 {
            for ix in 0..3 {
                let x = ix as f32 * 0.3;
                positions.push(Vector3::new(x, iy as f32 * 0.3, x));
            }
        }
        let normals = vec![normal; positions.len()];
        map.merge(&positions, &normals, Vector3::new(0.0, 0.0, 10.0));
        engine.refresh(&mut map);

        for v in 0..map.len() as Vertex {
            assert!(
                !map.point(v).flags.contains(PointFlags::TRAVERSABLE),
                "steep point {} must not be traversable",
                v
            );
        }
    }

    #[test]
    fn test_refresh_is_idempotent() {
        let config = small_map_config();
        let engine = FeatureEngine::new(&config);
        let mut map = grid_map(&config, 5, 5, 0.3);
        engine.refresh(&mut map);

        let before: Vec<_> = map
            .points()
            .iter()
            .map(|p| {
                (
                    p.normal,
                    p.ground_diff_std,
                    p.num_obstacle_pts,
                    p.num_edge_neighbors,
                    p.flags,
                )
            })
            .collect();

        // Re-dirty everything and run again: nothing may change.
        for v in 0..map.len() as Vertex {
            map.mark_dirty(v);
        }
        engine.refresh(&mut map);

        let after: Vec<_> = map
            .points()
            .iter()
            .map(|p| {
                (
                    p.normal,
                    p.ground_diff_std,
                    p.num_obstacle_pts,
                    p.num_edge_neighbors,
                    p.flags,
                )
            })
            .collect();
        assert_eq!(before.len(), after.len());
        for (b, a) in before.iter().zip(&after) {
            assert_eq!(b, a);
        }
    }
}
