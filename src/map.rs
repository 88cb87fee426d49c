//! Incremental point map: append-only store, spatial index and dirty set.
//!
//! Point indices are stable for the lifetime of the map; they double as
//! graph vertex ids. Points are never deleted, merge-time deduplication
//! keeps at most one point per `points_min_dist` ball, and any event that
//! changes a point's neighborhood marks the neighborhood dirty for the
//! feature engine.

use nalgebra::Vector3;
use std::collections::BTreeSet;

use crate::cloud::{PointCloudMsg, Stamp};
use crate::config::{GraphConfig, IngestionConfig};
use crate::point::{MapPoint, PointFlags, Vertex};
use crate::spatial::SpatialIndex;

/// Outcome of a cloud merge.
#[derive(Clone, Copy, Debug, Default)]
pub struct MergeStats {
    /// New points inserted.
    pub added: usize,
    /// Candidates dropped by the deduplication radius.
    pub dropped: usize,
    /// Points marked dirty (new and affected neighbors).
    pub dirtied: usize,
}

pub struct PointMap {
    points: Vec<MapPoint>,
    index: SpatialIndex,
    dirty: BTreeSet<Vertex>,
    points_min_dist: f32,
    neighborhood_radius: f32,
    min_empty_cos: f32,
    empty_ratio: u32,
}

impl PointMap {
    pub fn new(ingestion: &IngestionConfig, graph: &GraphConfig) -> Self {
        Self {
            points: Vec::new(),
            index: SpatialIndex::new(),
            dirty: BTreeSet::new(),
            points_min_dist: ingestion.points_min_dist,
            neighborhood_radius: graph.neighborhood_radius,
            min_empty_cos: ingestion.min_empty_cos,
            empty_ratio: ingestion.empty_ratio,
        }
    }

    pub fn len(&self) -> usize {
        debug_assert_eq!(self.points.len(), self.index.len());
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn point(&self, v: Vertex) -> &MapPoint {
        &self.points[v as usize]
    }

    pub fn point_mut(&mut self, v: Vertex) -> &mut MapPoint {
        &mut self.points[v as usize]
    }

    pub fn points(&self) -> &[MapPoint] {
        &self.points
    }

    pub fn position(&self, v: Vertex) -> Vector3<f32> {
        self.points[v as usize].position
    }

    /// Indices within `radius` of `p`, unsorted, with squared distances.
    pub fn nearby_indices(&self, p: &Vector3<f32>, radius: f32) -> Vec<(Vertex, f32)> {
        self.index.radius(p, radius)
    }

    /// The `k` nearest indices to `p`, closest first, squared distances.
    pub fn knn_indices(&self, p: &Vector3<f32>, k: usize) -> Vec<(Vertex, f32)> {
        self.index.knn(p, k)
    }

    /// Merge a batch of candidate points observed from `origin`.
    ///
    /// A candidate within `points_min_dist` of a live point re-observes
    /// that point instead of being inserted. An inserted point and every
    /// live point within `2 * neighborhood_radius` of it are marked
    /// dirty; points between the sensor and a new sample collect an
    /// empty-space observation.
    pub fn merge(
        &mut self,
        positions: &[Vector3<f32>],
        normals: &[Vector3<f32>],
        origin: Vector3<f32>,
    ) -> MergeStats {
        debug_assert_eq!(positions.len(), normals.len());
        let dirty_before = self.dirty.len();
        let mut stats = MergeStats::default();
        let min_sq = self.points_min_dist * self.points_min_dist;

        for (p, n) in positions.iter().zip(normals) {
            if let Some((nearest, sq)) = self.index.nearest(p) {
                if sq < min_sq {
                    let hit = &mut self.points[nearest as usize];
                    hit.num_occupied = hit.num_occupied.saturating_add(1);
                    Self::update_empty_flag(hit, self.empty_ratio);
                    stats.dropped += 1;
                    continue;
                }
            }

            let v = self.points.len() as Vertex;
            let affected = self.index.radius(p, 2.0 * self.neighborhood_radius);
            self.points.push(MapPoint::new(*p, *n));
            self.index.add(v, p);
            self.dirty.insert(v);

            let ray = p - origin;
            let ray_len = ray.norm();
            for (u, _) in affected {
                self.dirty.insert(u);
                self.points[u as usize].flags.insert(PointFlags::DIRTY);
                self.observe_through(u, &origin, &ray, ray_len);
            }
            stats.added += 1;
        }

        stats.dirtied = self.dirty.len() - dirty_before;
        stats
    }

    /// Empty-space contribution: a live point strictly between the
    /// sensor and a new sample, within the `min_empty_cos` cone and with
    /// the measurement ray passing within the dedup radius of it, was
    /// seen through.
    fn observe_through(
        &mut self,
        u: Vertex,
        origin: &Vector3<f32>,
        ray: &Vector3<f32>,
        ray_len: f32,
    ) {
        if ray_len <= self.points_min_dist {
            return;
        }
        let to_point = self.points[u as usize].position - origin;
        let dist = to_point.norm();
        if dist + self.points_min_dist >= ray_len || dist <= 0.0 {
            return;
        }
        let cos = to_point.dot(ray) / (dist * ray_len);
        if cos < self.min_empty_cos {
            return;
        }
        let along = to_point.dot(ray) / ray_len;
        let perp = (to_point - (along / ray_len) * ray).norm();
        if perp <= self.points_min_dist {
            let point = &mut self.points[u as usize];
            point.num_empty = point.num_empty.saturating_add(1);
            Self::update_empty_flag(point, self.empty_ratio);
        }
    }

    fn update_empty_flag(point: &mut MapPoint, empty_ratio: u32) {
        let empty = point.num_empty >= empty_ratio * point.num_occupied.max(1);
        point.flags.set(PointFlags::EMPTY, empty);
    }

    pub fn mark_dirty(&mut self, v: Vertex) {
        self.points[v as usize].flags.insert(PointFlags::DIRTY);
        self.dirty.insert(v);
    }

    /// Snapshot of the dirty set, in index order.
    pub fn dirty_indices(&self) -> Vec<Vertex> {
        self.dirty.iter().copied().collect()
    }

    pub fn dirty_len(&self) -> usize {
        self.dirty.len()
    }

    /// Drop the dirty set. The feature engine calls this after all
    /// features of the dirty points are committed.
    pub fn clear_dirty(&mut self) {
        for v in std::mem::take(&mut self.dirty) {
            self.points[v as usize].flags.remove(PointFlags::DIRTY);
        }
    }

    /// Write back the per-vertex planning fields of the last plan for
    /// observers. Slices may be shorter than the map when the map grew
    /// after the planning snapshot was taken.
    pub fn apply_plan_fields(&mut self, path_cost: &[f32], reward: &[f32], relative_cost: &[f32]) {
        let n = path_cost.len().min(self.points.len());
        for v in 0..n {
            let point = &mut self.points[v];
            point.path_cost = path_cost[v];
            point.reward = reward[v];
            point.relative_cost = relative_cost[v];
        }
    }

    /// Serialize the whole map (positions, normals, flags).
    pub fn create_cloud(&self, frame_id: &str, stamp: Stamp) -> PointCloudMsg {
        let all: Vec<Vertex> = (0..self.points.len() as Vertex).collect();
        self.basic_cloud(frame_id, stamp, &all)
    }

    /// Serialize only the currently-dirty points.
    pub fn create_dirty_cloud(&self, frame_id: &str, stamp: Stamp) -> PointCloudMsg {
        let dirty = self.dirty_indices();
        self.basic_cloud(frame_id, stamp, &dirty)
    }

    fn basic_cloud(&self, frame_id: &str, stamp: Stamp, indices: &[Vertex]) -> PointCloudMsg {
        let mut builder = PointCloudMsg::builder(frame_id, stamp)
            .position_fields()
            .normal_fields()
            .field("flags");
        for &v in indices {
            let p = &self.points[v as usize];
            builder.row(&[
                p.position.x,
                p.position.y,
                p.position.z,
                p.normal.x,
                p.normal.y,
                p.normal.z,
                p.flags.bits() as f32,
            ]);
        }
        builder.finish()
    }

    /// Serialize selected points with all derived feature and planning
    /// fields, for diagnostics.
    pub fn create_debug_cloud(
        &self,
        frame_id: &str,
        stamp: Stamp,
        indices: &[Vertex],
    ) -> PointCloudMsg {
        let mut builder = PointCloudMsg::builder(frame_id, stamp)
            .position_fields()
            .normal_fields()
            .field("num_normal_pts")
            .field("ground_diff_min")
            .field("ground_diff_max")
            .field("ground_diff_std")
            .field("ground_abs_diff_mean")
            .field("num_obstacle_pts")
            .field("min_dist_to_obstacle")
            .field("num_edge_neighbors")
            .field("path_cost")
            .field("reward")
            .field("relative_cost")
            .field("flags");
        for &v in indices {
            let p = &self.points[v as usize];
            builder.row(&[
                p.position.x,
                p.position.y,
                p.position.z,
                p.normal.x,
                p.normal.y,
                p.normal.z,
                p.num_normal_pts as f32,
                p.ground_diff_min,
                p.ground_diff_max,
                p.ground_diff_std,
                p.mean_abs_ground_diff,
                p.num_obstacle_pts as f32,
                p.min_dist_to_obstacle,
                p.num_edge_neighbors as f32,
                p.path_cost,
                p.reward,
                p.relative_cost,
                p.flags.bits() as f32,
            ]);
        }
        builder.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DishaConfig;

    fn test_map() -> PointMap {
        let config = DishaConfig::default();
        PointMap::new(&config.ingestion, &config.graph)
    }

    fn up(n: usize) -> Vec<Vector3<f32>> {
        vec![Vector3::z(); n]
    }

    #[test]
    fn test_merge_inserts_and_marks_dirty() {
        let mut map = test_map();
        let positions = vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(0.4, 0.0, 0.0),
            Vector3::new(0.8, 0.0, 0.0),
        ];
        let stats = map.merge(&positions, &up(3), Vector3::new(0.0, 0.0, 5.0));
        assert_eq!(stats.added, 3);
        assert_eq!(stats.dropped, 0);
        assert_eq!(map.len(), 3);
        assert_eq!(map.dirty_len(), 3);
        for v in 0..3 {
            assert!(map.point(v).flags.contains(PointFlags::DIRTY));
        }
    }

    #[test]
    fn test_merge_deduplicates_within_min_dist() {
        let mut map = test_map();
        let origin = Vector3::new(0.0, 0.0, 5.0);
        map.merge(&[Vector3::zeros()], &up(1), origin);
        assert_eq!(map.len(), 1);

        // Candidate within points_min_dist (0.2 default) is dropped and
        // re-observes the existing point.
        let stats = map.merge(&[Vector3::new(0.1, 0.0, 0.0)], &up(1), origin);
        assert_eq!(stats.added, 0);
        assert_eq!(stats.dropped, 1);
        assert_eq!(map.len(), 1);
        assert_eq!(map.point(0).num_occupied, 2);
    }

    #[test]
    fn test_remerge_is_idempotent() {
        let mut map = test_map();
        let origin = Vector3::new(0.0, 0.0, 5.0);
        let positions: Vec<_> = (0..5)
            .map(|i| Vector3::new(i as f32 * 0.4, 0.0, 0.0))
            .collect();

        map.merge(&positions, &up(5), origin);
        let len_once = map.len();
        map.merge(&positions, &up(5), origin);
        assert_eq!(map.len(), len_once);
    }

    #[test]
    fn test_no_two_points_within_min_dist() {
        let mut map = test_map();
        // A jittered cluster collapses to well-separated survivors.
        let positions: Vec<_> = (0..50)
            .map(|i| Vector3::new((i as f32) * 0.07, 0.0, 0.0))
            .collect();
        map.merge(&positions, &up(50), Vector3::new(0.0, 0.0, 5.0));

        for v in 0..map.len() as Vertex {
            let hits = map.nearby_indices(&map.position(v), 0.19);
            let close: Vec<_> = hits.iter().filter(|(u, _)| *u != v).collect();
            assert!(
                close.is_empty(),
                "point {} has neighbors within points_min_dist",
                v
            );
        }
    }

    #[test]
    fn test_neighbor_addition_dirties_existing() {
        let mut map = test_map();
        let origin = Vector3::new(0.0, 0.0, 5.0);
        map.merge(&[Vector3::zeros()], &up(1), origin);
        map.clear_dirty();
        assert_eq!(map.dirty_len(), 0);
        assert!(!map.point(0).flags.contains(PointFlags::DIRTY));

        // New point inside 2 * neighborhood_radius re-dirties the old one.
        map.merge(&[Vector3::new(0.6, 0.0, 0.0)], &up(1), origin);
        assert!(map.point(0).flags.contains(PointFlags::DIRTY));
        assert_eq!(map.dirty_len(), 2);
    }

    #[test]
    fn test_seen_through_point_collects_empty() {
        let mut map = test_map();
        let origin = Vector3::zeros();
        // A stray point near the ray to a farther sample.
        map.merge(&[Vector3::new(1.0, 0.0, 0.0)], &up(1), origin);
        map.clear_dirty();

        let stats = map.merge(&[Vector3::new(1.8, 0.0, 0.0)], &up(1), origin);
        assert_eq!(stats.added, 1);
        assert_eq!(map.point(0).num_empty, 1);

        // Ratio 2 not reached yet with one occupied observation.
        assert!(!map.point(0).flags.contains(PointFlags::EMPTY));
        map.merge(&[Vector3::new(1.95, 0.3, 0.0)], &up(1), origin);
        assert_eq!(map.point(0).num_empty, 2);
        assert!(map.point(0).flags.contains(PointFlags::EMPTY));
    }

    #[test]
    fn test_cloud_exports() {
        let mut map = test_map();
        let positions: Vec<_> = (0..4)
            .map(|i| Vector3::new(i as f32 * 0.4, 0.0, 0.0))
            .collect();
        map.merge(&positions, &up(4), Vector3::new(0.0, 0.0, 5.0));

        let dirty_cloud = map.create_dirty_cloud("map", 1.0);
        assert_eq!(dirty_cloud.len(), 4);
        map.clear_dirty();
        assert_eq!(map.create_dirty_cloud("map", 2.0).len(), 0);

        let full = map.create_cloud("map", 3.0);
        assert_eq!(full.len(), 4);
        full.validate().unwrap();

        let debug = map.create_debug_cloud("map", 4.0, &[0, 2]);
        assert_eq!(debug.len(), 2);
        assert!(debug.field("relative_cost").is_some());
    }
}
