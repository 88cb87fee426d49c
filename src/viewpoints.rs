//! Viewpoint ledger: where each actor has been, projected onto the map.
//!
//! Periodically sampled actor poses are kept as compact position logs
//! for diagnostics, and each sample is projected onto nearby map points
//! as a visitation distance so the exploration reward can discount
//! already-seen terrain.

use nalgebra::Vector3;

use crate::cloud::{xyz_cloud, PointCloudMsg, Stamp};
use crate::map::PointMap;

pub struct ViewpointLedger {
    self_poses: Vec<Vector3<f32>>,
    other_poses: Vec<Vector3<f32>>,
    max_vp_distance: f32,
}

impl ViewpointLedger {
    pub fn new(max_vp_distance: f32) -> Self {
        Self {
            self_poses: Vec::new(),
            other_poses: Vec::new(),
            max_vp_distance,
        }
    }

    /// Record an own pose sample and project it onto nearby map points.
    pub fn record_self(&mut self, map: &mut PointMap, position: Vector3<f32>, stamp: Stamp) {
        self.self_poses.push(position);
        Self::project(map, position, stamp, self.max_vp_distance, true);
    }

    /// Record a teammate pose sample and project it onto nearby map
    /// points.
    pub fn record_other(&mut self, map: &mut PointMap, position: Vector3<f32>, stamp: Stamp) {
        self.other_poses.push(position);
        Self::project(map, position, stamp, self.max_vp_distance, false);
    }

    fn project(
        map: &mut PointMap,
        position: Vector3<f32>,
        stamp: Stamp,
        radius: f32,
        is_self: bool,
    ) {
        for (v, sq) in map.nearby_indices(&position, radius) {
            let d = sq.sqrt();
            let point = map.point_mut(v);
            if is_self {
                point.dist_to_actor = point.dist_to_actor.min(d);
                point.actor_last_visit = point.actor_last_visit.max(stamp);
            } else {
                point.dist_to_other_actors = point.dist_to_other_actors.min(d);
                point.other_actors_last_visit = point.other_actors_last_visit.max(stamp);
            }
        }
    }

    pub fn self_count(&self) -> usize {
        self.self_poses.len()
    }

    pub fn other_count(&self) -> usize {
        self.other_poses.len()
    }

    /// All own pose samples as a bare-position cloud.
    pub fn self_cloud(&self, frame_id: &str, stamp: Stamp) -> PointCloudMsg {
        xyz_cloud(frame_id, stamp, &self.self_poses)
    }

    /// All teammate pose samples as a bare-position cloud.
    pub fn other_cloud(&self, frame_id: &str, stamp: Stamp) -> PointCloudMsg {
        xyz_cloud(frame_id, stamp, &self.other_poses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DishaConfig;

    fn line_map(n: usize, spacing: f32) -> PointMap {
        let config = DishaConfig::default();
        let mut map = PointMap::new(&config.ingestion, &config.graph);
        let positions: Vec<_> = (0..n)
            .map(|i| Vector3::new(i as f32 * spacing, 0.0, 0.0))
            .collect();
        let normals = vec![Vector3::z(); n];
        map.merge(&positions, &normals, Vector3::new(0.0, 0.0, 10.0));
        map
    }

    #[test]
    fn test_projection_within_radius_only() {
        let mut map = line_map(10, 1.0);
        let mut ledger = ViewpointLedger::new(5.0);
        ledger.record_self(&mut map, Vector3::zeros(), 10.0);

        // Point at x = 3 is inside the 5 m radius.
        assert!((map.point(3).dist_to_actor - 3.0).abs() < 1e-5);
        assert_eq!(map.point(3).actor_last_visit, 10.0);
        // Point at x = 9 is outside and stays unseen.
        assert!(map.point(9).dist_to_actor.is_infinite());
        assert!(map.point(9).other_actors_last_visit.is_infinite());
    }

    #[test]
    fn test_minimum_distance_is_retained() {
        let mut map = line_map(10, 1.0);
        let mut ledger = ViewpointLedger::new(5.0);
        ledger.record_self(&mut map, Vector3::new(4.0, 0.0, 0.0), 1.0);
        assert!((map.point(2).dist_to_actor - 2.0).abs() < 1e-5);

        // A later, farther sample must not grow the stored distance but
        // must advance the visit time.
        ledger.record_self(&mut map, Vector3::new(5.0, 0.0, 0.0), 2.0);
        assert!((map.point(2).dist_to_actor - 2.0).abs() < 1e-5);
        assert_eq!(map.point(2).actor_last_visit, 2.0);
    }

    #[test]
    fn test_self_and_other_are_separate() {
        let mut map = line_map(5, 1.0);
        let mut ledger = ViewpointLedger::new(5.0);
        ledger.record_self(&mut map, Vector3::zeros(), 1.0);
        ledger.record_other(&mut map, Vector3::new(4.0, 0.0, 0.0), 2.0);

        let p = map.point(1);
        assert!((p.dist_to_actor - 1.0).abs() < 1e-5);
        assert!((p.dist_to_other_actors - 3.0).abs() < 1e-5);

        assert_eq!(ledger.self_count(), 1);
        assert_eq!(ledger.other_count(), 1);
        assert_eq!(ledger.self_cloud("map", 0.0).len(), 1);
        assert_eq!(ledger.other_cloud("map", 0.0).len(), 1);
    }
}
