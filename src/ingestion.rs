//! Cloud ingestion: validation, frame change, filtering and merge.
//!
//! Each inbound cloud is checked for age, layout and required fields,
//! transformed into the map frame with a bounded wait, gated by sensor
//! range (and optionally by teammate proximity), merged into the point
//! map, and the resulting dirty set is recomputed. Failures are returned
//! to the calling thread, which absorbs them with a warning; they never
//! reach a plan caller.

use nalgebra::{Point3, Vector3};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::cloud::{PointCloudMsg, Stamp};
use crate::config::DishaConfig;
use crate::error::{DishaError, Result};
use crate::features::FeatureEngine;
use crate::map::MergeStats;
use crate::point::Vertex;
use crate::shared::{SharedMap, SharedState, SharedTransforms};

/// Budget for the cloud transform wait, measured from the cloud stamp.
const TRANSFORM_BUDGET: f32 = 5.0;

/// Bounded wait for teammate poses when filtering robot returns.
const ROBOT_TRANSFORM_BUDGET: Duration = Duration::from_secs(3);

/// Result of one ingested cloud.
pub struct IngestSummary {
    pub stats: MergeStats,
    /// Indices whose features were recomputed, for observer clouds.
    pub refreshed: Vec<Vertex>,
}

pub struct CloudPipeline {
    position_name: String,
    normal_name: String,
    map_frame: String,
    other_frames: Vec<String>,
    max_cloud_age: f32,
    min_range: f32,
    max_range: f32,
    filter_robots: bool,
    robot_filter_radius: f32,
    min_merge_points: usize,
    map: SharedMap,
    transforms: SharedTransforms,
    state: Arc<SharedState>,
    engine: FeatureEngine,
}

impl CloudPipeline {
    pub fn new(
        config: &DishaConfig,
        map: SharedMap,
        transforms: SharedTransforms,
        state: Arc<SharedState>,
    ) -> Self {
        Self {
            position_name: config.frames.position_name.clone(),
            normal_name: config.frames.normal_name.clone(),
            map_frame: config.frames.map_frame.clone(),
            other_frames: config.other_robot_frames(),
            max_cloud_age: config.ingestion.max_cloud_age_secs,
            min_range: config.ingestion.min_range,
            max_range: config.ingestion.max_range,
            filter_robots: config.ingestion.filter_robots,
            robot_filter_radius: config.ingestion.robot_filter_radius,
            min_merge_points: config.ingestion.min_merge_points,
            map,
            transforms,
            state,
            engine: FeatureEngine::new(config),
        }
    }

    /// Validate, transform, filter and merge one cloud, then recompute
    /// the dirty set.
    pub fn ingest(&mut self, cloud: &PointCloudMsg, now: Stamp) -> Result<IngestSummary> {
        cloud.validate()?;

        let age = (now - cloud.stamp) as f32;
        if age > self.max_cloud_age {
            return Err(DishaError::BadCloud(format!(
                "cloud {:.1} s > {:.1} s old",
                age, self.max_cloud_age
            )));
        }
        let position_field = cloud.f32_vec3_field(&self.position_name)?.clone();
        let normal_field = cloud.f32_vec3_field(&self.normal_name)?.clone();

        let timeout = Duration::from_secs_f32((TRANSFORM_BUDGET - age).max(0.0));
        let tf = self
            .transforms
            .lookup(&self.map_frame, &cloud.frame_id, cloud.stamp, timeout)?;

        // Teammate positions in the cloud frame, best effort.
        let mut robots: Vec<Vector3<f32>> = Vec::new();
        if self.filter_robots {
            for frame in &self.other_frames {
                match self
                    .transforms
                    .lookup(&cloud.frame_id, frame, cloud.stamp, ROBOT_TRANSFORM_BUDGET)
                {
                    Ok(tf) => robots.push(tf.translation.vector),
                    Err(e) => {
                        warn!("Could not get {} pose in {}: {}", frame, cloud.frame_id, e);
                    }
                }
            }
        }

        let mut positions = Vec::with_capacity(cloud.len());
        let mut normals = Vec::with_capacity(cloud.len());
        for i in 0..cloud.len() {
            let p = cloud.get_vec3(&position_field, i);
            if !p.iter().all(|c| c.is_finite()) {
                continue;
            }
            let range = p.norm();
            if range < self.min_range || range > self.max_range {
                continue;
            }
            if robots
                .iter()
                .any(|r| (p - r).norm() < self.robot_filter_radius)
            {
                continue;
            }
            let n = cloud.get_vec3(&normal_field, i);
            positions.push((tf * Point3::from(p)).coords);
            normals.push(tf * n);
        }
        if positions.len() < self.min_merge_points {
            return Err(DishaError::BadCloud(format!(
                "only {} of {} points left to merge (minimum {})",
                positions.len(),
                cloud.len(),
                self.min_merge_points
            )));
        }
        debug!(
            "{} / {} points kept by range and robot filters",
            positions.len(),
            cloud.len()
        );

        let origin = (tf * Point3::origin()).coords;
        let mut map = self.map.write();
        let stats = map.merge(&positions, &normals, origin);
        self.engine.set_tuning(self.state.tuning());
        let refreshed = self.engine.refresh(&mut map);
        Ok(IngestSummary { stats, refreshed })
    }
}
