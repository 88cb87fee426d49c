//! Configuration loading for DishaNav

use crate::error::{DishaError, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Main configuration structure.
#[derive(Clone, Debug, Deserialize)]
pub struct DishaConfig {
    #[serde(default)]
    pub frames: FrameConfig,
    #[serde(default)]
    pub ingestion: IngestionConfig,
    #[serde(default)]
    pub graph: GraphConfig,
    #[serde(default)]
    pub tuning: TuningParams,
    #[serde(default)]
    pub exploration: ExplorationConfig,
}

/// Coordinate frames and cloud field names.
#[derive(Clone, Debug, Deserialize)]
pub struct FrameConfig {
    /// Name of the position field in input clouds (default: "x")
    #[serde(default = "default_position_name")]
    pub position_name: String,

    /// Name of the normal field in input clouds (default: "normal_x")
    #[serde(default = "default_normal_name")]
    pub normal_name: String,

    /// Fixed map frame all planning happens in
    #[serde(default)]
    pub map_frame: String,

    /// Frame of this robot (default: "base_footprint")
    #[serde(default = "default_robot_frame")]
    pub robot_frame: String,

    /// Teammate name -> frame map; the robot's own frame is inserted
    /// automatically when missing
    #[serde(default)]
    pub robot_frames: BTreeMap<String, String>,

    /// Budget for teammate frame discovery at startup (seconds)
    #[serde(default = "default_discovery_timeout")]
    pub discovery_timeout_secs: f32,
}

/// Cloud ingestion settings.
#[derive(Clone, Debug, Deserialize)]
pub struct IngestionConfig {
    /// Maximum accepted cloud age in seconds (default: 5)
    #[serde(default = "default_max_cloud_age")]
    pub max_cloud_age_secs: f32,

    /// Number of input cloud streams (default: 1)
    #[serde(default = "default_num_input_clouds")]
    pub num_input_clouds: usize,

    /// Depth of each input cloud queue (default: 5)
    #[serde(default = "default_input_queue_size")]
    pub input_queue_size: usize,

    /// Sensor range gate: points closer than this are dropped (meters)
    #[serde(default = "default_min_range")]
    pub min_range: f32,

    /// Sensor range gate: points farther than this are dropped (meters)
    #[serde(default = "default_max_range")]
    pub max_range: f32,

    /// Drop points near known teammate positions (default: false)
    #[serde(default)]
    pub filter_robots: bool,

    /// Radius around a teammate position within which points are dropped (meters)
    #[serde(default = "default_robot_filter_radius")]
    pub robot_filter_radius: f32,

    /// Minimum surviving points for a cloud to be merged at all
    #[serde(default = "default_min_merge_points")]
    pub min_merge_points: usize,

    /// Merge deduplication radius: at most one map point per ball (meters)
    #[serde(default = "default_points_min_dist")]
    pub points_min_dist: f32,

    /// Cosine gate for the empty-space (seen-through) update
    #[serde(default = "default_min_empty_cos")]
    pub min_empty_cos: f32,

    /// A point is EMPTY when seen through at least `empty_ratio` times
    /// per occupied observation
    #[serde(default = "default_empty_ratio")]
    pub empty_ratio: u32,
}

/// Neighborhood graph shape and normal estimation.
#[derive(Clone, Debug, Deserialize)]
pub struct GraphConfig {
    /// Cap on neighbors considered per vertex (default: 12)
    #[serde(default = "default_neighborhood_knn")]
    pub neighborhood_knn: usize,

    /// Neighborhood ball radius (meters, default: 0.5)
    #[serde(default = "default_neighborhood_radius")]
    pub neighborhood_radius: f32,

    /// Minimum neighbors to fit a normal by PCA (default: 9)
    #[serde(default = "default_min_normal_pts")]
    pub min_normal_pts: usize,

    /// Radius of the normal-fitting neighborhood (meters, default: 0.5)
    #[serde(default = "default_normal_radius")]
    pub normal_radius: f32,

    /// Maximum surface pitch for traversability (degrees, default: 30)
    #[serde(default = "default_max_pitch_deg")]
    pub max_pitch_deg: f32,

    /// Maximum surface roll for traversability (degrees, default: 30)
    #[serde(default = "default_max_roll_deg")]
    pub max_roll_deg: f32,

    /// Minimum map size for planning to be attempted
    #[serde(default = "default_min_map_points")]
    pub min_map_points: usize,
}

/// Tuning parameters used only inside labeling and edge filtering.
///
/// This is the hot-reloadable subset: workers read it through a shared
/// lock and a runtime update takes effect on the next dirty recomputation.
#[derive(Clone, Copy, Debug, Deserialize)]
pub struct TuningParams {
    /// Maximum height step between graph neighbors (meters, default: 0.15)
    #[serde(default = "default_max_nn_height_diff")]
    pub max_nn_height_diff: f32,

    /// Radius of the clearance cylinder around a point's normal axis (meters)
    #[serde(default = "default_clearance_radius")]
    pub clearance_radius: f32,

    /// Bottom of the clearance band above local ground (meters, default: 0.15)
    #[serde(default = "default_clearance_low")]
    pub clearance_low: f32,

    /// Top of the clearance band above local ground (meters, default: 0.8)
    #[serde(default = "default_clearance_high")]
    pub clearance_high: f32,

    /// Obstacle-point count at which a point stops being traversable
    #[serde(default = "default_min_points_obstacle")]
    pub min_points_obstacle: u32,

    /// Maximum ground height-difference standard deviation (meters)
    #[serde(default = "default_max_ground_diff_std")]
    pub max_ground_diff_std: f32,

    /// Maximum mean absolute ground height difference (meters)
    #[serde(default = "default_max_mean_abs_ground_diff")]
    pub max_mean_abs_ground_diff: f32,

    /// Centroid offset (as a fraction of the neighborhood radius) above
    /// which a neighborhood counts as one-sided (frontier)
    #[serde(default = "default_edge_min_centroid_offset")]
    pub edge_min_centroid_offset: f32,

    /// Minimum distance to the nearest clearance-band obstacle (meters)
    #[serde(default = "default_min_dist_to_obstacle")]
    pub min_dist_to_obstacle: f32,
}

/// Exploration reward shaping and planner scheduling.
#[derive(Clone, Debug, Deserialize)]
pub struct ExplorationConfig {
    /// Viewpoint sampling frequency (Hz, default: 1)
    #[serde(default = "default_viewpoints_update_freq")]
    pub viewpoints_update_freq: f32,

    /// Visit distance below which a point earns no exploration reward (meters)
    #[serde(default = "default_min_vp_distance")]
    pub min_vp_distance: f32,

    /// Visit distance at which the reward saturates; also the projection
    /// radius of the viewpoint ledger (meters)
    #[serde(default = "default_max_vp_distance")]
    pub max_vp_distance: f32,

    /// Weight of own visits relative to the fleet-wide minimum
    #[serde(default = "default_self_factor")]
    pub self_factor: f32,

    /// Periodic re-planning frequency (Hz, default: 0.5)
    #[serde(default = "default_planning_freq")]
    pub planning_freq: f32,

    /// Pick a uniform-random traversable start instead of the closest
    #[serde(default)]
    pub random_start: bool,

    /// Minimum path cost for an exploration goal; `None` falls back to
    /// the neighborhood radius
    #[serde(default)]
    pub path_cost_floor: Option<f32>,

    /// Staging-area box minimum corner (map frame, meters)
    #[serde(default = "default_staging_min")]
    pub staging_min: [f32; 3],

    /// Staging-area box maximum corner (map frame, meters)
    #[serde(default = "default_staging_max")]
    pub staging_max: [f32; 3],

    /// Exponent of the distance-from-origin penalty inside the staging box
    #[serde(default = "default_staging_exponent")]
    pub staging_exponent: f32,
}

// Default value functions

fn default_position_name() -> String {
    "x".to_string()
}
fn default_normal_name() -> String {
    "normal_x".to_string()
}
fn default_robot_frame() -> String {
    "base_footprint".to_string()
}
fn default_discovery_timeout() -> f32 {
    15.0
}
fn default_max_cloud_age() -> f32 {
    5.0
}
fn default_num_input_clouds() -> usize {
    1
}
fn default_input_queue_size() -> usize {
    5
}
fn default_min_range() -> f32 {
    1.0
}
fn default_max_range() -> f32 {
    25.0
}
fn default_robot_filter_radius() -> f32 {
    1.0
}
fn default_min_merge_points() -> usize {
    16
}
fn default_points_min_dist() -> f32 {
    0.2
}
fn default_min_empty_cos() -> f32 {
    0.3
}
fn default_empty_ratio() -> u32 {
    2
}
fn default_neighborhood_knn() -> usize {
    12
}
fn default_neighborhood_radius() -> f32 {
    0.5
}
fn default_min_normal_pts() -> usize {
    9
}
fn default_normal_radius() -> f32 {
    0.5
}
fn default_max_pitch_deg() -> f32 {
    30.0
}
fn default_max_roll_deg() -> f32 {
    30.0
}
fn default_min_map_points() -> usize {
    64
}
fn default_max_nn_height_diff() -> f32 {
    0.15
}
fn default_clearance_radius() -> f32 {
    0.5
}
fn default_clearance_low() -> f32 {
    0.15
}
fn default_clearance_high() -> f32 {
    0.8
}
fn default_min_points_obstacle() -> u32 {
    3
}
fn default_max_ground_diff_std() -> f32 {
    0.1
}
fn default_max_mean_abs_ground_diff() -> f32 {
    0.1
}
fn default_edge_min_centroid_offset() -> f32 {
    0.75
}
fn default_min_dist_to_obstacle() -> f32 {
    0.7
}
fn default_viewpoints_update_freq() -> f32 {
    1.0
}
fn default_min_vp_distance() -> f32 {
    1.5
}
fn default_max_vp_distance() -> f32 {
    5.0
}
fn default_self_factor() -> f32 {
    0.25
}
fn default_planning_freq() -> f32 {
    0.5
}
fn default_staging_min() -> [f32; 3] {
    [-60.0, -30.0, -30.0]
}
fn default_staging_max() -> [f32; 3] {
    [0.0, 30.0, 30.0]
}
fn default_staging_exponent() -> f32 {
    4.0
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            position_name: default_position_name(),
            normal_name: default_normal_name(),
            map_frame: String::new(),
            robot_frame: default_robot_frame(),
            robot_frames: BTreeMap::new(),
            discovery_timeout_secs: default_discovery_timeout(),
        }
    }
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            max_cloud_age_secs: default_max_cloud_age(),
            num_input_clouds: default_num_input_clouds(),
            input_queue_size: default_input_queue_size(),
            min_range: default_min_range(),
            max_range: default_max_range(),
            filter_robots: false,
            robot_filter_radius: default_robot_filter_radius(),
            min_merge_points: default_min_merge_points(),
            points_min_dist: default_points_min_dist(),
            min_empty_cos: default_min_empty_cos(),
            empty_ratio: default_empty_ratio(),
        }
    }
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            neighborhood_knn: default_neighborhood_knn(),
            neighborhood_radius: default_neighborhood_radius(),
            min_normal_pts: default_min_normal_pts(),
            normal_radius: default_normal_radius(),
            max_pitch_deg: default_max_pitch_deg(),
            max_roll_deg: default_max_roll_deg(),
            min_map_points: default_min_map_points(),
        }
    }
}

impl Default for TuningParams {
    fn default() -> Self {
        Self {
            max_nn_height_diff: default_max_nn_height_diff(),
            clearance_radius: default_clearance_radius(),
            clearance_low: default_clearance_low(),
            clearance_high: default_clearance_high(),
            min_points_obstacle: default_min_points_obstacle(),
            max_ground_diff_std: default_max_ground_diff_std(),
            max_mean_abs_ground_diff: default_max_mean_abs_ground_diff(),
            edge_min_centroid_offset: default_edge_min_centroid_offset(),
            min_dist_to_obstacle: default_min_dist_to_obstacle(),
        }
    }
}

impl Default for ExplorationConfig {
    fn default() -> Self {
        Self {
            viewpoints_update_freq: default_viewpoints_update_freq(),
            min_vp_distance: default_min_vp_distance(),
            max_vp_distance: default_max_vp_distance(),
            self_factor: default_self_factor(),
            planning_freq: default_planning_freq(),
            random_start: false,
            path_cost_floor: None,
            staging_min: default_staging_min(),
            staging_max: default_staging_max(),
            staging_exponent: default_staging_exponent(),
        }
    }
}

impl Default for DishaConfig {
    fn default() -> Self {
        Self {
            frames: FrameConfig::default(),
            ingestion: IngestionConfig::default(),
            graph: GraphConfig::default(),
            tuning: TuningParams::default(),
            exploration: ExplorationConfig::default(),
        }
    }
}

impl DishaConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DishaError::Config(format!("Failed to read config file: {}", e)))?;
        let config: DishaConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field consistency.
    pub fn validate(&self) -> Result<()> {
        if self.ingestion.min_range >= self.ingestion.max_range {
            return Err(DishaError::Config(format!(
                "min_range {} must be below max_range {}",
                self.ingestion.min_range, self.ingestion.max_range
            )));
        }
        if self.tuning.clearance_low >= self.tuning.clearance_high {
            return Err(DishaError::Config(format!(
                "clearance_low {} must be below clearance_high {}",
                self.tuning.clearance_low, self.tuning.clearance_high
            )));
        }
        if self.exploration.min_vp_distance >= self.exploration.max_vp_distance {
            return Err(DishaError::Config(format!(
                "min_vp_distance {} must be below max_vp_distance {}",
                self.exploration.min_vp_distance, self.exploration.max_vp_distance
            )));
        }
        Ok(())
    }

    /// Teammate frames including the robot's own frame.
    ///
    /// The own frame is inserted under the "SELF" key unless some entry
    /// already maps to it.
    pub fn robot_frames_with_self(&self) -> BTreeMap<String, String> {
        let mut frames = self.frames.robot_frames.clone();
        let among = frames.values().any(|f| *f == self.frames.robot_frame);
        if !among {
            frames.insert("SELF".to_string(), self.frames.robot_frame.clone());
        }
        frames
    }

    /// Frames of teammates only (own frame excluded).
    pub fn other_robot_frames(&self) -> Vec<String> {
        self.frames
            .robot_frames
            .values()
            .filter(|f| **f != self.frames.robot_frame)
            .cloned()
            .collect()
    }

    /// Minimum path cost for an exploration goal.
    pub fn path_cost_floor(&self) -> f32 {
        self.exploration
            .path_cost_floor
            .unwrap_or(self.graph.neighborhood_radius)
    }
}

impl GraphConfig {
    /// Maximum pitch in radians.
    pub fn max_pitch(&self) -> f32 {
        self.max_pitch_deg.to_radians()
    }

    /// Maximum roll in radians.
    pub fn max_roll(&self) -> f32 {
        self.max_roll_deg.to_radians()
    }
}
