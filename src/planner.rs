//! Goal selection and path planning over the neighborhood graph.
//!
//! A plan runs single-source shortest paths (Dijkstra) from a
//! traversable vertex near the requested start, then either picks the
//! reachable vertex closest to a finite goal ("directed") or the vertex
//! minimizing `path_cost / reward` ("explore"), and finally walks the
//! predecessor tree into an oriented pose sequence.

use nalgebra::{Rotation3, UnitQuaternion, Vector3};
use rand::Rng;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::cloud::Stamp;
use crate::config::{DishaConfig, ExplorationConfig, GraphConfig};
use crate::error::{DishaError, Result};
use crate::features::WORLD_UP;
use crate::graph::NeighborhoodGraph;
use crate::map::PointMap;
use crate::point::{MapPoint, Vertex, INVALID_VERTEX};
use crate::shared::SharedState;
use crate::transforms::TransformSource;

/// How long start resolution may wait for the robot transform.
const START_TRANSFORM_TIMEOUT: Duration = Duration::from_secs(5);

/// A pose along a planned path, in the map frame.
#[derive(Clone, Debug)]
pub struct PlanPose {
    pub position: Vector3<f32>,
    pub orientation: UnitQuaternion<f32>,
}

impl PlanPose {
    /// Pose at a position with identity orientation.
    pub fn at(position: Vector3<f32>) -> Self {
        Self {
            position,
            orientation: UnitQuaternion::identity(),
        }
    }

    /// The NaN pose: "resolve from transforms" as a start, "explore" as
    /// a goal.
    pub fn unset() -> Self {
        Self::at(Vector3::new(f32::NAN, f32::NAN, f32::NAN))
    }

    pub fn position_finite(&self) -> bool {
        self.position.iter().all(|c| c.is_finite())
    }
}

/// Plan request. A non-finite start position means "use the robot's own
/// pose"; a non-finite goal position selects exploration mode.
#[derive(Clone, Debug)]
pub struct PlanRequest {
    pub start: PlanPose,
    pub goal: PlanPose,
    /// Radius around the start to search for a traversable vertex
    /// (meters).
    pub tolerance: f32,
}

impl Default for PlanRequest {
    fn default() -> Self {
        Self {
            start: PlanPose::unset(),
            goal: PlanPose::unset(),
            tolerance: 32.0,
        }
    }
}

impl PlanRequest {
    /// Directed request to a concrete goal position.
    pub fn directed(goal: Vector3<f32>, tolerance: f32) -> Self {
        Self {
            start: PlanPose::unset(),
            goal: PlanPose::at(goal),
            tolerance,
        }
    }
}

/// An ordered pose sequence from the resolved start to the chosen goal.
#[derive(Clone, Debug)]
pub struct PlannedPath {
    pub frame_id: String,
    pub stamp: Stamp,
    pub poses: Vec<PlanPose>,
    pub start_vertex: Vertex,
    pub goal_vertex: Vertex,
    pub total_cost: f32,
}

/// Per-vertex fields of one planning run, for observer write-back.
#[derive(Clone, Debug)]
pub struct PlanFields {
    pub path_cost: Vec<f32>,
    pub reward: Vec<f32>,
    pub relative_cost: Vec<f32>,
    pub predecessor: Vec<Vertex>,
}

/// Result of a successful plan.
pub struct PlanOutcome {
    pub path: PlannedPath,
    pub fields: PlanFields,
}

pub struct Planner {
    map_frame: String,
    robot_frame: String,
    graph: GraphConfig,
    exploration: ExplorationConfig,
    path_cost_floor: f32,
    transforms: Arc<dyn TransformSource>,
    state: Arc<SharedState>,
}

impl Planner {
    pub fn new(
        config: &DishaConfig,
        transforms: Arc<dyn TransformSource>,
        state: Arc<SharedState>,
    ) -> Self {
        Self {
            map_frame: config.frames.map_frame.clone(),
            robot_frame: config.frames.robot_frame.clone(),
            graph: config.graph.clone(),
            exploration: config.exploration.clone(),
            path_cost_floor: config.path_cost_floor(),
            transforms,
            state,
        }
    }

    /// Plan over the given map snapshot.
    ///
    /// Never blocks on I/O inside the shortest-path loop; the only
    /// bounded wait is the start transform lookup.
    pub fn plan(&self, map: &PointMap, request: &PlanRequest, stamp: Stamp) -> Result<PlanOutcome> {
        if !self.state.is_initialized() {
            return Err(DishaError::NotInitialized);
        }
        let required = self.graph.min_map_points;
        if map.len() < required {
            return Err(DishaError::MapTooSmall {
                points: map.len(),
                required,
            });
        }

        let start_pose = self.resolve_start(&request.start, request.tolerance, stamp)?;
        let start_vertex = self.pick_start_vertex(map, &start_pose, request.tolerance)?;

        let graph = NeighborhoodGraph::new(map, &self.graph, self.state.tuning());
        let (path_cost, predecessor) = dijkstra(&graph, start_vertex);

        let (goal_vertex, reward, relative_cost) = if request.goal.position_finite() {
            let goal = self.closest_reachable(
                map,
                &path_cost,
                &request.goal.position,
                request.tolerance,
            )?;
            (goal, vec![0.0; map.len()], vec![f32::INFINITY; map.len()])
        } else {
            self.exploration_goal(map, &path_cost)?
        };

        let indices = trace_path(start_vertex, goal_vertex, &predecessor)?;
        let poses = orient_path(map, &start_pose, &indices);
        info!(
            "Goal at [{:.1}, {:.1}, {:.1}]: cost {:.3}, {} poses",
            map.position(goal_vertex).x,
            map.position(goal_vertex).y,
            map.position(goal_vertex).z,
            path_cost[goal_vertex as usize],
            poses.len()
        );

        Ok(PlanOutcome {
            path: PlannedPath {
                frame_id: self.map_frame.clone(),
                stamp,
                poses,
                start_vertex,
                goal_vertex,
                total_cost: path_cost[goal_vertex as usize],
            },
            fields: PlanFields {
                path_cost,
                reward,
                relative_cost,
                predecessor,
            },
        })
    }

    fn resolve_start(&self, start: &PlanPose, tolerance: f32, stamp: Stamp) -> Result<PlanPose> {
        if start.position_finite() {
            return Ok(start.clone());
        }
        match self.transforms.lookup(
            &self.map_frame,
            &self.robot_frame,
            stamp,
            START_TRANSFORM_TIMEOUT,
        ) {
            Ok(tf) => Ok(PlanPose {
                position: tf.translation.vector,
                orientation: tf.rotation,
            }),
            Err(e) => {
                warn!(
                    "Could not get {} position in map {}: {}",
                    self.robot_frame, self.map_frame, e
                );
                Err(DishaError::NoStart {
                    x: f32::NAN,
                    y: f32::NAN,
                    z: f32::NAN,
                    tolerance,
                })
            }
        }
    }

    fn pick_start_vertex(
        &self,
        map: &PointMap,
        start_pose: &PlanPose,
        tolerance: f32,
    ) -> Result<Vertex> {
        let search_radius = tolerance.max(self.graph.neighborhood_radius);
        let mut candidates: Vec<(Vertex, f32)> = map
            .nearby_indices(&start_pose.position, search_radius)
            .into_iter()
            .filter(|(v, _)| map.point(*v).passable())
            .collect();
        if candidates.is_empty() {
            warn!(
                "No traversable point within {:.1} m of start [{:.1}, {:.1}, {:.1}]",
                search_radius, start_pose.position.x, start_pose.position.y, start_pose.position.z
            );
            return Err(DishaError::NoStart {
                x: start_pose.position.x,
                y: start_pose.position.y,
                z: start_pose.position.z,
                tolerance: search_radius,
            });
        }
        let start = if self.exploration.random_start {
            candidates[rand::thread_rng().gen_range(0..candidates.len())].0
        } else {
            candidates
                .iter()
                .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal))
                .map(|(v, _)| *v)
                .unwrap()
        };
        debug!(
            "Planning from vertex {} with {} traversable candidates nearby",
            start,
            candidates.len()
        );
        Ok(start)
    }

    /// Directed mode: reachable vertex closest to the goal position.
    ///
    /// The goal is unreachable when even the closest reachable vertex
    /// ends up farther from it than the request tolerance allows.
    fn closest_reachable(
        &self,
        map: &PointMap,
        path_cost: &[f32],
        goal: &Vector3<f32>,
        tolerance: f32,
    ) -> Result<Vertex> {
        let mut best = INVALID_VERTEX;
        let mut best_dist = f32::INFINITY;
        for (v, cost) in path_cost.iter().enumerate() {
            if !cost.is_finite() {
                continue;
            }
            let dist = (map.position(v as Vertex) - goal).norm();
            if dist < best_dist {
                best = v as Vertex;
                best_dist = dist;
            }
        }
        if best == INVALID_VERTEX || best_dist > tolerance.max(self.graph.neighborhood_radius) {
            warn!(
                "No feasible path to [{:.2}, {:.2}, {:.2}], closest approach {:.2} m",
                goal.x, goal.y, goal.z, best_dist
            );
            return Err(DishaError::NoPath {
                x: goal.x,
                y: goal.y,
                z: goal.z,
            });
        }
        Ok(best)
    }

    /// Exploration mode: minimum relative cost among eligible vertices.
    fn exploration_goal(
        &self,
        map: &PointMap,
        path_cost: &[f32],
    ) -> Result<(Vertex, Vec<f32>, Vec<f32>)> {
        let mut reward = Vec::with_capacity(map.len());
        let mut relative = Vec::with_capacity(map.len());
        let mut best = INVALID_VERTEX;
        let mut best_cost = f32::INFINITY;

        for (v, point) in map.points().iter().enumerate() {
            let r = self.reward(point);
            let rel = path_cost[v] / (r + 1e-6);
            reward.push(r);
            relative.push(rel);

            let eligible =
                r > 0.0 && path_cost[v].is_finite() && path_cost[v] > self.path_cost_floor;
            if eligible && rel < best_cost {
                best = v as Vertex;
                best_cost = rel;
            }
        }
        if best == INVALID_VERTEX {
            warn!("No eligible exploration goal in {} points", map.len());
            return Err(DishaError::NoGoal);
        }
        Ok((best, reward, relative))
    }

    /// Exploration reward of a single point.
    ///
    /// Prefers frontiers neither this robot nor a teammate has seen, but
    /// falls back (scaled by `self_factor`) to frontiers only teammates
    /// have seen.
    pub fn reward(&self, point: &MapPoint) -> f32 {
        let r_self = self.vp_ratio(point.dist_to_actor);
        let r_all = r_self.min(self.vp_ratio(point.dist_to_other_actors));
        let mut r = r_all.max(self.exploration.self_factor * r_self);
        r *= 1.0 + point.num_edge_neighbors as f32;
        r * self.region_penalty(&point.position)
    }

    /// Normalized visit-distance utility in [0, 1]; 1 for never-seen
    /// points (infinite distance).
    fn vp_ratio(&self, dist: f32) -> f32 {
        (dist - self.exploration.min_vp_distance).clamp(0.0, self.exploration.max_vp_distance)
            / self.exploration.max_vp_distance
    }

    /// Penalize goals inside the staging area, falling off with distance
    /// from the origin.
    fn region_penalty(&self, position: &Vector3<f32>) -> f32 {
        let lo = self.exploration.staging_min;
        let hi = self.exploration.staging_max;
        let inside = (0..3).all(|i| position[i] >= lo[i] && position[i] <= hi[i]);
        if inside {
            1.0 / (1.0 + position.norm().powf(self.exploration.staging_exponent))
        } else {
            1.0
        }
    }
}

/// Search frontier entry; reversed ordering turns the max-heap into a
/// min-heap on cost.
#[derive(Clone, Debug)]
struct SearchNode {
    vertex: Vertex,
    cost: f32,
}

impl PartialEq for SearchNode {
    fn eq(&self, other: &Self) -> bool {
        self.vertex == other.vertex
    }
}

impl Eq for SearchNode {}

impl Ord for SearchNode {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .cost
            .partial_cmp(&self.cost)
            .unwrap_or(Ordering::Equal)
    }
}

impl PartialOrd for SearchNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Dijkstra over the lazy out-edge view. Stale heap entries are skipped
/// on pop; unreachable vertices keep infinite cost and an invalid
/// predecessor.
pub fn dijkstra(graph: &NeighborhoodGraph, start: Vertex) -> (Vec<f32>, Vec<Vertex>) {
    let n = graph.num_vertices();
    let mut cost = vec![f32::INFINITY; n];
    let mut predecessor = vec![INVALID_VERTEX; n];
    cost[start as usize] = 0.0;
    predecessor[start as usize] = start;

    let mut open = BinaryHeap::new();
    open.push(SearchNode {
        vertex: start,
        cost: 0.0,
    });

    while let Some(node) = open.pop() {
        if node.cost > cost[node.vertex as usize] {
            continue;
        }
        for (u, w) in graph.out_edges(node.vertex) {
            debug_assert!(w.is_finite() && w > 0.0);
            let next = node.cost + w;
            if next < cost[u as usize] {
                cost[u as usize] = next;
                predecessor[u as usize] = node.vertex;
                open.push(SearchNode {
                    vertex: u,
                    cost: next,
                });
            }
        }
    }
    (cost, predecessor)
}

/// Walk predecessors from the goal back to the start, then reverse.
fn trace_path(start: Vertex, goal: Vertex, predecessor: &[Vertex]) -> Result<Vec<Vertex>> {
    debug_assert_eq!(predecessor[start as usize], start);
    let mut indices = Vec::new();
    let mut v = goal;
    while v != start {
        if v == INVALID_VERTEX || indices.len() > predecessor.len() {
            return Err(DishaError::NoPath {
                x: f32::NAN,
                y: f32::NAN,
                z: f32::NAN,
            });
        }
        indices.push(v);
        v = predecessor[v as usize];
    }
    indices.push(start);
    indices.reverse();
    Ok(indices)
}

/// Turn a vertex sequence into oriented poses.
///
/// The first pose keeps the resolved start position and orientation.
/// Each following pose aligns its x-axis with the motion direction and
/// its z-axis with the point normal, sign-fixed upward, completing a
/// right-handed frame.
fn orient_path(map: &PointMap, start_pose: &PlanPose, indices: &[Vertex]) -> Vec<PlanPose> {
    let mut poses = Vec::with_capacity(indices.len() + 1);
    poses.push(start_pose.clone());

    for &v in indices {
        let position = map.position(v);
        let previous = poses.last().unwrap();
        let tangent = position - previous.position;
        // A start vertex coinciding with the resolved start would only
        // duplicate the first pose.
        if tangent.norm() < 1e-5 {
            continue;
        }

        let mut z = map.point(v).normal;
        if !z.iter().all(|c| c.is_finite()) || z.norm() < 1e-6 {
            z = WORLD_UP;
        } else {
            z.normalize_mut();
            if z.dot(&WORLD_UP) < 0.0 {
                z = -z;
            }
        }

        // Project the tangent into the surface plane; degenerate steps
        // inherit the previous orientation.
        let x_raw = tangent - z * tangent.dot(&z);
        let orientation = if x_raw.norm() > 1e-6 {
            let x = x_raw.normalize();
            let y = z.cross(&x);
            let m = nalgebra::Matrix3::from_columns(&[x, y, z]);
            UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(m))
        } else {
            previous.orientation
        };

        poses.push(PlanPose {
            position,
            orientation,
        });
    }
    poses
}
