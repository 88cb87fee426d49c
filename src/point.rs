//! Map point entity and its label flags.

use nalgebra::Vector3;

/// Graph vertex identifier. Point indices are stable for the lifetime of
/// the store and double as vertex ids.
pub type Vertex = u32;

/// Sentinel for "no vertex" (unreachable predecessor, no goal found).
pub const INVALID_VERTEX: Vertex = Vertex::MAX;

/// Label bitset of a map point.
///
/// Flags only ever progress from unset to set between recomputations of
/// the same point; a full recomputation rewrites the label bits from the
/// point's current neighborhood.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PointFlags(u16);

impl PointFlags {
    /// Normal is finite and well defined.
    pub const NORMAL_OK: PointFlags = PointFlags(1 << 0);
    /// The robot can occupy this point.
    pub const TRAVERSABLE: PointFlags = PointFlags(1 << 1);
    /// Traversable point at the frontier of the observed region.
    pub const EDGE: PointFlags = PointFlags(1 << 2);
    /// Seen through more often than seen occupied.
    pub const EMPTY: PointFlags = PointFlags(1 << 3);
    /// Too many points in the clearance band above this point.
    pub const OBSTACLE: PointFlags = PointFlags(1 << 4);
    /// Cached features are stale and pending recomputation.
    pub const DIRTY: PointFlags = PointFlags(1 << 5);

    pub fn empty() -> Self {
        PointFlags(0)
    }

    pub fn bits(self) -> u16 {
        self.0
    }

    pub fn contains(self, other: PointFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// True when any of the given bits is set.
    pub fn intersects(self, other: PointFlags) -> bool {
        self.0 & other.0 != 0
    }

    pub fn insert(&mut self, other: PointFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: PointFlags) {
        self.0 &= !other.0;
    }

    pub fn set(&mut self, other: PointFlags, value: bool) {
        if value {
            self.insert(other);
        } else {
            self.remove(other);
        }
    }
}

impl std::ops::BitOr for PointFlags {
    type Output = PointFlags;

    fn bitor(self, rhs: PointFlags) -> PointFlags {
        PointFlags(self.0 | rhs.0)
    }
}

/// A 3-D sample of the environment with derived attributes.
///
/// Geometric features are recomputed by the feature engine whenever the
/// point's neighborhood changes; planning fields are rewritten on each
/// plan over the current map snapshot.
#[derive(Clone, Debug)]
pub struct MapPoint {
    /// Position in the map frame.
    pub position: Vector3<f32>,
    /// Unit surface normal (measured, later refined by PCA).
    pub normal: Vector3<f32>,
    /// Number of neighbors the normal was fitted from (0 = measured only).
    pub num_normal_pts: u32,

    /// Minimum height difference to a neighbor, along the normal.
    pub ground_diff_min: f32,
    /// Maximum height difference to a neighbor, along the normal.
    pub ground_diff_max: f32,
    /// Standard deviation of neighbor height differences.
    pub ground_diff_std: f32,
    /// Mean absolute neighbor height difference.
    pub mean_abs_ground_diff: f32,

    /// Neighbors inside the clearance band above this point.
    pub num_obstacle_pts: u32,
    /// Distance to the nearest clearance-band neighbor.
    pub min_dist_to_obstacle: f32,

    /// Neighbors missing on one side (frontier indicator).
    pub num_edge_neighbors: u32,

    /// Times this point was re-observed as occupied.
    pub num_occupied: u32,
    /// Times a measurement ray passed through this point.
    pub num_empty: u32,

    pub flags: PointFlags,

    /// Smallest distance at which this robot has observed the point.
    /// Infinite until first seen.
    pub dist_to_actor: f32,
    /// Time of the last own visit; negative infinity until first seen.
    pub actor_last_visit: f64,
    /// Smallest distance at which any teammate has observed the point.
    pub dist_to_other_actors: f32,
    /// Time of the last teammate visit.
    pub other_actors_last_visit: f64,

    /// Shortest-path cost from the last plan's start vertex.
    pub path_cost: f32,
    /// Exploration reward from the last plan.
    pub reward: f32,
    /// `path_cost / reward` from the last plan.
    pub relative_cost: f32,
}

impl MapPoint {
    /// Create a fresh point; features are pending until the first
    /// recomputation.
    pub fn new(position: Vector3<f32>, normal: Vector3<f32>) -> Self {
        Self {
            position,
            normal,
            num_normal_pts: 0,
            ground_diff_min: 0.0,
            ground_diff_max: 0.0,
            ground_diff_std: 0.0,
            mean_abs_ground_diff: 0.0,
            num_obstacle_pts: 0,
            min_dist_to_obstacle: f32::INFINITY,
            num_edge_neighbors: 0,
            num_occupied: 1,
            num_empty: 0,
            flags: PointFlags::DIRTY,
            dist_to_actor: f32::INFINITY,
            actor_last_visit: f64::NEG_INFINITY,
            dist_to_other_actors: f32::INFINITY,
            other_actors_last_visit: f64::NEG_INFINITY,
            path_cost: f32::INFINITY,
            reward: 0.0,
            relative_cost: f32::INFINITY,
        }
    }

    /// The robot can stand here (frontier points count as well since
    /// EDGE implies TRAVERSABLE).
    pub fn passable(&self) -> bool {
        self.flags.intersects(PointFlags::TRAVERSABLE | PointFlags::EDGE)
    }
}
