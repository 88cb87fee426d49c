//! Approximate nearest-neighbor index over 3-D map points.
//!
//! Thin wrapper around a k-d tree keeping point-store indices as items.
//! Readers may query concurrently; additions need exclusive access.

use kiddo::float::kdtree::KdTree;
use kiddo::SquaredEuclidean;
use nalgebra::Vector3;

use crate::point::Vertex;

/// Bucket size large enough to hold dense clusters of points that share
/// a coordinate on one axis (e.g. a flat ground plane), which the
/// library's default bucket size of 32 cannot.
const BUCKET_SIZE: usize = 512;

/// Spatial index over single-precision 3-D positions.
///
/// Radius query results are unsorted by convention; callers must not
/// assume any order.
pub struct SpatialIndex {
    tree: KdTree<f32, u64, 3, BUCKET_SIZE, u32>,
    len: usize,
}

impl SpatialIndex {
    pub fn new() -> Self {
        Self {
            tree: KdTree::new(),
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Insert a position under the given point-store index. The index
    /// remains usable for queries immediately after returning.
    pub fn add(&mut self, vertex: Vertex, position: &Vector3<f32>) {
        self.tree
            .add(&[position.x, position.y, position.z], vertex as u64);
        self.len += 1;
    }

    /// `k` nearest neighbors of `p`, closest first, with squared distances.
    pub fn knn(&self, p: &Vector3<f32>, k: usize) -> Vec<(Vertex, f32)> {
        if self.is_empty() || k == 0 {
            return Vec::new();
        }
        self.tree
            .nearest_n::<SquaredEuclidean>(&[p.x, p.y, p.z], k)
            .into_iter()
            .map(|n| (n.item as Vertex, n.distance))
            .collect()
    }

    /// Nearest neighbor of `p` with squared distance, if the index is
    /// non-empty.
    pub fn nearest(&self, p: &Vector3<f32>) -> Option<(Vertex, f32)> {
        if self.is_empty() {
            return None;
        }
        let n = self.tree.nearest_one::<SquaredEuclidean>(&[p.x, p.y, p.z]);
        Some((n.item as Vertex, n.distance))
    }

    /// All neighbors within `radius` of `p`, unsorted, with squared
    /// distances.
    pub fn radius(&self, p: &Vector3<f32>, radius: f32) -> Vec<(Vertex, f32)> {
        if self.is_empty() {
            return Vec::new();
        }
        self.tree
            .within_unsorted::<SquaredEuclidean>(&[p.x, p.y, p.z], radius * radius)
            .into_iter()
            .map(|n| (n.item as Vertex, n.distance))
            .collect()
    }
}

impl Default for SpatialIndex {
    fn default() -> Self {
        Self::new()
    }
}
