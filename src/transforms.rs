//! Rigid-transform lookup seam.
//!
//! The planner and the ingestion pipeline only need "where is frame B in
//! frame A around time t"; how transforms are tracked is a deployment
//! concern behind the [`TransformSource`] trait.

use nalgebra::Isometry3;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Duration;

use crate::cloud::Stamp;
use crate::error::{DishaError, Result};

/// Source of rigid transforms between named frames.
///
/// `lookup` returns the transform taking `source`-frame coordinates into
/// the `target` frame, waiting up to `timeout` for it to become
/// available. A zero timeout means "latest available or fail".
pub trait TransformSource: Send + Sync {
    fn lookup(
        &self,
        target: &str,
        source: &str,
        stamp: Stamp,
        timeout: Duration,
    ) -> Result<Isometry3<f32>>;
}

/// Table-backed transform source for tests, replay and simulation.
///
/// Stores the latest transform per frame pair; the stamp is ignored.
/// Falls back to the inverse pair when the direct entry is missing.
pub struct StaticTransforms {
    table: RwLock<HashMap<(String, String), Isometry3<f32>>>,
}

impl StaticTransforms {
    pub fn new() -> Self {
        Self {
            table: RwLock::new(HashMap::new()),
        }
    }

    /// Store (or replace) the transform taking `source` into `target`.
    pub fn insert(&self, target: &str, source: &str, transform: Isometry3<f32>) {
        self.table
            .write()
            .insert((target.to_string(), source.to_string()), transform);
    }

    pub fn remove(&self, target: &str, source: &str) {
        self.table
            .write()
            .remove(&(target.to_string(), source.to_string()));
    }
}

impl Default for StaticTransforms {
    fn default() -> Self {
        Self::new()
    }
}

impl TransformSource for StaticTransforms {
    fn lookup(
        &self,
        target: &str,
        source: &str,
        _stamp: Stamp,
        _timeout: Duration,
    ) -> Result<Isometry3<f32>> {
        if target == source {
            return Ok(Isometry3::identity());
        }
        let table = self.table.read();
        if let Some(tf) = table.get(&(target.to_string(), source.to_string())) {
            return Ok(*tf);
        }
        if let Some(tf) = table.get(&(source.to_string(), target.to_string())) {
            return Ok(tf.inverse());
        }
        Err(DishaError::TransformUnavailable(format!(
            "{} -> {}",
            source, target
        )))
    }
}
