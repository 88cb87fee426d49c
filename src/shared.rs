//! Shared state for the multi-threaded planner.
//!
//! Provides thread-safe shared handles between:
//! - Ingestion threads (cloud validation, merge, feature refresh)
//! - Viewpoint sampler thread (actor pose projection)
//! - Planner thread (periodic and request-driven planning)

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::TuningParams;
use crate::map::PointMap;
use crate::planner::PlanRequest;
use crate::transforms::TransformSource;
use crate::viewpoints::ViewpointLedger;

/// The point map (store + spatial index) behind one lock: readers share,
/// a merging writer excludes them, and a plan sees one consistent
/// snapshot.
pub type SharedMap = Arc<RwLock<PointMap>>;

/// The viewpoint ledger lock. Never held while taking the map lock.
pub type SharedLedger = Arc<Mutex<ViewpointLedger>>;

/// Transform source shared by ingestion, sampling and planning.
pub type SharedTransforms = Arc<dyn TransformSource>;

/// Small shared flags and the last plan request.
pub struct SharedState {
    /// Set once teammate discovery has finished.
    initialized: Mutex<bool>,
    /// Most recent plan request, re-issued by the periodic planner.
    last_request: Mutex<PlanRequest>,
    /// Hot-reloadable labeling/edge-filter parameters.
    tuning: RwLock<TuningParams>,
    /// Shutdown signal for graceful termination.
    shutdown: AtomicBool,
}

impl SharedState {
    pub fn new(tuning: TuningParams) -> Self {
        Self {
            initialized: Mutex::new(false),
            last_request: Mutex::new(PlanRequest::default()),
            tuning: RwLock::new(tuning),
            shutdown: AtomicBool::new(false),
        }
    }

    pub fn is_initialized(&self) -> bool {
        *self.initialized.lock()
    }

    pub fn set_initialized(&self) {
        *self.initialized.lock() = true;
    }

    pub fn last_request(&self) -> PlanRequest {
        self.last_request.lock().clone()
    }

    pub fn set_last_request(&self, request: PlanRequest) {
        *self.last_request.lock() = request;
    }

    pub fn tuning(&self) -> TuningParams {
        *self.tuning.read()
    }

    /// Swap the hot-reloadable parameter subset; workers pick it up on
    /// their next cycle.
    pub fn set_tuning(&self, tuning: TuningParams) {
        *self.tuning.write() = tuning;
    }

    pub fn signal_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    pub fn should_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}
