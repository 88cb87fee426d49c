//! Multi-threaded architecture for DishaNav.
//!
//! Separates concerns into a small fixed set of worker threads:
//! - Ingestion threads (one per input stream): validate, transform and
//!   merge clouds, recompute dirty features
//! - Viewpoint thread: periodic actor pose sampling and projection
//! - Planning thread: teammate discovery, periodic and request-driven
//!   planning

mod ingestion;
mod planning;
mod viewpoints;

pub use ingestion::IngestionThread;
pub use planning::{PlanService, PlanningThread};
pub use viewpoints::ViewpointThread;

use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::cloud::{PointCloudMsg, Stamp};
use crate::config::DishaConfig;
use crate::error::Result;
use crate::planner::PlannedPath;
use crate::shared::{SharedLedger, SharedMap, SharedState, SharedTransforms};

/// Wall-clock stamp in seconds, shared convention with cloud producers.
pub fn now_stamp() -> Stamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Receiver ends of the observer topics.
pub struct OutputReceivers {
    /// Newly-recomputed map subset after each merge.
    pub dirty_clouds: Receiver<PointCloudMsg>,
    /// Full map snapshots after each merge.
    pub map_clouds: Receiver<PointCloudMsg>,
    /// Map points around the robot's own pose.
    pub local_clouds: Receiver<PointCloudMsg>,
    /// Own pose samples.
    pub self_viewpoints: Receiver<PointCloudMsg>,
    /// Teammate pose samples.
    pub other_viewpoints: Receiver<PointCloudMsg>,
    /// Published plans.
    pub paths: Receiver<PlannedPath>,
}

/// Handles of the running thread set.
pub struct ThreadHandles {
    pub ingestion: Vec<JoinHandle<()>>,
    pub viewpoints: JoinHandle<()>,
    pub planning: JoinHandle<()>,
    /// Sender ends of the input cloud streams.
    pub cloud_inputs: Vec<Sender<PointCloudMsg>>,
    /// Request-driven planning entry.
    pub plan_requests: Sender<PlanService>,
    pub outputs: OutputReceivers,
}

impl ThreadHandles {
    pub fn any_finished(&self) -> bool {
        self.ingestion.iter().any(|h| h.is_finished())
            || self.viewpoints.is_finished()
            || self.planning.is_finished()
    }
}

/// Spawn all worker threads and wire their channels.
pub fn spawn_threads(
    config: DishaConfig,
    map: SharedMap,
    ledger: SharedLedger,
    transforms: SharedTransforms,
    state: Arc<SharedState>,
) -> Result<ThreadHandles> {
    let (dirty_tx, dirty_rx) = bounded::<PointCloudMsg>(config.ingestion.input_queue_size);
    let (map_tx, map_rx) = bounded::<PointCloudMsg>(5);
    let (local_tx, local_rx) = bounded::<PointCloudMsg>(5);
    let (self_vp_tx, self_vp_rx) = bounded::<PointCloudMsg>(5);
    let (other_vp_tx, other_vp_rx) = bounded::<PointCloudMsg>(5);
    let (path_tx, path_rx) = bounded::<PlannedPath>(5);
    let (request_tx, request_rx) = bounded::<PlanService>(5);

    let mut cloud_inputs = Vec::new();
    let mut ingestion_handles = Vec::new();
    for i in 0..config.ingestion.num_input_clouds {
        let (cloud_tx, cloud_rx) = bounded::<PointCloudMsg>(config.ingestion.input_queue_size);
        cloud_inputs.push(cloud_tx);

        let mut worker = IngestionThread::new(
            &config,
            Arc::clone(&map),
            Arc::clone(&transforms),
            Arc::clone(&state),
            cloud_rx,
            dirty_tx.clone(),
            map_tx.clone(),
        );
        let handle = thread::Builder::new()
            .name(format!("ingestion-{}", i))
            .spawn(move || worker.run())
            .expect("Failed to spawn ingestion thread");
        ingestion_handles.push(handle);
    }

    let mut viewpoint_worker = ViewpointThread::new(
        &config,
        Arc::clone(&map),
        Arc::clone(&ledger),
        Arc::clone(&transforms),
        Arc::clone(&state),
        self_vp_tx,
        other_vp_tx,
        local_tx,
    );
    let viewpoints_handle = thread::Builder::new()
        .name("viewpoints".into())
        .spawn(move || viewpoint_worker.run())
        .expect("Failed to spawn viewpoint thread");

    let mut planning_worker = PlanningThread::new(
        &config,
        Arc::clone(&map),
        Arc::clone(&transforms),
        Arc::clone(&state),
        request_rx,
        path_tx,
    );
    let planning_handle = thread::Builder::new()
        .name("planning".into())
        .spawn(move || planning_worker.run())
        .expect("Failed to spawn planning thread");

    Ok(ThreadHandles {
        ingestion: ingestion_handles,
        viewpoints: viewpoints_handle,
        planning: planning_handle,
        cloud_inputs,
        plan_requests: request_tx,
        outputs: OutputReceivers {
            dirty_clouds: dirty_rx,
            map_clouds: map_rx,
            local_clouds: local_rx,
            self_viewpoints: self_vp_rx,
            other_viewpoints: other_vp_rx,
            paths: path_rx,
        },
    })
}
