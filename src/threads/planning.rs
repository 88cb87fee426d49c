//! Planning thread: teammate discovery, periodic and request-driven
//! planning.
//!
//! Startup performs a bounded-timeout discovery of teammate frames and
//! then flips the initialized flag; planning requests are rejected until
//! then. Afterwards the thread re-issues the last stored request at the
//! planning frequency and serves explicit requests as they arrive.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::now_stamp;
use crate::config::DishaConfig;
use crate::error::Result;
use crate::planner::{PlannedPath, Planner, PlanRequest};
use crate::shared::{SharedMap, SharedState, SharedTransforms};

/// A request paired with its reply channel.
pub struct PlanService {
    pub request: PlanRequest,
    pub reply: Sender<Result<PlannedPath>>,
}

pub struct PlanningThread {
    planner: Planner,
    map: SharedMap,
    transforms: SharedTransforms,
    state: Arc<SharedState>,
    map_frame: String,
    other_frames: Vec<String>,
    discovery_timeout: Duration,
    period: Duration,
    request_rx: Receiver<PlanService>,
    path_tx: Sender<PlannedPath>,
}

impl PlanningThread {
    pub fn new(
        config: &DishaConfig,
        map: SharedMap,
        transforms: SharedTransforms,
        state: Arc<SharedState>,
        request_rx: Receiver<PlanService>,
        path_tx: Sender<PlannedPath>,
    ) -> Self {
        let planner = Planner::new(config, Arc::clone(&transforms), Arc::clone(&state));
        Self {
            planner,
            map,
            transforms,
            state,
            map_frame: config.frames.map_frame.clone(),
            other_frames: config.other_robot_frames(),
            discovery_timeout: Duration::from_secs_f32(config.frames.discovery_timeout_secs),
            period: Duration::from_secs_f32(1.0 / config.exploration.planning_freq),
            request_rx,
            path_tx,
        }
    }

    pub fn run(&mut self) {
        self.discover_teammates();
        self.state.set_initialized();

        while !self.state.should_shutdown() {
            match self.request_rx.recv_timeout(self.period) {
                Ok(service) => {
                    self.state.set_last_request(service.request.clone());
                    let result = self.plan_once(&service.request);
                    if let Ok(path) = &result {
                        let _ = self.path_tx.try_send(path.clone());
                    }
                    let _ = service.reply.send(result);
                }
                Err(RecvTimeoutError::Timeout) => {
                    let request = self.state.last_request();
                    match self.plan_once(&request) {
                        Ok(path) => {
                            info!(
                                "Periodic plan with {} poses in {}",
                                path.poses.len(),
                                self.map_frame
                            );
                            let _ = self.path_tx.try_send(path);
                        }
                        Err(e) => debug!("Periodic plan failed: {}", e),
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        debug!("Planning thread exiting");
    }

    /// Wait (bounded) for each teammate frame to appear; whoever is
    /// missing when the budget runs out is simply not waited for again.
    fn discover_teammates(&self) {
        if self.other_frames.is_empty() {
            info!("No teammates configured");
            return;
        }
        info!("Waiting for {} teammate frames...", self.other_frames.len());
        let deadline = Instant::now() + self.discovery_timeout;
        let mut found = 0;
        for frame in &self.other_frames {
            let budget = deadline.saturating_duration_since(Instant::now());
            match self
                .transforms
                .lookup(&self.map_frame, frame, now_stamp(), budget)
            {
                Ok(tf) => {
                    found += 1;
                    info!(
                        "Robot {} found at [{:.1}, {:.1}, {:.1}]",
                        frame,
                        tf.translation.vector.x,
                        tf.translation.vector.y,
                        tf.translation.vector.z
                    );
                }
                Err(e) => warn!("Could not get {} pose: {}", frame, e),
            }
        }
        info!("{} / {} teammates found", found, self.other_frames.len());
    }

    fn plan_once(&self, request: &PlanRequest) -> Result<PlannedPath> {
        let stamp = now_stamp();
        let outcome = {
            let map = self.map.read();
            self.planner.plan(&map, request, stamp)?
        };
        // Short write to expose per-vertex planning fields to observers.
        {
            let mut map = self.map.write();
            map.apply_plan_fields(
                &outcome.fields.path_cost,
                &outcome.fields.reward,
                &outcome.fields.relative_cost,
            );
        }
        Ok(outcome.path)
    }
}
