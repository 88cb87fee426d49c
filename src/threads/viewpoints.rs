//! Viewpoint thread: periodic actor pose sampling.
//!
//! Each tick looks up the latest pose of every known robot frame and
//! projects it onto the map as a visitation distance. Missing transforms
//! are warnings, never fatal.

use crossbeam_channel::Sender;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::now_stamp;
use crate::cloud::PointCloudMsg;
use crate::config::DishaConfig;
use crate::shared::{SharedLedger, SharedMap, SharedState, SharedTransforms};

pub struct ViewpointThread {
    map: SharedMap,
    ledger: SharedLedger,
    transforms: SharedTransforms,
    state: Arc<SharedState>,
    map_frame: String,
    robot_frame: String,
    robot_frames: BTreeMap<String, String>,
    local_radius: f32,
    period: Duration,
    self_tx: Sender<PointCloudMsg>,
    other_tx: Sender<PointCloudMsg>,
    local_tx: Sender<PointCloudMsg>,
}

impl ViewpointThread {
    pub fn new(
        config: &DishaConfig,
        map: SharedMap,
        ledger: SharedLedger,
        transforms: SharedTransforms,
        state: Arc<SharedState>,
        self_tx: Sender<PointCloudMsg>,
        other_tx: Sender<PointCloudMsg>,
        local_tx: Sender<PointCloudMsg>,
    ) -> Self {
        Self {
            map,
            ledger,
            transforms,
            state,
            map_frame: config.frames.map_frame.clone(),
            robot_frame: config.frames.robot_frame.clone(),
            robot_frames: config.robot_frames_with_self(),
            local_radius: config.exploration.max_vp_distance,
            period: Duration::from_secs_f32(1.0 / config.exploration.viewpoints_update_freq),
            self_tx,
            other_tx,
            local_tx,
        }
    }

    pub fn run(&mut self) {
        if self.map_frame.is_empty() {
            warn!("No map frame configured, viewpoint sampling disabled");
            return;
        }
        while !self.state.should_shutdown() {
            self.tick();
            std::thread::sleep(self.period);
        }
        debug!("Viewpoint thread exiting");
    }

    fn tick(&mut self) {
        let stamp = now_stamp();
        for frame in self.robot_frames.values() {
            // Latest available transform, no waiting.
            let tf = match self
                .transforms
                .lookup(&self.map_frame, frame, stamp, Duration::ZERO)
            {
                Ok(tf) => tf,
                Err(e) => {
                    warn!("Could not get robot {} position: {}", frame, e);
                    continue;
                }
            };
            let position = tf.translation.vector;
            // Map lock first, ledger lock inside it; the ledger lock is
            // never held while taking the map lock.
            let mut map = self.map.write();
            let mut ledger = self.ledger.lock();
            if *frame == self.robot_frame {
                ledger.record_self(&mut map, position, stamp);
                drop(ledger);
                // Local neighborhood snapshot for observers.
                let indices: Vec<_> = map
                    .nearby_indices(&position, self.local_radius)
                    .into_iter()
                    .map(|(v, _)| v)
                    .collect();
                let local = map.create_debug_cloud(&self.map_frame, stamp, &indices);
                drop(map);
                let _ = self.local_tx.try_send(local);
            } else {
                ledger.record_other(&mut map, position, stamp);
            }
        }

        let (self_cloud, other_cloud) = {
            let ledger = self.ledger.lock();
            (
                ledger.self_cloud(&self.map_frame, stamp),
                ledger.other_cloud(&self.map_frame, stamp),
            )
        };
        let _ = self.self_tx.try_send(self_cloud);
        let _ = self.other_tx.try_send(other_cloud);
    }
}
