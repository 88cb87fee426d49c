//! Ingestion thread: one input cloud stream into the shared map.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::now_stamp;
use crate::cloud::PointCloudMsg;
use crate::config::DishaConfig;
use crate::ingestion::CloudPipeline;
use crate::shared::{SharedMap, SharedState, SharedTransforms};

/// Poll interval for the shutdown flag while the stream is idle.
const IDLE_POLL: Duration = Duration::from_millis(200);

pub struct IngestionThread {
    pipeline: CloudPipeline,
    map: SharedMap,
    state: Arc<SharedState>,
    map_frame: String,
    cloud_rx: Receiver<PointCloudMsg>,
    dirty_tx: Sender<PointCloudMsg>,
    map_tx: Sender<PointCloudMsg>,
}

impl IngestionThread {
    pub fn new(
        config: &DishaConfig,
        map: SharedMap,
        transforms: SharedTransforms,
        state: Arc<SharedState>,
        cloud_rx: Receiver<PointCloudMsg>,
        dirty_tx: Sender<PointCloudMsg>,
        map_tx: Sender<PointCloudMsg>,
    ) -> Self {
        let pipeline = CloudPipeline::new(
            config,
            Arc::clone(&map),
            transforms,
            Arc::clone(&state),
        );
        Self {
            pipeline,
            map,
            state,
            map_frame: config.frames.map_frame.clone(),
            cloud_rx,
            dirty_tx,
            map_tx,
        }
    }

    pub fn run(&mut self) {
        loop {
            if self.state.should_shutdown() {
                break;
            }
            let cloud = match self.cloud_rx.recv_timeout(IDLE_POLL) {
                Ok(cloud) => cloud,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };
            if !self.state.is_initialized() {
                warn!("Discarding input cloud, still discovering teammates");
                continue;
            }
            debug!(
                "Input cloud from {} with {} points received",
                cloud.frame_id,
                cloud.len()
            );
            match self.pipeline.ingest(&cloud, now_stamp()) {
                Ok(summary) => {
                    info!(
                        "Merged cloud: {} added, {} dropped, {} recomputed",
                        summary.stats.added,
                        summary.stats.dropped,
                        summary.refreshed.len()
                    );
                    let (dirty_cloud, map_cloud) = {
                        let map = self.map.read();
                        (
                            map.create_debug_cloud(&self.map_frame, cloud.stamp, &summary.refreshed),
                            map.create_cloud(&self.map_frame, cloud.stamp),
                        )
                    };
                    // Observers may lag or be absent; never block on them.
                    let _ = self.dirty_tx.try_send(dirty_cloud);
                    let _ = self.map_tx.try_send(map_cloud);
                }
                Err(e) => warn!("Discarding input cloud: {}", e),
            }
        }
        debug!("Ingestion thread exiting");
    }
}
