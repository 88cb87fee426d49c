//! DishaNav - exploration planner node.
//!
//! Loads configuration, wires the shared map, ledger and transform
//! table, spawns the worker threads and monitors them. With `--replay
//! <dir>` it feeds recorded clouds (the crate's serialized form, sorted
//! by file name) through the ingestion pipeline and exits when done;
//! without it the node runs until terminated.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use disha_nav::cloud::PointCloudMsg;
use disha_nav::config::DishaConfig;
use disha_nav::error::Result;
use disha_nav::map::PointMap;
use disha_nav::shared::{SharedLedger, SharedMap, SharedState};
use disha_nav::threads::{spawn_threads, ThreadHandles};
use disha_nav::transforms::StaticTransforms;
use disha_nav::viewpoints::ViewpointLedger;
use nalgebra::Isometry3;
use parking_lot::{Mutex, RwLock};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("disha_nav=info".parse().unwrap()),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();

    let replay_pos = args.iter().position(|a| a == "--replay");
    let replay_dir = replay_pos.and_then(|i| args.get(i + 1)).map(PathBuf::from);

    let config_path = args
        .iter()
        .enumerate()
        .skip(1)
        .filter(|(i, _)| Some(*i) != replay_pos.map(|p| p + 1))
        .find(|(_, a)| !a.starts_with("--"))
        .map(|(_, a)| a.clone());

    let mut config = if let Some(path) = &config_path {
        info!("Loading configuration from {}", path);
        DishaConfig::load(Path::new(path))?
    } else if Path::new("disha.toml").exists() {
        info!("Loading configuration from disha.toml");
        DishaConfig::load(Path::new("disha.toml"))?
    } else {
        info!("Using default configuration");
        DishaConfig::default()
    };
    if config.frames.map_frame.is_empty() {
        config.frames.map_frame = "map".to_string();
    }

    info!("DishaNav v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Map frame {}, robot frame {}, {} teammate frames",
        config.frames.map_frame,
        config.frames.robot_frame,
        config.frames.robot_frames.len()
    );

    let map: SharedMap = Arc::new(RwLock::new(PointMap::new(&config.ingestion, &config.graph)));
    let ledger: SharedLedger = Arc::new(Mutex::new(ViewpointLedger::new(
        config.exploration.max_vp_distance,
    )));
    let state = Arc::new(SharedState::new(config.tuning));

    // Replay and bring-up run without an external transform tracker;
    // the robot is pinned at the map origin.
    let transforms = Arc::new(StaticTransforms::new());
    transforms.insert(
        &config.frames.map_frame,
        &config.frames.robot_frame,
        Isometry3::identity(),
    );

    info!("Starting worker threads...");
    let handles = spawn_threads(
        config.clone(),
        Arc::clone(&map),
        Arc::clone(&ledger),
        transforms.clone(),
        Arc::clone(&state),
    )?;

    if let Some(dir) = replay_dir {
        // Ingestion discards clouds until teammate discovery finishes.
        while !state.is_initialized() && !handles.planning.is_finished() {
            std::thread::sleep(Duration::from_millis(50));
        }
        replay_clouds(&dir, &handles)?;
        // Let the planner run a couple of cycles over the final map.
        let grace = Duration::from_secs_f32(2.0 / config.exploration.planning_freq);
        std::thread::sleep(grace);
        state.signal_shutdown();
    }

    monitor(&state, &handles);

    info!("Waiting for threads to finish...");
    for handle in handles.ingestion {
        if let Err(e) = handle.join() {
            error!("Ingestion thread panicked: {:?}", e);
        }
    }
    if let Err(e) = handles.viewpoints.join() {
        error!("Viewpoint thread panicked: {:?}", e);
    }
    if let Err(e) = handles.planning.join() {
        error!("Planning thread panicked: {:?}", e);
    }
    info!("DishaNav finished");
    Ok(())
}

/// Feed recorded clouds through the first input stream in file order.
fn replay_clouds(dir: &Path, handles: &ThreadHandles) -> Result<()> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().map(|e| e == "cloud").unwrap_or(false))
        .collect();
    files.sort();
    info!("Replaying {} clouds from {:?}", files.len(), dir);

    let input = match handles.cloud_inputs.first() {
        Some(input) => input,
        None => {
            warn!("No input streams configured");
            return Ok(());
        }
    };
    for file in files {
        let mut reader = std::io::BufReader::new(std::fs::File::open(&file)?);
        let mut cloud = PointCloudMsg::read_from(&mut reader)?;
        // Recorded stamps are from another run; re-stamp on the shared
        // clock so the age gate passes.
        cloud.stamp = disha_nav::threads::now_stamp();
        if input.send(cloud).is_err() {
            warn!("Input stream closed during replay");
            break;
        }
    }
    Ok(())
}

/// Watch worker health and drain observer topics into the log.
fn monitor(state: &Arc<SharedState>, handles: &ThreadHandles) {
    let interval = Duration::from_millis(500);
    loop {
        if state.should_shutdown() {
            break;
        }
        if handles.any_finished() {
            warn!("A worker thread exited unexpectedly");
            state.signal_shutdown();
            break;
        }
        while let Ok(path) = handles.outputs.paths.try_recv() {
            info!(
                "Path with {} poses, cost {:.2}, goal vertex {}",
                path.poses.len(),
                path.total_cost,
                path.goal_vertex
            );
        }
        // Cloud topics are drained so slow consumers never stall workers.
        while handles.outputs.dirty_clouds.try_recv().is_ok() {}
        while handles.outputs.map_clouds.try_recv().is_ok() {}
        while handles.outputs.local_clouds.try_recv().is_ok() {}
        while handles.outputs.self_viewpoints.try_recv().is_ok() {}
        while handles.outputs.other_viewpoints.try_recv().is_ok() {}
        std::thread::sleep(interval);
    }
}
