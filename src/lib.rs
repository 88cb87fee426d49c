//! # DishaNav: Multi-Robot 3D Exploration Planner
//!
//! DishaNav plans over an incrementally built traversability map: it
//! merges streamed sensor point clouds into an append-only 3-D point
//! store, derives per-point geometric features and traversability
//! labels, and continuously selects a reachable goal with a
//! kinematically reasonable path for each plan request. In explore mode
//! the goal maximizes information gain, de-duplicated across teammates;
//! in directed mode it is the cheapest feasible path whose endpoint is
//! closest to the requested target.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use disha_nav::config::DishaConfig;
//! use disha_nav::map::PointMap;
//! use disha_nav::planner::{Planner, PlanRequest};
//! use disha_nav::shared::SharedState;
//! use disha_nav::transforms::StaticTransforms;
//! use nalgebra::Vector3;
//!
//! let config = DishaConfig::default();
//! let map = PointMap::new(&config.ingestion, &config.graph);
//! let state = Arc::new(SharedState::new(config.tuning));
//! state.set_initialized();
//! let planner = Planner::new(&config, Arc::new(StaticTransforms::new()), state);
//!
//! let request = PlanRequest::directed(Vector3::new(4.0, 2.0, 0.0), 1.0);
//! match planner.plan(&map, &request, 0.0) {
//!     Ok(outcome) => println!("{} poses", outcome.path.poses.len()),
//!     Err(e) => eprintln!("planning failed: {}", e),
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`spatial`]: k-d tree nearest-neighbor index over map points
//! - [`point`]: the map point entity and its label flags
//! - [`map`]: append-only point store, merge deduplication, dirty set
//! - [`features`]: PCA normals, ground statistics, clearance, labels
//! - [`graph`]: lazy neighborhood graph view and edge-cost oracle
//! - [`viewpoints`]: actor visitation ledger for reward discounting
//! - [`planner`]: Dijkstra, reward field, goal selection, pose paths
//! - [`cloud`]: dense point-cloud wire format
//! - [`transforms`]: rigid-transform lookup seam
//! - [`ingestion`]: cloud validation, frame change, merge pipeline
//! - [`threads`]: ingestion / viewpoint / planning worker threads
//!
//! ## Data Flow
//!
//! ```text
//!   input cloud ──► validate ──► transform ──► range/robot filter
//!        │                                          │
//!        ▼                                          ▼
//!   (dropped with a warning on failure)        merge into map
//!                                                   │ dirty set
//!                                                   ▼
//!                                          feature/label engine
//!                                                   │
//!            plan request ──► Dijkstra ──► goal selection ──► path
//! ```

pub mod cloud;
pub mod config;
pub mod error;
pub mod features;
pub mod graph;
pub mod ingestion;
pub mod map;
pub mod planner;
pub mod point;
pub mod shared;
pub mod spatial;
pub mod threads;
pub mod transforms;
pub mod viewpoints;

pub use config::DishaConfig;
pub use error::{DishaError, Result};
pub use map::PointMap;
pub use planner::{PlannedPath, Planner, PlanPose, PlanRequest};
pub use point::{MapPoint, PointFlags, Vertex};
