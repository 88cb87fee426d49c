//! Error types for DishaNav

use thiserror::Error;

/// DishaNav error type.
///
/// Planning failures are reported, not retried; ingestion failures are
/// absorbed with a warning by the ingestion thread and never reach a
/// plan caller.
#[derive(Error, Debug)]
pub enum DishaError {
    #[error("Not initialized, still discovering teammate frames")]
    NotInitialized,

    #[error("Cannot plan in map with {points} < {required} points")]
    MapTooSmall { points: usize, required: usize },

    #[error("No traversable point within {tolerance:.1} m of start [{x:.1}, {y:.1}, {z:.1}]")]
    NoStart { x: f32, y: f32, z: f32, tolerance: f32 },

    #[error("No feasible path to goal [{x:.1}, {y:.1}, {z:.1}]")]
    NoPath { x: f32, y: f32, z: f32 },

    #[error("No eligible exploration goal")]
    NoGoal,

    #[error("Bad cloud: {0}")]
    BadCloud(String),

    #[error("Transform unavailable: {0}")]
    TransformUnavailable(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<toml::de::Error> for DishaError {
    fn from(e: toml::de::Error) -> Self {
        DishaError::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DishaError>;
