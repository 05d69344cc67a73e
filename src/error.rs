//! Error types for the Pulse risk engine

use thiserror::Error;

/// Errors surfaced by the risk engine.
///
/// Only `InvalidObservation` and `StaleObservation` are caller-visible
/// rejections; all other conditions degrade gracefully inside the pipeline.
#[derive(Debug, Error)]
pub enum RiskError {
    #[error("Invalid observation: {0}")]
    InvalidObservation(String),

    #[error("Stale observation: day {observed} predates retained window starting {window_start}")]
    StaleObservation {
        observed: chrono::NaiveDate,
        window_start: chrono::NaiveDate,
    },

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Persistence failure: {0}")]
    PersistenceError(String),

    #[error("Intervention dispatch failure: {0}")]
    DispatchError(String),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),
}
