//! Pulse Risk - personalized behavioral risk-scoring engine
//!
//! Pulse fuses heterogeneous behavioral signals (calendar activity, music
//! listening) into a bounded, explainable 0-100 risk score through a
//! deterministic pipeline: baseline update → deviation transform → category
//! aggregation → risk composition → persistence → intervention trigger.
//!
//! Each person gets rolling per-signal baselines; scores are damped toward
//! neutral until enough history exists, and severity levels pass through
//! hysteresis so noise cannot flap them.

pub mod aggregate;
pub mod baseline;
pub mod composer;
pub mod config;
pub mod deviation;
pub mod error;
pub mod pipeline;
pub mod retry;
pub mod store;
pub mod trigger;
pub mod types;

pub use composer::{ComposeContext, RiskComposer};
pub use config::{EngineConfig, SignalDescriptor};
pub use error::RiskError;
pub use pipeline::RiskEngine;
pub use store::{AssessmentStore, InMemoryAssessmentStore};
pub use trigger::{InterventionSink, NoopSink, TriggerOutcome};
pub use types::{
    Assessment, BaselineSnapshot, Category, Direction, RiskLevel, SignalObservation, SubScore,
    UpdateOutcome,
};

/// Engine version embedded in diagnostic output
pub const PULSE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for diagnostic output
pub const PRODUCER_NAME: &str = "pulse-risk";
