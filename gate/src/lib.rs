//! # Aegis Gate
//!
//! Admission control in front of the execution engine. An opportunity is
//! scored by the risk assessor, then put to a weighted vote among warden
//! evaluators; only an `Execute` decision reaches on-chain execution.
//!
//! ## Flow:
//! 1. **Risk pre-gate**: reject outright above the admissible risk level
//! 2. **Swarm vote**: concurrent, time-bounded, with an ethics veto
//! 3. **Feedback**: execution receipts calibrate risk and feed thresholds

pub mod admission;
pub mod config;
pub mod error;
pub mod evaluators;
pub mod feedback;
pub mod swarm;
pub mod types;

pub use admission::{AdmissionDecision, AdmissionGate, AdmissionReason};
pub use config::{
    EvaluatorKind, FeedbackConfig, GateConfig, RiskGateConfig, SwarmConfig, ThresholdsConfig,
    WardenProfile,
};
pub use error::{GateError, Result};
pub use evaluators::{
    build_evaluator, build_warden, EthicsEvaluator, ProfitabilityEvaluator, RiskWeightedEvaluator,
    UrgencyEvaluator, WardenEvaluator,
};
pub use feedback::{ExecutionReceipt, FeedbackOutcome, FeedbackPerformance, FeedbackProcessor};
pub use swarm::{tally_votes, SwarmCoordinator, SwarmState, SwarmStats, Tally};
pub use types::*;

/// Version of the gate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
