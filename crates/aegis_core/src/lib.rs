//! Deterministic decision math for safety-gated visual damage assessment:
//! evidence fusion, drift monitoring, a context feature service, Mondrian
//! conformal prediction, a Safe-LUCB critic, and continuum memory.
//!
//! Everything in this crate is synchronous and pure given its inputs; I/O
//! (detector calls, VLM calls, repository access) lives in `aegis_service`.

pub mod adaptive_engine;
pub mod config;
pub mod conformal;
pub mod context;
pub mod critic;
pub mod drift;
pub mod error;
pub mod fusion;
pub mod linalg;
pub mod memory;
pub mod types;
pub mod wilson;

pub use adaptive_engine::{AdaptiveEngine, ChunkDirection, SelfModificationEvent};
pub use config::AegisConfig;
pub use conformal::{CalibrationStore, MondrianConformalPredictor, StratumKey};
pub use context::{ContextFeatureService, RawFeatures};
pub use critic::{Arm, CriticModelSnapshot, SafeLucbCritic, SelectionResult};
pub use drift::{DriftMonitor, DriftReport, DriftType, WindowRate};
pub use error::{AegisError, AegisResult};
pub use fusion::DetectorFusionService;
pub use linalg::CorrelationMatrix;
pub use memory::{ContinuumMemory, MemoryLevelSnapshot, QueryResult as MemoryQueryResult};
pub use types::{
    CalibrationPoint, ContextVector, CostEstimate, Decision, DecisionRecord, Evidence,
    FusionResult, HistoricalObservation, InstanceScore, ProvisionalAssessment, Severity, Urgency,
    CLASS_CATALOGUE, CONTEXT_VECTOR_LEN, DETECTOR_NAMES,
};
