//! Analysis engine: pricing, liquidity/trend metrics, profit and scoring,
//! orchestrated into full runs.

pub mod liquidity;
pub mod orchestrator;
pub mod pricing;
pub mod profit;
pub mod scoring;

pub use orchestrator::{AnalysisParams, Orchestrator};
