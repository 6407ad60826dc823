//! Core domain types shared across the engine, store and API surface.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Trading strategy selector. Closed set; weights live in `analysis::scoring`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyType {
    SafeSteady,
    Balanced,
    Aggressive,
}

impl StrategyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyType::SafeSteady => "safe_steady",
            StrategyType::Balanced => "balanced",
            StrategyType::Aggressive => "aggressive",
        }
    }

    pub fn all() -> [StrategyType; 3] {
        [
            StrategyType::SafeSteady,
            StrategyType::Balanced,
            StrategyType::Aggressive,
        ]
    }
}

impl std::str::FromStr for StrategyType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "safe_steady" => Ok(StrategyType::SafeSteady),
            "balanced" => Ok(StrategyType::Balanced),
            "aggressive" => Ok(StrategyType::Aggressive),
            other => Err(format!("unknown strategy: {other}")),
        }
    }
}

impl std::fmt::Display for StrategyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether prices assume immediate fills or posted/undercut listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Instant,
    Patient,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Instant => "instant",
            ExecutionMode::Patient => "patient",
        }
    }
}

impl std::str::FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "instant" => Ok(ExecutionMode::Instant),
            "patient" => Ok(ExecutionMode::Patient),
            other => Err(format!("unknown execution mode: {other}")),
        }
    }
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Rising,
    Falling,
    Stable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// One part line in a set's cost breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartDetail {
    pub slug: String,
    pub name: String,
    pub unit_price: f64,
    pub quantity: u32,
    pub total_cost: f64,
}

/// Multiplicative factor breakdown; the product of these (volatility dividing)
/// reconstructs `composite_score` up to rounding.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct ScoreContributions {
    pub profit: f64,
    pub volume: f64,
    pub roi: f64,
    pub trend: f64,
    pub liquidity: f64,
    pub volatility: f64,
}

/// Fully analyzed and scored set for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredSet {
    pub set_slug: String,
    pub set_name: String,

    // Primary fields reflect the run's execution mode.
    pub set_price: f64,
    pub part_cost: f64,
    pub profit_margin: f64,
    pub profit_percentage: f64,

    // Both execution-mode variants, kept for rescoring without refetching.
    pub instant_set_price: Option<f64>,
    pub instant_part_cost: Option<f64>,
    pub instant_profit_margin: Option<f64>,
    pub instant_profit_percentage: Option<f64>,
    pub patient_set_price: Option<f64>,
    pub patient_part_cost: Option<f64>,
    pub patient_profit_margin: Option<f64>,
    pub patient_profit_percentage: Option<f64>,

    pub part_details: Vec<PartDetail>,
    pub execution_mode: ExecutionMode,

    // Liquidity and statistics factors.
    pub volume: f64,
    pub bid_ask_ratio: f64,
    pub sell_side_competition: u32,
    pub liquidity_velocity: f64,
    pub liquidity_multiplier: f64,

    pub trend_slope: f64,
    pub trend_multiplier: f64,
    pub trend_direction: TrendDirection,
    pub volatility: f64,
    pub volatility_penalty: f64,
    pub risk_level: RiskLevel,

    pub contributions: ScoreContributions,
    pub composite_score: f64,

    /// Set when per-set fetching failed; metrics are zeroed in that case.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetch_error: Option<String>,
}

impl ScoredSet {
    /// Placeholder row for a set whose market data could not be fetched.
    pub fn failed(slug: &str, name: &str, mode: ExecutionMode, reason: String) -> Self {
        ScoredSet {
            set_slug: slug.to_string(),
            set_name: name.to_string(),
            set_price: 0.0,
            part_cost: 0.0,
            profit_margin: 0.0,
            profit_percentage: 0.0,
            instant_set_price: None,
            instant_part_cost: None,
            instant_profit_margin: None,
            instant_profit_percentage: None,
            patient_set_price: None,
            patient_part_cost: None,
            patient_profit_margin: None,
            patient_profit_percentage: None,
            part_details: Vec::new(),
            execution_mode: mode,
            volume: 0.0,
            bid_ask_ratio: 1.0,
            sell_side_competition: 0,
            liquidity_velocity: 1.0,
            liquidity_multiplier: 1.0,
            trend_slope: 0.0,
            trend_multiplier: 1.0,
            trend_direction: TrendDirection::Stable,
            volatility: 0.0,
            volatility_penalty: 1.0,
            risk_level: RiskLevel::Medium,
            contributions: ScoreContributions::default(),
            composite_score: 0.0,
            fetch_error: Some(reason),
        }
    }

}

/// Complete scored output of one analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub run_id: Option<i64>,
    pub timestamp: DateTime<Utc>,
    pub strategy: StrategyType,
    pub execution_mode: ExecutionMode,
    pub total_sets: usize,
    pub profitable_sets: usize,
    pub sets: Vec<ScoredSet>,
    /// True when served from the store rather than a fresh fetch.
    pub cached: bool,
}

/// Compact per-run row for the history list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: i64,
    pub timestamp: i64,
    pub date_string: String,
    pub strategy: String,
    pub execution_mode: String,
    pub set_count: usize,
    pub profitable_sets: usize,
    pub avg_profit: f64,
    pub max_profit: f64,
}

/// One projected row of `run_sets`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSetRow {
    pub set_slug: String,
    pub set_name: String,
    pub profit_margin: f64,
    pub lowest_price: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummaryStats {
    pub total_sets: usize,
    pub profitable_sets: usize,
    pub average_profit: f64,
    pub max_profit: f64,
    pub min_profit: f64,
}

/// Run detail without the full scored payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunDetail {
    pub run_id: i64,
    pub timestamp: i64,
    pub date_string: String,
    pub strategy: String,
    pub execution_mode: String,
    pub sets: Vec<RunSetRow>,
    pub summary: RunSummaryStats,
}

/// Orchestrator lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Idle,
    Running,
    Completed,
    Error,
}

/// Progress snapshot published to the status endpoint and the SSE stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub status: RunState,
    pub progress: Option<u8>,
    pub message: Option<String>,
    pub run_id: Option<i64>,
    pub error: Option<String>,
}

impl ProgressEvent {
    pub fn idle() -> Self {
        ProgressEvent {
            status: RunState::Idle,
            progress: None,
            message: None,
            run_id: None,
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, RunState::Completed | RunState::Error)
    }
}
