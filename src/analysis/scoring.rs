//! Composite scoring with strategy profiles.
//!
//! The score is deliberately multiplicative so that zeroing any factor zeroes
//! the whole score:
//!
//! ```text
//! base       = profit_margin * log10(max(volume, 10))
//! roi_factor = 1 + (profit_percentage / 100) * roi_weight
//! score      = base * roi_factor * trend_multiplier * liquidity_multiplier
//!              / volatility_penalty
//! ```
//!
//! Sets below the strategy's volume threshold or without positive margin stay
//! in the output with score 0 and are excluded from the profitable count.

use crate::models::{
    ExecutionMode, RiskLevel, ScoreContributions, ScoredSet, StrategyType, TrendDirection,
};

use super::liquidity::trend_direction;

/// Converts the normalized per-day slope into a trend multiplier before the
/// strategy weight is applied (a 1%/day move shifts the multiplier by 10%).
const TREND_SENSITIVITY: f64 = 10.0;

/// Named bundle of factor weights and thresholds.
#[derive(Debug, Clone, Copy)]
pub struct StrategyProfile {
    pub strategy: StrategyType,
    pub name: &'static str,
    pub description: &'static str,
    pub volatility_weight: f64,
    pub trend_weight: f64,
    pub roi_weight: f64,
    pub min_volume: f64,
    /// Volatility below this is Low risk, below `medium_risk_volatility`
    /// Medium, else High.
    pub low_risk_volatility: f64,
    pub medium_risk_volatility: f64,
}

const PROFILES: [StrategyProfile; 3] = [
    StrategyProfile {
        strategy: StrategyType::SafeSteady,
        name: "Safe & Steady",
        description: "Prioritizes low volatility and stable profits. Best for risk-averse traders.",
        volatility_weight: 1.5,
        trend_weight: 0.5,
        roi_weight: 0.8,
        min_volume: 50.0,
        low_risk_volatility: 0.10,
        medium_risk_volatility: 0.25,
    },
    StrategyProfile {
        strategy: StrategyType::Balanced,
        name: "Balanced",
        description: "Equal consideration of all factors. Good for general trading.",
        volatility_weight: 1.0,
        trend_weight: 1.0,
        roi_weight: 1.0,
        min_volume: 10.0,
        low_risk_volatility: 0.15,
        medium_risk_volatility: 0.35,
    },
    StrategyProfile {
        strategy: StrategyType::Aggressive,
        name: "Aggressive Growth",
        description: "Prioritizes high ROI and positive trends. Tolerates volatility for higher gains.",
        volatility_weight: 0.6,
        trend_weight: 1.3,
        roi_weight: 1.4,
        min_volume: 5.0,
        low_risk_volatility: 0.20,
        medium_risk_volatility: 0.45,
    },
];

pub fn profile(strategy: StrategyType) -> &'static StrategyProfile {
    PROFILES
        .iter()
        .find(|p| p.strategy == strategy)
        .expect("every strategy has a profile")
}

pub fn all_profiles() -> &'static [StrategyProfile] {
    &PROFILES
}

/// `1 + clamp(slope * k, -0.5, +0.5)` with `k` the strategy-weighted
/// sensitivity.
pub fn trend_multiplier(slope: f64, profile: &StrategyProfile) -> f64 {
    let k = TREND_SENSITIVITY * profile.trend_weight;
    1.0 + (slope * k).clamp(-0.5, 0.5)
}

/// `1 + volatility * v` with `v` the strategy weight.
pub fn volatility_penalty(volatility: f64, profile: &StrategyProfile) -> f64 {
    1.0 + volatility.max(0.0) * profile.volatility_weight
}

pub fn risk_level(volatility: f64, profile: &StrategyProfile) -> RiskLevel {
    if volatility < profile.low_risk_volatility {
        RiskLevel::Low
    } else if volatility < profile.medium_risk_volatility {
        RiskLevel::Medium
    } else {
        RiskLevel::High
    }
}

/// Geometric blend of normalized bid/ask, inverse sell-side competition and
/// liquidity velocity, clamped to [0.5, 1.5].
pub fn liquidity_multiplier(bid_ask_ratio: f64, competition: u32, velocity: f64) -> f64 {
    let demand = bid_ask_ratio.clamp(0.5, 1.5);
    let crowding = (10.0 / (10.0 + competition as f64)).max(0.5);
    let momentum = velocity.clamp(0.5, 1.5);
    (demand * crowding * momentum).cbrt().clamp(0.5, 1.5)
}

/// Score every set under `strategy`/`mode`, sort the list and return the
/// profitable count.
///
/// Selecting the mode rewrites the primary price fields from the captured
/// per-mode variants, so this is also the rescoring entry point: it runs on
/// already-captured data and never touches upstream.
pub fn apply_strategy(
    sets: &mut Vec<ScoredSet>,
    strategy: StrategyType,
    mode: ExecutionMode,
) -> usize {
    let profile = profile(strategy);

    for set in sets.iter_mut() {
        score_set(set, profile, mode);
    }

    sets.sort_by(|a, b| {
        b.composite_score
            .total_cmp(&a.composite_score)
            .then(b.profit_margin.total_cmp(&a.profit_margin))
            .then(a.set_slug.cmp(&b.set_slug))
    });

    sets.iter().filter(|s| s.composite_score > 0.0).count()
}

fn score_set(set: &mut ScoredSet, profile: &StrategyProfile, mode: ExecutionMode) {
    set.execution_mode = mode;

    // Primary fields follow the selected execution mode. A missing variant
    // (no price on either side) zeroes the set.
    let (set_price, part_cost, margin, pct) = match mode {
        ExecutionMode::Instant => (
            set.instant_set_price,
            set.instant_part_cost,
            set.instant_profit_margin,
            set.instant_profit_percentage,
        ),
        ExecutionMode::Patient => (
            set.patient_set_price,
            set.patient_part_cost,
            set.patient_profit_margin,
            set.patient_profit_percentage,
        ),
    };
    set.set_price = set_price.unwrap_or(0.0);
    set.part_cost = part_cost.unwrap_or(0.0);
    set.profit_margin = margin.unwrap_or(0.0);
    set.profit_percentage = pct.unwrap_or(0.0);

    set.trend_multiplier = trend_multiplier(set.trend_slope, profile);
    set.trend_direction = trend_direction(set.trend_slope);
    set.volatility_penalty = volatility_penalty(set.volatility, profile);
    set.risk_level = risk_level(set.volatility, profile);
    set.liquidity_multiplier = liquidity_multiplier(
        set.bid_ask_ratio,
        set.sell_side_competition,
        set.liquidity_velocity,
    );

    let volume_factor = set.volume.max(10.0).log10();
    let roi_factor = 1.0 + (set.profit_percentage / 100.0) * profile.roi_weight;

    set.contributions = ScoreContributions {
        profit: set.profit_margin,
        volume: volume_factor,
        roi: roi_factor,
        trend: set.trend_multiplier,
        liquidity: set.liquidity_multiplier,
        volatility: set.volatility_penalty,
    };

    let eligible = set.profit_margin > 0.0 && set.volume >= profile.min_volume;
    set.composite_score = if eligible {
        let base = set.profit_margin * volume_factor;
        (base * roi_factor * set.trend_multiplier * set.liquidity_multiplier
            / set.volatility_penalty)
            .max(0.0)
    } else {
        0.0
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unscored(slug: &str, margin: f64, volume: f64) -> ScoredSet {
        let mut set = ScoredSet::failed(slug, slug, ExecutionMode::Instant, String::new());
        set.fetch_error = None;
        set.instant_set_price = Some(margin + 70.0);
        set.instant_part_cost = Some(70.0);
        set.instant_profit_margin = Some(margin);
        set.instant_profit_percentage = Some(margin / 70.0 * 100.0);
        set.patient_set_price = Some(margin + 69.0);
        set.patient_part_cost = Some(73.0);
        set.patient_profit_margin = Some(margin - 4.0);
        set.patient_profit_percentage = Some((margin - 4.0) / 73.0 * 100.0);
        set.volume = volume;
        set
    }

    #[test]
    fn profile_table_matches_strategy_weights() {
        let safe = profile(StrategyType::SafeSteady);
        assert_eq!(safe.volatility_weight, 1.5);
        assert_eq!(safe.min_volume, 50.0);

        let aggressive = profile(StrategyType::Aggressive);
        assert_eq!(aggressive.trend_weight, 1.3);
        assert_eq!(aggressive.roi_weight, 1.4);
        assert_eq!(aggressive.min_volume, 5.0);
    }

    #[test]
    fn profitable_set_scores_positive_under_balanced() {
        let mut sets = vec![unscored("demo_set", 80.0, 100.0)];
        let profitable = apply_strategy(&mut sets, StrategyType::Balanced, ExecutionMode::Instant);

        assert_eq!(profitable, 1);
        let s = &sets[0];
        assert_eq!(s.set_price, 150.0);
        assert_eq!(s.part_cost, 70.0);
        assert_eq!(s.profit_margin, 80.0);
        assert!((s.profit_percentage - 114.285_714_285_714_28).abs() < 1e-9);
        assert!(s.composite_score > 0.0);
        assert_eq!(s.trend_direction, crate::models::TrendDirection::Stable);
        assert_eq!(s.risk_level, RiskLevel::Low);
    }

    #[test]
    fn contributions_reconstruct_the_score() {
        let mut sets = vec![unscored("demo_set", 42.0, 250.0)];
        sets[0].trend_slope = 0.02;
        sets[0].volatility = 0.12;
        sets[0].bid_ask_ratio = 1.3;
        sets[0].sell_side_competition = 4;
        sets[0].liquidity_velocity = 1.2;
        apply_strategy(&mut sets, StrategyType::Aggressive, ExecutionMode::Instant);

        let s = &sets[0];
        let c = &s.contributions;
        let rebuilt = c.profit * c.volume * c.roi * c.trend * c.liquidity / c.volatility;
        assert!((rebuilt - s.composite_score).abs() < 1e-9);
    }

    #[test]
    fn below_volume_threshold_zeroes_score_but_keeps_the_set() {
        let mut sets = vec![unscored("demo_set", 80.0, 20.0)];
        let profitable = apply_strategy(&mut sets, StrategyType::SafeSteady, ExecutionMode::Instant);

        assert_eq!(profitable, 0);
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].composite_score, 0.0);
        assert_eq!(sets[0].profit_margin, 80.0);
    }

    #[test]
    fn non_positive_margin_zeroes_score() {
        let mut sets = vec![unscored("demo_set", -5.0, 500.0)];
        let profitable = apply_strategy(&mut sets, StrategyType::Balanced, ExecutionMode::Instant);
        assert_eq!(profitable, 0);
        assert_eq!(sets[0].composite_score, 0.0);
    }

    #[test]
    fn zero_volume_scores_zero_not_infinite() {
        let mut sets = vec![unscored("demo_set", 80.0, 0.0)];
        apply_strategy(&mut sets, StrategyType::Balanced, ExecutionMode::Instant);
        assert_eq!(sets[0].composite_score, 0.0);
        assert!(sets[0].contributions.volume.is_finite());
    }

    #[test]
    fn patient_mode_selects_patient_variant() {
        let mut sets = vec![unscored("demo_set", 80.0, 100.0)];
        apply_strategy(&mut sets, StrategyType::Balanced, ExecutionMode::Patient);

        let s = &sets[0];
        assert_eq!(s.set_price, 149.0);
        assert_eq!(s.part_cost, 73.0);
        assert_eq!(s.profit_margin, 76.0);
        assert_eq!(s.execution_mode, ExecutionMode::Patient);
    }

    #[test]
    fn ordering_is_score_then_margin_then_slug() {
        let mut a = unscored("a_set", 30.0, 100.0);
        let mut b = unscored("b_set", 30.0, 100.0);
        let c = unscored("c_set", 90.0, 100.0);
        // a and b tie on score inputs; slug breaks the tie.
        a.volatility = 0.0;
        b.volatility = 0.0;

        let mut sets = vec![b.clone(), c.clone(), a.clone()];
        apply_strategy(&mut sets, StrategyType::Balanced, ExecutionMode::Instant);

        assert_eq!(sets[0].set_slug, "c_set");
        assert_eq!(sets[1].set_slug, "a_set");
        assert_eq!(sets[2].set_slug, "b_set");
    }

    #[test]
    fn rescoring_is_idempotent() {
        let mut first = vec![unscored("a_set", 30.0, 100.0), unscored("b_set", 55.0, 40.0)];
        apply_strategy(&mut first, StrategyType::Aggressive, ExecutionMode::Patient);

        let mut second = first.clone();
        apply_strategy(&mut second, StrategyType::Aggressive, ExecutionMode::Patient);
        assert_eq!(first, second);
    }

    #[test]
    fn trend_multiplier_clamps_at_half() {
        let p = profile(StrategyType::Aggressive);
        assert_eq!(trend_multiplier(10.0, p), 1.5);
        assert_eq!(trend_multiplier(-10.0, p), 0.5);
    }

    #[test]
    fn liquidity_multiplier_stays_in_bounds() {
        for (ratio, comp, vel) in [
            (0.0, 0, 0.0),
            (100.0, 0, 100.0),
            (1.0, 1000, 1.0),
            (1.2, 3, 1.1),
        ] {
            let m = liquidity_multiplier(ratio, comp, vel);
            assert!((0.5..=1.5).contains(&m), "multiplier {m} out of bounds");
        }
    }

    #[test]
    fn risk_thresholds_are_strategy_specific() {
        assert_eq!(
            risk_level(0.12, profile(StrategyType::SafeSteady)),
            RiskLevel::Medium
        );
        assert_eq!(
            risk_level(0.12, profile(StrategyType::Balanced)),
            RiskLevel::Low
        );
        assert_eq!(
            risk_level(0.5, profile(StrategyType::Aggressive)),
            RiskLevel::High
        );
    }
}
