//! Liquidity, trend and volatility metrics.
//!
//! Derived from the live order book and the closed-trade statistics series.
//! All statistics windows are measured from the end of the series rather than
//! wall clock, so replaying a captured series is deterministic.

use chrono::Duration;

use crate::market::{OrderBook, StatPoint};
use crate::models::TrendDirection;

/// Slope threshold separating rising/falling from stable.
pub const TREND_EPSILON: f64 = 0.01;

/// Sell orders within this fraction of the lowest ask count as competition.
const COMPETITION_BAND: f64 = 0.10;

/// Liquidity signals read off the order book.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BookLiquidity {
    /// Total online buy quantity over total online sell quantity (1.0 when
    /// the sell side is empty).
    pub bid_ask_ratio: f64,
    /// Count of online sell orders at or within 10% of the lowest ask.
    pub sell_side_competition: u32,
}

pub fn analyze_book(book: &OrderBook) -> BookLiquidity {
    let buy_qty: f64 = book.online_buys().map(|o| o.quantity as f64).sum();
    let sell_qty: f64 = book.online_sells().map(|o| o.quantity as f64).sum();
    let bid_ask_ratio = if sell_qty > 0.0 { buy_qty / sell_qty } else { 1.0 };

    let lowest_ask = book
        .online_sells()
        .map(|o| o.price)
        .fold(None, |acc: Option<f64>, p| Some(acc.map_or(p, |a| a.min(p))));
    let sell_side_competition = match lowest_ask {
        Some(lowest) => {
            let band = lowest * (1.0 + COMPETITION_BAND);
            book.online_sells().filter(|o| o.price <= band).count() as u32
        }
        None => 0,
    };

    BookLiquidity {
        bid_ask_ratio,
        sell_side_competition,
    }
}

/// Volume over the trailing 48 hours of the series, plus the liquidity
/// velocity: last-24h volume over prior-24h volume (> 1 means accelerating).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeMetrics {
    pub volume_48h: f64,
    pub velocity: f64,
}

pub fn volume_metrics(series: &[StatPoint]) -> VolumeMetrics {
    let Some(end) = series.last().map(|p| p.timestamp) else {
        return VolumeMetrics {
            volume_48h: 0.0,
            velocity: 1.0,
        };
    };

    let cutoff_48 = end - Duration::hours(48);
    let cutoff_24 = end - Duration::hours(24);

    let mut volume_48h = 0.0;
    let mut recent = 0.0;
    let mut older = 0.0;
    for point in series {
        if point.timestamp < cutoff_48 {
            continue;
        }
        volume_48h += point.volume;
        if point.timestamp >= cutoff_24 {
            recent += point.volume;
        } else {
            older += point.volume;
        }
    }

    let velocity = if older > 0.0 { recent / older } else { 1.0 };
    VolumeMetrics {
        volume_48h,
        velocity,
    }
}

/// Trend slope and price volatility over a median-price series.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PriceMetrics {
    /// Least-squares slope of median prices, per day, normalized by the mean
    /// price (0.01 == +1% of mean per day).
    pub trend_slope: f64,
    /// Coefficient of variation of the median prices (sigma over mu).
    pub volatility: f64,
}

pub fn price_metrics(series: &[StatPoint]) -> PriceMetrics {
    let n = series.len();
    if n < 2 {
        return PriceMetrics::default();
    }

    let t0 = series[0].timestamp;
    let xs: Vec<f64> = series
        .iter()
        .map(|p| (p.timestamp - t0).num_seconds() as f64 / 86_400.0)
        .collect();
    let ys: Vec<f64> = series.iter().map(|p| p.median).collect();

    let mean_x = xs.iter().sum::<f64>() / n as f64;
    let mean_y = ys.iter().sum::<f64>() / n as f64;

    let mut numerator = 0.0;
    let mut denominator = 0.0;
    for i in 0..n {
        let dx = xs[i] - mean_x;
        numerator += dx * (ys[i] - mean_y);
        denominator += dx * dx;
    }
    let raw_slope = if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    };
    let trend_slope = if mean_y > 0.0 { raw_slope / mean_y } else { 0.0 };

    // Sample standard deviation over mean price.
    let variance = ys.iter().map(|y| (y - mean_y).powi(2)).sum::<f64>() / (n as f64 - 1.0);
    let volatility = if mean_y > 0.0 {
        variance.sqrt() / mean_y
    } else {
        0.0
    };

    PriceMetrics {
        trend_slope,
        volatility,
    }
}

/// Deterministic function of the slope: rising above +epsilon, falling below
/// -epsilon, stable between.
pub fn trend_direction(slope: f64) -> TrendDirection {
    if slope > TREND_EPSILON {
        TrendDirection::Rising
    } else if slope < -TREND_EPSILON {
        TrendDirection::Falling
    } else {
        TrendDirection::Stable
    }
}
