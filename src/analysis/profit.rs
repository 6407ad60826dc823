//! Profit margin calculation.
//!
//! `profit_margin = set_price - part_cost` with `part_cost` the sum of unit
//! price times quantity over the decomposition. A variant only exists when
//! the set and every part resolved to a price; a single missing part price
//! makes the whole variant unpriceable.

/// Resolved prices for one execution mode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProfitVariant {
    pub set_price: f64,
    pub part_cost: f64,
    pub profit_margin: f64,
    pub profit_percentage: f64,
}

/// Combine a resolved set price with per-part `(unit_price, quantity)` pairs.
///
/// Returns `None` when the set price or any part price is missing.
pub fn compute_variant(
    set_price: Option<f64>,
    parts: &[(Option<f64>, u32)],
) -> Option<ProfitVariant> {
    let set_price = set_price?;

    let mut part_cost = 0.0;
    for (unit_price, quantity) in parts {
        part_cost += (*unit_price)? * f64::from(*quantity);
    }

    let profit_margin = set_price - part_cost;
    let profit_percentage = if part_cost > 0.0 {
        profit_margin / part_cost * 100.0
    } else {
        0.0
    };

    Some(ProfitVariant {
        set_price,
        part_cost,
        profit_margin,
        profit_percentage,
    })
}
