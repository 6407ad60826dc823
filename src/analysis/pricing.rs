//! Order-book price resolution.
//!
//! Reduces a live order book to the single price a trader would realize under
//! an execution mode. Only orders from online traders are eligible; offline
//! listings cannot be filled against.

use crate::market::OrderBook;
use crate::models::ExecutionMode;

/// Price at which we can *sell* one assembled set.
///
/// Instant: hit the best online bid. Patient: list one unit under the lowest
/// online ask (floored at 1, prices cannot go lower).
pub fn resolve_set_price(book: &OrderBook, mode: ExecutionMode) -> Option<f64> {
    match mode {
        ExecutionMode::Instant => book
            .online_buys()
            .map(|o| o.price)
            .fold(None, |acc: Option<f64>, p| Some(acc.map_or(p, |a| a.max(p)))),
        ExecutionMode::Patient => book
            .online_sells()
            .map(|o| o.price)
            .fold(None, |acc: Option<f64>, p| Some(acc.map_or(p, |a| a.min(p))))
            .map(|lowest| (lowest - 1.0).max(1.0)),
    }
}

/// Price at which we can *buy* one part.
///
/// Instant: lift the best online ask. Patient: post one unit over the highest
/// online bid and wait for a fill.
pub fn resolve_part_price(book: &OrderBook, mode: ExecutionMode) -> Option<f64> {
    match mode {
        ExecutionMode::Instant => book
            .online_sells()
            .map(|o| o.price)
            .fold(None, |acc: Option<f64>, p| Some(acc.map_or(p, |a| a.min(p)))),
        ExecutionMode::Patient => book
            .online_buys()
            .map(|o| o.price)
            .fold(None, |acc: Option<f64>, p| Some(acc.map_or(p, |a| a.max(p))))
            .map(|highest| highest + 1.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::OrderLevel;

    fn level(price: f64, online: bool) -> OrderLevel {
        OrderLevel {
            price,
            quantity: 1,
            online,
        }
    }

    fn book(sell: Vec<OrderLevel>, buy: Vec<OrderLevel>) -> OrderBook {
        OrderBook { sell, buy }
    }

    #[test]
    fn instant_set_sale_takes_top_online_bid() {
        let b = book(
            vec![level(160.0, true)],
            vec![level(150.0, true), level(155.0, false), level(140.0, true)],
        );
        assert_eq!(resolve_set_price(&b, ExecutionMode::Instant), Some(150.0));
    }

    #[test]
    fn patient_set_sale_undercuts_lowest_online_ask() {
        let b = book(
            vec![level(150.0, true), level(148.0, false)],
            vec![level(120.0, true)],
        );
        // Offline 148 is not undercuttable competition.
        assert_eq!(resolve_set_price(&b, ExecutionMode::Patient), Some(149.0));
    }

    #[test]
    fn patient_undercut_floors_at_one() {
        let b = book(vec![level(1.0, true)], vec![]);
        assert_eq!(resolve_set_price(&b, ExecutionMode::Patient), Some(1.0));
    }

    #[test]
    fn instant_part_buy_takes_lowest_online_ask() {
        let b = book(
            vec![level(30.0, true), level(28.0, false), level(35.0, true)],
            vec![],
        );
        assert_eq!(resolve_part_price(&b, ExecutionMode::Instant), Some(30.0));
    }

    #[test]
    fn patient_part_buy_outbids_highest_online_bid() {
        let b = book(vec![], vec![level(30.0, true), level(32.0, false)]);
        assert_eq!(resolve_part_price(&b, ExecutionMode::Patient), Some(31.0));
    }

    #[test]
    fn no_eligible_orders_yield_no_price() {
        let empty = book(vec![], vec![]);
        assert_eq!(resolve_set_price(&empty, ExecutionMode::Instant), None);
        assert_eq!(resolve_part_price(&empty, ExecutionMode::Patient), None);

        let offline_only = book(vec![level(10.0, false)], vec![level(5.0, false)]);
        assert_eq!(resolve_set_price(&offline_only, ExecutionMode::Patient), None);
        assert_eq!(resolve_part_price(&offline_only, ExecutionMode::Instant), None);
    }
}
