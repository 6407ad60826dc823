//! Wire-format types for the market API.
//!
//! The upstream JSON is loosely shaped; these structs name only the fields we
//! consume and ignore the rest. Raw response envelopes convert into the
//! domain types (`OrderBook`, `Statistics`) consumed by the analysis engine.

use chrono::{DateTime, Utc};
use serde::Deserialize;

// ---------------------------------------------------------------------------
// Raw response envelopes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ItemListResponse {
    #[serde(default)]
    pub data: Vec<RawItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ItemDetailResponse {
    pub data: RawItem,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawItem {
    #[serde(default)]
    pub id: String,
    pub slug: String,
    #[serde(default)]
    pub i18n: Option<RawI18n>,
    #[serde(default, rename = "setParts")]
    pub set_parts: Option<Vec<String>>,
    #[serde(default = "default_quantity", rename = "quantityInSet")]
    pub quantity_in_set: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawI18n {
    #[serde(default)]
    pub en: Option<RawTranslation>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawTranslation {
    pub name: String,
}

fn default_quantity() -> u32 {
    1
}

impl RawItem {
    /// English display name, falling back to a title-cased slug.
    pub fn display_name(&self) -> String {
        if let Some(t) = self.i18n.as_ref().and_then(|i| i.en.as_ref()) {
            return t.name.clone();
        }
        title_case_slug(&self.slug)
    }
}

pub fn title_case_slug(slug: &str) -> String {
    slug.split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrdersResponse {
    pub data: RawOrders,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawOrders {
    #[serde(default)]
    pub sell: Vec<RawOrder>,
    #[serde(default)]
    pub buy: Vec<RawOrder>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawOrder {
    pub platinum: f64,
    #[serde(default = "default_order_quantity")]
    pub quantity: f64,
    #[serde(default)]
    pub user: Option<RawOrderUser>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawOrderUser {
    #[serde(default)]
    pub status: Option<String>,
}

fn default_order_quantity() -> f64 {
    1.0
}

impl RawOrder {
    /// The upstream reports trader presence; we honor it without relaxing.
    fn is_online(&self) -> bool {
        matches!(
            self.user
                .as_ref()
                .and_then(|u| u.status.as_deref())
                .unwrap_or(""),
            "ingame" | "online"
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatisticsResponse {
    pub payload: StatisticsPayload,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatisticsPayload {
    pub statistics_closed: RawClosedStatistics,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawClosedStatistics {
    #[serde(default, rename = "48hours")]
    pub hours48: Vec<RawStatEntry>,
    #[serde(default, rename = "90days")]
    pub days90: Vec<RawStatEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawStatEntry {
    pub datetime: String,
    #[serde(default)]
    pub volume: f64,
    #[serde(default)]
    pub median: f64,
    #[serde(default)]
    pub moving_avg: Option<f64>,
}

// ---------------------------------------------------------------------------
// Domain types
// ---------------------------------------------------------------------------

/// One entry of the catalog index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemIndexEntry {
    pub id: String,
    pub slug: String,
    pub name: String,
}

/// Parts decomposition for a single item.
#[derive(Debug, Clone)]
pub struct ItemDetail {
    pub id: String,
    pub slug: String,
    pub name: String,
    /// Part item identifiers, excluding the set item itself.
    pub set_parts: Vec<String>,
    pub quantity_in_set: u32,
}

impl From<RawItem> for ItemDetail {
    fn from(raw: RawItem) -> Self {
        let name = raw.display_name();
        let set_parts = raw
            .set_parts
            .clone()
            .unwrap_or_default()
            .into_iter()
            .filter(|p| *p != raw.id)
            .collect();
        ItemDetail {
            id: raw.id,
            slug: raw.slug,
            name,
            set_parts,
            quantity_in_set: raw.quantity_in_set,
        }
    }
}

/// One price level in the live order book.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrderLevel {
    pub price: f64,
    pub quantity: u32,
    pub online: bool,
}

/// Live order book for one item: sells ascending, buys descending.
#[derive(Debug, Clone, Default)]
pub struct OrderBook {
    pub sell: Vec<OrderLevel>,
    pub buy: Vec<OrderLevel>,
}

impl OrderBook {
    pub fn online_sells(&self) -> impl Iterator<Item = &OrderLevel> {
        self.sell.iter().filter(|o| o.online)
    }

    pub fn online_buys(&self) -> impl Iterator<Item = &OrderLevel> {
        self.buy.iter().filter(|o| o.online)
    }
}

impl From<RawOrders> for OrderBook {
    fn from(raw: RawOrders) -> Self {
        let mut sell: Vec<OrderLevel> = raw.sell.iter().filter_map(to_level).collect();
        let mut buy: Vec<OrderLevel> = raw.buy.iter().filter_map(to_level).collect();
        sell.sort_by(|a, b| a.price.total_cmp(&b.price));
        buy.sort_by(|a, b| b.price.total_cmp(&a.price));
        OrderBook { sell, buy }
    }
}

fn to_level(order: &RawOrder) -> Option<OrderLevel> {
    if !(order.platinum > 0.0) {
        return None;
    }
    let quantity = if order.quantity > 0.0 {
        order.quantity as u32
    } else {
        1
    };
    Some(OrderLevel {
        price: order.platinum,
        quantity,
        online: order.is_online(),
    })
}

/// One closed-trade statistics sample.
#[derive(Debug, Clone, PartialEq)]
pub struct StatPoint {
    pub timestamp: DateTime<Utc>,
    pub median: f64,
    pub volume: f64,
    pub moving_avg: Option<f64>,
}

/// Closed-trade statistics for one item, both granularities, time-ordered.
#[derive(Debug, Clone, Default)]
pub struct Statistics {
    /// Fine-grained samples covering the last 48 hours.
    pub hours48: Vec<StatPoint>,
    /// Daily samples covering the longer horizon.
    pub days90: Vec<StatPoint>,
}

impl From<RawClosedStatistics> for Statistics {
    fn from(raw: RawClosedStatistics) -> Self {
        Statistics {
            hours48: parse_series(&raw.hours48),
            days90: parse_series(&raw.days90),
        }
    }
}

fn parse_series(entries: &[RawStatEntry]) -> Vec<StatPoint> {
    let mut points: Vec<StatPoint> = entries
        .iter()
        .filter_map(|e| {
            let ts = DateTime::parse_from_rfc3339(&e.datetime).ok()?;
            Some(StatPoint {
                timestamp: ts.with_timezone(&Utc),
                median: e.median,
                volume: e.volume.max(0.0),
                moving_avg: e.moving_avg,
            })
        })
        .collect();
    points.sort_by_key(|p| p.timestamp);
    points
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_book_sorts_and_flags_presence() {
        let raw: OrdersResponse = serde_json::from_str(
            r#"{"data":{"sell":[
                {"platinum":30.0,"quantity":2,"user":{"status":"ingame"}},
                {"platinum":25.0,"quantity":1,"user":{"status":"offline"}},
                {"platinum":-1.0,"quantity":1,"user":{"status":"ingame"}}
            ],"buy":[
                {"platinum":10.0,"quantity":1,"user":{"status":"online"}},
                {"platinum":18.0,"quantity":3,"user":{"status":"ingame"}}
            ]}}"#,
        )
        .unwrap();

        let book: OrderBook = raw.data.into();
        assert_eq!(book.sell.len(), 2);
        assert_eq!(book.sell[0].price, 25.0);
        assert!(!book.sell[0].online);
        assert!(book.sell[1].online);

        assert_eq!(book.buy[0].price, 18.0);
        assert_eq!(book.online_buys().count(), 2);
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let raw: ItemDetailResponse = serde_json::from_str(
            r#"{"data":{"id":"abc","slug":"demo_set","tags":["set"],
                "setParts":["abc","part_a","part_b"],"quantityInSet":1,
                "i18n":{"en":{"name":"Demo Set","icon":"x.png"}}}}"#,
        )
        .unwrap();

        let detail: ItemDetail = raw.data.into();
        assert_eq!(detail.name, "Demo Set");
        // The set's own id is filtered out of the parts list.
        assert_eq!(detail.set_parts, vec!["part_a", "part_b"]);
    }

    #[test]
    fn statistics_skip_malformed_timestamps() {
        let raw: StatisticsResponse = serde_json::from_str(
            r#"{"payload":{"statistics_closed":{
                "48hours":[
                    {"datetime":"2026-07-30T10:00:00.000+00:00","volume":5,"median":42.0},
                    {"datetime":"not-a-date","volume":9,"median":40.0}
                ],
                "90days":[]}}}"#,
        )
        .unwrap();

        let stats: Statistics = raw.payload.statistics_closed.into();
        assert_eq!(stats.hours48.len(), 1);
        assert_eq!(stats.hours48[0].volume, 5.0);
    }

    #[test]
    fn title_case_fallback_for_missing_i18n() {
        assert_eq!(title_case_slug("demo_set"), "Demo Set");
        assert_eq!(title_case_slug("a__b"), "A B");
    }
}
