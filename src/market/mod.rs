//! Upstream market API client and wire types.

pub mod client;
pub mod wire;

pub use client::MarketClient;
pub use wire::{ItemDetail, ItemIndexEntry, OrderBook, OrderLevel, StatPoint, Statistics};
