//! OHLC aggregation of filled orders into fixed time buckets.

use crate::decorate::DecoratedOrder;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Candlestick width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum Interval {
    #[serde(rename = "1m")]
    M1,
    #[default]
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "6h")]
    H6,
    #[serde(rename = "1d")]
    D1,
    #[serde(rename = "1w")]
    W1,
}

impl Interval {
    pub const ALL: [Interval; 7] =
        [Interval::M1, Interval::M5, Interval::M15, Interval::H1, Interval::H6, Interval::D1, Interval::W1];

    pub fn seconds(self) -> u64 {
        match self {
            Interval::M1 => 60,
            Interval::M5 => 300,
            Interval::M15 => 900,
            Interval::H1 => 3_600,
            Interval::H6 => 21_600,
            Interval::D1 => 86_400,
            Interval::W1 => 604_800,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Interval::M1 => "1m",
            Interval::M5 => "5m",
            Interval::M15 => "15m",
            Interval::H1 => "1h",
            Interval::H6 => "6h",
            Interval::D1 => "1d",
            Interval::W1 => "1w",
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.label()) }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unsupported interval `{0}` (expected one of 1m, 5m, 15m, 1h, 6h, 1d, 1w)")]
pub struct UnknownInterval(pub String);

impl FromStr for Interval {
    type Err = UnknownInterval;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Interval::ALL
            .into_iter()
            .find(|i| i.label() == s.trim())
            .ok_or_else(|| UnknownInterval(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    /// bucket start, seconds since epoch
    pub timestamp: u64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub trades: usize,
}

pub fn bucket_start(ts: u64, interval: Interval) -> u64 {
    ts - ts % interval.seconds()
}

/// One candle per non-empty bucket, ascending by bucket start. Within a
/// bucket, open and close are the first and last orders as given, high and
/// low are by price.
pub fn aggregate(orders: &[DecoratedOrder], interval: Interval) -> Vec<Candle> {
    let mut buckets: BTreeMap<u64, Candle> = BTreeMap::new();
    for o in orders {
        let price = o.token_price;
        buckets
            .entry(bucket_start(o.timestamp(), interval))
            .and_modify(|c| {
                c.high = c.high.max(price);
                c.low = c.low.min(price);
                c.close = price;
                c.trades += 1;
            })
            .or_insert_with_key(|&timestamp| Candle {
                timestamp,
                open: price,
                high: price,
                low: price,
                close: price,
                trades: 1,
            });
    }
    buckets.into_values().collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriceChange {
    #[serde(rename = "+")]
    Up,
    #[serde(rename = "-")]
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeriesOrder {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceChart {
    pub interval: Interval,
    pub last_price: Decimal,
    pub last_price_change: PriceChange,
    pub series: Vec<Candle>,
}

/// `orders` must already be ascending by time. The last-price fields come
/// from the two most recent fills, not from the buckets; a missing fill
/// counts as price zero.
pub fn price_chart(orders: &[DecoratedOrder], interval: Interval, order: SeriesOrder) -> PriceChart {
    let price_at = |back: usize| {
        orders
            .len()
            .checked_sub(back)
            .and_then(|i| orders.get(i))
            .map(|o| o.token_price)
            .unwrap_or(Decimal::ZERO)
    };
    let last_price = price_at(1);
    let second_last = price_at(2);
    let mut series = aggregate(orders, interval);
    if order == SeriesOrder::Desc {
        series.reverse();
    }
    PriceChart {
        interval,
        last_price,
        last_price_change: if last_price >= second_last { PriceChange::Up } else { PriceChange::Down },
        series,
    }
}
