use crate::market::{scale_amount, AmountError, MarketPair};
use crate::types::RawOrder;
use chrono::DateTime;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub const PRICE_DECIMALS: u32 = 5;
pub const GREEN: &str = "#25CE8F";
pub const RED: &str = "#F45353";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType { Buy, Sell }

impl OrderType {
    /// What a counterparty does when filling an order of this type.
    pub fn opposite(self) -> Self {
        match self {
            OrderType::Buy => OrderType::Sell,
            OrderType::Sell => OrderType::Buy,
        }
    }

    pub fn intent(self) -> Intent {
        match self {
            OrderType::Buy => Intent::Bullish,
            OrderType::Sell => Intent::Bearish,
        }
    }
}

/// Display tag; rendered green or red.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent { Bullish, Bearish }

impl Intent {
    pub fn color(self) -> &'static str {
        match self {
            Intent::Bullish => GREEN,
            Intent::Bearish => RED,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecorateError {
    #[error("order {id}: {source}")]
    Amount { id: u64, #[source] source: AmountError },
    #[error("order {id} has a zero base amount")]
    ZeroAmount { id: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecoratedOrder {
    #[serde(flatten)]
    pub order: RawOrder,
    pub token0_amount: Decimal,
    pub token1_amount: Decimal,
    pub token_price: Decimal,
    pub formatted_timestamp: String,
    pub order_type: OrderType,
    pub intent: Intent,
}

impl DecoratedOrder {
    pub fn timestamp(&self) -> u64 {
        self.order.timestamp
    }
}

/// Adds the human-scaled amounts, unit price, formatted time and buy/sell
/// classification relative to `pair`.
pub fn decorate(order: &RawOrder, pair: &MarketPair) -> Result<DecoratedOrder, DecorateError> {
    let id = order.id.0;
    let gives_quote = order.token_give == pair.token1.address;
    let (raw0, raw1) = if gives_quote {
        (order.amount_get, order.amount_give)
    } else {
        (order.amount_give, order.amount_get)
    };
    let token0_amount =
        scale_amount(raw0, pair.token0.decimals).map_err(|source| DecorateError::Amount { id, source })?;
    let token1_amount =
        scale_amount(raw1, pair.token1.decimals).map_err(|source| DecorateError::Amount { id, source })?;
    let token_price = unit_price(token0_amount, token1_amount).ok_or(DecorateError::ZeroAmount { id })?;
    let order_type = if gives_quote { OrderType::Buy } else { OrderType::Sell };
    Ok(DecoratedOrder {
        order: order.clone(),
        token0_amount,
        token1_amount,
        token_price,
        formatted_timestamp: format_timestamp(order.timestamp),
        order_type,
        intent: order_type.intent(),
    })
}

/// Decorates every order, dropping (and logging) malformed ones.
pub fn decorate_all<'a, I>(orders: I, pair: &MarketPair) -> Vec<DecoratedOrder>
where
    I: IntoIterator<Item = &'a RawOrder>,
{
    orders
        .into_iter()
        .filter_map(|o| match decorate(o, pair) {
            Ok(d) => Some(d),
            Err(e) => {
                debug!(target = "engine", error = %e, "dropping undecoratable order");
                None
            }
        })
        .collect()
}

/// token1 per token0, rounded half away from zero to five places.
pub fn unit_price(token0_amount: Decimal, token1_amount: Decimal) -> Option<Decimal> {
    let mut price = token1_amount
        .checked_div(token0_amount)?
        .round_dp_with_strategy(PRICE_DECIMALS, RoundingStrategy::MidpointAwayFromZero);
    price.rescale(PRICE_DECIMALS);
    Some(price)
}

/// `h:mm:ssa d MMM D` in UTC, e.g. `3:04:05pm 2 Nov 14`.
pub fn format_timestamp(ts: u64) -> String {
    i64::try_from(ts)
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .map(|dt| dt.format("%-I:%M:%S%P %w %b %-d").to_string())
        .unwrap_or_default()
}
