//! Client-side derivation core for the exchange front end: turns ledger
//! order/cancel/trade events into an order book, trade history and candles,
//! and projects ledger events onto an immutable client snapshot.

pub mod book;
pub mod cache;
pub mod candles;
pub mod decorate;
pub mod market;
pub mod reconcile;
pub mod state;
pub mod types;
pub mod views;

pub use book::{build_order_book, BookOrder, OrderBook};
pub use cache::ViewCache;
pub use candles::{aggregate, Candle, Interval, PriceChange, PriceChart, SeriesOrder};
pub use decorate::{decorate, DecorateError, DecoratedOrder, Intent, OrderType};
pub use market::{AmountError, MarketNotReady, MarketPair, OrderRequest, Token};
pub use reconcile::{open_orders, OrderSets};
pub use state::{apply, Snapshot, TokenSlot, Transaction, TransactionKind, TransactionStatus, Transition};
pub use types::*;
