//! Read-only views over a snapshot, as handed to the presentation layer.
//! Every view fails with `MarketNotReady` until both pair tokens are loaded.

use crate::book::{build_order_book, OrderBook};
use crate::candles::{self, Interval, PriceChart, SeriesOrder};
use crate::decorate::{decorate_all, DecoratedOrder, Intent, OrderType};
use crate::market::{MarketNotReady, MarketPair};
use crate::state::Snapshot;
use crate::types::{LedgerEvent, RawOrder};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilledOrder {
    #[serde(flatten)]
    pub order: DecoratedOrder,
    /// up/down against the previous fill
    pub price_class: Intent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MyFilledOrder {
    /// `order_type` here is from the viewer's side of the trade
    #[serde(flatten)]
    pub order: DecoratedOrder,
    pub order_sign: char,
}

fn pair_fills(snapshot: &Snapshot, pair: &MarketPair) -> Vec<RawOrder> {
    snapshot
        .exchange
        .orders
        .filled()
        .iter()
        .map(|f| f.as_order())
        .filter(|o| pair.contains(o))
        .collect()
}

fn sort_time_desc(orders: &mut [DecoratedOrder]) {
    orders.sort_by(|a, b| b.timestamp().cmp(&a.timestamp()));
}

pub fn order_book(snapshot: &Snapshot) -> Result<OrderBook, MarketNotReady> {
    let pair = snapshot.market()?;
    Ok(build_order_book(&snapshot.exchange.orders.open(), &pair))
}

pub fn price_chart(snapshot: &Snapshot, interval: Interval, order: SeriesOrder) -> Result<PriceChart, MarketNotReady> {
    let pair = snapshot.market()?;
    let mut fills = pair_fills(snapshot, &pair);
    fills.sort_by_key(|o| o.timestamp);
    let decorated = decorate_all(&fills, &pair);
    Ok(candles::price_chart(&decorated, interval, order))
}

/// Open orders created by the connected account, newest first.
pub fn my_open_orders(snapshot: &Snapshot) -> Result<Vec<DecoratedOrder>, MarketNotReady> {
    let pair = snapshot.market()?;
    let Some(account) = snapshot.account() else { return Ok(Vec::new()) };
    let open = snapshot.exchange.orders.open();
    let mut orders = decorate_all(open.iter().filter(|o| o.user == *account && pair.contains(o)), &pair);
    sort_time_desc(&mut orders);
    Ok(orders)
}

/// All fills in the pair, newest first, each tagged against the fill before it in time.
pub fn filled_orders(snapshot: &Snapshot) -> Result<Vec<FilledOrder>, MarketNotReady> {
    let pair = snapshot.market()?;
    let mut fills = pair_fills(snapshot, &pair);
    fills.sort_by_key(|o| o.timestamp);
    let mut previous: Option<rust_decimal::Decimal> = None;
    let mut out: Vec<FilledOrder> = decorate_all(&fills, &pair)
        .into_iter()
        .map(|order| {
            // the first fill has nothing to compare against and shows as up
            let price_class = match previous {
                Some(p) if p > order.token_price => Intent::Bearish,
                _ => Intent::Bullish,
            };
            previous = Some(order.token_price);
            FilledOrder { order, price_class }
        })
        .collect();
    out.sort_by(|a, b| b.order.timestamp().cmp(&a.order.timestamp()));
    Ok(out)
}

/// Fills where the connected account was maker or taker, newest first.
pub fn my_filled_orders(snapshot: &Snapshot) -> Result<Vec<MyFilledOrder>, MarketNotReady> {
    let pair = snapshot.market()?;
    let Some(account) = snapshot.account() else { return Ok(Vec::new()) };
    let mine: Vec<RawOrder> = snapshot
        .exchange
        .orders
        .filled()
        .iter()
        .filter(|f| f.user == *account || f.creator == *account)
        .map(|f| f.as_order())
        .filter(|o| pair.contains(o))
        .collect();
    let mut orders = decorate_all(&mine, &pair);
    sort_time_desc(&mut orders);
    Ok(orders
        .into_iter()
        .map(|mut order| {
            // as the taker we did the opposite of what the maker's order says
            if order.order.user != *account {
                order.order_type = order.order_type.opposite();
                order.intent = order.order_type.intent();
            }
            let order_sign = if order.order_type == OrderType::Buy { '+' } else { '-' };
            MyFilledOrder { order, order_sign }
        })
        .collect())
}

/// The audit log restricted to events caused by the connected account.
pub fn my_events(snapshot: &Snapshot) -> Vec<LedgerEvent> {
    let Some(account) = snapshot.account() else { return Vec::new() };
    snapshot
        .exchange
        .events
        .iter()
        .filter(|e| e.user() == account)
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::Token;
    use crate::state::{apply, TokenSlot, Transition};
    use crate::types::{CancelEvent, FillEvent, OrderId};
    use rust_decimal_macros::dec;

    const E18: u128 = 1_000_000_000_000_000_000;

    fn base() -> Snapshot {
        let s = Snapshot::default();
        let s = apply(&s, Transition::AccountLoaded { account: "0xme".into() });
        let s = apply(&s, Transition::TokenLoaded { slot: TokenSlot::First, token: Token::new("0xT0", "DAPP") });
        apply(&s, Transition::TokenLoaded { slot: TokenSlot::Second, token: Token::new("0xT1", "mETH") })
    }

    fn sell(id: u64, user: &str, amount0: u128, amount1: u128, ts: u64) -> RawOrder {
        RawOrder {
            id: OrderId(id),
            user: user.into(),
            token_get: "0xT1".into(),
            amount_get: amount1 * E18,
            token_give: "0xT0".into(),
            amount_give: amount0 * E18,
            timestamp: ts,
        }
    }

    fn fill_of(o: &RawOrder, filler: &str, ts: u64) -> FillEvent {
        FillEvent {
            id: o.id,
            user: filler.into(),
            creator: o.user.clone(),
            token_get: o.token_get.clone(),
            amount_get: o.amount_get,
            token_give: o.token_give.clone(),
            amount_give: o.amount_give,
            timestamp: ts,
        }
    }

    fn with_events(s: Snapshot, events: Vec<LedgerEvent>) -> Snapshot {
        events.into_iter().fold(s, |s, event| apply(&s, Transition::Event { event }))
    }

    #[test]
    fn test_views_not_ready_without_pair() {
        let s = apply(&Snapshot::default(), Transition::TokenLoaded { slot: TokenSlot::First, token: Token::new("0xa", "A") });
        assert_eq!(order_book(&s), Err(MarketNotReady));
        assert_eq!(price_chart(&s, Interval::M1, SeriesOrder::Asc), Err(MarketNotReady));
        assert_eq!(my_open_orders(&s), Err(MarketNotReady));
        assert_eq!(filled_orders(&s), Err(MarketNotReady));
        assert_eq!(my_filled_orders(&s), Err(MarketNotReady));
    }

    #[test]
    fn test_my_open_orders_filters_and_sorts() {
        let a = sell(1, "0xme", 1, 1, 100);
        let b = sell(2, "0xother", 1, 1, 200);
        let c = sell(3, "0xme", 1, 2, 300);
        let d = sell(4, "0xme", 1, 3, 400);
        let s = with_events(
            base(),
            vec![
                LedgerEvent::Order(a),
                LedgerEvent::Order(b),
                LedgerEvent::Order(c),
                LedgerEvent::Order(d),
                LedgerEvent::Cancel(CancelEvent { id: OrderId(4), user: "0xme".into(), timestamp: 401 }),
            ],
        );
        let mine = my_open_orders(&s).unwrap();
        let ids: Vec<u64> = mine.iter().map(|o| o.order.id.0).collect();
        assert_eq!(ids, vec![3, 1]);
        assert!(mine.iter().all(|o| o.order_type == OrderType::Sell));
        assert_eq!(order_book(&s).unwrap().sell_orders.len(), 3);
    }

    #[test]
    fn test_filled_orders_price_class() {
        let o1 = sell(1, "0xa1", 1, 2, 10);
        let o2 = sell(2, "0xa1", 1, 1, 20);
        let o3 = sell(3, "0xa1", 1, 1, 30);
        let o4 = sell(4, "0xa1", 1, 5, 40);
        // delivered out of time order
        let s = with_events(
            base(),
            vec![
                LedgerEvent::Trade(fill_of(&o3, "0xb", 300)),
                LedgerEvent::Trade(fill_of(&o1, "0xb", 100)),
                LedgerEvent::Trade(fill_of(&o4, "0xb", 400)),
                LedgerEvent::Trade(fill_of(&o2, "0xb", 200)),
            ],
        );
        let trades = filled_orders(&s).unwrap();
        let got: Vec<(u64, Intent)> = trades.iter().map(|t| (t.order.order.id.0, t.price_class)).collect();
        assert_eq!(
            got,
            vec![(4, Intent::Bullish), (3, Intent::Bullish), (2, Intent::Bearish), (1, Intent::Bullish)]
        );
    }

    #[test]
    fn test_my_filled_orders_inverts_for_taker() {
        let maker_sell = sell(1, "0xme", 1, 2, 10);
        let their_sell = sell(2, "0xother", 1, 3, 20);
        let unrelated = sell(3, "0xx", 1, 1, 30);
        let s = with_events(
            base(),
            vec![
                LedgerEvent::Trade(fill_of(&maker_sell, "0xother", 100)),
                LedgerEvent::Trade(fill_of(&their_sell, "0xme", 200)),
                LedgerEvent::Trade(fill_of(&unrelated, "0xy", 300)),
            ],
        );
        let mine = my_filled_orders(&s).unwrap();
        assert_eq!(mine.len(), 2);
        // newest first: we took their sell, so we bought
        assert_eq!(mine[0].order.order.id, OrderId(2));
        assert_eq!(mine[0].order.order_type, OrderType::Buy);
        assert_eq!(mine[0].order_sign, '+');
        assert_eq!(mine[0].order.intent, Intent::Bullish);
        assert_eq!(mine[1].order.order_type, OrderType::Sell);
        assert_eq!(mine[1].order_sign, '-');
    }

    #[test]
    fn test_price_chart_from_snapshot() {
        let o1 = sell(1, "0xa1", 1, 2, 0);
        let o2 = sell(2, "0xa1", 1, 4, 0);
        let mut off_pair = sell(3, "0xa1", 1, 9, 0);
        off_pair.token_get = "0xT9".into();
        let s = with_events(
            base(),
            vec![
                LedgerEvent::Trade(fill_of(&o2, "0xb", 70)),
                LedgerEvent::Trade(fill_of(&o1, "0xb", 10)),
                LedgerEvent::Trade(fill_of(&off_pair, "0xb", 20)),
            ],
        );
        let chart = price_chart(&s, Interval::M1, SeriesOrder::Asc).unwrap();
        assert_eq!(chart.series.len(), 2);
        assert_eq!(chart.last_price, dec!(4));
        assert_eq!(chart.series.iter().map(|c| c.trades).sum::<usize>(), 2);
    }

    #[test]
    fn test_my_events_and_no_account() {
        let s = with_events(base(), vec![LedgerEvent::Order(sell(1, "0xme", 1, 1, 1)), LedgerEvent::Order(sell(2, "0xz", 1, 1, 2))]);
        assert_eq!(my_events(&s).len(), 1);

        let anon = with_events(
            apply(
                &apply(&Snapshot::default(), Transition::TokenLoaded { slot: TokenSlot::First, token: Token::new("0xT0", "DAPP") }),
                Transition::TokenLoaded { slot: TokenSlot::Second, token: Token::new("0xT1", "mETH") },
            ),
            vec![LedgerEvent::Order(sell(1, "0xme", 1, 1, 1))],
        );
        assert!(my_open_orders(&anon).unwrap().is_empty());
        assert!(my_events(&anon).is_empty());
        assert_eq!(order_book(&anon).unwrap().sell_orders.len(), 1);
    }
}
