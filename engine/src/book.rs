use crate::decorate::{decorate_all, DecoratedOrder, OrderType};
use crate::market::MarketPair;
use crate::types::RawOrder;
use serde::{Deserialize, Serialize};

/// An open order as listed in the book. `fill_action` is what filling it
/// does for the taker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookOrder {
    #[serde(flatten)]
    pub order: DecoratedOrder,
    pub fill_action: OrderType,
}

impl From<DecoratedOrder> for BookOrder {
    fn from(order: DecoratedOrder) -> Self {
        let fill_action = order.order_type.opposite();
        BookOrder { order, fill_action }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderBook {
    pub buy_orders: Vec<BookOrder>,
    pub sell_orders: Vec<BookOrder>,
}

/// Splits the open orders of `pair` into buy and sell sides, each sorted by
/// price descending. Equal prices keep the order the ledger delivered them in.
pub fn build_order_book(open: &[RawOrder], pair: &MarketPair) -> OrderBook {
    let decorated = decorate_all(open.iter().filter(|o| pair.contains(o)), pair);
    let (mut buy_orders, mut sell_orders): (Vec<BookOrder>, Vec<BookOrder>) =
        decorated.into_iter().map(BookOrder::from).partition(|o| o.order.order_type == OrderType::Buy);
    // sort_by is stable
    buy_orders.sort_by(|a, b| b.order.token_price.cmp(&a.order.token_price));
    sell_orders.sort_by(|a, b| b.order.token_price.cmp(&a.order.token_price));
    OrderBook { buy_orders, sell_orders }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::Token;
    use crate::types::OrderId;
    use rust_decimal_macros::dec;

    const E18: u128 = 1_000_000_000_000_000_000;

    fn pair() -> MarketPair {
        MarketPair::new(Token::new("0xT0", "DAPP"), Token::new("0xT1", "mETH"))
    }

    fn buy(id: u64, amount0: u128, amount1: u128) -> RawOrder {
        RawOrder {
            id: OrderId(id),
            user: "0xu".into(),
            token_get: "0xT0".into(),
            amount_get: amount0 * E18,
            token_give: "0xT1".into(),
            amount_give: amount1 * E18,
            timestamp: id,
        }
    }

    fn sell(id: u64, amount0: u128, amount1: u128) -> RawOrder {
        RawOrder {
            id: OrderId(id),
            user: "0xu".into(),
            token_get: "0xT1".into(),
            amount_get: amount1 * E18,
            token_give: "0xT0".into(),
            amount_give: amount0 * E18,
            timestamp: id,
        }
    }

    #[test]
    fn test_empty_input_gives_empty_book() {
        let book = build_order_book(&[], &pair());
        assert_eq!(book, OrderBook::default());
    }

    #[test]
    fn test_sides_sorted_descending() {
        let open = vec![buy(1, 10, 1), buy(2, 10, 3), buy(3, 10, 2), sell(4, 1, 5), sell(5, 1, 9)];
        let book = build_order_book(&open, &pair());
        let buy_prices: Vec<_> = book.buy_orders.iter().map(|o| o.order.token_price).collect();
        assert_eq!(buy_prices, vec![dec!(0.3), dec!(0.2), dec!(0.1)]);
        assert!(book.buy_orders.iter().all(|o| o.order.order_type == OrderType::Buy));
        let sell_prices: Vec<_> = book.sell_orders.iter().map(|o| o.order.token_price).collect();
        assert_eq!(sell_prices, vec![dec!(9), dec!(5)]);
        assert!(book.sell_orders.iter().all(|o| o.order.order_type == OrderType::Sell));
    }

    #[test]
    fn test_price_ties_keep_arrival_order() {
        let open = vec![sell(7, 1, 2), sell(3, 1, 2), sell(5, 1, 2)];
        let book = build_order_book(&open, &pair());
        let ids: Vec<u64> = book.sell_orders.iter().map(|o| o.order.order.id.0).collect();
        assert_eq!(ids, vec![7, 3, 5]);
    }

    #[test]
    fn test_entries_carry_fill_action() {
        let book = build_order_book(&[buy(1, 10, 1), sell(2, 1, 5)], &pair());
        assert_eq!(book.buy_orders[0].fill_action, OrderType::Sell);
        assert_eq!(book.sell_orders[0].fill_action, OrderType::Buy);

        let json = serde_json::to_value(&book).unwrap();
        assert_eq!(json["buyOrders"][0]["fillAction"], "sell");
        assert_eq!(json["buyOrders"][0]["orderType"], "buy");
        assert_eq!(json["sellOrders"][0]["fillAction"], "buy");
        assert_eq!(json["sellOrders"][0]["id"], 2);
    }

    #[test]
    fn test_third_token_orders_excluded() {
        let mut other = buy(9, 1, 1);
        other.token_give = "0xT2".into();
        let book = build_order_book(&[other, buy(1, 1, 1)], &pair());
        assert_eq!(book.buy_orders.len(), 1);
        assert!(book.sell_orders.is_empty());
    }
}
