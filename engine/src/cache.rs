use crate::book::OrderBook;
use crate::candles::{Interval, PriceChart, SeriesOrder};
use crate::decorate::DecoratedOrder;
use crate::market::MarketNotReady;
use crate::state::Snapshot;
use crate::views::{self, FilledOrder, MyFilledOrder};
use rustc_hash::FxHashMap;

type View<T> = Result<T, MarketNotReady>;

/// Memoises the derived views of one snapshot lineage. Entries are valid for
/// a single `Snapshot::version`; any newer version clears the cache.
#[derive(Debug, Default)]
pub struct ViewCache {
    version: Option<u64>,
    book: Option<View<OrderBook>>,
    charts: FxHashMap<(Interval, SeriesOrder), View<PriceChart>>,
    my_open: Option<View<Vec<DecoratedOrder>>>,
    filled: Option<View<Vec<FilledOrder>>>,
    my_filled: Option<View<Vec<MyFilledOrder>>>,
    hits: u64,
}

impl ViewCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn sync(&mut self, snapshot: &Snapshot) {
        if self.version != Some(snapshot.version) {
            *self = ViewCache { version: Some(snapshot.version), hits: self.hits, ..Default::default() };
        }
    }

    /// How many lookups were answered without recomputing.
    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn order_book(&mut self, snapshot: &Snapshot) -> View<OrderBook> {
        self.sync(snapshot);
        memo(&mut self.book, &mut self.hits, || views::order_book(snapshot))
    }

    pub fn price_chart(&mut self, snapshot: &Snapshot, interval: Interval, order: SeriesOrder) -> View<PriceChart> {
        self.sync(snapshot);
        if let Some(hit) = self.charts.get(&(interval, order)) {
            self.hits += 1;
            return hit.clone();
        }
        let chart = views::price_chart(snapshot, interval, order);
        self.charts.insert((interval, order), chart.clone());
        chart
    }

    pub fn my_open_orders(&mut self, snapshot: &Snapshot) -> View<Vec<DecoratedOrder>> {
        self.sync(snapshot);
        memo(&mut self.my_open, &mut self.hits, || views::my_open_orders(snapshot))
    }

    pub fn filled_orders(&mut self, snapshot: &Snapshot) -> View<Vec<FilledOrder>> {
        self.sync(snapshot);
        memo(&mut self.filled, &mut self.hits, || views::filled_orders(snapshot))
    }

    pub fn my_filled_orders(&mut self, snapshot: &Snapshot) -> View<Vec<MyFilledOrder>> {
        self.sync(snapshot);
        memo(&mut self.my_filled, &mut self.hits, || views::my_filled_orders(snapshot))
    }
}

fn memo<T: Clone>(slot: &mut Option<T>, hits: &mut u64, compute: impl FnOnce() -> T) -> T {
    if let Some(v) = slot {
        *hits += 1;
        return v.clone();
    }
    slot.insert(compute()).clone()
}
