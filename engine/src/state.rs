//! Client state snapshot and the pure transition function that advances it.

use crate::market::{MarketNotReady, MarketPair, Token};
use crate::reconcile::OrderSets;
use crate::types::{Address, CancelEvent, FillEvent, LedgerEvent, RawOrder};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionKind {
    Transfer,
    #[serde(rename = "New Order")]
    NewOrder,
    Cancel,
    #[serde(rename = "Fill Order")]
    FillOrder,
}

impl TransactionKind {
    /// The ledger event that confirms a transaction of this kind.
    pub fn confirmed_by(self, event: &LedgerEvent) -> bool {
        matches!(
            (self, event),
            (TransactionKind::Transfer, LedgerEvent::Deposit(_) | LedgerEvent::Withdraw(_))
                | (TransactionKind::NewOrder, LedgerEvent::Order(_))
                | (TransactionKind::Cancel, LedgerEvent::Cancel(_))
                | (TransactionKind::FillOrder, LedgerEvent::Trade(_))
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum TransactionStatus {
    #[default]
    Idle,
    Pending,
    Successful,
    Failed { reason: String },
}

/// The single tracked transaction. A new request replaces whatever was here.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub kind: Option<TransactionKind>,
    #[serde(flatten)]
    pub status: TransactionStatus,
}

impl Transaction {
    pub fn is_pending(&self) -> bool {
        self.status == TransactionStatus::Pending
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderState {
    pub chain_id: Option<u64>,
    pub account: Option<Address>,
    /// native balance, human units
    pub ether_balance: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenState {
    #[serde(flatten)]
    pub token: Token,
    #[serde(with = "crate::types::raw_amount")]
    pub wallet_balance: u128,
    #[serde(with = "crate::types::raw_amount")]
    pub exchange_balance: u128,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeState {
    pub address: Option<Address>,
    pub orders: OrderSets,
    pub transaction: Transaction,
    /// most recent first
    pub events: Vec<LedgerEvent>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub version: u64,
    pub provider: ProviderState,
    pub tokens: Vec<TokenState>,
    pub exchange: ExchangeState,
}

impl Snapshot {
    pub fn market(&self) -> Result<MarketPair, MarketNotReady> {
        MarketPair::from_tokens(self.tokens.iter().map(|t| &t.token))
    }

    pub fn account(&self) -> Option<&Address> {
        self.provider.account.as_ref()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenSlot { First, Second }

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Balance {
    pub token: Address,
    #[serde(with = "crate::types::raw_amount")]
    pub wallet: u128,
    #[serde(with = "crate::types::raw_amount")]
    pub exchange: u128,
}

/// Named state transitions. Everything that changes a `Snapshot` goes through one of these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Transition {
    NetworkLoaded { chain_id: u64 },
    AccountLoaded { account: Address },
    EtherBalanceLoaded { balance: String },
    /// `First` starts a new market selection and drops the previous pair.
    TokenLoaded { slot: TokenSlot, token: Token },
    ExchangeLoaded { address: Address },
    BalancesLoaded { balances: Vec<Balance> },
    AllOrdersLoaded { orders: Vec<RawOrder> },
    CancelledOrdersLoaded { orders: Vec<CancelEvent> },
    FilledOrdersLoaded { orders: Vec<FillEvent> },
    TransactionRequest { kind: TransactionKind },
    TransactionFail { kind: TransactionKind, reason: String },
    Event { event: LedgerEvent },
}

/// Applies one transition. Returns an equal snapshot (same version) when the
/// transition changes nothing, e.g. a duplicate event delivery.
pub fn apply(prev: &Snapshot, transition: Transition) -> Snapshot {
    let mut next = prev.clone();
    match transition {
        Transition::NetworkLoaded { chain_id } => next.provider.chain_id = Some(chain_id),
        Transition::AccountLoaded { account } => next.provider.account = Some(account),
        Transition::EtherBalanceLoaded { balance } => next.provider.ether_balance = Some(balance),
        Transition::TokenLoaded { slot, token } => {
            let state = TokenState { token, wallet_balance: 0, exchange_balance: 0 };
            match slot {
                TokenSlot::First => next.tokens = vec![state],
                TokenSlot::Second => {
                    next.tokens.truncate(1);
                    next.tokens.push(state);
                }
            }
        }
        Transition::ExchangeLoaded { address } => next.exchange.address = Some(address),
        Transition::BalancesLoaded { balances } => {
            for b in balances {
                if let Some(t) = next.tokens.iter_mut().find(|t| t.token.address == b.token) {
                    t.wallet_balance = b.wallet;
                    t.exchange_balance = b.exchange;
                }
            }
        }
        Transition::AllOrdersLoaded { orders } => {
            for o in orders {
                next.exchange.orders.insert_order(o);
            }
        }
        Transition::CancelledOrdersLoaded { orders } => {
            for c in orders {
                next.exchange.orders.insert_cancel(c);
            }
        }
        Transition::FilledOrdersLoaded { orders } => {
            for f in orders {
                next.exchange.orders.insert_fill(f);
            }
        }
        Transition::TransactionRequest { kind } => {
            next.exchange.transaction = Transaction { kind: Some(kind), status: TransactionStatus::Pending };
        }
        Transition::TransactionFail { kind, reason } => {
            next.exchange.transaction = Transaction { kind: Some(kind), status: TransactionStatus::Failed { reason } };
        }
        Transition::Event { event } => apply_event(&mut next, event),
    }
    if next == *prev {
        return next;
    }
    next.version = prev.version + 1;
    next
}

fn apply_event(next: &mut Snapshot, event: LedgerEvent) {
    let sets = &mut next.exchange.orders;
    let fresh = match &event {
        LedgerEvent::Order(o) => sets.insert_order(o.clone()),
        LedgerEvent::Cancel(c) => sets.insert_cancel(c.clone()),
        LedgerEvent::Trade(f) => sets.insert_fill(f.clone()),
        LedgerEvent::Deposit(t) | LedgerEvent::Withdraw(t) => !next
            .exchange
            .events
            .iter()
            .filter_map(LedgerEvent::transfer)
            .any(|seen| seen.position() == t.position()),
    };
    if !fresh {
        return;
    }

    let mine = next.provider.account.as_ref() == Some(event.user());
    if let LedgerEvent::Deposit(t) | LedgerEvent::Withdraw(t) = &event {
        if mine {
            if let Some(ts) = next.tokens.iter_mut().find(|s| s.token.address == t.token) {
                ts.exchange_balance = t.balance;
            }
        }
    }
    let tx = &mut next.exchange.transaction;
    if mine && tx.is_pending() && tx.kind.is_some_and(|k| k.confirmed_by(&event)) {
        tx.status = TransactionStatus::Successful;
    }
    next.exchange.events.insert(0, event);
}
