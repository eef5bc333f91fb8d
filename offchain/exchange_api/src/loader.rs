//! Initial load from the ledger and market selection.

use crate::bridge::Bridge;
use crate::chain::ChainClient;
use crate::config::{NetworkConfig, Settings};
use anyhow::Result;
use engine::state::Balance;
use engine::{Address, LedgerEvent, Snapshot, Token, TokenSlot, Transition};
use tracing::{info, warn};

/// Loads network, account, exchange and order history into the snapshot.
/// Returns the block the history was read up to, if a ledger is connected.
pub async fn bootstrap(chain: &ChainClient, net: &NetworkConfig, settings: &Settings, bridge: &Bridge) -> Result<Option<u64>> {
    let chain_id = if chain.is_active() { chain.chain_id().await? } else { settings.chain_id };
    bridge.send(Transition::NetworkLoaded { chain_id }).await?;

    let account = match chain.account() {
        Ok(a) => Some(a),
        Err(_) => settings.account.as_deref().map(Address::new),
    };
    if let Some(account) = account.clone() {
        bridge.send(Transition::AccountLoaded { account: account.clone() }).await?;
        if chain.is_active() {
            let balance = chain.ether_balance(&account).await?;
            bridge.send(Transition::EtherBalanceLoaded { balance }).await?;
        }
    }

    bridge.send(Transition::ExchangeLoaded { address: net.exchange.address.clone() }).await?;

    if let Some([base, quote]) = net.default_market() {
        select_market(chain, net, bridge, base, quote).await?;
    } else {
        warn!(target = "exchange", "no markets configured");
    }

    if !chain.is_active() {
        info!(target = "exchange", chain_id, "off-chain mode; ledger events accepted on /ledger/events");
        return Ok(None);
    }
    let head = chain.block_number().await?;
    let history = chain.events_between(0, head).await?;
    let (mut orders, mut cancels, mut fills) = (Vec::new(), Vec::new(), Vec::new());
    for ev in history {
        match ev {
            LedgerEvent::Order(o) => orders.push(o),
            LedgerEvent::Cancel(c) => cancels.push(c),
            LedgerEvent::Trade(f) => fills.push(f),
            LedgerEvent::Deposit(_) | LedgerEvent::Withdraw(_) => {}
        }
    }
    info!(
        target = "exchange",
        head,
        orders = orders.len(),
        cancelled = cancels.len(),
        filled = fills.len(),
        "order history loaded"
    );
    bridge.send(Transition::AllOrdersLoaded { orders }).await?;
    bridge.send(Transition::CancelledOrdersLoaded { orders: cancels }).await?;
    bridge.send(Transition::FilledOrdersLoaded { orders: fills }).await?;
    Ok(Some(head))
}

/// Makes `base`/`quote` the active pair and refreshes its balances.
pub async fn select_market(chain: &ChainClient, net: &NetworkConfig, bridge: &Bridge, base: &str, quote: &str) -> Result<()> {
    let (t0, t1) = net.market(base, quote)?;
    let t0 = with_ledger_symbol(chain, t0).await;
    let t1 = with_ledger_symbol(chain, t1).await;
    info!(target = "exchange", base = %t0.symbol, quote = %t1.symbol, "market selected");
    bridge.send(Transition::TokenLoaded { slot: TokenSlot::First, token: t0 }).await?;
    let snap = bridge.commit(Transition::TokenLoaded { slot: TokenSlot::Second, token: t1 }).await?;
    load_balances(chain, bridge, &snap).await
}

async fn with_ledger_symbol(chain: &ChainClient, mut token: Token) -> Token {
    if chain.is_active() {
        match chain.token_symbol(&token.address).await {
            Ok(symbol) => token.symbol = symbol,
            Err(e) => warn!(target = "exchange", token = %token.address, error = %e, "symbol lookup failed"),
        }
    }
    token
}

/// Re-reads wallet and exchange balances of the active pair for the connected account.
pub async fn refresh_balances(chain: &ChainClient, bridge: &Bridge) -> Result<()> {
    load_balances(chain, bridge, &bridge.snapshot()).await
}

/// Balances for the pair and account of `snap`, which must already hold the
/// pair being loaded.
async fn load_balances(chain: &ChainClient, bridge: &Bridge, snap: &Snapshot) -> Result<()> {
    if !chain.is_active() {
        return Ok(());
    }
    let Some(account) = snap.account() else { return Ok(()) };
    let mut balances = Vec::with_capacity(snap.tokens.len());
    for t in &snap.tokens {
        let (wallet, exchange) = chain.balances(&t.token.address, account).await?;
        balances.push(Balance { token: t.token.address.clone(), wallet, exchange });
    }
    bridge.send(Transition::BalancesLoaded { balances }).await?;
    Ok(())
}
