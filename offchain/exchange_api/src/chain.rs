//! Ledger client (optional, behind the `onchain` feature).
//! Reads token/exchange state and event history, submits exchange transactions.

#[cfg(feature = "onchain")]
use ethers::{prelude::*, types::{Address as EthAddress, U256}};
#[cfg(feature = "onchain")]
use std::sync::Arc;

use engine::{Address, LedgerEvent, OrderId, OrderRequest};
use thiserror::Error;

#[cfg(feature = "onchain")]
abigen!(
    TokenContract,
    r#"[
        function symbol() external view returns (string)
        function balanceOf(address account) external view returns (uint256)
        function approve(address spender, uint256 value) external returns (bool)
    ]"#
);

#[cfg(feature = "onchain")]
abigen!(
    ExchangeContract,
    r#"[
        event Deposit(address token, address user, uint256 amount, uint256 balance)
        event Withdraw(address token, address user, uint256 amount, uint256 balance)
        event Order(uint256 id, address user, address tokenGet, uint256 amountGet, address tokenGive, uint256 amountGive, uint256 timestamp)
        event Cancel(uint256 id, address user, address tokenGet, uint256 amountGet, address tokenGive, uint256 amountGive, uint256 timestamp)
        event Trade(uint256 id, address user, address tokenGet, uint256 amountGet, address tokenGive, uint256 amountGive, address creator, uint256 timestamp)
        function balanceOf(address _token, address _user) external view returns (uint256)
        function depositToken(address _token, uint256 _amount) external
        function withdrawToken(address _token, uint256 _amount) external
        function makeOrder(address _tokenGet, uint256 _amountGet, address _tokenGive, uint256 _amountGive) external
        function cancelOrder(uint256 _id) external
        function fillOrder(uint256 _id) external
    ]"#
);

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("ledger client inactive (build with --features onchain and set RPC_URL, PRIVATE_KEY)")]
    Inactive,
    #[error("rpc: {0}")]
    Rpc(String),
    #[error("transaction {0} dropped before confirmation")]
    Dropped(String),
    #[error("ledger value out of range: {0}")]
    Range(String),
}

#[cfg(feature = "onchain")]
type Client = SignerMiddleware<Provider<Http>, LocalWallet>;

#[cfg(feature = "onchain")]
fn rpc<E: std::fmt::Display>(e: E) -> ChainError {
    ChainError::Rpc(e.to_string())
}

#[derive(Clone)]
pub struct ChainClient {
    #[cfg(feature = "onchain")]
    client: Option<Arc<Client>>,
    #[cfg(feature = "onchain")]
    exchange: Option<ExchangeContract<Client>>,
    // kept for status reporting
    pub exchange_address: Option<Address>,
}

impl ChainClient {
    pub fn new(rpc_url: Option<&str>, private_key: Option<&str>, chain_id: u64, exchange_address: Option<Address>) -> Self {
        #[cfg(feature = "onchain")]
        {
            if let (Some(url), Some(pk), Some(ex)) = (rpc_url, private_key, exchange_address.as_ref()) {
                if let Ok(provider) = Provider::<Http>::try_from(url) {
                    if let Ok(wallet) = pk.parse::<LocalWallet>() {
                        if let Ok(address) = ex.as_str().parse::<EthAddress>() {
                            let client = Arc::new(SignerMiddleware::new(provider, wallet.with_chain_id(chain_id)));
                            let exchange = ExchangeContract::new(address, client.clone());
                            return Self { client: Some(client), exchange: Some(exchange), exchange_address };
                        }
                    }
                }
            }
            tracing::warn!(target = "exchange", "ledger connection not configured; running off-chain");
            return Self { client: None, exchange: None, exchange_address };
        }
        #[cfg(not(feature = "onchain"))]
        {
            let _ = (rpc_url, private_key, chain_id);
            Self { exchange_address }
        }
    }

    pub fn is_active(&self) -> bool {
        #[cfg(feature = "onchain")]
        { self.client.is_some() && self.exchange.is_some() }
        #[cfg(not(feature = "onchain"))]
        { false }
    }

    #[cfg(feature = "onchain")]
    fn parts(&self) -> Result<(&Arc<Client>, &ExchangeContract<Client>), ChainError> {
        match (&self.client, &self.exchange) {
            (Some(c), Some(e)) => Ok((c, e)),
            _ => Err(ChainError::Inactive),
        }
    }

    pub async fn chain_id(&self) -> Result<u64, ChainError> {
        #[cfg(feature = "onchain")]
        {
            let (c, _) = self.parts()?;
            let id = c.get_chainid().await.map_err(rpc)?;
            return u64::try_from(id).map_err(|_| ChainError::Range(id.to_string()));
        }
        #[cfg(not(feature = "onchain"))]
        { Err(ChainError::Inactive) }
    }

    /// Address of the signing account.
    pub fn account(&self) -> Result<Address, ChainError> {
        #[cfg(feature = "onchain")]
        {
            let (c, _) = self.parts()?;
            return Ok(eth_addr(c.address()));
        }
        #[cfg(not(feature = "onchain"))]
        { Err(ChainError::Inactive) }
    }

    /// Native balance, formatted in ether.
    pub async fn ether_balance(&self, _account: &Address) -> Result<String, ChainError> {
        #[cfg(feature = "onchain")]
        {
            let (c, _) = self.parts()?;
            let who = parse_addr(_account)?;
            let wei = c.get_balance(who, None).await.map_err(rpc)?;
            return Ok(ethers::utils::format_ether(wei));
        }
        #[cfg(not(feature = "onchain"))]
        { Err(ChainError::Inactive) }
    }

    pub async fn token_symbol(&self, _token: &Address) -> Result<String, ChainError> {
        #[cfg(feature = "onchain")]
        {
            let (c, _) = self.parts()?;
            let t = TokenContract::new(parse_addr(_token)?, c.clone());
            return t.symbol().call().await.map_err(rpc);
        }
        #[cfg(not(feature = "onchain"))]
        { Err(ChainError::Inactive) }
    }

    /// (wallet balance, balance held by the exchange) in smallest units.
    pub async fn balances(&self, _token: &Address, _account: &Address) -> Result<(u128, u128), ChainError> {
        #[cfg(feature = "onchain")]
        {
            let (c, ex) = self.parts()?;
            let token = parse_addr(_token)?;
            let who = parse_addr(_account)?;
            let wallet = TokenContract::new(token, c.clone()).balance_of(who).call().await.map_err(rpc)?;
            let held = ex.balance_of(token, who).call().await.map_err(rpc)?;
            return Ok((to_u128(wallet)?, to_u128(held)?));
        }
        #[cfg(not(feature = "onchain"))]
        { Err(ChainError::Inactive) }
    }

    pub async fn block_number(&self) -> Result<u64, ChainError> {
        #[cfg(feature = "onchain")]
        {
            let (c, _) = self.parts()?;
            return Ok(c.get_block_number().await.map_err(rpc)?.as_u64());
        }
        #[cfg(not(feature = "onchain"))]
        { Err(ChainError::Inactive) }
    }

    /// All exchange events in `[from, to]`, in log order. Events that fail
    /// validation are logged and skipped.
    pub async fn events_between(&self, _from: u64, _to: u64) -> Result<Vec<LedgerEvent>, ChainError> {
        #[cfg(feature = "onchain")]
        {
            let (_, ex) = self.parts()?;
            let logs = ex.events().from_block(_from).to_block(_to).query_with_meta().await.map_err(rpc)?;
            let mut out = Vec::with_capacity(logs.len());
            for (log, meta) in logs {
                match convert_event(log, &meta) {
                    Ok(ev) => match ev.validate() {
                        Ok(()) => out.push(ev),
                        Err(e) => tracing::warn!(target = "exchange", error = %e, "skipping invalid ledger event"),
                    },
                    Err(e) => tracing::warn!(target = "exchange", error = %e, "skipping unconvertible ledger event"),
                }
            }
            return Ok(out);
        }
        #[cfg(not(feature = "onchain"))]
        { Err(ChainError::Inactive) }
    }

    /// Approves the exchange to pull `amount`, then deposits it.
    pub async fn deposit(&self, _token: &Address, _amount: u128) -> Result<String, ChainError> {
        #[cfg(feature = "onchain")]
        {
            let (c, ex) = self.parts()?;
            let token = parse_addr(_token)?;
            let amount = U256::from(_amount);
            let approve = TokenContract::new(token, c.clone()).approve(ex.address(), amount);
            confirm(approve.send().await.map_err(rpc)?).await?;
            let call = ex.deposit_token(token, amount);
            return confirm(call.send().await.map_err(rpc)?).await;
        }
        #[cfg(not(feature = "onchain"))]
        { Err(ChainError::Inactive) }
    }

    pub async fn withdraw(&self, _token: &Address, _amount: u128) -> Result<String, ChainError> {
        #[cfg(feature = "onchain")]
        {
            let (_, ex) = self.parts()?;
            let call = ex.withdraw_token(parse_addr(_token)?, U256::from(_amount));
            return confirm(call.send().await.map_err(rpc)?).await;
        }
        #[cfg(not(feature = "onchain"))]
        { Err(ChainError::Inactive) }
    }

    pub async fn make_order(&self, _req: &OrderRequest) -> Result<String, ChainError> {
        #[cfg(feature = "onchain")]
        {
            let (_, ex) = self.parts()?;
            let call = ex.make_order(
                parse_addr(&_req.token_get)?,
                U256::from(_req.amount_get),
                parse_addr(&_req.token_give)?,
                U256::from(_req.amount_give),
            );
            return confirm(call.send().await.map_err(rpc)?).await;
        }
        #[cfg(not(feature = "onchain"))]
        { Err(ChainError::Inactive) }
    }

    pub async fn cancel_order(&self, _id: OrderId) -> Result<String, ChainError> {
        #[cfg(feature = "onchain")]
        {
            let (_, ex) = self.parts()?;
            let call = ex.cancel_order(U256::from(_id.0));
            return confirm(call.send().await.map_err(rpc)?).await;
        }
        #[cfg(not(feature = "onchain"))]
        { Err(ChainError::Inactive) }
    }

    pub async fn fill_order(&self, _id: OrderId) -> Result<String, ChainError> {
        #[cfg(feature = "onchain")]
        {
            let (_, ex) = self.parts()?;
            let call = ex.fill_order(U256::from(_id.0));
            return confirm(call.send().await.map_err(rpc)?).await;
        }
        #[cfg(not(feature = "onchain"))]
        { Err(ChainError::Inactive) }
    }
}

/// Waits for the receipt and returns the tx hash.
#[cfg(feature = "onchain")]
async fn confirm(pending: PendingTransaction<'_, Http>) -> Result<String, ChainError> {
    let hash = format!("0x{}", hex::encode(pending.tx_hash().as_bytes()));
    match pending.await.map_err(rpc)? {
        Some(receipt) if receipt.status == Some(1u64.into()) => Ok(hash),
        Some(_) => Err(ChainError::Rpc(format!("transaction {hash} reverted"))),
        None => Err(ChainError::Dropped(hash)),
    }
}

#[cfg(feature = "onchain")]
fn parse_addr(a: &Address) -> Result<EthAddress, ChainError> {
    a.as_str().parse::<EthAddress>().map_err(|_| ChainError::Range(format!("bad address {a}")))
}

#[cfg(feature = "onchain")]
fn eth_addr(a: EthAddress) -> Address {
    Address::new(format!("{:?}", a))
}

#[cfg(feature = "onchain")]
fn to_u128(v: U256) -> Result<u128, ChainError> {
    u128::try_from(v).map_err(|_| ChainError::Range(v.to_string()))
}

#[cfg(feature = "onchain")]
fn to_u64(v: U256) -> Result<u64, ChainError> {
    u64::try_from(v).map_err(|_| ChainError::Range(v.to_string()))
}

#[cfg(feature = "onchain")]
fn convert_event(ev: ExchangeContractEvents, meta: &LogMeta) -> Result<LedgerEvent, ChainError> {
    use engine::{CancelEvent, FillEvent, RawOrder, TransferEvent};
    let block = meta.block_number.as_u64();
    let log_index = to_u64(meta.log_index)?;
    Ok(match ev {
        ExchangeContractEvents::OrderFilter(o) => LedgerEvent::Order(RawOrder {
            id: OrderId(to_u64(o.id)?),
            user: eth_addr(o.user),
            token_get: eth_addr(o.token_get),
            amount_get: to_u128(o.amount_get)?,
            token_give: eth_addr(o.token_give),
            amount_give: to_u128(o.amount_give)?,
            timestamp: to_u64(o.timestamp)?,
        }),
        ExchangeContractEvents::CancelFilter(c) => LedgerEvent::Cancel(CancelEvent {
            id: OrderId(to_u64(c.id)?),
            user: eth_addr(c.user),
            timestamp: to_u64(c.timestamp)?,
        }),
        ExchangeContractEvents::TradeFilter(t) => LedgerEvent::Trade(FillEvent {
            id: OrderId(to_u64(t.id)?),
            user: eth_addr(t.user),
            creator: eth_addr(t.creator),
            token_get: eth_addr(t.token_get),
            amount_get: to_u128(t.amount_get)?,
            token_give: eth_addr(t.token_give),
            amount_give: to_u128(t.amount_give)?,
            timestamp: to_u64(t.timestamp)?,
        }),
        ExchangeContractEvents::DepositFilter(d) => LedgerEvent::Deposit(TransferEvent {
            token: eth_addr(d.token),
            user: eth_addr(d.user),
            amount: to_u128(d.amount)?,
            balance: to_u128(d.balance)?,
            block,
            log_index,
        }),
        ExchangeContractEvents::WithdrawFilter(w) => LedgerEvent::Withdraw(TransferEvent {
            token: eth_addr(w.token),
            user: eth_addr(w.user),
            amount: to_u128(w.amount)?,
            balance: to_u128(w.balance)?,
            block,
            log_index,
        }),
    })
}
