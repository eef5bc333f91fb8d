use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, get_service, post};
use axum::{Json, Router};
use clap::Parser;
use engine::market::parse_amount;
use engine::{
    Address, Interval, LedgerEvent, MarketNotReady, OrderId, OrderRequest, SeriesOrder, Snapshot, TransactionKind,
    ViewCache,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod bridge;
mod chain;
mod config;
mod loader;

use bridge::Bridge;
use chain::ChainClient;
use config::{ExchangeConfig, NetworkConfig, Settings};

#[derive(Clone)]
struct AppState {
    bridge: Bridge,
    chain: ChainClient,
    network: Arc<NetworkConfig>,
    views: Arc<Mutex<ViewCache>>,
}

#[derive(Debug, Deserialize)]
struct MarketReq { base: String, quote: String }

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Side { Buy, Sell }

#[derive(Debug, Deserialize)]
struct PlaceOrderReq { side: Side, amount: Decimal, price: Decimal }

#[derive(Debug, Deserialize)]
struct TransferReq { token: String, amount: String }

#[derive(Debug, Deserialize)]
struct ChartQuery { interval: Option<String>, order: Option<SeriesOrder> }

#[derive(Debug, Serialize)]
struct Accepted { kind: TransactionKind }

// recover from poisoned mutexes without panicking
fn lock<'a, T>(m: &'a Mutex<T>, name: &str) -> std::sync::MutexGuard<'a, T> {
    match m.lock() {
        Ok(g) => g,
        Err(e) => {
            warn!(target = "exchange", "Recovered from poisoned mutex: {}", name);
            e.into_inner()
        }
    }
}

fn bad_request(msg: impl ToString) -> Response {
    (StatusCode::BAD_REQUEST, Json(serde_json::json!({ "error": msg.to_string() }))).into_response()
}

/// Not-ready views are a normal answer, not an error.
fn view<T: Serialize>(v: Result<T, MarketNotReady>) -> Response {
    match v {
        Ok(data) => Json(serde_json::json!({ "ready": true, "data": data })).into_response(),
        Err(_) => Json(serde_json::json!({ "ready": false })).into_response(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let settings = Settings::parse();
    let cfg = ExchangeConfig::load(&settings.config)?;
    let network = cfg
        .network(settings.chain_id)
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("no contracts configured for chain {}", settings.chain_id))?;

    let chain = ChainClient::new(
        settings.rpc_url.as_deref(),
        settings.private_key.as_deref(),
        settings.chain_id,
        Some(network.exchange.address.clone()),
    );
    let (bridge, _projector) = bridge::start(Snapshot::default());
    if let Some(head) = loader::bootstrap(&chain, &network, &settings, &bridge).await? {
        bridge::spawn_live_feed(chain.clone(), bridge.clone(), head, Duration::from_millis(settings.poll_interval_ms));
    }

    let app_state = AppState {
        bridge,
        chain,
        network: Arc::new(network),
        views: Arc::new(Mutex::new(ViewCache::new())),
    };

    let r = Router::new()
        .route("/status", get(status))
        .route("/state", get(get_state))
        .route("/orderbook", get(order_book))
        .route("/chart", get(price_chart))
        .route("/orders/mine", get(my_open_orders))
        .route("/trades", get(trades))
        .route("/trades/mine", get(my_trades))
        .route("/events/mine", get(my_events))
        .route("/market", post(select_market))
        .route("/orders", post(place_order))
        .route("/orders/:id/cancel", post(cancel_order))
        .route("/orders/:id/fill", post(fill_order))
        .route("/deposit", post(deposit))
        .route("/withdraw", post(withdraw))
        .route("/ledger/events", post(push_event))
        .route("/ws", get(ws));
    let r = match &settings.static_dir {
        Some(dir) => r.nest_service(
            "/app",
            get_service(ServeDir::new(dir)).handle_error(|e| async move {
                (StatusCode::INTERNAL_SERVER_ERROR, format!("static error: {}", e))
            }),
        ),
        None => r,
    };
    let app = r.layer(TraceLayer::new_for_http()).with_state(app_state);

    let listener = TcpListener::bind(&settings.bind).await?;
    info!("Listening on {}", settings.bind);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let snap = state.bridge.snapshot();
    Json(serde_json::json!({
        "onchain_feature": cfg!(feature = "onchain"),
        "active": state.chain.is_active(),
        "exchange_address": state.chain.exchange_address,
        "chain_id": snap.provider.chain_id,
        "version": snap.version,
    }))
}

async fn get_state(State(state): State<AppState>) -> impl IntoResponse {
    Json(Snapshot::clone(&state.bridge.snapshot()))
}

async fn order_book(State(state): State<AppState>) -> Response {
    let snap = state.bridge.snapshot();
    view(lock(&state.views, "views").order_book(&snap))
}

async fn price_chart(State(state): State<AppState>, Query(q): Query<ChartQuery>) -> Response {
    let interval = match q.interval.as_deref().map(str::parse::<Interval>).transpose() {
        Ok(i) => i.unwrap_or_default(),
        Err(e) => return bad_request(e),
    };
    let snap = state.bridge.snapshot();
    view(lock(&state.views, "views").price_chart(&snap, interval, q.order.unwrap_or_default()))
}

async fn my_open_orders(State(state): State<AppState>) -> Response {
    let snap = state.bridge.snapshot();
    view(lock(&state.views, "views").my_open_orders(&snap))
}

async fn trades(State(state): State<AppState>) -> Response {
    let snap = state.bridge.snapshot();
    view(lock(&state.views, "views").filled_orders(&snap))
}

async fn my_trades(State(state): State<AppState>) -> Response {
    let snap = state.bridge.snapshot();
    view(lock(&state.views, "views").my_filled_orders(&snap))
}

async fn my_events(State(state): State<AppState>) -> impl IntoResponse {
    Json(engine::views::my_events(&state.bridge.snapshot()))
}

async fn select_market(State(state): State<AppState>, Json(req): Json<MarketReq>) -> Response {
    match loader::select_market(&state.chain, &state.network, &state.bridge, &req.base, &req.quote).await {
        Ok(()) => Json(serde_json::json!({ "ok": true })).into_response(),
        Err(e) => bad_request(e),
    }
}

/// Runs the ledger call detached from the request so that a client hanging
/// up does not abandon a submitted transaction.
fn spawn_submission<F>(state: &AppState, kind: TransactionKind, call: F) -> Response
where
    F: std::future::Future<Output = Result<String, chain::ChainError>> + Send + 'static,
{
    let st = state.clone();
    tokio::spawn(async move {
        if let Some(tx) = st.bridge.submit(kind, call).await {
            info!(target = "exchange", ?kind, tx = %tx, "submitted");
            if let Err(e) = loader::refresh_balances(&st.chain, &st.bridge).await {
                warn!(target = "exchange", error = %e, "balance refresh failed");
            }
        }
    });
    (StatusCode::ACCEPTED, Json(Accepted { kind })).into_response()
}

async fn place_order(State(state): State<AppState>, Json(req): Json<PlaceOrderReq>) -> Response {
    let pair = match state.bridge.snapshot().market() {
        Ok(p) => p,
        Err(e) => return bad_request(e),
    };
    let built = match req.side {
        Side::Buy => OrderRequest::buy(&pair, req.amount, req.price),
        Side::Sell => OrderRequest::sell(&pair, req.amount, req.price),
    };
    let order = match built {
        Ok(o) if o.amount_get > 0 && o.amount_give > 0 => o,
        Ok(_) => return bad_request("amount and price must be positive"),
        Err(e) => return bad_request(e),
    };
    let chain = state.chain.clone();
    spawn_submission(&state, TransactionKind::NewOrder, async move { chain.make_order(&order).await })
}

async fn cancel_order(State(state): State<AppState>, Path(id): Path<u64>) -> Response {
    let id = OrderId(id);
    let snap = state.bridge.snapshot();
    let owned = snap.exchange.orders.all().iter().any(|o| o.id == id && Some(&o.user) == snap.account());
    if !owned || !snap.exchange.orders.is_open(id) {
        return bad_request(format!("order {id} is not an open order of this account"));
    }
    let chain = state.chain.clone();
    spawn_submission(&state, TransactionKind::Cancel, async move { chain.cancel_order(id).await })
}

async fn fill_order(State(state): State<AppState>, Path(id): Path<u64>) -> Response {
    let id = OrderId(id);
    if !state.bridge.snapshot().exchange.orders.is_open(id) {
        return bad_request(format!("order {id} is not open"));
    }
    let chain = state.chain.clone();
    spawn_submission(&state, TransactionKind::FillOrder, async move { chain.fill_order(id).await })
}

fn transfer_terms(state: &AppState, req: &TransferReq) -> Result<(Address, u128), Response> {
    let token = state.network.resolve(&req.token).ok_or_else(|| bad_request(format!("unknown token {}", req.token)))?;
    let amount = parse_amount(&req.amount, token.decimals).map_err(bad_request)?;
    if amount == 0 {
        return Err(bad_request("amount must be positive"));
    }
    Ok((token.address, amount))
}

async fn deposit(State(state): State<AppState>, Json(req): Json<TransferReq>) -> Response {
    let (token, amount) = match transfer_terms(&state, &req) {
        Ok(t) => t,
        Err(resp) => return resp,
    };
    let chain = state.chain.clone();
    spawn_submission(&state, TransactionKind::Transfer, async move { chain.deposit(&token, amount).await })
}

async fn withdraw(State(state): State<AppState>, Json(req): Json<TransferReq>) -> Response {
    let (token, amount) = match transfer_terms(&state, &req) {
        Ok(t) => t,
        Err(resp) => return resp,
    };
    let chain = state.chain.clone();
    spawn_submission(&state, TransactionKind::Transfer, async move { chain.withdraw(&token, amount).await })
}

/// Off-chain mode only: ledger events arrive over HTTP instead of from the chain.
async fn push_event(State(state): State<AppState>, Json(event): Json<LedgerEvent>) -> Response {
    if state.chain.is_active() {
        return (StatusCode::CONFLICT, Json(serde_json::json!({ "error": "ledger is connected" }))).into_response();
    }
    match state.bridge.ingest(event).await {
        Ok(()) => Json(serde_json::json!({ "ok": true })).into_response(),
        Err(bridge::BridgeError::Invalid(e)) => {
            (StatusCode::UNPROCESSABLE_ENTITY, Json(serde_json::json!({ "error": e.to_string() }))).into_response()
        }
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, Json(serde_json::json!({ "error": e.to_string() }))).into_response(),
    }
}

async fn ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(|socket| async move { handle_ws(state, socket).await })
}

/// Pushes a notice for every published snapshot; clients re-read the views they show.
async fn handle_ws(state: AppState, mut socket: WebSocket) {
    let mut rx = state.bridge.subscribe();
    loop {
        let (version, tx_status) = {
            let snap = rx.borrow_and_update();
            (snap.version, serde_json::to_value(&snap.exchange.transaction).unwrap_or_default())
        };
        let msg = serde_json::json!({ "event": "state", "version": version, "transaction": tx_status });
        if socket.send(Message::Text(msg.to_string())).await.is_err() {
            break;
        }
        if rx.changed().await.is_err() {
            break;
        }
    }
}
