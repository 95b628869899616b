use axum::{
    extract::{Path, Query, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use papertrade::application::services::trading_service::TradingService;
use papertrade::config::SimulatorConfig;
use papertrade::domain::errors::TradeError;
use papertrade::domain::services::trade_executor::OrderRequest;
use papertrade::domain::value_objects::symbol::AssetClass;
use papertrade::infrastructure::coinbase_client::CoinbaseSpotClient;
use papertrade::infrastructure::finnhub_client::FinnhubClient;
use papertrade::persistence::document_db::SqliteDocumentStore;
use papertrade::persistence::init_database;
use papertrade::rate_limit::{build_limiter, throttle_requests, ApiQuota};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "papertrade=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Papertrade simulation engine starting...");

    let config = SimulatorConfig::from_env();
    if config.api_keys.is_empty() {
        tracing::warn!(
            "No FINNHUB_API_KEYS configured; resolution will rely on fallback sources"
        );
    }

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "sqlite://data/papertrade.db".to_string());
    let pool = init_database(&database_url).await?;
    let store = Arc::new(SqliteDocumentStore::new(pool));

    let finnhub = Arc::new(FinnhubClient::new(config.provider_timeout)?);
    let coinbase = Arc::new(CoinbaseSpotClient::new(config.provider_timeout)?);

    let service = Arc::new(TradingService::new(
        &config,
        store,
        finnhub.clone(),
        finnhub,
        coinbase,
    ));

    let limiter = build_limiter(&ApiQuota::from_env());
    let app = Router::new()
        .route("/", get(|| async { "Papertrade simulation engine is running" }))
        .route("/health", get(health_check))
        .route("/users/:user_id", post(create_user))
        .route("/trade/buy", post(buy))
        .route("/trade/sell", post(sell))
        .route("/trade/estimate", post(estimate))
        .route("/portfolio/:user_id", get(portfolio))
        .route("/portfolio/:user_id/orders", get(recent_orders))
        .route("/quote/:symbol", get(quote))
        .layer(middleware::from_fn(move |request: Request, next: Next| {
            let limiter = limiter.clone();
            async move { throttle_requests(limiter, request, next).await }
        }))
        .with_state(service);

    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:3000".to_string());
    let addr: SocketAddr = bind_addr.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on {}", addr);

    let shutdown_signal = async {
        let ctrl_c = async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl+C signal"),
                Err(e) => error!("Failed to install Ctrl+C handler: {}", e),
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                    info!("Received SIGTERM signal");
                }
                Err(e) => error!("Failed to install SIGTERM handler: {}", e),
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
    };

    info!("Server started successfully. Press Ctrl+C to stop.");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    info!("Shutdown complete");
    Ok(())
}

#[derive(Deserialize)]
struct TradeBody {
    user_id: String,
    symbol: String,
    shares: f64,
    #[serde(default)]
    asset_class: AssetClass,
    #[serde(default)]
    idempotency_key: Option<String>,
    /// Optional override price; accepted on buys for testing flows.
    #[serde(default)]
    price: Option<f64>,
}

impl TradeBody {
    fn into_order(self) -> (OrderRequest, Option<f64>) {
        let price = self.price;
        (
            OrderRequest {
                user_id: self.user_id,
                symbol: self.symbol,
                shares: self.shares,
                asset_class: self.asset_class,
                idempotency_key: self.idempotency_key,
            },
            price,
        )
    }
}

#[derive(Deserialize)]
struct EstimateBody {
    symbol: String,
    shares: f64,
    #[serde(default)]
    asset_class: AssetClass,
}

#[derive(Deserialize)]
struct OrdersParams {
    limit: Option<usize>,
}

#[derive(Deserialize)]
struct QuoteParams {
    #[serde(default)]
    asset_class: AssetClass,
    #[serde(default)]
    refresh: bool,
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({ "status": "running" }))
}

async fn create_user(
    State(service): State<Arc<TradingService>>,
    Path(user_id): Path<String>,
) -> Response {
    match service.create_user(&user_id).await {
        Ok(balance) => Json(json!({
            "success": true,
            "user_id": user_id,
            "balance": balance,
        }))
        .into_response(),
        Err(e) => error_response(e),
    }
}

async fn buy(
    State(service): State<Arc<TradingService>>,
    Json(body): Json<TradeBody>,
) -> Response {
    let (order, price_override) = body.into_order();
    match service.buy(&order, price_override).await {
        Ok(outcome) => Json(json!({
            "success": true,
            "transaction_id": outcome.transaction_id,
            "new_balance": outcome.new_balance,
            "position": outcome.position,
            "fee": outcome.fee,
            "total": outcome.total,
            "degraded_price": outcome.degraded_price,
        }))
        .into_response(),
        Err(e) => error_response(e),
    }
}

async fn sell(
    State(service): State<Arc<TradingService>>,
    Json(body): Json<TradeBody>,
) -> Response {
    let (order, _) = body.into_order();
    match service.sell(&order).await {
        Ok(outcome) => {
            let position_removed = outcome.position.is_none();
            Json(json!({
                "success": true,
                "transaction_id": outcome.transaction_id,
                "new_balance": outcome.new_balance,
                "position": outcome.position,
                "position_removed": position_removed,
                "realized_pnl": outcome.realized_pnl,
                "fee": outcome.fee,
                "net_proceeds": outcome.total,
                "degraded_price": outcome.degraded_price,
            }))
            .into_response()
        }
        Err(e) => error_response(e),
    }
}

async fn estimate(
    State(service): State<Arc<TradingService>>,
    Json(body): Json<EstimateBody>,
) -> Response {
    match service
        .estimate(&body.symbol, body.shares, body.asset_class)
        .await
    {
        Ok(estimate) => Json(json!({ "success": true, "estimate": estimate })).into_response(),
        Err(e) => error_response(e),
    }
}

async fn portfolio(
    State(service): State<Arc<TradingService>>,
    Path(user_id): Path<String>,
) -> Response {
    match service.portfolio_summary(&user_id).await {
        Ok(summary) => Json(summary).into_response(),
        Err(e) => error_response(e),
    }
}

async fn recent_orders(
    State(service): State<Arc<TradingService>>,
    Path(user_id): Path<String>,
    Query(params): Query<OrdersParams>,
) -> Response {
    let limit = params.limit.unwrap_or(10).min(100);
    match service.recent_orders(&user_id, limit).await {
        Ok(orders) => Json(json!({ "orders": orders })).into_response(),
        Err(e) => error_response(e),
    }
}

async fn quote(
    State(service): State<Arc<TradingService>>,
    Path(symbol): Path<String>,
    Query(params): Query<QuoteParams>,
) -> Response {
    match service
        .quote(&symbol, params.asset_class, params.refresh)
        .await
    {
        Ok(result) => Json(json!({
            "quote": result.quote,
            "degraded": result.degraded,
        }))
        .into_response(),
        Err(e) => error_response(e),
    }
}

fn error_response(err: TradeError) -> Response {
    let status = match err.reason_code() {
        "invalid_symbol" | "invalid_shares" | "invalid_price" | "invalid_user" => {
            StatusCode::BAD_REQUEST
        }
        "unknown_user" => StatusCode::NOT_FOUND,
        "user_exists" | "duplicate_order" => StatusCode::CONFLICT,
        "insufficient_funds" | "insufficient_shares" => StatusCode::UNPROCESSABLE_ENTITY,
        "price_unavailable" => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!("Trade request failed: {}", err);
    }

    (
        status,
        Json(json!({
            "success": false,
            "error": err.to_string(),
            "reason": err.reason_code(),
        })),
    )
        .into_response()
}
