/*!
 * # pastyshop-api
 *
 * Backend service for the pastyshop storefront: session-backed carts,
 * coupon discounts, co-purchase recommendations, order snapshots and
 * Stripe Checkout payments.
 */

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod message_queue;
pub mod migrator;
pub mod openapi;
pub mod services;
pub mod sessions;

use crate::{
    config::AppConfig,
    db::DbPool,
    events::EventSender,
    message_queue::MessageQueue,
    services::{
        recommender::ScoreStore, CartService, CouponService, OrderService, ProductService,
        Recommender, StripeCheckoutService,
    },
    sessions::SessionStore,
};
use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    compression::CompressionLayer,
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// The wired service layer. Cloning is cheap; everything inside is shared.
#[derive(Clone)]
pub struct AppServices {
    pub products: ProductService,
    pub carts: CartService,
    pub coupons: CouponService,
    pub orders: OrderService,
    pub payments: StripeCheckoutService,
    pub recommender: Recommender,
    pub queue: Arc<dyn MessageQueue>,
    pub sessions: Arc<dyn SessionStore>,
    pub event_sender: Arc<EventSender>,
}

impl AppServices {
    /// Wires the full service graph from its injected backends.
    pub fn build(
        db: Arc<DbPool>,
        sessions: Arc<dyn SessionStore>,
        scores: Arc<dyn ScoreStore>,
        queue: Arc<dyn MessageQueue>,
        event_sender: Arc<EventSender>,
        config: &AppConfig,
    ) -> Self {
        let products = ProductService::new(db.clone());
        let carts = CartService::new(
            db.clone(),
            sessions.clone(),
            event_sender.clone(),
            config.cart_session_key.clone(),
        );
        let coupons = CouponService::new(db.clone(), sessions.clone(), event_sender.clone());
        let orders = OrderService::new(
            db.clone(),
            sessions.clone(),
            carts.clone(),
            coupons.clone(),
            queue.clone(),
            event_sender.clone(),
        );
        let payments = StripeCheckoutService::new(
            config.stripe_api_base.clone(),
            config.stripe_secret_key.clone(),
            config.currency.clone(),
            config.checkout_success_url.clone(),
            config.checkout_cancel_url.clone(),
            event_sender.clone(),
        );
        let recommender = Recommender::new(scores, db);

        Self {
            products,
            carts,
            coupons,
            orders,
            payments,
            recommender,
            queue,
            sessions,
            event_sender,
        }
    }
}

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DbPool>,
    pub redis: Option<Arc<redis::Client>>,
    pub config: Arc<AppConfig>,
    pub services: AppServices,
}

/// All versioned API routes.
pub fn api_v1_routes() -> Router<AppState> {
    Router::new()
        .nest("/products", handlers::products::routes())
        .nest("/carts", handlers::carts::routes())
        .nest("/orders", handlers::orders::routes())
        .nest(
            "/payments",
            handlers::payments::routes().merge(handlers::payment_webhooks::routes()),
        )
}

/// Builds the complete application router with middleware and docs.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/health", get(health))
        .nest("/api/v1", api_v1_routes())
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", openapi::ApiDoc::openapi()))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .with_state(state)
}

async fn status() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Liveness of the two stateful backends. Reports per-dependency status and
/// 503 overall when either is down.
async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let db_ok = db::check_connection(&state.db).await.is_ok();

    let redis_ok = match &state.redis {
        Some(client) => match client.get_async_connection().await {
            Ok(mut conn) => redis::cmd("PING")
                .query_async::<_, String>(&mut conn)
                .await
                .is_ok(),
            Err(_) => false,
        },
        None => true,
    };

    let healthy = db_ok && redis_ok;
    let status_code = if healthy {
        axum::http::StatusCode::OK
    } else {
        axum::http::StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(json!({
            "status": if healthy { "healthy" } else { "unhealthy" },
            "database": if db_ok { "up" } else { "down" },
            "redis": if redis_ok { "up" } else { "down" },
        })),
    )
}
