use crate::{errors::ApiError, events::Event, AppState};
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
    Router,
};
use bytes::Bytes;
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use tracing::{error, info, warn};
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

const DEFAULT_TOLERANCE_SECS: u64 = 300;

pub fn routes() -> Router<AppState> {
    Router::new().route("/webhook", post(payment_webhook))
}

#[utoipa::path(
    post,
    path = "/api/v1/payments/webhook",
    request_body = String,
    responses(
        (status = 200, description = "Webhook accepted"),
        (status = 401, description = "Invalid signature", body = crate::errors::ErrorResponse),
        (status = 400, description = "Invalid payload", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(secret) = state.config.payment_webhook_secret.as_deref() {
        let tolerance = state
            .config
            .payment_webhook_tolerance_secs
            .unwrap_or(DEFAULT_TOLERANCE_SECS);
        if !verify_signature(&headers, &body, secret, tolerance, chrono::Utc::now().timestamp()) {
            warn!("Payment webhook signature verification failed");
            return Err(ApiError::Unauthorized("invalid webhook signature".to_string()));
        }
    }

    let json: Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("invalid json: {}", e)))?;

    let event_type = json.get("type").and_then(|v| v.as_str()).unwrap_or("");
    match event_type {
        "checkout.session.completed" => {
            handle_checkout_completed(&state, &json).await?;
        }
        other => {
            info!(event_type = other, "Unhandled payment webhook type");
        }
    }

    Ok((StatusCode::OK, "ok"))
}

/// Marks the referenced order paid and, on the first transition only,
/// dispatches the invoice message and trains the recommender with the
/// order's products.
async fn handle_checkout_completed(state: &AppState, json: &Value) -> Result<(), ApiError> {
    let object = json
        .pointer("/data/object")
        .ok_or_else(|| ApiError::BadRequest("missing data.object".to_string()))?;

    let mode = object.get("mode").and_then(|v| v.as_str()).unwrap_or("");
    let payment_status = object
        .get("payment_status")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    if mode != "payment" || payment_status != "paid" {
        info!(mode, payment_status, "Checkout session not a settled payment, ignored");
        return Ok(());
    }

    let order_id = object
        .get("client_reference_id")
        .and_then(|v| v.as_str())
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or_else(|| ApiError::BadRequest("missing client_reference_id".to_string()))?;

    let payment_reference = object
        .get("payment_intent")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::BadRequest("missing payment_intent".to_string()))?
        .to_string();

    let newly_paid = state
        .services
        .orders
        .mark_paid(order_id, &payment_reference)
        .await?;

    if !newly_paid {
        info!(order_id = %order_id, "Order already paid, webhook replay ignored");
        return Ok(());
    }

    let (order_row, items) = state.services.orders.get(order_id).await?;
    state.services.orders.dispatch_invoice(&order_row).await?;

    // Training signal. A down score store must not bounce the webhook:
    // the payment side effects above are already idempotent on replay.
    let product_ids: Vec<Uuid> = items.iter().map(|i| i.product_id).collect();
    match state.services.recommender.record_purchase(&product_ids).await {
        Ok(()) => {
            state
                .services
                .event_sender
                .send_or_log(Event::PurchaseRecorded {
                    order_id,
                    product_count: product_ids.len(),
                })
                .await;
        }
        Err(e) => {
            error!(order_id = %order_id, "Failed to record purchase for recommendations: {}", e);
        }
    }

    Ok(())
}

/// Verifies a `Stripe-Signature` header (`t=<ts>,v1=<hex hmac>`) against the
/// raw payload: HMAC-SHA256 over `"{t}.{payload}"`, constant-time compare,
/// timestamp within tolerance of `now_ts`.
fn verify_signature(
    headers: &HeaderMap,
    payload: &Bytes,
    secret: &str,
    tolerance_secs: u64,
    now_ts: i64,
) -> bool {
    let Some(sig) = headers.get("Stripe-Signature").and_then(|h| h.to_str().ok()) else {
        return false;
    };

    let mut ts = "";
    let mut v1 = "";
    for part in sig.split(',') {
        let mut it = part.trim().split('=');
        match (it.next(), it.next()) {
            (Some("t"), Some(val)) => ts = val,
            (Some("v1"), Some(val)) => v1 = val,
            _ => {}
        }
    }
    if ts.is_empty() || v1.is_empty() {
        return false;
    }

    let Ok(ts_i) = ts.parse::<i64>() else {
        return false;
    };
    if (now_ts - ts_i).unsigned_abs() > tolerance_secs {
        return false;
    }

    let signed = format!("{}.{}", ts, std::str::from_utf8(payload).unwrap_or(""));
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(signed.as_bytes());
    let expected = hex::encode(mac.finalize().into_bytes());
    constant_time_eq(&expected, v1)
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}
