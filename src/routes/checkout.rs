use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::HeaderMap,
    routing::post,
};
use uuid::Uuid;

use crate::{
    dto::{
        cart::CurrencyQuery,
        checkout::{
            CheckoutRequest, CheckoutSummary, PaymentSessionRequest, PaymentSessionResponse,
            WebhookAck, WebhookEvent,
        },
        orders::OrderWithItems,
    },
    error::AppResult,
    middleware::auth::AuthUser,
    response::ApiResponse,
    services::checkout_service,
    state::AppState,
};

const WEBHOOK_SECRET_HEADER: &str = "x-webhook-secret";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_order))
        .route("/validate", post(validate))
        .route("/orders/{id}/payment-session", post(create_payment_session))
        .route("/webhook", post(webhook))
}

#[utoipa::path(
    post,
    path = "/api/checkout/validate",
    params(
        ("currency" = Option<String>, Query, description = "Display currency")
    ),
    responses(
        (status = 200, description = "Cart can be checked out", body = ApiResponse<CheckoutSummary>),
        (status = 422, description = "Empty cart, unavailable product or unusable coupon")
    ),
    security(("bearer_auth" = [])),
    tag = "Checkout"
)]
pub async fn validate(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<CurrencyQuery>,
) -> AppResult<Json<ApiResponse<CheckoutSummary>>> {
    let resp = checkout_service::validate(&state, &user, query.currency).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/checkout",
    params(
        ("currency" = Option<String>, Query, description = "Order currency, defaults to the user's preference")
    ),
    request_body = CheckoutRequest,
    responses(
        (status = 200, description = "Order created from the cart", body = ApiResponse<OrderWithItems>),
        (status = 422, description = "Cart failed validation"),
        (status = 500, description = "Operation failed, nothing was changed")
    ),
    security(("bearer_auth" = [])),
    tag = "Checkout"
)]
pub async fn create_order(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<CurrencyQuery>,
    Json(payload): Json<CheckoutRequest>,
) -> AppResult<Json<ApiResponse<OrderWithItems>>> {
    let resp = checkout_service::create_order(&state, &user, payload, query.currency).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/checkout/orders/{id}/payment-session",
    params(
        ("id" = Uuid, Path, description = "Order ID")
    ),
    request_body = PaymentSessionRequest,
    responses(
        (status = 200, description = "Gateway session created", body = ApiResponse<PaymentSessionResponse>),
        (status = 404, description = "Order not found"),
        (status = 422, description = "Order is not awaiting payment"),
        (status = 502, description = "Payment gateway failure")
    ),
    security(("bearer_auth" = [])),
    tag = "Checkout"
)]
pub async fn create_payment_session(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<PaymentSessionRequest>,
) -> AppResult<Json<ApiResponse<PaymentSessionResponse>>> {
    let resp = checkout_service::create_payment_session(&state, &user, id, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/checkout/webhook",
    request_body = WebhookEvent,
    responses(
        (status = 200, description = "Event acknowledged", body = ApiResponse<WebhookAck>),
        (status = 403, description = "Shared secret mismatch"),
        (status = 422, description = "Malformed event")
    ),
    tag = "Checkout"
)]
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(event): Json<WebhookEvent>,
) -> AppResult<Json<ApiResponse<WebhookAck>>> {
    let secret = headers
        .get(WEBHOOK_SECRET_HEADER)
        .and_then(|value| value.to_str().ok());
    let resp = checkout_service::handle_webhook(&state, secret, event).await?;
    Ok(Json(resp))
}
