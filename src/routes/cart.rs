use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{delete, get, patch, post},
};
use uuid::Uuid;

use crate::{
    dto::{
        cart::{AddCartItemRequest, ApplyCouponRequest, CurrencyQuery, UpdateCartItemRequest},
        coupons::CouponPreview,
    },
    error::AppResult,
    middleware::auth::AuthUser,
    models::Cart,
    response::ApiResponse,
    services::{cart_service, coupon_service},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(get_cart).delete(clear_cart))
        .route("/items", post(add_item))
        .route("/items/{id}", patch(update_item).delete(remove_item))
        .route("/coupons", post(apply_coupon))
        .route("/coupons/validate", post(validate_coupon))
        .route("/coupons/{code}", delete(remove_coupon))
}

#[utoipa::path(
    get,
    path = "/api/cart",
    params(
        ("currency" = Option<String>, Query, description = "Display currency, defaults to the user's preference")
    ),
    responses(
        (status = 200, description = "Current user's cart", body = ApiResponse<Cart>),
        (status = 422, description = "Unknown or inactive currency")
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn get_cart(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<CurrencyQuery>,
) -> AppResult<Json<ApiResponse<Cart>>> {
    let resp = cart_service::get_cart(&state, &user, query.currency).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/cart/items",
    params(
        ("currency" = Option<String>, Query, description = "Display currency")
    ),
    request_body = AddCartItemRequest,
    responses(
        (status = 200, description = "Item added, stock reserved", body = ApiResponse<Cart>),
        (status = 422, description = "Insufficient stock or invalid quantity")
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn add_item(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<CurrencyQuery>,
    Json(payload): Json<AddCartItemRequest>,
) -> AppResult<Json<ApiResponse<Cart>>> {
    let resp = cart_service::add_item(&state, &user, payload, query.currency).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    patch,
    path = "/api/cart/items/{id}",
    params(
        ("id" = Uuid, Path, description = "Cart item ID"),
        ("currency" = Option<String>, Query, description = "Display currency")
    ),
    request_body = UpdateCartItemRequest,
    responses(
        (status = 200, description = "Quantity updated; zero removes the line", body = ApiResponse<Cart>),
        (status = 422, description = "Insufficient stock or item not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn update_item(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Query(query): Query<CurrencyQuery>,
    Json(payload): Json<UpdateCartItemRequest>,
) -> AppResult<Json<ApiResponse<Cart>>> {
    let resp = cart_service::update_item(&state, &user, id, payload, query.currency).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    delete,
    path = "/api/cart/items/{id}",
    params(
        ("id" = Uuid, Path, description = "Cart item ID"),
        ("currency" = Option<String>, Query, description = "Display currency")
    ),
    responses(
        (status = 200, description = "Item removed, stock restored", body = ApiResponse<Cart>),
        (status = 422, description = "Item not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn remove_item(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Query(query): Query<CurrencyQuery>,
) -> AppResult<Json<ApiResponse<Cart>>> {
    let resp = cart_service::remove_item(&state, &user, id, query.currency).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    delete,
    path = "/api/cart",
    params(
        ("currency" = Option<String>, Query, description = "Display currency")
    ),
    responses(
        (status = 200, description = "Cart emptied, stock restored", body = ApiResponse<Cart>)
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn clear_cart(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<CurrencyQuery>,
) -> AppResult<Json<ApiResponse<Cart>>> {
    let resp = cart_service::clear_cart(&state, &user, query.currency).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/cart/coupons",
    params(
        ("currency" = Option<String>, Query, description = "Display currency")
    ),
    request_body = ApplyCouponRequest,
    responses(
        (status = 200, description = "Coupon applied", body = ApiResponse<Cart>),
        (status = 422, description = "Invalid, unusable, inapplicable or duplicate coupon")
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn apply_coupon(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<CurrencyQuery>,
    Json(payload): Json<ApplyCouponRequest>,
) -> AppResult<Json<ApiResponse<Cart>>> {
    let resp = coupon_service::apply_to_cart(&state, &user, &payload.code, query.currency).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/cart/coupons/validate",
    params(
        ("currency" = Option<String>, Query, description = "Display currency")
    ),
    request_body = ApplyCouponRequest,
    responses(
        (status = 200, description = "Discount the coupon would give", body = ApiResponse<CouponPreview>),
        (status = 422, description = "Invalid, unusable or inapplicable coupon")
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn validate_coupon(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<CurrencyQuery>,
    Json(payload): Json<ApplyCouponRequest>,
) -> AppResult<Json<ApiResponse<CouponPreview>>> {
    let resp = coupon_service::preview(&state, &user, &payload.code, query.currency).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    delete,
    path = "/api/cart/coupons/{code}",
    params(
        ("code" = String, Path, description = "Coupon code"),
        ("currency" = Option<String>, Query, description = "Display currency")
    ),
    responses(
        (status = 200, description = "Coupon removed, totals recomputed", body = ApiResponse<Cart>),
        (status = 422, description = "Coupon is not applied")
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn remove_coupon(
    State(state): State<AppState>,
    user: AuthUser,
    Path(code): Path<String>,
    Query(query): Query<CurrencyQuery>,
) -> AppResult<Json<ApiResponse<Cart>>> {
    let resp = coupon_service::remove_from_cart(&state, &user, &code, query.currency).await?;
    Ok(Json(resp))
}
