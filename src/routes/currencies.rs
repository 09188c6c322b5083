use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{get, patch, post},
};

use crate::{
    dto::currency::{
        ConvertQuery, ConvertResult, CreateCurrencyRequest, CurrencyList, CurrencyListQuery,
        RateList, RecalculateRatesRequest, UpdateCurrencyRequest, UpdateRateRequest,
        UpsertRateRequest,
    },
    error::AppResult,
    middleware::auth::{AuthUser, ensure_admin},
    models::{Currency, CurrencyRate},
    pricing::RebaseReport,
    response::ApiResponse,
    services::currency_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_currencies))
        .route("/convert", get(convert))
        .route("/{code}", get(get_currency))
}

pub fn admin_router() -> Router<AppState> {
    Router::new()
        .route("/", get(admin_list_currencies).post(create_currency))
        .route("/recalculate", post(recalculate_rates))
        .route("/{code}", patch(update_currency).delete(delete_currency))
        .route("/{code}/activate", post(activate_currency))
        .route("/{code}/deactivate", post(deactivate_currency))
        .route("/{code}/default", post(set_default_currency))
}

pub fn rates_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_rates).post(upsert_rate))
        .route("/{from}/{to}", patch(update_rate).delete(delete_rate))
}

#[utoipa::path(
    get,
    path = "/api/currencies",
    params(
        ("show_all" = Option<bool>, Query, description = "Include inactive currencies")
    ),
    responses(
        (status = 200, description = "Currencies", body = ApiResponse<CurrencyList>)
    ),
    tag = "Currencies"
)]
pub async fn list_currencies(
    State(state): State<AppState>,
    Query(query): Query<CurrencyListQuery>,
) -> AppResult<Json<ApiResponse<CurrencyList>>> {
    let resp = currency_service::list_currencies(&state, query).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    get,
    path = "/api/currencies/{code}",
    params(
        ("code" = String, Path, description = "ISO currency code")
    ),
    responses(
        (status = 200, description = "Currency", body = ApiResponse<Currency>),
        (status = 404, description = "Not Found")
    ),
    tag = "Currencies"
)]
pub async fn get_currency(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> AppResult<Json<ApiResponse<Currency>>> {
    let resp = currency_service::get_currency(&state, &code).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    get,
    path = "/api/currencies/convert",
    params(
        ("amount" = String, Query, description = "Amount to convert"),
        ("from" = Option<String>, Query, description = "Source currency, default base"),
        ("to" = Option<String>, Query, description = "Target currency, default base")
    ),
    responses(
        (status = 200, description = "Converted amount with rate provenance", body = ApiResponse<ConvertResult>),
        (status = 422, description = "Invalid currency code")
    ),
    tag = "Currencies"
)]
pub async fn convert(
    State(state): State<AppState>,
    Query(query): Query<ConvertQuery>,
) -> AppResult<Json<ApiResponse<ConvertResult>>> {
    let resp = currency_service::convert(&state, query).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    get,
    path = "/api/admin/currencies",
    responses(
        (status = 200, description = "All currencies, active or not", body = ApiResponse<CurrencyList>),
        (status = 403, description = "Forbidden")
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn admin_list_currencies(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<Json<ApiResponse<CurrencyList>>> {
    ensure_admin(&user)?;
    let query = CurrencyListQuery {
        show_all: Some(true),
    };
    let resp = currency_service::list_currencies(&state, query).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/admin/currencies",
    request_body = CreateCurrencyRequest,
    responses(
        (status = 200, description = "Currency created", body = ApiResponse<Currency>),
        (status = 409, description = "Currency already exists"),
        (status = 422, description = "Invalid code")
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn create_currency(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CreateCurrencyRequest>,
) -> AppResult<Json<ApiResponse<Currency>>> {
    let resp = currency_service::create_currency(&state, &user, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    patch,
    path = "/api/admin/currencies/{code}",
    params(
        ("code" = String, Path, description = "ISO currency code")
    ),
    request_body = UpdateCurrencyRequest,
    responses(
        (status = 200, description = "Currency updated", body = ApiResponse<Currency>),
        (status = 404, description = "Not Found"),
        (status = 422, description = "Default currency cannot be deactivated")
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn update_currency(
    State(state): State<AppState>,
    user: AuthUser,
    Path(code): Path<String>,
    Json(payload): Json<UpdateCurrencyRequest>,
) -> AppResult<Json<ApiResponse<Currency>>> {
    let resp = currency_service::update_currency(&state, &user, &code, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    delete,
    path = "/api/admin/currencies/{code}",
    params(
        ("code" = String, Path, description = "ISO currency code")
    ),
    responses(
        (status = 200, description = "Currency deleted"),
        (status = 409, description = "Currency still referenced"),
        (status = 422, description = "Default currency cannot be deleted")
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn delete_currency(
    State(state): State<AppState>,
    user: AuthUser,
    Path(code): Path<String>,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    let resp = currency_service::delete_currency(&state, &user, &code).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/admin/currencies/{code}/activate",
    params(
        ("code" = String, Path, description = "ISO currency code")
    ),
    responses(
        (status = 200, description = "Currency activated", body = ApiResponse<Currency>)
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn activate_currency(
    State(state): State<AppState>,
    user: AuthUser,
    Path(code): Path<String>,
) -> AppResult<Json<ApiResponse<Currency>>> {
    let resp = currency_service::set_currency_active(&state, &user, &code, true).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/admin/currencies/{code}/deactivate",
    params(
        ("code" = String, Path, description = "ISO currency code")
    ),
    responses(
        (status = 200, description = "Currency deactivated", body = ApiResponse<Currency>),
        (status = 422, description = "Default currency cannot be deactivated")
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn deactivate_currency(
    State(state): State<AppState>,
    user: AuthUser,
    Path(code): Path<String>,
) -> AppResult<Json<ApiResponse<Currency>>> {
    let resp = currency_service::set_currency_active(&state, &user, &code, false).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/admin/currencies/{code}/default",
    params(
        ("code" = String, Path, description = "ISO currency code")
    ),
    responses(
        (status = 200, description = "Default moved and rates rebased", body = ApiResponse<RebaseReport>),
        (status = 404, description = "Not Found"),
        (status = 422, description = "No rate links the old and new base")
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn set_default_currency(
    State(state): State<AppState>,
    user: AuthUser,
    Path(code): Path<String>,
) -> AppResult<Json<ApiResponse<RebaseReport>>> {
    let resp = currency_service::set_default_currency(&state, &user, &code).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/admin/currencies/recalculate",
    request_body = RecalculateRatesRequest,
    responses(
        (status = 200, description = "Rates reprojected onto the new base", body = ApiResponse<RebaseReport>),
        (status = 422, description = "No rate links the old and new base")
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn recalculate_rates(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<RecalculateRatesRequest>,
) -> AppResult<Json<ApiResponse<RebaseReport>>> {
    let resp = currency_service::recalculate_rates(&state, &user, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    get,
    path = "/api/admin/rates",
    responses(
        (status = 200, description = "Stored rates", body = ApiResponse<RateList>),
        (status = 403, description = "Forbidden")
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn list_rates(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<Json<ApiResponse<RateList>>> {
    let resp = currency_service::list_rates(&state, &user).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/admin/rates",
    request_body = UpsertRateRequest,
    responses(
        (status = 200, description = "Rate created or replaced", body = ApiResponse<CurrencyRate>),
        (status = 422, description = "Invalid pair or rate")
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn upsert_rate(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<UpsertRateRequest>,
) -> AppResult<Json<ApiResponse<CurrencyRate>>> {
    let resp = currency_service::upsert_rate(&state, &user, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    patch,
    path = "/api/admin/rates/{from}/{to}",
    params(
        ("from" = String, Path, description = "Source currency"),
        ("to" = String, Path, description = "Target currency")
    ),
    request_body = UpdateRateRequest,
    responses(
        (status = 200, description = "Rate updated", body = ApiResponse<CurrencyRate>),
        (status = 404, description = "Not Found")
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn update_rate(
    State(state): State<AppState>,
    user: AuthUser,
    Path((from, to)): Path<(String, String)>,
    Json(payload): Json<UpdateRateRequest>,
) -> AppResult<Json<ApiResponse<CurrencyRate>>> {
    let resp = currency_service::update_rate(&state, &user, &from, &to, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    delete,
    path = "/api/admin/rates/{from}/{to}",
    params(
        ("from" = String, Path, description = "Source currency"),
        ("to" = String, Path, description = "Target currency")
    ),
    responses(
        (status = 200, description = "Rate deleted"),
        (status = 404, description = "Not Found")
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn delete_rate(
    State(state): State<AppState>,
    user: AuthUser,
    Path((from, to)): Path<(String, String)>,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    let resp = currency_service::delete_rate(&state, &user, &from, &to).await?;
    Ok(Json(resp))
}
