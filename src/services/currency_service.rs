use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Set, TransactionTrait, sea_query::Expr,
};

use crate::{
    audit::log_audit,
    config::AppConfig,
    dto::currency::{
        ConvertQuery, ConvertResult, CreateCurrencyRequest, CurrencyList, CurrencyListQuery,
        RateList, RecalculateRatesRequest, UpdateCurrencyRequest, UpdateRateRequest,
        UpsertRateRequest,
    },
    entity::{
        currencies::{
            ActiveModel as CurrencyActive, Column as CurrencyCol, Entity as Currencies,
            Model as CurrencyModel,
        },
        currency_rates::{Column as RateCol, Entity as CurrencyRates, Model as RateModel},
        users::{Column as UserCol, Entity as Users},
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::{Currency, CurrencyRate, DisplayRate},
    pricing::{
        DbRateStore, ExchangeRateResolver, PriceConverter, PriceDisplay, RateSource, RateStore,
        RebaseReport, converter::apply_rate, round_rate, validate_code,
    },
    response::{ApiResponse, Meta},
    state::AppState,
};

/// Currencies a single request prices in. Built per request and passed down
/// explicitly; nothing caches the base currency between requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricingContext {
    pub base_currency: String,
    pub display_currency: String,
    pub display_symbol: Option<String>,
}

impl PricingContext {
    pub fn base_only(base: impl Into<String>) -> Self {
        let base = base.into();
        Self {
            display_currency: base.clone(),
            base_currency: base,
            display_symbol: None,
        }
    }

    pub fn resolver<'a, C: ConnectionTrait>(
        &self,
        conn: &'a C,
    ) -> ExchangeRateResolver<DbRateStore<'a, C>> {
        ExchangeRateResolver::new(DbRateStore::new(conn), self.base_currency.clone())
    }

    /// Resolves base -> display once so a whole response uses one rate.
    pub async fn display_pricing(&self, conn: &impl ConnectionTrait) -> AppResult<DisplayPricing> {
        let resolved = self
            .resolver(conn)
            .resolve(&self.base_currency, &self.display_currency)
            .await?;
        Ok(DisplayPricing {
            rate: DisplayRate {
                base_currency: self.base_currency.clone(),
                currency: self.display_currency.clone(),
                rate: resolved.rate,
                source: resolved.source,
            },
            symbol: self.display_symbol.clone(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct DisplayPricing {
    pub rate: DisplayRate,
    symbol: Option<String>,
}

impl DisplayPricing {
    pub fn convert(&self, base_amount: Decimal) -> Decimal {
        if self.rate.source == RateSource::Identity {
            return base_amount;
        }
        apply_rate(base_amount, self.rate.rate)
    }

    pub fn display(&self, base_amount: Decimal) -> PriceDisplay {
        PriceDisplay::new(
            self.convert(base_amount),
            &self.rate.currency,
            self.symbol.as_deref(),
        )
    }
}

/// The currency flagged default, or the configured fallback when none is.
pub async fn base_currency(conn: &impl ConnectionTrait, config: &AppConfig) -> AppResult<String> {
    let default = Currencies::find()
        .filter(CurrencyCol::IsDefault.eq(true))
        .one(conn)
        .await?;
    Ok(default
        .map(|c| c.code)
        .unwrap_or_else(|| config.fallback_currency.clone()))
}

async fn active_currency(
    conn: &impl ConnectionTrait,
    code: &str,
) -> AppResult<Option<CurrencyModel>> {
    Ok(Currencies::find_by_id(code.to_owned())
        .one(conn)
        .await?
        .filter(|c| c.is_active))
}

/// Builds the pricing context for a request. An explicitly requested
/// currency must exist and be active; a stale stored preference quietly
/// falls back to the base currency.
pub async fn pricing_context(
    conn: &impl ConnectionTrait,
    config: &AppConfig,
    requested: Option<&str>,
    preferred: Option<&str>,
) -> AppResult<PricingContext> {
    let base = base_currency(conn, config).await?;

    let requested = requested.map(str::trim).filter(|c| !c.is_empty());
    let display = if let Some(raw) = requested {
        let code = validate_code(raw)?;
        match active_currency(conn, &code).await? {
            Some(currency) => Some(currency),
            None if code == base => None,
            None => {
                return Err(AppError::validation(
                    "currency",
                    format!("Currency '{code}' is not available."),
                ));
            }
        }
    } else if let Some(raw) = preferred {
        let found = match validate_code(raw) {
            Ok(code) => active_currency(conn, &code).await?,
            Err(_) => None,
        };
        if found.is_none() {
            tracing::warn!(preferred = %raw, base = %base, "preferred currency unavailable, using base");
        }
        found
    } else {
        None
    };

    match display {
        Some(currency) => Ok(PricingContext {
            base_currency: base,
            display_currency: currency.code,
            display_symbol: Some(currency.symbol),
        }),
        None => {
            let symbol = Currencies::find_by_id(base.clone())
                .one(conn)
                .await?
                .map(|c| c.symbol);
            Ok(PricingContext {
                display_currency: base.clone(),
                base_currency: base,
                display_symbol: symbol,
            })
        }
    }
}

/// Pricing context for an authenticated user: the token's currency claim
/// wins over the stored profile preference.
pub async fn context_for_user(
    conn: &impl ConnectionTrait,
    config: &AppConfig,
    user: &AuthUser,
    requested: Option<&str>,
) -> AppResult<PricingContext> {
    let preferred = match &user.currency {
        Some(code) => Some(code.clone()),
        None => Users::find_by_id(user.user_id)
            .one(conn)
            .await?
            .and_then(|u| u.currency),
    };
    pricing_context(conn, config, requested, preferred.as_deref()).await
}

pub async fn list_currencies(
    state: &AppState,
    query: CurrencyListQuery,
) -> AppResult<ApiResponse<CurrencyList>> {
    let mut finder = Currencies::find();
    if !query.show_all.unwrap_or(false) {
        finder = finder.filter(CurrencyCol::IsActive.eq(true));
    }
    let items: Vec<Currency> = finder
        .order_by_asc(CurrencyCol::Code)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(currency_from_entity)
        .collect();

    let total = items.len() as i64;
    Ok(ApiResponse::unpaged("Currencies", CurrencyList { items }, total))
}

pub async fn get_currency(state: &AppState, code: &str) -> AppResult<ApiResponse<Currency>> {
    let currency = find_currency(&state.orm, code).await?;
    Ok(ApiResponse::success(
        "Currency",
        currency_from_entity(currency),
        Some(Meta::empty()),
    ))
}

pub async fn create_currency(
    state: &AppState,
    user: &AuthUser,
    payload: CreateCurrencyRequest,
) -> AppResult<ApiResponse<Currency>> {
    ensure_admin(user)?;
    let code = validate_code(&payload.code)?;
    let name = required_text("name", &payload.name)?;
    let symbol = required_text("symbol", &payload.symbol)?;

    if Currencies::find_by_id(code.clone())
        .one(&state.orm)
        .await?
        .is_some()
    {
        return Err(AppError::Conflict(format!("currency {code} already exists")));
    }

    let now = Utc::now();
    let currency = CurrencyActive {
        code: Set(code),
        name: Set(name),
        symbol: Set(symbol),
        is_active: Set(payload.is_active),
        is_default: Set(false),
        created_at: Set(now.into()),
        updated_at: Set(now.into()),
    }
    .insert(&state.orm)
    .await?;

    audit(state, user, "currency_create", serde_json::json!({ "code": currency.code })).await;

    Ok(ApiResponse::success(
        "Currency created",
        currency_from_entity(currency),
        Some(Meta::empty()),
    ))
}

pub async fn update_currency(
    state: &AppState,
    user: &AuthUser,
    code: &str,
    payload: UpdateCurrencyRequest,
) -> AppResult<ApiResponse<Currency>> {
    ensure_admin(user)?;
    let existing = find_currency(&state.orm, code).await?;
    if payload.is_active == Some(false) && existing.is_default {
        return Err(AppError::validation(
            "is_active",
            "The default currency cannot be deactivated.",
        ));
    }

    let mut active: CurrencyActive = existing.into();
    if let Some(name) = payload.name {
        active.name = Set(required_text("name", &name)?);
    }
    if let Some(symbol) = payload.symbol {
        active.symbol = Set(required_text("symbol", &symbol)?);
    }
    if let Some(is_active) = payload.is_active {
        active.is_active = Set(is_active);
    }
    active.updated_at = Set(Utc::now().into());
    let currency = active.update(&state.orm).await?;

    audit(state, user, "currency_update", serde_json::json!({ "code": currency.code })).await;

    Ok(ApiResponse::success(
        "Currency updated",
        currency_from_entity(currency),
        Some(Meta::empty()),
    ))
}

pub async fn set_currency_active(
    state: &AppState,
    user: &AuthUser,
    code: &str,
    is_active: bool,
) -> AppResult<ApiResponse<Currency>> {
    update_currency(
        state,
        user,
        code,
        UpdateCurrencyRequest {
            is_active: Some(is_active),
            ..Default::default()
        },
    )
    .await
}

pub async fn delete_currency(
    state: &AppState,
    user: &AuthUser,
    code: &str,
) -> AppResult<ApiResponse<serde_json::Value>> {
    ensure_admin(user)?;
    let currency = find_currency(&state.orm, code).await?;
    if currency.is_default {
        return Err(AppError::validation(
            "code",
            "The default currency cannot be deleted.",
        ));
    }

    let users = Users::find()
        .filter(UserCol::Currency.eq(currency.code.clone()))
        .count(&state.orm)
        .await?;
    let rates = CurrencyRates::find()
        .filter(
            Condition::any()
                .add(RateCol::FromCurrency.eq(currency.code.clone()))
                .add(RateCol::ToCurrency.eq(currency.code.clone())),
        )
        .count(&state.orm)
        .await?;
    if users > 0 || rates > 0 {
        return Err(AppError::Conflict(format!(
            "currency {} is referenced by {users} users and {rates} rates",
            currency.code
        )));
    }

    Currencies::delete_by_id(currency.code.clone())
        .exec(&state.orm)
        .await?;

    audit(state, user, "currency_delete", serde_json::json!({ "code": currency.code })).await;

    Ok(ApiResponse::success(
        "Deleted",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}

/// Moves the default flag to `code` and reprojects stored rates onto it, in
/// one transaction. A rebase failure leaves the previous default in place.
pub async fn set_default_currency(
    state: &AppState,
    user: &AuthUser,
    code: &str,
) -> AppResult<ApiResponse<RebaseReport>> {
    ensure_admin(user)?;
    let code = validate_code(code)?;

    let txn = state.orm.begin().await?;
    let currency = Currencies::find_by_id(code.clone())
        .one(&txn)
        .await?
        .ok_or(AppError::NotFound)?;
    let old_base = base_currency(&txn, &state.config).await?;

    Currencies::update_many()
        .col_expr(CurrencyCol::IsDefault, Expr::value(false))
        .filter(CurrencyCol::IsDefault.eq(true))
        .exec(&txn)
        .await?;

    let mut active: CurrencyActive = currency.into();
    active.is_default = Set(true);
    active.is_active = Set(true);
    active.updated_at = Set(Utc::now().into());
    active.update(&txn).await?;

    let targets = active_codes(&txn).await?;
    let report = ExchangeRateResolver::new(DbRateStore::new(&txn), old_base)
        .rebase(&code, &targets)
        .await?;

    txn.commit().await?;

    audit(
        state,
        user,
        "currency_set_default",
        serde_json::json!({
            "old_base": report.old_base,
            "new_base": report.new_base,
            "updated_rates": report.updated_rates.len(),
        }),
    )
    .await;

    Ok(ApiResponse::success(
        "Default currency updated",
        report,
        Some(Meta::empty()),
    ))
}

/// Reprojects rates from the current base onto `new_base` without moving the
/// default flag.
pub async fn recalculate_rates(
    state: &AppState,
    user: &AuthUser,
    payload: RecalculateRatesRequest,
) -> AppResult<ApiResponse<RebaseReport>> {
    ensure_admin(user)?;
    let new_base = validate_code(&payload.new_base)?;

    let txn = state.orm.begin().await?;
    find_currency(&txn, &new_base).await?;
    let old_base = base_currency(&txn, &state.config).await?;
    let targets = active_codes(&txn).await?;
    let report = ExchangeRateResolver::new(DbRateStore::new(&txn), old_base)
        .rebase(&new_base, &targets)
        .await?;
    txn.commit().await?;

    audit(
        state,
        user,
        "currency_rates_recalculate",
        serde_json::json!({ "old_base": report.old_base, "new_base": report.new_base }),
    )
    .await;

    Ok(ApiResponse::success(
        "Rates recalculated",
        report,
        Some(Meta::empty()),
    ))
}

pub async fn list_rates(state: &AppState, user: &AuthUser) -> AppResult<ApiResponse<RateList>> {
    ensure_admin(user)?;
    let items: Vec<CurrencyRate> = CurrencyRates::find()
        .order_by_asc(RateCol::FromCurrency)
        .order_by_asc(RateCol::ToCurrency)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(rate_from_entity)
        .collect();
    let total = items.len() as i64;
    Ok(ApiResponse::unpaged("Rates", RateList { items }, total))
}

/// Creates the pair or overwrites its rate.
pub async fn upsert_rate(
    state: &AppState,
    user: &AuthUser,
    payload: UpsertRateRequest,
) -> AppResult<ApiResponse<CurrencyRate>> {
    ensure_admin(user)?;
    let from = validate_code(&payload.from_currency)?;
    let to = validate_code(&payload.to_currency)?;
    if from == to {
        return Err(AppError::validation(
            "to_currency",
            "A rate needs two different currencies.",
        ));
    }
    let rate = positive_rate(payload.rate)?;
    find_currency(&state.orm, &from).await?;
    find_currency(&state.orm, &to).await?;

    DbRateStore::new(&state.orm)
        .store_rate(&from, &to, rate)
        .await?;
    let stored = find_rate(&state.orm, &from, &to).await?;

    audit(
        state,
        user,
        "currency_rate_upsert",
        serde_json::json!({ "from": from, "to": to, "rate": rate }),
    )
    .await;

    Ok(ApiResponse::success(
        "Rate saved",
        rate_from_entity(stored),
        Some(Meta::empty()),
    ))
}

pub async fn update_rate(
    state: &AppState,
    user: &AuthUser,
    from: &str,
    to: &str,
    payload: UpdateRateRequest,
) -> AppResult<ApiResponse<CurrencyRate>> {
    ensure_admin(user)?;
    let from = validate_code(from)?;
    let to = validate_code(to)?;
    let rate = positive_rate(payload.rate)?;
    find_rate(&state.orm, &from, &to).await?;

    DbRateStore::new(&state.orm)
        .store_rate(&from, &to, rate)
        .await?;
    let stored = find_rate(&state.orm, &from, &to).await?;

    audit(
        state,
        user,
        "currency_rate_update",
        serde_json::json!({ "from": from, "to": to, "rate": rate }),
    )
    .await;

    Ok(ApiResponse::success(
        "Rate updated",
        rate_from_entity(stored),
        Some(Meta::empty()),
    ))
}

pub async fn delete_rate(
    state: &AppState,
    user: &AuthUser,
    from: &str,
    to: &str,
) -> AppResult<ApiResponse<serde_json::Value>> {
    ensure_admin(user)?;
    let from = validate_code(from)?;
    let to = validate_code(to)?;
    let result = CurrencyRates::delete_by_id((from.clone(), to.clone()))
        .exec(&state.orm)
        .await?;
    if result.rows_affected == 0 {
        return Err(AppError::NotFound);
    }

    audit(
        state,
        user,
        "currency_rate_delete",
        serde_json::json!({ "from": from, "to": to }),
    )
    .await;

    Ok(ApiResponse::success(
        "Deleted",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}

/// Converts an arbitrary amount. `from` and `to` default to the base currency.
pub async fn convert(state: &AppState, query: ConvertQuery) -> AppResult<ApiResponse<ConvertResult>> {
    let base = base_currency(&state.orm, &state.config).await?;
    let from = match query.from.as_deref() {
        Some(code) => validate_code(code)?,
        None => base.clone(),
    };
    let to = match query.to.as_deref() {
        Some(code) => validate_code(code)?,
        None => base.clone(),
    };

    let converter = PriceConverter::new(ExchangeRateResolver::new(
        DbRateStore::new(&state.orm),
        base,
    ));
    let conversion = converter.convert_with_rate(query.amount, &from, &to).await?;
    let symbol = Currencies::find_by_id(to.clone())
        .one(&state.orm)
        .await?
        .map(|c| c.symbol);

    let data = ConvertResult {
        amount: query.amount,
        display: PriceDisplay::new(conversion.amount, &to, symbol.as_deref()),
        from,
        to,
        converted: conversion.amount,
        rate: conversion.rate.rate,
        source: conversion.rate.source,
    };
    Ok(ApiResponse::success("Converted", data, Some(Meta::empty())))
}

async fn find_currency(conn: &impl ConnectionTrait, code: &str) -> AppResult<CurrencyModel> {
    let code = validate_code(code)?;
    Currencies::find_by_id(code)
        .one(conn)
        .await?
        .ok_or(AppError::NotFound)
}

async fn find_rate(conn: &impl ConnectionTrait, from: &str, to: &str) -> AppResult<RateModel> {
    CurrencyRates::find_by_id((from.to_owned(), to.to_owned()))
        .one(conn)
        .await?
        .ok_or(AppError::NotFound)
}

async fn active_codes(conn: &impl ConnectionTrait) -> AppResult<Vec<String>> {
    Ok(Currencies::find()
        .filter(CurrencyCol::IsActive.eq(true))
        .order_by_asc(CurrencyCol::Code)
        .all(conn)
        .await?
        .into_iter()
        .map(|c| c.code)
        .collect())
}

fn positive_rate(rate: Decimal) -> AppResult<Decimal> {
    let rate = round_rate(rate);
    if rate <= Decimal::ZERO {
        return Err(AppError::validation("rate", "Rate must be greater than 0."));
    }
    Ok(rate)
}

fn required_text(field: &str, value: &str) -> AppResult<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AppError::validation(field, format!("{field} is required")));
    }
    Ok(value.to_string())
}

async fn audit(state: &AppState, user: &AuthUser, action: &str, metadata: serde_json::Value) {
    if let Err(err) = log_audit(
        &state.orm,
        Some(user.user_id),
        action,
        Some("currencies"),
        Some(metadata),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }
}

fn currency_from_entity(model: CurrencyModel) -> Currency {
    Currency {
        code: model.code,
        name: model.name,
        symbol: model.symbol,
        is_active: model.is_active,
        is_default: model.is_default,
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
    }
}

fn rate_from_entity(model: RateModel) -> CurrencyRate {
    CurrencyRate {
        from_currency: model.from_currency,
        to_currency: model.to_currency,
        rate: model.rate,
        last_updated_at: model.last_updated_at.with_timezone(&Utc),
    }
}
