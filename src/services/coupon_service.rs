use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use uuid::Uuid;

use crate::{
    audit::log_audit,
    dto::coupons::{
        CouponList, CouponListQuery, CouponPreview, CreateCouponRequest, UpdateCouponRequest,
    },
    entity::{
        carts::AppliedCoupon,
        coupon_usages::{Column as UsageCol, Entity as CouponUsages},
        coupons::{
            ActiveModel as CouponActive, Column as CouponCol, CouponType, Entity as Coupons,
            Model as CouponModel,
        },
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::{Cart, Coupon},
    pricing::{normalize_code, round_money},
    response::{ApiResponse, Meta},
    services::{cart_service, currency_service, random_code},
    state::AppState,
};

/// Discount `coupon` grants on `amount`: zero below the minimum, otherwise
/// the fixed value or percentage, capped by `maximum_discount` and by
/// `amount` itself.
pub fn calculate_discount(coupon: &CouponModel, amount: Decimal) -> Decimal {
    if amount <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    if coupon.minimum_amount.is_some_and(|min| amount < min) {
        return Decimal::ZERO;
    }

    let raw = match coupon.kind {
        CouponType::Fixed => coupon.value,
        CouponType::Percentage => round_money(amount * coupon.value / Decimal::ONE_HUNDRED),
    };
    let capped = match coupon.maximum_discount {
        Some(cap) => raw.min(cap),
        None => raw,
    };
    capped.min(amount).max(Decimal::ZERO)
}

/// Active, inside its time window and under the global usage limit.
pub fn is_valid_at(coupon: &CouponModel, now: DateTime<Utc>) -> bool {
    if !coupon.is_active {
        return false;
    }
    if coupon.starts_at.is_some_and(|starts| starts > now) {
        return false;
    }
    if coupon.expires_at.is_some_and(|expires| expires < now) {
        return false;
    }
    if coupon.usage_limit.is_some_and(|limit| coupon.used_count >= limit) {
        return false;
    }
    true
}

/// [`is_valid_at`] plus the per-user limit, counted from recorded usages.
pub async fn can_be_used_by(
    conn: &impl ConnectionTrait,
    coupon: &CouponModel,
    user_id: Uuid,
    now: DateTime<Utc>,
) -> AppResult<bool> {
    if !is_valid_at(coupon, now) {
        return Ok(false);
    }
    if let Some(limit) = coupon.usage_limit_per_user {
        let used = CouponUsages::find()
            .filter(UsageCol::CouponId.eq(coupon.id))
            .filter(UsageCol::UserId.eq(user_id))
            .count(conn)
            .await?;
        if used >= limit.max(0) as u64 {
            return Ok(false);
        }
    }
    Ok(true)
}

pub async fn find_by_code(
    conn: &impl ConnectionTrait,
    code: &str,
) -> AppResult<Option<CouponModel>> {
    Ok(Coupons::find()
        .filter(CouponCol::Code.eq(normalize_code(code)))
        .one(conn)
        .await?)
}

/// Looks a code up and checks the user may redeem it now.
async fn usable_coupon(
    conn: &impl ConnectionTrait,
    code: &str,
    user_id: Uuid,
) -> AppResult<CouponModel> {
    let coupon = find_by_code(conn, code)
        .await?
        .ok_or_else(|| AppError::validation("code", "Invalid coupon code."))?;
    if !can_be_used_by(conn, &coupon, user_id, Utc::now()).await? {
        return Err(AppError::validation("code", "This coupon cannot be used."));
    }
    Ok(coupon)
}

fn not_applicable() -> AppError {
    AppError::validation("code", "This coupon is not applicable to your cart.")
}

/// Dry run of applying `code` to the user's cart.
pub async fn preview(
    state: &AppState,
    user: &AuthUser,
    code: &str,
    currency: Option<String>,
) -> AppResult<ApiResponse<CouponPreview>> {
    let ctx = currency_service::context_for_user(
        &state.orm,
        &state.config,
        user,
        currency.as_deref(),
    )
    .await?;
    let cart = cart_service::get_or_create_cart(&state.orm, user.user_id).await?;
    let coupon = usable_coupon(&state.orm, code, user.user_id).await?;

    let discount = calculate_discount(&coupon, cart.subtotal);
    if discount <= Decimal::ZERO {
        return Err(not_applicable());
    }
    let new_total = (cart.total - discount).max(Decimal::ZERO);
    let pricing = ctx.display_pricing(&state.orm).await?;

    let data = CouponPreview {
        code: coupon.code,
        name: coupon.name,
        kind: coupon.kind,
        discount_amount: discount,
        cart_total: cart.total,
        new_total,
        display_discount: pricing.display(discount),
        display_new_total: pricing.display(new_total),
    };
    Ok(ApiResponse::success("Coupon is valid", data, Some(Meta::empty())))
}

pub async fn apply_to_cart(
    state: &AppState,
    user: &AuthUser,
    code: &str,
    currency: Option<String>,
) -> AppResult<ApiResponse<Cart>> {
    let ctx = currency_service::context_for_user(
        &state.orm,
        &state.config,
        user,
        currency.as_deref(),
    )
    .await?;

    let txn = state.orm.begin().await?;
    let cart = cart_service::lock_cart(&txn, user.user_id).await?;
    let coupon = usable_coupon(&txn, code, user.user_id).await?;
    if cart.applied_coupons.contains_code(&coupon.code) {
        return Err(AppError::validation("code", "This coupon is already applied."));
    }
    let discount = calculate_discount(&coupon, cart.subtotal);
    if discount <= Decimal::ZERO {
        return Err(not_applicable());
    }

    let mut applied = cart.applied_coupons.clone();
    applied.0.push(AppliedCoupon {
        id: coupon.id,
        code: coupon.code.clone(),
        name: coupon.name.clone(),
        discount_amount: discount,
    });
    let mut active: crate::entity::carts::ActiveModel = cart.into();
    active.applied_coupons = Set(applied);
    let cart = active.update(&txn).await?;
    let cart = cart_service::recalculate(&txn, cart, state.config.tax_rate).await?;
    txn.commit().await?;

    audit(
        state,
        user,
        "coupon_apply",
        serde_json::json!({ "code": coupon.code, "cart_id": cart.id }),
    )
    .await;

    let view = cart_service::cart_view(&state.orm, cart, &ctx).await?;
    Ok(ApiResponse::success("Coupon applied", view, Some(Meta::empty())))
}

pub async fn remove_from_cart(
    state: &AppState,
    user: &AuthUser,
    code: &str,
    currency: Option<String>,
) -> AppResult<ApiResponse<Cart>> {
    let ctx = currency_service::context_for_user(
        &state.orm,
        &state.config,
        user,
        currency.as_deref(),
    )
    .await?;
    let code = normalize_code(code);

    let txn = state.orm.begin().await?;
    let cart = cart_service::lock_cart(&txn, user.user_id).await?;
    if !cart.applied_coupons.contains_code(&code) {
        return Err(AppError::validation(
            "code",
            "This coupon is not applied to your cart.",
        ));
    }

    let mut applied = cart.applied_coupons.clone();
    applied.0.retain(|c| c.code != code);
    let mut active: crate::entity::carts::ActiveModel = cart.into();
    active.applied_coupons = Set(applied);
    let cart = active.update(&txn).await?;
    let cart = cart_service::recalculate(&txn, cart, state.config.tax_rate).await?;
    txn.commit().await?;

    audit(
        state,
        user,
        "coupon_remove",
        serde_json::json!({ "code": code, "cart_id": cart.id }),
    )
    .await;

    let view = cart_service::cart_view(&state.orm, cart, &ctx).await?;
    Ok(ApiResponse::success("Coupon removed", view, Some(Meta::empty())))
}

pub async fn list_coupons(
    state: &AppState,
    user: &AuthUser,
    query: CouponListQuery,
) -> AppResult<ApiResponse<CouponList>> {
    ensure_admin(user)?;
    let (page, limit, offset) = query.pagination().normalize();

    let mut condition = Condition::all();
    if let Some(is_active) = query.is_active {
        condition = condition.add(CouponCol::IsActive.eq(is_active));
    }
    if query.valid.unwrap_or(false) {
        let now = Utc::now();
        condition = condition
            .add(CouponCol::IsActive.eq(true))
            .add(
                Condition::any()
                    .add(CouponCol::StartsAt.is_null())
                    .add(CouponCol::StartsAt.lte(now)),
            )
            .add(
                Condition::any()
                    .add(CouponCol::ExpiresAt.is_null())
                    .add(CouponCol::ExpiresAt.gte(now)),
            );
    }
    if let Some(kind) = query.kind {
        condition = condition.add(CouponCol::Kind.eq(kind));
    }

    let finder = Coupons::find()
        .filter(condition)
        .order_by_desc(CouponCol::CreatedAt);
    let total = finder.clone().count(&state.orm).await? as i64;
    let items = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(coupon_from_entity)
        .collect();

    Ok(ApiResponse::paginated("Coupons", CouponList { items }, page, limit, total))
}

pub async fn get_coupon(
    state: &AppState,
    user: &AuthUser,
    code: &str,
) -> AppResult<ApiResponse<Coupon>> {
    ensure_admin(user)?;
    let coupon = find_by_code(&state.orm, code)
        .await?
        .ok_or(AppError::NotFound)?;
    Ok(ApiResponse::success(
        "Coupon",
        coupon_from_entity(coupon),
        Some(Meta::empty()),
    ))
}

pub async fn create_coupon(
    state: &AppState,
    user: &AuthUser,
    payload: CreateCouponRequest,
) -> AppResult<ApiResponse<Coupon>> {
    ensure_admin(user)?;

    let name = payload.name.trim().to_string();
    if name.is_empty() {
        return Err(AppError::validation("name", "name is required"));
    }
    let now = Utc::now();
    let mut coupon = CouponModel {
        id: Uuid::new_v4(),
        code: String::new(),
        name,
        description: payload.description,
        kind: payload.kind,
        value: payload.value,
        minimum_amount: payload.minimum_amount,
        maximum_discount: payload.maximum_discount,
        usage_limit: payload.usage_limit,
        used_count: 0,
        usage_limit_per_user: payload.usage_limit_per_user,
        is_active: payload.is_active,
        starts_at: payload.starts_at.map(Into::into),
        expires_at: payload.expires_at.map(Into::into),
        created_at: now.into(),
        updated_at: now.into(),
    };
    validate_rules(&coupon)?;

    coupon.code = match payload.code.as_deref().map(normalize_code) {
        Some(code) if !code.is_empty() => {
            if find_by_code(&state.orm, &code).await?.is_some() {
                return Err(AppError::validation(
                    "code",
                    format!("Coupon code '{code}' is already taken."),
                ));
            }
            code
        }
        _ => unused_code(&state.orm).await?,
    };

    let active: CouponActive = coupon.into();
    let coupon = active.reset_all().insert(&state.orm).await?;

    audit(state, user, "coupon_create", serde_json::json!({ "code": coupon.code })).await;

    Ok(ApiResponse::success(
        "Coupon created",
        coupon_from_entity(coupon),
        Some(Meta::empty()),
    ))
}

pub async fn update_coupon(
    state: &AppState,
    user: &AuthUser,
    code: &str,
    payload: UpdateCouponRequest,
) -> AppResult<ApiResponse<Coupon>> {
    ensure_admin(user)?;
    let mut coupon = find_by_code(&state.orm, code)
        .await?
        .ok_or(AppError::NotFound)?;

    if let Some(name) = payload.name {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(AppError::validation("name", "name is required"));
        }
        coupon.name = name;
    }
    if let Some(description) = payload.description {
        coupon.description = Some(description);
    }
    if let Some(kind) = payload.kind {
        coupon.kind = kind;
    }
    if let Some(value) = payload.value {
        coupon.value = value;
    }
    if let Some(minimum) = payload.minimum_amount {
        coupon.minimum_amount = Some(minimum);
    }
    if let Some(maximum) = payload.maximum_discount {
        coupon.maximum_discount = Some(maximum);
    }
    if let Some(limit) = payload.usage_limit {
        coupon.usage_limit = Some(limit);
    }
    if let Some(limit) = payload.usage_limit_per_user {
        coupon.usage_limit_per_user = Some(limit);
    }
    if let Some(is_active) = payload.is_active {
        coupon.is_active = is_active;
    }
    if let Some(starts_at) = payload.starts_at {
        coupon.starts_at = Some(starts_at.into());
    }
    if let Some(expires_at) = payload.expires_at {
        coupon.expires_at = Some(expires_at.into());
    }
    validate_rules(&coupon)?;
    coupon.updated_at = Utc::now().into();

    let active: CouponActive = coupon.into();
    let coupon = active.reset_all().update(&state.orm).await?;

    audit(state, user, "coupon_update", serde_json::json!({ "code": coupon.code })).await;

    Ok(ApiResponse::success(
        "Coupon updated",
        coupon_from_entity(coupon),
        Some(Meta::empty()),
    ))
}

pub async fn delete_coupon(
    state: &AppState,
    user: &AuthUser,
    code: &str,
) -> AppResult<ApiResponse<serde_json::Value>> {
    ensure_admin(user)?;
    let coupon = find_by_code(&state.orm, code)
        .await?
        .ok_or(AppError::NotFound)?;
    Coupons::delete_by_id(coupon.id).exec(&state.orm).await?;

    audit(state, user, "coupon_delete", serde_json::json!({ "code": coupon.code })).await;

    Ok(ApiResponse::success(
        "Deleted",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}

async fn unused_code(conn: &impl ConnectionTrait) -> AppResult<String> {
    for _ in 0..5 {
        let code = random_code(8);
        if find_by_code(conn, &code).await?.is_none() {
            return Ok(code);
        }
    }
    Err(AppError::Conflict("could not generate a unique coupon code".into()))
}

fn validate_rules(coupon: &CouponModel) -> AppResult<()> {
    if coupon.value <= Decimal::ZERO {
        return Err(AppError::validation("value", "value must be greater than 0"));
    }
    if coupon.kind == CouponType::Percentage && coupon.value > Decimal::ONE_HUNDRED {
        return Err(AppError::validation(
            "value",
            "a percentage coupon cannot exceed 100",
        ));
    }
    if coupon.minimum_amount.is_some_and(|m| m < Decimal::ZERO) {
        return Err(AppError::validation(
            "minimum_amount",
            "minimum_amount cannot be negative",
        ));
    }
    if coupon.maximum_discount.is_some_and(|m| m <= Decimal::ZERO) {
        return Err(AppError::validation(
            "maximum_discount",
            "maximum_discount must be greater than 0",
        ));
    }
    if coupon.usage_limit.is_some_and(|l| l < 1) {
        return Err(AppError::validation("usage_limit", "usage_limit must be at least 1"));
    }
    if coupon.usage_limit_per_user.is_some_and(|l| l < 1) {
        return Err(AppError::validation(
            "usage_limit_per_user",
            "usage_limit_per_user must be at least 1",
        ));
    }
    if let (Some(starts), Some(expires)) = (coupon.starts_at, coupon.expires_at) {
        if expires <= starts {
            return Err(AppError::validation(
                "expires_at",
                "expires_at must be after starts_at",
            ));
        }
    }
    Ok(())
}

async fn audit(state: &AppState, user: &AuthUser, action: &str, metadata: serde_json::Value) {
    if let Err(err) = log_audit(
        &state.orm,
        Some(user.user_id),
        action,
        Some("coupons"),
        Some(metadata),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }
}

fn coupon_from_entity(model: CouponModel) -> Coupon {
    Coupon {
        id: model.id,
        code: model.code,
        name: model.name,
        description: model.description,
        kind: model.kind,
        value: model.value,
        minimum_amount: model.minimum_amount,
        maximum_discount: model.maximum_discount,
        usage_limit: model.usage_limit,
        usage_limit_per_user: model.usage_limit_per_user,
        used_count: model.used_count,
        is_active: model.is_active,
        starts_at: model.starts_at.map(|dt| dt.with_timezone(&Utc)),
        expires_at: model.expires_at.map(|dt| dt.with_timezone(&Utc)),
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use chrono::Duration;

    use super::*;

    fn d(raw: &str) -> Decimal {
        Decimal::from_str(raw).unwrap()
    }

    fn coupon(kind: CouponType, value: &str) -> CouponModel {
        CouponModel {
            id: Uuid::new_v4(),
            code: "SAVE".into(),
            name: "Save".into(),
            description: None,
            kind,
            value: d(value),
            minimum_amount: None,
            maximum_discount: None,
            usage_limit: None,
            used_count: 0,
            usage_limit_per_user: None,
            is_active: true,
            starts_at: None,
            expires_at: None,
            created_at: Utc::now().into(),
            updated_at: Utc::now().into(),
        }
    }

    #[test]
    fn percentage_is_capped_by_maximum_discount() {
        let mut c = coupon(CouponType::Percentage, "50");
        c.maximum_discount = Some(d("20"));
        c.minimum_amount = Some(d("10"));
        assert_eq!(calculate_discount(&c, d("100")), d("20"));
        assert_eq!(calculate_discount(&c, d("30")), d("15"));
        assert_eq!(calculate_discount(&c, d("9.99")), Decimal::ZERO);
    }

    #[test]
    fn fixed_discount_never_exceeds_amount() {
        let c = coupon(CouponType::Fixed, "25");
        assert_eq!(calculate_discount(&c, d("100")), d("25"));
        assert_eq!(calculate_discount(&c, d("12.50")), d("12.50"));
        assert_eq!(calculate_discount(&c, Decimal::ZERO), Decimal::ZERO);
    }

    #[test]
    fn discount_stays_within_bounds() {
        let mut capped = coupon(CouponType::Percentage, "80");
        capped.maximum_discount = Some(d("30"));
        let coupons = [
            coupon(CouponType::Fixed, "10"),
            coupon(CouponType::Percentage, "100"),
            capped,
        ];
        for c in &coupons {
            for amount in ["0.01", "5", "37.77", "1000"] {
                let amount = d(amount);
                let discount = calculate_discount(c, amount);
                let ceiling = c.maximum_discount.unwrap_or(amount).min(amount);
                assert!(discount >= Decimal::ZERO);
                assert!(discount <= ceiling, "{discount} > {ceiling}");
            }
        }
    }

    #[test]
    fn validity_window_and_limits() {
        let now = Utc::now();
        let mut c = coupon(CouponType::Fixed, "5");
        assert!(is_valid_at(&c, now));

        c.starts_at = Some((now + Duration::hours(1)).into());
        assert!(!is_valid_at(&c, now));
        c.starts_at = None;

        c.expires_at = Some((now - Duration::seconds(1)).into());
        assert!(!is_valid_at(&c, now));
        c.expires_at = None;

        c.usage_limit = Some(3);
        c.used_count = 3;
        assert!(!is_valid_at(&c, now));
        c.used_count = 2;
        assert!(is_valid_at(&c, now));

        c.is_active = false;
        assert!(!is_valid_at(&c, now));
    }

    #[test]
    fn rules_reject_bad_coupons() {
        assert!(validate_rules(&coupon(CouponType::Percentage, "101")).is_err());
        assert!(validate_rules(&coupon(CouponType::Fixed, "0")).is_err());

        let mut c = coupon(CouponType::Fixed, "5");
        let now = Utc::now();
        c.starts_at = Some(now.into());
        c.expires_at = Some(now.into());
        assert!(validate_rules(&c).is_err());

        let mut c = coupon(CouponType::Fixed, "5");
        c.usage_limit_per_user = Some(0);
        assert!(validate_rules(&c).is_err());
        assert!(validate_rules(&coupon(CouponType::Percentage, "100")).is_ok());
    }
}
