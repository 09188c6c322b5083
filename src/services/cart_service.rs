use std::collections::HashMap;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, ModelTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait, sea_query::OnConflict,
};
use uuid::Uuid;

use crate::{
    audit::log_audit,
    db::for_update,
    dto::cart::{AddCartItemRequest, UpdateCartItemRequest},
    entity::{
        cart_items::{
            ActiveModel as CartItemActive, Column as CartItemCol, Entity as CartItems,
            Model as CartItemModel,
        },
        carts::{
            ActiveModel as CartActive, AppliedCoupon, AppliedCoupons, Column as CartCol,
            Entity as Carts, Model as CartModel,
        },
        coupons::{Column as CouponCol, Entity as Coupons, Model as CouponModel},
        products::{Column as ProductCol, Entity as Products},
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::{Cart, CartItem, CartTotalsDisplay},
    pricing::round_money,
    response::{ApiResponse, Meta},
    services::{
        coupon_service::calculate_discount,
        currency_service::{self, PricingContext},
        stock,
    },
    state::AppState,
};

/// What happens to reserved stock when lines leave the cart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockDisposition {
    /// Lines are abandoned; their quantities go back on the shelf.
    Release,
    /// Lines became an order; the reservation is now the order's.
    Commit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartTotals {
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub discount_amount: Decimal,
    pub total: Decimal,
    pub applied_coupons: AppliedCoupons,
}

/// Largest quantity a single cart line may hold.
pub const MAX_LINE_QUANTITY: i32 = 10_000;

fn check_line_quantity(quantity: i32) -> AppResult<()> {
    if quantity > MAX_LINE_QUANTITY {
        return Err(AppError::validation(
            "quantity",
            format!("Quantity cannot exceed {MAX_LINE_QUANTITY}."),
        ));
    }
    Ok(())
}

/// Quantity of an existing line after adding `added` more units.
pub fn merged_quantity(current: i32, added: i32) -> AppResult<i32> {
    let merged = current
        .checked_add(added)
        .ok_or_else(|| AppError::validation("quantity", "Quantity is too large."))?;
    check_line_quantity(merged)?;
    Ok(merged)
}

pub fn line_total(quantity: i32, price: Decimal) -> Decimal {
    round_money(price * Decimal::from(quantity))
}

/// Derives every cart aggregate from its lines. Applied coupons are re-priced
/// against the new subtotal; coupons that were deleted or no longer yield a
/// discount are dropped.
pub fn derive_totals(
    items: &[CartItemModel],
    tax_rate: Decimal,
    applied: &[(AppliedCoupon, Option<CouponModel>)],
) -> CartTotals {
    let subtotal: Decimal = items.iter().map(|i| line_total(i.quantity, i.price)).sum();
    let tax_amount = round_money(subtotal * tax_rate);

    let mut remaining = subtotal;
    let mut kept = Vec::with_capacity(applied.len());
    for (entry, coupon) in applied {
        let Some(coupon) = coupon else {
            tracing::debug!(code = %entry.code, "dropping deleted coupon from cart");
            continue;
        };
        let discount = calculate_discount(coupon, subtotal).min(remaining);
        if discount <= Decimal::ZERO {
            tracing::debug!(code = %entry.code, "dropping coupon with no discount");
            continue;
        }
        remaining -= discount;
        kept.push(AppliedCoupon {
            id: coupon.id,
            code: coupon.code.clone(),
            name: coupon.name.clone(),
            discount_amount: discount,
        });
    }

    let applied_coupons = AppliedCoupons(kept);
    let discount_amount = applied_coupons.total_discount();
    CartTotals {
        subtotal,
        tax_amount,
        discount_amount,
        total: subtotal + tax_amount - discount_amount,
        applied_coupons,
    }
}

/// Returns the user's cart, creating it on first touch. A unique user id
/// makes concurrent first calls converge on one row.
pub async fn get_or_create_cart(
    conn: &impl ConnectionTrait,
    user_id: Uuid,
) -> AppResult<CartModel> {
    if let Some(cart) = Carts::find()
        .filter(CartCol::UserId.eq(user_id))
        .one(conn)
        .await?
    {
        return Ok(cart);
    }

    let now = Utc::now();
    Carts::insert(CartActive {
        id: Set(Uuid::new_v4()),
        user_id: Set(user_id),
        subtotal: Set(Decimal::ZERO),
        tax_amount: Set(Decimal::ZERO),
        total: Set(Decimal::ZERO),
        applied_coupons: Set(AppliedCoupons::default()),
        created_at: Set(now.into()),
        updated_at: Set(now.into()),
    })
    .on_conflict(
        OnConflict::column(CartCol::UserId)
            .do_nothing()
            .to_owned(),
    )
    .exec_without_returning(conn)
    .await?;

    Carts::find()
        .filter(CartCol::UserId.eq(user_id))
        .one(conn)
        .await?
        .ok_or_else(|| AppError::consistency(format!("cart for user {user_id} vanished after insert")))
}

/// Cart row locked for the rest of the transaction.
pub async fn lock_cart(conn: &impl ConnectionTrait, user_id: Uuid) -> AppResult<CartModel> {
    let cart = get_or_create_cart(conn, user_id).await?;
    for_update(Carts::find_by_id(cart.id), conn)
        .one(conn)
        .await?
        .ok_or_else(|| AppError::consistency(format!("cart {} vanished while locking", cart.id)))
}

pub async fn cart_items(conn: &impl ConnectionTrait, cart_id: Uuid) -> AppResult<Vec<CartItemModel>> {
    Ok(CartItems::find()
        .filter(CartItemCol::CartId.eq(cart_id))
        .order_by_asc(CartItemCol::CreatedAt)
        .all(conn)
        .await?)
}

/// Recomputes and stores the cart aggregates from its current lines.
pub async fn recalculate(
    conn: &impl ConnectionTrait,
    cart: CartModel,
    tax_rate: Decimal,
) -> AppResult<CartModel> {
    let items = cart_items(conn, cart.id).await?;

    let ids: Vec<Uuid> = cart.applied_coupons.0.iter().map(|c| c.id).collect();
    let coupons: HashMap<Uuid, CouponModel> = if ids.is_empty() {
        HashMap::new()
    } else {
        Coupons::find()
            .filter(CouponCol::Id.is_in(ids))
            .all(conn)
            .await?
            .into_iter()
            .map(|c| (c.id, c))
            .collect()
    };
    let applied: Vec<(AppliedCoupon, Option<CouponModel>)> = cart
        .applied_coupons
        .0
        .iter()
        .map(|entry| (entry.clone(), coupons.get(&entry.id).cloned()))
        .collect();

    let totals = derive_totals(&items, tax_rate, &applied);
    tracing::debug!(
        cart_id = %cart.id,
        subtotal = %totals.subtotal,
        tax = %totals.tax_amount,
        discount = %totals.discount_amount,
        total = %totals.total,
        "cart recalculated"
    );

    let mut active: CartActive = cart.into();
    active.subtotal = Set(totals.subtotal);
    active.tax_amount = Set(totals.tax_amount);
    active.total = Set(totals.total);
    active.applied_coupons = Set(totals.applied_coupons);
    active.updated_at = Set(Utc::now().into());
    Ok(active.update(conn).await?)
}

fn normalize_options(options: Option<serde_json::Value>) -> Option<serde_json::Value> {
    match options {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::Object(map)) if map.is_empty() => None,
        Some(value) => Some(value),
    }
}

/// Reserves stock and adds `quantity` of a product to the cart, merging into
/// an existing line with the same options. Merged lines keep the price they
/// were created at.
pub async fn add_line(
    conn: &impl ConnectionTrait,
    cart: &CartModel,
    product_id: Uuid,
    quantity: i32,
    options: Option<serde_json::Value>,
) -> AppResult<CartItemModel> {
    if quantity < 1 {
        return Err(AppError::validation(
            "quantity",
            "Quantity must be at least 1.",
        ));
    }
    check_line_quantity(quantity)?;

    let options = normalize_options(options);
    let existing = CartItems::find()
        .filter(CartItemCol::CartId.eq(cart.id))
        .filter(CartItemCol::ProductId.eq(product_id))
        .all(conn)
        .await?
        .into_iter()
        .find(|line| normalize_options(line.product_options.clone()) == options)
        .map(|line| merged_quantity(line.quantity, quantity).map(|merged| (line, merged)))
        .transpose()?;

    let product = stock::lock_product(conn, product_id)
        .await?
        .ok_or_else(|| AppError::validation("product_id", "Product not found."))?;
    let product = stock::reserve(conn, product, quantity).await?;

    let now = Utc::now();
    let line = match existing {
        Some((line, quantity)) => {
            let price = line.price;
            let mut active: CartItemActive = line.into();
            active.quantity = Set(quantity);
            active.total = Set(line_total(quantity, price));
            active.updated_at = Set(now.into());
            active.update(conn).await?
        }
        None => {
            let price = product.current_price();
            CartItemActive {
                id: Set(Uuid::new_v4()),
                cart_id: Set(cart.id),
                product_id: Set(product.id),
                quantity: Set(quantity),
                price: Set(price),
                total: Set(line_total(quantity, price)),
                product_options: Set(options),
                created_at: Set(now.into()),
                updated_at: Set(now.into()),
            }
            .insert(conn)
            .await?
        }
    };
    Ok(line)
}

/// Deletes every line and applied coupon. With [`StockDisposition::Release`]
/// the reserved quantities are restored first.
pub async fn clear_lines(
    conn: &impl ConnectionTrait,
    cart: CartModel,
    disposition: StockDisposition,
    tax_rate: Decimal,
) -> AppResult<CartModel> {
    if disposition == StockDisposition::Release {
        let lines = cart_items(conn, cart.id)
            .await?
            .into_iter()
            .map(|line| (line.product_id, line.quantity))
            .collect();
        stock::release_all(conn, lines).await?;
    }

    CartItems::delete_many()
        .filter(CartItemCol::CartId.eq(cart.id))
        .exec(conn)
        .await?;

    let mut active: CartActive = cart.into();
    active.applied_coupons = Set(AppliedCoupons::default());
    let cart = active.update(conn).await?;
    recalculate(conn, cart, tax_rate).await
}

async fn find_line(
    conn: &impl ConnectionTrait,
    cart: &CartModel,
    item_id: Uuid,
) -> AppResult<CartItemModel> {
    CartItems::find_by_id(item_id)
        .filter(CartItemCol::CartId.eq(cart.id))
        .one(conn)
        .await?
        .ok_or_else(|| AppError::validation("item", "Cart item not found."))
}

/// Loads lines and products and converts every figure for display.
pub async fn cart_view(
    conn: &impl ConnectionTrait,
    cart: CartModel,
    ctx: &PricingContext,
) -> AppResult<Cart> {
    let items = cart_items(conn, cart.id).await?;
    let product_ids: Vec<Uuid> = items.iter().map(|i| i.product_id).collect();
    let products: HashMap<Uuid, (String, String)> = if product_ids.is_empty() {
        HashMap::new()
    } else {
        Products::find()
            .filter(ProductCol::Id.is_in(product_ids))
            .all(conn)
            .await?
            .into_iter()
            .map(|p| (p.id, (p.name, p.sku)))
            .collect()
    };

    let pricing = ctx.display_pricing(conn).await?;
    let item_count: i64 = items.iter().map(|i| i64::from(i.quantity)).sum();
    let items = items
        .into_iter()
        .map(|item| {
            let (product_name, product_sku) =
                products.get(&item.product_id).cloned().unwrap_or_default();
            CartItem {
                id: item.id,
                product_id: item.product_id,
                product_name,
                product_sku,
                quantity: item.quantity,
                price: item.price,
                total: item.total,
                product_options: item.product_options,
                display_price: pricing.display(item.price),
                display_total: pricing.display(item.total),
            }
        })
        .collect();

    let discount_amount = cart.applied_coupons.total_discount();
    Ok(Cart {
        id: cart.id,
        user_id: cart.user_id,
        currency: ctx.base_currency.clone(),
        items,
        item_count,
        subtotal: cart.subtotal,
        tax_amount: cart.tax_amount,
        discount_amount,
        total: cart.total,
        display: CartTotalsDisplay {
            subtotal: pricing.display(cart.subtotal),
            tax_amount: pricing.display(cart.tax_amount),
            discount_amount: pricing.display(discount_amount),
            total: pricing.display(cart.total),
        },
        applied_coupons: cart.applied_coupons.0,
        rate: pricing.rate,
        updated_at: cart.updated_at.with_timezone(&Utc),
    })
}

pub async fn get_cart(
    state: &AppState,
    user: &AuthUser,
    currency: Option<String>,
) -> AppResult<ApiResponse<Cart>> {
    let ctx =
        currency_service::context_for_user(&state.orm, &state.config, user, currency.as_deref())
            .await?;
    let cart = get_or_create_cart(&state.orm, user.user_id).await?;
    let view = cart_view(&state.orm, cart, &ctx).await?;
    Ok(ApiResponse::success("Cart", view, Some(Meta::empty())))
}

pub async fn add_item(
    state: &AppState,
    user: &AuthUser,
    payload: AddCartItemRequest,
    currency: Option<String>,
) -> AppResult<ApiResponse<Cart>> {
    let ctx =
        currency_service::context_for_user(&state.orm, &state.config, user, currency.as_deref())
            .await?;

    let txn = state.orm.begin().await?;
    let cart = lock_cart(&txn, user.user_id).await?;
    let line = add_line(
        &txn,
        &cart,
        payload.product_id,
        payload.quantity,
        payload.options,
    )
    .await?;
    let cart = recalculate(&txn, cart, state.config.tax_rate).await?;
    txn.commit().await?;

    audit(
        state,
        user,
        "cart_add",
        serde_json::json!({ "product_id": line.product_id, "quantity": payload.quantity }),
    )
    .await;

    let view = cart_view(&state.orm, cart, &ctx).await?;
    Ok(ApiResponse::success("Added to cart", view, Some(Meta::empty())))
}

/// Sets a line's quantity, reserving or releasing only the difference. A
/// quantity of zero or less removes the line.
pub async fn update_item(
    state: &AppState,
    user: &AuthUser,
    item_id: Uuid,
    payload: UpdateCartItemRequest,
    currency: Option<String>,
) -> AppResult<ApiResponse<Cart>> {
    let ctx =
        currency_service::context_for_user(&state.orm, &state.config, user, currency.as_deref())
            .await?;

    let txn = state.orm.begin().await?;
    let cart = lock_cart(&txn, user.user_id).await?;
    let line = find_line(&txn, &cart, item_id).await?;
    let previous = line.quantity;

    if payload.quantity <= 0 {
        stock::release(&txn, line.product_id, previous).await?;
        line.delete(&txn).await?;
    } else {
        check_line_quantity(payload.quantity)?;
        let delta = payload.quantity - previous;
        if delta != 0 {
            if delta > 0 {
                let product = stock::lock_product(&txn, line.product_id)
                    .await?
                    .ok_or_else(|| AppError::validation("product_id", "Product not found."))?;
                stock::reserve(&txn, product, delta).await?;
            } else {
                stock::release(&txn, line.product_id, -delta).await?;
            }
            let price = line.price;
            let mut active: CartItemActive = line.into();
            active.quantity = Set(payload.quantity);
            active.total = Set(line_total(payload.quantity, price));
            active.updated_at = Set(Utc::now().into());
            active.update(&txn).await?;
        }
    }

    let cart = recalculate(&txn, cart, state.config.tax_rate).await?;
    txn.commit().await?;

    audit(
        state,
        user,
        "cart_update",
        serde_json::json!({ "item_id": item_id, "from": previous, "to": payload.quantity.max(0) }),
    )
    .await;

    let view = cart_view(&state.orm, cart, &ctx).await?;
    Ok(ApiResponse::success("Cart updated", view, Some(Meta::empty())))
}

pub async fn remove_item(
    state: &AppState,
    user: &AuthUser,
    item_id: Uuid,
    currency: Option<String>,
) -> AppResult<ApiResponse<Cart>> {
    let ctx =
        currency_service::context_for_user(&state.orm, &state.config, user, currency.as_deref())
            .await?;

    let txn = state.orm.begin().await?;
    let cart = lock_cart(&txn, user.user_id).await?;
    let line = find_line(&txn, &cart, item_id).await?;
    let (product_id, quantity) = (line.product_id, line.quantity);
    stock::release(&txn, product_id, quantity).await?;
    line.delete(&txn).await?;
    let cart = recalculate(&txn, cart, state.config.tax_rate).await?;
    txn.commit().await?;

    audit(
        state,
        user,
        "cart_remove",
        serde_json::json!({ "item_id": item_id, "product_id": product_id, "quantity": quantity }),
    )
    .await;

    let view = cart_view(&state.orm, cart, &ctx).await?;
    Ok(ApiResponse::success("Removed from cart", view, Some(Meta::empty())))
}

pub async fn clear_cart(
    state: &AppState,
    user: &AuthUser,
    currency: Option<String>,
) -> AppResult<ApiResponse<Cart>> {
    let ctx =
        currency_service::context_for_user(&state.orm, &state.config, user, currency.as_deref())
            .await?;

    let txn = state.orm.begin().await?;
    let cart = lock_cart(&txn, user.user_id).await?;
    let cart = clear_lines(&txn, cart, StockDisposition::Release, state.config.tax_rate).await?;
    txn.commit().await?;

    audit(state, user, "cart_clear", serde_json::json!({ "cart_id": cart.id })).await;

    let view = cart_view(&state.orm, cart, &ctx).await?;
    Ok(ApiResponse::success("Cart cleared", view, Some(Meta::empty())))
}

async fn audit(state: &AppState, user: &AuthUser, action: &str, metadata: serde_json::Value) {
    if let Err(err) = log_audit(
        &state.orm,
        Some(user.user_id),
        action,
        Some("carts"),
        Some(metadata),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;
    use crate::entity::coupons::CouponType;

    fn d(raw: &str) -> Decimal {
        Decimal::from_str(raw).unwrap()
    }

    fn line(quantity: i32, price: &str) -> CartItemModel {
        let price = d(price);
        CartItemModel {
            id: Uuid::new_v4(),
            cart_id: Uuid::nil(),
            product_id: Uuid::new_v4(),
            quantity,
            price,
            total: line_total(quantity, price),
            product_options: None,
            created_at: Utc::now().into(),
            updated_at: Utc::now().into(),
        }
    }

    fn coupon(code: &str, kind: CouponType, value: &str) -> CouponModel {
        CouponModel {
            id: Uuid::new_v4(),
            code: code.into(),
            name: code.into(),
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

    fn applied(coupon: &CouponModel) -> (AppliedCoupon, Option<CouponModel>) {
        (
            AppliedCoupon {
                id: coupon.id,
                code: coupon.code.clone(),
                name: coupon.name.clone(),
                discount_amount: Decimal::ZERO,
            },
            Some(coupon.clone()),
        )
    }

    #[test]
    fn subtotal_and_tax_follow_lines() {
        let items = vec![line(2, "19.99"), line(1, "5.01")];
        let totals = derive_totals(&items, d("0.10"), &[]);
        assert_eq!(totals.subtotal, d("44.99"));
        assert_eq!(totals.tax_amount, d("4.50"));
        assert_eq!(totals.total, d("49.49"));
        assert_eq!(totals.discount_amount, Decimal::ZERO);
    }

    #[test]
    fn empty_cart_is_all_zero() {
        let totals = derive_totals(&[], d("0.10"), &[]);
        assert_eq!(totals.total, Decimal::ZERO);
        assert!(totals.applied_coupons.0.is_empty());
    }

    #[test]
    fn capped_percentage_coupon_reduces_total_by_cap() {
        let mut half = coupon("HALF", CouponType::Percentage, "50");
        half.maximum_discount = Some(d("20"));
        half.minimum_amount = Some(d("10"));

        let totals = derive_totals(&[line(1, "100")], d("0.10"), &[applied(&half)]);
        assert_eq!(totals.subtotal, d("100"));
        assert_eq!(totals.discount_amount, d("20"));
        assert_eq!(totals.total, d("90"));
        assert_eq!(totals.total, totals.subtotal + totals.tax_amount - totals.discount_amount);
    }

    #[test]
    fn coupons_below_minimum_or_deleted_are_dropped() {
        let mut big_spender = coupon("BIG", CouponType::Fixed, "5");
        big_spender.minimum_amount = Some(d("50"));
        let gone = coupon("GONE", CouponType::Fixed, "5");
        let entries = vec![applied(&big_spender), (applied(&gone).0, None)];

        let totals = derive_totals(&[line(1, "20")], d("0.10"), &entries);
        assert!(totals.applied_coupons.0.is_empty());
        assert_eq!(totals.total, d("22"));
    }

    #[test]
    fn stacked_discounts_never_exceed_subtotal() {
        let a = coupon("A", CouponType::Fixed, "15");
        let b = coupon("B", CouponType::Fixed, "15");
        let totals = derive_totals(&[line(1, "20")], d("0"), &[applied(&a), applied(&b)]);
        assert_eq!(totals.discount_amount, d("20"));
        assert_eq!(totals.applied_coupons.0[1].discount_amount, d("5"));
        assert_eq!(totals.total, Decimal::ZERO);
    }

    #[test]
    fn merged_quantity_rejects_overflow_and_oversized_lines() {
        assert_eq!(merged_quantity(3, 4).unwrap(), 7);
        assert_eq!(merged_quantity(MAX_LINE_QUANTITY - 1, 1).unwrap(), MAX_LINE_QUANTITY);

        let err = merged_quantity(i32::MAX, 1).unwrap_err();
        assert!(matches!(err, AppError::Validation { ref field, .. } if field == "quantity"));
        let err = merged_quantity(MAX_LINE_QUANTITY, 1).unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
    }

    #[test]
    fn options_normalize_empty_to_none() {
        assert_eq!(normalize_options(Some(serde_json::json!({}))), None);
        assert_eq!(normalize_options(Some(serde_json::Value::Null)), None);
        let size = serde_json::json!({ "size": "L" });
        assert_eq!(normalize_options(Some(size.clone())), Some(size));
    }
}
