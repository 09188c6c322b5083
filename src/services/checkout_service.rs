//! Cart to order transition, payment sessions and the gateway webhook.

use std::collections::HashMap;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};
use uuid::Uuid;

use crate::{
    audit::log_audit,
    db::for_update,
    dto::{
        checkout::{
            CheckoutRequest, CheckoutSummary, PaymentSessionRequest, PaymentSessionResponse,
            WebhookAck, WebhookEvent, WebhookOutcome,
        },
        orders::OrderWithItems,
    },
    entity::{
        cart_items::Model as CartItemModel,
        carts::{AppliedCoupons, Model as CartModel},
        coupon_usages::ActiveModel as CouponUsageActive,
        coupons::{ActiveModel as CouponActive, Entity as Coupons},
        order_items::{ActiveModel as OrderItemActive, Model as OrderItemModel},
        orders::{
            ActiveModel as OrderActive, Column as OrderCol, Entity as Orders, Model as OrderModel,
            OrderStatus, OriginalAmounts, PaymentStatus,
        },
        products::Model as ProductModel,
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    pricing::{round_money, to_minor_units},
    response::{ApiResponse, Meta},
    services::{
        cart_service::{self, StockDisposition, line_total},
        coupon_service,
        currency_service::{self, DisplayPricing},
        notifications::{OrderStatusEvent, notify},
        order_service::{self, order_from_entity, order_item_from_entity},
        payment_gateway::{SessionLineItem, SessionRequest},
        random_code, stock,
    },
    state::AppState,
};

pub const SESSION_COMPLETED: &str = "checkout.session.completed";
pub const SESSION_EXPIRED: &str = "checkout.session.expired";

/// Base-currency figures an order is built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderAmounts {
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub shipping_amount: Decimal,
    pub discount_amount: Decimal,
    pub total: Decimal,
}

impl OrderAmounts {
    pub fn new(
        subtotal: Decimal,
        tax_amount: Decimal,
        shipping_amount: Decimal,
        discount_amount: Decimal,
    ) -> Self {
        Self {
            subtotal,
            tax_amount,
            shipping_amount,
            discount_amount,
            total: subtotal + tax_amount + shipping_amount - discount_amount,
        }
    }

    /// Converts each figure and rebuilds the total from the converted parts.
    pub fn converted(&self, pricing: &DisplayPricing) -> Self {
        Self::new(
            pricing.convert(self.subtotal),
            pricing.convert(self.tax_amount),
            pricing.convert(self.shipping_amount),
            pricing.convert(self.discount_amount),
        )
    }

    fn original(&self, currency: &str) -> OriginalAmounts {
        OriginalAmounts {
            currency: currency.to_string(),
            subtotal: self.subtotal,
            tax_amount: self.tax_amount,
            shipping_amount: self.shipping_amount,
            discount_amount: self.discount_amount,
            total: self.total,
        }
    }
}

/// A reserved line stays purchasable while its product exists and, for
/// unmanaged stock, is still flagged in stock. Managed quantities were
/// taken out of stock when the line was added.
fn line_available(product: Option<&ProductModel>) -> bool {
    match product {
        Some(product) => product.manage_stock || product.in_stock,
        None => false,
    }
}

/// Checks lines and applied coupons. Products come back keyed by id, locked
/// when `conn` is a transaction.
async fn validate_cart(
    conn: &impl ConnectionTrait,
    cart: &CartModel,
    items: &[CartItemModel],
    user_id: Uuid,
) -> AppResult<HashMap<Uuid, ProductModel>> {
    if items.is_empty() {
        return Err(AppError::validation("cart", "Your cart is empty."));
    }

    let mut ids: Vec<Uuid> = items.iter().map(|i| i.product_id).collect();
    ids.sort();
    ids.dedup();
    let mut products = HashMap::with_capacity(ids.len());
    for id in ids {
        if let Some(product) = stock::lock_product(conn, id).await? {
            products.insert(id, product);
        }
    }

    for item in items {
        let product = products.get(&item.product_id);
        if !line_available(product) {
            let name = product.map(|p| p.name.as_str()).unwrap_or("Unknown product");
            return Err(AppError::validation(
                "product",
                format!("Product '{name}' is not available in requested quantity."),
            ));
        }
    }

    let now = Utc::now();
    for entry in &cart.applied_coupons.0 {
        let usable = match Coupons::find_by_id(entry.id).one(conn).await? {
            Some(coupon) => coupon_service::can_be_used_by(conn, &coupon, user_id, now).await?,
            None => false,
        };
        if !usable {
            return Err(AppError::validation(
                "code",
                format!("Coupon '{}' can no longer be used.", entry.code),
            ));
        }
    }

    Ok(products)
}

/// Verifies the stored cart aggregates against its lines and returns the
/// base-currency order amounts.
fn order_amounts(
    cart: &CartModel,
    items: &[CartItemModel],
    shipping_amount: Decimal,
) -> AppResult<OrderAmounts> {
    let subtotal: Decimal = items.iter().map(|i| line_total(i.quantity, i.price)).sum();
    let discount = round_money(cart.applied_coupons.total_discount());
    let stored_subtotal = round_money(cart.subtotal);
    let stored_total = round_money(cart.total);
    let tax_amount = round_money(cart.tax_amount);

    if stored_subtotal != subtotal || stored_total != subtotal + tax_amount - discount {
        return Err(AppError::consistency(format!(
            "cart {} totals drifted: stored subtotal {stored_subtotal} total {stored_total}, lines give {subtotal}",
            cart.id
        )));
    }

    Ok(OrderAmounts::new(
        subtotal,
        tax_amount,
        round_money(shipping_amount),
        discount,
    ))
}

pub async fn validate(
    state: &AppState,
    user: &AuthUser,
    currency: Option<String>,
) -> AppResult<ApiResponse<CheckoutSummary>> {
    let ctx = currency_service::context_for_user(
        &state.orm,
        &state.config,
        user,
        currency.as_deref(),
    )
    .await?;
    let cart = cart_service::get_or_create_cart(&state.orm, user.user_id).await?;
    let items = cart_service::cart_items(&state.orm, cart.id).await?;
    validate_cart(&state.orm, &cart, &items, user.user_id).await?;

    let pricing = ctx.display_pricing(&state.orm).await?;
    let amounts = order_amounts(&cart, &items, Decimal::ZERO)?;
    let display = amounts.converted(&pricing);

    let data = CheckoutSummary {
        item_count: items.iter().map(|i| i64::from(i.quantity)).sum(),
        subtotal: amounts.subtotal,
        tax_amount: amounts.tax_amount,
        discount_amount: amounts.discount_amount,
        total: amounts.total,
        currency: ctx.display_currency.clone(),
        display_total: display.total,
        rate: pricing.rate,
    };
    Ok(ApiResponse::success("Cart is ready for checkout", data, Some(Meta::empty())))
}

fn product_snapshot(product: &ProductModel, base_currency: &str) -> serde_json::Value {
    serde_json::json!({
        "id": product.id,
        "name": product.name,
        "sku": product.sku,
        "description": product.description,
        "price": product.price,
        "sale_price": product.sale_price,
        "current_price": product.current_price(),
        "manage_stock": product.manage_stock,
        "currency": base_currency,
    })
}

async fn unused_order_number(conn: &impl ConnectionTrait) -> AppResult<String> {
    for _ in 0..5 {
        let number = format!("ORD-{}", random_code(8));
        let taken = Orders::find()
            .filter(OrderCol::OrderNumber.eq(number.clone()))
            .one(conn)
            .await?
            .is_some();
        if !taken {
            return Ok(number);
        }
    }
    Err(AppError::Conflict("could not generate a unique order number".into()))
}

/// Records one usage per applied coupon and bumps each coupon's counter.
async fn record_coupon_usages(
    conn: &impl ConnectionTrait,
    applied: &AppliedCoupons,
    user_id: Uuid,
    order_id: Uuid,
) -> AppResult<()> {
    let now = Utc::now();
    for entry in &applied.0 {
        let coupon = for_update(Coupons::find_by_id(entry.id), conn)
            .one(conn)
            .await?
            .ok_or_else(|| {
                AppError::consistency(format!("coupon {} vanished during checkout", entry.id))
            })?;

        CouponUsageActive {
            id: Set(Uuid::new_v4()),
            coupon_id: Set(coupon.id),
            user_id: Set(user_id),
            order_id: Set(Some(order_id)),
            discount_amount: Set(entry.discount_amount),
            created_at: Set(now.into()),
        }
        .insert(conn)
        .await?;

        let used_count = coupon.used_count + 1;
        let mut active: CouponActive = coupon.into();
        active.used_count = Set(used_count);
        active.updated_at = Set(now.into());
        active.update(conn).await?;
    }
    Ok(())
}

/// Turns the user's cart into a pending order in one transaction. Reserved
/// stock moves to the order; nothing is restored here.
pub async fn create_order(
    state: &AppState,
    user: &AuthUser,
    payload: CheckoutRequest,
    currency: Option<String>,
) -> AppResult<ApiResponse<OrderWithItems>> {
    if payload.shipping_amount < Decimal::ZERO {
        return Err(AppError::validation(
            "shipping_amount",
            "shipping_amount cannot be negative",
        ));
    }
    if !payload.billing_address.is_object() {
        return Err(AppError::validation(
            "billing_address",
            "billing_address must be an object",
        ));
    }
    let ctx = currency_service::context_for_user(
        &state.orm,
        &state.config,
        user,
        currency.as_deref(),
    )
    .await?;

    let txn = state.orm.begin().await?;
    let cart = cart_service::lock_cart(&txn, user.user_id).await?;
    let lines = cart_service::cart_items(&txn, cart.id).await?;
    let products = validate_cart(&txn, &cart, &lines, user.user_id).await?;

    let amounts = order_amounts(&cart, &lines, payload.shipping_amount)?;
    let pricing = ctx.display_pricing(&txn).await?;
    let converted = amounts.converted(&pricing);

    let now = Utc::now();
    let order_id = Uuid::new_v4();
    let order_number = unused_order_number(&txn).await?;
    let shipping_address = payload
        .shipping_address
        .unwrap_or_else(|| payload.billing_address.clone());

    let order = OrderActive {
        id: Set(order_id),
        order_number: Set(order_number),
        user_id: Set(user.user_id),
        status: Set(OrderStatus::Pending),
        payment_status: Set(PaymentStatus::Pending),
        payment_method: Set(payload.payment_method),
        payment_session_id: Set(None),
        payment_reference: Set(None),
        subtotal: Set(converted.subtotal),
        tax_amount: Set(converted.tax_amount),
        shipping_amount: Set(converted.shipping_amount),
        discount_amount: Set(converted.discount_amount),
        total: Set(converted.total),
        currency: Set(ctx.display_currency.clone()),
        exchange_rate: Set(pricing.rate.rate),
        original_amounts: Set(amounts.original(&ctx.base_currency)),
        billing_address: Set(payload.billing_address),
        shipping_address: Set(shipping_address),
        applied_coupons: Set(cart.applied_coupons.clone()),
        notes: Set(payload.notes),
        tracking_number: Set(None),
        paid_at: Set(None),
        shipped_at: Set(None),
        delivered_at: Set(None),
        created_at: Set(now.into()),
        updated_at: Set(now.into()),
    }
    .insert(&txn)
    .await?;

    let mut items: Vec<OrderItemModel> = Vec::with_capacity(lines.len());
    for line in &lines {
        let product = products.get(&line.product_id).ok_or_else(|| {
            AppError::consistency(format!("product {} missing after validation", line.product_id))
        })?;
        let price = pricing.convert(line.price);
        let item = OrderItemActive {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            product_id: Set(product.id),
            product_name: Set(product.name.clone()),
            product_sku: Set(product.sku.clone()),
            quantity: Set(line.quantity),
            price: Set(price),
            total: Set(line_total(line.quantity, price)),
            base_price: Set(line.price),
            product_options: Set(line.product_options.clone()),
            product_snapshot: Set(product_snapshot(product, &ctx.base_currency)),
            created_at: Set(now.into()),
        }
        .insert(&txn)
        .await?;
        items.push(item);
    }

    record_coupon_usages(&txn, &cart.applied_coupons, user.user_id, order.id).await?;
    cart_service::clear_lines(&txn, cart, StockDisposition::Commit, state.config.tax_rate).await?;
    txn.commit().await?;

    tracing::info!(
        order_id = %order.id,
        order_number = %order.order_number,
        user_id = %user.user_id,
        total = %order.total,
        currency = %order.currency,
        base_total = %amounts.total,
        "order created"
    );
    audit(
        state,
        Some(user.user_id),
        "order_create",
        serde_json::json!({ "order_id": order.id, "order_number": order.order_number }),
    )
    .await;
    notify(
        state.notifier.as_ref(),
        &OrderStatusEvent {
            order_id: order.id,
            order_number: order.order_number.clone(),
            user_id: order.user_id,
            from: None,
            to: OrderStatus::Pending,
        },
    )
    .await;

    let data = OrderWithItems {
        order: order_from_entity(order),
        items: items.into_iter().map(order_item_from_entity).collect(),
    };
    Ok(ApiResponse::success("Order created", data, Some(Meta::empty())))
}

/// Gateway line items in the order currency. Discounted orders are sent as
/// one line for the full total, since line items cannot carry negative
/// amounts.
pub fn session_line_items(
    order: &OrderModel,
    items: &[OrderItemModel],
) -> AppResult<Vec<SessionLineItem>> {
    let currency = order.currency.to_ascii_lowercase();
    if order.discount_amount > Decimal::ZERO {
        return Ok(vec![SessionLineItem {
            name: format!("Order {}", order.order_number),
            currency,
            unit_amount: to_minor_units(order.total)?,
            quantity: 1,
        }]);
    }

    let mut lines = Vec::with_capacity(items.len() + 2);
    for item in items {
        lines.push(SessionLineItem {
            name: item.product_name.clone(),
            currency: currency.clone(),
            unit_amount: to_minor_units(item.price)?,
            quantity: item.quantity,
        });
    }
    if order.shipping_amount > Decimal::ZERO {
        lines.push(SessionLineItem {
            name: "Shipping".into(),
            currency: currency.clone(),
            unit_amount: to_minor_units(order.shipping_amount)?,
            quantity: 1,
        });
    }
    if order.tax_amount > Decimal::ZERO {
        lines.push(SessionLineItem {
            name: "Tax".into(),
            currency,
            unit_amount: to_minor_units(order.tax_amount)?,
            quantity: 1,
        });
    }
    Ok(lines)
}

pub async fn create_payment_session(
    state: &AppState,
    user: &AuthUser,
    order_id: Uuid,
    payload: PaymentSessionRequest,
) -> AppResult<ApiResponse<PaymentSessionResponse>> {
    let order = order_service::find_user_order(&state.orm, user.user_id, order_id).await?;
    if order.status != OrderStatus::Pending || order.payment_status != PaymentStatus::Pending {
        return Err(AppError::validation(
            "order",
            "This order is not awaiting payment.",
        ));
    }
    let items = order_service::order_items(&state.orm, order.id).await?;

    let frontend = state.config.frontend_url.trim_end_matches('/');
    let request = SessionRequest {
        currency: order.currency.to_ascii_lowercase(),
        line_items: session_line_items(&order, &items)?,
        success_url: payload.success_url.unwrap_or_else(|| {
            format!("{frontend}/checkout/success?session_id={{CHECKOUT_SESSION_ID}}")
        }),
        cancel_url: payload
            .cancel_url
            .unwrap_or_else(|| format!("{frontend}/checkout/cancel")),
        metadata: serde_json::json!({
            "order_id": order.id,
            "order_number": order.order_number,
        }),
    };

    let session = state.payments.create_session(&request).await?;

    let mut active: OrderActive = order.into();
    active.payment_session_id = Set(Some(session.id.clone()));
    active.updated_at = Set(Utc::now().into());
    let order = active.update(&state.orm).await?;

    audit(
        state,
        Some(user.user_id),
        "payment_session_create",
        serde_json::json!({ "order_id": order.id, "session_id": session.id }),
    )
    .await;

    let data = PaymentSessionResponse {
        order_id: order.id,
        session_id: session.id,
        url: session.url,
    };
    Ok(ApiResponse::success("Payment session created", data, Some(Meta::empty())))
}

/// Applies a gateway callback. Every branch checks the order's current state
/// first, so replays are no-ops.
pub async fn handle_webhook(
    state: &AppState,
    secret: Option<&str>,
    event: WebhookEvent,
) -> AppResult<ApiResponse<WebhookAck>> {
    if let Some(expected) = state.config.payment_gateway_secret.as_deref() {
        if secret != Some(expected) {
            return Err(AppError::Forbidden);
        }
    }

    let outcome = match event.event_type.as_str() {
        SESSION_COMPLETED => {
            session_completed(
                state,
                &event.data.object.id,
                event.data.object.payment_reference.clone(),
            )
            .await?
        }
        SESSION_EXPIRED => session_expired(state, &event.data.object.id).await?,
        other => {
            tracing::debug!(event_type = %other, event_id = ?event.id, "ignoring webhook event");
            WebhookOutcome::Ignored
        }
    };

    Ok(ApiResponse::success(
        "Webhook received",
        WebhookAck {
            received: true,
            outcome,
        },
        Some(Meta::empty()),
    ))
}

async fn lock_order_by_session(
    conn: &impl ConnectionTrait,
    session_id: &str,
) -> AppResult<Option<OrderModel>> {
    let query = Orders::find().filter(OrderCol::PaymentSessionId.eq(session_id));
    Ok(for_update(query, conn).one(conn).await?)
}

async fn session_completed(
    state: &AppState,
    session_id: &str,
    payment_reference: Option<String>,
) -> AppResult<WebhookOutcome> {
    let txn = state.orm.begin().await?;
    let Some(order) = lock_order_by_session(&txn, session_id).await? else {
        tracing::warn!(%session_id, "completed session matches no order");
        return Ok(WebhookOutcome::Ignored);
    };
    if order.payment_status == PaymentStatus::Paid {
        tracing::debug!(order_id = %order.id, "duplicate completed webhook");
        return Ok(WebhookOutcome::AlreadyPaid);
    }
    if order.status != OrderStatus::Pending {
        tracing::warn!(
            order_id = %order.id,
            status = order.status.as_str(),
            "payment completed for an order that is no longer pending"
        );
        return Ok(WebhookOutcome::Ignored);
    }

    let now = Utc::now();
    let mut active: OrderActive = order.into();
    active.status = Set(OrderStatus::Processing);
    active.payment_status = Set(PaymentStatus::Paid);
    active.payment_reference = Set(payment_reference);
    active.paid_at = Set(Some(now.into()));
    active.updated_at = Set(now.into());
    let order = active.update(&txn).await?;
    txn.commit().await?;

    tracing::info!(order_id = %order.id, order_number = %order.order_number, "order paid");
    after_webhook_transition(state, &order, OrderStatus::Pending, "order_paid").await;
    Ok(WebhookOutcome::Paid)
}

async fn session_expired(state: &AppState, session_id: &str) -> AppResult<WebhookOutcome> {
    let txn = state.orm.begin().await?;
    let Some(order) = lock_order_by_session(&txn, session_id).await? else {
        tracing::warn!(%session_id, "expired session matches no order");
        return Ok(WebhookOutcome::Ignored);
    };
    if order.status != OrderStatus::Pending || order.payment_status != PaymentStatus::Pending {
        tracing::debug!(order_id = %order.id, "expired webhook for settled order");
        return Ok(WebhookOutcome::Ignored);
    }

    order_service::restore_order_stock(&txn, order.id).await?;
    let mut active: OrderActive = order.into();
    active.status = Set(OrderStatus::Cancelled);
    active.payment_status = Set(PaymentStatus::Failed);
    active.updated_at = Set(Utc::now().into());
    let order = active.update(&txn).await?;
    txn.commit().await?;

    tracing::info!(order_id = %order.id, order_number = %order.order_number, "payment session expired");
    after_webhook_transition(state, &order, OrderStatus::Pending, "order_payment_expired").await;
    Ok(WebhookOutcome::Expired)
}

async fn after_webhook_transition(
    state: &AppState,
    order: &OrderModel,
    from: OrderStatus,
    action: &str,
) {
    audit(
        state,
        Some(order.user_id),
        action,
        serde_json::json!({ "order_id": order.id, "order_number": order.order_number }),
    )
    .await;
    notify(
        state.notifier.as_ref(),
        &OrderStatusEvent {
            order_id: order.id,
            order_number: order.order_number.clone(),
            user_id: order.user_id,
            from: Some(from),
            to: order.status,
        },
    )
    .await;
}

async fn audit(
    state: &AppState,
    user_id: Option<Uuid>,
    action: &str,
    metadata: serde_json::Value,
) {
    if let Err(err) = log_audit(&state.orm, user_id, action, Some("orders"), Some(metadata)).await
    {
        tracing::warn!(error = %err, "audit log failed");
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    fn d(raw: &str) -> Decimal {
        Decimal::from_str(raw).unwrap()
    }

    fn order(shipping: &str, tax: &str, discount: &str, total: &str) -> OrderModel {
        OrderModel {
            id: Uuid::new_v4(),
            order_number: "ORD-TEST0001".into(),
            user_id: Uuid::new_v4(),
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Pending,
            payment_method: None,
            payment_session_id: None,
            payment_reference: None,
            subtotal: d("20"),
            tax_amount: d(tax),
            shipping_amount: d(shipping),
            discount_amount: d(discount),
            total: d(total),
            currency: "EUR".into(),
            exchange_rate: d("0.9"),
            original_amounts: OriginalAmounts {
                currency: "USD".into(),
                subtotal: Decimal::ZERO,
                tax_amount: Decimal::ZERO,
                shipping_amount: Decimal::ZERO,
                discount_amount: Decimal::ZERO,
                total: Decimal::ZERO,
            },
            billing_address: serde_json::json!({}),
            shipping_address: serde_json::json!({}),
            applied_coupons: AppliedCoupons::default(),
            notes: None,
            tracking_number: None,
            paid_at: None,
            shipped_at: None,
            delivered_at: None,
            created_at: Utc::now().into(),
            updated_at: Utc::now().into(),
        }
    }

    fn item(name: &str, quantity: i32, price: &str) -> OrderItemModel {
        OrderItemModel {
            id: Uuid::new_v4(),
            order_id: Uuid::nil(),
            product_id: Uuid::new_v4(),
            product_name: name.into(),
            product_sku: name.to_uppercase(),
            quantity,
            price: d(price),
            total: line_total(quantity, d(price)),
            base_price: d(price),
            product_options: None,
            product_snapshot: serde_json::json!({}),
            created_at: Utc::now().into(),
        }
    }

    #[test]
    fn line_items_add_shipping_and_tax() {
        let o = order("4.50", "2", "0", "26.50");
        let lines = session_line_items(&o, &[item("mug", 2, "10")]).unwrap();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].unit_amount, 1000);
        assert_eq!(lines[0].quantity, 2);
        assert_eq!(lines[0].currency, "eur");
        assert_eq!(lines[1].name, "Shipping");
        assert_eq!(lines[1].unit_amount, 450);
        assert_eq!(lines[2].unit_amount, 200);
    }

    #[test]
    fn discounted_order_is_charged_as_one_line() {
        let o = order("0", "2", "5", "17");
        let lines = session_line_items(&o, &[item("mug", 2, "10")]).unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].unit_amount, 1700);
        assert_eq!(lines[0].name, "Order ORD-TEST0001");
    }

    #[test]
    fn order_total_includes_shipping_and_discount() {
        let amounts = OrderAmounts::new(d("100"), d("10"), d("5"), d("20"));
        assert_eq!(amounts.total, d("95"));
        let original = amounts.original("USD");
        assert_eq!(original.total, d("95"));
        assert_eq!(original.currency, "USD");
    }

    #[test]
    fn deleted_product_is_unavailable() {
        assert!(!line_available(None));
    }
}
