use std::collections::BTreeMap;

use chrono::{Duration, NaiveTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use uuid::Uuid;

use crate::{
    audit::log_audit,
    db::for_update,
    dto::{
        cart::{ReorderResult, ReorderedLine, SkippedLine},
        orders::{CancelOrderRequest, Invoice, OrderList, OrderStatistics, OrderWithItems},
    },
    entity::{
        order_items::{Column as OrderItemCol, Entity as OrderItems, Model as OrderItemModel},
        orders::{
            ActiveModel as OrderActive, Column as OrderCol, Entity as Orders, Model as OrderModel,
            OrderStatus, PaymentStatus,
        },
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::{Order, OrderItem},
    pricing::round_money,
    response::{ApiResponse, Meta},
    routes::params::{OrderListQuery, SortOrder},
    services::{
        cart_service, currency_service,
        notifications::{OrderStatusEvent, notify},
        stock,
    },
    state::AppState,
};

const INVOICE_DUE_DAYS: i64 = 30;

/// Filters shared by the customer and admin order listings.
pub fn order_condition(query: &OrderListQuery) -> AppResult<Condition> {
    let mut condition = Condition::all();
    if let Some(raw) = query.status.as_deref().filter(|s| !s.is_empty()) {
        let status = OrderStatus::parse(raw)
            .ok_or_else(|| AppError::validation("status", format!("Unknown status '{raw}'.")))?;
        condition = condition.add(OrderCol::Status.eq(status));
    }
    if let Some(raw) = query.payment_status.as_deref().filter(|s| !s.is_empty()) {
        let status = PaymentStatus::parse(raw).ok_or_else(|| {
            AppError::validation("payment_status", format!("Unknown payment status '{raw}'."))
        })?;
        condition = condition.add(OrderCol::PaymentStatus.eq(status));
    }
    if let Some(from) = query.from_date {
        let start = from.and_time(NaiveTime::MIN).and_utc();
        condition = condition.add(OrderCol::CreatedAt.gte(start));
    }
    if let Some(to) = query.to_date {
        let end = (to + Duration::days(1)).and_time(NaiveTime::MIN).and_utc();
        condition = condition.add(OrderCol::CreatedAt.lt(end));
    }
    if let Some(search) = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        condition = condition.add(OrderCol::OrderNumber.contains(search.to_uppercase()));
    }
    Ok(condition)
}

pub async fn list_with_condition(
    conn: &impl ConnectionTrait,
    condition: Condition,
    query: &OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    let (page, limit, offset) = query.pagination().normalize();
    let sort_order = query.sort_order.unwrap_or(SortOrder::Desc);

    let mut finder = Orders::find().filter(condition);
    finder = match sort_order {
        SortOrder::Asc => finder.order_by_asc(OrderCol::CreatedAt),
        SortOrder::Desc => finder.order_by_desc(OrderCol::CreatedAt),
    };

    let total = finder.clone().count(conn).await? as i64;
    let orders = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(conn)
        .await?
        .into_iter()
        .map(order_from_entity)
        .collect();

    Ok(ApiResponse::paginated(
        "Ok",
        OrderList { items: orders },
        page,
        limit,
        total,
    ))
}

pub async fn list_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    let condition = order_condition(&query)?.add(OrderCol::UserId.eq(user.user_id));
    list_with_condition(&state.orm, condition, &query).await
}

pub async fn find_user_order(
    conn: &impl ConnectionTrait,
    user_id: Uuid,
    order_id: Uuid,
) -> AppResult<OrderModel> {
    Orders::find_by_id(order_id)
        .filter(OrderCol::UserId.eq(user_id))
        .one(conn)
        .await?
        .ok_or(AppError::NotFound)
}

pub async fn order_items(
    conn: &impl ConnectionTrait,
    order_id: Uuid,
) -> AppResult<Vec<OrderItemModel>> {
    Ok(OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order_id))
        .order_by_asc(OrderItemCol::CreatedAt)
        .all(conn)
        .await?)
}

pub async fn with_items(
    conn: &impl ConnectionTrait,
    order: OrderModel,
) -> AppResult<OrderWithItems> {
    let items = order_items(conn, order.id).await?;
    Ok(OrderWithItems {
        order: order_from_entity(order),
        items: items.into_iter().map(order_item_from_entity).collect(),
    })
}

pub async fn get_order(
    state: &AppState,
    user: &AuthUser,
    order_id: Uuid,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let order = find_user_order(&state.orm, user.user_id, order_id).await?;
    let data = with_items(&state.orm, order).await?;
    Ok(ApiResponse::success("Ok", data, Some(Meta::empty())))
}

/// Puts every item of an order back on the shelf.
pub async fn restore_order_stock(conn: &impl ConnectionTrait, order_id: Uuid) -> AppResult<()> {
    let lines = order_items(conn, order_id)
        .await?
        .into_iter()
        .map(|item| (item.product_id, item.quantity))
        .collect();
    stock::release_all(conn, lines).await
}

/// Moves a locked order to `next`, restoring stock when it is cancelled.
/// Returns the updated order and the status it left.
pub async fn transition(
    conn: &impl ConnectionTrait,
    order: OrderModel,
    next: OrderStatus,
    tracking_number: Option<String>,
    notes: Option<String>,
) -> AppResult<(OrderModel, OrderStatus)> {
    let previous = order.status;
    if !previous.can_transition_to(next) {
        return Err(AppError::validation(
            "status",
            format!(
                "Order cannot move from {} to {}.",
                previous.as_str(),
                next.as_str()
            ),
        ));
    }

    if next == OrderStatus::Cancelled {
        restore_order_stock(conn, order.id).await?;
    }

    let now = Utc::now();
    let payment_status = order.payment_status;
    let existing_notes = order.notes.clone();
    let mut active: OrderActive = order.into();
    active.status = Set(next);
    match next {
        OrderStatus::Shipped => {
            active.shipped_at = Set(Some(now.into()));
            if let Some(tracking) = tracking_number.filter(|t| !t.trim().is_empty()) {
                active.tracking_number = Set(Some(tracking));
            }
        }
        OrderStatus::Delivered => active.delivered_at = Set(Some(now.into())),
        OrderStatus::Refunded if payment_status == PaymentStatus::Paid => {
            active.payment_status = Set(PaymentStatus::Refunded);
        }
        _ => {}
    }
    if let Some(note) = notes.filter(|n| !n.trim().is_empty()) {
        let combined = match existing_notes {
            Some(existing) if !existing.is_empty() => format!("{existing}\n{note}"),
            _ => note,
        };
        active.notes = Set(Some(combined));
    }
    active.updated_at = Set(now.into());
    let order = active.update(conn).await?;

    tracing::info!(
        order_id = %order.id,
        from = previous.as_str(),
        to = next.as_str(),
        "order status changed"
    );
    Ok((order, previous))
}

pub async fn lock_order(conn: &impl ConnectionTrait, order_id: Uuid) -> AppResult<OrderModel> {
    for_update(Orders::find_by_id(order_id), conn)
        .one(conn)
        .await?
        .ok_or(AppError::NotFound)
}

/// Audit row and notification after a committed status change.
pub async fn after_transition(
    state: &AppState,
    actor: Uuid,
    order: &OrderModel,
    previous: OrderStatus,
) {
    audit(
        state,
        actor,
        "order_status_update",
        serde_json::json!({
            "order_id": order.id,
            "from": previous.as_str(),
            "to": order.status.as_str(),
        }),
    )
    .await;
    notify(
        state.notifier.as_ref(),
        &OrderStatusEvent {
            order_id: order.id,
            order_number: order.order_number.clone(),
            user_id: order.user_id,
            from: Some(previous),
            to: order.status,
        },
    )
    .await;
}

pub async fn cancel_order(
    state: &AppState,
    user: &AuthUser,
    order_id: Uuid,
    payload: CancelOrderRequest,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let txn = state.orm.begin().await?;
    let order = lock_order(&txn, order_id).await?;
    if order.user_id != user.user_id {
        return Err(AppError::NotFound);
    }
    if !order.status.can_be_cancelled() {
        return Err(AppError::validation(
            "order",
            "This order cannot be cancelled.",
        ));
    }
    let note = payload
        .reason
        .filter(|r| !r.trim().is_empty())
        .map(|reason| format!("Cancelled by customer: {reason}"));
    let (order, previous) = transition(&txn, order, OrderStatus::Cancelled, None, note).await?;
    txn.commit().await?;

    after_transition(state, user.user_id, &order, previous).await;

    let data = with_items(&state.orm, order).await?;
    Ok(ApiResponse::success("Order cancelled", data, Some(Meta::empty())))
}

/// Counts by status, plus spending over paid orders in the current base
/// currency. Orders priced from another base are left out of the sums.
pub async fn statistics(
    state: &AppState,
    user: &AuthUser,
) -> AppResult<ApiResponse<OrderStatistics>> {
    let base = currency_service::base_currency(&state.orm, &state.config).await?;
    let orders = Orders::find()
        .filter(OrderCol::UserId.eq(user.user_id))
        .all(&state.orm)
        .await?;

    let mut by_status: BTreeMap<String, i64> = BTreeMap::new();
    let mut paid_orders = 0_i64;
    let mut total_spent = Decimal::ZERO;
    for order in &orders {
        *by_status.entry(order.status.as_str().to_string()).or_default() += 1;
        if order.payment_status != PaymentStatus::Paid {
            continue;
        }
        if order.original_amounts.currency != base {
            tracing::debug!(
                order_id = %order.id,
                currency = %order.original_amounts.currency,
                "skipping order priced from another base currency"
            );
            continue;
        }
        paid_orders += 1;
        total_spent += order.original_amounts.total;
    }

    let total_spent = round_money(total_spent);
    let average_order_value = if paid_orders > 0 {
        round_money(total_spent / Decimal::from(paid_orders))
    } else {
        Decimal::ZERO
    };

    let data = OrderStatistics {
        total_orders: orders.len() as i64,
        by_status,
        paid_orders,
        total_spent,
        average_order_value,
        currency: base,
    };
    Ok(ApiResponse::success("Ok", data, Some(Meta::empty())))
}

/// Adds a past order's items back into the cart through the normal add path.
/// Items that cannot be reserved are reported and skipped.
pub async fn reorder(
    state: &AppState,
    user: &AuthUser,
    order_id: Uuid,
    currency: Option<String>,
) -> AppResult<ApiResponse<ReorderResult>> {
    let ctx = currency_service::context_for_user(
        &state.orm,
        &state.config,
        user,
        currency.as_deref(),
    )
    .await?;
    let order = find_user_order(&state.orm, user.user_id, order_id).await?;
    let items = order_items(&state.orm, order.id).await?;

    let txn = state.orm.begin().await?;
    let cart = cart_service::lock_cart(&txn, user.user_id).await?;
    let mut added = Vec::new();
    let mut skipped = Vec::new();
    for item in items {
        match cart_service::add_line(
            &txn,
            &cart,
            item.product_id,
            item.quantity,
            item.product_options.clone(),
        )
        .await
        {
            Ok(_) => added.push(ReorderedLine {
                product_id: item.product_id,
                product_name: item.product_name,
                quantity: item.quantity,
            }),
            Err(AppError::Validation { message, .. }) => skipped.push(SkippedLine {
                product_id: item.product_id,
                product_name: item.product_name,
                reason: message,
            }),
            Err(err) => return Err(err),
        }
    }
    let cart = cart_service::recalculate(&txn, cart, state.config.tax_rate).await?;
    txn.commit().await?;

    audit(
        state,
        user.user_id,
        "order_reorder",
        serde_json::json!({
            "order_id": order.id,
            "added": added.len(),
            "skipped": skipped.len(),
        }),
    )
    .await;

    let cart = cart_service::cart_view(&state.orm, cart, &ctx).await?;
    let message = if skipped.is_empty() {
        "Items added to cart"
    } else {
        "Some items could not be added to cart"
    };
    Ok(ApiResponse::success(
        message,
        ReorderResult {
            cart,
            added,
            skipped,
        },
        Some(Meta::empty()),
    ))
}

pub async fn invoice(
    state: &AppState,
    user: &AuthUser,
    order_id: Uuid,
) -> AppResult<ApiResponse<Invoice>> {
    let order = find_user_order(&state.orm, user.user_id, order_id).await?;
    let invoice_date = order
        .paid_at
        .unwrap_or(order.created_at)
        .with_timezone(&Utc);
    let invoice_number = format!("INV-{}", order.order_number);
    let OrderWithItems { order, items } = with_items(&state.orm, order).await?;

    let data = Invoice {
        invoice_number,
        invoice_date,
        due_date: invoice_date + Duration::days(INVOICE_DUE_DAYS),
        order,
        items,
    };
    Ok(ApiResponse::success("Invoice", data, Some(Meta::empty())))
}

async fn audit(state: &AppState, actor: Uuid, action: &str, metadata: serde_json::Value) {
    if let Err(err) = log_audit(
        &state.orm,
        Some(actor),
        action,
        Some("orders"),
        Some(metadata),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }
}

pub fn order_from_entity(model: OrderModel) -> Order {
    Order {
        can_be_cancelled: model.status.can_be_cancelled(),
        id: model.id,
        order_number: model.order_number,
        user_id: model.user_id,
        status: model.status,
        payment_status: model.payment_status,
        payment_method: model.payment_method,
        payment_session_id: model.payment_session_id,
        payment_reference: model.payment_reference,
        subtotal: model.subtotal,
        tax_amount: model.tax_amount,
        shipping_amount: model.shipping_amount,
        discount_amount: model.discount_amount,
        total: model.total,
        currency: model.currency,
        exchange_rate: model.exchange_rate,
        original_amounts: model.original_amounts,
        billing_address: model.billing_address,
        shipping_address: model.shipping_address,
        applied_coupons: model.applied_coupons.0,
        notes: model.notes,
        tracking_number: model.tracking_number,
        paid_at: model.paid_at.map(|dt| dt.with_timezone(&Utc)),
        shipped_at: model.shipped_at.map(|dt| dt.with_timezone(&Utc)),
        delivered_at: model.delivered_at.map(|dt| dt.with_timezone(&Utc)),
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
    }
}

pub fn order_item_from_entity(model: OrderItemModel) -> OrderItem {
    OrderItem {
        id: model.id,
        order_id: model.order_id,
        product_id: model.product_id,
        product_name: model.product_name,
        product_sku: model.product_sku,
        quantity: model.quantity,
        price: model.price,
        total: model.total,
        base_price: model.base_price,
        product_options: model.product_options,
        product_snapshot: model.product_snapshot,
        created_at: model.created_at.with_timezone(&Utc),
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    #[test]
    fn unknown_status_filter_is_rejected() {
        let query = OrderListQuery {
            status: Some("lost".into()),
            ..Default::default()
        };
        assert!(matches!(
            order_condition(&query),
            Err(AppError::Validation { field, .. }) if field == "status"
        ));
    }

    #[test]
    fn known_filters_build() {
        let query = OrderListQuery {
            status: Some("Shipped".into()),
            payment_status: Some("paid".into()),
            from_date: NaiveDate::from_ymd_opt(2025, 1, 1),
            to_date: NaiveDate::from_ymd_opt(2025, 1, 31),
            search: Some("ord-ab".into()),
            ..Default::default()
        };
        assert!(order_condition(&query).is_ok());
    }
}
