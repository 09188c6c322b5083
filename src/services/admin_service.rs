use sea_orm::{
    ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect,
    TransactionTrait,
};
use uuid::Uuid;

use crate::{
    audit::log_audit,
    dto::{
        orders::{OrderList, OrderWithItems, UpdateOrderStatusRequest},
        products::{InventoryAdjustRequest, LowStockQuery, ProductList},
    },
    entity::{
        orders::Entity as Orders,
        products::{Column as ProdCol, Entity as Products},
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::Product,
    response::{ApiResponse, Meta},
    routes::params::OrderListQuery,
    services::{currency_service, order_service, product_service::product_view, stock},
    state::AppState,
};

pub async fn list_all_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    ensure_admin(user)?;
    let condition = order_service::order_condition(&query)?;
    order_service::list_with_condition(&state.orm, condition, &query).await
}

pub async fn get_order_admin(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<OrderWithItems>> {
    ensure_admin(user)?;
    let order = Orders::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;
    let data = order_service::with_items(&state.orm, order).await?;
    Ok(ApiResponse::success("Order found", data, Some(Meta::empty())))
}

/// Moves an order through the lifecycle. Cancelling restores stock;
/// refunding has no stock side effect.
pub async fn update_order_status(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateOrderStatusRequest,
) -> AppResult<ApiResponse<OrderWithItems>> {
    ensure_admin(user)?;

    let txn = state.orm.begin().await?;
    let order = order_service::lock_order(&txn, id).await?;
    let (order, previous) = order_service::transition(
        &txn,
        order,
        payload.status,
        payload.tracking_number,
        payload.notes,
    )
    .await?;
    txn.commit().await?;

    order_service::after_transition(state, user.user_id, &order, previous).await;

    let data = order_service::with_items(&state.orm, order).await?;
    Ok(ApiResponse::success("Order updated", data, Some(Meta::empty())))
}

pub async fn list_low_stock(
    state: &AppState,
    user: &AuthUser,
    query: LowStockQuery,
) -> AppResult<ApiResponse<ProductList>> {
    ensure_admin(user)?;
    let threshold = query.threshold.unwrap_or(5);
    let (page, limit, offset) = query.pagination().normalize();

    let finder = Products::find()
        .filter(ProdCol::ManageStock.eq(true))
        .filter(ProdCol::StockQuantity.lte(threshold))
        .order_by_asc(ProdCol::StockQuantity)
        .order_by_desc(ProdCol::CreatedAt);

    let total = finder.clone().count(&state.orm).await? as i64;
    let pricing = currency_service::pricing_context(&state.orm, &state.config, None, None)
        .await?
        .display_pricing(&state.orm)
        .await?;
    let items = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(|p| product_view(p, &pricing))
        .collect();

    Ok(ApiResponse::paginated("Low stock", ProductList { items }, page, limit, total))
}

pub async fn adjust_inventory(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: InventoryAdjustRequest,
) -> AppResult<ApiResponse<Product>> {
    ensure_admin(user)?;
    if payload.delta == 0 {
        return Err(AppError::validation("delta", "delta must not be 0"));
    }

    let txn = state.orm.begin().await?;
    let product = stock::lock_product(&txn, id)
        .await?
        .ok_or(AppError::NotFound)?;
    if !product.manage_stock {
        return Err(AppError::validation(
            "delta",
            "stock is not managed for this product",
        ));
    }
    let new_stock = product.stock_quantity + payload.delta;
    if new_stock < 0 {
        return Err(AppError::validation("delta", "stock cannot be negative"));
    }
    let updated = stock::set_stock(&txn, product, new_stock).await?;
    txn.commit().await?;

    if let Err(err) = log_audit(
        &state.orm,
        Some(user.user_id),
        "inventory_adjust",
        Some("products"),
        Some(serde_json::json!({ "product_id": updated.id, "delta": payload.delta })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    let pricing = currency_service::pricing_context(&state.orm, &state.config, None, None)
        .await?
        .display_pricing(&state.orm)
        .await?;
    Ok(ApiResponse::success(
        "Inventory updated",
        product_view(updated, &pricing),
        Some(Meta::empty()),
    ))
}
