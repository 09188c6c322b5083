use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use uuid::Uuid;

use crate::{
    audit::log_audit,
    dto::products::{CreateProductRequest, ProductList, UpdateProductRequest},
    entity::products::{ActiveModel, Column, Entity as Products, Model as ProductModel},
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::Product,
    response::{ApiResponse, Meta},
    routes::params::{ProductQuery, ProductSortBy, SortOrder},
    services::currency_service::{self, DisplayPricing},
    state::AppState,
};

pub async fn list_products(
    state: &AppState,
    query: ProductQuery,
) -> AppResult<ApiResponse<ProductList>> {
    let ctx = currency_service::pricing_context(
        &state.orm,
        &state.config,
        query.currency.as_deref(),
        None,
    )
    .await?;
    let (page, limit, offset) = query.pagination().normalize();
    let mut condition = Condition::all();

    if let Some(search) = query.q.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        condition = condition.add(
            Condition::any()
                .add(Column::Name.contains(search))
                .add(Column::Sku.contains(search))
                .add(Column::Description.contains(search)),
        );
    }
    if let Some(min_price) = query.min_price {
        condition = condition.add(Column::Price.gte(min_price));
    }
    if let Some(max_price) = query.max_price {
        condition = condition.add(Column::Price.lte(max_price));
    }
    if let Some(in_stock) = query.in_stock {
        condition = condition.add(Column::InStock.eq(in_stock));
    }

    let sort_by = query.sort_by.unwrap_or(ProductSortBy::CreatedAt);
    let sort_order = query.sort_order.unwrap_or(SortOrder::Desc);
    let sort_col = match sort_by {
        ProductSortBy::CreatedAt => Column::CreatedAt,
        ProductSortBy::Price => Column::Price,
        ProductSortBy::Name => Column::Name,
    };

    let mut finder = Products::find().filter(condition);
    finder = match sort_order {
        SortOrder::Asc => finder.order_by_asc(sort_col),
        SortOrder::Desc => finder.order_by_desc(sort_col),
    };

    let total = finder.clone().count(&state.orm).await? as i64;
    let pricing = ctx.display_pricing(&state.orm).await?;
    let items = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(|p| product_view(p, &pricing))
        .collect();

    Ok(ApiResponse::paginated("Products", ProductList { items }, page, limit, total))
}

pub async fn get_product(
    state: &AppState,
    id: Uuid,
    currency: Option<String>,
) -> AppResult<ApiResponse<Product>> {
    let ctx =
        currency_service::pricing_context(&state.orm, &state.config, currency.as_deref(), None)
            .await?;
    let product = Products::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;
    let pricing = ctx.display_pricing(&state.orm).await?;
    Ok(ApiResponse::success(
        "Product",
        product_view(product, &pricing),
        Some(Meta::empty()),
    ))
}

pub async fn create_product(
    state: &AppState,
    user: &AuthUser,
    payload: CreateProductRequest,
) -> AppResult<ApiResponse<Product>> {
    ensure_admin(user)?;
    let name = payload.name.trim().to_string();
    if name.is_empty() {
        return Err(AppError::validation("name", "name is required"));
    }
    let sku = payload.sku.trim().to_string();
    if sku.is_empty() {
        return Err(AppError::validation("sku", "sku is required"));
    }
    validate_pricing(payload.price, payload.sale_price, payload.stock_quantity)?;

    if Products::find()
        .filter(Column::Sku.eq(sku.clone()))
        .one(&state.orm)
        .await?
        .is_some()
    {
        return Err(AppError::Conflict(format!("sku {sku} already exists")));
    }

    let now = Utc::now();
    let product = ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set(name),
        sku: Set(sku),
        description: Set(payload.description),
        price: Set(payload.price),
        sale_price: Set(payload.sale_price),
        stock_quantity: Set(payload.stock_quantity),
        manage_stock: Set(payload.manage_stock),
        in_stock: Set(derived_in_stock(
            payload.manage_stock,
            payload.stock_quantity,
            payload.in_stock,
        )),
        created_at: Set(now.into()),
        updated_at: Set(now.into()),
    }
    .insert(&state.orm)
    .await?;

    audit(state, user, "product_create", product.id).await;

    let pricing = base_pricing(state).await?;
    Ok(ApiResponse::success(
        "Product created",
        product_view(product, &pricing),
        Some(Meta::empty()),
    ))
}

/// Admin edit. Existing cart lines keep the price they were added at.
pub async fn update_product(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateProductRequest,
) -> AppResult<ApiResponse<Product>> {
    ensure_admin(user)?;
    let existing = Products::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;

    let price = payload.price.unwrap_or(existing.price);
    let sale_price = if payload.clear_sale_price {
        None
    } else {
        payload.sale_price.or(existing.sale_price)
    };
    let stock_quantity = payload.stock_quantity.unwrap_or(existing.stock_quantity);
    let manage_stock = payload.manage_stock.unwrap_or(existing.manage_stock);
    let in_stock = payload.in_stock.unwrap_or(existing.in_stock);
    validate_pricing(price, sale_price, stock_quantity)?;

    let mut active: ActiveModel = existing.into();
    if let Some(name) = payload.name {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(AppError::validation("name", "name is required"));
        }
        active.name = Set(name);
    }
    if let Some(description) = payload.description {
        active.description = Set(Some(description));
    }
    active.price = Set(price);
    active.sale_price = Set(sale_price);
    active.stock_quantity = Set(stock_quantity);
    active.manage_stock = Set(manage_stock);
    active.in_stock = Set(derived_in_stock(manage_stock, stock_quantity, in_stock));
    active.updated_at = Set(Utc::now().into());
    let product = active.update(&state.orm).await?;

    audit(state, user, "product_update", product.id).await;

    let pricing = base_pricing(state).await?;
    Ok(ApiResponse::success(
        "Product updated",
        product_view(product, &pricing),
        Some(Meta::empty()),
    ))
}

fn validate_pricing(
    price: Decimal,
    sale_price: Option<Decimal>,
    stock_quantity: i32,
) -> AppResult<()> {
    if price < Decimal::ZERO {
        return Err(AppError::validation("price", "price cannot be negative"));
    }
    if let Some(sale) = sale_price {
        if sale < Decimal::ZERO || sale >= price {
            return Err(AppError::validation(
                "sale_price",
                "sale_price must be below price",
            ));
        }
    }
    if stock_quantity < 0 {
        return Err(AppError::validation(
            "stock_quantity",
            "stock_quantity cannot be negative",
        ));
    }
    Ok(())
}

/// Managed products are in stock exactly when units remain.
fn derived_in_stock(manage_stock: bool, stock_quantity: i32, flag: bool) -> bool {
    if manage_stock {
        stock_quantity > 0
    } else {
        flag
    }
}

async fn base_pricing(state: &AppState) -> AppResult<DisplayPricing> {
    currency_service::pricing_context(&state.orm, &state.config, None, None)
        .await?
        .display_pricing(&state.orm)
        .await
}

async fn audit(state: &AppState, user: &AuthUser, action: &str, product_id: Uuid) {
    if let Err(err) = log_audit(
        &state.orm,
        Some(user.user_id),
        action,
        Some("products"),
        Some(serde_json::json!({ "product_id": product_id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }
}

pub fn product_view(model: ProductModel, pricing: &DisplayPricing) -> Product {
    let current_price = model.current_price();
    Product {
        display_price: pricing.display(current_price),
        current_price,
        in_stock: model.is_in_stock(),
        id: model.id,
        name: model.name,
        sku: model.sku,
        description: model.description,
        price: model.price,
        sale_price: model.sale_price,
        stock_quantity: model.stock_quantity,
        manage_stock: model.manage_stock,
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sale_price_must_undercut_price() {
        let price = Decimal::new(1000, 2);
        assert!(validate_pricing(price, Some(Decimal::new(999, 2)), 0).is_ok());
        assert!(validate_pricing(price, Some(price), 0).is_err());
        assert!(validate_pricing(price, None, -1).is_err());
    }

    #[test]
    fn managed_products_derive_in_stock() {
        assert!(!derived_in_stock(true, 0, true));
        assert!(derived_in_stock(true, 3, false));
        assert!(derived_in_stock(false, 0, true));
    }
}
