//! Stock reservation against the product row. Every function expects to run
//! inside the caller's transaction, with the product locked via [`lock_product`].

use chrono::Utc;
use sea_orm::{ActiveModelTrait, ConnectionTrait, EntityTrait, Set};
use uuid::Uuid;

use crate::{
    db::for_update,
    entity::products::{ActiveModel as ProductActive, Entity as Products, Model as ProductModel},
    error::{AppError, AppResult},
};

pub async fn lock_product(
    conn: &impl ConnectionTrait,
    product_id: Uuid,
) -> AppResult<Option<ProductModel>> {
    Ok(for_update(Products::find_by_id(product_id), conn)
        .one(conn)
        .await?)
}

pub fn unavailable(product: &ProductModel) -> AppError {
    AppError::validation(
        "product",
        format!(
            "Product '{}' is not available in requested quantity.",
            product.name
        ),
    )
}

/// Takes `quantity` units out of available stock. Unmanaged products only
/// need to be flagged in stock.
pub async fn reserve(
    conn: &impl ConnectionTrait,
    product: ProductModel,
    quantity: i32,
) -> AppResult<ProductModel> {
    if !product.can_purchase(quantity) {
        return Err(unavailable(&product));
    }
    if !product.manage_stock {
        return Ok(product);
    }

    let remaining = product.stock_quantity - quantity;
    if remaining < 0 {
        return Err(AppError::consistency(format!(
            "stock for product {} would drop to {remaining}",
            product.id
        )));
    }
    set_stock(conn, product, remaining).await
}

/// Puts `quantity` units back. A product deleted since the reservation is
/// logged and skipped.
pub async fn release(
    conn: &impl ConnectionTrait,
    product_id: Uuid,
    quantity: i32,
) -> AppResult<()> {
    let Some(product) = lock_product(conn, product_id).await? else {
        tracing::warn!(%product_id, quantity, "cannot restore stock, product no longer exists");
        return Ok(());
    };
    if !product.manage_stock {
        return Ok(());
    }
    let restored = product.stock_quantity + quantity;
    set_stock(conn, product, restored).await?;
    Ok(())
}

/// Releases several lines, locking products in id order.
pub async fn release_all(
    conn: &impl ConnectionTrait,
    mut lines: Vec<(Uuid, i32)>,
) -> AppResult<()> {
    lines.sort_by_key(|(product_id, _)| *product_id);
    for (product_id, quantity) in lines {
        release(conn, product_id, quantity).await?;
    }
    Ok(())
}

/// Writes a new managed quantity and keeps `in_stock` in step with it.
pub async fn set_stock(
    conn: &impl ConnectionTrait,
    product: ProductModel,
    stock_quantity: i32,
) -> AppResult<ProductModel> {
    let mut active: ProductActive = product.into();
    active.stock_quantity = Set(stock_quantity);
    active.in_stock = Set(stock_quantity > 0);
    active.updated_at = Set(Utc::now().into());
    Ok(active.update(conn).await?)
}
