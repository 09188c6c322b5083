use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::Cart;

#[derive(Debug, Deserialize, ToSchema)]
pub struct AddCartItemRequest {
    pub product_id: Uuid,
    pub quantity: i32,
    /// Variant choices; lines with different options are kept apart.
    #[schema(value_type = Option<Object>)]
    pub options: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateCartItemRequest {
    pub quantity: i32,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ApplyCouponRequest {
    pub code: String,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct CurrencyQuery {
    pub currency: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ReorderedLine {
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: i32,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SkippedLine {
    pub product_id: Uuid,
    pub product_name: String,
    pub reason: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ReorderResult {
    pub cart: Cart,
    pub added: Vec<ReorderedLine>,
    pub skipped: Vec<SkippedLine>,
}
