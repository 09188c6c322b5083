use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    entity::{
        carts::AppliedCoupon,
        coupons::CouponType,
        orders::{OrderStatus, OriginalAmounts, PaymentStatus},
    },
    pricing::{PriceDisplay, RateSource},
};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Currency {
    pub code: String,
    pub name: String,
    pub symbol: String,
    pub is_active: bool,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CurrencyRate {
    pub from_currency: String,
    pub to_currency: String,
    pub rate: Decimal,
    pub last_updated_at: DateTime<Utc>,
}

/// The rate applied to every display figure in a response.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DisplayRate {
    pub base_currency: String,
    pub currency: String,
    pub rate: Decimal,
    pub source: RateSource,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub sku: String,
    pub description: Option<String>,
    /// Base-currency list price.
    pub price: Decimal,
    pub sale_price: Option<Decimal>,
    pub current_price: Decimal,
    pub stock_quantity: i32,
    pub manage_stock: bool,
    pub in_stock: bool,
    pub display_price: PriceDisplay,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CartItem {
    pub id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub product_sku: String,
    pub quantity: i32,
    pub price: Decimal,
    pub total: Decimal,
    #[schema(value_type = Option<Object>)]
    pub product_options: Option<serde_json::Value>,
    pub display_price: PriceDisplay,
    pub display_total: PriceDisplay,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CartTotalsDisplay {
    pub subtotal: PriceDisplay,
    pub tax_amount: PriceDisplay,
    pub discount_amount: PriceDisplay,
    pub total: PriceDisplay,
}

/// Cart with base-currency totals plus the same figures converted for display.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Cart {
    pub id: Uuid,
    pub user_id: Uuid,
    pub currency: String,
    pub items: Vec<CartItem>,
    pub item_count: i64,
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub discount_amount: Decimal,
    pub total: Decimal,
    pub applied_coupons: Vec<AppliedCoupon>,
    pub display: CartTotalsDisplay,
    pub rate: DisplayRate,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Coupon {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub kind: CouponType,
    pub value: Decimal,
    pub minimum_amount: Option<Decimal>,
    pub maximum_discount: Option<Decimal>,
    pub usage_limit: Option<i32>,
    pub usage_limit_per_user: Option<i32>,
    pub used_count: i32,
    pub is_active: bool,
    pub starts_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Order {
    pub id: Uuid,
    pub order_number: String,
    pub user_id: Uuid,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_method: Option<String>,
    pub payment_session_id: Option<String>,
    pub payment_reference: Option<String>,
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub shipping_amount: Decimal,
    pub discount_amount: Decimal,
    pub total: Decimal,
    pub currency: String,
    pub exchange_rate: Decimal,
    pub original_amounts: OriginalAmounts,
    #[schema(value_type = Object)]
    pub billing_address: serde_json::Value,
    #[schema(value_type = Object)]
    pub shipping_address: serde_json::Value,
    pub applied_coupons: Vec<AppliedCoupon>,
    pub notes: Option<String>,
    pub tracking_number: Option<String>,
    pub can_be_cancelled: bool,
    pub paid_at: Option<DateTime<Utc>>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub product_sku: String,
    pub quantity: i32,
    pub price: Decimal,
    pub total: Decimal,
    pub base_price: Decimal,
    #[schema(value_type = Option<Object>)]
    pub product_options: Option<serde_json::Value>,
    #[schema(value_type = Object)]
    pub product_snapshot: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
