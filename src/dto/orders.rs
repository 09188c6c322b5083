use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    entity::orders::OrderStatus,
    models::{Order, OrderItem},
};

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderWithItems {
    pub order: Order,
    pub items: Vec<OrderItem>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderList {
    pub items: Vec<Order>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct CancelOrderRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateOrderStatusRequest {
    pub status: OrderStatus,
    pub tracking_number: Option<String>,
    pub notes: Option<String>,
}

/// Spending figures are in the base currency the orders were priced from.
#[derive(Debug, Serialize, ToSchema)]
pub struct OrderStatistics {
    pub total_orders: i64,
    pub by_status: BTreeMap<String, i64>,
    pub paid_orders: i64,
    pub total_spent: Decimal,
    pub average_order_value: Decimal,
    pub currency: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct Invoice {
    pub invoice_number: String,
    pub invoice_date: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    pub order: Order,
    pub items: Vec<OrderItem>,
}
