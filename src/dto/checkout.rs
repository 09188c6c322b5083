use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::DisplayRate;

#[derive(Debug, Deserialize, ToSchema)]
pub struct CheckoutRequest {
    /// Shipping charge in the base currency.
    #[serde(default)]
    pub shipping_amount: Decimal,
    #[schema(value_type = Object)]
    pub billing_address: serde_json::Value,
    /// Defaults to the billing address.
    #[schema(value_type = Option<Object>)]
    pub shipping_address: Option<serde_json::Value>,
    pub payment_method: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CheckoutSummary {
    pub item_count: i64,
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub discount_amount: Decimal,
    pub total: Decimal,
    pub currency: String,
    pub display_total: Decimal,
    pub rate: DisplayRate,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct PaymentSessionRequest {
    pub success_url: Option<String>,
    pub cancel_url: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PaymentSessionResponse {
    pub order_id: Uuid,
    pub session_id: String,
    pub url: String,
}

/// Gateway callback, e.g. `{"type": "checkout.session.completed", "data": {"object": {...}}}`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct WebhookEvent {
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: WebhookEventData,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct WebhookEventData {
    pub object: WebhookSession,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct WebhookSession {
    pub id: String,
    #[serde(alias = "payment_intent")]
    pub payment_reference: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum WebhookOutcome {
    Paid,
    AlreadyPaid,
    Expired,
    /// Nothing to do for this event in the order's current state.
    Ignored,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct WebhookAck {
    pub received: bool,
    pub outcome: WebhookOutcome,
}
