use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    models::{Currency, CurrencyRate},
    pricing::{PriceDisplay, RateSource},
};

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateCurrencyRequest {
    pub code: String,
    pub name: String,
    pub symbol: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct UpdateCurrencyRequest {
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct CurrencyListQuery {
    pub show_all: Option<bool>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CurrencyList {
    pub items: Vec<Currency>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpsertRateRequest {
    pub from_currency: String,
    pub to_currency: String,
    pub rate: Decimal,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateRateRequest {
    pub rate: Decimal,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RateList {
    pub items: Vec<CurrencyRate>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RecalculateRatesRequest {
    pub new_base: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ConvertQuery {
    pub amount: Decimal,
    pub from: Option<String>,
    pub to: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ConvertResult {
    pub amount: Decimal,
    pub from: String,
    pub to: String,
    pub converted: Decimal,
    pub rate: Decimal,
    pub source: RateSource,
    pub display: PriceDisplay,
}
