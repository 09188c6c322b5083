//! Checkout-session client for the external payment processor.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    config::AppConfig,
    error::{AppError, AppResult},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionLineItem {
    pub name: String,
    pub currency: String,
    /// Unit amount in minor units.
    pub unit_amount: i64,
    pub quantity: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionRequest {
    pub currency: String,
    pub line_items: Vec<SessionLineItem>,
    pub success_url: String,
    pub cancel_url: String,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CheckoutSession {
    pub id: String,
    pub url: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_session(&self, request: &SessionRequest) -> AppResult<CheckoutSession>;
}

/// Posts session requests as JSON to `{base_url}/checkout/sessions`.
#[derive(Debug, Clone)]
pub struct HttpPaymentGateway {
    base_url: String,
    secret: Option<String>,
    http: Client,
}

impl HttpPaymentGateway {
    pub fn new(base_url: impl Into<String>, secret: Option<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            secret,
            http: Client::new(),
        }
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn create_session(&self, request: &SessionRequest) -> AppResult<CheckoutSession> {
        let url = format!("{}/checkout/sessions", self.base_url);
        let mut builder = self.http.post(&url).json(request);
        if let Some(secret) = &self.secret {
            builder = builder.bearer_auth(secret);
        }

        let response = builder
            .send()
            .await
            .map_err(|err| AppError::PaymentGateway(format!("request failed: {err}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::PaymentGateway(format!(
                "session request failed with status {status}: {text}"
            )));
        }

        response
            .json::<CheckoutSession>()
            .await
            .map_err(|err| AppError::PaymentGateway(format!("unexpected session payload: {err}")))
    }
}

/// Used when no gateway URL is configured; every session request fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredGateway;

#[async_trait]
impl PaymentGateway for UnconfiguredGateway {
    async fn create_session(&self, _request: &SessionRequest) -> AppResult<CheckoutSession> {
        Err(AppError::PaymentGateway(
            "payment gateway is not configured".into(),
        ))
    }
}

pub fn gateway_from_config(config: &AppConfig) -> Arc<dyn PaymentGateway> {
    match &config.payment_gateway_url {
        Some(url) => Arc::new(HttpPaymentGateway::new(
            url.clone(),
            config.payment_gateway_secret.clone(),
        )),
        None => {
            tracing::warn!("PAYMENT_GATEWAY_URL not set, payment sessions are disabled");
            Arc::new(UnconfiguredGateway)
        }
    }
}
