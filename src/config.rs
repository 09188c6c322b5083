use std::{env, str::FromStr};

use rust_decimal::Decimal;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    /// Cart tax rate applied to the subtotal, e.g. `0.10` for 10%.
    pub tax_rate: Decimal,
    /// Base currency used while no currency row is flagged as default.
    pub fallback_currency: String,
    pub frontend_url: String,
    pub payment_gateway_url: Option<String>,
    pub payment_gateway_secret: Option<String>,
}

impl AppConfig {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            host: "127.0.0.1".to_string(),
            port: 3000,
            tax_rate: Decimal::new(10, 2),
            fallback_currency: "USD".to_string(),
            frontend_url: "http://localhost:5173".to_string(),
            payment_gateway_url: None,
            payment_gateway_secret: None,
        }
    }

    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL")?;
        let mut config = Self::new(database_url);

        if let Ok(host) = env::var("APP_HOST") {
            config.host = host;
        }
        if let Some(port) = env::var("APP_PORT").ok().and_then(|p| p.parse::<u16>().ok()) {
            config.port = port;
        }
        if let Ok(raw) = env::var("TAX_RATE") {
            let rate = Decimal::from_str(raw.trim())
                .map_err(|err| anyhow::anyhow!("invalid TAX_RATE {raw:?}: {err}"))?;
            if rate.is_sign_negative() {
                anyhow::bail!("TAX_RATE must not be negative");
            }
            config.tax_rate = rate;
        }
        if let Ok(code) = env::var("FALLBACK_CURRENCY") {
            config.fallback_currency = code.trim().to_ascii_uppercase();
        }
        if let Ok(url) = env::var("FRONTEND_URL") {
            config.frontend_url = url.trim_end_matches('/').to_string();
        }
        config.payment_gateway_url = env::var("PAYMENT_GATEWAY_URL").ok();
        config.payment_gateway_secret = env::var("PAYMENT_GATEWAY_SECRET").ok();

        Ok(config)
    }
}
