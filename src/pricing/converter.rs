use rust_decimal::Decimal;
use serde::Serialize;
use utoipa::ToSchema;

use crate::{
    error::AppResult,
    pricing::{
        money::{format_amount, round_money},
        resolver::{ExchangeRateResolver, RateSource, RateStore, ResolvedRate},
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conversion {
    pub amount: Decimal,
    pub rate: ResolvedRate,
}

/// An amount tagged with display metadata. Built at the read boundary only;
/// stored values are never formatted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct PriceDisplay {
    pub amount: Decimal,
    pub currency: String,
    pub symbol: String,
    pub formatted: String,
}

impl PriceDisplay {
    /// Falls back to the currency code when no symbol is known.
    pub fn new(amount: Decimal, currency: &str, symbol: Option<&str>) -> Self {
        let symbol = symbol.unwrap_or(currency).to_owned();
        Self {
            amount,
            currency: currency.to_owned(),
            formatted: format_amount(amount, &symbol),
            symbol,
        }
    }
}

pub struct PriceConverter<S> {
    resolver: ExchangeRateResolver<S>,
}

impl<S: RateStore> PriceConverter<S> {
    pub fn new(resolver: ExchangeRateResolver<S>) -> Self {
        Self { resolver }
    }

    pub fn resolver(&self) -> &ExchangeRateResolver<S> {
        &self.resolver
    }

    pub async fn convert(&self, amount: Decimal, from: &str, to: &str) -> AppResult<Decimal> {
        Ok(self.convert_with_rate(amount, from, to).await?.amount)
    }

    /// Same-currency conversions return `amount` untouched; everything else is
    /// multiplied by the resolved rate and rounded to cents.
    pub async fn convert_with_rate(
        &self,
        amount: Decimal,
        from: &str,
        to: &str,
    ) -> AppResult<Conversion> {
        if from == to {
            return Ok(Conversion {
                amount,
                rate: ResolvedRate {
                    rate: Decimal::ONE,
                    source: RateSource::Identity,
                },
            });
        }
        let rate = self.resolver.resolve(from, to).await?;
        Ok(Conversion {
            amount: apply_rate(amount, rate.rate),
            rate,
        })
    }
}

pub fn apply_rate(amount: Decimal, rate: Decimal) -> Decimal {
    round_money(amount * rate)
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    fn d(raw: &str) -> Decimal {
        Decimal::from_str(raw).unwrap()
    }

    struct FixedStore(Decimal);

    impl RateStore for FixedStore {
        async fn find_rate(&self, from: &str, to: &str) -> AppResult<Option<Decimal>> {
            Ok((from == "USD" && to == "EUR").then_some(self.0))
        }

        async fn store_rate(&self, _: &str, _: &str, _: Decimal) -> AppResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn same_currency_returns_amount_unchanged() {
        let converter = PriceConverter::new(ExchangeRateResolver::new(FixedStore(d("0.9")), "USD"));
        let converted = converter.convert(d("10.005"), "EUR", "EUR").await.unwrap();
        assert_eq!(converted, d("10.005"));
    }

    #[tokio::test]
    async fn converts_and_rounds_to_cents() {
        let converter = PriceConverter::new(ExchangeRateResolver::new(FixedStore(d("0.913457")), "USD"));
        let conversion = converter.convert_with_rate(d("19.99"), "USD", "EUR").await.unwrap();
        assert_eq!(conversion.amount, d("18.26"));
        assert_eq!(conversion.rate.source, RateSource::Direct);
    }

    #[test]
    fn display_falls_back_to_code() {
        let display = PriceDisplay::new(d("1500"), "CHF", None);
        assert_eq!(display.formatted, "CHF 1,500.00");
        assert_eq!(PriceDisplay::new(d("2.5"), "EUR", Some("€")).formatted, "€ 2.50");
    }
}
