use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{ActiveValue::Set, ConnectionTrait, EntityTrait, sea_query::OnConflict};
use serde::Serialize;
use utoipa::ToSchema;

use crate::{
    entity::currency_rates::{ActiveModel as RateActive, Column as RateCol, Entity as CurrencyRates},
    error::{AppError, AppResult},
    pricing::money::round_rate,
};

/// How a rate was obtained. `Fallback` means no rate data existed and 1:1 was used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RateSource {
    Identity,
    Direct,
    Inverse,
    Triangulated,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct ResolvedRate {
    pub rate: Decimal,
    pub source: RateSource,
}

impl ResolvedRate {
    fn new(rate: Decimal, source: RateSource) -> Self {
        Self { rate, source }
    }
}

/// Persisted pairwise rates.
pub trait RateStore {
    async fn find_rate(&self, from: &str, to: &str) -> AppResult<Option<Decimal>>;
    async fn store_rate(&self, from: &str, to: &str, rate: Decimal) -> AppResult<()>;
}

impl<S: RateStore> RateStore for &S {
    async fn find_rate(&self, from: &str, to: &str) -> AppResult<Option<Decimal>> {
        (**self).find_rate(from, to).await
    }

    async fn store_rate(&self, from: &str, to: &str, rate: Decimal) -> AppResult<()> {
        (**self).store_rate(from, to, rate).await
    }
}

/// Rate store over the `currency_rates` table. Works on a plain connection or
/// inside a transaction.
pub struct DbRateStore<'a, C> {
    conn: &'a C,
}

impl<'a, C: ConnectionTrait> DbRateStore<'a, C> {
    pub fn new(conn: &'a C) -> Self {
        Self { conn }
    }
}

impl<C: ConnectionTrait> RateStore for DbRateStore<'_, C> {
    async fn find_rate(&self, from: &str, to: &str) -> AppResult<Option<Decimal>> {
        let row = CurrencyRates::find_by_id((from.to_owned(), to.to_owned()))
            .one(self.conn)
            .await?;
        Ok(row.map(|r| r.rate))
    }

    async fn store_rate(&self, from: &str, to: &str, rate: Decimal) -> AppResult<()> {
        let row = RateActive {
            from_currency: Set(from.to_owned()),
            to_currency: Set(to.to_owned()),
            rate: Set(rate),
            last_updated_at: Set(Utc::now().into()),
        };
        CurrencyRates::insert(row)
            .on_conflict(
                OnConflict::columns([RateCol::FromCurrency, RateCol::ToCurrency])
                    .update_columns([RateCol::Rate, RateCol::LastUpdatedAt])
                    .to_owned(),
            )
            .exec_without_returning(self.conn)
            .await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RebaseReport {
    pub old_base: String,
    pub new_base: String,
    pub updated_rates: BTreeMap<String, Decimal>,
    /// Targets with no rate from the old base; their rows were left untouched.
    pub skipped: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

/// Resolves `from -> to` rates against a store, relative to an explicit base
/// currency. Every derived rate is written back so the next lookup is direct.
pub struct ExchangeRateResolver<S> {
    store: S,
    base: String,
}

impl<S: RateStore> ExchangeRateResolver<S> {
    pub fn new(store: S, base: impl Into<String>) -> Self {
        Self {
            store,
            base: base.into(),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub async fn rate(&self, from: &str, to: &str) -> AppResult<Decimal> {
        Ok(self.resolve(from, to).await?.rate)
    }

    pub async fn resolve(&self, from: &str, to: &str) -> AppResult<ResolvedRate> {
        if from == to {
            return Ok(ResolvedRate::new(Decimal::ONE, RateSource::Identity));
        }

        if let Some(resolved) = self.direct_or_inverse(from, to).await? {
            return Ok(resolved);
        }

        if from != self.base && to != self.base {
            let to_base = self.direct_or_inverse(from, &self.base).await?;
            let from_base = self.direct_or_inverse(&self.base, to).await?;
            if let (Some(a), Some(b)) = (to_base, from_base) {
                let rate = round_rate(a.rate * b.rate);
                self.store.store_rate(from, to, rate).await?;
                tracing::debug!(%from, %to, base = %self.base, %rate, "cached triangulated rate");
                return Ok(ResolvedRate::new(rate, RateSource::Triangulated));
            }
        }

        tracing::warn!(%from, %to, base = %self.base, "no exchange rate data, using 1:1");
        Ok(ResolvedRate::new(Decimal::ONE, RateSource::Fallback))
    }

    /// Stored rate, or the reciprocal of the stored reverse rate (cached back).
    async fn direct_or_inverse(&self, from: &str, to: &str) -> AppResult<Option<ResolvedRate>> {
        let positive = |rate: &Decimal| *rate > Decimal::ZERO;

        if let Some(rate) = self.store.find_rate(from, to).await?.filter(positive) {
            return Ok(Some(ResolvedRate::new(rate, RateSource::Direct)));
        }

        let Some(reverse) = self.store.find_rate(to, from).await?.filter(positive) else {
            return Ok(None);
        };

        let rate = round_rate(Decimal::ONE / reverse);
        if rate.is_zero() {
            return Ok(None);
        }
        self.store.store_rate(from, to, rate).await?;
        tracing::debug!(%from, %to, %rate, "cached inverse rate");
        Ok(Some(ResolvedRate::new(rate, RateSource::Inverse)))
    }

    /// Reprojects rates from this resolver's base onto `new_base` using
    /// `rate(new -> X) = rate(new -> old) * rate(old -> X)`.
    pub async fn rebase(&self, new_base: &str, targets: &[String]) -> AppResult<RebaseReport> {
        let old_base = self.base.clone();
        let mut report = RebaseReport {
            old_base: old_base.clone(),
            new_base: new_base.to_owned(),
            updated_rates: BTreeMap::new(),
            skipped: Vec::new(),
            updated_at: Utc::now(),
        };
        if new_base == old_base {
            return Ok(report);
        }

        let new_to_old = self.resolve(new_base, &old_base).await?;
        if new_to_old.source == RateSource::Fallback {
            return Err(AppError::validation(
                "code",
                format!("No exchange rate between {new_base} and {old_base}; rates cannot be rebased."),
            ));
        }

        for target in targets.iter().filter(|t| t.as_str() != new_base) {
            let old_to_target = if *target == old_base {
                Decimal::ONE
            } else {
                match self.direct_or_inverse(&old_base, target).await? {
                    Some(resolved) => resolved.rate,
                    None => {
                        report.skipped.push(target.clone());
                        continue;
                    }
                }
            };

            let rate = round_rate(new_to_old.rate * old_to_target);
            self.store.store_rate(new_base, target, rate).await?;
            report.updated_rates.insert(target.clone(), rate);
        }

        tracing::info!(
            old_base = %report.old_base,
            new_base = %report.new_base,
            updated = report.updated_rates.len(),
            skipped = report.skipped.len(),
            "rates rebased"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, str::FromStr, sync::Mutex};

    use super::*;

    fn d(raw: &str) -> Decimal {
        Decimal::from_str(raw).unwrap()
    }

    #[derive(Default)]
    struct MemoryStore {
        rates: Mutex<HashMap<(String, String), Decimal>>,
    }

    impl MemoryStore {
        fn with(rates: &[(&str, &str, &str)]) -> Self {
            let store = Self::default();
            for (from, to, rate) in rates {
                store
                    .rates
                    .lock()
                    .unwrap()
                    .insert((from.to_string(), to.to_string()), d(rate));
            }
            store
        }

        fn get(&self, from: &str, to: &str) -> Option<Decimal> {
            self.rates
                .lock()
                .unwrap()
                .get(&(from.to_string(), to.to_string()))
                .copied()
        }
    }

    impl RateStore for MemoryStore {
        async fn find_rate(&self, from: &str, to: &str) -> AppResult<Option<Decimal>> {
            Ok(self.get(from, to))
        }

        async fn store_rate(&self, from: &str, to: &str, rate: Decimal) -> AppResult<()> {
            self.rates
                .lock()
                .unwrap()
                .insert((from.to_string(), to.to_string()), rate);
            Ok(())
        }
    }

    #[tokio::test]
    async fn same_currency_is_identity() {
        let store = MemoryStore::default();
        let resolver = ExchangeRateResolver::new(&store, "USD");
        let resolved = resolver.resolve("EUR", "EUR").await.unwrap();
        assert_eq!(resolved, ResolvedRate::new(Decimal::ONE, RateSource::Identity));
    }

    #[tokio::test]
    async fn inverse_rate_is_reciprocal_and_cached() {
        let store = MemoryStore::with(&[("USD", "EUR", "0.8")]);
        let resolver = ExchangeRateResolver::new(&store, "USD");

        let first = resolver.resolve("EUR", "USD").await.unwrap();
        assert_eq!(first.source, RateSource::Inverse);
        assert_eq!(first.rate, d("1.25"));
        assert_eq!(store.get("EUR", "USD"), Some(d("1.25")));

        let second = resolver.resolve("EUR", "USD").await.unwrap();
        assert_eq!(second.source, RateSource::Direct);
        assert_eq!(second.rate, first.rate);
    }

    #[tokio::test]
    async fn triangulates_through_base() {
        let store = MemoryStore::with(&[("EUR", "USD", "1.1"), ("USD", "JPY", "150")]);
        let resolver = ExchangeRateResolver::new(&store, "USD");

        let resolved = resolver.resolve("EUR", "JPY").await.unwrap();
        assert_eq!(resolved.source, RateSource::Triangulated);
        assert_eq!(resolved.rate, d("165"));
        assert_eq!(store.get("EUR", "JPY"), Some(d("165")));
    }

    #[tokio::test]
    async fn triangulation_legs_may_be_inverse() {
        let store = MemoryStore::with(&[("USD", "EUR", "0.8"), ("USD", "GBP", "0.5")]);
        let resolver = ExchangeRateResolver::new(&store, "USD");

        let resolved = resolver.resolve("EUR", "GBP").await.unwrap();
        assert_eq!(resolved.source, RateSource::Triangulated);
        assert_eq!(resolved.rate, d("0.625"));
    }

    #[tokio::test]
    async fn missing_data_falls_back_to_one() {
        let store = MemoryStore::with(&[("USD", "EUR", "0.8")]);
        let resolver = ExchangeRateResolver::new(&store, "USD");

        let resolved = resolver.resolve("GBP", "CHF").await.unwrap();
        assert_eq!(resolved, ResolvedRate::new(Decimal::ONE, RateSource::Fallback));
        assert_eq!(store.get("GBP", "CHF"), None);
    }

    #[tokio::test]
    async fn rebase_reprojects_onto_new_base() {
        let store = MemoryStore::with(&[("USD", "EUR", "0.9"), ("USD", "GBP", "0.8")]);
        let resolver = ExchangeRateResolver::new(&store, "USD");
        let targets = vec!["USD".to_string(), "EUR".to_string(), "GBP".to_string()];

        let report = resolver.rebase("EUR", &targets).await.unwrap();

        assert_eq!(report.old_base, "USD");
        assert_eq!(report.new_base, "EUR");
        assert_eq!(report.updated_rates.get("GBP"), Some(&d("0.888889")));
        assert_eq!(report.updated_rates.get("USD"), Some(&d("1.111111")));
        assert!(!report.updated_rates.contains_key("EUR"));
        assert_eq!(store.get("EUR", "GBP"), Some(d("0.888889")));
    }

    #[tokio::test]
    async fn rebase_without_a_bridge_rate_fails() {
        let store = MemoryStore::with(&[("USD", "GBP", "0.8")]);
        let resolver = ExchangeRateResolver::new(&store, "USD");
        let targets = vec!["GBP".to_string()];

        assert!(resolver.rebase("CHF", &targets).await.is_err());
        assert_eq!(store.get("CHF", "GBP"), None);
    }
}
