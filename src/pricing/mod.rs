//! Currency math: rounding rules, exchange-rate resolution and price conversion.
//!
//! Nothing here reads a process-wide "current currency". The base currency is
//! handed to [`ExchangeRateResolver::new`] by the caller for every request.

pub mod converter;
pub mod money;
pub mod resolver;

pub use converter::{Conversion, PriceConverter, PriceDisplay};
pub use money::{
    format_amount, normalize_code, round_money, round_rate, to_minor_units, validate_code,
};
pub use resolver::{
    DbRateStore, ExchangeRateResolver, RateSource, RateStore, RebaseReport, ResolvedRate,
};
