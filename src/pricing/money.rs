use rust_decimal::{Decimal, RoundingStrategy, prelude::ToPrimitive};

use crate::error::{AppError, AppResult};

pub const MONEY_DP: u32 = 2;
pub const RATE_DP: u32 = 6;

/// Rounds a monetary amount to cents, half away from zero.
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(MONEY_DP, RoundingStrategy::MidpointAwayFromZero)
}

pub fn round_rate(rate: Decimal) -> Decimal {
    rate.round_dp_with_strategy(RATE_DP, RoundingStrategy::MidpointAwayFromZero)
}

pub fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

/// Normalizes a currency code and checks it is three ASCII letters.
pub fn validate_code(code: &str) -> AppResult<String> {
    let code = normalize_code(code);
    if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(AppError::validation(
            "currency",
            format!("'{code}' is not a valid 3-letter currency code."),
        ));
    }
    Ok(code)
}

/// Amount in minor units (cents) as payment processors expect it.
pub fn to_minor_units(amount: Decimal) -> AppResult<i64> {
    (round_money(amount) * Decimal::ONE_HUNDRED)
        .to_i64()
        .ok_or_else(|| AppError::consistency(format!("amount {amount} overflows minor units")))
}

/// `"€ 1,234.50"`: symbol, a space, then the amount with thousands grouping.
pub fn format_amount(amount: Decimal, symbol: &str) -> String {
    let fixed = format!("{:.2}", round_money(amount));
    let (sign, digits) = match fixed.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", fixed.as_str()),
    };
    let (whole, fraction) = digits.split_once('.').unwrap_or((digits, "00"));

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, ch) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    format!("{symbol} {sign}{grouped}.{fraction}")
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    fn d(raw: &str) -> Decimal {
        Decimal::from_str(raw).unwrap()
    }

    #[test]
    fn money_rounds_half_up() {
        assert_eq!(round_money(d("2.345")), d("2.35"));
        assert_eq!(round_money(d("2.344")), d("2.34"));
        assert_eq!(round_money(d("-2.345")), d("-2.35"));
    }

    #[test]
    fn rates_keep_six_places() {
        assert_eq!(round_rate(d("1.1111111")), d("1.111111"));
        assert_eq!(round_rate(d("0.88888888")), d("0.888889"));
    }

    #[test]
    fn currency_codes_are_normalized_and_checked() {
        assert_eq!(validate_code(" eur ").unwrap(), "EUR");
        assert_eq!(normalize_code("  save10\t"), "SAVE10");
        assert!(validate_code("EURO").is_err());
        assert!(validate_code("E1R").is_err());
    }

    #[test]
    fn minor_units() {
        assert_eq!(to_minor_units(d("12.345")).unwrap(), 1235);
        assert_eq!(to_minor_units(d("0")).unwrap(), 0);
    }

    #[test]
    fn formats_with_grouping() {
        assert_eq!(format_amount(d("1234.5"), "€"), "€ 1,234.50");
        assert_eq!(format_amount(d("999"), "$"), "$ 999.00");
        assert_eq!(format_amount(d("1234567.891"), "£"), "£ 1,234,567.89");
        assert_eq!(format_amount(d("-1000"), "$"), "$ -1,000.00");
    }
}
