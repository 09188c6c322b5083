pub mod admin_service;
pub mod cart_service;
pub mod checkout_service;
pub mod coupon_service;
pub mod currency_service;
pub mod notifications;
pub mod order_service;
pub mod payment_gateway;
pub mod product_service;
pub mod stock;

use rand::{Rng, distr::Alphanumeric};

/// Random upper-case alphanumeric code, used for coupon codes and order numbers.
pub fn random_code(len: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect::<String>()
        .to_uppercase()
}
