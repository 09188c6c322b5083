pub mod audit_logs;
pub mod cart_items;
pub mod carts;
pub mod coupon_usages;
pub mod coupons;
pub mod currencies;
pub mod currency_rates;
pub mod order_items;
pub mod orders;
pub mod products;
pub mod users;

pub use audit_logs::Entity as AuditLogs;
pub use cart_items::Entity as CartItems;
pub use carts::Entity as Carts;
pub use coupon_usages::Entity as CouponUsages;
pub use coupons::Entity as Coupons;
pub use currencies::Entity as Currencies;
pub use currency_rates::Entity as CurrencyRates;
pub use order_items::Entity as OrderItems;
pub use orders::Entity as Orders;
pub use products::Entity as Products;
pub use users::Entity as Users;
