use utoipa::{
    Modify, OpenApi,
    openapi::{
        self,
        OpenApi as OpenApiSpec,
        security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    },
};
use utoipa_scalar::{Scalar, Servable};

use crate::{
    dto::{
        cart::{
            AddCartItemRequest, ApplyCouponRequest, ReorderResult, ReorderedLine, SkippedLine,
            UpdateCartItemRequest,
        },
        checkout::{
            CheckoutRequest, CheckoutSummary, PaymentSessionRequest, PaymentSessionResponse,
            WebhookAck, WebhookEvent, WebhookEventData, WebhookOutcome, WebhookSession,
        },
        coupons::{CouponList, CouponPreview, CreateCouponRequest, UpdateCouponRequest},
        currency::{
            ConvertResult, CreateCurrencyRequest, CurrencyList, RateList,
            RecalculateRatesRequest, UpdateCurrencyRequest, UpdateRateRequest, UpsertRateRequest,
        },
        orders::{
            CancelOrderRequest, Invoice, OrderList, OrderStatistics, OrderWithItems,
            UpdateOrderStatusRequest,
        },
        products::{
            CreateProductRequest, InventoryAdjustRequest, ProductList, UpdateProductRequest,
        },
    },
    entity::{
        carts::AppliedCoupon,
        coupons::CouponType,
        orders::{OrderStatus, OriginalAmounts, PaymentStatus},
    },
    models::{
        Cart, CartItem, CartTotalsDisplay, Coupon, Currency, CurrencyRate, DisplayRate, Order,
        OrderItem, Product,
    },
    pricing::{PriceDisplay, RateSource, RebaseReport},
    response::{ApiResponse, Meta},
    routes::{
        admin, cart, checkout, coupons, currencies, health, orders, params,
        products as product_routes,
    },
};

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health_check,
        product_routes::list_products,
        product_routes::get_product,
        currencies::list_currencies,
        currencies::get_currency,
        currencies::convert,
        cart::get_cart,
        cart::add_item,
        cart::update_item,
        cart::remove_item,
        cart::clear_cart,
        cart::apply_coupon,
        cart::validate_coupon,
        cart::remove_coupon,
        checkout::validate,
        checkout::create_order,
        checkout::create_payment_session,
        checkout::webhook,
        orders::list_order,
        orders::statistics,
        orders::get_order,
        orders::cancel_order,
        orders::reorder,
        orders::invoice,
        admin::list_all_orders,
        admin::get_order_admin,
        admin::update_order_status,
        admin::create_product,
        admin::update_product,
        admin::list_low_stock,
        admin::adjust_inventory,
        currencies::admin_list_currencies,
        currencies::create_currency,
        currencies::update_currency,
        currencies::delete_currency,
        currencies::activate_currency,
        currencies::deactivate_currency,
        currencies::set_default_currency,
        currencies::recalculate_rates,
        currencies::list_rates,
        currencies::upsert_rate,
        currencies::update_rate,
        currencies::delete_rate,
        coupons::list_coupons,
        coupons::get_coupon,
        coupons::create_coupon,
        coupons::update_coupon,
        coupons::delete_coupon
    ),
    components(
        schemas(
            Product,
            Currency,
            CurrencyRate,
            DisplayRate,
            PriceDisplay,
            RateSource,
            RebaseReport,
            Cart,
            CartItem,
            CartTotalsDisplay,
            AppliedCoupon,
            Coupon,
            CouponType,
            Order,
            OrderItem,
            OrderStatus,
            PaymentStatus,
            OriginalAmounts,
            AddCartItemRequest,
            UpdateCartItemRequest,
            ApplyCouponRequest,
            ReorderResult,
            ReorderedLine,
            SkippedLine,
            CheckoutRequest,
            CheckoutSummary,
            PaymentSessionRequest,
            PaymentSessionResponse,
            WebhookEvent,
            WebhookEventData,
            WebhookSession,
            WebhookOutcome,
            WebhookAck,
            CouponList,
            CouponPreview,
            CreateCouponRequest,
            UpdateCouponRequest,
            CreateCurrencyRequest,
            UpdateCurrencyRequest,
            CurrencyList,
            UpsertRateRequest,
            UpdateRateRequest,
            RateList,
            RecalculateRatesRequest,
            ConvertResult,
            CancelOrderRequest,
            UpdateOrderStatusRequest,
            OrderList,
            OrderWithItems,
            OrderStatistics,
            Invoice,
            CreateProductRequest,
            UpdateProductRequest,
            InventoryAdjustRequest,
            ProductList,
            params::Pagination,
            params::ProductQuery,
            params::OrderListQuery,
            Meta,
            ApiResponse<Product>,
            ApiResponse<ProductList>,
            ApiResponse<Cart>,
            ApiResponse<OrderWithItems>,
            ApiResponse<OrderList>,
            ApiResponse<Currency>,
            ApiResponse<Coupon>
        )
    ),
    security(
        ("bearer_auth" = [])
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check endpoint"),
        (name = "Products", description = "Product endpoints"),
        (name = "Currencies", description = "Currency and conversion endpoints"),
        (name = "Cart", description = "Cart endpoints"),
        (name = "Checkout", description = "Checkout and payment endpoints"),
        (name = "Orders", description = "Order endpoints"),
        (name = "Admin", description = "Admin endpoints"),
    )
)]
pub struct ApiDoc;

pub fn scalar_docs() -> Scalar<OpenApiSpec> {
    Scalar::with_url("/docs", ApiDoc::openapi())
}
