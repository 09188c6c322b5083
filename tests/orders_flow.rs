use std::str::FromStr;

use axum_multicurrency_shop::{
    config::AppConfig,
    db::{create_orm_conn, run_migrations},
    dto::{
        cart::{AddCartItemRequest, UpdateCartItemRequest},
        checkout::{CheckoutRequest, WebhookEvent, WebhookEventData, WebhookOutcome, WebhookSession},
        orders::CancelOrderRequest,
    },
    entity::{
        CurrencyRates, Products,
        coupons::{ActiveModel as CouponActive, CouponType, Model as CouponModel},
        currencies::ActiveModel as CurrencyActive,
        currency_rates::ActiveModel as RateActive,
        orders::{ActiveModel as OrderActive, OrderStatus, PaymentStatus},
        products::{ActiveModel as ProductActive, Model as ProductModel},
        users::ActiveModel as UserActive,
    },
    error::AppError,
    middleware::auth::AuthUser,
    pricing::{round_money, round_rate},
    services::{cart_service, checkout_service, coupon_service, currency_service, order_service},
    state::AppState,
};
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ConnectionTrait, EntityTrait, Set};
use tempfile::TempDir;
use uuid::Uuid;

fn d(raw: &str) -> Decimal {
    Decimal::from_str(raw).expect("decimal literal")
}

// The TempDir must outlive the state, or the database file goes away.
async fn setup_state() -> anyhow::Result<(AppState, TempDir)> {
    let dir = tempfile::tempdir()?;
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("shop.db").display());
    let orm = create_orm_conn(&url).await?;
    run_migrations(&orm).await?;
    let state = AppState::new(orm, AppConfig::new(url));

    for (code, name, symbol, is_default) in [
        ("USD", "US Dollar", "$", true),
        ("EUR", "Euro", "€", false),
        ("GBP", "British Pound", "£", false),
    ] {
        CurrencyActive {
            code: Set(code.into()),
            name: Set(name.into()),
            symbol: Set(symbol.into()),
            is_active: Set(true),
            is_default: Set(is_default),
            created_at: Set(Utc::now().into()),
            updated_at: Set(Utc::now().into()),
        }
        .insert(&state.orm)
        .await?;
    }
    for (to, rate) in [("EUR", "0.9"), ("GBP", "0.8")] {
        RateActive {
            from_currency: Set("USD".into()),
            to_currency: Set(to.into()),
            rate: Set(d(rate)),
            last_updated_at: Set(Utc::now().into()),
        }
        .insert(&state.orm)
        .await?;
    }

    Ok((state, dir))
}

async fn create_user(state: &AppState, role: &str) -> anyhow::Result<AuthUser> {
    let id = Uuid::new_v4();
    UserActive {
        id: Set(id),
        email: Set(format!("{id}@example.com")),
        role: Set(role.into()),
        currency: Set(None),
        created_at: Set(Utc::now().into()),
    }
    .insert(&state.orm)
    .await?;
    Ok(AuthUser {
        user_id: id,
        role: role.into(),
        currency: None,
    })
}

async fn create_product(state: &AppState, price: &str, stock: i32) -> anyhow::Result<ProductModel> {
    let id = Uuid::new_v4();
    let product = ProductActive {
        id: Set(id),
        name: Set("Test Widget".into()),
        sku: Set(format!("SKU-{}", id.simple())),
        description: Set(Some("A product for testing".into())),
        price: Set(d(price)),
        sale_price: Set(None),
        stock_quantity: Set(stock),
        manage_stock: Set(true),
        in_stock: Set(stock > 0),
        created_at: Set(Utc::now().into()),
        updated_at: Set(Utc::now().into()),
    }
    .insert(&state.orm)
    .await?;
    Ok(product)
}

async fn create_coupon(
    state: &AppState,
    code: &str,
    value: &str,
    minimum_amount: Option<&str>,
    maximum_discount: Option<&str>,
) -> anyhow::Result<CouponModel> {
    let coupon = CouponActive {
        id: Set(Uuid::new_v4()),
        code: Set(code.into()),
        name: Set(format!("{code} discount")),
        description: Set(None),
        kind: Set(CouponType::Percentage),
        value: Set(d(value)),
        minimum_amount: Set(minimum_amount.map(d)),
        maximum_discount: Set(maximum_discount.map(d)),
        usage_limit: Set(None),
        used_count: Set(0),
        usage_limit_per_user: Set(None),
        is_active: Set(true),
        starts_at: Set(None),
        expires_at: Set(None),
        created_at: Set(Utc::now().into()),
        updated_at: Set(Utc::now().into()),
    }
    .insert(&state.orm)
    .await?;
    Ok(coupon)
}

async fn stock_of(state: &AppState, product_id: Uuid) -> anyhow::Result<ProductModel> {
    Products::find_by_id(product_id)
        .one(&state.orm)
        .await?
        .ok_or_else(|| anyhow::anyhow!("product {product_id} missing"))
}

async fn add(state: &AppState, user: &AuthUser, product_id: Uuid, quantity: i32) -> Result<(), AppError> {
    cart_service::add_item(
        state,
        user,
        AddCartItemRequest {
            product_id,
            quantity,
            options: None,
        },
        None,
    )
    .await?;
    Ok(())
}

fn checkout_request() -> CheckoutRequest {
    CheckoutRequest {
        shipping_amount: Decimal::ZERO,
        billing_address: serde_json::json!({ "name": "Ferris", "city": "Berlin" }),
        shipping_address: None,
        payment_method: Some("card".into()),
        notes: None,
    }
}

fn session_event(event_type: &str, session_id: &str) -> WebhookEvent {
    WebhookEvent {
        id: Some(format!("evt_{}", Uuid::new_v4().simple())),
        event_type: event_type.into(),
        data: WebhookEventData {
            object: WebhookSession {
                id: session_id.into(),
                payment_reference: Some("pi_test".into()),
            },
        },
    }
}

#[tokio::test]
async fn stock_is_conserved_from_cart_to_cancelled_order() -> anyhow::Result<()> {
    let (state, _dir) = setup_state().await?;
    let user = create_user(&state, "user").await?;
    let product = create_product(&state, "25.00", 10).await?;

    add(&state, &user, product.id, 3).await?;
    assert_eq!(stock_of(&state, product.id).await?.stock_quantity, 7);

    let cart = cart_service::get_cart(&state, &user, None)
        .await?
        .data
        .expect("cart");
    let line_id = cart.items[0].id;
    cart_service::update_item(
        &state,
        &user,
        line_id,
        UpdateCartItemRequest { quantity: 5 },
        None,
    )
    .await?;
    assert_eq!(stock_of(&state, product.id).await?.stock_quantity, 5);

    let order = checkout_service::create_order(&state, &user, checkout_request(), None)
        .await?
        .data
        .expect("order");
    assert_eq!(order.items.len(), 1);
    assert_eq!(order.items[0].quantity, 5);
    // Checkout converts the reservation; stock does not move again.
    assert_eq!(stock_of(&state, product.id).await?.stock_quantity, 5);

    let cart = cart_service::get_cart(&state, &user, None)
        .await?
        .data
        .expect("cart");
    assert!(cart.items.is_empty());
    assert_eq!(round_money(cart.total), Decimal::ZERO);

    let cancelled = order_service::cancel_order(
        &state,
        &user,
        order.order.id,
        CancelOrderRequest::default(),
    )
    .await?
    .data
    .expect("order");
    assert_eq!(cancelled.order.status, OrderStatus::Cancelled);
    assert_eq!(stock_of(&state, product.id).await?.stock_quantity, 10);

    Ok(())
}

#[tokio::test]
async fn adding_more_than_available_stock_is_rejected() -> anyhow::Result<()> {
    let (state, _dir) = setup_state().await?;
    let first = create_user(&state, "user").await?;
    let second = create_user(&state, "user").await?;
    let product = create_product(&state, "10.00", 5).await?;

    add(&state, &first, product.id, 5).await?;
    let after = stock_of(&state, product.id).await?;
    assert_eq!(after.stock_quantity, 0);
    assert!(!after.in_stock);

    let err = add(&state, &second, product.id, 1).await.unwrap_err();
    assert!(matches!(err, AppError::Validation { .. }));

    let err = add(&state, &first, product.id, 1).await.unwrap_err();
    assert!(matches!(err, AppError::Validation { .. }));
    assert_eq!(stock_of(&state, product.id).await?.stock_quantity, 0);

    Ok(())
}

#[tokio::test]
async fn percentage_coupon_respects_its_cap() -> anyhow::Result<()> {
    let (state, _dir) = setup_state().await?;
    let user = create_user(&state, "user").await?;
    let product = create_product(&state, "100.00", 3).await?;
    create_coupon(&state, "HALFOFF", "50", Some("10"), Some("20")).await?;

    add(&state, &user, product.id, 1).await?;
    let cart = coupon_service::apply_to_cart(&state, &user, " halfoff ", None)
        .await?
        .data
        .expect("cart");

    assert_eq!(cart.applied_coupons.len(), 1);
    assert_eq!(round_money(cart.subtotal), d("100.00"));
    assert_eq!(round_money(cart.discount_amount), d("20.00"));
    // 100 + 10% tax - 20 capped discount.
    assert_eq!(round_money(cart.total), d("90.00"));

    let err = coupon_service::apply_to_cart(&state, &user, "HALFOFF", None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation { .. }));

    Ok(())
}

#[tokio::test]
async fn failed_checkout_leaves_stock_and_cart_untouched() -> anyhow::Result<()> {
    let (state, _dir) = setup_state().await?;
    let user = create_user(&state, "user").await?;
    let product = create_product(&state, "40.00", 4).await?;
    create_coupon(&state, "BREAKME", "5", None, None).await?;

    add(&state, &user, product.id, 2).await?;
    coupon_service::apply_to_cart(&state, &user, "BREAKME", None).await?;

    // Usage recording is the last write before commit; make it fail.
    state
        .orm
        .execute_unprepared("DROP TABLE coupon_usages")
        .await?;

    let result = checkout_service::create_order(&state, &user, checkout_request(), None).await;
    assert!(result.is_err());

    assert_eq!(stock_of(&state, product.id).await?.stock_quantity, 2);
    let cart = cart_service::get_cart(&state, &user, None)
        .await?
        .data
        .expect("cart");
    assert_eq!(cart.items.len(), 1);
    assert_eq!(cart.items[0].quantity, 2);
    assert_eq!(cart.applied_coupons.len(), 1);

    Ok(())
}

#[tokio::test]
async fn replayed_payment_webhook_is_a_no_op() -> anyhow::Result<()> {
    let (state, _dir) = setup_state().await?;
    let user = create_user(&state, "user").await?;
    let product = create_product(&state, "12.50", 10).await?;

    add(&state, &user, product.id, 2).await?;
    let order = checkout_service::create_order(&state, &user, checkout_request(), None)
        .await?
        .data
        .expect("order");
    assert_eq!(order.order.status, OrderStatus::Pending);
    assert_eq!(order.order.payment_status, PaymentStatus::Pending);

    OrderActive {
        id: Set(order.order.id),
        payment_session_id: Set(Some("cs_test_replay".into())),
        ..Default::default()
    }
    .update(&state.orm)
    .await?;

    let event = session_event(checkout_service::SESSION_COMPLETED, "cs_test_replay");
    let first = checkout_service::handle_webhook(&state, None, event)
        .await?
        .data
        .expect("ack");
    assert_eq!(first.outcome, WebhookOutcome::Paid);

    let event = session_event(checkout_service::SESSION_COMPLETED, "cs_test_replay");
    let second = checkout_service::handle_webhook(&state, None, event)
        .await?
        .data
        .expect("ack");
    assert_eq!(second.outcome, WebhookOutcome::AlreadyPaid);

    let paid = order_service::get_order(&state, &user, order.order.id)
        .await?
        .data
        .expect("order");
    assert_eq!(paid.order.status, OrderStatus::Processing);
    assert_eq!(paid.order.payment_status, PaymentStatus::Paid);
    assert!(paid.order.paid_at.is_some());
    assert_eq!(stock_of(&state, product.id).await?.stock_quantity, 8);

    // Expiry after payment must not release stock.
    let event = session_event(checkout_service::SESSION_EXPIRED, "cs_test_replay");
    let expired = checkout_service::handle_webhook(&state, None, event)
        .await?
        .data
        .expect("ack");
    assert_eq!(expired.outcome, WebhookOutcome::Ignored);
    assert_eq!(stock_of(&state, product.id).await?.stock_quantity, 8);

    Ok(())
}

#[tokio::test]
async fn expired_payment_session_cancels_and_restocks() -> anyhow::Result<()> {
    let (state, _dir) = setup_state().await?;
    let user = create_user(&state, "user").await?;
    let product = create_product(&state, "9.99", 6).await?;

    add(&state, &user, product.id, 4).await?;
    let order = checkout_service::create_order(&state, &user, checkout_request(), None)
        .await?
        .data
        .expect("order");
    OrderActive {
        id: Set(order.order.id),
        payment_session_id: Set(Some("cs_test_expired".into())),
        ..Default::default()
    }
    .update(&state.orm)
    .await?;

    let event = session_event(checkout_service::SESSION_EXPIRED, "cs_test_expired");
    let ack = checkout_service::handle_webhook(&state, None, event)
        .await?
        .data
        .expect("ack");
    assert_eq!(ack.outcome, WebhookOutcome::Expired);

    let order = order_service::get_order(&state, &user, order.order.id)
        .await?
        .data
        .expect("order");
    assert_eq!(order.order.status, OrderStatus::Cancelled);
    assert_eq!(order.order.payment_status, PaymentStatus::Failed);
    assert_eq!(stock_of(&state, product.id).await?.stock_quantity, 6);

    Ok(())
}

#[tokio::test]
async fn changing_default_currency_rebases_rates() -> anyhow::Result<()> {
    let (state, _dir) = setup_state().await?;
    let admin = create_user(&state, "admin").await?;

    let report = currency_service::set_default_currency(&state, &admin, "eur")
        .await?
        .data
        .expect("report");
    assert_eq!(report.old_base, "USD");
    assert_eq!(report.new_base, "EUR");
    assert_eq!(
        report.updated_rates.get("GBP").copied().map(round_rate),
        Some(d("0.888889"))
    );

    let stored = CurrencyRates::find_by_id(("EUR".to_string(), "GBP".to_string()))
        .one(&state.orm)
        .await?
        .expect("EUR->GBP rate");
    assert_eq!(round_rate(stored.rate), d("0.888889"));

    let base = currency_service::base_currency(&state.orm, &state.config).await?;
    assert_eq!(base, "EUR");

    let customer = create_user(&state, "user").await?;
    let err = currency_service::set_default_currency(&state, &customer, "GBP")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden));

    Ok(())
}

#[tokio::test]
async fn removing_and_clearing_lines_restores_stock() -> anyhow::Result<()> {
    let (state, _dir) = setup_state().await?;
    let user = create_user(&state, "user").await?;
    let shirt = create_product(&state, "20.00", 10).await?;
    let socks = create_product(&state, "4.50", 5).await?;

    add(&state, &user, shirt.id, 3).await?;
    add(&state, &user, socks.id, 2).await?;
    assert_eq!(stock_of(&state, shirt.id).await?.stock_quantity, 7);
    assert_eq!(stock_of(&state, socks.id).await?.stock_quantity, 3);

    let cart = cart_service::get_cart(&state, &user, None)
        .await?
        .data
        .expect("cart");
    let shirt_line = cart
        .items
        .iter()
        .find(|line| line.product_id == shirt.id)
        .expect("shirt line")
        .id;
    let cart = cart_service::remove_item(&state, &user, shirt_line, None)
        .await?
        .data
        .expect("cart");
    assert_eq!(cart.items.len(), 1);
    assert_eq!(round_money(cart.subtotal), d("9.00"));
    assert_eq!(stock_of(&state, shirt.id).await?.stock_quantity, 10);

    let cart = cart_service::clear_cart(&state, &user, None)
        .await?
        .data
        .expect("cart");
    assert!(cart.items.is_empty());
    assert_eq!(cart.item_count, 0);
    assert_eq!(round_money(cart.total), Decimal::ZERO);
    assert_eq!(stock_of(&state, socks.id).await?.stock_quantity, 5);

    Ok(())
}

#[tokio::test]
async fn updating_a_line_to_zero_or_below_removes_it() -> anyhow::Result<()> {
    let (state, _dir) = setup_state().await?;
    let user = create_user(&state, "user").await?;
    let product = create_product(&state, "8.00", 10).await?;

    for quantity in [0, i32::MIN] {
        add(&state, &user, product.id, 4).await?;
        assert_eq!(stock_of(&state, product.id).await?.stock_quantity, 6);

        let cart = cart_service::get_cart(&state, &user, None)
            .await?
            .data
            .expect("cart");
        let cart = cart_service::update_item(
            &state,
            &user,
            cart.items[0].id,
            UpdateCartItemRequest { quantity },
            None,
        )
        .await?
        .data
        .expect("cart");
        assert!(cart.items.is_empty());
        assert_eq!(round_money(cart.total), Decimal::ZERO);
        assert_eq!(stock_of(&state, product.id).await?.stock_quantity, 10);
    }

    Ok(())
}

#[tokio::test]
async fn oversized_quantities_are_rejected_without_touching_stock() -> anyhow::Result<()> {
    let (state, _dir) = setup_state().await?;
    let user = create_user(&state, "user").await?;
    let product = create_product(&state, "1.00", 20_000).await?;

    let err = add(&state, &user, product.id, i32::MAX).await.unwrap_err();
    assert!(matches!(err, AppError::Validation { ref field, .. } if field == "quantity"));
    let err = add(&state, &user, product.id, cart_service::MAX_LINE_QUANTITY + 1)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation { .. }));
    assert_eq!(stock_of(&state, product.id).await?.stock_quantity, 20_000);

    add(&state, &user, product.id, 6_000).await?;
    let err = add(&state, &user, product.id, 6_000).await.unwrap_err();
    assert!(matches!(err, AppError::Validation { ref field, .. } if field == "quantity"));
    assert_eq!(stock_of(&state, product.id).await?.stock_quantity, 14_000);

    let cart = cart_service::get_cart(&state, &user, None)
        .await?
        .data
        .expect("cart");
    assert_eq!(cart.item_count, 6_000);
    let err = cart_service::update_item(
        &state,
        &user,
        cart.items[0].id,
        UpdateCartItemRequest { quantity: i32::MAX },
        None,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Validation { .. }));
    assert_eq!(stock_of(&state, product.id).await?.stock_quantity, 14_000);

    Ok(())
}

#[tokio::test]
async fn removing_a_coupon_restores_undiscounted_totals() -> anyhow::Result<()> {
    let (state, _dir) = setup_state().await?;
    let user = create_user(&state, "user").await?;
    let product = create_product(&state, "100.00", 5).await?;
    create_coupon(&state, "SAVE10", "10", None, None).await?;

    add(&state, &user, product.id, 1).await?;
    let cart = coupon_service::apply_to_cart(&state, &user, "SAVE10", None)
        .await?
        .data
        .expect("cart");
    assert_eq!(round_money(cart.discount_amount), d("10.00"));
    assert_eq!(round_money(cart.total), d("100.00"));

    let cart = coupon_service::remove_from_cart(&state, &user, " save10 ", None)
        .await?
        .data
        .expect("cart");
    assert!(cart.applied_coupons.is_empty());
    assert_eq!(round_money(cart.discount_amount), Decimal::ZERO);
    assert_eq!(round_money(cart.tax_amount), d("10.00"));
    assert_eq!(round_money(cart.total), d("110.00"));

    let err = coupon_service::remove_from_cart(&state, &user, "SAVE10", None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation { .. }));

    Ok(())
}

#[tokio::test]
async fn checkout_in_another_currency_converts_every_figure() -> anyhow::Result<()> {
    let (state, _dir) = setup_state().await?;
    let user = create_user(&state, "user").await?;
    let product = create_product(&state, "100.00", 10).await?;
    create_coupon(&state, "TENOFF", "10", None, None).await?;

    add(&state, &user, product.id, 5).await?;
    coupon_service::apply_to_cart(&state, &user, "TENOFF", None).await?;

    let created = checkout_service::create_order(
        &state,
        &user,
        checkout_request(),
        Some("EUR".into()),
    )
    .await?
    .data
    .expect("order");
    let order = created.order;

    assert_eq!(order.currency, "EUR");
    assert_eq!(round_rate(order.exchange_rate), d("0.9"));
    assert_eq!(round_money(order.subtotal), d("450.00"));
    assert_eq!(round_money(order.tax_amount), d("45.00"));
    assert_eq!(round_money(order.discount_amount), d("45.00"));
    assert_eq!(round_money(order.shipping_amount), Decimal::ZERO);
    assert_eq!(round_money(order.total), d("450.00"));

    let original = &order.original_amounts;
    assert_eq!(original.currency, "USD");
    assert_eq!(round_money(original.subtotal), d("500.00"));
    assert_eq!(round_money(original.tax_amount), d("50.00"));
    assert_eq!(round_money(original.shipping_amount), Decimal::ZERO);
    assert_eq!(round_money(original.discount_amount), d("50.00"));
    assert_eq!(round_money(original.total), d("500.00"));

    let item = &created.items[0];
    assert_eq!(round_money(item.price), d("90.00"));
    assert_eq!(round_money(item.base_price), d("100.00"));
    assert_eq!(round_money(item.total), d("450.00"));

    Ok(())
}

#[tokio::test]
async fn checkout_validation_rechecks_applied_coupons() -> anyhow::Result<()> {
    let (state, _dir) = setup_state().await?;
    let user = create_user(&state, "user").await?;
    let product = create_product(&state, "50.00", 10).await?;
    let expiring = create_coupon(&state, "SOONGONE", "10", None, None).await?;
    let limited = create_coupon(&state, "ONESHOT", "5", None, None).await?;

    add(&state, &user, product.id, 1).await?;
    coupon_service::apply_to_cart(&state, &user, "SOONGONE", None).await?;
    checkout_service::validate(&state, &user, None).await?;

    CouponActive {
        id: Set(expiring.id),
        expires_at: Set(Some((Utc::now() - Duration::hours(1)).into())),
        ..Default::default()
    }
    .update(&state.orm)
    .await?;
    let err = checkout_service::validate(&state, &user, None).await.unwrap_err();
    assert!(matches!(err, AppError::Validation { ref field, .. } if field == "code"));

    coupon_service::remove_from_cart(&state, &user, "SOONGONE", None).await?;
    coupon_service::apply_to_cart(&state, &user, "ONESHOT", None).await?;
    CouponActive {
        id: Set(limited.id),
        usage_limit: Set(Some(1)),
        used_count: Set(1),
        ..Default::default()
    }
    .update(&state.orm)
    .await?;
    let err = checkout_service::validate(&state, &user, None).await.unwrap_err();
    assert!(matches!(err, AppError::Validation { ref field, .. } if field == "code"));

    let result = checkout_service::create_order(&state, &user, checkout_request(), None).await;
    assert!(matches!(result, Err(AppError::Validation { .. })));
    assert_eq!(stock_of(&state, product.id).await?.stock_quantity, 9);

    Ok(())
}

#[tokio::test]
async fn order_items_keep_their_snapshot_after_product_edits() -> anyhow::Result<()> {
    let (state, _dir) = setup_state().await?;
    let user = create_user(&state, "user").await?;
    let product = create_product(&state, "25.00", 10).await?;

    add(&state, &user, product.id, 2).await?;
    let created = checkout_service::create_order(&state, &user, checkout_request(), None)
        .await?
        .data
        .expect("order");

    ProductActive {
        id: Set(product.id),
        name: Set("Renamed Widget".into()),
        price: Set(d("99.00")),
        updated_at: Set(Utc::now().into()),
        ..Default::default()
    }
    .update(&state.orm)
    .await?;

    let order = order_service::get_order(&state, &user, created.order.id)
        .await?
        .data
        .expect("order");
    let item = &order.items[0];
    assert_eq!(item.product_name, "Test Widget");
    assert_eq!(round_money(item.price), d("25.00"));
    assert_eq!(round_money(item.total), d("50.00"));
    assert_eq!(item.product_snapshot["name"], "Test Widget");
    assert_eq!(item.product_snapshot["sku"], product.sku.as_str());
    assert_eq!(round_money(order.order.total), d("55.00"));

    Ok(())
}
