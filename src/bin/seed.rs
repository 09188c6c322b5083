use axum_multicurrency_shop::{
    config::AppConfig,
    db::{create_orm_conn, run_migrations},
    dto::auth::Claims,
    entity::{
        Coupons, Currencies, CurrencyRates, Products, Users,
        coupons::{self, CouponType},
        currencies, currency_rates, products, users,
    },
};
use chrono::{Duration, Utc};
use jsonwebtoken::{EncodingKey, Header, encode};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
};
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;

    let orm = create_orm_conn(&config.database_url).await?;
    // Ensure migrations are applied.
    run_migrations(&orm).await?;

    seed_currencies(&orm).await?;
    seed_rates(&orm).await?;
    seed_products(&orm).await?;
    seed_coupons(&orm).await?;

    let admin_id = ensure_user(&orm, "admin@example.com", "admin").await?;
    let user_id = ensure_user(&orm, "user@example.com", "user").await?;

    println!("Seed completed. Admin ID: {admin_id}, User ID: {user_id}");

    match std::env::var("JWT_SECRET") {
        Ok(secret) => {
            println!("Admin token: {}", dev_token(&secret, admin_id, "admin")?);
            println!("User token: {}", dev_token(&secret, user_id, "user")?);
        }
        Err(_) => println!("JWT_SECRET is not set; skipping dev tokens"),
    }
    Ok(())
}

async fn seed_currencies(orm: &DatabaseConnection) -> anyhow::Result<()> {
    let rows = [
        ("USD", "US Dollar", "$", true),
        ("EUR", "Euro", "€", false),
        ("GBP", "British Pound", "£", false),
    ];

    for (code, name, symbol, is_default) in rows {
        if Currencies::find_by_id(code).one(orm).await?.is_some() {
            continue;
        }
        let now = Utc::now();
        currencies::ActiveModel {
            code: Set(code.to_string()),
            name: Set(name.to_string()),
            symbol: Set(symbol.to_string()),
            is_active: Set(true),
            is_default: Set(is_default),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        }
        .insert(orm)
        .await?;
    }

    println!("Seeded currencies");
    Ok(())
}

async fn seed_rates(orm: &DatabaseConnection) -> anyhow::Result<()> {
    let rows = [
        ("USD", "EUR", Decimal::new(9, 1)),
        ("USD", "GBP", Decimal::new(8, 1)),
    ];

    for (from, to, rate) in rows {
        let exists = CurrencyRates::find_by_id((from.to_string(), to.to_string()))
            .one(orm)
            .await?
            .is_some();
        if exists {
            continue;
        }
        currency_rates::ActiveModel {
            from_currency: Set(from.to_string()),
            to_currency: Set(to.to_string()),
            rate: Set(rate),
            last_updated_at: Set(Utc::now().into()),
        }
        .insert(orm)
        .await?;
    }

    println!("Seeded rates");
    Ok(())
}

async fn seed_products(orm: &DatabaseConnection) -> anyhow::Result<()> {
    let rows = [
        ("Axum Hoodie", "SKU-HOODIE", "Warm hoodie for Rustaceans", Decimal::new(5500, 2), None, 50),
        ("Ferris Mug", "SKU-MUG", "Coffee tastes better with Ferris", Decimal::new(1200, 2), Some(Decimal::new(999, 2)), 100),
        ("Rust Sticker Pack", "SKU-STICKERS", "Decorate your laptop", Decimal::new(500, 2), None, 200),
        ("E-book: Async Rust", "SKU-EBOOK", "Learn async Rust patterns", Decimal::new(2500, 2), None, 0),
    ];

    for (name, sku, desc, price, sale_price, stock) in rows {
        let exists = Products::find()
            .filter(products::Column::Sku.eq(sku))
            .one(orm)
            .await?
            .is_some();
        if exists {
            continue;
        }
        // The e-book is digital and never runs out.
        let manage_stock = stock > 0;
        let now = Utc::now();
        products::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            sku: Set(sku.to_string()),
            description: Set(Some(desc.to_string())),
            price: Set(price),
            sale_price: Set(sale_price),
            stock_quantity: Set(stock),
            manage_stock: Set(manage_stock),
            in_stock: Set(true),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        }
        .insert(orm)
        .await?;
    }

    println!("Seeded products");
    Ok(())
}

async fn seed_coupons(orm: &DatabaseConnection) -> anyhow::Result<()> {
    let exists = Coupons::find()
        .filter(coupons::Column::Code.eq("WELCOME10"))
        .one(orm)
        .await?
        .is_some();
    if exists {
        return Ok(());
    }

    let now = Utc::now();
    coupons::ActiveModel {
        id: Set(Uuid::new_v4()),
        code: Set("WELCOME10".to_string()),
        name: Set("Welcome discount".to_string()),
        description: Set(Some("10% off, capped at 20".to_string())),
        kind: Set(CouponType::Percentage),
        value: Set(Decimal::new(10, 0)),
        minimum_amount: Set(Some(Decimal::new(20, 0))),
        maximum_discount: Set(Some(Decimal::new(20, 0))),
        usage_limit: Set(Some(1000)),
        used_count: Set(0),
        usage_limit_per_user: Set(Some(1)),
        is_active: Set(true),
        starts_at: Set(None),
        expires_at: Set(None),
        created_at: Set(now.into()),
        updated_at: Set(now.into()),
    }
    .insert(orm)
    .await?;

    println!("Seeded coupon WELCOME10");
    Ok(())
}

async fn ensure_user(orm: &DatabaseConnection, email: &str, role: &str) -> anyhow::Result<Uuid> {
    if let Some(existing) = Users::find()
        .filter(users::Column::Email.eq(email))
        .one(orm)
        .await?
    {
        return Ok(existing.id);
    }

    let user = users::ActiveModel {
        id: Set(Uuid::new_v4()),
        email: Set(email.to_string()),
        role: Set(role.to_string()),
        currency: Set(None),
        created_at: Set(Utc::now().into()),
    }
    .insert(orm)
    .await?;

    println!("Ensured user {email} (role={role})");
    Ok(user.id)
}

fn dev_token(secret: &str, user_id: Uuid, role: &str) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id.to_string(),
        role: role.to_string(),
        exp: (Utc::now() + Duration::days(7)).timestamp() as usize,
        currency: None,
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;
    Ok(token)
}
