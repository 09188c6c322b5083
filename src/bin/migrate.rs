use axum_multicurrency_shop::{
    config::AppConfig,
    db::{create_orm_conn, run_migrations},
    migration::Migrator,
};
use sea_orm_migration::MigratorTrait;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;
    let orm = create_orm_conn(&config.database_url).await?;

    let pending = Migrator::get_pending_migrations(&orm).await?;
    if pending.is_empty() {
        println!("Schema is up to date");
        return Ok(());
    }
    for migration in &pending {
        println!("Applying {}", migration.name());
    }
    run_migrations(&orm).await?;
    println!("Migrations applied");
    Ok(())
}
