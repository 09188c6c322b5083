use anyhow::Result;
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbBackend, QuerySelect,
    sea_query::LockType,
};
use sea_orm_migration::MigratorTrait;

use crate::migration::Migrator;

/// Create a SeaORM connection.
pub async fn create_orm_conn(database_url: &str) -> Result<DatabaseConnection> {
    let mut options = ConnectOptions::new(database_url.to_owned());
    options.sqlx_logging(false);
    let conn = Database::connect(options).await?;
    Ok(conn)
}

/// Apply every pending migration.
pub async fn run_migrations(conn: &DatabaseConnection) -> Result<()> {
    Migrator::up(conn, None).await?;
    Ok(())
}

/// Adds `FOR UPDATE` to a select so the returned rows stay locked until the
/// surrounding transaction ends. SQLite has no row locks; its single writer
/// lock already serializes the transaction.
pub fn for_update<Q: QuerySelect>(query: Q, conn: &impl ConnectionTrait) -> Q {
    match conn.get_database_backend() {
        DbBackend::Sqlite => query,
        _ => query.lock(LockType::Update),
    }
}
