use sea_orm::{EntityTrait, Schema};
use sea_orm_migration::prelude::*;

use crate::entity::{
    AuditLogs, CartItems, Carts, CouponUsages, Coupons, Currencies, CurrencyRates, OrderItems,
    Orders, Products, Users,
};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Parents before children so foreign keys resolve.
        create_for(manager, Users).await?;
        create_for(manager, Currencies).await?;
        create_for(manager, CurrencyRates).await?;
        create_for(manager, Products).await?;
        create_for(manager, Carts).await?;
        create_for(manager, CartItems).await?;
        create_for(manager, Coupons).await?;
        create_for(manager, Orders).await?;
        create_for(manager, OrderItems).await?;
        create_for(manager, CouponUsages).await?;
        create_for(manager, AuditLogs).await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        drop_for(manager, AuditLogs).await?;
        drop_for(manager, CouponUsages).await?;
        drop_for(manager, OrderItems).await?;
        drop_for(manager, Orders).await?;
        drop_for(manager, Coupons).await?;
        drop_for(manager, CartItems).await?;
        drop_for(manager, Carts).await?;
        drop_for(manager, Products).await?;
        drop_for(manager, CurrencyRates).await?;
        drop_for(manager, Currencies).await?;
        drop_for(manager, Users).await?;
        Ok(())
    }
}

async fn create_for<E>(manager: &SchemaManager<'_>, entity: E) -> Result<(), DbErr>
where
    E: EntityTrait,
{
    let schema = Schema::new(manager.get_database_backend());
    manager
        .create_table(schema.create_table_from_entity(entity).if_not_exists().to_owned())
        .await?;
    for mut index in schema.create_index_from_entity(entity) {
        manager.create_index(index.if_not_exists().to_owned()).await?;
    }
    Ok(())
}

async fn drop_for<E>(manager: &SchemaManager<'_>, entity: E) -> Result<(), DbErr>
where
    E: EntityTrait,
{
    manager
        .drop_table(Table::drop().table(entity).if_exists().to_owned())
        .await
}
