use sea_orm::entity::prelude::*;

/// Directional rate: one unit of `from_currency` buys `rate` units of `to_currency`.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "currency_rates")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub from_currency: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub to_currency: String,
    #[sea_orm(column_type = "Decimal(Some((12, 6)))")]
    pub rate: Decimal,
    #[sea_orm(indexed)]
    pub last_updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
