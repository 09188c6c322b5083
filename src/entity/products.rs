use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "products")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub name: String,
    #[sea_orm(unique)]
    pub sku: String,
    pub description: Option<String>,
    #[sea_orm(column_type = "Decimal(Some((10, 2)))")]
    pub price: Decimal,
    #[sea_orm(column_type = "Decimal(Some((10, 2)))", nullable)]
    pub sale_price: Option<Decimal>,
    pub stock_quantity: i32,
    pub manage_stock: bool,
    pub in_stock: bool,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    /// Sale price when one is set, list price otherwise.
    pub fn current_price(&self) -> Decimal {
        self.sale_price.unwrap_or(self.price)
    }

    pub fn is_in_stock(&self) -> bool {
        if !self.manage_stock {
            return self.in_stock;
        }
        self.stock_quantity > 0
    }

    pub fn can_purchase(&self, quantity: i32) -> bool {
        if !self.is_in_stock() {
            return false;
        }
        if !self.manage_stock {
            return true;
        }
        self.stock_quantity >= quantity
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::cart_items::Entity")]
    CartItems,
    #[sea_orm(has_many = "super::order_items::Entity")]
    OrderItems,
}

impl Related<super::cart_items::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CartItems.def()
    }
}

impl Related<super::order_items::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItems.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn product(stock_quantity: i32, manage_stock: bool, in_stock: bool) -> Model {
        Model {
            id: Uuid::new_v4(),
            name: "Ferris Mug".into(),
            sku: "SKU-MUG".into(),
            description: None,
            price: Decimal::new(1200, 2),
            sale_price: None,
            stock_quantity,
            manage_stock,
            in_stock,
            created_at: Utc::now().into(),
            updated_at: Utc::now().into(),
        }
    }

    #[test]
    fn managed_stock_limits_purchasable_quantity() {
        let p = product(5, true, true);
        assert!(p.can_purchase(5));
        assert!(!p.can_purchase(6));
        assert!(!product(0, true, true).can_purchase(1));
    }

    #[test]
    fn unmanaged_stock_follows_the_flag() {
        assert!(product(0, false, true).can_purchase(1000));
        assert!(!product(50, false, false).can_purchase(1));
    }

    #[test]
    fn current_price_prefers_sale_price() {
        let mut p = product(1, true, true);
        assert_eq!(p.current_price(), Decimal::new(1200, 2));
        p.sale_price = Some(Decimal::new(999, 2));
        assert_eq!(p.current_price(), Decimal::new(999, 2));
    }
}
