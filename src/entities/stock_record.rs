use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::StockLevels;

/// On-hand and reserved quantities for exactly one product.
///
/// Rows are only written by [`crate::services::stock_ledger::StockLedgerService`];
/// every quantity change goes through a version-guarded update.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "stock_records")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub product_id: Uuid,
    pub quantity_on_hand: i32,
    pub quantity_reserved: i32,
    pub location: String,
    pub lot: Option<String>,
    /// Optimistic concurrency counter, bumped on every write
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::product::Entity",
        from = "Column::ProductId",
        to = "super::product::Column::Id",
        on_delete = "Restrict"
    )]
    Product,
    #[sea_orm(has_many = "super::movement::Entity")]
    Movements,
}

impl Related<super::product::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Product.def()
    }
}

impl Related<super::movement::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Movements.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn quantity_available(&self) -> i32 {
        self.quantity_on_hand - self.quantity_reserved
    }

    /// Quantities as the domain sees them. Rows that break the stock
    /// invariants are reported as `InvalidState`.
    pub fn levels(&self) -> Result<StockLevels, crate::errors::ServiceError> {
        StockLevels::new(self.quantity_on_hand, self.quantity_reserved)
    }
}
