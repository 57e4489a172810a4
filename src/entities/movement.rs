use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveModelBehavior, ActiveValue, Set};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kinds of physical stock movement recorded in the ledger
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MovementType {
    #[sea_orm(string_value = "entry")]
    Entry,
    #[sea_orm(string_value = "exit")]
    Exit,
    #[sea_orm(string_value = "adjustment")]
    Adjustment,
    #[sea_orm(string_value = "return")]
    Return,
}

/// Immutable audit entry for one change to a stock record's on-hand quantity
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "movements")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub stock_record_id: Uuid,
    pub movement_type: MovementType,
    /// Always strictly positive; direction comes from `movement_type`
    pub quantity: i32,
    pub reason: String,
    /// Acting user; null when unknown or since deleted
    pub user_id: Option<Uuid>,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub unit_price: Option<Decimal>,
    pub previous_quantity: i32,
    pub new_quantity: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::stock_record::Entity",
        from = "Column::StockRecordId",
        to = "super::stock_record::Column::Id",
        on_delete = "Restrict"
    )]
    StockRecord,
}

impl Related<super::stock_record::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::StockRecord.def()
    }
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C>(self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        if !insert {
            return Err(DbErr::Custom(
                "movements are append-only and cannot be updated".to_string(),
            ));
        }

        let mut active_model = self;
        if let ActiveValue::NotSet = active_model.id {
            active_model.id = Set(Uuid::new_v4());
        }
        if let ActiveValue::NotSet = active_model.created_at {
            active_model.created_at = Set(Utc::now());
        }
        Ok(active_model)
    }
}

impl Model {
    /// Monetary value of the movement; zero when no unit price was captured.
    pub fn total_value(&self) -> Decimal {
        self.unit_price
            .map(|price| price * Decimal::from(self.quantity))
            .unwrap_or(Decimal::ZERO)
    }

    /// Effect of this movement on the on-hand quantity.
    pub fn signed_delta(&self) -> i64 {
        match self.movement_type {
            MovementType::Entry | MovementType::Return => i64::from(self.quantity),
            MovementType::Exit => -i64::from(self.quantity),
            MovementType::Adjustment => {
                i64::from(self.new_quantity) - i64::from(self.previous_quantity)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::str::FromStr;

    fn movement(movement_type: MovementType, quantity: i32, before: i32, after: i32) -> Model {
        Model {
            id: Uuid::new_v4(),
            stock_record_id: Uuid::new_v4(),
            movement_type,
            quantity,
            reason: "test".to_string(),
            user_id: None,
            unit_price: None,
            previous_quantity: before,
            new_quantity: after,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn movement_type_round_trips_through_strings() {
        assert_eq!(MovementType::Adjustment.to_string(), "adjustment");
        assert_eq!(
            MovementType::from_str("return").unwrap(),
            MovementType::Return
        );
        assert!(MovementType::from_str("transfer").is_err());
    }

    #[test]
    fn signed_delta_follows_movement_direction() {
        assert_eq!(movement(MovementType::Entry, 5, 0, 5).signed_delta(), 5);
        assert_eq!(movement(MovementType::Return, 2, 5, 7).signed_delta(), 2);
        assert_eq!(movement(MovementType::Exit, 3, 7, 4).signed_delta(), -3);
        assert_eq!(
            movement(MovementType::Adjustment, 4, 4, 0).signed_delta(),
            -4
        );
        assert_eq!(
            movement(MovementType::Adjustment, 6, 4, 10).signed_delta(),
            6
        );
    }

    #[test]
    fn total_value_uses_unit_price_when_present() {
        let mut entry = movement(MovementType::Entry, 4, 0, 4);
        assert_eq!(entry.total_value(), Decimal::ZERO);

        entry.unit_price = Some(dec!(2.50));
        assert_eq!(entry.total_value(), dec!(10.00));
    }
}
