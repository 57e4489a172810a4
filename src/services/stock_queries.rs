//! Read-only projections over stock records and the movement ledger.

use crate::{
    db::DbPool,
    entities::{
        movement::{self, Entity as Movement, MovementType},
        product::{self, Entity as Product},
        stock_record::{self, Entity as StockRecord},
    },
    errors::ServiceError,
    services::stock_ledger::{find_stock_record, StockView},
};
use chrono::{DateTime, Utc};
use sea_orm::{
    ColumnTrait, EntityTrait, JoinType, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect,
    RelationTrait, TransactionError, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

const MAX_PAGE_SIZE: u64 = 1000;
const MAX_RECENT_MOVEMENTS: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StockStatus {
    OutOfStock,
    Low,
    Ok,
}

impl StockStatus {
    pub fn classify(available: i32, stock_minimum: i32) -> Self {
        if available <= 0 {
            Self::OutOfStock
        } else if available <= stock_minimum {
            Self::Low
        } else {
            Self::Ok
        }
    }
}

/// One stock record with its product and restock status
#[derive(Debug, Clone, Serialize)]
pub struct StockStatusEntry {
    pub stock: StockView,
    pub product_code: String,
    pub product_name: String,
    pub stock_minimum: i32,
    pub status: StockStatus,
    pub needs_restock: bool,
}

impl StockStatusEntry {
    fn new(record: stock_record::Model, product: product::Model) -> Self {
        let stock = StockView::from(record);
        let status = StockStatus::classify(stock.quantity_available, product.stock_minimum);
        Self {
            needs_restock: stock.quantity_available <= product.stock_minimum,
            stock,
            product_code: product.code,
            product_name: product.name,
            stock_minimum: product.stock_minimum,
            status,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StockTotals {
    pub total_on_hand: i64,
    pub total_reserved: i64,
    pub total_available: i64,
    pub low_stock_count: u64,
    pub out_of_stock_count: u64,
    pub total_records: u64,
}

impl StockTotals {
    fn from_entries(entries: &[StockStatusEntry]) -> Self {
        let mut totals = Self::default();
        for entry in entries {
            totals.add(entry);
        }
        totals
    }

    fn add(&mut self, entry: &StockStatusEntry) {
        let record = &entry.stock.record;
        self.total_on_hand += i64::from(record.quantity_on_hand);
        self.total_reserved += i64::from(record.quantity_reserved);
        self.total_available += i64::from(entry.stock.quantity_available);
        self.total_records += 1;
        if entry.needs_restock {
            self.low_stock_count += 1;
        }
        if entry.status == StockStatus::OutOfStock {
            self.out_of_stock_count += 1;
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StockReport {
    pub generated_at: DateTime<Utc>,
    pub company_id: Option<Uuid>,
    pub totals: StockTotals,
    pub entries: Vec<StockStatusEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MovementFilter {
    pub stock_record_id: Option<Uuid>,
    pub product_id: Option<Uuid>,
    pub movement_type: Option<MovementType>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MovementPage {
    pub movements: Vec<movement::Model>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
}

/// Recorded on-hand quantity against the quantity rebuilt from the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciliationReport {
    pub stock_record_id: Uuid,
    pub recorded_on_hand: i32,
    pub replayed_on_hand: i64,
    pub movement_count: u64,
    pub consistent: bool,
}

pub struct StockQueryService {
    db_pool: Arc<DbPool>,
}

impl StockQueryService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    /// Records whose available quantity is at or below the product minimum.
    pub async fn list_low_stock(
        &self,
        company_id: Option<Uuid>,
    ) -> Result<Vec<StockStatusEntry>, ServiceError> {
        let entries = self.load_entries(company_id).await?;
        Ok(entries.into_iter().filter(|e| e.needs_restock).collect())
    }

    pub async fn list_out_of_stock(
        &self,
        company_id: Option<Uuid>,
    ) -> Result<Vec<StockStatusEntry>, ServiceError> {
        let entries = self.load_entries(company_id).await?;
        Ok(entries
            .into_iter()
            .filter(|e| e.status == StockStatus::OutOfStock)
            .collect())
    }

    pub async fn aggregate_totals(
        &self,
        company_id: Option<Uuid>,
    ) -> Result<StockTotals, ServiceError> {
        let entries = self.load_entries(company_id).await?;
        Ok(StockTotals::from_entries(&entries))
    }

    /// Every record in scope with its status, plus the totals.
    #[instrument(skip(self))]
    pub async fn stock_report(&self, company_id: Option<Uuid>) -> Result<StockReport, ServiceError> {
        let entries = self.load_entries(company_id).await?;
        let totals = StockTotals::from_entries(&entries);
        info!(
            records = totals.total_records,
            low = totals.low_stock_count,
            out = totals.out_of_stock_count,
            "Stock report generated"
        );
        Ok(StockReport {
            generated_at: Utc::now(),
            company_id,
            totals,
            entries,
        })
    }

    /// Movements newest first. `page` starts at 1.
    pub async fn movement_history(
        &self,
        filter: MovementFilter,
        page: u64,
        limit: u64,
    ) -> Result<MovementPage, ServiceError> {
        if page == 0 {
            return Err(ServiceError::ValidationError(
                "page must be at least 1".to_string(),
            ));
        }
        if limit == 0 || limit > MAX_PAGE_SIZE {
            return Err(ServiceError::ValidationError(format!(
                "limit must be between 1 and {}",
                MAX_PAGE_SIZE
            )));
        }

        let db = self.db_pool.as_ref();
        let mut query = Movement::find();

        if let Some(stock_record_id) = filter.stock_record_id {
            query = query.filter(movement::Column::StockRecordId.eq(stock_record_id));
        }
        if let Some(product_id) = filter.product_id {
            query = query
                .join(JoinType::InnerJoin, movement::Relation::StockRecord.def())
                .filter(stock_record::Column::ProductId.eq(product_id));
        }
        if let Some(movement_type) = filter.movement_type {
            query = query.filter(movement::Column::MovementType.eq(movement_type));
        }

        let paginator = query
            .order_by_desc(movement::Column::CreatedAt)
            .order_by_desc(movement::Column::Id)
            .paginate(db, limit);
        let total = paginator.num_items().await.map_err(ServiceError::db_error)?;
        let movements = paginator
            .fetch_page(page - 1)
            .await
            .map_err(ServiceError::db_error)?;

        Ok(MovementPage {
            movements,
            total,
            page,
            limit,
        })
    }

    /// The latest `limit` movements of one record, newest first.
    pub async fn recent_movements(
        &self,
        stock_record_id: Uuid,
        limit: u64,
    ) -> Result<Vec<movement::Model>, ServiceError> {
        self.ensure_stock_record(stock_record_id).await?;
        Movement::find()
            .filter(movement::Column::StockRecordId.eq(stock_record_id))
            .order_by_desc(movement::Column::CreatedAt)
            .order_by_desc(movement::Column::Id)
            .limit(limit.clamp(1, MAX_RECENT_MOVEMENTS))
            .all(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)
    }

    /// Replays the ledger from zero and compares it with the stored on-hand.
    /// The record and its movements are read in one transaction.
    #[instrument(skip(self))]
    pub async fn reconcile(&self, stock_record_id: Uuid) -> Result<ReconciliationReport, ServiceError> {
        let db = self.db_pool.as_ref();
        let (record, movements) = db
            .transaction::<_, (stock_record::Model, Vec<movement::Model>), ServiceError>(
                move |txn| {
                    Box::pin(async move {
                        let record = find_stock_record(txn, stock_record_id).await?;
                        let movements = Movement::find()
                            .filter(movement::Column::StockRecordId.eq(stock_record_id))
                            .order_by_asc(movement::Column::CreatedAt)
                            .all(txn)
                            .await
                            .map_err(ServiceError::db_error)?;
                        Ok((record, movements))
                    })
                },
            )
            .await
            .map_err(|e| match e {
                TransactionError::Connection(db_err) => ServiceError::db_error(db_err),
                TransactionError::Transaction(service_err) => service_err,
            })?;

        let replayed_on_hand: i64 = movements.iter().map(movement::Model::signed_delta).sum();
        let consistent = replayed_on_hand == i64::from(record.quantity_on_hand);
        if !consistent {
            warn!(
                %stock_record_id,
                recorded = record.quantity_on_hand,
                replayed = replayed_on_hand,
                "Stock record disagrees with its movement ledger"
            );
        }

        Ok(ReconciliationReport {
            stock_record_id,
            recorded_on_hand: record.quantity_on_hand,
            replayed_on_hand,
            movement_count: movements.len() as u64,
            consistent,
        })
    }

    async fn ensure_stock_record(
        &self,
        stock_record_id: Uuid,
    ) -> Result<stock_record::Model, ServiceError> {
        find_stock_record(self.db_pool.as_ref(), stock_record_id).await
    }

    async fn load_entries(
        &self,
        company_id: Option<Uuid>,
    ) -> Result<Vec<StockStatusEntry>, ServiceError> {
        let mut query = StockRecord::find().find_also_related(Product);
        if let Some(company_id) = company_id {
            query = query.filter(product::Column::CompanyId.eq(company_id));
        }

        let rows = query
            .order_by_asc(product::Column::Code)
            .all(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)?;

        rows.into_iter()
            .map(|(record, product)| {
                let product = product.ok_or_else(|| {
                    ServiceError::InvalidState(format!(
                        "Stock record {} has no product",
                        record.id
                    ))
                })?;
                Ok(StockStatusEntry::new(record, product))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, 5, StockStatus::OutOfStock)]
    #[case(0, 0, StockStatus::OutOfStock)]
    #[case(5, 5, StockStatus::Low)]
    #[case(6, 5, StockStatus::Ok)]
    #[case(1, 0, StockStatus::Ok)]
    fn status_classification(
        #[case] available: i32,
        #[case] minimum: i32,
        #[case] expected: StockStatus,
    ) {
        assert_eq!(StockStatus::classify(available, minimum), expected);
    }

    fn entry(on_hand: i32, reserved: i32, stock_minimum: i32) -> StockStatusEntry {
        let now = Utc::now();
        let product_id = Uuid::new_v4();
        let record = stock_record::Model {
            id: Uuid::new_v4(),
            product_id,
            quantity_on_hand: on_hand,
            quantity_reserved: reserved,
            location: String::new(),
            lot: None,
            version: 1,
            created_at: now,
            updated_at: now,
        };
        let product = product::Model {
            id: product_id,
            company_id: None,
            code: format!("P-{}", on_hand),
            name: "Widget".into(),
            stock_minimum,
            created_at: now,
        };
        StockStatusEntry::new(record, product)
    }

    #[test]
    fn totals_fold_every_entry() {
        let entries = vec![entry(20, 5, 3), entry(2, 0, 3), entry(4, 4, 0)];
        let totals = StockTotals::from_entries(&entries);

        assert_eq!(
            totals,
            StockTotals {
                total_on_hand: 26,
                total_reserved: 9,
                total_available: 17,
                low_stock_count: 2,
                out_of_stock_count: 1,
                total_records: 3,
            }
        );
        assert_eq!(StockTotals::from_entries(&[]), StockTotals::default());
    }

    #[test]
    fn status_labels_are_snake_case() {
        assert_eq!(StockStatus::OutOfStock.to_string(), "out_of_stock");
    }
}
