//! Stock Ledger Service
//!
//! The only writer of stock record quantities. Every operation loads the
//! record, computes the transition with [`StockLevels::apply`], then writes the
//! new quantities with a version-guarded update and appends the movement in
//! the same transaction. A lost version race rolls the transaction back and
//! the operation is retried from a fresh read, up to the configured budget.

use crate::{
    config::LedgerSettings,
    db::DbPool,
    domain::{
        AdjustmentRequest, LocationUpdate, MovementDraft, MovementRequest, StockLevels,
        StockMutation, StockTransition,
    },
    entities::{
        movement,
        product::Entity as Product,
        stock_record::{self, Entity as StockRecord},
    },
    errors::ServiceError,
};
use chrono::Utc;
use metrics::{counter, histogram};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait,
    QueryFilter, Set, SqlErr, TransactionError, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

/// A stock record together with its derived available quantity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockView {
    #[serde(flatten)]
    pub record: stock_record::Model,
    pub quantity_available: i32,
}

impl From<stock_record::Model> for StockView {
    fn from(record: stock_record::Model) -> Self {
        Self {
            quantity_available: record.quantity_available(),
            record,
        }
    }
}

/// Result of a quantity-changing operation
#[derive(Debug, Clone, Serialize)]
pub struct LedgerOutcome {
    pub stock: StockView,
    /// `None` only when an adjustment left the quantity unchanged
    pub movement: Option<movement::Model>,
}

#[derive(Debug, Clone, Default)]
struct MovementDetails {
    reason: String,
    user_id: Option<Uuid>,
    unit_price: Option<Decimal>,
}

impl From<&MovementRequest> for MovementDetails {
    fn from(request: &MovementRequest) -> Self {
        Self {
            reason: request.reason.trim().to_string(),
            user_id: request.user_id,
            unit_price: request.unit_price,
        }
    }
}

pub struct StockLedgerService {
    db_pool: Arc<DbPool>,
    settings: LedgerSettings,
}

impl StockLedgerService {
    pub fn new(db_pool: Arc<DbPool>, settings: LedgerSettings) -> Self {
        Self { db_pool, settings }
    }

    pub fn settings(&self) -> &LedgerSettings {
        &self.settings
    }

    /// Creates the zero-quantity stock record for a freshly created product.
    #[instrument(skip(self))]
    pub async fn create_empty_stock_record(
        &self,
        product_id: Uuid,
        location: Option<String>,
    ) -> Result<StockView, ServiceError> {
        let db = self.db_pool.as_ref();

        Product::find_by_id(product_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;

        let location = location.unwrap_or_else(|| self.settings.default_location.clone());
        let record = insert_empty_stock_record(db, product_id, location).await?;
        info!(stock_record_id = %record.id, %product_id, "Stock record created");
        Ok(record.into())
    }

    #[instrument(skip(self, request), fields(stock_record_id = %request.stock_record_id, quantity = request.quantity))]
    pub async fn register_entry(
        &self,
        request: MovementRequest,
    ) -> Result<LedgerOutcome, ServiceError> {
        request.validate()?;
        let mutation = StockMutation::Entry {
            quantity: request.quantity,
        };
        self.apply(request.stock_record_id, mutation, MovementDetails::from(&request))
            .await
    }

    /// Removes stock. With `check_availability` the exit is bounded by the
    /// available quantity; without it only the on-hand floor of zero applies.
    #[instrument(skip(self, request), fields(stock_record_id = %request.stock_record_id, quantity = request.quantity))]
    pub async fn register_exit(
        &self,
        request: MovementRequest,
        check_availability: bool,
    ) -> Result<LedgerOutcome, ServiceError> {
        request.validate()?;
        let mutation = StockMutation::Exit {
            quantity: request.quantity,
            check_availability,
        };
        self.apply(request.stock_record_id, mutation, MovementDetails::from(&request))
            .await
    }

    #[instrument(skip(self, request), fields(stock_record_id = %request.stock_record_id, quantity = request.quantity))]
    pub async fn register_return(
        &self,
        request: MovementRequest,
    ) -> Result<LedgerOutcome, ServiceError> {
        request.validate()?;
        let mutation = StockMutation::Return {
            quantity: request.quantity,
        };
        self.apply(request.stock_record_id, mutation, MovementDetails::from(&request))
            .await
    }

    /// Sets on-hand to `new_quantity`. Adjusting to the current value changes
    /// nothing and records no movement.
    #[instrument(skip(self, request), fields(stock_record_id = %request.stock_record_id, new_quantity = request.new_quantity))]
    pub async fn adjust(&self, request: AdjustmentRequest) -> Result<LedgerOutcome, ServiceError> {
        request.validate()?;
        let mutation = StockMutation::Adjust {
            new_quantity: request.new_quantity,
        };
        let details = MovementDetails {
            reason: request.reason.trim().to_string(),
            user_id: request.user_id,
            unit_price: None,
        };
        self.apply(request.stock_record_id, mutation, details).await
    }

    #[instrument(skip(self))]
    pub async fn reserve(
        &self,
        stock_record_id: Uuid,
        quantity: i32,
    ) -> Result<StockView, ServiceError> {
        let outcome = self
            .apply(
                stock_record_id,
                StockMutation::Reserve { quantity },
                MovementDetails::default(),
            )
            .await?;
        Ok(outcome.stock)
    }

    #[instrument(skip(self))]
    pub async fn release_reservation(
        &self,
        stock_record_id: Uuid,
        quantity: i32,
    ) -> Result<StockView, ServiceError> {
        let outcome = self
            .apply(
                stock_record_id,
                StockMutation::Release { quantity },
                MovementDetails::default(),
            )
            .await?;
        Ok(outcome.stock)
    }

    /// Moves a record to another location and/or lot. Quantities are untouched
    /// and no movement is recorded.
    #[instrument(skip(self, update), fields(stock_record_id = %update.stock_record_id))]
    pub async fn set_location(&self, update: LocationUpdate) -> Result<StockView, ServiceError> {
        update.validate()?;
        let stock_record_id = update.stock_record_id;

        self.run_guarded(stock_record_id, "locate", || {
            let update = update.clone();
            async move {
                let db = self.db_pool.as_ref();
                let record = find_stock_record(db, update.stock_record_id).await?;
                let lot = update.lot.filter(|lot| !lot.trim().is_empty());
                let now = Utc::now();

                let result = StockRecord::update_many()
                    .col_expr(
                        stock_record::Column::Location,
                        Expr::value(update.location.clone()),
                    )
                    .col_expr(stock_record::Column::Lot, Expr::value(lot.clone()))
                    .col_expr(
                        stock_record::Column::Version,
                        Expr::value(record.version.wrapping_add(1)),
                    )
                    .col_expr(stock_record::Column::UpdatedAt, Expr::value(now))
                    .filter(stock_record::Column::Id.eq(record.id))
                    .filter(stock_record::Column::Version.eq(record.version))
                    .exec(db)
                    .await
                    .map_err(ServiceError::db_error)?;

                if result.rows_affected == 0 {
                    return Err(ServiceError::ConcurrentModification(record.id));
                }

                Ok(StockView::from(stock_record::Model {
                    location: update.location,
                    lot,
                    version: record.version.wrapping_add(1),
                    updated_at: now,
                    ..record
                }))
            }
        })
        .await
    }

    pub async fn get_stock(&self, stock_record_id: Uuid) -> Result<StockView, ServiceError> {
        let record = find_stock_record(self.db_pool.as_ref(), stock_record_id).await?;
        Ok(record.into())
    }

    pub async fn get_stock_by_product(&self, product_id: Uuid) -> Result<StockView, ServiceError> {
        let record = StockRecord::find()
            .filter(stock_record::Column::ProductId.eq(product_id))
            .one(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("No stock record for product {}", product_id))
            })?;
        Ok(record.into())
    }

    async fn apply(
        &self,
        stock_record_id: Uuid,
        mutation: StockMutation,
        details: MovementDetails,
    ) -> Result<LedgerOutcome, ServiceError> {
        let outcome = self
            .run_guarded(stock_record_id, mutation.label(), || {
                self.apply_once(stock_record_id, mutation, details.clone())
            })
            .await?;

        if let Some(movement) = &outcome.movement {
            counter!(
                "stock_ledger.movements_recorded",
                1,
                "movement_type" => movement.movement_type.to_string()
            );
            info!(
                movement_id = %movement.id,
                movement_type = %movement.movement_type,
                quantity = movement.quantity,
                on_hand = outcome.stock.record.quantity_on_hand,
                "Stock movement recorded"
            );
        } else {
            debug!(
                on_hand = outcome.stock.record.quantity_on_hand,
                reserved = outcome.stock.record.quantity_reserved,
                operation = mutation.label(),
                "Stock record updated"
            );
        }

        Ok(outcome)
    }

    /// One read-validate-write attempt inside a single transaction.
    async fn apply_once(
        &self,
        stock_record_id: Uuid,
        mutation: StockMutation,
        details: MovementDetails,
    ) -> Result<LedgerOutcome, ServiceError> {
        let db = self.db_pool.as_ref();

        db.transaction::<_, LedgerOutcome, ServiceError>(move |txn| {
            Box::pin(async move {
                let record = find_stock_record(txn, stock_record_id).await?;
                let transition = record.levels()?.apply(mutation)?;

                if transition.is_noop() {
                    return Ok(LedgerOutcome {
                        stock: record.into(),
                        movement: None,
                    });
                }

                if transition.reservation_trimmed > 0 {
                    warn!(
                        %stock_record_id,
                        trimmed = transition.reservation_trimmed,
                        on_hand = transition.after.on_hand(),
                        "On-hand fell below the reservation; reservation trimmed"
                    );
                }

                let updated = write_levels(txn, &record, transition.after).await?;

                let movement = match transition.movement {
                    Some(draft) => {
                        let reason = movement_reason(&details.reason, mutation, &transition);
                        let recorded =
                            insert_movement(txn, &updated, draft, &transition, reason, &details)
                                .await?;
                        Some(recorded)
                    }
                    None => None,
                };

                Ok(LedgerOutcome {
                    stock: updated.into(),
                    movement,
                })
            })
        })
        .await
        .map_err(|e| match e {
            TransactionError::Connection(db_err) => ServiceError::db_error(db_err),
            TransactionError::Transaction(service_err) => service_err,
        })
    }

    /// Runs `attempt_once` until it stops losing version races, the attempt
    /// budget is spent, or the operation timeout elapses. Database lock
    /// conflicts count as lost races.
    async fn run_guarded<T, F, Fut>(
        &self,
        stock_record_id: Uuid,
        operation: &'static str,
        mut attempt_once: F,
    ) -> Result<T, ServiceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let started = Instant::now();
        let attempts = AtomicU32::new(0);
        let max_attempts = self.settings.max_attempts.max(1);

        let retry_loop = async {
            loop {
                let attempt = attempts.fetch_add(1, Ordering::Relaxed) + 1;
                let outcome = attempt_once()
                    .await
                    .map_err(|err| err.into_lost_race(stock_record_id));
                match outcome {
                    Err(ServiceError::ConcurrentModification(_)) if attempt < max_attempts => {
                        counter!("stock_ledger.optimistic_retries", 1, "operation" => operation);
                        debug!(%stock_record_id, attempt, operation, "Version conflict, retrying");
                        tokio::time::sleep(self.settings.retry_backoff * attempt).await;
                    }
                    Err(ServiceError::ConcurrentModification(_)) => {
                        return Err(ServiceError::Contention {
                            stock_record_id,
                            attempts: attempt,
                        });
                    }
                    other => return other,
                }
            }
        };

        let result = match tokio::time::timeout(self.settings.operation_timeout, retry_loop).await
        {
            Ok(result) => result,
            Err(_) => Err(ServiceError::Contention {
                stock_record_id,
                attempts: attempts.load(Ordering::Relaxed),
            }),
        };

        histogram!(
            "stock_ledger.operation.duration",
            started.elapsed(),
            "operation" => operation
        );

        match &result {
            Err(ServiceError::Contention { attempts, .. }) => {
                counter!("stock_ledger.contention_failures", 1, "operation" => operation);
                warn!(%stock_record_id, attempts, operation, "Gave up on contended stock record");
            }
            Err(ServiceError::InvalidState(message)) => {
                counter!("stock_ledger.invariant_defects", 1, "operation" => operation);
                error!(%stock_record_id, operation, "Stock invariant violated: {}", message);
            }
            _ => {}
        }

        result
    }
}

pub(crate) async fn find_stock_record<C: ConnectionTrait>(
    conn: &C,
    stock_record_id: Uuid,
) -> Result<stock_record::Model, ServiceError> {
    StockRecord::find_by_id(stock_record_id)
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::NotFound(format!("Stock record {} not found", stock_record_id)))
}

/// Inserts a zero-quantity record. Callers creating a product pass their
/// transaction so both rows commit together.
pub(crate) async fn insert_empty_stock_record<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
    location: String,
) -> Result<stock_record::Model, ServiceError> {
    let existing = StockRecord::find()
        .filter(stock_record::Column::ProductId.eq(product_id))
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?;
    if existing.is_some() {
        return Err(ServiceError::Conflict(format!(
            "Product {} already has a stock record",
            product_id
        )));
    }

    let now = Utc::now();
    stock_record::ActiveModel {
        id: Set(Uuid::new_v4()),
        product_id: Set(product_id),
        quantity_on_hand: Set(0),
        quantity_reserved: Set(0),
        location: Set(location),
        lot: Set(None),
        version: Set(1),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(conn)
    .await
    .map_err(|e| unique_violation_as_conflict(e, product_id))
}

fn unique_violation_as_conflict(err: DbErr, product_id: Uuid) -> ServiceError {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(_)) => ServiceError::Conflict(format!(
            "Product {} already has a stock record",
            product_id
        )),
        _ => ServiceError::db_error(err),
    }
}

/// Writes `levels` only if nobody else has written the record since it was
/// read. Zero affected rows means the version moved on.
pub(crate) async fn write_levels<C: ConnectionTrait>(
    conn: &C,
    record: &stock_record::Model,
    levels: StockLevels,
) -> Result<stock_record::Model, ServiceError> {
    let now = Utc::now();
    let next_version = record.version.wrapping_add(1);

    let result = StockRecord::update_many()
        .col_expr(
            stock_record::Column::QuantityOnHand,
            Expr::value(levels.on_hand()),
        )
        .col_expr(
            stock_record::Column::QuantityReserved,
            Expr::value(levels.reserved()),
        )
        .col_expr(stock_record::Column::Version, Expr::value(next_version))
        .col_expr(stock_record::Column::UpdatedAt, Expr::value(now))
        .filter(stock_record::Column::Id.eq(record.id))
        .filter(stock_record::Column::Version.eq(record.version))
        .exec(conn)
        .await
        .map_err(ServiceError::db_error)?;

    if result.rows_affected == 0 {
        return Err(ServiceError::ConcurrentModification(record.id));
    }

    Ok(stock_record::Model {
        quantity_on_hand: levels.on_hand(),
        quantity_reserved: levels.reserved(),
        version: next_version,
        updated_at: now,
        ..record.clone()
    })
}

async fn insert_movement<C: ConnectionTrait>(
    conn: &C,
    record: &stock_record::Model,
    draft: MovementDraft,
    transition: &StockTransition,
    reason: String,
    details: &MovementDetails,
) -> Result<movement::Model, ServiceError> {
    movement::ActiveModel {
        id: Set(Uuid::new_v4()),
        stock_record_id: Set(record.id),
        movement_type: Set(draft.movement_type),
        quantity: Set(draft.quantity),
        reason: Set(reason),
        user_id: Set(details.user_id),
        unit_price: Set(details.unit_price),
        previous_quantity: Set(transition.before.on_hand()),
        new_quantity: Set(transition.after.on_hand()),
        created_at: Set(Utc::now()),
    }
    .insert(conn)
    .await
    .map_err(ServiceError::db_error)
}

fn movement_reason(reason: &str, mutation: StockMutation, transition: &StockTransition) -> String {
    let mut text = match mutation {
        StockMutation::Adjust { .. } => format!(
            "Adjustment: {} (from {} to {})",
            reason,
            transition.before.on_hand(),
            transition.after.on_hand()
        ),
        _ => reason.to_string(),
    };
    if transition.reservation_trimmed > 0 {
        text.push_str(&format!(
            "; reservation trimmed by {}",
            transition.reservation_trimmed
        ));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{establish_connection_with_config, run_migrations, DbConfig};
    use crate::entities::product;
    use assert_matches::assert_matches;

    async fn setup() -> (Arc<DbPool>, stock_record::Model) {
        let pool = establish_connection_with_config(&DbConfig::single_connection("sqlite::memory:"))
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();

        let product_id = Uuid::new_v4();
        product::ActiveModel {
            id: Set(product_id),
            company_id: Set(None),
            code: Set("SKU-CAS".into()),
            name: Set("Version guarded".into()),
            stock_minimum: Set(0),
            created_at: Set(Utc::now()),
        }
        .insert(&pool)
        .await
        .unwrap();

        let record = insert_empty_stock_record(&pool, product_id, String::new())
            .await
            .unwrap();
        (Arc::new(pool), record)
    }

    #[tokio::test]
    async fn stale_version_write_is_rejected() {
        let (pool, stale) = setup().await;

        let fresh = write_levels(pool.as_ref(), &stale, StockLevels::new(10, 0).unwrap())
            .await
            .unwrap();
        assert_eq!(fresh.version, stale.version + 1);

        let lost = write_levels(pool.as_ref(), &stale, StockLevels::new(99, 0).unwrap()).await;
        assert_matches!(lost, Err(ServiceError::ConcurrentModification(id)) if id == stale.id);

        let stored = find_stock_record(pool.as_ref(), stale.id).await.unwrap();
        assert_eq!(stored.quantity_on_hand, 10);
        assert_eq!(stored.version, fresh.version);
    }

    #[tokio::test]
    async fn second_stock_record_for_product_conflicts() {
        let (pool, record) = setup().await;
        let again = insert_empty_stock_record(pool.as_ref(), record.product_id, String::new()).await;
        assert_matches!(again, Err(ServiceError::Conflict(_)));
    }

    #[tokio::test]
    async fn contention_is_reported_after_the_attempt_budget() {
        let (pool, record) = setup().await;
        let service = StockLedgerService::new(
            pool,
            LedgerSettings {
                max_attempts: 3,
                retry_backoff: std::time::Duration::from_millis(1),
                ..LedgerSettings::default()
            },
        );

        let calls = AtomicU32::new(0);
        let result: Result<(), ServiceError> = service
            .run_guarded(record.id, "test", || {
                calls.fetch_add(1, Ordering::Relaxed);
                async { Err(ServiceError::ConcurrentModification(record.id)) }
            })
            .await;

        assert_matches!(
            result,
            Err(ServiceError::Contention { attempts: 3, stock_record_id }) if stock_record_id == record.id
        );
        assert_eq!(calls.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn operation_timeout_is_reported_as_contention() {
        let (pool, record) = setup().await;
        let service = StockLedgerService::new(
            pool,
            LedgerSettings {
                operation_timeout: std::time::Duration::from_millis(20),
                ..LedgerSettings::default()
            },
        );

        let result: Result<(), ServiceError> = service
            .run_guarded(record.id, "test", || async {
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        assert_matches!(result, Err(ServiceError::Contention { attempts: 1, .. }));
    }

    #[test]
    fn adjustment_reason_records_both_quantities_and_trim() {
        let before = StockLevels::new(20, 20).unwrap();
        let mutation = StockMutation::Adjust { new_quantity: 15 };
        let transition = before.apply(mutation).unwrap();
        assert_eq!(
            movement_reason("cycle count", mutation, &transition),
            "Adjustment: cycle count (from 20 to 15); reservation trimmed by 5"
        );

        let entry = StockMutation::Entry { quantity: 3 };
        let transition = before.apply(entry).unwrap();
        assert_eq!(movement_reason("PO-7", entry, &transition), "PO-7");
    }
}
