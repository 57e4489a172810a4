use crate::{
    db::DbPool,
    domain::CreateProductRequest,
    entities::product::{self, Entity as Product},
    errors::ServiceError,
    services::stock_ledger::{insert_empty_stock_record, StockLedgerService, StockView},
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set, TransactionError,
    TransactionTrait,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Serialize)]
pub struct ProductWithStock {
    pub product: product::Model,
    pub stock: StockView,
}

/// Minimal product catalog: just enough to bind stock records to products.
pub struct ProductCatalogService {
    db_pool: Arc<DbPool>,
    ledger: Arc<StockLedgerService>,
}

impl ProductCatalogService {
    pub fn new(db_pool: Arc<DbPool>, ledger: Arc<StockLedgerService>) -> Self {
        Self { db_pool, ledger }
    }

    /// Inserts the product and its empty stock record in one transaction.
    #[instrument(skip(self, request), fields(code = %request.code))]
    pub async fn create_product(
        &self,
        request: CreateProductRequest,
    ) -> Result<ProductWithStock, ServiceError> {
        request.validate()?;

        let db = self.db_pool.as_ref();
        let location = request
            .location
            .clone()
            .unwrap_or_else(|| self.ledger.settings().default_location.clone());

        let created = db
            .transaction::<_, ProductWithStock, ServiceError>(move |txn| {
                Box::pin(async move {
                    let code = request.code.trim().to_string();
                    let duplicate = Product::find()
                        .filter(product::Column::Code.eq(code.clone()))
                        .one(txn)
                        .await
                        .map_err(ServiceError::db_error)?;
                    if duplicate.is_some() {
                        return Err(ServiceError::Conflict(format!(
                            "Product code {} is already in use",
                            code
                        )));
                    }

                    let product = product::ActiveModel {
                        id: Set(Uuid::new_v4()),
                        company_id: Set(request.company_id),
                        code: Set(code),
                        name: Set(request.name.trim().to_string()),
                        stock_minimum: Set(request.stock_minimum),
                        created_at: Set(Utc::now()),
                    }
                    .insert(txn)
                    .await
                    .map_err(ServiceError::db_error)?;

                    let stock = insert_empty_stock_record(txn, product.id, location).await?;

                    Ok(ProductWithStock {
                        product,
                        stock: stock.into(),
                    })
                })
            })
            .await
            .map_err(|e| match e {
                TransactionError::Connection(db_err) => ServiceError::db_error(db_err),
                TransactionError::Transaction(service_err) => service_err,
            })?;

        info!(
            product_id = %created.product.id,
            stock_record_id = %created.stock.record.id,
            "Product created with empty stock record"
        );
        Ok(created)
    }

    pub async fn get_product(&self, product_id: Uuid) -> Result<product::Model, ServiceError> {
        Product::find_by_id(product_id)
            .one(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))
    }

    #[instrument(skip(self))]
    pub async fn set_stock_minimum(
        &self,
        product_id: Uuid,
        stock_minimum: i32,
    ) -> Result<product::Model, ServiceError> {
        if stock_minimum < 0 {
            return Err(ServiceError::ValidationError(format!(
                "stock_minimum cannot be negative (got {})",
                stock_minimum
            )));
        }

        let existing = self.get_product(product_id).await?;
        let mut active: product::ActiveModel = existing.into();
        active.stock_minimum = Set(stock_minimum);
        let updated = active
            .update(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)?;

        info!(%product_id, stock_minimum, "Stock minimum updated");
        Ok(updated)
    }
}
