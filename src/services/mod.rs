// Stock mutation engine: the only writer of stock quantities
pub mod stock_ledger;

// Read-only projections
pub mod stock_queries;

// Minimal product catalog
pub mod catalog;

use crate::{config::LedgerSettings, db::DbPool};
use std::sync::Arc;

/// The services sharing one connection pool.
#[derive(Clone)]
pub struct StockServices {
    pub ledger: Arc<stock_ledger::StockLedgerService>,
    pub queries: Arc<stock_queries::StockQueryService>,
    pub catalog: Arc<catalog::ProductCatalogService>,
}

impl StockServices {
    pub fn new(db_pool: Arc<DbPool>, settings: LedgerSettings) -> Self {
        let ledger = Arc::new(stock_ledger::StockLedgerService::new(
            db_pool.clone(),
            settings,
        ));
        Self {
            queries: Arc::new(stock_queries::StockQueryService::new(db_pool.clone())),
            catalog: Arc::new(catalog::ProductCatalogService::new(db_pool, ledger.clone())),
            ledger,
        }
    }
}
