#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use stock_ledger::{
    config::LedgerSettings,
    db::{self, DbConfig, DbPool},
    domain::{CreateProductRequest, MovementRequest},
    services::{catalog::ProductWithStock, stock_ledger::StockView, StockServices},
};
use tempfile::TempDir;
use uuid::Uuid;

/// Services over a fresh, migrated SQLite database.
pub struct TestLedger {
    pub db: Arc<DbPool>,
    pub services: StockServices,
    // keeps a file-backed database alive for the lifetime of the harness
    _dir: Option<TempDir>,
}

impl TestLedger {
    pub async fn new() -> Self {
        Self::with_settings(LedgerSettings {
            retry_backoff: Duration::from_millis(1),
            ..LedgerSettings::default()
        })
        .await
    }

    pub async fn with_settings(settings: LedgerSettings) -> Self {
        // one connection: every sqlite::memory: connection is its own database
        Self::open(DbConfig::single_connection("sqlite::memory:"), settings, None).await
    }

    /// A temp-file database behind a pool of `connections`, so concurrent
    /// operations really overlap.
    pub async fn on_file(connections: u32, settings: LedgerSettings) -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("ledger.db").display());
        let config = DbConfig {
            url,
            max_connections: connections,
            min_connections: 1,
            ..DbConfig::default()
        };
        Self::open(config, settings, Some(dir)).await
    }

    async fn open(config: DbConfig, settings: LedgerSettings, dir: Option<TempDir>) -> Self {
        let pool = db::establish_connection_with_config(&config)
            .await
            .expect("failed to open test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations");

        let db = Arc::new(pool);
        let services = StockServices::new(db.clone(), settings);
        Self {
            db,
            services,
            _dir: dir,
        }
    }

    pub async fn create_product(&self, code: &str, stock_minimum: i32) -> ProductWithStock {
        self.create_product_for(None, code, stock_minimum).await
    }

    pub async fn create_product_for(
        &self,
        company_id: Option<Uuid>,
        code: &str,
        stock_minimum: i32,
    ) -> ProductWithStock {
        self.services
            .catalog
            .create_product(CreateProductRequest {
                company_id,
                code: code.to_string(),
                name: format!("Product {code}"),
                stock_minimum,
                location: None,
            })
            .await
            .expect("failed to create product")
    }

    /// Creates a product and brings its on-hand quantity to `on_hand`.
    pub async fn stocked_product(&self, code: &str, stock_minimum: i32, on_hand: i32) -> Uuid {
        let created = self.create_product(code, stock_minimum).await;
        let stock_id = created.stock.record.id;
        if on_hand > 0 {
            self.entry(stock_id, on_hand).await;
        }
        stock_id
    }

    pub async fn entry(&self, stock_record_id: Uuid, quantity: i32) -> StockView {
        self.services
            .ledger
            .register_entry(MovementRequest::new(stock_record_id, quantity, "restock"))
            .await
            .expect("entry failed")
            .stock
    }

    pub async fn stock(&self, stock_record_id: Uuid) -> StockView {
        self.services
            .ledger
            .get_stock(stock_record_id)
            .await
            .expect("stock record missing")
    }
}
