use std::{str::FromStr, sync::Arc};

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use rust_decimal::Decimal;
use serde::Serialize;
use stock_ledger::{
    config::{self, AppConfig},
    db::{self, DbPool},
    domain::{AdjustmentRequest, CreateProductRequest, LocationUpdate, MovementRequest},
    entities::{movement, MovementType},
    services::{
        stock_ledger::{LedgerOutcome, StockView},
        stock_queries::{MovementFilter, StockStatusEntry},
        StockServices,
    },
};
use tracing::debug;
use uuid::Uuid;

const RECENT_MOVEMENTS_SHOWN: u64 = 10;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let context = CliContext::initialize().await?;

    match cli.command {
        Commands::Migrate => {
            db::run_migrations(&context.db)
                .await
                .context("failed to run migrations")?;
            println!("Migrations applied");
        }
        Commands::Product(command) => handle_product_command(&context, command, cli.json).await?,
        Commands::Stock(command) => handle_stock_command(&context, command, cli.json).await?,
        Commands::Report(command) => handle_report_command(&context, command, cli.json).await?,
    }

    Ok(())
}

#[derive(Parser)]
#[command(
    name = "stock-admin",
    about = "Operator CLI for stock records and the movement ledger",
    version
)]
struct Cli {
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Render command output as pretty JSON"
    )]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending database migrations
    Migrate,
    #[command(subcommand)]
    Product(ProductCommands),
    #[command(subcommand)]
    Stock(StockCommands),
    #[command(subcommand)]
    Report(ReportCommands),
}

#[derive(Subcommand)]
enum ProductCommands {
    Create(CreateProductArgs),
    Show(ProductIdArgs),
    SetMinimum(SetMinimumArgs),
}

#[derive(Subcommand)]
enum StockCommands {
    Show(ShowStockArgs),
    Entry(MovementArgs),
    Exit(ExitArgs),
    Return(MovementArgs),
    Reserve(ReservationArgs),
    Release(ReservationArgs),
    Adjust(AdjustArgs),
    Locate(LocateArgs),
    Movements(MovementsArgs),
    Reconcile(StockIdArgs),
}

#[derive(Subcommand)]
enum ReportCommands {
    LowStock(ScopeArgs),
    OutOfStock(ScopeArgs),
    Totals(ScopeArgs),
    Status(ScopeArgs),
}

#[derive(Args)]
struct CreateProductArgs {
    #[arg(long, help = "Unique product code")]
    code: String,
    #[arg(long, help = "Display name for the product")]
    name: String,
    #[arg(long, help = "Owning company")]
    company: Option<Uuid>,
    #[arg(long, default_value_t = 0, help = "Available quantity that triggers restocking")]
    stock_minimum: i32,
    #[arg(long, help = "Storage location of the new stock record")]
    location: Option<String>,
}

#[derive(Args)]
struct ProductIdArgs {
    product_id: Uuid,
}

#[derive(Args)]
struct SetMinimumArgs {
    product_id: Uuid,
    #[arg(long, allow_negative_numbers = true)]
    minimum: i32,
}

#[derive(Args)]
struct StockIdArgs {
    stock_record_id: Uuid,
}

#[derive(Args)]
struct ShowStockArgs {
    #[arg(required_unless_present = "product")]
    stock_record_id: Option<Uuid>,
    #[arg(long, conflicts_with = "stock_record_id", help = "Look the record up by product")]
    product: Option<Uuid>,
}

#[derive(Args)]
struct MovementArgs {
    stock_record_id: Uuid,
    #[arg(long, allow_negative_numbers = true)]
    quantity: i32,
    #[arg(long, help = "Why the stock moved")]
    reason: String,
    #[arg(long, help = "Acting user")]
    user: Option<Uuid>,
    #[arg(long, value_parser = parse_decimal, help = "Unit price of the moved goods")]
    unit_price: Option<Decimal>,
}

impl MovementArgs {
    fn into_request(self) -> MovementRequest {
        MovementRequest {
            stock_record_id: self.stock_record_id,
            quantity: self.quantity,
            reason: self.reason,
            user_id: self.user,
            unit_price: self.unit_price,
        }
    }
}

#[derive(Args)]
struct ExitArgs {
    #[command(flatten)]
    movement: MovementArgs,
    #[arg(long, action = ArgAction::SetTrue, help = "Ignore reservations (on-hand still cannot go negative)")]
    force: bool,
}

#[derive(Args)]
struct ReservationArgs {
    stock_record_id: Uuid,
    #[arg(long, allow_negative_numbers = true)]
    quantity: i32,
}

#[derive(Args)]
struct AdjustArgs {
    stock_record_id: Uuid,
    #[arg(long = "to", allow_negative_numbers = true, help = "Counted on-hand quantity")]
    new_quantity: i32,
    #[arg(long)]
    reason: String,
    #[arg(long)]
    user: Option<Uuid>,
}

#[derive(Args)]
struct LocateArgs {
    stock_record_id: Uuid,
    #[arg(long)]
    location: String,
    #[arg(long)]
    lot: Option<String>,
}

#[derive(Args)]
struct MovementsArgs {
    stock_record_id: Option<Uuid>,
    #[arg(long)]
    product: Option<Uuid>,
    #[arg(long = "type", value_parser = parse_movement_type)]
    movement_type: Option<MovementType>,
    #[arg(long, default_value_t = 1)]
    page: u64,
    #[arg(long, default_value_t = 20)]
    limit: u64,
}

#[derive(Args)]
struct ScopeArgs {
    #[arg(long, help = "Restrict to one company")]
    company: Option<Uuid>,
}

struct CliContext {
    _config: AppConfig,
    db: Arc<DbPool>,
    services: StockServices,
}

impl CliContext {
    async fn initialize() -> Result<Self> {
        let config = config::load_config().context("failed to load application config")?;
        config::init_tracing(config.log_level(), config.log_json);

        let db_pool = db::establish_connection_from_app_config(&config)
            .await
            .context("failed to connect to database")?;
        if config.auto_migrate {
            db::run_migrations(&db_pool)
                .await
                .context("failed to run migrations")?;
        }
        let db = Arc::new(db_pool);
        debug!("CLI context initialised");

        let services = StockServices::new(db.clone(), config.ledger_settings());
        Ok(Self {
            _config: config,
            db,
            services,
        })
    }
}

async fn handle_product_command(
    context: &CliContext,
    command: ProductCommands,
    json: bool,
) -> Result<()> {
    let catalog = &context.services.catalog;
    match command {
        ProductCommands::Create(args) => {
            let created = catalog
                .create_product(CreateProductRequest {
                    company_id: args.company,
                    code: args.code,
                    name: args.name,
                    stock_minimum: args.stock_minimum,
                    location: args.location,
                })
                .await
                .context("failed to create product")?;
            if json {
                print_json(&created)?;
            } else {
                println!(
                    "Created product {} ({}) with stock record {}",
                    created.product.code, created.product.id, created.stock.record.id
                );
            }
        }
        ProductCommands::Show(args) => {
            let product = catalog
                .get_product(args.product_id)
                .await
                .context("failed to load product")?;
            if json {
                print_json(&product)?;
            } else {
                println!(
                    "- Product {} • {} • code {} • minimum {}",
                    product.id, product.name, product.code, product.stock_minimum
                );
            }
        }
        ProductCommands::SetMinimum(args) => {
            let product = catalog
                .set_stock_minimum(args.product_id, args.minimum)
                .await
                .context("failed to update stock minimum")?;
            if json {
                print_json(&product)?;
            } else {
                println!("Stock minimum of {} set to {}", product.code, product.stock_minimum);
            }
        }
    }
    Ok(())
}

async fn handle_stock_command(
    context: &CliContext,
    command: StockCommands,
    json: bool,
) -> Result<()> {
    let ledger = &context.services.ledger;
    let queries = &context.services.queries;

    match command {
        StockCommands::Show(args) => {
            let stock = if let Some(id) = args.stock_record_id {
                ledger.get_stock(id).await
            } else if let Some(product_id) = args.product {
                ledger.get_stock_by_product(product_id).await
            } else {
                anyhow::bail!("either a stock record id or --product is required");
            }
            .context("failed to load stock record")?;
            let recent = queries
                .recent_movements(stock.record.id, RECENT_MOVEMENTS_SHOWN)
                .await
                .context("failed to load recent movements")?;

            if json {
                print_json(&serde_json::json!({ "stock": stock, "recent_movements": recent }))?;
            } else {
                render_stock(&stock);
                for movement in &recent {
                    render_movement(movement);
                }
            }
        }
        StockCommands::Entry(args) => {
            let outcome = ledger
                .register_entry(args.into_request())
                .await
                .context("failed to register entry")?;
            render_outcome(&outcome, json)?;
        }
        StockCommands::Exit(args) => {
            let outcome = ledger
                .register_exit(args.movement.into_request(), !args.force)
                .await
                .context("failed to register exit")?;
            render_outcome(&outcome, json)?;
        }
        StockCommands::Return(args) => {
            let outcome = ledger
                .register_return(args.into_request())
                .await
                .context("failed to register return")?;
            render_outcome(&outcome, json)?;
        }
        StockCommands::Reserve(args) => {
            let stock = ledger
                .reserve(args.stock_record_id, args.quantity)
                .await
                .context("failed to reserve stock")?;
            render_stock_or_json(&stock, json)?;
        }
        StockCommands::Release(args) => {
            let stock = ledger
                .release_reservation(args.stock_record_id, args.quantity)
                .await
                .context("failed to release reservation")?;
            render_stock_or_json(&stock, json)?;
        }
        StockCommands::Adjust(args) => {
            let request = AdjustmentRequest {
                stock_record_id: args.stock_record_id,
                new_quantity: args.new_quantity,
                reason: args.reason,
                user_id: args.user,
            };
            let outcome = ledger
                .adjust(request)
                .await
                .context("failed to adjust stock")?;
            render_outcome(&outcome, json)?;
        }
        StockCommands::Locate(args) => {
            let stock = ledger
                .set_location(LocationUpdate {
                    stock_record_id: args.stock_record_id,
                    location: args.location,
                    lot: args.lot,
                })
                .await
                .context("failed to update location")?;
            render_stock_or_json(&stock, json)?;
        }
        StockCommands::Movements(args) => {
            let filter = MovementFilter {
                stock_record_id: args.stock_record_id,
                product_id: args.product,
                movement_type: args.movement_type,
            };
            let page = queries
                .movement_history(filter, args.page, args.limit)
                .await
                .context("failed to load movement history")?;
            if json {
                print_json(&page)?;
            } else {
                println!(
                    "Page {} ({} per page) of {} movement(s)",
                    page.page, page.limit, page.total
                );
                for movement in &page.movements {
                    render_movement(movement);
                }
            }
        }
        StockCommands::Reconcile(args) => {
            let report = queries
                .reconcile(args.stock_record_id)
                .await
                .context("failed to reconcile stock record")?;
            if json {
                print_json(&report)?;
            } else {
                println!(
                    "Stock record {}: recorded {}, replayed {} from {} movement(s) • {}",
                    report.stock_record_id,
                    report.recorded_on_hand,
                    report.replayed_on_hand,
                    report.movement_count,
                    if report.consistent { "consistent" } else { "MISMATCH" }
                );
            }
        }
    }
    Ok(())
}

async fn handle_report_command(
    context: &CliContext,
    command: ReportCommands,
    json: bool,
) -> Result<()> {
    let queries = &context.services.queries;
    match command {
        ReportCommands::LowStock(args) => {
            let entries = queries
                .list_low_stock(args.company)
                .await
                .context("failed to list low stock")?;
            render_entries(&entries, json)?;
        }
        ReportCommands::OutOfStock(args) => {
            let entries = queries
                .list_out_of_stock(args.company)
                .await
                .context("failed to list out-of-stock records")?;
            render_entries(&entries, json)?;
        }
        ReportCommands::Totals(args) => {
            let totals = queries
                .aggregate_totals(args.company)
                .await
                .context("failed to aggregate totals")?;
            if json {
                print_json(&totals)?;
            } else {
                println!(
                    "{} record(s) • on hand {} • reserved {} • available {} • low {} • out {}",
                    totals.total_records,
                    totals.total_on_hand,
                    totals.total_reserved,
                    totals.total_available,
                    totals.low_stock_count,
                    totals.out_of_stock_count
                );
            }
        }
        ReportCommands::Status(args) => {
            let report = queries
                .stock_report(args.company)
                .await
                .context("failed to build stock report")?;
            if json {
                print_json(&report)?;
            } else {
                println!("Stock report generated at {}", report.generated_at);
                render_entries(&report.entries, false)?;
            }
        }
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn render_stock(stock: &StockView) {
    let record = &stock.record;
    println!(
        "- Stock {} • product {} • on hand {} • reserved {} • available {} • location '{}'{}",
        record.id,
        record.product_id,
        record.quantity_on_hand,
        record.quantity_reserved,
        stock.quantity_available,
        record.location,
        record
            .lot
            .as_deref()
            .map(|lot| format!(" • lot {}", lot))
            .unwrap_or_default()
    );
}

fn render_stock_or_json(stock: &StockView, json: bool) -> Result<()> {
    if json {
        print_json(stock)
    } else {
        render_stock(stock);
        Ok(())
    }
}

fn render_movement(movement: &movement::Model) {
    println!(
        "  • {} {} x{} ({} -> {}) • {} • value {}",
        movement.created_at.format("%Y-%m-%d %H:%M:%S"),
        movement.movement_type,
        movement.quantity,
        movement.previous_quantity,
        movement.new_quantity,
        movement.reason,
        movement.total_value()
    );
}

fn render_outcome(outcome: &LedgerOutcome, json: bool) -> Result<()> {
    if json {
        return print_json(outcome);
    }
    render_stock(&outcome.stock);
    match &outcome.movement {
        Some(movement) => render_movement(movement),
        None => println!("  • quantity unchanged, no movement recorded"),
    }
    Ok(())
}

fn render_entries(entries: &[StockStatusEntry], json: bool) -> Result<()> {
    if json {
        return print_json(&entries);
    }
    if entries.is_empty() {
        println!("No stock records match");
    }
    for entry in entries {
        println!(
            "- {} {} • available {} • minimum {} • {}",
            entry.product_code,
            entry.product_name,
            entry.stock.quantity_available,
            entry.stock_minimum,
            entry.status
        );
    }
    Ok(())
}

fn parse_decimal(raw: &str) -> Result<Decimal, String> {
    Decimal::from_str(raw).map_err(|_| format!("invalid decimal '{raw}'"))
}

fn parse_movement_type(raw: &str) -> Result<MovementType, String> {
    MovementType::from_str(&raw.to_ascii_lowercase())
        .map_err(|_| format!("invalid movement type '{raw}' (entry, exit, adjustment, return)"))
}
