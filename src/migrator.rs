use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240601_000001_create_products_table::Migration),
            Box::new(m20240601_000002_create_stock_records_table::Migration),
            Box::new(m20240601_000003_create_movements_table::Migration),
        ]
    }
}

mod m20240601_000001_create_products_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000001_create_products_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Products::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Products::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Products::CompanyId).uuid().null())
                        .col(
                            ColumnDef::new(Products::Code)
                                .string_len(50)
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Products::Name).string_len(200).not_null())
                        .col(
                            ColumnDef::new(Products::StockMinimum)
                                .integer()
                                .not_null()
                                .default(0)
                                .check(Expr::col(Products::StockMinimum).gte(0)),
                        )
                        .col(
                            ColumnDef::new(Products::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_products_company_id")
                        .table(Products::Table)
                        .col(Products::CompanyId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Products::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub enum Products {
        Table,
        Id,
        CompanyId,
        Code,
        Name,
        StockMinimum,
        CreatedAt,
    }
}

mod m20240601_000002_create_stock_records_table {

    use super::m20240601_000001_create_products_table::Products;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000002_create_stock_records_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(StockRecords::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(StockRecords::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockRecords::ProductId)
                                .uuid()
                                .not_null()
                                .unique_key(),
                        )
                        .col(
                            ColumnDef::new(StockRecords::QuantityOnHand)
                                .integer()
                                .not_null()
                                .default(0)
                                .check(Expr::col(StockRecords::QuantityOnHand).gte(0)),
                        )
                        .col(
                            ColumnDef::new(StockRecords::QuantityReserved)
                                .integer()
                                .not_null()
                                .default(0)
                                .check(Expr::col(StockRecords::QuantityReserved).gte(0)),
                        )
                        .col(
                            ColumnDef::new(StockRecords::Location)
                                .string_len(100)
                                .not_null()
                                .default(""),
                        )
                        .col(ColumnDef::new(StockRecords::Lot).string_len(100).null())
                        .col(
                            ColumnDef::new(StockRecords::Version)
                                .integer()
                                .not_null()
                                .default(1),
                        )
                        .col(
                            ColumnDef::new(StockRecords::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockRecords::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_stock_records_product_id")
                                .from(StockRecords::Table, StockRecords::ProductId)
                                .to(Products::Table, Products::Id)
                                .on_delete(ForeignKeyAction::Restrict)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(StockRecords::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub enum StockRecords {
        Table,
        Id,
        ProductId,
        QuantityOnHand,
        QuantityReserved,
        Location,
        Lot,
        Version,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240601_000003_create_movements_table {

    use super::m20240601_000002_create_stock_records_table::StockRecords;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000003_create_movements_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Movements::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Movements::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Movements::StockRecordId).uuid().not_null())
                        .col(
                            ColumnDef::new(Movements::MovementType)
                                .string_len(20)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Movements::Quantity)
                                .integer()
                                .not_null()
                                .check(Expr::col(Movements::Quantity).gt(0)),
                        )
                        .col(ColumnDef::new(Movements::Reason).text().not_null())
                        .col(ColumnDef::new(Movements::UserId).uuid().null())
                        .col(
                            ColumnDef::new(Movements::UnitPrice)
                                .decimal_len(16, 4)
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Movements::PreviousQuantity)
                                .integer()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Movements::NewQuantity).integer().not_null())
                        .col(
                            ColumnDef::new(Movements::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_movements_stock_record_id")
                                .from(Movements::Table, Movements::StockRecordId)
                                .to(StockRecords::Table, StockRecords::Id)
                                .on_delete(ForeignKeyAction::Restrict)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_movements_stock_record_created_at")
                        .table(Movements::Table)
                        .col(Movements::StockRecordId)
                        .col(Movements::CreatedAt)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_movements_movement_type")
                        .table(Movements::Table)
                        .col(Movements::MovementType)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Movements::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Movements {
        Table,
        Id,
        StockRecordId,
        MovementType,
        Quantity,
        Reason,
        UserId,
        UnitPrice,
        PreviousQuantity,
        NewQuantity,
        CreatedAt,
    }
}
