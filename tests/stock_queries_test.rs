mod common;

use assert_matches::assert_matches;
use chrono::Utc;
use common::TestLedger;
use sea_orm::{ActiveModelTrait, Set};
use stock_ledger::{
    domain::{AdjustmentRequest, MovementRequest},
    entities::{movement, MovementType},
    errors::ServiceError,
    services::stock_queries::{MovementFilter, StockStatus},
};
use uuid::Uuid;

#[tokio::test]
async fn low_stock_threshold_is_inclusive() {
    let ledger = TestLedger::new().await;
    let at_minimum = ledger.stocked_product("A-AT", 5, 5).await;
    let above = ledger.stocked_product("B-ABOVE", 5, 6).await;
    let empty = ledger.stocked_product("C-EMPTY", 5, 0).await;

    let low = ledger.services.queries.list_low_stock(None).await.unwrap();
    let ids: Vec<Uuid> = low.iter().map(|e| e.stock.record.id).collect();
    assert_eq!(ids, vec![at_minimum, empty]);
    assert_eq!(low[0].status, StockStatus::Low);
    assert_eq!(low[1].status, StockStatus::OutOfStock);
    assert!(!ids.contains(&above));
}

#[tokio::test]
async fn reservations_count_against_availability() {
    let ledger = TestLedger::new().await;
    let stock_id = ledger.stocked_product("RES", 2, 10).await;
    ledger.services.ledger.reserve(stock_id, 10).await.unwrap();

    let out = ledger
        .services
        .queries
        .list_out_of_stock(None)
        .await
        .unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].stock.record.quantity_on_hand, 10);
    assert_eq!(out[0].stock.quantity_available, 0);
}

#[tokio::test]
async fn aggregate_totals_cover_every_record() {
    let ledger = TestLedger::new().await;
    let a = ledger.stocked_product("T-A", 3, 20).await;
    ledger.stocked_product("T-B", 3, 2).await;
    ledger.stocked_product("T-C", 0, 0).await;
    ledger.services.ledger.reserve(a, 5).await.unwrap();

    let totals = ledger.services.queries.aggregate_totals(None).await.unwrap();
    assert_eq!(totals.total_on_hand, 22);
    assert_eq!(totals.total_reserved, 5);
    assert_eq!(totals.total_available, 17);
    assert_eq!(totals.low_stock_count, 2);
    assert_eq!(totals.out_of_stock_count, 1);
    assert_eq!(totals.total_records, 3);
}

#[tokio::test]
async fn company_scope_filters_queries() {
    let ledger = TestLedger::new().await;
    let acme = Uuid::new_v4();
    let globex = Uuid::new_v4();

    ledger.create_product_for(Some(acme), "ACME-1", 1).await;
    let globex_product = ledger.create_product_for(Some(globex), "GLOBEX-1", 1).await;
    ledger.entry(globex_product.stock.record.id, 50).await;

    let acme_low = ledger
        .services
        .queries
        .list_low_stock(Some(acme))
        .await
        .unwrap();
    assert_eq!(acme_low.len(), 1);
    assert_eq!(acme_low[0].product_code, "ACME-1");

    let globex_totals = ledger
        .services
        .queries
        .aggregate_totals(Some(globex))
        .await
        .unwrap();
    assert_eq!(globex_totals.total_records, 1);
    assert_eq!(globex_totals.total_on_hand, 50);
    assert_eq!(globex_totals.low_stock_count, 0);

    let report = ledger.services.queries.stock_report(None).await.unwrap();
    assert_eq!(report.totals.total_records, 2);
    assert_eq!(report.entries.len(), 2);
}

#[tokio::test]
async fn movement_history_pages_newest_first() {
    let ledger = TestLedger::new().await;
    let stock_id = ledger.stocked_product("HIST", 0, 10).await;
    let service = &ledger.services.ledger;
    service
        .register_exit(MovementRequest::new(stock_id, 3, "sale"), true)
        .await
        .unwrap();
    service
        .register_return(MovementRequest::new(stock_id, 1, "return"))
        .await
        .unwrap();
    service
        .adjust(AdjustmentRequest::new(stock_id, 6, "count"))
        .await
        .unwrap();

    let filter = MovementFilter {
        stock_record_id: Some(stock_id),
        ..Default::default()
    };
    let first_page = ledger
        .services
        .queries
        .movement_history(filter.clone(), 1, 3)
        .await
        .unwrap();
    assert_eq!(first_page.total, 4);
    let types: Vec<MovementType> = first_page
        .movements
        .iter()
        .map(|m| m.movement_type)
        .collect();
    assert_eq!(
        types,
        vec![
            MovementType::Adjustment,
            MovementType::Return,
            MovementType::Exit
        ]
    );

    let second_page = ledger
        .services
        .queries
        .movement_history(filter, 2, 3)
        .await
        .unwrap();
    assert_eq!(second_page.movements.len(), 1);
    assert_eq!(second_page.movements[0].movement_type, MovementType::Entry);

    let exits = ledger
        .services
        .queries
        .movement_history(
            MovementFilter {
                movement_type: Some(MovementType::Exit),
                ..Default::default()
            },
            1,
            50,
        )
        .await
        .unwrap();
    assert_eq!(exits.total, 1);
}

#[tokio::test]
async fn movement_history_pages_are_stable_when_timestamps_tie() {
    let ledger = TestLedger::new().await;
    let created = ledger.create_product("TIE", 0).await;
    let stock_id = created.stock.record.id;

    let created_at = Utc::now();
    let mut ids = Vec::new();
    for step in 0..4 {
        let inserted = movement::ActiveModel {
            id: Set(Uuid::new_v4()),
            stock_record_id: Set(stock_id),
            movement_type: Set(MovementType::Entry),
            quantity: Set(1),
            reason: Set("bulk import".to_string()),
            user_id: Set(None),
            unit_price: Set(None),
            previous_quantity: Set(step),
            new_quantity: Set(step + 1),
            created_at: Set(created_at),
        }
        .insert(ledger.db.as_ref())
        .await
        .unwrap();
        ids.push(inserted.id);
    }
    ids.sort_unstable_by(|a, b| b.cmp(a));

    let filter = MovementFilter {
        stock_record_id: Some(stock_id),
        ..Default::default()
    };
    let mut paged = Vec::new();
    for page in 1..=4 {
        let result = ledger
            .services
            .queries
            .movement_history(filter.clone(), page, 1)
            .await
            .unwrap();
        assert_eq!(result.movements.len(), 1);
        paged.push(result.movements[0].id);
    }
    assert_eq!(paged, ids);

    let recent = ledger
        .services
        .queries
        .recent_movements(stock_id, 4)
        .await
        .unwrap();
    let recent_ids: Vec<Uuid> = recent.iter().map(|m| m.id).collect();
    assert_eq!(recent_ids, ids);
}

#[tokio::test]
async fn movement_history_filters_by_product() {
    let ledger = TestLedger::new().await;
    let wanted = ledger.create_product("P-WANTED", 0).await;
    let other = ledger.stocked_product("P-OTHER", 0, 4).await;
    ledger.entry(wanted.stock.record.id, 2).await;
    ledger.entry(other, 1).await;

    let page = ledger
        .services
        .queries
        .movement_history(
            MovementFilter {
                product_id: Some(wanted.product.id),
                ..Default::default()
            },
            1,
            10,
        )
        .await
        .unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.movements[0].stock_record_id, wanted.stock.record.id);
}

#[tokio::test]
async fn movement_history_rejects_bad_paging() {
    let ledger = TestLedger::new().await;
    let queries = &ledger.services.queries;

    assert_matches!(
        queries.movement_history(MovementFilter::default(), 0, 10).await,
        Err(ServiceError::ValidationError(_))
    );
    assert_matches!(
        queries.movement_history(MovementFilter::default(), 1, 0).await,
        Err(ServiceError::ValidationError(_))
    );
    assert_matches!(
        queries
            .movement_history(MovementFilter::default(), 1, 1001)
            .await,
        Err(ServiceError::ValidationError(_))
    );
}

#[tokio::test]
async fn recent_movements_are_capped() {
    let ledger = TestLedger::new().await;
    let stock_id = ledger.stocked_product("RECENT", 0, 1).await;
    for _ in 0..11 {
        ledger.entry(stock_id, 1).await;
    }

    let recent = ledger
        .services
        .queries
        .recent_movements(stock_id, 10)
        .await
        .unwrap();
    assert_eq!(recent.len(), 10);
    assert_eq!(recent[0].new_quantity, 12);

    assert_matches!(
        ledger
            .services
            .queries
            .recent_movements(Uuid::new_v4(), 10)
            .await,
        Err(ServiceError::NotFound(_))
    );
}

#[tokio::test]
async fn reconcile_replays_the_ledger() {
    let ledger = TestLedger::new().await;
    let stock_id = ledger.stocked_product("REC", 0, 30).await;
    let service = &ledger.services.ledger;
    service
        .register_exit(MovementRequest::new(stock_id, 12, "sale"), true)
        .await
        .unwrap();
    service
        .adjust(AdjustmentRequest::new(stock_id, 10, "count"))
        .await
        .unwrap();
    service
        .register_return(MovementRequest::new(stock_id, 2, "return"))
        .await
        .unwrap();

    let report = ledger.services.queries.reconcile(stock_id).await.unwrap();
    assert_eq!(report.recorded_on_hand, 12);
    assert_eq!(report.replayed_on_hand, 12);
    assert_eq!(report.movement_count, 4);
    assert!(report.consistent);

    assert_matches!(
        ledger.services.queries.reconcile(Uuid::new_v4()).await,
        Err(ServiceError::NotFound(_))
    );
}
