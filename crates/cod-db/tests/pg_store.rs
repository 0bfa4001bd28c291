//! Store tests against a live PostgreSQL.
//!
//! Skipped unless `DATABASE_URL` points at a scratch database.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};

use cod_amounts::Calculator;
use cod_batching::{BatchAggregator, CreateBatchRequest};
use cod_db::{Database, DatabaseConfig, PgCodStore};
use cod_store::{BatchFilter, ChangeSet, CodStore};
use cod_types::{
    BatchState, Carrier, CodError, CostInputs, DeliveryEvent, Money, SellerId, Shipment, ShipmentId,
};

async fn store() -> Option<PgCodStore> {
    let config = DatabaseConfig::from_env().ok()?;
    let db = Database::connect(&config).await.ok()?;
    db.migrate().await.ok()?;
    Some(db.cod_store(Calculator::default()))
}

async fn carrier(store: &PgCodStore) -> Carrier {
    let code = format!("T{}", &ShipmentId::new().0.simple().to_string()[..8]).to_uppercase();
    let carrier = Carrier::new(code, "Test carrier");
    store.upsert_carrier(carrier.clone()).await.unwrap();
    carrier
}

async fn delivered(store: &PgCodStore, carrier: &Carrier, goods: i64) -> ShipmentId {
    let mut shipment = Shipment::cod(
        format!("SO-{}", ShipmentId::new()),
        carrier.id.clone(),
        SellerId::new(),
        CostInputs {
            goods_value: Money::from(goods),
            shipping_cost: Money::from(10),
            company_service_cost: Money::from(15),
            company_base_cost: Money::from(15),
            include_services_in_cod: true,
        },
    );
    shipment
        .apply_delivery_event(DeliveryEvent::Delivered, Utc::now())
        .unwrap();
    store.save_shipment(shipment).await.unwrap().id
}

fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 16).unwrap()
}

#[tokio::test]
async fn test_shipment_round_trip_and_versions() {
    let Some(store) = store().await else {
        return;
    };
    let carrier = carrier(&store).await;
    let id = delivered(&store, &carrier, 100).await;

    let shipment = store.get_shipment(&id).await.unwrap();
    assert_eq!(shipment.version, 1);
    assert_eq!(shipment.amounts.declared_cod, Money::from(115));

    let saved = store.save_shipment(shipment.clone()).await.unwrap();
    assert_eq!(saved.version, 2);

    // the copy read at version 1 is stale now
    let stale = store.save_shipment(shipment).await;
    assert!(matches!(stale, Err(CodError::ConcurrentModification { .. })));
}

#[tokio::test]
async fn test_batch_lifecycle_with_claims() {
    let Some(store) = store().await else {
        return;
    };
    let store = Arc::new(store);
    let aggregator = BatchAggregator::new(store.clone());
    let carrier = carrier(&store).await;
    let first = delivered(&store, &carrier, 100).await;
    let second = delivered(&store, &carrier, 50).await;

    let batch = aggregator
        .create_batch(CreateBatchRequest::all_eligible(carrier.id.clone(), date()))
        .await
        .unwrap();
    assert_eq!(batch.name, format!("{}-20261016-001", carrier.code));
    assert_eq!(batch.shipment_ids, BTreeSet::from([first.clone(), second.clone()]));
    assert_eq!(batch.totals.expected_net_amount, Money::from(150 + 2 * 5));

    let again = aggregator
        .create_batch(CreateBatchRequest::with_shipments(
            carrier.id.clone(),
            date(),
            vec![first.clone()],
        ))
        .await;
    assert!(matches!(again, Err(CodError::ShipmentAlreadyBatched { .. })));

    let cancelled = aggregator.cancel_batch(&batch.id).await.unwrap();
    assert_eq!(cancelled.state, BatchState::Cancelled);
    assert!(store.claims(&[first.clone()]).await.unwrap().is_empty());

    let rebatched = aggregator
        .create_batch(CreateBatchRequest::all_eligible(carrier.id.clone(), date()))
        .await
        .unwrap();
    assert_eq!(rebatched.name, format!("{}-20261016-002", carrier.code));

    let stored = store
        .find_batches(&BatchFilter {
            carrier_id: Some(carrier.id.clone()),
            ..BatchFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0].shipment_ids, stored[1].shipment_ids);
}

#[tokio::test]
async fn test_concurrent_claims_have_one_winner() {
    let Some(store) = store().await else {
        return;
    };
    let store = Arc::new(store);
    let aggregator = BatchAggregator::new(store.clone());
    let carrier = carrier(&store).await;
    let id = delivered(&store, &carrier, 80).await;

    let attempts = (0..6).map(|_| {
        aggregator.create_batch(CreateBatchRequest::with_shipments(
            carrier.id.clone(),
            date(),
            vec![id.clone()],
        ))
    });
    let results = futures::future::join_all(attempts).await;
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);

    let claims = store.claims(&[id.clone()]).await.unwrap();
    assert_eq!(claims.len(), 1);
    assert!(store.commit(ChangeSet::new()).await.unwrap().batches.is_empty());
}
