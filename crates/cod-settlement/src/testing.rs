//! Shared fixtures for unit tests

use std::sync::Arc;

use chrono::{NaiveDate, Utc};

use cod_batching::CreateBatchRequest;
use cod_ledger::InMemoryLedger;
use cod_store::{CodStore, EligibilityCriteria, InMemoryStore};
use cod_types::{
    Batch, Carrier, CostInputs, DeliveryEvent, DocumentKind, DocumentRef, Money, SellerId,
    Shipment, ShipmentId,
};

use crate::{CodEngine, SettlementConfig};

pub(crate) struct Harness {
    pub engine: CodEngine,
    pub store: Arc<InMemoryStore>,
    pub ledger: Arc<InMemoryLedger>,
    pub carrier: Carrier,
    pub seller: SellerId,
}

/// 15 service fee and 10 shipping; the seller nets the goods value
fn costs(goods: i64) -> CostInputs {
    CostInputs {
        goods_value: Money::from(goods),
        shipping_cost: Money::from(10),
        company_service_cost: Money::from(15),
        company_base_cost: Money::from(15),
        include_services_in_cod: true,
    }
}

impl Harness {
    pub async fn new() -> Self {
        let store = Arc::new(InMemoryStore::new());
        let ledger = Arc::new(InMemoryLedger::new());
        let carrier = Carrier::new("BOSTA", "Bosta");
        store.upsert_carrier(carrier.clone()).await.unwrap();
        Self {
            engine: CodEngine::new(store.clone(), ledger.clone(), SettlementConfig::default()),
            store,
            ledger,
            carrier,
            seller: SellerId::new(),
        }
    }

    pub fn today(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 16).unwrap()
    }

    pub async fn pending(&self, goods: i64) -> ShipmentId {
        let shipment = Shipment::cod(
            format!("SO-{}", ShipmentId::new()),
            self.carrier.id.clone(),
            self.seller.clone(),
            costs(goods),
        );
        self.store.save_shipment(shipment).await.unwrap().id
    }

    pub async fn delivered_for(&self, seller: &SellerId, goods: i64) -> ShipmentId {
        let mut shipment = Shipment::cod(
            format!("SO-{}", ShipmentId::new()),
            self.carrier.id.clone(),
            seller.clone(),
            costs(goods),
        );
        shipment
            .apply_delivery_event(DeliveryEvent::Delivered, Utc::now())
            .unwrap();
        self.store.save_shipment(shipment).await.unwrap().id
    }

    pub async fn delivered(&self, goods: i64) -> ShipmentId {
        self.delivered_for(&self.seller, goods).await
    }

    /// Post the shipment's documents and return its vendor bill
    pub async fn bill(&self, id: &ShipmentId) -> DocumentRef {
        self.engine
            .billing
            .ensure_shipment_documents(id)
            .await
            .unwrap()
            .vendor_bill
            .unwrap()
    }

    pub async fn draft_batch(&self) -> Batch {
        self.engine
            .batches
            .create_batch(CreateBatchRequest::all_eligible(
                self.carrier.id.clone(),
                self.today(),
            ))
            .await
            .unwrap()
    }

    pub async fn confirmed_batch(&self) -> Batch {
        let draft = self.draft_batch().await;
        self.engine.batches.confirm_batch(&draft.id).await.unwrap()
    }

    pub async fn collected_batch(&self, received: Money) -> Batch {
        let confirmed = self.confirmed_batch().await;
        self.engine
            .carrier
            .record_actual_received(&confirmed.id, received)
            .await
            .unwrap()
    }

    /// Bill every eligible shipment, then batch, collect the expected amount and settle
    pub async fn vendor_settled_batch(&self) -> Batch {
        let eligible = self
            .store
            .list_eligible_shipments(&EligibilityCriteria::for_carrier(self.carrier.id.clone()))
            .await
            .unwrap();
        for shipment in &eligible {
            self.bill(&shipment.id).await;
        }
        let confirmed = self.confirmed_batch().await;
        let expected = confirmed.expected_net_amount();
        self.engine
            .carrier
            .record_actual_received(&confirmed.id, expected)
            .await
            .unwrap();
        self.engine
            .carrier
            .settle_with_carrier(&confirmed.id)
            .await
            .unwrap()
            .batch
    }

    pub async fn open_documents(&self, kind: DocumentKind) -> Vec<DocumentRef> {
        self.ledger
            .documents_of_kind(kind)
            .await
            .into_iter()
            .filter(DocumentRef::is_open)
            .collect()
    }
}
