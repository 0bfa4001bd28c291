//! Shared fixtures for unit tests

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};

use cod_store::{BatchFilter, CodStore, InMemoryStore};
use cod_types::{
    Batch, Carrier, CostInputs, DeliveryEvent, DeliveryState, Money, SellerId, Shipment,
    ShipmentId,
};

use crate::BatchAggregator;

pub(crate) struct Fixture {
    pub store: Arc<InMemoryStore>,
    pub aggregator: BatchAggregator,
    pub carrier: Carrier,
    pub seller: SellerId,
}

pub(crate) fn costs(goods: i64) -> CostInputs {
    CostInputs {
        goods_value: Money::from(goods),
        shipping_cost: Money::from(10),
        company_service_cost: Money::from(15),
        company_base_cost: Money::from(15),
        include_services_in_cod: true,
    }
}

impl Fixture {
    pub async fn new() -> Self {
        Self::with_carrier(Carrier::new("BOSTA", "Bosta")).await
    }

    pub async fn with_carrier(carrier: Carrier) -> Self {
        let store = Arc::new(InMemoryStore::new());
        store.upsert_carrier(carrier.clone()).await.unwrap();
        Self {
            aggregator: BatchAggregator::new(store.clone()),
            store,
            carrier,
            seller: SellerId::new(),
        }
    }

    pub fn today(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 16).unwrap()
    }

    /// A delivered COD shipment collected at `collected_at`
    pub async fn delivered_at(&self, goods: i64, collected_at: DateTime<Utc>) -> ShipmentId {
        let mut shipment = Shipment::cod(
            format!("SO-{}", ShipmentId::new()),
            self.carrier.id.clone(),
            self.seller.clone(),
            costs(goods),
        );
        shipment
            .apply_delivery_event(DeliveryEvent::Delivered, collected_at)
            .unwrap();
        self.store.save_shipment(shipment).await.unwrap().id
    }

    pub async fn delivered(&self, goods: i64) -> ShipmentId {
        self.delivered_at(goods, Utc::now()).await
    }

    pub async fn in_transit(&self, goods: i64) -> ShipmentId {
        let mut shipment = Shipment::cod(
            format!("SO-{}", ShipmentId::new()),
            self.carrier.id.clone(),
            self.seller.clone(),
            costs(goods),
        );
        shipment
            .apply_delivery_event(
                DeliveryEvent::Progress(DeliveryState::InTransit),
                Utc::now(),
            )
            .unwrap();
        self.store.save_shipment(shipment).await.unwrap().id
    }

    pub async fn all_batches(&self) -> Vec<Batch> {
        self.store.find_batches(&BatchFilter::default()).await.unwrap()
    }
}
