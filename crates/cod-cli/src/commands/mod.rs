//! Command implementations

pub mod batch;
pub mod quote;
pub mod settle;
pub mod setup;

use std::sync::Arc;

use anyhow::{anyhow, Context};

use cod_store::{BatchFilter, CodStore};
use cod_types::{BatchId, Carrier, CarrierId, ShipmentId};

/// A carrier given by code or id
pub async fn resolve_carrier(store: &Arc<dyn CodStore>, key: &str) -> anyhow::Result<Carrier> {
    if let Ok(id) = CarrierId::parse(key) {
        return Ok(store.get_carrier(&id).await?);
    }
    store
        .list_carriers()
        .await?
        .into_iter()
        .find(|c| c.code.eq_ignore_ascii_case(key))
        .ok_or_else(|| anyhow!("no carrier with code or id {}", key))
}

/// A batch given by name or id
pub async fn resolve_batch(store: &Arc<dyn CodStore>, key: &str) -> anyhow::Result<BatchId> {
    if let Ok(id) = BatchId::parse(key) {
        return Ok(id);
    }
    store
        .find_batches(&BatchFilter::default())
        .await?
        .into_iter()
        .find(|b| b.name == key)
        .map(|b| b.id)
        .ok_or_else(|| anyhow!("no batch named {}", key))
}

pub fn parse_shipments(keys: &[String]) -> anyhow::Result<Vec<ShipmentId>> {
    keys.iter()
        .map(|k| ShipmentId::parse(k).with_context(|| format!("invalid shipment id {}", k)))
        .collect()
}
