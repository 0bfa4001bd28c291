//! COD Store - Repository seam for shipments, batches and payouts
//!
//! All engine writes go through [`CodStore::commit`], which applies a
//! [`ChangeSet`] all-or-nothing. The commit path is also where derived
//! figures are refreshed: shipment amounts are recomputed from their cost
//! inputs and batch totals from their members, so neither is ever stored
//! stale.
//!
//! # Claims
//!
//! Every shipment in an open (non-cancelled) batch is *claimed* by that
//! batch. A commit that would give a shipment a second claim fails with
//! `ShipmentAlreadyBatched`, which makes the read-then-claim of batch
//! creation atomic without holding locks across the read.

pub mod changeset;
pub mod memory;

pub use changeset::{BatchWrite, ChangeSet, CommitReceipt, PayoutWrite};
pub use memory::{InMemoryStore, StoreSnapshot};

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use cod_types::{
    Batch, BatchId, Carrier, CarrierId, CustomerPayout, PayoutId, Result, Shipment, ShipmentId,
};

/// Which shipments a batch may pick up
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EligibilityCriteria {
    pub carrier_id: Option<CarrierId>,
    /// Only shipments collected at or before this instant
    pub collected_on_or_before: Option<DateTime<Utc>>,
    /// Also return shipments already claimed by an open batch
    pub include_claimed: bool,
}

impl EligibilityCriteria {
    pub fn for_carrier(carrier_id: CarrierId) -> Self {
        Self {
            carrier_id: Some(carrier_id),
            ..Self::default()
        }
    }

    /// Everything collected before `cutoff`, claimed or not
    pub fn collected_before(cutoff: DateTime<Utc>) -> Self {
        Self {
            carrier_id: None,
            collected_on_or_before: Some(cutoff),
            include_claimed: true,
        }
    }
}

/// Filter for batch lookups
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchFilter {
    pub carrier_id: Option<CarrierId>,
    pub collection_date: Option<NaiveDate>,
    pub open_only: bool,
}

impl BatchFilter {
    pub fn matches(&self, batch: &Batch) -> bool {
        if let Some(carrier) = &self.carrier_id {
            if &batch.carrier_id != carrier {
                return false;
            }
        }
        if let Some(date) = self.collection_date {
            if batch.collection_date != date {
                return false;
            }
        }
        !self.open_only || batch.is_open()
    }
}

/// Persistence for everything the engine reads and writes
#[async_trait::async_trait]
pub trait CodStore: Send + Sync {
    async fn list_carriers(&self) -> Result<Vec<Carrier>>;

    async fn get_carrier(&self, id: &CarrierId) -> Result<Carrier>;

    async fn upsert_carrier(&self, carrier: Carrier) -> Result<()>;

    async fn get_shipment(&self, id: &ShipmentId) -> Result<Shipment>;

    /// Fetch several shipments; any missing id is an error
    async fn get_shipments(&self, ids: &[ShipmentId]) -> Result<Vec<Shipment>>;

    /// COD, delivered, collected-at-courier shipments matching the criteria
    async fn list_eligible_shipments(&self, criteria: &EligibilityCriteria)
        -> Result<Vec<Shipment>>;

    /// Open-batch claims held on the given shipments
    async fn claims(&self, ids: &[ShipmentId]) -> Result<HashMap<ShipmentId, BatchId>>;

    async fn get_batch(&self, id: &BatchId) -> Result<Batch>;

    async fn find_batches(&self, filter: &BatchFilter) -> Result<Vec<Batch>>;

    async fn get_payout(&self, id: &PayoutId) -> Result<CustomerPayout>;

    async fn list_payouts(&self, batch_id: &BatchId) -> Result<Vec<CustomerPayout>>;

    /// Apply every write in the change set, or none of them
    async fn commit(&self, changes: ChangeSet) -> Result<CommitReceipt>;

    /// Insert or update one shipment
    async fn save_shipment(&self, shipment: Shipment) -> Result<Shipment> {
        let id = shipment.id.clone();
        let receipt = self.commit(ChangeSet::default().with_shipment(shipment)).await?;
        match receipt.shipments.into_iter().next() {
            Some(saved) => Ok(saved),
            None => self.get_shipment(&id).await,
        }
    }
}
