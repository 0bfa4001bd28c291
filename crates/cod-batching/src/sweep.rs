//! Overdue sweep: batches shipments whose cash has sat with the carrier too long

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use cod_store::EligibilityCriteria;
use cod_types::{Batch, BatchOrigin, CarrierId, CodError, Result, ShipmentId};

use crate::{BatchAggregator, CreateBatchRequest};

const MAX_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepFailure {
    pub carrier_id: CarrierId,
    pub error: String,
}

/// Result of one overdue sweep
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepReport {
    pub threshold_days: u32,
    pub cutoff: DateTime<Utc>,
    /// Overdue shipments not yet in an open batch when the sweep started
    pub candidates: usize,
    pub created: Vec<Batch>,
    pub failures: Vec<SweepFailure>,
}

impl SweepReport {
    pub fn batched_shipments(&self) -> usize {
        self.created.iter().map(|b| b.shipment_ids.len()).sum()
    }
}

impl BatchAggregator {
    /// Batch every eligible shipment collected more than `threshold_days` ago
    /// and not already claimed, one batch per carrier.
    pub async fn run_overdue_sweep(
        &self,
        threshold_days: u32,
        as_of: DateTime<Utc>,
    ) -> Result<SweepReport> {
        let cutoff = as_of - Duration::days(i64::from(threshold_days));
        let overdue = self
            .store
            .list_eligible_shipments(&EligibilityCriteria::collected_before(cutoff))
            .await?;

        let ids: Vec<ShipmentId> = overdue.iter().map(|s| s.id.clone()).collect();
        let claimed = self.store.claims(&ids).await?;

        let mut by_carrier: BTreeMap<CarrierId, BTreeSet<ShipmentId>> = BTreeMap::new();
        for shipment in overdue.into_iter().filter(|s| !claimed.contains_key(&s.id)) {
            by_carrier
                .entry(shipment.carrier_id)
                .or_default()
                .insert(shipment.id);
        }

        let mut report = SweepReport {
            threshold_days,
            cutoff,
            candidates: by_carrier.values().map(BTreeSet::len).sum(),
            created: Vec::new(),
            failures: Vec::new(),
        };

        let origin = BatchOrigin::Overdue { threshold_days };
        for (carrier_id, ids) in by_carrier {
            match self.sweep_carrier(&carrier_id, ids, origin, as_of).await {
                Ok(Some(batch)) => {
                    warn!(
                        "Overdue batch {} created: {} shipments collected before {}",
                        batch.name,
                        batch.shipment_ids.len(),
                        cutoff.date_naive()
                    );
                    report.created.push(batch);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("Overdue sweep failed for carrier {}: {}", carrier_id, e);
                    report.failures.push(SweepFailure {
                        carrier_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            "Overdue sweep ({} days): {} candidates, {} batches, {} failures",
            threshold_days,
            report.candidates,
            report.created.len(),
            report.failures.len()
        );
        Ok(report)
    }

    /// Create the overdue batch for one carrier, dropping shipments another
    /// batch claims in the meantime
    async fn sweep_carrier(
        &self,
        carrier_id: &CarrierId,
        mut ids: BTreeSet<ShipmentId>,
        origin: BatchOrigin,
        as_of: DateTime<Utc>,
    ) -> Result<Option<Batch>> {
        let mut last_error = None;
        for _ in 0..MAX_ATTEMPTS {
            if ids.is_empty() {
                return Ok(None);
            }
            let request = CreateBatchRequest {
                carrier_id: carrier_id.clone(),
                collection_date: as_of.date_naive(),
                shipment_ids: Some(ids.iter().cloned().collect()),
                origin,
            };
            match self.create_batch(request).await {
                Ok(batch) => return Ok(Some(batch)),
                Err(CodError::ShipmentAlreadyBatched { shipment_ids }) => {
                    ids.retain(|id| !shipment_ids.contains(&id.to_string()));
                    last_error = Some(CodError::ShipmentAlreadyBatched { shipment_ids });
                }
                Err(CodError::NoEligibleShipments { .. }) => return Ok(None),
                Err(e) => return Err(e),
            }
        }
        match last_error {
            Some(e) if !ids.is_empty() => Err(e),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;
    use cod_store::CodStore;
    use cod_types::{Carrier, Money};

    fn days_ago(days: i64) -> DateTime<Utc> {
        Utc::now() - Duration::days(days)
    }

    #[tokio::test]
    async fn test_sweep_batches_only_overdue_unclaimed() {
        let fx = Fixture::new().await;
        let old = fx.delivered_at(100, days_ago(10)).await;
        let older = fx.delivered_at(50, days_ago(30)).await;
        let fresh = fx.delivered_at(70, days_ago(2)).await;

        // Already claimed by a manual batch
        let claimed = fx.delivered_at(20, days_ago(12)).await;
        fx.aggregator
            .create_batch(CreateBatchRequest::with_shipments(
                fx.carrier.id.clone(),
                fx.today(),
                vec![claimed.clone()],
            ))
            .await
            .unwrap();

        let report = fx.aggregator.run_overdue_sweep(7, Utc::now()).await.unwrap();
        assert_eq!(report.candidates, 2);
        assert_eq!(report.created.len(), 1);
        assert!(report.failures.is_empty());

        let batch = &report.created[0];
        assert_eq!(batch.origin, BatchOrigin::Overdue { threshold_days: 7 });
        assert!(batch.shipment_ids.contains(&old));
        assert!(batch.shipment_ids.contains(&older));
        assert!(!batch.shipment_ids.contains(&fresh));
        assert!(!batch.shipment_ids.contains(&claimed));
        assert_eq!(batch.expected_net_amount(), Money::from(160));
    }

    #[tokio::test]
    async fn test_sweep_groups_by_carrier() {
        let fx = Fixture::new().await;
        fx.delivered_at(100, days_ago(9)).await;

        let other = Carrier::new("ARX", "Aramex");
        fx.store.upsert_carrier(other.clone()).await.unwrap();
        let mut shipment = cod_types::Shipment::cod(
            "SO-ARX-1",
            other.id.clone(),
            fx.seller.clone(),
            crate::testing::costs(30),
        );
        shipment
            .apply_delivery_event(cod_types::DeliveryEvent::Delivered, days_ago(8))
            .unwrap();
        fx.store.save_shipment(shipment).await.unwrap();

        let report = fx.aggregator.run_overdue_sweep(7, Utc::now()).await.unwrap();
        assert_eq!(report.created.len(), 2);
        assert_eq!(report.batched_shipments(), 2);
        let carriers: BTreeSet<CarrierId> =
            report.created.iter().map(|b| b.carrier_id.clone()).collect();
        assert!(carriers.contains(&other.id));
        assert!(carriers.contains(&fx.carrier.id));
    }

    #[tokio::test]
    async fn test_second_sweep_is_noop() {
        let fx = Fixture::new().await;
        fx.delivered_at(100, days_ago(9)).await;

        let first = fx.aggregator.run_overdue_sweep(7, Utc::now()).await.unwrap();
        assert_eq!(first.created.len(), 1);

        let second = fx.aggregator.run_overdue_sweep(7, Utc::now()).await.unwrap();
        assert_eq!(second.candidates, 0);
        assert!(second.created.is_empty());
    }
}
