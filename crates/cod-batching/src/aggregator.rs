//! Batch creation, editing, confirmation and cancellation

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use cod_store::{ChangeSet, CodStore, EligibilityCriteria};
use cod_types::{
    AnnotationKind, Batch, BatchId, BatchOrigin, BatchState, CarrierId, CodError, CodStatus,
    Result, Shipment, ShipmentId,
};

/// Input of [`BatchAggregator::create_batch`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateBatchRequest {
    pub carrier_id: CarrierId,
    pub collection_date: NaiveDate,
    /// Explicit members; every eligible shipment of the carrier when omitted
    pub shipment_ids: Option<Vec<ShipmentId>>,
    pub origin: BatchOrigin,
}

impl CreateBatchRequest {
    /// Manual batch of every eligible shipment
    pub fn all_eligible(carrier_id: CarrierId, collection_date: NaiveDate) -> Self {
        Self {
            carrier_id,
            collection_date,
            shipment_ids: None,
            origin: BatchOrigin::Manual,
        }
    }

    /// Manual batch of the given shipments
    pub fn with_shipments(
        carrier_id: CarrierId,
        collection_date: NaiveDate,
        shipment_ids: Vec<ShipmentId>,
    ) -> Self {
        Self {
            carrier_id,
            collection_date,
            shipment_ids: Some(shipment_ids),
            origin: BatchOrigin::Manual,
        }
    }

    pub fn origin(mut self, origin: BatchOrigin) -> Self {
        self.origin = origin;
        self
    }
}

/// Groups eligible shipments into batches
#[derive(Clone)]
pub struct BatchAggregator {
    pub(crate) store: Arc<dyn CodStore>,
}

impl BatchAggregator {
    pub fn new(store: Arc<dyn CodStore>) -> Self {
        Self { store }
    }

    /// Create a draft batch.
    ///
    /// Fails with `NoEligibleShipments` when the member set would be empty,
    /// and with `ShipmentAlreadyBatched` when another open batch holds any
    /// requested shipment, including one claimed concurrently.
    pub async fn create_batch(&self, request: CreateBatchRequest) -> Result<Batch> {
        let carrier = self.store.get_carrier(&request.carrier_id).await?;

        let members: Vec<Shipment> = match &request.shipment_ids {
            None => {
                self.store
                    .list_eligible_shipments(&EligibilityCriteria::for_carrier(carrier.id.clone()))
                    .await?
            }
            Some(ids) => {
                let ids: Vec<ShipmentId> = ids.iter().cloned().collect::<BTreeSet<_>>().into_iter().collect();
                let shipments = self.store.get_shipments(&ids).await?;
                self.validate_members(&request.carrier_id, &shipments).await?;
                shipments
            }
        };

        if members.is_empty() {
            return Err(CodError::NoEligibleShipments {
                carrier_id: request.carrier_id.to_string(),
            });
        }

        let mut batch = Batch::new(
            request.carrier_id.clone(),
            request.collection_date,
            request.origin,
            members.iter().map(|s| s.id.clone()),
        );
        batch.annotate(
            AnnotationKind::Info,
            format!(
                "Created ({}) with {} shipments",
                request.origin.as_str(),
                members.len()
            ),
        );

        let receipt = self.store.commit(ChangeSet::new().insert_batch(batch)).await?;
        let batch = receipt.batches.into_iter().next().ok_or_else(|| {
            CodError::storage("commit returned no batch")
        })?;

        info!(
            "Batch {} created for {} ({}): {} shipments, expected {}",
            batch.name,
            carrier.code,
            request.origin.as_str(),
            batch.shipment_ids.len(),
            batch.expected_net_amount()
        );
        Ok(batch)
    }

    /// Reject shipments of another carrier, not ready, or already claimed
    async fn validate_members(&self, carrier_id: &CarrierId, shipments: &[Shipment]) -> Result<()> {
        for shipment in shipments {
            if &shipment.carrier_id != carrier_id {
                return Err(CodError::IneligibleShipment {
                    shipment_id: shipment.id.to_string(),
                    reason: format!("belongs to carrier {}", shipment.carrier_id),
                });
            }
            if let Some(reason) = shipment.batch_ineligibility() {
                return Err(CodError::IneligibleShipment {
                    shipment_id: shipment.id.to_string(),
                    reason,
                });
            }
        }

        let ids: Vec<ShipmentId> = shipments.iter().map(|s| s.id.clone()).collect();
        let claims = self.store.claims(&ids).await?;
        if !claims.is_empty() {
            let mut claimed: Vec<String> = claims.keys().map(|id| id.to_string()).collect();
            claimed.sort();
            return Err(CodError::ShipmentAlreadyBatched {
                shipment_ids: claimed,
            });
        }
        Ok(())
    }

    /// Add shipments to a draft batch
    pub async fn add_shipments(&self, batch_id: &BatchId, ids: &[ShipmentId]) -> Result<Batch> {
        let mut batch = self.store.get_batch(batch_id).await?;
        batch.ensure_state(&[BatchState::Draft])?;

        let new_ids: Vec<ShipmentId> = ids
            .iter()
            .filter(|id| !batch.shipment_ids.contains(id))
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if new_ids.is_empty() {
            return Ok(batch);
        }

        let shipments = self.store.get_shipments(&new_ids).await?;
        self.validate_members(&batch.carrier_id, &shipments).await?;

        batch.shipment_ids.extend(new_ids.iter().cloned());
        batch.annotate(AnnotationKind::Info, format!("Added {} shipments", new_ids.len()));
        let receipt = self.store.commit(ChangeSet::new().update_batch(batch)).await?;
        single_batch(receipt.batches)
    }

    /// Remove shipments from a draft batch, releasing their claims
    pub async fn remove_shipments(&self, batch_id: &BatchId, ids: &[ShipmentId]) -> Result<Batch> {
        let mut batch = self.store.get_batch(batch_id).await?;
        batch.ensure_state(&[BatchState::Draft])?;

        let before = batch.shipment_ids.len();
        for id in ids {
            batch.shipment_ids.remove(id);
        }
        let removed = before - batch.shipment_ids.len();
        if removed == 0 {
            return Ok(batch);
        }

        batch.annotate(AnnotationKind::Info, format!("Removed {} shipments", removed));
        let receipt = self.store.commit(ChangeSet::new().update_batch(batch)).await?;
        single_batch(receipt.batches)
    }

    /// draft → confirmed; member shipments move to `received_from_courier`
    pub async fn confirm_batch(&self, batch_id: &BatchId) -> Result<Batch> {
        let mut batch = self.store.get_batch(batch_id).await?;
        batch.ensure_state(&[BatchState::Draft])?;
        if batch.shipment_ids.is_empty() {
            return Err(CodError::EmptyBatch {
                batch_id: batch.id.to_string(),
            });
        }

        let now = Utc::now();
        let ids: Vec<ShipmentId> = batch.shipment_ids.iter().cloned().collect();
        let mut shipments = self.store.get_shipments(&ids).await?;
        for shipment in shipments.iter_mut() {
            shipment.transition_cod_status(CodStatus::ReceivedFromCourier, now)?;
        }

        batch.transition(BatchState::Confirmed, now)?;
        batch.annotate(
            AnnotationKind::Info,
            format!(
                "Confirmed {} shipments, expected {} from carrier",
                shipments.len(),
                batch.expected_net_amount()
            ),
        );

        let negative: Vec<&str> = shipments
            .iter()
            .filter(|s| s.amounts.negative_margin)
            .map(|s| s.reference.as_str())
            .collect();
        if !negative.is_empty() {
            let message = format!(
                "Negative merchant margin absorbed on {} shipments: {}",
                negative.len(),
                negative.join(", ")
            );
            warn!("Batch {}: {}", batch.name, message);
            batch.annotate(AnnotationKind::NegativeMargin, message);
        }

        let receipt = self
            .store
            .commit(ChangeSet::new().update_batch(batch).with_shipments(shipments))
            .await?;
        let batch = single_batch(receipt.batches)?;
        info!("Batch {} confirmed: expected {}", batch.name, batch.expected_net_amount());
        Ok(batch)
    }

    /// Cancel a draft or confirmed batch.
    ///
    /// A confirmed batch hands its shipments back to `collected_at_courier`.
    pub async fn cancel_batch(&self, batch_id: &BatchId) -> Result<Batch> {
        let mut batch = self.store.get_batch(batch_id).await?;
        batch.ensure_state(&[BatchState::Draft, BatchState::Confirmed])?;

        let now = Utc::now();
        let mut reverted = Vec::new();
        if batch.state == BatchState::Confirmed {
            let ids: Vec<ShipmentId> = batch.shipment_ids.iter().cloned().collect();
            for mut shipment in self.store.get_shipments(&ids).await? {
                if shipment.cod_status == CodStatus::ReceivedFromCourier {
                    shipment.transition_cod_status(CodStatus::CollectedAtCourier, now)?;
                    reverted.push(shipment);
                }
            }
        }

        batch.transition(BatchState::Cancelled, now)?;
        batch.annotate(
            AnnotationKind::Info,
            format!("Cancelled; {} shipments returned to collected_at_courier", reverted.len()),
        );

        let receipt = self
            .store
            .commit(ChangeSet::new().update_batch(batch).with_shipments(reverted))
            .await?;
        let batch = single_batch(receipt.batches)?;
        info!("Batch {} cancelled", batch.name);
        Ok(batch)
    }
}

fn single_batch(batches: Vec<Batch>) -> Result<Batch> {
    batches
        .into_iter()
        .next()
        .ok_or_else(|| CodError::storage("commit returned no batch"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;
    use cod_types::{DeliveryEvent, Money};
    use futures::future::join_all;

    #[tokio::test]
    async fn test_create_batch_selects_all_eligible() {
        let fx = Fixture::new().await;
        let a = fx.delivered(100).await;
        let b = fx.delivered(50).await;
        fx.in_transit(70).await;

        let batch = fx
            .aggregator
            .create_batch(CreateBatchRequest::all_eligible(fx.carrier.id.clone(), fx.today()))
            .await
            .unwrap();

        assert_eq!(batch.state, BatchState::Draft);
        assert_eq!(batch.shipment_ids, [a.clone(), b.clone()].into_iter().collect());
        // 100+15-10 and 50+15-10
        assert_eq!(batch.expected_net_amount(), Money::from(160));

        // creation has no side effects on shipments
        let shipment = fx.store.get_shipment(&a).await.unwrap();
        assert_eq!(shipment.cod_status, CodStatus::CollectedAtCourier);
    }

    #[tokio::test]
    async fn test_create_batch_without_eligible_is_noop_signal() {
        let fx = Fixture::new().await;
        fx.in_transit(70).await;

        let result = fx
            .aggregator
            .create_batch(CreateBatchRequest::all_eligible(fx.carrier.id.clone(), fx.today()))
            .await;
        assert!(matches!(result, Err(CodError::NoEligibleShipments { .. })));
        assert!(fx.all_batches().await.is_empty());
    }

    #[tokio::test]
    async fn test_explicit_shipments_are_validated() {
        let fx = Fixture::new().await;
        let pending = fx.in_transit(70).await;
        let result = fx
            .aggregator
            .create_batch(CreateBatchRequest::with_shipments(
                fx.carrier.id.clone(),
                fx.today(),
                vec![pending],
            ))
            .await;
        assert!(matches!(result, Err(CodError::IneligibleShipment { .. })));

        let ok = fx.delivered(10).await;
        fx.aggregator
            .create_batch(CreateBatchRequest::with_shipments(
                fx.carrier.id.clone(),
                fx.today(),
                vec![ok.clone()],
            ))
            .await
            .unwrap();
        let again = fx
            .aggregator
            .create_batch(CreateBatchRequest::with_shipments(
                fx.carrier.id.clone(),
                fx.today(),
                vec![ok.clone()],
            ))
            .await;
        assert_eq!(
            again.unwrap_err(),
            CodError::ShipmentAlreadyBatched {
                shipment_ids: vec![ok.to_string()]
            }
        );
    }

    #[tokio::test]
    async fn test_confirm_moves_shipments_and_cancel_reverts() {
        let fx = Fixture::new().await;
        let a = fx.delivered(100).await;
        let batch = fx
            .aggregator
            .create_batch(CreateBatchRequest::all_eligible(fx.carrier.id.clone(), fx.today()))
            .await
            .unwrap();

        let confirmed = fx.aggregator.confirm_batch(&batch.id).await.unwrap();
        assert_eq!(confirmed.state, BatchState::Confirmed);
        let shipment = fx.store.get_shipment(&a).await.unwrap();
        assert_eq!(shipment.cod_status, CodStatus::ReceivedFromCourier);
        assert!(shipment.cod_received_at.is_some());

        let cancelled = fx.aggregator.cancel_batch(&batch.id).await.unwrap();
        assert_eq!(cancelled.state, BatchState::Cancelled);
        let shipment = fx.store.get_shipment(&a).await.unwrap();
        assert_eq!(shipment.cod_status, CodStatus::CollectedAtCourier);
        assert!(shipment.cod_received_at.is_none());

        // cancelled batches release their shipments
        let rebatched = fx
            .aggregator
            .create_batch(CreateBatchRequest::all_eligible(fx.carrier.id.clone(), fx.today()))
            .await
            .unwrap();
        assert!(rebatched.shipment_ids.contains(&a));
        assert!(rebatched.name.ends_with("-002"));
    }

    #[tokio::test]
    async fn test_confirm_empty_batch_rejected() {
        let fx = Fixture::new().await;
        let a = fx.delivered(100).await;
        let batch = fx
            .aggregator
            .create_batch(CreateBatchRequest::all_eligible(fx.carrier.id.clone(), fx.today()))
            .await
            .unwrap();
        fx.aggregator.remove_shipments(&batch.id, &[a]).await.unwrap();

        let result = fx.aggregator.confirm_batch(&batch.id).await;
        assert!(matches!(result, Err(CodError::EmptyBatch { .. })));
    }

    #[tokio::test]
    async fn test_draft_editing_updates_totals() {
        let fx = Fixture::new().await;
        let a = fx.delivered(100).await;
        let batch = fx
            .aggregator
            .create_batch(CreateBatchRequest::all_eligible(fx.carrier.id.clone(), fx.today()))
            .await
            .unwrap();
        let b = fx.delivered(50).await;

        let grown = fx.aggregator.add_shipments(&batch.id, &[b.clone()]).await.unwrap();
        assert_eq!(grown.expected_net_amount(), Money::from(160));

        let shrunk = fx.aggregator.remove_shipments(&batch.id, &[a]).await.unwrap();
        assert_eq!(shrunk.expected_net_amount(), Money::from(55));
        assert_eq!(shrunk.shipment_ids.len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_after_collection_rejected() {
        let fx = Fixture::new().await;
        fx.delivered(100).await;
        let batch = fx
            .aggregator
            .create_batch(CreateBatchRequest::all_eligible(fx.carrier.id.clone(), fx.today()))
            .await
            .unwrap();
        let mut confirmed = fx.aggregator.confirm_batch(&batch.id).await.unwrap();
        confirmed.transition(BatchState::Collected, Utc::now()).unwrap();
        confirmed.actual_received = Some(Money::from(105));
        fx.store
            .commit(ChangeSet::new().update_batch(confirmed))
            .await
            .unwrap();

        let result = fx.aggregator.cancel_batch(&batch.id).await;
        assert!(matches!(result, Err(CodError::InvalidBatchState { .. })));
    }

    #[tokio::test]
    async fn test_returned_shipment_is_not_eligible() {
        let fx = Fixture::new().await;
        let id = fx.delivered(100).await;
        let mut shipment = fx.store.get_shipment(&id).await.unwrap();
        shipment
            .apply_delivery_event(DeliveryEvent::Returned, Utc::now())
            .unwrap();
        fx.store.save_shipment(shipment).await.unwrap();

        let result = fx
            .aggregator
            .create_batch(CreateBatchRequest::all_eligible(fx.carrier.id.clone(), fx.today()))
            .await;
        assert!(matches!(result, Err(CodError::NoEligibleShipments { .. })));
    }

    #[tokio::test]
    async fn test_parallel_creation_yields_one_winner_per_shipment() {
        let fx = Fixture::new().await;
        let mut ids = Vec::new();
        for i in 0..10 {
            ids.push(fx.delivered(10 + i).await);
        }

        let attempts = (0..12).map(|i| {
            let aggregator = fx.aggregator.clone();
            let carrier_id = fx.carrier.id.clone();
            let members: Vec<ShipmentId> = ids.iter().skip(i % 7).take(4).cloned().collect();
            let date = fx.today();
            tokio::spawn(async move {
                aggregator
                    .create_batch(CreateBatchRequest::with_shipments(carrier_id, date, members))
                    .await
            })
        });
        let results = join_all(attempts).await;

        for result in &results {
            match result {
                Ok(Ok(_)) | Ok(Err(CodError::ShipmentAlreadyBatched { .. })) => {}
                other => panic!("unexpected outcome {:?}", other),
            }
        }

        let mut owners = std::collections::HashMap::new();
        for batch in fx.all_batches().await {
            for id in batch.shipment_ids {
                assert!(owners.insert(id, batch.id.clone()).is_none());
            }
        }
        assert!(!owners.is_empty());
    }
}
