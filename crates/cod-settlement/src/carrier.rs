//! Carrier settlement: counting the cash and paying the carrier's bills

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use cod_ledger::Accounting;
use cod_store::{ChangeSet, CodStore};
use cod_types::{
    AnnotationKind, Batch, BatchId, BatchState, CodError, DocumentId, DocumentKind, DocumentQuery,
    DocumentRef, Money, PartnerRef, PaymentDirection, PaymentId, Result, Shipment, ShipmentId,
    VendorBillStatus,
};

use crate::inflight::InFlight;
use crate::SettlementConfig;

/// One vendor bill paid by a carrier settlement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillApplication {
    pub bill_id: DocumentId,
    pub shipment_id: Option<ShipmentId>,
    pub residual_before: Money,
    pub applied: Money,
}

/// Outcome of [`CarrierSettlementEngine::settle_with_carrier`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarrierSettlement {
    pub batch: Batch,
    /// Σ residual of the open bills before settlement
    pub outstanding: Money,
    /// min(actual received, outstanding)
    pub payable: Money,
    pub payment_id: Option<PaymentId>,
    pub applications: Vec<BillApplication>,
}

/// Records the cash handed over by a carrier and settles the carrier's bills
#[derive(Clone)]
pub struct CarrierSettlementEngine {
    store: Arc<dyn CodStore>,
    accounting: Arc<dyn Accounting>,
    config: SettlementConfig,
    in_flight: InFlight,
}

impl CarrierSettlementEngine {
    pub fn new(
        store: Arc<dyn CodStore>,
        accounting: Arc<dyn Accounting>,
        config: SettlementConfig,
    ) -> Self {
        Self {
            store,
            accounting,
            config,
            in_flight: InFlight::default(),
        }
    }

    /// confirmed → collected, recording what the carrier actually handed over.
    ///
    /// A variance beyond the configured tolerance is annotated, never corrected.
    pub async fn record_actual_received(&self, batch_id: &BatchId, amount: Money) -> Result<Batch> {
        let mut batch = self.store.get_batch(batch_id).await?;
        batch.ensure_state(&[BatchState::Confirmed])?;

        let amount = self.config.currency.round(amount);
        if !amount.is_positive() {
            return Err(CodError::InvalidAmount {
                message: format!("actual received amount must be positive, got {}", amount),
            });
        }

        batch.actual_received = Some(amount);
        batch.transition(BatchState::Collected, Utc::now())?;
        batch.annotate(
            AnnotationKind::Info,
            format!(
                "Received {} {} from carrier",
                amount, self.config.currency.code
            ),
        );

        if let Some(variance) = batch.variance() {
            if variance.abs() > self.config.variance_tolerance {
                let kind = if variance.is_negative() {
                    "Shortfall"
                } else {
                    "Surplus"
                };
                let message = format!(
                    "{} of {}: expected {}, received {}",
                    kind,
                    variance.abs(),
                    batch.expected_net_amount(),
                    amount
                );
                warn!("Batch {}: {}", batch.name, message);
                batch.annotate(AnnotationKind::Variance, message);
            }
        }

        let receipt = self.store.commit(ChangeSet::new().update_batch(batch)).await?;
        let batch = first_batch(receipt.batches)?;
        info!(
            "Batch {} collected: received {}, expected {}",
            batch.name,
            amount,
            batch.expected_net_amount()
        );
        Ok(batch)
    }

    /// collected → vendor_settled.
    ///
    /// Pays `min(actual received, Σ open bill residuals)` to the carrier in one
    /// outbound payment, applied to open bills oldest-due first. Every member
    /// shipment must have a vendor bill; otherwise nothing is posted and
    /// `MissingVendorBills` lists every offender.
    pub async fn settle_with_carrier(&self, batch_id: &BatchId) -> Result<CarrierSettlement> {
        let _guard = self.in_flight.enter("Batch", batch_id)?;
        let batch = self.store.get_batch(batch_id).await?;
        batch.ensure_state(&[BatchState::Collected])?;
        let actual = batch
            .actual_received
            .filter(|amount| amount.is_positive())
            .ok_or_else(|| CodError::InvalidAmount {
                message: format!("batch {} has no actual received amount", batch.name),
            })?;

        let ids: Vec<ShipmentId> = batch.shipment_ids.iter().cloned().collect();
        let shipments = self.store.get_shipments(&ids).await?;
        let partner = PartnerRef::Carrier(batch.carrier_id.clone());

        let bills = self
            .accounting
            .find_documents(
                &DocumentQuery::for_shipments(DocumentKind::VendorBill, ids.clone())
                    .with_partner(partner.clone()),
            )
            .await
            .map_err(|e| e.during("find vendor bills"))?;

        let billed: HashSet<&ShipmentId> = bills.iter().filter_map(|b| b.shipment_id.as_ref()).collect();
        let mut missing: Vec<String> = shipments
            .iter()
            .filter(|s| !billed.contains(&s.id))
            .map(|s| s.id.to_string())
            .collect();
        if !missing.is_empty() {
            missing.sort();
            return Err(CodError::MissingVendorBills {
                shipment_ids: missing,
            });
        }

        let mut open: Vec<DocumentRef> = bills.into_iter().filter(DocumentRef::is_open).collect();
        open.sort_by(|a, b| a.due_on.cmp(&b.due_on).then(a.sequence.cmp(&b.sequence)));
        let outstanding: Money = open.iter().map(|b| b.residual).sum();
        let payable = actual.min(outstanding);

        let mut payment_id = None;
        let mut applications = Vec::new();
        if payable.is_positive() {
            let memo = format!("COD Settlement - Batch {}", batch.name);
            let payment = self
                .accounting
                .create_payment(&partner, payable, PaymentDirection::Outbound, &memo)
                .await
                .map_err(|e| e.during("create carrier payment"))?;
            payment_id = Some(payment.id.clone());

            match self.apply_to_bills(&payment.id, payable, &open).await {
                Ok(applied) => applications = applied,
                Err(e) => {
                    self.void_payment(&payment.id).await;
                    return Err(e);
                }
            }
        }

        let settled = self
            .commit_settlement(batch, shipments, outstanding, payable, payment_id.clone())
            .await;
        match settled {
            Ok(batch) => {
                info!(
                    "Batch {} settled with carrier: paid {} of {} outstanding",
                    batch.name, payable, outstanding
                );
                Ok(CarrierSettlement {
                    batch,
                    outstanding,
                    payable,
                    payment_id,
                    applications,
                })
            }
            Err(e) => {
                if let Some(id) = &payment_id {
                    self.void_payment(id).await;
                }
                Err(e)
            }
        }
    }

    async fn apply_to_bills(
        &self,
        payment_id: &PaymentId,
        payable: Money,
        bills: &[DocumentRef],
    ) -> Result<Vec<BillApplication>> {
        let mut remaining = payable;
        let mut applications = Vec::new();
        for bill in bills {
            if !remaining.is_positive() {
                break;
            }
            let amount = remaining.min(bill.residual);
            let applied = self
                .accounting
                .reconcile(payment_id, &bill.id, amount)
                .await
                .map_err(|e| e.during("reconcile vendor bill"))?;
            remaining -= applied;
            applications.push(BillApplication {
                bill_id: bill.id.clone(),
                shipment_id: bill.shipment_id.clone(),
                residual_before: bill.residual,
                applied,
            });
        }
        Ok(applications)
    }

    async fn commit_settlement(
        &self,
        mut batch: Batch,
        mut shipments: Vec<Shipment>,
        outstanding: Money,
        payable: Money,
        payment_id: Option<PaymentId>,
    ) -> Result<Batch> {
        let now = Utc::now();
        for shipment in shipments.iter_mut() {
            shipment.vendor_bill_status = VendorBillStatus::Paid;
            shipment.vendor_settled_at = Some(now);
        }

        let message = if payable.is_positive() {
            let mut message = format!("Paid {} to carrier against {} outstanding", payable, outstanding);
            if let Some(actual) = batch.actual_received {
                if actual > outstanding {
                    message.push_str(&format!("; {} received above the open bills", actual - outstanding));
                }
            }
            message
        } else {
            "No outstanding vendor bills; settled without payment".to_string()
        };
        batch.vendor_payment = payment_id;
        batch.transition(BatchState::VendorSettled, now)?;
        batch.annotate(AnnotationKind::Settlement, message);

        let receipt = self
            .store
            .commit(ChangeSet::new().update_batch(batch).with_shipments(shipments))
            .await?;
        first_batch(receipt.batches)
    }

    async fn void_payment(&self, payment_id: &PaymentId) {
        match self.accounting.void_payment(payment_id).await {
            Ok(()) => warn!("Carrier payment {} voided after a failed settlement", payment_id),
            Err(e) => error!("Failed to void carrier payment {}: {}", payment_id, e),
        }
    }
}

fn first_batch(batches: Vec<Batch>) -> Result<Batch> {
    batches
        .into_iter()
        .next()
        .ok_or_else(|| CodError::storage("commit returned no batch"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Harness;
    use chrono::Duration;
    use cod_ledger::NewDocument;

    #[tokio::test]
    async fn test_variance_is_annotated_not_corrected() {
        let h = Harness::new().await;
        h.delivered(100).await;
        h.delivered(100).await;
        let batch = h.confirmed_batch().await;
        assert_eq!(batch.expected_net_amount(), Money::from(210));

        let collected = h
            .engine
            .carrier
            .record_actual_received(&batch.id, Money::from(200))
            .await
            .unwrap();
        assert_eq!(collected.state, BatchState::Collected);
        assert_eq!(collected.actual_received, Some(Money::from(200)));
        assert_eq!(collected.variance(), Some(Money::from(-10)));
        assert_eq!(collected.expected_net_amount(), Money::from(210));
        let variance = collected
            .annotations
            .iter()
            .find(|a| a.kind == AnnotationKind::Variance)
            .unwrap();
        assert!(variance.message.starts_with("Shortfall of 10.00"));
    }

    #[tokio::test]
    async fn test_exact_amount_has_no_variance_annotation() {
        let h = Harness::new().await;
        h.delivered(100).await;
        let batch = h.confirmed_batch().await;
        let collected = h
            .engine
            .carrier
            .record_actual_received(&batch.id, Money::from(105))
            .await
            .unwrap();
        assert!(collected
            .annotations
            .iter()
            .all(|a| a.kind != AnnotationKind::Variance));
    }

    #[tokio::test]
    async fn test_receive_requires_confirmed_and_positive() {
        let h = Harness::new().await;
        h.delivered(100).await;
        let draft = h.draft_batch().await;
        let result = h
            .engine
            .carrier
            .record_actual_received(&draft.id, Money::from(105))
            .await;
        assert!(matches!(result, Err(CodError::InvalidBatchState { .. })));

        let confirmed = h.engine.batches.confirm_batch(&draft.id).await.unwrap();
        let result = h
            .engine
            .carrier
            .record_actual_received(&confirmed.id, Money::ZERO)
            .await;
        assert!(matches!(result, Err(CodError::InvalidAmount { .. })));
    }

    #[tokio::test]
    async fn test_settle_pays_oldest_due_first_capped_at_received() {
        let h = Harness::new().await;
        let a = h.delivered(100).await;
        let b = h.delivered(100).await;
        h.bill(&a).await;
        h.bill(&b).await;
        let batch = h.collected_batch(Money::from(200)).await;

        let settlement = h.engine.carrier.settle_with_carrier(&batch.id).await.unwrap();
        // two bills of 10 each
        assert_eq!(settlement.outstanding, Money::from(20));
        assert_eq!(settlement.payable, Money::from(20));
        assert_eq!(settlement.applications.len(), 2);
        assert!(settlement
            .applications
            .iter()
            .all(|app| app.applied <= app.residual_before));
        assert_eq!(settlement.batch.state, BatchState::VendorSettled);
        assert_eq!(settlement.batch.vendor_payment, settlement.payment_id);

        for id in [&a, &b] {
            let shipment = h.store.get_shipment(id).await.unwrap();
            assert_eq!(shipment.vendor_bill_status, VendorBillStatus::Paid);
            assert!(shipment.vendor_settled_at.is_some());
        }
        let open_bills = h.open_documents(DocumentKind::VendorBill).await;
        assert!(open_bills.is_empty());
    }

    #[tokio::test]
    async fn test_settle_without_outstanding_bills_posts_nothing() {
        let h = Harness::new().await;
        let a = h.delivered(100).await;
        let bill = h.bill(&a).await;
        let carrier = PartnerRef::Carrier(h.carrier.id.clone());
        let payment = h
            .ledger
            .create_payment(&carrier, Money::from(10), PaymentDirection::Outbound, "paid early")
            .await
            .unwrap();
        h.ledger.reconcile(&payment.id, &bill.id, Money::from(10)).await.unwrap();

        let batch = h.collected_batch(Money::from(105)).await;
        let settlement = h.engine.carrier.settle_with_carrier(&batch.id).await.unwrap();
        assert_eq!(settlement.payable, Money::ZERO);
        assert!(settlement.payment_id.is_none());
        assert_eq!(settlement.batch.state, BatchState::VendorSettled);
        assert_eq!(h.ledger.payments().await.len(), 1);
    }

    #[tokio::test]
    async fn test_short_payment_fills_earliest_due_bill_first() {
        let h = Harness::new().await;
        let a = h.delivered(100).await;
        let b = h.delivered(100).await;
        let carrier = PartnerRef::Carrier(h.carrier.id.clone());
        let issued_on = h.today();
        let bill_for = |shipment_id: &ShipmentId, due_in: i64| NewDocument {
            partner: carrier.clone(),
            shipment_id: shipment_id.clone(),
            amount: Money::from(10),
            issued_on,
            due_on: issued_on + Duration::days(due_in),
            memo: "shipping".to_string(),
        };
        // posted first but due last
        let late = h.ledger.create_vendor_bill(bill_for(&a, 14)).await.unwrap();
        let early = h.ledger.create_vendor_bill(bill_for(&b, 2)).await.unwrap();

        let batch = h.collected_batch(Money::from(15)).await;
        let settlement = h.engine.carrier.settle_with_carrier(&batch.id).await.unwrap();
        assert_eq!(settlement.outstanding, Money::from(20));
        assert_eq!(settlement.payable, Money::from(15));

        let paid: Vec<(DocumentId, Money)> = settlement
            .applications
            .iter()
            .map(|app| (app.bill_id.clone(), app.applied))
            .collect();
        assert_eq!(
            paid,
            vec![(early.id.clone(), Money::from(10)), (late.id.clone(), Money::from(5))]
        );
        assert_eq!(h.ledger.document(&early.id).await.unwrap().residual, Money::ZERO);
        assert_eq!(h.ledger.document(&late.id).await.unwrap().residual, Money::from(5));
    }

    #[tokio::test]
    async fn test_free_shipment_without_bill_blocks_settlement() {
        let h = Harness::new().await;
        let billed = h.delivered(100).await;
        let free = h.delivered(100).await;
        let mut shipment = h.store.get_shipment(&free).await.unwrap();
        shipment.costs.shipping_cost = Money::ZERO;
        h.store.save_shipment(shipment).await.unwrap();
        h.bill(&billed).await;

        let batch = h.collected_batch(Money::from(215)).await;
        let result = h.engine.carrier.settle_with_carrier(&batch.id).await;
        assert_eq!(
            result.unwrap_err(),
            CodError::MissingVendorBills {
                shipment_ids: vec![free.to_string()]
            }
        );
        assert!(h.ledger.payments().await.is_empty());

        // the zero bill satisfies the check and needs no payment
        h.bill(&free).await;
        let settlement = h.engine.carrier.settle_with_carrier(&batch.id).await.unwrap();
        assert_eq!(settlement.payable, Money::from(10));
        assert_eq!(settlement.applications.len(), 1);
        assert_eq!(settlement.batch.state, BatchState::VendorSettled);
    }
}
