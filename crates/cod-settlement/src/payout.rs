//! Seller payouts
//!
//! Each seller's net amount first pays down that seller's open invoices; the
//! part no invoice absorbs becomes a credit note owed to the seller. A
//! negative net is left for review.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use cod_amounts::{group_by_seller, payout_totals, total_net};
use cod_ledger::Accounting;
use cod_store::{ChangeSet, CodStore};
use cod_types::{
    AnnotationKind, Batch, BatchId, BatchState, CodError, CodStatus, CreditNoteRef,
    CustomerPayout, DocumentId, DocumentKind, DocumentQuery, DocumentRef, InvoiceOffset, Money,
    PartnerRef, PaymentDirection, PaymentId, PayoutId, PayoutMethod, PayoutState, Result, SellerId, Shipment,
    ShipmentId,
};

use crate::inflight::InFlight;
use crate::SettlementConfig;

/// A payout that could not be settled during a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayoutFailure {
    pub payout_id: PayoutId,
    pub seller_id: SellerId,
    pub error: String,
}

/// Per-payout results of [`PayoutEngine::settle_all_payouts`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayoutRunReport {
    pub batch: Batch,
    pub settled: Vec<CustomerPayout>,
    pub failures: Vec<PayoutFailure>,
}

impl PayoutRunReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Accounting records created while settling one payout
#[derive(Debug, Default)]
struct Posted {
    payment: Option<PaymentId>,
    credit_note: Option<DocumentId>,
}

/// Prepares and settles per-seller payouts of a batch
#[derive(Clone)]
pub struct PayoutEngine {
    store: Arc<dyn CodStore>,
    accounting: Arc<dyn Accounting>,
    config: SettlementConfig,
    in_flight: InFlight,
}

impl PayoutEngine {
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

    /// One draft payout per seller; the batch moves to `customer_payments`.
    ///
    /// Re-running replaces the drafts as long as none has been confirmed.
    pub async fn prepare_payouts(&self, batch_id: &BatchId) -> Result<Vec<CustomerPayout>> {
        let mut batch = self.store.get_batch(batch_id).await?;
        batch.ensure_state(&[BatchState::VendorSettled, BatchState::CustomerPayments])?;

        let existing = self.store.list_payouts(batch_id).await?;
        for payout in &existing {
            payout.ensure_state(PayoutState::Draft)?;
        }

        let ids: Vec<ShipmentId> = batch.shipment_ids.iter().cloned().collect();
        let shipments = self.store.get_shipments(&ids).await?;

        let mut changes = ChangeSet::new();
        for payout in existing {
            changes = changes.delete_payout(payout.id);
        }

        let mut payouts = Vec::new();
        for (seller_id, members) in group_by_seller(shipments.iter()) {
            let totals = payout_totals(members.iter().copied());
            let mut payout = CustomerPayout::new(
                batch.id.clone(),
                seller_id,
                members.iter().map(|s| s.id.clone()),
                totals,
            );
            if payout.totals.negative_margin_shipments > 0 {
                payout.annotate(
                    AnnotationKind::NegativeMargin,
                    format!(
                        "{} shipments with negative merchant margin",
                        payout.totals.negative_margin_shipments
                    ),
                );
            }
            if payout.net_amount().is_negative() {
                let message = format!("Seller owes {} for this batch", payout.net_amount().abs());
                warn!("Payout for seller {}: {}", payout.seller_id, message);
                payout.annotate(AnnotationKind::NegativePayout, message);
            }
            payouts.push(payout);
        }

        let net = total_net(payouts.iter().map(|p| &p.totals));
        if batch.state == BatchState::VendorSettled {
            batch.transition(BatchState::CustomerPayments, Utc::now())?;
        }
        batch.annotate(
            AnnotationKind::Info,
            format!("Prepared {} payouts totalling {}", payouts.len(), net),
        );

        for payout in payouts {
            changes = changes.insert_payout(payout);
        }
        let receipt = self.store.commit(changes.update_batch(batch)).await?;
        info!(
            "Batch {}: {} payouts prepared, {} for sellers",
            batch_id,
            receipt.payouts.len(),
            net
        );
        Ok(receipt.payouts)
    }

    /// draft → confirmed
    pub async fn confirm_payout(&self, payout_id: &PayoutId) -> Result<CustomerPayout> {
        let mut payout = self.store.get_payout(payout_id).await?;
        payout.confirm()?;
        let receipt = self.store.commit(ChangeSet::new().update_payout(payout)).await?;
        first_payout(receipt.payouts)
    }

    /// Set how an unpaid payout reaches the seller
    pub async fn set_payment_details(
        &self,
        payout_id: &PayoutId,
        method: PayoutMethod,
        reference: Option<String>,
    ) -> Result<CustomerPayout> {
        let mut payout = self.store.get_payout(payout_id).await?;
        payout.set_payment_details(method, reference)?;
        let receipt = self.store.commit(ChangeSet::new().update_payout(payout)).await?;
        first_payout(receipt.payouts)
    }

    /// confirmed → paid.
    ///
    /// Applies `min(net, Σ open invoice residuals)` to the seller's invoices,
    /// oldest first, and issues a credit note for whatever is left. Any
    /// accounting failure voids what was already posted and leaves the payout
    /// and its shipments unchanged.
    pub async fn settle_payout(&self, payout_id: &PayoutId) -> Result<CustomerPayout> {
        let _guard = self.in_flight.enter("Payout", payout_id)?;
        let mut payout = self.store.get_payout(payout_id).await?;
        payout.ensure_state(PayoutState::Confirmed)?;
        let batch = self.store.get_batch(&payout.batch_id).await?;
        batch.ensure_state(&[BatchState::CustomerPayments, BatchState::Completed])?;

        let now = Utc::now();
        let ids: Vec<ShipmentId> = payout.shipment_ids.iter().cloned().collect();
        let mut shipments = self.store.get_shipments(&ids).await?;
        for shipment in shipments.iter_mut() {
            shipment.transition_cod_status(CodStatus::Settled, now)?;
        }
        payout.totals = payout_totals(shipments.iter());

        let partner = PartnerRef::Seller(payout.seller_id.clone());
        let mut invoices = self
            .accounting
            .find_documents(
                &DocumentQuery::for_shipments(DocumentKind::CustomerInvoice, ids)
                    .with_partner(partner.clone())
                    .open(),
            )
            .await
            .map_err(|e| e.during("find open invoices"))?;
        invoices.sort_by(|a, b| a.issued_on.cmp(&b.issued_on).then(a.sequence.cmp(&b.sequence)));

        let mut posted = Posted::default();
        let settled = self
            .post_and_commit(&batch, payout, shipments, &partner, &invoices, &mut posted)
            .await;
        match settled {
            Ok(payout) => {
                info!(
                    "Payout {} paid: net {}, applied {}, credit note {}",
                    payout.id,
                    payout.net_amount(),
                    payout.applied_to_invoices,
                    payout.credit_note_amount()
                );
                Ok(payout)
            }
            Err(e) => {
                self.compensate(&posted).await;
                Err(e)
            }
        }
    }

    async fn post_and_commit(
        &self,
        batch: &Batch,
        mut payout: CustomerPayout,
        shipments: Vec<Shipment>,
        partner: &PartnerRef,
        invoices: &[DocumentRef],
        posted: &mut Posted,
    ) -> Result<CustomerPayout> {
        let net = payout.net_amount();
        let outstanding: Money = invoices.iter().map(|i| i.residual).sum();
        let to_apply = self.config.currency.round(net.min(outstanding).non_negative());

        let mut remaining = to_apply;
        if to_apply.is_positive() {
            let memo = format!("COD Settlement - Batch {}", batch.name);
            let payment = self
                .accounting
                .create_payment(partner, to_apply, PaymentDirection::Inbound, &memo)
                .await
                .map_err(|e| e.during("create seller payment"))?;
            posted.payment = Some(payment.id.clone());

            for invoice in invoices {
                if !remaining.is_positive() {
                    break;
                }
                let paid_now = self
                    .accounting
                    .reconcile(&payment.id, &invoice.id, remaining.min(invoice.residual))
                    .await
                    .map_err(|e| e.during("reconcile customer invoice"))?;
                remaining -= paid_now;
                payout.offsets.push(InvoiceOffset {
                    invoice_id: invoice.id.clone(),
                    total: invoice.total,
                    advance_paid: invoice.paid_amount(),
                    residual_before: invoice.residual,
                    paid_now,
                });
            }
        }
        let applied = to_apply - remaining;
        payout.applied_to_invoices = applied;
        payout.linked_invoices = invoices.iter().map(|i| i.id.clone()).collect();

        if net.is_negative() {
            let message = format!(
                "Net amount {} is negative; nothing applied and no credit note issued",
                net
            );
            warn!("Payout {}: {}", payout.id, message);
            payout.annotate(AnnotationKind::NegativePayout, message);
        } else {
            let credit = net - applied;
            if credit.is_positive() {
                let memo = format!("COD Credit - Batch {}", batch.name);
                let note = self
                    .accounting
                    .create_credit_note(partner, credit, &memo)
                    .await
                    .map_err(|e| e.during("create credit note"))?;
                posted.credit_note = Some(note.id.clone());
                payout.credit_note = Some(CreditNoteRef {
                    id: note.id,
                    amount: credit,
                });
            }
        }

        payout.inbound_payment = posted.payment.clone();
        payout.state = PayoutState::Paid;
        payout.paid_on = Some(Utc::now().date_naive());
        payout.annotate(
            AnnotationKind::Settlement,
            format!(
                "Applied {} to {} invoices, credited {}, paid by {}",
                applied,
                payout.offsets.len(),
                payout.credit_note_amount(),
                payout.payment_method
            ),
        );

        let receipt = self
            .store
            .commit(ChangeSet::new().update_payout(payout).with_shipments(shipments))
            .await?;
        first_payout(receipt.payouts)
    }

    async fn compensate(&self, posted: &Posted) {
        if let Some(id) = &posted.credit_note {
            match self.accounting.void_document(id).await {
                Ok(()) => warn!("Credit note {} voided after a failed payout", id),
                Err(e) => error!("Failed to void credit note {}: {}", id, e),
            }
        }
        if let Some(id) = &posted.payment {
            match self.accounting.void_payment(id).await {
                Ok(()) => warn!("Seller payment {} voided after a failed payout", id),
                Err(e) => error!("Failed to void seller payment {}: {}", id, e),
            }
        }
    }

    /// Confirm and settle every unpaid payout of the batch.
    ///
    /// One failing payout does not stop the others; the batch completes once
    /// at least one payout has been paid.
    pub async fn settle_all_payouts(&self, batch_id: &BatchId) -> Result<PayoutRunReport> {
        let batch = self.store.get_batch(batch_id).await?;
        batch.ensure_state(&[BatchState::CustomerPayments, BatchState::Completed])?;

        let mut settled = Vec::new();
        let mut failures = Vec::new();
        for payout in self.store.list_payouts(batch_id).await? {
            if payout.state == PayoutState::Paid {
                continue;
            }
            let result = match payout.state {
                PayoutState::Draft => match self.confirm_payout(&payout.id).await {
                    Ok(_) => self.settle_payout(&payout.id).await,
                    Err(e) => Err(e),
                },
                _ => self.settle_payout(&payout.id).await,
            };
            match result {
                Ok(paid) => settled.push(paid),
                Err(e) => {
                    error!("Payout {} for seller {} failed: {}", payout.id, payout.seller_id, e);
                    failures.push(PayoutFailure {
                        payout_id: payout.id,
                        seller_id: payout.seller_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        let mut batch = self.store.get_batch(batch_id).await?;
        if batch.state == BatchState::CustomerPayments && !settled.is_empty() {
            batch.transition(BatchState::Completed, Utc::now())?;
            batch.annotate(
                AnnotationKind::Info,
                format!(
                    "Completed: {} payouts paid, {} failed",
                    settled.len(),
                    failures.len()
                ),
            );
            let receipt = self.store.commit(ChangeSet::new().update_batch(batch)).await?;
            batch = receipt
                .batches
                .into_iter()
                .next()
                .ok_or_else(|| CodError::storage("commit returned no batch"))?;
            info!("Batch {} completed", batch.name);
        }

        Ok(PayoutRunReport {
            batch,
            settled,
            failures,
        })
    }
}

fn first_payout(payouts: Vec<CustomerPayout>) -> Result<CustomerPayout> {
    payouts
        .into_iter()
        .next()
        .ok_or_else(|| CodError::storage("commit returned no payout"))
}
