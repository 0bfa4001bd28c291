//! Advance payments collected at pickup
//!
//! A planned or confirmed advance reduces the COD amount the carrier collects.
//! Skipping or clearing it gives the amount back to the declared COD. Every
//! change goes through the store, which recomputes the shipment's figures.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use cod_ledger::Accounting;
use cod_store::CodStore;
use cod_types::{
    AdvanceSkipReason, AdvanceStatus, CodError, DocumentKind, DocumentQuery, Money, PartnerRef,
    PaymentDirection, PlannedAdvance, Result, Shipment, ShipmentId,
};

#[derive(Clone)]
pub struct AdvancePayments {
    store: Arc<dyn CodStore>,
    accounting: Arc<dyn Accounting>,
}

fn positive(amount: Money) -> Result<Money> {
    if amount.is_positive() {
        Ok(amount)
    } else {
        Err(CodError::InvalidAmount {
            message: format!("advance amount must be positive, got {}", amount),
        })
    }
}

impl AdvancePayments {
    pub fn new(store: Arc<dyn CodStore>, accounting: Arc<dyn Accounting>) -> Self {
        Self { store, accounting }
    }

    pub async fn plan_advance(&self, shipment_id: &ShipmentId, amount: Money) -> Result<Shipment> {
        let amount = positive(amount)?;
        let mut shipment = self.store.get_shipment(shipment_id).await?;
        shipment.update_advance(PlannedAdvance {
            amount,
            status: AdvanceStatus::Planned,
            planned_on: Some(Utc::now().date_naive()),
            ..PlannedAdvance::default()
        })?;
        let shipment = self.store.save_shipment(shipment).await?;
        info!(
            "Shipment {}: advance of {} planned, declared COD now {}",
            shipment.reference, amount, shipment.amounts.declared_cod
        );
        Ok(shipment)
    }

    pub async fn clear_advance(&self, shipment_id: &ShipmentId) -> Result<Shipment> {
        let mut shipment = self.store.get_shipment(shipment_id).await?;
        shipment.update_advance(PlannedAdvance::default())?;
        self.store.save_shipment(shipment).await
    }

    /// Record the advance as collected at pickup.
    ///
    /// Posts an inbound payment from the seller and matches it against the
    /// shipment's open invoice. A failed match is only logged; the payment
    /// stands and can be matched by hand.
    pub async fn confirm_at_pickup(
        &self,
        shipment_id: &ShipmentId,
        amount: Money,
        reference: Option<&str>,
    ) -> Result<Shipment> {
        let amount = positive(amount)?;
        let mut shipment = self.store.get_shipment(shipment_id).await?;
        let mut advance = PlannedAdvance {
            amount,
            status: AdvanceStatus::Confirmed,
            planned_on: shipment.advance.planned_on.or(Some(Utc::now().date_naive())),
            confirmed_at: Some(Utc::now()),
            ..PlannedAdvance::default()
        };
        // Checks the cost lock before anything is posted
        shipment.update_advance(advance.clone())?;

        let partner = PartnerRef::Seller(shipment.seller_id.clone());
        let memo = match reference {
            Some(reference) => format!("Advance {} - {}", shipment.reference, reference),
            None => format!("Advance {}", shipment.reference),
        };
        let payment = self
            .accounting
            .create_payment(&partner, amount, PaymentDirection::Inbound, &memo)
            .await
            .map_err(|e| e.during("create advance payment"))?;

        let invoices = self
            .accounting
            .find_documents(
                &DocumentQuery::for_shipments(DocumentKind::CustomerInvoice, [shipment.id.clone()])
                    .with_partner(partner)
                    .open(),
            )
            .await;
        match invoices {
            Ok(invoices) => match invoices.first() {
                Some(invoice) => {
                    let capped = amount.min(invoice.residual);
                    if let Err(e) = self.accounting.reconcile(&payment.id, &invoice.id, capped).await {
                        warn!("Advance payment {} not matched to invoice {}: {}", payment.id, invoice.id, e);
                    }
                }
                None => warn!("Shipment {}: no open invoice for advance payment {}", shipment.reference, payment.id),
            },
            Err(e) => warn!("Advance payment {} not matched: {}", payment.id, e),
        }

        advance.payment_id = Some(payment.id.clone());
        shipment.advance = advance;
        match self.store.save_shipment(shipment).await {
            Ok(shipment) => {
                info!("Shipment {}: advance of {} confirmed at pickup", shipment.reference, amount);
                Ok(shipment)
            }
            Err(e) => {
                if let Err(void) = self.accounting.void_payment(&payment.id).await {
                    warn!("Failed to void advance payment {}: {}", payment.id, void);
                }
                Err(e)
            }
        }
    }

    pub async fn skip_advance(
        &self,
        shipment_id: &ShipmentId,
        reason: AdvanceSkipReason,
        notes: Option<String>,
    ) -> Result<Shipment> {
        let mut shipment = self.store.get_shipment(shipment_id).await?;
        let advance = PlannedAdvance {
            status: AdvanceStatus::Skipped,
            skip_reason: Some(reason),
            skip_notes: notes,
            ..shipment.advance.clone()
        };
        shipment.update_advance(advance)?;
        let shipment = self.store.save_shipment(shipment).await?;
        info!("Shipment {}: advance skipped ({:?})", shipment.reference, reason);
        Ok(shipment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Harness;
    use cod_types::{CodStatus, DeliveryEvent};

    #[tokio::test]
    async fn test_plan_and_skip_adjust_declared_cod() {
        let h = Harness::new().await;
        let id = h.pending(100).await;

        let planned = h.engine.advances.plan_advance(&id, Money::from(40)).await.unwrap();
        assert_eq!(planned.advance.status, AdvanceStatus::Planned);
        assert_eq!(planned.amounts.declared_cod, Money::from(75));

        let skipped = h
            .engine
            .advances
            .skip_advance(&id, AdvanceSkipReason::Postponed, Some("next visit".into()))
            .await
            .unwrap();
        assert_eq!(skipped.advance.status, AdvanceStatus::Skipped);
        assert_eq!(skipped.amounts.declared_cod, Money::from(115));

        let cleared = h.engine.advances.clear_advance(&id).await.unwrap();
        assert_eq!(cleared.advance.status, AdvanceStatus::None);
        assert_eq!(cleared.advance.amount, Money::ZERO);
    }

    #[tokio::test]
    async fn test_confirm_at_pickup_pays_invoice() {
        let h = Harness::new().await;
        let id = h.pending(100).await;
        h.engine.billing.ensure_shipment_documents(&id).await.unwrap();

        let confirmed = h
            .engine
            .advances
            .confirm_at_pickup(&id, Money::from(20), Some("RCPT-7"))
            .await
            .unwrap();
        assert_eq!(confirmed.advance.status, AdvanceStatus::Confirmed);
        assert!(confirmed.advance.payment_id.is_some());
        assert_eq!(confirmed.amounts.declared_cod, Money::from(95));

        // invoice of 15 absorbs 15 of the 20
        assert!(h.open_documents(DocumentKind::CustomerInvoice).await.is_empty());
    }

    #[tokio::test]
    async fn test_advance_locked_after_receipt() {
        let h = Harness::new().await;
        let id = h.pending(100).await;
        let mut shipment = h.store.get_shipment(&id).await.unwrap();
        shipment
            .apply_delivery_event(DeliveryEvent::Delivered, Utc::now())
            .unwrap();
        shipment
            .transition_cod_status(CodStatus::ReceivedFromCourier, Utc::now())
            .unwrap();
        h.store.save_shipment(shipment).await.unwrap();

        let result = h.engine.advances.plan_advance(&id, Money::from(10)).await;
        assert!(matches!(result, Err(CodError::CostsLocked { .. })));
        assert!(h.ledger.payments().await.is_empty());

        let result = h.engine.advances.confirm_at_pickup(&id, Money::from(10), None).await;
        assert!(matches!(result, Err(CodError::CostsLocked { .. })));
        assert!(h.ledger.payments().await.is_empty());
    }
}
