//! Per-shipment accounting documents

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use cod_ledger::{Accounting, NewDocument};
use cod_store::CodStore;
use cod_types::{
    DocumentKind, DocumentQuery, DocumentRef, Money, PartnerRef, Result, Shipment, ShipmentId,
    VendorBillStatus,
};

/// Days between issuing a document and its due date
const PAYMENT_TERM_DAYS: i64 = 7;

/// Documents held for one shipment after [`ShipmentBilling::ensure_shipment_documents`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShipmentDocuments {
    pub shipment: Shipment,
    /// Seller's invoice for the merchant's service fee
    pub invoice: Option<DocumentRef>,
    /// Carrier's bill for shipping
    pub vendor_bill: Option<DocumentRef>,
    /// Documents posted by this call, as opposed to found
    pub created: usize,
}

/// Posts the invoice and vendor bill every COD shipment settles against
#[derive(Clone)]
pub struct ShipmentBilling {
    store: Arc<dyn CodStore>,
    accounting: Arc<dyn Accounting>,
}

impl ShipmentBilling {
    pub fn new(store: Arc<dyn CodStore>, accounting: Arc<dyn Accounting>) -> Self {
        Self { store, accounting }
    }

    /// Post the customer invoice and vendor bill of a shipment unless they
    /// already exist. A zero service fee posts no invoice; a zero shipping
    /// cost still posts a vendor bill, already settled.
    pub async fn ensure_shipment_documents(&self, shipment_id: &ShipmentId) -> Result<ShipmentDocuments> {
        let mut shipment = self.store.get_shipment(shipment_id).await?;
        let mut created = 0;

        let invoice = self
            .ensure(
                &shipment,
                DocumentKind::CustomerInvoice,
                PartnerRef::Seller(shipment.seller_id.clone()),
                shipment.costs.company_service_cost,
                &mut created,
            )
            .await?;
        let vendor_bill = self
            .ensure(
                &shipment,
                DocumentKind::VendorBill,
                PartnerRef::Carrier(shipment.carrier_id.clone()),
                shipment.costs.shipping_cost,
                &mut created,
            )
            .await?;

        let status = match (&vendor_bill, shipment.vendor_bill_status) {
            (_, VendorBillStatus::Paid) => VendorBillStatus::Paid,
            (Some(_), _) => VendorBillStatus::Billed,
            (None, current) => current,
        };
        if status != shipment.vendor_bill_status {
            shipment.vendor_bill_status = status;
            shipment = self.store.save_shipment(shipment).await?;
        }

        if created > 0 {
            info!("Shipment {}: {} documents posted", shipment.reference, created);
        }
        Ok(ShipmentDocuments {
            shipment,
            invoice,
            vendor_bill,
            created,
        })
    }

    async fn ensure(
        &self,
        shipment: &Shipment,
        kind: DocumentKind,
        partner: PartnerRef,
        amount: Money,
        created: &mut usize,
    ) -> Result<Option<DocumentRef>> {
        let existing = self
            .accounting
            .find_documents(
                &DocumentQuery::for_shipments(kind, [shipment.id.clone()]).with_partner(partner.clone()),
            )
            .await
            .map_err(|e| e.during("find shipment documents"))?;
        if let Some(document) = existing.into_iter().next() {
            debug!("Shipment {}: reusing {:?} {}", shipment.reference, kind, document.id);
            return Ok(Some(document));
        }
        // every shipment owes the carrier a bill, even a free one
        let zero_bill = kind == DocumentKind::VendorBill && amount.is_zero();
        if !amount.is_positive() && !zero_bill {
            return Ok(None);
        }

        let issued_on = Utc::now().date_naive();
        let document = NewDocument {
            partner,
            shipment_id: shipment.id.clone(),
            amount,
            issued_on,
            due_on: issued_on + Duration::days(PAYMENT_TERM_DAYS),
            memo: shipment.reference.clone(),
        };
        let posted = match kind {
            DocumentKind::VendorBill => self.accounting.create_vendor_bill(document).await,
            _ => self.accounting.create_customer_invoice(document).await,
        }
        .map_err(|e| e.during("post shipment document"))?;
        *created += 1;
        Ok(Some(posted))
    }
}
