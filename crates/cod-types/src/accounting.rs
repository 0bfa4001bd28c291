//! References to records held by the accounting subsystem
//!
//! The engine decides what to reconcile and how much; the accounting
//! subsystem owns bills, invoices, payments and their matching.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{CarrierId, DocumentId, Money, PaymentId, SellerId, ShipmentId};

/// Counterparty of a document or payment
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartnerRef {
    Carrier(CarrierId),
    Seller(SellerId),
}

impl fmt::Display for PartnerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartnerRef::Carrier(id) => write!(f, "{}", id),
            PartnerRef::Seller(id) => write!(f, "{}", id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    /// Owed to the carrier for shipping
    VendorBill,
    /// Owed by the seller for the merchant's service
    CustomerInvoice,
    /// Owed to the seller, not yet wired
    CreditNote,
}

/// A posted bill, invoice or credit note
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRef {
    pub id: DocumentId,
    pub kind: DocumentKind,
    pub partner: PartnerRef,
    /// Shipment the document was raised for; credit notes have none
    pub shipment_id: Option<ShipmentId>,
    pub total: Money,
    /// Unpaid remainder
    pub residual: Money,
    pub issued_on: NaiveDate,
    pub due_on: NaiveDate,
    /// Posting order, used to break date ties
    pub sequence: u64,
    pub memo: String,
}

impl DocumentRef {
    pub fn is_open(&self) -> bool {
        self.residual.is_positive()
    }

    /// Amount already paid against the document
    pub fn paid_amount(&self) -> Money {
        self.total - self.residual
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentDirection {
    /// Money received by the merchant
    Inbound,
    /// Money paid out by the merchant
    Outbound,
}

/// A posted payment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRef {
    pub id: PaymentId,
    pub partner: PartnerRef,
    pub amount: Money,
    pub direction: PaymentDirection,
    pub memo: String,
    pub posted_at: DateTime<Utc>,
}

/// Filter for document lookups
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentQuery {
    pub kind: DocumentKind,
    pub shipment_ids: Vec<ShipmentId>,
    pub partner: Option<PartnerRef>,
    /// Only documents with a positive residual
    pub open_only: bool,
}

impl DocumentQuery {
    /// All posted documents of `kind` raised for the given shipments
    pub fn for_shipments(kind: DocumentKind, shipment_ids: impl IntoIterator<Item = ShipmentId>) -> Self {
        Self {
            kind,
            shipment_ids: shipment_ids.into_iter().collect(),
            partner: None,
            open_only: false,
        }
    }

    pub fn open(mut self) -> Self {
        self.open_only = true;
        self
    }

    pub fn with_partner(mut self, partner: PartnerRef) -> Self {
        self.partner = Some(partner);
        self
    }

    pub fn matches(&self, doc: &DocumentRef) -> bool {
        if doc.kind != self.kind {
            return false;
        }
        if self.open_only && !doc.is_open() {
            return false;
        }
        if let Some(partner) = &self.partner {
            if &doc.partner != partner {
                return false;
            }
        }
        match &doc.shipment_id {
            Some(shipment) => self.shipment_ids.contains(shipment),
            None => false,
        }
    }
}
