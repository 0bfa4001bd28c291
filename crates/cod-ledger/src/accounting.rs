//! The accounting collaborator interface

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use cod_types::{
    DocumentId, DocumentQuery, DocumentRef, Money, PartnerRef, PaymentDirection, PaymentId,
    PaymentRef, ShipmentId,
};

use crate::Result;

/// A bill or invoice to post for one shipment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDocument {
    pub partner: PartnerRef,
    pub shipment_id: ShipmentId,
    pub amount: Money,
    pub issued_on: NaiveDate,
    pub due_on: NaiveDate,
    pub memo: String,
}

/// Posting and matching primitives the engine delegates to.
///
/// Every call is synchronous from the engine's point of view and may fail.
/// The engine compensates with `void_payment` / `void_document` when a later
/// step of the same operation fails.
#[async_trait::async_trait]
pub trait Accounting: Send + Sync {
    /// Post a vendor bill owed to a carrier
    async fn create_vendor_bill(&self, bill: NewDocument) -> Result<DocumentRef>;

    /// Post a customer invoice owed by a seller
    async fn create_customer_invoice(&self, invoice: NewDocument) -> Result<DocumentRef>;

    /// Posted, non-voided documents matching the query, in posting order
    async fn find_documents(&self, query: &DocumentQuery) -> Result<Vec<DocumentRef>>;

    /// Post a payment to or from a partner
    async fn create_payment(
        &self,
        partner: &PartnerRef,
        amount: Money,
        direction: PaymentDirection,
        memo: &str,
    ) -> Result<PaymentRef>;

    /// Match part of a payment against a document.
    ///
    /// Returns the amount actually applied, which never exceeds the
    /// document's residual or the payment's unapplied amount.
    async fn reconcile(&self, payment: &PaymentId, document: &DocumentId, amount: Money)
        -> Result<Money>;

    /// Post a credit note owed to a partner
    async fn create_credit_note(
        &self,
        partner: &PartnerRef,
        amount: Money,
        memo: &str,
    ) -> Result<DocumentRef>;

    /// Cancel a payment and unwind its reconciliations
    async fn void_payment(&self, payment: &PaymentId) -> Result<()>;

    /// Cancel a document and unwind any reconciliations against it
    async fn void_document(&self, document: &DocumentId) -> Result<()>;
}
