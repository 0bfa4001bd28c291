//! In-memory accounting ledger
//!
//! Thread-safe and designed for concurrent access. Used by tests and by the
//! CLI, which persists it as a JSON snapshot between runs.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use cod_types::{
    DocumentId, DocumentKind, DocumentQuery, DocumentRef, Money, PartnerRef, PaymentDirection,
    PaymentId, PaymentRef, ShipmentId,
};

use crate::accounting::{Accounting, NewDocument};
use crate::{LedgerError, Result};

/// Why a journal entry was written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum EntryReason {
    DocumentPosted { document_id: DocumentId, kind: DocumentKind },
    PaymentPosted { payment_id: PaymentId, direction: PaymentDirection },
    Reconciled { payment_id: PaymentId, document_id: DocumentId },
    PaymentVoided { payment_id: PaymentId },
    DocumentVoided { document_id: DocumentId },
}

/// A single append-only journal entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub entry_id: String,
    pub partner: PartnerRef,
    pub amount: Money,
    pub reason: EntryReason,
    pub created_at: DateTime<Utc>,
}

/// A match between a payment and a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reconciliation {
    pub payment_id: PaymentId,
    pub document_id: DocumentId,
    pub amount: Money,
    pub reversed: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct DocumentRecord {
    document: DocumentRef,
    voided: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct PaymentRecord {
    payment: PaymentRef,
    unapplied: Money,
    voided: bool,
}

/// Serializable state of the whole ledger
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    documents: Vec<DocumentRecord>,
    payments: Vec<PaymentRecord>,
    reconciliations: Vec<Reconciliation>,
    entries: Vec<LedgerEntry>,
    next_sequence: u64,
}

#[derive(Debug, Default)]
struct LedgerState {
    documents: HashMap<DocumentId, DocumentRecord>,
    payments: HashMap<PaymentId, PaymentRecord>,
    reconciliations: Vec<Reconciliation>,
    entries: Vec<LedgerEntry>,
    next_sequence: u64,
}

impl LedgerState {
    fn journal(&mut self, partner: PartnerRef, amount: Money, reason: EntryReason) {
        self.entries.push(LedgerEntry {
            entry_id: format!("entry_{}", Uuid::new_v4()),
            partner,
            amount,
            reason,
            created_at: Utc::now(),
        });
    }

    fn post_document(
        &mut self,
        kind: DocumentKind,
        partner: PartnerRef,
        shipment_id: Option<ShipmentId>,
        amount: Money,
        (issued_on, due_on): (NaiveDate, NaiveDate),
        memo: String,
    ) -> Result<DocumentRef> {
        // zero vendor bills post already settled
        let zero_bill = kind == DocumentKind::VendorBill && amount.is_zero();
        if !amount.is_positive() && !zero_bill {
            return Err(LedgerError::InvalidAmount {
                message: format!("document amount must be positive, got {}", amount),
            });
        }
        self.next_sequence += 1;
        let document = DocumentRef {
            id: DocumentId::new(),
            kind,
            partner: partner.clone(),
            shipment_id,
            total: amount,
            residual: amount,
            issued_on,
            due_on,
            sequence: self.next_sequence,
            memo,
        };
        self.documents.insert(
            document.id.clone(),
            DocumentRecord {
                document: document.clone(),
                voided: false,
            },
        );
        self.journal(
            partner,
            amount,
            EntryReason::DocumentPosted {
                document_id: document.id.clone(),
                kind,
            },
        );
        Ok(document)
    }

    /// Reverse every live reconciliation matching `filter`
    fn unwind(&mut self, filter: impl Fn(&Reconciliation) -> bool) {
        for rec in self.reconciliations.iter_mut().filter(|r| !r.reversed) {
            if !filter(rec) {
                continue;
            }
            rec.reversed = true;
            if let Some(doc) = self.documents.get_mut(&rec.document_id) {
                doc.document.residual += rec.amount;
            }
            if let Some(payment) = self.payments.get_mut(&rec.payment_id) {
                payment.unapplied += rec.amount;
            }
        }
    }
}

/// In-memory implementation of [`Accounting`]
#[derive(Clone, Default)]
pub struct InMemoryLedger {
    state: Arc<RwLock<LedgerState>>,
}

impl InMemoryLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore a ledger from a snapshot
    pub fn from_snapshot(snapshot: LedgerSnapshot) -> Self {
        let state = LedgerState {
            documents: snapshot
                .documents
                .into_iter()
                .map(|r| (r.document.id.clone(), r))
                .collect(),
            payments: snapshot
                .payments
                .into_iter()
                .map(|r| (r.payment.id.clone(), r))
                .collect(),
            reconciliations: snapshot.reconciliations,
            entries: snapshot.entries,
            next_sequence: snapshot.next_sequence,
        };
        Self {
            state: Arc::new(RwLock::new(state)),
        }
    }

    /// Capture the current state
    pub async fn snapshot(&self) -> LedgerSnapshot {
        let state = self.state.read().await;
        let mut documents: Vec<DocumentRecord> = state.documents.values().cloned().collect();
        documents.sort_by_key(|r| r.document.sequence);
        let mut payments: Vec<PaymentRecord> = state.payments.values().cloned().collect();
        payments.sort_by_key(|r| r.payment.posted_at);
        LedgerSnapshot {
            documents,
            payments,
            reconciliations: state.reconciliations.clone(),
            entries: state.entries.clone(),
            next_sequence: state.next_sequence,
        }
    }

    /// Look up a document, voided or not
    pub async fn document(&self, id: &DocumentId) -> Option<DocumentRef> {
        self.state
            .read()
            .await
            .documents
            .get(id)
            .map(|r| r.document.clone())
    }

    /// Live (non-voided) payments, oldest first
    pub async fn payments(&self) -> Vec<PaymentRef> {
        let state = self.state.read().await;
        let mut payments: Vec<PaymentRef> = state
            .payments
            .values()
            .filter(|r| !r.voided)
            .map(|r| r.payment.clone())
            .collect();
        payments.sort_by_key(|p| p.posted_at);
        payments
    }

    /// Live (non-voided) documents of a kind, in posting order
    pub async fn documents_of_kind(&self, kind: DocumentKind) -> Vec<DocumentRef> {
        let state = self.state.read().await;
        let mut docs: Vec<DocumentRef> = state
            .documents
            .values()
            .filter(|r| !r.voided && r.document.kind == kind)
            .map(|r| r.document.clone())
            .collect();
        docs.sort_by_key(|d| d.sequence);
        docs
    }

    /// Reconciliations that have not been reversed
    pub async fn live_reconciliations(&self) -> Vec<Reconciliation> {
        self.state
            .read()
            .await
            .reconciliations
            .iter()
            .filter(|r| !r.reversed)
            .cloned()
            .collect()
    }

    /// Full journal
    pub async fn entries(&self) -> Vec<LedgerEntry> {
        self.state.read().await.entries.clone()
    }
}

#[async_trait::async_trait]
impl Accounting for InMemoryLedger {
    async fn create_vendor_bill(&self, bill: NewDocument) -> Result<DocumentRef> {
        let mut state = self.state.write().await;
        state.post_document(
            DocumentKind::VendorBill,
            bill.partner,
            Some(bill.shipment_id),
            bill.amount,
            (bill.issued_on, bill.due_on),
            bill.memo,
        )
    }

    async fn create_customer_invoice(&self, invoice: NewDocument) -> Result<DocumentRef> {
        let mut state = self.state.write().await;
        state.post_document(
            DocumentKind::CustomerInvoice,
            invoice.partner,
            Some(invoice.shipment_id),
            invoice.amount,
            (invoice.issued_on, invoice.due_on),
            invoice.memo,
        )
    }

    async fn find_documents(&self, query: &DocumentQuery) -> Result<Vec<DocumentRef>> {
        let state = self.state.read().await;
        let mut docs: Vec<DocumentRef> = state
            .documents
            .values()
            .filter(|r| !r.voided && query.matches(&r.document))
            .map(|r| r.document.clone())
            .collect();
        docs.sort_by_key(|d| d.sequence);
        Ok(docs)
    }

    async fn create_payment(
        &self,
        partner: &PartnerRef,
        amount: Money,
        direction: PaymentDirection,
        memo: &str,
    ) -> Result<PaymentRef> {
        if !amount.is_positive() {
            return Err(LedgerError::InvalidAmount {
                message: format!("payment amount must be positive, got {}", amount),
            });
        }

        let mut state = self.state.write().await;
        let payment = PaymentRef {
            id: PaymentId::new(),
            partner: partner.clone(),
            amount,
            direction,
            memo: memo.to_string(),
            posted_at: Utc::now(),
        };
        state.payments.insert(
            payment.id.clone(),
            PaymentRecord {
                payment: payment.clone(),
                unapplied: amount,
                voided: false,
            },
        );
        state.journal(
            partner.clone(),
            amount,
            EntryReason::PaymentPosted {
                payment_id: payment.id.clone(),
                direction,
            },
        );
        debug!("Payment {} posted: {} {:?} for {}", payment.id, amount, direction, partner);
        Ok(payment)
    }

    async fn reconcile(
        &self,
        payment_id: &PaymentId,
        document_id: &DocumentId,
        amount: Money,
    ) -> Result<Money> {
        if !amount.is_positive() {
            return Err(LedgerError::InvalidAmount {
                message: format!("reconciliation amount must be positive, got {}", amount),
            });
        }

        let mut state = self.state.write().await;
        let rejected = |reason: &str| LedgerError::ReconciliationRejected {
            payment_id: payment_id.to_string(),
            document_id: document_id.to_string(),
            reason: reason.to_string(),
        };

        let payment = state
            .payments
            .get(payment_id)
            .filter(|p| !p.voided)
            .cloned()
            .ok_or_else(|| LedgerError::PaymentNotFound {
                payment_id: payment_id.to_string(),
            })?;
        let document = state
            .documents
            .get(document_id)
            .filter(|d| !d.voided)
            .map(|d| d.document.clone())
            .ok_or_else(|| LedgerError::DocumentNotFound {
                document_id: document_id.to_string(),
            })?;

        if payment.payment.partner != document.partner {
            return Err(rejected("partner mismatch"));
        }
        let direction_ok = matches!(
            (document.kind, payment.payment.direction),
            (DocumentKind::VendorBill, PaymentDirection::Outbound)
                | (DocumentKind::CustomerInvoice, PaymentDirection::Inbound)
        );
        if !direction_ok {
            return Err(rejected("payment direction does not settle this document kind"));
        }

        let applied = amount.min(document.residual).min(payment.unapplied);
        if !applied.is_positive() {
            return Err(rejected("nothing left to apply"));
        }

        if let Some(doc) = state.documents.get_mut(document_id) {
            doc.document.residual -= applied;
        }
        if let Some(p) = state.payments.get_mut(payment_id) {
            p.unapplied -= applied;
        }
        state.reconciliations.push(Reconciliation {
            payment_id: payment_id.clone(),
            document_id: document_id.clone(),
            amount: applied,
            reversed: false,
            created_at: Utc::now(),
        });
        state.journal(
            document.partner.clone(),
            applied,
            EntryReason::Reconciled {
                payment_id: payment_id.clone(),
                document_id: document_id.clone(),
            },
        );
        Ok(applied)
    }

    async fn create_credit_note(
        &self,
        partner: &PartnerRef,
        amount: Money,
        memo: &str,
    ) -> Result<DocumentRef> {
        let today = Utc::now().date_naive();
        let mut state = self.state.write().await;
        state.post_document(
            DocumentKind::CreditNote,
            partner.clone(),
            None,
            amount,
            (today, today),
            memo.to_string(),
        )
    }

    async fn void_payment(&self, payment_id: &PaymentId) -> Result<()> {
        let mut state = self.state.write().await;
        let record = state
            .payments
            .get_mut(payment_id)
            .ok_or_else(|| LedgerError::PaymentNotFound {
                payment_id: payment_id.to_string(),
            })?;
        if record.voided {
            return Err(LedgerError::AlreadyVoided {
                entity: "Payment".to_string(),
                id: payment_id.to_string(),
            });
        }
        record.voided = true;
        let partner = record.payment.partner.clone();
        let amount = record.payment.amount;

        state.unwind(|r| &r.payment_id == payment_id);
        state.journal(
            partner,
            amount,
            EntryReason::PaymentVoided {
                payment_id: payment_id.clone(),
            },
        );
        warn!("Payment voided: {}", payment_id);
        Ok(())
    }

    async fn void_document(&self, document_id: &DocumentId) -> Result<()> {
        let mut state = self.state.write().await;
        let record = state
            .documents
            .get_mut(document_id)
            .ok_or_else(|| LedgerError::DocumentNotFound {
                document_id: document_id.to_string(),
            })?;
        if record.voided {
            return Err(LedgerError::AlreadyVoided {
                entity: "Document".to_string(),
                id: document_id.to_string(),
            });
        }
        record.voided = true;
        let partner = record.document.partner.clone();
        let amount = record.document.total;

        state.unwind(|r| &r.document_id == document_id);
        state.journal(
            partner,
            amount,
            EntryReason::DocumentVoided {
                document_id: document_id.clone(),
            },
        );
        warn!("Document voided: {}", document_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cod_types::{CarrierId, SellerId};

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 1).unwrap()
    }

    fn invoice(seller: &SellerId, shipment: &ShipmentId, amount: i64) -> NewDocument {
        NewDocument {
            partner: PartnerRef::Seller(seller.clone()),
            shipment_id: shipment.clone(),
            amount: Money::from(amount),
            issued_on: date(),
            due_on: date(),
            memo: "service".to_string(),
        }
    }

    #[tokio::test]
    async fn test_reconcile_caps_at_residual() {
        let ledger = InMemoryLedger::new();
        let seller = SellerId::new();
        let partner = PartnerRef::Seller(seller.clone());
        let shipment = ShipmentId::new();

        let doc = ledger
            .create_customer_invoice(invoice(&seller, &shipment, 120))
            .await
            .unwrap();
        let payment = ledger
            .create_payment(&partner, Money::from(200), PaymentDirection::Inbound, "memo")
            .await
            .unwrap();

        let applied = ledger
            .reconcile(&payment.id, &doc.id, Money::from(150))
            .await
            .unwrap();
        assert_eq!(applied, Money::from(120));
        assert_eq!(ledger.document(&doc.id).await.unwrap().residual, Money::ZERO);

        // fully paid documents drop out of open queries
        let open = ledger
            .find_documents(
                &DocumentQuery::for_shipments(DocumentKind::CustomerInvoice, vec![shipment]).open(),
            )
            .await
            .unwrap();
        assert!(open.is_empty());
    }

    #[tokio::test]
    async fn test_reconcile_rejects_wrong_direction_and_partner() {
        let ledger = InMemoryLedger::new();
        let seller = SellerId::new();
        let shipment = ShipmentId::new();
        let doc = ledger
            .create_customer_invoice(invoice(&seller, &shipment, 50))
            .await
            .unwrap();

        let outbound = ledger
            .create_payment(
                &PartnerRef::Seller(seller.clone()),
                Money::from(50),
                PaymentDirection::Outbound,
                "memo",
            )
            .await
            .unwrap();
        let result = ledger.reconcile(&outbound.id, &doc.id, Money::from(50)).await;
        assert!(matches!(result, Err(LedgerError::ReconciliationRejected { .. })));

        let stranger = ledger
            .create_payment(
                &PartnerRef::Carrier(CarrierId::new()),
                Money::from(50),
                PaymentDirection::Inbound,
                "memo",
            )
            .await
            .unwrap();
        let result = ledger.reconcile(&stranger.id, &doc.id, Money::from(50)).await;
        assert!(matches!(result, Err(LedgerError::ReconciliationRejected { .. })));
    }

    #[tokio::test]
    async fn test_void_payment_restores_residuals() {
        let ledger = InMemoryLedger::new();
        let seller = SellerId::new();
        let partner = PartnerRef::Seller(seller.clone());
        let a = ledger
            .create_customer_invoice(invoice(&seller, &ShipmentId::new(), 30))
            .await
            .unwrap();
        let b = ledger
            .create_customer_invoice(invoice(&seller, &ShipmentId::new(), 40))
            .await
            .unwrap();
        let payment = ledger
            .create_payment(&partner, Money::from(70), PaymentDirection::Inbound, "memo")
            .await
            .unwrap();
        ledger.reconcile(&payment.id, &a.id, Money::from(30)).await.unwrap();
        ledger.reconcile(&payment.id, &b.id, Money::from(40)).await.unwrap();

        ledger.void_payment(&payment.id).await.unwrap();

        assert_eq!(ledger.document(&a.id).await.unwrap().residual, Money::from(30));
        assert_eq!(ledger.document(&b.id).await.unwrap().residual, Money::from(40));
        assert!(ledger.payments().await.is_empty());
        assert!(ledger.live_reconciliations().await.is_empty());
        assert!(matches!(
            ledger.void_payment(&payment.id).await,
            Err(LedgerError::AlreadyVoided { .. })
        ));
    }

    #[tokio::test]
    async fn test_snapshot_round_trip_keeps_sequence() {
        let ledger = InMemoryLedger::new();
        let seller = SellerId::new();
        ledger
            .create_customer_invoice(invoice(&seller, &ShipmentId::new(), 10))
            .await
            .unwrap();

        let json = serde_json::to_string(&ledger.snapshot().await).unwrap();
        let restored = InMemoryLedger::from_snapshot(serde_json::from_str(&json).unwrap());
        let next = restored
            .create_customer_invoice(invoice(&seller, &ShipmentId::new(), 10))
            .await
            .unwrap();

        assert_eq!(next.sequence, 2);
        assert_eq!(restored.entries().await.len(), 2);
    }

    #[tokio::test]
    async fn test_zero_amounts_rejected() {
        let ledger = InMemoryLedger::new();
        let result = ledger
            .create_credit_note(&PartnerRef::Seller(SellerId::new()), Money::ZERO, "memo")
            .await;
        assert!(matches!(result, Err(LedgerError::InvalidAmount { .. })));
    }

    #[tokio::test]
    async fn test_zero_vendor_bill_posts_settled() {
        let ledger = InMemoryLedger::new();
        let shipment = ShipmentId::new();
        let bill = ledger
            .create_vendor_bill(NewDocument {
                partner: PartnerRef::Carrier(CarrierId::new()),
                amount: Money::ZERO,
                ..invoice(&SellerId::new(), &shipment, 0)
            })
            .await
            .unwrap();
        assert_eq!(bill.residual, Money::ZERO);
        assert!(!bill.is_open());

        let zero_invoice = ledger
            .create_customer_invoice(invoice(&SellerId::new(), &shipment, 0))
            .await;
        assert!(matches!(zero_invoice, Err(LedgerError::InvalidAmount { .. })));
        let negative_bill = ledger
            .create_vendor_bill(NewDocument {
                partner: PartnerRef::Carrier(CarrierId::new()),
                ..invoice(&SellerId::new(), &shipment, -5)
            })
            .await;
        assert!(matches!(negative_bill, Err(LedgerError::InvalidAmount { .. })));
    }
}
