//! Seller payouts
//!
//! One payout per seller per batch. Settling a payout first offsets the
//! seller's open invoices and carries any leftover as a credit note.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::{
    Annotation, AnnotationKind, BatchId, CodError, DocumentId, Money, PaymentId, PayoutId, Result,
    SellerId, ShipmentId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutState {
    Draft,
    Confirmed,
    Paid,
}

impl PayoutState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayoutState::Draft => "draft",
            PayoutState::Confirmed => "confirmed",
            PayoutState::Paid => "paid",
        }
    }
}

impl fmt::Display for PayoutState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the cash reaches the seller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutMethod {
    Cash,
    #[default]
    Bank,
    Check,
}

impl PayoutMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayoutMethod::Cash => "cash",
            PayoutMethod::Bank => "bank",
            PayoutMethod::Check => "check",
        }
    }
}

impl fmt::Display for PayoutMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PayoutMethod {
    type Err = CodError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cash" => Ok(PayoutMethod::Cash),
            "bank" => Ok(PayoutMethod::Bank),
            "check" | "cheque" => Ok(PayoutMethod::Check),
            other => Err(CodError::InvalidRequest {
                message: format!("unknown payout method '{}', expected cash, bank or check", other),
            }),
        }
    }
}

/// Per-seller sums over the seller's shipments in a batch
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PayoutTotals {
    pub shipment_count: usize,
    /// Declared COD across the seller's shipments
    pub total_cod: Money,
    pub total_goods_value: Money,
    pub shipping_charges: Money,
    pub amount_from_carrier: Money,
    pub total_deductions: Money,
    /// Σ seller_net_payout
    pub net_amount: Money,
    pub negative_margin_shipments: usize,
}

/// How much of one invoice a payout absorbed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceOffset {
    pub invoice_id: DocumentId,
    pub total: Money,
    /// Paid before this payout, e.g. an advance collected at pickup
    pub advance_paid: Money,
    pub residual_before: Money,
    pub paid_now: Money,
}

/// Credit note carrying the part of a payout no invoice could absorb
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditNoteRef {
    pub id: DocumentId,
    pub amount: Money,
}

/// What the merchant owes one seller for one batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerPayout {
    pub id: PayoutId,
    pub batch_id: BatchId,
    pub seller_id: SellerId,
    pub shipment_ids: BTreeSet<ShipmentId>,
    pub totals: PayoutTotals,
    pub state: PayoutState,
    pub linked_invoices: Vec<DocumentId>,
    pub offsets: Vec<InvoiceOffset>,
    pub applied_to_invoices: Money,
    pub credit_note: Option<CreditNoteRef>,
    pub inbound_payment: Option<PaymentId>,
    pub payment_method: PayoutMethod,
    pub payment_reference: Option<String>,
    pub paid_on: Option<NaiveDate>,
    pub annotations: Vec<Annotation>,
    pub created_at: DateTime<Utc>,
    pub version: u64,
}

impl CustomerPayout {
    pub fn new(
        batch_id: BatchId,
        seller_id: SellerId,
        shipment_ids: impl IntoIterator<Item = ShipmentId>,
        totals: PayoutTotals,
    ) -> Self {
        Self {
            id: PayoutId::new(),
            batch_id,
            seller_id,
            shipment_ids: shipment_ids.into_iter().collect(),
            totals,
            state: PayoutState::Draft,
            linked_invoices: Vec::new(),
            offsets: Vec::new(),
            applied_to_invoices: Money::ZERO,
            credit_note: None,
            inbound_payment: None,
            payment_method: PayoutMethod::default(),
            payment_reference: None,
            paid_on: None,
            annotations: Vec::new(),
            created_at: Utc::now(),
            version: 0,
        }
    }

    pub fn net_amount(&self) -> Money {
        self.totals.net_amount
    }

    pub fn credit_note_amount(&self) -> Money {
        self.credit_note
            .as_ref()
            .map(|note| note.amount)
            .unwrap_or(Money::ZERO)
    }

    pub fn ensure_state(&self, expected: PayoutState) -> Result<()> {
        if self.state == expected {
            return Ok(());
        }
        Err(CodError::InvalidPayoutState {
            payout_id: self.id.to_string(),
            expected: expected.to_string(),
            actual: self.state.to_string(),
        })
    }

    /// draft → confirmed
    pub fn confirm(&mut self) -> Result<()> {
        self.ensure_state(PayoutState::Draft)?;
        self.state = PayoutState::Confirmed;
        Ok(())
    }

    /// Record how the seller is paid; fixed once the payout is paid
    pub fn set_payment_details(&mut self, method: PayoutMethod, reference: Option<String>) -> Result<()> {
        if self.state == PayoutState::Paid {
            return Err(CodError::InvalidPayoutState {
                payout_id: self.id.to_string(),
                expected: "draft or confirmed".to_string(),
                actual: self.state.to_string(),
            });
        }
        self.payment_method = method;
        self.payment_reference = reference
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty());
        Ok(())
    }

    pub fn annotate(&mut self, kind: AnnotationKind, message: impl Into<String>) {
        self.annotations.push(Annotation::new(kind, message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confirm_only_from_draft() {
        let mut payout = CustomerPayout::new(
            BatchId::new(),
            SellerId::new(),
            vec![ShipmentId::new()],
            PayoutTotals::default(),
        );
        payout.confirm().unwrap();
        assert_eq!(payout.state, PayoutState::Confirmed);
        assert!(matches!(
            payout.confirm(),
            Err(CodError::InvalidPayoutState { .. })
        ));
        assert_eq!(payout.payment_method, PayoutMethod::Bank);
        assert_eq!(payout.credit_note_amount(), Money::ZERO);
    }

    #[test]
    fn test_payment_details_until_paid() {
        let mut payout = CustomerPayout::new(
            BatchId::new(),
            SellerId::new(),
            vec![ShipmentId::new()],
            PayoutTotals::default(),
        );
        let method: PayoutMethod = " Cash ".parse().unwrap();
        payout
            .set_payment_details(method, Some(" RCPT-9 ".to_string()))
            .unwrap();
        assert_eq!(payout.payment_method, PayoutMethod::Cash);
        assert_eq!(payout.payment_reference.as_deref(), Some("RCPT-9"));

        payout.set_payment_details(PayoutMethod::Check, Some("  ".to_string())).unwrap();
        assert_eq!(payout.payment_reference, None);

        payout.state = PayoutState::Paid;
        assert!(matches!(
            payout.set_payment_details(PayoutMethod::Bank, None),
            Err(CodError::InvalidPayoutState { .. })
        ));
        assert!("wire".parse::<PayoutMethod>().is_err());
    }
}
