//! COD collection batches
//!
//! A batch groups the delivered COD shipments of one carrier for one
//! collection date and walks them through carrier and seller settlement.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::{
    Annotation, AnnotationKind, BatchId, CarrierId, CodError, Money, PaymentId, Result, ShipmentId,
};

/// Batch lifecycle
///
/// ```text
/// draft → confirmed → collected → vendor_settled → customer_payments → completed
///   ↘         ↘
///    cancelled (from draft or confirmed only)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    Draft,
    Confirmed,
    Collected,
    VendorSettled,
    CustomerPayments,
    Completed,
    Cancelled,
}

impl BatchState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchState::Draft => "draft",
            BatchState::Confirmed => "confirmed",
            BatchState::Collected => "collected",
            BatchState::VendorSettled => "vendor_settled",
            BatchState::CustomerPayments => "customer_payments",
            BatchState::Completed => "completed",
            BatchState::Cancelled => "cancelled",
        }
    }

    /// Open batches hold claims on their shipments
    pub fn is_open(&self) -> bool {
        *self != BatchState::Cancelled
    }

    /// Cash has been counted, so a variance exists
    pub fn has_received_amount(&self) -> bool {
        matches!(
            self,
            BatchState::Collected
                | BatchState::VendorSettled
                | BatchState::CustomerPayments
                | BatchState::Completed
        )
    }

    pub fn can_transition_to(&self, next: BatchState) -> bool {
        use BatchState::*;
        matches!(
            (self, next),
            (Draft, Confirmed)
                | (Draft, Cancelled)
                | (Confirmed, Collected)
                | (Confirmed, Cancelled)
                | (Collected, VendorSettled)
                | (VendorSettled, CustomerPayments)
                | (CustomerPayments, Completed)
        )
    }
}

impl fmt::Display for BatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a batch came to exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum BatchOrigin {
    Manual,
    /// Created by the weekday scan; unique per (carrier, date)
    Scheduled,
    /// Created by the overdue sweep
    Overdue { threshold_days: u32 },
}

impl BatchOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchOrigin::Manual => "manual",
            BatchOrigin::Scheduled => "scheduled",
            BatchOrigin::Overdue { .. } => "overdue",
        }
    }
}

/// Aggregate figures of a batch, a pure function of its member shipments
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BatchTotals {
    pub shipment_count: usize,
    pub total_declared_cod: Money,
    pub total_goods_value: Money,
    pub total_shipping_charges: Money,
    pub total_company_charges: Money,
    pub amount_from_carrier: Money,
    /// What the carrier should remit
    pub expected_net_amount: Money,
    pub amount_for_sellers: Money,
    pub seller_count: usize,
    pub merchant_profit: Money,
    pub negative_margin_shipments: usize,
}

/// A dated group of one carrier's COD shipments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub id: BatchId,
    /// `{carrier code}-{YYYYMMDD}-{seq:03}`, assigned by the store at insert
    pub name: String,
    pub carrier_id: CarrierId,
    pub collection_date: NaiveDate,
    pub origin: BatchOrigin,
    pub state: BatchState,
    pub shipment_ids: BTreeSet<ShipmentId>,
    /// Recomputed by the store on every write
    pub totals: BatchTotals,
    /// Cash actually handed over by the carrier, entered by a person
    pub actual_received: Option<Money>,
    pub vendor_payment: Option<PaymentId>,
    pub annotations: Vec<Annotation>,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub collected_at: Option<DateTime<Utc>>,
    pub vendor_settled_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub version: u64,
}

impl Batch {
    pub fn new(
        carrier_id: CarrierId,
        collection_date: NaiveDate,
        origin: BatchOrigin,
        shipment_ids: impl IntoIterator<Item = ShipmentId>,
    ) -> Self {
        Self {
            id: BatchId::new(),
            name: String::new(),
            carrier_id,
            collection_date,
            origin,
            state: BatchState::Draft,
            shipment_ids: shipment_ids.into_iter().collect(),
            totals: BatchTotals::default(),
            actual_received: None,
            vendor_payment: None,
            annotations: Vec::new(),
            created_at: Utc::now(),
            confirmed_at: None,
            collected_at: None,
            vendor_settled_at: None,
            completed_at: None,
            cancelled_at: None,
            version: 0,
        }
    }

    /// Batch name for the `seq`-th batch of a carrier on a date
    pub fn format_name(carrier_code: &str, date: NaiveDate, seq: u32) -> String {
        format!("{}-{}-{:03}", carrier_code, date.format("%Y%m%d"), seq)
    }

    pub fn expected_net_amount(&self) -> Money {
        self.totals.expected_net_amount
    }

    /// `actual_received − expected_net_amount`, once the cash has been counted
    pub fn variance(&self) -> Option<Money> {
        if !self.state.has_received_amount() {
            return None;
        }
        self.actual_received
            .map(|actual| actual - self.totals.expected_net_amount)
    }

    pub fn is_open(&self) -> bool {
        self.state.is_open()
    }

    /// Reject unless the batch is in one of `allowed`
    pub fn ensure_state(&self, allowed: &[BatchState]) -> Result<()> {
        if allowed.contains(&self.state) {
            return Ok(());
        }
        Err(CodError::InvalidBatchState {
            batch_id: self.id.to_string(),
            expected: allowed
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(" or "),
            actual: self.state.to_string(),
        })
    }

    /// Move along a legal edge and stamp the matching timestamp
    pub fn transition(&mut self, next: BatchState, at: DateTime<Utc>) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(CodError::InvalidBatchState {
                batch_id: self.id.to_string(),
                expected: format!("a state that can move to {}", next),
                actual: self.state.to_string(),
            });
        }
        match next {
            BatchState::Confirmed => self.confirmed_at = Some(at),
            BatchState::Collected => self.collected_at = Some(at),
            BatchState::VendorSettled => self.vendor_settled_at = Some(at),
            BatchState::Completed => self.completed_at = Some(at),
            BatchState::Cancelled => self.cancelled_at = Some(at),
            BatchState::Draft | BatchState::CustomerPayments => {}
        }
        self.state = next;
        Ok(())
    }

    pub fn annotate(&mut self, kind: AnnotationKind, message: impl Into<String>) {
        self.annotations.push(Annotation::new(kind, message));
    }
}
