//! Shipment types consumed by the engine
//!
//! Shipments are owned by the shipment lifecycle collaborator. The engine
//! reads their cost inputs and delivery state and writes back a COD status.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{CarrierId, CodError, Money, PaymentId, Result, SellerId, ShipmentId};

/// How the buyer pays for the shipment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Carrier collects cash from the buyer at delivery
    Cod,
    Prepaid,
    Other,
}

/// Physical delivery state reported by the shipment collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    Draft,
    Confirmed,
    PickedUp,
    InTransit,
    OutForDelivery,
    Delivered,
    Returned,
    Cancelled,
}

impl DeliveryState {
    /// Still on its way to the buyer
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            DeliveryState::Draft
                | DeliveryState::Confirmed
                | DeliveryState::PickedUp
                | DeliveryState::InTransit
                | DeliveryState::OutForDelivery
        )
    }
}

/// COD lifecycle of a shipment
///
/// ```text
/// not_applicable → pending → collected_at_courier → received_from_courier → settled
///                     ↘ cancelled / refunded
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodStatus {
    NotApplicable,
    Pending,
    CollectedAtCourier,
    ReceivedFromCourier,
    Settled,
    Cancelled,
    Refunded,
}

impl CodStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CodStatus::NotApplicable => "not_applicable",
            CodStatus::Pending => "pending",
            CodStatus::CollectedAtCourier => "collected_at_courier",
            CodStatus::ReceivedFromCourier => "received_from_courier",
            CodStatus::Settled => "settled",
            CodStatus::Cancelled => "cancelled",
            CodStatus::Refunded => "refunded",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CodStatus::Settled | CodStatus::Cancelled | CodStatus::Refunded
        )
    }

    /// Allowed edges of the COD state machine.
    ///
    /// `received_from_courier → collected_at_courier` is the revert taken when
    /// a confirmed batch is cancelled.
    pub fn can_transition_to(&self, next: CodStatus) -> bool {
        use CodStatus::*;
        matches!(
            (self, next),
            (NotApplicable, Pending)
                | (Pending, CollectedAtCourier)
                | (Pending, Cancelled)
                | (Pending, Refunded)
                | (CollectedAtCourier, ReceivedFromCourier)
                | (CollectedAtCourier, Cancelled)
                | (CollectedAtCourier, Refunded)
                | (ReceivedFromCourier, Settled)
                | (ReceivedFromCourier, CollectedAtCourier)
        )
    }
}

impl fmt::Display for CodStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Billing state of the carrier's vendor bill for this shipment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VendorBillStatus {
    NoBill,
    ToBill,
    Billed,
    Paid,
}

/// State of an advance the buyer pledged to pay before delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvanceStatus {
    None,
    Planned,
    Confirmed,
    Skipped,
}

/// Why a planned advance was not collected at pickup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvanceSkipReason {
    CustomerNotPaid,
    Postponed,
    Cancelled,
    Other,
}

/// A planned advance payment against the shipment's COD amount
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedAdvance {
    pub amount: Money,
    pub status: AdvanceStatus,
    pub planned_on: Option<NaiveDate>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub payment_id: Option<PaymentId>,
    pub skip_reason: Option<AdvanceSkipReason>,
    pub skip_notes: Option<String>,
}

impl PlannedAdvance {
    /// Whether the advance reduces the COD amount declared to the carrier
    pub fn reduces_cod(&self) -> bool {
        matches!(self.status, AdvanceStatus::Planned | AdvanceStatus::Confirmed)
    }

    /// Amount subtracted from the base COD
    pub fn effective_amount(&self) -> Money {
        if self.reduces_cod() {
            self.amount
        } else {
            Money::ZERO
        }
    }
}

impl Default for PlannedAdvance {
    fn default() -> Self {
        Self {
            amount: Money::ZERO,
            status: AdvanceStatus::None,
            planned_on: None,
            confirmed_at: None,
            payment_id: None,
            skip_reason: None,
            skip_notes: None,
        }
    }
}

/// Raw cost inputs of a shipment
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CostInputs {
    /// Value of the goods the buyer pays for
    pub goods_value: Money,
    /// Amount the carrier keeps
    pub shipping_cost: Money,
    /// Total fee the merchant charges the seller, services included
    pub company_service_cost: Money,
    /// Base fee used when services are not included in the COD amount
    pub company_base_cost: Money,
    /// Whether the buyer pays the service fee as part of COD
    pub include_services_in_cod: bool,
}

/// Figures derived from the cost inputs, never edited by hand
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CodAmounts {
    pub base_cod: Money,
    pub advance: Money,
    /// Amount the carrier collects from the buyer
    pub declared_cod: Money,
    /// What the carrier remits after keeping its shipping cost
    pub amount_from_carrier: Money,
    pub merchant_margin: Money,
    /// Positive part of the margin, deducted from the seller
    pub total_deductions: Money,
    pub seller_net_payout: Money,
    pub negative_margin: bool,
}

/// Delivery events pushed by the shipment collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryEvent {
    /// Movement between in-flight states
    Progress(DeliveryState),
    Delivered,
    Returned,
    Cancelled,
}

/// A shipment as seen by the COD engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shipment {
    pub id: ShipmentId,
    /// Order number shown to people
    pub reference: String,
    pub carrier_id: CarrierId,
    pub seller_id: SellerId,
    pub payment_method: PaymentMethod,
    pub delivery_state: DeliveryState,
    pub cod_status: CodStatus,
    pub vendor_bill_status: VendorBillStatus,
    pub costs: CostInputs,
    pub advance: PlannedAdvance,
    /// Recomputed by the store on every write
    pub amounts: CodAmounts,
    pub cod_collected_at: Option<DateTime<Utc>>,
    pub cod_received_at: Option<DateTime<Utc>>,
    pub cod_settled_at: Option<DateTime<Utc>>,
    pub vendor_settled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub version: u64,
}

impl Shipment {
    pub fn new(
        reference: impl Into<String>,
        carrier_id: CarrierId,
        seller_id: SellerId,
        payment_method: PaymentMethod,
        costs: CostInputs,
    ) -> Self {
        let cod_status = if payment_method == PaymentMethod::Cod {
            CodStatus::Pending
        } else {
            CodStatus::NotApplicable
        };
        Self {
            id: ShipmentId::new(),
            reference: reference.into(),
            carrier_id,
            seller_id,
            payment_method,
            delivery_state: DeliveryState::Draft,
            cod_status,
            vendor_bill_status: VendorBillStatus::NoBill,
            costs,
            advance: PlannedAdvance::default(),
            amounts: CodAmounts::default(),
            cod_collected_at: None,
            cod_received_at: None,
            cod_settled_at: None,
            vendor_settled_at: None,
            created_at: Utc::now(),
            version: 0,
        }
    }

    /// Shorthand for a COD shipment
    pub fn cod(
        reference: impl Into<String>,
        carrier_id: CarrierId,
        seller_id: SellerId,
        costs: CostInputs,
    ) -> Self {
        Self::new(reference, carrier_id, seller_id, PaymentMethod::Cod, costs)
    }

    pub fn is_cod(&self) -> bool {
        self.payment_method == PaymentMethod::Cod
    }

    /// Why this shipment cannot join a batch, if it cannot
    pub fn batch_ineligibility(&self) -> Option<String> {
        if !self.is_cod() {
            return Some("not a COD shipment".to_string());
        }
        if self.delivery_state != DeliveryState::Delivered {
            return Some(format!("delivery state is {:?}", self.delivery_state));
        }
        if self.cod_status != CodStatus::CollectedAtCourier {
            return Some(format!("COD status is {}", self.cod_status));
        }
        None
    }

    pub fn is_batch_eligible(&self) -> bool {
        self.batch_ineligibility().is_none()
    }

    /// Cost inputs and advances are frozen once the carrier has handed the cash over
    pub fn costs_locked(&self) -> bool {
        matches!(
            self.cod_status,
            CodStatus::ReceivedFromCourier
                | CodStatus::Settled
                | CodStatus::Cancelled
                | CodStatus::Refunded
        )
    }

    fn ensure_costs_unlocked(&self) -> Result<()> {
        if self.costs_locked() {
            return Err(CodError::CostsLocked {
                shipment_id: self.id.to_string(),
                status: self.cod_status.to_string(),
            });
        }
        Ok(())
    }

    /// Replace the cost inputs; derived amounts follow on the next store write
    pub fn update_costs(&mut self, costs: CostInputs) -> Result<()> {
        self.ensure_costs_unlocked()?;
        self.costs = costs;
        Ok(())
    }

    /// Replace the planned advance; same lock as the cost inputs
    pub fn update_advance(&mut self, advance: PlannedAdvance) -> Result<()> {
        self.ensure_costs_unlocked()?;
        self.advance = advance;
        Ok(())
    }

    /// Move the COD status along a legal edge and stamp the matching timestamp
    pub fn transition_cod_status(&mut self, next: CodStatus, at: DateTime<Utc>) -> Result<()> {
        if !self.cod_status.can_transition_to(next) {
            return Err(CodError::InvalidCodTransition {
                shipment_id: self.id.to_string(),
                from: self.cod_status.to_string(),
                to: next.to_string(),
            });
        }
        match next {
            CodStatus::CollectedAtCourier => {
                if self.cod_status == CodStatus::ReceivedFromCourier {
                    self.cod_received_at = None;
                } else {
                    self.cod_collected_at = Some(at);
                }
            }
            CodStatus::ReceivedFromCourier => self.cod_received_at = Some(at),
            CodStatus::Settled => self.cod_settled_at = Some(at),
            _ => {}
        }
        self.cod_status = next;
        Ok(())
    }

    /// Apply a delivery event from the shipment collaborator
    pub fn apply_delivery_event(&mut self, event: DeliveryEvent, at: DateTime<Utc>) -> Result<()> {
        let target = match event {
            DeliveryEvent::Progress(state) => {
                if !state.is_in_flight() {
                    return Err(CodError::InvalidRequest {
                        message: format!("{:?} is not an in-flight delivery state", state),
                    });
                }
                self.delivery_state = state;
                if self.is_cod() && self.cod_status == CodStatus::NotApplicable {
                    self.cod_status = CodStatus::Pending;
                }
                return Ok(());
            }
            DeliveryEvent::Delivered => (DeliveryState::Delivered, CodStatus::CollectedAtCourier),
            DeliveryEvent::Returned => (DeliveryState::Returned, CodStatus::Refunded),
            DeliveryEvent::Cancelled => (DeliveryState::Cancelled, CodStatus::Cancelled),
        };

        if self.is_cod() {
            self.transition_cod_status(target.1, at)?;
        }
        self.delivery_state = target.0;
        Ok(())
    }

    /// Whole days since the carrier collected the cash
    pub fn days_since_collection(&self, as_of: DateTime<Utc>) -> Option<i64> {
        self.cod_collected_at
            .map(|collected| (as_of - collected).num_days())
    }
}
