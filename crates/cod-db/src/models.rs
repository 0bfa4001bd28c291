//! Database models - mapped from PostgreSQL tables
//!
//! Enumerations are stored as their snake_case serde names. Derived shipment
//! figures are written for reporting but always recomputed on read.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use cod_amounts::Calculator;
use cod_types::{
    Batch, BatchId, BatchOrigin, Carrier, CarrierId, CostInputs, CustomerPayout, Money, PaymentId,
    SellerId, Shipment, ShipmentId,
};

use crate::{DbError, DbResult};

pub(crate) fn enum_to_text<T: Serialize>(value: &T) -> DbResult<String> {
    match serde_json::to_value(value)? {
        serde_json::Value::String(s) => Ok(s),
        other => Err(DbError::Serialization(format!("expected a string tag, got {}", other))),
    }
}

pub(crate) fn enum_from_text<T: DeserializeOwned>(text: &str) -> DbResult<T> {
    Ok(serde_json::from_value(serde_json::Value::String(text.to_string()))?)
}

/// Stored versions are positive and far below `i64::MAX`
pub(crate) fn version_to_db(version: u64) -> i64 {
    i64::try_from(version).unwrap_or(i64::MAX)
}

fn version_from_db(version: i64) -> u64 {
    u64::try_from(version).unwrap_or_default()
}

fn money(value: Decimal) -> Money {
    Money::new(value.normalize())
}

// ============================================================================
// Carrier Models
// ============================================================================

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DbCarrier {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub collection_days: serde_json::Value,
    pub auto_create_batch: bool,
    pub created_at: DateTime<Utc>,
}

impl DbCarrier {
    pub fn into_carrier(self) -> DbResult<Carrier> {
        Ok(Carrier {
            id: CarrierId::from_uuid(self.id),
            code: self.code,
            name: self.name,
            collection_days: serde_json::from_value(self.collection_days)?,
            auto_create_batch: self.auto_create_batch,
        })
    }
}

// ============================================================================
// Shipment Models
// ============================================================================

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DbShipment {
    pub id: Uuid,
    pub reference: String,
    pub carrier_id: Uuid,
    pub seller_id: Uuid,
    pub payment_method: String,
    pub delivery_state: String,
    pub cod_status: String,
    pub vendor_bill_status: String,
    pub goods_value: Decimal,
    pub shipping_cost: Decimal,
    pub company_service_cost: Decimal,
    pub company_base_cost: Decimal,
    pub include_services_in_cod: bool,
    pub advance: serde_json::Value,
    pub declared_cod: Decimal,
    pub amount_from_carrier: Decimal,
    pub seller_net_payout: Decimal,
    pub cod_collected_at: Option<DateTime<Utc>>,
    pub cod_received_at: Option<DateTime<Utc>>,
    pub cod_settled_at: Option<DateTime<Utc>>,
    pub vendor_settled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub version: i64,
}

impl DbShipment {
    /// Row for a shipment whose amounts are already recomputed
    pub fn from_shipment(shipment: &Shipment) -> DbResult<Self> {
        Ok(Self {
            id: *shipment.id.as_uuid(),
            reference: shipment.reference.clone(),
            carrier_id: *shipment.carrier_id.as_uuid(),
            seller_id: *shipment.seller_id.as_uuid(),
            payment_method: enum_to_text(&shipment.payment_method)?,
            delivery_state: enum_to_text(&shipment.delivery_state)?,
            cod_status: shipment.cod_status.as_str().to_string(),
            vendor_bill_status: enum_to_text(&shipment.vendor_bill_status)?,
            goods_value: shipment.costs.goods_value.value(),
            shipping_cost: shipment.costs.shipping_cost.value(),
            company_service_cost: shipment.costs.company_service_cost.value(),
            company_base_cost: shipment.costs.company_base_cost.value(),
            include_services_in_cod: shipment.costs.include_services_in_cod,
            advance: serde_json::to_value(&shipment.advance)?,
            declared_cod: shipment.amounts.declared_cod.value(),
            amount_from_carrier: shipment.amounts.amount_from_carrier.value(),
            seller_net_payout: shipment.amounts.seller_net_payout.value(),
            cod_collected_at: shipment.cod_collected_at,
            cod_received_at: shipment.cod_received_at,
            cod_settled_at: shipment.cod_settled_at,
            vendor_settled_at: shipment.vendor_settled_at,
            created_at: shipment.created_at,
            version: version_to_db(shipment.version),
        })
    }

    pub fn into_shipment(self, calculator: &Calculator) -> DbResult<Shipment> {
        let mut shipment = Shipment {
            id: ShipmentId::from_uuid(self.id),
            reference: self.reference,
            carrier_id: CarrierId::from_uuid(self.carrier_id),
            seller_id: SellerId::from_uuid(self.seller_id),
            payment_method: enum_from_text(&self.payment_method)?,
            delivery_state: enum_from_text(&self.delivery_state)?,
            cod_status: enum_from_text(&self.cod_status)?,
            vendor_bill_status: enum_from_text(&self.vendor_bill_status)?,
            costs: CostInputs {
                goods_value: money(self.goods_value),
                shipping_cost: money(self.shipping_cost),
                company_service_cost: money(self.company_service_cost),
                company_base_cost: money(self.company_base_cost),
                include_services_in_cod: self.include_services_in_cod,
            },
            advance: serde_json::from_value(self.advance)?,
            amounts: Default::default(),
            cod_collected_at: self.cod_collected_at,
            cod_received_at: self.cod_received_at,
            cod_settled_at: self.cod_settled_at,
            vendor_settled_at: self.vendor_settled_at,
            created_at: self.created_at,
            version: version_from_db(self.version),
        };
        calculator.recompute(&mut shipment);
        Ok(shipment)
    }
}

// ============================================================================
// Batch Models
// ============================================================================

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DbBatch {
    pub id: Uuid,
    pub name: String,
    pub carrier_id: Uuid,
    pub collection_date: NaiveDate,
    pub origin: String,
    pub overdue_threshold_days: Option<i32>,
    pub state: String,
    pub totals: serde_json::Value,
    pub actual_received: Option<Decimal>,
    pub vendor_payment: Option<Uuid>,
    pub annotations: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub collected_at: Option<DateTime<Utc>>,
    pub vendor_settled_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub version: i64,
}

impl DbBatch {
    pub fn from_batch(batch: &Batch) -> DbResult<Self> {
        let overdue_threshold_days = match batch.origin {
            BatchOrigin::Overdue { threshold_days } => Some(
                i32::try_from(threshold_days)
                    .map_err(|_| DbError::InvalidInput(format!("threshold {} days", threshold_days)))?,
            ),
            _ => None,
        };
        Ok(Self {
            id: *batch.id.as_uuid(),
            name: batch.name.clone(),
            carrier_id: *batch.carrier_id.as_uuid(),
            collection_date: batch.collection_date,
            origin: batch.origin.as_str().to_string(),
            overdue_threshold_days,
            state: batch.state.as_str().to_string(),
            totals: serde_json::to_value(&batch.totals)?,
            actual_received: batch.actual_received.map(|m| m.value()),
            vendor_payment: batch.vendor_payment.as_ref().map(|p| *p.as_uuid()),
            annotations: serde_json::to_value(&batch.annotations)?,
            created_at: batch.created_at,
            confirmed_at: batch.confirmed_at,
            collected_at: batch.collected_at,
            vendor_settled_at: batch.vendor_settled_at,
            completed_at: batch.completed_at,
            cancelled_at: batch.cancelled_at,
            version: version_to_db(batch.version),
        })
    }

    pub fn into_batch(self, shipment_ids: BTreeSet<ShipmentId>) -> DbResult<Batch> {
        let origin = match self.origin.as_str() {
            "manual" => BatchOrigin::Manual,
            "scheduled" => BatchOrigin::Scheduled,
            "overdue" => BatchOrigin::Overdue {
                threshold_days: self
                    .overdue_threshold_days
                    .and_then(|d| u32::try_from(d).ok())
                    .unwrap_or_default(),
            },
            other => {
                return Err(DbError::Serialization(format!("unknown batch origin {}", other)));
            }
        };
        Ok(Batch {
            id: BatchId::from_uuid(self.id),
            name: self.name,
            carrier_id: CarrierId::from_uuid(self.carrier_id),
            collection_date: self.collection_date,
            origin,
            state: enum_from_text(&self.state)?,
            shipment_ids,
            totals: serde_json::from_value(self.totals)?,
            actual_received: self.actual_received.map(money),
            vendor_payment: self.vendor_payment.map(PaymentId::from_uuid),
            annotations: serde_json::from_value(self.annotations)?,
            created_at: self.created_at,
            confirmed_at: self.confirmed_at,
            collected_at: self.collected_at,
            vendor_settled_at: self.vendor_settled_at,
            completed_at: self.completed_at,
            cancelled_at: self.cancelled_at,
            version: version_from_db(self.version),
        })
    }
}

// ============================================================================
// Payout Models
// ============================================================================

/// A payout row; the full payout lives in `body`
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DbPayout {
    pub id: Uuid,
    pub batch_id: Uuid,
    pub seller_id: Uuid,
    pub state: String,
    pub net_amount: Decimal,
    pub body: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub version: i64,
}

impl DbPayout {
    pub fn from_payout(payout: &CustomerPayout) -> DbResult<Self> {
        Ok(Self {
            id: *payout.id.as_uuid(),
            batch_id: *payout.batch_id.as_uuid(),
            seller_id: *payout.seller_id.as_uuid(),
            state: payout.state.as_str().to_string(),
            net_amount: payout.net_amount().value(),
            body: serde_json::to_value(payout)?,
            created_at: payout.created_at,
            version: version_to_db(payout.version),
        })
    }

    pub fn into_payout(self) -> DbResult<CustomerPayout> {
        let mut payout: CustomerPayout = serde_json::from_value(self.body)?;
        payout.version = version_from_db(self.version);
        Ok(payout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Weekday;
    use cod_types::{BatchState, CodStatus, DeliveryState, PaymentMethod, VendorBillStatus};
    use rust_decimal_macros::dec;

    fn shipment() -> Shipment {
        Shipment::cod(
            "SO-1001",
            CarrierId::new(),
            SellerId::new(),
            CostInputs {
                goods_value: Money::new(dec!(100)),
                shipping_cost: Money::new(dec!(10)),
                company_service_cost: Money::new(dec!(15)),
                company_base_cost: Money::new(dec!(15)),
                include_services_in_cod: true,
            },
        )
    }

    #[test]
    fn test_enum_text_uses_serde_names() {
        assert_eq!(enum_to_text(&DeliveryState::OutForDelivery).unwrap(), "out_for_delivery");
        assert_eq!(enum_to_text(&VendorBillStatus::NoBill).unwrap(), "no_bill");
        let state: BatchState = enum_from_text("vendor_settled").unwrap();
        assert_eq!(state, BatchState::VendorSettled);
        assert!(enum_from_text::<PaymentMethod>("barter").is_err());
    }

    #[test]
    fn test_shipment_row_recomputes_amounts() {
        let mut original = shipment();
        original.version = 3;
        Calculator::default().recompute(&mut original);

        let mut row = DbShipment::from_shipment(&original).unwrap();
        assert_eq!(row.cod_status, CodStatus::Pending.as_str());
        assert_eq!(row.declared_cod, dec!(115));
        // stale denormalized figures are ignored on read
        row.declared_cod = dec!(1);
        row.goods_value = dec!(100.000000);

        let restored = row.into_shipment(&Calculator::default()).unwrap();
        assert_eq!(restored, original);
    }

    #[test]
    fn test_batch_row_keeps_overdue_threshold() {
        let mut batch = Batch::new(
            CarrierId::new(),
            NaiveDate::from_ymd_opt(2026, 10, 16).unwrap(),
            BatchOrigin::Overdue { threshold_days: 7 },
            [ShipmentId::new()],
        );
        batch.name = "BOSTA-20261016-001".into();
        batch.actual_received = Some(Money::new(dec!(99.5)));

        let row = DbBatch::from_batch(&batch).unwrap();
        assert_eq!(row.origin, "overdue");
        assert_eq!(row.overdue_threshold_days, Some(7));

        let restored = row.into_batch(batch.shipment_ids.clone()).unwrap();
        assert_eq!(restored, batch);
    }

    #[test]
    fn test_carrier_collection_days() {
        let row = DbCarrier {
            id: Uuid::new_v4(),
            code: "ARX".into(),
            name: "Aramex".into(),
            collection_days: serde_json::json!(["Mon", "Fri"]),
            auto_create_batch: true,
            created_at: Utc::now(),
        };
        let carrier = row.into_carrier().unwrap();
        assert_eq!(carrier.collection_days, vec![Weekday::Mon, Weekday::Fri]);
    }
}
