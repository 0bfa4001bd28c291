//! Shipment repository

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::{DbResult, DbShipment};

pub(crate) const SHIPMENT_COLUMNS: &str = r#"
    s.id, s.reference, s.carrier_id, s.seller_id, s.payment_method, s.delivery_state,
    s.cod_status, s.vendor_bill_status, s.goods_value, s.shipping_cost,
    s.company_service_cost, s.company_base_cost, s.include_services_in_cod, s.advance,
    s.declared_cod, s.amount_from_carrier, s.seller_net_payout, s.cod_collected_at,
    s.cod_received_at, s.cod_settled_at, s.vendor_settled_at, s.created_at, s.version
"#;

/// Shipment repository
pub struct ShipmentRepo {
    pool: PgPool,
}

impl ShipmentRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_id(&self, id: Uuid) -> DbResult<Option<DbShipment>> {
        let shipment = sqlx::query_as::<_, DbShipment>(&format!(
            "SELECT {} FROM shipments s WHERE s.id = $1",
            SHIPMENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(shipment)
    }

    /// Rows for the given ids, in no particular order
    pub async fn find_many(&self, ids: &[Uuid]) -> DbResult<Vec<DbShipment>> {
        let shipments = sqlx::query_as::<_, DbShipment>(&format!(
            "SELECT {} FROM shipments s WHERE s.id = ANY($1)",
            SHIPMENT_COLUMNS
        ))
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(shipments)
    }

    /// Delivered COD shipments waiting at the carrier, oldest collection first
    pub async fn list_eligible(
        &self,
        carrier_id: Option<Uuid>,
        collected_on_or_before: Option<DateTime<Utc>>,
        include_claimed: bool,
    ) -> DbResult<Vec<DbShipment>> {
        let shipments = sqlx::query_as::<_, DbShipment>(&format!(
            r#"
            SELECT {}
            FROM shipments s
            WHERE s.payment_method = 'cod'
              AND s.delivery_state = 'delivered'
              AND s.cod_status = 'collected_at_courier'
              AND ($1::uuid IS NULL OR s.carrier_id = $1)
              AND ($2::timestamptz IS NULL OR s.cod_collected_at <= $2)
              AND ($3 OR NOT EXISTS (
                  SELECT 1 FROM batch_claims c WHERE c.shipment_id = s.id
              ))
            ORDER BY s.cod_collected_at NULLS FIRST, s.reference
            "#,
            SHIPMENT_COLUMNS
        ))
        .bind(carrier_id)
        .bind(collected_on_or_before)
        .bind(include_claimed)
        .fetch_all(&self.pool)
        .await?;

        Ok(shipments)
    }

    // =========================================================================
    // Transactional Writes
    // =========================================================================

    /// Insert a new shipment at version 1; false if the id is taken
    pub async fn insert(conn: &mut PgConnection, row: &DbShipment) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO shipments (
                id, reference, carrier_id, seller_id, payment_method, delivery_state,
                cod_status, vendor_bill_status, goods_value, shipping_cost,
                company_service_cost, company_base_cost, include_services_in_cod, advance,
                declared_cod, amount_from_carrier, seller_net_payout, cod_collected_at,
                cod_received_at, cod_settled_at, vendor_settled_at, created_at, version
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                    $15, $16, $17, $18, $19, $20, $21, $22, 1)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(row.id)
        .bind(&row.reference)
        .bind(row.carrier_id)
        .bind(row.seller_id)
        .bind(&row.payment_method)
        .bind(&row.delivery_state)
        .bind(&row.cod_status)
        .bind(&row.vendor_bill_status)
        .bind(row.goods_value)
        .bind(row.shipping_cost)
        .bind(row.company_service_cost)
        .bind(row.company_base_cost)
        .bind(row.include_services_in_cod)
        .bind(&row.advance)
        .bind(row.declared_cod)
        .bind(row.amount_from_carrier)
        .bind(row.seller_net_payout)
        .bind(row.cod_collected_at)
        .bind(row.cod_received_at)
        .bind(row.cod_settled_at)
        .bind(row.vendor_settled_at)
        .bind(row.created_at)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Update a shipment read at `row.version`; false if it moved on or is gone
    pub async fn update(conn: &mut PgConnection, row: &DbShipment) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE shipments
            SET reference = $2, carrier_id = $3, seller_id = $4, payment_method = $5,
                delivery_state = $6, cod_status = $7, vendor_bill_status = $8,
                goods_value = $9, shipping_cost = $10, company_service_cost = $11,
                company_base_cost = $12, include_services_in_cod = $13, advance = $14,
                declared_cod = $15, amount_from_carrier = $16, seller_net_payout = $17,
                cod_collected_at = $18, cod_received_at = $19, cod_settled_at = $20,
                vendor_settled_at = $21, version = version + 1
            WHERE id = $1 AND version = $22
            "#,
        )
        .bind(row.id)
        .bind(&row.reference)
        .bind(row.carrier_id)
        .bind(row.seller_id)
        .bind(&row.payment_method)
        .bind(&row.delivery_state)
        .bind(&row.cod_status)
        .bind(&row.vendor_bill_status)
        .bind(row.goods_value)
        .bind(row.shipping_cost)
        .bind(row.company_service_cost)
        .bind(row.company_base_cost)
        .bind(row.include_services_in_cod)
        .bind(&row.advance)
        .bind(row.declared_cod)
        .bind(row.amount_from_carrier)
        .bind(row.seller_net_payout)
        .bind(row.cod_collected_at)
        .bind(row.cod_received_at)
        .bind(row.cod_settled_at)
        .bind(row.vendor_settled_at)
        .bind(row.version)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn exists(conn: &mut PgConnection, id: Uuid) -> DbResult<bool> {
        let found: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM shipments WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;

        Ok(found.is_some())
    }

    /// Which of `ids` have no shipment row
    pub async fn missing(conn: &mut PgConnection, ids: &[Uuid]) -> DbResult<Vec<Uuid>> {
        let missing: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT wanted.id
            FROM UNNEST($1::uuid[]) AS wanted(id)
            WHERE NOT EXISTS (SELECT 1 FROM shipments s WHERE s.id = wanted.id)
            ORDER BY wanted.id
            "#,
        )
        .bind(ids)
        .fetch_all(&mut *conn)
        .await?;

        Ok(missing.into_iter().map(|(id,)| id).collect())
    }

    /// Current members of a batch as seen inside the transaction
    pub async fn members_of(conn: &mut PgConnection, batch_id: Uuid) -> DbResult<Vec<DbShipment>> {
        let shipments = sqlx::query_as::<_, DbShipment>(&format!(
            r#"
            SELECT {}
            FROM shipments s
            JOIN batch_shipments m ON m.shipment_id = s.id
            WHERE m.batch_id = $1
            "#,
            SHIPMENT_COLUMNS
        ))
        .bind(batch_id)
        .fetch_all(&mut *conn)
        .await?;

        Ok(shipments)
    }
}
