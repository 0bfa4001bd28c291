//! Batch repository: batch rows, membership and open-batch claims

use chrono::NaiveDate;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::{DbBatch, DbResult};

const BATCH_COLUMNS: &str = r#"
    id, name, carrier_id, collection_date, origin, overdue_threshold_days, state, totals,
    actual_received, vendor_payment, annotations, created_at, confirmed_at, collected_at,
    vendor_settled_at, completed_at, cancelled_at, version
"#;

/// Batch repository
pub struct BatchRepo {
    pool: PgPool,
}

impl BatchRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_id(&self, id: Uuid) -> DbResult<Option<DbBatch>> {
        let batch = sqlx::query_as::<_, DbBatch>(&format!(
            "SELECT {} FROM batches WHERE id = $1",
            BATCH_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(batch)
    }

    /// Batches matching the optional filters, oldest first
    pub async fn find(
        &self,
        carrier_id: Option<Uuid>,
        collection_date: Option<NaiveDate>,
        open_only: bool,
    ) -> DbResult<Vec<DbBatch>> {
        let batches = sqlx::query_as::<_, DbBatch>(&format!(
            r#"
            SELECT {}
            FROM batches
            WHERE ($1::uuid IS NULL OR carrier_id = $1)
              AND ($2::date IS NULL OR collection_date = $2)
              AND (NOT $3 OR state <> 'cancelled')
            ORDER BY created_at, name
            "#,
            BATCH_COLUMNS
        ))
        .bind(carrier_id)
        .bind(collection_date)
        .bind(open_only)
        .fetch_all(&self.pool)
        .await?;

        Ok(batches)
    }

    /// (batch, shipment) membership pairs of the given batches
    pub async fn members(&self, batch_ids: &[Uuid]) -> DbResult<Vec<(Uuid, Uuid)>> {
        let members = sqlx::query_as::<_, (Uuid, Uuid)>(
            "SELECT batch_id, shipment_id FROM batch_shipments WHERE batch_id = ANY($1)",
        )
        .bind(batch_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(members)
    }

    /// (shipment, batch) claims held on the given shipments
    pub async fn claims(&self, shipment_ids: &[Uuid]) -> DbResult<Vec<(Uuid, Uuid)>> {
        let claims = sqlx::query_as::<_, (Uuid, Uuid)>(
            "SELECT shipment_id, batch_id FROM batch_claims WHERE shipment_id = ANY($1)",
        )
        .bind(shipment_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(claims)
    }

    // =========================================================================
    // Transactional Writes
    // =========================================================================

    /// Serialize naming of batches for one carrier and day until commit
    pub async fn lock_sequence(
        conn: &mut PgConnection,
        carrier_id: Uuid,
        collection_date: NaiveDate,
    ) -> DbResult<()> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1::text || '/' || $2::text))")
            .bind(carrier_id)
            .bind(collection_date)
            .execute(&mut *conn)
            .await?;

        Ok(())
    }

    /// Sequence number the next batch of a carrier and day gets
    pub async fn next_sequence(
        conn: &mut PgConnection,
        carrier_id: Uuid,
        collection_date: NaiveDate,
    ) -> DbResult<u32> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM batches WHERE carrier_id = $1 AND collection_date = $2",
        )
        .bind(carrier_id)
        .bind(collection_date)
        .fetch_one(&mut *conn)
        .await?;

        Ok(u32::try_from(count).unwrap_or(u32::MAX - 1) + 1)
    }

    /// Insert a batch at version 1
    pub async fn insert(conn: &mut PgConnection, row: &DbBatch) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO batches (
                id, name, carrier_id, collection_date, origin, overdue_threshold_days, state,
                totals, actual_received, vendor_payment, annotations, created_at, confirmed_at,
                collected_at, vendor_settled_at, completed_at, cancelled_at, version
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, 1)
            "#,
        )
        .bind(row.id)
        .bind(&row.name)
        .bind(row.carrier_id)
        .bind(row.collection_date)
        .bind(&row.origin)
        .bind(row.overdue_threshold_days)
        .bind(&row.state)
        .bind(&row.totals)
        .bind(row.actual_received)
        .bind(row.vendor_payment)
        .bind(&row.annotations)
        .bind(row.created_at)
        .bind(row.confirmed_at)
        .bind(row.collected_at)
        .bind(row.vendor_settled_at)
        .bind(row.completed_at)
        .bind(row.cancelled_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Update a batch read at `row.version`; false if it moved on or is gone
    pub async fn update(conn: &mut PgConnection, row: &DbBatch) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE batches
            SET state = $2, actual_received = $3, vendor_payment = $4, annotations = $5,
                confirmed_at = $6, collected_at = $7, vendor_settled_at = $8,
                completed_at = $9, cancelled_at = $10, version = version + 1
            WHERE id = $1 AND version = $11
            "#,
        )
        .bind(row.id)
        .bind(&row.state)
        .bind(row.actual_received)
        .bind(row.vendor_payment)
        .bind(&row.annotations)
        .bind(row.confirmed_at)
        .bind(row.collected_at)
        .bind(row.vendor_settled_at)
        .bind(row.completed_at)
        .bind(row.cancelled_at)
        .bind(row.version)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn exists(conn: &mut PgConnection, id: Uuid) -> DbResult<bool> {
        let found: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM batches WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;

        Ok(found.is_some())
    }

    pub async fn set_totals(
        conn: &mut PgConnection,
        id: Uuid,
        totals: &serde_json::Value,
    ) -> DbResult<()> {
        sqlx::query("UPDATE batches SET totals = $2 WHERE id = $1")
            .bind(id)
            .bind(totals)
            .execute(&mut *conn)
            .await?;

        Ok(())
    }

    /// Replace the membership of a batch
    pub async fn set_members(
        conn: &mut PgConnection,
        batch_id: Uuid,
        shipment_ids: &[Uuid],
    ) -> DbResult<()> {
        sqlx::query("DELETE FROM batch_shipments WHERE batch_id = $1")
            .bind(batch_id)
            .execute(&mut *conn)
            .await?;
        sqlx::query(
            r#"
            INSERT INTO batch_shipments (batch_id, shipment_id)
            SELECT $1, UNNEST($2::uuid[])
            "#,
        )
        .bind(batch_id)
        .bind(shipment_ids)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    pub async fn release_claims(conn: &mut PgConnection, batch_id: Uuid) -> DbResult<()> {
        sqlx::query("DELETE FROM batch_claims WHERE batch_id = $1")
            .bind(batch_id)
            .execute(&mut *conn)
            .await?;

        Ok(())
    }

    /// Claim shipments for a batch and return the ones another batch holds.
    ///
    /// A claim being inserted by a concurrent transaction blocks here until
    /// that transaction ends, then counts as held.
    pub async fn claim(
        conn: &mut PgConnection,
        batch_id: Uuid,
        shipment_ids: &[Uuid],
    ) -> DbResult<Vec<Uuid>> {
        let claimed: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO batch_claims (shipment_id, batch_id)
            SELECT UNNEST($1::uuid[]), $2
            ON CONFLICT (shipment_id) DO NOTHING
            RETURNING shipment_id
            "#,
        )
        .bind(shipment_ids)
        .bind(batch_id)
        .fetch_all(&mut *conn)
        .await?;

        let mut contested: Vec<Uuid> = shipment_ids
            .iter()
            .filter(|id| !claimed.iter().any(|(c,)| c == *id))
            .copied()
            .collect();
        contested.sort();
        Ok(contested)
    }

    /// Open batches holding claims on the given shipments
    pub async fn claim_owners(conn: &mut PgConnection, shipment_ids: &[Uuid]) -> DbResult<Vec<Uuid>> {
        let owners: Vec<(Uuid,)> = sqlx::query_as(
            "SELECT DISTINCT batch_id FROM batch_claims WHERE shipment_id = ANY($1)",
        )
        .bind(shipment_ids)
        .fetch_all(&mut *conn)
        .await?;

        Ok(owners.into_iter().map(|(id,)| id).collect())
    }
}
