//! Seller payout repository

use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::{DbPayout, DbResult};

const PAYOUT_COLUMNS: &str = "id, batch_id, seller_id, state, net_amount, body, created_at, version";

/// Payout repository
pub struct PayoutRepo {
    pool: PgPool,
}

impl PayoutRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_id(&self, id: Uuid) -> DbResult<Option<DbPayout>> {
        let payout = sqlx::query_as::<_, DbPayout>(&format!(
            "SELECT {} FROM payouts WHERE id = $1",
            PAYOUT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(payout)
    }

    pub async fn list_by_batch(&self, batch_id: Uuid) -> DbResult<Vec<DbPayout>> {
        let payouts = sqlx::query_as::<_, DbPayout>(&format!(
            "SELECT {} FROM payouts WHERE batch_id = $1 ORDER BY created_at, id",
            PAYOUT_COLUMNS
        ))
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(payouts)
    }

    // =========================================================================
    // Transactional Writes
    // =========================================================================

    /// Insert at version 1; false if the id is taken
    pub async fn insert(conn: &mut PgConnection, row: &DbPayout) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO payouts (id, batch_id, seller_id, state, net_amount, body, created_at, version)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 1)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(row.id)
        .bind(row.batch_id)
        .bind(row.seller_id)
        .bind(&row.state)
        .bind(row.net_amount)
        .bind(&row.body)
        .bind(row.created_at)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Update a payout read at `row.version`; false if it moved on or is gone
    pub async fn update(conn: &mut PgConnection, row: &DbPayout) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE payouts
            SET state = $2, net_amount = $3, body = $4, version = version + 1
            WHERE id = $1 AND version = $5
            "#,
        )
        .bind(row.id)
        .bind(&row.state)
        .bind(row.net_amount)
        .bind(&row.body)
        .bind(row.version)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn exists(conn: &mut PgConnection, id: Uuid) -> DbResult<bool> {
        let found: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM payouts WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;

        Ok(found.is_some())
    }

    /// False if there was no such payout
    pub async fn delete(conn: &mut PgConnection, id: Uuid) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM payouts WHERE id = $1")
            .bind(id)
            .execute(&mut *conn)
            .await?;

        Ok(result.rows_affected() == 1)
    }
}
