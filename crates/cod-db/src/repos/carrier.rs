//! Carrier repository

use sqlx::PgPool;
use uuid::Uuid;

use cod_types::Carrier;

use crate::{DbCarrier, DbResult};

const CARRIER_COLUMNS: &str = "id, code, name, collection_days, auto_create_batch, created_at";

/// Carrier repository
pub struct CarrierRepo {
    pool: PgPool,
}

impl CarrierRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert or replace a carrier's settings
    pub async fn upsert(&self, carrier: &Carrier) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO carriers (id, code, name, collection_days, auto_create_batch)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE
            SET code = EXCLUDED.code,
                name = EXCLUDED.name,
                collection_days = EXCLUDED.collection_days,
                auto_create_batch = EXCLUDED.auto_create_batch
            "#,
        )
        .bind(carrier.id.as_uuid())
        .bind(&carrier.code)
        .bind(&carrier.name)
        .bind(serde_json::to_value(&carrier.collection_days)?)
        .bind(carrier.auto_create_batch)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn find_by_id(&self, id: Uuid) -> DbResult<Option<DbCarrier>> {
        let carrier = sqlx::query_as::<_, DbCarrier>(&format!(
            "SELECT {} FROM carriers WHERE id = $1",
            CARRIER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(carrier)
    }

    /// All carriers ordered by code
    pub async fn list(&self) -> DbResult<Vec<DbCarrier>> {
        let carriers = sqlx::query_as::<_, DbCarrier>(&format!(
            "SELECT {} FROM carriers ORDER BY code",
            CARRIER_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(carriers)
    }
}
