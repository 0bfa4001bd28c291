//! COD Database Layer
//!
//! PostgreSQL persistence for carriers, shipments, batches and payouts.
//!
//! # Layout
//!
//! - **Repositories** map one table each and know nothing of the engine
//! - **[`PgCodStore`]** implements the engine's `CodStore` on top of them,
//!   running every change set in a single transaction
//!
//! Open-batch claims live in `batch_claims`, keyed by shipment, so the
//! database itself refuses a second claim on a shipment.

pub mod config;
pub mod error;
pub mod models;
pub mod repos;
pub mod store;

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

pub use config::DatabaseConfig;
pub use error::{DbError, DbResult};
pub use models::*;
pub use repos::*;
pub use store::PgCodStore;

use cod_amounts::Calculator;

/// Database connection pool
pub struct Database {
    /// PostgreSQL connection pool
    pub pg: PgPool,
}

/// Result of [`Database::health_check`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthStatus {
    pub postgres: bool,
    pub healthy: bool,
}

impl Database {
    /// Connect to PostgreSQL
    pub async fn connect(config: &DatabaseConfig) -> DbResult<Self> {
        info!("Connecting to PostgreSQL: {}", config.postgres_url_masked());

        let pg = PgPoolOptions::new()
            .max_connections(config.pg_max_connections)
            .min_connections(config.pg_min_connections)
            .acquire_timeout(std::time::Duration::from_secs(config.pg_acquire_timeout_secs))
            .connect(&config.postgres_url)
            .await
            .map_err(|e| DbError::Connection(format!("PostgreSQL: {}", e)))?;

        info!("Connected to PostgreSQL");
        Ok(Self { pg })
    }

    /// Run database migrations
    pub async fn migrate(&self) -> DbResult<()> {
        info!("Running database migrations...");
        sqlx::migrate!("./migrations")
            .run(&self.pg)
            .await
            .map_err(|e| DbError::Migration(e.to_string()))?;
        info!("Migrations complete");
        Ok(())
    }

    pub async fn health_check(&self) -> DbResult<HealthStatus> {
        let pg_ok = sqlx::query("SELECT 1").fetch_one(&self.pg).await.is_ok();
        Ok(HealthStatus {
            postgres: pg_ok,
            healthy: pg_ok,
        })
    }

    /// Engine store over this pool
    pub fn cod_store(&self, calculator: Calculator) -> PgCodStore {
        PgCodStore::new(self.pg.clone(), calculator)
    }

    pub fn carrier_repo(&self) -> CarrierRepo {
        CarrierRepo::new(self.pg.clone())
    }

    pub fn shipment_repo(&self) -> ShipmentRepo {
        ShipmentRepo::new(self.pg.clone())
    }

    pub fn batch_repo(&self) -> BatchRepo {
        BatchRepo::new(self.pg.clone())
    }

    pub fn payout_repo(&self) -> PayoutRepo {
        PayoutRepo::new(self.pg.clone())
    }
}
