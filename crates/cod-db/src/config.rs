//! Database configuration

use serde::{Deserialize, Serialize};

use crate::{DbError, DbResult};

const DEFAULT_URL: &str = "postgresql://localhost/cod";

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub postgres_url: String,
    /// Maximum PostgreSQL connections
    pub pg_max_connections: u32,
    /// Minimum PostgreSQL connections
    pub pg_min_connections: u32,
    /// Connection acquire timeout in seconds
    pub pg_acquire_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            postgres_url: DEFAULT_URL.to_string(),
            pg_max_connections: 20,
            pg_min_connections: 2,
            pg_acquire_timeout_secs: 30,
        }
    }
}

impl DatabaseConfig {
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            postgres_url: url.into(),
            ..Self::default()
        }
    }

    /// Create config from environment variables
    pub fn from_env() -> DbResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `DATABASE_URL` is required
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> DbResult<Self> {
        let defaults = Self::default();
        let postgres_url = lookup("DATABASE_URL")
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| DbError::InvalidInput("DATABASE_URL must be set".to_string()))?;
        let config = Self {
            postgres_url,
            pg_max_connections: lookup("PG_MAX_CONNECTIONS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.pg_max_connections),
            pg_min_connections: lookup("PG_MIN_CONNECTIONS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.pg_min_connections),
            pg_acquire_timeout_secs: lookup("PG_ACQUIRE_TIMEOUT")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.pg_acquire_timeout_secs),
        };
        if config.pg_min_connections > config.pg_max_connections {
            return Err(DbError::InvalidInput(format!(
                "PG_MIN_CONNECTIONS ({}) exceeds PG_MAX_CONNECTIONS ({})",
                config.pg_min_connections, config.pg_max_connections
            )));
        }
        Ok(config)
    }

    /// Mask sensitive parts of the PostgreSQL URL for logging
    pub fn postgres_url_masked(&self) -> String {
        mask_url(&self.postgres_url)
    }
}

fn mask_url(url: &str) -> String {
    // Replace the password with ***
    if let (Some(at_pos), Some(scheme_end)) = (url.rfind('@'), url.find("://")) {
        if at_pos > scheme_end {
            let scheme = &url[..scheme_end + 3];
            let after_at = &url[at_pos..];
            let user_pass = &url[scheme_end + 3..at_pos];
            if let Some(colon_pos) = user_pass.find(':') {
                let user = &user_pass[..colon_pos];
                return format!("{}{}:***{}", scheme, user, after_at);
            }
        }
    }
    url.to_string()
}
