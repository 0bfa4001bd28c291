//! Where the CLI keeps engine state between runs
//!
//! Without a database the whole store lives in a JSON state file next to the
//! ledger snapshot. With `--database-url` the store is PostgreSQL and the
//! file keeps only the ledger.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use cod_db::{Database, DatabaseConfig};
use cod_ledger::{InMemoryLedger, LedgerSnapshot};
use cod_settlement::{CodEngine, SettlementConfig};
use cod_store::{CodStore, InMemoryStore, StoreSnapshot};

/// Contents of the state file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateFile {
    #[serde(default)]
    pub store: StoreSnapshot,
    #[serde(default)]
    pub ledger: LedgerSnapshot,
}

impl StateFile {
    /// Read a state file; a missing file is an empty state
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            debug!("No state file at {}, starting empty", path.display());
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
    }

    /// Write through a temporary file so a crash never leaves half a state
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, path).with_context(|| format!("replacing {}", path.display()))?;
        Ok(())
    }
}

/// An engine plus the backing state it has to write back
pub struct Workspace {
    path: PathBuf,
    memory: Option<Arc<InMemoryStore>>,
    ledger: Arc<InMemoryLedger>,
    pub engine: CodEngine,
}

impl Workspace {
    pub async fn open(
        path: PathBuf,
        database_url: Option<&str>,
        config: SettlementConfig,
    ) -> anyhow::Result<Self> {
        let state = StateFile::load(&path)?;
        let calculator = cod_amounts::Calculator::for_currency(&config.currency);
        let ledger = Arc::new(InMemoryLedger::from_snapshot(state.ledger));

        let (store, memory) = match database_url {
            Some(url) => {
                let db = connect(url).await?;
                (Arc::new(db.cod_store(calculator)) as Arc<dyn CodStore>, None)
            }
            None => {
                let memory = Arc::new(InMemoryStore::from_snapshot(state.store, calculator));
                (memory.clone() as Arc<dyn CodStore>, Some(memory))
            }
        };

        Ok(Self {
            engine: CodEngine::new(store, ledger.clone(), config),
            path,
            memory,
            ledger,
        })
    }

    pub fn store(&self) -> &Arc<dyn CodStore> {
        self.engine.store()
    }

    /// Persist the ledger and, in file mode, the store
    pub async fn save(&self) -> anyhow::Result<()> {
        let store = match &self.memory {
            Some(memory) => memory.snapshot(),
            None => StateFile::load(&self.path)?.store,
        };
        let state = StateFile {
            store,
            ledger: self.ledger.snapshot().await,
        };
        state.save(&self.path)?;
        debug!("State written to {}", self.path.display());
        Ok(())
    }
}

/// Pool settings from `env`, with `url` answering for `DATABASE_URL`
pub fn database_config(
    url: &str,
    env: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<DatabaseConfig> {
    let config = DatabaseConfig::from_lookup(|key| match key {
        "DATABASE_URL" => Some(url.to_string()),
        _ => env(key),
    })
    .context("invalid database settings")?;
    Ok(config)
}

/// Connect with pool settings from the environment and the given URL
pub async fn connect(url: &str) -> anyhow::Result<Database> {
    let config = database_config(url, |key| std::env::var(key).ok())?;
    info!("Using PostgreSQL store at {}", config.postgres_url_masked());
    Ok(Database::connect(&config).await?)
}
