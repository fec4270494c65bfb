use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

/// Persisted controller configuration plus its last known phase, enough
/// to rebuild the controller after a restart.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ControllerRecord {
    pub id: String,
    pub wallet: String,
    pub contract: String,
    pub offsets: Vec<f64>,
    pub target_rate: Option<f64>,
    pub order_min: f64,
    pub state: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FillRecord {
    pub controller_id: String,
    pub pair: String,
    pub order_id: String,
    pub ts_ms: u128,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatRecord {
    pub controller_id: String,
    pub pair: String,
    pub value: f64,
    pub rate: f64,
    pub base_amount: f64,
    pub quote_amount: f64,
    pub ts_ms: u128,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WalletRecord {
    pub address: String,
    pub endpoint: String,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn list_controllers(&self) -> Result<Vec<ControllerRecord>>;
    async fn get_controller(&self, id: &str) -> Result<Option<ControllerRecord>>;
    async fn put_controller(&self, record: ControllerRecord) -> Result<()>;
    async fn delete_controller(&self, id: &str) -> Result<()>;
    async fn append_fills(&self, fills: &[FillRecord]) -> Result<()>;
    async fn append_stat(&self, stat: StatRecord) -> Result<()>;
    /// Replaces the wallet registry wholesale; stale entries drop out.
    async fn replace_wallets(&self, wallets: &[WalletRecord]) -> Result<()>;
    async fn list_wallets(&self) -> Result<Vec<WalletRecord>>;
}

#[derive(Default)]
pub struct MemoryStore {
    controllers: Mutex<HashMap<String, ControllerRecord>>,
    fills: Mutex<Vec<FillRecord>>,
    stats: Mutex<Vec<StatRecord>>,
    wallets: Mutex<Vec<WalletRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn fills(&self) -> Vec<FillRecord> {
        self.fills.lock().await.clone()
    }

    pub async fn stats(&self) -> Vec<StatRecord> {
        self.stats.lock().await.clone()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn list_controllers(&self) -> Result<Vec<ControllerRecord>> {
        let controllers = self.controllers.lock().await;
        let mut records: Vec<ControllerRecord> = controllers.values().cloned().collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }

    async fn get_controller(&self, id: &str) -> Result<Option<ControllerRecord>> {
        let controllers = self.controllers.lock().await;
        Ok(controllers.get(id).cloned())
    }

    async fn put_controller(&self, record: ControllerRecord) -> Result<()> {
        let mut controllers = self.controllers.lock().await;
        controllers.insert(record.id.clone(), record);
        Ok(())
    }

    async fn delete_controller(&self, id: &str) -> Result<()> {
        let mut controllers = self.controllers.lock().await;
        controllers.remove(id);
        Ok(())
    }

    async fn append_fills(&self, fills: &[FillRecord]) -> Result<()> {
        let mut stored = self.fills.lock().await;
        stored.extend_from_slice(fills);
        Ok(())
    }

    async fn append_stat(&self, stat: StatRecord) -> Result<()> {
        let mut stored = self.stats.lock().await;
        stored.push(stat);
        Ok(())
    }

    async fn replace_wallets(&self, wallets: &[WalletRecord]) -> Result<()> {
        let mut stored = self.wallets.lock().await;
        *stored = wallets.to_vec();
        Ok(())
    }

    async fn list_wallets(&self) -> Result<Vec<WalletRecord>> {
        Ok(self.wallets.lock().await.clone())
    }
}

/// Json files under a data directory: `controllers.json` and
/// `wallets.json` rewritten whole, `fills.jsonl` and `stats.jsonl`
/// append-only.
pub struct JsonFileStore {
    dir: PathBuf,
    // Serializes read-modify-write cycles on the json files.
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create data directory {}", dir.display()))?;
        Ok(Self {
            dir,
            lock: Mutex::new(()),
        })
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    fn read_records<T: serde::de::DeserializeOwned>(&self, name: &str) -> Result<Vec<T>> {
        let path = self.path(name);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse {}", path.display()))
    }

    fn write_records<T: Serialize>(&self, name: &str, records: &[T]) -> Result<()> {
        let path = self.path(name);
        let contents = serde_json::to_string_pretty(records)?;
        fs::write(&path, contents)
            .with_context(|| format!("failed to write {}", path.display()))?;
        debug!(path = %path.display(), count = records.len(), "store file written");
        Ok(())
    }

    fn append_lines<T: Serialize>(&self, name: &str, records: &[T]) -> Result<()> {
        let path = self.path(name);
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        for record in records {
            let line = serde_json::to_string(record)?;
            writeln!(file, "{line}")
                .with_context(|| format!("failed to append to {}", path.display()))?;
        }
        Ok(())
    }
}

const CONTROLLERS_FILE: &str = "controllers.json";
const WALLETS_FILE: &str = "wallets.json";
const FILLS_FILE: &str = "fills.jsonl";
const STATS_FILE: &str = "stats.jsonl";

#[async_trait]
impl Store for JsonFileStore {
    async fn list_controllers(&self) -> Result<Vec<ControllerRecord>> {
        let _guard = self.lock.lock().await;
        self.read_records(CONTROLLERS_FILE)
    }

    async fn get_controller(&self, id: &str) -> Result<Option<ControllerRecord>> {
        let _guard = self.lock.lock().await;
        let records: Vec<ControllerRecord> = self.read_records(CONTROLLERS_FILE)?;
        Ok(records.into_iter().find(|record| record.id == id))
    }

    async fn put_controller(&self, record: ControllerRecord) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut records: Vec<ControllerRecord> = self.read_records(CONTROLLERS_FILE)?;
        records.retain(|existing| existing.id != record.id);
        records.push(record);
        records.sort_by(|a, b| a.id.cmp(&b.id));
        self.write_records(CONTROLLERS_FILE, &records)
    }

    async fn delete_controller(&self, id: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut records: Vec<ControllerRecord> = self.read_records(CONTROLLERS_FILE)?;
        records.retain(|existing| existing.id != id);
        self.write_records(CONTROLLERS_FILE, &records)
    }

    async fn append_fills(&self, fills: &[FillRecord]) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.append_lines(FILLS_FILE, fills)
    }

    async fn append_stat(&self, stat: StatRecord) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.append_lines(STATS_FILE, std::slice::from_ref(&stat))
    }

    async fn replace_wallets(&self, wallets: &[WalletRecord]) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.write_records(WALLETS_FILE, wallets)
    }

    async fn list_wallets(&self) -> Result<Vec<WalletRecord>> {
        let _guard = self.lock.lock().await;
        self.read_records(WALLETS_FILE)
    }
}
