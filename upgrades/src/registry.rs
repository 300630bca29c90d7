//! Logical contract names and the proxies and implementations behind them.
//!
//! One JSON file per network lives under the registry directory. The file
//! is rewritten atomically on every mutation, before the change becomes
//! visible in memory, so a crash can never leave a half-written record.
use std::{
    collections::BTreeMap,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use alloy::primitives::Address;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

use crate::{artifact::StorageLayout, Config, Error, Result};

/// One implementation a proxy pointed at.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImplementationEntry {
    /// Address of the implementation contract.
    pub address: Address,
    /// Timestamp of the block that confirmed the deployment, in unix
    /// seconds.
    pub deployed_at: u64,
    /// Block that confirmed the deployment.
    pub block_number: u64,
    /// Name of the artifact the implementation was deployed from. Unknown
    /// for implementations found on-chain by reconciliation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
    /// Storage layout of the implementation, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout: Option<StorageLayout>,
}

/// Everything known about a deployed logical contract.
///
/// The current implementation is always the last history entry and the
/// proxy never changes once recorded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractRecord {
    name: String,
    proxy: Address,
    implementation: Address,
    history: Vec<ImplementationEntry>,
}

impl ContractRecord {
    fn new(name: &str, proxy: Address, entry: ImplementationEntry) -> Self {
        Self {
            name: name.to_string(),
            proxy,
            implementation: entry.address,
            history: vec![entry],
        }
    }

    /// Logical name of the contract.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Address of the proxy. Stable across upgrades.
    #[must_use]
    pub fn proxy(&self) -> Address {
        self.proxy
    }

    /// Address of the current implementation.
    #[must_use]
    pub fn implementation(&self) -> Address {
        self.implementation
    }

    /// Entry of the current implementation.
    #[must_use]
    pub fn current(&self) -> &ImplementationEntry {
        // Records are only built non-empty, and loading rejects empty ones.
        &self.history[self.history.len() - 1]
    }

    /// Every implementation the proxy pointed at, oldest first.
    #[must_use]
    pub fn history(&self) -> &[ImplementationEntry] {
        &self.history
    }

    fn push(&mut self, entry: ImplementationEntry) {
        self.implementation = entry.address;
        self.history.push(entry);
    }

    fn validate(&self, key: &str) -> Result<(), String> {
        if self.name != key {
            return Err(format!(
                "record stored under `{key}` is named `{}`",
                self.name
            ));
        }
        let Some(last) = self.history.last() else {
            return Err(format!("`{key}` has an empty history"));
        };
        if last.address != self.implementation {
            return Err(format!(
                "`{key}` points at {} but its last implementation is {}",
                self.implementation, last.address
            ));
        }
        Ok(())
    }
}

/// Persistent map from logical names to [`ContractRecord`]s for one
/// network.
///
/// Everything that deploys or upgrades under a name holds
/// [`Registry::lock`] for that name, so work on the same name is serialized
/// across every deployer sharing the registry.
#[derive(Debug)]
pub struct Registry {
    network: String,
    dir: PathBuf,
    path: PathBuf,
    records: RwLock<BTreeMap<String, ContractRecord>>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

/// Exclusive right to change the record of one name. Released on drop.
#[derive(Debug)]
pub struct NameLock<'a> {
    registry: &'a Registry,
    name: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for NameLock<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Forget the mutex once nobody holds or waits for it.
        self.registry
            .locks
            .remove_if(&self.name, |_, lock| Arc::strong_count(lock) == 1);
    }
}

impl Registry {
    /// Open the registry of `network` stored under `dir`.
    ///
    /// A missing file yields an empty registry. The directory is created on
    /// the first write.
    ///
    /// # Errors
    ///
    /// * [`Error::Configuration`] if `network` cannot name a file.
    /// * [`Error::InvalidRegistry`] if the file exists but is malformed.
    pub fn open(dir: impl AsRef<Path>, network: &str) -> Result<Self> {
        if network.is_empty()
            || !network
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(Error::Configuration(format!(
                "invalid network identifier `{network}`"
            )));
        }

        let dir = dir.as_ref().to_path_buf();
        let path = dir.join(format!("{network}.json"));
        let records = match fs::read_to_string(&path) {
            Ok(content) => parse(&path, &content)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), records = records.len(), "registry opened");

        Ok(Self {
            network: network.to_string(),
            dir,
            path,
            records: RwLock::new(records),
            locks: DashMap::new(),
        })
    }

    /// Open the registry named by `config`.
    ///
    /// # Errors
    ///
    /// See [`Registry::open`].
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::open(&config.registry_dir, &config.network)
    }

    /// Network this registry tracks.
    #[must_use]
    pub fn network(&self) -> &str {
        &self.network
    }

    /// File backing this registry.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot of the record named `name`.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::NotFound`] if `name` was never deployed.
    pub fn lookup(&self, name: &str) -> Result<ContractRecord> {
        self.records
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    /// Snapshot of every record, sorted by name.
    #[must_use]
    pub fn records(&self) -> Vec<ContractRecord> {
        self.records.read().values().cloned().collect()
    }

    /// Wait for exclusive access to `name`.
    ///
    /// Locks of different names are independent.
    pub async fn lock(&self, name: &str) -> NameLock<'_> {
        let lock = self.locks.entry(name.to_string()).or_default().clone();
        let guard = lock.lock_owned().await;
        NameLock { registry: self, name: name.to_string(), guard: Some(guard) }
    }

    /// Record the first deployment of `name`.
    ///
    /// # Errors
    ///
    /// * [`Error::DuplicateName`] if `name` already has a proxy.
    /// * [`Error::Io`] or [`Error::Json`] if the registry cannot be saved,
    ///   in which case nothing changes.
    pub fn record_deployment(
        &self,
        name: &str,
        proxy: Address,
        entry: ImplementationEntry,
    ) -> Result<ContractRecord> {
        let mut records = self.records.write();
        if let Some(existing) = records.get(name) {
            return Err(Error::DuplicateName {
                name: name.to_string(),
                proxy: existing.proxy,
            });
        }

        let record = ContractRecord::new(name, proxy, entry);
        let mut next = records.clone();
        next.insert(name.to_string(), record.clone());
        self.commit(&next)?;
        *records = next;

        info!(
            name,
            %proxy,
            implementation = %record.implementation,
            "deployment recorded"
        );
        Ok(record)
    }

    /// Append a new implementation to the history of `name`, provided the
    /// current implementation is still `expected` and `entry` is not older
    /// than it.
    ///
    /// # Errors
    ///
    /// * [`Error::UnknownContract`] if `name` was never deployed.
    /// * [`Error::HistoryConflict`] if the record moved on since `expected`
    ///   was read, or `entry` predates the current implementation.
    /// * [`Error::Io`] or [`Error::Json`] if the registry cannot be saved,
    ///   in which case nothing changes.
    pub fn record_upgrade(
        &self,
        name: &str,
        expected: Address,
        entry: ImplementationEntry,
    ) -> Result<ContractRecord> {
        let mut records = self.records.write();
        let mut record = records
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownContract(name.to_string()))?;

        let conflict = |reason: String| Error::HistoryConflict {
            name: name.to_string(),
            reason,
        };
        if record.implementation != expected {
            return Err(conflict(format!(
                "expected current implementation {expected}, found {}",
                record.implementation
            )));
        }
        let current = record.current().block_number;
        if entry.block_number < current {
            return Err(conflict(format!(
                "implementation from block {} predates the current one from block {current}",
                entry.block_number
            )));
        }
        record.push(entry);

        let mut next = records.clone();
        next.insert(name.to_string(), record.clone());
        self.commit(&next)?;
        *records = next;

        info!(
            name,
            proxy = %record.proxy,
            implementation = %record.implementation,
            version = record.history.len(),
            "upgrade recorded"
        );
        Ok(record)
    }

    /// Atomically replace the registry file with `records`.
    fn commit(&self, records: &BTreeMap<String, ContractRecord>) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let mut file = NamedTempFile::new_in(&self.dir)?;
        serde_json::to_writer_pretty(&mut file, records)?;
        file.write_all(b"\n")?;
        file.as_file().sync_all()?;
        file.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}

fn parse(path: &Path, content: &str) -> Result<BTreeMap<String, ContractRecord>> {
    let invalid = |reason: String| Error::InvalidRegistry {
        path: path.to_path_buf(),
        reason,
    };
    let records: BTreeMap<String, ContractRecord> =
        serde_json::from_str(content).map_err(|e| invalid(e.to_string()))?;
    for (key, record) in &records {
        record.validate(key).map_err(invalid)?;
    }
    Ok(records)
}
