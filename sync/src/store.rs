//! Durable pending invite/provision records.
//!
//! The store is read once and rewritten once per group pass, never per
//! operation. Concurrent runs against the same store are unsafe and must be
//! serialized externally.

use crate::error::SyncResult;
use crate::invites::{PendingInvite, PendingProvision};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const INVITES_FILE: &str = "pending_invites.json";
const PROVISIONS_FILE: &str = "pending_provisions.json";

pub trait InviteStore: Send + Sync {
    fn read_invites(&self) -> SyncResult<Vec<PendingInvite>>;
    fn write_invites(&self, invites: &[PendingInvite]) -> SyncResult<()>;
    fn read_provisions(&self) -> SyncResult<Vec<PendingProvision>>;
    fn write_provisions(&self, provisions: &[PendingProvision]) -> SyncResult<()>;
}

/// JSON files under a local `db/` directory.
pub struct JsonFileStore {
    dir: PathBuf
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Create the directory and empty record files if missing.
    pub fn ensure_initialized(&self) -> SyncResult<()> {
        if !self.dir.exists() {
            debug!(dir = %self.dir.display(), "creating invite store directory");
            fs::create_dir_all(&self.dir)?;
        }
        for file in [INVITES_FILE, PROVISIONS_FILE] {
            let path = self.dir.join(file);
            if !path.exists() {
                fs::write(&path, "[]")?;
            }
        }
        Ok(())
    }

    /// A missing or zero-byte file reads as empty. An unparseable file is
    /// logged and reads as empty; it gets rewritten at the end of the pass.
    fn read_records<T: DeserializeOwned>(&self, file: &str) -> SyncResult<Vec<T>> {
        let path = self.dir.join(file);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let data = fs::read_to_string(&path)?;
        if data.trim().is_empty() {
            return Ok(Vec::new());
        }
        match serde_json::from_str(&data) {
            Ok(records) => Ok(records),
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "invalid JSON in pending record file, treating as empty"
                );
                Ok(Vec::new())
            }
        }
    }

    fn write_records<T: Serialize>(&self, file: &str, records: &[T]) -> SyncResult<()> {
        let path = self.dir.join(file);
        let json = serde_json::to_string_pretty(records)?;
        fs::write(&path, json)?;
        Ok(())
    }

    fn path(&self, file: &str) -> PathBuf {
        self.dir.join(file)
    }

    pub fn invites_path(&self) -> PathBuf {
        self.path(INVITES_FILE)
    }
}

impl InviteStore for JsonFileStore {
    fn read_invites(&self) -> SyncResult<Vec<PendingInvite>> {
        self.read_records(INVITES_FILE)
    }

    fn write_invites(&self, invites: &[PendingInvite]) -> SyncResult<()> {
        self.write_records(INVITES_FILE, invites)
    }

    fn read_provisions(&self) -> SyncResult<Vec<PendingProvision>> {
        self.read_records(PROVISIONS_FILE)
    }

    fn write_provisions(&self, provisions: &[PendingProvision]) -> SyncResult<()> {
        self.write_records(PROVISIONS_FILE, provisions)
    }
}

/// Convenience for a store rooted at `<base>/db`.
pub fn default_store(base: &Path) -> JsonFileStore {
    JsonFileStore::new(base.join("db"))
}
